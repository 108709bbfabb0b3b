use crate::{
    Runtime, Signal, StringObject, Tagged, Tuple, Value,
    format::{ValueDisplay, to_display_string},
    tagged::{SMALL_INTEGER_MAX, SMALL_INTEGER_MIN},
    to, to_small_integer, values_equal,
};

pub type BuiltinFunction = fn(&mut BuiltinContext) -> Result<Value, Signal>;

/// A native function reachable through the `builtin` instruction.
// `this` does not count as an argument
#[derive(Debug, Copy, Clone)]
pub struct Builtin {
    pub index: u16,
    pub name: &'static str,
    pub argc: usize,
    pub function: BuiltinFunction,
}

impl Builtin {
    pub const fn new(index: u16, name: &'static str, argc: usize, function: BuiltinFunction) -> Self {
        Self {
            index,
            name,
            argc,
            function,
        }
    }
}

/// What a builtin sees. Builtins may allocate but never collect, so
/// `this` and the arguments stay valid for the whole call.
pub struct BuiltinContext<'rt, 'arg> {
    pub runtime: &'rt mut Runtime,
    pub this: Value,
    /// In push order.
    pub arguments: &'arg [Value],
}

impl BuiltinContext<'_, '_> {
    fn argument(&self, index: usize) -> Value {
        self.arguments[index]
    }

    fn boolean(&self, value: bool) -> Value {
        self.runtime.roots().boolean(value)
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin::new(0, "string_length", 0, string_length),
    Builtin::new(1, "string_eq", 1, string_eq),
    Builtin::new(2, "string_plus", 1, string_plus),
    Builtin::new(10, "integer_plus", 1, integer_plus),
    Builtin::new(11, "integer_minus", 1, integer_minus),
    Builtin::new(12, "integer_times", 1, integer_times),
    Builtin::new(13, "integer_divide", 1, integer_divide),
    Builtin::new(14, "integer_abs", 0, integer_abs),
    Builtin::new(15, "integer_less", 1, integer_less),
    Builtin::new(20, "object_eq", 1, object_eq),
    Builtin::new(21, "object_to_string", 0, object_to_string),
    Builtin::new(30, "tuple_length", 0, tuple_length),
    Builtin::new(31, "tuple_get", 1, tuple_get),
    Builtin::new(100, "fail", 0, fail),
    Builtin::new(101, "print", 1, print),
];

pub fn get_builtin(index: u16) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.index == index)
}

// ── strings ─────────────────────────────────────────────────────────

fn string_length(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let this = to::<StringObject>(ctx.this)?;
    Ok(Value::from_usize(this.len()))
}

fn string_eq(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let this = to::<StringObject>(ctx.this)?;
    let that = to::<StringObject>(ctx.argument(0))?;
    Ok(ctx.boolean(this.chars() == that.chars()))
}

/// Concatenates Strings into one fresh String.
pub(crate) fn concat_strings(
    runtime: &mut Runtime,
    terms: &[Value],
) -> Result<Tagged<StringObject>, Signal> {
    let mut length = 0;
    for &term in terms {
        length += to::<StringObject>(term)?.len();
    }
    let mut result = runtime.factory().new_empty_string(length)?;
    let chars = result.chars_mut();
    let mut offset = 0;
    for &term in terms {
        let term = to::<StringObject>(term)?;
        chars[offset..offset + term.len()].copy_from_slice(term.chars());
        offset += term.len();
    }
    Ok(result)
}

fn string_plus(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let terms = [ctx.this, ctx.argument(0)];
    Ok(concat_strings(ctx.runtime, &terms)?.value())
}

// ── integers ────────────────────────────────────────────────────────

type IntegerOp = fn(i64, i64) -> Option<i64>;

fn small_integer(value: Option<i64>) -> Result<Value, Signal> {
    match value {
        Some(n) if (SMALL_INTEGER_MIN..=SMALL_INTEGER_MAX).contains(&n) => Ok(Value::from_i64(n)),
        _ => Err(Signal::FatalError),
    }
}

fn integer_binop(ctx: &mut BuiltinContext, op: IntegerOp) -> Result<Value, Signal> {
    let a = to_small_integer(ctx.this)?;
    let b = to_small_integer(ctx.argument(0))?;
    small_integer(op(a, b))
}

fn integer_plus(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    integer_binop(ctx, i64::checked_add)
}

fn integer_minus(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    integer_binop(ctx, i64::checked_sub)
}

fn integer_times(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    integer_binop(ctx, i64::checked_mul)
}

fn integer_divide(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    integer_binop(ctx, i64::checked_div)
}

fn integer_abs(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    small_integer(to_small_integer(ctx.this)?.checked_abs())
}

fn integer_less(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let a = to_small_integer(ctx.this)?;
    let b = to_small_integer(ctx.argument(0))?;
    Ok(ctx.boolean(a < b))
}

// ── objects ─────────────────────────────────────────────────────────

fn object_eq(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    Ok(ctx.boolean(values_equal(ctx.this, ctx.argument(0))))
}

fn object_to_string(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let text = to_display_string(ctx.this);
    Ok(ctx.runtime.factory().new_string(&text)?.value())
}

fn tuple_length(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    Ok(Value::from_usize(to::<Tuple>(ctx.this)?.len()))
}

fn tuple_get(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let tuple = to::<Tuple>(ctx.this)?;
    let index = to_small_integer(ctx.argument(0))?;
    usize::try_from(index)
        .ok()
        .and_then(|i| tuple.elements().get(i).copied())
        .ok_or(Signal::Nothing)
}

fn fail(_ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    Err(Signal::FatalError)
}

fn print(ctx: &mut BuiltinContext) -> Result<Value, Signal> {
    let text = ValueDisplay::unquoted(ctx.argument(0)).to_string();
    ctx.runtime.print_line(&text);
    Ok(ctx.runtime.roots().void)
}
