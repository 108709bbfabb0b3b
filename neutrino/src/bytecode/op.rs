/// Bytecode opcodes.
///
/// Every instruction is one `u16` opcode unit followed by a fixed number
/// of `u16` operand units, so its size is known from the opcode alone.
/// Constant pool indices, jump targets and counts are all operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Push a constant pool entry.
    /// Operands: `index`
    Push = 0,

    /// Pop the result and return it to the caller.
    Return = 1,

    /// Push the toplevel binding of a name.
    /// Operands: `name` (constant index of a String)
    Global = 2,

    /// Call the lambda below the top `argc` values.
    /// Operands: `argc`
    Call = 3,

    /// Pop `height` values from under the top value.
    /// Operands: `height`
    Slap = 4,

    /// Push an argument of the current frame, 0 is the last pushed.
    /// Operands: `index`
    Argument = 5,

    Void = 6,
    Null = 7,
    True = 8,
    False = 9,

    /// Discard the top `height` values.
    /// Operands: `height`
    Pop = 10,

    /// Pop a condition and jump if it is true.
    /// Operands: `target` (absolute unit offset)
    IfTrue = 11,

    /// Operands: `target`
    Goto = 12,

    /// Send a message to the receiver below the top `argc` values.
    /// Operands: `selector`, `argc`, `keymap` (constant indices, keymap may be an empty Tuple)
    Invoke = 13,

    /// Run a native builtin on `this` and `argc` arguments, push the result.
    /// Operands: `argc`, `index`
    Builtin = 14,

    /// Pop `length` values into a Tuple.
    /// Operands: `length`
    Tuple = 15,

    /// Pop `terms` Strings and push their concatenation.
    /// Operands: `terms`
    Concat = 16,

    /// Operands: `index`
    LoadLocal = 17,

    /// Debug check that the operand stack has the expected height.
    /// Operands: `expected`
    CheckHeight = 18,

    /// Push a captured value of the running lambda.
    /// Operands: `index`
    Outer = 19,

    /// Pop `count` values and push a copy of a lambda capturing them.
    /// Operands: `lambda`, `count`
    Closure = 20,

    /// Invoke the innermost handler for `name` with `argc` arguments.
    /// Operands: `name`, `argc`
    Raise = 23,

    /// Push a condition marker.
    /// Operands: `handlers` (constant Tuple of name, Lambda pairs)
    Mark = 24,

    /// Pop the innermost condition marker.
    Unmark = 25,

    /// Pop field values and a protocol into a new Instance.
    /// Operands: `template` (constant Layout)
    New = 26,

    /// Push a field of the receiver.
    /// Operands: `index`, `argc`
    LoadField = 27,

    /// Store the top value into a field of the receiver.
    /// Operands: `index`, `argc`
    StoreField = 28,

    /// Pop a lambda and push a new, unstarted Task running it.
    Task = 29,

    /// Hand the top value back to the attaching task.
    Yield = 30,

    /// Store the top value into a local, leaving it on the stack.
    /// Operands: `index`
    StoreLocal = 31,

    /// Pop a Task and run it until it yields or returns.
    Attach = 32,

    /// Push the argument bound to a keyword of the current call.
    /// Operands: `index`
    Keyword = 33,

    /// Like `Invoke`, but only considers methods scoring worse than the
    /// running one.
    /// Operands: `selector`, `argc`, `keymap`, `signature`
    InvokeSuper = 34,

    /// Exchange the top two values.
    Swap = 35,

    /// Pop a condition and jump if it is false.
    /// Operands: `target`
    IfFalse = 36,

    /// Pop a target and push an open Forwarder to it.
    /// Operands: `kind` (0 open, 1 closed)
    NewForwarder = 37,

    /// Pop a target, bind the Forwarder below it and close it.
    BindForwarder = 38,

    /// Pop a value and push a Cell holding it.
    NewCell = 39,

    /// Replace a Cell with its contents.
    LoadCell = 40,

    /// Pop a value and a Cell, store into the Cell and push the value.
    StoreCell = 41,
}

impl Opcode {
    pub const ALL: [Opcode; 40] = [
        Opcode::Push,
        Opcode::Return,
        Opcode::Global,
        Opcode::Call,
        Opcode::Slap,
        Opcode::Argument,
        Opcode::Void,
        Opcode::Null,
        Opcode::True,
        Opcode::False,
        Opcode::Pop,
        Opcode::IfTrue,
        Opcode::Goto,
        Opcode::Invoke,
        Opcode::Builtin,
        Opcode::Tuple,
        Opcode::Concat,
        Opcode::LoadLocal,
        Opcode::CheckHeight,
        Opcode::Outer,
        Opcode::Closure,
        Opcode::Raise,
        Opcode::Mark,
        Opcode::Unmark,
        Opcode::New,
        Opcode::LoadField,
        Opcode::StoreField,
        Opcode::Task,
        Opcode::Yield,
        Opcode::StoreLocal,
        Opcode::Attach,
        Opcode::Keyword,
        Opcode::InvokeSuper,
        Opcode::Swap,
        Opcode::IfFalse,
        Opcode::NewForwarder,
        Opcode::BindForwarder,
        Opcode::NewCell,
        Opcode::LoadCell,
        Opcode::StoreCell,
    ];

    /// Number of operand units following the opcode.
    pub const fn argc(self) -> usize {
        match self {
            Opcode::Return
            | Opcode::Void
            | Opcode::Null
            | Opcode::True
            | Opcode::False
            | Opcode::Unmark
            | Opcode::Task
            | Opcode::Yield
            | Opcode::Attach
            | Opcode::Swap
            | Opcode::BindForwarder
            | Opcode::NewCell
            | Opcode::LoadCell
            | Opcode::StoreCell => 0,
            Opcode::Push
            | Opcode::Global
            | Opcode::Call
            | Opcode::Slap
            | Opcode::Argument
            | Opcode::Pop
            | Opcode::IfTrue
            | Opcode::Goto
            | Opcode::Tuple
            | Opcode::Concat
            | Opcode::LoadLocal
            | Opcode::CheckHeight
            | Opcode::Outer
            | Opcode::Mark
            | Opcode::New
            | Opcode::StoreLocal
            | Opcode::Keyword
            | Opcode::IfFalse
            | Opcode::NewForwarder => 1,
            Opcode::Builtin
            | Opcode::Closure
            | Opcode::Raise
            | Opcode::LoadField
            | Opcode::StoreField => 2,
            Opcode::Invoke => 3,
            Opcode::InvokeSuper => 4,
        }
    }

    /// Total units the instruction occupies.
    #[inline]
    pub const fn size(self) -> usize {
        self.argc() + 1
    }
}

/// Opcode by unit value, `None` for unassigned units.
const DECODE: [Option<Opcode>; 42] = {
    let mut table = [None; 42];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        table[op as usize] = Some(op);
        i += 1;
    }
    table
};

impl TryFrom<u16> for Opcode {
    type Error = u16;

    #[inline]
    fn try_from(unit: u16) -> Result<Self, u16> {
        DECODE.get(unit as usize).copied().flatten().ok_or(unit)
    }
}
