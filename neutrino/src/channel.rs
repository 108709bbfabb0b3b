//! Translation between heap values and plain values at the channel
//! boundary.
//!
//! Requests arrive as plain values, are imported into the heap, dispatched
//! through a one-off trampoline and the result is exported back. Nothing
//! that goes wrong in between escapes as an error: the caller sees `Void`
//! and the log gets the reason.
use std::fmt;

use crate::{
    Runtime, RuntimeError, Signal, StringObject, Tuple, Value, ValueKind,
    bytecode::CodeBuilder,
    format::to_display_string,
    refs::RefScope,
    tagged::{SMALL_INTEGER_MAX, SMALL_INTEGER_MIN},
};

/// A value that can live outside a heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainValue {
    Void,
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    Tuple(Vec<PlainValue>),
}

impl fmt::Display for PlainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlainValue::Void => f.write_str("#<void>"),
            PlainValue::Null => f.write_str("null"),
            PlainValue::Bool(b) => write!(f, "{b}"),
            PlainValue::Integer(n) => write!(f, "{n}"),
            PlainValue::String(s) => write!(f, "{s:?}"),
            PlainValue::Tuple(elements) => {
                f.write_str("(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<i64> for PlainValue {
    fn from(n: i64) -> Self {
        PlainValue::Integer(n)
    }
}

impl From<&str> for PlainValue {
    fn from(s: &str) -> Self {
        PlainValue::String(s.to_string())
    }
}

impl From<bool> for PlainValue {
    fn from(b: bool) -> Self {
        PlainValue::Bool(b)
    }
}

/// `receiver.selector(arguments...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub receiver: PlainValue,
    pub selector: String,
    pub arguments: Vec<PlainValue>,
}

impl Request {
    pub fn new(receiver: impl Into<PlainValue>, selector: &str, arguments: Vec<PlainValue>) -> Self {
        Self {
            receiver: receiver.into(),
            selector: selector.to_string(),
            arguments,
        }
    }
}

/// Copies `value` into the heap. The result is rooted in `scope`.
pub fn import(
    runtime: &mut Runtime,
    scope: &RefScope,
    value: &PlainValue,
) -> Result<Value, RuntimeError> {
    let roots = runtime.roots();
    let imported = match value {
        PlainValue::Void => roots.void,
        PlainValue::Null => roots.null,
        PlainValue::Bool(b) => roots.boolean(*b),
        PlainValue::Integer(n) if (SMALL_INTEGER_MIN..=SMALL_INTEGER_MAX).contains(n) => {
            Value::from_i64(*n)
        }
        PlainValue::Integer(_) => return Err(Signal::TypeMismatch.into()),
        PlainValue::String(s) => runtime
            .gc_safe(|runtime| runtime.new_string(s))?
            .value(),
        PlainValue::Tuple(elements) => {
            let mut rooted = Vec::with_capacity(elements.len());
            for element in elements {
                let element = import(runtime, scope, element)?;
                rooted.push(scope.new_value_ref(element));
            }
            runtime
                .gc_safe(|runtime| {
                    let values: Vec<Value> = rooted.iter().map(|r| r.value()).collect();
                    runtime.factory().new_tuple_from(&values)
                })?
                .value()
        }
    };
    Ok(scope.new_value_ref(imported).value())
}

/// Copies `value` out of the heap. Anything without a plain counterpart
/// is rendered as text.
pub fn export(runtime: &Runtime, value: Value) -> PlainValue {
    let roots = runtime.roots();
    if value == roots.void {
        return PlainValue::Void;
    }
    if value == roots.null {
        return PlainValue::Null;
    }
    if value == roots.true_value || value == roots.false_value {
        return PlainValue::Bool(value == roots.true_value);
    }
    match value.kind() {
        ValueKind::SmallInteger(n) => PlainValue::Integer(n),
        ValueKind::Object(_) => {
            if let Some(string) = value.as_object::<StringObject>() {
                PlainValue::String(string.to_rust_string())
            } else if let Some(tuple) = value.as_object::<Tuple>() {
                PlainValue::Tuple(tuple.elements().iter().map(|&e| export(runtime, e)).collect())
            } else {
                PlainValue::String(to_display_string(value))
            }
        }
        ValueKind::Signal(_) => PlainValue::Void,
    }
}

fn dispatch(runtime: &mut Runtime, request: &Request) -> Result<PlainValue, RuntimeError> {
    let refs = runtime.refs();
    let scope = refs.enter();
    let receiver = import(runtime, &scope, &request.receiver)?;
    let receiver = scope.new_value_ref(receiver);
    let mut arguments = Vec::with_capacity(request.arguments.len());
    for argument in &request.arguments {
        let argument = import(runtime, &scope, argument)?;
        arguments.push(scope.new_value_ref(argument));
    }
    let argc = arguments.len();
    let selector = runtime.gc_safe(|runtime| {
        let keywords = runtime.roots().empty_tuple.cast();
        let mut factory = runtime.factory();
        let name = factory.new_string(&request.selector)?;
        factory.new_selector(name, argc, keywords, false)
    })?;
    let selector = scope.new_ref(selector);

    // The trampoline holds everything it needs as constants, so it is
    // only built once every import is done.
    let argc = u16::try_from(argc).map_err(|_| RuntimeError::ArityMismatch {
        expected: u16::MAX as usize,
        actual: argc,
    })?;
    let mut code = CodeBuilder::new();
    code.push(receiver.value());
    for argument in &arguments {
        code.push(argument.value());
    }
    code.invoke(selector.value(), argc, runtime.roots().empty_tuple);
    code.slap(argc);
    code.return_();
    let trampoline = runtime.assemble(code, 0)?;
    let result = runtime.call(trampoline, &[])?;
    Ok(export(runtime, result))
}

/// Runs one request to completion.
pub fn handle_request(runtime: &mut Runtime, request: &Request) -> PlainValue {
    log::debug!(
        "channel request {}.{}/{}",
        request.receiver,
        request.selector,
        request.arguments.len()
    );
    match dispatch(runtime, request) {
        Ok(value) => value,
        Err(error) => {
            log::warn!("channel request {} failed: {error}", request.selector);
            PlainValue::Void
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceType, RuntimeSettings};

    fn runtime() -> Runtime {
        Runtime::new(RuntimeSettings::default()).unwrap()
    }

    /// `Integer.plus(n)` backed by the integer_plus builtin.
    fn define_plus(runtime: &mut Runtime) {
        let refs = runtime.refs();
        let scope = refs.enter();
        let mut body = CodeBuilder::new();
        body.argument(1);
        body.argument(0);
        body.builtin(1, 10);
        body.slap(2);
        body.return_();
        let lambda = scope.new_ref(runtime.assemble(body, 1).unwrap());
        let integer = runtime.roots().protocol(InstanceType::SmallInteger).value();
        let keywords = runtime.roots().empty_tuple.cast();
        let mut factory = runtime.factory();
        let name = factory.new_string("plus").unwrap();
        let selector = factory.new_selector(name, 1, keywords, false).unwrap();
        let signature = factory.new_signature(&[integer]).unwrap();
        let method = factory.new_method(selector, signature, lambda.get()).unwrap();
        runtime.add_method(integer, method).unwrap();
    }

    #[test]
    fn imports_and_exports_plain_values() {
        let mut runtime = runtime();
        let refs = runtime.refs();
        let scope = refs.enter();
        let plain = PlainValue::Tuple(vec![
            PlainValue::Integer(-3),
            PlainValue::from("hi"),
            PlainValue::Bool(true),
            PlainValue::Null,
            PlainValue::Tuple(vec![]),
        ]);
        let value = import(&mut runtime, &scope, &plain).unwrap();
        assert_eq!(export(&runtime, value), plain);
        assert_eq!(export(&runtime, runtime.roots().void), PlainValue::Void);
    }

    #[test]
    fn other_objects_export_as_text() {
        let runtime = runtime();
        let protocol = runtime.roots().object_protocol;
        assert_eq!(
            export(&runtime, protocol),
            PlainValue::String("#<protocol Object>".to_string())
        );
    }

    #[test]
    fn requests_dispatch_to_methods() {
        let mut runtime = runtime();
        define_plus(&mut runtime);
        let request = Request::new(3, "plus", vec![PlainValue::Integer(4)]);
        assert_eq!(handle_request(&mut runtime, &request), PlainValue::Integer(7));
    }

    #[test]
    fn failures_become_void() {
        let mut runtime = runtime();
        define_plus(&mut runtime);
        let missing = Request::new(3, "minus", vec![PlainValue::Integer(4)]);
        assert_eq!(handle_request(&mut runtime, &missing), PlainValue::Void);
        let mismatched = Request::new(3, "plus", vec![PlainValue::from("x")]);
        assert_eq!(handle_request(&mut runtime, &mismatched), PlainValue::Void);
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        let mut runtime = runtime();
        let request = Request::new(i64::MAX, "plus", vec![PlainValue::Integer(1)]);
        assert_eq!(handle_request(&mut runtime, &request), PlainValue::Void);
    }

    #[test]
    fn plain_values_display_like_heap_values() {
        let plain = PlainValue::Tuple(vec![1.into(), "a".into(), PlainValue::Void]);
        assert_eq!(plain.to_string(), "(1, \"a\", #<void>)");
    }
}
