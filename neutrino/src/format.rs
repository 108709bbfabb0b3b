use std::fmt;

use crate::{
    Array, HeapValue, InstanceType, Lambda, Protocol, Singleton, StringObject, Tagged, Tuple,
    Value, ValueKind, roots,
};

/// Nesting depth after which sequences print as `...`.
const DEFAULT_MAX_DEPTH: usize = 4;

/// Renders a value for diagnostics and the print builtin.
///
/// Only valid while nothing can collect, like `Tagged`.
#[derive(Clone, Copy)]
pub struct ValueDisplay {
    value: Value,
    quoted: bool,
    max_depth: usize,
}

impl ValueDisplay {
    /// Strings render with quotes.
    pub fn quoted(value: Value) -> Self {
        Self {
            value,
            quoted: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Top-level strings render as their contents.
    pub fn unquoted(value: Value) -> Self {
        Self {
            value,
            quoted: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl fmt::Display for ValueDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self.value, self.quoted, self.max_depth)
    }
}

fn write_sequence(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    elements: &[Value],
    close: &str,
    depth: usize,
) -> fmt::Result {
    if depth == 0 {
        return write!(f, "{open}...{close}");
    }
    f.write_str(open)?;
    for (i, &element) in elements.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_value(f, element, true, depth - 1)?;
    }
    f.write_str(close)
}

fn write_value(f: &mut fmt::Formatter<'_>, value: Value, quoted: bool, depth: usize) -> fmt::Result {
    let object: Tagged<HeapValue> = match value.kind() {
        ValueKind::SmallInteger(n) => return write!(f, "{n}"),
        ValueKind::Signal(signal) => return write!(f, "#<signal: {signal}>"),
        ValueKind::Object(object) => object,
    };
    match object.instance_type() {
        InstanceType::String => {
            let string: Tagged<StringObject> = value.cast();
            if quoted {
                write!(f, "{:?}", string.to_rust_string())
            } else {
                f.write_str(&string.to_rust_string())
            }
        }
        InstanceType::Tuple => {
            let tuple: Tagged<Tuple> = value.cast();
            write_sequence(f, "(", tuple.elements(), ")", depth)
        }
        InstanceType::Array => {
            let array: Tagged<Array> = value.cast();
            write_sequence(f, "[", array.elements(), "]", depth)
        }
        InstanceType::Singleton => {
            let singleton: Tagged<Singleton> = value.cast();
            match singleton.ordinal() {
                roots::VOID_ORDINAL => f.write_str("#<void>"),
                roots::NULL_ORDINAL => f.write_str("null"),
                roots::TRUE_ORDINAL => f.write_str("true"),
                roots::FALSE_ORDINAL => f.write_str("false"),
                other => write!(f, "#<singleton {other}>"),
            }
        }
        InstanceType::Protocol => {
            let protocol: Tagged<Protocol> = value.cast();
            f.write_str("#<protocol ")?;
            write_value(f, protocol.name(), false, depth)?;
            f.write_str(">")
        }
        InstanceType::Lambda => {
            let lambda: Tagged<Lambda> = value.cast();
            write!(f, "#<lambda/{}>", lambda.argc())
        }
        InstanceType::Instance => {
            match object.layout().protocol().as_object::<Protocol>() {
                Some(protocol) => {
                    f.write_str("#<")?;
                    write_value(f, protocol.name(), false, depth)?;
                    f.write_str(">")
                }
                None => f.write_str("#<instance>"),
            }
        }
        other => write!(f, "#<{}>", other.name()),
    }
}

/// Renders a value into an owned string, strings unquoted.
pub fn to_display_string(value: Value) -> String {
    ValueDisplay::unquoted(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Runtime, RuntimeSettings};

    #[test]
    fn small_integers_and_singletons() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let roots = runtime.roots();
        assert_eq!(to_display_string(Value::from_i64(-12)), "-12");
        assert_eq!(to_display_string(roots.null), "null");
        assert_eq!(to_display_string(roots.true_value), "true");
        assert_eq!(to_display_string(roots.void), "#<void>");
    }

    #[test]
    fn strings_quote_inside_sequences() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let mut factory = runtime.factory();
        let string = factory.new_string("ab").unwrap();
        let tuple = factory
            .new_tuple_from(&[string.value(), Value::from_i64(1)])
            .unwrap();
        assert_eq!(to_display_string(string.value()), "ab");
        assert_eq!(ValueDisplay::quoted(string.value()).to_string(), "\"ab\"");
        assert_eq!(to_display_string(tuple.value()), "(\"ab\", 1)");
    }

    #[test]
    fn deep_nesting_is_cut() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let mut factory = runtime.factory();
        let inner = factory.new_tuple_from(&[Value::from_i64(1)]).unwrap();
        let outer = factory.new_tuple_from(&[inner.value()]).unwrap();
        let text = ValueDisplay::unquoted(outer.value())
            .with_max_depth(1)
            .to_string();
        assert_eq!(text, "((...))");
    }

    #[test]
    fn protocols_show_their_name() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let protocol = runtime.roots().object_protocol;
        assert_eq!(to_display_string(protocol), "#<protocol Object>");
    }
}
