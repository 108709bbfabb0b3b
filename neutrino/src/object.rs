use crate::{
    HeapObject, Layout, Selector, Singleton, StringObject, Tagged, Tuple, Value,
    ValueKind,
};

/// Kind tag stored in every Layout.
#[rustfmt::skip]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InstanceType {
    Layout              = 0,
    Protocol            = 1,
    String              = 2,
    Tuple               = 3,
    Array               = 4,
    HashMap             = 5,
    Forwarder           = 6,
    ForwarderDescriptor = 7,
    Cell                = 8,
    Instance            = 9,
    Lambda              = 10,
    Code                = 11,
    Context             = 12,
    Method              = 13,
    Selector            = 14,
    Signature           = 15,
    Stack               = 16,
    Task                = 17,
    Singleton           = 18,
    /// Only used by the layout small integers dispatch through.
    SmallInteger        = 19,
}

impl InstanceType {
    pub const COUNT: usize = InstanceType::SmallInteger as usize + 1;

    pub fn name(self) -> &'static str {
        match self {
            InstanceType::Layout => "Layout",
            InstanceType::Protocol => "Protocol",
            InstanceType::String => "String",
            InstanceType::Tuple => "Tuple",
            InstanceType::Array => "Array",
            InstanceType::HashMap => "HashMap",
            InstanceType::Forwarder => "Forwarder",
            InstanceType::ForwarderDescriptor => "ForwarderDescriptor",
            InstanceType::Cell => "Cell",
            InstanceType::Instance => "Instance",
            InstanceType::Lambda => "Lambda",
            InstanceType::Code => "Code",
            InstanceType::Context => "Context",
            InstanceType::Method => "Method",
            InstanceType::Selector => "Selector",
            InstanceType::Signature => "Signature",
            InstanceType::Stack => "Stack",
            InstanceType::Task => "Task",
            InstanceType::Singleton => "Singleton",
            InstanceType::SmallInteger => "SmallInteger",
        }
    }

    /// Kinds with structural hash and equality.
    pub fn is_key(self) -> bool {
        matches!(
            self,
            InstanceType::String
                | InstanceType::Tuple
                | InstanceType::Selector
                | InstanceType::Singleton
        )
    }
}

impl TryFrom<u8> for InstanceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (value as usize) < Self::COUNT {
            // SAFETY: repr(u8), contiguous discriminants checked above
            Ok(unsafe { std::mem::transmute::<u8, InstanceType>(value) })
        } else {
            Err(value)
        }
    }
}

/// Untyped view of any heap object: just the header.
///
/// ```text
/// +-----------+
/// |  header   |  -> Layout, or a forward pointer during collection
/// +-----------+
/// |  fields   |
/// |    ...    |
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct HeapValue {
    pub header: Value,
}

impl HeapObject for HeapValue {
    const TYPE: Option<InstanceType> = None;
}

impl HeapValue {
    #[inline]
    pub fn layout(&self) -> Tagged<Layout> {
        assert!(
            !self.header.is_forward_pointer(),
            "forward pointer outside collection"
        );
        self.header.cast_unchecked()
    }

    #[inline]
    pub fn instance_type(&self) -> InstanceType {
        // the layout's own fields stay readable even when its header forwards
        let layout: Tagged<Layout> = self.header.cast_unchecked();
        layout.instance_type()
    }

    #[inline]
    pub fn forward_target(&self) -> Option<Value> {
        self.header
            .is_forward_pointer()
            .then(|| self.header.forward_target())
    }

    #[inline]
    pub fn set_forward_pointer(&mut self, target: Value) {
        self.header = Value::forward_pointer(target);
    }

    /// Reinterprets this object as kind T without checking.
    ///
    /// # Safety
    /// The object's instance type must match T.
    #[inline(always)]
    pub unsafe fn view_mut<T>(&mut self) -> &mut T {
        // SAFETY: guaranteed by caller
        unsafe { &mut *(self as *mut HeapValue as *mut T) }
    }

    /// # Safety
    /// The object's instance type must match T.
    #[inline(always)]
    pub unsafe fn view<T>(&self) -> &T {
        // SAFETY: guaranteed by caller
        unsafe { &*(self as *const HeapValue as *const T) }
    }
}

// ── Hash and equality ───────────────────────────────────────────────

/// Whether `value` supports structural hashing.
pub fn is_key(value: Value) -> bool {
    match value.kind() {
        ValueKind::SmallInteger(_) => true,
        ValueKind::Object(object) => object.instance_type().is_key(),
        ValueKind::Signal(_) => false,
    }
}

const HASH_MASK: u64 = (1 << 61) - 1;

fn mix(hash: u64, word: u64) -> u64 {
    (hash ^ word).wrapping_mul(0x100_0000_01b3)
}

/// Structural hash, stable across collections.
///
/// Aborts for kinds that only have identity.
pub fn hash_value(value: Value) -> u64 {
    let hash = match value.kind() {
        ValueKind::SmallInteger(n) => mix(0xcbf2_9ce4_8422_2325, n as u64),
        ValueKind::Object(object) => match object.instance_type() {
            InstanceType::String => {
                let string: Tagged<StringObject> = object.value().cast();
                string
                    .chars()
                    .iter()
                    .fold(0xcbf2_9ce4_8422_2325, |h, &c| mix(h, c as u64))
            }
            InstanceType::Tuple => {
                let tuple: Tagged<Tuple> = object.value().cast();
                tuple
                    .elements()
                    .iter()
                    .fold(0x8422_2325, |h, &e| mix(h, hash_value(e)))
            }
            InstanceType::Selector => {
                let selector: Tagged<Selector> = object.value().cast();
                mix(hash_value(selector.name()), selector.argc() as u64)
            }
            InstanceType::Singleton => {
                let singleton: Tagged<Singleton> = object.value().cast();
                mix(0x5bd1_e995, singleton.ordinal() as u64)
            }
            other => panic!("structural hash requested on {}", other.name()),
        },
        ValueKind::Signal(signal) => panic!("hash of signal {signal}"),
    };
    hash & HASH_MASK
}

/// Structural equality between two keys.
///
/// Aborts for kinds that only have identity, like [`hash_value`].
pub fn key_equals(a: Value, b: Value) -> bool {
    for value in [a, b] {
        match value.kind() {
            ValueKind::SmallInteger(_) => {}
            ValueKind::Object(object) => assert!(
                object.instance_type().is_key(),
                "structural equality requested on {}",
                object.instance_type().name()
            ),
            ValueKind::Signal(signal) => panic!("equality of signal {signal}"),
        }
    }
    values_equal(a, b)
}

/// Structural equality for key kinds, identity for everything else.
pub fn values_equal(a: Value, b: Value) -> bool {
    if a == b {
        return true;
    }
    let (ValueKind::Object(x), ValueKind::Object(y)) = (a.kind(), b.kind()) else {
        return false;
    };
    let ty = x.instance_type();
    if ty != y.instance_type() {
        return false;
    }
    match ty {
        InstanceType::String => {
            let x: Tagged<StringObject> = a.cast();
            let y: Tagged<StringObject> = b.cast();
            x.chars() == y.chars()
        }
        InstanceType::Tuple => {
            let x: Tagged<Tuple> = a.cast();
            let y: Tagged<Tuple> = b.cast();
            x.len() == y.len()
                && x.elements()
                    .iter()
                    .zip(y.elements())
                    .all(|(&p, &q)| values_equal(p, q))
        }
        InstanceType::Selector => {
            let x: Tagged<Selector> = a.cast();
            let y: Tagged<Selector> = b.cast();
            x.selector_equals(&y)
        }
        // distinct singletons are never equal
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_type_round_trip() {
        for raw in 0..InstanceType::COUNT as u8 {
            let ty = InstanceType::try_from(raw).unwrap();
            assert_eq!(ty as u8, raw);
        }
        assert_eq!(InstanceType::try_from(200), Err(200));
    }

    #[test]
    fn small_integers_are_keys() {
        let a = Value::from_i64(17);
        assert!(is_key(a));
        assert_eq!(hash_value(a), hash_value(Value::from_i64(17)));
        assert_ne!(hash_value(a), hash_value(Value::from_i64(18)));
        assert!(values_equal(a, Value::from_i64(17)));
        assert!(!values_equal(a, Value::from_i64(3)));
    }

    #[test]
    fn key_kinds() {
        assert!(InstanceType::String.is_key());
        assert!(InstanceType::Singleton.is_key());
        assert!(!InstanceType::Lambda.is_key());
        assert!(!InstanceType::Array.is_key());
    }

    #[test]
    fn keys_compare_structurally() {
        let mut runtime = crate::Runtime::new(crate::RuntimeSettings::default()).unwrap();
        let mut factory = runtime.factory();
        let a = factory.new_string("key").unwrap().value();
        let b = factory.new_string("key").unwrap().value();
        assert_ne!(a, b);
        assert!(key_equals(a, b));
        assert!(!key_equals(a, Value::from_i64(1)));
    }

    #[test]
    #[should_panic(expected = "structural equality requested on Lambda")]
    fn identity_kinds_have_no_structural_equality() {
        let mut runtime = crate::Runtime::new(crate::RuntimeSettings::default()).unwrap();
        let mut body = crate::bytecode::CodeBuilder::new();
        body.null();
        body.return_();
        let a = runtime.assemble(body, 0).unwrap().value();
        let mut body = crate::bytecode::CodeBuilder::new();
        body.null();
        body.return_();
        let b = runtime.assemble(body, 0).unwrap().value();
        assert!(!values_equal(a, b));
        key_equals(a, b);
    }
}
