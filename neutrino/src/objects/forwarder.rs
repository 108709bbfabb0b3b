use std::ptr;

use crate::{HeapObject, InstanceType, Signal, Tagged, Value, Visitable};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ForwarderKind {
    Open = 0,
    Closed = 1,
}

impl TryFrom<u16> for ForwarderKind {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ForwarderKind::Open),
            1 => Ok(ForwarderKind::Closed),
            other => Err(other),
        }
    }
}

/// A value that transparently redirects to the target held by its
/// descriptor.
#[repr(C)]
#[derive(Debug)]
pub struct Forwarder {
    pub header: Value,
    descriptor: Value,
}

/// Target and open/closed state of a forwarder. A closed descriptor is
/// immutable.
#[repr(C)]
#[derive(Debug)]
pub struct ForwarderDescriptor {
    pub header: Value,
    kind: Value,
    target: Value,
}

impl HeapObject for Forwarder {
    const TYPE: Option<InstanceType> = Some(InstanceType::Forwarder);
}

impl HeapObject for ForwarderDescriptor {
    const TYPE: Option<InstanceType> = Some(InstanceType::ForwarderDescriptor);
}

impl Forwarder {
    pub(crate) fn init(&mut self, header: Value, descriptor: Tagged<ForwarderDescriptor>) {
        self.header = header;
        self.descriptor = descriptor.value();
    }

    #[inline]
    pub fn descriptor(&self) -> Tagged<ForwarderDescriptor> {
        self.descriptor.cast()
    }
}

impl ForwarderDescriptor {
    pub(crate) fn init(&mut self, header: Value, kind: ForwarderKind, target: Value) {
        self.header = header;
        self.kind = Value::from_i64(kind as i64);
        self.target = target;
    }

    pub fn kind(&self) -> ForwarderKind {
        if self.kind.small_integer_value() == ForwarderKind::Open as i64 {
            ForwarderKind::Open
        } else {
            ForwarderKind::Closed
        }
    }

    #[inline]
    pub fn target(&self) -> Value {
        self.target
    }

    pub fn set_target(&mut self, target: Value) {
        assert_eq!(
            self.kind(),
            ForwarderKind::Open,
            "closed forwarder retargeted"
        );
        debug_assert!(!target.is_signal());
        let mut next = target;
        while let Some(forwarder) = next.as_object::<Forwarder>() {
            let descriptor = forwarder.descriptor();
            assert!(!ptr::eq(descriptor.as_ptr(), &*self), "forwarder cycle");
            next = descriptor.target();
        }
        self.target = target;
    }

    pub fn set_kind(&mut self, kind: ForwarderKind) {
        assert_eq!(
            self.kind(),
            ForwarderKind::Open,
            "closed forwarder reopened"
        );
        self.kind = Value::from_i64(kind as i64);
    }

    /// Sets the final target and closes the descriptor.
    pub fn bind(&mut self, target: Value) {
        self.set_target(target);
        self.set_kind(ForwarderKind::Closed);
    }
}

impl Visitable for Forwarder {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.descriptor);
    }
}

impl Visitable for ForwarderDescriptor {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.target);
    }
}

/// Follows forwarders until reaching a value that is not one.
pub fn deref(mut value: Value) -> Value {
    while let Some(forwarder) = value.as_object::<Forwarder>() {
        value = forwarder.descriptor().target();
    }
    value
}

/// Narrowing that looks through forwarders.
pub fn to<T: HeapObject>(value: Value) -> Result<Tagged<T>, Signal> {
    deref(value).as_object::<T>().ok_or(Signal::TypeMismatch)
}

pub fn to_small_integer(value: Value) -> Result<i64, Signal> {
    deref(value).as_i64().ok_or(Signal::TypeMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Runtime, RuntimeSettings, StringObject, Tuple};

    #[test]
    fn forwarder_narrows_to_target() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let empty = runtime.roots().empty_tuple;
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, empty)
            .unwrap();
        let value = forwarder.value();
        assert!(value.is::<Forwarder>());
        assert!(!value.is::<Tuple>());
        assert_eq!(to::<Tuple>(value).unwrap().value(), empty);
        assert_eq!(to::<StringObject>(value).err(), Some(Signal::TypeMismatch));
    }

    #[test]
    fn small_integer_forwarder() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, Value::from_i64(17))
            .unwrap();
        assert_eq!(to_small_integer(forwarder.value()), Ok(17));
        assert_eq!(
            to::<StringObject>(forwarder.value()).err(),
            Some(Signal::TypeMismatch)
        );
    }

    #[test]
    fn bind_closes() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, Value::from_i64(1))
            .unwrap();
        forwarder.descriptor().bind(Value::from_i64(2));
        assert_eq!(forwarder.descriptor().kind(), ForwarderKind::Closed);
        assert_eq!(deref(forwarder.value()), Value::from_i64(2));
    }

    #[test]
    #[should_panic(expected = "closed forwarder retargeted")]
    fn closed_forwarder_is_immutable() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, Value::from_i64(17))
            .unwrap();
        let mut descriptor = forwarder.descriptor();
        descriptor.set_kind(ForwarderKind::Closed);
        descriptor.set_target(Value::from_i64(19));
    }

    #[test]
    #[should_panic(expected = "closed forwarder reopened")]
    fn closed_forwarder_stays_closed() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, Value::from_i64(17))
            .unwrap();
        let mut descriptor = forwarder.descriptor();
        descriptor.set_kind(ForwarderKind::Closed);
        descriptor.set_kind(ForwarderKind::Open);
    }

    #[test]
    #[should_panic(expected = "forwarder cycle")]
    fn forwarder_cannot_target_itself() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let forwarder = runtime
            .factory()
            .new_forwarder(ForwarderKind::Open, Value::from_i64(1))
            .unwrap();
        forwarder.descriptor().bind(forwarder.value());
    }

    #[test]
    #[should_panic(expected = "forwarder cycle")]
    fn forwarder_chains_cannot_loop() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let mut factory = runtime.factory();
        let first = factory
            .new_forwarder(ForwarderKind::Open, Value::from_i64(1))
            .unwrap();
        let second = factory
            .new_forwarder(ForwarderKind::Open, first.value())
            .unwrap();
        assert_eq!(to_small_integer(second.value()), Ok(1));
        first.descriptor().set_target(second.value());
    }

    #[test]
    fn retargeting_along_a_chain_is_allowed() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let mut factory = runtime.factory();
        let first = factory
            .new_forwarder(ForwarderKind::Open, Value::from_i64(1))
            .unwrap();
        let second = factory
            .new_forwarder(ForwarderKind::Open, Value::from_i64(2))
            .unwrap();
        first.descriptor().set_target(second.value());
        assert_eq!(to_small_integer(first.value()), Ok(2));
    }
}
