use crate::{HeapObject, InstanceType, Value};

/// void, null, true and false. Compared by identity, hashed by ordinal.
#[repr(C)]
#[derive(Debug)]
pub struct Singleton {
    pub header: Value,
    ordinal: Value,
}

impl HeapObject for Singleton {
    const TYPE: Option<InstanceType> = Some(InstanceType::Singleton);
}

impl Singleton {
    pub(crate) fn init(&mut self, header: Value, ordinal: usize) {
        self.header = header;
        self.ordinal = Value::from_usize(ordinal);
    }

    #[inline]
    pub fn ordinal(&self) -> usize {
        self.ordinal.small_integer_usize()
    }
}
