use crate::{HeapObject, InstanceType, Value, Visitable};

/// One-slot mutable box used for captured variables.
#[repr(C)]
#[derive(Debug)]
pub struct Cell {
    pub header: Value,
    value: Value,
}

impl HeapObject for Cell {
    const TYPE: Option<InstanceType> = Some(InstanceType::Cell);
}

impl Cell {
    pub(crate) fn init(&mut self, header: Value, value: Value) {
        self.header = header;
        self.value = value;
    }

    #[inline]
    pub fn value(&self) -> Value {
        self.value
    }

    #[inline]
    pub fn set_value(&mut self, value: Value) {
        debug_assert!(!value.is_signal(), "signal stored in cell");
        self.value = value;
    }
}

impl Visitable for Cell {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.value);
    }
}
