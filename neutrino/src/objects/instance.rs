use std::mem;

use crate::{HeapObject, InstanceType, Layout, Tagged, Value, Visitable};

/// User object with as many fields as its layout declares.
#[repr(C)]
#[derive(Debug)]
pub struct Instance {
    pub header: Value,
    fields: [Value; 0],
}

impl HeapObject for Instance {
    const TYPE: Option<InstanceType> = Some(InstanceType::Instance);
}

impl Instance {
    pub fn required_size(field_count: usize) -> usize {
        mem::size_of::<Instance>() + field_count * mem::size_of::<Value>()
    }

    pub(crate) fn init(&mut self, layout: Tagged<Layout>, fill: Value) {
        self.header = layout.value();
        for i in 0..layout.field_count() {
            // SAFETY: allocated with required_size(field_count)
            unsafe { self.fields.as_mut_ptr().add(i).write(fill) };
        }
    }

    #[inline]
    fn field_count(&self) -> usize {
        // the layout's fields stay readable while its header forwards
        let layout: Tagged<Layout> = self.header.cast_unchecked();
        layout.field_count()
    }

    #[inline]
    pub fn fields(&self) -> &[Value] {
        // SAFETY: the layout declares the field count
        unsafe { std::slice::from_raw_parts(self.fields.as_ptr(), self.field_count()) }
    }

    #[inline]
    fn fields_mut(&mut self) -> &mut [Value] {
        let count = self.field_count();
        // SAFETY: see fields
        unsafe { std::slice::from_raw_parts_mut(self.fields.as_mut_ptr(), count) }
    }

    #[inline]
    pub fn field(&self, index: usize) -> Value {
        self.fields()[index]
    }

    #[inline]
    pub fn set_field(&mut self, index: usize, value: Value) {
        debug_assert!(!value.is_signal(), "signal stored in instance");
        self.fields_mut()[index] = value;
    }

    pub fn heap_size(&self) -> usize {
        Self::required_size(self.field_count())
    }
}

impl Visitable for Instance {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for field in self.fields_mut() {
            visitor(field);
        }
    }
}
