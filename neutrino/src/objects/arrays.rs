use std::{mem, ptr};

use crate::{HeapObject, InstanceType, Value, Visitable};

/// Fixed-length sequence of values, immutable once constructed.
#[repr(C)]
#[derive(Debug)]
pub struct Tuple {
    pub header: Value,
    length: Value,
    elements: [Value; 0],
}

/// Fixed-length sequence of values, mutable.
#[repr(C)]
#[derive(Debug)]
pub struct Array {
    pub header: Value,
    length: Value,
    elements: [Value; 0],
}

impl HeapObject for Tuple {
    const TYPE: Option<InstanceType> = Some(InstanceType::Tuple);
}

impl HeapObject for Array {
    const TYPE: Option<InstanceType> = Some(InstanceType::Array);
}

/// Bytes needed for a tuple or array of `length` elements.
pub fn sequence_size(length: usize) -> usize {
    mem::size_of::<Tuple>() + length * mem::size_of::<Value>()
}

macro_rules! sequence_impl {
    ($name:ident) => {
        impl $name {
            /// Initialize with `length` copies of `fill`
            pub(crate) fn init(&mut self, header: Value, length: usize, fill: Value) {
                self.header = header;
                self.length = Value::from_usize(length);
                for i in 0..length {
                    // SAFETY: allocated with sequence_size(length)
                    unsafe { self.elements.as_mut_ptr().add(i).write(fill) };
                }
            }

            #[inline]
            pub fn len(&self) -> usize {
                self.length.small_integer_usize()
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            #[inline]
            pub fn elements(&self) -> &[Value] {
                // SAFETY: length values follow the fixed part
                unsafe { std::slice::from_raw_parts(self.elements.as_ptr(), self.len()) }
            }

            #[inline]
            fn elements_mut(&mut self) -> &mut [Value] {
                let len = self.len();
                // SAFETY: see elements
                unsafe { std::slice::from_raw_parts_mut(self.elements.as_mut_ptr(), len) }
            }

            #[inline]
            pub fn get(&self, index: usize) -> Value {
                self.elements()[index]
            }

            pub fn heap_size(&self) -> usize {
                sequence_size(self.len())
            }
        }

        impl Visitable for $name {
            fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
                for element in self.elements_mut() {
                    visitor(element);
                }
            }
        }
    };
}

sequence_impl!(Tuple);
sequence_impl!(Array);

impl Tuple {
    /// Tuples are filled once, here, and never written again.
    pub(crate) fn init_with_data(&mut self, header: Value, data: &[Value]) {
        debug_assert!(data.iter().all(|v| !v.is_signal()), "signal stored in tuple");
        self.header = header;
        self.length = Value::from_usize(data.len());
        // SAFETY: allocated with sequence_size(data.len())
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.elements.as_mut_ptr(), data.len()) };
    }
}

impl Array {
    #[inline]
    pub fn set(&mut self, index: usize, value: Value) {
        debug_assert!(!value.is_signal(), "signal stored in array");
        self.elements_mut()[index] = value;
    }
}
