use std::mem;

use crate::{HeapObject, InstanceType, Value};

/// Immutable string of code points stored inline.
#[repr(C)]
#[derive(Debug)]
pub struct StringObject {
    pub header: Value,
    length: Value,
    chars: [u32; 0],
}

impl HeapObject for StringObject {
    const TYPE: Option<InstanceType> = Some(InstanceType::String);
}

impl StringObject {
    /// Bytes needed for a string of `length` code points, word aligned.
    pub fn required_size(length: usize) -> usize {
        let raw = mem::size_of::<StringObject>() + length * mem::size_of::<u32>();
        raw.next_multiple_of(mem::size_of::<Value>())
    }

    pub(crate) fn init(&mut self, header: Value, text: &str) {
        self.header = header;
        let mut length = 0;
        for (i, c) in text.chars().enumerate() {
            // SAFETY: allocated with required_size(text.chars().count())
            unsafe { self.chars.as_mut_ptr().add(i).write(c as u32) };
            length += 1;
        }
        self.length = Value::from_usize(length);
    }

    pub(crate) fn init_empty(&mut self, header: Value, length: usize) {
        self.header = header;
        self.length = Value::from_usize(length);
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
    pub fn chars(&self) -> &[u32] {
        // SAFETY: length code points follow the fixed part
        unsafe { std::slice::from_raw_parts(self.chars.as_ptr(), self.len()) }
    }

    /// Only used while filling in a freshly allocated string.
    #[inline]
    pub(crate) fn chars_mut(&mut self) -> &mut [u32] {
        let len = self.len();
        // SAFETY: see chars
        unsafe { std::slice::from_raw_parts_mut(self.chars.as_mut_ptr(), len) }
    }

    pub fn get(&self, index: usize) -> Option<char> {
        self.chars().get(index).copied().and_then(char::from_u32)
    }

    pub fn to_rust_string(&self) -> String {
        self.chars()
            .iter()
            .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    pub fn heap_size(&self) -> usize {
        Self::required_size(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_size_is_word_aligned() {
        assert_eq!(StringObject::required_size(0), 16);
        assert_eq!(StringObject::required_size(1), 24);
        assert_eq!(StringObject::required_size(2), 24);
        assert_eq!(StringObject::required_size(3), 32);
    }
}
