//! Value: any raw machine word, small integer/object reference/signal
//!
//! Tagged<T>: same as Value but typed, a direct pointer to a heap object of kind T.
//! Not safe to keep across anything that may collect, use `refs` for that.
//!
//! All tag bits are interpreted in this file and nowhere else.
use std::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use crate::{HeapValue, InstanceType, Layout, Signal};

#[allow(unused)]
#[repr(u8)]
#[derive(Debug, Copy, Clone)]
pub enum ValueTag {
    SmallInteger = 0b0,
    Object = 0b01,
    Signal = 0b11,
}

const SMALL_INTEGER_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const SIGNAL_TYPE_SHIFT: u32 = 2;
const SIGNAL_TYPE_MASK: u64 = 0b111;
const SIGNAL_PAYLOAD_SHIFT: u32 = 8;

pub const SMALL_INTEGER_MAX: i64 = i64::MAX >> 1;
pub const SMALL_INTEGER_MIN: i64 = i64::MIN >> 1;

/// A generic Value.
///
/// ```text
///  ...............................0   small integer (value << 1)
///  ..............................01   object reference (address | 01)
///  ..........payload|type(3 bits)|11  signal
///  ..............................11   forward pointer (header field only)
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

/// The three variants a `Value` can be at the API boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueKind {
    SmallInteger(i64),
    Object(Tagged<HeapValue>),
    Signal(Signal),
}

/// Classification returned by [`type_of`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueType {
    SmallInteger,
    Signal,
    Object(InstanceType),
}

impl Value {
    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn kind(self) -> ValueKind {
        if self.is_small_integer() {
            ValueKind::SmallInteger(self.small_integer_value())
        } else if self.is_object() {
            ValueKind::Object(Tagged::from_raw(self.0))
        } else {
            ValueKind::Signal(self.signal_value())
        }
    }

    // ── Small integers ──────────────────────────────────────────────

    #[inline(always)]
    pub fn from_i64(value: i64) -> Self {
        debug_assert!(
            (SMALL_INTEGER_MIN..=SMALL_INTEGER_MAX).contains(&value),
            "small integer out of range: {value}"
        );
        Self((value << 1) as u64)
    }

    #[inline(always)]
    pub fn from_usize(value: usize) -> Self {
        Self::from_i64(value as i64)
    }

    #[inline(always)]
    pub const fn is_small_integer(self) -> bool {
        self.0 & SMALL_INTEGER_MASK == ValueTag::SmallInteger as u64
    }

    #[inline]
    pub fn as_i64(self) -> Option<i64> {
        self.is_small_integer().then(|| self.small_integer_value())
    }

    /// Decodes a small integer without checking the tag in release builds.
    #[inline(always)]
    pub fn small_integer_value(self) -> i64 {
        debug_assert!(self.is_small_integer(), "not a small integer: {self:?}");
        (self.0 as i64) >> 1
    }

    #[inline(always)]
    pub fn small_integer_usize(self) -> usize {
        self.small_integer_value() as usize
    }

    // ── Object references ───────────────────────────────────────────

    #[inline(always)]
    pub fn from_address(address: *mut u8) -> Self {
        let raw = address as u64;
        debug_assert_eq!(raw & TAG_MASK, 0, "object address must be aligned");
        Self(raw | ValueTag::Object as u64)
    }

    #[inline(always)]
    pub const fn is_object(self) -> bool {
        self.0 & TAG_MASK == ValueTag::Object as u64
    }

    #[inline(always)]
    pub fn object_address(self) -> *mut u8 {
        debug_assert!(self.is_object(), "not an object: {self:?}");
        (self.0 & !TAG_MASK) as *mut u8
    }

    // ── Signals ─────────────────────────────────────────────────────

    pub fn from_signal(signal: Signal) -> Self {
        let (ty, payload) = signal.encode();
        Self(
            (payload << SIGNAL_PAYLOAD_SHIFT)
                | ((ty as u64 & SIGNAL_TYPE_MASK) << SIGNAL_TYPE_SHIFT)
                | ValueTag::Signal as u64,
        )
    }

    #[inline(always)]
    pub const fn is_signal(self) -> bool {
        self.0 & TAG_MASK == ValueTag::Signal as u64
    }

    #[inline]
    pub fn as_signal(self) -> Option<Signal> {
        self.is_signal().then(|| self.signal_value())
    }

    fn signal_value(self) -> Signal {
        let ty = ((self.0 >> SIGNAL_TYPE_SHIFT) & SIGNAL_TYPE_MASK) as u8;
        Signal::decode(ty, self.0 >> SIGNAL_PAYLOAD_SHIFT)
    }

    // ── Forward pointers ────────────────────────────────────────────

    /// Encodes a forward pointer to `target`. Only ever written into a header.
    #[inline(always)]
    pub fn forward_pointer(target: Value) -> Self {
        debug_assert!(target.is_object());
        Self((target.0 & !TAG_MASK) | ValueTag::Signal as u64)
    }

    /// Header-position view of the signal tag.
    #[inline(always)]
    pub const fn is_forward_pointer(self) -> bool {
        self.is_signal()
    }

    #[inline(always)]
    pub fn forward_target(self) -> Value {
        debug_assert!(self.is_forward_pointer());
        Self((self.0 & !TAG_MASK) | ValueTag::Object as u64)
    }

    // ── Narrowing ───────────────────────────────────────────────────

    /// Tag-checked test for a heap object of kind `T`.
    #[inline]
    pub fn is<T: HeapObject>(self) -> bool {
        self.is_object() && T::accepts(instance_type_of(self))
    }

    /// Checked narrowing, aborts on mismatch in debug builds.
    #[inline]
    pub fn cast<T: HeapObject>(self) -> Tagged<T> {
        debug_assert!(
            self.is::<T>(),
            "cast to {:?} failed for {self:?}",
            T::TYPE
        );
        Tagged::from_raw(self.0)
    }

    #[inline]
    pub fn as_object<T: HeapObject>(self) -> Option<Tagged<T>> {
        self.is::<T>().then(|| Tagged::from_raw(self.0))
    }

    /// Narrowing without reading the header, for use while headers may forward.
    #[inline(always)]
    pub(crate) fn cast_unchecked<T>(self) -> Tagged<T> {
        debug_assert!(self.is_object(), "not an object: {self:?}");
        Tagged::from_raw(self.0)
    }
}

impl From<Signal> for Value {
    fn from(signal: Signal) -> Self {
        Self::from_signal(signal)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_small_integer() {
            write!(f, "SmallInteger({})", self.small_integer_value())
        } else if self.is_object() {
            write!(f, "Object({:#x})", self.0 & !TAG_MASK)
        } else {
            write!(f, "Signal({:#x})", self.0)
        }
    }
}

/// Instance type of the object `value` points at.
#[inline]
pub(crate) fn instance_type_of(value: Value) -> InstanceType {
    // SAFETY: value is an object reference, its header holds a layout outside collection
    let object = unsafe { &*(value.object_address() as *const HeapValue) };
    let layout = object.header;
    debug_assert!(layout.is_object(), "header is not a layout: {layout:?}");
    // SAFETY: headers point at layouts
    let layout = unsafe { &*(layout.object_address() as *const Layout) };
    layout.instance_type()
}

/// Classifies any value.
pub fn type_of(value: Value) -> ValueType {
    if value.is_small_integer() {
        ValueType::SmallInteger
    } else if value.is_object() {
        ValueType::Object(instance_type_of(value))
    } else {
        ValueType::Signal
    }
}

/// A view onto a heap object kind.
pub trait HeapObject: Sized {
    /// Instance type this view narrows to, `None` for the untyped view.
    const TYPE: Option<InstanceType>;

    #[inline(always)]
    fn accepts(ty: InstanceType) -> bool {
        Self::TYPE.is_none_or(|expected| expected == ty)
    }
}

/// A typed object reference.
/// same memory layout as Value
pub struct Tagged<T> {
    data: u64,
    _marker: PhantomData<*mut T>,
}

// manual impls, derive would require T: Clone
impl<T> Clone for Tagged<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tagged<T> {}

impl<T> PartialEq for Tagged<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T> Eq for Tagged<T> {}

impl<T> fmt::Debug for Tagged<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value(self.data), f)
    }
}

impl<T> Tagged<T> {
    #[inline(always)]
    const fn from_raw(data: u64) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    pub fn value(self) -> Value {
        Value(self.data)
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut T {
        (self.data & !TAG_MASK) as *mut T
    }

    /// # Safety
    /// `ptr` must point at an initialized object of kind T in the heap.
    #[inline(always)]
    pub unsafe fn from_ptr(ptr: *mut T) -> Self {
        Self::from_raw(Value::from_address(ptr.cast()).0)
    }

    #[inline(always)]
    pub fn upcast(self) -> Tagged<HeapValue> {
        Tagged::from_raw(self.data)
    }
}

impl<T> From<Tagged<T>> for Value {
    #[inline(always)]
    fn from(value: Tagged<T>) -> Self {
        value.value()
    }
}

impl<T: HeapObject> Deref for Tagged<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: valid until the next collection, callers that allocate hold refs instead
        unsafe { &*self.as_ptr() }
    }
}

impl<T: HeapObject> DerefMut for Tagged<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see Deref, execution is single threaded
        unsafe { &mut *self.as_ptr() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value tagging ───────────────────────────────────────────────

    #[test]
    fn small_integer_round_trip() {
        for n in [0, 1, -1, 7, -42, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN] {
            let v = Value::from_i64(n);
            assert!(v.is_small_integer());
            assert!(!v.is_object());
            assert!(!v.is_signal());
            assert_eq!(v.as_i64(), Some(n));
            assert_eq!(v.kind(), ValueKind::SmallInteger(n));
        }
    }

    #[test]
    fn object_tagging() {
        let address = 0x1000 as *mut u8;
        let v = Value::from_address(address);
        assert!(v.is_object());
        assert!(!v.is_small_integer());
        assert_eq!(v.object_address(), address);
        assert_eq!(v.as_i64(), None);
    }

    #[test]
    fn signal_tagging() {
        let signals = [
            Signal::AllocationFailed { size: 4096 },
            Signal::TypeMismatch,
            Signal::Nothing,
            Signal::StackOverflow { height: 128 },
            Signal::FatalError,
            Signal::Success,
        ];
        for signal in signals {
            let v = Value::from_signal(signal);
            assert!(v.is_signal());
            assert!(!v.is_object());
            assert!(!v.is_small_integer());
            assert_eq!(v.as_signal(), Some(signal));
            assert_eq!(v.kind(), ValueKind::Signal(signal));
        }
    }

    #[test]
    fn forward_pointer_reuses_signal_tag() {
        let target = Value::from_address(0x2040 as *mut u8);
        let forward = Value::forward_pointer(target);
        assert!(forward.is_forward_pointer());
        assert!(forward.is_signal());
        assert_eq!(forward.forward_target(), target);
    }

    #[test]
    fn debug_formatting() {
        assert_eq!(format!("{:?}", Value::from_i64(5)), "SmallInteger(5)");
        assert_eq!(
            format!("{:?}", Value::from_address(0x10 as *mut u8)),
            "Object(0x10)"
        );
    }
}
