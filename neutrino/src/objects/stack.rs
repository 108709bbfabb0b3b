//! Stacks and stack cooking.
//!
//! While a stack can run, its frame chain holds absolute addresses into
//! its own buffer (`Linked`). Anything that may move the buffer must
//! first convert the chain into buffer offsets (`Relocatable`), and
//! convert back once the buffer has its final address.
use std::mem;

use crate::{HeapObject, InstanceType, Lambda, Value, Visitable};

pub const FRAME_PREV_PC: usize = 0;
pub const FRAME_PREV_FP: usize = 1;
pub const FRAME_LAMBDA: usize = 2;
pub const FRAME_SIZE: usize = 3;

pub const MARKER_PREV: usize = 0;
pub const MARKER_DATA: usize = 1;
pub const MARKER_SIZE: usize = 2;

/// prev-fp word of the sentinel bottom frame, in either mode.
pub const BOTTOM_LINK: u64 = 0;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackStatus {
    Empty = 0,
    Parked = 1,
    Running = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackMode {
    /// Frame links are absolute addresses.
    Linked = 0,
    /// Frame links are buffer word offsets plus one.
    Relocatable = 1,
}

/// Fixed-size word buffer of chained activation frames.
///
/// ```text
/// +-------------+
/// | header      |
/// | height      | words in the buffer
/// | fp          | raw link to the top frame
/// | top marker  | offset + 1 of the top marker, 0 for none
/// | status      |
/// | mode        |
/// +-------------+
/// | buffer      | frames: [prev pc | prev fp | lambda | locals...]
/// |    ...      |
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct Stack {
    pub header: Value,
    height: Value,
    fp: u64,
    top_marker: Value,
    status: Value,
    mode: Value,
    buffer: [u64; 0],
}

impl HeapObject for Stack {
    const TYPE: Option<InstanceType> = Some(InstanceType::Stack);
}

#[inline]
fn to_offset_link(base: *mut u64, address: *mut u64) -> u64 {
    // SAFETY: both point into the same buffer
    let offset = unsafe { address.offset_from(base) };
    debug_assert!(offset >= 0);
    offset as u64 + 1
}

#[inline]
fn to_address_link(base: *mut u64, link: u64) -> *mut u64 {
    debug_assert_ne!(link, BOTTOM_LINK);
    // SAFETY: offsets were taken within the buffer
    unsafe { base.add(link as usize - 1) }
}

impl Stack {
    pub fn required_size(height: usize) -> usize {
        mem::size_of::<Stack>() + height * mem::size_of::<u64>()
    }

    pub(crate) fn init(&mut self, header: Value, height: usize) {
        self.header = header;
        self.height = Value::from_usize(height);
        self.fp = BOTTOM_LINK;
        self.top_marker = Value::from_i64(0);
        self.status = Value::from_i64(StackStatus::Empty as i64);
        self.mode = Value::from_i64(StackMode::Linked as i64);
        for i in 0..height {
            // SAFETY: allocated with required_size(height)
            unsafe { self.buffer.as_mut_ptr().add(i).write(Value::from_i64(0).raw()) };
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height.small_integer_usize()
    }

    pub fn heap_size(&self) -> usize {
        Self::required_size(self.height())
    }

    #[inline]
    pub fn bottom(&mut self) -> *mut u64 {
        self.buffer.as_mut_ptr()
    }

    pub fn status(&self) -> StackStatus {
        match self.status.small_integer_value() {
            0 => StackStatus::Empty,
            1 => StackStatus::Parked,
            _ => StackStatus::Running,
        }
    }

    pub fn set_status(&mut self, status: StackStatus) {
        self.status = Value::from_i64(status as i64);
    }

    pub fn mode(&self) -> StackMode {
        if self.mode.small_integer_value() == StackMode::Linked as i64 {
            StackMode::Linked
        } else {
            StackMode::Relocatable
        }
    }

    fn set_mode(&mut self, mode: StackMode) {
        self.mode = Value::from_i64(mode as i64);
    }

    /// Absolute address of the top frame. Only meaningful while linked.
    #[inline]
    pub fn fp(&self) -> *mut u64 {
        debug_assert_eq!(self.mode(), StackMode::Linked);
        self.fp as *mut u64
    }

    #[inline]
    pub fn set_fp(&mut self, fp: *mut u64) {
        debug_assert_eq!(self.mode(), StackMode::Linked);
        self.fp = fp as u64;
    }

    /// Buffer offset of the innermost marker.
    pub fn top_marker(&self) -> Option<usize> {
        match self.top_marker.small_integer_usize() {
            0 => None,
            link => Some(link - 1),
        }
    }

    pub fn set_top_marker(&mut self, offset: Option<usize>) {
        self.top_marker = Value::from_usize(offset.map_or(0, |o| o + 1));
    }

    // ── Cooking ─────────────────────────────────────────────────────

    /// Rewrites every frame link as a buffer offset.
    pub fn uncook(&mut self) {
        if self.status() == StackStatus::Empty {
            return;
        }
        assert_eq!(
            self.status(),
            StackStatus::Parked,
            "uncooking a stack that is not parked"
        );
        assert_eq!(self.mode(), StackMode::Linked, "stack already uncooked");
        let base = self.bottom();
        let mut fp = self.fp as *mut u64;
        self.fp = to_offset_link(base, fp);
        loop {
            // SAFETY: fp is a frame inside the buffer
            let link = unsafe { *fp.add(FRAME_PREV_FP) };
            if link == BOTTOM_LINK {
                break;
            }
            let prev = link as *mut u64;
            // SAFETY: as above
            unsafe { *fp.add(FRAME_PREV_FP) = to_offset_link(base, prev) };
            fp = prev;
        }
        self.set_mode(StackMode::Relocatable);
    }

    /// Rewrites every frame link as an absolute address into the
    /// buffer's current location.
    pub fn recook(&mut self) {
        if self.status() == StackStatus::Empty {
            self.set_mode(StackMode::Linked);
            return;
        }
        assert_eq!(
            self.status(),
            StackStatus::Parked,
            "recooking a stack that is not parked"
        );
        assert_eq!(self.mode(), StackMode::Relocatable, "stack already cooked");
        let base = self.bottom();
        let mut fp = to_address_link(base, self.fp);
        self.fp = fp as u64;
        loop {
            // SAFETY: fp is a frame inside the buffer
            let link = unsafe { *fp.add(FRAME_PREV_FP) };
            if link == BOTTOM_LINK {
                break;
            }
            let prev = to_address_link(base, link);
            // SAFETY: as above
            unsafe { *fp.add(FRAME_PREV_FP) = prev as u64 };
            fp = prev;
        }
        self.set_mode(StackMode::Linked);
    }

    /// Copies the frames of an uncooked stack into this larger one.
    pub fn copy_contents_from(&mut self, old: &mut Stack) {
        assert_eq!(old.mode(), StackMode::Relocatable, "copying a cooked stack");
        assert!(self.height() >= old.height());
        self.fp = old.fp;
        self.top_marker = old.top_marker;
        self.status = old.status;
        self.mode = old.mode;
        let words = old.height();
        // SAFETY: distinct objects, both buffers hold at least `words` words
        unsafe { std::ptr::copy_nonoverlapping(old.bottom(), self.bottom(), words) };
    }

    /// Checks that a cooked stack's frames end in the sentinel.
    pub fn validate(&mut self) {
        if self.status() == StackStatus::Empty {
            return;
        }
        assert_eq!(self.mode(), StackMode::Linked);
        let base = self.bottom();
        // SAFETY: end of the buffer
        let end = unsafe { base.add(self.height()) };
        let mut fp = self.fp();
        loop {
            assert!(fp >= base && fp < end, "frame outside its stack");
            // SAFETY: checked to be inside the buffer
            let lambda = Value::from_raw(unsafe { *fp.add(FRAME_LAMBDA) });
            assert!(lambda.is::<Lambda>(), "frame without a lambda");
            // SAFETY: as above
            let link = unsafe { *fp.add(FRAME_PREV_FP) };
            if link == BOTTOM_LINK {
                break;
            }
            let prev = link as *mut u64;
            assert!(prev < fp, "frame chain does not descend");
            fp = prev;
        }
    }
}

impl Visitable for Stack {
    /// Visits the lambda and locals of every frame. Requires an uncooked stack.
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        if self.status() == StackStatus::Empty {
            return;
        }
        assert_eq!(
            self.mode(),
            StackMode::Relocatable,
            "visiting a cooked stack"
        );
        let base = self.bottom() as *mut Value;
        let mut fp = self.fp as usize - 1;
        // the top frame is the parking activation, it has no locals
        let mut sp = fp + FRAME_SIZE;
        loop {
            // SAFETY: offsets stay inside the buffer
            unsafe {
                visitor(&mut *base.add(fp + FRAME_LAMBDA));
                for slot in fp + FRAME_SIZE..sp {
                    visitor(&mut *base.add(slot));
                }
            }
            // SAFETY: as above
            let link = unsafe { (*base.add(fp + FRAME_PREV_FP)).raw() };
            if link == BOTTOM_LINK {
                break;
            }
            sp = fp;
            fp = link as usize - 1;
        }
    }
}
