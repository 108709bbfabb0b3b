use std::fmt;

/// Out-of-band status returned by internal operations.
///
/// Signals are transient: they travel from a producer to its immediate
/// caller and are never stored in a heap object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The active semi-space could not fit `size` bytes.
    AllocationFailed { size: usize },
    /// A narrowing cast found a value of another kind.
    TypeMismatch,
    /// A lookup found no result. Not an error by itself.
    Nothing,
    /// A frame would not fit into a stack of `height` words.
    StackOverflow { height: usize },
    FatalError,
    Success,
}

impl Signal {
    pub(crate) fn encode(self) -> (u8, u64) {
        match self {
            Signal::AllocationFailed { size } => (0, size as u64),
            Signal::TypeMismatch => (1, 0),
            Signal::Nothing => (2, 0),
            Signal::StackOverflow { height } => (3, height as u64),
            Signal::FatalError => (4, 0),
            Signal::Success => (5, 0),
        }
    }

    pub(crate) fn decode(ty: u8, payload: u64) -> Self {
        match ty {
            0 => Signal::AllocationFailed {
                size: payload as usize,
            },
            1 => Signal::TypeMismatch,
            2 => Signal::Nothing,
            3 => Signal::StackOverflow {
                height: payload as usize,
            },
            5 => Signal::Success,
            _ => Signal::FatalError,
        }
    }

    #[inline]
    pub fn is_allocation_failure(self) -> bool {
        matches!(self, Signal::AllocationFailed { .. })
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::AllocationFailed { size } => {
                write!(f, "allocation of {size} bytes failed")
            }
            Signal::TypeMismatch => write!(f, "type mismatch"),
            Signal::Nothing => write!(f, "nothing"),
            Signal::StackOverflow { height } => {
                write!(f, "stack overflow at height {height}")
            }
            Signal::FatalError => write!(f, "fatal error"),
            Signal::Success => write!(f, "success"),
        }
    }
}

impl std::error::Error for Signal {}
