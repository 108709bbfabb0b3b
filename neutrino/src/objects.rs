pub mod arrays;
pub mod cell;
pub mod forwarder;
pub mod hash_map;
pub mod instance;
pub mod lambda;
pub mod layout;
pub mod method;
pub mod singleton;
pub mod stack;
pub mod strings;
pub mod task;

pub use arrays::{Array, Tuple, sequence_size};
pub use cell::Cell;
pub use forwarder::{
    Forwarder, ForwarderDescriptor, ForwarderKind, deref, to, to_small_integer,
};
pub use hash_map::HashMap;
pub use instance::Instance;
pub use lambda::{Code, Context, Lambda, LambdaInit};
pub use layout::Layout;
pub use method::{Method, Protocol, Selector, Signature};
pub use singleton::Singleton;
pub use stack::{Stack, StackMode, StackStatus};
pub use strings::StringObject;
pub use task::Task;
