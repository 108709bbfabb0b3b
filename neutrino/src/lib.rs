mod factory;
mod heap;
mod object;
mod runtime;
mod signal;
mod visitor;

pub mod builtins;
pub mod bytecode;
pub mod channel;
pub mod format;
pub mod interpreter;
pub mod lookup;
pub mod objects;
pub mod refs;
pub mod roots;
pub mod scheduler;
pub mod tagged;

pub use channel::{PlainValue, Request, handle_request};
pub use factory::Factory;
pub use heap::{GarbageCollectionStats, Heap, HeapSettings, RootProvider, Space, grow_value};
pub use interpreter::{RuntimeError, interpret};
pub use object::{HeapValue, InstanceType, hash_value, is_key, key_equals, values_equal};
pub use objects::*;
pub use refs::{Persistent, Ref, RefManager, RefScope};
pub use roots::Roots;
pub use runtime::{LambdaCompiler, OutputBuffer, Runtime, RuntimeSettings};
pub use scheduler::WorkQueue;
pub use signal::Signal;
pub use tagged::{
    HeapObject, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN, Tagged, Value, ValueKind, ValueTag,
    ValueType, type_of,
};
pub use visitor::Visitable;
