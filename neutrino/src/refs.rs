//! Rooted references for native code.
//!
//! `Tagged<T>` is a direct pointer and goes stale at the next collection.
//! Native code that holds an object across anything that may allocate
//! registers it here instead: either in a [`RefScope`], which releases
//! its slots when dropped, or as a [`Persistent`], which lives until
//! it is disposed.
use std::{
    cell::{Cell, RefCell},
    marker::PhantomData,
    rc::Rc,
};

use crate::{HeapObject, Tagged, Value};

pub const REF_BLOCK_CAPACITY: usize = 32;

type RefBlock = [Value; REF_BLOCK_CAPACITY];

/// Scoped slots live in fixed-size blocks, the block list only grows.
/// Slot addresses never move because each block is boxed.
pub struct RefManager {
    blocks: RefCell<Vec<Box<RefBlock>>>,
    len: Cell<usize>,
    persistent: RefCell<Vec<Rc<PersistentSlot>>>,
}

struct PersistentSlot {
    value: Cell<Value>,
    index: Cell<usize>,
}

impl Default for RefManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RefManager {
    pub fn new() -> Self {
        Self {
            blocks: RefCell::new(Vec::new()),
            len: Cell::new(0),
            persistent: RefCell::new(Vec::new()),
        }
    }

    /// Opens a scope. Scopes must be dropped in reverse order of entry.
    pub fn enter(self: &Rc<Self>) -> RefScope {
        RefScope {
            manager: Rc::clone(self),
            start: self.len.get(),
        }
    }

    /// Number of live scoped slots across all scopes.
    pub fn scoped_count(&self) -> usize {
        self.len.get()
    }

    pub fn persistent_count(&self) -> usize {
        self.persistent.borrow().len()
    }

    fn push(&self, value: Value) -> *mut Value {
        let index = self.len.get();
        let (block, slot) = (index / REF_BLOCK_CAPACITY, index % REF_BLOCK_CAPACITY);
        let mut blocks = self.blocks.borrow_mut();
        if block == blocks.len() {
            log::trace!("extending reference blocks to {}", block + 1);
            blocks.push(Box::new([Value::from_i64(0); REF_BLOCK_CAPACITY]));
        }
        self.len.set(index + 1);
        let slot = &mut blocks[block][slot];
        *slot = value;
        slot as *mut Value
    }

    fn exit(&self, start: usize) {
        debug_assert!(start <= self.len.get(), "reference scopes exited out of order");
        self.len.set(start);
    }

    pub fn new_persistent<T>(&self, tagged: Tagged<T>) -> Persistent<T> {
        let mut registry = self.persistent.borrow_mut();
        let slot = Rc::new(PersistentSlot {
            value: Cell::new(tagged.value()),
            index: Cell::new(registry.len()),
        });
        registry.push(Rc::clone(&slot));
        Persistent {
            slot,
            _type: PhantomData,
        }
    }

    /// Releases a persistent handle. The last registered handle takes its
    /// registry index.
    pub fn dispose<T>(&self, handle: Persistent<T>) {
        let mut registry = self.persistent.borrow_mut();
        let index = handle.slot.index.get();
        debug_assert!(Rc::ptr_eq(&registry[index], &handle.slot));
        registry.swap_remove(index);
        if let Some(moved) = registry.get(index) {
            moved.index.set(index);
        }
    }

    /// Visits every scoped slot and every persistent handle.
    pub fn visit(&self, visitor: &mut dyn FnMut(&mut Value)) {
        let len = self.len.get();
        let mut blocks = self.blocks.borrow_mut();
        for (i, block) in blocks.iter_mut().enumerate() {
            let start = i * REF_BLOCK_CAPACITY;
            if start >= len {
                break;
            }
            let used = (len - start).min(REF_BLOCK_CAPACITY);
            for slot in &mut block[..used] {
                visitor(slot);
            }
        }
        for slot in self.persistent.borrow().iter() {
            let mut value = slot.value.get();
            visitor(&mut value);
            slot.value.set(value);
        }
    }
}

/// A stack-discipline region of scoped references.
pub struct RefScope {
    manager: Rc<RefManager>,
    start: usize,
}

impl RefScope {
    pub fn new_ref<T>(&self, tagged: Tagged<T>) -> Ref<'_, T> {
        Ref {
            slot: self.manager.push(tagged.value()),
            _scope: PhantomData,
            _type: PhantomData,
        }
    }

    /// Roots an untyped value, small integers included.
    pub fn new_value_ref(&self, value: Value) -> Ref<'_, ()> {
        Ref {
            slot: self.manager.push(value),
            _scope: PhantomData,
            _type: PhantomData,
        }
    }
}

impl Drop for RefScope {
    fn drop(&mut self) {
        self.manager.exit(self.start);
    }
}

/// A rooted slot, valid while its scope is alive.
pub struct Ref<'scope, T> {
    slot: *mut Value,
    _scope: PhantomData<&'scope RefScope>,
    _type: PhantomData<*const T>,
}

impl<T> Clone for Ref<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<'_, T> {}

impl<T> Ref<'_, T> {
    #[inline]
    pub fn value(&self) -> Value {
        // SAFETY: the slot lives in a boxed block for as long as the scope
        unsafe { *self.slot }
    }

    #[inline]
    pub fn set(&self, value: Value) {
        // SAFETY: see value
        unsafe { *self.slot = value }
    }
}

impl<T: HeapObject> Ref<'_, T> {
    /// The current location of the referenced object.
    #[inline]
    pub fn get(&self) -> Tagged<T> {
        self.value().cast()
    }
}

/// A rooted handle with no scope. Must be given back to
/// [`RefManager::dispose`].
pub struct Persistent<T> {
    slot: Rc<PersistentSlot>,
    _type: PhantomData<*const T>,
}

impl<T> Persistent<T> {
    #[inline]
    pub fn value(&self) -> Value {
        self.slot.value.get()
    }

    /// Registry position, changes when an earlier handle is disposed.
    pub fn index(&self) -> usize {
        self.slot.index.get()
    }
}

impl<T: HeapObject> Persistent<T> {
    #[inline]
    pub fn get(&self) -> Tagged<T> {
        self.value().cast()
    }
}

impl<T> Drop for Persistent<T> {
    fn drop(&mut self) {
        // The registry holds the other reference until dispose.
        if Rc::strong_count(&self.slot) > 1 {
            log::warn!(
                "persistent handle {} dropped without dispose, it stays rooted",
                self.slot.index.get()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Runtime, RuntimeSettings, StringObject, Tuple};

    use super::*;

    #[test]
    fn scopes_release_in_order() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let refs = runtime.refs();
        let empty = runtime.roots().empty_tuple.cast::<Tuple>();
        let outer = refs.enter();
        let _a = outer.new_ref(empty);
        {
            let inner = refs.enter();
            let _b = inner.new_ref(empty);
            let _c = inner.new_ref(empty);
            assert_eq!(refs.scoped_count(), 3);
        }
        assert_eq!(refs.scoped_count(), 1);
        drop(outer);
        assert_eq!(refs.scoped_count(), 0);
    }

    #[test]
    fn overflow_blocks_are_visited() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let refs = runtime.refs();
        let scope = refs.enter();
        let count = REF_BLOCK_CAPACITY * 2 + 5;
        for i in 0..count {
            scope.new_value_ref(Value::from_usize(i));
        }
        let mut seen = Vec::new();
        refs.visit(&mut |v| seen.push(v.small_integer_usize()));
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn scoped_refs_follow_collection() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let scope = runtime.refs().enter();
        let string = scope.new_ref(runtime.new_string("moved").unwrap());
        let before = string.value();
        runtime.collect_garbage();
        assert_ne!(string.value(), before);
        assert_eq!(string.get().to_rust_string(), "moved");
    }

    #[test]
    fn persistent_handles_follow_collection() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let string = runtime.new_string("kept").unwrap();
        let handle: Persistent<StringObject> = runtime.refs().new_persistent(string);
        runtime.collect_garbage();
        assert_ne!(handle.value(), string.value());
        assert_eq!(handle.get().to_rust_string(), "kept");
        runtime.refs().dispose(handle);
        assert_eq!(runtime.refs().persistent_count(), 0);
    }

    #[test]
    fn dispose_swaps_in_the_last_handle() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let refs = runtime.refs();
        let empty = runtime.roots().empty_tuple.cast::<Tuple>();
        let a = refs.new_persistent(empty);
        let b = refs.new_persistent(empty);
        let c = refs.new_persistent(empty);
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        refs.dispose(a);
        assert_eq!(c.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(refs.persistent_count(), 2);
        refs.dispose(b);
        refs.dispose(c);
        assert_eq!(refs.persistent_count(), 0);
    }

    #[test]
    fn leaked_handles_stay_registered() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let refs = runtime.refs();
        let empty = runtime.roots().empty_tuple.cast::<Tuple>();
        let leaked = refs.new_persistent(empty);
        assert_eq!(Rc::strong_count(&leaked.slot), 2);
        drop(leaked);
        assert_eq!(refs.persistent_count(), 1);
        let mut seen = 0;
        refs.visit(&mut |v| {
            assert_eq!(*v, empty.value());
            seen += 1;
        });
        assert_eq!(seen, 1);
        let kept = refs.new_persistent(empty);
        assert_eq!(kept.index(), 1);
        refs.dispose(kept);
        assert_eq!(refs.persistent_count(), 1);
    }
}
