use std::ptr::{self, NonNull};

use crate::{HeapValue, InstanceType, Layout, Signal, Stack, Tagged, Value, Visitable};

const WORD: usize = std::mem::size_of::<u64>();

/// Approximately grows `n` by the golden ratio, always by at least one.
#[inline]
pub fn grow_value(n: usize) -> usize {
    (((n << 3) + (n << 2) + n) >> 3).max(n + 1)
}

/// Anything that holds references the collector must update.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

#[derive(Debug, Clone, Copy)]
pub struct HeapSettings {
    /// Initial size of a semi-space in bytes. Must be a multiple of 8.
    pub semi_space_size: usize,
    /// Upper bound a semi-space may grow to.
    pub max_semi_space_size: usize,
    /// Live data above this percentage of the capacity after a cycle grows the space.
    pub growth_threshold_percent: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            semi_space_size: 1024 * 1024,          // 1 MB
            max_semi_space_size: 256 * 1024 * 1024, // 256 MB
            growth_threshold_percent: 75,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.semi_space_size == 0 {
            return Err("semi_space_size must be > 0");
        }
        if !self.semi_space_size.is_multiple_of(WORD) {
            return Err("semi_space_size must be a multiple of the word size");
        }
        if self.max_semi_space_size < self.semi_space_size {
            return Err("max_semi_space_size must be >= semi_space_size");
        }
        if !(1..=100).contains(&self.growth_threshold_percent) {
            return Err("growth_threshold_percent must be between 1 and 100");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GarbageCollectionStats {
    pub collections: usize,
    pub last_bytes_copied: usize,
    pub total_bytes_copied: usize,
}

/// Contiguous bump-allocated region.
pub struct Space {
    memory: Box<[u64]>,
    cursor: usize,
}

impl Space {
    pub fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(WORD);
        Self {
            memory: vec![0u64; words].into_boxed_slice(),
            cursor: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.len() * WORD
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.cursor
    }

    #[inline]
    fn start(&self) -> *mut u8 {
        self.memory.as_ptr() as *mut u8
    }

    pub fn contains(&self, address: *const u8) -> bool {
        let start = self.start() as usize;
        (start..start + self.cursor).contains(&(address as usize))
    }

    /// Bumps the cursor by `size` bytes rounded up to words.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = size.next_multiple_of(WORD);
        if size > self.free() {
            return None;
        }
        // SAFETY: cursor + size is inside the memory block
        let ptr = unsafe { self.start().add(self.cursor) };
        self.cursor += size;
        NonNull::new(ptr)
    }

    /// Walks the objects between `from` and the cursor, in allocation order.
    fn object_at(&self, offset: usize) -> *mut HeapValue {
        // SAFETY: offset < cursor
        unsafe { self.start().add(offset) as *mut HeapValue }
    }
}

/// Moves live objects from one space into another.
struct FieldMigrator<'a> {
    from: &'a Space,
    to: &'a mut Space,
}

impl FieldMigrator<'_> {
    fn migrate_field(&mut self, field: &mut Value) {
        // If the field doesn't hold a heap object then there's nothing to do
        if !field.is_object() {
            return;
        }
        let address = field.object_address();
        debug_assert!(self.from.contains(address), "field outside from-space");
        // SAFETY: field references a live object in from-space
        let object = unsafe { &mut *(address as *mut HeapValue) };
        // Already moved, just update the field
        if let Some(target) = object.forward_target() {
            *field = target;
            return;
        }
        if object.instance_type() == InstanceType::Stack {
            // SAFETY: instance type checked
            unsafe { object.view_mut::<Stack>() }.uncook();
        }
        let size = object.size_in_memory();
        let Some(new_address) = self.to.allocate(size) else {
            panic!("to-space exhausted while copying {size} bytes");
        };
        // SAFETY: distinct spaces, both regions are `size` bytes long
        unsafe { ptr::copy_nonoverlapping(address, new_address.as_ptr(), size) };
        let clone = Value::from_address(new_address.as_ptr());
        object.set_forward_pointer(clone);
        *field = clone;
    }
}

pub struct Heap {
    space: Space,
    settings: HeapSettings,
    stats: GarbageCollectionStats,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        Self {
            space: Space::new(settings.semi_space_size),
            settings,
            stats: GarbageCollectionStats::default(),
        }
    }

    /// Raw storage from the active semi-space. Never collects.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, Signal> {
        self.space
            .allocate(size)
            .ok_or(Signal::AllocationFailed { size })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.space.capacity()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.space.used()
    }

    pub fn stats(&self) -> GarbageCollectionStats {
        self.stats
    }

    pub fn contains(&self, value: Value) -> bool {
        value.is_object() && self.space.contains(value.object_address())
    }

    /// Copies every object reachable from `roots` into a fresh space.
    ///
    /// `pending` is the size of the allocation that failed. If it still
    /// does not fit, or the live data crowds the new space, the objects
    /// are copied once more into a grown space.
    pub fn collect_garbage(&mut self, roots: &mut dyn RootProvider, pending: usize) {
        log::info!(
            "Starting garbage collection ({} of {} bytes used)",
            self.space.used(),
            self.space.capacity()
        );
        let mut capacity = self.space.capacity();
        loop {
            self.copy_live_objects(roots, capacity);
            let live = self.space.used();
            let needs_room = self.space.free() < pending;
            let crowded = live * 100 > capacity * self.settings.growth_threshold_percent;
            if !(needs_room || crowded) || capacity >= self.settings.max_semi_space_size {
                break;
            }
            capacity = grow_value(capacity)
                .max(live + pending)
                .next_multiple_of(WORD)
                .min(self.settings.max_semi_space_size);
            log::debug!("growing semi-space to {capacity} bytes");
        }
        log::info!(
            "Done collecting garbage ({} bytes copied, capacity {})",
            self.stats.last_bytes_copied,
            self.space.capacity()
        );
    }

    fn copy_live_objects(&mut self, roots: &mut dyn RootProvider, capacity: usize) {
        let from = std::mem::replace(&mut self.space, Space::new(capacity));
        let mut migrator = FieldMigrator {
            from: &from,
            to: &mut self.space,
        };
        // Migrate all roots (shallow)
        roots.visit_roots(&mut |field| migrator.migrate_field(field));
        // Deep migration of shallowly migrated objects
        let mut scan = 0;
        while scan < migrator.to.used() {
            let object = migrator.to.object_at(scan);
            // SAFETY: scan walks object boundaries in to-space
            let object = unsafe { &mut *object };
            let size = object.size_in_memory();
            object.visit_edges_mut(&mut |field| migrator.migrate_field(field));
            if object.instance_type() == InstanceType::Stack {
                // SAFETY: instance type checked
                unsafe { object.view_mut::<Stack>() }.recook();
            }
            scan += size.next_multiple_of(WORD);
        }
        self.stats.collections += 1;
        self.stats.last_bytes_copied = self.space.used();
        self.stats.total_bytes_copied += self.space.used();
        // from-space is dropped here
    }

    /// Checks every object in the active space. Debug aid.
    pub fn validate(&self) {
        let mut offset = 0;
        while offset < self.space.used() {
            // SAFETY: offset walks object boundaries
            let object = unsafe { &mut *self.space.object_at(offset) };
            assert!(
                !object.header.is_forward_pointer(),
                "forward pointer outside collection at offset {offset}"
            );
            assert!(
                self.contains(object.header),
                "header outside the heap at offset {offset}"
            );
            let layout: Tagged<Layout> = object.header.cast_unchecked();
            assert_eq!(
                layout.upcast().instance_type(),
                InstanceType::Layout,
                "header is not a layout at offset {offset}"
            );
            if object.instance_type() == InstanceType::Stack {
                // SAFETY: instance type checked
                unsafe { object.view_mut::<Stack>() }.validate();
            }
            offset += object.size_in_memory().next_multiple_of(WORD);
        }
    }
}
