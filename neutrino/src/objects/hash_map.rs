use crate::{
    Array, Factory, HeapObject, InstanceType, Signal, Tagged, Value, Visitable,
    grow_value, hash_value, is_key, key_equals,
};

const ENTRY_SIZE: usize = 3;
const KEY_OFFSET: usize = 0;
const VALUE_OFFSET: usize = 1;
const HASH_OFFSET: usize = 2;

pub const LOAD_FACTOR_PERCENT: usize = 75;
pub const INITIAL_CAPACITY: usize = 4;

/// Open-addressing hash map over an Array of (key, value, hash) triples.
///
/// An entry is occupied iff its hash slot holds a small integer. The
/// cached hash is structural, so entries stay valid across collections.
#[repr(C)]
#[derive(Debug)]
pub struct HashMap {
    pub header: Value,
    size: Value,
    table: Value,
}

impl HeapObject for HashMap {
    const TYPE: Option<InstanceType> = Some(InstanceType::HashMap);
}

impl HashMap {
    pub(crate) fn init(&mut self, header: Value, table: Tagged<Array>) {
        debug_assert_eq!(table.len() % ENTRY_SIZE, 0);
        self.header = header;
        self.size = Value::from_i64(0);
        self.table = table.value();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size.small_integer_usize()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table().len() / ENTRY_SIZE
    }

    #[inline]
    fn table(&self) -> Tagged<Array> {
        self.table.cast()
    }

    /// Returns the value for `key`, or `Signal::Nothing` if absent.
    pub fn get(&self, key: Value) -> Result<Value, Signal> {
        let hash = hash_value(key);
        let table = self.table();
        let index = find_slot(table, hash, key);
        if is_occupied(table, index) {
            Ok(table.get(index * ENTRY_SIZE + VALUE_OFFSET))
        } else {
            Err(Signal::Nothing)
        }
    }

    /// Inserts or replaces. Grows first if the load factor is exceeded,
    /// which may fail with an allocation signal before anything changed.
    pub fn set(
        mut map: Tagged<HashMap>,
        factory: &mut Factory<'_>,
        key: Value,
        value: Value,
    ) -> Result<(), Signal> {
        assert!(is_key(key), "hash map key without structural hash: {key:?}");
        debug_assert!(!value.is_signal());
        if (map.len() + 1) * 100 > map.capacity() * LOAD_FACTOR_PERCENT {
            let new_capacity = grow_value(map.capacity());
            Self::extend_capacity(map, factory, new_capacity)?;
        }
        let hash = hash_value(key);
        let mut table = map.table();
        let index = find_slot(table, hash, key);
        if !is_occupied(table, index) {
            map.size = Value::from_usize(map.len() + 1);
        }
        let base = index * ENTRY_SIZE;
        table.set(base + KEY_OFFSET, key);
        table.set(base + VALUE_OFFSET, value);
        table.set(base + HASH_OFFSET, Value::from_i64(hash as i64));
        Ok(())
    }

    fn extend_capacity(
        mut map: Tagged<HashMap>,
        factory: &mut Factory<'_>,
        new_capacity: usize,
    ) -> Result<(), Signal> {
        let old_table = map.table();
        let old_capacity = map.capacity();
        debug_assert!(new_capacity > old_capacity);
        let mut new_table = factory.new_array(new_capacity * ENTRY_SIZE)?;
        for i in 0..old_capacity {
            if !is_occupied(old_table, i) {
                continue;
            }
            let base = i * ENTRY_SIZE;
            let key = old_table.get(base + KEY_OFFSET);
            let hash = old_table.get(base + HASH_OFFSET);
            let index = find_slot(new_table, hash.small_integer_value() as u64, key);
            debug_assert!(!is_occupied(new_table, index));
            let target = index * ENTRY_SIZE;
            new_table.set(target + KEY_OFFSET, key);
            new_table.set(target + VALUE_OFFSET, old_table.get(base + VALUE_OFFSET));
            new_table.set(target + HASH_OFFSET, hash);
        }
        map.table = new_table.value();
        Ok(())
    }

    /// Calls `f` for every (key, value) pair in table order.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        let table = self.table();
        for i in 0..self.capacity() {
            if is_occupied(table, i) {
                let base = i * ENTRY_SIZE;
                f(table.get(base + KEY_OFFSET), table.get(base + VALUE_OFFSET));
            }
        }
    }
}

#[inline]
fn is_occupied(table: Tagged<Array>, index: usize) -> bool {
    table.get(index * ENTRY_SIZE + HASH_OFFSET).is_small_integer()
}

/// Index of the entry holding `key`, or of the empty entry where it belongs.
fn find_slot(table: Tagged<Array>, hash: u64, key: Value) -> usize {
    let capacity = table.len() / ENTRY_SIZE;
    let mut index = (hash % capacity as u64) as usize;
    while is_occupied(table, index) {
        let base = index * ENTRY_SIZE;
        let stored = table.get(base + HASH_OFFSET).small_integer_value() as u64;
        if stored == hash && key_equals(table.get(base + KEY_OFFSET), key) {
            break;
        }
        index = (index + 1) % capacity;
    }
    index
}

impl Visitable for HashMap {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.table);
    }
}

#[cfg(test)]
mod tests {
    use crate::{Runtime, RuntimeSettings};

    use super::*;

    #[test]
    fn missing_key_is_nothing() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let map = runtime.new_hash_map().unwrap();
        assert_eq!(map.get(Value::from_i64(1)), Err(Signal::Nothing));
        assert!(map.is_empty());
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let map = runtime.new_hash_map().unwrap();
        let key = Value::from_i64(5);
        HashMap::set(map, &mut runtime.factory(), key, Value::from_i64(1)).unwrap();
        HashMap::set(map, &mut runtime.factory(), key, Value::from_i64(2)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(key), Ok(Value::from_i64(2)));
    }

    #[test]
    fn grows_and_keeps_every_entry() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let map = runtime.new_hash_map().unwrap();
        let initial_capacity = map.capacity();
        for i in 0..100 {
            HashMap::set(
                map,
                &mut runtime.factory(),
                Value::from_i64(i),
                Value::from_i64(i * 10),
            )
            .unwrap();
        }
        assert!(map.capacity() > initial_capacity);
        assert_eq!(map.len(), 100);
        for i in 0..100 {
            assert_eq!(map.get(Value::from_i64(i)), Ok(Value::from_i64(i * 10)));
        }
        let mut seen = 0;
        map.for_each(|_, _| seen += 1);
        assert_eq!(seen, 100);
    }

    #[test]
    fn string_keys_compare_structurally() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let map = runtime.new_hash_map().unwrap();
        let key = runtime.new_string("answer").unwrap();
        HashMap::set(map, &mut runtime.factory(), key.value(), Value::from_i64(42))
            .unwrap();
        let lookup = runtime.new_string("answer").unwrap();
        assert_ne!(key.value(), lookup.value());
        assert_eq!(map.get(lookup.value()), Ok(Value::from_i64(42)));
    }

    #[test]
    fn hash_map_survives_collection() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let scope = runtime.refs().enter();
        let map = scope.new_ref(runtime.new_hash_map().unwrap());
        for i in 0..20 {
            let key = runtime.new_string(&format!("k{i}")).unwrap();
            HashMap::set(map.get(), &mut runtime.factory(), key.value(), Value::from_i64(i))
                .unwrap();
        }
        runtime.collect_garbage();
        for i in 0..20 {
            let key = runtime.new_string(&format!("k{i}")).unwrap();
            assert_eq!(map.get().get(key.value()), Ok(Value::from_i64(i)));
        }
    }
}
