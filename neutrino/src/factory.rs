use std::{mem, ptr};

use crate::{
    Array, Cell, Code, Context, Forwarder, ForwarderDescriptor, ForwarderKind, HashMap, Heap,
    HeapObject, HeapValue, Instance, InstanceType, Lambda, LambdaInit, Layout, Method, Protocol,
    Roots, Selector, Signal, Signature, Singleton, Stack, StringObject, Tagged, Task, Tuple, Value,
    objects::hash_map::INITIAL_CAPACITY, sequence_size,
};

/// Bump-allocates `size` bytes and views them as a `T`.
///
/// The caller must initialize every field before the next allocation.
#[inline]
pub(crate) fn allocate_object<T: HeapObject>(
    heap: &mut Heap,
    size: usize,
) -> Result<Tagged<T>, Signal> {
    debug_assert!(size >= mem::size_of::<Value>());
    let memory = heap.allocate(size)?;
    // SAFETY: fresh storage of at least `size` bytes, initialized by the caller
    Ok(unsafe { Tagged::from_ptr(memory.as_ptr().cast::<T>()) })
}

/// Typed constructors for every heap kind.
///
/// A constructor never collects: if the active space is full it
/// returns `Signal::AllocationFailed` and the caller decides whether to
/// collect and retry. Constructors that need more than one object
/// allocate the inner ones first, so a failure leaves only garbage.
pub struct Factory<'a> {
    heap: &'a mut Heap,
    roots: &'a Roots,
}

impl<'a> Factory<'a> {
    pub fn new(heap: &'a mut Heap, roots: &'a Roots) -> Self {
        Self { heap, roots }
    }

    #[inline]
    fn header(&self, ty: InstanceType) -> Value {
        self.roots.layout(ty).value()
    }

    #[inline]
    fn allocate<T: HeapObject>(&mut self, size: usize) -> Result<Tagged<T>, Signal> {
        allocate_object(self.heap, size)
    }

    pub fn new_string(&mut self, text: &str) -> Result<Tagged<StringObject>, Signal> {
        let header = self.header(InstanceType::String);
        let mut string =
            self.allocate::<StringObject>(StringObject::required_size(text.chars().count()))?;
        string.init(header, text);
        Ok(string)
    }

    /// A string of `length` NUL code points, to be filled by the caller.
    pub fn new_empty_string(&mut self, length: usize) -> Result<Tagged<StringObject>, Signal> {
        let header = self.header(InstanceType::String);
        let mut string = self.allocate::<StringObject>(StringObject::required_size(length))?;
        string.init_empty(header, length);
        Ok(string)
    }

    pub fn new_tuple(&mut self, length: usize) -> Result<Tagged<Tuple>, Signal> {
        let (header, null) = (self.header(InstanceType::Tuple), self.roots.null);
        let mut tuple = self.allocate::<Tuple>(sequence_size(length))?;
        tuple.init(header, length, null);
        Ok(tuple)
    }

    pub fn new_tuple_from(&mut self, data: &[Value]) -> Result<Tagged<Tuple>, Signal> {
        let header = self.header(InstanceType::Tuple);
        let mut tuple = self.allocate::<Tuple>(sequence_size(data.len()))?;
        tuple.init_with_data(header, data);
        Ok(tuple)
    }

    pub fn new_array(&mut self, length: usize) -> Result<Tagged<Array>, Signal> {
        let (header, null) = (self.header(InstanceType::Array), self.roots.null);
        let mut array = self.allocate::<Array>(sequence_size(length))?;
        array.init(header, length, null);
        Ok(array)
    }

    pub fn new_hash_map(&mut self) -> Result<Tagged<HashMap>, Signal> {
        self.new_hash_map_with_capacity(INITIAL_CAPACITY)
    }

    pub fn new_hash_map_with_capacity(
        &mut self,
        capacity: usize,
    ) -> Result<Tagged<HashMap>, Signal> {
        let table = self.new_array(capacity.max(1) * 3)?;
        let header = self.header(InstanceType::HashMap);
        let mut map = self.allocate::<HashMap>(mem::size_of::<HashMap>())?;
        map.init(header, table);
        Ok(map)
    }

    /// A layout with an empty method table.
    pub fn new_layout(
        &mut self,
        instance_type: InstanceType,
        field_count: usize,
        protocol: Value,
    ) -> Result<Tagged<Layout>, Signal> {
        let header = self.roots.layout_layout;
        let methods = self.roots.empty_tuple;
        let mut layout = self.allocate::<Layout>(mem::size_of::<Layout>())?;
        layout.init(header, instance_type, field_count, protocol, methods);
        Ok(layout)
    }

    /// A protocol with an empty method table. `super_protocol` is a
    /// Protocol or null.
    pub fn new_protocol(
        &mut self,
        name: Value,
        super_protocol: Value,
    ) -> Result<Tagged<Protocol>, Signal> {
        let header = self.header(InstanceType::Protocol);
        let methods = self.roots.empty_tuple.cast();
        let mut protocol = self.allocate::<Protocol>(mem::size_of::<Protocol>())?;
        protocol.init(header, name, methods, super_protocol);
        Ok(protocol)
    }

    pub fn new_method(
        &mut self,
        selector: Tagged<Selector>,
        signature: Tagged<Signature>,
        lambda: Tagged<Lambda>,
    ) -> Result<Tagged<Method>, Signal> {
        let header = self.header(InstanceType::Method);
        let mut method = self.allocate::<Method>(mem::size_of::<Method>())?;
        method.init(header, selector, signature, lambda);
        Ok(method)
    }

    pub fn new_selector(
        &mut self,
        name: Tagged<StringObject>,
        argc: usize,
        keywords: Tagged<Tuple>,
        is_accessor: bool,
    ) -> Result<Tagged<Selector>, Signal> {
        let header = self.header(InstanceType::Selector);
        let accessor = if is_accessor {
            self.roots.true_value
        } else {
            self.roots.false_value
        };
        let mut selector = self.allocate::<Selector>(mem::size_of::<Selector>())?;
        selector.init(header, name, argc, keywords, accessor);
        Ok(selector)
    }

    /// `parameters` holds the receiver constraint first.
    pub fn new_signature(&mut self, parameters: &[Value]) -> Result<Tagged<Signature>, Signal> {
        let parameters = self.new_tuple_from(parameters)?;
        let header = self.header(InstanceType::Signature);
        let mut signature = self.allocate::<Signature>(mem::size_of::<Signature>())?;
        signature.init(header, parameters);
        Ok(signature)
    }

    pub fn new_lambda(&mut self, init: LambdaInit) -> Result<Tagged<Lambda>, Signal> {
        let header = self.header(InstanceType::Lambda);
        let mut lambda = self.allocate::<Lambda>(mem::size_of::<Lambda>())?;
        lambda.init(header, init);
        Ok(lambda)
    }

    pub fn new_code(&mut self, units: &[u16]) -> Result<Tagged<Code>, Signal> {
        let header = self.header(InstanceType::Code);
        let mut code = self.allocate::<Code>(Code::required_size(units.len()))?;
        code.init(header, units);
        Ok(code)
    }

    pub fn new_context(&mut self) -> Result<Tagged<Context>, Signal> {
        let header = self.header(InstanceType::Context);
        let mut context = self.allocate::<Context>(mem::size_of::<Context>())?;
        context.init(header);
        Ok(context)
    }

    pub fn new_cell(&mut self, value: Value) -> Result<Tagged<Cell>, Signal> {
        let header = self.header(InstanceType::Cell);
        let mut cell = self.allocate::<Cell>(mem::size_of::<Cell>())?;
        cell.init(header, value);
        Ok(cell)
    }

    pub fn new_forwarder(
        &mut self,
        kind: ForwarderKind,
        target: Value,
    ) -> Result<Tagged<Forwarder>, Signal> {
        let header = self.header(InstanceType::ForwarderDescriptor);
        let mut descriptor =
            self.allocate::<ForwarderDescriptor>(mem::size_of::<ForwarderDescriptor>())?;
        descriptor.init(header, kind, target);
        let header = self.header(InstanceType::Forwarder);
        let mut forwarder = self.allocate::<Forwarder>(mem::size_of::<Forwarder>())?;
        forwarder.init(header, descriptor);
        Ok(forwarder)
    }

    /// An instance of `layout` with every field null.
    pub fn new_instance(&mut self, layout: Tagged<Layout>) -> Result<Tagged<Instance>, Signal> {
        debug_assert_eq!(layout.instance_type(), InstanceType::Instance);
        let null = self.roots.null;
        let mut instance =
            self.allocate::<Instance>(Instance::required_size(layout.field_count()))?;
        instance.init(layout, null);
        Ok(instance)
    }

    pub fn new_stack(&mut self, height: usize) -> Result<Tagged<Stack>, Signal> {
        let header = self.header(InstanceType::Stack);
        let mut stack = self.allocate::<Stack>(Stack::required_size(height))?;
        stack.init(header, height);
        Ok(stack)
    }

    /// A detached task running on a fresh stack of `height` words.
    pub fn new_task(&mut self, height: usize) -> Result<Tagged<Task>, Signal> {
        let stack = self.new_stack(height)?;
        let (header, null) = (self.header(InstanceType::Task), self.roots.null);
        let mut task = self.allocate::<Task>(mem::size_of::<Task>())?;
        task.init(header, stack, null);
        Ok(task)
    }

    pub fn new_singleton(&mut self, ordinal: usize) -> Result<Tagged<Singleton>, Signal> {
        let header = self.header(InstanceType::Singleton);
        let mut singleton = self.allocate::<Singleton>(mem::size_of::<Singleton>())?;
        singleton.init(header, ordinal);
        Ok(singleton)
    }

    /// Shallow byte copy of any object, header included.
    pub fn clone_object<T: HeapObject>(&mut self, object: Tagged<T>) -> Result<Tagged<T>, Signal> {
        let object = object.upcast();
        debug_assert!(
            object.instance_type() != InstanceType::Stack,
            "stacks are copied with copy_contents_from"
        );
        let size = object.size_in_memory();
        let clone = self.allocate::<HeapValue>(size)?;
        // SAFETY: both regions are `size` bytes, the clone is fresh
        unsafe { ptr::copy_nonoverlapping(object.as_ptr().cast::<u8>(), clone.as_ptr().cast(), size) };
        Ok(clone.value().cast_unchecked())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Runtime, RuntimeSettings, Signal, values_equal};

    use super::*;

    #[test]
    fn strings_hold_code_points() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let string = runtime.factory().new_string("héllo").unwrap();
        assert_eq!(string.len(), 5);
        assert_eq!(string.get(1), Some('é'));
        assert_eq!(string.to_rust_string(), "héllo");
    }

    #[test]
    fn new_tuple_is_null_filled() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let null = runtime.roots().null;
        let tuple = runtime.factory().new_tuple(3).unwrap();
        assert!(tuple.elements().iter().all(|&v| v == null));
    }

    #[test]
    fn clone_copies_contents() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let values = [Value::from_i64(1), Value::from_i64(2)];
        let tuple = runtime.factory().new_tuple_from(&values).unwrap();
        let clone = runtime.factory().clone_object(tuple).unwrap();
        assert_ne!(clone.value(), tuple.value());
        assert!(values_equal(clone.value(), tuple.value()));
    }

    #[test]
    fn instance_fields_follow_layout() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let protocol = runtime.roots().object_protocol;
        let layout = runtime
            .factory()
            .new_layout(InstanceType::Instance, 2, protocol)
            .unwrap();
        let mut instance = runtime.factory().new_instance(layout).unwrap();
        assert_eq!(instance.fields().len(), 2);
        instance.set_field(1, Value::from_i64(9));
        assert_eq!(instance.field(1), Value::from_i64(9));
        assert_eq!(instance.upcast().layout(), layout);
    }

    #[test]
    fn full_space_reports_allocation_failure() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let free = runtime.heap().capacity() - runtime.heap().used();
        let result = runtime.factory().new_array(free / 8);
        assert!(matches!(result, Err(Signal::AllocationFailed { .. })));
    }
}
