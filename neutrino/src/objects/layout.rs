use crate::{HeapObject, InstanceType, Tagged, Tuple, Value, Visitable};

/// Per-kind metadata: instance kind, field count, protocol and a local
/// method table.
///
/// A Layout is itself a heap object. Its header points at the root
/// layout-of-layouts, whose header points at itself.
///
/// ```text
/// +-----------------+
/// | header          | -> layout of layouts
/// | instance type   | small integer
/// | field count     | small integer
/// | protocol        | Protocol or null
/// | methods         | Tuple of Method
/// +-----------------+
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct Layout {
    pub header: Value,
    instance_type: Value,
    field_count: Value,
    protocol: Value,
    methods: Value,
}

impl HeapObject for Layout {
    const TYPE: Option<InstanceType> = Some(InstanceType::Layout);
}

impl Layout {
    pub(crate) fn init(
        &mut self,
        header: Value,
        instance_type: InstanceType,
        field_count: usize,
        protocol: Value,
        methods: Value,
    ) {
        self.header = header;
        self.instance_type = Value::from_i64(instance_type as i64);
        self.field_count = Value::from_usize(field_count);
        self.protocol = protocol;
        self.methods = methods;
    }

    #[inline]
    pub fn instance_type(&self) -> InstanceType {
        let raw = self.instance_type.small_integer_value() as u8;
        match InstanceType::try_from(raw) {
            Ok(ty) => ty,
            Err(raw) => panic!("corrupt layout, instance type {raw}"),
        }
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.field_count.small_integer_usize()
    }

    #[inline]
    pub fn protocol(&self) -> Value {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: Value) {
        debug_assert!(!protocol.is_signal());
        self.protocol = protocol;
    }

    #[inline]
    pub fn methods(&self) -> Tagged<Tuple> {
        self.methods.cast()
    }

    pub fn set_methods(&mut self, methods: Tagged<Tuple>) {
        self.methods = methods.value();
    }
}

impl Visitable for Layout {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.protocol);
        visitor(&mut self.methods);
    }
}
