use crate::{
    HeapObject, InstanceType, Lambda, StringObject, Tagged, Tuple, Value, Visitable,
    key_equals,
};

/// Language-level inheritance unit: a name, a method table and an
/// optional super protocol.
#[repr(C)]
#[derive(Debug)]
pub struct Protocol {
    pub header: Value,
    name: Value,
    methods: Value,
    super_protocol: Value,
}

impl HeapObject for Protocol {
    const TYPE: Option<InstanceType> = Some(InstanceType::Protocol);
}

impl Protocol {
    pub(crate) fn init(
        &mut self,
        header: Value,
        name: Value,
        methods: Tagged<Tuple>,
        super_protocol: Value,
    ) {
        self.header = header;
        self.name = name;
        self.methods = methods.value();
        self.super_protocol = super_protocol;
    }

    #[inline]
    pub fn name(&self) -> Value {
        self.name
    }

    #[inline]
    pub fn methods(&self) -> Tagged<Tuple> {
        self.methods.cast()
    }

    pub fn set_methods(&mut self, methods: Tagged<Tuple>) {
        self.methods = methods.value();
    }

    /// The super protocol, or None at the root of the chain.
    #[inline]
    pub fn super_protocol(&self) -> Option<Tagged<Protocol>> {
        self.super_protocol.as_object::<Protocol>()
    }
}

impl Visitable for Protocol {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.name);
        visitor(&mut self.methods);
        visitor(&mut self.super_protocol);
    }
}

/// Binds a selector and a signature to a lambda.
#[repr(C)]
#[derive(Debug)]
pub struct Method {
    pub header: Value,
    selector: Value,
    signature: Value,
    lambda: Value,
}

impl HeapObject for Method {
    const TYPE: Option<InstanceType> = Some(InstanceType::Method);
}

impl Method {
    pub(crate) fn init(
        &mut self,
        header: Value,
        selector: Tagged<Selector>,
        signature: Tagged<Signature>,
        lambda: Tagged<Lambda>,
    ) {
        self.header = header;
        self.selector = selector.value();
        self.signature = signature.value();
        self.lambda = lambda.value();
    }

    #[inline]
    pub fn selector(&self) -> Tagged<Selector> {
        self.selector.cast()
    }

    #[inline]
    pub fn signature(&self) -> Tagged<Signature> {
        self.signature.cast()
    }

    #[inline]
    pub fn lambda(&self) -> Tagged<Lambda> {
        self.lambda.cast()
    }
}

impl Visitable for Method {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.selector);
        visitor(&mut self.signature);
        visitor(&mut self.lambda);
    }
}

/// Message name plus arity, keyword slots and accessor flag.
#[repr(C)]
#[derive(Debug)]
pub struct Selector {
    pub header: Value,
    name: Value,
    argc: Value,
    keywords: Value,
    is_accessor: Value,
}

impl HeapObject for Selector {
    const TYPE: Option<InstanceType> = Some(InstanceType::Selector);
}

impl Selector {
    pub(crate) fn init(
        &mut self,
        header: Value,
        name: Tagged<StringObject>,
        argc: usize,
        keywords: Tagged<Tuple>,
        is_accessor: Value,
    ) {
        self.header = header;
        self.name = name.value();
        self.argc = Value::from_usize(argc);
        self.keywords = keywords.value();
        self.is_accessor = is_accessor;
    }

    #[inline]
    pub fn name(&self) -> Value {
        self.name
    }

    #[inline]
    pub fn argc(&self) -> usize {
        self.argc.small_integer_usize()
    }

    #[inline]
    pub fn keywords(&self) -> Tagged<Tuple> {
        self.keywords.cast()
    }

    #[inline]
    pub fn is_accessor(&self) -> Value {
        self.is_accessor
    }

    pub fn selector_equals(&self, that: &Selector) -> bool {
        key_equals(self.name, that.name)
            && self.argc == that.argc
            && key_equals(self.keywords, that.keywords)
            && self.is_accessor == that.is_accessor
    }
}

impl Visitable for Selector {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.name);
        visitor(&mut self.keywords);
        visitor(&mut self.is_accessor);
    }
}

/// Ordered parameter constraints, receiver first. Each entry is a
/// Protocol, or any other value for an unconstrained parameter.
#[repr(C)]
#[derive(Debug)]
pub struct Signature {
    pub header: Value,
    parameters: Value,
}

impl HeapObject for Signature {
    const TYPE: Option<InstanceType> = Some(InstanceType::Signature);
}

impl Signature {
    pub(crate) fn init(&mut self, header: Value, parameters: Tagged<Tuple>) {
        self.header = header;
        self.parameters = parameters.value();
    }

    #[inline]
    pub fn parameters(&self) -> Tagged<Tuple> {
        self.parameters.cast()
    }
}

impl Visitable for Signature {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.parameters);
    }
}
