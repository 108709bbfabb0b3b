use std::mem;

use crate::{HeapObject, InstanceType, Tagged, Tuple, Value, Visitable};

/// Executable unit.
///
/// ```text
/// +------------------+
/// | header           |
/// | argc             | small integer
/// | max stack height | small integer, words the body may push
/// | code             | Code, or void until compiled
/// | constant pool    | Tuple, or void until compiled
/// | outers           | Tuple of captured values
/// | context          | Context
/// | source           | opaque input for the lazy compiler
/// +------------------+
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct Lambda {
    pub header: Value,
    argc: Value,
    max_stack_height: Value,
    code: Value,
    constant_pool: Value,
    outers: Value,
    context: Value,
    source: Value,
}

impl HeapObject for Lambda {
    const TYPE: Option<InstanceType> = Some(InstanceType::Lambda);
}

pub struct LambdaInit {
    pub argc: usize,
    pub max_stack_height: usize,
    pub code: Value,
    pub constant_pool: Value,
    pub outers: Value,
    pub context: Value,
    pub source: Value,
}

impl Lambda {
    pub(crate) fn init(&mut self, header: Value, init: LambdaInit) {
        self.header = header;
        self.argc = Value::from_usize(init.argc);
        self.max_stack_height = Value::from_usize(init.max_stack_height);
        self.code = init.code;
        self.constant_pool = init.constant_pool;
        self.outers = init.outers;
        self.context = init.context;
        self.source = init.source;
    }

    #[inline]
    pub fn argc(&self) -> usize {
        self.argc.small_integer_usize()
    }

    #[inline]
    pub fn max_stack_height(&self) -> usize {
        self.max_stack_height.small_integer_usize()
    }

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.code.is::<Code>()
    }

    #[inline]
    pub fn code(&self) -> Tagged<Code> {
        self.code.cast()
    }

    #[inline]
    pub fn constant_pool(&self) -> Tagged<Tuple> {
        self.constant_pool.cast()
    }

    /// Installs compiled code, replacing the placeholder.
    pub fn set_compiled(
        &mut self,
        code: Tagged<Code>,
        constant_pool: Tagged<Tuple>,
        max_stack_height: usize,
    ) {
        self.code = code.value();
        self.constant_pool = constant_pool.value();
        self.max_stack_height = Value::from_usize(max_stack_height);
    }

    #[inline]
    pub fn outers(&self) -> Tagged<Tuple> {
        self.outers.cast()
    }

    pub fn set_outers(&mut self, outers: Tagged<Tuple>) {
        self.outers = outers.value();
    }

    #[inline]
    pub fn context(&self) -> Value {
        self.context
    }

    #[inline]
    pub fn source(&self) -> Value {
        self.source
    }
}

impl Visitable for Lambda {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.code);
        visitor(&mut self.constant_pool);
        visitor(&mut self.outers);
        visitor(&mut self.context);
        visitor(&mut self.source);
    }
}

/// Bytecode buffer of 16-bit units.
#[repr(C)]
#[derive(Debug)]
pub struct Code {
    pub header: Value,
    length: Value,
    units: [u16; 0],
}

impl HeapObject for Code {
    const TYPE: Option<InstanceType> = Some(InstanceType::Code);
}

impl Code {
    pub fn required_size(length: usize) -> usize {
        let raw = mem::size_of::<Code>() + length * mem::size_of::<u16>();
        raw.next_multiple_of(mem::size_of::<Value>())
    }

    pub(crate) fn init(&mut self, header: Value, units: &[u16]) {
        self.header = header;
        self.length = Value::from_usize(units.len());
        // SAFETY: allocated with required_size(units.len())
        unsafe {
            std::ptr::copy_nonoverlapping(units.as_ptr(), self.units.as_mut_ptr(), units.len())
        };
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length.small_integer_usize()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn units(&self) -> &[u16] {
        // SAFETY: length units follow the fixed part
        unsafe { std::slice::from_raw_parts(self.units.as_ptr(), self.len()) }
    }

    pub fn heap_size(&self) -> usize {
        Self::required_size(self.len())
    }
}

/// Lexical context a lambda was created in.
#[repr(C)]
#[derive(Debug)]
pub struct Context {
    pub header: Value,
}

impl HeapObject for Context {
    const TYPE: Option<InstanceType> = Some(InstanceType::Context);
}

impl Context {
    pub(crate) fn init(&mut self, header: Value) {
        self.header = header;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_size_rounds_to_words() {
        assert_eq!(Code::required_size(0), 16);
        assert_eq!(Code::required_size(4), 24);
        assert_eq!(Code::required_size(5), 32);
    }
}
