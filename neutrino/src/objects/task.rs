use crate::{HeapObject, InstanceType, Stack, Tagged, Value, Visitable};

/// A cooperative unit of execution: one stack plus the task that
/// attached to it, or null.
#[repr(C)]
#[derive(Debug)]
pub struct Task {
    pub header: Value,
    stack: Value,
    caller: Value,
}

impl HeapObject for Task {
    const TYPE: Option<InstanceType> = Some(InstanceType::Task);
}

impl Task {
    pub(crate) fn init(&mut self, header: Value, stack: Tagged<Stack>, caller: Value) {
        self.header = header;
        self.stack = stack.value();
        self.caller = caller;
    }

    #[inline]
    pub fn stack(&self) -> Tagged<Stack> {
        self.stack.cast()
    }

    pub fn set_stack(&mut self, stack: Tagged<Stack>) {
        self.stack = stack.value();
    }

    /// The attaching task, or null when detached.
    #[inline]
    pub fn caller(&self) -> Value {
        self.caller
    }

    pub fn set_caller(&mut self, caller: Value) {
        debug_assert!(!caller.is_signal());
        self.caller = caller;
    }
}

impl Visitable for Task {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.stack);
        visitor(&mut self.caller);
    }
}
