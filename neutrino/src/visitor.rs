use std::mem;

use crate::{
    Array, Cell, Code, Context, Forwarder, ForwarderDescriptor, HashMap, HeapValue,
    Instance, InstanceType, Lambda, Layout, Method, Protocol, Selector, Signature,
    Singleton, Stack, StringObject, Task, Tuple, Value,
};

/// Enumerates the outgoing references of one object kind.
pub trait Visitable {
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

// visiting an object means we visit only its direct edges.
// so when we call on a generic object, we dispatch here on the actual kind,
// and the kind then calls the visitor on each of its fields.
impl HeapValue {
    /// Bytes the object occupies, including variable-length tails.
    pub fn size_in_memory(&self) -> usize {
        // SAFETY: every arm views the object as its own instance type
        unsafe {
            match self.instance_type() {
                InstanceType::Layout => mem::size_of::<Layout>(),
                InstanceType::Protocol => mem::size_of::<Protocol>(),
                InstanceType::String => self.view::<StringObject>().heap_size(),
                InstanceType::Tuple => self.view::<Tuple>().heap_size(),
                InstanceType::Array => self.view::<Array>().heap_size(),
                InstanceType::HashMap => mem::size_of::<HashMap>(),
                InstanceType::Forwarder => mem::size_of::<Forwarder>(),
                InstanceType::ForwarderDescriptor => {
                    mem::size_of::<ForwarderDescriptor>()
                }
                InstanceType::Cell => mem::size_of::<Cell>(),
                InstanceType::Instance => self.view::<Instance>().heap_size(),
                InstanceType::Lambda => mem::size_of::<Lambda>(),
                InstanceType::Code => self.view::<Code>().heap_size(),
                InstanceType::Context => mem::size_of::<Context>(),
                InstanceType::Method => mem::size_of::<Method>(),
                InstanceType::Selector => mem::size_of::<Selector>(),
                InstanceType::Signature => mem::size_of::<Signature>(),
                InstanceType::Stack => self.view::<Stack>().heap_size(),
                InstanceType::Task => mem::size_of::<Task>(),
                InstanceType::Singleton => mem::size_of::<Singleton>(),
                InstanceType::SmallInteger => {
                    unreachable!("no object has the small integer instance type")
                }
            }
        }
    }
}

impl Visitable for HeapValue {
    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let ty = self.instance_type();
        visitor(&mut self.header);
        // SAFETY: every arm views the object as its own instance type
        unsafe {
            match ty {
                InstanceType::Layout => self.view_mut::<Layout>().visit_edges_mut(visitor),
                InstanceType::Protocol => {
                    self.view_mut::<Protocol>().visit_edges_mut(visitor)
                }
                InstanceType::Tuple => self.view_mut::<Tuple>().visit_edges_mut(visitor),
                InstanceType::Array => self.view_mut::<Array>().visit_edges_mut(visitor),
                InstanceType::HashMap => self.view_mut::<HashMap>().visit_edges_mut(visitor),
                InstanceType::Forwarder => {
                    self.view_mut::<Forwarder>().visit_edges_mut(visitor)
                }
                InstanceType::ForwarderDescriptor => self
                    .view_mut::<ForwarderDescriptor>()
                    .visit_edges_mut(visitor),
                InstanceType::Cell => self.view_mut::<Cell>().visit_edges_mut(visitor),
                InstanceType::Instance => {
                    self.view_mut::<Instance>().visit_edges_mut(visitor)
                }
                InstanceType::Lambda => self.view_mut::<Lambda>().visit_edges_mut(visitor),
                InstanceType::Method => self.view_mut::<Method>().visit_edges_mut(visitor),
                InstanceType::Selector => {
                    self.view_mut::<Selector>().visit_edges_mut(visitor)
                }
                InstanceType::Signature => {
                    self.view_mut::<Signature>().visit_edges_mut(visitor)
                }
                InstanceType::Stack => self.view_mut::<Stack>().visit_edges_mut(visitor),
                InstanceType::Task => self.view_mut::<Task>().visit_edges_mut(visitor),
                // no references beyond the header
                InstanceType::String
                | InstanceType::Code
                | InstanceType::Context
                | InstanceType::Singleton => {}
                InstanceType::SmallInteger => {
                    unreachable!("no object has the small integer instance type")
                }
            }
        }
    }
}
