use std::mem;

use crate::{
    Code, Context, Factory, HashMap, Heap, InstanceType, Lambda, LambdaInit, Layout, Protocol,
    Signal, Tagged, Tuple, Value, factory::allocate_object, sequence_size,
};

/// Stand-in for fields that are patched once their real value exists.
const PLACEHOLDER: Value = Value::from_raw(0);

/// Ordinals of the four singletons, used for their structural hash.
pub const VOID_ORDINAL: usize = 0;
pub const NULL_ORDINAL: usize = 1;
pub const TRUE_ORDINAL: usize = 2;
pub const FALSE_ORDINAL: usize = 3;

/// The fixed global-roots table.
///
/// Every field is visited by the collector, so plain `Value`s are safe
/// to read from here after any allocation.
pub struct Roots {
    /// The layout that describes all other layouts (self-referential).
    pub layout_layout: Value,
    /// One layout per instance type, indexed by `InstanceType as usize`.
    /// The `Instance` entry is the template `new` clones.
    pub layouts: [Value; InstanceType::COUNT],

    // ── Singletons ──────────────────────────────────────────────────
    pub void: Value,
    pub null: Value,
    pub true_value: Value,
    pub false_value: Value,

    /// Root of every protocol chain.
    pub object_protocol: Value,

    pub empty_tuple: Value,
    pub empty_string: Value,
    /// Placeholder lambda owning the sentinel bottom frame of every stack.
    pub empty_lambda: Value,
    pub empty_context: Value,

    /// Global name String -> Value table.
    pub toplevel: Value,
}

impl Roots {
    #[inline]
    pub fn layout(&self, ty: InstanceType) -> Tagged<Layout> {
        self.layouts[ty as usize].cast_unchecked()
    }

    /// Layout small integers dispatch through.
    #[inline]
    pub fn small_integer_layout(&self) -> Tagged<Layout> {
        self.layout(InstanceType::SmallInteger)
    }

    /// Protocol attached to the built-in layout for `ty`.
    pub fn protocol(&self, ty: InstanceType) -> Tagged<Protocol> {
        self.layout(ty).protocol().cast()
    }

    #[inline]
    pub fn toplevel(&self) -> Tagged<HashMap> {
        self.toplevel.cast()
    }

    #[inline]
    pub fn boolean(&self, value: bool) -> Value {
        if value {
            self.true_value
        } else {
            self.false_value
        }
    }

    pub fn visit(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.layout_layout);
        for layout in &mut self.layouts {
            visitor(layout);
        }
        visitor(&mut self.void);
        visitor(&mut self.null);
        visitor(&mut self.true_value);
        visitor(&mut self.false_value);
        visitor(&mut self.object_protocol);
        visitor(&mut self.empty_tuple);
        visitor(&mut self.empty_string);
        visitor(&mut self.empty_lambda);
        visitor(&mut self.empty_context);
        visitor(&mut self.toplevel);
    }

    /// Allocates the root objects into a fresh heap.
    ///
    /// Nothing is collected while bootstrapping, so the heap must be able
    /// to hold every root at once.
    pub(crate) fn bootstrap(heap: &mut Heap) -> Result<Roots, Signal> {
        // 1. the layout of layouts, its header points at itself
        let mut layout_layout = allocate_object::<Layout>(heap, mem::size_of::<Layout>())?;
        layout_layout.init(PLACEHOLDER, InstanceType::Layout, 0, PLACEHOLDER, PLACEHOLDER);
        layout_layout.header = layout_layout.value();
        let header = layout_layout.value();

        // 2. every other layout, methods and protocol patched below
        let mut layouts = [PLACEHOLDER; InstanceType::COUNT];
        layouts[InstanceType::Layout as usize] = header;
        for raw in 1..InstanceType::COUNT as u8 {
            let Ok(ty) = InstanceType::try_from(raw) else {
                unreachable!("instance types are contiguous")
            };
            let mut layout = allocate_object::<Layout>(heap, mem::size_of::<Layout>())?;
            layout.init(header, ty, 0, PLACEHOLDER, PLACEHOLDER);
            layouts[raw as usize] = layout.value();
        }

        // 3. the empty tuple, now that tuples have a layout
        let mut empty_tuple = allocate_object::<Tuple>(heap, sequence_size(0))?;
        empty_tuple.init_with_data(layouts[InstanceType::Tuple as usize], &[]);
        for &layout in &layouts {
            let mut layout: Tagged<Layout> = layout.cast_unchecked();
            layout.set_methods(empty_tuple);
        }

        let mut roots = Roots {
            layout_layout: header,
            layouts,
            void: PLACEHOLDER,
            null: PLACEHOLDER,
            true_value: PLACEHOLDER,
            false_value: PLACEHOLDER,
            object_protocol: PLACEHOLDER,
            empty_tuple: empty_tuple.value(),
            empty_string: PLACEHOLDER,
            empty_lambda: PLACEHOLDER,
            empty_context: PLACEHOLDER,
            toplevel: PLACEHOLDER,
        };

        // 4. singletons, from here on the factory can build the rest
        let mut factory = Factory::new(heap, &roots);
        let void = factory.new_singleton(VOID_ORDINAL)?.value();
        let null = factory.new_singleton(NULL_ORDINAL)?.value();
        let true_value = factory.new_singleton(TRUE_ORDINAL)?.value();
        let false_value = factory.new_singleton(FALSE_ORDINAL)?.value();
        roots.void = void;
        roots.null = null;
        roots.true_value = true_value;
        roots.false_value = false_value;

        // 5. protocols: Object at the root, one per built-in kind below it
        let mut factory = Factory::new(heap, &roots);
        let name = factory.new_string("Object")?;
        let object_protocol = factory.new_protocol(name.value(), null)?.value();
        let mut protocols = [PLACEHOLDER; InstanceType::COUNT];
        for raw in 0..InstanceType::COUNT as u8 {
            let Ok(ty) = InstanceType::try_from(raw) else {
                unreachable!("instance types are contiguous")
            };
            let name = match ty {
                InstanceType::SmallInteger => "Integer",
                other => other.name(),
            };
            let name = factory.new_string(name)?;
            protocols[raw as usize] = factory.new_protocol(name.value(), object_protocol)?.value();
        }
        for (layout, protocol) in roots.layouts.iter().zip(protocols) {
            let mut layout: Tagged<Layout> = layout.cast_unchecked();
            layout.set_protocol(protocol);
        }

        // 6. the rest
        let empty_string = factory.new_string("")?.value();
        let empty_context = factory.new_context()?;
        let code = factory.new_code(&[])?;
        let empty_lambda = new_empty_lambda(&mut factory, code, empty_tuple, empty_context, null)?;
        let toplevel = factory.new_hash_map()?.value();

        roots.object_protocol = object_protocol;
        roots.empty_string = empty_string;
        roots.empty_context = empty_context.value();
        roots.empty_lambda = empty_lambda.value();
        roots.toplevel = toplevel;
        Ok(roots)
    }
}

fn new_empty_lambda(
    factory: &mut Factory<'_>,
    code: Tagged<Code>,
    empty_tuple: Tagged<Tuple>,
    context: Tagged<Context>,
    null: Value,
) -> Result<Tagged<Lambda>, Signal> {
    factory.new_lambda(LambdaInit {
        argc: 0,
        max_stack_height: 0,
        code: code.value(),
        constant_pool: empty_tuple.value(),
        outers: empty_tuple.value(),
        context: context.value(),
        source: null,
    })
}

#[cfg(test)]
mod tests {
    use crate::{HeapValue, Runtime, RuntimeSettings, Singleton, StringObject, values_equal};

    use super::*;

    #[test]
    fn layout_of_layouts_is_self_referential() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let roots = runtime.roots();
        let layout_layout: Tagged<HeapValue> = roots.layout_layout.cast();
        assert_eq!(layout_layout.header, roots.layout_layout);
        assert_eq!(layout_layout.instance_type(), InstanceType::Layout);
        let string_layout = roots.layout(InstanceType::String);
        assert_eq!(string_layout.header, roots.layout_layout);
    }

    #[test]
    fn singletons_are_distinct() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let roots = runtime.roots();
        let singletons = [roots.void, roots.null, roots.true_value, roots.false_value];
        for (i, a) in singletons.iter().enumerate() {
            assert!(a.is::<Singleton>());
            assert_eq!(a.cast::<Singleton>().ordinal(), i);
            for b in &singletons[i + 1..] {
                assert!(!values_equal(*a, *b));
            }
        }
    }

    #[test]
    fn builtin_protocols_inherit_from_object() {
        let runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let roots = runtime.roots();
        let integer = roots.protocol(InstanceType::SmallInteger);
        let name: Tagged<StringObject> = integer.name().cast();
        assert_eq!(name.to_rust_string(), "Integer");
        let parent = integer.super_protocol().unwrap();
        assert_eq!(parent.value(), roots.object_protocol);
        assert!(parent.super_protocol().is_none());
    }

    #[test]
    fn roots_survive_collection() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let before = runtime.roots().empty_tuple;
        runtime.collect_garbage();
        let roots = runtime.roots();
        assert_ne!(roots.empty_tuple, before);
        assert!(roots.empty_tuple.is::<Tuple>());
        let layout_layout: Tagged<HeapValue> = roots.layout_layout.cast();
        assert_eq!(layout_layout.header, roots.layout_layout);
        runtime.heap().validate();
    }
}
