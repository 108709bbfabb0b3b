use std::{cell::RefCell, rc::Rc};

use crate::{
    Factory, HashMap, Heap, HeapSettings, Lambda, LambdaInit, Layout, Method, Protocol, RefManager,
    RootProvider, Roots, RuntimeError, Signal, StringObject, Tagged, Tuple, Value,
    bytecode::CodeBuilder, interpreter, objects::stack::FRAME_SIZE, to,
};

#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub heap: HeapSettings,
    /// Words in the stack of a fresh task.
    pub initial_stack_height: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            heap: HeapSettings::default(),
            initial_stack_height: 1024,
        }
    }
}

impl RuntimeSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.heap.validate()?;
        if self.initial_stack_height < 8 * FRAME_SIZE {
            return Err("initial_stack_height must hold at least eight frame headers");
        }
        Ok(())
    }
}

/// Produces code for lambdas that were created without any.
pub trait LambdaCompiler {
    /// Builds the body of `lambda` from its source. May allocate, the
    /// runtime collects and calls again if allocation fails.
    fn compile(&mut self, runtime: &mut Runtime, lambda: Tagged<Lambda>)
    -> Result<CodeBuilder, Signal>;
}

/// Lines printed by the running program, kept in memory.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Rc<RefCell<String>>);

impl OutputBuffer {
    pub fn contents(&self) -> String {
        self.0.borrow().clone()
    }
}

enum Output {
    Stdout,
    Buffer(OutputBuffer),
}

struct RuntimeRoots<'a> {
    roots: &'a mut Roots,
    refs: &'a RefManager,
}

impl RootProvider for RuntimeRoots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.roots.visit(visitor);
        self.refs.visit(visitor);
    }
}

/// Owns the heap and everything that roots into it.
///
/// There is no global state: every component gets the runtime passed in.
pub struct Runtime {
    heap: Heap,
    roots: Roots,
    refs: Rc<RefManager>,
    settings: RuntimeSettings,
    compiler: Option<Box<dyn LambdaCompiler>>,
    output: Output,
}

impl Runtime {
    pub fn new(settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        settings.validate().map_err(RuntimeError::InvalidSettings)?;
        let mut heap = Heap::new(settings.heap);
        let roots = Roots::bootstrap(&mut heap)?;
        log::debug!(
            "runtime ready, {} of {} bytes used by roots",
            heap.used(),
            heap.capacity()
        );
        Ok(Self {
            heap,
            roots,
            refs: Rc::new(RefManager::new()),
            settings,
            compiler: None,
            output: Output::Stdout,
        })
    }

    #[inline]
    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    #[inline]
    pub fn factory(&mut self) -> Factory<'_> {
        Factory::new(&mut self.heap, &self.roots)
    }

    /// Shared handle to the reference registry, so scopes can be open
    /// while the runtime is borrowed mutably.
    pub fn refs(&self) -> Rc<RefManager> {
        Rc::clone(&self.refs)
    }

    pub fn new_string(&mut self, text: &str) -> Result<Tagged<StringObject>, Signal> {
        self.factory().new_string(text)
    }

    pub fn new_hash_map(&mut self) -> Result<Tagged<HashMap>, Signal> {
        self.factory().new_hash_map()
    }

    pub fn set_compiler(&mut self, compiler: Box<dyn LambdaCompiler>) {
        self.compiler = Some(compiler);
    }

    /// Redirects the print builtin into a buffer.
    pub fn capture_output(&mut self) -> OutputBuffer {
        let buffer = OutputBuffer::default();
        self.output = Output::Buffer(buffer.clone());
        buffer
    }

    pub(crate) fn print_line(&mut self, text: &str) {
        match &self.output {
            Output::Stdout => println!("{text}"),
            Output::Buffer(buffer) => {
                let mut contents = buffer.0.borrow_mut();
                contents.push_str(text);
                contents.push('\n');
            }
        }
    }

    // ── Collection ──────────────────────────────────────────────────

    pub fn collect_garbage(&mut self) {
        self.collect_garbage_for(0);
    }

    /// Collects so that an allocation of `pending` bytes has a chance to fit.
    ///
    /// Every `Tagged` held outside the roots and refs is stale afterwards.
    pub fn collect_garbage_for(&mut self, pending: usize) {
        let mut roots = RuntimeRoots {
            roots: &mut self.roots,
            refs: &self.refs,
        };
        self.heap.collect_garbage(&mut roots, pending);
    }

    /// Runs an allocating operation, collecting and retrying once if it
    /// runs out of space. A second failure is `OutOfMemory`.
    ///
    /// Objects the operation uses must be read from refs inside it, since
    /// the retry runs after a collection.
    pub fn gc_safe<T>(
        &mut self,
        mut operation: impl FnMut(&mut Runtime) -> Result<T, Signal>,
    ) -> Result<T, RuntimeError> {
        match operation(self) {
            Err(Signal::AllocationFailed { size }) => {
                log::debug!("allocation of {size} bytes failed, collecting");
                self.collect_garbage_for(size);
                operation(self).map_err(RuntimeError::from)
            }
            result => result.map_err(RuntimeError::from),
        }
    }

    // ── Code ────────────────────────────────────────────────────────

    /// Turns a builder into a compiled lambda taking `argc` arguments.
    pub fn assemble(
        &mut self,
        builder: CodeBuilder,
        argc: usize,
    ) -> Result<Tagged<Lambda>, RuntimeError> {
        let (units, constants, max_stack_height) = builder.into_parts();
        let refs = self.refs();
        let scope = refs.enter();
        let constants: Vec<_> = constants.iter().map(|&c| scope.new_value_ref(c)).collect();
        self.gc_safe(|runtime| {
            let values: Vec<Value> = constants.iter().map(|c| c.value()).collect();
            let roots = runtime.roots();
            let (outers, context, source) = (roots.empty_tuple, roots.empty_context, roots.null);
            let mut factory = runtime.factory();
            let code = factory.new_code(&units)?;
            let constant_pool = factory.new_tuple_from(&values)?;
            factory.new_lambda(LambdaInit {
                argc,
                max_stack_height,
                code: code.value(),
                constant_pool: constant_pool.value(),
                outers,
                context,
                source,
            })
        })
    }

    /// A lambda whose code is produced on first call by the registered
    /// [`LambdaCompiler`].
    pub fn new_uncompiled_lambda(
        &mut self,
        argc: usize,
        source: Value,
    ) -> Result<Tagged<Lambda>, RuntimeError> {
        let refs = self.refs();
        let scope = refs.enter();
        let source = scope.new_value_ref(source);
        self.gc_safe(|runtime| {
            let roots = runtime.roots();
            let (void, outers, context) = (roots.void, roots.empty_tuple, roots.empty_context);
            runtime.factory().new_lambda(LambdaInit {
                argc,
                max_stack_height: 0,
                code: void,
                constant_pool: void,
                outers,
                context,
                source: source.value(),
            })
        })
    }

    pub(crate) fn compile_lambda(&mut self, lambda: Tagged<Lambda>) -> Result<(), RuntimeError> {
        let refs = self.refs();
        let scope = refs.enter();
        let lambda = scope.new_ref(lambda);
        let mut compiler = self.compiler.take().ok_or(RuntimeError::NotCompiled)?;
        log::debug!("compiling lambda/{}", lambda.get().argc());
        let builder = self.gc_safe(|runtime| compiler.compile(runtime, lambda.get()));
        self.compiler = Some(compiler);
        let (units, constants, max_stack_height) = builder?.into_parts();
        let constants: Vec<_> = constants.iter().map(|&c| scope.new_value_ref(c)).collect();
        self.gc_safe(|runtime| {
            let values: Vec<Value> = constants.iter().map(|c| c.value()).collect();
            let mut factory = runtime.factory();
            let code = factory.new_code(&units)?;
            let constant_pool = factory.new_tuple_from(&values)?;
            lambda.get().set_compiled(code, constant_pool, max_stack_height);
            Ok(())
        })
    }

    // ── Methods and globals ─────────────────────────────────────────

    /// Appends `method` to the method table of a Protocol or a Layout.
    pub fn add_method(&mut self, holder: Value, method: Tagged<Method>) -> Result<(), RuntimeError> {
        let refs = self.refs();
        let scope = refs.enter();
        let holder = scope.new_value_ref(holder);
        let method = scope.new_ref(method);
        let methods = self.gc_safe(|runtime| {
            let mut elements = method_table(holder.value())?.elements().to_vec();
            elements.push(method.value());
            runtime.factory().new_tuple_from(&elements)
        })?;
        if let Some(mut protocol) = holder.value().as_object::<Protocol>() {
            protocol.set_methods(methods);
        } else if let Some(mut layout) = holder.value().as_object::<Layout>() {
            layout.set_methods(methods);
        }
        Ok(())
    }

    /// Binds `name` in the toplevel.
    pub fn define_global(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let refs = self.refs();
        let scope = refs.enter();
        let value = scope.new_value_ref(value);
        self.gc_safe(|runtime| {
            let toplevel = runtime.roots.toplevel();
            let mut factory = runtime.factory();
            let key = factory.new_string(name)?;
            HashMap::set(toplevel, &mut factory, key.value(), value.value())
        })
    }

    /// The toplevel binding of `name`, without allocating a key.
    pub fn global(&self, name: &str) -> Option<Value> {
        let mut found = None;
        self.roots.toplevel().for_each(|key, value| {
            if let Some(key) = key.as_object::<StringObject>() {
                if found.is_none() && key.to_rust_string() == name {
                    found = Some(value);
                }
            }
        });
        found
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Runs `lambda` on a fresh task. The result is not rooted.
    pub fn call(&mut self, lambda: Tagged<Lambda>, arguments: &[Value]) -> Result<Value, RuntimeError> {
        interpreter::interpret(self, lambda, arguments)
    }

    /// Looks `name` up in the toplevel and runs it without arguments.
    pub fn run_entry_point(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let unresolved = || RuntimeError::UnresolvedEntryPoint {
            name: name.to_string(),
        };
        let value = self.global(name).ok_or_else(unresolved)?;
        let lambda = to::<Lambda>(value).map_err(|_| unresolved())?;
        log::debug!("running entry point {name}");
        self.call(lambda, &[])
    }
}

fn method_table(holder: Value) -> Result<Tagged<Tuple>, Signal> {
    if let Some(protocol) = holder.as_object::<Protocol>() {
        Ok(protocol.methods())
    } else if let Some(layout) = holder.as_object::<Layout>() {
        Ok(layout.methods())
    } else {
        Err(Signal::TypeMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapSettings, InstanceType, Selector, Signature};

    fn tiny() -> RuntimeSettings {
        RuntimeSettings {
            heap: HeapSettings {
                semi_space_size: 16 * 1024,
                max_semi_space_size: 64 * 1024,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = RuntimeSettings {
            initial_stack_height: 4,
            ..Default::default()
        };
        assert!(matches!(
            Runtime::new(settings),
            Err(RuntimeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn gc_safe_retries_after_collection() {
        let mut runtime = Runtime::new(tiny()).unwrap();
        let before = runtime.heap().stats().collections;
        // garbage until the space is nearly full
        while runtime.factory().new_tuple(16).is_ok() {}
        let tuple = runtime
            .gc_safe(|runtime| runtime.factory().new_tuple(16))
            .unwrap();
        assert_eq!(tuple.len(), 16);
        assert!(runtime.heap().stats().collections > before);
    }

    #[test]
    fn gc_safe_gives_up_after_one_retry() {
        let mut runtime = Runtime::new(tiny()).unwrap();
        let result = runtime.gc_safe(|_| -> Result<(), Signal> {
            Err(Signal::AllocationFailed { size: 8 })
        });
        assert_eq!(result, Err(RuntimeError::OutOfMemory { size: 8 }));
        let other = runtime.gc_safe(|_| -> Result<(), Signal> { Err(Signal::TypeMismatch) });
        assert_eq!(other, Err(RuntimeError::Signal(Signal::TypeMismatch)));
    }

    #[test]
    fn globals_round_trip() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        runtime.define_global("answer", Value::from_i64(42)).unwrap();
        runtime.collect_garbage();
        assert_eq!(runtime.global("answer"), Some(Value::from_i64(42)));
        assert_eq!(runtime.global("question"), None);
    }

    #[test]
    fn assembled_constants_survive_collection() {
        let mut runtime = Runtime::new(tiny()).unwrap();
        let text = runtime.new_string("constant").unwrap();
        let mut builder = CodeBuilder::new();
        builder.push(text.value());
        builder.return_();
        let lambda = runtime.assemble(builder, 0).unwrap();
        let refs = runtime.refs();
        let scope = refs.enter();
        let lambda = scope.new_ref(lambda);
        runtime.collect_garbage();
        let constant = lambda.get().constant_pool().get(0);
        assert_eq!(
            constant.cast::<StringObject>().to_rust_string(),
            "constant"
        );
        assert_eq!(lambda.get().max_stack_height(), 1);
    }

    #[test]
    fn add_method_appends_to_protocols_and_layouts() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let lambda = runtime.assemble(CodeBuilder::new(), 0).unwrap();
        let empty = runtime.roots().empty_tuple.cast::<Tuple>();
        let mut factory = runtime.factory();
        let name = factory.new_string("size").unwrap();
        let selector: Tagged<Selector> = factory.new_selector(name, 0, empty, false).unwrap();
        let signature: Tagged<Signature> = factory.new_signature(&[]).unwrap();
        let method = factory.new_method(selector, signature, lambda).unwrap();
        let protocol = runtime.roots().protocol(InstanceType::String);
        runtime.add_method(protocol.value(), method).unwrap();
        runtime.add_method(protocol.value(), method).unwrap();
        let layout = runtime.roots().layout(InstanceType::String);
        runtime.add_method(layout.value(), method).unwrap();
        assert_eq!(runtime.roots().protocol(InstanceType::String).methods().len(), 2);
        assert_eq!(runtime.roots().layout(InstanceType::String).methods().len(), 1);
        assert_eq!(
            runtime.add_method(Value::from_i64(1), method),
            Err(RuntimeError::Signal(Signal::TypeMismatch))
        );
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        runtime.define_global("main", Value::from_i64(1)).unwrap();
        assert_eq!(
            runtime.run_entry_point("main"),
            Err(RuntimeError::UnresolvedEntryPoint {
                name: "main".to_string()
            })
        );
        assert!(matches!(
            runtime.run_entry_point("absent"),
            Err(RuntimeError::UnresolvedEntryPoint { .. })
        ));
    }
}
