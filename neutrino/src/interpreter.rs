//! The bytecode interpreter.
//!
//! Execution state lives in the running task's stack. While an
//! activation runs, the interpreter keeps raw pointers into that stack;
//! anything that can move objects (a collection, growing the stack,
//! compiling a lambda) first parks the activation, pushing one more
//! frame that records where to resume, and reloads everything from the
//! task once it is done.
//!
//! ```text
//! base                                                  limit    end
//! | sentinel | entry | frame | ... | frame | operands | ... |reserve|
//!   [pc|fp|lambda] locals...
//! ```
use std::{fmt, iter, ptr, slice};

use crate::{
    Cell, Forwarder, ForwarderKind, Instance, Lambda, Layout, Runtime, Selector, Signal,
    Signature, Stack, StackStatus, StringObject, Tagged, Task, Tuple, Value,
    builtins::{BuiltinContext, concat_strings, get_builtin},
    bytecode::{Instruction, decode_at},
    deref, grow_value,
    lookup::{lookup_method, lookup_super_method},
    objects::stack::{
        BOTTOM_LINK, FRAME_LAMBDA, FRAME_PREV_FP, FRAME_PREV_PC, FRAME_SIZE, MARKER_DATA,
        MARKER_PREV, MARKER_SIZE,
    },
    refs::Ref,
    to, values_equal,
};

/// Frame headers kept free above the limit, so parking always fits.
const RESERVED_FRAMES: usize = 4;

/// Failures that end a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    InvalidSettings(&'static str),
    /// Allocation still failed after a collection.
    OutOfMemory { size: usize },
    UnresolvedGlobal { name: String },
    LookupFailure { selector: String },
    UnhandledCondition { name: String },
    UnresolvedEntryPoint { name: String },
    BuiltinFailed { name: &'static str, signal: Signal },
    /// A lambda without code and no compiler registered.
    NotCompiled,
    ArityMismatch { expected: usize, actual: usize },
    DeadTask,
    /// The task is already running somewhere up the attach chain.
    TaskBusy,
    /// A signal nobody expected, usually a failed narrowing.
    Signal(Signal),
    /// The thread owning the runtime exited without answering.
    WorkerDied,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSettings(reason) => write!(f, "invalid settings: {reason}"),
            Self::OutOfMemory { size } => {
                write!(f, "out of memory allocating {size} bytes after collecting")
            }
            Self::UnresolvedGlobal { name } => write!(f, "unresolved global {name}"),
            Self::LookupFailure { selector } => write!(f, "no method matches {selector}"),
            Self::UnhandledCondition { name } => write!(f, "unhandled condition {name}"),
            Self::UnresolvedEntryPoint { name } => write!(f, "unresolved entry point {name}"),
            Self::BuiltinFailed { name, signal } => write!(f, "builtin {name} failed: {signal}"),
            Self::NotCompiled => write!(f, "lambda has no code and no compiler is registered"),
            Self::ArityMismatch { expected, actual } => {
                write!(f, "expected {expected} arguments, got {actual}")
            }
            Self::DeadTask => write!(f, "attaching a finished task"),
            Self::TaskBusy => write!(f, "attaching a task that is already attached"),
            Self::Signal(signal) => write!(f, "unexpected signal: {signal}"),
            Self::WorkerDied => write!(f, "interpreter thread exited"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<Signal> for RuntimeError {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::AllocationFailed { size } => Self::OutOfMemory { size },
            other => Self::Signal(other),
        }
    }
}

/// Why the current instruction did not complete. Nothing on the stack
/// has changed when one of the recoverable variants is returned.
enum Interrupt {
    Collect { size: usize },
    Grow { height: usize },
    Compile(Tagged<Lambda>),
    Done(Value),
    Failed(RuntimeError),
}

impl From<Signal> for Interrupt {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::AllocationFailed { size } => Self::Collect { size },
            Signal::StackOverflow { height } => Self::Grow { height },
            other => Self::Failed(RuntimeError::Signal(other)),
        }
    }
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Self::Failed(error)
    }
}

type Step = Result<(), Interrupt>;

/// Runs `lambda` with `arguments` on a fresh root task.
pub fn interpret(
    runtime: &mut Runtime,
    lambda: Tagged<Lambda>,
    arguments: &[Value],
) -> Result<Value, RuntimeError> {
    let refs = runtime.refs();
    let scope = refs.enter();
    let entry: Vec<_> = iter::once(lambda.value())
        .chain(arguments.iter().copied())
        .map(|value| scope.new_value_ref(value))
        .collect();
    let height = runtime
        .settings()
        .initial_stack_height
        .max(entry.len() + (RESERVED_FRAMES + 2) * FRAME_SIZE);
    let task = runtime.gc_safe(|runtime| runtime.factory().new_task(height))?;
    let values: Vec<Value> = entry.iter().map(|value| value.value()).collect();
    prepare_stack(task.stack(), runtime.roots().empty_lambda, &values);
    let root = scope.new_ref(task);
    let current = scope.new_ref(task);
    let mut interpreter = Interpreter::new(runtime, root, current);
    interpreter.resume();
    interpreter.run()
}

/// Lays out a stack that has not started: the sentinel frame holding
/// `entry` (a lambda and its arguments) as locals, parked at pc 0.
fn prepare_stack(mut stack: Tagged<Stack>, bottom_lambda: Value, entry: &[Value]) {
    assert!(stack.height() >= entry.len() + (RESERVED_FRAMES + 2) * FRAME_SIZE);
    let base = stack.bottom();
    // SAFETY: the assertion above keeps every write inside the buffer
    let parked = unsafe {
        write_frame(base, 0, BOTTOM_LINK, bottom_lambda);
        for (i, value) in entry.iter().enumerate() {
            *base.add(FRAME_SIZE + i) = value.raw();
        }
        let parked = base.add(FRAME_SIZE + entry.len());
        write_frame(parked, 0, base as u64, bottom_lambda);
        parked
    };
    stack.set_fp(parked);
    stack.set_top_marker(None);
    stack.set_status(StackStatus::Parked);
}

/// # Safety
/// `frame` must have room for a frame header.
#[inline]
unsafe fn write_frame(frame: *mut u64, pc: usize, prev_fp: u64, lambda: Value) {
    unsafe {
        *frame.add(FRAME_PREV_PC) = Value::from_usize(pc).raw();
        *frame.add(FRAME_PREV_FP) = prev_fp;
        *frame.add(FRAME_LAMBDA) = lambda.raw();
    }
}

fn display_name(value: Value) -> String {
    match deref(value).as_object::<StringObject>() {
        Some(string) => string.to_rust_string(),
        None => format!("{value:?}"),
    }
}

struct Interpreter<'rt, 's> {
    runtime: &'rt mut Runtime,
    /// The task the call started on.
    root: Ref<'s, Task>,
    current: Ref<'s, Task>,
    // registers, only valid while running
    stack: Tagged<Stack>,
    base: *mut u64,
    limit: *mut u64,
    fp: *mut u64,
    sp: *mut u64,
    pc: usize,
    lambda: Tagged<Lambda>,
    retry: AllocationRetry,
}

/// Bytes an instruction has failed to allocate since it last completed.
///
/// An instruction may allocate more than once, so a retried one can fail
/// on a later allocation. Each failure at the same pc collects for the
/// combined amount.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct AllocationRetry {
    pc: Option<usize>,
    pending: usize,
}

impl AllocationRetry {
    /// Records a failed allocation and returns the bytes to collect for.
    fn failed(&mut self, pc: usize, size: usize) -> usize {
        if self.pc != Some(pc) {
            self.pc = Some(pc);
            self.pending = 0;
        }
        self.pending += size;
        self.pending
    }

    fn clear(&mut self) {
        self.pc = None;
        self.pending = 0;
    }
}

impl<'rt, 's> Interpreter<'rt, 's> {
    fn new(runtime: &'rt mut Runtime, root: Ref<'s, Task>, current: Ref<'s, Task>) -> Self {
        let stack = current.get().stack();
        let lambda = runtime.roots().empty_lambda.cast();
        Self {
            runtime,
            root,
            current,
            stack,
            base: ptr::null_mut(),
            limit: ptr::null_mut(),
            fp: ptr::null_mut(),
            sp: ptr::null_mut(),
            pc: 0,
            lambda,
            retry: AllocationRetry::default(),
        }
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let pc = self.pc;
            let Err(interrupt) = self.step() else {
                self.retry.clear();
                continue;
            };
            let recovered = match interrupt {
                Interrupt::Done(value) => return Ok(value),
                Interrupt::Failed(error) => Err(error),
                Interrupt::Collect { size } => {
                    let pending = self.retry.failed(pc, size);
                    self.park(pc);
                    self.runtime.collect_garbage_for(pending);
                    let heap = self.runtime.heap();
                    if heap.capacity() - heap.used() < pending {
                        Err(RuntimeError::OutOfMemory { size: pending })
                    } else {
                        Ok(())
                    }
                }
                Interrupt::Grow { height } => {
                    self.park(pc);
                    self.grow_stack(height)
                }
                Interrupt::Compile(lambda) => {
                    self.park(pc);
                    self.runtime.compile_lambda(lambda)
                }
            };
            match recovered {
                Ok(()) => self.resume(),
                Err(error) => {
                    self.abandon();
                    return Err(error);
                }
            }
        }
    }

    // ── Parking ─────────────────────────────────────────────────────

    /// Saves the running activation into its stack, resuming at `pc`.
    fn park(&mut self, pc: usize) {
        debug_assert!(self.sp <= self.limit);
        // SAFETY: the reserve above the limit holds the parking frame
        unsafe { write_frame(self.sp, pc, self.fp as u64, self.lambda.value()) };
        self.stack.set_fp(self.sp);
        self.stack.set_status(StackStatus::Parked);
    }

    /// Reloads the registers from the current task's parked stack.
    fn resume(&mut self) {
        let mut stack = self.current.get().stack();
        debug_assert_eq!(stack.status(), StackStatus::Parked);
        let parked = stack.fp();
        self.base = stack.bottom();
        // SAFETY: height words follow the base
        self.limit = unsafe { self.base.add(stack.height() - RESERVED_FRAMES * FRAME_SIZE) };
        // SAFETY: the parking frame is inside the buffer
        unsafe {
            self.pc = Value::from_raw(*parked.add(FRAME_PREV_PC)).small_integer_usize();
            self.fp = *parked.add(FRAME_PREV_FP) as *mut u64;
        }
        self.sp = parked;
        stack.set_status(StackStatus::Running);
        self.stack = stack;
        self.load_frame();
    }

    fn load_frame(&mut self) {
        // SAFETY: fp points at a frame header
        self.lambda = Value::from_raw(unsafe { *self.fp.add(FRAME_LAMBDA) }).cast();
    }

    /// Marks the current task and every task attached below it as finished.
    fn abandon(&mut self) {
        let mut task = self.current.get();
        loop {
            task.stack().set_status(StackStatus::Empty);
            match task.caller().as_object::<Task>() {
                Some(caller) => task = caller,
                None => break,
            }
        }
    }

    /// Replaces the parked current stack with one of at least `height` words.
    fn grow_stack(&mut self, height: usize) -> Result<(), RuntimeError> {
        let old_height = self.current.get().stack().height();
        let mut new_height = grow_value(old_height);
        while new_height < height {
            new_height = grow_value(new_height);
        }
        log::debug!("growing stack from {old_height} to {new_height} words");
        let mut grown = self
            .runtime
            .gc_safe(|runtime| runtime.factory().new_stack(new_height))?;
        let mut task = self.current.get();
        let mut old = task.stack();
        old.uncook();
        grown.copy_contents_from(&mut old);
        grown.recook();
        old.recook();
        task.set_stack(grown);
        Ok(())
    }

    // ── Task switching ──────────────────────────────────────────────

    /// Parks the current task at `pc` and continues `task`.
    fn switch_to(&mut self, task: Tagged<Task>, pc: usize) {
        self.park(pc);
        log::debug!("switching to task {:?}", task.value());
        self.current.set(task.value());
        self.resume();
    }

    /// The current task returned from its entry lambda.
    fn finish_task(&mut self, result: Value) -> Step {
        self.stack.set_status(StackStatus::Empty);
        let mut task = self.current.get();
        if task == self.root.get() {
            return Err(Interrupt::Done(result));
        }
        let Some(caller) = task.caller().as_object::<Task>() else {
            unreachable!("attached task without a caller")
        };
        let null = self.runtime.roots().null;
        task.set_caller(null);
        log::debug!("task {:?} finished", task.value());
        self.current.set(caller.value());
        self.resume();
        self.set_peek(0, result);
        Ok(())
    }

    // ── Stack access ────────────────────────────────────────────────

    #[inline]
    fn push(&mut self, value: Value) {
        debug_assert!(!value.is_signal(), "signal pushed on the stack");
        // SAFETY: the frame's max stack height was checked on entry
        unsafe {
            *self.sp = value.raw();
            self.sp = self.sp.add(1);
        }
    }

    #[inline]
    fn pop(&mut self) -> Value {
        // SAFETY: the compiler balances pushes and pops
        unsafe {
            self.sp = self.sp.sub(1);
            Value::from_raw(*self.sp)
        }
    }

    #[inline]
    fn drop_values(&mut self, count: usize) {
        // SAFETY: as for pop
        self.sp = unsafe { self.sp.sub(count) };
    }

    /// `frame[index]`, 0 is the top.
    #[inline]
    fn peek(&self, index: usize) -> Value {
        // SAFETY: as for pop
        Value::from_raw(unsafe { *self.sp.sub(1 + index) })
    }

    #[inline]
    fn set_peek(&mut self, index: usize, value: Value) {
        // SAFETY: as for pop
        unsafe { *self.sp.sub(1 + index) = value.raw() };
    }

    /// The top `count` values in push order.
    #[inline]
    fn top(&self, count: usize) -> &[Value] {
        // SAFETY: Value is a transparent word and the slots are initialized
        unsafe { slice::from_raw_parts(self.sp.sub(count) as *const Value, count) }
    }

    #[inline]
    fn argument(&self, index: usize) -> Value {
        // SAFETY: arguments sit right below the frame header
        Value::from_raw(unsafe { *self.fp.sub(1 + index) })
    }

    #[inline]
    fn local(&self, index: usize) -> Value {
        // SAFETY: locals follow the frame header
        Value::from_raw(unsafe { *self.fp.add(FRAME_SIZE + index) })
    }

    #[inline]
    fn set_local(&mut self, index: usize, value: Value) {
        // SAFETY: as for local
        unsafe { *self.fp.add(FRAME_SIZE + index) = value.raw() };
    }

    #[inline]
    fn offset(&self, address: *mut u64) -> usize {
        // SAFETY: both point into the current buffer
        unsafe { address.offset_from(self.base) as usize }
    }

    #[inline]
    fn constant(&self, index: u16) -> Value {
        self.lambda.constant_pool().get(index as usize)
    }

    #[inline]
    fn in_sentinel_frame(&self) -> bool {
        self.fp == self.base
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Pushes a frame for `lambda`. Its arguments are the top `argc`
    /// values, above the slot the result replaces.
    fn enter(
        &mut self,
        lambda: Tagged<Lambda>,
        argc: usize,
        keymap: Option<Value>,
        return_pc: usize,
    ) -> Step {
        if !lambda.is_compiled() {
            return Err(Interrupt::Compile(lambda));
        }
        if lambda.argc() != argc {
            return Err(RuntimeError::ArityMismatch {
                expected: lambda.argc(),
                actual: argc,
            }
            .into());
        }
        let needed = FRAME_SIZE + usize::from(keymap.is_some()) + lambda.max_stack_height();
        let top = self.offset(self.sp);
        if top + needed > self.offset(self.limit) {
            return Err(Signal::StackOverflow {
                height: top + needed + RESERVED_FRAMES * FRAME_SIZE,
            }
            .into());
        }
        // SAFETY: checked against the limit above
        unsafe {
            write_frame(self.sp, return_pc, self.fp as u64, lambda.value());
            self.fp = self.sp;
            self.sp = self.sp.add(FRAME_SIZE);
        }
        if let Some(keymap) = keymap {
            self.push(keymap);
        }
        self.pc = 0;
        self.lambda = lambda;
        Ok(())
    }

    /// Starts the entry lambda held by the sentinel frame.
    fn start(&mut self) -> Step {
        let argc = self.offset(self.sp) - FRAME_SIZE - 1;
        let lambda = to::<Lambda>(self.local(0))?;
        self.enter(lambda, argc, None, 0)
    }

    fn return_(&mut self) -> Step {
        let result = self.pop();
        // SAFETY: fp points at the header of the returning frame
        let (prev_pc, prev_fp) = unsafe {
            (
                Value::from_raw(*self.fp.add(FRAME_PREV_PC)).small_integer_usize(),
                *self.fp.add(FRAME_PREV_FP) as *mut u64,
            )
        };
        let frame = self.offset(self.fp);
        while let Some(marker) = self.stack.top_marker() {
            if marker < frame {
                break;
            }
            self.unlink_marker(marker);
        }
        if prev_fp == self.base {
            return self.finish_task(result);
        }
        self.sp = self.fp;
        self.fp = prev_fp;
        self.pc = prev_pc;
        self.load_frame();
        self.set_peek(0, result);
        Ok(())
    }

    fn unlink_marker(&mut self, marker: usize) {
        // SAFETY: markers live inside the buffer
        let link = Value::from_raw(unsafe { *self.base.add(marker + MARKER_PREV) });
        self.stack
            .set_top_marker(link.small_integer_usize().checked_sub(1));
    }

    fn invoke(
        &mut self,
        selector: u16,
        argc: u16,
        keymap: u16,
        signature: Option<u16>,
        next: usize,
    ) -> Step {
        let selector: Tagged<Selector> = self.constant(selector).cast();
        let argc = argc as usize;
        let roots = self.runtime.roots();
        let arguments = self.top(argc + 1);
        let method = match signature {
            None => lookup_method(roots, selector, arguments),
            Some(signature) => {
                let signature: Tagged<Signature> = self.constant(signature).cast();
                lookup_super_method(roots, selector, arguments, signature)
            }
        };
        let Some(method) = method else {
            return Err(RuntimeError::LookupFailure {
                selector: display_name(selector.name()),
            }
            .into());
        };
        let keymap = self
            .constant(keymap)
            .as_object::<Tuple>()
            .filter(|keymap| !keymap.is_empty())
            .map(|keymap| keymap.value());
        self.enter(method.lambda(), argc, keymap, next)
    }

    fn raise(&mut self, name: u16, argc: u16, next: usize) -> Step {
        let name = self.constant(name);
        let mut marker = self.stack.top_marker();
        while let Some(offset) = marker {
            // SAFETY: markers live inside the buffer
            let (link, data) = unsafe {
                (
                    Value::from_raw(*self.base.add(offset + MARKER_PREV)),
                    Value::from_raw(*self.base.add(offset + MARKER_DATA)),
                )
            };
            let handlers: Tagged<Tuple> = data.cast();
            let handler = handlers
                .elements()
                .chunks_exact(2)
                .find(|pair| values_equal(pair[0], name))
                .map(|pair| pair[1]);
            if let Some(handler) = handler {
                return self.enter(to::<Lambda>(handler)?, argc as usize, None, next);
            }
            marker = link.small_integer_usize().checked_sub(1);
        }
        Err(RuntimeError::UnhandledCondition {
            name: display_name(name),
        }
        .into())
    }

    fn builtin(&mut self, argc: u16, index: u16) -> Step {
        let Some(builtin) = get_builtin(index) else {
            panic!("unhandled builtin {index}");
        };
        let argc = argc as usize;
        assert_eq!(
            argc, builtin.argc,
            "builtin {} called with {argc} arguments",
            builtin.name
        );
        let this = self.peek(argc);
        let arguments = self.top(argc).to_vec();
        let mut context = BuiltinContext {
            runtime: &mut *self.runtime,
            this,
            arguments: &arguments,
        };
        match (builtin.function)(&mut context) {
            Ok(result) => {
                self.push(result);
                Ok(())
            }
            Err(Signal::AllocationFailed { size }) => Err(Interrupt::Collect { size }),
            Err(signal) => Err(RuntimeError::BuiltinFailed {
                name: builtin.name,
                signal,
            }
            .into()),
        }
    }

    fn global(&mut self, name: u16) -> Step {
        let name = self.constant(name);
        let found = self.runtime.roots().toplevel().get(name);
        match found {
            Ok(value) => {
                self.push(value);
                Ok(())
            }
            Err(Signal::Nothing) => Err(RuntimeError::UnresolvedGlobal {
                name: display_name(name),
            }
            .into()),
            Err(signal) => Err(signal.into()),
        }
    }

    fn new_instance(&mut self, template: u16) -> Step {
        let template: Tagged<Layout> = self.constant(template).cast();
        let field_count = template.field_count();
        let protocol = self.peek(field_count);
        let mut factory = self.runtime.factory();
        let mut layout = factory.clone_object(template)?;
        layout.set_protocol(protocol);
        let mut instance = factory.new_instance(layout)?;
        for (i, &value) in self.top(field_count).iter().enumerate() {
            instance.set_field(i, value);
        }
        self.drop_values(field_count + 1);
        self.push(instance.value());
        Ok(())
    }

    fn attach(&mut self, next: usize) -> Step {
        let mut task = to::<Task>(self.peek(0))?;
        if task.stack().status() == StackStatus::Empty {
            return Err(RuntimeError::DeadTask.into());
        }
        let mut chain = Some(self.current.get());
        while let Some(link) = chain {
            if link == task {
                return Err(RuntimeError::TaskBusy.into());
            }
            chain = link.caller().as_object::<Task>();
        }
        task.set_caller(self.current.value());
        self.switch_to(task, next);
        Ok(())
    }

    fn yield_(&mut self, next: usize) -> Step {
        let value = self.peek(0);
        let null = self.runtime.roots().null;
        self.set_peek(0, null);
        let mut task = self.current.get();
        let Some(caller) = task.caller().as_object::<Task>() else {
            // nobody to yield to, the call ends here
            self.park(next);
            return Err(Interrupt::Done(value));
        };
        task.set_caller(null);
        self.switch_to(caller, next);
        self.set_peek(0, value);
        Ok(())
    }

    fn step(&mut self) -> Step {
        if self.in_sentinel_frame() {
            return self.start();
        }
        let pc = self.pc;
        let instruction = decode_at(self.lambda.code().units(), pc);
        log::trace!("{pc:4}: {instruction}");
        let next = pc + instruction.size();
        self.pc = next;
        match instruction {
            Instruction::Push { index } => self.push(self.constant(index)),
            Instruction::Return => return self.return_(),
            Instruction::Global { name } => return self.global(name),
            Instruction::Call { argc } => {
                let lambda = to::<Lambda>(self.peek(argc as usize))?;
                return self.enter(lambda, argc as usize, None, next);
            }
            Instruction::Slap { height } => {
                let value = self.pop();
                self.drop_values(height as usize);
                self.push(value);
            }
            Instruction::Argument { index } => self.push(self.argument(index as usize)),
            Instruction::Void => self.push(self.runtime.roots().void),
            Instruction::Null => self.push(self.runtime.roots().null),
            Instruction::True => self.push(self.runtime.roots().true_value),
            Instruction::False => self.push(self.runtime.roots().false_value),
            Instruction::Pop { height } => self.drop_values(height as usize),
            Instruction::IfTrue { target } => {
                let condition = deref(self.pop());
                if condition == self.runtime.roots().true_value {
                    self.pc = target as usize;
                }
            }
            Instruction::IfFalse { target } => {
                let condition = deref(self.pop());
                if condition != self.runtime.roots().true_value {
                    self.pc = target as usize;
                }
            }
            Instruction::Goto { target } => self.pc = target as usize,
            Instruction::Invoke {
                selector,
                argc,
                keymap,
            } => return self.invoke(selector, argc, keymap, None, next),
            Instruction::InvokeSuper {
                selector,
                argc,
                keymap,
                signature,
            } => return self.invoke(selector, argc, keymap, Some(signature), next),
            Instruction::Builtin { argc, index } => return self.builtin(argc, index),
            Instruction::Tuple { length } => {
                let elements = self.top(length as usize).to_vec();
                let tuple = self.runtime.factory().new_tuple_from(&elements)?;
                self.drop_values(elements.len());
                self.push(tuple.value());
            }
            Instruction::Concat { terms } => {
                let terms = self.top(terms as usize).to_vec();
                let string = concat_strings(self.runtime, &terms)?;
                self.drop_values(terms.len());
                self.push(string.value());
            }
            Instruction::LoadLocal { index } => self.push(self.local(index as usize)),
            Instruction::StoreLocal { index } => self.set_local(index as usize, self.peek(0)),
            Instruction::CheckHeight { expected } => {
                let height = self.offset(self.sp) - self.offset(self.fp) - FRAME_SIZE;
                assert_eq!(height, expected as usize, "stack height mismatch at {pc}");
            }
            Instruction::Outer { index } => {
                let outer = self.lambda.outers().get(index as usize);
                self.push(outer);
            }
            Instruction::Closure { lambda, count } => {
                let template: Tagged<Lambda> = self.constant(lambda).cast();
                let captured = self.top(count as usize).to_vec();
                let mut factory = self.runtime.factory();
                let outers = factory.new_tuple_from(&captured)?;
                let mut closure = factory.clone_object(template)?;
                closure.set_outers(outers);
                self.drop_values(captured.len());
                self.push(closure.value());
            }
            Instruction::Raise { name, argc } => return self.raise(name, argc, next),
            Instruction::Mark { handlers } => {
                let prev = self.stack.top_marker().map_or(0, |marker| marker + 1);
                let marker = self.offset(self.sp);
                self.push(Value::from_usize(prev));
                self.push(self.constant(handlers));
                self.stack.set_top_marker(Some(marker));
            }
            Instruction::Unmark => {
                let marker = self.offset(self.sp) - MARKER_SIZE;
                debug_assert_eq!(self.stack.top_marker(), Some(marker), "unbalanced unmark");
                self.unlink_marker(marker);
                self.drop_values(MARKER_SIZE);
            }
            Instruction::New { template } => return self.new_instance(template),
            Instruction::LoadField { index, argc } => {
                let this = to::<Instance>(self.argument(argc as usize))?;
                self.push(this.field(index as usize));
            }
            Instruction::StoreField { index, argc } => {
                let mut this = to::<Instance>(self.argument(argc as usize))?;
                this.set_field(index as usize, self.peek(0));
            }
            Instruction::Task => {
                let lambda = to::<Lambda>(self.peek(0))?;
                let height = self.runtime.settings().initial_stack_height;
                let bottom = self.runtime.roots().empty_lambda;
                let task = self.runtime.factory().new_task(height)?;
                prepare_stack(task.stack(), bottom, &[lambda.value()]);
                self.set_peek(0, task.value());
            }
            Instruction::Yield => return self.yield_(next),
            Instruction::Attach => return self.attach(next),
            Instruction::Keyword { index } => {
                let keymap: Tagged<Tuple> = self.local(0).cast();
                let argument = keymap.get(index as usize).small_integer_usize();
                self.push(self.argument(argument));
            }
            Instruction::Swap => {
                let (top, below) = (self.peek(0), self.peek(1));
                self.set_peek(0, below);
                self.set_peek(1, top);
            }
            Instruction::NewForwarder { kind } => {
                let Ok(kind) = ForwarderKind::try_from(kind) else {
                    panic!("invalid forwarder kind {kind} at {pc}");
                };
                let target = self.peek(0);
                let forwarder = self.runtime.factory().new_forwarder(kind, target)?;
                self.set_peek(0, forwarder.value());
            }
            Instruction::BindForwarder => {
                let target = self.pop();
                let forwarder = self
                    .peek(0)
                    .as_object::<Forwarder>()
                    .ok_or(Signal::TypeMismatch)?;
                forwarder.descriptor().bind(target);
            }
            Instruction::NewCell => {
                let initial = self.peek(0);
                let cell = self.runtime.factory().new_cell(initial)?;
                self.set_peek(0, cell.value());
            }
            Instruction::LoadCell => {
                let cell = to::<Cell>(self.peek(0))?;
                self.set_peek(0, Cell::value(&cell));
            }
            Instruction::StoreCell => {
                let value = self.pop();
                let mut cell = to::<Cell>(self.peek(0))?;
                cell.set_value(value);
                self.set_peek(0, value);
            }
        }
        Ok(())
    }
}
