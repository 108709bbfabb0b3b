use crate::Value;

use super::Opcode;

/// A forward jump whose target has not been bound yet.
///
/// Created by [`CodeBuilder::goto`], [`CodeBuilder::if_true`] and
/// [`CodeBuilder::if_false`]. Resolve it with [`CodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound label leaves the jump target at 0"]
pub struct Label {
    /// Position of the target operand in the buffer.
    operand_pos: usize,
}

/// Builds a code buffer together with its constant pool.
///
/// The builder follows the stack effect of every emitted instruction and
/// records the highest operand stack height, which becomes the lambda's
/// `max_stack_height`. Jumps do not reset the tracked height, so code
/// with branches gets a conservative estimate.
///
/// Constants are plain values and are not rooted. Assemble the lambda
/// before anything can collect, or go through `Runtime::assemble`, which
/// roots them first.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    units: Vec<u16>,
    constants: Vec<Value>,
    height: usize,
    max_height: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current unit offset, usable as a backward jump target.
    pub fn current_offset(&self) -> u16 {
        self.units.len() as u16
    }

    /// Operand stack height at this point of the straight-line code.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn max_stack_height(&self) -> usize {
        self.max_height
    }

    pub fn units(&self) -> &[u16] {
        &self.units
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Returns (code units, constant pool, max stack height).
    pub fn into_parts(self) -> (Vec<u16>, Vec<Value>, usize) {
        (self.units, self.constants, self.max_height)
    }

    /// Index of `value` in the constant pool, added if missing.
    pub fn constant(&mut self, value: Value) -> u16 {
        debug_assert!(!value.is_signal(), "signal in constant pool");
        if let Some(index) = self.constants.iter().position(|&c| c == value) {
            return index as u16;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u16
    }

    // ── emit helpers ────────────────────────────────────────────────

    fn emit(&mut self, op: Opcode, operands: &[u16], pops: usize, pushes: usize) {
        debug_assert_eq!(operands.len(), op.argc());
        self.units.push(op as u16);
        self.units.extend_from_slice(operands);
        self.height = self.height.saturating_sub(pops) + pushes;
        self.max_height = self.max_height.max(self.height);
    }

    fn emit_jump(&mut self, op: Opcode, pops: usize) -> Label {
        self.emit(op, &[0], pops, 0);
        Label {
            operand_pos: self.units.len() - 1,
        }
    }

    /// Points a forward jump at the current offset.
    pub fn bind(&mut self, label: Label) {
        self.units[label.operand_pos] = self.current_offset();
    }

    // ── instructions ────────────────────────────────────────────────

    pub fn push(&mut self, value: Value) {
        let index = self.constant(value);
        self.emit(Opcode::Push, &[index], 0, 1);
    }

    pub fn return_(&mut self) {
        self.emit(Opcode::Return, &[], 1, 0);
    }

    /// `name` must be a String.
    pub fn global(&mut self, name: Value) {
        let index = self.constant(name);
        self.emit(Opcode::Global, &[index], 0, 1);
    }

    /// The callee's result replaces the top value, `slap` the rest.
    pub fn call(&mut self, argc: u16) {
        self.emit(Opcode::Call, &[argc], 0, 0);
    }

    pub fn slap(&mut self, height: u16) {
        self.emit(Opcode::Slap, &[height], height as usize + 1, 1);
    }

    pub fn argument(&mut self, index: u16) {
        self.emit(Opcode::Argument, &[index], 0, 1);
    }

    pub fn void(&mut self) {
        self.emit(Opcode::Void, &[], 0, 1);
    }

    pub fn null(&mut self) {
        self.emit(Opcode::Null, &[], 0, 1);
    }

    pub fn true_(&mut self) {
        self.emit(Opcode::True, &[], 0, 1);
    }

    pub fn false_(&mut self) {
        self.emit(Opcode::False, &[], 0, 1);
    }

    pub fn pop(&mut self, height: u16) {
        self.emit(Opcode::Pop, &[height], height as usize, 0);
    }

    pub fn if_true(&mut self) -> Label {
        self.emit_jump(Opcode::IfTrue, 1)
    }

    pub fn if_false(&mut self) -> Label {
        self.emit_jump(Opcode::IfFalse, 1)
    }

    pub fn goto(&mut self) -> Label {
        self.emit_jump(Opcode::Goto, 0)
    }

    /// Jump to an already known offset.
    pub fn goto_offset(&mut self, target: u16) {
        self.emit(Opcode::Goto, &[target], 0, 0);
    }

    /// `keymap` is a Tuple mapping keyword index to argument index, empty
    /// for positional calls.
    pub fn invoke(&mut self, selector: Value, argc: u16, keymap: Value) {
        let selector = self.constant(selector);
        let keymap = self.constant(keymap);
        self.emit(Opcode::Invoke, &[selector, argc, keymap], 0, 0);
    }

    pub fn invoke_super(&mut self, selector: Value, argc: u16, keymap: Value, signature: Value) {
        let selector = self.constant(selector);
        let keymap = self.constant(keymap);
        let signature = self.constant(signature);
        self.emit(
            Opcode::InvokeSuper,
            &[selector, argc, keymap, signature],
            0,
            0,
        );
    }

    pub fn builtin(&mut self, argc: u16, index: u16) {
        self.emit(Opcode::Builtin, &[argc, index], 0, 1);
    }

    pub fn tuple(&mut self, length: u16) {
        self.emit(Opcode::Tuple, &[length], length as usize, 1);
    }

    pub fn concat(&mut self, terms: u16) {
        self.emit(Opcode::Concat, &[terms], terms as usize, 1);
    }

    pub fn load_local(&mut self, index: u16) {
        self.emit(Opcode::LoadLocal, &[index], 0, 1);
    }

    pub fn store_local(&mut self, index: u16) {
        self.emit(Opcode::StoreLocal, &[index], 1, 1);
    }

    /// Asserts the current tracked height at run time.
    pub fn check_height(&mut self) {
        let expected = self.height as u16;
        self.emit(Opcode::CheckHeight, &[expected], 0, 0);
    }

    pub fn outer(&mut self, index: u16) {
        self.emit(Opcode::Outer, &[index], 0, 1);
    }

    pub fn closure(&mut self, lambda: Value, count: u16) {
        let lambda = self.constant(lambda);
        self.emit(Opcode::Closure, &[lambda, count], count as usize, 1);
    }

    /// Expects a result slot under the `argc` arguments, like a call.
    pub fn raise(&mut self, name: Value, argc: u16) {
        let name = self.constant(name);
        self.emit(Opcode::Raise, &[name, argc], 0, 0);
    }

    /// `handlers` is a Tuple of (name String, handler Lambda) pairs.
    pub fn mark(&mut self, handlers: Value) {
        let handlers = self.constant(handlers);
        self.emit(Opcode::Mark, &[handlers], 0, 2);
    }

    pub fn unmark(&mut self) {
        self.emit(Opcode::Unmark, &[], 2, 0);
    }

    /// Expects the protocol under `field_count` field values.
    pub fn new_instance(&mut self, template: Value, field_count: usize) {
        let template = self.constant(template);
        self.emit(Opcode::New, &[template], field_count + 1, 1);
    }

    pub fn load_field(&mut self, index: u16, argc: u16) {
        self.emit(Opcode::LoadField, &[index, argc], 0, 1);
    }

    pub fn store_field(&mut self, index: u16, argc: u16) {
        self.emit(Opcode::StoreField, &[index, argc], 1, 1);
    }

    pub fn task(&mut self) {
        self.emit(Opcode::Task, &[], 1, 1);
    }

    pub fn yield_(&mut self) {
        self.emit(Opcode::Yield, &[], 1, 1);
    }

    pub fn attach(&mut self) {
        self.emit(Opcode::Attach, &[], 1, 1);
    }

    pub fn keyword(&mut self, index: u16) {
        self.emit(Opcode::Keyword, &[index], 0, 1);
    }

    pub fn swap(&mut self) {
        self.emit(Opcode::Swap, &[], 2, 2);
    }

    pub fn new_forwarder(&mut self, kind: u16) {
        self.emit(Opcode::NewForwarder, &[kind], 1, 1);
    }

    pub fn bind_forwarder(&mut self) {
        self.emit(Opcode::BindForwarder, &[], 2, 1);
    }

    pub fn new_cell(&mut self) {
        self.emit(Opcode::NewCell, &[], 1, 1);
    }

    pub fn load_cell(&mut self) {
        self.emit(Opcode::LoadCell, &[], 1, 1);
    }

    pub fn store_cell(&mut self) {
        self.emit(Opcode::StoreCell, &[], 2, 1);
    }
}
