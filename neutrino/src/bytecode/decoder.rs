use super::{Instruction, Opcode};

/// Decodes a stream of `u16` code units into [`Instruction`]s.
///
/// The code must be well-formed, as produced by [`CodeBuilder`]. An
/// unassigned opcode or a truncated instruction is an invariant
/// violation and aborts.
///
/// [`CodeBuilder`]: super::CodeBuilder
pub struct CodeDecoder<'a> {
    units: &'a [u16],
    pos: usize,
}

impl<'a> CodeDecoder<'a> {
    pub fn new(units: &'a [u16]) -> Self {
        Self { units, pos: 0 }
    }

    /// Current unit offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.units.len()
    }

    pub fn decode_next(&mut self) -> Option<Instruction> {
        if self.is_at_end() {
            return None;
        }
        let instruction = decode_at(self.units, self.pos);
        self.pos += instruction.size();
        Some(instruction)
    }
}

impl Iterator for CodeDecoder<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decodes the instruction starting at `pc`.
#[inline]
pub fn decode_at(units: &[u16], pc: usize) -> Instruction {
    let op = match Opcode::try_from(units[pc]) {
        Ok(op) => op,
        Err(unit) => panic!("unhandled opcode {unit} at {pc}"),
    };
    assert!(
        pc + op.size() <= units.len(),
        "truncated {op:?} instruction at {pc}"
    );
    let arg = |i: usize| units[pc + 1 + i];
    match op {
        Opcode::Push => Instruction::Push { index: arg(0) },
        Opcode::Return => Instruction::Return,
        Opcode::Global => Instruction::Global { name: arg(0) },
        Opcode::Call => Instruction::Call { argc: arg(0) },
        Opcode::Slap => Instruction::Slap { height: arg(0) },
        Opcode::Argument => Instruction::Argument { index: arg(0) },
        Opcode::Void => Instruction::Void,
        Opcode::Null => Instruction::Null,
        Opcode::True => Instruction::True,
        Opcode::False => Instruction::False,
        Opcode::Pop => Instruction::Pop { height: arg(0) },
        Opcode::IfTrue => Instruction::IfTrue { target: arg(0) },
        Opcode::Goto => Instruction::Goto { target: arg(0) },
        Opcode::Invoke => Instruction::Invoke {
            selector: arg(0),
            argc: arg(1),
            keymap: arg(2),
        },
        Opcode::Builtin => Instruction::Builtin {
            argc: arg(0),
            index: arg(1),
        },
        Opcode::Tuple => Instruction::Tuple { length: arg(0) },
        Opcode::Concat => Instruction::Concat { terms: arg(0) },
        Opcode::LoadLocal => Instruction::LoadLocal { index: arg(0) },
        Opcode::CheckHeight => Instruction::CheckHeight { expected: arg(0) },
        Opcode::Outer => Instruction::Outer { index: arg(0) },
        Opcode::Closure => Instruction::Closure {
            lambda: arg(0),
            count: arg(1),
        },
        Opcode::Raise => Instruction::Raise {
            name: arg(0),
            argc: arg(1),
        },
        Opcode::Mark => Instruction::Mark { handlers: arg(0) },
        Opcode::Unmark => Instruction::Unmark,
        Opcode::New => Instruction::New { template: arg(0) },
        Opcode::LoadField => Instruction::LoadField {
            index: arg(0),
            argc: arg(1),
        },
        Opcode::StoreField => Instruction::StoreField {
            index: arg(0),
            argc: arg(1),
        },
        Opcode::Task => Instruction::Task,
        Opcode::Yield => Instruction::Yield,
        Opcode::StoreLocal => Instruction::StoreLocal { index: arg(0) },
        Opcode::Attach => Instruction::Attach,
        Opcode::Keyword => Instruction::Keyword { index: arg(0) },
        Opcode::InvokeSuper => Instruction::InvokeSuper {
            selector: arg(0),
            argc: arg(1),
            keymap: arg(2),
            signature: arg(3),
        },
        Opcode::Swap => Instruction::Swap,
        Opcode::IfFalse => Instruction::IfFalse { target: arg(0) },
        Opcode::NewForwarder => Instruction::NewForwarder { kind: arg(0) },
        Opcode::BindForwarder => Instruction::BindForwarder,
        Opcode::NewCell => Instruction::NewCell,
        Opcode::LoadCell => Instruction::LoadCell,
        Opcode::StoreCell => Instruction::StoreCell,
    }
}
