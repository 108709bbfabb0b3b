use core::fmt;

use super::Opcode;

/// A decoded instruction. Operands are raw `u16` units: constant pool
/// indices, counts or absolute jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Push { index: u16 },
    Return,
    Global { name: u16 },
    Call { argc: u16 },
    Slap { height: u16 },
    Argument { index: u16 },
    Void,
    Null,
    True,
    False,
    Pop { height: u16 },
    IfTrue { target: u16 },
    Goto { target: u16 },
    Invoke { selector: u16, argc: u16, keymap: u16 },
    Builtin { argc: u16, index: u16 },
    Tuple { length: u16 },
    Concat { terms: u16 },
    LoadLocal { index: u16 },
    CheckHeight { expected: u16 },
    Outer { index: u16 },
    Closure { lambda: u16, count: u16 },
    Raise { name: u16, argc: u16 },
    Mark { handlers: u16 },
    Unmark,
    New { template: u16 },
    LoadField { index: u16, argc: u16 },
    StoreField { index: u16, argc: u16 },
    Task,
    Yield,
    StoreLocal { index: u16 },
    Attach,
    Keyword { index: u16 },
    InvokeSuper { selector: u16, argc: u16, keymap: u16, signature: u16 },
    Swap,
    IfFalse { target: u16 },
    NewForwarder { kind: u16 },
    BindForwarder,
    NewCell,
    LoadCell,
    StoreCell,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Push { .. } => Opcode::Push,
            Self::Return => Opcode::Return,
            Self::Global { .. } => Opcode::Global,
            Self::Call { .. } => Opcode::Call,
            Self::Slap { .. } => Opcode::Slap,
            Self::Argument { .. } => Opcode::Argument,
            Self::Void => Opcode::Void,
            Self::Null => Opcode::Null,
            Self::True => Opcode::True,
            Self::False => Opcode::False,
            Self::Pop { .. } => Opcode::Pop,
            Self::IfTrue { .. } => Opcode::IfTrue,
            Self::Goto { .. } => Opcode::Goto,
            Self::Invoke { .. } => Opcode::Invoke,
            Self::Builtin { .. } => Opcode::Builtin,
            Self::Tuple { .. } => Opcode::Tuple,
            Self::Concat { .. } => Opcode::Concat,
            Self::LoadLocal { .. } => Opcode::LoadLocal,
            Self::CheckHeight { .. } => Opcode::CheckHeight,
            Self::Outer { .. } => Opcode::Outer,
            Self::Closure { .. } => Opcode::Closure,
            Self::Raise { .. } => Opcode::Raise,
            Self::Mark { .. } => Opcode::Mark,
            Self::Unmark => Opcode::Unmark,
            Self::New { .. } => Opcode::New,
            Self::LoadField { .. } => Opcode::LoadField,
            Self::StoreField { .. } => Opcode::StoreField,
            Self::Task => Opcode::Task,
            Self::Yield => Opcode::Yield,
            Self::StoreLocal { .. } => Opcode::StoreLocal,
            Self::Attach => Opcode::Attach,
            Self::Keyword { .. } => Opcode::Keyword,
            Self::InvokeSuper { .. } => Opcode::InvokeSuper,
            Self::Swap => Opcode::Swap,
            Self::IfFalse { .. } => Opcode::IfFalse,
            Self::NewForwarder { .. } => Opcode::NewForwarder,
            Self::BindForwarder => Opcode::BindForwarder,
            Self::NewCell => Opcode::NewCell,
            Self::LoadCell => Opcode::LoadCell,
            Self::StoreCell => Opcode::StoreCell,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.opcode().size()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push { index } => write!(f, "push #{index}"),
            Self::Return => write!(f, "return"),
            Self::Global { name } => write!(f, "global #{name}"),
            Self::Call { argc } => write!(f, "call {argc}"),
            Self::Slap { height } => write!(f, "slap {height}"),
            Self::Argument { index } => write!(f, "argument {index}"),
            Self::Void => write!(f, "void"),
            Self::Null => write!(f, "null"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Pop { height } => write!(f, "pop {height}"),
            Self::IfTrue { target } => write!(f, "if_true @{target}"),
            Self::Goto { target } => write!(f, "goto @{target}"),
            Self::Invoke {
                selector,
                argc,
                keymap,
            } => write!(f, "invoke #{selector} {argc} #{keymap}"),
            Self::Builtin { argc, index } => write!(f, "builtin {argc} {index}"),
            Self::Tuple { length } => write!(f, "tuple {length}"),
            Self::Concat { terms } => write!(f, "concat {terms}"),
            Self::LoadLocal { index } => write!(f, "load_local {index}"),
            Self::CheckHeight { expected } => write!(f, "check_height {expected}"),
            Self::Outer { index } => write!(f, "outer {index}"),
            Self::Closure { lambda, count } => write!(f, "closure #{lambda} {count}"),
            Self::Raise { name, argc } => write!(f, "raise #{name} {argc}"),
            Self::Mark { handlers } => write!(f, "mark #{handlers}"),
            Self::Unmark => write!(f, "unmark"),
            Self::New { template } => write!(f, "new #{template}"),
            Self::LoadField { index, argc } => write!(f, "load_field {index} {argc}"),
            Self::StoreField { index, argc } => write!(f, "store_field {index} {argc}"),
            Self::Task => write!(f, "task"),
            Self::Yield => write!(f, "yield"),
            Self::StoreLocal { index } => write!(f, "store_local {index}"),
            Self::Attach => write!(f, "attach"),
            Self::Keyword { index } => write!(f, "keyword {index}"),
            Self::InvokeSuper {
                selector,
                argc,
                keymap,
                signature,
            } => write!(f, "invoke_super #{selector} {argc} #{keymap} #{signature}"),
            Self::Swap => write!(f, "swap"),
            Self::IfFalse { target } => write!(f, "if_false @{target}"),
            Self::NewForwarder { kind } => write!(f, "new_forwarder {kind}"),
            Self::BindForwarder => write!(f, "bind_forwarder"),
            Self::NewCell => write!(f, "new_cell"),
            Self::LoadCell => write!(f, "load_cell"),
            Self::StoreCell => write!(f, "store_cell"),
        }
    }
}
