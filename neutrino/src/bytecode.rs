mod builder;
mod decoder;
mod instruction;
mod op;

pub use builder::{CodeBuilder, Label};
pub use decoder::{CodeDecoder, decode_at};
pub use instruction::Instruction;
pub use op::Opcode;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn decode_all(units: &[u16]) -> Vec<Instruction> {
        CodeDecoder::new(units).collect()
    }

    #[test]
    fn builder_output_decodes() {
        let mut b = CodeBuilder::new();
        b.push(Value::from_i64(3));
        b.push(Value::from_i64(4));
        b.builtin(1, 10);
        b.slap(2);
        b.return_();
        let (units, constants, _) = b.into_parts();
        assert_eq!(constants, vec![Value::from_i64(3), Value::from_i64(4)]);
        assert_eq!(
            decode_all(&units),
            vec![
                Instruction::Push { index: 0 },
                Instruction::Push { index: 1 },
                Instruction::Builtin { argc: 1, index: 10 },
                Instruction::Slap { height: 2 },
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn constants_are_shared() {
        let mut b = CodeBuilder::new();
        b.push(Value::from_i64(7));
        b.push(Value::from_i64(7));
        assert_eq!(b.constants().len(), 1);
        assert_eq!(b.units(), &[0, 0, 0, 0]);
    }

    #[test]
    fn forward_labels_resolve() {
        let mut b = CodeBuilder::new();
        b.true_();
        let else_ = b.if_false();
        b.push(Value::from_i64(1));
        let end = b.goto();
        b.bind(else_);
        b.push(Value::from_i64(2));
        b.bind(end);
        b.return_();
        let units = b.units().to_vec();
        let instructions = decode_all(&units);
        assert_eq!(instructions[1], Instruction::IfFalse { target: 7 });
        assert_eq!(instructions[3], Instruction::Goto { target: 9 });
        assert_eq!(instructions[5], Instruction::Return);
    }

    #[test]
    fn stack_height_is_tracked() {
        let mut b = CodeBuilder::new();
        b.push(Value::from_i64(1));
        b.push(Value::from_i64(2));
        b.push(Value::from_i64(3));
        b.tuple(3);
        assert_eq!(b.height(), 1);
        b.mark(Value::from_i64(0));
        assert_eq!(b.height(), 3);
        b.unmark();
        b.return_();
        assert_eq!(b.height(), 0);
        assert_eq!(b.max_stack_height(), 3);
    }

    #[test]
    fn display_is_readable() {
        let text = Instruction::Invoke {
            selector: 1,
            argc: 2,
            keymap: 3,
        }
        .to_string();
        assert_eq!(text, "invoke #1 2 #3");
        assert_eq!(Instruction::Return.to_string(), "return");
    }

    #[test]
    #[should_panic(expected = "unhandled opcode")]
    fn unassigned_opcode_aborts() {
        decode_at(&[21], 0);
    }
}
