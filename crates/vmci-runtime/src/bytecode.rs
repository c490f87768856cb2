//! Bytecode opcodes and instruction walking
//!
//! Only what the runtime needs to navigate method code: opcode constants
//! for instructions that reference the constant pool, instruction lengths,
//! and a stream that yields `(bci, opcode)` pairs.

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_0: u8 = 0x03;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const ALOAD_0: u8 = 0x2a;
pub const ISTORE: u8 = 0x36;
pub const POP: u8 = 0x57;
pub const IADD: u8 = 0x60;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const GOTO: u8 = 0xa7;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;
pub const BREAKPOINT: u8 = 0xca;

/// Fixed length of an opcode, 0 for variable-length and invalid opcodes
fn fixed_length(opcode: u8) -> usize {
    match opcode {
        0x00..=0x0f => 1,
        BIPUSH => 2,
        SIPUSH => 3,
        LDC => 2,
        LDC_W | LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        RET => 2,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        NEW => 3,
        NEWARRAY => 2,
        ANEWARRAY => 3,
        ARRAYLENGTH | ATHROW => 1,
        CHECKCAST | INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        MULTIANEWARRAY => 4,
        0xc6 | 0xc7 => 3,
        GOTO_W | JSR_W => 5,
        BREAKPOINT => 1,
        _ => 0,
    }
}

fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Big-endian `u16` operand at `at`
pub fn read_u16(code: &[u8], at: usize) -> Option<u16> {
    let bytes = code.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Length of the instruction at `bci`, or `None` for malformed code
pub fn instruction_length(code: &[u8], bci: usize) -> Option<usize> {
    let opcode = *code.get(bci)?;
    let len = match opcode {
        TABLESWITCH => {
            let base = bci + 1 + (4 - (bci + 1) % 4) % 4;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            if high < low {
                return None;
            }
            let cases = (high as i64 - low as i64 + 1) as usize;
            base - bci + 12 + cases * 4
        }
        LOOKUPSWITCH => {
            let base = bci + 1 + (4 - (bci + 1) % 4) % 4;
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return None;
            }
            base - bci + 8 + pairs as usize * 8
        }
        WIDE => {
            if *code.get(bci + 1)? == IINC {
                6
            } else {
                4
            }
        }
        other => fixed_length(other),
    };
    if len == 0 || bci + len > code.len() {
        None
    } else {
        Some(len)
    }
}

/// Constant pool index operand of the instruction at `bci`
pub fn cp_index_at(code: &[u8], bci: usize) -> Option<u16> {
    match *code.get(bci)? {
        LDC => code.get(bci + 1).map(|b| *b as u16),
        LDC_W | LDC2_W | GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD | INVOKEVIRTUAL
        | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC | NEW | ANEWARRAY
        | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => read_u16(code, bci + 1),
        _ => None,
    }
}

/// Instructions whose operand names a `CONSTANT_Class`
pub fn references_class(opcode: u8) -> bool {
    matches!(
        opcode,
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY
    )
}

/// Instructions whose operand names a field reference
pub fn references_field(opcode: u8) -> bool {
    matches!(opcode, GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD)
}

/// Instructions whose operand names a method reference
pub fn references_method(opcode: u8) -> bool {
    matches!(
        opcode,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE
    )
}

/// Loads of a loadable constant
pub fn is_ldc(opcode: u8) -> bool {
    matches!(opcode, LDC | LDC_W | LDC2_W)
}

/// Walks instructions in code order, stopping at the first malformed one
pub struct BytecodeStream<'a> {
    code: &'a [u8],
    bci: usize,
}

impl<'a> BytecodeStream<'a> {
    /// Start at bci 0
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, bci: 0 }
    }
}

impl Iterator for BytecodeStream<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<Self::Item> {
        let bci = self.bci;
        let opcode = *self.code.get(bci)?;
        let len = instruction_length(self.code, bci)?;
        self.bci += len;
        Some((bci, opcode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_lengths() {
        let code = [ALOAD_0, INVOKEVIRTUAL, 0, 7, RETURN];
        assert_eq!(instruction_length(&code, 0), Some(1));
        assert_eq!(instruction_length(&code, 1), Some(3));
        assert_eq!(cp_index_at(&code, 1), Some(7));
    }

    #[test]
    fn test_stream_walks_invokedynamic() {
        let code = [INVOKEDYNAMIC, 0, 3, 0, 0, POP, INVOKEDYNAMIC, 0, 9, 0, 0, RETURN];
        let ops: Vec<_> = BytecodeStream::new(&code).collect();
        assert_eq!(
            ops,
            vec![(0, INVOKEDYNAMIC), (5, POP), (6, INVOKEDYNAMIC), (11, RETURN)]
        );
        assert_eq!(cp_index_at(&code, 6), Some(9));
    }

    #[test]
    fn test_tableswitch_length() {
        // bci 0: tableswitch, 3 bytes padding, default, low=0, high=1, two offsets
        let mut code = vec![TABLESWITCH, 0, 0, 0];
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.push(RETURN);
        assert_eq!(instruction_length(&code, 0), Some(24));
        assert_eq!(BytecodeStream::new(&code).count(), 2);
    }

    #[test]
    fn test_wide_and_ldc() {
        let code = [WIDE, IINC, 0, 1, 0, 5, LDC, 4, RETURN];
        assert_eq!(instruction_length(&code, 0), Some(6));
        assert_eq!(cp_index_at(&code, 6), Some(4));
    }

    #[test]
    fn test_truncated_code_stops_stream() {
        let code = [ALOAD_0, INVOKESTATIC, 0];
        assert_eq!(BytecodeStream::new(&code).count(), 1);
        assert_eq!(instruction_length(&code, 1), None);
        assert_eq!(instruction_length(&[0xfe], 0), None);
    }
}
