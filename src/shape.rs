//! Static instruction descriptor catalogue.
//!
//! A shape describes the *form* of an instruction: its mnemonic template,
//! classification, and the ordered roles of its operands. The dispatcher
//! binds a shape to concrete operand values when it emits a record, so one
//! shape serves every opcode that shares the form (push EAX and push EDI
//! both use [`PUSH_R32`]).

use crate::Kind;

/// Role of one operand slot in a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// 32-bit register, read
    RegRead,
    /// 32-bit register, written
    RegWrite,
    /// Signed immediate
    SImm,
    /// Unsigned immediate
    UImm,
    /// Instruction-pointer-relative displacement
    IpRel,
}

/// One entry in the descriptor catalogue. Statically defined, never built
/// at run time.
#[derive(Debug, PartialEq, Eq)]
pub struct InstShape {
    /// Mnemonic template with positional `%i` placeholders.
    pub format: &'static str,
    /// Classification bitset copied onto every record with this shape.
    pub kind: Kind,
    /// Ordered operand roles, length 0 to 4.
    pub operands: &'static [OperandKind],
}

/// Short relative jump.
pub static JMP_REL8: InstShape = InstShape {
    format: "jmp %0",
    kind: Kind::CONTROL,
    operands: &[OperandKind::IpRel],
};

/// Register-to-register move; operands are destination then source.
pub static MOV_RR32: InstShape = InstShape {
    format: "mov %1, %0",
    kind: Kind::ALU,
    operands: &[OperandKind::RegWrite, OperandKind::RegRead],
};

/// 32-bit immediate store through base register plus 8-bit displacement.
pub static MOV_MI32: InstShape = InstShape {
    format: "movl %0, %1(%2)",
    kind: Kind::MEM.union(Kind::STORE),
    operands: &[OperandKind::UImm, OperandKind::SImm, OperandKind::RegRead],
};

/// Push one 32-bit register.
pub static PUSH_R32: InstShape = InstShape {
    format: "push %0",
    kind: Kind::MEM.union(Kind::STORE),
    operands: &[OperandKind::RegRead],
};

/// Pop one 32-bit register.
pub static POP_R32: InstShape = InstShape {
    format: "pop %0",
    kind: Kind::MEM.union(Kind::LOAD),
    operands: &[OperandKind::RegWrite],
};

/// Subtract a sign-extended 8-bit immediate from a register.
pub static SUB_RI32: InstShape = InstShape {
    format: "sub %0, %1",
    kind: Kind::ALU,
    operands: &[OperandKind::SImm, OperandKind::RegWrite],
};

/// Branch-target marker, no architectural effect.
pub static ENDBR32: InstShape = InstShape {
    format: "endbr32",
    kind: Kind::INTERN,
    operands: &[],
};

/// Sentinel for unrecognized or truncated encodings.
pub static UNKNOWN: InstShape = InstShape {
    format: "unknown",
    kind: Kind::NONE,
    operands: &[],
};

/// Select the ALU operation of the 0x83 imm8 group by its ModR/M `reg`
/// field. Only `sub` (5) is implemented; the rest decode as unknown while
/// still consuming the full encoding length.
pub fn alu_imm8(reg: u8) -> &'static InstShape {
    match reg {
        5 => &SUB_RI32,
        _ => &UNKNOWN,
    }
}
