//! Core IR, traits, and dispatch for the sift86 instruction decoder.
//!
//! This library decodes raw 32-bit x86 machine code into structured
//! instruction records for static program analysis. The decoder is written
//! by hand (no disassembly engine underneath): it scans legacy prefixes,
//! resolves the opcode and ModR/M byte, and emits a [`DecodedInst`] carrying
//! classification flags, operand roles, register use/def sets, and branch
//! targets. Unrecognized encodings decode to an explicit unknown record of
//! at least one byte, so linear sweeps always make forward progress.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use std::sync::Arc;
//! use sift86::{
//!     loader::ElfLoader,
//!     decoder::DecoderRegistry,
//!     strategy::Strategy,
//! };
//!
//! // Read and parse the binary image
//! let binary_data = fs::read("path/to/binary").unwrap();
//! let loaded = ElfLoader::new().load(&binary_data).unwrap();
//!
//! // Build a decoder for the detected architecture
//! let registry = DecoderRegistry::default();
//! let mut decoder = registry.create(loaded.architecture, Arc::clone(&loaded.image)).unwrap();
//!
//! // Decode one instruction at the entry point
//! if let Some(entry) = loaded.entry {
//!     if let Some(inst) = decoder.decode(entry) {
//!         println!("0x{:08x}: {}", inst.addr(), inst.render());
//!     }
//! }
//!
//! // Or run a whole-image strategy
//! let disassembly = Strategy::Linear
//!     .run(&loaded.image, &registry, loaded.architecture, loaded.entry.unwrap_or(0))
//!     .unwrap();
//! ```

pub mod decoder;
pub mod format;
pub mod image;
pub mod loader;
pub mod registers;
pub mod shape;
pub mod strategy;

use std::cell::OnceCell;
use std::fmt;
use std::fmt::Write as _;

use crate::registers::{gpr32, Platform, RegSet};
use crate::shape::{InstShape, OperandKind};

/// Represents an address in the 32-bit image's address space.
pub type Address = u32;

/// Minimum instruction size in bytes; also the floor for unknown records.
pub const MIN_INSTRUCTION_SIZE: u32 = 1;

/// Instruction classification bitset.
///
/// Copied from the instruction's shape at construction, possibly augmented
/// with [`Kind::INDIRECT`] when a control transfer's destination depends on
/// run-time state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Kind(u16);

impl Kind {
    pub const NONE: Kind = Kind(0);
    /// Transfers control somewhere other than the next instruction.
    pub const CONTROL: Kind = Kind(0x0001);
    /// Control transfer taken only when a condition holds.
    pub const COND: Kind = Kind(0x0002);
    /// Returns from the current routine.
    pub const RETURN: Kind = Kind(0x0004);
    /// Calls a routine, pushing a return address.
    pub const CALL: Kind = Kind(0x0200);
    /// Accesses memory.
    pub const MEM: Kind = Kind(0x0008);
    /// Reads from memory.
    pub const LOAD: Kind = Kind(0x0010);
    /// Writes to memory.
    pub const STORE: Kind = Kind(0x0020);
    /// Arithmetic/logic operation.
    pub const ALU: Kind = Kind(0x0040);
    /// Internal instruction with no architectural effect.
    pub const INTERN: Kind = Kind(0x0080);
    /// Destination depends on run-time register/memory contents.
    pub const INDIRECT: Kind = Kind(0x0100);

    /// Bitwise union, usable in const contexts (shape tables).
    pub const fn union(self, other: Kind) -> Kind {
        Kind(self.0 | other.0)
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_control(self) -> bool {
        self.contains(Kind::CONTROL)
    }

    pub fn is_cond(self) -> bool {
        self.contains(Kind::COND)
    }

    pub fn is_return(self) -> bool {
        self.contains(Kind::RETURN)
    }

    pub fn is_call(self) -> bool {
        self.contains(Kind::CALL)
    }

    pub fn is_mem(self) -> bool {
        self.contains(Kind::MEM)
    }

    pub fn is_load(self) -> bool {
        self.contains(Kind::LOAD)
    }

    pub fn is_store(self) -> bool {
        self.contains(Kind::STORE)
    }

    pub fn is_alu(self) -> bool {
        self.contains(Kind::ALU)
    }

    pub fn is_intern(self) -> bool {
        self.contains(Kind::INTERN)
    }

    pub fn is_indirect(self) -> bool {
        self.contains(Kind::INDIRECT)
    }

    /// Names of every set flag, for diagnostics and serialized output.
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: [(Kind, &str); 10] = [
            (Kind::CONTROL, "control"),
            (Kind::COND, "cond"),
            (Kind::RETURN, "return"),
            (Kind::CALL, "call"),
            (Kind::MEM, "mem"),
            (Kind::LOAD, "load"),
            (Kind::STORE, "store"),
            (Kind::ALU, "alu"),
            (Kind::INTERN, "intern"),
            (Kind::INDIRECT, "indirect"),
        ];
        TABLE
            .iter()
            .filter(|(k, _)| self.contains(*k))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl std::ops::BitOr for Kind {
    type Output = Kind;

    fn bitor(self, rhs: Kind) -> Kind {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for Kind {
    fn bitor_assign(&mut self, rhs: Kind) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

/// One decoded instruction.
///
/// Immutable after construction except for the lazily memoized branch
/// target. Many records share one `'static` [`InstShape`]; each record is
/// owned by its caller once returned.
#[derive(Debug, Clone)]
pub struct DecodedInst {
    addr: Address,
    size: u32,
    kind: Kind,
    shape: &'static InstShape,
    args: [i64; 4],
    target: OnceCell<Option<Box<DecodedInst>>>,
}

impl DecodedInst {
    pub(crate) fn new(
        addr: Address,
        size: u32,
        shape: &'static InstShape,
        args: &[i64],
    ) -> Self {
        debug_assert!(size >= MIN_INSTRUCTION_SIZE);
        debug_assert_eq!(args.len(), shape.operands.len());
        let mut argv = [0i64; 4];
        argv[..args.len()].copy_from_slice(args);
        Self {
            addr,
            size,
            kind: shape.kind,
            shape,
            args: argv,
            target: OnceCell::new(),
        }
    }

    /// Starting address within the image's address space.
    pub fn addr(&self) -> Address {
        self.addr
    }

    /// Number of bytes consumed by this instruction, always at least 1.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Classification bitset.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The shape this record was decoded against.
    pub fn shape(&self) -> &'static InstShape {
        self.shape
    }

    /// Resolved operand values, interpreted per the shape's operand kinds.
    pub fn args(&self) -> &[i64] {
        &self.args[..self.shape.operands.len()]
    }

    /// Mnemonic, i.e. the template up to the first operand placeholder.
    pub fn mnemonic(&self) -> &'static str {
        self.shape
            .format
            .split_whitespace()
            .next()
            .unwrap_or(self.shape.format)
    }

    /// Produce one line of disassembly text by substituting each `%i`
    /// placeholder of the shape's template with a formatted operand.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut chars = self.shape.format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let Some(i) = chars.next().and_then(|d| d.to_digit(10)) else {
                continue;
            };
            let i = i as usize;
            let Some(kind) = self.shape.operands.get(i) else {
                continue;
            };
            match kind {
                OperandKind::RegRead | OperandKind::RegWrite => {
                    out.push_str(gpr32(self.args[i] as u8).name());
                }
                OperandKind::SImm => {
                    let x = self.args[i];
                    if x < 0 {
                        let _ = write!(out, "-0x{:x}", -x);
                    } else {
                        let _ = write!(out, "0x{:x}", x);
                    }
                }
                OperandKind::UImm => {
                    let _ = write!(out, "0x{:x}", self.args[i] as u32);
                }
                OperandKind::IpRel => {
                    let abs = self.addr.wrapping_add(self.args[i] as i32 as u32);
                    let _ = write!(out, "0x{:x}", abs);
                }
            }
        }
        out
    }

    /// Append the encoding index of every register-read operand to `set`.
    pub fn read_registers(&self, set: &mut RegSet) {
        for (i, kind) in self.shape.operands.iter().enumerate() {
            if *kind == OperandKind::RegRead {
                set.add(gpr32(self.args[i] as u8).index());
            }
        }
    }

    /// Append the encoding index of every register-write operand to `set`.
    pub fn written_registers(&self, set: &mut RegSet) {
        for (i, kind) in self.shape.operands.iter().enumerate() {
            if *kind == OperandKind::RegWrite {
                set.add(gpr32(self.args[i] as u8).index());
            }
        }
    }

    /// Destination address of a direct control transfer, without decoding.
    ///
    /// `None` for non-control instructions, indirect transfers, and shapes
    /// with no IP-relative operand.
    pub fn branch_target_addr(&self) -> Option<Address> {
        if !self.kind.is_control() || self.kind.is_indirect() {
            return None;
        }
        let i = self
            .shape
            .operands
            .iter()
            .position(|k| *k == OperandKind::IpRel)?;
        Some(
            self.addr
                .wrapping_add(self.size)
                .wrapping_add(self.args[i] as i32 as u32),
        )
    }

    /// Resolve and memoize the destination instruction of a direct control
    /// transfer through the originating decoder.
    ///
    /// The first call decodes `address + size + displacement`; subsequent
    /// calls return the cached record. Non-control instructions and
    /// indirect transfers yield no target.
    pub fn target(&self, decoder: &mut dyn Decoder) -> Option<&DecodedInst> {
        let at = self.branch_target_addr()?;
        self.target
            .get_or_init(|| decoder.decode(at).map(Box::new))
            .as_deref()
    }
}

impl PartialEq for DecodedInst {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.size == other.size
            && self.kind == other.kind
            && std::ptr::eq(self.shape, other.shape)
            && self.args() == other.args()
    }
}

impl Eq for DecodedInst {}

impl fmt::Display for DecodedInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Decoder trait: one instance per image view, stateful segment cache.
///
/// `decode` takes `&mut self` because the decoder keeps the most recently
/// resolved segment cached; callers wanting parallelism create one decoder
/// per worker over the same shared read-only [`image::Image`].
pub trait Decoder {
    /// Decode the instruction at `addr`.
    ///
    /// Returns `None` when no executable segment contains `addr`. Truncated
    /// or unrecognized encodings decode to an unknown record instead, sized
    /// to the bytes actually consumed (floor 1).
    fn decode(&mut self, addr: Address) -> Option<DecodedInst>;

    /// Minimum size of an instruction, in bytes.
    fn min_inst_size(&self) -> u32 {
        MIN_INSTRUCTION_SIZE
    }

    /// Register-bank description used to interpret emitted register indices.
    fn platform(&self) -> &'static Platform;
}

/// One basic block for CFG strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Starting address of the basic block
    pub start: Address,
    /// Instructions within this basic block
    pub insns: Vec<DecodedInst>,
    /// Successor addresses (branch targets and fall-through)
    pub succs: Vec<Address>,
}

impl BasicBlock {
    /// Create a new, empty basic block
    pub fn new(start: Address) -> Self {
        Self {
            start,
            insns: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Address one past the last instruction in the block
    pub fn end_address(&self) -> Option<Address> {
        self.insns.last().map(|i| i.addr().wrapping_add(i.size()))
    }

    /// Get the last instruction in the block
    pub fn last_instruction(&self) -> Option<&DecodedInst> {
        self.insns.last()
    }

    /// Get the size of the block in bytes
    pub fn size(&self) -> usize {
        self.insns.iter().map(|i| i.size() as usize).sum()
    }
}

/// Unified disassembly output.
#[derive(Debug, Clone)]
pub enum Disassembly {
    /// Linear stream of instructions
    Stream(Vec<DecodedInst>),
    /// Control flow graph of basic blocks
    Cfg(Vec<BasicBlock>),
}

impl Disassembly {
    /// Get the total number of instructions
    pub fn instruction_count(&self) -> usize {
        match self {
            Disassembly::Stream(insns) => insns.len(),
            Disassembly::Cfg(blocks) => blocks.iter().map(|b| b.insns.len()).sum(),
        }
    }

    /// Get all instructions as a flat vector
    pub fn all_instructions(&self) -> Vec<DecodedInst> {
        match self {
            Disassembly::Stream(insns) => insns.clone(),
            Disassembly::Cfg(blocks) => {
                let mut result = Vec::new();
                for block in blocks {
                    result.extend(block.insns.iter().cloned());
                }
                result
            }
        }
    }

    /// Convert to a stream disassembly (losing CFG information)
    pub fn to_stream(&self) -> Disassembly {
        match self {
            Disassembly::Stream(_) => self.clone(),
            Disassembly::Cfg(_) => Disassembly::Stream(self.all_instructions()),
        }
    }
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86
    X86_32,
    /// Unknown architecture
    Unknown,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error type for image loading and disassembly driving.
///
/// Decode failure is deliberately not represented here: an address outside
/// any executable segment yields no instruction, and malformed bytes yield
/// an unknown record, so sweeps never abort.
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// Failed to parse the binary image
    #[error("failed to parse binary image: {0}")]
    Parse(String),

    /// No decoder registered for the architecture
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    #[test]
    fn test_kind_flags() {
        let k = Kind::MEM | Kind::STORE;
        assert!(k.is_mem());
        assert!(k.is_store());
        assert!(!k.is_control());
        assert!(k.contains(Kind::MEM));
        assert!(!k.contains(Kind::MEM | Kind::LOAD));
        assert_eq!(k.to_string(), "mem|store");
        assert_eq!(Kind::NONE.to_string(), "none");
    }

    #[test]
    fn test_render_push() {
        let inst = DecodedInst::new(0x1000, 1, &shape::PUSH_R32, &[0]);
        assert_eq!(inst.render(), "push EAX");
        assert_eq!(inst.mnemonic(), "push");
    }

    #[test]
    fn test_render_signed_and_memory_operands() {
        // movl $1, -4(EBP)
        let inst = DecodedInst::new(0x1000, 7, &shape::MOV_MI32, &[1, -4, 5]);
        assert_eq!(inst.render(), "movl 0x1, -0x4(EBP)");
    }

    #[test]
    fn test_render_ip_relative_is_absolute() {
        let inst = DecodedInst::new(0x2000, 2, &shape::JMP_REL8, &[5]);
        assert_eq!(inst.render(), "jmp 0x2005");
    }

    #[test]
    fn test_use_def_sets_for_mov() {
        // mov EBX <- EAX: args are [dest, src]
        let inst = DecodedInst::new(0x1000, 2, &shape::MOV_RR32, &[3, 0]);
        let mut reads = RegSet::new();
        let mut writes = RegSet::new();
        inst.read_registers(&mut reads);
        inst.written_registers(&mut writes);
        assert_eq!(reads.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(writes.iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_branch_target_addr() {
        let jmp = DecodedInst::new(0x2000, 2, &shape::JMP_REL8, &[5]);
        assert_eq!(jmp.branch_target_addr(), Some(0x2007));

        let push = DecodedInst::new(0x1000, 1, &shape::PUSH_R32, &[0]);
        assert_eq!(push.branch_target_addr(), None);
    }

    #[test]
    fn test_indirect_transfer_has_no_target() {
        use crate::decoder::X86Decoder;
        use crate::image::{Image, Segment};
        use std::sync::Arc;

        // a control transfer whose destination depends on run-time state
        // must resolve no target, even with an IP-relative operand present
        static JMP_IND: InstShape = InstShape {
            format: "jmp *%0",
            kind: Kind::CONTROL.union(Kind::INDIRECT),
            operands: &[OperandKind::IpRel],
        };
        let inst = DecodedInst::new(0x1000, 2, &JMP_IND, &[5]);
        assert!(inst.kind().is_indirect());
        assert_eq!(inst.branch_target_addr(), None);

        let image = Arc::new(Image::new(vec![Segment::new(
            ".text",
            0x1000,
            true,
            vec![0x50; 16],
        )]));
        let mut dec = X86Decoder::new(image);
        assert!(inst.target(&mut dec).is_none());
    }

    #[test]
    fn test_record_equality_ignores_memoized_target() {
        let a = DecodedInst::new(0x2000, 2, &shape::JMP_REL8, &[5]);
        let b = DecodedInst::new(0x2000, 2, &shape::JMP_REL8, &[5]);
        assert_eq!(a, b);

        let c = DecodedInst::new(0x2000, 2, &shape::JMP_REL8, &[6]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_basic_block_operations() {
        let mut block = BasicBlock::new(0x1000);
        block.insns.push(DecodedInst::new(0x1000, 1, &shape::PUSH_R32, &[5]));
        block.insns.push(DecodedInst::new(0x1001, 2, &shape::MOV_RR32, &[5, 4]));

        assert_eq!(block.end_address(), Some(0x1003));
        assert_eq!(block.last_instruction().unwrap().mnemonic(), "mov");
        assert_eq!(block.size(), 3);
    }

    #[test]
    fn test_disassembly_instruction_count() {
        let stream = Disassembly::Stream(vec![
            DecodedInst::new(0x1000, 1, &shape::PUSH_R32, &[0]),
            DecodedInst::new(0x1001, 1, &shape::POP_R32, &[0]),
        ]);
        assert_eq!(stream.instruction_count(), 2);

        let cfg = Disassembly::Cfg(vec![
            BasicBlock {
                start: 0x1000,
                insns: vec![DecodedInst::new(0x1000, 2, &shape::JMP_REL8, &[0])],
                succs: vec![0x1002],
            },
            BasicBlock {
                start: 0x1002,
                insns: vec![DecodedInst::new(0x1002, 1, &shape::POP_R32, &[3])],
                succs: vec![],
            },
        ]);
        assert_eq!(cfg.instruction_count(), 2);
        assert_eq!(cfg.to_stream().instruction_count(), 2);
    }
}
