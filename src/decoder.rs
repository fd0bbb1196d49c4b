//! Hand-written 32-bit x86 instruction decoder.
//!
//! Encoding summary (see <http://ref.x86asm.net/coder32.html>):
//!
//! ```text
//! legacy prefixes | opcode (1-3 bytes) | ModR/M | SIB | displacement | immediate
//! ```
//!
//! The dispatcher is a small state machine: scan prefixes until the first
//! non-prefix byte, resolve that byte (and the 0x0F escape group) to either
//! a direct form or a ModR/M form, read any trailing displacement/immediate
//! bytes, and emit a record. Every failure path emits an unknown record
//! sized to the bytes consumed so far, floor one byte, so callers sweeping
//! linearly always advance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::image::{Cursor, Image};
use crate::registers::{segment_override, Platform, Register, PLATFORM};
use crate::shape;
use crate::{Address, Architecture, DecodedInst, Decoder, DisassemblyError, MIN_INSTRUCTION_SIZE};

/// Legacy prefix flags accumulated by the prefix scanner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Prefixes(u16);

impl Prefixes {
    pub const LOCK: Prefixes = Prefixes(0x0001);
    pub const REPNE: Prefixes = Prefixes(0x0002);
    pub const REP: Prefixes = Prefixes(0x0004);
    pub const NOT_TAKEN: Prefixes = Prefixes(0x0008);
    pub const TAKEN: Prefixes = Prefixes(0x0010);
    pub const OPER_SIZE: Prefixes = Prefixes(0x0020);
    pub const ADDR_SIZE: Prefixes = Prefixes(0x0040);

    pub fn contains(self, other: Prefixes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOrAssign for Prefixes {
    fn bitor_assign(&mut self, rhs: Prefixes) {
        self.0 |= rhs.0;
    }
}

/// Result of the prefix scan: accumulated flags and the selected
/// segment-override register, if any.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixState {
    pub flags: Prefixes,
    pub segment: Option<&'static Register>,
}

/// ModR/M `mod` field, bits 7..6.
fn modrm_mod(b: u8) -> u8 {
    b >> 6
}

/// ModR/M `reg` field, bits 5..3.
fn modrm_reg(b: u8) -> u8 {
    (b >> 3) & 0b111
}

/// ModR/M `rm` field, bits 2..0.
fn modrm_rm(b: u8) -> u8 {
    b & 0b111
}

/// Scan legacy prefixes; the first byte matching none of them is the
/// opcode. `None` means the bytes ran out mid-scan.
fn scan_prefixes(cur: &mut Cursor) -> Option<(PrefixState, u8)> {
    let mut state = PrefixState::default();
    loop {
        let byte = cur.read_u8()?;
        match byte {
            0xF0 => state.flags |= Prefixes::LOCK,
            0xF2 => state.flags |= Prefixes::REPNE,
            0xF3 => state.flags |= Prefixes::REP,
            0x2E => {
                state.segment = segment_override(byte);
                state.flags |= Prefixes::NOT_TAKEN;
            }
            0x3E => {
                state.segment = segment_override(byte);
                state.flags |= Prefixes::TAKEN;
            }
            0x36 | 0x26 | 0x64 | 0x65 => state.segment = segment_override(byte),
            0x66 => state.flags |= Prefixes::OPER_SIZE,
            0x67 => state.flags |= Prefixes::ADDR_SIZE,
            _ => return Some((state, byte)),
        }
    }
}

/// Stateful x86-32 decoder over a shared read-only image.
///
/// The most recently resolved segment is cached so that adjacent-address
/// decoding (the common case while sweeping) avoids rescanning the segment
/// list. One instance must not be shared across threads; give each worker
/// its own decoder over the same `Arc<Image>`.
#[derive(Debug)]
pub struct X86Decoder {
    image: Arc<Image>,
    cached: Option<usize>,
}

impl X86Decoder {
    pub fn new(image: Arc<Image>) -> Self {
        Self {
            image,
            cached: None,
        }
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Resolve the executable segment containing `addr`, preferring the
    /// cached one. `None` for unmapped or non-executable addresses.
    fn locate(&mut self, addr: Address) -> Option<usize> {
        if let Some(idx) = self.cached {
            if self.image.segments()[idx].contains(addr) {
                return Some(idx);
            }
        }
        let idx = self.image.segment_index_at(addr)?;
        if !self.image.segments()[idx].executable() {
            return None;
        }
        self.cached = Some(idx);
        Some(idx)
    }

    fn unknown(addr: Address, cur: &Cursor) -> DecodedInst {
        let size = cur.consumed().max(MIN_INSTRUCTION_SIZE);
        DecodedInst::new(addr, size, &shape::UNKNOWN, &[])
    }

    fn emit(
        addr: Address,
        cur: &Cursor,
        shape: &'static shape::InstShape,
        args: &[i64],
    ) -> DecodedInst {
        DecodedInst::new(addr, cur.consumed(), shape, args)
    }

    fn dispatch(addr: Address, cur: &mut Cursor) -> DecodedInst {
        let Some((_prefixes, opcode)) = scan_prefixes(cur) else {
            return Self::unknown(addr, cur);
        };
        match opcode {
            // one-byte forms, register index in the low 3 bits
            0x50..=0x57 => Self::emit(addr, cur, &shape::PUSH_R32, &[(opcode & 0x7) as i64]),
            0x58..=0x5F => Self::emit(addr, cur, &shape::POP_R32, &[(opcode & 0x7) as i64]),

            // short relative jump
            0xEB => match cur.read_i8() {
                Some(disp) => Self::emit(addr, cur, &shape::JMP_REL8, &[disp as i64]),
                None => Self::unknown(addr, cur),
            },

            // two-byte escape group
            0x0F => Self::dispatch_0f(addr, cur),

            // everything else carries a ModR/M byte
            _ => Self::dispatch_modrm(addr, cur, opcode),
        }
    }

    fn dispatch_0f(addr: Address, cur: &mut Cursor) -> DecodedInst {
        let Some(opcode) = cur.read_u8() else {
            return Self::unknown(addr, cur);
        };
        match opcode {
            0x1E => match cur.read_u8() {
                Some(0xFB) => Self::emit(addr, cur, &shape::ENDBR32, &[]),
                _ => Self::unknown(addr, cur),
            },

            // three-byte opcode tables, recognized but not implemented
            0x38 | 0x3A => Self::unknown(addr, cur),

            _ => Self::unknown(addr, cur),
        }
    }

    fn dispatch_modrm(addr: Address, cur: &mut Cursor, opcode: u8) -> DecodedInst {
        let Some(modrm) = cur.read_u8() else {
            return Self::unknown(addr, cur);
        };
        let (mode, reg, rm) = (modrm_mod(modrm), modrm_reg(modrm), modrm_rm(modrm));
        match (opcode, mode) {
            // mov r/m32, r32 in register-direct form
            (0x89, 0b11) => Self::emit(addr, cur, &shape::MOV_RR32, &[rm as i64, reg as i64]),

            // imm8 ALU group, operation selected by the reg field
            (0x83, 0b11) => match cur.read_i8() {
                Some(imm) => {
                    let selected = shape::alu_imm8(reg);
                    if std::ptr::eq(selected, &shape::UNKNOWN) {
                        Self::unknown(addr, cur)
                    } else {
                        Self::emit(addr, cur, selected, &[imm as i64, rm as i64])
                    }
                }
                None => Self::unknown(addr, cur),
            },

            // mov imm32 to disp8(base)
            (0xC7, _) => {
                let Some(disp) = cur.read_i8() else {
                    return Self::unknown(addr, cur);
                };
                let Some(imm) = cur.read_u32() else {
                    return Self::unknown(addr, cur);
                };
                Self::emit(
                    addr,
                    cur,
                    &shape::MOV_MI32,
                    &[imm as i64, disp as i64, rm as i64],
                )
            }

            _ => Self::unknown(addr, cur),
        }
    }
}

impl Decoder for X86Decoder {
    fn decode(&mut self, addr: Address) -> Option<DecodedInst> {
        let idx = self.locate(addr)?;
        let image = Arc::clone(&self.image);
        let seg = &image.segments()[idx];
        let mut cur = Cursor::new(seg.data(), addr.wrapping_sub(seg.base()) as usize);
        Some(Self::dispatch(addr, &mut cur))
    }

    fn platform(&self) -> &'static Platform {
        &PLATFORM
    }
}

/// Constructor for one architecture's decoder.
pub type DecoderCtor = fn(Arc<Image>) -> Box<dyn Decoder>;

/// Explicit decoder registry owned by the embedding application.
///
/// Maps an architecture identifier to a decoder constructor, decoupled from
/// any host plugin-loading mechanism.
pub struct DecoderRegistry {
    ctors: HashMap<Architecture, DecoderCtor>,
}

impl Default for DecoderRegistry {
    /// Registry with every built-in decoder registered.
    fn default() -> Self {
        Self::builtin()
    }
}

impl DecoderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for `arch`.
    pub fn register(&mut self, arch: Architecture, ctor: DecoderCtor) {
        self.ctors.insert(arch, ctor);
    }

    pub fn supports(&self, arch: Architecture) -> bool {
        self.ctors.contains_key(&arch)
    }

    /// Build a decoder for `arch` over `image`.
    pub fn create(
        &self,
        arch: Architecture,
        image: Arc<Image>,
    ) -> Result<Box<dyn Decoder>, DisassemblyError> {
        let ctor = self
            .ctors
            .get(&arch)
            .ok_or(DisassemblyError::UnsupportedArchitecture(arch))?;
        Ok(ctor(image))
    }

    /// Registry with every built-in decoder registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Architecture::X86_32, |image| Box::new(X86Decoder::new(image)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Segment;
    use crate::registers::RegSet;
    use crate::Kind;
    use rstest::rstest;

    fn text_image(base: Address, bytes: &[u8]) -> Arc<Image> {
        Arc::new(Image::new(vec![Segment::new(
            ".text",
            base,
            true,
            bytes.to_vec(),
        )]))
    }

    fn decode_one(base: Address, bytes: &[u8]) -> DecodedInst {
        let mut dec = X86Decoder::new(text_image(base, bytes));
        dec.decode(base).expect("address is executable")
    }

    #[rstest]
    #[case(0x50, 0)]
    #[case(0x53, 3)]
    #[case(0x55, 5)]
    #[case(0x57, 7)]
    fn test_push_register_in_low_bits(#[case] opcode: u8, #[case] reg: i64) {
        let inst = decode_one(0x1000, &[opcode]);
        assert_eq!(inst.size(), 1);
        assert_eq!(inst.kind(), Kind::MEM | Kind::STORE);
        assert_eq!(inst.args(), &[reg]);
    }

    #[rstest]
    #[case(0x58, 0)]
    #[case(0x5C, 4)]
    #[case(0x5F, 7)]
    fn test_pop_register_in_low_bits(#[case] opcode: u8, #[case] reg: i64) {
        let inst = decode_one(0x1000, &[opcode]);
        assert_eq!(inst.size(), 1);
        assert_eq!(inst.kind(), Kind::MEM | Kind::LOAD);
        assert_eq!(inst.args(), &[reg]);
    }

    #[test]
    fn test_short_jump_and_target() {
        // jmp +5 at 0x2000, push EAX at the destination 0x2007
        let bytes = [0xEB, 0x05, 0x90, 0x90, 0x90, 0x90, 0x90, 0x50];
        let mut dec = X86Decoder::new(text_image(0x2000, &bytes));

        let jmp = dec.decode(0x2000).unwrap();
        assert_eq!(jmp.size(), 2);
        assert!(jmp.kind().is_control());
        assert_eq!(jmp.branch_target_addr(), Some(0x2007));

        let expected = dec.decode(0x2007).unwrap();
        let target = jmp.target(&mut dec).unwrap();
        assert_eq!(*target, expected);
        assert_eq!(target.mnemonic(), "push");

        // memoized: the second call returns the same record
        let first = jmp.target(&mut dec).unwrap() as *const DecodedInst;
        let second = jmp.target(&mut dec).unwrap() as *const DecodedInst;
        assert_eq!(first, second);
    }

    #[test]
    fn test_target_of_non_control_is_none() {
        let bytes = [0x50, 0x50];
        let mut dec = X86Decoder::new(text_image(0x1000, &bytes));
        let push = dec.decode(0x1000).unwrap();
        assert!(push.target(&mut dec).is_none());
    }

    #[test]
    fn test_mov_register_direct() {
        // 0x89 0xC3: mov EBX <- EAX (mod=11, reg=EAX, rm=EBX)
        let inst = decode_one(0x1000, &[0x89, 0xC3]);
        assert_eq!(inst.size(), 2);
        assert!(inst.kind().is_alu());

        let mut reads = RegSet::new();
        let mut writes = RegSet::new();
        inst.read_registers(&mut reads);
        inst.written_registers(&mut writes);
        assert_eq!(reads.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(writes.iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(inst.render(), "mov EAX, EBX");
    }

    #[test]
    fn test_mov_memory_indirect_is_unknown() {
        // 0x89 with mod=00 is outside the implemented subset
        let inst = decode_one(0x1000, &[0x89, 0x03]);
        assert_eq!(inst.shape().format, "unknown");
        assert_eq!(inst.size(), 2);
    }

    #[test]
    fn test_sub_imm8() {
        // 0x83 0xEC 0x10: sub ESP, 0x10 (mod=11, reg=5 -> sub, rm=ESP)
        let inst = decode_one(0x1000, &[0x83, 0xEC, 0x10]);
        assert_eq!(inst.size(), 3);
        assert!(inst.kind().is_alu());
        assert_eq!(inst.args(), &[0x10, 4]);
        assert_eq!(inst.render(), "sub 0x10, ESP");
    }

    #[test]
    fn test_unimplemented_alu_group_member_keeps_length() {
        // reg=0 selects add, which is not implemented; the record is
        // unknown but still spans opcode + ModR/M + imm8
        let inst = decode_one(0x1000, &[0x83, 0xC3, 0x05]);
        assert_eq!(inst.kind(), Kind::NONE);
        assert_eq!(inst.size(), 3);
        assert!(inst.args().is_empty());
    }

    #[test]
    fn test_mov_imm_to_memory() {
        // 0xC7 0x45 0xFC 0x01 0x00 0x00 0x00: movl $1, -4(EBP)
        let inst = decode_one(0x1000, &[0xC7, 0x45, 0xFC, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(inst.size(), 7);
        assert_eq!(inst.kind(), Kind::MEM | Kind::STORE);
        assert_eq!(inst.args(), &[1, -4, 5]);
        assert_eq!(inst.render(), "movl 0x1, -0x4(EBP)");
    }

    #[test]
    fn test_endbr32_with_rep_prefix() {
        let inst = decode_one(0x1000, &[0xF3, 0x0F, 0x1E, 0xFB]);
        assert_eq!(inst.size(), 4);
        assert!(inst.kind().is_intern());
        assert_eq!(inst.render(), "endbr32");
    }

    #[test]
    fn test_three_byte_opcode_tables_stub_out() {
        let inst = decode_one(0x1000, &[0x0F, 0x38, 0x00]);
        assert_eq!(inst.shape().format, "unknown");
        assert_eq!(inst.size(), 2);

        let inst = decode_one(0x1000, &[0x0F, 0x3A, 0x00]);
        assert_eq!(inst.size(), 2);
    }

    #[test]
    fn test_unrecognized_opcode_is_unknown() {
        let inst = decode_one(0x1000, &[0xFF]);
        assert_eq!(inst.kind(), Kind::NONE);
        assert!(inst.size() >= 1);
        assert!(inst.args().is_empty());
    }

    #[test]
    fn test_truncated_stream_falls_back_to_unknown() {
        // jmp opcode with its displacement cut off
        let inst = decode_one(0x1000, &[0xEB]);
        assert_eq!(inst.shape().format, "unknown");
        assert_eq!(inst.size(), 1);

        // lone prefix with no opcode
        let inst = decode_one(0x1000, &[0x66]);
        assert_eq!(inst.size(), 1);
    }

    #[test]
    fn test_prefixes_accumulate_before_opcode() {
        let bytes = [0xF0, 0x65, 0x66, 0x50];
        let mut cur = Cursor::new(&bytes, 0);
        let (state, opcode) = scan_prefixes(&mut cur).unwrap();
        assert!(state.flags.contains(Prefixes::LOCK));
        assert!(state.flags.contains(Prefixes::OPER_SIZE));
        assert_eq!(state.segment.unwrap().name(), "GS");
        assert_eq!(opcode, 0x50);

        // prefixed push still decodes, sized over the prefixes
        let inst = decode_one(0x1000, &bytes);
        assert_eq!(inst.size(), 4);
        assert_eq!(inst.render(), "push EAX");
    }

    #[test]
    fn test_decode_is_repeatable() {
        let bytes = [0x55, 0x89, 0xE5];
        let mut dec = X86Decoder::new(text_image(0x1000, &bytes));
        let a = dec.decode(0x1001).unwrap();
        let b = dec.decode(0x1001).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unmapped_and_non_executable_yield_nothing() {
        let image = Arc::new(Image::new(vec![
            Segment::new(".text", 0x1000, true, vec![0x50]),
            Segment::new(".data", 0x2000, false, vec![0x50]),
        ]));
        let mut dec = X86Decoder::new(Arc::clone(&image));
        assert!(dec.decode(0x1000).is_some());
        assert!(dec.decode(0x2000).is_none());
        assert!(dec.decode(0x3000).is_none());
    }

    #[test]
    fn test_segment_cache_re_resolves_on_miss() {
        let image = Arc::new(Image::new(vec![
            Segment::new(".text", 0x1000, true, vec![0x50, 0x51]),
            Segment::new(".init", 0x4000, true, vec![0x58]),
        ]));
        let mut dec = X86Decoder::new(image);
        assert_eq!(dec.decode(0x1000).unwrap().render(), "push EAX");
        assert_eq!(dec.decode(0x4000).unwrap().render(), "pop EAX");
        assert_eq!(dec.decode(0x1001).unwrap().render(), "push ECX");
    }

    #[test]
    fn test_forward_progress_over_arbitrary_bytes() {
        let bytes: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
        let image = text_image(0x1000, &bytes);
        let mut dec = X86Decoder::new(Arc::clone(&image));
        let mut at: Address = 0x1000;
        let end = 0x1000 + bytes.len() as Address;
        while at < end {
            let inst = dec.decode(at).unwrap();
            assert!(inst.size() >= dec.min_inst_size());
            at += inst.size();
        }
        assert_eq!(at, end);
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = DecoderRegistry::builtin();
        assert!(registry.supports(Architecture::X86_32));
        assert!(!registry.supports(Architecture::Unknown));

        let image = text_image(0x1000, &[0x50]);
        let mut dec = registry
            .create(Architecture::X86_32, Arc::clone(&image))
            .unwrap();
        assert_eq!(dec.decode(0x1000).unwrap().render(), "push EAX");
        assert_eq!(dec.platform().name, "x86");

        assert!(matches!(
            registry.create(Architecture::Unknown, image),
            Err(DisassemblyError::UnsupportedArchitecture(_))
        ));
    }
}
