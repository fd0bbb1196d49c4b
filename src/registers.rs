//! Architectural register catalogue for 32-bit x86.
//!
//! All registers are statically initialized and shared by reference; the
//! decoder emits the stable `index` of each register, and use/def sets are
//! bitmasks over those indices. For the 32-bit general-purpose bank the
//! index equals the 3-bit encoding value found in opcodes and ModR/M bytes.

use std::fmt;

/// Register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// General integer register
    Int,
    /// Address/segment register
    Addr,
    /// Status/flags register
    Status,
}

/// One architectural register. Allocated once, never mutated.
#[derive(Debug, PartialEq, Eq)]
pub struct Register {
    name: &'static str,
    bits: u8,
    class: RegClass,
    index: u8,
}

impl Register {
    const fn new(name: &'static str, bits: u8, class: RegClass, index: u8) -> Self {
        Self {
            name,
            bits,
            class,
            index,
        }
    }

    /// Symbolic name (e.g. "EAX").
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Operand width in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn class(&self) -> RegClass {
        self.class
    }

    /// Stable small index: the register's identity in use/def sets.
    pub fn index(&self) -> u8 {
        self.index
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 32-bit general-purpose registers, positioned by their 3-bit encoding.
pub static GPR32: [Register; 8] = [
    Register::new("EAX", 32, RegClass::Int, 0),
    Register::new("ECX", 32, RegClass::Int, 1),
    Register::new("EDX", 32, RegClass::Int, 2),
    Register::new("EBX", 32, RegClass::Int, 3),
    Register::new("ESP", 32, RegClass::Addr, 4),
    Register::new("EBP", 32, RegClass::Addr, 5),
    Register::new("ESI", 32, RegClass::Addr, 6),
    Register::new("EDI", 32, RegClass::Addr, 7),
];

/// 16-bit general-purpose registers, same encoding order.
pub static GPR16: [Register; 8] = [
    Register::new("AX", 16, RegClass::Int, 8),
    Register::new("CX", 16, RegClass::Int, 9),
    Register::new("DX", 16, RegClass::Int, 10),
    Register::new("BX", 16, RegClass::Int, 11),
    Register::new("SP", 16, RegClass::Addr, 12),
    Register::new("BP", 16, RegClass::Addr, 13),
    Register::new("SI", 16, RegClass::Addr, 14),
    Register::new("DI", 16, RegClass::Addr, 15),
];

/// 8-bit general-purpose registers, same encoding order.
pub static GPR8: [Register; 8] = [
    Register::new("AL", 8, RegClass::Int, 16),
    Register::new("CL", 8, RegClass::Int, 17),
    Register::new("DL", 8, RegClass::Int, 18),
    Register::new("BL", 8, RegClass::Int, 19),
    Register::new("AH", 8, RegClass::Int, 20),
    Register::new("CH", 8, RegClass::Int, 21),
    Register::new("DH", 8, RegClass::Int, 22),
    Register::new("BH", 8, RegClass::Int, 23),
];

/// Segment registers, used by the prefix scanner for overrides.
pub static CS: Register = Register::new("CS", 32, RegClass::Addr, 24);
pub static SS: Register = Register::new("SS", 32, RegClass::Addr, 25);
pub static DS: Register = Register::new("DS", 32, RegClass::Addr, 26);
pub static ES: Register = Register::new("ES", 32, RegClass::Addr, 27);
pub static FS: Register = Register::new("FS", 32, RegClass::Addr, 28);
pub static GS: Register = Register::new("GS", 32, RegClass::Addr, 29);

/// All segment registers, in prefix-group order.
pub static SEGMENT: [&Register; 6] = [&CS, &SS, &DS, &ES, &FS, &GS];

/// Status bank: EFLAGS only.
pub static STATUS: [Register; 1] = [Register::new("EFLAGS", 32, RegClass::Status, 30)];

/// Look up a 32-bit GPR by its 3-bit encoding value.
pub fn gpr32(encoding: u8) -> &'static Register {
    &GPR32[(encoding & 0x7) as usize]
}

/// A named group of registers.
#[derive(Debug)]
pub struct RegBank {
    pub name: &'static str,
    pub regs: &'static [&'static Register],
}

/// Platform description exposed to the embedding analysis framework.
#[derive(Debug)]
pub struct Platform {
    pub name: &'static str,
    pub banks: &'static [RegBank],
}

static DATA_BANK: [&Register; 4] = [&GPR32[0], &GPR32[1], &GPR32[2], &GPR32[3]];

/// Pointer-bearing registers: the address GPRs plus the segment bank.
static ADDRESS_BANK: [&Register; 10] = [
    &GPR32[4],
    &GPR32[5],
    &GPR32[6],
    &GPR32[7],
    &CS,
    &SS,
    &DS,
    &ES,
    &FS,
    &GS,
];

static STATUS_BANK: [&Register; 1] = [&STATUS[0]];

/// The x86-32 platform: data, address, and status banks.
pub static PLATFORM: Platform = Platform {
    name: "x86",
    banks: &[
        RegBank {
            name: "DATA",
            regs: &DATA_BANK,
        },
        RegBank {
            name: "ADDRESS",
            regs: &ADDRESS_BANK,
        },
        RegBank {
            name: "STATUS",
            regs: &STATUS_BANK,
        },
    ],
};

/// Small set of register indices, backed by a bitmask.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegSet {
    bits: u64,
}

impl RegSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a register index to the set. Idempotent.
    pub fn add(&mut self, index: u8) {
        debug_assert!(index < 64);
        self.bits |= 1u64 << index;
    }

    pub fn contains(&self, index: u8) -> bool {
        self.bits & (1u64 << index) != 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterate the contained indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..64).filter(|i| self.contains(*i))
    }
}

/// Segment-override register for a group-2 prefix byte, if any.
pub(crate) fn segment_override(prefix: u8) -> Option<&'static Register> {
    match prefix {
        0x2E => Some(&CS),
        0x36 => Some(&SS),
        0x3E => Some(&DS),
        0x26 => Some(&ES),
        0x64 => Some(&FS),
        0x65 => Some(&GS),
        _ => None,
    }
}
