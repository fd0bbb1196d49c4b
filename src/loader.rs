//! Goblin-based ELF image loader.
//!
//! Only the pieces the decoder needs survive the parse: the architecture,
//! the entry point, and the allocatable sections turned into [`Segment`]s
//! with their executable flag. Full ABI semantics (symbols, relocations,
//! dynamic linking) are deliberately out of scope.

use std::sync::Arc;

use goblin::elf::{self, Elf};
use goblin::Object;

use crate::image::{Image, Segment};
use crate::{Address, Architecture, DisassemblyError};

/// A loader that handles 32-bit ELF images via Goblin.
#[derive(Debug, Default)]
pub struct ElfLoader;

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Detected architecture
    pub architecture: Architecture,
    /// Entry point address, if the header carries one
    pub entry: Option<Address>,
    /// Mapped segments, shareable across decoder instances
    pub image: Arc<Image>,
}

impl ElfLoader {
    /// Construct a new ElfLoader.
    pub fn new() -> Self {
        ElfLoader
    }

    /// Parse raw bytes into a [`LoadedImage`].
    pub fn load(&self, data: &[u8]) -> Result<LoadedImage, DisassemblyError> {
        match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.load_elf(elf, data),
            Ok(_) => Err(DisassemblyError::Parse(
                "unsupported object format (expected ELF)".into(),
            )),
            Err(e) => Err(DisassemblyError::Parse(e.to_string())),
        }
    }

    fn load_elf(&self, elf: Elf<'_>, data: &[u8]) -> Result<LoadedImage, DisassemblyError> {
        let architecture = match elf.header.e_machine {
            elf::header::EM_386 => Architecture::X86_32,
            _ => Architecture::Unknown,
        };

        let mut segments = Vec::new();
        for sh in &elf.section_headers {
            // only allocatable sections are mapped
            if sh.sh_flags & u64::from(elf::section_header::SHF_ALLOC) == 0 {
                continue;
            }
            let Some(name) = elf.shdr_strtab.get_at(sh.sh_name) else {
                continue;
            };
            // NOBITS sections (.bss) carry no file bytes
            let Some(range) = sh.file_range() else {
                continue;
            };
            let Some(bytes) = data.get(range) else {
                return Err(DisassemblyError::Parse(format!(
                    "section {} extends past the end of the file",
                    name
                )));
            };
            segments.push(Segment::new(
                name,
                sh.sh_addr as Address,
                sh.is_executable(),
                bytes.to_vec(),
            ));
        }

        log::debug!(
            "loaded {} segment(s), architecture {}",
            segments.len(),
            architecture
        );

        let entry = Some(elf.entry as Address).filter(|e| *e != 0);
        Ok(LoadedImage {
            architecture,
            entry,
            image: Arc::new(Image::new(segments)),
        })
    }
}
