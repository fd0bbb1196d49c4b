//! Linear-sweep disassembly with parallel chunk processing.
//!
//! Each executable segment is split into fixed-size address chunks; every
//! chunk is swept by its own decoder instance over the shared read-only
//! image, so no decoder state crosses a thread boundary. The sweep relies
//! on the decoder's forward-progress guarantee: every decode inside an
//! executable segment yields a record of at least one byte.

use std::sync::Arc;

use rayon::prelude::*;

use crate::decoder::DecoderRegistry;
use crate::image::Image;
use crate::{Address, Architecture, DecodedInst, Disassembly, DisassemblyError};

/// Address span handled by one worker.
const CHUNK_SIZE: u32 = 4096;

/// Sweep every executable segment of `image`.
pub fn run(
    image: &Arc<Image>,
    registry: &DecoderRegistry,
    arch: Architecture,
) -> Result<Disassembly, DisassemblyError> {
    let mut chunks: Vec<(Address, Address)> = Vec::new();
    for seg in image.segments().iter().filter(|s| s.executable()) {
        let mut at = seg.base();
        while at < seg.end() {
            let end = seg.end().min(at.saturating_add(CHUNK_SIZE));
            chunks.push((at, end));
            at = end;
        }
    }

    log::debug!("linear sweep over {} chunk(s)", chunks.len());

    let per_chunk: Vec<Vec<DecodedInst>> = chunks
        .into_par_iter()
        .map(|(start, end)| sweep_chunk(image, registry, arch, start, end))
        .collect::<Result<_, _>>()?;

    let mut insns: Vec<DecodedInst> = per_chunk.into_iter().flatten().collect();
    insns.sort_by_key(|i| i.addr());

    log::debug!("linear sweep found {} instruction(s)", insns.len());

    Ok(Disassembly::Stream(insns))
}

/// Sweep one address chunk with a fresh decoder.
///
/// Instructions that start inside the chunk but extend past its end are
/// kept; the next chunk's first record may therefore overlap, exactly as a
/// sweep restarted mid-instruction would.
fn sweep_chunk(
    image: &Arc<Image>,
    registry: &DecoderRegistry,
    arch: Architecture,
    start: Address,
    end: Address,
) -> Result<Vec<DecodedInst>, DisassemblyError> {
    let mut decoder = registry.create(arch, Arc::clone(image))?;
    let mut insns = Vec::new();
    let mut at = start;
    while at < end {
        let Some(inst) = decoder.decode(at) else {
            break;
        };
        let next = at.wrapping_add(inst.size());
        insns.push(inst);
        at = next;
    }
    Ok(insns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Segment;

    fn image_with(code: &[u8]) -> Arc<Image> {
        Arc::new(Image::new(vec![
            Segment::new(".text", 0x1000, true, code.to_vec()),
            Segment::new(".data", 0x8000, false, vec![0x50; 16]),
        ]))
    }

    #[test]
    fn test_linear_sweep_stream() {
        // push EBP; mov EBP <- ESP; pop EBP
        let image = image_with(&[0x55, 0x89, 0xE5, 0x5D]);
        let registry = DecoderRegistry::builtin();

        let result = run(&image, &registry, Architecture::X86_32).unwrap();
        let Disassembly::Stream(insns) = result else {
            panic!("expected a stream");
        };
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].render(), "push EBP");
        assert_eq!(insns[1].render(), "mov ESP, EBP");
        assert_eq!(insns[2].render(), "pop EBP");
    }

    #[test]
    fn test_linear_sweep_skips_non_executable_segments() {
        let image = image_with(&[0x50]);
        let registry = DecoderRegistry::builtin();

        let result = run(&image, &registry, Architecture::X86_32).unwrap();
        assert_eq!(result.instruction_count(), 1);
    }

    #[test]
    fn test_linear_sweep_covers_every_byte() {
        // arbitrary bytes: the sweep must stay aligned and cover the
        // segment exactly once
        let code: Vec<u8> = (0..CHUNK_SIZE + 257).map(|i| (i * 7) as u8).collect();
        let image = image_with(&code);
        let registry = DecoderRegistry::builtin();

        let result = run(&image, &registry, Architecture::X86_32).unwrap();
        let insns = result.all_instructions();
        assert!(!insns.is_empty());
        for inst in &insns {
            assert!(inst.size() >= 1);
        }
        let last = insns.last().unwrap();
        assert!(last.addr() + last.size() <= 0x1000 + code.len() as Address);
    }

    #[test]
    fn test_unknown_architecture_is_an_error() {
        let image = image_with(&[0x50]);
        let registry = DecoderRegistry::builtin();
        assert!(run(&image, &registry, Architecture::Unknown).is_err());
    }
}
