//! Recursive descent disassembly strategy.
//!
//! Follows the control flow of the program from an entry point, splitting
//! the code into basic blocks. Unlike mnemonic-matching approaches, block
//! boundaries and successors come straight from the decoder's
//! classification bits and IP-relative operands, so unknown records are
//! treated as straight-line code and never derail the traversal.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::decoder::DecoderRegistry;
use crate::image::Image;
use crate::{Address, Architecture, BasicBlock, Decoder, Disassembly, DisassemblyError};

/// Recursive-descent disassembly into a Control Flow Graph (CFG).
pub fn run(
    image: &Arc<Image>,
    registry: &DecoderRegistry,
    arch: Architecture,
    entry: Address,
) -> Result<Disassembly, DisassemblyError> {
    log::debug!("recursive descent from 0x{:x}", entry);

    let mut decoder = registry.create(arch, Arc::clone(image))?;
    let blocks = build_cfg(decoder.as_mut(), entry);

    log::debug!("recursive descent complete: {} basic block(s)", blocks.len());

    Ok(Disassembly::Cfg(blocks))
}

/// Core worklist algorithm.
fn build_cfg(decoder: &mut dyn Decoder, entry: Address) -> Vec<BasicBlock> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    let mut blocks = Vec::new();

    queue.push_back(entry);

    while let Some(start) = queue.pop_front() {
        if !seen.insert(start) {
            continue;
        }

        let mut insns = Vec::new();
        let mut at = start;
        let mut succs: Option<Vec<Address>> = None;

        while let Some(inst) = decoder.decode(at) {
            let next = at.wrapping_add(inst.size());
            let kind = inst.kind();
            let target = inst.branch_target_addr();
            insns.push(inst);
            at = next;

            if kind.is_return() {
                succs = Some(Vec::new());
                break;
            }
            if kind.is_control() {
                let mut out = Vec::new();
                // indirect transfers have no statically known target
                if let Some(t) = target {
                    out.push(t);
                }
                if kind.is_cond() {
                    out.push(next);
                }
                succs = Some(out);
                break;
            }
        }

        if insns.is_empty() {
            continue;
        }

        // a block cut short by the end of the segment falls through
        let succs = succs.unwrap_or_else(|| vec![at]);
        for &s in &succs {
            if !seen.contains(&s) {
                queue.push_back(s);
            }
        }

        blocks.push(BasicBlock {
            start,
            insns,
            succs,
        });
    }

    blocks.sort_by_key(|b| b.start);
    blocks
}
