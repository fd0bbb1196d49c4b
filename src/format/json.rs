//! JSON and JSON Lines output formatters.

use serde::Serialize;
use serde_json::json;

use crate::{Address, BasicBlock, DecodedInst, Disassembly, DisassemblyError};

use super::{DisassemblyFormatter, JsonFormatter, JsonLinesFormatter};

#[derive(Serialize)]
struct InstructionJson {
    address: String,
    size: u32,
    mnemonic: String,
    operands: String,
    kind: Vec<&'static str>,
}

#[derive(Serialize)]
struct BasicBlockJson {
    address: String,
    size: usize,
    instructions: Vec<InstructionJson>,
    successors: Vec<String>,
}

#[derive(Serialize)]
struct DisassemblyJson {
    base_address: String,
    layout: &'static str,
    instruction_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<Vec<InstructionJson>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<BasicBlockJson>>,
}

fn hex(addr: Address) -> String {
    format!("0x{:x}", addr)
}

/// Split a rendered line into its mnemonic and operand text.
fn split_rendered(inst: &DecodedInst) -> (String, String) {
    let rendered = inst.render();
    match rendered.split_once(' ') {
        Some((m, rest)) => (m.to_string(), rest.to_string()),
        None => (rendered, String::new()),
    }
}

fn instruction_json(inst: &DecodedInst) -> InstructionJson {
    let (mnemonic, operands) = split_rendered(inst);
    InstructionJson {
        address: hex(inst.addr()),
        size: inst.size(),
        mnemonic,
        operands,
        kind: inst.kind().names(),
    }
}

fn block_json(block: &BasicBlock) -> BasicBlockJson {
    BasicBlockJson {
        address: hex(block.start),
        size: block.size(),
        instructions: block.insns.iter().map(instruction_json).collect(),
        successors: block.succs.iter().map(|s| hex(*s)).collect(),
    }
}

impl DisassemblyFormatter for JsonFormatter {
    fn format(
        &self,
        disassembly: &Disassembly,
        base_addr: Address,
    ) -> Result<String, DisassemblyError> {
        let doc = match disassembly {
            Disassembly::Stream(insns) => DisassemblyJson {
                base_address: hex(base_addr),
                layout: "stream",
                instruction_count: insns.len(),
                instructions: Some(insns.iter().map(instruction_json).collect()),
                blocks: None,
            },
            Disassembly::Cfg(blocks) => DisassemblyJson {
                base_address: hex(base_addr),
                layout: "cfg",
                instruction_count: disassembly.instruction_count(),
                instructions: None,
                blocks: Some(blocks.iter().map(block_json).collect()),
            },
        };

        serde_json::to_string_pretty(&doc).map_err(|e| DisassemblyError::Generic(e.to_string()))
    }
}

impl DisassemblyFormatter for JsonLinesFormatter {
    fn format(
        &self,
        disassembly: &Disassembly,
        base_addr: Address,
    ) -> Result<String, DisassemblyError> {
        let mut output = String::new();
        let mut emit = |block: Option<&BasicBlock>,
                        inst: &DecodedInst|
         -> Result<(), DisassemblyError> {
            let (mnemonic, operands) = split_rendered(inst);
            let line = json!({
                "base_address": hex(base_addr),
                "block_address": block.map(|b| hex(b.start)),
                "address": hex(inst.addr()),
                "size": inst.size(),
                "mnemonic": mnemonic,
                "operands": operands,
                "kind": inst.kind().names(),
            });
            let rendered = serde_json::to_string(&line)
                .map_err(|e| DisassemblyError::Generic(e.to_string()))?;
            output.push_str(&rendered);
            output.push('\n');
            Ok(())
        };

        match disassembly {
            Disassembly::Stream(insns) => {
                for inst in insns {
                    emit(None, inst)?;
                }
            }
            Disassembly::Cfg(blocks) => {
                for block in blocks {
                    for inst in &block.insns {
                        emit(Some(block), inst)?;
                    }
                }
            }
        }

        Ok(output)
    }
}
