//! CSV output formatter.
//!
//! The schema is flat so stream and CFG results share one header; CFG rows
//! carry their owning block's address, stream rows leave it empty.

use std::fmt::Write as _;

use crate::{Address, DecodedInst, Disassembly, DisassemblyError};

use super::{CsvFormatter, DisassemblyFormatter};

const HEADER: &str = "base_address,layout,block_address,address,size,kind,text\n";

/// Quote a field when it contains a comma, quote, or newline.
fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_row(
    out: &mut String,
    base_addr: Address,
    layout: &str,
    block_addr: Option<Address>,
    inst: &DecodedInst,
) {
    let block = block_addr.map_or(String::new(), |b| format!("0x{:x}", b));
    let _ = writeln!(
        out,
        "0x{:x},{},{},0x{:x},{},{},{}",
        base_addr,
        layout,
        block,
        inst.addr(),
        inst.size(),
        escape_csv_field(&inst.kind().to_string()),
        escape_csv_field(&inst.render()),
    );
}

impl DisassemblyFormatter for CsvFormatter {
    fn format(
        &self,
        disassembly: &Disassembly,
        base_addr: Address,
    ) -> Result<String, DisassemblyError> {
        let mut output = String::from(HEADER);

        match disassembly {
            Disassembly::Stream(insns) => {
                for inst in insns {
                    push_row(&mut output, base_addr, "stream", None, inst);
                }
            }
            Disassembly::Cfg(blocks) => {
                for block in blocks {
                    for inst in &block.insns {
                        push_row(&mut output, base_addr, "cfg", Some(block.start), inst);
                    }
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{sample_cfg, sample_stream};
    use super::*;

    #[test]
    fn test_csv_stream_rows() {
        let result = CsvFormatter.format(&sample_stream(), 0x1000).unwrap();
        let lines: Vec<&str> = result.lines().collect();

        assert_eq!(lines[0], HEADER.trim_end());
        assert_eq!(lines.len(), 4);
        // the rendered text contains a comma, so it must be quoted
        assert!(lines[2].ends_with("\"mov ESP, EBP\""));
        assert!(lines[1].starts_with("0x1000,stream,,0x1000,1,"));
    }

    #[test]
    fn test_csv_cfg_rows_carry_block_address() {
        let result = CsvFormatter.format(&sample_cfg(), 0x1000).unwrap();
        let lines: Vec<&str> = result.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(",cfg,0x1000,"));
        assert!(lines[2].contains(",cfg,0x1004,"));
    }

    #[test]
    fn test_escape_csv_field() {
        assert_eq!(escape_csv_field("push EAX"), "push EAX");
        assert_eq!(escape_csv_field("mov a, b"), "\"mov a, b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
