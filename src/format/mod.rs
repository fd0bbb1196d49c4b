//! Output format module implementation

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use clap::ValueEnum;

use crate::{Address, DecodedInst, Disassembly, DisassemblyError};

/// Supported output formats for disassembly results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per line)
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for disassembly output
pub trait DisassemblyFormatter {
    /// Format a disassembly result
    fn format(
        &self,
        disassembly: &Disassembly,
        base_addr: Address,
    ) -> Result<String, DisassemblyError>;
}

/// Format disassembly in plain text
pub struct TextFormatter;

/// Format disassembly in JSON
pub struct JsonFormatter;

/// Format disassembly in JSON Lines
pub struct JsonLinesFormatter;

/// Format disassembly in CSV
pub struct CsvFormatter;

fn push_text_line(out: &mut String, indent: &str, inst: &DecodedInst) {
    let _ = writeln!(
        out,
        "{}0x{:08x}: {:<30} ; {} byte(s), {}",
        indent,
        inst.addr(),
        inst.render(),
        inst.size(),
        inst.kind()
    );
}

impl DisassemblyFormatter for TextFormatter {
    fn format(
        &self,
        disassembly: &Disassembly,
        base_addr: Address,
    ) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        match disassembly {
            Disassembly::Stream(insns) => {
                let _ = writeln!(output, "Disassembly at 0x{:x}:\n", base_addr);
                for inst in insns {
                    push_text_line(&mut output, "", inst);
                }
            }
            Disassembly::Cfg(blocks) => {
                let _ = writeln!(output, "Control Flow Graph at 0x{:x}:\n", base_addr);
                for block in blocks {
                    let _ = writeln!(output, "Block at 0x{:08x}:", block.start);
                    for inst in &block.insns {
                        push_text_line(&mut output, "  ", inst);
                    }
                    if block.succs.is_empty() {
                        output.push_str("  No successors (terminal block)\n");
                    } else {
                        output.push_str("  Successors: ");
                        for (i, succ) in block.succs.iter().enumerate() {
                            if i > 0 {
                                output.push_str(", ");
                            }
                            let _ = write!(output, "0x{:08x}", succ);
                        }
                        output.push('\n');
                    }
                    output.push('\n');
                }
            }
        }

        Ok(output)
    }
}
