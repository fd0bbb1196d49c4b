//! Disassembly strategies

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;

use crate::decoder::DecoderRegistry;
use crate::image::Image;
use crate::{Address, Architecture, Disassembly, DisassemblyError};

/// Available disassembly strategies.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Linear sweep over every executable segment
    Linear,
    /// Recursive descent from the entry point (control flow analysis)
    Recursive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "Linear sweep"),
            Strategy::Recursive => write!(f, "Recursive descent"),
        }
    }
}

impl Strategy {
    /// Run the selected strategy on `image`, building decoders through
    /// `registry`. `entry` is the starting address for flow-directed
    /// strategies; the linear sweep ignores it.
    pub fn run(
        &self,
        image: &Arc<Image>,
        registry: &DecoderRegistry,
        arch: Architecture,
        entry: Address,
    ) -> Result<Disassembly, DisassemblyError> {
        match self {
            Strategy::Linear => linear::run(image, registry, arch),
            Strategy::Recursive => recursive::run(image, registry, arch, entry),
        }
    }

    /// Return all available strategies
    pub fn all() -> &'static [Strategy] {
        &[Strategy::Linear, Strategy::Recursive]
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Linear
    }
}

pub mod linear;
pub mod recursive;
