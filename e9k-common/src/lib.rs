//! Common functionality for the `e9k` debugger crates.
//!
//! The emulated target is a big-endian m68k machine with a 24-bit address
//! bus, and several crates need the same small vocabulary to talk about it:
//! masked addresses, 8/16/32-bit access widths, big-endian scalar reads,
//! register names and the DWARF register numbering, and the FNV-1a checksum
//! that identifies a ROM across sessions.

mod checksum;
mod env;
mod regs;
mod types;

pub use crate::checksum::*;
pub use crate::env::*;
pub use crate::regs::*;
pub use crate::types::*;
