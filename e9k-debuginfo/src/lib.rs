//! Debug information for the e9k debugger.
//!
//! The root type exposed by this crate is [`DebugIndex`], which loads
//! everything the expression evaluator and the `break` command need from a
//! guest ELF: the symbol table, the DWARF DIE tree, call-frame information
//! and a distilled list of global variables, plus a STABS fallback for
//! toolchains that do not emit DWARF.
//!
//! # The textual-dump boundary
//!
//! Rather than parsing ELF sections directly, this crate consumes the
//! *textual* dumps produced by the guest toolchain's binutils
//! (`objdump --syms`, `readelf --debug-dump=info`,
//! `readelf --debug-dump=frames`, `objdump -G`, `objdump -l -d`). The
//! [`DumpSource`] trait is the seam: production code shells out to the
//! toolchain via [`ToolchainDump`], tests feed canned dump text, and a
//! future binary-DWARF backend can slot in behind the same trait.
//!
//! Partial tool output is treated as a parse failure; the dumps are read
//! to EOF before parsing starts.

use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

pub mod cfi;
pub mod dwarf;
mod dump;
mod index;
mod lines;
pub mod stabs;
mod symbols;
pub mod types;
mod scope;

pub use crate::dump::{DumpSource, ToolchainDump};
pub use crate::index::{DebugIndex, DebugSession, SectionBases, Variable};
pub use crate::lines::resolve_file_line;
pub use crate::scope::{find_scope_for_pc, resolve_local, LocalPlace, ResolvedLocal};
pub use crate::symbols::{symbol_matches, Symbol, SymbolTable};

/// The error kind for [`DebugInfoError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugInfoErrorKind {
    /// A toolchain dump tool could not be run or produced no output.
    Tool,

    /// A dump could not be parsed.
    Parse,

    /// A name, address or file:line could not be resolved.
    Resolution,

    /// An i/o error while reading dumps.
    Io,
}

impl fmt::Display for DebugInfoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool => write!(f, "toolchain dump failed"),
            Self::Parse => write!(f, "malformed debug info dump"),
            Self::Resolution => write!(f, "unresolved debug info reference"),
            Self::Io => write!(f, "debug info i/o failed"),
        }
    }
}

/// An error when loading or querying debug information.
#[derive(Debug, Error)]
#[error("{kind}{}", .context.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct DebugInfoError {
    kind: DebugInfoErrorKind,
    context: Option<String>,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl DebugInfoError {
    pub(crate) fn new<E>(kind: DebugInfoErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind,
            context: None,
            source: Some(source.into()),
        }
    }

    pub(crate) fn with_context(kind: DebugInfoErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    /// Returns the corresponding [`DebugInfoErrorKind`] for this error.
    pub fn kind(&self) -> DebugInfoErrorKind {
        self.kind
    }
}

impl From<DebugInfoErrorKind> for DebugInfoError {
    fn from(kind: DebugInfoErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }
}

impl From<io::Error> for DebugInfoError {
    fn from(e: io::Error) -> Self {
        Self::new(DebugInfoErrorKind::Io, e)
    }
}
