use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{DebugInfoError, DebugInfoErrorKind};

/// Source of the textual toolchain dumps the parsers consume.
///
/// The production implementation is [`ToolchainDump`]; tests substitute
/// canned text.
pub trait DumpSource {
    /// `objdump --syms`
    fn symbols(&self) -> Result<String, DebugInfoError>;

    /// `readelf --debug-dump=info`
    fn dwarf_info(&self) -> Result<String, DebugInfoError>;

    /// `readelf --debug-dump=frames`
    fn frames(&self) -> Result<String, DebugInfoError>;

    /// `objdump -G` (STABS)
    fn stabs(&self) -> Result<String, DebugInfoError>;

    /// `objdump -h` (section headers)
    fn section_headers(&self) -> Result<String, DebugInfoError>;

    /// `objdump -l -d` (disassembly with line annotations)
    fn line_listing(&self) -> Result<String, DebugInfoError>;
}

/// Runs the guest toolchain's binutils against an ELF.
///
/// Tool names are built from a toolchain prefix, e.g. a prefix of
/// `m68k-elf-` runs `m68k-elf-objdump`. Output is drained to EOF; a
/// failing exit status or empty output is a [`Tool`] error.
///
/// [`Tool`]: crate::DebugInfoErrorKind::Tool
#[derive(Clone, Debug)]
pub struct ToolchainDump {
    prefix: String,
    elf_path: PathBuf,
}

impl ToolchainDump {
    pub fn new(prefix: impl Into<String>, elf_path: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            elf_path: elf_path.into(),
        }
    }

    pub fn elf_path(&self) -> &Path {
        &self.elf_path
    }

    fn run(&self, tool: &str, args: &[&str]) -> Result<String, DebugInfoError> {
        let program = format!("{}{}", self.prefix, tool);
        let output = Command::new(&program)
            .args(args)
            .arg(&self.elf_path)
            .output()
            .map_err(|e| {
                DebugInfoError::new(DebugInfoErrorKind::Tool, format!("{program}: {e}"))
            })?;
        if !output.status.success() {
            return Err(DebugInfoError::with_context(
                DebugInfoErrorKind::Tool,
                format!("{program} exited with {}", output.status),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.is_empty() {
            return Err(DebugInfoError::with_context(
                DebugInfoErrorKind::Tool,
                format!("{program} produced no output"),
            ));
        }
        Ok(text)
    }
}

impl DumpSource for ToolchainDump {
    fn symbols(&self) -> Result<String, DebugInfoError> {
        self.run("objdump", &["--syms"])
    }

    fn dwarf_info(&self) -> Result<String, DebugInfoError> {
        self.run("readelf", &["--debug-dump=info"])
    }

    fn frames(&self) -> Result<String, DebugInfoError> {
        self.run("readelf", &["--debug-dump=frames"])
    }

    fn stabs(&self) -> Result<String, DebugInfoError> {
        self.run("objdump", &["-G"])
    }

    fn section_headers(&self) -> Result<String, DebugInfoError> {
        self.run("objdump", &["-h"])
    }

    fn line_listing(&self) -> Result<String, DebugInfoError> {
        self.run("objdump", &["-l", "-d"])
    }
}
