use std::path::{Path, PathBuf};
use std::time::Instant;

use e9k_common::mask24;

use crate::cfi::{self, Fde};
use crate::dump::DumpSource;
use crate::dwarf::{self, DieLocation, DieStore, DwarfTag};
use crate::stabs::{self, StabsSections};
use crate::symbols::SymbolTable;
use crate::types::{TypeGraph, TypeId};
use crate::DebugInfoError;

/// Load addresses of the guest sections, reported by the core at boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionBases {
    pub text: u32,
    pub data: u32,
    pub bss: u32,
}

/// A global or static variable distilled from the debug info.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub addr: u32,
    /// DIE offset of the variable's type, when DWARF provided one.
    pub type_ref: Option<u32>,
    /// Byte size from the STABS pass, when no DWARF type exists.
    pub byte_size: Option<usize>,
}

/// Everything loaded from one guest ELF.
#[derive(Debug, Default)]
pub struct DebugIndex {
    pub elf_path: PathBuf,
    pub bases: SectionBases,
    pub dies: DieStore,
    pub fdes: Vec<Fde>,
    pub symbols: SymbolTable,
    pub variables: Vec<Variable>,
    pub types: TypeGraph,
}

impl DebugIndex {
    /// Runs the full load pipeline against a dump source.
    ///
    /// The DWARF and frame dumps are optional (a stripped or
    /// STABS-only binary simply yields no DIEs, triggering the STABS
    /// fallback); only the symbol table is mandatory.
    pub fn load(
        dump: &dyn DumpSource,
        elf_path: &Path,
        bases: SectionBases,
    ) -> Result<Self, DebugInfoError> {
        let started = Instant::now();
        let mut index = Self {
            elf_path: elf_path.to_owned(),
            bases,
            ..Self::default()
        };

        index.symbols = SymbolTable::parse(&dump.symbols()?);
        index.dies = match dump.dwarf_info() {
            Ok(text) => dwarf::parse_info(&text),
            Err(e) => {
                tracing::debug!(error = %e, "no dwarf info dump");
                DieStore::default()
            }
        };
        index.fdes = match dump.frames() {
            Ok(text) => cfi::parse_frames(&text),
            Err(e) => {
                tracing::debug!(error = %e, "no frames dump");
                Vec::new()
            }
        };

        if index.dies.is_empty() {
            index.load_stabs(dump);
        }
        index.build_variables();

        if e9k_common::print_perf_enabled() {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                nodes = index.dies.len(),
                symbols = index.symbols.len(),
                variables = index.variables.len(),
                fdes = index.fdes.len(),
                "debug info loaded"
            );
        }
        Ok(index)
    }

    fn load_stabs(&mut self, dump: &dyn DumpSource) {
        let (data_size, bss_size) = match dump.section_headers() {
            Ok(text) => stabs::parse_section_sizes(&text),
            Err(_) => (0, 0),
        };
        let sections = StabsSections {
            data_base: self.bases.data,
            data_size,
            bss_base: self.bases.bss,
            bss_size,
        };
        let text = match dump.stabs() {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "no stabs dump");
                return;
            }
        };
        for var in stabs::parse_stabs(&text, sections, e9k_common::stabs_prefer_data()) {
            if self.symbols.get(&var.name).is_none() {
                self.symbols.push(&var.name, var.addr);
            }
            self.variables.push(Variable {
                name: var.name,
                addr: var.addr,
                type_ref: None,
                byte_size: var.byte_size,
            });
        }
    }

    /// Distills globals from `variable` DIEs: named, typed, with an
    /// address from the location expression or the symbol table.
    fn build_variables(&mut self) {
        for node in self.dies.iter() {
            if node.tag != DwarfTag::Variable {
                continue;
            }
            let (Some(name), Some(type_ref)) = (node.name.as_deref(), node.type_ref) else {
                continue;
            };
            let addr = match node.location {
                DieLocation::Addr(addr) => Some(mask24(addr as u32)),
                _ => self.symbols.addr_of(name),
            };
            let Some(addr) = addr else { continue };
            self.variables.push(Variable {
                name: name.to_owned(),
                addr,
                type_ref: Some(type_ref),
                byte_size: None,
            });
        }
    }

    /// Exact-name lookup of a distilled global.
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Type of the DIE at `offset` (memoized).
    pub fn type_for_die(&mut self, offset: u32) -> Option<TypeId> {
        self.types.type_for_die(&self.dies, offset)
    }

    /// Canonical frame address at `pc`.
    pub fn compute_cfa(&self, pc: u32, reg: &dyn Fn(u8) -> Option<u32>) -> Option<u32> {
        cfi::compute_cfa(&self.fdes, pc, reg)
    }
}

/// Lazy, cache-keyed loading of [`DebugIndex`].
///
/// The index is rebuilt only when the ELF path or the section bases
/// change; repeated `print` commands hit the cache.
#[derive(Debug, Default)]
pub struct DebugSession {
    cached: Option<DebugIndex>,
}

impl DebugSession {
    /// Returns the index for `(elf_path, bases)`, loading it if the
    /// cached one is stale.
    pub fn index(
        &mut self,
        dump: &dyn DumpSource,
        elf_path: &Path,
        bases: SectionBases,
    ) -> Result<&mut DebugIndex, DebugInfoError> {
        let stale = match &self.cached {
            Some(index) => index.elf_path != elf_path || index.bases != bases,
            None => true,
        };
        if stale {
            tracing::debug!(elf = %elf_path.display(), ?bases, "loading debug info");
            self.cached = Some(DebugIndex::load(dump, elf_path, bases)?);
        }
        Ok(self.cached.as_mut().unwrap())
    }

    /// Drops the cached index, forcing a reload on next use.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// The cached index, if one is loaded.
    pub fn cached(&mut self) -> Option<&mut DebugIndex> {
        self.cached.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DebugInfoErrorKind;

    struct CannedDump {
        symbols: &'static str,
        dwarf: Option<&'static str>,
        stabs: Option<&'static str>,
    }

    impl DumpSource for CannedDump {
        fn symbols(&self) -> Result<String, DebugInfoError> {
            Ok(self.symbols.to_owned())
        }

        fn dwarf_info(&self) -> Result<String, DebugInfoError> {
            self.dwarf
                .map(str::to_owned)
                .ok_or_else(|| DebugInfoErrorKind::Tool.into())
        }

        fn frames(&self) -> Result<String, DebugInfoError> {
            Err(DebugInfoErrorKind::Tool.into())
        }

        fn stabs(&self) -> Result<String, DebugInfoError> {
            self.stabs
                .map(str::to_owned)
                .ok_or_else(|| DebugInfoErrorKind::Tool.into())
        }

        fn section_headers(&self) -> Result<String, DebugInfoError> {
            Ok("  1 .data 00001000 00104000\n  2 .bss 00001000 00100000\n".to_owned())
        }

        fn line_listing(&self) -> Result<String, DebugInfoError> {
            Err(DebugInfoErrorKind::Tool.into())
        }
    }

    const SYMS: &str = "\
00000400 g     F .text\t0000012c main
0010020a g     O .bss\t00000002 player_hp
";

    const DWARF: &str = "\
  Compilation Unit @ offset 0x0:
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 2
    <22>   DW_AT_encoding    : 7\t(unsigned)
    <23>   DW_AT_name        : short unsigned int
 <1><2d>: Abbrev Number: 4 (DW_TAG_variable)
    <2e>   DW_AT_name        : player_hp
    <33>   DW_AT_type        : <0x20>
    <37>   DW_AT_location    : 5 byte block: 3 a 20 10 0 \t(DW_OP_addr: 10020a)
 <1><45>: Abbrev Number: 4 (DW_TAG_variable)
    <46>   DW_AT_name        : no_location
    <4a>   DW_AT_type        : <0x20>
";

    const STABS_TEXT: &str = "\
Symnum n_type n_othr n_desc n_value  n_strx String

1      LSYM   0      0      00000000 20     int:t1=r1;-2147483648;2147483647;@s32;
2      STSYM  0      0      00000010 120    score:S1
";

    #[test]
    fn test_dwarf_pipeline() {
        let dump = CannedDump {
            symbols: SYMS,
            dwarf: Some(DWARF),
            stabs: None,
        };
        let index =
            DebugIndex::load(&dump, Path::new("game.elf"), SectionBases::default()).unwrap();
        let hp = index.find_variable("player_hp").unwrap();
        assert_eq!(hp.addr, 0x10020a);
        assert_eq!(hp.type_ref, Some(0x20));
        // A variable without a location falls back to the symbol table;
        // no_location has no symbol, so it is dropped.
        assert!(index.find_variable("no_location").is_none());
    }

    #[test]
    fn test_stabs_fallback_when_no_dies() {
        let dump = CannedDump {
            symbols: SYMS,
            dwarf: None,
            stabs: Some(STABS_TEXT),
        };
        let bases = SectionBases {
            text: 0x400,
            data: 0x0010_4000,
            bss: 0x0010_0000,
        };
        let index = DebugIndex::load(&dump, Path::new("game.elf"), bases).unwrap();
        let score = index.find_variable("score").unwrap();
        assert_eq!(score.addr, 0x0010_0010);
        assert_eq!(score.byte_size, Some(4));
        // The fallback also feeds the symbol table.
        assert_eq!(index.symbols.addr_of("score"), Some(0x0010_0010));
    }

    #[test]
    fn test_session_cache() {
        let dump = CannedDump {
            symbols: SYMS,
            dwarf: Some(DWARF),
            stabs: None,
        };
        let mut session = DebugSession::default();
        let bases = SectionBases::default();
        session.index(&dump, Path::new("game.elf"), bases).unwrap();
        let first = session.cached().unwrap() as *const DebugIndex;
        session.index(&dump, Path::new("game.elf"), bases).unwrap();
        let second = session.cached().unwrap() as *const DebugIndex;
        assert_eq!(first, second);

        let moved = SectionBases {
            text: 0x1000,
            ..bases
        };
        session.index(&dump, Path::new("game.elf"), moved).unwrap();
        assert_eq!(session.cached().unwrap().bases, moved);
    }
}
