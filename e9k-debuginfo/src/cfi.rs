//! Call-frame information from `readelf --debug-dump=frames`.
//!
//! Only the CFA side of the CFI program is materialized: for every FDE a
//! sorted table of `(loc, cfa_reg, cfa_offset)` rows, produced by playing
//! the `DW_CFA_advance_loc*` / `DW_CFA_def_cfa*` instructions. Register
//! save rules are not needed — the evaluator only ever asks "what is the
//! CFA at this pc".

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// One row of an FDE's CFA table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CfiRow {
    /// First pc this row applies to.
    pub loc: u32,
    pub cfa_reg: u8,
    pub cfa_offset: i32,
}

/// One frame description entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fde {
    pub pc_start: u32,
    pub pc_end: u32,
    /// CFA rule inherited from the CIE, in effect before the first row.
    pub default_cfa_reg: u8,
    pub default_cfa_offset: i32,
    /// Rows sorted by `loc`.
    pub rows: Vec<CfiRow>,
}

impl Fde {
    /// The CFA rule in effect at `pc`: the last row whose `loc <= pc`, or
    /// the CIE default.
    pub fn rule_at(&self, pc: u32) -> (u8, i32) {
        let mut rule = (self.default_cfa_reg, self.default_cfa_offset);
        for row in &self.rows {
            if row.loc <= pc {
                rule = (row.cfa_reg, row.cfa_offset);
            } else {
                break;
            }
        }
        rule
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct CieDefaults {
    cfa_reg: u8,
    cfa_offset: i32,
}

static CIE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9a-fA-F]+)\s+[0-9a-fA-F]+\s+[0-9a-fA-F]+\s+CIE").unwrap());
static FDE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9a-fA-F]+)\s+[0-9a-fA-F]+\s+[0-9a-fA-F]+\s+FDE\s+cie=([0-9a-fA-F]+)\s+pc=([0-9a-fA-F]+)\.\.([0-9a-fA-F]+)",
    )
    .unwrap()
});
static DEF_CFA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_CFA_def_cfa:\s*r(\d+)\s+ofs\s+(-?\d+)").unwrap());
static DEF_CFA_REG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_CFA_def_cfa_register:\s*r(\d+)").unwrap());
static DEF_CFA_OFS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_CFA_def_cfa_offset:\s*(-?\d+)").unwrap());
static ADVANCE_LOC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_CFA_advance_loc\d?:\s*\d+\s+to\s+([0-9a-fA-F]+)").unwrap());

enum Block {
    None,
    Cie(CieDefaults),
    Fde {
        fde: Fde,
        loc: u32,
        cfa_reg: u8,
        cfa_offset: i32,
    },
}

/// Parses a full `readelf --debug-dump=frames` dump into FDEs.
pub fn parse_frames(text: &str) -> Vec<Fde> {
    let mut cies: HashMap<u32, CieDefaults> = HashMap::new();
    let mut fdes = Vec::new();
    let mut block = Block::None;

    fn push_row(fde: &mut Fde, loc: u32, cfa_reg: u8, cfa_offset: i32) {
        match fde.rows.last_mut() {
            Some(last) if last.loc == loc => {
                last.cfa_reg = cfa_reg;
                last.cfa_offset = cfa_offset;
            }
            _ => fde.rows.push(CfiRow {
                loc,
                cfa_reg,
                cfa_offset,
            }),
        }
    }

    fn finish(
        cies: &mut HashMap<u32, CieDefaults>,
        fdes: &mut Vec<Fde>,
        block: &mut Block,
        cie_offset: Option<u32>,
    ) {
        match std::mem::replace(block, Block::None) {
            Block::None => {}
            Block::Cie(defaults) => {
                if let Some(offset) = cie_offset {
                    cies.insert(offset, defaults);
                }
            }
            Block::Fde { fde, .. } => fdes.push(fde),
        }
    }

    let mut current_cie_offset = None;

    for line in text.lines() {
        if let Some(captures) = CIE_HEADER.captures(line) {
            finish(&mut cies, &mut fdes, &mut block, current_cie_offset);
            current_cie_offset = u32::from_str_radix(&captures[1], 16).ok();
            block = Block::Cie(CieDefaults::default());
            continue;
        }
        if let Some(captures) = FDE_HEADER.captures(line) {
            finish(&mut cies, &mut fdes, &mut block, current_cie_offset);
            current_cie_offset = None;
            let cie_ref = u32::from_str_radix(&captures[2], 16).unwrap_or(0);
            let pc_start = u32::from_str_radix(&captures[3], 16).unwrap_or(0);
            let pc_end = u32::from_str_radix(&captures[4], 16).unwrap_or(0);
            let defaults = cies.get(&cie_ref).copied().unwrap_or_default();
            block = Block::Fde {
                fde: Fde {
                    pc_start,
                    pc_end,
                    default_cfa_reg: defaults.cfa_reg,
                    default_cfa_offset: defaults.cfa_offset,
                    rows: Vec::new(),
                },
                loc: pc_start,
                cfa_reg: defaults.cfa_reg,
                cfa_offset: defaults.cfa_offset,
            };
            continue;
        }

        match &mut block {
            Block::Cie(defaults) => {
                if let Some(captures) = DEF_CFA.captures(line) {
                    defaults.cfa_reg = captures[1].parse::<u32>().unwrap_or(0).min(255) as u8;
                    defaults.cfa_offset = captures[2].parse().unwrap_or(0);
                }
            }
            Block::Fde {
                fde,
                loc,
                cfa_reg,
                cfa_offset,
            } => {
                if let Some(captures) = ADVANCE_LOC.captures(line) {
                    if let Ok(next) = u32::from_str_radix(&captures[1], 16) {
                        *loc = next;
                    }
                } else if let Some(captures) = DEF_CFA.captures(line) {
                    *cfa_reg = captures[1].parse::<u32>().unwrap_or(0).min(255) as u8;
                    *cfa_offset = captures[2].parse().unwrap_or(0);
                    push_row(fde, *loc, *cfa_reg, *cfa_offset);
                } else if let Some(captures) = DEF_CFA_REG.captures(line) {
                    *cfa_reg = captures[1].parse::<u32>().unwrap_or(0).min(255) as u8;
                    push_row(fde, *loc, *cfa_reg, *cfa_offset);
                } else if let Some(captures) = DEF_CFA_OFS.captures(line) {
                    *cfa_offset = captures[1].parse().unwrap_or(0);
                    push_row(fde, *loc, *cfa_reg, *cfa_offset);
                }
            }
            Block::None => {}
        }
    }
    finish(&mut cies, &mut fdes, &mut block, current_cie_offset);
    fdes
}

/// Computes the canonical frame address at `pc`.
///
/// `reg` resolves a DWARF register number to its live value. Returns
/// `None` if no FDE covers `pc` or the register is unreadable.
pub fn compute_cfa(fdes: &[Fde], pc: u32, reg: &dyn Fn(u8) -> Option<u32>) -> Option<u32> {
    let fde = fdes
        .iter()
        .find(|fde| pc >= fde.pc_start && pc < fde.pc_end)?;
    let (cfa_reg, cfa_offset) = fde.rule_at(pc);
    let base = reg(cfa_reg)?;
    Some((base as i64 + cfa_offset as i64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
Contents of the .debug_frame section:

00000000 0000000c ffffffff CIE
  Version:               1
  Augmentation:          \"\"
  Code alignment factor: 2
  Data alignment factor: -4
  Return address column: 24
  DW_CFA_def_cfa: r15 ofs 4
  DW_CFA_nop

00000010 00000018 00000000 FDE cie=00000000 pc=0000052c..00000570
  DW_CFA_advance_loc: 4 to 00000530
  DW_CFA_def_cfa_offset: 12
  DW_CFA_advance_loc: 2 to 00000532
  DW_CFA_def_cfa_register: r14
  DW_CFA_advance_loc: 6 to 00000538
  DW_CFA_def_cfa: r15 ofs 4

00000030 00000010 00000000 FDE cie=00000000 pc=00000400..0000052c
  DW_CFA_advance_loc: 4 to 00000404
  DW_CFA_def_cfa_offset: 8
";

    #[test]
    fn test_parse() {
        let fdes = parse_frames(DUMP);
        assert_eq!(fdes.len(), 2);
        let fde = &fdes[0];
        assert_eq!(fde.pc_start, 0x52c);
        assert_eq!(fde.pc_end, 0x570);
        assert_eq!(fde.default_cfa_reg, 15);
        assert_eq!(fde.default_cfa_offset, 4);
        assert_eq!(
            fde.rows,
            vec![
                CfiRow { loc: 0x530, cfa_reg: 15, cfa_offset: 12 },
                CfiRow { loc: 0x532, cfa_reg: 14, cfa_offset: 12 },
                CfiRow { loc: 0x538, cfa_reg: 15, cfa_offset: 4 },
            ]
        );
    }

    #[test]
    fn test_rule_at() {
        let fdes = parse_frames(DUMP);
        let fde = &fdes[0];
        assert_eq!(fde.rule_at(0x52c), (15, 4));
        assert_eq!(fde.rule_at(0x530), (15, 12));
        assert_eq!(fde.rule_at(0x533), (14, 12));
        assert_eq!(fde.rule_at(0x56e), (15, 4));
    }

    #[test]
    fn test_every_pc_has_a_rule() {
        // For every pc in an FDE the effective row's loc never exceeds
        // the pc, and the rule only changes at documented advance points.
        let fdes = parse_frames(DUMP);
        let fde = &fdes[0];
        let mut prev = fde.rule_at(fde.pc_start);
        for pc in (fde.pc_start..fde.pc_end).step_by(2) {
            let rule = fde.rule_at(pc);
            if rule != prev {
                assert!(fde.rows.iter().any(|row| row.loc == pc));
                prev = rule;
            }
        }
    }

    #[test]
    fn test_compute_cfa() {
        let fdes = parse_frames(DUMP);
        // r15 = A7 = 0x10ff00.
        let reg = |r: u8| match r {
            15 => Some(0x0010_ff00),
            14 => Some(0x0010_ff80),
            _ => None,
        };
        assert_eq!(compute_cfa(&fdes, 0x52c, &reg), Some(0x0010_ff04));
        assert_eq!(compute_cfa(&fdes, 0x530, &reg), Some(0x0010_ff0c));
        assert_eq!(compute_cfa(&fdes, 0x534, &reg), Some(0x0010_ff8c));
        assert_eq!(compute_cfa(&fdes, 0x2000, &reg), None);
    }
}
