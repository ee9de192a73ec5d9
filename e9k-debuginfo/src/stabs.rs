//! STABS fallback for toolchains that do not emit DWARF.
//!
//! Parses `objdump -G` output. Only two record families matter here:
//! `LSYM` type definitions, which yield sizes (`@s<bits>`) and aliases
//! (`t<id>=<id>`), and `STSYM`/`LCSYM` global/static symbols, whose
//! `n_value` is an offset into `.data` or `.bss`.
//!
//! Section attribution is heuristic on this toolchain: `LCSYM` belongs to
//! `.bss`; `STSYM` defaults to `.bss` unless `E9K_STABS_PREFER_DATA` is
//! set, and flips to the other section when its offset overflows the
//! section size reported by `objdump -h`.

use e9k_common::mask24;

/// A global produced by the STABS pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabsVariable {
    pub name: String,
    pub addr: u32,
    pub byte_size: Option<usize>,
}

/// Bases and sizes of the sections STABS offsets are relative to.
#[derive(Clone, Copy, Debug, Default)]
pub struct StabsSections {
    pub data_base: u32,
    pub data_size: u32,
    pub bss_base: u32,
    pub bss_size: u32,
}

/// Parses `.data`/`.bss` sizes from `objdump -h` output.
pub fn parse_section_sizes(text: &str) -> (u32, u32) {
    let mut data_size = 0;
    let mut bss_size = 0;
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || tokens[0].parse::<u32>().is_err() {
            continue;
        }
        let Ok(size) = u32::from_str_radix(tokens[2], 16) else {
            continue;
        };
        match tokens[1] {
            ".data" => data_size = size,
            ".bss" => bss_size = size,
            _ => {}
        }
    }
    (data_size, bss_size)
}

#[derive(Clone, Copy, Debug, Default)]
struct TypeDef {
    alias: u32,
    bits: u32,
}

/// `name:t<id>=<alias>` or `name:t<id>=...@s<bits>...`
fn parse_type_def(stab_str: &str) -> Option<(u32, TypeDef)> {
    let after = stab_str.split(":t").nth(1)?;
    let digits_end = after
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after.len());
    let type_id: u32 = after[..digits_end].parse().ok()?;
    let rest = after[digits_end..].strip_prefix('=')?;

    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let alias_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let alias = rest[..alias_end].parse().ok()?;
        return Some((type_id, TypeDef { alias, bits: 0 }));
    }
    let size = rest.split("@s").nth(1)?;
    let bits_end = size
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(size.len());
    let bits = size[..bits_end].parse().ok()?;
    Some((type_id, TypeDef { alias: 0, bits }))
}

/// The type id referenced by a variable stab string (`name:S<id>` etc.).
fn parse_var_type_id(stab_str: &str) -> Option<u32> {
    let after_colon = stab_str.split(':').nth(1)?;
    let mut chars = after_colon.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    let rest = chars.as_str();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    rest[..digits_end].parse().ok()
}

fn resolve_bits(defs: &[TypeDef], mut id: u32) -> u32 {
    for _ in 0..64 {
        let Some(def) = defs.get(id as usize) else {
            return 0;
        };
        if def.bits != 0 {
            return def.bits;
        }
        if def.alias == 0 || def.alias == id {
            return 0;
        }
        id = def.alias;
    }
    0
}

/// Parses `objdump -G` output into globals.
///
/// `prefer_data` controls the `STSYM` section default (see module docs).
pub fn parse_stabs(text: &str, sections: StabsSections, prefer_data: bool) -> Vec<StabsVariable> {
    let mut defs: Vec<TypeDef> = Vec::new();
    let mut pending: Vec<(String, u32, u32)> = Vec::new();

    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 7 {
            continue;
        }
        let stab_type = tokens[1];
        let stab_str = tokens[tokens.len() - 1];

        if stab_type == "LSYM" {
            if let Some((type_id, def)) = parse_type_def(stab_str) {
                let needed = type_id as usize + 1;
                if defs.len() < needed {
                    defs.resize(needed, TypeDef::default());
                }
                if def.alias != 0 {
                    defs[type_id as usize].alias = def.alias;
                }
                if def.bits != 0 {
                    defs[type_id as usize].bits = def.bits;
                }
            }
            continue;
        }
        if stab_type != "STSYM" && stab_type != "LCSYM" {
            continue;
        }

        let Ok(n_value) = u32::from_str_radix(tokens[4], 16) else {
            continue;
        };
        let Some(name) = stab_str.split(':').next().filter(|n| !n.is_empty()) else {
            continue;
        };
        let type_id = parse_var_type_id(stab_str).unwrap_or(0);

        let mut base = if stab_type == "LCSYM" {
            sections.bss_base
        } else if prefer_data {
            if sections.data_base != 0 {
                sections.data_base
            } else {
                sections.bss_base
            }
        } else if sections.bss_base != 0 {
            sections.bss_base
        } else {
            sections.data_base
        };

        // Flip on range overflow of the chosen section.
        if base == sections.data_base
            && sections.data_size != 0
            && n_value >= sections.data_size
            && sections.bss_base != 0
            && (sections.bss_size == 0 || n_value < sections.bss_size)
        {
            base = sections.bss_base;
        } else if base == sections.bss_base
            && sections.bss_size != 0
            && n_value >= sections.bss_size
            && sections.data_base != 0
            && (sections.data_size == 0 || n_value < sections.data_size)
        {
            base = sections.data_base;
        }
        if base == 0 {
            tracing::debug!(name, n_value, "stabs symbol has no section base");
            continue;
        }

        pending.push((name.to_owned(), mask24(base + n_value), type_id));
    }

    let mut vars: Vec<StabsVariable> = Vec::new();
    for (name, addr, type_id) in pending {
        if vars.iter().any(|v| v.name == name) {
            continue;
        }
        let bits = if type_id != 0 {
            resolve_bits(&defs, type_id)
        } else {
            0
        };
        let byte_size = (bits != 0 && bits % 8 == 0).then(|| (bits / 8) as usize);
        vars.push(StabsVariable {
            name,
            addr,
            byte_size,
        });
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    const STABS: &str = "\
game.elf:     file format elf32-m68k

Contents of .stab section:

Symnum n_type n_othr n_desc n_value  n_strx String

-1     HdrSym 0      58     00000934 1
0      SO     0      0      00000400 1      game.c
1      LSYM   0      0      00000000 20     int:t1=r1;-2147483648;2147483647;@s32;
2      LSYM   0      0      00000000 58     short:t2=r2;-32768;32767;@s16;
3      LSYM   0      0      00000000 90     hp_t:t3=2
4      STSYM  0      0      00000010 120    player_hp:S3
5      LCSYM  0      0      00000020 140    frame_count:S1
6      STSYM  0      0      00009000 160    big_table:S1
";

    const SECTIONS: StabsSections = StabsSections {
        data_base: 0x0010_4000,
        data_size: 0xa000,
        bss_base: 0x0010_0000,
        bss_size: 0x1000,
    };

    #[test]
    fn test_parse_section_sizes() {
        let dump = "\
Sections:
Idx Name          Size      VMA       LMA       File off  Algn
  0 .text         0000012c  00000400  00000400  00000074  2**2
  1 .data         0000a000  00104000  00104000  000001a0  2**2
  2 .bss          00001000  00100000  00100000  000001a0  2**2
";
        assert_eq!(parse_section_sizes(dump), (0xa000, 0x1000));
    }

    #[test]
    fn test_stsym_defaults_to_bss() {
        let vars = parse_stabs(STABS, SECTIONS, false);
        let hp = vars.iter().find(|v| v.name == "player_hp").unwrap();
        assert_eq!(hp.addr, 0x0010_0010);
        // hp_t aliases short via t3=2.
        assert_eq!(hp.byte_size, Some(2));
    }

    #[test]
    fn test_prefer_data_override() {
        let vars = parse_stabs(STABS, SECTIONS, true);
        let hp = vars.iter().find(|v| v.name == "player_hp").unwrap();
        assert_eq!(hp.addr, 0x0010_4010);
    }

    #[test]
    fn test_lcsym_is_bss() {
        let vars = parse_stabs(STABS, SECTIONS, true);
        let frames = vars.iter().find(|v| v.name == "frame_count").unwrap();
        assert_eq!(frames.addr, 0x0010_0020);
        assert_eq!(frames.byte_size, Some(4));
    }

    #[test]
    fn test_range_overflow_flips_section() {
        // 0x9000 overflows .bss (0x1000) but fits .data (0xa000).
        let vars = parse_stabs(STABS, SECTIONS, false);
        let big = vars.iter().find(|v| v.name == "big_table").unwrap();
        assert_eq!(big.addr, 0x0010_4000 + 0x9000);
    }
}
