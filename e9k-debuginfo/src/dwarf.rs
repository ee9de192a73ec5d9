//! Parsing of `readelf --debug-dump=info` output into a DIE tree.
//!
//! The dump is processed line by line: a line is either a compilation-unit
//! header, a DIE header (`<depth><offset>: ... (DW_TAG_xxx)`), or an
//! attribute of the most recent DIE (`DW_AT_xxx : value`). Attribute
//! decoders only recognize the subset of DWARF 2–4 the evaluator needs;
//! unknown tags and attributes are skipped.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// The DIE tags the index cares about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DwarfTag {
    #[default]
    Unknown,
    CompileUnit,
    BaseType,
    PointerType,
    StructureType,
    Member,
    ArrayType,
    SubrangeType,
    Typedef,
    ConstType,
    VolatileType,
    EnumerationType,
    Enumerator,
    Subprogram,
    LexicalBlock,
    InlinedSubroutine,
    FormalParameter,
    Variable,
}

impl DwarfTag {
    fn from_name(name: &str) -> Self {
        match name {
            "DW_TAG_compile_unit" => Self::CompileUnit,
            "DW_TAG_base_type" => Self::BaseType,
            "DW_TAG_pointer_type" => Self::PointerType,
            "DW_TAG_structure_type" => Self::StructureType,
            "DW_TAG_member" => Self::Member,
            "DW_TAG_array_type" => Self::ArrayType,
            "DW_TAG_subrange_type" => Self::SubrangeType,
            "DW_TAG_typedef" => Self::Typedef,
            "DW_TAG_const_type" => Self::ConstType,
            "DW_TAG_volatile_type" => Self::VolatileType,
            "DW_TAG_enumeration_type" => Self::EnumerationType,
            "DW_TAG_enumerator" => Self::Enumerator,
            "DW_TAG_subprogram" => Self::Subprogram,
            "DW_TAG_lexical_block" => Self::LexicalBlock,
            "DW_TAG_inlined_subroutine" => Self::InlinedSubroutine,
            "DW_TAG_formal_parameter" => Self::FormalParameter,
            "DW_TAG_variable" => Self::Variable,
            _ => Self::Unknown,
        }
    }

    /// True for the tags that open a PC scope.
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            Self::Subprogram | Self::LexicalBlock | Self::InlinedSubroutine
        )
    }
}

/// `DW_AT_encoding` of a base type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseEncoding {
    #[default]
    Unknown,
    Signed,
    Unsigned,
    Float,
    Boolean,
}

/// Decoded `DW_AT_location` (or `DW_AT_const_value`) of a DIE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DieLocation {
    #[default]
    None,
    /// `DW_OP_addr`: a fixed address.
    Addr(u64),
    /// `DW_OP_addr; DW_OP_stack_value`: a constant value.
    Const(u64),
    /// `DW_OP_fbreg <offset>`: frame base plus offset.
    Fbreg(i32),
    /// `DW_OP_bregN <offset>`: register plus offset.
    Breg { reg: u8, offset: i32 },
    /// `DW_OP_regN`: the value lives in a register.
    Reg(u8),
    /// `DW_OP_call_frame_cfa`.
    Cfa,
}

/// One debugging information entry.
#[derive(Clone, Debug, Default)]
pub struct DieNode {
    /// Offset within the dump; unique key of the DIE.
    pub offset: u32,
    /// Offset of the parent DIE (0 for roots).
    pub parent_offset: u32,
    /// CU-relative aliases of `offset`. Some toolchains emit type
    /// references relative to the compilation unit, so lookups accept
    /// these as well.
    pub alt_offsets: Vec<u32>,
    pub tag: DwarfTag,
    pub name: Option<String>,
    pub abstract_origin: Option<u32>,
    pub type_ref: Option<u32>,
    pub byte_size: Option<u64>,
    pub low_pc: Option<u64>,
    pub high_pc: Option<u64>,
    /// True when `DW_AT_high_pc` encodes a length rather than an address.
    pub high_pc_is_offset: bool,
    pub member_offset: Option<i64>,
    pub upper_bound: Option<i64>,
    pub count: Option<i64>,
    pub encoding: BaseEncoding,
    pub location: DieLocation,
    /// Whether `DW_AT_frame_base` is `DW_OP_call_frame_cfa`.
    pub frame_base_is_cfa: bool,
    /// Nesting depth in the DIE tree.
    pub depth: u8,
}

impl DieNode {
    /// The `[low_pc, high_pc)` range, resolving the offset encoding.
    pub fn pc_range(&self) -> Option<(u64, u64)> {
        let low = self.low_pc?;
        let high = self.high_pc?;
        let end = if self.high_pc_is_offset { low + high } else { high };
        Some((low, end))
    }

    /// True if `pc` falls inside this DIE's range.
    pub fn contains_pc(&self, pc: u32) -> bool {
        match self.pc_range() {
            Some((low, end)) => (pc as u64) >= low && (pc as u64) < end,
            None => false,
        }
    }
}

/// The parsed DIE tree with offset lookup.
#[derive(Clone, Debug, Default)]
pub struct DieStore {
    nodes: Vec<DieNode>,
    by_offset: HashMap<u32, usize>,
}

impl DieStore {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DieNode> {
        self.nodes.iter()
    }

    /// Looks a DIE up by offset, accepting CU-relative aliases.
    pub fn get(&self, offset: u32) -> Option<&DieNode> {
        self.by_offset.get(&offset).map(|&i| &self.nodes[i])
    }

    /// Iterates the direct children of the DIE at `offset`.
    pub fn children_of(&self, offset: u32) -> impl Iterator<Item = &DieNode> {
        self.nodes.iter().filter(move |n| n.parent_offset == offset)
    }

    fn push(&mut self, node: DieNode) -> usize {
        let index = self.nodes.len();
        self.by_offset.entry(node.offset).or_insert(index);
        for &alt in &node.alt_offsets {
            self.by_offset.entry(alt).or_insert(index);
        }
        self.nodes.push(node);
        index
    }
}

fn parse_die_header(line: &str) -> Option<(u8, u32, DwarfTag)> {
    static HEADER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"<(\d+)><([0-9a-fA-F]+)>").unwrap());
    static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"DW_TAG_\w+").unwrap());

    let captures = HEADER.captures(line)?;
    let depth: u32 = captures[1].parse().ok()?;
    let offset = u32::from_str_radix(&captures[2], 16).ok()?;
    let tag = TAG.find(line)?;
    Some((
        depth.min(255) as u8,
        offset,
        DwarfTag::from_name(tag.as_str()),
    ))
}

fn parse_cu_offset(line: &str) -> Option<u32> {
    let rest = line.split("Compilation Unit @ offset ").nth(1)?;
    let rest = rest.trim_start();
    let digits = rest.strip_prefix("0x").unwrap_or(rest);
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    u32::from_str_radix(&digits[..end], 16).ok()
}

/// Extracts the attribute value as a number, preferring text after the
/// attribute separator so DIE offsets like `<11a56>` are not mistaken for
/// the value.
fn parse_first_number(line: &str) -> Option<u64> {
    let start = match line.find("DW_AT_") {
        Some(at) => match line[at..].find(':') {
            Some(colon) => at + colon + 1,
            None => 0,
        },
        None => line.find(':').map(|c| c + 1).unwrap_or(0),
    };
    let rest = &line[start..];
    static NUMBER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(0[xX][0-9a-fA-F]+|\d+)").unwrap());
    let m = NUMBER.find(rest)?;
    let text = m.as_str();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Extracts a `<offset>` DIE reference (the last one on the line).
fn parse_die_ref(line: &str) -> Option<u32> {
    let open = line.rfind('<')?;
    let close = line[open + 1..].find('>')? + open + 1;
    let body = &line[open + 1..close];
    let body = body.strip_prefix("0x").unwrap_or(body);
    u32::from_str_radix(body, 16).ok()
}

/// The attribute value after the last colon, trimmed. Handles indirect
/// strings, whose lines carry a second `offset:` colon.
fn parse_name_value(line: &str) -> Option<String> {
    let colon = line.rfind(':')?;
    let value = line[colon + 1..].trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn parse_encoding(line: &str) -> BaseEncoding {
    if line.contains("DW_ATE_signed") {
        BaseEncoding::Signed
    } else if line.contains("DW_ATE_unsigned") {
        BaseEncoding::Unsigned
    } else if line.contains("DW_ATE_float") {
        BaseEncoding::Float
    } else if line.contains("DW_ATE_boolean") {
        BaseEncoding::Boolean
    } else {
        BaseEncoding::Unknown
    }
}

static OP_FBREG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_OP_fbreg:?\s*(-?\d+)").unwrap());
static OP_BREG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_OP_breg(\d+)[^:]*:\s*(-?\d+)").unwrap());
static OP_REG: Lazy<Regex> = Lazy::new(|| Regex::new(r"DW_OP_reg(\d+)").unwrap());
static OP_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DW_OP_addr:?\s*(?:0x)?([0-9a-fA-F]+)").unwrap());
static BARE_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x([0-9a-fA-F]+)").unwrap());

/// Decodes a `DW_AT_location` expression line.
fn parse_location(line: &str) -> DieLocation {
    if line.contains("location list") {
        return DieLocation::None;
    }
    if line.contains("DW_OP_stack_value") {
        if let Some(captures) = OP_ADDR.captures(line) {
            if let Ok(value) = u64::from_str_radix(&captures[1], 16) {
                return DieLocation::Const(value);
            }
        }
        return DieLocation::None;
    }
    if let Some(captures) = OP_FBREG.captures(line) {
        if let Ok(offset) = captures[1].parse() {
            return DieLocation::Fbreg(offset);
        }
    }
    if let Some(captures) = OP_BREG.captures(line) {
        if let (Ok(reg), Ok(offset)) = (captures[1].parse::<u32>(), captures[2].parse()) {
            return DieLocation::Breg {
                reg: reg.min(255) as u8,
                offset,
            };
        }
    }
    if let Some(captures) = OP_REG.captures(line) {
        if let Ok(reg) = captures[1].parse::<u32>() {
            return DieLocation::Reg(reg.min(255) as u8);
        }
    }
    if line.contains("DW_OP_call_frame_cfa") {
        return DieLocation::Cfa;
    }
    if let Some(captures) = OP_ADDR.captures(line) {
        if let Ok(addr) = u64::from_str_radix(&captures[1], 16) {
            return DieLocation::Addr(addr);
        }
    }
    // Some dumps print the address without a DW_OP prefix.
    if let Some(captures) = BARE_ADDR.captures(line) {
        if let Ok(addr) = u64::from_str_radix(&captures[1], 16) {
            return DieLocation::Addr(addr);
        }
    }
    DieLocation::None
}

fn apply_attribute(node: &mut DieNode, line: &str) {
    if line.contains("DW_AT_abstract_origin") {
        node.abstract_origin = parse_die_ref(line);
    } else if line.contains("DW_AT_name") {
        if let Some(name) = parse_name_value(line) {
            node.name = Some(name);
        }
    } else if line.contains("DW_AT_type") {
        node.type_ref = parse_die_ref(line).or_else(|| parse_first_number(line).map(|v| v as u32));
    } else if line.contains("DW_AT_low_pc") {
        node.low_pc = parse_first_number(line);
    } else if line.contains("DW_AT_high_pc") {
        if let Some(value) = parse_first_number(line) {
            node.high_pc = Some(value);
            if let Some(low) = node.low_pc {
                if value < low {
                    node.high_pc_is_offset = true;
                }
            }
        }
    } else if line.contains("DW_AT_byte_size") {
        node.byte_size = parse_first_number(line);
    } else if line.contains("DW_AT_frame_base") {
        // Only CFA frame bases are recognized (no frame pointer builds).
        if line.contains("DW_OP_call_frame_cfa") {
            node.frame_base_is_cfa = true;
        }
    } else if line.contains("DW_AT_encoding") {
        node.encoding = parse_encoding(line);
    } else if line.contains("DW_AT_data_member_location") {
        node.member_offset = parse_first_number(line).map(|v| v as i64);
    } else if line.contains("DW_AT_upper_bound") {
        node.upper_bound = parse_first_number(line).map(|v| v as i64);
    } else if line.contains("DW_AT_count") {
        node.count = parse_first_number(line).map(|v| v as i64);
    } else if line.contains("DW_AT_location") {
        match parse_location(line) {
            DieLocation::None => {}
            location => node.location = location,
        }
    }
}

/// Parses a full `readelf --debug-dump=info` dump.
pub fn parse_info(text: &str) -> DieStore {
    let mut store = DieStore::default();
    let mut parent_stack: Vec<(u32, u8)> = Vec::new();
    let mut current: Option<DieNode> = None;
    let mut cu_offset = 0u32;

    fn finish(store: &mut DieStore, node: Option<DieNode>) {
        if let Some(node) = node {
            store.push(node);
        }
    }

    for line in text.lines() {
        if let Some(offset) = parse_cu_offset(line) {
            cu_offset = offset;
            continue;
        }
        if let Some((depth, offset, tag)) = parse_die_header(line) {
            finish(&mut store, current.take());
            while matches!(parent_stack.last(), Some(&(_, d)) if d >= depth) {
                parent_stack.pop();
            }
            let parent_offset = parent_stack.last().map_or(0, |&(off, _)| off);
            parent_stack.push((offset, depth));

            let mut alt_offsets = Vec::new();
            if cu_offset != 0 {
                let alt = offset.wrapping_add(cu_offset);
                if alt != offset {
                    alt_offsets.push(alt);
                }
                if offset >= cu_offset && offset - cu_offset != 0 && offset - cu_offset != offset {
                    alt_offsets.push(offset - cu_offset);
                }
            }

            current = Some(DieNode {
                offset,
                parent_offset,
                alt_offsets,
                tag,
                depth,
                ..DieNode::default()
            });
            continue;
        }
        if let Some(node) = current.as_mut() {
            if line.contains("DW_AT_") {
                apply_attribute(node, line);
            }
        }
    }
    finish(&mut store, current.take());
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
Contents of the .debug_info section:

  Compilation Unit @ offset 0x0:
   Length:        0x1b2 (32-bit)
   Version:       4
   Abbrev Offset: 0x0
   Pointer Size:  4
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
    <c>   DW_AT_name        : (indirect string, offset: 0x10): game.c
    <10>   DW_AT_low_pc      : 0x400
    <14>   DW_AT_high_pc     : 0x1f2
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 4
    <22>   DW_AT_encoding    : 5\t(signed)
    <23>   DW_AT_name        : int
 <1><27>: Abbrev Number: 3 (DW_TAG_pointer_type)
    <28>   DW_AT_byte_size   : 4
    <29>   DW_AT_type        : <0x20>
 <1><2d>: Abbrev Number: 4 (DW_TAG_variable)
    <2e>   DW_AT_name        : player_hp
    <33>   DW_AT_type        : <0x20>
    <37>   DW_AT_location    : 5 byte block: 3 a 20 10 0 \t(DW_OP_addr: 10020a)
 <1><40>: Abbrev Number: 5 (DW_TAG_subprogram)
    <41>   DW_AT_name        : update_player
    <45>   DW_AT_low_pc      : 0x52c
    <49>   DW_AT_high_pc     : 0x44
    <4d>   DW_AT_frame_base  : 1 byte block: 9c \t(DW_OP_call_frame_cfa)
 <2><51>: Abbrev Number: 6 (DW_TAG_formal_parameter)
    <52>   DW_AT_name        : damage
    <56>   DW_AT_type        : <0x20>
    <5a>   DW_AT_location    : 2 byte block: 91 6c \t(DW_OP_fbreg: -20)
 <2><5e>: Abbrev Number: 7 (DW_TAG_variable)
    <5f>   DW_AT_name        : scratch
    <63>   DW_AT_type        : <0x27>
    <67>   DW_AT_location    : 2 byte block: 7e 8 \t(DW_OP_breg14 (a6): 8)
";

    #[test]
    fn test_parse_headers_and_tree() {
        let store = parse_info(DUMP);
        assert_eq!(store.len(), 7);
        let cu = store.get(0xb).unwrap();
        assert_eq!(cu.tag, DwarfTag::CompileUnit);
        assert_eq!(cu.parent_offset, 0);

        let param = store.get(0x51).unwrap();
        assert_eq!(param.tag, DwarfTag::FormalParameter);
        assert_eq!(param.parent_offset, 0x40);
        assert_eq!(param.depth, 2);
    }

    #[test]
    fn test_attributes() {
        let store = parse_info(DUMP);

        let int_type = store.get(0x20).unwrap();
        assert_eq!(int_type.name.as_deref(), Some("int"));
        assert_eq!(int_type.byte_size, Some(4));
        assert_eq!(int_type.encoding, BaseEncoding::Signed);

        let ptr = store.get(0x27).unwrap();
        assert_eq!(ptr.type_ref, Some(0x20));

        let var = store.get(0x2d).unwrap();
        assert_eq!(var.name.as_deref(), Some("player_hp"));
        assert_eq!(var.location, DieLocation::Addr(0x10020a));
    }

    #[test]
    fn test_high_pc_offset_detection() {
        let store = parse_info(DUMP);
        let subprogram = store.get(0x40).unwrap();
        assert!(subprogram.high_pc_is_offset);
        assert_eq!(subprogram.pc_range(), Some((0x52c, 0x570)));
        assert!(subprogram.contains_pc(0x530));
        assert!(!subprogram.contains_pc(0x570));
        assert!(subprogram.frame_base_is_cfa);
    }

    #[test]
    fn test_locations() {
        let store = parse_info(DUMP);
        assert_eq!(store.get(0x51).unwrap().location, DieLocation::Fbreg(-20));
        assert_eq!(
            store.get(0x5e).unwrap().location,
            DieLocation::Breg { reg: 14, offset: 8 }
        );
    }

    #[test]
    fn test_indirect_name() {
        let store = parse_info(DUMP);
        assert_eq!(store.get(0xb).unwrap().name.as_deref(), Some("game.c"));
    }

    #[test]
    fn test_location_variants() {
        assert_eq!(
            parse_location("(DW_OP_addr: 1234; DW_OP_stack_value)"),
            DieLocation::Const(0x1234)
        );
        assert_eq!(
            parse_location("(DW_OP_reg3 (d3))"),
            DieLocation::Reg(3)
        );
        assert_eq!(parse_location("(DW_OP_call_frame_cfa)"), DieLocation::Cfa);
        assert_eq!(parse_location("(location list)"), DieLocation::None);
    }

    #[test]
    fn test_children_of() {
        let store = parse_info(DUMP);
        let kids: Vec<_> = store.children_of(0x40).map(|n| n.offset).collect();
        assert_eq!(kids, vec![0x51, 0x5e]);
    }
}
