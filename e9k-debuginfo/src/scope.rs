//! Scope and frame-local resolution for a paused pc.

use e9k_common::mask24;

use crate::cfi;
use crate::dwarf::{DieLocation, DieNode, DieStore, DwarfTag};
use crate::index::DebugIndex;

/// Where a resolved local lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalPlace {
    /// The local has a guest address.
    Address(u32),
    /// The local is an immediate (constant or register value).
    Immediate(u64),
}

/// A resolved frame local: its place plus the DIE offset of its type, if
/// the DIE carries one.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedLocal {
    pub place: LocalPlace,
    pub type_ref: Option<u32>,
}

/// Picks the deepest scope whose pc range contains `pc`; ties break
/// toward the smaller range.
pub fn find_scope_for_pc(store: &DieStore, pc: u32) -> Option<&DieNode> {
    let mut best: Option<&DieNode> = None;
    let mut best_depth = -1i32;
    let mut best_size = u64::MAX;
    for node in store.iter() {
        if !node.tag.is_scope() || !node.contains_pc(pc) {
            continue;
        }
        let (low, end) = node.pc_range().unwrap();
        let size = end.saturating_sub(low);
        let depth = node.depth as i32;
        if depth > best_depth || (depth == best_depth && size < best_size) {
            best = Some(node);
            best_depth = depth;
            best_size = size;
        }
    }
    best
}

/// Name and type of a DIE, chasing `DW_AT_abstract_origin` when the DIE
/// itself is anonymous (inlined copies).
fn name_and_type<'a>(store: &'a DieStore, node: &'a DieNode) -> (Option<&'a str>, Option<u32>) {
    let mut name = node.name.as_deref();
    let mut type_ref = node.type_ref;
    if name.is_none() || type_ref.is_none() {
        if let Some(origin) = node.abstract_origin.and_then(|o| store.get(o)) {
            if name.is_none() {
                name = origin.name.as_deref();
            }
            if type_ref.is_none() {
                type_ref = origin.type_ref;
            }
        }
    }
    (name, type_ref)
}

/// Resolves a frame local or parameter named `name` at `pc`.
///
/// Walks the scope chain innermost-outward; within each scope, children
/// tagged `variable`/`formal_parameter` are matched by name (following
/// abstract origins). The frame base is the CFA — only
/// `DW_OP_call_frame_cfa` frame bases are recognized.
///
/// `reg` resolves DWARF register numbers to live values.
pub fn resolve_local(
    index: &DebugIndex,
    name: &str,
    pc: u32,
    reg: &dyn Fn(u8) -> Option<u32>,
) -> Option<ResolvedLocal> {
    let cfa = cfi::compute_cfa(&index.fdes, pc, reg)?;
    let store = &index.dies;
    let scope = find_scope_for_pc(store, pc)?;

    // Innermost-outward chain of enclosing scopes.
    let mut chain = Vec::with_capacity(8);
    let mut cursor = Some(scope);
    while let Some(node) = cursor {
        chain.push(node.offset);
        if node.parent_offset == 0 || chain.len() >= 64 {
            break;
        }
        cursor = store.get(node.parent_offset);
    }

    let frame_base = cfa;
    for &scope_offset in &chain {
        for child in store.children_of(scope_offset) {
            if !matches!(child.tag, DwarfTag::Variable | DwarfTag::FormalParameter) {
                continue;
            }
            let (child_name, type_ref) = name_and_type(store, child);
            if child_name != Some(name) {
                continue;
            }
            let place = match child.location {
                DieLocation::Fbreg(offset) => {
                    LocalPlace::Address(mask24((frame_base as i64 + offset as i64) as u32))
                }
                DieLocation::Breg { reg: r, offset } => {
                    let base = reg(r)?;
                    LocalPlace::Address(mask24((base as i64 + offset as i64) as u32))
                }
                DieLocation::Addr(addr) => LocalPlace::Address(mask24(addr as u32)),
                DieLocation::Const(value) => LocalPlace::Immediate(value),
                DieLocation::Reg(r) => LocalPlace::Immediate(reg(r)? as u64),
                DieLocation::Cfa => LocalPlace::Address(mask24(cfa)),
                DieLocation::None => return None,
            };
            return Some(ResolvedLocal { place, type_ref });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::parse_info;

    const DUMP: &str = "\
  Compilation Unit @ offset 0x0:
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 4
    <22>   DW_AT_encoding    : 5\t(signed)
    <23>   DW_AT_name        : int
 <1><40>: Abbrev Number: 5 (DW_TAG_subprogram)
    <41>   DW_AT_name        : update_player
    <45>   DW_AT_low_pc      : 0x52c
    <49>   DW_AT_high_pc     : 0x44
    <4d>   DW_AT_frame_base  : 1 byte block: 9c \t(DW_OP_call_frame_cfa)
 <2><51>: Abbrev Number: 6 (DW_TAG_formal_parameter)
    <52>   DW_AT_name        : damage
    <56>   DW_AT_type        : <0x20>
    <5a>   DW_AT_location    : 2 byte block: 91 6c \t(DW_OP_fbreg: -20)
 <2><60>: Abbrev Number: 8 (DW_TAG_lexical_block)
    <61>   DW_AT_low_pc      : 0x540
    <65>   DW_AT_high_pc     : 0x10
 <3><69>: Abbrev Number: 7 (DW_TAG_variable)
    <6a>   DW_AT_name        : tmp
    <6e>   DW_AT_type        : <0x20>
    <72>   DW_AT_location    : 1 byte block: 53 \t(DW_OP_reg3 (d3))
";

    #[test]
    fn test_deepest_scope_wins() {
        let store = parse_info(DUMP);
        assert_eq!(find_scope_for_pc(&store, 0x545).unwrap().offset, 0x60);
        assert_eq!(find_scope_for_pc(&store, 0x52e).unwrap().offset, 0x40);
        assert!(find_scope_for_pc(&store, 0x1000).is_none());
    }

    fn index_from(dump: &str) -> DebugIndex {
        let mut index = DebugIndex::default();
        index.dies = parse_info(dump);
        index.fdes = vec![crate::cfi::Fde {
            pc_start: 0x52c,
            pc_end: 0x570,
            default_cfa_reg: 15,
            default_cfa_offset: 4,
            rows: Vec::new(),
        }];
        index
    }

    #[test]
    fn test_fbreg_local() {
        let index = index_from(DUMP);
        let reg = |r: u8| (r == 15).then_some(0x0010_ff00u32);
        let local = resolve_local(&index, "damage", 0x530, &reg).unwrap();
        // cfa = A7 + 4; damage at cfa - 20.
        assert_eq!(local.place, LocalPlace::Address(0x0010_fef0));
        assert_eq!(local.type_ref, Some(0x20));
    }

    #[test]
    fn test_register_local_in_inner_scope() {
        let index = index_from(DUMP);
        let reg = |r: u8| match r {
            15 => Some(0x0010_ff00u32),
            3 => Some(42),
            _ => None,
        };
        let local = resolve_local(&index, "tmp", 0x545, &reg).unwrap();
        assert_eq!(local.place, LocalPlace::Immediate(42));
        // Outer-scope parameters stay visible from the inner scope.
        let outer = resolve_local(&index, "damage", 0x545, &reg).unwrap();
        assert_eq!(outer.place, LocalPlace::Address(0x0010_fef0));
    }

    #[test]
    fn test_unknown_name() {
        let index = index_from(DUMP);
        let reg = |r: u8| (r == 15).then_some(0u32);
        assert!(resolve_local(&index, "nope", 0x530, &reg).is_none());
    }
}
