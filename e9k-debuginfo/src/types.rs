//! The type graph distilled from the DIE tree.
//!
//! Types live in an arena and reference each other through [`TypeId`]
//! indices, so the graph may be cyclic (a struct containing a pointer to
//! itself) without ownership gymnastics. Construction memoizes on the DIE
//! offset: a type is entered into the arena before its edges are built,
//! which terminates cycles naturally.

use std::collections::HashMap;

use crate::dwarf::{BaseEncoding, DieStore, DwarfTag};

/// Index of a type in the [`TypeGraph`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

/// Shape of a type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeKind {
    #[default]
    Invalid,
    Base,
    Pointer,
    Struct,
    Array,
    Typedef,
    Const,
    Volatile,
    Enum,
}

/// A named member of a struct type.
#[derive(Clone, Debug)]
pub struct TypeMember {
    pub name: String,
    pub offset: u32,
    pub type_id: Option<TypeId>,
}

/// One type in the graph.
#[derive(Clone, Debug, Default)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub name: String,
    pub byte_size: usize,
    pub encoding: BaseEncoding,
    /// Pointee, element or aliased type.
    pub target: Option<TypeId>,
    pub members: Vec<TypeMember>,
    pub array_count: usize,
}

impl TypeInfo {
    /// Byte size with the pointer-default fallback applied.
    pub fn size_or(&self, fallback: usize) -> usize {
        if self.byte_size > 0 {
            self.byte_size
        } else {
            fallback
        }
    }
}

/// The memoized arena of types.
#[derive(Clone, Debug, Default)]
pub struct TypeGraph {
    arena: Vec<TypeInfo>,
    by_die: HashMap<u32, TypeId>,
    default_unsigned: HashMap<usize, TypeId>,
}

impl TypeGraph {
    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.arena[id.0 as usize]
    }

    /// A synthetic unsigned base type of `bytes` size, used when a symbol
    /// has no DWARF type. Memoized per size.
    pub fn default_unsigned(&mut self, bytes: usize) -> TypeId {
        if let Some(&id) = self.default_unsigned.get(&bytes) {
            return id;
        }
        let name = match bytes {
            1 => "uint8_t",
            2 => "uint16_t",
            8 => "uint64_t",
            _ => "uint32_t",
        };
        let id = self.push(TypeInfo {
            kind: TypeKind::Base,
            name: name.to_owned(),
            byte_size: if matches!(bytes, 1 | 2 | 4 | 8) { bytes } else { 4 },
            encoding: BaseEncoding::Unsigned,
            ..TypeInfo::default()
        });
        self.default_unsigned.insert(bytes, id);
        id
    }

    /// A synthetic `T*` type, used by the address-of operator.
    pub fn synthetic_pointer(&mut self, target: Option<TypeId>) -> TypeId {
        self.push(TypeInfo {
            kind: TypeKind::Pointer,
            byte_size: 4,
            target,
            ..TypeInfo::default()
        })
    }

    fn push(&mut self, info: TypeInfo) -> TypeId {
        let id = TypeId(self.arena.len() as u32);
        self.arena.push(info);
        id
    }

    /// Builds (or recalls) the type for the DIE at `offset`.
    pub fn type_for_die(&mut self, store: &DieStore, offset: u32) -> Option<TypeId> {
        if offset == 0 {
            return None;
        }
        if let Some(&id) = self.by_die.get(&offset) {
            return Some(id);
        }
        let node = store.get(offset)?.clone();

        // Enter the arena before building edges; a cycle back to this
        // offset then resolves to the placeholder instead of recursing.
        let id = self.push(TypeInfo::default());
        self.by_die.insert(offset, id);
        self.by_die.entry(node.offset).or_insert(id);

        let mut info = TypeInfo {
            name: node.name.clone().unwrap_or_default(),
            ..TypeInfo::default()
        };
        match node.tag {
            DwarfTag::BaseType => {
                info.kind = TypeKind::Base;
                info.byte_size = node.byte_size.unwrap_or(0) as usize;
                info.encoding = node.encoding;
            }
            DwarfTag::PointerType => {
                info.kind = TypeKind::Pointer;
                info.byte_size = node.byte_size.unwrap_or(4) as usize;
                info.target = node.type_ref.and_then(|r| self.type_for_die(store, r));
            }
            DwarfTag::StructureType => {
                info.kind = TypeKind::Struct;
                info.byte_size = node.byte_size.unwrap_or(0) as usize;
                info.members = self.collect_members(store, node.offset);
            }
            DwarfTag::ArrayType => {
                info.kind = TypeKind::Array;
                info.array_count = array_count(store, node.offset);
                info.target = node.type_ref.and_then(|r| self.type_for_die(store, r));
            }
            DwarfTag::Typedef => {
                info.kind = TypeKind::Typedef;
                info.target = node.type_ref.and_then(|r| self.type_for_die(store, r));
            }
            DwarfTag::ConstType => {
                info.kind = TypeKind::Const;
                info.target = node.type_ref.and_then(|r| self.type_for_die(store, r));
            }
            DwarfTag::VolatileType => {
                info.kind = TypeKind::Volatile;
                info.target = node.type_ref.and_then(|r| self.type_for_die(store, r));
            }
            DwarfTag::EnumerationType => {
                info.kind = TypeKind::Enum;
                info.byte_size = node.byte_size.unwrap_or(4) as usize;
                info.encoding = BaseEncoding::Signed;
            }
            _ => {
                info.kind = TypeKind::Invalid;
            }
        }
        self.arena[id.0 as usize] = info;
        Some(id)
    }

    fn collect_members(&mut self, store: &DieStore, struct_offset: u32) -> Vec<TypeMember> {
        let members: Vec<_> = store
            .children_of(struct_offset)
            .filter(|child| child.tag == DwarfTag::Member)
            .map(|child| {
                (
                    child.name.clone().unwrap_or_else(|| "<anon>".to_owned()),
                    child.member_offset.unwrap_or(0) as u32,
                    child.type_ref,
                )
            })
            .collect();
        members
            .into_iter()
            .map(|(name, offset, type_ref)| TypeMember {
                name,
                offset,
                type_id: type_ref.and_then(|r| self.type_for_die(store, r)),
            })
            .collect()
    }

    /// Follows typedef/const/volatile edges to the underlying type.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        // Alias chains are short; the bound guards malformed dumps.
        for _ in 0..64 {
            let info = self.get(cur);
            match info.kind {
                TypeKind::Typedef | TypeKind::Const | TypeKind::Volatile => match info.target {
                    Some(next) => cur = next,
                    None => break,
                },
                _ => break,
            }
        }
        cur
    }

    /// [`resolve`](Self::resolve) returning the info directly.
    pub fn resolved(&self, id: TypeId) -> &TypeInfo {
        self.get(self.resolve(id))
    }
}

fn array_count(store: &DieStore, array_offset: u32) -> usize {
    for child in store.children_of(array_offset) {
        if child.tag != DwarfTag::SubrangeType {
            continue;
        }
        if let Some(count) = child.count {
            return count.max(0) as usize;
        }
        if let Some(upper) = child.upper_bound {
            return (upper + 1).max(0) as usize;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::parse_info;

    const DUMP: &str = "\
  Compilation Unit @ offset 0x0:
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 2
    <22>   DW_AT_encoding    : 5\t(signed)
    <23>   DW_AT_name        : short
 <1><30>: Abbrev Number: 3 (DW_TAG_structure_type)
    <31>   DW_AT_name        : node
    <32>   DW_AT_byte_size   : 8
 <2><33>: Abbrev Number: 4 (DW_TAG_member)
    <34>   DW_AT_name        : value
    <35>   DW_AT_type        : <0x20>
    <36>   DW_AT_data_member_location: 0
 <2><38>: Abbrev Number: 4 (DW_TAG_member)
    <39>   DW_AT_name        : next
    <3a>   DW_AT_type        : <0x50>
    <3b>   DW_AT_data_member_location: 4
 <1><50>: Abbrev Number: 5 (DW_TAG_pointer_type)
    <51>   DW_AT_byte_size   : 4
    <52>   DW_AT_type        : <0x30>
 <1><60>: Abbrev Number: 6 (DW_TAG_typedef)
    <61>   DW_AT_name        : node_t
    <62>   DW_AT_type        : <0x30>
 <1><70>: Abbrev Number: 7 (DW_TAG_array_type)
    <71>   DW_AT_type        : <0x20>
 <2><72>: Abbrev Number: 8 (DW_TAG_subrange_type)
    <73>   DW_AT_upper_bound : 9
";

    #[test]
    fn test_cyclic_struct_terminates() {
        let store = parse_info(DUMP);
        let mut graph = TypeGraph::default();
        let node_ty = graph.type_for_die(&store, 0x30).unwrap();
        let info = graph.get(node_ty);
        assert_eq!(info.kind, TypeKind::Struct);
        assert_eq!(info.byte_size, 8);
        assert_eq!(info.members.len(), 2);

        // node.next is a pointer back to node.
        let next = &info.members[1];
        assert_eq!(next.offset, 4);
        let ptr = graph.get(next.type_id.unwrap());
        assert_eq!(ptr.kind, TypeKind::Pointer);
        assert_eq!(ptr.target, Some(node_ty));
    }

    #[test]
    fn test_typedef_resolution() {
        let store = parse_info(DUMP);
        let mut graph = TypeGraph::default();
        let alias = graph.type_for_die(&store, 0x60).unwrap();
        assert_eq!(graph.get(alias).kind, TypeKind::Typedef);
        assert_eq!(graph.resolved(alias).kind, TypeKind::Struct);
    }

    #[test]
    fn test_array_count() {
        let store = parse_info(DUMP);
        let mut graph = TypeGraph::default();
        let array = graph.type_for_die(&store, 0x70).unwrap();
        let info = graph.get(array);
        assert_eq!(info.kind, TypeKind::Array);
        assert_eq!(info.array_count, 10);
        assert_eq!(graph.get(info.target.unwrap()).byte_size, 2);
    }

    #[test]
    fn test_memoized() {
        let store = parse_info(DUMP);
        let mut graph = TypeGraph::default();
        let a = graph.type_for_die(&store, 0x20).unwrap();
        let b = graph.type_for_die(&store, 0x20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_defaults() {
        let mut graph = TypeGraph::default();
        let u8_ty = graph.default_unsigned(1);
        assert_eq!(graph.get(u8_ty).byte_size, 1);
        assert_eq!(graph.default_unsigned(1), u8_ty);
        let u32_ty = graph.default_unsigned(4);
        assert_eq!(graph.get(u32_ty).name, "uint32_t");
    }
}
