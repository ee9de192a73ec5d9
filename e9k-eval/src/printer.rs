use e9k_common::sign_extend;
use e9k_debuginfo::dwarf::BaseEncoding;
use e9k_debuginfo::types::{TypeGraph, TypeId, TypeKind};
use e9k_debuginfo::DebugIndex;

use crate::eval::read_unsigned;
use crate::machine::Machine;
use crate::value::{Place, Value};

/// Renders an evaluated value as console lines.
///
/// Scalars print on one line; structs and arrays recurse with two-space
/// indentation up to their full member/element count. Memory that cannot
/// be read prints as `<unreadable>` instead of failing the whole command.
pub fn print_value(
    label: &str,
    value: &Value,
    index: &DebugIndex,
    machine: &dyn Machine,
) -> Vec<String> {
    let mut out = Vec::new();
    match value.place {
        Place::Address(addr) => {
            dump_at(&mut out, &index.types, machine, value.type_id, addr, 0, label);
        }
        Place::Immediate(imm) => {
            let resolved = value.type_id.map(|id| index.types.resolved(id));
            let line = match resolved.map(|info| info.kind) {
                Some(TypeKind::Pointer) => format!("{label}: 0x{imm:08X}"),
                Some(TypeKind::Base) | Some(TypeKind::Enum) | None => {
                    format!("{label}: {imm} (0x{imm:X})")
                }
                _ => format!("{label}: 0x{imm:X}"),
            };
            out.push(line);
        }
        Place::None => out.push(format!("{label}: <no value>")),
    }
    out
}

fn push_line(out: &mut Vec<String>, indent: usize, text: String) {
    let pad = indent.min(120);
    out.push(format!("{:pad$}{}", "", text, pad = pad));
}

fn dump_at(
    out: &mut Vec<String>,
    graph: &TypeGraph,
    machine: &dyn Machine,
    type_id: Option<TypeId>,
    addr: u32,
    indent: usize,
    label: &str,
) {
    let Some(type_id) = type_id else {
        push_line(out, indent, format!("{label}: 0x{addr:06X}"));
        return;
    };
    let info = graph.resolved(type_id);
    match info.kind {
        TypeKind::Base => {
            let size = info.size_or(4);
            let Some(raw) = read_unsigned(machine, addr, size) else {
                push_line(out, indent, format!("{label}: <unreadable>"));
                return;
            };
            let text = match info.encoding {
                BaseEncoding::Float if size == 4 => {
                    let f = f32::from_bits(raw as u32);
                    format!("{label}: {f:.6}")
                }
                BaseEncoding::Float if size == 8 => {
                    let f = f64::from_bits(raw);
                    format!("{label}: {f:.6}")
                }
                BaseEncoding::Float => format!("{label}: 0x{raw:X}"),
                BaseEncoding::Signed => {
                    let signed = sign_extend(raw, size);
                    format!("{label}: {signed} (0x{raw:X})")
                }
                BaseEncoding::Boolean => {
                    format!("{label}: {}", if raw != 0 { "true" } else { "false" })
                }
                _ => format!("{label}: {raw} (0x{raw:X})"),
            };
            push_line(out, indent, text);
        }
        TypeKind::Pointer => {
            let size = info.size_or(4);
            match read_unsigned(machine, addr, size) {
                Some(ptr) => push_line(out, indent, format!("{label}: 0x{ptr:08X}")),
                None => push_line(out, indent, format!("{label}: <unreadable>")),
            }
        }
        TypeKind::Struct => {
            let header = if label.is_empty() && !info.name.is_empty() {
                info.name.clone()
            } else {
                label.to_owned()
            };
            push_line(out, indent, format!("{header}:"));
            for member in &info.members {
                dump_at(
                    out,
                    graph,
                    machine,
                    member.type_id,
                    addr + member.offset,
                    indent + 2,
                    &member.name,
                );
            }
        }
        TypeKind::Array => {
            push_line(out, indent, format!("{label}:"));
            let Some(target) = info.target else { return };
            if info.array_count == 0 {
                return;
            }
            let elem_size = graph.resolved(target).size_or(1);
            for i in 0..info.array_count {
                dump_at(
                    out,
                    graph,
                    machine,
                    Some(target),
                    addr + (i * elem_size) as u32,
                    indent + 2,
                    &format!("[{i}]"),
                );
            }
        }
        TypeKind::Enum => {
            let size = info.size_or(4);
            match read_unsigned(machine, addr, size) {
                Some(raw) => {
                    let signed = sign_extend(raw, size);
                    push_line(out, indent, format!("{label}: {signed} (0x{raw:X})"));
                }
                None => push_line(out, indent, format!("{label}: <unreadable>")),
            }
        }
        _ => push_line(out, indent, format!("{label}: <unsupported>")),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::eval::evaluate;
    use crate::eval::fixtures::fixture;

    fn print_expr(expr: &str) -> Vec<String> {
        let (mut index, machine) = fixture();
        let value = evaluate(expr, &mut index, &machine, false).unwrap();
        print_value(expr, &value, &index, &machine)
    }

    #[test]
    fn test_print_scalar() {
        assert_eq!(print_expr("x"), vec!["x: 42 (0x2A)"]);
    }

    #[test]
    fn test_print_address_of() {
        assert_eq!(print_expr("&x"), vec!["&x: 0x00100200"]);
    }

    #[test]
    fn test_print_deref() {
        assert_eq!(print_expr("*p"), vec!["*p: 42 (0x2A)"]);
    }

    #[test]
    fn test_print_pointer_value() {
        assert_eq!(print_expr("p"), vec!["p: 0x00100200"]);
    }

    #[test]
    fn test_print_struct_recurses() {
        let lines = print_expr("s");
        assert_eq!(lines[0], "s:");
        assert_eq!(lines[1], "  hp: 99 (0x63)");
        assert_eq!(lines[2], "  m:");
        assert_eq!(lines[3], "    [0]:");
        assert_eq!(lines[4], "      n: 10 (0xA)");
        // 4 array elements, each a one-member struct.
        assert_eq!(lines.len(), 3 + 4 * 2);
    }

    #[test]
    fn test_unreadable_memory() {
        let (mut index, machine) = fixture();
        let value = evaluate("*0x999999", &mut index, &machine, false).unwrap();
        let lines = print_value("*0x999999", &value, &index, &machine);
        assert_eq!(lines, vec!["*0x999999: <unreadable>"]);
    }
}
