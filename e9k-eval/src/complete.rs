use e9k_debuginfo::types::TypeKind;
use e9k_debuginfo::DebugIndex;

use crate::eval::evaluate;
use crate::machine::Machine;

/// Completion for a partial `print`/`write` expression.
///
/// If the prefix contains a member separator (`.` or `->`), the text
/// before the last separator is evaluated type-only and the matching
/// struct members are returned as full replacement strings
/// (`base.member`). Otherwise global variable and symbol names matching
/// the prefix are returned. Matching is case-sensitive.
pub fn complete(prefix: &str, index: &mut DebugIndex, machine: &dyn Machine) -> Vec<String> {
    let dot = prefix.rfind('.');
    let arrow = prefix.rfind("->");
    let sep = match (dot, arrow) {
        (Some(d), Some(a)) => {
            if a > d {
                Some((a, "->"))
            } else {
                Some((d, "."))
            }
        }
        (Some(d), None) => Some((d, ".")),
        (None, Some(a)) => Some((a, "->")),
        (None, None) => None,
    };

    match sep {
        Some((pos, sep)) => {
            let base_expr = &prefix[..pos];
            let member_prefix = &prefix[pos + sep.len()..];
            complete_members(base_expr, sep, member_prefix, index, machine)
        }
        None => complete_globals(prefix, index),
    }
}

fn complete_members(
    base_expr: &str,
    sep: &str,
    member_prefix: &str,
    index: &mut DebugIndex,
    machine: &dyn Machine,
) -> Vec<String> {
    let Ok(value) = evaluate(base_expr, index, machine, true) else {
        return Vec::new();
    };
    let Some(type_id) = value.type_id else {
        return Vec::new();
    };
    let mut resolved = index.types.resolve(type_id);
    // One pointer hop: `p.` completes like `p->`.
    if index.types.get(resolved).kind == TypeKind::Pointer {
        match index.types.get(resolved).target {
            Some(target) => resolved = index.types.resolve(target),
            None => return Vec::new(),
        }
    }
    let info = index.types.get(resolved);
    if info.kind != TypeKind::Struct {
        return Vec::new();
    }
    info.members
        .iter()
        .filter(|m| m.name.starts_with(member_prefix))
        .map(|m| format!("{base_expr}{sep}{}", m.name))
        .collect()
}

fn complete_globals(prefix: &str, index: &DebugIndex) -> Vec<String> {
    let mut out: Vec<String> = index
        .variables
        .iter()
        .map(|v| v.name.clone())
        .filter(|name| name.starts_with(prefix))
        .collect();
    for name in index.symbols.complete(prefix) {
        if !out.iter().any(|have| have == name) {
            out.push(name.to_owned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::fixtures::fixture;

    #[test]
    fn test_global_completion_merges_vars_and_symbols() {
        let (mut index, machine) = fixture();
        let hits = complete("s", &mut index, &machine);
        assert!(hits.contains(&"s".to_owned()));
        assert!(hits.contains(&"sp".to_owned()));
        // Symbol-only name included once.
        let raw: Vec<_> = hits.iter().filter(|h| *h == "raw_buffer").collect();
        assert!(raw.is_empty());

        let hits = complete("raw", &mut index, &machine);
        assert_eq!(hits, vec!["raw_buffer"]);
    }

    #[test]
    fn test_member_completion_after_dot() {
        let (mut index, machine) = fixture();
        let hits = complete("s.", &mut index, &machine);
        assert_eq!(hits, vec!["s.hp", "s.m"]);

        let hits = complete("s.h", &mut index, &machine);
        assert_eq!(hits, vec!["s.hp"]);
    }

    #[test]
    fn test_member_completion_after_arrow() {
        let (mut index, machine) = fixture();
        let hits = complete("sp->", &mut index, &machine);
        assert_eq!(hits, vec!["sp->hp", "sp->m"]);
    }

    #[test]
    fn test_completion_closure_property() {
        // Every completion extends its prefix.
        let (mut index, machine) = fixture();
        for prefix in ["s", "sp->", "s.h", "x", ""] {
            for hit in complete(prefix, &mut index, &machine) {
                assert!(hit.starts_with(prefix), "{hit:?} does not extend {prefix:?}");
            }
        }
    }

    #[test]
    fn test_non_struct_base_yields_nothing() {
        let (mut index, machine) = fixture();
        assert!(complete("x.", &mut index, &machine).is_empty());
        assert!(complete("nope->", &mut index, &machine).is_empty());
    }
}
