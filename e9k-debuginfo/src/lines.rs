use std::path::Path;

/// Whether two source paths refer to the same file: exact match or equal
/// basenames (line annotations often carry build-tree paths).
fn file_matches(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let base = |p: &str| {
        Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    };
    match (base(a), base(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Resolves `file:line` to the address of its first instruction using
/// `objdump -l -d` output.
///
/// The listing interleaves `path:line` annotations with instruction rows
/// (`  52c:\t...`); the first instruction row after a matching annotation
/// wins.
pub fn resolve_file_line(listing: &str, file: &str, line_no: u32) -> Option<u32> {
    let mut want_addr = false;
    for line in listing.lines() {
        if let Some(colon) = line.rfind(':') {
            let (path, after) = line.split_at(colon);
            let after = &after[1..];
            if !after.is_empty() && after.chars().all(|c| c.is_ascii_digit()) {
                if after.parse() == Ok(line_no) && file_matches(path, file) {
                    want_addr = true;
                    continue;
                }
            }
        }
        if want_addr {
            let trimmed = line.trim_start();
            let hex_end = trimmed
                .find(|c: char| !c.is_ascii_hexdigit())
                .unwrap_or(trimmed.len());
            if hex_end > 0 && trimmed[hex_end..].starts_with(':') {
                if let Ok(addr) = u32::from_str_radix(&trimmed[..hex_end], 16) {
                    return Some(addr);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
game.elf:     file format elf32-m68k

Disassembly of section .text:

00000400 <main>:
main():
/home/dev/game/game.c:12
     400:\t4e56 0000      \tlinkw %fp,#0
/home/dev/game/game.c:14
     404:\t2f0e           \tmovel %a6,%sp@-
     406:\t4eb9 0000 052c \tjsr 52c <update_player>
/home/dev/game/game.c:20
     40c:\t4e5e           \tunlk %fp
";

    #[test]
    fn test_resolve_by_full_path() {
        assert_eq!(
            resolve_file_line(LISTING, "/home/dev/game/game.c", 14),
            Some(0x404)
        );
    }

    #[test]
    fn test_resolve_by_basename() {
        assert_eq!(resolve_file_line(LISTING, "game.c", 20), Some(0x40c));
    }

    #[test]
    fn test_unknown_line() {
        assert_eq!(resolve_file_line(LISTING, "game.c", 99), None);
        assert_eq!(resolve_file_line(LISTING, "other.c", 14), None);
    }
}
