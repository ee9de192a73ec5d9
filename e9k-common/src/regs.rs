/// Names of the m68k registers as reported by the core's `read_regs`
/// debug call, in wire order.
pub static REGISTER_NAMES: &[&str] = &[
    "D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7", "A0", "A1", "A2", "A3", "A4", "A5", "A6",
    "A7", "PC", "SR",
];

/// Resolves a register name to its index in the `read_regs` word array.
///
/// Lookup is case-insensitive, matching how users type register names at
/// the prompt (`print d0`, `print PC`).
pub fn register_index(name: &str) -> Option<usize> {
    REGISTER_NAMES
        .iter()
        .position(|reg| reg.eq_ignore_ascii_case(name))
}

/// Maps a DWARF register number to the `read_regs` index.
///
/// The m68k DWARF numbering assigns 0..=7 to `D0..D7` and 8..=15 to
/// `A0..A7`; anything above has no location-expression use here.
pub fn register_index_for_dwarf(reg: u8) -> Option<usize> {
    if reg <= 15 {
        Some(reg as usize)
    } else {
        None
    }
}

/// A snapshot of the register file, paired with [`REGISTER_NAMES`].
///
/// The core reports raw `u32` words; the debugger keeps the most recent
/// snapshot and resolves names against it.
#[derive(Clone, Debug, Default)]
pub struct RegisterFile {
    words: Vec<u32>,
}

impl RegisterFile {
    /// Replaces the snapshot with freshly read register words.
    pub fn update(&mut self, words: &[u32]) {
        self.words.clear();
        self.words.extend_from_slice(words);
    }

    /// True if no registers have been read yet.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Looks up a register by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<u32> {
        let index = register_index(name)?;
        self.words.get(index).copied()
    }

    /// Looks up a register by DWARF register number.
    pub fn get_dwarf(&self, reg: u8) -> Option<u32> {
        let index = register_index_for_dwarf(reg)?;
        self.words.get(index).copied()
    }

    /// The raw words in wire order.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Iterates `(name, value)` pairs for display.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        REGISTER_NAMES
            .iter()
            .zip(self.words.iter())
            .map(|(&name, &value)| (name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterFile {
        let mut regs = RegisterFile::default();
        let words: Vec<u32> = (0..18).collect();
        regs.update(&words);
        regs
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let regs = sample();
        assert_eq!(regs.get("d0"), Some(0));
        assert_eq!(regs.get("A7"), Some(15));
        assert_eq!(regs.get("pc"), Some(16));
        assert_eq!(regs.get("sr"), Some(17));
        assert_eq!(regs.get("x9"), None);
    }

    #[test]
    fn test_dwarf_mapping() {
        let regs = sample();
        assert_eq!(regs.get_dwarf(0), Some(0));
        assert_eq!(regs.get_dwarf(7), Some(7));
        assert_eq!(regs.get_dwarf(8), Some(8));
        assert_eq!(regs.get_dwarf(15), Some(15));
        assert_eq!(regs.get_dwarf(16), None);
    }
}
