use e9k_common::mask24;
use e9k_host::Watchbreak;

/// The "train" workflow state machine.
///
/// `train <from> <to>` scatters a value-transition watchpoint over all of
/// RAM; every hit either halts (a candidate) or, once the user has put
/// its address on the ignore list, auto-resumes. The surviving addresses
/// are the ones whose transitions the user actually cares about.
#[derive(Debug, Default)]
pub struct Train {
    ignore: Vec<u32>,
    watch_index: Option<u32>,
    last_addr: Option<u32>,
}

impl Train {
    /// True once a training watchpoint has been installed.
    pub fn is_active(&self) -> bool {
        self.watch_index.is_some()
    }

    /// Remembers the index of the freshly installed training watchpoint
    /// and forgets the previous break.
    pub fn set_watch_index(&mut self, index: u32) {
        self.watch_index = Some(index);
        self.last_addr = None;
    }

    /// Records the most recent watchbreak, if it came from the training
    /// watchpoint.
    pub fn set_last_watchbreak(&mut self, wb: &Watchbreak) {
        if self.watch_index == Some(wb.index) {
            self.last_addr = Some(mask24(wb.access_addr));
        } else {
            self.last_addr = None;
        }
    }

    /// Address of the last training watchbreak, for `train ignore`.
    pub fn last_watchbreak_addr(&self) -> Option<u32> {
        self.last_addr
    }

    /// Adds an address to the ignore list.
    pub fn add_ignore(&mut self, addr: u32) {
        let addr = mask24(addr);
        if !self.ignore.contains(&addr) {
            self.ignore.push(addr);
        }
    }

    /// True if watchbreaks at `addr` should auto-resume.
    pub fn is_ignored(&self, addr: u32) -> bool {
        self.ignore.contains(&mask24(addr))
    }

    pub fn clear_ignore(&mut self) {
        self.ignore.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wb(index: u32, addr: u32) -> Watchbreak {
        Watchbreak {
            index,
            access_kind: e9k_host::abi::WATCH_ACCESS_WRITE,
            access_addr: addr,
            value: 1,
            old_value: 0,
            old_value_valid: 1,
        }
    }

    #[test]
    fn test_ignore_workflow() {
        let mut train = Train::default();
        assert!(!train.is_active());
        train.set_watch_index(5);
        assert!(train.is_active());

        // A break from another watchpoint is not a candidate.
        train.set_last_watchbreak(&wb(3, 0x101000));
        assert_eq!(train.last_watchbreak_addr(), None);

        train.set_last_watchbreak(&wb(5, 0x101000));
        assert_eq!(train.last_watchbreak_addr(), Some(0x101000));

        train.add_ignore(train.last_watchbreak_addr().unwrap());
        assert!(train.is_ignored(0x101000));
        assert!(!train.is_ignored(0x102000));

        train.clear_ignore();
        assert!(!train.is_ignored(0x101000));
    }

    #[test]
    fn test_ignore_deduplicates() {
        let mut train = Train::default();
        train.add_ignore(0x101000);
        train.add_ignore(0xff10_1000);
        assert_eq!(train.ignore.len(), 1);
    }
}
