use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Upper bound on retained prompt history entries.
const HISTORY_CAP: usize = 10_000;

/// The prompt's command history: a bounded in-memory deque plus an
/// append-only history file.
#[derive(Debug, Default)]
pub struct PromptHistory {
    entries: VecDeque<String>,
    file: Option<PathBuf>,
}

impl PromptHistory {
    /// Default history file next to the config file.
    pub fn default_path() -> Option<PathBuf> {
        crate::config::Config::default_path()
            .map(|p| p.with_file_name(".e9k-debugger-history"))
    }

    /// Loads existing history (keeping at most the newest
    /// [`HISTORY_CAP`] entries) and arranges for appends to `path`.
    pub fn load(&mut self, path: &Path) {
        if let Ok(text) = std::fs::read_to_string(path) {
            for line in text.lines() {
                if !line.is_empty() {
                    self.push_entry(line.to_owned());
                }
            }
        }
        self.file = Some(path.to_owned());
    }

    fn push_entry(&mut self, line: String) {
        if self.entries.back().map(String::as_str) == Some(line.as_str()) {
            return;
        }
        self.entries.push_back(line);
        while self.entries.len() > HISTORY_CAP {
            self.entries.pop_front();
        }
    }

    /// Records a submitted command line.
    pub fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        let duplicate = self.entries.back().map(String::as_str) == Some(line);
        self.push_entry(line.to_owned());
        if duplicate {
            return;
        }
        if let Some(path) = &self.file {
            let appended = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| writeln!(f, "{line}"));
            if let Err(e) = appended {
                tracing::debug!(error = %e, "failed to append prompt history");
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_and_oldest_evicted() {
        let mut history = PromptHistory::default();
        for i in 0..HISTORY_CAP + 7 {
            history.push(&format!("print {i}"));
        }
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history.entries().next(), Some("print 7"));
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let mut history = PromptHistory::default();
        history.push("step");
        history.push("step");
        history.push("continue");
        history.push("step");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_file_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".e9k-debugger-history");

        let mut history = PromptHistory::default();
        history.load(&path);
        history.push("break main");
        history.push("continue");

        let mut reloaded = PromptHistory::default();
        reloaded.load(&path);
        let entries: Vec<_> = reloaded.entries().collect();
        assert_eq!(entries, vec!["break main", "continue"]);
    }
}
