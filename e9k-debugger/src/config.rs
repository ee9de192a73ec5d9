use std::io;
use std::path::{Path, PathBuf};

/// The line-oriented `key=value` configuration file.
///
/// Keys this build does not understand (including the `comp.<id>.<k>`
/// keys owned by UI components) are preserved across load/save; only
/// values actively set change.
#[derive(Clone, Debug, Default)]
pub struct Config {
    entries: Vec<(String, String)>,
}

impl Config {
    /// Platform config path: `$HOME/.e9k-debugger.cfg` on Unix,
    /// `%APPDATA%\e9k-debugger.cfg` on Windows.
    pub fn default_path() -> Option<PathBuf> {
        #[cfg(windows)]
        {
            std::env::var_os("APPDATA").map(|dir| PathBuf::from(dir).join("e9k-debugger.cfg"))
        }
        #[cfg(not(windows))]
        {
            std::env::var_os("HOME").map(|dir| PathBuf::from(dir).join(".e9k-debugger.cfg"))
        }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            config
                .entries
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }
        config
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        std::fs::write(path, out)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let text = "\
transition=slide
comp.console.height=240
comp.source.collapsed=1
mystery_future_key=whatever
";
        let mut config = Config::parse(text);
        config.set("transition", "doom");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e9k-debugger.cfg");
        config.save(&path).unwrap();
        let reloaded = Config::load(&path).unwrap();

        assert_eq!(reloaded.get("transition"), Some("doom"));
        assert_eq!(reloaded.get("comp.console.height"), Some("240"));
        assert_eq!(reloaded.get("comp.source.collapsed"), Some("1"));
        assert_eq!(reloaded.get("mystery_future_key"), Some("whatever"));
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let config = Config::parse("# comment\n\naudio.buffer_ms=50\n");
        assert_eq!(config.get_u32("audio.buffer_ms"), Some(50));
    }

    #[test]
    fn test_set_inserts_and_updates() {
        let mut config = Config::default();
        config.set("a", "1");
        config.set("a", "2");
        assert_eq!(config.get("a"), Some("2"));
        assert_eq!(config.entries.len(), 1);
    }
}
