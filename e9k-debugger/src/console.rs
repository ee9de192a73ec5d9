/// Maximum retained console lines; older lines are evicted.
const CONSOLE_CAP: usize = 5000;

/// Longest line assembled from the core's debug text stream before a
/// forced flush.
const DEBUG_LINE_CAP: usize = 1024;

/// The console output buffer.
///
/// Command output and the core's debug text land here; in the CLI build
/// every pushed line is also echoed to stdout. `cls` clears the retained
/// buffer.
#[derive(Debug, Default)]
pub struct Console {
    lines: Vec<String>,
    partial: String,
    echo: bool,
}

impl Console {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            ..Self::default()
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.echo {
            println!("{line}");
        }
        self.lines.push(line);
        if self.lines.len() > CONSOLE_CAP {
            let excess = self.lines.len() - CONSOLE_CAP;
            self.lines.drain(..excess);
        }
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.push(line);
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Feeds raw bytes from the core's debug text stream, splitting on
    /// `\n`, dropping `\r` and flushing oversized partial lines intact.
    pub fn feed_debug_text(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\r' => {}
                b'\n' => {
                    if !self.partial.is_empty() {
                        let line = std::mem::take(&mut self.partial);
                        self.push(line);
                    }
                }
                _ => {
                    self.partial.push(char::from(b));
                    if self.partial.len() >= DEBUG_LINE_CAP {
                        let line = std::mem::take(&mut self.partial);
                        self.push(line);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_debug_text_crlf_equals_lf() {
        let mut a = Console::default();
        a.feed_debug_text(b"hello\r\nworld\r\n");
        let mut b = Console::default();
        b.feed_debug_text(b"hello\nworld\n");
        assert_eq!(a.lines(), b.lines());
        assert_eq!(a.lines(), &["hello".to_owned(), "world".to_owned()]);
    }

    #[test]
    fn test_partial_line_across_reads() {
        let mut console = Console::default();
        console.feed_debug_text(b"hel");
        console.feed_debug_text(b"lo\n");
        assert_eq!(console.lines(), &["hello".to_owned()]);
    }

    #[test]
    fn test_oversized_partial_flushes() {
        let mut console = Console::default();
        let long = vec![b'x'; DEBUG_LINE_CAP + 10];
        console.feed_debug_text(&long);
        assert_eq!(console.lines().len(), 1);
        assert_eq!(console.lines()[0].len(), DEBUG_LINE_CAP);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut console = Console::default();
        for i in 0..CONSOLE_CAP + 5 {
            console.push(format!("line {i}"));
        }
        assert_eq!(console.lines().len(), CONSOLE_CAP);
        assert_eq!(console.lines()[0], "line 5");
    }
}
