use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use regex::Regex;

/// ANSI/VT escape sequences emitted by readline-driven tools.
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]")
        .expect("escape sequence pattern is valid")
});

/// Removes escape sequences and stray control characters from `raw`.
#[must_use]
pub fn strip_escapes(raw: &str) -> String {
    ESCAPE_SEQUENCE
        .replace_all(raw, "")
        .chars()
        .filter(|character| *character == '\t' || !character.is_control())
        .collect()
}

/// Ordered log of trimmed, escape-free output lines.
///
/// Output that does not end with a line break (an idle prompt, for example)
/// is exposed as the last line immediately and joined with whatever arrives
/// next.
#[derive(Debug, Default)]
pub struct LineBuffer {
    lines: Vec<String>,
    open_fragment: Option<OpenFragment>,
}

#[derive(Debug)]
struct OpenFragment {
    raw: String,
    visible: bool,
}

impl LineBuffer {
    /// Appends one raw output chunk.
    pub fn push_chunk(&mut self, chunk: &str) {
        let mut text = String::with_capacity(chunk.len());
        if let Some(open) = self.open_fragment.take() {
            if open.visible {
                self.lines.pop();
            }
            text.push_str(&open.raw);
        }
        text.push_str(chunk);

        let mut segments = text.split(['\n', '\r']).collect::<Vec<_>>();
        let tail = segments.pop().unwrap_or_default();
        for segment in segments {
            self.push_line(segment);
        }
        if !tail.is_empty() {
            let visible = self.push_line(tail);
            self.open_fragment = Some(OpenFragment {
                raw: tail.to_string(),
                visible,
            });
        }
    }

    fn push_line(&mut self, raw: &str) -> bool {
        let cleaned = strip_escapes(raw);
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.lines.push(trimmed.to_string());
        true
    }

    /// Drops all buffered output.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.open_fragment = None;
    }

    /// Returns all buffered lines in arrival order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns the most recent line.
    #[must_use]
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

/// Line buffer shared between a process reader and the expect engine.
#[derive(Debug, Default, Clone)]
pub struct LineLog {
    inner: Arc<Mutex<LineBuffer>>,
}

impl LineLog {
    /// Creates an empty shared log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one raw output chunk.
    pub fn push_chunk(&self, chunk: &str) {
        self.lock().push_chunk(chunk);
    }

    /// Drops all buffered output.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copies the buffered lines.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().lines().to_vec()
    }

    /// Returns whether the most recent line equals `line`.
    #[must_use]
    pub fn last_line_is(&self, line: &str) -> bool {
        self.lock().last_line() == Some(line)
    }

    fn lock(&self) -> MutexGuard<'_, LineBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("\u{1b}[0;94m[AA:BB][LE]>\u{1b}[0m", "[AA:BB][LE]>")]
    #[case("\u{1b}[K\u{1b}[1;32mConnection successful", "Connection successful")]
    #[case("\u{1}\u{1b}[0;34m\u{2}[CON]", "[CON]")]
    #[case("plain text", "plain text")]
    fn strip_escapes_removes_control_sequences(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, strip_escapes(raw));
    }

    #[rstest]
    #[case("\u{1b}[2J\u{1b}[H\u{1b}[?25lline\u{1b}[?25h")]
    #[case("a\u{1b}[38;5;208mb\u{1b}[0mc\u{9b}1;2Hd")]
    fn stripped_buffer_never_contains_escapes(#[case] raw: &str) {
        let mut buffer = LineBuffer::default();
        buffer.push_chunk(raw);
        buffer.push_chunk("\n");

        for line in buffer.lines() {
            assert!(!line.contains('\u{1b}'), "escape left in {line:?}");
            assert!(!line.contains('\u{9b}'), "CSI left in {line:?}");
        }
    }

    #[test]
    fn push_chunk_splits_trims_and_drops_blank_lines() {
        let mut buffer = LineBuffer::default();
        buffer.push_chunk("  first  \n\n\r\nsecond\r\n");

        assert_eq!(vec!["first", "second"], buffer.lines());
    }

    #[test]
    fn open_fragment_is_visible_and_joined_with_next_chunk() {
        let mut buffer = LineBuffer::default();
        buffer.push_chunk("Attempting to conn");
        assert_eq!(Some("Attempting to conn"), buffer.last_line());

        buffer.push_chunk("ect\n[AA:BB][LE]> ");
        assert_eq!(vec!["Attempting to connect", "[AA:BB][LE]>"], buffer.lines());
    }

    #[test]
    fn clear_drops_lines_and_open_fragment() {
        let mut buffer = LineBuffer::default();
        buffer.push_chunk("stale\n[AA:BB][LE]>");
        buffer.clear();
        buffer.push_chunk("fresh\n");

        assert_eq!(vec!["fresh"], buffer.lines());
    }

    #[test]
    fn shared_log_reports_last_line() {
        let log = LineLog::new();
        log.push_chunk("Connection successful\n[AA:BB][LE]> ");

        assert!(log.last_line_is("[AA:BB][LE]>"));
        assert_eq!(2, log.snapshot().len());
    }
}
