//! Content analysis — raw pane text to structured activity signals.
//!
//! The analyzer strips ANSI escapes, restricts matching to the recent tail of
//! the capture (panes accumulate scrollback), and when the previous capture
//! is a prefix of the new one classifies only the appended suffix so a stale
//! error higher up the buffer cannot shadow fresh activity.

use std::sync::LazyLock;

use regex::Regex;

use crate::patterns::{ActivityMatch, PatternCatalog};

/// How many trailing lines of a capture are considered "recent".
const DEFAULT_TAIL_LINES: usize = 25;

/// Scrub terminal escape sequences so the catalog only ever sees plain text.
///
/// tmux's plain capture already drops most styling, but agents that redraw
/// their own UI leak color resets, cursor moves, and title updates into the
/// capture, and those bytes would break anchored patterns.
pub fn strip_ansi(text: &str) -> String {
    static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(concat!(
            r"\x1b\[[0-9;?]*[A-Za-z]",            // CSI: parameters + final byte
            r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC: terminated by BEL or ST
            r"|\x1b[^\[\]]",                       // bare two-byte escapes
        ))
        .unwrap()
    });
    ESCAPES.replace_all(text, "").into_owned()
}

pub struct ActivityAnalyzer {
    catalog: PatternCatalog,
    tail_lines: usize,
}

impl ActivityAnalyzer {
    pub fn new(catalog: PatternCatalog) -> Self {
        Self {
            catalog,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    pub fn builtin() -> Self {
        Self::new(PatternCatalog::builtin())
    }

    #[cfg(test)]
    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    /// Classify the recent tail of a capture.
    pub fn analyze(&self, content: &str) -> Option<ActivityMatch> {
        let cleaned = strip_ansi(content);
        self.catalog.find_best_match(&tail(&cleaned, self.tail_lines))
    }

    /// Classify what changed between two captures.
    ///
    /// If the previous capture is a prefix of the current one, only the newly
    /// appended text is classified. Otherwise (screen redraw, scrollback
    /// rotation) this falls back to the recent tail of the full capture.
    pub fn analyze_delta(&self, previous: Option<&str>, current: &str) -> Option<ActivityMatch> {
        match previous {
            Some(prev) if current.len() > prev.len() && current.starts_with(prev) => {
                let suffix = &current[prev.len()..];
                let cleaned = strip_ansi(suffix);
                if cleaned.trim().is_empty() {
                    return None;
                }
                self.catalog.find_best_match(&cleaned)
            }
            _ => self.analyze(current),
        }
    }
}

fn tail(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::ActivityKind;

    #[test]
    fn scrubs_color_and_cursor_sequences() {
        let raw = "\x1b[2K\x1b[1;32m$ cargo test\x1b[0m\x1b[?25h";
        assert_eq!(strip_ansi(raw), "$ cargo test");
    }

    #[test]
    fn scrubs_title_updates_but_keeps_output() {
        let raw = "\x1b]0;worker1 — claude\x07Creating file: a.ts";
        assert_eq!(strip_ansi(raw), "Creating file: a.ts");
    }

    #[test]
    fn escape_free_text_survives_intact() {
        let line = "Error: failed to compile (exit 101)";
        assert_eq!(strip_ansi(line), line);
    }

    #[test]
    fn analyze_strips_ansi_before_matching() {
        let analyzer = ActivityAnalyzer::builtin();
        let m = analyzer
            .analyze("\x1b[33mCreating file: a.ts\x1b[0m")
            .unwrap();
        assert_eq!(m.kind, ActivityKind::FileOperation);
        assert_eq!(m.file.as_deref(), Some("a.ts"));
    }

    #[test]
    fn analyze_only_sees_recent_tail() {
        let analyzer = ActivityAnalyzer::builtin().with_tail_lines(3);
        // The error scrolled out of the tail window; the prompt is current.
        let content = "Error: old crash\nline\nline\nline\nHuman:";
        let m = analyzer.analyze(content).unwrap();
        assert_eq!(m.kind, ActivityKind::Idle);
    }

    #[test]
    fn delta_classifies_appended_suffix_only() {
        let analyzer = ActivityAnalyzer::builtin();
        let prev = "Error: transient failure\n";
        let current = "Error: transient failure\nCreating file: fix.rs\n";
        let m = analyzer.analyze_delta(Some(prev), current).unwrap();
        // Only the suffix is inspected, so the stale error does not win.
        assert_eq!(m.kind, ActivityKind::FileOperation);
        assert_eq!(m.file.as_deref(), Some("fix.rs"));
    }

    #[test]
    fn delta_whitespace_only_suffix_is_no_match() {
        let analyzer = ActivityAnalyzer::builtin();
        let prev = "Human:";
        let current = "Human:\n\n";
        assert!(analyzer.analyze_delta(Some(prev), current).is_none());
    }

    #[test]
    fn delta_falls_back_to_full_tail_on_redraw() {
        let analyzer = ActivityAnalyzer::builtin();
        // Not a prefix relationship — pane was redrawn.
        let m = analyzer
            .analyze_delta(Some("completely different"), "$ cargo build")
            .unwrap();
        assert_eq!(m.kind, ActivityKind::Command);
    }

    #[test]
    fn delta_without_previous_uses_full_content() {
        let analyzer = ActivityAnalyzer::builtin();
        let m = analyzer.analyze_delta(None, "Thinking...").unwrap();
        assert_eq!(m.kind, ActivityKind::Thinking);
    }
}
