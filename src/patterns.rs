//! Activity classification catalog.
//!
//! An ordered, prioritized set of regex rules that classify raw pane text
//! into activity kinds. Matching is highest-priority-wins over the whole
//! catalog (never first-match-by-position); ties break by declaration order.
//! The catalog is immutable after construction and swappable for tests.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;

/// Classification of a sample's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Coding,
    FileOperation,
    Command,
    Thinking,
    Error,
    Idle,
}

impl ActivityKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Coding => "coding",
            ActivityKind::FileOperation => "file_operation",
            ActivityKind::Command => "command",
            ActivityKind::Thinking => "thinking",
            ActivityKind::Error => "error",
            ActivityKind::Idle => "idle",
        }
    }
}

/// Structured fields extracted from a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFields {
    pub file: Option<String>,
    pub command: Option<String>,
}

/// The winning classification for a piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityMatch {
    pub kind: ActivityKind,
    pub priority: u8,
    pub file: Option<String>,
    pub command: Option<String>,
}

type Extractor = fn(&regex::Captures) -> ActivityFields;

fn no_fields(_caps: &regex::Captures) -> ActivityFields {
    ActivityFields::default()
}

fn file_field(caps: &regex::Captures) -> ActivityFields {
    ActivityFields {
        file: first_group(caps),
        command: None,
    }
}

fn command_field(caps: &regex::Captures) -> ActivityFields {
    ActivityFields {
        file: None,
        command: first_group(caps),
    }
}

fn first_group(caps: &regex::Captures) -> Option<String> {
    (1..caps.len())
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// One catalog rule.
pub struct CatalogEntry {
    pub kind: ActivityKind,
    pub priority: u8,
    regex: Regex,
    extract: Extractor,
}

impl CatalogEntry {
    pub fn new(kind: ActivityKind, priority: u8, pattern: &str) -> Self {
        Self::with_extractor(kind, priority, pattern, no_fields)
    }

    fn with_extractor(kind: ActivityKind, priority: u8, pattern: &str, extract: Extractor) -> Self {
        Self {
            kind,
            priority,
            regex: Regex::new(pattern).expect("catalog pattern must compile"),
            extract,
        }
    }
}

/// Prioritized activity classification rules.
pub struct PatternCatalog {
    entries: Vec<CatalogEntry>,
}

/// Read-only counts about the catalog contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStats {
    pub total: usize,
    pub by_kind: BTreeMap<ActivityKind, usize>,
}

impl PatternCatalog {
    /// Build a catalog from explicit entries (synthetic catalogs in tests).
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The built-in catalog targeting common agent output after ANSI
    /// stripping. Error vocabulary outranks everything so a crash inside a
    /// file-operation line still classifies as an error.
    pub fn builtin() -> Self {
        Self::new(vec![
            // Errors — highest priority.
            CatalogEntry::new(
                ActivityKind::Error,
                100,
                r"(?im)(?:^error\b|\berror:|exception|traceback|panicked at|\bfatal\b|FAILED\b|command not found)",
            ),
            // File operations: create/delete/write language with a file name.
            CatalogEntry::with_extractor(
                ActivityKind::FileOperation,
                80,
                r"(?i)(?:creat(?:e|ed|ing)|writ(?:e|ing|ten)|wrote|delet(?:e|ed|ing)|remov(?:e|ed|ing)|edit(?:ed|ing)?|modif(?:y|ied|ying))\s+(?:file\s*:?\s*|to\s+)?([\w./+\-]+\.\w+)",
                file_field,
            ),
            CatalogEntry::new(ActivityKind::FileOperation, 79, r"(?i)\bmkdir\s+\S+|\btouch\s+\S+"),
            // Command execution: shell prompt echo or known tool invocations.
            CatalogEntry::with_extractor(
                ActivityKind::Command,
                70,
                r"(?m)^\$\s+(.+)$",
                command_field,
            ),
            CatalogEntry::with_extractor(
                ActivityKind::Command,
                69,
                r"(?m)\b((?:cargo|npm|pnpm|yarn|pip|pytest|git|docker|kubectl|make)\s+\S[^\n]*)",
                command_field,
            ),
            // Coding: code fences and definition syntax.
            CatalogEntry::new(ActivityKind::Coding, 60, r"(?m)^```\w*\s*$"),
            CatalogEntry::new(
                ActivityKind::Coding,
                59,
                r"(?m)\b(?:fn|def|func|function|class|impl|interface)\s+\w+|\b(?:import|export|use)\s+[\w:{.]",
            ),
            // Reasoning/thinking language and spinner glyphs.
            CatalogEntry::new(
                ActivityKind::Thinking,
                40,
                r"(?i)\b(?:thinking|pondering|analyzing|reasoning|planning|considering)\b|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
            ),
            // Idle markers: bare prompts, wait strings, shortcut hints.
            CatalogEntry::new(
                ActivityKind::Idle,
                10,
                r#"(?mi)^\s*(?:\$|❯|>)\s*$|Human:|waiting for (?:your )?input|\? for shortcuts|Type a message|Press Enter to continue"#,
            ),
        ])
    }

    /// Return the highest-priority entry whose pattern matches `text`,
    /// scanning the full catalog. Ties break by declaration order.
    pub fn find_best_match(&self, text: &str) -> Option<ActivityMatch> {
        let mut best: Option<ActivityMatch> = None;
        for entry in &self.entries {
            if best.as_ref().is_some_and(|b| b.priority >= entry.priority) {
                continue;
            }
            if let Some(caps) = entry.regex.captures(text) {
                let fields = (entry.extract)(&caps);
                best = Some(ActivityMatch {
                    kind: entry.kind,
                    priority: entry.priority,
                    file: fields.file,
                    command: fields.command,
                });
            }
        }
        best
    }

    pub fn stats(&self) -> CatalogStats {
        let mut by_kind = BTreeMap::new();
        for entry in &self.entries {
            *by_kind.entry(entry.kind).or_insert(0) += 1;
        }
        CatalogStats {
            total: self.entries.len(),
            by_kind,
        }
    }

    pub fn entries_for(&self, kind: ActivityKind) -> Vec<&CatalogEntry> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }
}
