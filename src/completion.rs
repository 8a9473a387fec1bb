//! Task completion detection.
//!
//! Scans fresh pane text for completion vocabulary and, when an in-progress
//! task is assigned to that target, raises a completion signal carrying the
//! matched evidence. Detection is text-only; whether the signal actually
//! closes the task is up to the consumer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::analyzer::strip_ansi;

/// A task currently believed to be in progress on some target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedTask {
    pub id: String,
    pub target: String,
}

/// Source of in-progress task assignments.
pub trait TaskSource: Send + Sync {
    fn in_progress(&self) -> Vec<AssignedTask>;
}

/// Task source with nothing in flight. Completion detection is effectively
/// off: signals require an assigned task to attach to.
pub struct NoTasks;

impl TaskSource for NoTasks {
    fn in_progress(&self) -> Vec<AssignedTask> {
        Vec::new()
    }
}

/// Fixed assignment list, shared and swappable at runtime.
#[derive(Default)]
pub struct StaticTasks(std::sync::Mutex<Vec<AssignedTask>>);

impl StaticTasks {
    pub fn new(tasks: Vec<AssignedTask>) -> Self {
        Self(std::sync::Mutex::new(tasks))
    }

    pub fn assign(&self, task: AssignedTask) {
        self.0.lock().unwrap().push(task);
    }
}

impl TaskSource for StaticTasks {
    fn in_progress(&self) -> Vec<AssignedTask> {
        self.0.lock().unwrap().clone()
    }
}

/// Evidence that a task appears to be finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSignal {
    pub task_id: String,
    pub target: String,
    /// The line that tripped the detector.
    pub matched_text: String,
    /// The last few lines of output around the match.
    pub evidence: String,
    pub detected_at: DateTime<Utc>,
}

/// How many trailing lines of output a signal carries as evidence.
const EVIDENCE_LINES: usize = 5;

/// Completion vocabulary. Matched against the fresh tail of a capture, after
/// ANSI stripping. English and Japanese registers plus celebratory markers
/// that agents commonly print with a completion phrase.
fn completion_patterns() -> Vec<Regex> {
    [
        r"(?i)\btask (?:is )?complete[d.!]?",
        r"(?i)\ball (?:\d+ )?tests? pass(?:ed|ing)?\b",
        r"(?i)\bsuccessfully (?:completed|finished|implemented)\b",
        r"(?i)\b(?:done|finished)[.!]\s*$",
        r"(?i)\bimplementation (?:is )?(?:complete|finished)\b",
        // Japanese completion phrasing.
        r"完了(?:しました|です)?",
        r"(?:できました|終わりました|仕上がりました)",
        r"(?:実装|タスク|作業)(?:が|は)?(?:完了|終了)",
        // Celebration markers next to completion vocabulary.
        r"[✅🎉].{0,40}(?i:complete|done|finished|pass)",
        r"(?i:complete|done|finished|pass)[^\n]{0,40}[✅🎉]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("completion pattern must compile"))
    .collect()
}

pub struct CompletionDetector {
    patterns: Vec<Regex>,
    /// Per-target tail of the last observed capture, to only scan fresh text.
    last_tails: HashMap<String, String>,
    tail_lines: usize,
    clock: Arc<dyn Clock>,
}

impl CompletionDetector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            patterns: completion_patterns(),
            last_tails: HashMap::new(),
            tail_lines: 25,
            clock,
        }
    }

    /// Inspect one capture of `target`. Returns at most one signal per
    /// in-progress task assigned to that target, and only when the tail
    /// actually changed since the previous observation.
    pub fn observe(
        &mut self,
        target: &str,
        content: &str,
        tasks: &[AssignedTask],
    ) -> Vec<CompletionSignal> {
        let cleaned = strip_ansi(content);
        let tail = tail_of(&cleaned, self.tail_lines);

        let unchanged = self.last_tails.get(target).map(String::as_str) == Some(tail.as_str());
        self.last_tails.insert(target.to_string(), tail.clone());
        if unchanged {
            return Vec::new();
        }

        let Some(matched) = self.find_match(&tail) else {
            return Vec::new();
        };

        let detected_at = self.clock.now();
        let evidence = tail_of(&tail, EVIDENCE_LINES);
        tasks
            .iter()
            .filter(|t| t.target == target)
            .map(|t| {
                debug!(task = %t.id, target = %target, matched = %matched, "completion detected");
                CompletionSignal {
                    task_id: t.id.clone(),
                    target: target.to_string(),
                    matched_text: matched.clone(),
                    evidence: evidence.clone(),
                    detected_at,
                }
            })
            .collect()
    }

    fn find_match(&self, text: &str) -> Option<String> {
        for line in text.lines() {
            for pattern in &self.patterns {
                if pattern.is_match(line) {
                    return Some(line.trim().to_string());
                }
            }
        }
        None
    }
}

fn tail_of(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn detector() -> CompletionDetector {
        CompletionDetector::new(Arc::new(ManualClock::epoch()))
    }

    fn task(id: &str, target: &str) -> AssignedTask {
        AssignedTask {
            id: id.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn emoji_completion_line_raises_one_signal() {
        let mut d = detector();
        let tasks = [task("t-1", "worker1")];
        let signals = d.observe("worker1", "✅ Task completed successfully", &tasks);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].task_id, "t-1");
        assert_eq!(signals[0].matched_text, "✅ Task completed successfully");
        assert!(signals[0].evidence.contains("Task completed"));
    }

    #[test]
    fn unchanged_content_never_resignals() {
        let mut d = detector();
        let tasks = [task("t-1", "worker1")];
        let content = "✅ Task completed successfully";
        assert_eq!(d.observe("worker1", content, &tasks).len(), 1);
        assert!(d.observe("worker1", content, &tasks).is_empty());
    }

    #[test]
    fn japanese_completion_phrase_matches() {
        let mut d = detector();
        let tasks = [task("t-2", "president")];
        let signals = d.observe("president", "タスクが完了しました", &tasks);
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn all_tests_passed_matches() {
        let mut d = detector();
        let tasks = [task("t-3", "worker2")];
        let signals = d.observe("worker2", "running...\nall 42 tests passed", &tasks);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].matched_text, "all 42 tests passed");
    }

    #[test]
    fn targets_without_tasks_stay_silent() {
        let mut d = detector();
        let tasks = [task("t-1", "worker1")];
        assert!(d.observe("worker2", "Task completed", &tasks).is_empty());
    }

    #[test]
    fn each_assigned_task_on_target_gets_a_signal() {
        let mut d = detector();
        let tasks = [task("a", "worker1"), task("b", "worker1"), task("c", "worker2")];
        let signals = d.observe("worker1", "Implementation complete.", &tasks);
        let ids: Vec<&str> = signals.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn ordinary_output_does_not_trip_detection() {
        let mut d = detector();
        let tasks = [task("t-1", "worker1")];
        assert!(d.observe("worker1", "compiling crate foo v0.1.0", &tasks).is_empty());
        assert!(d.observe("worker1", "Creating file: a.ts", &tasks).is_empty());
    }

    #[test]
    fn completion_older_than_tail_window_is_ignored() {
        let mut d = detector();
        d.tail_lines = 3;
        let tasks = [task("t-1", "worker1")];
        let content = "Task completed\nx\ny\nz\nmore output";
        assert!(d.observe("worker1", content, &tasks).is_empty());
    }
}
