//! Per-target activity monitoring.
//!
//! Each monitored target owns one `TargetMonitor`: a state machine fed with
//! capture results that infers offline/idle/working/error purely from pane
//! text deltas. Transitions are debounced against the last emitted
//! `(state, activity)` tuple, and the monitor reports an adaptive next-poll
//! interval that widens while a target stays unchanged.
//!
//! ## State machine
//!
//! ```text
//! offline → idle → working → idle → …
//!            ↕        ↕
//!           error ←──┘   (error clears once error markers stop appearing)
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::analyzer::ActivityAnalyzer;
use crate::clock::Clock;
use crate::error::CaptureError;
use crate::patterns::{ActivityKind, ActivityMatch};

/// Inferred liveness state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Offline,
    Idle,
    Working,
    Error,
}

/// Snapshot of one target's inferred status. Written only by that target's
/// monitor cycle; everyone else reads immutable copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub target: String,
    pub state: AgentState,
    pub current_activity: Option<String>,
    pub working_on_file: Option<String>,
    pub executing_command: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

/// An externally visible status transition (already debounced).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub target: String,
    pub previous_state: AgentState,
    pub new_state: AgentState,
    pub activity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub idle_timeout: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            idle_timeout: chrono::Duration::seconds(300),
        }
    }
}

/// State machine for one target.
pub struct TargetMonitor {
    target: String,
    analyzer: Arc<ActivityAnalyzer>,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    state: AgentState,
    current_activity: Option<String>,
    working_on_file: Option<String>,
    executing_command: Option<String>,
    last_content: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    /// Debounce snapshot: the last `(state, activity)` tuple actually emitted.
    last_emitted: Option<(AgentState, Option<String>)>,
    unchanged_streak: u32,
    started_at: DateTime<Utc>,
}

impl TargetMonitor {
    pub fn new(
        target: impl Into<String>,
        analyzer: Arc<ActivityAnalyzer>,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            target: target.into(),
            analyzer,
            config,
            clock,
            state: AgentState::Offline,
            current_activity: None,
            working_on_file: None,
            executing_command: None,
            last_content: None,
            last_success_at: None,
            last_activity_at: now,
            // Seeded with the initial state so a cycle that leaves the
            // monitor offline announces nothing.
            last_emitted: Some((AgentState::Offline, None)),
            unchanged_streak: 0,
            started_at: now,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Immutable snapshot for the status board.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            target: self.target.clone(),
            state: self.state,
            current_activity: self.current_activity.clone(),
            working_on_file: self.working_on_file.clone(),
            executing_command: self.executing_command.clone(),
            last_activity_at: self.last_activity_at,
        }
    }

    /// Adaptive polling interval: doubles per consecutive unchanged sample,
    /// capped, and resets to base on any detected change.
    pub fn next_interval(&self) -> Duration {
        let factor = 1u32 << self.unchanged_streak.min(6);
        self.config.base_interval.saturating_mul(factor).min(self.config.max_interval)
    }

    /// Run one poll cycle against a capture result. Returns a `StatusChange`
    /// only when the debounced `(state, activity)` tuple actually moved.
    pub fn cycle(&mut self, capture: Result<String, CaptureError>) -> Option<StatusChange> {
        let now = self.clock.now();
        let previous_state = self.state;

        match capture {
            Err(err) => {
                self.unchanged_streak = self.unchanged_streak.saturating_add(1);
                let reference = self.last_success_at.unwrap_or(self.started_at);
                if now - reference > self.config.idle_timeout {
                    debug!(target = %self.target, error = %err, "capture failing past idle timeout, demoting to offline");
                    self.enter_offline();
                } else {
                    // Transient failure: retain prior state, no flapping.
                    debug!(target = %self.target, error = %err, "capture failed, retaining state");
                }
            }
            Ok(content) => {
                self.last_success_at = Some(now);
                if self.last_content.as_deref() == Some(content.as_str()) {
                    self.unchanged_streak = self.unchanged_streak.saturating_add(1);
                    if now - self.last_activity_at > self.config.idle_timeout
                        && self.state != AgentState::Idle
                    {
                        self.enter_idle();
                    }
                } else {
                    self.unchanged_streak = 0;
                    let matched = self
                        .analyzer
                        .analyze_delta(self.last_content.as_deref(), &content);
                    self.apply_match(matched);
                    self.last_activity_at = now;
                    self.last_content = Some(content);
                }
            }
        }

        self.emit_if_changed(previous_state)
    }

    fn apply_match(&mut self, matched: Option<ActivityMatch>) {
        match matched {
            None => self.enter_idle(),
            Some(m) => match m.kind {
                ActivityKind::Idle => self.enter_idle(),
                ActivityKind::Error => {
                    self.state = AgentState::Error;
                    self.current_activity = None;
                    self.working_on_file = None;
                    self.executing_command = None;
                }
                kind => {
                    self.state = AgentState::Working;
                    self.current_activity = Some(describe(kind, &m));
                    self.working_on_file = m.file;
                    self.executing_command = m.command;
                }
            },
        }
    }

    fn enter_idle(&mut self) {
        self.state = AgentState::Idle;
        self.current_activity = None;
        self.working_on_file = None;
        self.executing_command = None;
    }

    fn enter_offline(&mut self) {
        self.state = AgentState::Offline;
        self.current_activity = None;
        self.working_on_file = None;
        self.executing_command = None;
    }

    fn emit_if_changed(&mut self, previous_state: AgentState) -> Option<StatusChange> {
        let tuple = (self.state, self.current_activity.clone());
        if self.last_emitted.as_ref() == Some(&tuple) {
            return None;
        }
        self.last_emitted = Some(tuple);
        Some(StatusChange {
            target: self.target.clone(),
            previous_state,
            new_state: self.state,
            activity: self.current_activity.clone(),
        })
    }
}

fn describe(kind: ActivityKind, m: &ActivityMatch) -> String {
    match (kind, &m.file, &m.command) {
        (ActivityKind::FileOperation, Some(file), _) => format!("working on {file}"),
        (ActivityKind::Command, _, Some(command)) => format!("running {command}"),
        (ActivityKind::Coding, _, _) => "writing code".to_string(),
        (ActivityKind::Thinking, _, _) => "thinking".to_string(),
        (kind, _, _) => kind.label().to_string(),
    }
}

/// Shared read-model of the fleet: latest status snapshot per target.
///
/// Single-writer-per-target discipline — only a target's monitor loop calls
/// `publish` for that target; readers clone snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<BTreeMap<String, AgentStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: AgentStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(status.target.clone(), status);
    }

    pub fn get(&self, target: &str) -> Option<AgentStatus> {
        self.inner.lock().unwrap().get(target).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, AgentStatus> {
        self.inner.lock().unwrap().clone()
    }
}
