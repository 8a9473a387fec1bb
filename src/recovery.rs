//! Guarded fleet recovery.
//!
//! Recreates missing sessions and relaunches down agents, under three guards:
//! at most one attempt runs at a time, automatic attempts honor a cooldown,
//! and an attempt with nothing to do is skipped without consuming cooldown.
//! Manual attempts bypass the cooldown but never the mutual exclusion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Target;
use crate::health::{HealthLevel, HealthVerdict};
use crate::mux::Multiplexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateSession,
    LaunchAgent,
}

/// One step taken during a recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAction {
    pub kind: ActionKind,
    pub target: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Success,
    Partial,
    Failed,
}

/// A completed recovery attempt with every action it took.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub trigger: HealthLevel,
    pub manual: bool,
    pub actions: Vec<RecoveryAction>,
    pub outcome: RecoveryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    CoolingDown,
    NothingDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    Attempted(RecoveryAttempt),
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub cooldown: chrono::Duration,
    /// Delay between consecutive agent launches.
    pub pace: Duration,
    /// Delay after creating a session before launching into it.
    pub settle: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            cooldown: chrono::Duration::seconds(300),
            pace: Duration::from_millis(500),
            settle: Duration::from_millis(1000),
        }
    }
}

pub struct RecoveryOrchestrator {
    sessions: Vec<String>,
    targets: Vec<Target>,
    policy: RecoveryPolicy,
    clock: Arc<dyn Clock>,
    in_progress: AtomicBool,
    last_attempt_at: Mutex<Option<DateTime<Utc>>>,
}

/// Clears the in-progress flag even on early return.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RecoveryOrchestrator {
    pub fn new(
        sessions: Vec<String>,
        targets: Vec<Target>,
        policy: RecoveryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            targets,
            policy,
            clock,
            in_progress: AtomicBool::new(false),
            last_attempt_at: Mutex::new(None),
        }
    }

    /// Run one recovery attempt against the verdict, or explain why not.
    pub fn attempt_recovery(
        &self,
        mux: &dyn Multiplexer,
        verdict: &HealthVerdict,
        manual: bool,
    ) -> RecoveryDecision {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return RecoveryDecision::Skipped(SkipReason::AlreadyRunning);
        }
        let _guard = InProgressGuard(&self.in_progress);

        let now = self.clock.now();
        if !manual {
            let last = self.last_attempt_at.lock().unwrap();
            if let Some(at) = *last {
                if now - at < self.policy.cooldown {
                    return RecoveryDecision::Skipped(SkipReason::CoolingDown);
                }
            }
        }

        let missing_sessions: Vec<&String> = self
            .sessions
            .iter()
            .filter(|s| verdict.sessions.get(*s).copied() == Some(false))
            .collect();
        let down_targets: Vec<&Target> = self
            .targets
            .iter()
            .filter(|t| verdict.agents.get(&t.name).copied() == Some(false))
            .collect();

        if missing_sessions.is_empty() && down_targets.is_empty() {
            return RecoveryDecision::Skipped(SkipReason::NothingDown);
        }

        info!(
            missing_sessions = missing_sessions.len(),
            down_targets = down_targets.len(),
            manual,
            "starting recovery attempt"
        );

        let mut actions = Vec::new();
        for session in &missing_sessions {
            let result = mux.create_session(session);
            record(&mut actions, ActionKind::CreateSession, session, result);
            std::thread::sleep(self.policy.settle);
        }
        for (i, target) in down_targets.iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.policy.pace);
            }
            if !mux.session_exists(&target.session) {
                warn!(target = %target.name, session = %target.session, "skipping launch, session still missing");
                actions.push(RecoveryAction {
                    kind: ActionKind::LaunchAgent,
                    target: target.name.clone(),
                    ok: false,
                    error: Some(format!("session '{}' does not exist", target.session)),
                });
                continue;
            }
            let result = mux.launch_agent(target);
            record(&mut actions, ActionKind::LaunchAgent, &target.name, result);
        }

        let succeeded = actions.iter().filter(|a| a.ok).count();
        let outcome = if succeeded == actions.len() {
            RecoveryOutcome::Success
        } else if succeeded > 0 {
            RecoveryOutcome::Partial
        } else {
            RecoveryOutcome::Failed
        };

        *self.last_attempt_at.lock().unwrap() = Some(now);

        let attempt = RecoveryAttempt {
            id: Uuid::new_v4(),
            started_at: now,
            trigger: verdict.overall,
            manual,
            actions,
            outcome,
        };
        info!(id = %attempt.id, outcome = ?attempt.outcome, "recovery attempt finished");
        RecoveryDecision::Attempted(attempt)
    }
}

fn record<E: std::fmt::Display>(
    actions: &mut Vec<RecoveryAction>,
    kind: ActionKind,
    target: &str,
    result: Result<(), E>,
) {
    let (ok, error) = match result {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    if let Some(msg) = &error {
        warn!(?kind, target = %target, error = %msg, "recovery action failed");
    }
    actions.push(RecoveryAction {
        kind,
        target: target.to_string(),
        ok,
        error,
    });
}
