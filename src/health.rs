//! Fleet health aggregation.
//!
//! Pure assessment: given which sessions exist and which agents look alive,
//! roll the fleet up into healthy / degraded / critical. Side effects
//! (recovery) belong to the orchestrator, not here.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::{AgentState, AgentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

/// One fleet-wide health assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthVerdict {
    /// Required session name → whether it currently exists.
    pub sessions: BTreeMap<String, bool>,
    /// Target name → whether its agent is detected (any state but offline).
    pub agents: BTreeMap<String, bool>,
    pub overall: HealthLevel,
    pub observed_at: DateTime<Utc>,
}

impl HealthVerdict {
    /// True when two verdicts agree on everything except the timestamp.
    /// Used to suppress repeat health-changed events.
    pub fn same_state(&self, other: &Self) -> bool {
        self.sessions == other.sessions
            && self.agents == other.agents
            && self.overall == other.overall
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == HealthLevel::Healthy
    }
}

pub struct HealthAggregator {
    required_sessions: Vec<String>,
    expected_targets: Vec<String>,
    min_healthy_fraction: f64,
}

impl HealthAggregator {
    pub fn new(
        required_sessions: Vec<String>,
        expected_targets: Vec<String>,
        min_healthy_fraction: f64,
    ) -> Self {
        Self {
            required_sessions,
            expected_targets,
            min_healthy_fraction,
        }
    }

    /// Assess the fleet. Any missing required session is critical outright;
    /// otherwise the healthy-agent fraction decides.
    pub fn assess(
        &self,
        live_sessions: &BTreeSet<String>,
        statuses: &BTreeMap<String, AgentStatus>,
        observed_at: DateTime<Utc>,
    ) -> HealthVerdict {
        let sessions: BTreeMap<String, bool> = self
            .required_sessions
            .iter()
            .map(|s| (s.clone(), live_sessions.contains(s)))
            .collect();

        let agents: BTreeMap<String, bool> = self
            .expected_targets
            .iter()
            .map(|name| {
                let alive = statuses
                    .get(name)
                    .is_some_and(|s| s.state != AgentState::Offline);
                (name.clone(), alive)
            })
            .collect();

        let overall = if sessions.values().any(|present| !present) {
            HealthLevel::Critical
        } else {
            let total = agents.len();
            let alive = agents.values().filter(|a| **a).count();
            let fraction = if total == 0 {
                1.0
            } else {
                alive as f64 / total as f64
            };
            if alive == total {
                HealthLevel::Healthy
            } else if fraction >= self.min_healthy_fraction {
                HealthLevel::Degraded
            } else {
                HealthLevel::Critical
            }
        };

        HealthVerdict {
            sessions,
            agents,
            overall,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(name: &str, state: AgentState) -> AgentStatus {
        AgentStatus {
            target: name.to_string(),
            state,
            current_activity: None,
            working_on_file: None,
            executing_command: None,
            last_activity_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    fn fleet(states: &[(&str, AgentState)]) -> BTreeMap<String, AgentStatus> {
        states
            .iter()
            .map(|(n, s)| (n.to_string(), status(n, *s)))
            .collect()
    }

    fn aggregator() -> HealthAggregator {
        HealthAggregator::new(
            vec!["president".to_string(), "multiagent".to_string()],
            vec!["president", "worker1", "worker2", "worker3", "worker4"]
                .into_iter()
                .map(String::from)
                .collect(),
            0.6,
        )
    }

    fn all_sessions() -> BTreeSet<String> {
        ["president", "multiagent"].iter().map(|s| s.to_string()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_000, 0).unwrap()
    }

    #[test]
    fn all_agents_alive_is_healthy() {
        let statuses = fleet(&[
            ("president", AgentState::Idle),
            ("worker1", AgentState::Working),
            ("worker2", AgentState::Idle),
            ("worker3", AgentState::Error),
            ("worker4", AgentState::Working),
        ]);
        let v = aggregator().assess(&all_sessions(), &statuses, now());
        assert_eq!(v.overall, HealthLevel::Healthy);
        assert!(v.agents.values().all(|a| *a));
    }

    #[test]
    fn three_of_five_alive_is_degraded_at_point_six_threshold() {
        let statuses = fleet(&[
            ("president", AgentState::Idle),
            ("worker1", AgentState::Working),
            ("worker2", AgentState::Idle),
            ("worker3", AgentState::Offline),
            ("worker4", AgentState::Offline),
        ]);
        let v = aggregator().assess(&all_sessions(), &statuses, now());
        assert_eq!(v.overall, HealthLevel::Degraded);
    }

    #[test]
    fn two_of_five_alive_is_critical() {
        let statuses = fleet(&[
            ("president", AgentState::Idle),
            ("worker1", AgentState::Working),
            ("worker2", AgentState::Offline),
            ("worker3", AgentState::Offline),
            ("worker4", AgentState::Offline),
        ]);
        let v = aggregator().assess(&all_sessions(), &statuses, now());
        assert_eq!(v.overall, HealthLevel::Critical);
    }

    #[test]
    fn missing_required_session_is_critical_regardless_of_agents() {
        let statuses = fleet(&[
            ("president", AgentState::Working),
            ("worker1", AgentState::Working),
            ("worker2", AgentState::Working),
            ("worker3", AgentState::Working),
            ("worker4", AgentState::Working),
        ]);
        let sessions: BTreeSet<String> = ["president".to_string()].into();
        let v = aggregator().assess(&sessions, &statuses, now());
        assert_eq!(v.overall, HealthLevel::Critical);
        assert!(!v.sessions["multiagent"]);
    }

    #[test]
    fn never_sampled_target_counts_as_down() {
        let statuses = fleet(&[
            ("president", AgentState::Idle),
            ("worker1", AgentState::Idle),
            ("worker2", AgentState::Idle),
            ("worker3", AgentState::Idle),
        ]);
        // worker4 has no snapshot at all.
        let v = aggregator().assess(&all_sessions(), &statuses, now());
        assert!(!v.agents["worker4"]);
        assert_eq!(v.overall, HealthLevel::Degraded);
    }

    #[test]
    fn same_state_ignores_timestamp() {
        let statuses = fleet(&[("president", AgentState::Idle)]);
        let agg = HealthAggregator::new(
            vec!["president".to_string()],
            vec!["president".to_string()],
            0.6,
        );
        let sessions: BTreeSet<String> = ["president".to_string()].into();
        let a = agg.assess(&sessions, &statuses, now());
        let b = agg.assess(&sessions, &statuses, Utc.timestamp_opt(2_000, 0).unwrap());
        assert!(a.same_state(&b));
        assert_ne!(a, b);
    }
}
