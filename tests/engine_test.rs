//! End-to-end engine scenarios against a scripted in-memory multiplexer.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fleetwatch::clock::SystemClock;
use fleetwatch::completion::{AssignedTask, NoTasks, StaticTasks};
use fleetwatch::config::{FleetConfig, HealthSettings, MonitorSettings, RecoverySettings, Target};
use fleetwatch::engine::Engine;
use fleetwatch::error::{ActionError, CaptureError};
use fleetwatch::events::{EngineEvent, EventBus};
use fleetwatch::health::HealthLevel;
use fleetwatch::monitor::AgentState;
use fleetwatch::mux::Multiplexer;
use fleetwatch::recovery::ActionKind;

/// Scripted multiplexer: tests mutate pane screens and the session set.
#[derive(Default)]
struct ScriptedMux {
    sessions: Mutex<BTreeSet<String>>,
    screens: Mutex<HashMap<String, String>>,
}

impl ScriptedMux {
    fn set_screen(&self, pane: &str, content: &str) {
        self.screens
            .lock()
            .unwrap()
            .insert(pane.to_string(), content.to_string());
    }
}

impl Multiplexer for ScriptedMux {
    fn list_sessions(&self) -> Result<BTreeSet<String>, CaptureError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    fn session_exists(&self, session: &str) -> bool {
        self.sessions.lock().unwrap().contains(session)
    }

    fn capture_text(&self, pane: &str) -> Result<String, CaptureError> {
        self.screens
            .lock()
            .unwrap()
            .get(pane)
            .cloned()
            .ok_or_else(|| CaptureError::Unreachable {
                target: pane.to_string(),
                reason: "pane not found".to_string(),
            })
    }

    fn create_session(&self, session: &str) -> Result<(), ActionError> {
        self.sessions.lock().unwrap().insert(session.to_string());
        Ok(())
    }

    fn launch_agent(&self, target: &Target) -> Result<(), ActionError> {
        self.set_screen(&target.pane, "Human:");
        Ok(())
    }
}

fn fast_config() -> FleetConfig {
    FleetConfig {
        sessions: vec!["crew".to_string()],
        targets: vec![Target {
            name: "worker1".to_string(),
            session: "crew".to_string(),
            pane: "crew:0.0".to_string(),
            launch_command: Some("claude".to_string()),
        }],
        monitor: MonitorSettings {
            base_interval_secs: 1,
            max_interval_secs: 2,
            idle_timeout_secs: 300,
            sample_timeout_secs: 5,
        },
        health: HealthSettings {
            check_interval_secs: 1,
            min_healthy_fraction: 0.6,
        },
        recovery: RecoverySettings {
            cooldown_secs: 300,
            check_interval_secs: 1,
            pace_millis: 0,
            settle_millis: 0,
        },
    }
}

/// Receive events until one satisfies `pred` or the deadline passes.
fn wait_for(
    rx: &std::sync::mpsc::Receiver<EngineEvent>,
    timeout: Duration,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for event"));
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended while waiting: {e}"),
        }
    }
}

#[test]
fn status_transitions_flow_through_the_event_bus() {
    let config = fast_config();
    let mux = Arc::new(ScriptedMux::default());
    mux.sessions.lock().unwrap().insert("crew".to_string());
    mux.set_screen("crew:0.0", "Human:");

    let bus = EventBus::new();
    let rx = bus.subscribe();
    let handle = Engine::start(
        config,
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        Arc::new(SystemClock),
        Arc::new(NoTasks),
        bus,
    );

    let idle = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::StatusChanged(c) if c.new_state == AgentState::Idle)
    });
    let EngineEvent::StatusChanged(change) = idle else {
        unreachable!()
    };
    assert_eq!(change.previous_state, AgentState::Offline);
    assert_eq!(change.target, "worker1");

    mux.set_screen("crew:0.0", "Human:\nCreating file: a.ts");
    let working = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::StatusChanged(c) if c.new_state == AgentState::Working)
    });
    let EngineEvent::StatusChanged(change) = working else {
        unreachable!()
    };
    assert_eq!(change.activity.as_deref(), Some("working on a.ts"));

    let status = handle.board().get("worker1").unwrap();
    assert_eq!(status.state, AgentState::Working);
    assert_eq!(status.working_on_file.as_deref(), Some("a.ts"));

    handle.shutdown(Duration::from_secs(5));
}

#[test]
fn healthy_fleet_reports_health_once() {
    let config = fast_config();
    let mux = Arc::new(ScriptedMux::default());
    mux.sessions.lock().unwrap().insert("crew".to_string());
    mux.set_screen("crew:0.0", "Human:");

    let bus = EventBus::new();
    let rx = bus.subscribe();
    let handle = Engine::start(
        config,
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        Arc::new(SystemClock),
        Arc::new(NoTasks),
        bus,
    );

    let health = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::HealthChanged(v) if v.overall == HealthLevel::Healthy)
    });
    let EngineEvent::HealthChanged(verdict) = health else {
        unreachable!()
    };
    assert!(verdict.sessions["crew"]);
    assert!(verdict.agents["worker1"]);

    assert!(handle.latest_health().is_some_and(|v| v.is_healthy()));
    handle.shutdown(Duration::from_secs(5));
}

#[test]
fn completion_signal_carries_the_assigned_task() {
    let config = fast_config();
    let mux = Arc::new(ScriptedMux::default());
    mux.sessions.lock().unwrap().insert("crew".to_string());
    mux.set_screen("crew:0.0", "Human:");

    let tasks = Arc::new(StaticTasks::new(vec![AssignedTask {
        id: "t-42".to_string(),
        target: "worker1".to_string(),
    }]));

    let bus = EventBus::new();
    let rx = bus.subscribe();
    let handle = Engine::start(
        config,
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        Arc::new(SystemClock),
        tasks,
        bus,
    );

    mux.set_screen("crew:0.0", "Human:\n✅ Task completed successfully");
    let completed = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::CompletionDetected(_))
    });
    let EngineEvent::CompletionDetected(signal) = completed else {
        unreachable!()
    };
    assert_eq!(signal.task_id, "t-42");
    assert_eq!(signal.target, "worker1");
    assert!(signal.matched_text.contains("Task completed"));

    handle.shutdown(Duration::from_secs(5));
}

#[test]
fn downed_fleet_triggers_recovery_and_comes_back() {
    let config = fast_config();
    // No sessions, no screens: everything is down.
    let mux = Arc::new(ScriptedMux::default());

    let bus = EventBus::new();
    let rx = bus.subscribe();
    let handle = Engine::start(
        config,
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        Arc::new(SystemClock),
        Arc::new(NoTasks),
        bus,
    );

    let critical = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::HealthChanged(v) if v.overall == HealthLevel::Critical)
    });
    let EngineEvent::HealthChanged(verdict) = critical else {
        unreachable!()
    };
    assert!(!verdict.sessions["crew"]);

    let recovered = wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::RecoveryAttempted(_))
    });
    let EngineEvent::RecoveryAttempted(attempt) = recovered else {
        unreachable!()
    };
    assert!(!attempt.manual);
    assert!(
        attempt
            .actions
            .iter()
            .any(|a| a.kind == ActionKind::CreateSession && a.ok)
    );
    assert!(
        attempt
            .actions
            .iter()
            .any(|a| a.kind == ActionKind::LaunchAgent && a.ok)
    );
    assert!(mux.session_exists("crew"));

    // The relaunched agent's pane becomes observable again.
    wait_for(&rx, Duration::from_secs(10), |e| {
        matches!(e, EngineEvent::StatusChanged(c) if c.new_state == AgentState::Idle)
    });

    handle.shutdown(Duration::from_secs(5));
}
