//! Engine wiring.
//!
//! One monitoring thread per target, plus a health thread and a recovery
//! thread, all coordinated through a shared stop flag and the event bus.
//! Capture calls are bounded by a per-sample timeout so a wedged multiplexer
//! cannot stall a monitor loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analyzer::ActivityAnalyzer;
use crate::clock::Clock;
use crate::completion::{CompletionDetector, TaskSource};
use crate::config::FleetConfig;
use crate::error::CaptureError;
use crate::events::{EngineEvent, EventBus};
use crate::health::{HealthAggregator, HealthVerdict};
use crate::monitor::{AgentStatus, MonitorConfig, StatusBoard, TargetMonitor};
use crate::mux::Multiplexer;
use crate::recovery::{RecoveryDecision, RecoveryOrchestrator, RecoveryPolicy};

const STOP_POLL_SLICE: Duration = Duration::from_millis(250);

pub struct Engine;

/// Running engine: owns the stop flag and the spawned threads.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    board: StatusBoard,
    latest_health: Arc<Mutex<Option<HealthVerdict>>>,
}

impl Engine {
    pub fn start(
        config: FleetConfig,
        mux: Arc<dyn Multiplexer>,
        clock: Arc<dyn Clock>,
        tasks: Arc<dyn TaskSource>,
        bus: EventBus,
    ) -> EngineHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let board = StatusBoard::new();
        let latest_health = Arc::new(Mutex::new(None));
        let mut threads = Vec::new();

        let monitor_config = MonitorConfig {
            base_interval: Duration::from_secs(config.monitor.base_interval_secs),
            max_interval: Duration::from_secs(config.monitor.max_interval_secs),
            idle_timeout: chrono::Duration::seconds(config.monitor.idle_timeout_secs as i64),
        };
        let sample_timeout = Duration::from_secs(config.monitor.sample_timeout_secs);
        let analyzer = Arc::new(ActivityAnalyzer::builtin());

        for target in &config.targets {
            let target = target.clone();
            let monitor = TargetMonitor::new(
                target.name.clone(),
                Arc::clone(&analyzer),
                monitor_config.clone(),
                Arc::clone(&clock),
            );
            let detector = CompletionDetector::new(Arc::clone(&clock));
            let ctx = TargetLoop {
                target,
                monitor,
                detector,
                mux: Arc::clone(&mux),
                tasks: Arc::clone(&tasks),
                bus: bus.clone(),
                board: board.clone(),
                stop: Arc::clone(&stop),
                sample_timeout,
            };
            threads.push(
                std::thread::Builder::new()
                    .name(format!("monitor-{}", ctx.target.name))
                    .spawn(move || ctx.run())
                    .unwrap_or_else(|e| panic!("failed to spawn monitor thread: {e}")),
            );
        }

        // Health assessments feed the recovery thread through a channel so a
        // slow recovery (pacing sleeps) never delays the next assessment.
        let (verdict_tx, verdict_rx) = mpsc::channel::<HealthVerdict>();

        let aggregator = HealthAggregator::new(
            config.sessions.clone(),
            config.targets.iter().map(|t| t.name.clone()).collect(),
            config.health.min_healthy_fraction,
        );
        let health_loop = HealthLoop {
            aggregator,
            mux: Arc::clone(&mux),
            clock: Arc::clone(&clock),
            bus: bus.clone(),
            board: board.clone(),
            stop: Arc::clone(&stop),
            interval: Duration::from_secs(config.health.check_interval_secs),
            latest: Arc::clone(&latest_health),
            verdict_tx,
        };
        threads.push(
            std::thread::Builder::new()
                .name("health".to_string())
                .spawn(move || health_loop.run())
                .unwrap_or_else(|e| panic!("failed to spawn health thread: {e}")),
        );

        let orchestrator = RecoveryOrchestrator::new(
            config.sessions.clone(),
            config.targets.clone(),
            RecoveryPolicy {
                cooldown: chrono::Duration::seconds(config.recovery.cooldown_secs as i64),
                pace: Duration::from_millis(config.recovery.pace_millis),
                settle: Duration::from_millis(config.recovery.settle_millis),
            },
            Arc::clone(&clock),
        );
        let recovery_loop = RecoveryLoop {
            orchestrator,
            mux: Arc::clone(&mux),
            bus: bus.clone(),
            stop: Arc::clone(&stop),
            verdict_rx,
            check_interval: Duration::from_secs(config.recovery.check_interval_secs),
        };
        threads.push(
            std::thread::Builder::new()
                .name("recovery".to_string())
                .spawn(move || recovery_loop.run())
                .unwrap_or_else(|e| panic!("failed to spawn recovery thread: {e}")),
        );

        info!(targets = config.targets.len(), "engine started");
        EngineHandle {
            stop,
            threads,
            board,
            latest_health,
        }
    }
}

impl EngineHandle {
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn latest_health(&self) -> Option<HealthVerdict> {
        self.latest_health.lock().unwrap().clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Signal every loop to stop and wait up to `grace` for them to exit.
    /// Threads still running after the grace period are abandoned.
    pub fn shutdown(self, grace: Duration) {
        self.stop.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = mpsc::channel();
        let reaper = std::thread::spawn(move || {
            for handle in self.threads {
                let _ = handle.join();
            }
            let _ = done_tx.send(());
        });
        match done_rx.recv_timeout(grace) {
            Ok(()) => {
                let _ = reaper.join();
                info!("engine stopped");
            }
            Err(_) => warn!("shutdown grace period expired, abandoning remaining threads"),
        }
    }
}

struct TargetLoop {
    target: crate::config::Target,
    monitor: TargetMonitor,
    detector: CompletionDetector,
    mux: Arc<dyn Multiplexer>,
    tasks: Arc<dyn TaskSource>,
    bus: EventBus,
    board: StatusBoard,
    stop: Arc<AtomicBool>,
    sample_timeout: Duration,
}

impl TargetLoop {
    fn run(mut self) {
        debug!(target = %self.target.name, pane = %self.target.pane, "monitor loop started");
        while !self.stop.load(Ordering::SeqCst) {
            let capture = sample_with_timeout(
                Arc::clone(&self.mux),
                &self.target.pane,
                self.sample_timeout,
            );

            if let Ok(content) = &capture {
                let tasks = self.tasks.in_progress();
                for signal in self.detector.observe(&self.target.name, content, &tasks) {
                    self.bus.emit(EngineEvent::CompletionDetected(signal));
                }
            }

            // Publish before emitting: a subscriber reacting to the event
            // must see the board already reflecting it.
            let change = self.monitor.cycle(capture);
            self.board.publish(self.monitor.status());
            if let Some(change) = change {
                info!(
                    target = %change.target,
                    from = ?change.previous_state,
                    to = ?change.new_state,
                    activity = change.activity.as_deref().unwrap_or("-"),
                    "status changed"
                );
                self.bus.emit(EngineEvent::StatusChanged(change));
            }

            sleep_sliced(&self.stop, self.monitor.next_interval());
        }
        debug!(target = %self.target.name, "monitor loop stopped");
    }
}

struct HealthLoop {
    aggregator: HealthAggregator,
    mux: Arc<dyn Multiplexer>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    board: StatusBoard,
    stop: Arc<AtomicBool>,
    interval: Duration,
    latest: Arc<Mutex<Option<HealthVerdict>>>,
    verdict_tx: mpsc::Sender<HealthVerdict>,
}

impl HealthLoop {
    fn run(self) {
        // First assessment happens one interval in, after the monitors have
        // had a chance to publish their first samples.
        loop {
            sleep_sliced(&self.stop, self.interval);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let sessions = self.mux.list_sessions().unwrap_or_default();
            let verdict =
                self.aggregator
                    .assess(&sessions, &self.board.snapshot(), self.clock.now());

            let changed = {
                let mut latest = self.latest.lock().unwrap();
                let changed = latest.as_ref().is_none_or(|prev| !prev.same_state(&verdict));
                *latest = Some(verdict.clone());
                changed
            };
            if changed {
                info!(overall = ?verdict.overall, "fleet health changed");
                self.bus.emit(EngineEvent::HealthChanged(verdict.clone()));
            }
            if !verdict.is_healthy() {
                let _ = self.verdict_tx.send(verdict);
            }
        }
    }
}

struct RecoveryLoop {
    orchestrator: RecoveryOrchestrator,
    mux: Arc<dyn Multiplexer>,
    bus: EventBus,
    stop: Arc<AtomicBool>,
    verdict_rx: mpsc::Receiver<HealthVerdict>,
    /// Minimum spacing between verdict evaluations.
    check_interval: Duration,
}

impl RecoveryLoop {
    fn run(self) {
        while !self.stop.load(Ordering::SeqCst) {
            let mut verdict = match self.verdict_rx.recv_timeout(STOP_POLL_SLICE) {
                Ok(v) => v,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };
            // Drain the queue so a burst of verdicts triggers one attempt
            // against the freshest picture.
            while let Ok(newer) = self.verdict_rx.try_recv() {
                verdict = newer;
            }

            match self
                .orchestrator
                .attempt_recovery(self.mux.as_ref(), &verdict, false)
            {
                RecoveryDecision::Attempted(attempt) => {
                    self.bus.emit(EngineEvent::RecoveryAttempted(attempt));
                }
                RecoveryDecision::Skipped(reason) => {
                    debug!(?reason, "recovery skipped");
                }
            }
            sleep_sliced(&self.stop, self.check_interval);
        }
    }
}

/// Capture with a hard deadline. The capture runs on a helper thread; if it
/// exceeds `timeout` the helper is abandoned and a timeout error returned.
fn sample_with_timeout(
    mux: Arc<dyn Multiplexer>,
    pane: &str,
    timeout: Duration,
) -> Result<String, CaptureError> {
    let (tx, rx) = mpsc::channel();
    let pane_owned = pane.to_string();
    std::thread::spawn(move || {
        let _ = tx.send(mux.capture_text(&pane_owned));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout {
            target: pane.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Sleep in short slices so a stop request is honored promptly.
fn sleep_sliced(stop: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let slice = remaining.min(STOP_POLL_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

/// One-shot assessment used by `fleetwatch check`: sample every target once
/// and aggregate fleet health from the results.
pub fn check_once(
    config: &FleetConfig,
    mux: &dyn Multiplexer,
    clock: &dyn Clock,
) -> (BTreeMap<String, AgentStatus>, HealthVerdict) {
    let analyzer = Arc::new(ActivityAnalyzer::builtin());
    let monitor_config = MonitorConfig {
        base_interval: Duration::from_secs(config.monitor.base_interval_secs),
        max_interval: Duration::from_secs(config.monitor.max_interval_secs),
        idle_timeout: chrono::Duration::seconds(config.monitor.idle_timeout_secs as i64),
    };

    let mut statuses = BTreeMap::new();
    for target in &config.targets {
        let mut monitor = TargetMonitor::new(
            target.name.clone(),
            Arc::clone(&analyzer),
            monitor_config.clone(),
            Arc::new(SnapshotClock(clock.now())),
        );
        monitor.cycle(mux.capture_text(&target.pane));
        statuses.insert(target.name.clone(), monitor.status());
    }

    let aggregator = HealthAggregator::new(
        config.sessions.clone(),
        config.targets.iter().map(|t| t.name.clone()).collect(),
        config.health.min_healthy_fraction,
    );
    let sessions = mux.list_sessions().unwrap_or_default();
    let verdict = aggregator.assess(&sessions, &statuses, clock.now());
    (statuses, verdict)
}

/// Fixed-instant clock for one-shot monitors.
struct SnapshotClock(chrono::DateTime<chrono::Utc>);

impl Clock for SnapshotClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}
