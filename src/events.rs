//! Engine event stream.
//!
//! Everything observable the engine does is announced as an `EngineEvent` on
//! the `EventBus`. Subscribers get their own channel; the bus drops senders
//! whose receiver has gone away.

use std::sync::{Arc, Mutex, mpsc};

use serde::Serialize;

use crate::completion::CompletionSignal;
use crate::health::HealthVerdict;
use crate::monitor::StatusChange;
use crate::recovery::RecoveryAttempt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    StatusChanged(StatusChange),
    HealthChanged(HealthVerdict),
    RecoveryAttempted(RecoveryAttempt),
    CompletionDetected(CompletionSignal),
}

/// Multi-subscriber event fan-out over std channels.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<mpsc::Sender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, pruning dead ones.
    pub fn emit(&self, event: EngineEvent) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
