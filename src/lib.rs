//! Activity detection and recovery for tmux-hosted agent fleets.
//!
//! fleetwatch infers what each agent is doing purely from captured pane
//! text: a prioritized pattern catalog classifies fresh output, a per-target
//! state machine debounces status transitions, a health aggregator rolls the
//! fleet up, and a guarded orchestrator recreates sessions and relaunches
//! agents when things go down.

pub mod analyzer;
pub mod cli;
pub mod clock;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod monitor;
pub mod mux;
pub mod patterns;
pub mod recovery;
