//! Error taxonomy for the engine.
//!
//! Capture and action failures are recoverable: they are converted into state
//! or event data by the component that hit them and never tear down a polling
//! loop. Configuration errors are fatal at startup.

use thiserror::Error;

/// A terminal capture against a target failed.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The multiplexer reported the target as unreachable (pane gone,
    /// session killed, tmux not responding).
    #[error("target '{target}' unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    /// The capture did not return within the per-sample timeout.
    #[error("capture of '{target}' timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },
}

/// A recovery action failed. Recorded in the attempt, not retried until the
/// next cooldown-gated cycle.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to create session '{session}': {reason}")]
    SessionCreate { session: String, reason: String },

    #[error("failed to launch agent on '{target}': {reason}")]
    AgentLaunch { target: String, reason: String },
}

/// Malformed configuration. Fatal: the engine must not start half-configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
