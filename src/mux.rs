//! Terminal multiplexer boundary.
//!
//! The engine never talks to tmux directly — it consumes the `Multiplexer`
//! capability trait, which keeps every external call mockable and lets the
//! integration tests drive the full loop without a terminal. `TmuxMux` is the
//! production implementation, shelling out to the tmux CLI.

use std::collections::BTreeSet;
use std::process::Command;

use tracing::{debug, info};

use crate::config::Target;
use crate::error::{ActionError, CaptureError};

/// External capabilities the engine consumes.
pub trait Multiplexer: Send + Sync {
    /// Names of all live sessions.
    fn list_sessions(&self) -> Result<BTreeSet<String>, CaptureError>;

    /// Whether a named session exists.
    fn session_exists(&self, name: &str) -> bool;

    /// Current visible text of a pane target.
    fn capture_text(&self, pane: &str) -> Result<String, CaptureError>;

    /// Create a detached session with the given name.
    fn create_session(&self, name: &str) -> Result<(), ActionError>;

    /// Relaunch the agent process inside a target's pane.
    fn launch_agent(&self, target: &Target) -> Result<(), ActionError>;
}

/// tmux-backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TmuxMux;

impl TmuxMux {
    pub fn new() -> Self {
        Self
    }
}

impl Multiplexer for TmuxMux {
    fn list_sessions(&self) -> Result<BTreeSet<String>, CaptureError> {
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()
            .map_err(|e| CaptureError::Unreachable {
                target: "(server)".to_string(),
                reason: e.to_string(),
            })?;

        // list-sessions fails when no server is running; that means no sessions.
        if !output.status.success() {
            return Ok(BTreeSet::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn session_exists(&self, name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn capture_text(&self, pane: &str) -> Result<String, CaptureError> {
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", pane, "-p"])
            .output()
            .map_err(|e| CaptureError::Unreachable {
                target: pane.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CaptureError::Unreachable {
                target: pane.to_string(),
                reason: format!("capture-pane failed: {stderr}"),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn create_session(&self, name: &str) -> Result<(), ActionError> {
        if self.session_exists(name) {
            debug!(session = name, "session already exists, nothing to create");
            return Ok(());
        }

        let output = Command::new("tmux")
            // Generous size so agent TUIs don't wrap into noise.
            .args(["new-session", "-d", "-s", name, "-x", "220", "-y", "50"])
            .output()
            .map_err(|e| ActionError::SessionCreate {
                session: name.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ActionError::SessionCreate {
                session: name.to_string(),
                reason: format!("tmux new-session failed: {stderr}"),
            });
        }

        info!(session = name, "tmux session created");
        Ok(())
    }

    fn launch_agent(&self, target: &Target) -> Result<(), ActionError> {
        let Some(command) = target.launch_command.as_deref() else {
            debug!(target = %target.name, "no launch command configured, skipping");
            return Ok(());
        };

        // `-l` sends the command text literally so punctuation is not
        // interpreted as tmux key names; Enter is a separate explicit key.
        let output = Command::new("tmux")
            .args(["send-keys", "-t", &target.pane, "-l", "--", command])
            .output()
            .map_err(|e| ActionError::AgentLaunch {
                target: target.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ActionError::AgentLaunch {
                target: target.name.clone(),
                reason: format!("tmux send-keys failed: {stderr}"),
            });
        }

        let output = Command::new("tmux")
            .args(["send-keys", "-t", &target.pane, "C-m"])
            .output()
            .map_err(|e| ActionError::AgentLaunch {
                target: target.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ActionError::AgentLaunch {
                target: target.name.clone(),
                reason: format!("tmux send-keys Enter failed: {stderr}"),
            });
        }

        info!(target = %target.name, pane = %target.pane, "agent relaunched");
        Ok(())
    }
}
