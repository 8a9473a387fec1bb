use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".fleetwatch";

/// One observable pane hosting an agent or the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Logical name, e.g. `worker1`.
    pub name: String,
    /// The tmux session this target lives in.
    pub session: String,
    /// Resolved tmux target address, e.g. `multiagent:0.1`.
    pub pane: String,
    /// Command injected to relaunch the agent in its pane.
    #[serde(default)]
    pub launch_command: Option<String>,
}

fn default_base_interval_secs() -> u64 {
    10
}

fn default_max_interval_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sample_timeout_secs() -> u64 {
    5
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_min_healthy_fraction() -> f64 {
    0.6
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_recovery_check_interval_secs() -> u64 {
    60
}

fn default_pace_millis() -> u64 {
    500
}

fn default_settle_millis() -> u64 {
    1000
}

fn default_sessions() -> Vec<String> {
    vec!["president".to_string(), "multiagent".to_string()]
}

fn default_targets() -> Vec<Target> {
    let mut targets = vec![Target {
        name: "president".to_string(),
        session: "president".to_string(),
        pane: "president".to_string(),
        launch_command: Some("claude".to_string()),
    }];
    for i in 1..=4 {
        targets.push(Target {
            name: format!("worker{i}"),
            session: "multiagent".to_string(),
            pane: format!("multiagent:0.{}", i - 1),
            launch_command: Some("claude".to_string()),
        });
    }
    targets
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Base adaptive polling interval per target.
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,
    /// Backoff cap for unchanged targets.
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// No activity for this long demotes a target to idle; no successful
    /// sample for this long demotes it to offline.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Hard bound on each capture call.
    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sample_timeout_secs: default_sample_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Fixed aggregation cadence, independent of per-target backoff.
    #[serde(default = "default_health_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Minimum detected-agent fraction for a degraded (not critical) verdict.
    #[serde(default = "default_min_healthy_fraction")]
    pub min_healthy_fraction: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_health_check_interval_secs(),
            min_healthy_fraction: default_min_healthy_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Minimum spacing between automatic recovery attempts.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// How often the recovery loop re-evaluates the latest verdict.
    #[serde(default = "default_recovery_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Pause between successive agent launches.
    #[serde(default = "default_pace_millis")]
    pub pace_millis: u64,
    /// Settle time after actions before sealing the outcome.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            check_interval_secs: default_recovery_check_interval_secs(),
            pace_millis: default_pace_millis(),
            settle_millis: default_settle_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Sessions that must exist for the fleet to be healthy.
    #[serde(default = "default_sessions")]
    pub sessions: Vec<String>,
    #[serde(default = "default_targets")]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            targets: default_targets(),
            monitor: MonitorSettings::default(),
            health: HealthSettings::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

impl FleetConfig {
    /// Search upward from `start` for a `.fleetwatch/config.toml` and load it.
    /// Returns the default config if no file is found. The result is always
    /// validated — a malformed fleet must not start half-configured.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let (config, path) = match Self::find_config_file(start) {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                let config: FleetConfig =
                    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                (config, Some(path))
            }
            None => (FleetConfig::default(), None),
        };
        config.validate()?;
        Ok((config, path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }
        if self.sessions.is_empty() {
            return Err(ConfigError::Invalid("no sessions configured".to_string()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid("target with empty name".to_string()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
            if !self.sessions.contains(&target.session) {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' references unknown session '{}'",
                    target.name, target.session
                )));
            }
        }

        if self.monitor.base_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.base_interval_secs must be positive".to_string(),
            ));
        }
        if self.monitor.max_interval_secs < self.monitor.base_interval_secs {
            return Err(ConfigError::Invalid(
                "monitor.max_interval_secs must be >= base_interval_secs".to_string(),
            ));
        }
        if self.monitor.idle_timeout_secs == 0 || self.monitor.sample_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor timeouts must be positive".to_string(),
            ));
        }
        if !(self.health.min_healthy_fraction > 0.0 && self.health.min_healthy_fraction <= 1.0) {
            return Err(ConfigError::Invalid(
                "health.min_healthy_fraction must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
