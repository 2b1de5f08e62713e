//! Planner configuration
//!
//! Settings are read from TOML, or from JSON when the file name ends in
//! `.json`, and must pass [`PlannerSettings::validate`] before any planner or
//! registry is built from them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const MAX_STATES_LIMIT: usize = 100_000;
pub const MAX_CANDIDATES_LIMIT: usize = 1000;
pub const MAX_OPPORTUNISTIC_CANDIDATES: usize = 1000;
pub const MAX_ENDPOINT_LEN: usize = 100;
pub const MAX_HEALTH_CHECK_RETRIES: u32 = 100;
pub const MAX_HEALTH_CHECK_INTERVAL_SECS: u64 = 3600;
pub const MAX_PLUGIN_CALL_TIMEOUT_SECS: u64 = 600;
/// Max length of the job queue for processing intents.
pub const MAX_TASK_CHANNEL_LEN: usize = 10_000;
/// Max timeout (s) between each intent's reevaluation.
pub const MAX_CONTROLLER_TIMEOUT_SECS: u64 = 600;
/// Max time-to-live (ms) for an entry in the plan cache.
pub const MAX_PLAN_CACHE_TTL_MS: u64 = 500_000;
/// Max interval (ms) between plan cache purges.
pub const MAX_PLAN_CACHE_TIMEOUT_MS: u64 = 50_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unable to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {value} (allowed {allowed})")]
    OutOfRange {
        field: &'static str,
        value: String,
        allowed: String,
    },
}

fn out_of_range(field: &'static str, value: impl ToString, allowed: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        allowed: allowed.to_string(),
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub generic: GenericConfig,
    pub controller: ControllerConfig,
    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericConfig {
    /// Default log filter directive, overridable through `RUST_LOG`
    pub log_filter: String,
}

impl Default for GenericConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
        }
    }
}

/// Controller related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of workers processing intents
    pub workers: usize,
    /// Capacity of the intent task channel
    pub task_channel_length: usize,
    /// Seconds between two reevaluations of all intents
    pub controller_timeout_secs: u64,
    /// Time-to-live of a plan cache entry in milliseconds
    pub plan_cache_ttl_ms: u64,
    /// Interval between plan cache purges in milliseconds
    pub plan_cache_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            task_channel_length: 100,
            controller_timeout_secs: 5,
            plan_cache_ttl_ms: 10_000,
            plan_cache_timeout_ms: 1000,
        }
    }
}

impl ControllerConfig {
    pub fn controller_timeout(&self) -> Duration {
        Duration::from_secs(self.controller_timeout_secs)
    }

    pub fn plan_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.plan_cache_ttl_ms)
    }

    pub fn plan_cache_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_cache_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub astar: AStarConfig,
}

/// Settings of the A* planner and its plugin registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AStarConfig {
    /// Upper bound on the number of nodes in the state graph
    pub max_states: usize,
    /// Candidates taken from one actuator per expansion
    pub max_candidates: usize,
    /// Nodes wired to the goal when no real path exists; 0 disables it
    pub opportunistic_candidates: usize,
    /// Host the plugin registry listens on
    pub plugin_manager_endpoint: String,
    /// Port the plugin registry listens on
    pub plugin_manager_port: u16,
    /// Consecutive failed health checks before a plugin is evicted
    pub health_check_retries: u32,
    /// Seconds between health checks
    pub health_check_interval_secs: u64,
    /// Deadline in seconds of one call to a plugin actuator
    pub plugin_call_timeout_secs: u64,
}

impl Default for AStarConfig {
    fn default() -> Self {
        Self {
            max_states: 1000,
            max_candidates: 10,
            opportunistic_candidates: 0,
            plugin_manager_endpoint: "localhost".to_string(),
            plugin_manager_port: 33333,
            health_check_retries: 3,
            health_check_interval_secs: 5,
            plugin_call_timeout_secs: 10,
        }
    }
}

impl AStarConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn plugin_call_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_call_timeout_secs)
    }
}

impl PlannerSettings {
    /// Load settings from a TOML or JSON file and validate them.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let settings: PlannerSettings = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&data)?
        } else {
            toml::from_str(&data)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check every bound; the first violation is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.planner.astar.validate()?;
        self.controller.validate()
    }
}

impl AStarConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_states < 1 || self.max_states > MAX_STATES_LIMIT {
            return Err(out_of_range(
                "planner.astar.max_states",
                self.max_states,
                format!("1..={}", MAX_STATES_LIMIT),
            ));
        }
        if self.max_candidates < 1 || self.max_candidates > MAX_CANDIDATES_LIMIT {
            return Err(out_of_range(
                "planner.astar.max_candidates",
                self.max_candidates,
                format!("1..={}", MAX_CANDIDATES_LIMIT),
            ));
        }
        if self.opportunistic_candidates > MAX_OPPORTUNISTIC_CANDIDATES {
            return Err(out_of_range(
                "planner.astar.opportunistic_candidates",
                self.opportunistic_candidates,
                format!("0..={}", MAX_OPPORTUNISTIC_CANDIDATES),
            ));
        }
        if self.plugin_manager_endpoint.is_empty()
            || self.plugin_manager_endpoint.len() > MAX_ENDPOINT_LEN
        {
            return Err(out_of_range(
                "planner.astar.plugin_manager_endpoint",
                &self.plugin_manager_endpoint,
                format!("1..={} characters", MAX_ENDPOINT_LEN),
            ));
        }
        if self.plugin_manager_port == 0 {
            return Err(out_of_range(
                "planner.astar.plugin_manager_port",
                self.plugin_manager_port,
                "1..=65535",
            ));
        }
        if self.health_check_retries < 1 || self.health_check_retries > MAX_HEALTH_CHECK_RETRIES {
            return Err(out_of_range(
                "planner.astar.health_check_retries",
                self.health_check_retries,
                format!("1..={}", MAX_HEALTH_CHECK_RETRIES),
            ));
        }
        if self.health_check_interval_secs < 1
            || self.health_check_interval_secs > MAX_HEALTH_CHECK_INTERVAL_SECS
        {
            return Err(out_of_range(
                "planner.astar.health_check_interval_secs",
                self.health_check_interval_secs,
                format!("1..={}", MAX_HEALTH_CHECK_INTERVAL_SECS),
            ));
        }
        if self.plugin_call_timeout_secs < 1 || self.plugin_call_timeout_secs > MAX_PLUGIN_CALL_TIMEOUT_SECS {
            return Err(out_of_range(
                "planner.astar.plugin_call_timeout_secs",
                self.plugin_call_timeout_secs,
                format!("1..={}", MAX_PLUGIN_CALL_TIMEOUT_SECS),
            ));
        }
        Ok(())
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_workers = num_cpus::get();
        if self.workers < 1 || self.workers > max_workers {
            return Err(out_of_range(
                "controller.workers",
                self.workers,
                format!("1..={}", max_workers),
            ));
        }
        if self.task_channel_length < 1 || self.task_channel_length > MAX_TASK_CHANNEL_LEN {
            return Err(out_of_range(
                "controller.task_channel_length",
                self.task_channel_length,
                format!("1..={}", MAX_TASK_CHANNEL_LEN),
            ));
        }
        if self.controller_timeout_secs < 1 || self.controller_timeout_secs > MAX_CONTROLLER_TIMEOUT_SECS {
            return Err(out_of_range(
                "controller.controller_timeout_secs",
                self.controller_timeout_secs,
                format!("1..={}", MAX_CONTROLLER_TIMEOUT_SECS),
            ));
        }
        if self.plan_cache_ttl_ms < 1 || self.plan_cache_ttl_ms > MAX_PLAN_CACHE_TTL_MS {
            return Err(out_of_range(
                "controller.plan_cache_ttl_ms",
                self.plan_cache_ttl_ms,
                format!("1..={}", MAX_PLAN_CACHE_TTL_MS),
            ));
        }
        if self.plan_cache_timeout_ms < 1 || self.plan_cache_timeout_ms > MAX_PLAN_CACHE_TIMEOUT_MS {
            return Err(out_of_range(
                "controller.plan_cache_timeout_ms",
                self.plan_cache_timeout_ms,
                format!("1..={}", MAX_PLAN_CACHE_TIMEOUT_MS),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PlannerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.planner.astar.max_states, 1000);
        assert_eq!(settings.planner.astar.plugin_manager_port, 33333);
        assert_eq!(settings.generic.log_filter, "info");
    }

    #[test]
    fn test_out_of_range_values() {
        let mut settings = PlannerSettings::default();
        settings.planner.astar.max_states = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::OutOfRange { field: "planner.astar.max_states", .. })
        ));

        let mut settings = PlannerSettings::default();
        settings.planner.astar.opportunistic_candidates = 1001;
        assert!(settings.validate().is_err());

        let mut settings = PlannerSettings::default();
        settings.planner.astar.plugin_manager_endpoint = "x".repeat(101);
        assert!(settings.validate().is_err());

        let mut settings = PlannerSettings::default();
        settings.planner.astar.plugin_manager_port = 0;
        assert!(settings.validate().is_err());

        let mut settings = PlannerSettings::default();
        settings.planner.astar.plugin_call_timeout_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::OutOfRange { field: "planner.astar.plugin_call_timeout_secs", .. })
        ));

        let mut settings = PlannerSettings::default();
        settings.controller.workers = num_cpus::get() + 1;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::OutOfRange { field: "controller.workers", .. })
        ));

        let mut settings = PlannerSettings::default();
        settings.controller.plan_cache_ttl_ms = MAX_PLAN_CACHE_TTL_MS + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[generic]
log_filter = "debug"

[planner.astar]
max_states = 2000
max_candidates = 5
plugin_manager_port = 44444
"#
        )
        .unwrap();
        let settings = PlannerSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.planner.astar.max_states, 2000);
        assert_eq!(settings.planner.astar.max_candidates, 5);
        assert_eq!(settings.planner.astar.plugin_manager_port, 44444);
        // untouched keys keep their defaults
        assert_eq!(settings.planner.astar.health_check_retries, 3);
        assert_eq!(settings.generic.log_filter, "debug");
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            file,
            r#"{{"controller": {{"task_channel_length": 50}}, "planner": {{"astar": {{"opportunistic_candidates": 2}}}}}}"#
        )
        .unwrap();
        let settings = PlannerSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.controller.task_channel_length, 50);
        assert_eq!(settings.planner.astar.opportunistic_candidates, 2);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[planner.astar]\nmax_candidates = 0").unwrap();
        assert!(matches!(
            PlannerSettings::from_file(file.path()),
            Err(ConfigError::OutOfRange { .. })
        ));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "this is not toml [").unwrap();
        assert!(matches!(
            PlannerSettings::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));

        assert!(matches!(
            PlannerSettings::from_file("/nonexistent/planner.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
