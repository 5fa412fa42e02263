use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Name under which the configured store and executor are registered.
pub const DEFAULT_ALIAS: &str = "default";
/// Upper bound on a single loop sleep, in seconds (u32::MAX).
pub const DEFAULT_IDLE_MAX_SECS: u64 = 4_294_967_295;
pub const DEFAULT_MAX_WORKERS: usize = 10;
/// Process pool: per-command wall-clock budget.
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 300;
/// Process pool: captured output cap, matching `jobs_history.cmd_output`.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4096;
/// Seconds a run time may lag behind "now" before it counts as missed.
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 30;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

/// Which job store backs the `default` alias.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Persistent,
}

/// The scheduler options recognised in `[scheduler]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default = "default_max_workers")]
    pub executor_max_workers: usize,
    /// Longest the main loop sleeps when nothing is scheduled.
    #[serde(default = "default_idle_max_seconds")]
    pub idle_max_seconds: u64,
    /// Seconds a fire time may lag behind "now" before it counts as missed.
    #[serde(default = "default_misfire_grace_time")]
    pub default_misfire_grace_time: u64,
    #[serde(default = "bool_true")]
    pub default_coalesce: bool,
    #[serde(default = "default_max_instances")]
    pub default_max_instances: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            executor_max_workers: default_max_workers(),
            idle_max_seconds: default_idle_max_seconds(),
            default_misfire_grace_time: default_misfire_grace_time(),
            default_coalesce: true,
            default_max_instances: default_max_instances(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Settings for the shell-command process pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_process_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_process_timeout(),
            max_output_chars: default_max_output_chars(),
            shell: default_shell(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_idle_max_seconds() -> u64 {
    DEFAULT_IDLE_MAX_SECS
}
fn default_misfire_grace_time() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_max_instances() -> u32 {
    1
}
fn default_process_timeout() -> u64 {
    DEFAULT_PROCESS_TIMEOUT_SECS
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_shell() -> String {
    "sh".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `CADENCE_SCHEDULER__STORE=persistent`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CADENCE_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading configuration");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CADENCE_").split("__")),
        )
    }

    /// Extract and validate from an already-assembled provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: CadenceConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.executor_max_workers == 0 {
            return Err(CoreError::Config(
                "scheduler.executor_max_workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.default_max_instances == 0 {
            return Err(CoreError::Config(
                "scheduler.default_max_instances must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CadenceConfig::default();
        assert_eq!(config.scheduler.store, StoreKind::Memory);
        assert_eq!(config.scheduler.executor_max_workers, 10);
        assert_eq!(config.scheduler.idle_max_seconds, 4_294_967_295);
        assert_eq!(config.scheduler.default_misfire_grace_time, 30);
        assert!(config.scheduler.default_coalesce);
        assert_eq!(config.scheduler.default_max_instances, 1);
        assert_eq!(config.process.shell, "sh");
    }

    #[test]
    fn toml_overrides_are_applied() {
        let toml = r#"
            [scheduler]
            store = "persistent"
            executor_max_workers = 4
            default_coalesce = false

            [database]
            path = "/tmp/jobs.db"
        "#;
        let config = CadenceConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .expect("valid config");
        assert_eq!(config.scheduler.store, StoreKind::Persistent);
        assert_eq!(config.scheduler.executor_max_workers, 4);
        assert!(!config.scheduler.default_coalesce);
        // untouched keys keep their defaults
        assert_eq!(config.scheduler.default_max_instances, 1);
        assert_eq!(config.database.path, "/tmp/jobs.db");
    }

    #[test]
    fn zero_workers_rejected() {
        let toml = "[scheduler]\nexecutor_max_workers = 0\n";
        let err = CadenceConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn unknown_store_kind_rejected() {
        let toml = "[scheduler]\nstore = \"redis\"\n";
        assert!(CadenceConfig::from_figment(Figment::new().merge(Toml::string(toml))).is_err());
    }
}
