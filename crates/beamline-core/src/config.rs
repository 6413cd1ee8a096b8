use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BeamlineError, Result};

/// Top-level Beamline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub objective: ObjectiveConfig,
    /// Runtime JSONL logging. Absent means disabled.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Workflow engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Outer deadline for a whole run in seconds (0 = no deadline).
    #[serde(default = "default_global_timeout")]
    pub global_timeout_secs: u64,
    /// Default per-attempt step timeout in milliseconds (0 = unbounded).
    #[serde(default = "default_step_timeout")]
    pub step_timeout_ms: u64,
    /// Default attempt budget per step.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Default linear backoff base in milliseconds.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Capacity of the engine event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_timeout_secs: default_global_timeout(),
            step_timeout_ms: default_step_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: 0,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl EngineConfig {
    /// The configured global deadline; `Duration::ZERO` disables it.
    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_secs)
    }
}

fn default_global_timeout() -> u64 { 300 }
fn default_step_timeout() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 1 }
fn default_event_bus_capacity() -> usize { 256 }

/// Objective state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Sender id stamped on every transition signal.
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Recipient every transition signal is addressed to.
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Schema id of transition signals.
    #[serde(default = "default_signal_schema")]
    pub signal_schema: String,
    /// Command queue depth of the registry actor.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            recipient: default_recipient(),
            signal_schema: default_signal_schema(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

fn default_sender() -> String { "objective-machine".to_string() }
fn default_recipient() -> String { "supervisor".to_string() }
fn default_signal_schema() -> String { "objective.status".to_string() }
fn default_mailbox_capacity() -> usize { 64 }

/// JSONL runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable runtime logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Logging level: 1 = run summary only, 2 = per-step, 3 = per-attempt (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: 2,
        }
    }
}

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn log_dir(&self) -> PathBuf {
        match self.log_dir.as_deref() {
            Some(dir) => expand_home(dir),
            None => PathBuf::from("logs"),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BeamlineError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| BeamlineError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn check(&self) -> Result<()> {
        if self.engine.max_attempts == 0 {
            return Err(BeamlineError::Config(
                "engine.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(log) = &self.log {
            if !(1..=3).contains(&log.level) {
                return Err(BeamlineError::Config(format!(
                    "log.level must be 1, 2 or 3 (got {})",
                    log.level
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_BEAMLINE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_BEAMLINE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_BEAMLINE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_BEAMLINE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_BEAMLINE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.global_timeout_secs, 300);
        assert_eq!(config.engine.step_timeout_ms, 30_000);
        assert_eq!(config.engine.max_attempts, 1);
        assert_eq!(config.engine.retry_backoff_ms, 0);
        assert_eq!(config.objective.sender, "objective-machine");
        assert_eq!(config.objective.recipient, "supervisor");
        assert_eq!(config.objective.signal_schema, "objective.status");
        assert!(config.log.is_none());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = AppConfig::parse(
            r#"
[engine]
max_attempts = 3
retry_backoff_ms = 250

[log]
level = 3
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.retry_backoff_ms, 250);
        assert_eq!(config.engine.global_timeout_secs, 300);
        let log = config.log.unwrap();
        assert!(log.enabled);
        assert_eq!(log.level, 3);
        assert_eq!(log.log_dir(), PathBuf::from("logs"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = AppConfig::parse("[engine]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, BeamlineError::Config(_)));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let err = AppConfig::parse("[log]\nlevel = 9\n").unwrap_err();
        assert!(err.to_string().contains("log.level"));
    }

    #[test]
    fn test_global_timeout_duration() {
        let mut engine = EngineConfig::default();
        engine.global_timeout_secs = 0;
        assert_eq!(engine.global_timeout(), Duration::ZERO);
    }
}
