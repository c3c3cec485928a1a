//! Configuration management with validation and defaults
//!
//! Loaded from an optional TOML file, then overridden by `ROUND_ENGINE_*`
//! environment variables, then validated. Round settings are re-read by the
//! scheduler at every transition, so a change applies from the next round on.

use crate::errors::{ConfigurationError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_ROUND_DURATION_SECS: u64 = 30;
pub const MAX_ROUND_DURATION_SECS: u64 = 300;
pub const MIN_OUTCOME_RANGE: u8 = 2;
pub const MAX_OUTCOME_RANGE: u8 = 100;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub rounds: RoundConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Per-round settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoundConfig {
    /// Betting window length
    pub duration_secs: u64,
    /// Gap between creation and opening, so clients can observe the new round
    pub start_delay_secs: u64,
    /// Outcomes are drawn from `0..outcome_range`
    pub outcome_range: u8,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            start_delay_secs: 5,
            outcome_range: 10,
        }
    }
}

impl RoundConfig {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.duration_secs as i64)
    }

    pub fn start_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.start_delay_secs as i64)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(MIN_ROUND_DURATION_SECS..=MAX_ROUND_DURATION_SECS).contains(&self.duration_secs) {
            return Err(ConfigurationError::InvalidValue {
                field: "rounds.duration_secs".to_string(),
                value: self.duration_secs.to_string(),
                reason: format!(
                    "Duration must be between {} and {} seconds",
                    MIN_ROUND_DURATION_SECS, MAX_ROUND_DURATION_SECS
                ),
            }
            .into());
        }

        if !(MIN_OUTCOME_RANGE..=MAX_OUTCOME_RANGE).contains(&self.outcome_range) {
            return Err(ConfigurationError::InvalidValue {
                field: "rounds.outcome_range".to_string(),
                value: self.outcome_range.to_string(),
                reason: format!(
                    "Outcome range must be between {} and {}",
                    MIN_OUTCOME_RANGE, MAX_OUTCOME_RANGE
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// Background ticker and creation retry settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Enable continuous mode as soon as the service starts
    pub continuous_on_start: bool,
    pub creation_max_attempts: u32,
    pub creation_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            continuous_on_start: true,
            creation_max_attempts: 5,
            creation_backoff_ms: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn creation_backoff(&self) -> Duration {
        Duration::from_millis(self.creation_backoff_ms)
    }
}

/// Logging settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "round_engine=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        Ok(toml::from_str(&content)?)
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Some(duration) = env_override("ROUND_ENGINE_DURATION_SECS")? {
            config.rounds.duration_secs = duration;
        }
        if let Some(delay) = env_override("ROUND_ENGINE_START_DELAY_SECS")? {
            config.rounds.start_delay_secs = delay;
        }
        if let Some(range) = env_override("ROUND_ENGINE_OUTCOME_RANGE")? {
            config.rounds.outcome_range = range;
        }
        if let Some(tick) = env_override("ROUND_ENGINE_TICK_MS")? {
            config.scheduler.tick_interval_ms = tick;
        }
        if let Some(continuous) = env_override("ROUND_ENGINE_CONTINUOUS")? {
            config.scheduler.continuous_on_start = continuous;
        }
        if let Ok(filter) = env::var("ROUND_ENGINE_LOG") {
            config.monitoring.log_filter = filter;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &EngineConfig) -> EngineResult<()> {
        config.rounds.validate()?;

        if config.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.tick_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "Tick interval cannot be zero".to_string(),
            }
            .into());
        }

        if config.scheduler.creation_max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.creation_max_attempts".to_string(),
                value: "0".to_string(),
                reason: "At least one creation attempt is required".to_string(),
            }
            .into());
        }

        if config.monitoring.log_filter.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("monitoring.log_filter".to_string()).into());
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into()
        })
    }
}

fn env_override<T: FromStr>(name: &str) -> EngineResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigurationError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "Could not parse value".to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> EngineResult<()> {
    ConfigLoader::new().save(&EngineConfig::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.rounds.duration_secs, 60);
        assert_eq!(config.rounds.outcome_range, 10);
        assert_eq!(config.scheduler.creation_max_attempts, 5);
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_duration_bounds() {
        let mut rounds = RoundConfig::default();
        rounds.duration_secs = 29;
        assert!(rounds.validate().is_err());

        rounds.duration_secs = 301;
        assert!(rounds.validate().is_err());

        rounds.duration_secs = 30;
        assert!(rounds.validate().is_ok());
        rounds.duration_secs = 300;
        assert!(rounds.validate().is_ok());
    }

    #[test]
    fn test_invalid_range_reports_field() {
        let rounds = RoundConfig {
            outcome_range: 1,
            ..Default::default()
        };

        match rounds.validate() {
            Err(EngineError::Configuration(ConfigurationError::InvalidValue { field, .. })) => {
                assert_eq!(field, "rounds.outcome_range");
            }
            other => panic!("Expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() -> EngineResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[rounds]\nduration_secs = 90\nstart_delay_secs = 3\noutcome_range = 10\n").unwrap();

        let config = ConfigLoader::new().with_path(temp_file.path()).load()?;
        assert_eq!(config.rounds.duration_secs, 90);
        assert_eq!(config.rounds.start_delay_secs, 3);
        assert_eq!(config.scheduler, SchedulerConfig::default());

        Ok(())
    }

    #[test]
    fn test_save_and_load_config() -> EngineResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = EngineConfig::default();
        original.rounds.duration_secs = 120;
        ConfigLoader::new().save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;
        assert_eq!(loaded.rounds.duration_secs, 120);
        assert_eq!(loaded.monitoring, original.monitoring);

        Ok(())
    }
}
