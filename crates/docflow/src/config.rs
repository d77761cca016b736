//! Configuration for docflow

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Case kind handled unless configured otherwise.
pub const DEFAULT_CASE_KIND: &str = "mfc_case";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocflowConfig {
    /// Discriminator of the cases this engine owns
    #[serde(default = "default_case_kind")]
    pub case_kind: String,

    /// JSON snapshot used by the CLI
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Expiry sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub schedule: SweepSchedule,
}

/// When the sweep fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepSchedule {
    /// Once a day at this local time
    DailyAt(NaiveTime),
    /// Fixed period in seconds
    EverySecs(u64),
}

impl Default for SweepSchedule {
    fn default() -> Self {
        SweepSchedule::DailyAt(default_sweep_time())
    }
}

fn default_case_kind() -> String {
    DEFAULT_CASE_KIND.to_string()
}

fn default_store_path() -> PathBuf {
    docflow_logging::docflow_home().join("store.json")
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_time() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            schedule: SweepSchedule::default(),
        }
    }
}

impl Default for DocflowConfig {
    fn default() -> Self {
        Self {
            case_kind: default_case_kind(),
            store_path: default_store_path(),
            sweep: SweepConfig::default(),
        }
    }
}

impl DocflowConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DocflowConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load if the file exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.case_kind.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "case_kind",
                message: "must not be empty".to_string(),
            });
        }
        if self.sweep.schedule == SweepSchedule::EverySecs(0) {
            return Err(ConfigError::Invalid {
                field: "sweep.schedule.every_secs",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    docflow_logging::docflow_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DocflowConfig::default();
        assert_eq!(config.case_kind, "mfc_case");
        assert!(config.sweep.enabled);
        assert_eq!(
            config.sweep.schedule,
            SweepSchedule::DailyAt(NaiveTime::from_hms_opt(0, 5, 0).unwrap())
        );
        assert!(config.store_path.ends_with("store.json"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DocflowConfig = toml::from_str(
            r#"
            case_kind = "other_case"

            [sweep]
            schedule = { every_secs = 60 }
            "#,
        )
        .unwrap();
        assert_eq!(config.case_kind, "other_case");
        assert!(config.sweep.enabled);
        assert_eq!(config.sweep.schedule, SweepSchedule::EverySecs(60));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let config = DocflowConfig {
            case_kind: "mfc_case".to_string(),
            store_path: PathBuf::from("/tmp/store.json"),
            sweep: SweepConfig {
                enabled: false,
                schedule: SweepSchedule::DailyAt(NaiveTime::from_hms_opt(3, 30, 0).unwrap()),
            },
        };
        config.save(&path).unwrap();
        assert_eq!(DocflowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config: DocflowConfig =
            toml::from_str("[sweep]\nschedule = { every_secs = 0 }\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
