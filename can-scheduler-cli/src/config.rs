//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use can_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub startup: Vec<SignalUpdate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub fd: bool,
    /// Log frames instead of opening the interface
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            fd: false,
            dry_run: false,
        }
    }
}

fn default_interface() -> String {
    "can0".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub dbc_files: Vec<PathBuf>,
}

/// One signal assignment, from `[[startup]]` or `--set`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignalUpdate {
    pub message: String,
    pub signal: String,
    pub value: f64,
}

impl SignalUpdate {
    /// Parse `MESSAGE.SIGNAL=VALUE`
    pub fn parse_assignment(input: &str) -> Result<Self> {
        let Some((target, value)) = input.split_once('=') else {
            bail!("expected MESSAGE.SIGNAL=VALUE, got '{}'", input);
        };
        let Some((message, signal)) = target.trim().split_once('.') else {
            bail!("expected MESSAGE.SIGNAL before '=', got '{}'", target);
        };
        if message.is_empty() || signal.is_empty() {
            bail!("empty message or signal name in '{}'", input);
        }
        let value = value
            .trim()
            .parse()
            .with_context(|| format!("invalid value in '{}'", input))?;

        Ok(Self {
            message: message.to_string(),
            signal: signal.to_string(),
            value,
        })
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [bus]
            interface = "vcan0"

            [database]
            dbc_files = ["STM_BUS.dbc"]

            [scheduler]
            default_cycle_time_ms = 50

            [[startup]]
            message = "WHEEL_ANGLE"
            signal = "Wheel_Angle"
            value = 0.0
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.bus.interface, "vcan0");
        assert!(!config.bus.fd);
        assert_eq!(config.database.dbc_files.len(), 1);
        assert_eq!(config.scheduler.default_cycle_time_ms, 50);
        assert!(config.scheduler.enforce_declared_ranges);
        assert_eq!(config.startup.len(), 1);
        assert_eq!(config.startup[0].signal, "Wheel_Angle");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.bus.interface, "can0");
        assert!(!config.bus.dry_run);
        assert!(config.database.dbc_files.is_empty());
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_parse_assignment() {
        let update = SignalUpdate::parse_assignment("WHEEL_ANGLE.Wheel_Angle=-12.5").unwrap();
        assert_eq!(
            update,
            SignalUpdate {
                message: "WHEEL_ANGLE".to_string(),
                signal: "Wheel_Angle".to_string(),
                value: -12.5,
            }
        );

        assert!(SignalUpdate::parse_assignment("WHEEL_ANGLE=3").is_err());
        assert!(SignalUpdate::parse_assignment("WHEEL_ANGLE.Wheel_Angle").is_err());
        assert!(SignalUpdate::parse_assignment("WHEEL_ANGLE.Wheel_Angle=abc").is_err());
        assert!(SignalUpdate::parse_assignment(".Wheel_Angle=1").is_err());
    }
}
