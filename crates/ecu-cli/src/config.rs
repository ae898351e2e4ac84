//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `ECUCAN__SECTION__KEY` environment variables.

use can_slcan::SerialConfig;
use config::{Config, ConfigError, Environment, File};
use obd_scanner::ScanConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `ECUCAN__SERIAL__PORT`
pub const ENV_PREFIX: &str = "ECUCAN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding parameter definitions
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ecu-parameters.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub scan: ScanConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load defaults, overlay `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.timeout_ms, 500);
        assert_eq!(config.scan.service_ids, vec![0x01]);
        assert_eq!(config.scan.request_timeout_ms, 100);
        assert_eq!(config.scan.pacing_ms, 15);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_toml_overlay() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyUSB1"
settle_ms = 50

[scan]
service_ids = [1, 9]
pacing_ms = 20

[logging]
json = true
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.serial.settle_ms, 50);
        // Untouched keys keep their defaults
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.scan.service_ids, vec![0x01, 0x09]);
        assert_eq!(config.scan.pacing_ms, 20);
        assert_eq!(config.scan.request_timeout_ms, 100);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
