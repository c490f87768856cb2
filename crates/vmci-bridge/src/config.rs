//! Bridge configuration (`vmci.toml`)
//!
//! ```toml
//! [bridge]
//! enabled = true
//! trace_resolution = false
//! ```
//!
//! `VMCI_BRIDGE_ENABLED` overrides `enabled` when set.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides [`BridgeConfig::enabled`]
pub const ENABLED_ENV: &str = "VMCI_BRIDGE_ENABLED";

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Environment override is not a boolean
    #[error("Invalid value for VMCI_BRIDGE_ENABLED: {0:?}")]
    InvalidEnv(String),
}

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Enablement gate checked by every entry point
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Log every dispatch resolution at `trace` level
    #[serde(default)]
    pub trace_resolution: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            trace_resolution: false,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    bridge: BridgeConfig,
}

impl BridgeConfig {
    /// Parse a configuration document; a missing `[bridge]` table means defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.bridge)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Apply `VMCI_BRIDGE_ENABLED` from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_enabled_override(std::env::var(ENABLED_ENV).ok().as_deref())
    }

    /// Apply an explicit value of the enablement override
    pub fn with_enabled_override(mut self, value: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(raw) = value {
            self.enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::InvalidEnv(raw.to_string())),
            };
        }
        Ok(self)
    }

    /// Configuration with the bridge switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Serialize back to the file format
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            bridge: self.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Write the configuration to a file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path.as_ref(), self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert!(config.enabled);
        assert!(!config.trace_resolution);
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_parse_bridge_table() {
        let config = BridgeConfig::from_toml_str(
            r#"
[bridge]
enabled = false
trace_resolution = true
"#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert!(config.trace_resolution);
    }

    #[test]
    fn test_partial_table_keeps_defaults() {
        let config = BridgeConfig::from_toml_str("[bridge]\ntrace_resolution = true\n").unwrap();
        assert!(config.enabled);
        assert!(config.trace_resolution);
    }

    #[test]
    fn test_parse_error() {
        let err = BridgeConfig::from_toml_str("[bridge]\nenabled = \"maybe\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", BridgeConfig::disabled().to_toml_string().unwrap()).unwrap();
        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config, BridgeConfig::disabled());
    }

    #[test]
    fn test_serialized_form_round_trips() {
        let config = BridgeConfig {
            enabled: false,
            trace_resolution: true,
        };
        let serialized = config.to_toml_string().unwrap();
        let doc: toml::Table = toml::from_str(&serialized).unwrap();
        let bridge = doc["bridge"].as_table().unwrap();
        assert_eq!(bridge["enabled"].as_bool(), Some(false));
        assert_eq!(bridge["trace_resolution"].as_bool(), Some(true));
        assert_eq!(BridgeConfig::from_toml_str(&serialized).unwrap(), config);
    }

    #[test]
    fn test_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmci.toml");
        BridgeConfig::disabled().to_file(&path).unwrap();
        assert_eq!(BridgeConfig::from_file(&path).unwrap(), BridgeConfig::disabled());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::from_file(dir.path().join("vmci.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_enabled_override() {
        let base = BridgeConfig::default();
        assert!(!base.clone().with_enabled_override(Some("0")).unwrap().enabled);
        assert!(!base.clone().with_enabled_override(Some("FALSE")).unwrap().enabled);
        assert!(BridgeConfig::disabled()
            .with_enabled_override(Some("true"))
            .unwrap()
            .enabled);
        assert!(base.clone().with_enabled_override(None).unwrap().enabled);
        assert!(matches!(
            base.with_enabled_override(Some("yes")),
            Err(ConfigError::InvalidEnv(_))
        ));
    }
}
