//! Run settings
//!
//! Optional YAML file tuning the correlator and the bus. Every key may be
//! omitted:
//!
//! ```yaml
//! ring_size: 65536
//! output_delay: 180
//! drain_on_shutdown: false
//! channel_size: 10000
//! ```

use crate::eventbus::EventBusConfig;
use fidsync_ring::{CorrelatorConfig, DEFAULT_OUTPUT_DELAY, DEFAULT_RING_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Cannot read settings {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Ring capacity, a power of two
    pub ring_size: usize,

    /// Output window in ticks
    pub output_delay: usize,

    /// Evaluate the open window when the run ends
    pub drain_on_shutdown: bool,

    /// Event bus queue depth
    pub channel_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            output_delay: DEFAULT_OUTPUT_DELAY,
            drain_on_shutdown: false,
            channel_size: 10000,
        }
    }
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Self, SettingsError> {
        // an empty document deserializes to unit, not to a map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_yaml(&text)?;
        info!(path = %path.display(), ?settings, "Loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.correlator_config()
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        if self.channel_size == 0 {
            return Err(SettingsError::Invalid(
                "channel_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig::new(self.ring_size, self.output_delay)
    }

    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            channel_size: self.channel_size,
            drain_on_shutdown: self.drain_on_shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ring_size, 65536);
        assert_eq!(settings.output_delay, 180);
        assert!(!settings.drain_on_shutdown);
        assert_eq!(settings.channel_size, 10000);
        assert!(settings.validate().is_ok());
        assert_eq!(Settings::from_yaml("").unwrap(), settings);
    }

    #[test]
    fn test_partial_yaml() {
        let settings = Settings::from_yaml("ring_size: 1024\ndrain_on_shutdown: true\n").unwrap();
        assert_eq!(settings.ring_size, 1024);
        assert_eq!(settings.output_delay, 180);
        assert!(settings.bus_config().drain_on_shutdown);
        assert_eq!(settings.correlator_config(), CorrelatorConfig::new(1024, 180));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            Settings::from_yaml("ring_size: 1000\n"),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_yaml("ring_size: 128\noutput_delay: 128\n"),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_yaml("channel_size: 0\n"),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_yaml("ring_sise: 8\n"),
            Err(SettingsError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "output_delay: 12").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.output_delay, 12);
    }
}
