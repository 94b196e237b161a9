//! Engine configuration

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the persisted record file inside the data directory.
pub(crate) const STORE_FILE: &str = "downloads.json";

/// Configuration for the download engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the engine's persistent state.
    pub data_dir: PathBuf,

    /// TCP connect timeout in seconds.
    pub connect_timeout: u64,

    /// Idle read timeout in seconds.
    pub read_timeout: u64,

    /// Maximum redirects to follow per request.
    pub max_redirects: usize,

    /// Bounded per-subscriber event buffer capacity.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            connect_timeout: 30,
            read_timeout: 30,
            max_redirects: 10,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(EngineError::Config("data_dir must not be empty".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(EngineError::Config(
                "connect_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.read_timeout == 0 {
            return Err(EngineError::Config(
                "read_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the persisted record file.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout, 30);
        assert_eq!(config.read_timeout, 30);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn rejects_zero_timeouts_and_capacity() {
        let config = EngineConfig {
            connect_timeout: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            data_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn store_path_is_inside_data_dir() {
        let config = EngineConfig {
            data_dir: PathBuf::from("/var/lib/app"),
            ..Default::default()
        };
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/app/downloads.json"));
    }
}
