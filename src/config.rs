//! Service configuration, loaded from an optional JSON file. Every field has
//! a default so a partial file only overrides what it names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::{DEFAULT_COLS, DEFAULT_ROWS};
use crate::i2c::{BusConfig, FaultPolicy};
use crate::pscu::topology::MUX_ADDRESS;
use crate::pscu::{PscuOptions, DEFAULT_QUAD_ENABLE_INTERVAL};

const DEFAULT_BUS_PATH: &str = "/dev/i2c-2";
const DEFAULT_UPDATE_INTERVAL_MS: u64 = 50;
const DEFAULT_LCD_DEVICE: &str = "/dev/ttyACM0";
const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8888";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PscuConfig {
    pub bus_path: String,
    pub mux_address: u8,
    pub fault_policy: FaultPolicy,
    /// Period of the cooperative tick.
    pub update_interval_ms: u64,
    pub quad_enable_interval_ms: u64,
    pub detector_position_offset: f64,
    /// Serial device of the front-panel LCD; `None` runs without a panel.
    pub lcd_device: Option<String>,
    pub lcd_rows: u8,
    pub lcd_cols: u8,
    pub listen_address: String,
}

impl Default for PscuConfig {
    fn default() -> Self {
        Self {
            bus_path: DEFAULT_BUS_PATH.to_string(),
            mux_address: MUX_ADDRESS,
            fault_policy: FaultPolicy::Trap,
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            quad_enable_interval_ms: DEFAULT_QUAD_ENABLE_INTERVAL.as_millis() as u64,
            detector_position_offset: 0.0,
            lcd_device: Some(DEFAULT_LCD_DEVICE.to_string()),
            lcd_rows: DEFAULT_ROWS,
            lcd_cols: DEFAULT_COLS,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

impl PscuConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "update_interval_ms",
                reason: "must be at least 1 ms",
            });
        }
        Ok(())
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            fault_policy: self.fault_policy,
        }
    }

    pub fn pscu_options(&self) -> PscuOptions {
        PscuOptions {
            quad_enable_interval: Duration::from_millis(self.quad_enable_interval_ms),
            detector_position_offset: self.detector_position_offset,
            mux_address: self.mux_address,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}
