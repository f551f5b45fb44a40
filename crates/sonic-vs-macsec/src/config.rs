//! Configuration file support for the MACsec subsystem
//!
//! Loads and validates settings from TOML. Every field is optional; a
//! missing file yields the defaults.
//! Default location: /etc/sonic/vsmacsec.conf

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{MacsecError, MacsecResult};
use crate::macsec::types::{ETH_FRAME_BUFFER_SIZE, ETH_HEADER_SIZE};
use crate::shell::IP_CMD;
use crate::traffic_filter::FilterPriority;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/vsmacsec.conf";

/// MACsec manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacsecConfig {
    /// Path to the `ip` control tool
    #[serde(default = "default_ip_cmd")]
    pub ip_cmd: String,

    /// Pipeline slot the MACsec filters are installed at
    #[serde(default = "default_filter_priority")]
    pub filter_priority: i32,

    /// Forwarder read buffer size in bytes
    #[serde(default = "default_frame_buffer_size")]
    pub frame_buffer_size: usize,

    /// Delete stale MACsec devices when the manager starts
    #[serde(default = "default_true")]
    pub cleanup_on_start: bool,

    /// Delete all MACsec devices when the manager stops
    #[serde(default = "default_true")]
    pub cleanup_on_stop: bool,
}

fn default_ip_cmd() -> String {
    IP_CMD.to_string()
}

fn default_filter_priority() -> i32 {
    FilterPriority::MACSEC.0
}

fn default_frame_buffer_size() -> usize {
    ETH_FRAME_BUFFER_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for MacsecConfig {
    fn default() -> Self {
        Self {
            ip_cmd: default_ip_cmd(),
            filter_priority: default_filter_priority(),
            frame_buffer_size: default_frame_buffer_size(),
            cleanup_on_start: default_true(),
            cleanup_on_stop: default_true(),
        }
    }
}

impl MacsecConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> MacsecResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                MacsecError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(MacsecError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> MacsecResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Pipeline priority as a [`FilterPriority`]
    pub fn priority(&self) -> FilterPriority {
        FilterPriority(self.filter_priority)
    }

    /// Validate configuration
    pub fn validate(&self) -> MacsecResult<()> {
        if self.ip_cmd.trim().is_empty() {
            return Err(MacsecError::Config("ip_cmd must not be empty".to_string()));
        }

        if self.frame_buffer_size < ETH_HEADER_SIZE {
            return Err(MacsecError::Config(format!(
                "frame_buffer_size must be at least {}",
                ETH_HEADER_SIZE
            )));
        }

        Ok(())
    }
}
