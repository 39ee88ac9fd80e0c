// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supernode configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::mgmt::MGMT_PORT;

/// Supernode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Edge UDP port (default: 7654)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Run in the foreground (daemonization is not implemented)
    #[serde(default = "default_true")]
    pub foreground: bool,

    /// Verbosity level, mirrors repeated `-v` flags
    #[serde(default)]
    pub verbosity: u8,

    /// Inter-supernode (SNM) port. `None` disables the coordinator.
    #[serde(default)]
    pub sn_port: Option<u16>,

    /// Seed peer supernodes, merged with the persisted peer list at startup.
    #[serde(default)]
    pub peers: Vec<SocketAddr>,

    /// Registration expiry threshold in seconds.
    #[serde(default = "default_reg_lifetime")]
    pub registration_lifetime_secs: u64,

    /// Directory holding the `SN_SNM_<port>`/`SN_COMM_<port>` persistence files.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_port() -> u16 {
    7654
}

fn default_true() -> bool {
    true
}

fn default_reg_lifetime() -> u64 {
    120
}

fn default_state_dir() -> String {
    ".".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            foreground: true,
            verbosity: 0,
            sn_port: None,
            peers: Vec::new(),
            registration_lifetime_secs: default_reg_lifetime(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    /// Fixed loopback management port - not configurable, matching
    /// spec.md §6.
    pub fn mgmt_port(&self) -> u16 {
        MGMT_PORT
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if let Some(sn_port) = self.sn_port {
            if sn_port == 0 {
                return Err(ConfigError::InvalidValue("sn_port cannot be 0".into()));
            }
            if sn_port == self.port {
                return Err(ConfigError::InvalidValue(
                    "sn_port must differ from the edge port".into(),
                ));
            }
        }
        if !self.peers.is_empty() && self.sn_port.is_none() {
            return Err(ConfigError::InvalidValue(
                "peers requires sn_port to be set".into(),
            ));
        }
        if self.registration_lifetime_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "registration_lifetime_secs cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 7654);
        assert!(config.foreground);
        assert!(config.sn_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.port, parsed.port);
    }

    #[test]
    fn test_validation_port_zero() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_peers_without_sn_port() {
        let config = Config {
            peers: vec!["10.0.0.1:7655".parse().unwrap()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_sn_port_equal_to_edge_port() {
        let config = Config {
            sn_port: Some(7654),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mgmt_port_is_fixed() {
        let config = Config::default();
        assert_eq!(config.mgmt_port(), 5645);
    }
}
