//! Configuration handling for the link binary.
//!
//! Settings come from a YAML file, then `LINK_*` environment variables,
//! then command line flags, each layer overriding the one before.

use anyhow::{Context, Result};
use link_session::SessionConfig;
use link_wire::ProtocolKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Link binary configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Wire protocol for every session
    pub protocol: ProtocolKind,
    /// Heartbeat interval in milliseconds; 0 disables heartbeats
    pub heartbeat_ms: u64,
    /// Reconnect client sessions after failures
    pub auto_reconnect: bool,
    /// Default request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::Binary,
            heartbeat_ms: 0,
            auto_reconnect: false,
            request_timeout_ms: 3000,
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Deserialize)]
struct RootConfig {
    link: Option<LinkConfig>,
}

impl LinkConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file yields defaults; a file that exists but does not parse
    /// is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                root.link.unwrap_or_default()
            }
            Err(e) => {
                warn!("Config file {:?} not readable ({}), using defaults", path, e);
                Self::default()
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `LINK_*` overrides read through `lookup`
    pub fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LINK_PROTOCOL") {
            match value.parse::<ProtocolKind>() {
                Ok(protocol) => {
                    self.protocol = protocol;
                    info!("Protocol overridden by environment: {}", protocol);
                }
                Err(e) => warn!("Ignoring LINK_PROTOCOL: {}", e),
            }
        }

        if let Some(value) = lookup("LINK_HEARTBEAT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => {
                    self.heartbeat_ms = ms;
                    info!("Heartbeat interval overridden by environment: {}ms", ms);
                }
                Err(e) => warn!("Ignoring LINK_HEARTBEAT_MS={}: {}", value, e),
            }
        }

        if let Some(value) = lookup("LINK_AUTO_RECONNECT") {
            self.auto_reconnect = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
            info!(
                "Auto-reconnect overridden by environment: {}",
                self.auto_reconnect
            );
        }

        if let Some(value) = lookup("LINK_REQUEST_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => {
                    self.request_timeout_ms = ms;
                    info!("Request timeout overridden by environment: {}ms", ms);
                }
                Err(e) => warn!("Ignoring LINK_REQUEST_TIMEOUT_MS={}: {}", value, e),
            }
        }
    }

    /// Default request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            protocol: self.protocol,
            auto_reconnect: self.auto_reconnect,
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
        }
    }
}
