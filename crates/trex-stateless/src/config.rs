//! Configuration file support for the stateless daemon.
//!
//! Loads and validates [`StatelessConfig`] from TOML. Every field has a
//! default, so an empty file (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use trex_driver::{PortSpeed, SIM_DRIVER_NAME};

use crate::error::{Result, StatelessError};
use crate::port::{OwnerPolicy, PortSettings};

/// Complete stateless daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatelessConfig {
    /// Number of ports; falls back to the command line when unset
    #[serde(default)]
    pub port_count: Option<u8>,

    /// Driver name reported in port properties
    #[serde(default = "default_driver_name")]
    pub driver_name: String,

    /// Link speed reported in port properties, in Mbps
    #[serde(default = "default_port_speed_mbps")]
    pub port_speed_mbps: u32,

    /// Ownership handling when a transmitting port is forced down
    #[serde(default)]
    pub owner_policy: OwnerPolicy,

    /// Deadline for owner-gated start traffic in milliseconds (0 disables)
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Deadline for stats refresh in milliseconds (0 disables)
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,

    /// Stats refresh period of the daemon in milliseconds
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_driver_name() -> String {
    SIM_DRIVER_NAME.to_string()
}

fn default_port_speed_mbps() -> u32 {
    PortSpeed::GE_10.as_mbps()
}

fn default_start_timeout_ms() -> u64 {
    5000
}

fn default_stats_timeout_ms() -> u64 {
    1000
}

fn default_stats_interval_ms() -> u64 {
    1000
}

impl Default for StatelessConfig {
    fn default() -> Self {
        Self {
            port_count: None,
            driver_name: default_driver_name(),
            port_speed_mbps: default_port_speed_mbps(),
            owner_policy: OwnerPolicy::default(),
            start_timeout_ms: default_start_timeout_ms(),
            stats_timeout_ms: default_stats_timeout_ms(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl StatelessConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StatelessError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port_count == Some(0) {
            return Err(StatelessError::config("port_count must be greater than 0"));
        }
        if self.driver_name.trim().is_empty() {
            return Err(StatelessError::config("driver_name cannot be empty"));
        }
        if self.port_speed_mbps == 0 {
            return Err(StatelessError::config("port_speed_mbps must be greater than 0"));
        }
        if self.stats_interval_ms == 0 {
            return Err(StatelessError::config("stats_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Per-port settings derived from this configuration.
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            owner_policy: self.owner_policy,
            start_timeout: non_zero_millis(self.start_timeout_ms),
            stats_timeout: non_zero_millis(self.stats_timeout_ms),
        }
    }

    pub fn port_speed(&self) -> PortSpeed {
        PortSpeed::from_mbps(self.port_speed_mbps)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Loads configuration from `path`, falling back to defaults if the file
/// does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<StatelessConfig> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => {
            let config = StatelessConfig::from_toml(&content).map_err(|e| match e {
                StatelessError::Config { message } => {
                    StatelessError::config(format!("{}: {}", path.display(), message))
                }
                other => other,
            })?;
            info!(path = %path.display(), "loaded configuration");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(StatelessConfig::default())
        }
        Err(e) => Err(StatelessError::config(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}
