//! Watch configuration
//!
//! Plain serde structs: the daemon assembles them from environment
//! variables, but nothing here cares where the values came from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One monitored server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Gear name, unique within a watch.
    pub name: String,
    /// `host`, `host:port`, or `[v6addr]:port`.
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Polling cadence and tolerance, shared by all targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between polls of one target.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Ticks between restart probes while a target is down.
    #[serde(default = "default_wait_ticks")]
    pub wait_ticks: u32,
    /// Attempts per poll before it counts as failed.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Per-connection time bound in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Protocol version advertised in the handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    /// Consecutive network failures tolerated before a target counts as down.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_wait_ticks() -> u32 {
    5
}

fn default_retries() -> u32 {
    crate::retry::DEFAULT_TRIES
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_protocol_version() -> i32 {
    crate::protocol::pinger::DEFAULT_PROTOCOL_VERSION
}

fn default_fail_threshold() -> u32 {
    2
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            wait_ticks: default_wait_ticks(),
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            protocol_version: default_protocol_version(),
            fail_threshold: default_fail_threshold(),
        }
    }
}

/// Everything one daemon instance watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub poll: PollConfig,
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::config("no targets configured"));
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(Error::config("target with empty name"));
            }
            if !names.insert(target.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate target name {:?}",
                    target.name
                )));
            }
            crate::address::parse_address(&target.address)?;
        }
        if self.poll.interval_secs == 0 {
            return Err(Error::config("poll interval must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, address: &str) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            address: address.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn defaults_fill_in() {
        let config: WatchConfig =
            serde_json::from_str(r#"{"targets": [{"name": "main", "address": "mc.example.net"}]}"#)
                .unwrap();
        assert!(config.targets[0].enabled);
        assert_eq!(config.poll.interval_secs, 60);
        assert_eq!(config.poll.fail_threshold, 2);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_empty_targets() {
        let config = WatchConfig {
            targets: vec![],
            poll: PollConfig::default(),
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let config = WatchConfig {
            targets: vec![target("a", "one.example.net"), target("a", "two.example.net")],
            poll: PollConfig::default(),
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = WatchConfig {
            targets: vec![target("a", "one.example.net")],
            poll: PollConfig::default(),
        };
        config.poll.interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_address() {
        let config = WatchConfig {
            targets: vec![target("a", "host:notaport")],
            poll: PollConfig::default(),
        };
        assert!(matches!(config.validate(), Err(Error::InvalidAddress(_))));
    }
}
