// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating a [`LockConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every lock built from one registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Wake channel for lock `name` is `<channel_prefix>:<name>`
    pub channel_prefix: String,
    /// Lease applied when the caller does not pass one
    #[serde(with = "humantime_serde")]
    pub default_lease: Duration,
    /// Idle reaper period, also the default `listen` timeout
    #[serde(with = "humantime_serde")]
    pub max_connect_time: Duration,
    /// Body of the message published when a lock is fully released
    pub wake_payload: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "redis_lock_channel".to_string(),
            default_lease: Duration::from_secs(30),
            max_connect_time: Duration::from_secs(30),
            wake_payload: "0".to_string(),
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn with_max_connect_time(mut self, max_connect_time: Duration) -> Self {
        self.max_connect_time = max_connect_time;
        self
    }

    pub fn with_wake_payload(mut self, payload: impl Into<String>) -> Self {
        self.wake_payload = payload.into();
        self
    }

    /// Parse from a TOML document; omitted keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LockConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Below 1ms the lease would be sent to the store as PEXPIRE 0
        if self.default_lease.as_millis() == 0 {
            return Err(ConfigError::Invalid(
                "default_lease must be at least 1ms".to_string(),
            ));
        }
        if self.max_connect_time.is_zero() {
            return Err(ConfigError::Invalid(
                "max_connect_time must be positive".to_string(),
            ));
        }
        if self.channel_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "channel_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Channel that carries wake messages for lock `name`
    pub fn channel_for(&self, name: &str) -> String {
        format!("{}:{}", self.channel_prefix, name)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
