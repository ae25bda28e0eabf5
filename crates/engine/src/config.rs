//! Engine configuration.
//!
//! All knobs default to the permissive setting (no connection limit, no
//! read timeout, counting off) so an engine context constructed with
//! `EngineConfig::default()` behaves like a development instance. Deployments
//! load a TOML table instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently admitted connections. 0 means unlimited.
    pub connection_limit: usize,

    /// Gate for the aggregate sent/received totals. Off by default to keep
    /// the per-message hot path free of shared-counter traffic.
    pub counting_enabled: bool,

    /// Socket read timeout in milliseconds; a timeout is delivered to
    /// observers as a value, not treated as an error. 0 disables the timer.
    pub read_timeout_ms: u64,

    /// How long `shutdown()` waits for one execution to finish before
    /// abandoning it.
    pub shutdown_join_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_limit: 0,
            counting_enabled: false,
            read_timeout_ms: 0,
            shutdown_join_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn shutdown_join(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_ms)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
