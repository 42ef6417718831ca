//! Engine configuration types
//!
//! Everything here is a plain value parameter. File formats are the
//! application's business; the types derive serde so the CLI can read them
//! from TOML.

use crate::types::{DataType, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the poll scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Request cadence in milliseconds (default: 250ms)
    #[serde(default = "default_request_interval")]
    pub request_interval_ms: u64,

    /// Drain cadence in milliseconds (default: 1ms)
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,

    /// What to do with a request that never got an answer
    #[serde(default)]
    pub reissue: ReissuePolicy,

    /// Variables tracked from the start
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
}

fn default_request_interval() -> u64 {
    250
}

fn default_drain_interval() -> u64 {
    1
}

/// Largest accepted pending timeout
pub const MAX_PENDING_TIMEOUT_MS: u64 = i64::MAX as u64;

fn default_pending_timeout() -> u64 {
    10_000
}

/// Policy for requests still pending at a request tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReissuePolicy {
    /// Wait for the response forever
    Never,
    /// Issue a fresh request once the pending one is this old
    AfterTimeout {
        #[serde(default = "default_pending_timeout")]
        timeout_ms: u64,
    },
}

impl Default for ReissuePolicy {
    fn default() -> Self {
        ReissuePolicy::AfterTimeout {
            timeout_ms: default_pending_timeout(),
        }
    }
}

impl ReissuePolicy {
    /// Pending age after which a request is reissued
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            ReissuePolicy::Never => None,
            ReissuePolicy::AfterTimeout { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
        }
    }
}

/// A variable to track: name, unit and declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub data_type: DataType,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            data_type,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_interval_ms: default_request_interval(),
            drain_interval_ms: default_drain_interval(),
            reissue: ReissuePolicy::default(),
            variables: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration with default cadences and no variables
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the request cadence
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the drain cadence
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the reissue policy
    pub fn with_reissue(mut self, policy: ReissuePolicy) -> Self {
        self.reissue = policy;
        self
    }

    /// Builder method: add an initial variable
    pub fn add_variable(mut self, name: impl Into<String>, unit: impl Into<String>, data_type: DataType) -> Self {
        self.variables.push(VariableSpec::new(name, unit, data_type));
        self
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.request_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "request interval must be at least 1ms".to_string(),
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "drain interval must be at least 1ms".to_string(),
            ));
        }
        if let ReissuePolicy::AfterTimeout { timeout_ms } = self.reissue {
            if timeout_ms == 0 {
                return Err(SyncError::InvalidConfig(
                    "pending timeout must be at least 1ms".to_string(),
                ));
            }
            if timeout_ms > MAX_PENDING_TIMEOUT_MS {
                return Err(SyncError::InvalidConfig(format!(
                    "pending timeout {}ms exceeds the maximum of {}ms",
                    timeout_ms, MAX_PENDING_TIMEOUT_MS
                )));
            }
        }
        if let Some(spec) = self.variables.iter().find(|spec| spec.name.trim().is_empty()) {
            return Err(SyncError::InvalidConfig(format!(
                "variable with unit '{}' has an empty name",
                spec.unit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new();
        assert_eq!(config.request_interval(), Duration::from_millis(250));
        assert_eq!(config.drain_interval(), Duration::from_millis(1));
        assert_eq!(config.reissue, ReissuePolicy::AfterTimeout { timeout_ms: 10_000 });
        assert_eq!(config.reissue.timeout(), Some(Duration::from_secs(10)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfig::new()
            .with_request_interval(Duration::from_millis(100))
            .with_drain_interval(Duration::from_millis(5))
            .with_reissue(ReissuePolicy::Never)
            .add_variable("AIRSPEED INDICATED", "knot", DataType::Float64)
            .add_variable("TITLE", "", DataType::String256);

        assert_eq!(config.request_interval_ms, 100);
        assert_eq!(config.drain_interval_ms, 5);
        assert_eq!(config.reissue.timeout(), None);
        assert_eq!(config.variables.len(), 2);
        assert_eq!(config.variables[1].data_type, DataType::String256);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SyncConfig::new().with_drain_interval(Duration::ZERO).validate().is_err());
        assert!(SyncConfig::new().with_request_interval(Duration::ZERO).validate().is_err());
        assert!(SyncConfig::new()
            .with_reissue(ReissuePolicy::AfterTimeout { timeout_ms: 0 })
            .validate()
            .is_err());
        assert!(SyncConfig::new().add_variable(" ", "feet", DataType::Float64).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_timeout() {
        for timeout_ms in [1u64 << 63, u64::MAX] {
            let config = SyncConfig::new().with_reissue(ReissuePolicy::AfterTimeout { timeout_ms });
            assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
            assert_eq!(config.reissue.timeout(), Some(Duration::from_millis(timeout_ms)));
        }

        let config = SyncConfig::new().with_reissue(ReissuePolicy::AfterTimeout {
            timeout_ms: MAX_PENDING_TIMEOUT_MS,
        });
        assert!(config.validate().is_ok());
    }
}
