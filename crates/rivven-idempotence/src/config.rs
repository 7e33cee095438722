//! Idempotence controller configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between PID acquisition attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// Capacity of the event broadcast channel
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 16;

/// Configuration for the PID acquisition controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotenceConfig {
    /// Fixed delay before re-attempting PID acquisition
    pub retry_interval: Duration,
    /// Emit a stall event after this many consecutive failures (and every
    /// multiple of it). Retrying continues either way.
    pub escalate_after_failures: Option<u32>,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
    /// Upper bound for [`wait_for_pid`](crate::IdempotenceManager::wait_for_pid)
    pub wait_for_pid_timeout: Option<Duration>,
}

impl Default for IdempotenceConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            escalate_after_failures: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            wait_for_pid_timeout: None,
        }
    }
}

impl IdempotenceConfig {
    /// Create a new builder
    pub fn builder() -> IdempotenceConfigBuilder {
        IdempotenceConfigBuilder::default()
    }

    /// Check the configuration for values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(Error::ConfigError(
                "retry_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::ConfigError(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.escalate_after_failures == Some(0) {
            return Err(Error::ConfigError(
                "escalate_after_failures must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for IdempotenceConfig
#[derive(Default)]
pub struct IdempotenceConfigBuilder {
    config: IdempotenceConfig,
}

impl IdempotenceConfigBuilder {
    /// Set the retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Set the consecutive failure count that triggers a stall event
    pub fn escalate_after_failures(mut self, failures: u32) -> Self {
        self.config.escalate_after_failures = Some(failures);
        self
    }

    /// Set the event channel capacity
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Bound how long callers wait for a PID
    pub fn wait_for_pid_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_for_pid_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> IdempotenceConfig {
        self.config
    }
}
