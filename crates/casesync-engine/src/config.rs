//! Case session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use casesync_core::BackoffConfig;

/// Case session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll cadence and failure budget.
    pub backoff: BackoffConfig,

    /// Polling is suspended after this long without user activity.
    #[serde(with = "casesync_core::backoff::millis")]
    pub inactivity_timeout: Duration,

    /// Regular poll cycles a start-message may still wait for its task after
    /// the first resync came back without it.
    pub start_message_retry_cycles: u32,

    /// Start polling as soon as the session is spawned.
    pub autostart: bool,

    /// Capacity of the command channel between handles and the session.
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            inactivity_timeout: Duration::from_secs(30),
            start_message_retry_cycles: 1,
            autostart: true,
            command_buffer: 64,
        }
    }
}
