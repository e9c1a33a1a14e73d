//! Runtime parameters of the relay core.

use crate::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts, buffering and retry policy of the relay
///
/// Read-only once the controller is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    pub connect_timeout: Duration,
    /// Source stall window
    pub read_timeout: Duration,
    /// Sink stall window
    pub write_timeout: Duration,
    /// Pipe capacity, in chunks
    pub buffer_chunks: usize,
    pub stop_grace: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            connect_timeout: constants::connect_timeout(),
            read_timeout: constants::read_timeout(),
            write_timeout: constants::write_timeout(),
            buffer_chunks: constants::PIPE_BUFFER_CHUNKS,
            stop_grace: constants::stop_grace(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: constants::backoff_initial(),
            max: constants::backoff_max(),
            multiplier: constants::BACKOFF_MULTIPLIER,
        }
    }
}

/// Idle auto-stop parameters of the listener monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleSettings {
    pub enabled: bool,
    /// Time with zero listeners before the relay is stopped
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: constants::idle_timeout(),
            poll_interval: constants::status_poll_interval(),
        }
    }
}
