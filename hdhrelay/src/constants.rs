//! Default parameters of the relay.
//!
//! Every value here can be overridden from the `relay` and `icecast`
//! configuration sections; these are the values used when a key is absent.

use std::time::Duration;

// ============================================================================
// Connections
// ============================================================================

/// Time allowed to open either side of a relay (seconds)
///
/// Covers TCP connect plus the response headers from the tuner or the
/// Icecast handshake.
///
/// Value: 10 seconds
pub const CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Source stall window (seconds)
///
/// A tuner that delivers no bytes for this long is considered stalled and
/// the read fails with a source read error.
///
/// Value: 15 seconds - an HDHomeRun delivers several chunks per second
pub const READ_TIMEOUT_SECONDS: u64 = 15;

/// Sink stall window (seconds)
///
/// A single write to Icecast that does not complete within this window is
/// reported as a timeout.
///
/// Value: 15 seconds
pub const WRITE_TIMEOUT_SECONDS: u64 = 15;

/// Time allowed for the clean shutdown of the Icecast socket (seconds)
///
/// Value: 2 seconds
pub const SINK_CLOSE_TIMEOUT_SECONDS: u64 = 2;

/// Maximum size of the Icecast handshake response (bytes)
pub const MAX_RESPONSE_HEAD_BYTES: usize = 8 * 1024;

pub const DEFAULT_USER_AGENT: &str = concat!("hdhrelay/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

// ============================================================================
// Relay pipe
// ============================================================================

/// Capacity of the pipe buffer, in chunks
///
/// When the buffer is full the pipe stops reading from the tuner. A tuner
/// chunk is usually a few KiB, so 64 chunks hold a few seconds of audio.
pub const PIPE_BUFFER_CHUNKS: usize = 64;

/// Grace period for a cooperative stop (seconds)
///
/// If the relay task has not finished this long after being told to stop,
/// the controller aborts it and closes both connections by dropping them.
///
/// Value: 5 seconds
pub const STOP_GRACE_SECONDS: u64 = 5;

// ============================================================================
// Retry backoff
// ============================================================================

/// First retry delay after a failure (seconds)
pub const BACKOFF_INITIAL_SECONDS: u64 = 2;

/// Backoff ceiling (seconds)
///
/// Retries continue forever, at most this far apart.
///
/// Value: 60 seconds
pub const BACKOFF_MAX_SECONDS: u64 = 60;

/// Growth factor between consecutive retries
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

// ============================================================================
// Listener monitor
// ============================================================================

/// Interval between two Icecast status polls (seconds)
pub const STATUS_POLL_INTERVAL_SECONDS: u64 = 30;

/// Listener-less time after which an idle relay is stopped (seconds)
///
/// Only applies when idle stopping is enabled.
///
/// Value: 600 seconds (10 minutes)
pub const IDLE_TIMEOUT_SECONDS: u64 = 600;

/// Capacity of the control event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn connect_timeout() -> Duration {
    Duration::from_secs(CONNECT_TIMEOUT_SECONDS)
}

pub fn read_timeout() -> Duration {
    Duration::from_secs(READ_TIMEOUT_SECONDS)
}

pub fn write_timeout() -> Duration {
    Duration::from_secs(WRITE_TIMEOUT_SECONDS)
}

pub fn sink_close_timeout() -> Duration {
    Duration::from_secs(SINK_CLOSE_TIMEOUT_SECONDS)
}

pub fn stop_grace() -> Duration {
    Duration::from_secs(STOP_GRACE_SECONDS)
}

pub fn backoff_initial() -> Duration {
    Duration::from_secs(BACKOFF_INITIAL_SECONDS)
}

pub fn backoff_max() -> Duration {
    Duration::from_secs(BACKOFF_MAX_SECONDS)
}

pub fn status_poll_interval() -> Duration {
    Duration::from_secs(STATUS_POLL_INTERVAL_SECONDS)
}

pub fn idle_timeout() -> Duration {
    Duration::from_secs(IDLE_TIMEOUT_SECONDS)
}
