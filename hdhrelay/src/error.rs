//! Error taxonomy of the relay core

use serde::{Deserialize, Serialize};

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures surfaced by the relay components
///
/// Payloads are plain strings so errors can be cloned into status
/// snapshots and carried across task boundaries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Connection refused, connect timeout or non-2xx response
    #[error("connect failed: {0}")]
    Connect(String),

    /// Tuner read stalled, reset, or the stream ended
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// Broken pipe or rejection while pushing to Icecast
    #[error("sink write failed: {0}")]
    SinkWrite(String),

    /// Icecast refused the source credentials
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Another source is already pushing to the mount
    #[error("mount busy: {0}")]
    MountBusy(String),

    #[error("unknown station: {0}")]
    UnknownStation(String),

    /// Stall on either side
    #[error("timed out: {0}")]
    Timeout(String),

    /// The control worker is no longer running
    #[error("relay controller closed")]
    Closed,
}

/// Serialisable discriminant of [`RelayError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    SourceRead,
    SinkWrite,
    Auth,
    MountBusy,
    UnknownStation,
    Timeout,
    Closed,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) => ErrorKind::Connect,
            Self::SourceRead(_) => ErrorKind::SourceRead,
            Self::SinkWrite(_) => ErrorKind::SinkWrite,
            Self::Auth(_) => ErrorKind::Auth,
            Self::MountBusy(_) => ErrorKind::MountBusy,
            Self::UnknownStation(_) => ErrorKind::UnknownStation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Whether the controller should schedule a backoff retry.
    ///
    /// A busy mount or an unknown station is a configuration problem and is
    /// reported instead of retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MountBusy(_) | Self::UnknownStation(_) | Self::Closed
        )
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn source_read(msg: impl Into<String>) -> Self {
        Self::SourceRead(msg.into())
    }

    pub fn sink_write(msg: impl Into<String>) -> Self {
        Self::SinkWrite(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

/// A failure as published in [`crate::SelectionState::last_error`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RelayError> for FailureReport {
    fn from(err: &RelayError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy() {
        assert!(RelayError::connect("refused").is_retryable());
        assert!(RelayError::source_read("stalled").is_retryable());
        assert!(RelayError::sink_write("broken pipe").is_retryable());
        assert!(RelayError::Auth("401".into()).is_retryable());
        assert!(RelayError::timeout("write").is_retryable());
        assert!(!RelayError::MountBusy("/radio".into()).is_retryable());
        assert!(!RelayError::UnknownStation("nope".into()).is_retryable());
        assert!(!RelayError::Closed.is_retryable());
    }

    #[test]
    fn test_failure_report_serialization() {
        let report = FailureReport::from(&RelayError::MountBusy("/radio".into()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "mount_busy");
        assert_eq!(json["message"], "mount busy: /radio");
    }
}
