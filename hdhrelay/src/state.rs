//! Observable relay status.

use crate::error::FailureReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a relay session
///
/// There is no `Idle` variant: idle means there is no session, which is
/// published as `Stopped` with no current station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    Connecting,
    Streaming,
    Stopping,
    Failed,
    Stopped,
}

impl RelayState {
    /// Whether a session in this state holds (or is acquiring) the mount
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Streaming => "STREAMING",
            Self::Stopping => "STOPPING",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Status snapshot published on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SelectionState {
    /// Set while a session exists
    pub current_station_id: Option<String>,
    pub relay_state: RelayState,
    pub last_error: Option<FailureReport>,
    /// Generation of the current session, 0 when idle
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl SelectionState {
    pub fn idle(last_error: Option<FailureReport>) -> Self {
        Self {
            current_station_id: None,
            relay_state: RelayState::Stopped,
            last_error,
            generation: 0,
            started_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_station_id.is_none()
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::idle(None)
    }
}

/// Events delivered to control port subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// The selection state changed
    Status { state: SelectionState },
    /// A request was refused without any state change
    Rejected {
        station_id: String,
        error: FailureReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RelayError};

    #[test]
    fn test_event_wire_format() {
        let event = ControlEvent::Rejected {
            station_id: "999".into(),
            error: FailureReport::from(&RelayError::UnknownStation("999".into())),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["error"]["kind"], "unknown_station");

        let status = ControlEvent::Status {
            state: SelectionState::idle(None),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["state"]["relay_state"], "STOPPED");
        assert!(json["state"]["current_station_id"].is_null());
    }

    #[test]
    fn test_failure_kind_round_trips() {
        let report = FailureReport {
            kind: ErrorKind::SourceRead,
            message: "stalled".into(),
        };
        let state = SelectionState {
            current_station_id: Some("700".into()),
            relay_state: RelayState::Failed,
            last_error: Some(report.clone()),
            generation: 3,
            started_at: None,
        };
        let back: SelectionState =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(back.last_error, Some(report));
    }
}
