//! REST and SSE binding of the relay control port, mounted as `relay`.
//!
//! | Method | Path         | Effect                                   |
//! |--------|--------------|------------------------------------------|
//! | GET    | `/status`    | current [`SelectionState`]               |
//! | GET    | `/stations`  | selectable stations                      |
//! | POST   | `/select`    | switch to a station (202)                |
//! | POST   | `/stop`      | go idle (202)                            |
//! | GET    | `/listeners` | last Icecast listener count              |
//! | GET    | `/events`    | SSE feed of [`ControlEvent`]             |
//!
//! Commands are accepted asynchronously: the 202 body is the snapshot at
//! the time the request was queued, and the outcome shows up on `/events`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use hdhrelay::{
    ControlEvent, ControlPort, ErrorKind, FailureReport, RelayError, RelayState, SelectionState,
    Station,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use utoipa::{OpenApi, ToSchema};

#[derive(Clone)]
pub struct RelayApiState {
    pub port: ControlPort,
    /// Latest listener count, when the idle monitor runs
    pub listeners: Option<watch::Receiver<Option<u32>>>,
}

impl RelayApiState {
    pub fn new(port: ControlPort) -> Self {
        Self {
            port,
            listeners: None,
        }
    }

    pub fn with_listeners(mut self, listeners: watch::Receiver<Option<u32>>) -> Self {
        self.listeners = Some(listeners);
        self
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectRequest {
    /// Station id (guide number) or display name
    pub station: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SelectResponse {
    pub station: Station,
    pub status: SelectionState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListenersResponse {
    /// `null` until the first successful poll, or when monitoring is off
    pub listeners: Option<u32>,
    pub monitored: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: FailureReport,
}

fn error_response(err: &RelayError) -> Response {
    let status = match err.kind() {
        ErrorKind::UnknownStation => StatusCode::NOT_FOUND,
        ErrorKind::Closed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: FailureReport::from(err),
        }),
    )
        .into_response()
}

/// Current relay status
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current selection state", body = SelectionState)
    ),
    tag = "relay"
)]
pub async fn get_status(State(state): State<RelayApiState>) -> Json<SelectionState> {
    Json(state.port.snapshot())
}

/// Stations known to the registry, ordered by name
#[utoipa::path(
    get,
    path = "/stations",
    responses(
        (status = 200, description = "Selectable stations", body = Vec<Station>)
    ),
    tag = "relay"
)]
pub async fn list_stations(State(state): State<RelayApiState>) -> Json<Vec<Station>> {
    Json(state.port.stations())
}

/// Switch the relay to a station
#[utoipa::path(
    post,
    path = "/select",
    request_body = SelectRequest,
    responses(
        (status = 202, description = "Selection queued", body = SelectResponse),
        (status = 404, description = "Unknown station", body = ApiError),
        (status = 503, description = "Relay worker stopped", body = ApiError)
    ),
    tag = "relay"
)]
pub async fn select_station(
    State(state): State<RelayApiState>,
    Json(request): Json<SelectRequest>,
) -> Response {
    match state.port.select(&request.station) {
        Ok(station) => {
            info!(station = %station.id, "Selection requested over HTTP");
            (
                StatusCode::ACCEPTED,
                Json(SelectResponse {
                    station,
                    status: state.port.snapshot(),
                }),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Stop relaying; a no-op when idle
#[utoipa::path(
    post,
    path = "/stop",
    responses(
        (status = 202, description = "Stop queued", body = SelectionState),
        (status = 503, description = "Relay worker stopped", body = ApiError)
    ),
    tag = "relay"
)]
pub async fn stop_relay(State(state): State<RelayApiState>) -> Response {
    match state.port.stop() {
        Ok(()) => {
            debug!("Stop requested over HTTP");
            (StatusCode::ACCEPTED, Json(state.port.snapshot())).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Last listener count reported by Icecast for the mount
#[utoipa::path(
    get,
    path = "/listeners",
    responses(
        (status = 200, description = "Listener count", body = ListenersResponse)
    ),
    tag = "relay"
)]
pub async fn get_listeners(State(state): State<RelayApiState>) -> Json<ListenersResponse> {
    let (listeners, monitored) = match &state.listeners {
        Some(rx) => (*rx.borrow(), true),
        None => (None, false),
    };
    Json(ListenersResponse {
        listeners,
        monitored,
    })
}

/// SSE feed of control events, starting with the current status.
///
/// Each event is named after its type (`status` or `rejected`) and
/// carries the JSON form of [`ControlEvent`].
pub async fn relay_events(State(state): State<RelayApiState>) -> impl IntoResponse {
    let mut rx = state.port.subscribe();
    let initial = ControlEvent::Status {
        state: state.port.snapshot(),
    };

    let stream = async_stream::stream! {
        if let Some(event) = sse_event(&initial) {
            yield Ok::<_, axum::Error>(event);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(event) = sse_event(&event) {
                        yield Ok(event);
                    }
                }
                // a slow client only needs the latest status
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagging, resending status");
                    let latest = ControlEvent::Status { state: state.port.snapshot() };
                    if let Some(event) = sse_event(&latest) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &ControlEvent) -> Option<Event> {
    let name = match event {
        ControlEvent::Status { .. } => "status",
        ControlEvent::Rejected { .. } => "rejected",
    };
    Event::default().event(name).json_data(event).ok()
}

pub fn create_router(state: RelayApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/stations", get(list_stations))
        .route("/select", post(select_station))
        .route("/stop", post(stop_relay))
        .route("/listeners", get(get_listeners))
        .route("/events", get(relay_events))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(get_status, list_stations, select_station, stop_relay, get_listeners),
    components(schemas(
        SelectionState,
        RelayState,
        FailureReport,
        ErrorKind,
        ControlEvent,
        Station,
        SelectRequest,
        SelectResponse,
        ListenersResponse,
        ApiError
    )),
    tags(
        (name = "relay", description = "Relay control and status")
    )
)]
pub struct RelayApiDoc;
