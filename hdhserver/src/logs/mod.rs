//! In-memory log buffer, live SSE feed and runtime level control.
//!
//! [`init_logging`] installs the global subscriber: a reloadable level
//! filter, the [`SseLayer`] feeding a [`LogState`] ring buffer, and an
//! optional console formatter.

mod sselayer;

pub use sselayer::SseLayer;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};
use utoipa::OpenApi;

const LIVE_CHANNEL_CAPACITY: usize = 1000;
const LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Shared ring buffer of recent log entries
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
    max_level: Arc<RwLock<Level>>,
    reload_handle: Option<reload::Handle<LevelFilter, Registry>>,
}

impl LogState {
    pub fn new(capacity: usize, reload_handle: reload::Handle<LevelFilter, Registry>) -> Self {
        Self {
            reload_handle: Some(reload_handle),
            ..Self::detached(capacity)
        }
    }

    /// A state not wired to the global subscriber; level changes only
    /// affect what the buffer hands out.
    pub fn detached(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx: broadcast::channel(LIVE_CHANNEL_CAPACITY).0,
            max_level: Arc::new(RwLock::new(Level::TRACE)),
            reload_handle: None,
        }
    }

    pub fn set_max_level(&self, level: Level) {
        *self.max_level.write() = level;

        if let Some(handle) = &self.reload_handle {
            if let Err(err) = handle.reload(LevelFilter::from_level(level)) {
                tracing::warn!("Failed to reload log level filter: {err}");
            }
        }
    }

    pub fn get_max_level(&self) -> Level {
        *self.max_level.read()
    }

    fn push(&self, entry: LogEntry) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        self.buffer.lock().iter().cloned().collect()
    }
}

/// Filters of `/log-sse`: level flags (none set means every level) and a
/// substring searched in the message and target.
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub warn: Option<bool>,
    #[serde(default)]
    pub info: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
}

impl LogQuery {
    fn accepts(&self, entry: &LogEntry) -> bool {
        let flags = [
            ("ERROR", self.error),
            ("WARN", self.warn),
            ("INFO", self.info),
            ("DEBUG", self.debug),
            ("TRACE", self.trace),
        ];

        let any_flag = flags.iter().any(|(_, flag)| flag.unwrap_or(false));
        let level_ok = !any_flag
            || flags
                .iter()
                .any(|(name, flag)| flag.unwrap_or(false) && entry.level.eq_ignore_ascii_case(name));

        let search_ok = match &self.search {
            Some(search) => entry.message.contains(search) || entry.target.contains(search),
            None => true,
        };

        level_ok && search_ok
    }
}

/// SSE feed: the buffered history first, then live entries.
pub async fn log_sse(
    State(state): State<LogState>,
    Query(params): Query<LogQuery>,
) -> impl IntoResponse {
    let mut rx = state.subscribe();
    let history = state.dump();

    let stream = async_stream::stream! {
        for entry in history {
            if let Some(event) = entry_event(&state, &params, &entry) {
                yield Ok::<_, axum::Error>(event);
            }
        }

        loop {
            match rx.recv().await {
                Ok(entry) => {
                    if let Some(event) = entry_event(&state, &params, &entry) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn entry_event(state: &LogState, params: &LogQuery, entry: &LogEntry) -> Option<Event> {
    if !is_level_allowed(&entry.level, state.get_max_level()) || !params.accepts(entry) {
        return None;
    }
    Event::default().json_data(entry).ok()
}

pub async fn log_dump(State(state): State<LogState>) -> impl IntoResponse {
    Json(state.dump())
}

fn is_level_allowed(entry_level: &str, max_level: Level) -> bool {
    match string_to_level(entry_level) {
        Some(level) => severity(level) <= severity(max_level),
        None => false,
    }
}

/// ERROR is the most severe (0), TRACE the least (4)
fn severity(level: Level) -> u8 {
    match level {
        Level::ERROR => 0,
        Level::WARN => 1,
        Level::INFO => 2,
        Level::DEBUG => 3,
        Level::TRACE => 4,
    }
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Entries kept for `/log-dump` and new SSE clients
    pub buffer_capacity: usize,
    pub enable_console: bool,
    pub min_level: Level,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            enable_console: true,
            min_level: Level::INFO,
        }
    }
}

impl LoggingOptions {
    /// Reads `host.logger.*`; unreadable values keep their default.
    pub fn from_config(config: &hdhconfig::Config) -> Self {
        let defaults = Self::default();
        Self {
            buffer_capacity: config
                .get_log_cache_size()
                .unwrap_or(defaults.buffer_capacity),
            enable_console: config
                .get_log_enable_console()
                .unwrap_or(defaults.enable_console),
            min_level: config
                .get_log_min_level()
                .ok()
                .and_then(|level| string_to_level(&level))
                .unwrap_or(defaults.min_level),
        }
    }
}

/// Installs the global subscriber and returns the buffer behind it.
///
/// # Example
///
/// ```rust,no_run
/// use hdhserver::logs::{init_logging, LoggingOptions};
///
/// let log_state = init_logging(LoggingOptions::default()).unwrap();
/// ```
pub fn init_logging(options: LoggingOptions) -> anyhow::Result<LogState> {
    // the filter comes first so the buffer only sees accepted events
    let (filter, reload_handle) = reload::Layer::new(LevelFilter::from_level(options.min_level));

    let log_state = LogState::new(options.buffer_capacity, reload_handle);
    *log_state.max_level.write() = options.min_level;

    let subscriber = Registry::default()
        .with(filter)
        .with(SseLayer::new(log_state.clone()));

    let installed = if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("Failed to install log subscriber: {err}"))?;

    Ok(log_state)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LogSetupRequest {
    /// One of ERROR, WARN, INFO, DEBUG, TRACE (case-insensitive)
    pub level: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

impl LogSetupResponse {
    fn new(level: Level) -> Self {
        Self {
            current_level: level_to_string(level),
            available_levels: LEVELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// GET current log level
#[utoipa::path(
    get,
    path = "/log_setup",
    responses(
        (status = 200, description = "Current log level", body = LogSetupResponse)
    ),
    tag = "logs"
)]
pub async fn log_setup_get(State(state): State<LogState>) -> impl IntoResponse {
    Json(LogSetupResponse::new(state.get_max_level()))
}

/// POST a new log level, applied immediately
#[utoipa::path(
    post,
    path = "/log_setup",
    request_body = LogSetupRequest,
    responses(
        (status = 200, description = "Log level updated", body = LogSetupResponse),
        (status = 400, description = "Unknown log level")
    ),
    tag = "logs"
)]
pub async fn log_setup_post(
    State(state): State<LogState>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = string_to_level(&payload.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("Invalid log level '{}', expected one of {}", payload.level, LEVELS.join(", "))
            })),
        )
            .into_response();
    };

    state.set_max_level(level);
    tracing::info!(level = %level, "Log level changed");

    Json(LogSetupResponse::new(level)).into_response()
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_string(level: Level) -> String {
    LEVELS[severity(level) as usize].to_string()
}

pub fn create_logs_router(log_state: LogState) -> axum::Router {
    use axum::routing::get;
    axum::Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(log_state)
}

#[derive(OpenApi)]
#[openapi(
    paths(log_setup_get, log_setup_post),
    components(schemas(LogSetupRequest, LogSetupResponse)),
    tags(
        (name = "logs", description = "Log level configuration")
    )
)]
pub struct LogsApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: level.into(),
            target: "hdhrelay::controller".into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let state = LogState::detached(2);
        state.push(entry("INFO", "one"));
        state.push(entry("INFO", "two"));
        state.push(entry("INFO", "three"));

        let messages: Vec<String> = state.dump().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_level_gate() {
        assert!(is_level_allowed("ERROR", Level::WARN));
        assert!(is_level_allowed("warn", Level::WARN));
        assert!(!is_level_allowed("INFO", Level::WARN));
        assert!(is_level_allowed("TRACE", Level::TRACE));
        assert!(!is_level_allowed("NOTICE", Level::TRACE));
    }

    #[test]
    fn test_query_filter() {
        let all = LogQuery::default();
        assert!(all.accepts(&entry("DEBUG", "anything")));

        let warnings = LogQuery {
            warn: Some(true),
            search: Some("retry".into()),
            ..LogQuery::default()
        };
        assert!(warnings.accepts(&entry("WARN", "Relay session failed, retry scheduled")));
        assert!(!warnings.accepts(&entry("WARN", "Relay streaming")));
        assert!(!warnings.accepts(&entry("INFO", "retry")));

        let by_target = LogQuery {
            search: Some("controller".into()),
            ..LogQuery::default()
        };
        assert!(by_target.accepts(&entry("INFO", "Relay idle")));
    }

    #[test]
    fn test_detached_level_change() {
        let state = LogState::detached(4);
        state.set_max_level(Level::WARN);
        assert_eq!(state.get_max_level(), Level::WARN);
        assert_eq!(LogSetupResponse::new(Level::WARN).current_level, "WARN");
    }
}
