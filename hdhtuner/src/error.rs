//! Error types for the HDHomeRun client

/// Result type alias for tuner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an HDHomeRun
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The tuner answered with a non-success status
    #[error("Tuner returned status {status} for {url}")]
    Status { status: u16, url: String },

    /// The catalog worker is no longer running
    #[error("Catalog worker stopped")]
    WorkerStopped,
}
