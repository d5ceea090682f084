use thiserror::Error;

/// Failure of one call to the generative backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("extraction failed after {attempts} attempts: {last_error}")]
    Failed { attempts: u32, last_error: String },
}
