use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reference file not found: {0}")]
    FileNotFound(std::path::PathBuf),

    #[error("no results for query")]
    NoResults,

    #[error("reading reference file: {0}")]
    Io(#[from] std::io::Error),

    #[error("reference JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("malformed value in column {column}: {value:?}")]
    Malformed { column: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}
