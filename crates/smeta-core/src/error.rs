use thiserror::Error;

/// The payload carries no textual content at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("table {table_index} has no textual content")]
    NoText { table_index: u32 },
    #[error("text block is empty")]
    EmptyText,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(std::path::PathBuf),
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Arithmetic that cannot be represented. Zero claimed totals are a verdict,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("decimal overflow while computing {step}")]
    Overflow { step: &'static str },
}
