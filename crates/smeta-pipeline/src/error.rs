use std::time::Duration;

use smeta_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no reference entry for table {code} in {year}")]
    NotFound { code: String, year: i32 },
    #[error("reference store query timed out after {0:?}")]
    Timeout(Duration),
    #[error("reference store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Whole-document failures. Per-table problems never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("document contains no tables")]
    EmptyDocument,
    #[error("none of the {tables} tables contain text")]
    NoUsableText { tables: usize },
}
