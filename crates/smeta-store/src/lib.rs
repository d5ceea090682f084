//! Storage layer for regulated reference entries: in-memory (tests, JSON
//! fixtures) and DuckDB (imported price books).

use async_trait::async_trait;
use smeta_core::ReferenceEntry;

mod error;
mod memory;
pub use error::StoreError;
pub use memory::MemoryStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;

/// Read-only lookup of reference entries.
///
/// Implementations return every entry whose code equals `code` and whose year
/// range contains `year`, in any order. Choosing between several candidates is
/// the caller's job.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn find(&self, code: &str, year: i32) -> Result<Vec<ReferenceEntry>, StoreError>;
}
