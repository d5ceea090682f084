//! DuckDB storage for imported SCP price books.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, ArrayRef, Int32Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use duckdb::{Connection, params};
use rust_decimal::Decimal;
use smeta_core::{AllowedCoefficient, QuantityRange, ReferenceEntry, YearRange, normalize_code};
use tracing::{debug, info};

use crate::{ReferenceStore, StoreError};

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS reference_entries (
        entry_id VARCHAR NOT NULL,
        code VARCHAR NOT NULL,
        year_from INTEGER NOT NULL,
        year_to INTEGER NOT NULL,
        effective_from VARCHAR NOT NULL,
        ref_a VARCHAR NOT NULL,
        ref_b VARCHAR NOT NULL,
        x_min VARCHAR,
        x_max VARCHAR,
        position_id VARCHAR
    );
    CREATE TABLE IF NOT EXISTS reference_coefficients (
        entry_id VARCHAR NOT NULL,
        coefficient_id VARCHAR NOT NULL,
        value VARCHAR NOT NULL,
        conditions VARCHAR
    );";

/// Every column is cast to text so decimals decode exactly whatever type the
/// source Parquet used.
const SELECT_ENTRIES: &str = "
    SELECT entry_id, code, CAST(year_from AS INTEGER), CAST(year_to AS INTEGER),
           CAST(effective_from AS VARCHAR), CAST(ref_a AS VARCHAR), CAST(ref_b AS VARCHAR),
           CAST(x_min AS VARCHAR), CAST(x_max AS VARCHAR), CAST(position_id AS VARCHAR)
    FROM reference_entries
    WHERE code = ? AND year_from <= ? AND year_to >= ?
    ORDER BY entry_id";

const SELECT_COEFFICIENTS: &str = "
    SELECT c.entry_id, c.coefficient_id, CAST(c.value AS VARCHAR), CAST(c.conditions AS VARCHAR)
    FROM reference_coefficients c
    JOIN reference_entries e ON e.entry_id = c.entry_id
    WHERE e.code = ? AND e.year_from <= ? AND e.year_to >= ?
    ORDER BY c.entry_id, c.coefficient_id, c.value";

/// DuckDB-backed reference store.
///
/// Two tables: `reference_entries` (one row per formula, see
/// [`smeta_core::scp::reference_entry_schema`]) and `reference_coefficients`
/// (allowed coefficients, `conditions` as a JSON array string).
///
/// The connection sits behind a mutex and queries run on the blocking pool, so
/// the store can be shared across concurrent table jobs.
#[derive(Clone)]
pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Other("duckdb connection mutex poisoned".into()))?;
        f(&conn)
    }

    /// Whether any reference entries have been imported.
    pub fn has_entries(&self) -> bool {
        self.entry_count().is_ok_and(|n| n > 0)
    }

    /// Replace both tables from `reference_entries.parquet` and
    /// `reference_coefficients.parquet` in `data_dir`.
    pub fn load_parquet_dir(&self, data_dir: &Path) -> Result<(), StoreError> {
        let entries = data_dir.join("reference_entries.parquet");
        let coefficients = data_dir.join("reference_coefficients.parquet");
        for path in [&entries, &coefficients] {
            if !path.exists() {
                return Err(StoreError::FileNotFound(path.to_path_buf()));
            }
        }
        let sql = format!(
            "DELETE FROM reference_coefficients;
             DELETE FROM reference_entries;
             INSERT INTO reference_entries SELECT * FROM read_parquet('{}');
             INSERT INTO reference_coefficients SELECT * FROM read_parquet('{}');",
            entries.display(),
            coefficients.display()
        );
        self.with_conn(|conn| Ok(conn.execute_batch(&sql)?))?;
        info!(count = self.entry_count()?, "loaded reference entries from parquet");
        Ok(())
    }

    /// Insert entries, replacing any with the same id.
    pub fn insert_entries(&self, entries: &[ReferenceEntry]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN TRANSACTION")?;
            let result = insert_all(conn, entries);
            conn.execute_batch(if result.is_ok() { "COMMIT" } else { "ROLLBACK" })?;
            result
        })?;
        info!(count = entries.len(), "imported reference entries");
        Ok(())
    }

    /// Number of rows in `reference_entries`.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        self.count_table("reference_entries")
    }

    /// Number of rows in `reference_coefficients`.
    pub fn coefficient_count(&self) -> Result<usize, StoreError> {
        self.count_table("reference_coefficients")
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let batches = self.query_arrow(&sql)?;
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
            Ok(batches)
        })
    }

    /// Synchronous lookup; [`ReferenceStore::find`] runs this on the blocking pool.
    pub fn find_blocking(&self, code: &str, year: i32) -> Result<Vec<ReferenceEntry>, StoreError> {
        let code = normalize_code(code);
        let (entry_batches, coefficient_batches) = self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_ENTRIES)?;
            let entries: Vec<RecordBatch> = stmt.query_arrow(params![code, year, year])?.collect();
            let mut stmt = conn.prepare(SELECT_COEFFICIENTS)?;
            let coefficients: Vec<RecordBatch> =
                stmt.query_arrow(params![code, year, year])?.collect();
            Ok((entries, coefficients))
        })?;

        let mut entries = Vec::new();
        for batch in &entry_batches {
            entries.extend(decode_entries(batch)?);
        }
        for batch in &coefficient_batches {
            for (entry_id, coefficient) in decode_coefficients(batch)? {
                if let Some(entry) = entries.iter_mut().find(|e| e.entry_id == entry_id) {
                    entry.valid_coefficients.push(coefficient);
                }
            }
        }
        debug!(code = %code, year, count = entries.len(), "duckdb reference lookup");
        Ok(entries)
    }
}

#[async_trait]
impl ReferenceStore for DuckStore {
    async fn find(&self, code: &str, year: i32) -> Result<Vec<ReferenceEntry>, StoreError> {
        let store = self.clone();
        let code = code.to_string();
        tokio::task::spawn_blocking(move || store.find_blocking(&code, year))
            .await
            .map_err(|e| StoreError::Other(format!("lookup task failed: {e}")))?
    }
}

fn insert_all(conn: &Connection, entries: &[ReferenceEntry]) -> Result<(), StoreError> {
    let mut delete_entry = conn.prepare("DELETE FROM reference_entries WHERE entry_id = ?")?;
    let mut delete_coefficients =
        conn.prepare("DELETE FROM reference_coefficients WHERE entry_id = ?")?;
    let mut insert_entry =
        conn.prepare("INSERT INTO reference_entries VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")?;
    let mut insert_coefficient =
        conn.prepare("INSERT INTO reference_coefficients VALUES (?, ?, ?, ?)")?;

    for entry in entries {
        delete_coefficients.execute(params![entry.entry_id])?;
        delete_entry.execute(params![entry.entry_id])?;
        insert_entry.execute(params![
            entry.entry_id,
            normalize_code(&entry.code),
            entry.year_range.from,
            entry.year_range.to,
            entry.effective_from.format("%Y-%m-%d").to_string(),
            entry.ref_a.to_string(),
            entry.ref_b.to_string(),
            entry.x_range.map(|r| r.min.to_string()),
            entry.x_range.map(|r| r.max.to_string()),
            entry.position_id,
        ])?;
        for coefficient in &entry.valid_coefficients {
            insert_coefficient.execute(params![
                entry.entry_id,
                coefficient.id,
                coefficient.value.to_string(),
                serde_json::to_string(&coefficient.conditions)?,
            ])?;
        }
    }
    Ok(())
}

// ── Decoding ──

fn text_column(batch: &RecordBatch, idx: usize) -> Result<StringArray, StoreError> {
    let col: ArrayRef = cast(batch.column(idx), &DataType::Utf8)?;
    col.as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| StoreError::Other(format!("column {idx} not utf8")))
}

fn int_column(batch: &RecordBatch, idx: usize) -> Result<Int32Array, StoreError> {
    let col: ArrayRef = cast(batch.column(idx), &DataType::Int32)?;
    col.as_any()
        .downcast_ref::<Int32Array>()
        .cloned()
        .ok_or_else(|| StoreError::Other(format!("column {idx} not i32")))
}

fn opt_text(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

fn decimal(column: &'static str, value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|_| StoreError::Malformed {
            column,
            value: value.to_string(),
        })
}

fn decode_entries(batch: &RecordBatch) -> Result<Vec<ReferenceEntry>, StoreError> {
    let ids = text_column(batch, 0)?;
    let codes = text_column(batch, 1)?;
    let year_from = int_column(batch, 2)?;
    let year_to = int_column(batch, 3)?;
    let effective = text_column(batch, 4)?;
    let ref_a = text_column(batch, 5)?;
    let ref_b = text_column(batch, 6)?;
    let x_min = text_column(batch, 7)?;
    let x_max = text_column(batch, 8)?;
    let positions = text_column(batch, 9)?;

    (0..batch.num_rows())
        .map(|row| {
            let effective_from = NaiveDate::parse_from_str(effective.value(row), "%Y-%m-%d")
                .map_err(|_| StoreError::Malformed {
                    column: "effective_from",
                    value: effective.value(row).to_string(),
                })?;
            let x_range = match (opt_text(&x_min, row), opt_text(&x_max, row)) {
                (Some(min), Some(max)) => Some(QuantityRange {
                    min: decimal("x_min", &min)?,
                    max: decimal("x_max", &max)?,
                }),
                _ => None,
            };
            Ok(ReferenceEntry {
                entry_id: ids.value(row).to_string(),
                code: codes.value(row).to_string(),
                year_range: YearRange::new(year_from.value(row), year_to.value(row)),
                effective_from,
                ref_a: decimal("ref_a", ref_a.value(row))?,
                ref_b: decimal("ref_b", ref_b.value(row))?,
                x_range,
                position_id: opt_text(&positions, row),
                valid_coefficients: Vec::new(),
            })
        })
        .collect()
}

fn decode_coefficients(
    batch: &RecordBatch,
) -> Result<Vec<(String, AllowedCoefficient)>, StoreError> {
    let entry_ids = text_column(batch, 0)?;
    let ids = text_column(batch, 1)?;
    let values = text_column(batch, 2)?;
    let conditions = text_column(batch, 3)?;

    (0..batch.num_rows())
        .map(|row| {
            let conditions = match opt_text(&conditions, row) {
                Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
                _ => Vec::new(),
            };
            Ok((
                entry_ids.value(row).to_string(),
                AllowedCoefficient {
                    id: ids.value(row).to_string(),
                    value: decimal("value", values.value(row))?,
                    conditions,
                },
            ))
        })
        .collect()
}
