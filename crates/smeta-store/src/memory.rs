//! In-memory reference store, keyed by normalized table code.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use smeta_core::{ReferenceEntry, normalize_code};
use tracing::info;

use crate::{ReferenceStore, StoreError};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    by_code: HashMap<String, Vec<ReferenceEntry>>,
}

impl MemoryStore {
    pub fn new(entries: impl IntoIterator<Item = ReferenceEntry>) -> Self {
        let mut by_code: HashMap<String, Vec<ReferenceEntry>> = HashMap::new();
        for mut entry in entries {
            entry.code = normalize_code(&entry.code);
            by_code.entry(entry.code.clone()).or_default().push(entry);
        }
        Self { by_code }
    }

    /// Load a JSON array of reference entries.
    pub fn from_json_path(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let entries: Vec<ReferenceEntry> = serde_json::from_str(&text)?;
        let store = Self::new(entries);
        info!(path = %path.display(), count = store.len(), "loaded reference entries");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.by_code.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// All entries, sorted by id.
    pub fn entries(&self) -> Vec<&ReferenceEntry> {
        let mut all: Vec<&ReferenceEntry> = self.by_code.values().flatten().collect();
        all.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        all
    }
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn find(&self, code: &str, year: i32) -> Result<Vec<ReferenceEntry>, StoreError> {
        let code = normalize_code(code);
        Ok(self
            .by_code
            .get(&code)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.year_range.contains(year))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use smeta_core::YearRange;
    use std::io::Write;

    fn entry(id: &str, code: &str, from: i32, to: i32) -> ReferenceEntry {
        ReferenceEntry {
            entry_id: id.into(),
            code: code.into(),
            year_range: YearRange::new(from, to),
            effective_from: NaiveDate::from_ymd_opt(from, 1, 1).unwrap(),
            ref_a: Decimal::from(10637),
            ref_b: Decimal::new(316, 2),
            x_range: None,
            position_id: None,
            valid_coefficients: Vec::new(),
        }
    }

    #[tokio::test]
    async fn find_filters_by_code_and_year() {
        let store = MemoryStore::new(vec![
            entry("a", "1706-0201-01", 2020, 2024),
            entry("b", "1706-0201-01", 2025, 2026),
            entry("c", "1706-0201-02", 2020, 2024),
        ]);
        let found = store.find("1706-0201-01", 2024).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry_id, "a");

        assert!(store.find("1706-0201-01", 2019).await.unwrap().is_empty());
        assert!(store.find("9999-0000-00", 2024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn codes_are_normalized_on_both_sides() {
        let store = MemoryStore::new(vec![entry("a", "1706\u{2013}0201\u{2013}01", 2024, 2024)]);
        let found = store.find(" 1706-0201-01 ", 2024).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "1706-0201-01");
    }

    #[test]
    fn loads_json_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"entry_id": "e1", "code": "1706-0201-01",
                 "year_range": {{"from": 2024, "to": 2024}},
                 "effective_from": "2024-01-01", "ref_A": 10637, "ref_B": 3.16,
                 "valid_coefficients": [{{"id": "K3", "value": 1.2}}]}}]"#
        )
        .unwrap();

        let store = MemoryStore::from_json_path(file.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].valid_coefficients.len(), 1);
    }

    #[test]
    fn missing_file_errors() {
        let result = MemoryStore::from_json_path(Path::new("/nonexistent/refs.json"));
        assert!(matches!(result, Err(StoreError::FileNotFound(_))));
    }
}
