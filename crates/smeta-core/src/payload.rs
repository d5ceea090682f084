//! Table payloads as produced by the external table extractor.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One table as yielded by the PDF table extractor.
///
/// Accepts both the extractor's native shape (`rows`) and the pre-flattened
/// shape where the text was already joined upstream (`raw_text`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTablePayload {
    #[serde(default)]
    pub table_index: u32,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default, alias = "rows", deserialize_with = "lenient_cells")]
    pub cells: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, alias = "relative_path", skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// Cells may arrive as strings, numbers or nulls; all become strings.
fn lenient_cells<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows: Vec<Vec<Value>> = Vec::deserialize(deserializer)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| match cell {
                    Value::Null => String::new(),
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()
        })
        .collect())
}

impl RawTablePayload {
    pub fn from_cells(table_index: u32, page_number: Option<u32>, cells: Vec<Vec<String>>) -> Self {
        Self {
            table_index,
            page_number,
            cells,
            raw_text: None,
            source_file: None,
        }
    }

    pub fn from_text(table_index: u32, text: impl Into<String>) -> Self {
        Self {
            table_index,
            page_number: None,
            cells: Vec::new(),
            raw_text: Some(text.into()),
            source_file: None,
        }
    }
}

/// A table flattened into one coherent text block plus the numbers found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    pub table_index: u32,
    pub page_number: Option<u32>,
    pub canonical_text: String,
    pub numeric_tokens: Vec<Decimal>,
    /// Hyphenated code-like runs such as `1706-0201-01`.
    pub code_candidates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_table_extractor_shape() {
        let json = r#"{
            "table_index": 2,
            "relative_path": "smeta/pir-2024.pdf",
            "rows": [["Жилой дом", null, 4675.08], ["nan", "табл. 1706-0201-01"]]
        }"#;
        let payload: RawTablePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.table_index, 2);
        assert_eq!(payload.source_file.as_deref(), Some("smeta/pir-2024.pdf"));
        assert_eq!(payload.cells[0], ["Жилой дом", "", "4675.08"]);
        assert_eq!(payload.cells[1][0], "nan");
    }

    #[test]
    fn reads_flattened_shape() {
        let payload: RawTablePayload =
            serde_json::from_str(r#"{"table_index": 0, "raw_text": "1. Жилой дом"}"#).unwrap();
        assert!(payload.cells.is_empty());
        assert_eq!(payload.raw_text.as_deref(), Some("1. Жилой дом"));
    }
}
