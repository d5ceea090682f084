//! Instruction payloads sent to the extraction backend.

use smeta_core::NormalizedTable;

// ── Prompt templates ──

const SYSTEM_PROMPT: &str = "\
You are a construction cost-estimate reader specialising in Kazakhstan PIR \
(design and survey work) estimates priced against the SCP price book.

Given one estimate table, extract what it bills for.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"text_description\": \"what is being designed, as written in the table\",
  \"table_code_claimed\": \"the SCP table code, digits and dashes only (e.g. '1706-0201-01')\",
  \"position_number\": the position within the SCP table as an integer, or null,
  \"X_claimed\": the natural indicator (area, length, count) as a number,
  \"total_claimed\": the total cost claimed, in tenge, as a number,
  \"year\": the price-book year as an integer, or null,
  \"claimed_coefficients\": [{\"id\": \"K3\", \"value\": 1.2, \"reason\": \"why it applies\"}],
  \"extracted_tags\": [\"short keywords describing the object\"]
}

Numbers must be plain JSON numbers with a dot as the decimal separator and no \
thousands separators. Never invent values that are not in the table.";

const STRICT_SUFFIX: &str = "\

Your previous answer was rejected. Return exactly one JSON object with every \
key listed above. `table_code_claimed` must be a non-empty string, `X_claimed` \
and `total_claimed` must be numbers, and `year` must be between 1990 and 2100 \
or null.";

/// One request to the backend: fixed system instructions plus the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPrompt {
    pub system: String,
    pub user: String,
    /// True on retries, where the previous defect is named.
    pub strict: bool,
}

impl ExtractionPrompt {
    /// First-attempt prompt for a table.
    pub fn standard(table: &NormalizedTable) -> Self {
        Self {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_prompt(table),
            strict: false,
        }
    }

    /// Retry prompt naming what was wrong with the previous answer.
    pub fn strict(table: &NormalizedTable, previous_defect: &str) -> Self {
        let mut user = build_user_prompt(table);
        user.push_str("\n\nPrevious answer was rejected: ");
        user.push_str(previous_defect);
        Self {
            system: format!("{SYSTEM_PROMPT}{STRICT_SUFFIX}"),
            user,
            strict: true,
        }
    }
}

fn build_user_prompt(table: &NormalizedTable) -> String {
    let page = table
        .page_number
        .map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".into());
    let codes = if table.code_candidates.is_empty() {
        "none found".to_string()
    } else {
        table.code_candidates.join(", ")
    };
    format!(
        "Table: {index}\n\
         Page: {page}\n\
         Code-like values seen: {codes}\n\
         \n\
         Table text:\n\
         {text}",
        index = table.table_index,
        text = table.canonical_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NormalizedTable {
        NormalizedTable {
            table_index: 3,
            page_number: Some(12),
            canonical_text: "1. Жилой дом Секция 1 табл. 1706-0201-01 поз.7".into(),
            numeric_tokens: Vec::new(),
            code_candidates: vec!["1706-0201-01".into()],
        }
    }

    #[test]
    fn standard_prompt_carries_table_text() {
        let prompt = ExtractionPrompt::standard(&table());
        assert!(!prompt.strict);
        assert!(prompt.user.contains("Page: 12"));
        assert!(prompt.user.contains("1706-0201-01"));
        assert!(prompt.user.ends_with("поз.7"));
        assert!(prompt.system.contains("X_claimed"));
    }

    #[test]
    fn strict_prompt_names_the_defect() {
        let prompt = ExtractionPrompt::strict(&table(), "missing total_claimed");
        assert!(prompt.strict);
        assert!(prompt.user.ends_with("missing total_claimed"));
        assert!(prompt.system.contains("previous answer was rejected"));
    }
}
