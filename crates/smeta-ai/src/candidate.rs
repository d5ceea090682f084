//! Validation and repair of raw backend output into a [`Claim`].
//!
//! Backends answer with loosely-shaped JSON: wrapped in markdown fences,
//! with numbers as localized strings, with keys in the wrong case. Everything
//! recoverable is repaired here; what is not becomes a named defect that the
//! extractor feeds back into its retry prompt.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use smeta_core::{Claim, ClaimField, ClaimParts, ClaimedCoefficient, normalize_code, parse_number};
use tracing::{debug, warn};

/// Years a price book can plausibly be dated.
const YEAR_RANGE: std::ops::RangeInclusive<i64> = 1990..=2100;

const KNOWN_KEYS: [&str; 8] = [
    "text_description",
    "table_code_claimed",
    "position_number",
    "x_claimed",
    "total_claimed",
    "year",
    "claimed_coefficients",
    "extracted_tags",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Valid(Claim),
    Malformed(MalformedCandidate),
}

/// Backend output that could not be turned into a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedCandidate {
    pub defect: String,
    pub raw: String,
}

/// Validate raw backend text, filling a missing year with `default_year`.
pub fn validate(raw: &str, default_year: i32) -> Candidate {
    match build_claim(raw, default_year) {
        Ok(claim) => Candidate::Valid(claim),
        Err(defect) => Candidate::Malformed(MalformedCandidate {
            defect,
            raw: raw.to_string(),
        }),
    }
}

fn build_claim(raw: &str, default_year: i32) -> Result<Claim, String> {
    let body = strip_fences(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("response is not valid JSON: {e}"))?;
    let Value::Object(object) = value else {
        return Err("response is not a JSON object".into());
    };
    let fields = canonical_keys(object);
    let mut defaulted = Vec::new();

    let table_code_claimed = match fields.get("table_code_claimed") {
        Some(Value::String(s)) => normalize_code(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => return Err("missing table_code_claimed".into()),
        Some(_) => return Err("table_code_claimed is not a string".into()),
    };
    if table_code_claimed.is_empty() {
        return Err("table_code_claimed is empty".into());
    }

    let x_claimed = required_decimal(&fields, "x_claimed", "X_claimed")?;
    let total_claimed = required_decimal(&fields, "total_claimed", "total_claimed")?;

    let text_description = match fields.get("text_description") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            defaulted.push(ClaimField::TextDescription);
            String::new()
        }
    };

    let position_number = fields
        .get("position_number")
        .and_then(decimal_of)
        .filter(|d| d.fract().is_zero())
        .and_then(|d| d.to_u32());
    if position_number.is_none() {
        defaulted.push(ClaimField::PositionNumber);
    }

    let year = match fields.get("year") {
        None | Some(Value::Null) => {
            defaulted.push(ClaimField::Year);
            default_year
        }
        Some(v) => {
            let year = decimal_of(v)
                .filter(|d| d.fract().is_zero())
                .and_then(|d| d.to_i64())
                .ok_or_else(|| format!("year is not an integer: {v}"))?;
            if !YEAR_RANGE.contains(&year) {
                return Err(format!("year {year} outside 1990..=2100"));
            }
            year as i32
        }
    };

    let claimed_coefficients = match fields.get("claimed_coefficients") {
        Some(Value::Array(items)) => items.iter().filter_map(coefficient_of).collect(),
        Some(Value::Null) | None => {
            defaulted.push(ClaimField::ClaimedCoefficients);
            Vec::new()
        }
        Some(_) => return Err("claimed_coefficients is not a list".into()),
    };

    let extracted_tags = match fields.get("extracted_tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    Claim::new(ClaimParts {
        text_description,
        table_code_claimed,
        position_number,
        x_claimed,
        total_claimed,
        year,
        claimed_coefficients,
        extracted_tags,
        defaulted_fields: defaulted,
    })
    .map_err(|e| e.to_string())
}

/// Drop markdown fences and any prose around the outermost JSON object.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Lower-case keys, keeping only the ones a claim uses.
fn canonical_keys(object: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in object {
        let canonical = key.trim().to_lowercase();
        if KNOWN_KEYS.contains(&canonical.as_str()) {
            out.entry(canonical).or_insert(value);
        } else {
            debug!(key = %key, "dropping unknown candidate key");
        }
    }
    out
}

fn required_decimal(
    fields: &Map<String, Value>,
    key: &str,
    label: &str,
) -> Result<Decimal, String> {
    match fields.get(key) {
        None | Some(Value::Null) => Err(format!("missing {label}")),
        Some(v) => decimal_of(v).ok_or_else(|| format!("{label} is not a number: {v}")),
    }
}

/// Read a JSON number, or a localized numeric string ("4 675,08").
fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn coefficient_of(item: &Value) -> Option<ClaimedCoefficient> {
    let object = item.as_object()?;
    let id = object
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(id) = id else {
        warn!(item = %item, "dropping claimed coefficient without id");
        return None;
    };
    Some(ClaimedCoefficient {
        id: id.to_string(),
        value: object.get("value").and_then(decimal_of),
        reason: object
            .get("reason")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}
