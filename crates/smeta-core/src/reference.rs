//! Regulated reference rows (SCP price-book entries) that claims resolve to.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inclusive range of price-book years an entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

impl YearRange {
    pub fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.from <= year && year <= self.to
    }

    /// Number of years covered, used to prefer the most specific entry.
    pub fn width(&self) -> i32 {
        self.to - self.from
    }
}

/// Inclusive range of the quantity `X` the entry's constants were fitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl QuantityRange {
    pub fn contains(&self, x: Decimal) -> bool {
        self.min <= x && x <= self.max
    }
}

/// A coefficient the regulations allow for an entry, with the conditions
/// under which it applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedCoefficient {
    pub id: String,
    pub value: Decimal,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// One regulated formula row: `cost = ref_A + ref_B * X`, in thousands of tenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub entry_id: String,
    pub code: String,
    pub year_range: YearRange,
    pub effective_from: NaiveDate,
    #[serde(rename = "ref_A")]
    pub ref_a: Decimal,
    #[serde(rename = "ref_B")]
    pub ref_b: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_range: Option<QuantityRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(default)]
    pub valid_coefficients: Vec<AllowedCoefficient>,
}

impl ReferenceEntry {
    pub fn matches(&self, code: &str, year: i32) -> bool {
        self.code == code && self.year_range.contains(year)
    }

    /// All allowed values for a coefficient id (ids compared through [`coefficient_key`]).
    pub fn allowed_values<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a AllowedCoefficient> {
        let key = coefficient_key(id);
        self.valid_coefficients
            .iter()
            .filter(move |c| coefficient_key(&c.id) == key)
    }
}

/// Canonical form of a coefficient id: trimmed, upper-case, Cyrillic `К`
/// folded to Latin `K` (estimates mix both).
pub fn coefficient_key(id: &str) -> String {
    id.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            'К' | 'к' => 'K',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}
