//! The structured cost claim extracted from one estimate table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A coefficient as claimed by the submitter (K3, K4, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedCoefficient {
    pub id: String,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields that were absent in the extracted candidate and filled with a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimField {
    TextDescription,
    PositionNumber,
    Year,
    ClaimedCoefficients,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("table_code_claimed is empty")]
    EmptyTableCode,
}

/// Raw parts of a [`Claim`], checked by [`Claim::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimParts {
    pub text_description: String,
    pub table_code_claimed: String,
    #[serde(default)]
    pub position_number: Option<u32>,
    #[serde(rename = "X_claimed")]
    pub x_claimed: Decimal,
    pub total_claimed: Decimal,
    pub year: i32,
    #[serde(default)]
    pub claimed_coefficients: Vec<ClaimedCoefficient>,
    #[serde(default)]
    pub extracted_tags: Vec<String>,
    #[serde(default)]
    pub defaulted_fields: Vec<ClaimField>,
}

/// What one estimate table bills for.
///
/// Immutable once built. `table_code_claimed` is never empty, which is what
/// lets the reference lookup run without re-checking it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClaimParts")]
pub struct Claim {
    text_description: String,
    table_code_claimed: String,
    position_number: Option<u32>,
    #[serde(rename = "X_claimed")]
    x_claimed: Decimal,
    total_claimed: Decimal,
    year: i32,
    claimed_coefficients: Vec<ClaimedCoefficient>,
    extracted_tags: Vec<String>,
    defaulted_fields: Vec<ClaimField>,
}

impl TryFrom<ClaimParts> for Claim {
    type Error = ClaimError;

    fn try_from(parts: ClaimParts) -> Result<Self, Self::Error> {
        Claim::new(parts)
    }
}

impl Claim {
    pub fn new(parts: ClaimParts) -> Result<Self, ClaimError> {
        let code = parts.table_code_claimed.trim();
        if code.is_empty() {
            return Err(ClaimError::EmptyTableCode);
        }
        Ok(Self {
            text_description: parts.text_description,
            table_code_claimed: code.to_string(),
            position_number: parts.position_number,
            x_claimed: parts.x_claimed,
            total_claimed: parts.total_claimed,
            year: parts.year,
            claimed_coefficients: parts.claimed_coefficients,
            extracted_tags: parts.extracted_tags,
            defaulted_fields: parts.defaulted_fields,
        })
    }

    pub fn text_description(&self) -> &str {
        &self.text_description
    }

    pub fn table_code_claimed(&self) -> &str {
        &self.table_code_claimed
    }

    pub fn position_number(&self) -> Option<u32> {
        self.position_number
    }

    pub fn x_claimed(&self) -> Decimal {
        self.x_claimed
    }

    pub fn total_claimed(&self) -> Decimal {
        self.total_claimed
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn claimed_coefficients(&self) -> &[ClaimedCoefficient] {
        &self.claimed_coefficients
    }

    pub fn extracted_tags(&self) -> &[String] {
        &self.extracted_tags
    }

    /// Fields filled with a default because the candidate omitted them.
    pub fn defaulted_fields(&self) -> &[ClaimField] {
        &self.defaulted_fields
    }

    pub fn is_defaulted(&self, field: ClaimField) -> bool {
        self.defaulted_fields.contains(&field)
    }
}
