//! Audit verdicts and the closed set of reasons they carry.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which variant of the reference formula produced the base cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaStrategy {
    /// `ref_A + ref_B * X`
    Standard,
    /// X above the fitted range: `ref_A + ref_B * (0.4 * max + 0.6 * X)`
    ExtrapolationAbove,
    /// X below the fitted range: `ref_A + ref_B * (0.6 * min + 0.4 * X)`
    ExtrapolationBelow,
}

impl FormulaStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::ExtrapolationAbove => "extrapolation_above",
            Self::ExtrapolationBelow => "extrapolation_below",
        }
    }
}

/// A claimed coefficient that was recognised and multiplied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoefficient {
    pub id: String,
    pub value: Decimal,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// Why a claimed coefficient was left out of the calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnappliedReason {
    UnknownId,
    ValueNotAllowed,
    AmbiguousValue,
    OutOfBounds,
    Duplicate,
}

impl UnappliedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownId => "unknown_id",
            Self::ValueNotAllowed => "value_not_allowed",
            Self::AmbiguousValue => "ambiguous_value",
            Self::OutOfBounds => "out_of_bounds",
            Self::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnappliedCoefficient {
    pub id: String,
    pub value: Option<Decimal>,
    pub reason: UnappliedReason,
}

/// Closed taxonomy of verdict outcomes. `pct` is the relative deviation in
/// percent, rounded to two places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictKind {
    ExactMatch,
    WithinTolerance { pct: Decimal },
    ExceedsTolerance { pct: Decimal },
    ZeroClaimedTotal,
}

impl VerdictKind {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::ExactMatch | Self::WithinTolerance { .. })
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactMatch => f.write_str("exact_match"),
            Self::WithinTolerance { pct } => write!(f, "within_tolerance({pct}%)"),
            Self::ExceedsTolerance { pct } => write!(f, "exceeds_tolerance({pct}%)"),
            Self::ZeroClaimedTotal => f.write_str("zero_claimed_total"),
        }
    }
}

/// Outcome of recomputing one claim. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditVerdict {
    /// Expected cost in the claim's unit.
    pub calculated_total: Decimal,
    /// Formula value before coefficients, in reference units.
    pub base_cost: Decimal,
    pub coefficient_product: Decimal,
    pub formula: FormulaStrategy,
    /// Relative deviation from the claimed total; `None` when the claim is zero.
    pub deviation: Option<Decimal>,
    pub is_approved: bool,
    pub kind: VerdictKind,
    pub reason: String,
    pub applied_coefficients: Vec<AppliedCoefficient>,
    pub unapplied_coefficients: Vec<UnappliedCoefficient>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings() {
        assert_eq!(VerdictKind::ExactMatch.to_string(), "exact_match");
        assert_eq!(
            VerdictKind::WithinTolerance { pct: Decimal::new(30, 2) }.to_string(),
            "within_tolerance(0.30%)"
        );
        assert_eq!(
            VerdictKind::ExceedsTolerance { pct: Decimal::new(1250, 2) }.to_string(),
            "exceeds_tolerance(12.50%)"
        );
        assert_eq!(VerdictKind::ZeroClaimedTotal.to_string(), "zero_claimed_total");
    }

    #[test]
    fn only_matches_are_approved() {
        assert!(VerdictKind::ExactMatch.is_approved());
        assert!(VerdictKind::WithinTolerance { pct: Decimal::ZERO }.is_approved());
        assert!(!VerdictKind::ExceedsTolerance { pct: Decimal::ONE }.is_approved());
        assert!(!VerdictKind::ZeroClaimedTotal.is_approved());
    }

    #[test]
    fn kind_serializes_tagged() {
        let json = serde_json::to_value(VerdictKind::ZeroClaimedTotal).unwrap();
        assert_eq!(json["kind"], "zero_claimed_total");
    }
}
