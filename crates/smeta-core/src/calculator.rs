//! Deterministic recomputation of a claim's cost and the tolerance verdict.
//!
//! `calculated_total = base(ref_A, ref_B, X) * product(coefficients) * unit_scale`
//!
//! All arithmetic is exact decimal with checked operations; coefficients are
//! multiplied in canonical order (id, then value) so the result does not
//! depend on the order they were claimed in.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::claim::Claim;
use crate::config::AuditConfig;
use crate::error::CalculationError;
use crate::reference::{ReferenceEntry, coefficient_key};
use crate::verdict::{
    AppliedCoefficient, AuditVerdict, FormulaStrategy, UnappliedCoefficient, VerdictKind,
};

/// Blend weights for extrapolating outside the fitted X range.
const FOUR_TENTHS: Decimal = Decimal::from_parts(4, 0, 0, false, 1);
const SIX_TENTHS: Decimal = Decimal::from_parts(6, 0, 0, false, 1);

/// Pure cost calculator configured with a tolerance and a unit scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostCalculator {
    /// Allowed relative deviation, as a fraction (0.005 = 0.5%).
    tolerance: Decimal,
    /// Factor converting reference units into claim units.
    unit_scale: Decimal,
}

impl CostCalculator {
    pub fn new(tolerance: Decimal, unit_scale: Decimal) -> Self {
        Self {
            tolerance,
            unit_scale,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.tolerance, config.reference_unit_scale)
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    pub fn unit_scale(&self) -> Decimal {
        self.unit_scale
    }

    /// Recompute `claim` against `entry` using only the applied coefficients.
    ///
    /// Unapplied coefficients are carried into the verdict for reporting and
    /// never enter the product.
    pub fn evaluate(
        &self,
        entry: &ReferenceEntry,
        claim: &Claim,
        applied: Vec<AppliedCoefficient>,
        unapplied: Vec<UnappliedCoefficient>,
    ) -> Result<AuditVerdict, CalculationError> {
        let (base_cost, formula) = base_cost(entry, claim.x_claimed())?;
        let coefficient_product = coefficient_product(&applied)?;
        let calculated_total = base_cost
            .checked_mul(coefficient_product)
            .and_then(|v| v.checked_mul(self.unit_scale))
            .ok_or(CalculationError::Overflow { step: "total" })?;

        let (kind, deviation) = self.judge(calculated_total, claim.total_claimed())?;
        debug!(
            code = claim.table_code_claimed(),
            %calculated_total,
            claimed = %claim.total_claimed(),
            verdict = %kind,
            "claim evaluated"
        );

        Ok(AuditVerdict {
            calculated_total,
            base_cost,
            coefficient_product,
            formula,
            deviation,
            is_approved: kind.is_approved(),
            reason: kind.to_string(),
            kind,
            applied_coefficients: applied,
            unapplied_coefficients: unapplied,
        })
    }

    /// Classify the deviation between calculated and claimed totals.
    ///
    /// A zero claim can never be approved and is reported without dividing.
    pub fn judge(
        &self,
        calculated: Decimal,
        claimed: Decimal,
    ) -> Result<(VerdictKind, Option<Decimal>), CalculationError> {
        if claimed.is_zero() {
            return Ok((VerdictKind::ZeroClaimedTotal, None));
        }

        let deviation = calculated
            .checked_sub(claimed)
            .and_then(|diff| diff.abs().checked_div(claimed.abs()))
            .ok_or(CalculationError::Overflow { step: "deviation" })?;

        if to_cents(calculated) == to_cents(claimed) {
            return Ok((VerdictKind::ExactMatch, Some(deviation)));
        }

        let mut pct = deviation
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(CalculationError::Overflow { step: "percent" })?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        pct.rescale(2);

        let kind = if deviation <= self.tolerance {
            VerdictKind::WithinTolerance { pct }
        } else {
            VerdictKind::ExceedsTolerance { pct }
        };
        Ok((kind, Some(deviation)))
    }
}

/// Formula value before coefficients, in reference units.
pub fn base_cost(
    entry: &ReferenceEntry,
    x: Decimal,
) -> Result<(Decimal, FormulaStrategy), CalculationError> {
    let (effective_x, strategy) = match entry.x_range {
        Some(range) if x > range.max => (
            blend(range.max, x, FOUR_TENTHS, SIX_TENTHS)?,
            FormulaStrategy::ExtrapolationAbove,
        ),
        Some(range) if x < range.min => (
            blend(range.min, x, SIX_TENTHS, FOUR_TENTHS)?,
            FormulaStrategy::ExtrapolationBelow,
        ),
        _ => (x, FormulaStrategy::Standard),
    };

    let base = entry
        .ref_b
        .checked_mul(effective_x)
        .and_then(|v| v.checked_add(entry.ref_a))
        .ok_or(CalculationError::Overflow { step: "base cost" })?;
    Ok((base, strategy))
}

/// Product of coefficient values in canonical order. Empty input gives 1.
pub fn coefficient_product(applied: &[AppliedCoefficient]) -> Result<Decimal, CalculationError> {
    let mut ordered: Vec<(String, Decimal)> = applied
        .iter()
        .map(|c| (coefficient_key(&c.id), c.value))
        .collect();
    ordered.sort();

    ordered.iter().try_fold(Decimal::ONE, |acc, (_, value)| {
        acc.checked_mul(*value)
            .ok_or(CalculationError::Overflow { step: "coefficient product" })
    })
}

fn blend(
    boundary: Decimal,
    x: Decimal,
    boundary_weight: Decimal,
    x_weight: Decimal,
) -> Result<Decimal, CalculationError> {
    boundary
        .checked_mul(boundary_weight)
        .zip(x.checked_mul(x_weight))
        .and_then(|(a, b)| a.checked_add(b))
        .ok_or(CalculationError::Overflow { step: "extrapolation" })
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
