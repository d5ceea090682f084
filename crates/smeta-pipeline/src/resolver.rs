//! Maps a claim onto exactly one regulated reference entry and sorts its
//! claimed coefficients into applied and unapplied.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smeta_core::{
    AppliedCoefficient, Claim, ClaimedCoefficient, ReferenceEntry, UnappliedCoefficient,
    UnappliedReason, coefficient_key,
};
use smeta_store::ReferenceStore;
use tracing::{debug, info, instrument};

use crate::error::ResolveError;

/// Regulated bounds for any coefficient value.
const COEFFICIENT_MIN: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
const COEFFICIENT_MAX: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Which ordering key separated the winner from the runner-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    /// The winner was the only entry whose X band fits the claim.
    QuantityBand,
    NarrowestYearRange,
    LatestEffectiveFrom,
    LowestEntryId,
}

/// Record of a choice between several matching entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieBreak {
    /// Candidate ids, best first.
    pub candidates: Vec<String>,
    pub chosen: String,
    pub rule: TieBreakRule,
}

/// An allowed coefficient the estimate did not claim, although one of the
/// claim's tags matches its conditions. Advisory only; never multiplied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedCoefficient {
    pub id: String,
    pub value: Decimal,
    pub condition: String,
    pub tag: String,
}

/// The entry a claim resolved to, with its coefficients classified.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub entry: ReferenceEntry,
    pub tie_break: Option<TieBreak>,
    pub applied: Vec<AppliedCoefficient>,
    pub unapplied: Vec<UnappliedCoefficient>,
    pub suggested: Vec<SuggestedCoefficient>,
}

#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn ReferenceStore>,
    timeout: Duration,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn ReferenceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[instrument(skip_all, fields(code = claim.table_code_claimed(), year = claim.year()))]
    pub async fn resolve(&self, claim: &Claim) -> Result<Resolution, ResolveError> {
        let code = claim.table_code_claimed();
        let year = claim.year();
        let found = tokio::time::timeout(self.timeout, self.store.find(code, year))
            .await
            .map_err(|_| ResolveError::Timeout(self.timeout))??;

        let candidates = narrow_by_position(found, claim.position_number());
        let (entry, tie_break) = choose(candidates, claim.x_claimed()).ok_or_else(|| ResolveError::NotFound {
            code: code.to_string(),
            year,
        })?;
        if let Some(tb) = &tie_break {
            info!(
                chosen = %tb.chosen,
                candidates = ?tb.candidates,
                rule = ?tb.rule,
                "several reference entries matched, tie broken"
            );
        }

        let (applied, unapplied) = match_coefficients(&entry, claim.claimed_coefficients());
        let suggested = suggest_coefficients(
            &entry,
            claim.extracted_tags(),
            claim.claimed_coefficients(),
        );
        debug!(
            entry = %entry.entry_id,
            applied = applied.len(),
            unapplied = unapplied.len(),
            suggested = suggested.len(),
            "claim resolved"
        );
        Ok(Resolution {
            entry,
            tie_break,
            applied,
            unapplied,
            suggested,
        })
    }
}

/// Keep only entries for the claimed position when any carry it.
fn narrow_by_position(entries: Vec<ReferenceEntry>, position: Option<u32>) -> Vec<ReferenceEntry> {
    let Some(position) = position.map(|p| p.to_string()) else {
        return entries;
    };
    let matches_position =
        |e: &ReferenceEntry| e.position_id.as_deref().map(str::trim) == Some(position.as_str());
    if entries.iter().any(matches_position) {
        entries.into_iter().filter(matches_position).collect()
    } else {
        entries
    }
}

/// Split entries into those whose X band suits `x` and the rest.
///
/// Entries without a band suit any `x`. When `x` falls outside every band,
/// the band closest below it is kept (extrapolated upwards), or the lowest
/// band when `x` is below all of them.
fn split_by_quantity(
    entries: Vec<ReferenceEntry>,
    x: Decimal,
) -> (Vec<ReferenceEntry>, Vec<ReferenceEntry>) {
    let covers = |e: &ReferenceEntry| e.x_range.is_none_or(|r| r.contains(x));
    if entries.iter().any(covers) {
        return entries.into_iter().partition(covers);
    }

    let ranges = || entries.iter().filter_map(|e| e.x_range);
    let below = ranges().map(|r| r.max).filter(|max| *max < x).max();
    let lowest = ranges().map(|r| r.min).min();
    let nearest = |e: &ReferenceEntry| match (e.x_range, below) {
        (Some(r), Some(max)) => r.max == max,
        (Some(r), None) => Some(r.min) == lowest,
        (None, _) => false,
    };
    if below.is_none() && lowest.is_some() {
        debug!(%x, "X below every reference band, extrapolating the lowest");
    }
    entries.into_iter().partition(nearest)
}

fn rank(a: &ReferenceEntry, b: &ReferenceEntry) -> Ordering {
    a.year_range
        .width()
        .cmp(&b.year_range.width())
        .then_with(|| b.effective_from.cmp(&a.effective_from))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// X band first, then narrowest year range, then latest `effective_from`,
/// then lowest id.
fn choose(
    entries: Vec<ReferenceEntry>,
    x: Decimal,
) -> Option<(ReferenceEntry, Option<TieBreak>)> {
    let (mut kept, mut dropped) = split_by_quantity(entries, x);
    kept.sort_by(rank);
    dropped.sort_by(rank);

    let rule = match kept.as_slice() {
        [first, second, ..] => Some(if first.year_range.width() != second.year_range.width() {
            TieBreakRule::NarrowestYearRange
        } else if first.effective_from != second.effective_from {
            TieBreakRule::LatestEffectiveFrom
        } else {
            TieBreakRule::LowestEntryId
        }),
        [_] if !dropped.is_empty() => Some(TieBreakRule::QuantityBand),
        _ => None,
    };
    let tie_break = match (rule, kept.first()) {
        (Some(rule), Some(first)) => Some(TieBreak {
            candidates: kept
                .iter()
                .chain(&dropped)
                .map(|e| e.entry_id.clone())
                .collect(),
            chosen: first.entry_id.clone(),
            rule,
        }),
        _ => None,
    };
    kept.into_iter().next().map(|entry| (entry, tie_break))
}

/// Sort claimed coefficients into those the entry allows and those it does not.
///
/// Only applied coefficients may enter the cost product.
pub fn match_coefficients(
    entry: &ReferenceEntry,
    claimed: &[ClaimedCoefficient],
) -> (Vec<AppliedCoefficient>, Vec<UnappliedCoefficient>) {
    let mut applied = Vec::new();
    let mut unapplied = Vec::new();
    let mut seen = HashSet::new();

    for coefficient in claimed {
        let reject = |reason| UnappliedCoefficient {
            id: coefficient.id.clone(),
            value: coefficient.value,
            reason,
        };
        if !seen.insert(coefficient_key(&coefficient.id)) {
            unapplied.push(reject(UnappliedReason::Duplicate));
            continue;
        }
        let allowed: Vec<_> = entry.allowed_values(&coefficient.id).collect();
        if allowed.is_empty() {
            unapplied.push(reject(UnappliedReason::UnknownId));
            continue;
        }
        match coefficient.value {
            Some(value) if value < COEFFICIENT_MIN || value > COEFFICIENT_MAX => {
                unapplied.push(reject(UnappliedReason::OutOfBounds));
            }
            Some(value) => match allowed.iter().find(|a| a.value == value) {
                Some(rule) => applied.push(AppliedCoefficient {
                    id: rule.id.clone(),
                    value,
                    conditions: rule.conditions.clone(),
                }),
                None => unapplied.push(reject(UnappliedReason::ValueNotAllowed)),
            },
            None => match allowed.as_slice() {
                [only] => applied.push(AppliedCoefficient {
                    id: only.id.clone(),
                    value: only.value,
                    conditions: only.conditions.clone(),
                }),
                _ => unapplied.push(reject(UnappliedReason::AmbiguousValue)),
            },
        }
    }
    (applied, unapplied)
}

/// Allowed coefficients whose conditions mention one of `tags`, skipping ids
/// the claim already names. Matching is case-insensitive substring, either way.
pub fn suggest_coefficients(
    entry: &ReferenceEntry,
    tags: &[String],
    claimed: &[ClaimedCoefficient],
) -> Vec<SuggestedCoefficient> {
    let claimed: HashSet<String> = claimed.iter().map(|c| coefficient_key(&c.id)).collect();
    let tags: Vec<(String, &String)> = tags
        .iter()
        .map(|t| (t.trim().to_lowercase(), t))
        .filter(|(lowered, _)| !lowered.is_empty())
        .collect();

    let mut suggested = Vec::new();
    for allowed in &entry.valid_coefficients {
        if claimed.contains(&coefficient_key(&allowed.id)) {
            continue;
        }
        let hit = allowed.conditions.iter().find_map(|condition| {
            let lowered = condition.to_lowercase();
            tags.iter()
                .find(|(tag, _)| lowered.contains(tag.as_str()) || tag.contains(lowered.as_str()))
                .map(|(_, tag)| (condition, *tag))
        });
        if let Some((condition, tag)) = hit {
            suggested.push(SuggestedCoefficient {
                id: allowed.id.clone(),
                value: allowed.value,
                condition: condition.clone(),
                tag: tag.clone(),
            });
        }
    }
    suggested
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use smeta_core::{AllowedCoefficient, ClaimParts, QuantityRange, YearRange};
    use smeta_store::{MemoryStore, StoreError};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn entry(id: &str, from: i32, to: i32, effective: (i32, u32)) -> ReferenceEntry {
        ReferenceEntry {
            entry_id: id.into(),
            code: "1706-0201-01".into(),
            year_range: YearRange::new(from, to),
            effective_from: NaiveDate::from_ymd_opt(effective.0, effective.1, 1).unwrap(),
            ref_a: dec("10637.0"),
            ref_b: dec("3.16"),
            x_range: None,
            position_id: None,
            valid_coefficients: vec![
                AllowedCoefficient {
                    id: "K3".into(),
                    value: dec("1.2"),
                    conditions: vec!["сейсмичность 7 баллов".into()],
                },
                AllowedCoefficient {
                    id: "K3".into(),
                    value: dec("1.3"),
                    conditions: vec!["сейсмичность 8 баллов".into()],
                },
                AllowedCoefficient {
                    id: "K4".into(),
                    value: dec("1.2"),
                    conditions: vec!["стесненные условия".into()],
                },
            ],
        }
    }

    fn claim(coefficients: Vec<ClaimedCoefficient>) -> Claim {
        claim_at(None, coefficients)
    }

    fn claim_at(position_number: Option<u32>, coefficients: Vec<ClaimedCoefficient>) -> Claim {
        claim_with(position_number, "4675.08", coefficients)
    }

    fn claim_with(
        position_number: Option<u32>,
        x: &str,
        coefficients: Vec<ClaimedCoefficient>,
    ) -> Claim {
        Claim::new(ClaimParts {
            text_description: "Жилой дом".into(),
            table_code_claimed: "1706-0201-01".into(),
            position_number,
            x_claimed: dec(x),
            total_claimed: dec("36590764.03"),
            year: 2024,
            claimed_coefficients: coefficients,
            extracted_tags: Vec::new(),
            defaulted_fields: Vec::new(),
        })
        .unwrap()
    }

    fn coeff(id: &str, value: Option<&str>) -> ClaimedCoefficient {
        ClaimedCoefficient {
            id: id.into(),
            value: value.map(dec),
            reason: None,
        }
    }

    fn resolver(entries: Vec<ReferenceEntry>) -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(MemoryStore::new(entries)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn single_match_has_no_tie_break() {
        let resolution = resolver(vec![entry("e1", 2024, 2024, (2024, 1))])
            .resolve(&claim(Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "e1");
        assert!(resolution.tie_break.is_none());
    }

    #[tokio::test]
    async fn no_match_is_not_found() {
        let err = resolver(vec![entry("e1", 2020, 2023, (2020, 1))])
            .resolve(&claim(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { ref code, year: 2024 } if code == "1706-0201-01"));
    }

    #[tokio::test]
    async fn narrowest_year_range_wins() {
        let resolution = resolver(vec![
            entry("wide", 2020, 2025, (2024, 6)),
            entry("narrow", 2024, 2024, (2024, 1)),
        ])
        .resolve(&claim(Vec::new()))
        .await
        .unwrap();
        let tb = resolution.tie_break.unwrap();
        assert_eq!(resolution.entry.entry_id, "narrow");
        assert_eq!(tb.rule, TieBreakRule::NarrowestYearRange);
        assert_eq!(tb.candidates, ["narrow", "wide"]);
    }

    #[tokio::test]
    async fn latest_effective_then_lowest_id() {
        let resolution = resolver(vec![
            entry("b", 2024, 2024, (2024, 1)),
            entry("c", 2024, 2024, (2024, 7)),
        ])
        .resolve(&claim(Vec::new()))
        .await
        .unwrap();
        assert_eq!(resolution.entry.entry_id, "c");
        assert_eq!(resolution.tie_break.unwrap().rule, TieBreakRule::LatestEffectiveFrom);

        let resolution = resolver(vec![
            entry("b", 2024, 2024, (2024, 1)),
            entry("a", 2024, 2024, (2024, 1)),
        ])
        .resolve(&claim(Vec::new()))
        .await
        .unwrap();
        assert_eq!(resolution.entry.entry_id, "a");
        assert_eq!(resolution.tie_break.unwrap().rule, TieBreakRule::LowestEntryId);
    }

    #[tokio::test]
    async fn claimed_position_narrows_candidates() {
        let mut pos7 = entry("wide-pos7", 2020, 2025, (2020, 1));
        pos7.position_id = Some("7".into());
        let mut pos8 = entry("narrow-pos8", 2024, 2024, (2024, 1));
        pos8.position_id = Some("8".into());

        let resolution = resolver(vec![pos7, pos8])
            .resolve(&claim_at(Some(7), Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "wide-pos7");
        assert!(resolution.tie_break.is_none());
    }

    #[test]
    fn tags_suggest_unclaimed_coefficients() {
        let e = entry("e1", 2024, 2024, (2024, 1));
        let tags = vec!["Стесненные условия".to_string(), "сейсмичность 8 баллов".to_string()];

        let suggested = suggest_coefficients(&e, &tags, &[coeff("K3", Some("1.2"))]);
        assert_eq!(suggested.len(), 1);
        assert_eq!(suggested[0].id, "K4");
        assert_eq!(suggested[0].value, dec("1.2"));
        assert_eq!(suggested[0].condition, "стесненные условия");
        assert_eq!(suggested[0].tag, "Стесненные условия");

        assert!(suggest_coefficients(&e, &[], &[]).is_empty());
    }

    #[tokio::test]
    async fn suggestions_never_enter_the_applied_set() {
        let tagged = Claim::new(ClaimParts {
            text_description: "Жилой дом".into(),
            table_code_claimed: "1706-0201-01".into(),
            position_number: None,
            x_claimed: dec("4675.08"),
            total_claimed: dec("36590764.03"),
            year: 2024,
            claimed_coefficients: vec![coeff("K3", Some("1.2"))],
            extracted_tags: vec!["стесненные".into()],
            defaulted_fields: Vec::new(),
        })
        .unwrap();
        let resolution = resolver(vec![entry("e1", 2024, 2024, (2024, 1))])
            .resolve(&tagged)
            .await
            .unwrap();
        assert_eq!(resolution.applied.len(), 1);
        assert_eq!(resolution.applied[0].id, "K3");
        assert_eq!(resolution.suggested.len(), 1);
        assert_eq!(resolution.suggested[0].id, "K4");
    }

    fn banded(id: &str, min: &str, max: &str) -> ReferenceEntry {
        let mut e = entry(id, 2024, 2024, (2024, 1));
        e.x_range = Some(QuantityRange {
            min: dec(min),
            max: dec(max),
        });
        e
    }

    fn x_bands() -> ReferenceResolver {
        resolver(vec![
            banded("a-small", "0", "1000"),
            banded("b-large", "1000", "10000"),
            banded("c-huge", "10000", "50000"),
        ])
    }

    #[tokio::test]
    async fn band_containing_x_wins_over_lower_id() {
        let resolution = x_bands()
            .resolve(&claim_with(None, "4675.08", Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "b-large");
        let tb = resolution.tie_break.unwrap();
        assert_eq!(tb.rule, TieBreakRule::QuantityBand);
        assert_eq!(tb.candidates, ["b-large", "a-small", "c-huge"]);
    }

    #[tokio::test]
    async fn x_beyond_every_band_takes_the_highest() {
        let resolution = x_bands()
            .resolve(&claim_with(None, "80000", Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "c-huge");

        let resolution = resolver(vec![banded("a-small", "100", "1000"), banded("b-large", "1000", "10000")])
            .resolve(&claim_with(None, "50", Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "a-small");
    }

    #[tokio::test]
    async fn x_in_a_gap_takes_the_band_below() {
        let resolution = resolver(vec![banded("low", "0", "1000"), banded("high", "5000", "9000")])
            .resolve(&claim_with(None, "2000", Vec::new()))
            .await
            .unwrap();
        assert_eq!(resolution.entry.entry_id, "low");
        assert_eq!(resolution.tie_break.unwrap().rule, TieBreakRule::QuantityBand);
    }

    #[tokio::test]
    async fn unbanded_entries_suit_any_x() {
        let resolution = resolver(vec![
            banded("a-small", "0", "1000"),
            entry("b-open", 2024, 2024, (2024, 1)),
        ])
        .resolve(&claim_with(None, "4675.08", Vec::new()))
        .await
        .unwrap();
        assert_eq!(resolution.entry.entry_id, "b-open");
    }

    struct StuckStore;

    #[async_trait]
    impl ReferenceStore for StuckStore {
        async fn find(&self, _code: &str, _year: i32) -> Result<Vec<ReferenceEntry>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let resolver = ReferenceResolver::new(Arc::new(StuckStore), Duration::from_millis(20));
        let err = resolver.resolve(&claim(Vec::new())).await.unwrap_err();
        assert!(matches!(err, ResolveError::Timeout(_)));
    }

    #[test]
    fn coefficient_matching_outcomes() {
        let e = entry("e1", 2024, 2024, (2024, 1));
        let (applied, unapplied) = match_coefficients(
            &e,
            &[
                coeff("К3", Some("1.2")),
                coeff("K4", None),
                coeff("k3", Some("1.3")),
                coeff("K7", Some("1.1")),
                coeff("K8", Some("12")),
            ],
        );
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].id, "K3");
        assert_eq!(applied[0].value, dec("1.2"));
        assert_eq!(applied[1].id, "K4");
        assert_eq!(applied[1].conditions, ["стесненные условия"]);

        let reasons: Vec<_> = unapplied.iter().map(|u| (u.id.as_str(), u.reason)).collect();
        assert_eq!(
            reasons,
            [
                ("k3", UnappliedReason::Duplicate),
                ("K7", UnappliedReason::UnknownId),
                ("K8", UnappliedReason::UnknownId),
            ]
        );
    }

    #[test]
    fn value_checks_against_allowed_set() {
        let e = entry("e1", 2024, 2024, (2024, 1));
        let (applied, unapplied) = match_coefficients(&e, &[coeff("K3", Some("1.25"))]);
        assert!(applied.is_empty());
        assert_eq!(unapplied[0].reason, UnappliedReason::ValueNotAllowed);

        let (_, unapplied) = match_coefficients(&e, &[coeff("K3", None)]);
        assert_eq!(unapplied[0].reason, UnappliedReason::AmbiguousValue);

        let (_, unapplied) = match_coefficients(&e, &[coeff("K4", Some("11"))]);
        assert_eq!(unapplied[0].reason, UnappliedReason::OutOfBounds);

        let (_, unapplied) = match_coefficients(&e, &[coeff("K4", Some("0.05"))]);
        assert_eq!(unapplied[0].reason, UnappliedReason::OutOfBounds);
    }
}
