pub mod calculator;
pub mod claim;
pub mod config;
pub mod error;
pub mod normalize;
pub mod payload;
pub mod reference;
pub mod schema;
pub mod verdict;

pub use calculator::CostCalculator;
pub use claim::{Claim, ClaimError, ClaimField, ClaimParts, ClaimedCoefficient};
pub use config::{AuditConfig, ExtractionConfig, DEFAULT_YEAR};
pub use error::{CalculationError, ConfigError, InputError};
pub use normalize::{normalize_code, normalize_table, parse_number};
pub use payload::{NormalizedTable, RawTablePayload};
pub use reference::{AllowedCoefficient, QuantityRange, ReferenceEntry, YearRange, coefficient_key};
pub use schema::scp;
pub use verdict::{
    AppliedCoefficient, AuditVerdict, FormulaStrategy, UnappliedCoefficient, UnappliedReason,
    VerdictKind,
};
