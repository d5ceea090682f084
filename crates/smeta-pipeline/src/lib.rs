//! Audit pipeline: drives each estimate table through normalization, claim
//! extraction, reference resolution and cost calculation, many tables at once.

pub mod cancel;
mod error;
pub mod job;
pub mod orchestrator;
pub mod resolver;

pub use cancel::{CancelHandle, CancelToken};
pub use error::{PipelineError, ResolveError};
pub use job::{ErrorKind, JobState, JobStatus, Stage, TableError, TableJobResult, TableOutput};
pub use orchestrator::{DocumentReport, PipelineOrchestrator};
pub use resolver::{
    ReferenceResolver, Resolution, SuggestedCoefficient, TieBreak, TieBreakRule,
    match_coefficients, suggest_coefficients,
};
