//! Per-table job lifecycle and its reported outcome.

use serde::{Deserialize, Serialize};
use smeta_core::{AuditVerdict, Claim, ReferenceEntry};
use tokio::sync::watch;
use tracing::debug;

use crate::resolver::{SuggestedCoefficient, TieBreak};

/// Work that moves a job from one state to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Extract,
    Resolve,
    Calculate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Extract => "extract",
            Self::Resolve => "resolve",
            Self::Calculate => "calculate",
        }
    }
}

/// `Pending → Normalized → Extracted → Resolved → Verdicted`, or `Failed` at
/// the stage that was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Normalized,
    Extracted,
    Resolved,
    Verdicted,
    Failed(Stage),
}

impl JobState {
    /// The stage that would move this state forward; `None` once terminal.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Stage::Normalize),
            Self::Normalized => Some(Stage::Extract),
            Self::Extracted => Some(Stage::Resolve),
            Self::Resolved => Some(Stage::Calculate),
            Self::Verdicted | Self::Failed(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next_stage().is_none()
    }

    fn advanced(self) -> Self {
        match self {
            Self::Pending => Self::Normalized,
            Self::Normalized => Self::Extracted,
            Self::Extracted => Self::Resolved,
            Self::Resolved => Self::Verdicted,
            terminal => terminal,
        }
    }
}

/// Table-level failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    ExtractionFailed,
    ReferenceNotFound,
    ReferenceUnavailable,
    CalculationError,
    Cancelled,
    /// The job task itself died.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputError => "input_error",
            Self::ExtractionFailed => "extraction_failed",
            Self::ReferenceNotFound => "reference_not_found",
            Self::ReferenceUnavailable => "reference_unavailable",
            Self::CalculationError => "calculation_error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutput {
    pub claim: Claim,
    pub reference_snapshot: ReferenceEntry,
    pub verdict: AuditVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break: Option<TieBreak>,
    /// Unclaimed coefficients the claim's tags point at; not part of the total.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_coefficients: Vec<SuggestedCoefficient>,
}

/// One table's outcome: exactly one of `output` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableJobResult {
    pub table_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TableOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TableError>,
}

impl TableJobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Cancelled)
    }

    /// Approved verdicts only; failures and rejections are `false`.
    pub fn is_approved(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.verdict.is_approved)
    }

    pub(crate) fn failure(
        table_index: u32,
        page_number: Option<u32>,
        stage: Stage,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            table_index,
            page_number,
            status: JobStatus::Failed,
            output: None,
            error: Some(TableError {
                stage,
                kind,
                message: message.into(),
            }),
        }
    }
}

/// Drives one job's state forward and publishes each state on `progress`.
///
/// State only moves forward through [`advance`](Self::advance); a job ends by
/// consuming itself in [`succeed`](Self::succeed) or [`fail`](Self::fail).
pub(crate) struct TableJob {
    table_index: u32,
    page_number: Option<u32>,
    state: JobState,
    progress: watch::Sender<JobState>,
}

impl TableJob {
    pub(crate) fn new(
        table_index: u32,
        page_number: Option<u32>,
        progress: watch::Sender<JobState>,
    ) -> Self {
        progress.send_replace(JobState::Pending);
        Self {
            table_index,
            page_number,
            state: JobState::Pending,
            progress,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn advance(&mut self) {
        self.state = self.state.advanced();
        self.progress.send_replace(self.state);
        debug!(table = self.table_index, state = ?self.state, "job advanced");
    }

    pub(crate) fn succeed(mut self, output: TableOutput) -> TableJobResult {
        if self.state == JobState::Resolved {
            self.advance();
        }
        TableJobResult {
            table_index: self.table_index,
            page_number: self.page_number,
            status: JobStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub(crate) fn fail(self, kind: ErrorKind, message: impl Into<String>) -> TableJobResult {
        let stage = self.state.next_stage().unwrap_or(Stage::Calculate);
        self.progress.send_replace(JobState::Failed(stage));
        TableJobResult::failure(self.table_index, self.page_number, stage, kind, message)
    }
}
