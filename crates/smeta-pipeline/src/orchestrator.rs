//! Fans a document's tables out into independent, concurrently running jobs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smeta_ai::{ClaimExtractor, ExtractionBackend, RetryPolicy};
use smeta_core::{AuditConfig, CostCalculator, RawTablePayload, normalize_table};
use smeta_store::ReferenceStore;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, ResolveError};
use crate::job::{ErrorKind, JobState, Stage, TableJob, TableJobResult, TableOutput};
use crate::resolver::ReferenceResolver;

/// Aggregate outcome of one document, results in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub tables_processed: usize,
    pub succeeded: usize,
    /// Approved verdicts among the successes.
    pub approved: usize,
    /// Failures other than cancellations.
    pub failed: usize,
    pub cancelled: usize,
    pub results: Vec<TableJobResult>,
}

impl DocumentReport {
    fn from_results(results: Vec<TableJobResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
        Self {
            tables_processed: results.len(),
            succeeded,
            approved: results.iter().filter(|r| r.is_approved()).count(),
            failed: results.len() - succeeded - cancelled,
            cancelled,
            results,
        }
    }
}

/// Stages shared by every job. Read-only once built.
struct Stages {
    extractor: ClaimExtractor,
    resolver: ReferenceResolver,
    calculator: CostCalculator,
}

pub struct PipelineOrchestrator {
    stages: Arc<Stages>,
    worker_limit: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        extractor: ClaimExtractor,
        resolver: ReferenceResolver,
        calculator: CostCalculator,
        worker_limit: usize,
    ) -> Self {
        Self {
            stages: Arc::new(Stages {
                extractor,
                resolver,
                calculator,
            }),
            worker_limit: worker_limit.max(1),
        }
    }

    pub fn from_config(
        config: &AuditConfig,
        backend: Arc<dyn ExtractionBackend>,
        store: Arc<dyn ReferenceStore>,
    ) -> Self {
        Self::new(
            ClaimExtractor::new(
                backend,
                RetryPolicy::from_config(&config.extraction),
                config.default_year,
            ),
            ReferenceResolver::new(store, config.reference_timeout()),
            CostCalculator::from_config(config),
            config.worker_limit,
        )
    }

    /// Audit every table of a document.
    ///
    /// Per-table failures are reported in the results; only a document with
    /// no tables, or with no text in any table, is an error. After
    /// cancellation the report still holds every job that already finished.
    /// Dropping the returned future aborts every unfinished job.
    #[instrument(skip_all, fields(tables = payloads.len(), workers = self.worker_limit))]
    pub async fn run(
        &self,
        payloads: Vec<RawTablePayload>,
        cancel: CancelToken,
    ) -> Result<DocumentReport, PipelineError> {
        if payloads.is_empty() {
            return Err(PipelineError::EmptyDocument);
        }
        if payloads.iter().all(|p| normalize_table(p).is_err()) {
            return Err(PipelineError::NoUsableText {
                tables: payloads.len(),
            });
        }

        let sem = Arc::new(Semaphore::new(self.worker_limit));
        let mut jobs = JoinSet::new();
        let mut slots = Vec::with_capacity(payloads.len());

        for (slot, payload) in payloads.into_iter().enumerate() {
            let stages = Arc::clone(&self.stages);
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            let (progress_tx, progress_rx) = watch::channel(JobState::Pending);
            slots.push((payload.table_index, payload.page_number, progress_rx));

            jobs.spawn(async move {
                let permit = cancel.run(sem.acquire_owned()).await;
                let Some(Ok(_permit)) = permit else {
                    let result = TableJobResult::failure(
                        payload.table_index,
                        payload.page_number,
                        Stage::Normalize,
                        ErrorKind::Cancelled,
                        "cancelled before start",
                    );
                    return (slot, result);
                };
                let job = TableJob::new(payload.table_index, payload.page_number, progress_tx);
                (slot, stages.run_job(job, payload, &cancel).await)
            });
        }

        // Dropping `jobs` aborts every task still running.
        let mut finished: Vec<Option<TableJobResult>> = vec![None; slots.len()];
        let mut last_panic = None;
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((slot, result)) => finished[slot] = Some(result),
                Err(e) => {
                    warn!(error = %e, "table job task died");
                    last_panic = Some(e.to_string());
                }
            }
        }

        let results: Vec<TableJobResult> = slots
            .into_iter()
            .zip(finished)
            .map(|((table_index, page_number, progress), result)| {
                result.unwrap_or_else(|| {
                    let stage = progress.borrow().next_stage().unwrap_or(Stage::Calculate);
                    TableJobResult::failure(
                        table_index,
                        page_number,
                        stage,
                        ErrorKind::Internal,
                        last_panic.clone().unwrap_or_else(|| "table job task died".into()),
                    )
                })
            })
            .collect();

        let report = DocumentReport::from_results(results);
        info!(
            succeeded = report.succeeded,
            approved = report.approved,
            failed = report.failed,
            cancelled = report.cancelled,
            "document audited"
        );
        Ok(report)
    }

    /// Audit a single table outside a document run.
    pub async fn run_table(&self, payload: RawTablePayload, cancel: &CancelToken) -> TableJobResult {
        let (progress, _) = watch::channel(JobState::Pending);
        let job = TableJob::new(payload.table_index, payload.page_number, progress);
        self.stages.run_job(job, payload, cancel).await
    }
}

impl Stages {
    #[instrument(skip_all, fields(table = payload.table_index))]
    async fn run_job(
        &self,
        mut job: TableJob,
        payload: RawTablePayload,
        cancel: &CancelToken,
    ) -> TableJobResult {
        if cancel.is_cancelled() {
            return job.fail(ErrorKind::Cancelled, "cancelled before start");
        }

        let table = match normalize_table(&payload) {
            Ok(table) => table,
            Err(e) => return job.fail(ErrorKind::InputError, e.to_string()),
        };
        drop(payload);
        job.advance();

        let claim = match cancel.run(self.extractor.extract(&table)).await {
            None => return job.fail(ErrorKind::Cancelled, "cancelled during extraction"),
            Some(Err(e)) => return job.fail(ErrorKind::ExtractionFailed, e.to_string()),
            Some(Ok(claim)) => claim,
        };
        job.advance();

        let resolution = match cancel.run(self.resolver.resolve(&claim)).await {
            None => return job.fail(ErrorKind::Cancelled, "cancelled during reference lookup"),
            Some(Err(e @ ResolveError::NotFound { .. })) => {
                return job.fail(ErrorKind::ReferenceNotFound, e.to_string());
            }
            Some(Err(e)) => return job.fail(ErrorKind::ReferenceUnavailable, e.to_string()),
            Some(Ok(resolution)) => resolution,
        };
        job.advance();

        let verdict = match self.calculator.evaluate(
            &resolution.entry,
            &claim,
            resolution.applied,
            resolution.unapplied,
        ) {
            Ok(verdict) => verdict,
            Err(e) => return job.fail(ErrorKind::CalculationError, e.to_string()),
        };
        info!(
            entry = %resolution.entry.entry_id,
            verdict = %verdict.reason,
            approved = verdict.is_approved,
            "table audited"
        );

        job.succeed(TableOutput {
            claim,
            reference_snapshot: resolution.entry,
            verdict,
            tie_break: resolution.tie_break,
            suggested_coefficients: resolution.suggested,
        })
    }
}
