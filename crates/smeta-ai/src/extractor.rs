//! Retrying claim extractor over an opaque generative backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smeta_core::{Claim, ExtractionConfig, NormalizedTable};
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, validate};
use crate::error::{BackendError, ExtractionError};
use crate::prompt::ExtractionPrompt;

/// A generative engine that answers an extraction prompt with raw text.
///
/// The answer may be malformed; callers validate it.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn complete(&self, prompt: &ExtractionPrompt) -> Result<String, BackendError>;
}

/// How many times to ask, how long to wait between asks, and how long one ask may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each retry after it.
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
            timeout: config.timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): `backoff * 2^(retry-1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Turns normalized tables into claims.
///
/// Each attempt is validated; malformed output, backend errors and timeouts
/// all consume an attempt. Retries use the strict prompt naming the last
/// defect.
#[derive(Clone)]
pub struct ClaimExtractor {
    backend: Arc<dyn ExtractionBackend>,
    policy: RetryPolicy,
    default_year: i32,
}

impl ClaimExtractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, policy: RetryPolicy, default_year: i32) -> Self {
        Self {
            backend,
            policy,
            default_year,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn extract(&self, table: &NormalizedTable) -> Result<Claim, ExtractionError> {
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let prompt = if attempt == 1 {
                ExtractionPrompt::standard(table)
            } else {
                let delay = self.policy.delay(attempt - 1);
                debug!(table = table.table_index, attempt, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
                ExtractionPrompt::strict(table, &last_error)
            };

            let outcome = tokio::time::timeout(self.policy.timeout, self.backend.complete(&prompt)).await;
            last_error = match outcome {
                Ok(Ok(raw)) => match validate(&raw, self.default_year) {
                    Candidate::Valid(claim) => {
                        info!(
                            table = table.table_index,
                            attempt,
                            code = claim.table_code_claimed(),
                            "claim extracted"
                        );
                        return Ok(claim);
                    }
                    Candidate::Malformed(malformed) => malformed.defect,
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("backend timed out after {:?}", self.policy.timeout),
            };
            warn!(
                table = table.table_index,
                attempt,
                max_attempts,
                error = %last_error,
                "extraction attempt failed"
            );
        }

        Err(ExtractionError::Failed {
            attempts: max_attempts,
            last_error,
        })
    }
}
