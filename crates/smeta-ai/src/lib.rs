//! Claim extraction: turns a normalized estimate table into a structured
//! [`Claim`](smeta_core::Claim) through a generative backend, validating and
//! repairing what comes back and retrying with stricter instructions.

pub mod candidate;
mod error;
pub mod extractor;
pub mod prompt;

pub use candidate::{Candidate, MalformedCandidate, validate};
pub use error::{BackendError, ExtractionError};
pub use extractor::{ClaimExtractor, ExtractionBackend, RetryPolicy};
pub use prompt::ExtractionPrompt;

#[cfg(feature = "http")]
mod ollama;
#[cfg(feature = "http")]
pub use ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL, OllamaBackend};
