//! Error taxonomy for the processing pipeline.
//!
//! Collaborator calls (analysis, embedding, persistence) return a
//! [`PipelineError`] so the scheduler can apply one uniform policy:
//! transient errors are retried with backoff, invalid responses trigger the
//! fallback path immediately, persistence errors fail a single artifact, and
//! fatal errors abort the run before any batch work.

/// Failure modes surfaced by pipeline collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Timeout, rate limit, 5xx, or network failure. Worth retrying.
    #[error("transient error: {0}")]
    Transient(String),

    /// The response parsed but is missing required structure. Retrying a
    /// deterministically-bad response is wasted quota; the caller goes
    /// straight to the fallback.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A store write or read failed. Fails the artifact, not the batch.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing credentials, unreachable store, or corpus listing failure.
    /// Aborts the run before any batch work.
    #[error("{0}")]
    Fatal(String),
}

impl PipelineError {
    /// Whether the retry policy should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}
