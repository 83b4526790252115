//! Error taxonomy for the ABR core.
//!
//! Mirrors spec.md §7: transient network errors and permanent 404s are
//! recovered entirely inside [`crate::pipeline::SegmentPipeline`] and never
//! reach this enum as an `Err`. What does surface here is what the pipeline
//! and controller consider fatal for the current session, plus the sink/fetch
//! transport errors those components need a name for.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AbrError {
    #[error("segment fetch failed for segment {segment_number}: {reason}")]
    SegmentFetch {
        segment_number: u64,
        reason: String,
        retryable: bool,
    },

    #[error("segment fetch timed out after {elapsed:?} (timeout {timeout:?})")]
    SegmentTimeout {
        segment_number: u64,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("media sink quota exceeded")]
    SinkQuotaExceeded,

    #[error("media sink operation failed: {reason}")]
    SinkOperation { reason: String },

    #[error("media sink is in a terminal state ({state}) and can no longer accept appends")]
    SinkClosed { state: &'static str },

    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl AbrError {
    /// Classifies an error per spec.md §7's propagation policy: transient
    /// errors are retried by the caller, fatal ones end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AbrError::SinkClosed { .. } | AbrError::InvariantViolation { .. }
        )
    }

    pub fn segment_fetch(segment_number: u64, reason: impl Into<String>, retryable: bool) -> Self {
        AbrError::SegmentFetch {
            segment_number,
            reason: reason.into(),
            retryable,
        }
    }
}
