//! Error taxonomy for the decisioning pipeline.
//!
//! Input and upstream errors are absorbed close to where they happen so a
//! decision is always produced. Only [`PipelineError::StateRecovery`] and
//! [`PipelineError::Shutdown`] are allowed to stop processing.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A transaction field was malformed and has been coerced to a default.
    #[error("invalid input field `{field}`: {detail}")]
    InputValidation { field: &'static str, detail: String },

    /// The external scorer did not answer within its deadline.
    #[error("upstream scorer timed out after {0:?}")]
    ScoringTimeout(Duration),

    /// The external scorer answered with an error.
    #[error("upstream scorer failed: {0}")]
    Scorer(String),

    /// Checkpoint data is missing, unreadable or fails its checksum.
    #[error("state recovery failed: {0}")]
    StateRecovery(String),

    /// The audit ledger could not accept or persist an entry.
    #[error("audit sink failure: {0}")]
    AuditSink(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline channel closed while a request was in flight.
    #[error("pipeline is shut down")]
    Shutdown,
}

impl PipelineError {
    /// Whether the error compromises state integrity and must halt processing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::StateRecovery(_) | PipelineError::Shutdown)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::StateRecovery("bad checksum".into()).is_fatal());
        assert!(PipelineError::Shutdown.is_fatal());
        assert!(!PipelineError::ScoringTimeout(Duration::from_secs(2)).is_fatal());
        assert!(!PipelineError::AuditSink("disk full".into()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::InputValidation {
            field: "amount",
            detail: "not a number".into(),
        };
        assert_eq!(err.to_string(), "invalid input field `amount`: not a number");
    }
}
