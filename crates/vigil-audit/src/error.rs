use thiserror::Error;
use vigil_core::VigilError;

/// Errors raised by the audit trail.
///
/// `WriteFailure` is the one the pipeline treats as fatal: a decision whose
/// log write failed was never made as far as any caller is concerned.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The immutable-log write failed after every retry. The evaluation
    /// must fail closed.
    #[error("audit write failure: {0}")]
    WriteFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Raised only by verification. Indicates tampering; trust in the
    /// partition is suspended until manually cleared.
    #[error("chain integrity violation in partition {partition}: {detail}")]
    ChainIntegrity { partition: String, detail: String },

    /// A prior verification found tampering in this partition; appends are
    /// rejected until the quarantine is cleared.
    #[error("partition {0} is quarantined pending manual review")]
    Quarantined(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<VigilError> for AuditError {
    fn from(err: VigilError) -> Self {
        AuditError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
