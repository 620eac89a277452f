use thiserror::Error;
use vigil_core::PolicyVersion;

/// Single error enum for all policy engine operations.
///
/// Policy *violations* are not errors: they are absorbed into the final
/// action and the recorded violation list. Errors here mean the policy
/// document itself could not be loaded, parsed, or validated.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy load error: {0}")]
    LoadError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("stale policy version: offered {offered}, current {current}")]
    StaleVersion {
        current: PolicyVersion,
        offered: PolicyVersion,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
