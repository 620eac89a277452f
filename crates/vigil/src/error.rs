use thiserror::Error;

/// Error type for the vigil root crate, aggregating errors from the
/// subsystem crates.
///
/// Note the asymmetry with the rest of the taxonomy: adapter failures,
/// insufficient signal, and policy violations never surface here — they
/// degrade the evaluation instead. What does surface is exactly what must
/// fail the request: audit write failures, configuration problems, and
/// invalid override submissions.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("core error: {0}")]
    Core(#[from] vigil_core::VigilError),

    #[error("policy error: {0}")]
    Policy(#[from] vigil_policy::PolicyError),

    #[error("audit error: {0}")]
    Audit(#[from] vigil_audit::AuditError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("review error: {0}")]
    Review(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;
