use thiserror::Error;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("signal error: {0}")]
    Signal(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("audit error: {0}")]
    Audit(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("review error: {0}")]
    Review(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type VigilResult<T> = Result<T, VigilError>;
