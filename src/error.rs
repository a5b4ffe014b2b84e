use thiserror::Error;

/// Failures surfaced by duty operations.
///
/// An unfillable slot is not an error; generation simply skips it.
#[derive(Debug, Error)]
pub enum DutyError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),
}

pub type DutyResult<T> = Result<T, DutyError>;
