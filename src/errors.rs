use thiserror::Error;

/// Errors that can occur during queue operations.
///
/// This enum represents the various errors that can occur when interacting
/// with the job tables or coordinating lock state.
#[derive(Error, Debug)]
pub enum QueWorkerError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(#[from] sqlx::Error),

    /// A configuration value failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A Result type alias for QueWorkerError.
pub type Result<T> = core::result::Result<T, QueWorkerError>;
