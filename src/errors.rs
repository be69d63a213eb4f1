use thiserror::Error;

/// Errors raised by the job store and the order tables.
#[derive(Error, Debug)]
pub enum CassaPrintError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// A Result type alias for CassaPrintError.
pub type Result<T> = core::result::Result<T, CassaPrintError>;
