//! Error types for the process table.

use thiserror::Error;

/// Result type alias for process table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors that can occur during process table operations.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("process id already present: {0}")]
    DuplicateId(String),

    #[error("no such process: {0}")]
    NotFound(String),

    #[error("rebuild failed: {0}")]
    Gateway(#[from] kubed_gateway::GatewayError),
}
