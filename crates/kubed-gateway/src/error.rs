//! Error types for the cluster command gateway.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while talking to the cluster.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The control tool is missing or the API server cannot be reached.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("`kubectl {command}` failed (exit code {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    pub(crate) fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        GatewayError::Parse {
            what,
            detail: detail.into(),
        }
    }
}
