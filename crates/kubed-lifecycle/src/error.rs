//! Lifecycle error types.

use std::path::PathBuf;

use kubed_core::TemplateError;
use kubed_gateway::GatewayError;
use kubed_state::TableError;
use thiserror::Error;

/// Errors surfaced by launch, kill, ps and context operations.
///
/// None of them is fatal to the session: the shell prints one line and
/// reads the next command.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cluster unavailable: {0}")]
    GatewayUnavailable(GatewayError),

    #[error("submission failed: {0}")]
    Submission(GatewayError),

    #[error("no such process: {0}")]
    NotFound(String),

    #[error("unknown context: {0}")]
    UnknownContext(String),

    #[error("cannot launch: {0}")]
    Template(#[from] TemplateError),

    #[error("kill of {id} failed, process kept in table: {source}")]
    PartialDivergence { id: String, source: GatewayError },

    #[error("invalid invocation: {0}")]
    Invocation(String),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("process table error: {0}")]
    Table(#[from] TableError),

    #[error("cluster error: {0}")]
    Gateway(GatewayError),
}

impl From<GatewayError> for LifecycleError {
    fn from(e: GatewayError) -> Self {
        if e.is_unavailable() {
            LifecycleError::GatewayUnavailable(e)
        } else {
            LifecycleError::Gateway(e)
        }
    }
}

impl LifecycleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LifecycleError::NotFound(_))
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
