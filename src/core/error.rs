//! Error taxonomy for build orchestration.
//!
//! Errors are `Clone` so a single failure can be carried through the export
//! pipe and still be returned unchanged from the join.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the orchestrator, executors and aggregator
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// Progress style outside `auto`, `tty`, `plain`
    #[error("invalid progress value: {0}")]
    InvalidProgressMode(String),

    #[error("failed to connect to solver at {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("failed to marshal build graph: {0}")]
    Marshal(String),

    #[error("solve failed: {0}")]
    Solve(String),

    #[error("missing result reference: {0}")]
    MissingReference(String),

    /// Image loader failed to start or exited unsuccessfully
    #[error("image load failed: {0}")]
    Export(String),

    #[error("progress console unavailable: {0}")]
    Console(String),

    #[error("pipe error: {0}")]
    Pipe(#[source] Arc<io::Error>),

    #[error("operation cancelled")]
    Cancelled,

    /// A task panicked or was aborted before reporting a result
    #[error("task '{task}' did not complete: {message}")]
    Task { task: String, message: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("serialization error: {0}")]
    Json(String),
}

impl BuildError {
    /// Error carried inside an `io::Error` by the pipe, if any
    pub fn from_io(err: &io::Error) -> Option<BuildError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<BuildError>())
            .cloned()
    }

    /// Wrap this error so it can travel through an `io` interface
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }

    /// Same kind and message, used to compare errors in tests and logs
    pub fn same_as(&self, other: &BuildError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.to_string() == other.to_string()
    }
}

impl From<io::Error> for BuildError {
    fn from(err: io::Error) -> Self {
        match BuildError::from_io(&err) {
            Some(carried) => carried,
            None => BuildError::Pipe(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Json(err.to_string())
    }
}
