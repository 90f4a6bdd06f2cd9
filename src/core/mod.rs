//! Core orchestration logic.
//!
//! This module contains:
//! - CancelToken / TaskGroup: cancellation scopes and first-error-wins joins
//! - Pipe: the export byte stream with error-carrying close
//! - Reporter: progress rendering
//! - Orchestrator: solve + progress + export as one task group
//! - Executor: solve options and the solve variants
//! - Aggregator: multi-platform fan-out and merge

pub mod aggregator;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod export;
pub mod group;
pub mod orchestrator;
pub mod pipe;
pub mod progress;

// Re-export commonly used types
pub use aggregator::{build_for_platforms, build_image, read_from_state};
pub use cancel::CancelToken;
pub use error::BuildError;
pub use executor::{BuildRequest, CONTEXT_DIR, GATEWAY_FRONTEND};
pub use export::export_to_loader;
pub use group::TaskGroup;
pub use orchestrator::{Orchestrator, EXPORT_TASK, PROGRESS_TASK, SOLVE_TASK};
pub use pipe::{pipe, pipe_with_capacity, PipeCloser, PipeReader, PipeWriter, PIPE_BUFFER_SIZE};
pub use progress::{ProgressMode, ProgressWriter, Reporter};
