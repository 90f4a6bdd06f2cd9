//! kiln - container image builds against a remote BuildKit solver
//!
//! Submits a build graph (or a frontend reference) to the solver, renders
//! progress while it runs, and either pushes the result or streams the
//! exported tarball into a local image loader.
//!
//! # Architecture
//!
//! One build is a task group sharing a cancellation scope:
//! - the solve, which writes the exported image into a byte pipe
//! - the progress reporter, which drains the status channel
//! - the export consumer, which feeds the pipe to `docker load`
//!
//! The first failure cancels the scope and is returned. Multi-platform
//! builds fan out one solve per platform and merge the results in input
//! order.
//!
//! # Modules
//!
//! - `adapters`: Solver and loader seams, plus `buildctl` and `docker` adapters
//! - `core`: Orchestration (Orchestrator, TaskGroup, Pipe, Reporter, Aggregator)
//! - `domain`: Data structures (Platform, Definition, SolveStatus, GatewayResult)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Build through a frontend image and load the result locally
//! kiln solve --frontend localhost:5000/demo-frontend:latest --context .
//!
//! # Submit a marshalled definition and push it
//! kiln build --definition graph.pb --tag registry.local/demo --push
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{BuildctlConnector, DockerLoader};
pub use core::{
    build_for_platforms, BuildError, BuildRequest, CancelToken, Orchestrator, ProgressMode,
};
pub use domain::{GatewayResult, Platform, SolveResponse, SolveStatus};
