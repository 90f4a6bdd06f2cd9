//! Adapter interfaces for external systems.
//!
//! The solver and the local image loader live outside this process. The
//! traits here are the seams the orchestrator talks through; `buildctl`
//! and `docker` provide subprocess-backed implementations.

pub mod buildctl;
pub mod docker;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::{BuildError, CancelToken, PipeReader, PipeWriter};
use crate::domain::{Definition, GatewayResult, Reference, SolveResponse, StatusSender};

pub use buildctl::{BuildctlClient, BuildctlConnector};
pub use docker::DockerLoader;

/// Establishes a client session with a solver daemon
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: Send + Sync + 'static;

    async fn connect(&self, addr: &str) -> Result<Self::Client, BuildError>;
}

/// How the solver exports the final image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exporter {
    /// Push to a registry
    #[default]
    Image,

    /// Stream a docker-loadable tarball into [`SolveOpt::exporter_output`]
    Docker,
}

impl Exporter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Docker => "docker",
        }
    }
}

/// Extra capabilities attached to a solve session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAttachable {
    /// Registry credentials from the local docker config
    DockerAuth,
}

/// Options for one solve call
#[derive(Debug, Default)]
pub struct SolveOpt {
    /// Frontend to run instead of a pre-marshalled definition
    pub frontend: Option<String>,

    pub frontend_attrs: BTreeMap<String, String>,

    pub exporter: Exporter,

    pub exporter_attrs: BTreeMap<String, String>,

    /// Destination for exported bytes (only with [`Exporter::Docker`])
    pub exporter_output: Option<PipeWriter>,

    /// Named local directories shared with the solver
    pub local_dirs: BTreeMap<String, PathBuf>,

    pub session: Vec<SessionAttachable>,
}

/// One-shot solve of a definition or frontend
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(
        &self,
        definition: Option<Definition>,
        opt: SolveOpt,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError>;
}

/// Request made from inside a build function
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub definition: Definition,
}

/// Client handed to a build function for nested solves
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn solve(
        &self,
        request: SolveRequest,
        cancel: &CancelToken,
    ) -> Result<GatewayResult, BuildError>;

    /// Read a file out of a solved reference
    async fn read_file(
        &self,
        reference: &Reference,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, BuildError>;
}

/// Build function run by the solver inside a gateway session
pub type BuildFn = Arc<
    dyn Fn(Arc<dyn GatewayClient>, CancelToken) -> BoxFuture<'static, Result<GatewayResult, BuildError>>
        + Send
        + Sync,
>;

/// Solver capable of running a client-side build function
#[async_trait]
pub trait GatewayBuilder: Send + Sync {
    async fn build(
        &self,
        opt: SolveOpt,
        build_fn: BuildFn,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError>;
}

/// Local image store that ingests an exported tarball
#[async_trait]
pub trait ImageLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Consume the tarball until end of stream.
    ///
    /// A failure carried by the stream must be returned as-is.
    async fn load(&self, input: &mut PipeReader) -> Result<(), BuildError>;
}
