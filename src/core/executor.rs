//! Build executor: solve-option construction and the solve variants.
//!
//! Every variant picks the exporter the same way. Pushing uses the `image`
//! exporter with `push=true`; otherwise the `docker` exporter streams its
//! tarball into the export pipe.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::adapters::{BuildFn, Exporter, GatewayBuilder, SessionAttachable, SolveOpt, Solver};
use crate::domain::{Definition, SolveResponse, StatusSender};

use super::cancel::CancelToken;
use super::error::BuildError;
use super::pipe::PipeWriter;

/// Frontend that runs another frontend image by reference
pub const GATEWAY_FRONTEND: &str = "gateway.v0";

/// Local directory name for the build context
pub const CONTEXT_DIR: &str = "context";

/// What to build and where the result goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Image name given to the exporter
    pub tag: String,

    /// Push to a registry instead of loading locally
    pub push: bool,

    pub frontend_attrs: BTreeMap<String, String>,

    /// Named directories shared with the solver
    pub local_dirs: BTreeMap<String, PathBuf>,
}

impl BuildRequest {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// Share `path` as the build context
    pub fn with_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_dirs.insert(CONTEXT_DIR.to_string(), path.into());
        self
    }

    pub fn with_local_dir(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.local_dirs.insert(name.into(), path.into());
        self
    }

    pub fn with_frontend_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.frontend_attrs.insert(key.into(), value.into());
        self
    }

    /// Solve options for this request.
    ///
    /// `output` is the export pipe's write side; it is ignored when pushing.
    pub fn solve_opt(&self, output: Option<PipeWriter>) -> SolveOpt {
        let mut opt = SolveOpt {
            frontend: None,
            frontend_attrs: self.frontend_attrs.clone(),
            exporter: Exporter::Image,
            exporter_attrs: BTreeMap::from([("name".to_string(), self.tag.clone())]),
            exporter_output: None,
            local_dirs: self.local_dirs.clone(),
            session: vec![SessionAttachable::DockerAuth],
        };

        if self.push {
            opt.frontend_attrs.insert("push".to_string(), "true".to_string());
            opt.exporter_attrs.insert("push".to_string(), "true".to_string());
        } else {
            opt.exporter = Exporter::Docker;
            opt.exporter_output = output;
        }
        opt
    }
}

/// Run a client-side build function inside a gateway session
#[instrument(skip_all, fields(tag = %request.tag, push = request.push))]
pub async fn build<B>(
    builder: &B,
    request: &BuildRequest,
    output: Option<PipeWriter>,
    status: StatusSender,
    cancel: CancelToken,
    build_fn: BuildFn,
) -> Result<SolveResponse, BuildError>
where
    B: GatewayBuilder + ?Sized,
{
    let opt = request.solve_opt(output);
    debug!(exporter = opt.exporter.as_str(), "Starting gateway build");
    builder.build(opt, build_fn, status, cancel).await
}

/// Delegate the build to the frontend image `frontend`
#[instrument(skip_all, fields(frontend = %frontend, tag = %request.tag, push = request.push))]
pub async fn solve_frontend<S>(
    solver: &S,
    frontend: &str,
    request: &BuildRequest,
    output: Option<PipeWriter>,
    status: StatusSender,
    cancel: CancelToken,
) -> Result<SolveResponse, BuildError>
where
    S: Solver + ?Sized,
{
    let mut opt = request.solve_opt(output);
    opt.frontend = Some(GATEWAY_FRONTEND.to_string());
    opt.frontend_attrs
        .insert("source".to_string(), frontend.to_string());
    debug!(exporter = opt.exporter.as_str(), "Starting frontend solve");
    solver.solve(None, opt, status, cancel).await
}

/// Submit an already marshalled definition
#[instrument(skip_all, fields(definition = %definition.digest(), tag = %request.tag, push = request.push))]
pub async fn solve_definition<S>(
    solver: &S,
    definition: Definition,
    request: &BuildRequest,
    output: Option<PipeWriter>,
    status: StatusSender,
    cancel: CancelToken,
) -> Result<SolveResponse, BuildError>
where
    S: Solver + ?Sized,
{
    if definition.is_empty() {
        return Err(BuildError::Marshal("definition is empty".to_string()));
    }
    let opt = request.solve_opt(output);
    debug!(bytes = definition.len(), exporter = opt.exporter.as_str(), "Starting definition solve");
    solver.solve(Some(definition), opt, status, cancel).await
}
