//! Main orchestrator for a single build.
//!
//! Connects to the solver and runs the solve, the progress reporter and,
//! unless pushing, the export consumer as one task group. The first failure
//! cancels the group's scope and becomes the result.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Connector, ImageLoader};
use crate::domain::{status_channel, SolveResponse, StatusSender};

use super::cancel::CancelToken;
use super::error::BuildError;
use super::export::export_to_loader;
use super::group::TaskGroup;
use super::pipe::{pipe, PipeWriter};
use super::progress::{ProgressMode, ProgressWriter, Reporter};

/// Task names, as they appear in logs and task errors
pub const SOLVE_TASK: &str = "solve";
pub const PROGRESS_TASK: &str = "progress";
pub const EXPORT_TASK: &str = "export";

/// Drives one build against a solver
pub struct Orchestrator<C, L: ?Sized> {
    connector: C,
    loader: Arc<L>,
    interactive: Option<bool>,
    progress_out: Option<ProgressWriter>,
}

impl<C, L> Orchestrator<C, L>
where
    C: Connector,
    L: ImageLoader + ?Sized + 'static,
{
    pub fn new(connector: C, loader: Arc<L>) -> Self {
        Self {
            connector,
            loader,
            interactive: None,
            progress_out: None,
        }
    }

    /// Override terminal detection for the progress reporter
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = Some(interactive);
        self
    }

    /// Send plain progress output somewhere other than stderr
    pub fn with_progress_output(mut self, out: ProgressWriter) -> Self {
        self.progress_out = Some(out);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn reporter(&self, mode: ProgressMode) -> Reporter {
        let mut reporter = Reporter::new(mode);
        if let Some(interactive) = self.interactive {
            reporter = reporter.with_interactive(interactive);
        }
        if let Some(out) = &self.progress_out {
            reporter = reporter.with_plain_writer(Arc::clone(out));
        }
        reporter
    }

    /// Run `build` with progress reporting and, unless `push`, local export.
    ///
    /// `build` receives the connected client, the export pipe's write side
    /// (`None` when pushing), the status sender and the group's scope. It
    /// must drop the status sender when the solve is over.
    #[instrument(skip(self, cancel, build), fields(build_id = tracing::field::Empty))]
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancelToken,
        addr: &str,
        progress: &str,
        push: bool,
        build: F,
    ) -> Result<SolveResponse, BuildError>
    where
        F: FnOnce(Arc<C::Client>, Option<PipeWriter>, StatusSender, CancelToken) -> Fut
            + Send
            + 'static,
        Fut: Future<Output = Result<SolveResponse, BuildError>> + Send + 'static,
    {
        let build_id = Uuid::new_v4();
        tracing::Span::current().record("build_id", tracing::field::display(build_id));

        // Nothing is connected or spawned for an invalid style
        let mode: ProgressMode = progress.parse()?;
        let reporter = self.reporter(mode);

        let client = Arc::new(self.connector.connect(addr).await?);
        info!(%build_id, "Connected to solver");

        let (status_tx, status_rx) = status_channel();
        let (writer, reader) = if push {
            (None, None)
        } else {
            let (writer, reader) = pipe();
            (Some(writer), Some(reader))
        };

        let mut group: TaskGroup<Option<SolveResponse>> = TaskGroup::new(cancel);

        let closer = writer.as_ref().map(PipeWriter::closer);
        let scope = group.token();
        group.spawn(SOLVE_TASK, async move {
            match build(client, writer, status_tx, scope).await {
                Ok(response) => {
                    if let Some(closer) = &closer {
                        closer.close();
                    }
                    Ok(Some(response))
                }
                Err(err) => {
                    // Unblock the export consumer before reporting
                    if let Some(closer) = &closer {
                        closer.close_with_error(err.clone());
                    }
                    Err(err)
                }
            }
        });

        // The reporter gets no token: it runs until the status channel closes
        group.spawn(PROGRESS_TASK, async move {
            reporter.display(status_rx).await?;
            Ok(None)
        });

        if let Some(reader) = reader {
            let loader = Arc::clone(&self.loader);
            group.spawn(EXPORT_TASK, async move {
                export_to_loader(loader.as_ref(), reader).await?;
                Ok(None)
            });
        }

        debug!(tasks = ?group.task_names(), "Waiting for build tasks");
        let outputs = match group.wait().await {
            Ok(outputs) => outputs,
            Err(err) => {
                warn!(%build_id, error = %err, "Build failed");
                return Err(err);
            }
        };

        let response = outputs.into_iter().flatten().next().ok_or_else(|| BuildError::Task {
            task: SOLVE_TASK.to_string(),
            message: "finished without a response".to_string(),
        })?;
        info!(%build_id, digest = response.image_digest().unwrap_or("-"), "Build finished");
        Ok(response)
    }
}
