//! In-memory fakes for the solver, gateway and loader.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kiln::adapters::{
    BuildFn, Connector, Exporter, GatewayBuilder, GatewayClient, ImageLoader, SolveOpt,
    SolveRequest, Solver,
};
use kiln::core::{BuildError, CancelToken, PipeReader};
use kiln::domain::{
    Definition, GatewayResult, Reference, SolveResponse, SolveStatus, StatusSender, Vertex,
};

pub const IMAGE: &[u8] = b"fake docker image tarball";

/// What the solver saw for one solve
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSolve {
    pub definition: Option<Definition>,
    pub frontend: Option<String>,
    pub frontend_attrs: BTreeMap<String, String>,
    pub exporter: Exporter,
    pub exporter_attrs: BTreeMap<String, String>,
    pub had_output: bool,
}

/// How the fake solver behaves
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    /// Export `IMAGE` (if there is an output) and succeed
    #[default]
    Succeed,

    /// Write part of the image, then fail
    FailAfterPartialWrite(BuildError),

    /// Fail before touching the output
    FailImmediately(BuildError),

    /// Block until the scope is cancelled
    HoldUntilCancelled,
}

#[derive(Debug, Default)]
pub struct FakeSolver {
    pub behavior: Behavior,
    pub recorded: Mutex<Vec<RecordedSolve>>,
    pub gateway: Arc<FakeGateway>,
}

impl FakeSolver {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn last(&self) -> RecordedSolve {
        self.recorded
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no solve recorded")
    }

    fn record(&self, definition: Option<Definition>, opt: &SolveOpt) {
        self.recorded.lock().unwrap().push(RecordedSolve {
            definition,
            frontend: opt.frontend.clone(),
            frontend_attrs: opt.frontend_attrs.clone(),
            exporter: opt.exporter,
            exporter_attrs: opt.exporter_attrs.clone(),
            had_output: opt.exporter_output.is_some(),
        });
    }

    async fn export(
        &self,
        mut opt: SolveOpt,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError> {
        let _ = status.send(step_event("sha256:step", "[1/1] RUN make"));

        match &self.behavior {
            Behavior::Succeed => {
                if let Some(mut out) = opt.exporter_output.take() {
                    out.write_all(IMAGE).await?;
                    out.shutdown().await?;
                }
                let mut response = SolveResponse::default();
                response
                    .exporter_response
                    .insert("containerimage.digest".to_string(), "sha256:feed".to_string());
                Ok(response)
            }
            Behavior::FailAfterPartialWrite(err) => {
                if let Some(mut out) = opt.exporter_output.take() {
                    out.write_all(&IMAGE[..4]).await?;
                }
                Err(err.clone())
            }
            Behavior::FailImmediately(err) => Err(err.clone()),
            Behavior::HoldUntilCancelled => {
                cancel.cancelled().await;
                Err(BuildError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl Solver for FakeSolver {
    async fn solve(
        &self,
        definition: Option<Definition>,
        opt: SolveOpt,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError> {
        self.record(definition, &opt);
        self.export(opt, status, cancel).await
    }
}

#[async_trait]
impl GatewayBuilder for FakeSolver {
    async fn build(
        &self,
        opt: SolveOpt,
        build_fn: BuildFn,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError> {
        self.record(None, &opt);
        let client: Arc<dyn GatewayClient> = self.gateway.clone();
        let result = build_fn(client, cancel.clone()).await?;

        let mut response = self.export(opt, status, cancel).await?;
        response
            .exporter_response
            .insert("refs".to_string(), result.refs.len().to_string());
        Ok(response)
    }
}

fn step_event(digest: &str, name: &str) -> SolveStatus {
    let now = Utc::now();
    SolveStatus {
        vertexes: vec![Vertex {
            digest: digest.to_string(),
            name: name.to_string(),
            started: Some(now),
            completed: Some(now),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Connector handing out a shared fake solver
#[derive(Debug, Default)]
pub struct FakeConnector {
    pub solver: Arc<FakeSolver>,
    pub connects: AtomicUsize,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new(solver: FakeSolver) -> Self {
        Self {
            solver: Arc::new(solver),
            ..Default::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = Arc<FakeSolver>;

    async fn connect(&self, addr: &str) -> Result<Arc<FakeSolver>, BuildError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(BuildError::Connect {
                addr: addr.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Arc::clone(&self.solver))
    }
}

/// Gateway whose references are named after the definition bytes
#[derive(Debug, Default)]
pub struct FakeGateway {
    /// Per-definition solve latency
    pub delays: HashMap<String, Duration>,
    pub failing: HashSet<String>,
    pub files: HashMap<String, Vec<u8>>,
    /// Definitions in the order their solves finished
    pub completed: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn with_delay(mut self, definition: &str, delay: Duration) -> Self {
        self.delays.insert(definition.to_string(), delay);
        self
    }

    pub fn failing_on(mut self, definition: &str) -> Self {
        self.failing.insert(definition.to_string());
        self
    }

    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    async fn solve(
        &self,
        request: SolveRequest,
        cancel: &CancelToken,
    ) -> Result<GatewayResult, BuildError> {
        let name = String::from_utf8_lossy(request.definition.as_bytes()).to_string();
        let delay = self.delays.get(&name).copied().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                self.cancelled.lock().unwrap().push(name);
                return Err(BuildError::Cancelled);
            }
        }

        if self.failing.contains(&name) {
            return Err(BuildError::Solve(format!("{} failed", name)));
        }
        self.completed.lock().unwrap().push(name.clone());
        Ok(GatewayResult::with_ref(Reference::new(format!("ref:{}", name))))
    }

    async fn read_file(
        &self,
        _reference: &Reference,
        path: &str,
        _cancel: &CancelToken,
    ) -> Result<Vec<u8>, BuildError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| BuildError::Solve(format!("{}: no such file", path)))
    }
}

/// Loader that collects the stream in memory
#[derive(Debug, Default)]
pub struct FakeLoader {
    pub calls: AtomicUsize,
    pub received: Mutex<Vec<u8>>,
    pub fail: Option<BuildError>,
}

impl FakeLoader {
    pub fn failing(err: BuildError) -> Self {
        Self {
            fail: Some(err),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageLoader for FakeLoader {
    fn name(&self) -> &str {
        "fake"
    }

    async fn load(&self, input: &mut PipeReader) -> Result<(), BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }

        let mut buf = Vec::new();
        input.read_to_end(&mut buf).await?;
        self.received.lock().unwrap().extend_from_slice(&buf);
        Ok(())
    }
}
