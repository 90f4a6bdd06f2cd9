//! Solver adapter for BuildKit via the `buildctl` CLI.
//!
//! Subprocess mode: every solve spawns `buildctl build --progress rawjson`.
//! Progress JSON arrives on stderr, the exported tarball (if any) on stdout,
//! and the exporter response is read back from `--metadata-file`.
//!
//! `buildctl` cannot host a client-side build function, so only the
//! one-shot [`Solver`] is implemented here.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::{BuildError, CancelToken, PipeWriter};
use crate::domain::{Definition, SolveResponse, SolveStatus, StatusSender};

use super::{Connector, SolveOpt, Solver};

/// Lines of non-progress stderr kept for error messages
const STDERR_TAIL: usize = 8;

/// Connects by probing the daemon with `buildctl debug workers`
#[derive(Debug, Clone)]
pub struct BuildctlConnector {
    /// Path to the buildctl binary (default: "buildctl")
    binary_path: String,
}

impl Default for BuildctlConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildctlConnector {
    pub fn new() -> Self {
        Self::with_binary_path("buildctl")
    }

    /// Create a connector with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Connector for BuildctlConnector {
    type Client = BuildctlClient;

    #[instrument(skip(self))]
    async fn connect(&self, addr: &str) -> Result<BuildctlClient, BuildError> {
        let connect_err = |message: String| BuildError::Connect {
            addr: addr.to_string(),
            message,
        };

        let output = Command::new(&self.binary_path)
            .args(["--addr", addr, "debug", "workers"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| connect_err(format!("failed to run {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(connect_err(stderr.trim().to_string()));
        }

        debug!("Solver reachable");
        Ok(BuildctlClient {
            binary_path: self.binary_path.clone(),
            addr: addr.to_string(),
        })
    }
}

/// Connected `buildctl` session
#[derive(Debug, Clone)]
pub struct BuildctlClient {
    binary_path: String,
    addr: String,
}

impl BuildctlClient {
    /// Command-line arguments for one solve
    fn build_args(&self, opt: &SolveOpt, metadata_file: &Path) -> Vec<String> {
        let mut args = vec![
            "--addr".to_string(),
            self.addr.clone(),
            "build".to_string(),
            "--progress".to_string(),
            "rawjson".to_string(),
            "--metadata-file".to_string(),
            metadata_file.display().to_string(),
        ];

        if let Some(frontend) = &opt.frontend {
            args.push("--frontend".to_string());
            args.push(frontend.clone());
        }
        for (key, value) in &opt.frontend_attrs {
            args.push("--opt".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (name, path) in &opt.local_dirs {
            args.push("--local".to_string());
            args.push(format!("{}={}", name, path.display()));
        }

        let mut output = format!("type={}", opt.exporter.as_str());
        for (key, value) in &opt.exporter_attrs {
            output.push_str(&format!(",{}={}", key, value));
        }
        args.push("--output".to_string());
        args.push(output);
        args
    }
}

/// Decode one stderr line; `None` for anything that is not a progress record
fn decode_progress_line(line: &str) -> Option<SolveStatus> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Exporter response from the metadata file; non-string values keep their JSON form
fn parse_metadata(bytes: &[u8]) -> Result<SolveResponse, BuildError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(SolveResponse::default());
    }

    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(bytes)?;
    let exporter_response = raw
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect();
    Ok(SolveResponse { exporter_response })
}

#[async_trait]
impl Solver for BuildctlClient {
    #[instrument(skip_all, fields(addr = %self.addr))]
    async fn solve(
        &self,
        definition: Option<Definition>,
        mut opt: SolveOpt,
        status: StatusSender,
        cancel: CancelToken,
    ) -> Result<SolveResponse, BuildError> {
        let metadata = tempfile::NamedTempFile::new()
            .map_err(|e| BuildError::Solve(format!("failed to create metadata file: {}", e)))?;
        let args = self.build_args(&opt, metadata.path());
        let exporter_output = opt.exporter_output.take();

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(if definition.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if exporter_output.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Solve(format!("failed to spawn {}: {}", self.binary_path, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let feed = async move {
            if let (Some(mut stdin), Some(definition)) = (stdin, definition) {
                stdin.write_all(definition.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        // The pipe is closed by the caller once the exit status is known
        let export = async move {
            let mut writer: Option<PipeWriter> = exporter_output;
            if let (Some(mut stdout), Some(w)) = (stdout, writer.as_mut()) {
                tokio::io::copy(&mut stdout, w).await?;
            }
            Ok::<Option<PipeWriter>, std::io::Error>(writer)
        };

        let progress = async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(line) = lines.next_line().await? {
                    match decode_progress_line(&line) {
                        // Reporter may be gone; the solve still has to finish
                        Some(event) => {
                            let _ = status.send(event);
                        }
                        None => {
                            debug!(line = %line, "buildctl");
                            if tail.len() == STDERR_TAIL {
                                tail.remove(0);
                            }
                            tail.push(line);
                        }
                    }
                }
            }
            Ok::<Vec<String>, std::io::Error>(tail)
        };

        let run = async {
            let (fed, exported, tail) = tokio::join!(feed, export, progress);
            let exit = child.wait().await;
            (fed, exported, tail, exit)
        };

        let outcome = tokio::select! {
            outcome = run => Some(outcome),
            _ = cancel.cancelled() => None,
        };

        let Some((fed, exported, tail, exit)) = outcome else {
            warn!("Solve cancelled, stopping buildctl");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(BuildError::Cancelled);
        };

        let exit = exit.map_err(|e| BuildError::Solve(format!("failed to wait for buildctl: {}", e)))?;
        let tail = tail.map_err(BuildError::from)?;
        if !exit.success() {
            let exit_code = exit.code().unwrap_or(-1);
            return Err(BuildError::Solve(format!(
                "buildctl failed with exit code {}: {}",
                exit_code,
                tail.join("\n").trim()
            )));
        }
        fed.map_err(|e| BuildError::Solve(format!("failed to send definition: {}", e)))?;
        if let Some(writer) = exported.map_err(BuildError::from)? {
            writer.close();
        }

        let bytes = tokio::fs::read(metadata.path())
            .await
            .map_err(|e| BuildError::Solve(format!("failed to read metadata file: {}", e)))?;
        let response = parse_metadata(&bytes)?;
        info!(digest = response.image_digest().unwrap_or("-"), "Solve complete");
        Ok(response)
    }
}
