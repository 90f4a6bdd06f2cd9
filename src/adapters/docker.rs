//! Local image loader backed by `docker load`.
//!
//! The exported tarball is streamed from the pipe into the loader's stdin.
//! The loader's own output goes straight to the user's terminal.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::{BuildError, PipeReader};

use super::ImageLoader;

/// Loader that spawns a command and feeds the image to its stdin
#[derive(Debug, Clone)]
pub struct DockerLoader {
    /// Program followed by its arguments (default: `docker load`)
    command: Vec<String>,
}

impl Default for DockerLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerLoader {
    pub fn new() -> Self {
        Self {
            command: vec!["docker".to_string(), "load".to_string()],
        }
    }

    /// Use a custom loader command, e.g. `["podman", "load"]`
    pub fn with_command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn spawn(&self) -> Result<Child, BuildError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BuildError::Export("loader command is empty".to_string()))?;

        Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Export(format!("failed to start '{}': {}", program, e)))
    }

    async fn wait_success(&self, child: &mut Child) -> Result<(), BuildError> {
        let status = child
            .wait()
            .await
            .map_err(|e| BuildError::Export(format!("failed to wait for loader: {}", e)))?;

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            return Err(BuildError::Export(format!(
                "'{}' failed with exit code {}",
                self.command.join(" "),
                exit_code
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageLoader for DockerLoader {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("loader")
    }

    async fn load(&self, input: &mut PipeReader) -> Result<(), BuildError> {
        let mut child = self.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BuildError::Export("loader stdin unavailable".to_string()))?;

        let copied = tokio::io::copy(input, &mut stdin).await;
        // Signal EOF to the loader
        drop(stdin);

        match copied {
            Ok(bytes) => {
                debug!(loader = self.name(), bytes, "image stream finished");
                self.wait_success(&mut child).await
            }
            Err(err) => {
                if let Some(carried) = BuildError::from_io(&err) {
                    // Never let the loader import a truncated image
                    warn!(loader = self.name(), error = %carried, "aborting image load");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(carried);
                }

                if err.kind() == std::io::ErrorKind::BrokenPipe {
                    // Loader exited before reading everything; report its status
                    self.wait_success(&mut child).await?;
                    return Err(BuildError::Export(
                        "loader closed its input before the image was complete".to_string(),
                    ));
                }

                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe;

    fn sh(script: &str, extra: &[&str]) -> DockerLoader {
        let mut command = vec!["sh", "-c", script];
        command.extend_from_slice(extra);
        DockerLoader::with_command(command)
    }

    #[test]
    fn test_default_command() {
        let loader = DockerLoader::new();
        assert_eq!(loader.command(), ["docker", "load"]);
        assert_eq!(loader.name(), "docker");
    }

    #[tokio::test]
    async fn test_streams_image_to_loader_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("image.tar");
        let loader = sh("cat > \"$0\"", &[out.to_str().unwrap()]);

        let (writer, mut reader) = pipe();
        let producer = tokio::spawn(async move {
            writer.write_bytes(b"fake image tarball").await.unwrap();
            writer.close();
        });

        loader.load(&mut reader).await.unwrap();
        producer.await.unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"fake image tarball");
    }

    #[tokio::test]
    async fn test_carried_error_is_returned_unchanged() {
        let loader = sh("cat > /dev/null", &[]);
        let (writer, mut reader) = pipe();

        writer.write_bytes(b"partial").await.unwrap();
        writer.close_with_error(BuildError::Solve("executor failed".to_string()));

        let err = loader.load(&mut reader).await.unwrap_err();
        assert!(err.same_as(&BuildError::Solve("executor failed".to_string())));
    }

    #[tokio::test]
    async fn test_failing_loader_is_export_error() {
        let loader = sh("cat > /dev/null; exit 3", &[]);
        let (writer, mut reader) = pipe();
        writer.write_bytes(b"bytes").await.unwrap();
        writer.close();

        let err = loader.load(&mut reader).await.unwrap_err();
        match err {
            BuildError::Export(msg) => assert!(msg.contains("exit code 3"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_export_error() {
        let loader = DockerLoader::with_command(["kiln-no-such-loader-binary"]);
        let (writer, mut reader) = pipe();
        writer.close();

        assert!(matches!(
            loader.load(&mut reader).await,
            Err(BuildError::Export(_))
        ));
    }
}
