//! Command-line interface for kiln.
//!
//! Provides commands for building through a frontend image, submitting a
//! pre-marshalled definition, and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::adapters::{BuildctlConnector, DockerLoader};
use crate::config::{self, ResolvedConfig};
use crate::core::{executor, BuildRequest, CancelToken, Orchestrator};
use crate::domain::{Definition, Platform, SolveResponse};

/// kiln - container image builds against a remote BuildKit solver
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build by running a frontend image on the solver
    Solve {
        #[command(flatten)]
        build: BuildArgs,

        /// Frontend image to call
        #[arg(long)]
        frontend: Option<String>,
    },

    /// Submit a marshalled build definition
    Build {
        #[command(flatten)]
        build: BuildArgs,

        /// File holding the marshalled definition
        #[arg(short, long)]
        definition: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Flags shared by every build command
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Address of the BuildKit daemon
    #[arg(long, env = "BUILDKIT_HOST")]
    pub addr: Option<String>,

    /// Style of progress meter (auto, tty, plain)
    #[arg(long)]
    pub progress: Option<String>,

    /// Tag to use on the image
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Path to the build context
    #[arg(short, long)]
    pub context: Option<PathBuf>,

    /// Push the image instead of loading it locally
    #[arg(long)]
    pub push: bool,

    /// Target platforms (os/arch[/variant], comma-separated)
    #[arg(long = "platform", value_delimiter = ',')]
    pub platforms: Vec<Platform>,

    /// Frontend attribute (repeatable)
    #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub opts: Vec<(String, String)>,
}

/// Flags merged with configuration
#[derive(Debug, Clone, PartialEq)]
struct BuildSettings {
    addr: String,
    progress: String,
    request: BuildRequest,
}

impl BuildArgs {
    fn resolve(&self, cfg: &ResolvedConfig) -> BuildSettings {
        let mut request = BuildRequest::new(self.tag.clone().unwrap_or_else(|| cfg.tag.clone()))
            .with_push(self.push)
            .with_context(self.context.clone().unwrap_or_else(|| cfg.context.clone()));
        if !self.platforms.is_empty() {
            let platforms: Vec<String> = self.platforms.iter().map(Platform::key).collect();
            request = request.with_frontend_attr("platform", platforms.join(","));
        }
        for (key, value) in &self.opts {
            request = request.with_frontend_attr(key, value);
        }

        BuildSettings {
            addr: self.addr.clone().unwrap_or_else(|| cfg.addr.clone()),
            progress: self.progress.clone().unwrap_or_else(|| cfg.progress.clone()),
            request,
        }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

impl Cli {
    /// Execute the CLI command; `cancel` is the root scope (Ctrl-C)
    pub async fn execute(self, cancel: CancelToken) -> Result<()> {
        match self.command {
            Commands::Solve { build, frontend } => solve_frontend(&build, frontend, &cancel).await,
            Commands::Build { build, definition } => {
                solve_definition(&build, &definition, &cancel).await
            }
            Commands::Config => show_config(),
        }
    }
}

fn orchestrator(cfg: &ResolvedConfig) -> Orchestrator<BuildctlConnector, DockerLoader> {
    Orchestrator::new(
        BuildctlConnector::with_binary_path(cfg.buildctl.clone()),
        Arc::new(DockerLoader::with_command(cfg.loader.clone())),
    )
}

/// Build through a frontend image
async fn solve_frontend(
    args: &BuildArgs,
    frontend: Option<String>,
    cancel: &CancelToken,
) -> Result<()> {
    let cfg = config::config()?;
    let settings = args.resolve(cfg);
    let frontend = frontend.unwrap_or_else(|| cfg.frontend.clone());
    let request = settings.request.clone();

    let response = orchestrator(cfg)
        .run(
            cancel,
            &settings.addr,
            &settings.progress,
            request.push,
            move |client, writer, status, scope| async move {
                executor::solve_frontend(client.as_ref(), &frontend, &request, writer, status, scope)
                    .await
            },
        )
        .await?;

    print_result(&settings.request, &response);
    Ok(())
}

/// Submit a marshalled definition read from disk
async fn solve_definition(
    args: &BuildArgs,
    path: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    let cfg = config::config()?;
    let settings = args.resolve(cfg);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read definition: {}", path.display()))?;
    let definition = Definition::new(bytes);
    let request = settings.request.clone();

    let response = orchestrator(cfg)
        .run(
            cancel,
            &settings.addr,
            &settings.progress,
            request.push,
            move |client, writer, status, scope| async move {
                executor::solve_definition(client.as_ref(), definition, &request, writer, status, scope)
                    .await
            },
        )
        .await?;

    print_result(&settings.request, &response);
    Ok(())
}

fn print_result(request: &BuildRequest, response: &SolveResponse) {
    let action = if request.push { "Pushed" } else { "Loaded" };
    match response.image_digest() {
        Some(digest) => println!("{} {} ({})", action, request.tag, digest),
        None => println!("{} {}", action, request.tag),
    }
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("kiln configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Solver:");
    println!("  Address:  {}", cfg.addr);
    println!("  buildctl: {}", cfg.buildctl);
    println!();
    println!("Build defaults:");
    println!("  Progress: {}", cfg.progress);
    println!("  Tag:      {}", cfg.tag);
    println!("  Context:  {}", cfg.context.display());
    println!("  Frontend: {}", cfg.frontend);
    println!();
    println!("Loader: {}", cfg.loader.join(" "));

    Ok(())
}
