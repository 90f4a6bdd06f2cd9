//! Configuration for kiln.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (and `BUILDKIT_HOST` for the solver address)
//! 2. Environment variables (KILN_BUILDCTL, KILN_LOADER)
//! 3. Config file (.kiln/config.yaml, then ~/.config/kiln/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .kiln/config.yaml
//! - The context path in a project config file is relative to the project root

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_ADDR: &str = "unix:///run/buildkit/buildkitd.sock";
pub const DEFAULT_FRONTEND: &str = "localhost:5000/demo-frontend:latest";
pub const DEFAULT_TAG: &str = "demo";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub loader: Option<LoaderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverConfig {
    /// Solver daemon address
    pub addr: Option<String>,
    /// Path to the buildctl binary
    pub buildctl: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildConfig {
    pub progress: Option<String>,
    pub tag: Option<String>,
    /// Build context (relative to the project root)
    pub context: Option<String>,
    pub frontend: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub command: Vec<String>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub addr: String,
    pub buildctl: String,
    pub progress: String,
    pub tag: String,
    pub context: PathBuf,
    pub frontend: String,
    /// Loader program followed by its arguments
    pub loader: Vec<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            buildctl: "buildctl".to_string(),
            progress: "auto".to_string(),
            tag: DEFAULT_TAG.to_string(),
            context: PathBuf::from("."),
            frontend: DEFAULT_FRONTEND.to_string(),
            loader: vec!["docker".to_string(), "load".to_string()],
            config_file: None,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".kiln").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    // Fall back to the per-user config
    dirs::config_dir()
        .map(|dir| dir.join("kiln").join("config.yaml"))
        .filter(|path| path.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Merge a parsed config file and environment lookups over the defaults
fn resolve(
    file: Option<(&Path, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let mut resolved = ResolvedConfig::default();

    if let Some((config_path, config)) = file {
        // Project root is the parent of .kiln/
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(addr) = config.solver.addr {
            resolved.addr = addr;
        }
        if let Some(buildctl) = config.solver.buildctl {
            resolved.buildctl = buildctl;
        }
        if let Some(progress) = config.build.progress {
            resolved.progress = progress;
        }
        if let Some(tag) = config.build.tag {
            resolved.tag = tag;
        }
        if let Some(context) = config.build.context {
            resolved.context = resolve_path(base_dir, &context);
        }
        if let Some(frontend) = config.build.frontend {
            resolved.frontend = frontend;
        }
        if let Some(loader) = config.loader.filter(|l| !l.command.is_empty()) {
            resolved.loader = loader.command;
        }
        resolved.config_file = Some(config_path.to_path_buf());
    }

    if let Some(buildctl) = env("KILN_BUILDCTL") {
        resolved.buildctl = buildctl;
    }
    if let Some(loader) = env("KILN_LOADER") {
        let command: Vec<String> = loader.split_whitespace().map(String::from).collect();
        if !command.is_empty() {
            resolved.loader = command;
        }
    }

    resolved
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Ok(resolve(Some((path.as_path(), config)), env))
        }
        None => Ok(resolve(None, env)),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
