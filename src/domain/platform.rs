//! Target platform descriptors.
//!
//! A platform is the `{os, architecture, variant}` triple used both as a
//! solve input and as the namespace for per-platform results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a platform string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformParseError {
    #[error("Invalid platform '{0}': expected os/arch[/variant]")]
    Malformed(String),

    #[error("Invalid platform '{0}': empty component")]
    EmptyComponent(String),
}

/// Build target platform (OCI image-spec field names)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture (e.g. `amd64`, `arm64`)
    pub architecture: String,

    /// Operating system (e.g. `linux`)
    pub os: String,

    /// Optional CPU variant (e.g. `v7` for `arm`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Create a platform without a variant
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }

    /// Set the CPU variant
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64")
    }

    /// Canonical `os/arch[/variant]` form, used to namespace result keys
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(PlatformParseError::Malformed(s.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(PlatformParseError::EmptyComponent(s.to_string()));
        }

        let mut platform = Platform::new(parts[0], parts[1]);
        if let Some(variant) = parts.get(2) {
            platform = platform.with_variant(*variant);
        }
        Ok(platform)
    }
}
