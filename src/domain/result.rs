//! Solve results.
//!
//! - [`SolveResponse`]: what a top-level solve returns once exporting is done
//! - [`GatewayResult`]: what a build function returns to the exporter; this
//!   is also the aggregate result of a multi-platform build

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::BuildError;

use super::platform::Platform;

/// Metadata key holding the image configuration JSON
pub const IMAGE_CONFIG_KEY: &str = "containerimage.config";

/// Metadata key holding the ordered platform manifest
pub const PLATFORMS_KEY: &str = "refs.platforms";

/// Opaque handle to a solved result on the solver side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference(String);

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Result handed back from a build function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayResult {
    /// Single top-level reference (single-platform builds)
    pub reference: Option<Reference>,

    /// References keyed by platform (multi-platform builds)
    pub refs: BTreeMap<String, Reference>,

    /// Metadata attachments for the exporter
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl GatewayResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result holding exactly one reference
    pub fn with_ref(reference: Reference) -> Self {
        Self {
            reference: Some(reference),
            ..Default::default()
        }
    }

    pub fn set_ref(&mut self, reference: Reference) {
        self.reference = Some(reference);
    }

    pub fn add_ref(&mut self, key: impl Into<String>, reference: Reference) {
        self.refs.insert(key.into(), reference);
    }

    pub fn add_meta(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.metadata.insert(key.into(), value);
    }

    pub fn meta(&self, key: &str) -> Option<&[u8]> {
        self.metadata.get(key).map(Vec::as_slice)
    }

    /// The only reference of a single-output result.
    ///
    /// Fails when the result carries per-platform references or none at all.
    pub fn single_ref(&self) -> Result<Reference, BuildError> {
        if !self.refs.is_empty() {
            return Err(BuildError::MissingReference(format!(
                "expected a single reference, result has {} keyed references",
                self.refs.len()
            )));
        }
        self.reference
            .clone()
            .ok_or_else(|| BuildError::MissingReference("result has no reference".to_string()))
    }
}

/// Response of a top-level solve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveResponse {
    /// Exporter output, e.g. `containerimage.digest`
    #[serde(default)]
    pub exporter_response: BTreeMap<String, String>,
}

impl SolveResponse {
    pub fn image_digest(&self) -> Option<&str> {
        self.exporter_response
            .get("containerimage.digest")
            .map(String::as_str)
    }
}

/// Ordered platform manifest stored under [`PLATFORMS_KEY`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportPlatforms {
    #[serde(rename = "Platforms")]
    pub platforms: Vec<ExportPlatform>,
}

/// One manifest entry: result key plus the platform it was built for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPlatform {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Platform")]
    pub platform: Platform,
}
