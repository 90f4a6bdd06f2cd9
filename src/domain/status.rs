//! Progress events emitted by a running solve.
//!
//! The shapes match the solver's `rawjson` progress stream so events can be
//! decoded straight off the wire and rendered without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sending half of the status channel (one producer per solve)
pub type StatusSender = mpsc::UnboundedSender<SolveStatus>;

/// Receiving half of the status channel (consumed by the progress reporter)
pub type StatusReceiver = mpsc::UnboundedReceiver<SolveStatus>;

/// Create the unbounded status channel for one solve.
///
/// The channel closes when the sender is dropped, which is how the
/// producer signals that the solve has finished.
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    mpsc::unbounded_channel()
}

/// One batch of progress updates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStatus {
    #[serde(default)]
    pub vertexes: Vec<Vertex>,

    #[serde(default)]
    pub statuses: Vec<VertexStatus>,

    #[serde(default)]
    pub logs: Vec<VertexLog>,
}

/// A step of the build graph and its lifecycle timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub digest: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub cached: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Vertex {
    /// Wall-clock time between start and completion, if both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started, self.completed) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// Sub-progress of a vertex (e.g. bytes of a layer pulled)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexStatus {
    pub id: String,

    pub vertex: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub total: i64,

    #[serde(default)]
    pub current: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

/// A chunk of output from a step's process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexLog {
    pub vertex: String,

    /// 1 = stdout, 2 = stderr
    #[serde(default)]
    pub stream: i32,

    /// Raw bytes; base64 in JSON
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
