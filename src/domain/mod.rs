//! Domain types for kiln.
//!
//! This module contains the data passed between the orchestration tasks:
//! - Platform: build target descriptors
//! - Definition: marshalled build graphs
//! - ImageConfig: OCI image-configuration skeletons
//! - SolveStatus: progress events
//! - GatewayResult / SolveResponse: solve outputs

pub mod definition;
pub mod image;
pub mod platform;
pub mod result;
pub mod status;

// Re-export commonly used types
pub use definition::{Definition, GraphState};
pub use image::{ExecConfig, ImageConfig};
pub use platform::{Platform, PlatformParseError};
pub use result::{
    ExportPlatform, ExportPlatforms, GatewayResult, Reference, SolveResponse, IMAGE_CONFIG_KEY,
    PLATFORMS_KEY,
};
pub use status::{
    status_channel, SolveStatus, StatusReceiver, StatusSender, Vertex, VertexLog, VertexStatus,
};
