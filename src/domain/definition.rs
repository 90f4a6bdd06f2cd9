//! Serialized build graphs.
//!
//! Graph construction happens outside this crate. Producers hand over a
//! [`GraphState`], which is marshalled into an opaque [`Definition`] right
//! before it is submitted to the solver.

use sha2::{Digest, Sha256};

use crate::core::BuildError;

/// Marshalled build graph, immutable once produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    bytes: Vec<u8>,
}

impl Definition {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content digest (`sha256:<hex>`), used for log correlation
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// A graph produced by an external builder that can be marshalled for the solver
pub trait GraphState: Send + Sync {
    fn marshal(&self) -> Result<Definition, BuildError>;
}

impl GraphState for Definition {
    fn marshal(&self) -> Result<Definition, BuildError> {
        Ok(self.clone())
    }
}
