//! Synthesized artifacts: generated, loadable code units identified by
//! content hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a synthesized artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// A generated advice implementation.
    AdviceImpl,
    /// A per-method metadata holder consumed by method-meta bindings.
    MethodMetaHolder,
}

/// A generated, loadable code unit plus its dependency list. Produced once
/// per distinct configuration; deduplicated by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
    /// Names of artifacts that must be defined before this one.
    pub dependencies: Vec<String>,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        bytes: Vec<u8>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes,
            dependencies,
        }
    }

    /// Full `sha256:<hex>` content hash of the artifact bytes.
    pub fn content_hash(&self) -> String {
        hash_bytes(&self.bytes)
    }

    /// The 12-character short hash used in stable artifact names.
    pub fn short_hash(&self) -> String {
        short_hash(&self.bytes)
    }
}

/// Hash bytes with SHA-256 in the `sha256:<hex>` form.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn short_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())[..12].to_string()
}
