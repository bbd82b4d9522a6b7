//! Code Loader / Isolation Manager - defines synthesized artifacts into the
//! correct loading scope, deduplicates identical content, and relocates
//! dependent code across scope boundaries when needed.
//!
//! Serialization is scoped per (scope, name) target only: the define-once
//! path is the sole place mutual exclusion is required, and a process-wide
//! lock would deadlock against the reentrant load path that triggers it.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

pub mod artifact;
mod relocate;

pub use artifact::{Artifact, ArtifactKind};

/// A code-loading boundary within which defined artifacts are mutually
/// visible. The global scope is additionally visible from every local scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Process-global: required when instrumented code runs in loader
    /// contexts with no access back to the engine.
    Global,
    /// A caller-local loading boundary, identified by the host.
    Local(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// The host capability that actually installs code into a scope.
pub trait UnitDefiner: Send + Sync {
    fn define_unit(&self, scope: &Scope, name: &str, bytes: &[u8]) -> anyhow::Result<()>;
}

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("artifact {artifact:?} depends on {dependency:?}, which is not defined in scope {scope} or globally")]
    MissingDependency {
        artifact: String,
        dependency: String,
        scope: Scope,
    },

    #[error("artifact {name:?} already defined in scope {scope} with different content")]
    Conflict { name: String, scope: Scope },

    #[error("host failed to define {name:?} in scope {scope}")]
    Host {
        name: String,
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },

    #[error("artifact {name:?} is not registered with the loader")]
    UnknownArtifact { name: String },
}

/// A successfully defined unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedUnit {
    pub name: String,
    pub scope: Scope,
    pub content_hash: String,
}

pub struct CodeLoader {
    definer: Arc<dyn UnitDefiner>,
    /// (scope, name) -> content hash of what is defined there.
    defined: DashMap<(Scope, String), String>,
    /// Per-target locks for the define-once path.
    locks: DashMap<(Scope, String), Arc<Mutex<()>>>,
    /// Registered artifacts, by name; the relocation pass reads dependency
    /// closures from here.
    artifacts: DashMap<String, Artifact>,
    /// One-time relocation results keyed by (root content hash, target scope).
    relocations: DashMap<(String, Scope), Vec<DefinedUnit>>,
}

impl CodeLoader {
    pub fn new(definer: Arc<dyn UnitDefiner>) -> Self {
        Self {
            definer,
            defined: DashMap::new(),
            locks: DashMap::new(),
            artifacts: DashMap::new(),
            relocations: DashMap::new(),
        }
    }

    /// Register an artifact so later define and relocate calls can resolve
    /// it by name. Owned by the loader from creation until process end.
    pub fn register(&self, artifact: Artifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    pub fn artifact(&self, name: &str) -> Option<Artifact> {
        self.artifacts.get(name).map(|a| a.clone())
    }

    pub fn is_defined(&self, scope: &Scope, name: &str) -> bool {
        self.defined
            .contains_key(&(scope.clone(), name.to_string()))
    }

    /// Define an artifact into a scope. All dependencies must already be
    /// visible from that scope. Re-defining identical content is a dedup
    /// hit, not an error.
    pub fn define(&self, artifact: &Artifact, scope: &Scope) -> Result<DefinedUnit, DefinitionError> {
        for dependency in &artifact.dependencies {
            if !self.dependency_visible(scope, dependency) {
                return Err(DefinitionError::MissingDependency {
                    artifact: artifact.name.clone(),
                    dependency: dependency.clone(),
                    scope: scope.clone(),
                });
            }
        }

        let key = (scope.clone(), artifact.name.clone());
        let hash = artifact.content_hash();

        if let Some(existing) = self.defined.get(&key) {
            if *existing == hash {
                trace!(name = %artifact.name, %scope, "Dedup hit, artifact already defined");
                return Ok(DefinedUnit {
                    name: artifact.name.clone(),
                    scope: scope.clone(),
                    content_hash: hash,
                });
            }
            return Err(DefinitionError::Conflict {
                name: artifact.name.clone(),
                scope: scope.clone(),
            });
        }

        self.definer
            .define_unit(scope, &artifact.name, &artifact.bytes)
            .map_err(|source| DefinitionError::Host {
                name: artifact.name.clone(),
                scope: scope.clone(),
                source,
            })?;

        debug!(name = %artifact.name, %scope, "Defined artifact");
        self.defined.insert(key, hash.clone());
        Ok(DefinedUnit {
            name: artifact.name.clone(),
            scope: scope.clone(),
            content_hash: hash,
        })
    }

    /// Race-safe define: concurrent callers targeting the same (scope, name)
    /// are serialized against each other and nobody else.
    pub fn define_if_absent(
        &self,
        artifact: &Artifact,
        scope: &Scope,
    ) -> Result<DefinedUnit, DefinitionError> {
        let key = (scope.clone(), artifact.name.clone());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if let Some(existing) = self.defined.get(&key) {
            return Ok(DefinedUnit {
                name: artifact.name.clone(),
                scope: scope.clone(),
                content_hash: existing.clone(),
            });
        }
        self.define(artifact, scope)
    }

    /// Relocate a registered artifact (and its same-scope dependency
    /// closure) into another scope under content-addressed names. One-time
    /// per (content, target scope); repeated calls reuse the first result.
    pub fn relocate(&self, root: &str, target: &Scope) -> Result<Vec<DefinedUnit>, DefinitionError> {
        relocate::relocate_into(self, root, target)
    }

    fn dependency_visible(&self, scope: &Scope, name: &str) -> bool {
        if self.is_defined(scope, name) {
            return true;
        }
        // Global definitions are visible from every local scope.
        *scope != Scope::Global && self.is_defined(&Scope::Global, name)
    }

    pub(crate) fn relocation_cache(&self) -> &DashMap<(String, Scope), Vec<DefinedUnit>> {
        &self.relocations
    }
}
