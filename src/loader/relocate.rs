//! Cross-scope relocation: a content-addressed rename pass that copies an
//! artifact, plus its registered dependency closure, into a second isolation
//! boundary.
//!
//! "Compiled once" and "loaded once per boundary" are different things: the
//! bytes are reused as-is, only the names change, so the relocated copy can
//! coexist with the original without clashing in either scope.

use std::collections::HashSet;
use tracing::debug;

use super::{Artifact, CodeLoader, DefinedUnit, DefinitionError, Scope};

pub(super) fn relocate_into(
    loader: &CodeLoader,
    root: &str,
    target: &Scope,
) -> Result<Vec<DefinedUnit>, DefinitionError> {
    let root_artifact = loader
        .artifact(root)
        .ok_or_else(|| DefinitionError::UnknownArtifact {
            name: root.to_string(),
        })?;

    let cache_key = (root_artifact.content_hash(), target.clone());
    if let Some(existing) = loader.relocation_cache().get(&cache_key) {
        return Ok(existing.clone());
    }

    // Dependencies first, root last.
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    closure_post_order(loader, root, &mut visited, &mut order)?;

    let mut defined = Vec::with_capacity(order.len());
    for artifact in &order {
        let relocated = Artifact::new(
            relocated_name(&artifact.name, artifact),
            artifact.kind,
            artifact.bytes.clone(),
            artifact
                .dependencies
                .iter()
                .map(|dep| {
                    let dep_artifact = loader.artifact(dep).expect("closure member registered");
                    relocated_name(dep, &dep_artifact)
                })
                .collect(),
        );
        defined.push(loader.define_if_absent(&relocated, target)?);
    }

    debug!(
        root,
        %target,
        relocated = defined.len(),
        "Relocated artifact closure"
    );
    loader
        .relocation_cache()
        .insert(cache_key, defined.clone());
    Ok(defined)
}

fn closure_post_order(
    loader: &CodeLoader,
    name: &str,
    visited: &mut HashSet<String>,
    order: &mut Vec<Artifact>,
) -> Result<(), DefinitionError> {
    if !visited.insert(name.to_string()) {
        return Ok(());
    }
    let artifact = loader
        .artifact(name)
        .ok_or_else(|| DefinitionError::UnknownArtifact {
            name: name.to_string(),
        })?;
    for dependency in &artifact.dependencies {
        closure_post_order(loader, dependency, visited, order)?;
    }
    order.push(artifact);
    Ok(())
}

/// Content-addressed relocated name: original name plus the short content
/// hash, stable across repeated relocations of the same bytes.
fn relocated_name(name: &str, artifact: &Artifact) -> String {
    format!("{}~{}", name, artifact.short_hash())
}

#[cfg(test)]
mod tests {
    use super::super::{ArtifactKind, UnitDefiner};
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingDefiner {
        defined: Mutex<Vec<(Scope, String)>>,
    }

    impl UnitDefiner for RecordingDefiner {
        fn define_unit(&self, scope: &Scope, name: &str, _bytes: &[u8]) -> anyhow::Result<()> {
            self.defined.lock().push((scope.clone(), name.to_string()));
            Ok(())
        }
    }

    fn artifact(name: &str, bytes: &[u8], deps: &[&str]) -> Artifact {
        Artifact::new(
            name,
            ArtifactKind::AdviceImpl,
            bytes.to_vec(),
            deps.iter().map(|d| d.to_string()).collect(),
        )
    }

    #[test]
    fn relocation_renames_and_defines_dependency_closure_in_order() {
        let definer = Arc::new(RecordingDefiner::default());
        let loader = CodeLoader::new(definer.clone());

        loader.register(artifact("leaf", b"leaf-bytes", &[]));
        loader.register(artifact("mid", b"mid-bytes", &["leaf"]));
        loader.register(artifact("root", b"root-bytes", &["mid"]));

        let target = Scope::Local("app".to_string());
        let defined = loader.relocate("root", &target).unwrap();
        assert_eq!(defined.len(), 3);

        let names: Vec<&str> = defined.iter().map(|d| d.name.as_str()).collect();
        assert!(names[0].starts_with("leaf~"), "dependencies first: {names:?}");
        assert!(names[1].starts_with("mid~"));
        assert!(names[2].starts_with("root~"));

        let calls = definer.defined.lock();
        assert!(calls.iter().all(|(scope, _)| *scope == target));
    }

    #[test]
    fn relocation_is_one_time_per_target() {
        let definer = Arc::new(RecordingDefiner::default());
        let loader = CodeLoader::new(definer.clone());
        loader.register(artifact("root", b"bytes", &[]));

        let target = Scope::Local("app".to_string());
        let first = loader.relocate("root", &target).unwrap();
        let second = loader.relocate("root", &target).unwrap();
        assert_eq!(first, second);
        assert_eq!(definer.defined.lock().len(), 1);
    }

    #[test]
    fn relocating_to_a_second_boundary_defines_again() {
        let loader = CodeLoader::new(Arc::new(RecordingDefiner::default()));
        loader.register(artifact("root", b"bytes", &[]));

        let a = loader.relocate("root", &Scope::Local("a".to_string())).unwrap();
        let b = loader.relocate("root", &Scope::Local("b".to_string())).unwrap();
        // Same content-addressed name, defined once per boundary.
        assert_eq!(a[0].name, b[0].name);
        assert_ne!(a[0].scope, b[0].scope);
    }

    #[test]
    fn unregistered_root_is_an_error() {
        let loader = CodeLoader::new(Arc::new(RecordingDefiner::default()));
        assert!(matches!(
            loader.relocate("missing", &Scope::Global).unwrap_err(),
            DefinitionError::UnknownArtifact { .. }
        ));
    }
}
