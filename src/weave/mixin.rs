//! Mixin and shim application.
//!
//! Mixins physically add interfaces, fields and a run-once initializer to
//! matching types; shims adapt a synthetic interface view onto types that
//! already structurally satisfy it. Both are computed once from
//! configuration and only referenced by the weaver.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::config::{MixinConfig, MixinFieldConfig, ShimConfig};
use crate::loader::artifact::short_hash;
use crate::model::UnitMetadata;
use crate::pattern::{Pattern, PatternError};

/// A compiled mixin. Identity is the content hash of its configuration, so
/// two rules carrying the same definition share one identity.
#[derive(Debug, Clone)]
pub struct MixinSpec {
    identity: String,
    targets: Vec<Pattern>,
    config: MixinConfig,
}

impl MixinSpec {
    pub fn compile(config: &MixinConfig) -> Result<Self, PatternError> {
        let targets = config
            .targets
            .iter()
            .map(|t| Pattern::compile(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            identity: identity_of(config),
            targets,
            config: config.clone(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// A mixin applies when any target pattern matches the type itself or
    /// any of its transitive ancestors.
    pub fn matches(&self, unit: &UnitMetadata) -> bool {
        self.targets
            .iter()
            .any(|t| unit.self_and_ancestors().any(|name| t.matches(name)))
    }

    pub fn interfaces(&self) -> &[String] {
        &self.config.interfaces
    }

    pub fn fields(&self) -> &[MixinFieldConfig] {
        &self.config.fields
    }

    pub fn init_method(&self) -> Option<&str> {
        self.config.init_method.as_deref()
    }
}

/// All mixin work for one type: applications deduplicated by mixin
/// identity, interface additions idempotent by name, initializers scheduled
/// once per identity.
#[derive(Debug, Clone, Default)]
pub struct MixinPlan {
    pub applications: Vec<Arc<MixinSpec>>,
    pub added_interfaces: Vec<String>,
    pub added_fields: Vec<MixinFieldConfig>,
    /// (mixin identity, initializer method name) pairs, each exactly once.
    pub initializers: Vec<(String, String)>,
}

impl MixinPlan {
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

/// Compute the mixin plan for one matched type. A mixin matching via
/// several overlapping ancestors still applies exactly once.
pub fn plan_mixins(mixins: &[Arc<MixinSpec>], unit: &UnitMetadata) -> MixinPlan {
    let mut plan = MixinPlan::default();
    let mut seen_identities = HashSet::new();
    let mut seen_interfaces: HashSet<&str> = unit
        .self_and_ancestors()
        .collect();

    for mixin in mixins {
        if !mixin.matches(unit) {
            continue;
        }
        if !seen_identities.insert(mixin.identity().to_string()) {
            trace!(unit = %unit.name, identity = %mixin.identity(), "Mixin already applied, skipping");
            continue;
        }

        for interface in mixin.interfaces() {
            if seen_interfaces.insert(interface.as_str()) {
                plan.added_interfaces.push(interface.clone());
            }
        }
        plan.added_fields.extend(mixin.fields().iter().cloned());
        if let Some(init) = mixin.init_method() {
            plan.initializers
                .push((mixin.identity().to_string(), init.to_string()));
        }
        plan.applications.push(Arc::clone(mixin));
    }

    plan
}

/// A compiled shim: a synthetic interface view over a structurally
/// compatible type.
#[derive(Debug, Clone)]
pub struct ShimSpec {
    identity: String,
    target: Pattern,
    config: ShimConfig,
}

impl ShimSpec {
    pub fn compile(config: &ShimConfig) -> Result<Self, PatternError> {
        Ok(Self {
            identity: identity_of(config),
            target: Pattern::compile(&config.target)?,
            config: config.clone(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn interface(&self) -> &str {
        &self.config.interface
    }

    /// The type must match the target pattern and already carry every
    /// required method signature.
    pub fn matches(&self, unit: &UnitMetadata) -> bool {
        if !self.target.matches(&unit.name) {
            return false;
        }
        self.config.methods.iter().all(|required| {
            unit.methods.iter().any(|m| {
                m.name == required.name && m.parameter_types == required.parameter_types
            })
        })
    }
}

/// Shims applicable to one type, deduplicated by identity.
pub fn plan_shims(shims: &[Arc<ShimSpec>], unit: &UnitMetadata) -> Vec<Arc<ShimSpec>> {
    let mut seen = HashSet::new();
    shims
        .iter()
        .filter(|s| s.matches(unit) && seen.insert(s.identity().to_string()))
        .cloned()
        .collect()
}

fn identity_of<T: serde::Serialize>(config: &T) -> String {
    let bytes = serde_json::to_vec(config).expect("mixin/shim config serializes");
    short_hash(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodMetadata, Modifiers};
    use pretty_assertions::assert_eq;

    fn unit(name: &str, ancestors: &[&str]) -> UnitMetadata {
        UnitMetadata {
            name: name.to_string(),
            annotations: vec![],
            ancestors: ancestors.iter().map(|s| s.to_string()).collect(),
            is_interface: false,
            methods: vec![],
        }
    }

    fn mixin(targets: &[&str], interface: &str, init: Option<&str>) -> MixinConfig {
        MixinConfig {
            targets: targets.iter().map(|s| s.to_string()).collect(),
            interfaces: vec![interface.to_string()],
            fields: vec![],
            init_method: init.map(|s| s.to_string()),
        }
    }

    #[test]
    fn identical_configs_share_identity() {
        let a = MixinSpec::compile(&mixin(&["com.X"], "I", Some("init"))).unwrap();
        let b = MixinSpec::compile(&mixin(&["com.X"], "I", Some("init"))).unwrap();
        let c = MixinSpec::compile(&mixin(&["com.Y"], "I", Some("init"))).unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn overlapping_ancestor_rules_apply_once() {
        // Two independently-configured rules carrying the same mixin
        // definition, targeting different ancestors of one concrete type.
        let config_via_base = mixin(&["com.example.Base", "com.example.Session"], "com.weave.HasId", Some("initHasId"));
        let spec_a = Arc::new(MixinSpec::compile(&config_via_base).unwrap());
        let spec_b = Arc::new(MixinSpec::compile(&config_via_base).unwrap());

        let target = unit("com.example.SessionImpl", &["com.example.Session", "com.example.Base"]);
        let plan = plan_mixins(&[spec_a, spec_b], &target);

        assert_eq!(plan.applications.len(), 1, "one application per identity");
        assert_eq!(plan.added_interfaces, vec!["com.weave.HasId".to_string()]);
        assert_eq!(plan.initializers.len(), 1, "exactly one initializer");
    }

    #[test]
    fn distinct_mixins_adding_same_interface_add_it_once() {
        let a = Arc::new(MixinSpec::compile(&mixin(&["com.example.*"], "com.weave.HasId", Some("initA"))).unwrap());
        let b = Arc::new(MixinSpec::compile(&mixin(&["com.example.*"], "com.weave.HasId", Some("initB"))).unwrap());

        let target = unit("com.example.Thing", &[]);
        let plan = plan_mixins(&[a, b], &target);

        assert_eq!(plan.applications.len(), 2, "distinct identities both apply");
        assert_eq!(plan.added_interfaces.len(), 1, "interface addition is idempotent");
        assert_eq!(plan.initializers.len(), 2, "each identity keeps its initializer");
    }

    #[test]
    fn mixin_does_not_apply_to_unrelated_type() {
        let spec = Arc::new(MixinSpec::compile(&mixin(&["com.example.Base"], "I", None)).unwrap());
        let plan = plan_mixins(&[spec], &unit("org.other.Thing", &["java.lang.Object"]));
        assert!(plan.is_empty());
    }

    #[test]
    fn shim_requires_structural_satisfaction() {
        let config = ShimConfig {
            target: "com.example.LegacyTimer".to_string(),
            interface: "com.weave.Stoppable".to_string(),
            methods: vec![crate::config::ShimMethodConfig {
                name: "stop".to_string(),
                parameter_types: vec![],
            }],
        };
        let shim = Arc::new(ShimSpec::compile(&config).unwrap());

        let mut satisfying = unit("com.example.LegacyTimer", &[]);
        satisfying.methods.push(MethodMetadata {
            name: "stop".to_string(),
            annotations: vec![],
            parameter_types: vec![],
            return_type: "void".to_string(),
            modifiers: Modifiers::default(),
        });
        assert_eq!(plan_shims(&[shim.clone()], &satisfying).len(), 1);

        let lacking = unit("com.example.LegacyTimer", &[]);
        assert!(plan_shims(&[shim], &lacking).is_empty());
    }
}
