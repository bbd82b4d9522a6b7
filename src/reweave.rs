//! Reweave Planner - computes the minimal closure of already-loaded types
//! that must be re-instrumented after the rule set changes.
//!
//! A method newly eligible for weaving on a supertype affects all
//! non-overriding descendants, so every direct match expands to its
//! transitive subtype closure among the loaded set. Interfaces are excluded
//! from direct retransformation; only their concrete implementers are
//! retransformed.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument};

use crate::registry::AdviceSnapshot;

/// The planner's view of one already-loaded unit.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub name: String,
    pub annotations: Vec<String>,
    /// Full transitive ancestor chain.
    pub ancestors: Vec<String>,
    pub is_interface: bool,
    /// Whether the host can retransform this unit at all.
    pub modifiable: bool,
    /// Loaded before the engine attached. Constructor-target rules are
    /// excluded for these by policy: mixin interfaces cannot be retrofitted
    /// onto already-initialized instances.
    pub loaded_before_attach: bool,
}

/// An ordered, deduplicated set of unit names to hand to the host's
/// retransformation capability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReweavePlan {
    pub units: BTreeSet<String>,
}

impl ReweavePlan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().cloned().collect()
    }
}

/// Compute the reweave plan for a snapshot against the loaded set.
#[instrument(skip_all, fields(rules = snapshot.advices.len(), loaded = loaded.len()))]
pub fn plan(snapshot: &AdviceSnapshot, loaded: &[LoadedUnit]) -> ReweavePlan {
    // Ancestor -> descendants index, built once per planning pass. The
    // ancestor chains are transitive, so one level of lookup is enough.
    let mut descendants: HashMap<&str, Vec<&LoadedUnit>> = HashMap::new();
    for unit in loaded {
        for ancestor in &unit.ancestors {
            descendants.entry(ancestor.as_str()).or_default().push(unit);
        }
    }

    let mut selected: HashSet<&str> = HashSet::new();
    for advice in &snapshot.advices {
        let pointcut = advice.pointcut();
        let constructor_rule = pointcut.targets_constructor();

        for unit in loaded {
            if constructor_rule && unit.loaded_before_attach {
                continue;
            }
            if !pointcut
                .type_target()
                .matches_parts(&unit.name, &unit.annotations, &unit.ancestors)
            {
                continue;
            }
            selected.insert(unit.name.as_str());
            for descendant in descendants.get(unit.name.as_str()).into_iter().flatten() {
                if constructor_rule && descendant.loaded_before_attach {
                    continue;
                }
                selected.insert(descendant.name.as_str());
            }
        }
    }

    let units: BTreeSet<String> = loaded
        .iter()
        .filter(|u| selected.contains(u.name.as_str()) && u.modifiable && !u.is_interface)
        .map(|u| u.name.clone())
        .collect();

    debug!(selected = units.len(), "Reweave plan computed");
    ReweavePlan { units }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::synthesis::{CaptureSink, FlagRegistry, InMemoryCaptureSink, Synthesizer};
    use crate::config::{CaptureKind, InstrumentationConfig, PointcutConfig};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn snapshot_for(type_name: &str, method_name: &str) -> AdviceSnapshot {
        let synthesizer = Synthesizer::new(
            Arc::new(InMemoryCaptureSink::new()) as Arc<dyn CaptureSink>,
            Arc::new(FlagRegistry::new()),
        );
        let config = InstrumentationConfig {
            pointcut: PointcutConfig {
                type_name: type_name.to_string(),
                method_name: method_name.to_string(),
                method_parameter_types: vec!["..".to_string()],
                ..PointcutConfig::default()
            },
            capture_kind: CaptureKind::Timer,
            timer_name: "t".to_string(),
            span_message_template: String::new(),
            transaction_type: String::new(),
            transaction_name_template: String::new(),
            enabled_property: String::new(),
            slow_threshold_millis: None,
        };
        let (advice, _) = synthesizer.synthesize(&config).unwrap();
        AdviceSnapshot {
            advices: vec![Arc::new(advice)],
            mixins: vec![],
            shims: vec![],
        }
    }

    fn loaded(name: &str, ancestors: &[&str]) -> LoadedUnit {
        LoadedUnit {
            name: name.to_string(),
            annotations: vec![],
            ancestors: ancestors.iter().map(|s| s.to_string()).collect(),
            is_interface: false,
            modifiable: true,
            loaded_before_attach: false,
        }
    }

    #[test]
    fn supertype_match_selects_subtype_closure_and_excludes_unrelated() {
        let snapshot = snapshot_for("com.example.S", "run");
        let units = vec![
            loaded("com.example.S", &[]),
            loaded("com.example.A", &["com.example.S"]),
            loaded("com.example.Z", &[]),
        ];

        let plan = plan(&snapshot, &units);
        assert_eq!(
            plan.names(),
            vec!["com.example.A".to_string(), "com.example.S".to_string()]
        );
    }

    #[test]
    fn interface_supertype_is_excluded_but_implementers_retained() {
        let snapshot = snapshot_for("com.example.S", "run");
        let mut iface = loaded("com.example.S", &[]);
        iface.is_interface = true;
        let units = vec![
            iface,
            loaded("com.example.A", &["com.example.S"]),
            loaded("com.example.Z", &[]),
        ];

        let plan = plan(&snapshot, &units);
        assert_eq!(plan.names(), vec!["com.example.A".to_string()]);
    }

    #[test]
    fn transitive_descendants_are_selected() {
        let snapshot = snapshot_for("com.example.S", "run");
        let units = vec![
            loaded("com.example.S", &[]),
            loaded("com.example.Mid", &["com.example.S"]),
            loaded("com.example.Leaf", &["com.example.Mid", "com.example.S"]),
        ];
        assert_eq!(plan(&snapshot, &units).units.len(), 3);
    }

    #[test]
    fn unmodifiable_units_are_excluded() {
        let snapshot = snapshot_for("com.example.*", "run");
        let mut frozen = loaded("com.example.Frozen", &[]);
        frozen.modifiable = false;
        let plan = plan(&snapshot, &[frozen, loaded("com.example.Ok", &[])]);
        assert_eq!(plan.names(), vec!["com.example.Ok".to_string()]);
    }

    #[test]
    fn constructor_rules_skip_pre_attach_units_by_policy() {
        let snapshot = snapshot_for("com.example.*", "<init>");
        let mut early = loaded("com.example.Early", &[]);
        early.loaded_before_attach = true;
        let late = loaded("com.example.Late", &[]);

        let plan = plan(&snapshot, &[early, late]);
        assert_eq!(plan.names(), vec!["com.example.Late".to_string()]);
    }

    #[test]
    fn non_constructor_rules_still_cover_pre_attach_units() {
        let snapshot = snapshot_for("com.example.*", "run");
        let mut early = loaded("com.example.Early", &[]);
        early.loaded_before_attach = true;

        let plan = plan(&snapshot, &[early]);
        assert_eq!(plan.names(), vec!["com.example.Early".to_string()]);
    }

    #[test]
    fn empty_rule_set_plans_nothing() {
        let snapshot = AdviceSnapshot::default();
        assert!(plan(&snapshot, &[loaded("com.example.X", &[])]).is_empty());
    }
}
