//! Advice Builder - validates an advice definition against the closed
//! binding-legality and positioning rules, producing an immutable [`Advice`].
//!
//! Malformed definitions are rejected with a descriptive error; the registry
//! logs and excludes them without ever failing the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::binding::BindingKind;
use super::templates::TemplateError;
use super::{Advice, CompiledPointcut, Phase, PhaseCallback, PhaseSpec, ReturnKind};
use crate::config::PointcutConfig;
use crate::pattern::PatternError;

static NEXT_ADVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Errors rejected at advice construction time.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{binding} binding is not legal in the {phase} phase")]
    IllegalBinding { phase: &'static str, binding: String },

    #[error("{binding} binding must be the first parameter of the {phase} phase (found at position {position})")]
    MisplacedBinding {
        phase: &'static str,
        binding: String,
        position: usize,
    },

    #[error("{binding} binding declared more than once in the {phase} phase")]
    DuplicateBinding { phase: &'static str, binding: String },

    #[error("the {phase} phase must declare a {expected} return, found {found}")]
    WrongReturnKind {
        phase: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("a constructor-targeting rule cannot bind the receiver in the {phase} phase: the receiver does not exist yet")]
    ReceiverOnConstructor { phase: &'static str },

    #[error("a constructor-targeting rule cannot bind optional-context in the before phase: the receiver does not exist yet")]
    OptionalContextOnConstructorBefore,

    #[error("the {phase} phase binds a traveler of type {expected:?} but the before phase produces {found:?}")]
    TravelerTypeMismatch {
        phase: &'static str,
        expected: String,
        found: String,
    },

    #[error("the {phase} phase binds a traveler but the before phase produces no traveler value")]
    TravelerWithoutBefore { phase: &'static str },
}

/// One phase of an advice definition, prior to validation.
#[derive(Clone)]
pub struct PhaseDefinition {
    pub bindings: Vec<BindingKind>,
    pub returns: ReturnKind,
    pub callback: Arc<dyn PhaseCallback>,
}

impl PhaseDefinition {
    pub fn new(
        bindings: Vec<BindingKind>,
        returns: ReturnKind,
        callback: Arc<dyn PhaseCallback>,
    ) -> Self {
        Self {
            bindings,
            returns,
            callback,
        }
    }
}

/// The unvalidated input to [`AdviceBuilder::build`]. At most one callback
/// per phase, enforced structurally.
#[derive(Clone, Default)]
pub struct AdviceDefinition {
    pub name: String,
    pub pointcut: PointcutConfig,
    pub is_enabled: Option<PhaseDefinition>,
    pub before: Option<PhaseDefinition>,
    pub on_return: Option<PhaseDefinition>,
    pub on_throw: Option<PhaseDefinition>,
    pub after: Option<PhaseDefinition>,
}

impl AdviceDefinition {
    pub fn new(name: impl Into<String>, pointcut: PointcutConfig) -> Self {
        Self {
            name: name.into(),
            pointcut,
            ..Self::default()
        }
    }
}

pub struct AdviceBuilder;

impl AdviceBuilder {
    /// Validate a definition and build the immutable advice.
    pub fn build(definition: AdviceDefinition) -> Result<Advice, ConstructionError> {
        let pointcut = CompiledPointcut::compile(definition.pointcut)?;
        let targets_constructor = pointcut.targets_constructor();

        let traveler_type = match definition.before.as_ref().map(|p| &p.returns) {
            Some(ReturnKind::Typed(ty)) => Some(ty.clone()),
            _ => None,
        };

        let phases = [
            (Phase::IsEnabled, definition.is_enabled.as_ref()),
            (Phase::Before, definition.before.as_ref()),
            (Phase::OnReturn, definition.on_return.as_ref()),
            (Phase::OnThrow, definition.on_throw.as_ref()),
            (Phase::After, definition.after.as_ref()),
        ];
        for (phase, spec) in phases {
            if let Some(spec) = spec {
                validate_return_kind(phase, &spec.returns)?;
                validate_bindings(
                    phase,
                    &spec.bindings,
                    targets_constructor,
                    traveler_type.as_deref(),
                )?;
            }
        }

        let id = NEXT_ADVICE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            advice = %definition.name,
            id,
            priority = pointcut.priority(),
            "Built advice"
        );

        Ok(Advice {
            id,
            name: definition.name,
            pointcut,
            is_enabled: definition.is_enabled.map(into_spec),
            before: definition.before.map(into_spec),
            on_return: definition.on_return.map(into_spec),
            on_throw: definition.on_throw.map(into_spec),
            after: definition.after.map(into_spec),
            traveler_type,
        })
    }
}

fn into_spec(def: PhaseDefinition) -> PhaseSpec {
    PhaseSpec {
        bindings: def.bindings,
        returns: def.returns,
        callback: def.callback,
    }
}

fn validate_return_kind(phase: Phase, returns: &ReturnKind) -> Result<(), ConstructionError> {
    let ok = match phase {
        Phase::IsEnabled => matches!(returns, ReturnKind::Bool),
        Phase::Before => !matches!(returns, ReturnKind::Bool),
        Phase::OnReturn | Phase::OnThrow | Phase::After => matches!(returns, ReturnKind::Void),
    };
    if ok {
        return Ok(());
    }
    let expected = match phase {
        Phase::IsEnabled => "boolean",
        Phase::Before => "void or typed traveler",
        _ => "void",
    };
    Err(ConstructionError::WrongReturnKind {
        phase: phase.name(),
        expected,
        found: format!("{returns:?}"),
    })
}

fn validate_bindings(
    phase: Phase,
    bindings: &[BindingKind],
    targets_constructor: bool,
    traveler_type: Option<&str>,
) -> Result<(), ConstructionError> {
    let mut seen_first_slot = false;
    let mut seen_context = false;
    let mut seen_traveler = false;

    for (position, binding) in bindings.iter().enumerate() {
        if !binding.legal_in(phase) {
            return Err(ConstructionError::IllegalBinding {
                phase: phase.name(),
                binding: binding.to_string(),
            });
        }

        if binding.must_be_first() {
            if position != 0 {
                return Err(ConstructionError::MisplacedBinding {
                    phase: phase.name(),
                    binding: binding.to_string(),
                    position,
                });
            }
            if seen_first_slot {
                return Err(ConstructionError::DuplicateBinding {
                    phase: phase.name(),
                    binding: binding.to_string(),
                });
            }
            seen_first_slot = true;
        }

        if binding.is_context() {
            // First parameter, or second when return/thrown precedes it.
            let limit = if bindings.first().map(|b| b.must_be_first()).unwrap_or(false) {
                1
            } else {
                0
            };
            if position > limit {
                return Err(ConstructionError::MisplacedBinding {
                    phase: phase.name(),
                    binding: binding.to_string(),
                    position,
                });
            }
            if seen_context {
                return Err(ConstructionError::DuplicateBinding {
                    phase: phase.name(),
                    binding: binding.to_string(),
                });
            }
            seen_context = true;
        }

        if let BindingKind::Traveler(expected) = binding {
            if seen_traveler {
                return Err(ConstructionError::DuplicateBinding {
                    phase: phase.name(),
                    binding: binding.to_string(),
                });
            }
            seen_traveler = true;
            match traveler_type {
                None => {
                    return Err(ConstructionError::TravelerWithoutBefore {
                        phase: phase.name(),
                    })
                }
                Some(declared) if declared != expected => {
                    return Err(ConstructionError::TravelerTypeMismatch {
                        phase: phase.name(),
                        expected: expected.clone(),
                        found: declared.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        if targets_constructor {
            match (phase, binding) {
                (Phase::IsEnabled, BindingKind::Receiver)
                | (Phase::Before, BindingKind::Receiver) => {
                    return Err(ConstructionError::ReceiverOnConstructor {
                        phase: phase.name(),
                    })
                }
                (Phase::Before, BindingKind::OptionalContext) => {
                    return Err(ConstructionError::OptionalContextOnConstructorBefore)
                }
                _ => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{BoundValue, PhaseReturn};

    struct Noop;
    impl PhaseCallback for Noop {
        fn invoke(&self, _values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
            Ok(PhaseReturn::Void)
        }
    }

    fn cb() -> Arc<dyn PhaseCallback> {
        Arc::new(Noop)
    }

    fn phase(bindings: Vec<BindingKind>, returns: ReturnKind) -> PhaseDefinition {
        PhaseDefinition::new(bindings, returns, cb())
    }

    fn method_pointcut(method_name: &str) -> PointcutConfig {
        PointcutConfig {
            type_name: "com.example.*".to_string(),
            method_name: method_name.to_string(),
            method_parameter_types: vec!["..".to_string()],
            ..PointcutConfig::default()
        }
    }

    #[test]
    fn minimal_advice_builds() {
        let mut def = AdviceDefinition::new("test", method_pointcut("execute"));
        def.before = Some(phase(vec![BindingKind::MethodName], ReturnKind::Void));
        let advice = AdviceBuilder::build(def).unwrap();
        assert_eq!(advice.name(), "test");
        assert!(advice.traveler_type().is_none());
    }

    #[test]
    fn distinct_advices_get_distinct_ids() {
        let a = AdviceBuilder::build(AdviceDefinition::new("a", method_pointcut("m"))).unwrap();
        let b = AdviceBuilder::build(AdviceDefinition::new("b", method_pointcut("m"))).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn is_enabled_must_return_bool() {
        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.is_enabled = Some(phase(vec![], ReturnKind::Void));
        let err = AdviceBuilder::build(def).unwrap_err();
        assert!(matches!(err, ConstructionError::WrongReturnKind { phase: "is-enabled", .. }));
    }

    #[test]
    fn on_throw_and_after_must_be_void() {
        for set in [Phase::OnThrow, Phase::After] {
            let mut def = AdviceDefinition::new("test", method_pointcut("m"));
            let bad = phase(vec![], ReturnKind::Bool);
            match set {
                Phase::OnThrow => def.on_throw = Some(bad),
                _ => def.after = Some(bad),
            }
            assert!(matches!(
                AdviceBuilder::build(def).unwrap_err(),
                ConstructionError::WrongReturnKind { .. }
            ));
        }
    }

    #[test]
    fn return_binding_outside_on_return_is_illegal() {
        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.before = Some(phase(vec![BindingKind::Return], ReturnKind::Void));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::IllegalBinding { phase: "before", .. }
        ));
    }

    #[test]
    fn return_binding_must_come_first() {
        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.on_return = Some(phase(
            vec![BindingKind::MethodName, BindingKind::Return],
            ReturnKind::Void,
        ));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::MisplacedBinding { position: 1, .. }
        ));
    }

    #[test]
    fn context_may_follow_a_first_slot_binding_only() {
        let mut def = AdviceDefinition::new("ok", method_pointcut("m"));
        def.on_return = Some(phase(
            vec![BindingKind::OptionalReturn, BindingKind::Context],
            ReturnKind::Void,
        ));
        assert!(AdviceBuilder::build(def).is_ok());

        let mut def = AdviceDefinition::new("bad", method_pointcut("m"));
        def.on_return = Some(phase(
            vec![
                BindingKind::OptionalReturn,
                BindingKind::MethodName,
                BindingKind::Context,
            ],
            ReturnKind::Void,
        ));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::MisplacedBinding { position: 2, .. }
        ));
    }

    #[test]
    fn traveler_requires_matching_before_type() {
        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.before = Some(phase(vec![], ReturnKind::Typed("span".to_string())));
        def.on_return = Some(phase(
            vec![BindingKind::Traveler("span".to_string())],
            ReturnKind::Void,
        ));
        assert!(AdviceBuilder::build(def).is_ok());

        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.before = Some(phase(vec![], ReturnKind::Typed("span".to_string())));
        def.after = Some(phase(
            vec![BindingKind::Traveler("timer".to_string())],
            ReturnKind::Void,
        ));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::TravelerTypeMismatch { .. }
        ));
    }

    #[test]
    fn traveler_without_before_is_rejected() {
        let mut def = AdviceDefinition::new("test", method_pointcut("m"));
        def.after = Some(phase(
            vec![BindingKind::Traveler("span".to_string())],
            ReturnKind::Void,
        ));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::TravelerWithoutBefore { phase: "after" }
        ));
    }

    #[test]
    fn constructor_rule_rejects_receiver_in_is_enabled_and_before() {
        let mut def = AdviceDefinition::new("ctor", method_pointcut("<init>"));
        def.is_enabled = Some(phase(vec![BindingKind::Receiver], ReturnKind::Bool));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::ReceiverOnConstructor { phase: "is-enabled" }
        ));

        let mut def = AdviceDefinition::new("ctor", method_pointcut("<init>"));
        def.before = Some(phase(vec![BindingKind::Receiver], ReturnKind::Void));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::ReceiverOnConstructor { phase: "before" }
        ));
    }

    #[test]
    fn constructor_rule_rejects_optional_context_in_before() {
        let mut def = AdviceDefinition::new("ctor", method_pointcut("<init>"));
        def.before = Some(phase(vec![BindingKind::OptionalContext], ReturnKind::Void));
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::OptionalContextOnConstructorBefore
        ));

        // The non-optional context handle stays legal: it simply reports no
        // receiver during constructor before-phases.
        let mut def = AdviceDefinition::new("ctor", method_pointcut("<init>"));
        def.before = Some(phase(vec![BindingKind::Context], ReturnKind::Void));
        assert!(AdviceBuilder::build(def).is_ok());
    }

    #[test]
    fn receiver_on_plain_method_is_fine() {
        let mut def = AdviceDefinition::new("m", method_pointcut("execute"));
        def.is_enabled = Some(phase(vec![BindingKind::Receiver], ReturnKind::Bool));
        def.before = Some(phase(vec![BindingKind::Receiver], ReturnKind::Void));
        assert!(AdviceBuilder::build(def).is_ok());
    }

    #[test]
    fn bad_pattern_surfaces_as_construction_error() {
        let mut pointcut = method_pointcut("m");
        pointcut.method_parameter_types = vec!["..".to_string(), "int".to_string()];
        let def = AdviceDefinition::new("test", pointcut);
        assert!(matches!(
            AdviceBuilder::build(def).unwrap_err(),
            ConstructionError::Pattern(_)
        ));
    }
}
