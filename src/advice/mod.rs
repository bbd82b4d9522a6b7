//! Advice Model - the typed, validated description of one instrumentation
//! rule: which hook phases it defines, what each hook binds, and the
//! cross-phase traveler.
//!
//! An [`Advice`] is immutable once built. Advice sets are recomputed and
//! atomically swapped by the registry whenever the user-editable subset of
//! rules changes.

use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::PointcutConfig;
use crate::pattern::{MethodTarget, PatternError, TypeTarget};
use crate::model::{MethodMetadata, UnitMetadata};

pub mod binding;
pub mod builder;
pub mod synthesis;
pub mod templates;

pub use binding::BindingKind;
pub use builder::{AdviceBuilder, AdviceDefinition, ConstructionError, PhaseDefinition};
pub use synthesis::CaptureHandle;

/// The five method-level hook phases, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    IsEnabled,
    Before,
    OnReturn,
    OnThrow,
    After,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::IsEnabled => "is-enabled",
            Phase::Before => "before",
            Phase::OnReturn => "on-return",
            Phase::OnThrow => "on-throw",
            Phase::After => "after",
        }
    }
}

/// Declared return kind of a phase callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Bool,
    /// A typed traveler value; only legal on the before phase.
    Typed(String),
}

/// The traveler: produced by before, threaded unchanged to whichever of
/// return/throw is reached, then to after.
#[derive(Debug, Clone)]
pub enum Traveler {
    Void,
    Data(Value),
    Capture(Arc<CaptureHandle>),
}

/// Immutable invocation context handle bound via `Context`/`OptionalContext`.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    unit_name: String,
    method_name: String,
    receiver: Option<Value>,
    depth: usize,
}

impl ContextHandle {
    pub fn new(
        unit_name: String,
        method_name: String,
        receiver: Option<Value>,
        depth: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                unit_name,
                method_name,
                receiver,
                depth,
            }),
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.inner.unit_name
    }

    pub fn method_name(&self) -> &str {
        &self.inner.method_name
    }

    /// Absent for static methods and inside constructor before-phases.
    pub fn receiver(&self) -> Option<&Value> {
        self.inner.receiver.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }
}

/// A value resolved for one declared binding, in declaration order.
#[derive(Debug, Clone)]
pub enum BoundValue {
    Receiver(Value),
    Argument(Value),
    AllArguments(Vec<Value>),
    MethodName(String),
    Return(Value),
    OptionalReturn(Option<Value>),
    Thrown(String),
    Traveler(Traveler),
    TypeMeta(Value),
    MethodMeta(Value),
    Context(ContextHandle),
}

/// What a phase callback produced.
#[derive(Debug, Clone)]
pub enum PhaseReturn {
    Void,
    Bool(bool),
    Traveler(Traveler),
}

/// One phase callback. Implementations are either synthesized from
/// configuration or supplied programmatically by a plugin.
pub trait PhaseCallback: Send + Sync {
    fn invoke(&self, values: &[BoundValue]) -> anyhow::Result<PhaseReturn>;
}

/// A validated phase: its declared bindings, declared return kind and the
/// callback itself.
#[derive(Clone)]
pub struct PhaseSpec {
    pub bindings: Vec<BindingKind>,
    pub returns: ReturnKind,
    pub callback: Arc<dyn PhaseCallback>,
}

impl std::fmt::Debug for PhaseSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSpec")
            .field("bindings", &self.bindings)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// A pointcut compiled to matchable targets, keeping its source config for
/// round-tripping.
#[derive(Debug, Clone)]
pub struct CompiledPointcut {
    config: PointcutConfig,
    type_target: TypeTarget,
    method_target: MethodTarget,
}

impl CompiledPointcut {
    pub fn compile(config: PointcutConfig) -> Result<Self, PatternError> {
        let type_target = TypeTarget::compile(&config)?;
        let method_target = MethodTarget::compile(&config)?;
        Ok(Self {
            config,
            type_target,
            method_target,
        })
    }

    pub fn matches_unit(&self, unit: &UnitMetadata) -> bool {
        self.type_target.matches_unit(unit)
    }

    pub fn matches_method(&self, method: &MethodMetadata) -> bool {
        self.method_target.matches_method(method)
    }

    pub fn targets_constructor(&self) -> bool {
        self.method_target.can_match_constructor()
    }

    pub fn config(&self) -> &PointcutConfig {
        &self.config
    }

    pub fn type_target(&self) -> &TypeTarget {
        &self.type_target
    }

    pub fn nesting_group(&self) -> &str {
        &self.config.nesting_group
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }
}

/// A compiled rule plus at most one callback per phase. Immutable.
#[derive(Debug)]
pub struct Advice {
    id: u64,
    name: String,
    pointcut: CompiledPointcut,
    is_enabled: Option<PhaseSpec>,
    before: Option<PhaseSpec>,
    on_return: Option<PhaseSpec>,
    on_throw: Option<PhaseSpec>,
    after: Option<PhaseSpec>,
    traveler_type: Option<String>,
}

impl Advice {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The declaring name: the plugin's advice name or the synthetic
    /// artifact name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pointcut(&self) -> &CompiledPointcut {
        &self.pointcut
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSpec> {
        match phase {
            Phase::IsEnabled => self.is_enabled.as_ref(),
            Phase::Before => self.before.as_ref(),
            Phase::OnReturn => self.on_return.as_ref(),
            Phase::OnThrow => self.on_throw.as_ref(),
            Phase::After => self.after.as_ref(),
        }
    }

    /// The traveler type declared by the before phase, if any.
    pub fn traveler_type(&self) -> Option<&str> {
        self.traveler_type.as_deref()
    }

    /// The deterministic ordering key. Higher priority enters first; ties
    /// break on declaring name, then on the advice's unique id, so the
    /// comparison is strict for any two distinct advices.
    pub fn order_key(&self) -> OrderKey<'_> {
        OrderKey {
            priority: self.pointcut.priority(),
            name: &self.name,
            id: self.id,
        }
    }
}

/// Strict total ordering key for weaving determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey<'a> {
    priority: i32,
    name: &'a str,
    id: u64,
}

impl Ord for OrderKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.name.cmp(other.name))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for OrderKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
