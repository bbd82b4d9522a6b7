//! Declarative configuration records - plain value types, no executable code.
//!
//! Rules arrive from storage as these records and are hot-swappable; the
//! engine compiles them into matchers and advices. YAML loading mirrors the
//! on-disk layout: a single rules file with `instrumentation`, `mixins` and
//! `shims` sections.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Modifier constraint on a target method. `Not*` variants are "must not"
/// constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodModifier {
    Public,
    NotPublic,
    Static,
    NotStatic,
    Abstract,
    NotAbstract,
    Native,
    NotNative,
}

/// One pointcut: the declarative pattern rule selecting target methods.
/// Immutable for its lifetime; many rules may target the same method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointcutConfig {
    /// Type-name pattern (literal, glob or alternation; empty matches all).
    pub type_name: String,

    /// Type-annotation pattern.
    pub type_annotation: String,

    /// The method must be inherited from / compatible with an ancestor
    /// matching this pattern.
    pub sub_type_restriction: String,

    /// The method's declaring type must itself satisfy this ancestor
    /// constraint.
    pub super_type_restriction: String,

    /// Method-name pattern. `<init>` targets constructors.
    pub method_name: String,

    /// Method-annotation pattern.
    pub method_annotation: String,

    /// Ordered parameter-type patterns; may end with the `..` wildcard.
    pub method_parameter_types: Vec<String>,

    /// Return-type pattern.
    pub method_return_type: String,

    /// Modifier constraints, all of which must hold.
    pub method_modifiers: Vec<MethodModifier>,

    /// While an advice in this group is active on the current thread,
    /// further advices in the same group are suppressed for nested calls.
    pub nesting_group: String,

    /// Higher priority enters first (outermost) and exits last.
    pub priority: i32,
}

/// What a synthesized advice captures around the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureKind {
    /// Timing only, aggregated under `timer_name`.
    Timer,
    /// A local span with a lazily-rendered message.
    LocalSpan,
    /// A top-level transaction with its own type and name.
    Transaction,
}

/// One declarative instrumentation rule: pointcut plus capture flags. This is
/// the entire input to the Advice Synthesizer - no user callback code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    #[serde(flatten)]
    pub pointcut: PointcutConfig,

    pub capture_kind: CaptureKind,

    #[serde(default)]
    pub timer_name: String,

    /// Message template for local spans, e.g. `"http get {{arg0}}"`.
    #[serde(default)]
    pub span_message_template: String,

    #[serde(default)]
    pub transaction_type: String,

    #[serde(default)]
    pub transaction_name_template: String,

    /// Name of a boolean property consulted by the generated is-enabled
    /// hook; empty means always enabled.
    #[serde(default)]
    pub enabled_property: String,

    /// Captures slower than this are flagged in the emitted record.
    #[serde(default)]
    pub slow_threshold_millis: Option<u64>,
}

/// A field a mixin physically adds to matching types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixinFieldConfig {
    pub name: String,
    pub field_type: String,
}

/// Interfaces, state and an initializer physically added to matching types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixinConfig {
    /// Type-name patterns; matching the type itself or any ancestor applies
    /// the mixin.
    pub targets: Vec<String>,

    pub interfaces: Vec<String>,

    pub fields: Vec<MixinFieldConfig>,

    /// Initializer method scheduled to run exactly once per instance.
    pub init_method: Option<String>,
}

/// A method signature a shim requires on its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShimMethodConfig {
    pub name: String,
    #[serde(default)]
    pub parameter_types: Vec<String>,
}

/// A synthetic interface view adapted onto types that already structurally
/// satisfy it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShimConfig {
    pub target: String,
    pub interface: String,
    #[serde(default)]
    pub methods: Vec<ShimMethodConfig>,
}

/// The full rules file: the fixed subset is compiled once at attach and
/// immutable for process lifetime; the user subset is hot-swappable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub instrumentation: Vec<InstrumentationConfig>,

    pub user_instrumentation: Vec<InstrumentationConfig>,

    pub mixins: Vec<MixinConfig>,

    pub shims: Vec<ShimConfig>,
}

impl RulesConfig {
    /// Load rules from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading rules from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;

        let config: RulesConfig =
            serde_yaml_ng::from_str(&content).context("Failed to parse rules YAML")?;

        debug!(
            "Loaded {} fixed + {} user instrumentation rules, {} mixins, {} shims",
            config.instrumentation.len(),
            config.user_instrumentation.len(),
            config.mixins.len(),
            config.shims.len()
        );

        Ok(config)
    }
}
