//! Advice Synthesizer - config-to-code generation with no user callback
//! logic.
//!
//! From a small set of flags (capture kind, optional templates, enable-flag
//! reference, slow threshold) this deterministically assembles an advice
//! whose hooks perform exactly the operations the flags imply: start a
//! capture in before, thread it through the traveler, end it on return or
//! exception, release it unconditionally in after. Identical configurations
//! yield byte-identical artifacts so regeneration after a rule-set reload is
//! idempotent and loader-deduplicatable.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::builder::{AdviceBuilder, AdviceDefinition, ConstructionError, PhaseDefinition};
use super::templates::{MessageTemplate, TemplateContext};
use super::{Advice, BindingKind, BoundValue, PhaseCallback, PhaseReturn, ReturnKind, Traveler};
use crate::config::{CaptureKind, InstrumentationConfig};
use crate::loader::artifact::{Artifact, ArtifactKind};

/// Traveler type name declared by every synthesized advice.
pub const CAPTURE_TRAVELER_TYPE: &str = "capture";

/// How a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Returned,
    Thrown(String),
    /// Released by the after phase without reaching return or throw, e.g.
    /// when another advice's before phase failed.
    Aborted,
}

/// The record a completed capture emits to the sink.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub kind: CaptureKind,
    pub timer_name: String,
    pub message: Option<String>,
    pub transaction_type: Option<String>,
    pub transaction_name: Option<String>,
    pub elapsed: Duration,
    pub outcome: CaptureOutcome,
    pub exceeded_slow_threshold: bool,
}

/// Destination for completed captures.
pub trait CaptureSink: Send + Sync {
    fn record(&self, record: CaptureRecord);
}

/// Simple sink collecting records in memory. Used by embedders that poll and
/// by the integration tests.
#[derive(Default)]
pub struct InMemoryCaptureSink {
    records: Mutex<Vec<CaptureRecord>>,
}

impl InMemoryCaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<CaptureRecord> {
        std::mem::take(&mut self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl CaptureSink for InMemoryCaptureSink {
    fn record(&self, record: CaptureRecord) {
        self.records.lock().push(record);
    }
}

/// Named boolean flags consulted by generated is-enabled hooks. Unknown
/// flags default to enabled.
#[derive(Default)]
pub struct FlagRegistry {
    flags: DashMap<String, bool>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, enabled: bool) {
        self.flags.insert(name.into(), enabled);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).map(|v| *v).unwrap_or(true)
    }
}

/// A live capture started by a synthesized before hook and threaded as the
/// traveler. Completes exactly once.
pub struct CaptureHandle {
    shape: Arc<CaptureShape>,
    sink: Arc<dyn CaptureSink>,
    started: Instant,
    class_name: String,
    method_name: String,
    receiver: Option<Value>,
    arguments: Vec<Value>,
    completed: AtomicBool,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("timer_name", &self.shape.timer_name)
            .field("method_name", &self.method_name)
            .finish_non_exhaustive()
    }
}

impl CaptureHandle {
    /// End the capture with the given outcome. Later calls are no-ops; the
    /// first completion wins.
    pub fn complete(&self, outcome: CaptureOutcome, return_value: Option<&Value>) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let elapsed = self.started.elapsed();
        let ctx = TemplateContext {
            method_name: &self.method_name,
            class_name: &self.class_name,
            receiver: self.receiver.as_ref(),
            arguments: &self.arguments,
            return_value,
        };
        // Templates are rendered here, at completion, never earlier: a hook
        // that is skipped pays nothing.
        let message = self.shape.message_template.as_ref().map(|t| t.render(&ctx));
        let transaction_name = self
            .shape
            .transaction_name_template
            .as_ref()
            .map(|t| t.render(&ctx));

        let exceeded = self
            .shape
            .slow_threshold
            .map(|limit| elapsed >= limit)
            .unwrap_or(false);

        self.sink.record(CaptureRecord {
            kind: self.shape.kind,
            timer_name: self.shape.timer_name.clone(),
            message,
            transaction_type: self.shape.transaction_type.clone(),
            transaction_name,
            elapsed,
            outcome,
            exceeded_slow_threshold: exceeded,
        });
    }

    /// Unconditional cleanup from the after phase: completes as aborted if
    /// neither return nor throw got there first.
    pub fn release(&self) {
        self.complete(CaptureOutcome::Aborted, None);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Immutable per-config shape shared by every capture the advice starts.
struct CaptureShape {
    kind: CaptureKind,
    timer_name: String,
    message_template: Option<MessageTemplate>,
    transaction_type: Option<String>,
    transaction_name_template: Option<MessageTemplate>,
    slow_threshold: Option<Duration>,
}

/// Builds advices and artifacts from pure configuration.
pub struct Synthesizer {
    sink: Arc<dyn CaptureSink>,
    flags: Arc<FlagRegistry>,
}

impl Synthesizer {
    pub fn new(sink: Arc<dyn CaptureSink>, flags: Arc<FlagRegistry>) -> Self {
        Self { sink, flags }
    }

    /// Generate the advice and its loadable artifact for one configuration.
    pub fn synthesize(
        &self,
        config: &InstrumentationConfig,
    ) -> Result<(Advice, Artifact), ConstructionError> {
        let artifact = artifact_for(config);
        debug!(artifact = %artifact.name, "Synthesizing advice");

        let shape = Arc::new(CaptureShape {
            kind: config.capture_kind,
            timer_name: config.timer_name.clone(),
            message_template: parse_optional(&config.span_message_template)?,
            transaction_type: non_empty(&config.transaction_type),
            transaction_name_template: parse_optional(&config.transaction_name_template)?,
            slow_threshold: config.slow_threshold_millis.map(Duration::from_millis),
        });

        let mut definition = AdviceDefinition::new(artifact.name.clone(), config.pointcut.clone());

        if !config.enabled_property.is_empty() {
            definition.is_enabled = Some(PhaseDefinition::new(
                vec![],
                ReturnKind::Bool,
                Arc::new(EnabledHook {
                    flags: Arc::clone(&self.flags),
                    property: config.enabled_property.clone(),
                }),
            ));
        }

        definition.before = Some(PhaseDefinition::new(
            vec![BindingKind::Context, BindingKind::AllArguments],
            ReturnKind::Typed(CAPTURE_TRAVELER_TYPE.to_string()),
            Arc::new(StartHook {
                shape: Arc::clone(&shape),
                sink: Arc::clone(&self.sink),
            }),
        ));

        definition.on_return = Some(PhaseDefinition::new(
            vec![
                BindingKind::OptionalReturn,
                BindingKind::Traveler(CAPTURE_TRAVELER_TYPE.to_string()),
            ],
            ReturnKind::Void,
            Arc::new(EndOnReturnHook),
        ));

        definition.on_throw = Some(PhaseDefinition::new(
            vec![
                BindingKind::Thrown,
                BindingKind::Traveler(CAPTURE_TRAVELER_TYPE.to_string()),
            ],
            ReturnKind::Void,
            Arc::new(EndOnThrowHook),
        ));

        definition.after = Some(PhaseDefinition::new(
            vec![BindingKind::Traveler(CAPTURE_TRAVELER_TYPE.to_string())],
            ReturnKind::Void,
            Arc::new(ReleaseHook),
        ));

        let advice = AdviceBuilder::build(definition)?;
        Ok((advice, artifact))
    }
}

/// Canonical, deterministic artifact for a configuration: the bytes are the
/// config's canonical JSON, the name embeds the content hash.
pub fn artifact_for(config: &InstrumentationConfig) -> Artifact {
    let bytes = serde_json::to_vec(config).expect("instrumentation config serializes");
    let kind = match config.capture_kind {
        CaptureKind::Timer => "timer",
        CaptureKind::LocalSpan => "local-span",
        CaptureKind::Transaction => "transaction",
    };
    let name = format!(
        "synthetic/{}/{}",
        kind,
        crate::loader::artifact::short_hash(&bytes)
    );
    Artifact::new(name, ArtifactKind::AdviceImpl, bytes, vec![])
}

fn parse_optional(template: &str) -> Result<Option<MessageTemplate>, ConstructionError> {
    if template.is_empty() {
        Ok(None)
    } else {
        Ok(Some(MessageTemplate::parse(template)?))
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

struct EnabledHook {
    flags: Arc<FlagRegistry>,
    property: String,
}

impl PhaseCallback for EnabledHook {
    fn invoke(&self, _values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
        Ok(PhaseReturn::Bool(self.flags.is_enabled(&self.property)))
    }
}

struct StartHook {
    shape: Arc<CaptureShape>,
    sink: Arc<dyn CaptureSink>,
}

impl PhaseCallback for StartHook {
    fn invoke(&self, values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
        let context = match values.first() {
            Some(BoundValue::Context(ctx)) => ctx,
            other => anyhow::bail!("synthesized before hook expected context, got {other:?}"),
        };
        let arguments = match values.get(1) {
            Some(BoundValue::AllArguments(args)) => args.clone(),
            other => anyhow::bail!("synthesized before hook expected arguments, got {other:?}"),
        };

        let handle = CaptureHandle {
            shape: Arc::clone(&self.shape),
            sink: Arc::clone(&self.sink),
            started: Instant::now(),
            class_name: context.unit_name().to_string(),
            method_name: context.method_name().to_string(),
            receiver: context.receiver().cloned(),
            arguments,
            completed: AtomicBool::new(false),
        };
        Ok(PhaseReturn::Traveler(Traveler::Capture(Arc::new(handle))))
    }
}

fn capture_from(values: &[BoundValue], slot: usize) -> anyhow::Result<Arc<CaptureHandle>> {
    match values.get(slot) {
        Some(BoundValue::Traveler(Traveler::Capture(handle))) => Ok(Arc::clone(handle)),
        other => anyhow::bail!("synthesized hook expected capture traveler, got {other:?}"),
    }
}

struct EndOnReturnHook;

impl PhaseCallback for EndOnReturnHook {
    fn invoke(&self, values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
        let return_value = match values.first() {
            Some(BoundValue::OptionalReturn(v)) => v.clone(),
            other => anyhow::bail!("synthesized on-return hook expected return, got {other:?}"),
        };
        let handle = capture_from(values, 1)?;
        handle.complete(CaptureOutcome::Returned, return_value.as_ref());
        Ok(PhaseReturn::Void)
    }
}

struct EndOnThrowHook;

impl PhaseCallback for EndOnThrowHook {
    fn invoke(&self, values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
        let thrown = match values.first() {
            Some(BoundValue::Thrown(message)) => message.clone(),
            other => anyhow::bail!("synthesized on-throw hook expected thrown, got {other:?}"),
        };
        let handle = capture_from(values, 1)?;
        handle.complete(CaptureOutcome::Thrown(thrown), None);
        Ok(PhaseReturn::Void)
    }
}

struct ReleaseHook;

impl PhaseCallback for ReleaseHook {
    fn invoke(&self, values: &[BoundValue]) -> anyhow::Result<PhaseReturn> {
        let handle = capture_from(values, 0)?;
        handle.release();
        Ok(PhaseReturn::Void)
    }
}
