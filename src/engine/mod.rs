//! The weaving engine facade - a black box with a simple public API.
//!
//! The host drives it from its own multi-threaded load path: every unit load
//! goes through [`Engine::on_unit_load`], which matches the live rule
//! snapshot and hands a weave plan to the host's patching capability. Any
//! engine failure degrades to "no transformation"; a bad unit never aborts
//! the load, and never aborts the weaving of other units.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::advice::synthesis::{CaptureSink, FlagRegistry, Synthesizer};
use crate::advice::{Advice, AdviceBuilder, AdviceDefinition, BindingKind, Phase};
use crate::config::RulesConfig;
use crate::loader::{Artifact, ArtifactKind, CodeLoader, Scope, UnitDefiner};
use crate::model::UnitMetadata;
use crate::registry::{build_user_advices, AdviceRegistry};
use crate::reweave::{self, LoadedUnit, ReweavePlan};
use crate::weave::mixin::{MixinSpec, ShimSpec};
use crate::weave::{self, WeavePlan};

/// Result of one host retransformation call. A host without the capability
/// reports `Unsupported`, which is a no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransformOutcome {
    Applied,
    Unsupported,
}

/// The host loader's capabilities: metadata parsing, code patching, code
/// definition and retransformation. All calls are treated as unbounded but
/// non-cancelable.
pub trait HostBridge: Send + Sync {
    fn parse_unit(&self, name: &str, bytes: &[u8]) -> Result<UnitMetadata>;

    fn patch_unit(
        &self,
        unit: &UnitMetadata,
        plan: &WeavePlan,
        original: &[u8],
    ) -> Result<Vec<u8>>;

    fn define_unit(&self, scope: &Scope, name: &str, bytes: &[u8]) -> Result<()>;

    fn retransform(&self, units: &[String]) -> Result<RetransformOutcome>;
}

struct BridgeDefiner(Arc<dyn HostBridge>);

impl UnitDefiner for BridgeDefiner {
    fn define_unit(&self, scope: &Scope, name: &str, bytes: &[u8]) -> Result<()> {
        self.0.define_unit(scope, name, bytes)
    }
}

pub struct Engine {
    host: Arc<dyn HostBridge>,
    registry: AdviceRegistry,
    loader: CodeLoader,
    synthesizer: Synthesizer,
    flags: Arc<FlagRegistry>,
    /// Ledger of loaded units, consumed by reweave planning.
    ledger: RwLock<HashMap<String, LoadedUnit>>,
}

impl Engine {
    /// Build the engine from declarative rules plus optional programmatic
    /// (plugin-supplied) advice definitions. Malformed rules are logged and
    /// excluded; construction itself only fails on loader-level problems.
    pub fn new(
        rules: RulesConfig,
        plugin_advice: Vec<AdviceDefinition>,
        host: Arc<dyn HostBridge>,
        sink: Arc<dyn CaptureSink>,
    ) -> Result<Self> {
        info!(
            fixed = rules.instrumentation.len(),
            user = rules.user_instrumentation.len(),
            mixins = rules.mixins.len(),
            shims = rules.shims.len(),
            plugins = plugin_advice.len(),
            "Initializing weaving engine"
        );

        let flags = Arc::new(FlagRegistry::new());
        let synthesizer = Synthesizer::new(sink, Arc::clone(&flags));
        let loader = CodeLoader::new(Arc::new(BridgeDefiner(Arc::clone(&host))));

        let mut fixed: Vec<Arc<Advice>> = Vec::new();
        for definition in plugin_advice {
            let name = definition.name.clone();
            match AdviceBuilder::build(definition) {
                Ok(advice) => fixed.push(Arc::new(advice)),
                Err(error) => warn!(advice = %name, %error, "Rejecting malformed plugin advice"),
            }
        }

        let (synthesized, artifacts) = build_user_advices(&rules.instrumentation, &synthesizer);
        fixed.extend(synthesized);
        for artifact in artifacts {
            install_global(&loader, artifact);
        }

        let (user, user_artifacts) = build_user_advices(&rules.user_instrumentation, &synthesizer);
        for artifact in user_artifacts {
            install_global(&loader, artifact);
        }

        let mut mixins = Vec::new();
        for config in &rules.mixins {
            match MixinSpec::compile(config) {
                Ok(spec) => mixins.push(Arc::new(spec)),
                Err(error) => warn!(%error, "Rejecting malformed mixin config"),
            }
        }
        let mut shims = Vec::new();
        for config in &rules.shims {
            match ShimSpec::compile(config) {
                Ok(spec) => shims.push(Arc::new(spec)),
                Err(error) => warn!(%error, "Rejecting malformed shim config"),
            }
        }

        let registry = AdviceRegistry::new(fixed, user, mixins, shims);

        Ok(Self {
            host,
            registry,
            loader,
            synthesizer,
            flags,
            ledger: RwLock::new(HashMap::new()),
        })
    }

    /// The host's load callback. Returns the transformed bytes, or `None`
    /// when nothing applies or anything goes wrong.
    pub fn on_unit_load(
        &self,
        name: &str,
        bytes: &[u8],
        existing: Option<&UnitMetadata>,
        scope: &Scope,
    ) -> Option<Vec<u8>> {
        match self.try_weave(name, bytes, existing, scope) {
            Ok(result) => result,
            Err(error) => {
                warn!(unit = name, error = format!("{error:#}"), "Weave failed, loading unit unmodified");
                None
            }
        }
    }

    fn try_weave(
        &self,
        name: &str,
        bytes: &[u8],
        existing: Option<&UnitMetadata>,
        scope: &Scope,
    ) -> Result<Option<Vec<u8>>> {
        let unit = match existing {
            Some(unit) => unit.clone(),
            None => self
                .host
                .parse_unit(name, bytes)
                .with_context(|| format!("parsing unit {name}"))?,
        };

        self.record_loaded_unit(&unit, false);

        let snapshot = self.registry.snapshot();
        let plan = match weave::weave_unit(&snapshot, &unit) {
            Some(plan) => plan,
            None => return Ok(None),
        };

        self.install_plan_artifacts(&plan, &unit, scope)
            .with_context(|| format!("installing artifacts for {name}"))?;

        let patched = self
            .host
            .patch_unit(&unit, &plan, bytes)
            .with_context(|| format!("patching unit {name}"))?;
        debug!(unit = name, "Unit woven");
        Ok(Some(patched))
    }

    /// Make every artifact the plan depends on visible from the unit's
    /// loading scope: global definitions as-is, local scopes through the
    /// content-addressed relocation pass. Per-method metadata holders are
    /// generated here, on first need.
    fn install_plan_artifacts(
        &self,
        plan: &WeavePlan,
        unit: &UnitMetadata,
        scope: &Scope,
    ) -> Result<()> {
        for method_weave in &plan.methods {
            for advice in &method_weave.advices {
                if let Some(artifact) = self.loader.artifact(advice.name()) {
                    match scope {
                        Scope::Global => {
                            self.loader.define_if_absent(&artifact, scope)?;
                        }
                        Scope::Local(_) => {
                            self.loader.relocate(advice.name(), scope)?;
                        }
                    }
                }
                if binds(advice, |b| matches!(b, BindingKind::MethodMeta)) {
                    let holder = method_meta_holder(unit, method_weave);
                    self.loader.register(holder.clone());
                    self.loader.define_if_absent(&holder, scope)?;
                }
                if binds(advice, |b| matches!(b, BindingKind::TypeMeta)) {
                    let holder = type_meta_holder(unit);
                    self.loader.register(holder.clone());
                    self.loader.define_if_absent(&holder, scope)?;
                }
            }
        }
        Ok(())
    }

    /// Swap in a new user-editable rule subset, plan the reweave of affected
    /// loaded units and drive the host's retransformation capability once.
    pub fn update_advice(
        &self,
        configs: &[crate::config::InstrumentationConfig],
    ) -> Result<ReweavePlan> {
        let previous = self.registry.snapshot();
        let artifacts = self.registry.update_user_configs(configs, &self.synthesizer);
        for artifact in artifacts {
            install_global(&self.loader, artifact);
        }

        let ledger = self.ledger.read();
        let loaded: Vec<LoadedUnit> = ledger.values().cloned().collect();
        drop(ledger);

        // Units matched by the outgoing snapshot must be retransformed too,
        // so removed rules actually stop applying.
        let mut plan = reweave::plan(&self.registry.snapshot(), &loaded);
        plan.units.extend(reweave::plan(&previous, &loaded).units);
        if plan.is_empty() {
            return Ok(plan);
        }

        match self.host.retransform(&plan.names()) {
            Ok(RetransformOutcome::Applied) => {
                info!(units = plan.units.len(), "Retransformation applied");
            }
            Ok(RetransformOutcome::Unsupported) => {
                info!("Host does not support retransformation, skipping");
            }
            Err(error) => {
                // The new snapshot is live either way; already-loaded units
                // keep their old weave until the host can retransform.
                warn!(%error, "Retransformation failed");
            }
        }
        Ok(plan)
    }

    /// Seed the ledger with units that were already loaded when the engine
    /// attached. Constructor-target rules are excluded for these by policy.
    pub fn record_preloaded(&self, units: Vec<UnitMetadata>) {
        for unit in &units {
            self.record_loaded_unit(unit, true);
        }
    }

    fn record_loaded_unit(&self, unit: &UnitMetadata, before_attach: bool) {
        let mut ledger = self.ledger.write();
        ledger
            .entry(unit.name.clone())
            .or_insert_with(|| LoadedUnit {
                name: unit.name.clone(),
                annotations: unit.annotations.clone(),
                ancestors: unit.ancestors.clone(),
                is_interface: unit.is_interface,
                modifiable: !unit.is_interface,
                loaded_before_attach: before_attach,
            });
    }

    /// The flag registry consulted by generated is-enabled hooks.
    pub fn flags(&self) -> &Arc<FlagRegistry> {
        &self.flags
    }

    pub fn snapshot(&self) -> Arc<crate::registry::AdviceSnapshot> {
        self.registry.snapshot()
    }

    pub fn loader(&self) -> &CodeLoader {
        &self.loader
    }
}

fn install_global(loader: &CodeLoader, artifact: Artifact) {
    loader.register(artifact.clone());
    if let Err(error) = loader.define_if_absent(&artifact, &Scope::Global) {
        warn!(artifact = %artifact.name, %error, "Failed to define artifact globally");
    }
}

fn binds(advice: &Advice, pred: impl Fn(&BindingKind) -> bool) -> bool {
    [
        Phase::IsEnabled,
        Phase::Before,
        Phase::OnReturn,
        Phase::OnThrow,
        Phase::After,
    ]
    .into_iter()
    .filter_map(|p| advice.phase(p))
    .flat_map(|spec| spec.bindings.iter())
    .any(pred)
}

/// A per-method metadata holder artifact, content-named so regeneration is
/// idempotent.
fn method_meta_holder(unit: &UnitMetadata, weave: &crate::weave::MethodWeave) -> Artifact {
    let meta = weave.method.meta_value(&unit.name);
    let bytes = serde_json::to_vec(&meta).expect("method meta serializes");
    let name = format!(
        "meta/{}/{}",
        unit.name,
        crate::loader::artifact::short_hash(&bytes)
    );
    Artifact::new(name, ArtifactKind::MethodMetaHolder, bytes, vec![])
}

fn type_meta_holder(unit: &UnitMetadata) -> Artifact {
    let bytes = serde_json::to_vec(&unit.meta_value()).expect("type meta serializes");
    let name = format!(
        "meta/{}/{}",
        unit.name,
        crate::loader::artifact::short_hash(&bytes)
    );
    Artifact::new(name, ArtifactKind::MethodMetaHolder, bytes, vec![])
}
