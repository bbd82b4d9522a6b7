//! The live advice set: an immutable snapshot behind an atomic swap.
//!
//! In-flight weaving reads one snapshot for its whole load event and never
//! observes a partial update. The fixed subset (and all mixins/shims) is
//! compiled once at attach and kept for process lifetime; only the
//! user-editable subset is rebuilt on configuration change, off the hot
//! path, and swapped in whole.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::advice::synthesis::Synthesizer;
use crate::advice::Advice;
use crate::config::InstrumentationConfig;
use crate::loader::Artifact;
use crate::weave::mixin::{MixinSpec, ShimSpec};

/// One immutable generation of the rule set.
#[derive(Default)]
pub struct AdviceSnapshot {
    pub advices: Vec<Arc<Advice>>,
    pub mixins: Vec<Arc<MixinSpec>>,
    pub shims: Vec<Arc<ShimSpec>>,
}

pub struct AdviceRegistry {
    fixed: Vec<Arc<Advice>>,
    mixins: Vec<Arc<MixinSpec>>,
    shims: Vec<Arc<ShimSpec>>,
    snapshot: RwLock<Arc<AdviceSnapshot>>,
}

impl AdviceRegistry {
    pub fn new(
        fixed: Vec<Arc<Advice>>,
        user: Vec<Arc<Advice>>,
        mixins: Vec<Arc<MixinSpec>>,
        shims: Vec<Arc<ShimSpec>>,
    ) -> Self {
        let registry = Self {
            fixed,
            mixins,
            shims,
            snapshot: RwLock::new(Arc::new(AdviceSnapshot::default())),
        };
        registry.swap(user);
        registry
    }

    /// The current snapshot. Callers hold the Arc for the duration of one
    /// load event; the lock is released immediately.
    pub fn snapshot(&self) -> Arc<AdviceSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Rebuild the user subset from new configs and swap the snapshot.
    /// Malformed configs are logged and excluded, never fatal. Returns the
    /// artifacts of the advices that made it in, for the loader.
    pub fn update_user_configs(
        &self,
        configs: &[InstrumentationConfig],
        synthesizer: &Synthesizer,
    ) -> Vec<Artifact> {
        let (user, artifacts) = build_user_advices(configs, synthesizer);
        info!(
            accepted = user.len(),
            submitted = configs.len(),
            "Swapping user advice subset"
        );
        self.swap(user);
        artifacts
    }

    fn swap(&self, user: Vec<Arc<Advice>>) {
        let mut advices: Vec<Arc<Advice>> = self.fixed.iter().cloned().chain(user).collect();
        // A stable global order keeps per-method ordering deterministic.
        advices.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let next = Arc::new(AdviceSnapshot {
            advices,
            mixins: self.mixins.clone(),
            shims: self.shims.clone(),
        });
        *self.snapshot.write() = next;
    }
}

/// Synthesize advices for a config list, excluding (and logging) the
/// malformed ones.
pub fn build_user_advices(
    configs: &[InstrumentationConfig],
    synthesizer: &Synthesizer,
) -> (Vec<Arc<Advice>>, Vec<Artifact>) {
    let mut advices = Vec::with_capacity(configs.len());
    let mut artifacts = Vec::with_capacity(configs.len());
    for config in configs {
        match synthesizer.synthesize(config) {
            Ok((advice, artifact)) => {
                advices.push(Arc::new(advice));
                artifacts.push(artifact);
            }
            Err(error) => {
                warn!(
                    type_name = %config.pointcut.type_name,
                    method_name = %config.pointcut.method_name,
                    %error,
                    "Rejecting malformed instrumentation config"
                );
            }
        }
    }
    (advices, artifacts)
}
