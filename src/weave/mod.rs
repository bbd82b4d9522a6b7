//! Weaving Engine - matches the live rule snapshot against one loaded unit
//! and produces the weave plan the host's patching capability consumes.
//!
//! Matching is pure over (unit metadata, snapshot); type-level results are
//! computed once per advice per load event and reused across the unit's
//! methods.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::advice::Advice;
use crate::model::{MethodMetadata, UnitMetadata};
use crate::registry::AdviceSnapshot;

pub mod invocation;
pub mod mixin;

pub use invocation::{InvocationContext, WovenMethod};
pub use mixin::{MixinPlan, MixinSpec, ShimSpec};

/// All instrumentation work for one method, advices in entry order.
#[derive(Clone)]
pub struct MethodWeave {
    pub method: MethodMetadata,
    pub advices: Vec<Arc<Advice>>,
}

impl MethodWeave {
    /// The runtime form of this weave.
    pub fn woven(&self, unit_name: &str) -> WovenMethod {
        WovenMethod::new(
            unit_name.to_string(),
            self.method.clone(),
            self.advices.clone(),
        )
    }
}

/// Everything the host must apply to one unit.
pub struct WeavePlan {
    pub unit_name: String,
    pub methods: Vec<MethodWeave>,
    pub mixins: MixinPlan,
    pub shims: Vec<Arc<ShimSpec>>,
}

impl WeavePlan {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.mixins.is_empty() && self.shims.is_empty()
    }
}

/// Match the snapshot against one unit. Returns `None` when nothing
/// applies, so the host loads the unit unmodified.
pub fn weave_unit(snapshot: &AdviceSnapshot, unit: &UnitMetadata) -> Option<WeavePlan> {
    // Type-level match once per advice, reused for every method.
    let type_matched: Vec<&Arc<Advice>> = snapshot
        .advices
        .iter()
        .filter(|a| a.pointcut().matches_unit(unit))
        .collect();

    let mut methods = Vec::new();
    if !type_matched.is_empty() {
        for method in &unit.methods {
            // Bodies the host cannot patch.
            if method.modifiers.is_abstract || method.modifiers.is_native {
                continue;
            }
            let mut advices: Vec<Arc<Advice>> = type_matched
                .iter()
                .filter(|a| a.pointcut().matches_method(method))
                .map(|a| Arc::clone(a))
                .collect();
            if advices.is_empty() {
                continue;
            }
            advices.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
            trace!(
                unit = %unit.name,
                method = %method.signature(),
                advices = advices.len(),
                "Method matched"
            );
            methods.push(MethodWeave {
                method: method.clone(),
                advices,
            });
        }
    }

    let mixins = mixin::plan_mixins(&snapshot.mixins, unit);
    let shims = mixin::plan_shims(&snapshot.shims, unit);

    let plan = WeavePlan {
        unit_name: unit.name.clone(),
        methods,
        mixins,
        shims,
    };
    if plan.is_empty() {
        return None;
    }
    debug!(
        unit = %unit.name,
        methods = plan.methods.len(),
        mixins = plan.mixins.applications.len(),
        shims = plan.shims.len(),
        "Weave plan ready"
    );
    Some(plan)
}
