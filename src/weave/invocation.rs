//! The woven-method state machine: sequences multiple advices' hook
//! invocations around one execution of the original body.
//!
//! Ordering semantics, per invocation:
//! 1. is-enabled runs for each advice in entry order; a disabled advice is
//!    skipped entirely for this invocation.
//! 2. before runs in entry order; each advice's traveler is retained.
//! 3. The original body runs.
//! 4. on-return (or on-throw, if the body threw) runs in reverse entry
//!    order for every advice that entered.
//! 5. after runs in reverse entry order, once per entered advice, no matter
//!    how the invocation ended.
//!
//! A failure inside one advice's before phase gives every already-entered
//! advice its on-throw and after treatment, and gives the failing advice its
//! own on-throw; advices whose before had not yet run are never entered.
//! Advice-runtime failures are not caught here: after cleanup they propagate
//! to the original caller.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::advice::{
    Advice, BindingKind, BoundValue, ContextHandle, Phase, PhaseReturn, PhaseSpec, Traveler,
};
use crate::model::MethodMetadata;

thread_local! {
    /// Unit names whose constructor weave is active on this thread; a
    /// delegating same-type constructor call runs its body unadvised.
    static ACTIVE_CONSTRUCTORS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };

    /// Active nesting-group counts; a group already active suppresses
    /// further advices in the same group for nested invocations.
    static ACTIVE_GROUPS: RefCell<HashMap<String, usize>> = RefCell::new(HashMap::new());

    /// Woven-invocation nesting depth, exposed through the context handle.
    static DEPTH: RefCell<usize> = const { RefCell::new(0) };
}

/// The live values of one invocation of a woven method.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub receiver: Option<Value>,
    pub arguments: Vec<Value>,
    pub type_meta: Value,
    pub method_meta: Value,
}

/// One woven method: the matched advices in entry order plus the metadata
/// needed to resolve bindings.
pub struct WovenMethod {
    unit_name: String,
    method: MethodMetadata,
    advices: Vec<Arc<Advice>>,
}

impl WovenMethod {
    /// `advices` must already be in entry order (the weaver sorts them).
    pub fn new(unit_name: String, method: MethodMetadata, advices: Vec<Arc<Advice>>) -> Self {
        Self {
            unit_name,
            method,
            advices,
        }
    }

    pub fn advices(&self) -> &[Arc<Advice>] {
        &self.advices
    }

    /// Run the woven method. For constructor weaves the body closure stands
    /// for everything after the superclass constructor call, so before
    /// phases observe a type whose superclass construction is complete but
    /// whose receiver is not yet available.
    pub fn invoke<F>(&self, ctx: &InvocationContext, body: F) -> anyhow::Result<Value>
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        let is_constructor = self.method.is_constructor();

        // Delegating same-type constructor calls must not re-fire advices.
        if is_constructor && constructor_active(&self.unit_name) {
            trace!(unit = %self.unit_name, "Delegating constructor call, advices suppressed");
            return body();
        }

        let _ctor_frame = is_constructor.then(|| ConstructorFrame::push(&self.unit_name));
        let _depth_frame = DepthFrame::push();

        // Phase 1: selection. Nesting-group suppression first, then
        // is-enabled; a disabled advice never runs any phase this call.
        let mut enabled: Vec<&Arc<Advice>> = Vec::with_capacity(self.advices.len());
        for advice in &self.advices {
            let group = advice.pointcut().nesting_group();
            if !group.is_empty() && group_active(group) {
                trace!(advice = %advice.name(), group, "Nesting group active, suppressed");
                continue;
            }
            if let Some(spec) = advice.phase(Phase::IsEnabled) {
                let values = self.resolve(spec, ctx, Phase::IsEnabled, None, None, None);
                match spec.callback.invoke(&values)? {
                    PhaseReturn::Bool(true) => {}
                    PhaseReturn::Bool(false) => {
                        trace!(advice = %advice.name(), "Disabled for this invocation");
                        continue;
                    }
                    other => anyhow::bail!(
                        "is-enabled of advice {} returned {:?}, expected a boolean",
                        advice.name(),
                        other
                    ),
                }
            }
            enabled.push(advice);
        }

        let _group_frame = GroupFrame::activate(&enabled);

        // Phase 2: before, in entry order.
        let mut entered: Vec<(&Arc<Advice>, Traveler)> = Vec::with_capacity(enabled.len());
        for advice in &enabled {
            let traveler = match advice.phase(Phase::Before) {
                Some(spec) => {
                    let values = self.resolve(spec, ctx, Phase::Before, None, None, None);
                    match spec.callback.invoke(&values) {
                        Ok(PhaseReturn::Traveler(traveler)) => traveler,
                        Ok(_) => Traveler::Void,
                        Err(error) => {
                            // The failing advice gets its own on-throw; the
                            // already-entered advices get full cleanup.
                            let mut error = error;
                            self.run_on_throw(advice, &Traveler::Void, ctx, &mut error);
                            self.unwind(&entered, ctx, &mut error);
                            return Err(error);
                        }
                    }
                }
                None => Traveler::Void,
            };
            entered.push((advice, traveler));
        }

        // Phase 3: the original body.
        match body() {
            Ok(value) => {
                let mut failure: Option<anyhow::Error> = None;
                // Phase 4: on-return in reverse entry order; a failure mid-
                // pass turns the remaining exits exceptional.
                for (advice, traveler) in entered.iter().rev() {
                    match &mut failure {
                        None => {
                            if let Some(spec) = advice.phase(Phase::OnReturn) {
                                let values = self.resolve(
                                    spec,
                                    ctx,
                                    Phase::OnReturn,
                                    Some(traveler),
                                    Some(&value),
                                    None,
                                );
                                if let Err(error) = spec.callback.invoke(&values) {
                                    failure = Some(error);
                                }
                            }
                        }
                        Some(error) => self.run_on_throw(advice, traveler, ctx, error),
                    }
                }
                // Phase 5: after, unconditionally, reverse entry order.
                self.after_pass(&entered, ctx, &mut failure);
                match failure {
                    None => Ok(value),
                    Some(error) => Err(error),
                }
            }
            Err(mut error) => {
                self.unwind(&entered, ctx, &mut error);
                Err(error)
            }
        }
    }

    /// Exceptional exit: on-throw then after, both in reverse entry order.
    fn unwind(
        &self,
        entered: &[(&Arc<Advice>, Traveler)],
        ctx: &InvocationContext,
        error: &mut anyhow::Error,
    ) {
        for (advice, traveler) in entered.iter().rev() {
            self.run_on_throw(advice, traveler, ctx, error);
        }
        for (advice, traveler) in entered.iter().rev() {
            if let Some(spec) = advice.phase(Phase::After) {
                let values = self.resolve(spec, ctx, Phase::After, Some(traveler), None, None);
                if let Err(secondary) = spec.callback.invoke(&values) {
                    *error = secondary;
                }
            }
        }
    }

    fn run_on_throw(
        &self,
        advice: &Arc<Advice>,
        traveler: &Traveler,
        ctx: &InvocationContext,
        error: &mut anyhow::Error,
    ) {
        if let Some(spec) = advice.phase(Phase::OnThrow) {
            let thrown = error.to_string();
            let values = self.resolve(spec, ctx, Phase::OnThrow, Some(traveler), None, Some(&thrown));
            if let Err(secondary) = spec.callback.invoke(&values) {
                // The newest failure wins and keeps propagating.
                *error = secondary;
            }
        }
    }

    fn after_pass(
        &self,
        entered: &[(&Arc<Advice>, Traveler)],
        ctx: &InvocationContext,
        failure: &mut Option<anyhow::Error>,
    ) {
        for (advice, traveler) in entered.iter().rev() {
            if let Some(spec) = advice.phase(Phase::After) {
                let values = self.resolve(spec, ctx, Phase::After, Some(traveler), None, None);
                if let Err(error) = spec.callback.invoke(&values) {
                    *failure = Some(error);
                }
            }
        }
    }

    fn resolve(
        &self,
        spec: &PhaseSpec,
        ctx: &InvocationContext,
        phase: Phase,
        traveler: Option<&Traveler>,
        return_value: Option<&Value>,
        thrown: Option<&str>,
    ) -> Vec<BoundValue> {
        spec.bindings
            .iter()
            .map(|binding| match binding {
                BindingKind::Receiver => {
                    BoundValue::Receiver(ctx.receiver.clone().unwrap_or(Value::Null))
                }
                BindingKind::Argument(n) => {
                    BoundValue::Argument(ctx.arguments.get(*n).cloned().unwrap_or(Value::Null))
                }
                BindingKind::AllArguments => BoundValue::AllArguments(ctx.arguments.clone()),
                BindingKind::MethodName => BoundValue::MethodName(self.method.name.clone()),
                BindingKind::Return => {
                    BoundValue::Return(return_value.cloned().unwrap_or(Value::Null))
                }
                BindingKind::OptionalReturn => BoundValue::OptionalReturn(return_value.cloned()),
                BindingKind::Thrown => BoundValue::Thrown(thrown.unwrap_or_default().to_string()),
                BindingKind::Traveler(_) => {
                    BoundValue::Traveler(traveler.cloned().unwrap_or(Traveler::Void))
                }
                BindingKind::TypeMeta => BoundValue::TypeMeta(ctx.type_meta.clone()),
                BindingKind::MethodMeta => BoundValue::MethodMeta(ctx.method_meta.clone()),
                BindingKind::Context | BindingKind::OptionalContext => {
                    // During a constructor's before phase the receiver does
                    // not exist yet.
                    let receiver = if self.method.is_constructor() && phase == Phase::Before {
                        None
                    } else {
                        ctx.receiver.clone()
                    };
                    BoundValue::Context(ContextHandle::new(
                        self.unit_name.clone(),
                        self.method.name.clone(),
                        receiver,
                        current_depth(),
                    ))
                }
            })
            .collect()
    }
}

fn constructor_active(unit_name: &str) -> bool {
    ACTIVE_CONSTRUCTORS.with(|frames| frames.borrow().iter().any(|n| n == unit_name))
}

fn group_active(group: &str) -> bool {
    ACTIVE_GROUPS.with(|groups| groups.borrow().get(group).copied().unwrap_or(0) > 0)
}

fn current_depth() -> usize {
    DEPTH.with(|d| *d.borrow())
}

struct ConstructorFrame;

impl ConstructorFrame {
    fn push(unit_name: &str) -> Self {
        ACTIVE_CONSTRUCTORS.with(|frames| frames.borrow_mut().push(unit_name.to_string()));
        Self
    }
}

impl Drop for ConstructorFrame {
    fn drop(&mut self) {
        ACTIVE_CONSTRUCTORS.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

struct DepthFrame;

impl DepthFrame {
    fn push() -> Self {
        DEPTH.with(|d| *d.borrow_mut() += 1);
        Self
    }
}

impl Drop for DepthFrame {
    fn drop(&mut self) {
        DEPTH.with(|d| *d.borrow_mut() -= 1);
    }
}

/// Holds the nesting groups of the selected advices active for the span of
/// one invocation.
struct GroupFrame {
    groups: Vec<String>,
}

impl GroupFrame {
    fn activate(enabled: &[&Arc<Advice>]) -> Self {
        let groups: Vec<String> = enabled
            .iter()
            .map(|a| a.pointcut().nesting_group())
            .filter(|g| !g.is_empty())
            .map(|g| g.to_string())
            .collect();
        ACTIVE_GROUPS.with(|active| {
            let mut active = active.borrow_mut();
            for group in &groups {
                *active.entry(group.clone()).or_insert(0) += 1;
            }
        });
        Self { groups }
    }
}

impl Drop for GroupFrame {
    fn drop(&mut self) {
        ACTIVE_GROUPS.with(|active| {
            let mut active = active.borrow_mut();
            for group in &self.groups {
                if let Some(count) = active.get_mut(group) {
                    *count = count.saturating_sub(1);
                }
            }
        });
    }
}
