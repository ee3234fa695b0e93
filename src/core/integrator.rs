//! The integrator call contract and the per-context function container.
//!
//! An [`Integrator`] is an immutable, validated configuration plus a pure update
//! rule. [`IntegratorFunction`] binds one configuration to a table of execution
//! contexts, each with its own state, parameter overrides and noise generator.
//!
//! A context moves from "no state" to "ready" on its first executing call.
//! Executing calls advance state exactly once; initializing calls compute the
//! same value without committing anything.

use std::borrow::Cow;

use core::fmt;

#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::context::{ContextId, ContextTable, ExecutionPhase};
use crate::dispatch::AffineStep;
use crate::error::{IntegratorError, Result};
use crate::param::{
    invalid_type, resolve_spec, OverrideScope, ParamKind, ParamSpec, ParamValue, RuntimeOverrides,
};
use crate::prng::Prng;

/// Name of the time attribute shared by every time-based kind.
pub const TIME_ATTRIBUTE: &str = "previous_time";

/// Result of one integration step.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepOutput {
    pub value: Vec<f64>,
    /// Simulated time after the step (time-based kinds only).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub time: Option<f64>,
    /// Slow recovery variable (FitzHugh-Nagumo `w`).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub recovery: Option<Vec<f64>>,
}

impl StepOutput {
    pub fn value(value: Vec<f64>) -> Self {
        Self {
            value,
            time: None,
            recovery: None,
        }
    }

    pub fn timed(value: Vec<f64>, time: f64) -> Self {
        Self {
            value,
            time: Some(time),
            recovery: None,
        }
    }

    /// First element of the value, convenient for scalar variables.
    pub fn first(&self) -> Option<f64> {
        self.value.first().copied()
    }
}

#[cfg(feature = "serde")]
pub trait StateBounds: Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned {}
#[cfg(feature = "serde")]
impl<T> StateBounds for T where T: Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned {}

#[cfg(not(feature = "serde"))]
pub trait StateBounds: Clone + fmt::Debug + PartialEq + Send + Sync {}
#[cfg(not(feature = "serde"))]
impl<T> StateBounds for T where T: Clone + fmt::Debug + PartialEq + Send + Sync {}

/// Per-context state record of one integrator kind.
pub trait StateRecord: StateBounds {
    /// Stateful attribute names, in reinitialization order.
    const ATTRIBUTES: &'static [&'static str];

    /// Number of elements in the integrated variable.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value slot an affine step reads as `p`.
    fn primary(&self) -> &[f64];

    /// Current value of a stateful attribute (time is a one-element vector).
    fn attribute(&self, name: &str) -> Option<Vec<f64>>;

    /// Overwrites a stateful attribute; false when `name` is not one.
    fn set_attribute(&mut self, name: &str, values: &[f64]) -> bool;
}

/// One dynamical model: typed configuration plus its update rule.
pub trait Integrator: Clone + fmt::Debug + Send + Sync + 'static {
    type State: StateRecord;

    /// Function name used in errors and logs.
    const NAME: &'static str;

    fn param_specs(&self) -> &'static [ParamSpec];

    /// Current value of a declared parameter, by canonical name.
    fn param(&self, name: &str) -> Option<ParamValue>;

    /// Replaces a declared parameter, by canonical name. Callers validate after.
    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()>;

    fn validate(&self) -> Result<()>;

    /// Names of the parameters that seed a fresh context.
    fn initializers(&self) -> &'static [&'static str];

    fn stateful_attributes(&self) -> &'static [&'static str] {
        Self::State::ATTRIBUTES
    }

    /// State of a context that has never executed, for a variable of `len`.
    fn initial_state(&self, len: usize) -> Result<Self::State>;

    /// The value a context reports for `state` without stepping.
    fn output(&self, state: &Self::State) -> Result<StepOutput>;

    /// Applies the update rule once.
    fn step(
        &self,
        state: &Self::State,
        variable: &[f64],
        rng: &mut Prng,
    ) -> Result<(Self::State, StepOutput)>;

    /// Stages this step as `a·p + b·x + c` when the rule is affine in `p` and `x`.
    ///
    /// Noise is drawn here, from the same generator and in the same order as
    /// [`Integrator::step`] would draw it.
    fn lower(
        &self,
        _state: &Self::State,
        _variable: &[f64],
        _rng: &mut Prng,
    ) -> Result<Option<AffineStep>> {
        Ok(None)
    }

    /// Builds the next state from an evaluated affine step.
    fn commit_affine(
        &self,
        _state: &Self::State,
        _value: Vec<f64>,
        _step: &AffineStep,
    ) -> Option<(Self::State, StepOutput)> {
        None
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub phase: ExecutionPhase,
    pub overrides: RuntimeOverrides,
    pub scope: OverrideScope,
}

impl CallOptions {
    pub fn executing() -> Self {
        Self::default()
    }

    pub fn initializing() -> Self {
        Self {
            phase: ExecutionPhase::Initializing,
            ..Self::default()
        }
    }

    pub fn with_override(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.overrides.insert(name, value);
        self
    }

    pub fn with_scope(mut self, scope: OverrideScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn sticky(self) -> Self {
        self.with_scope(OverrideScope::Sticky)
    }

    fn commits_params(&self) -> bool {
        self.scope == OverrideScope::Sticky && !self.overrides.is_empty()
    }
}

/// Everything one context owns.
#[derive(Debug, Clone)]
pub(crate) struct ContextSlot<K: Integrator> {
    /// Per-context parameter values; `None` reads the instance defaults.
    pub(crate) params: Option<K>,
    /// `None` until the first executing call or reinitialization.
    pub(crate) state: Option<K::State>,
    pub(crate) rng: Prng,
    pub(crate) executions: u64,
}

/// An affine step staged for batched evaluation.
pub(crate) struct Staged<K: Integrator> {
    params: Option<K>,
    previous: K::State,
    pub(crate) step: AffineStep,
    rng_before: Prng,
    rng_after: Prng,
}

impl<K: Integrator> Staged<K> {
    pub(crate) fn previous(&self) -> &[f64] {
        self.previous.primary()
    }
}

/// A computed step waiting to be written back to its slot.
pub(crate) struct Pending<K: Integrator> {
    state: K::State,
    out: StepOutput,
    rng: Prng,
    /// Parameters to keep for the context (sticky overrides only).
    params: Option<K>,
}

impl<K: Integrator> Pending<K> {
    pub(crate) fn output(&self) -> &StepOutput {
        &self.out
    }
}

impl<K: Integrator> ContextSlot<K> {
    pub(crate) fn new(seed: u64, id: ContextId) -> Self {
        Self {
            params: None,
            state: None,
            rng: Prng::for_stream(seed, id.0),
            executions: 0,
        }
    }

    fn base<'a>(&'a self, defaults: &'a K) -> &'a K {
        self.params.as_ref().unwrap_or(defaults)
    }

    fn effective<'a>(&'a self, defaults: &'a K, overrides: &RuntimeOverrides) -> Result<Cow<'a, K>> {
        let base = self.base(defaults);
        if overrides.is_empty() {
            return Ok(Cow::Borrowed(base));
        }
        apply_overrides(base, overrides).map(Cow::Owned)
    }

    /// Computes one step without touching the slot.
    pub(crate) fn compute(&self, defaults: &K, variable: &[f64], opts: &CallOptions) -> Result<Pending<K>> {
        let params = self.effective(defaults, &opts.overrides)?;
        let mut rng = self.rng.clone();
        let (state, out) = run_step(params.as_ref(), self.state.as_ref(), variable, &mut rng)?;
        let params = opts.commits_params().then(|| params.into_owned());
        Ok(Pending {
            state,
            out,
            rng,
            params,
        })
    }

    /// Writes a computed step back and returns its output.
    pub(crate) fn commit(&mut self, pending: Pending<K>) -> StepOutput {
        let Pending {
            state,
            out,
            rng,
            params,
        } = pending;
        self.state = Some(state);
        self.rng = rng;
        self.executions += 1;
        if params.is_some() {
            self.params = params;
        }
        out
    }

    /// Computes one step and commits it. Nothing changes on error.
    pub(crate) fn advance(&mut self, defaults: &K, variable: &[f64], opts: &CallOptions) -> Result<StepOutput> {
        let pending = self.compute(defaults, variable, opts)?;
        Ok(self.commit(pending))
    }

    /// Stages an affine step; `None` when the kind has no affine form.
    pub(crate) fn stage(&self, defaults: &K, variable: &[f64], opts: &CallOptions) -> Result<Option<Staged<K>>> {
        let params = self.effective(defaults, &opts.overrides)?;
        let previous = match &self.state {
            Some(state) => {
                check_variable_len::<K>(state, variable)?;
                state.clone()
            }
            None => params.initial_state(variable.len())?,
        };
        let mut rng = self.rng.clone();
        let Some(step) = params.lower(&previous, variable, &mut rng)? else {
            return Ok(None);
        };
        let params = match params {
            Cow::Owned(p) => Some(p),
            Cow::Borrowed(_) => None,
        };
        Ok(Some(Staged {
            params,
            previous,
            step,
            rng_before: self.rng.clone(),
            rng_after: rng,
        }))
    }

    /// Turns a staged step evaluated elsewhere into a pending commit.
    pub(crate) fn finish_staged(
        &self,
        defaults: &K,
        staged: Staged<K>,
        value: Vec<f64>,
        variable: &[f64],
        opts: &CallOptions,
    ) -> Result<Pending<K>> {
        let Staged {
            params,
            previous,
            step,
            mut rng_before,
            rng_after,
        } = staged;
        let kind = params.as_ref().unwrap_or_else(|| self.base(defaults));
        let (state, out, rng) = match kind.commit_affine(&previous, value, &step) {
            Some((state, out)) => (state, out, rng_after),
            None => {
                let (state, out) = kind.step(&previous, variable, &mut rng_before)?;
                (state, out, rng_before)
            }
        };
        Ok(Pending {
            state,
            out,
            rng,
            params: if opts.commits_params() { params } else { None },
        })
    }
}

fn check_variable_len<K: Integrator>(state: &K::State, variable: &[f64]) -> Result<()> {
    if state.len() != variable.len() {
        return Err(IntegratorError::LengthMismatch {
            function: K::NAME,
            param: "variable",
            len: variable.len(),
            expected: state.len(),
        });
    }
    Ok(())
}

fn run_step<K: Integrator>(
    kind: &K,
    state: Option<&K::State>,
    variable: &[f64],
    rng: &mut Prng,
) -> Result<(K::State, StepOutput)> {
    match state {
        Some(state) => {
            check_variable_len::<K>(state, variable)?;
            kind.step(state, variable, rng)
        }
        None => {
            let fresh = kind.initial_state(variable.len())?;
            kind.step(&fresh, variable, rng)
        }
    }
}

pub(crate) fn expected_for(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::Numeric => "a number or a list of numbers",
        ParamKind::Noise => "a number, a list of numbers or a distribution",
        ParamKind::Choice => "one of the named options",
    }
}

/// Clone of `base` with `overrides` applied and validated.
///
/// Unknown names are ignored with a warning so generic call sites may pass a
/// superset of arguments; construction-fixed parameters are rejected.
pub(crate) fn apply_overrides<K: Integrator>(base: &K, overrides: &RuntimeOverrides) -> Result<K> {
    let mut kind = base.clone();
    for (name, value) in overrides.iter() {
        let Some(spec) = resolve_spec(kind.param_specs(), name) else {
            warn!(function = K::NAME, param = name, "ignoring unsupported runtime parameter");
            continue;
        };
        if !spec.modulable {
            return Err(IntegratorError::NotModulable {
                function: K::NAME,
                param: spec.name,
            });
        }
        if !spec.accepts(value) {
            return Err(invalid_type(K::NAME, spec.name, value, expected_for(spec.kind)));
        }
        kind.set_param(spec.name, value.clone())?;
    }
    kind.validate()?;
    Ok(kind)
}

/// Length implied by vector-valued initializers, if any.
fn natural_len<K: Integrator>(kind: &K) -> Option<usize> {
    kind.initializers()
        .iter()
        .filter_map(|name| kind.param(name))
        .find_map(|value| value.required_len())
}

/// One integrator configuration bound to its execution contexts.
#[derive(Debug, Clone)]
pub struct IntegratorFunction<K: Integrator> {
    pub(crate) defaults: K,
    pub(crate) seed: u64,
    pub(crate) contexts: ContextTable<ContextSlot<K>>,
}

impl<K: Integrator> IntegratorFunction<K> {
    /// Validates `kind` and binds it to an empty context table.
    pub fn new(kind: K) -> Result<Self> {
        kind.validate()?;
        Ok(Self {
            defaults: kind,
            seed: 0,
            contexts: ContextTable::new(),
        })
    }

    /// Seed from which every context's noise stream is derived.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }

    /// Instance-level configuration (the defaults every context starts from).
    pub fn kind(&self) -> &K {
        &self.defaults
    }

    pub fn stateful_attributes(&self) -> &'static [&'static str] {
        self.defaults.stateful_attributes()
    }

    pub fn initializers(&self) -> &'static [&'static str] {
        self.defaults.initializers()
    }

    pub fn param_specs(&self) -> &'static [ParamSpec] {
        self.defaults.param_specs()
    }

    /// One executing step for `ctx`.
    pub fn execute(&mut self, variable: &[f64], ctx: ContextId) -> Result<StepOutput> {
        self.execute_with(variable, ctx, &CallOptions::default())
    }

    pub fn execute_with(&mut self, variable: &[f64], ctx: ContextId, opts: &CallOptions) -> Result<StepOutput> {
        trace!(function = K::NAME, context = %ctx, phase = ?opts.phase, "step");
        if opts.phase == ExecutionPhase::Initializing {
            return match self.contexts.get(ctx) {
                Some(slot) => slot.compute(&self.defaults, variable, opts),
                None => ContextSlot::<K>::new(self.seed, ctx).compute(&self.defaults, variable, opts),
            }
            .map(|pending| pending.out);
        }
        if let Some(slot) = self.contexts.get_mut(ctx) {
            return slot.advance(&self.defaults, variable, opts);
        }
        let mut slot = ContextSlot::new(self.seed, ctx);
        let out = slot.advance(&self.defaults, variable, opts)?;
        debug!(function = K::NAME, context = %ctx, len = variable.len(), "context created");
        self.contexts.insert(ctx, slot);
        Ok(out)
    }

    pub(crate) fn slot_or_new(&mut self, ctx: ContextId) -> &mut ContextSlot<K> {
        let seed = self.seed;
        self.contexts.get_or_insert_with(ctx, || {
            debug!(function = K::NAME, context = %ctx, "context created");
            ContextSlot::new(seed, ctx)
        })
    }

    /// Current value of `name` (or its role alias) for `ctx`, falling back to
    /// the instance default. `None` for undeclared names.
    pub fn get_param(&self, name: &str, ctx: Option<ContextId>) -> Option<ParamValue> {
        let spec = resolve_spec(self.defaults.param_specs(), name)?;
        let kind = ctx
            .and_then(|ctx| self.contexts.get(ctx))
            .and_then(|slot| slot.params.as_ref())
            .unwrap_or(&self.defaults);
        kind.param(spec.name)
    }

    /// Writes a per-context parameter value. The instance default never changes.
    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>, ctx: ContextId) -> Result<()> {
        let value = value.into();
        let Some(spec) = resolve_spec(self.defaults.param_specs(), name).copied() else {
            warn!(function = K::NAME, param = name, "ignoring unsupported parameter");
            return Ok(());
        };
        if spec.kind == ParamKind::Choice {
            return Err(IntegratorError::NotModulable {
                function: K::NAME,
                param: spec.name,
            });
        }
        if !spec.accepts(&value) {
            return Err(invalid_type(K::NAME, spec.name, &value, expected_for(spec.kind)));
        }
        let mut updated = self
            .contexts
            .get(ctx)
            .and_then(|slot| slot.params.clone())
            .unwrap_or_else(|| self.defaults.clone());
        updated.set_param(spec.name, value)?;
        updated.validate()?;
        self.slot_or_new(ctx).params = Some(updated);
        Ok(())
    }

    /// Resets the stateful attributes of `ctx` and returns the resulting output.
    ///
    /// `values` are taken in [`Integrator::stateful_attributes`] order; any
    /// attribute not given is reset from its initializer.
    pub fn reinitialize(&mut self, ctx: ContextId, values: &[&[f64]]) -> Result<StepOutput> {
        let attributes = K::State::ATTRIBUTES;
        if values.len() > attributes.len() {
            return Err(IntegratorError::LengthMismatch {
                function: K::NAME,
                param: "stateful attributes",
                len: values.len(),
                expected: attributes.len(),
            });
        }
        let seed = self.seed;
        let defaults = &self.defaults;
        let slot = self
            .contexts
            .get_or_insert_with(ctx, || ContextSlot::new(seed, ctx));
        let kind = slot.params.as_ref().unwrap_or(defaults);

        let len = attributes
            .iter()
            .zip(values)
            .find(|(name, _)| **name != TIME_ATTRIBUTE)
            .map(|(_, v)| v.len())
            .or_else(|| slot.state.as_ref().map(|s| s.len()))
            .or_else(|| natural_len(kind))
            .unwrap_or(1);

        let mut state = kind.initial_state(len)?;
        for (name, v) in attributes.iter().zip(values) {
            assign_attribute::<K>(&mut state, name, v)?;
        }
        let out = kind.output(&state)?;
        slot.state = Some(state);
        debug!(function = K::NAME, context = %ctx, "context reinitialized");
        Ok(out)
    }

    /// Recorded state of `ctx`, if it has executed or been reinitialized.
    pub fn state(&self, ctx: ContextId) -> Option<&K::State> {
        self.contexts.get(ctx).and_then(|slot| slot.state.as_ref())
    }

    /// Value of one stateful attribute of `ctx`.
    pub fn state_attribute(&self, ctx: ContextId, name: &str) -> Result<Vec<f64>> {
        let state = self.state(ctx).ok_or(IntegratorError::UnknownContext {
            function: K::NAME,
            context: ctx,
        })?;
        state.attribute(name).ok_or_else(|| unknown_attribute::<K>(name))
    }

    /// Overwrites one stateful attribute of `ctx`, seeding the context first if needed.
    pub fn set_state_attribute(&mut self, ctx: ContextId, name: &str, values: &[f64]) -> Result<()> {
        if !K::State::ATTRIBUTES.contains(&name) {
            return Err(unknown_attribute::<K>(name));
        }
        let seed = self.seed;
        let defaults = &self.defaults;
        let slot = self
            .contexts
            .get_or_insert_with(ctx, || ContextSlot::new(seed, ctx));
        if slot.state.is_none() {
            let len = if name == TIME_ATTRIBUTE {
                natural_len(slot.base(defaults)).unwrap_or(1)
            } else {
                values.len()
            };
            slot.state = Some(slot.base(defaults).initial_state(len)?);
        }
        match slot.state.as_mut() {
            Some(state) => assign_attribute::<K>(state, name, values),
            None => Ok(()),
        }
    }

    /// Whether `ctx` has a slot in this function.
    pub fn contains(&self, ctx: ContextId) -> bool {
        self.contexts.contains(ctx)
    }

    /// Drops everything recorded for `ctx`. Returns false if it was unknown.
    pub fn discard(&mut self, ctx: ContextId) -> bool {
        let removed = self.contexts.remove(ctx).is_some();
        if removed {
            debug!(function = K::NAME, context = %ctx, "context discarded");
        }
        removed
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.ids()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Number of committed executing steps for `ctx`.
    pub fn executions(&self, ctx: ContextId) -> u64 {
        self.contexts.get(ctx).map_or(0, |slot| slot.executions)
    }

    /// Restarts the noise stream of `ctx` from `seed`.
    pub fn reseed(&mut self, ctx: ContextId, seed: u64) {
        self.slot_or_new(ctx).rng = Prng::for_stream(seed, ctx.0);
    }
}

fn unknown_attribute<K: Integrator>(name: &str) -> IntegratorError {
    IntegratorError::UnknownVariant {
        function: K::NAME,
        param: "stateful attribute",
        value: name.to_string(),
        expected: "a declared stateful attribute",
    }
}

/// Fails unless every attribute of `state` has the length `assign_attribute` would accept.
#[cfg(feature = "serde")]
pub(crate) fn check_state_shape<K: Integrator>(state: &K::State) -> Result<()> {
    for &name in K::State::ATTRIBUTES {
        let expected = if name == TIME_ATTRIBUTE { 1 } else { state.len() };
        let len = state.attribute(name).map_or(0, |values| values.len());
        if len != expected {
            return Err(IntegratorError::LengthMismatch {
                function: K::NAME,
                param: name,
                len,
                expected,
            });
        }
    }
    Ok(())
}

fn assign_attribute<K: Integrator>(state: &mut K::State, name: &str, values: &[f64]) -> Result<()> {
    let expected = if name == TIME_ATTRIBUTE { 1 } else { state.len() };
    if values.len() != expected {
        let param = K::State::ATTRIBUTES
            .iter()
            .copied()
            .find(|a| *a == name)
            .unwrap_or("stateful attribute");
        return Err(IntegratorError::LengthMismatch {
            function: K::NAME,
            param,
            len: values.len(),
            expected,
        });
    }
    if !state.set_attribute(name, values) {
        return Err(unknown_attribute::<K>(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::{AdaptiveIntegrator, SimpleIntegrator};
    use crate::param::Distribution;

    fn ctx(name: &str) -> ContextId {
        ContextId::named(name)
    }

    #[test]
    fn fresh_context_reads_instance_defaults() {
        let f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(2.0)).unwrap();
        assert_eq!(f.get_param("rate", Some(ctx("a"))), Some(ParamValue::Scalar(2.0)));
        assert_eq!(f.get_param("multiplicative_param", None), Some(ParamValue::Scalar(2.0)));
        assert_eq!(f.get_param("no_such_param", None), None);
    }

    #[test]
    fn set_param_is_per_context() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        f.set_param("rate", 3.0, ctx("a")).unwrap();
        assert_eq!(f.get_param("rate", Some(ctx("a"))), Some(ParamValue::Scalar(3.0)));
        assert_eq!(f.get_param("rate", Some(ctx("b"))), Some(ParamValue::Scalar(1.0)));
        assert_eq!(f.kind().rate, ParamValue::Scalar(1.0));
        assert_eq!(f.execute(&[1.0], ctx("a")).unwrap().value, vec![3.0]);
    }

    #[test]
    fn initializing_calls_do_not_commit() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        let c = ctx("a");
        f.execute(&[1.0], c).unwrap();
        for _ in 0..3 {
            let out = f.execute_with(&[5.0], c, &CallOptions::initializing()).unwrap();
            assert_eq!(out.value, vec![6.0]);
        }
        assert_eq!(f.state_attribute(c, "previous_value").unwrap(), vec![1.0]);
        assert_eq!(f.executions(c), 1);
        assert!(!f.contains(ctx("never")));
        f.execute_with(&[1.0], ctx("never"), &CallOptions::initializing())
            .unwrap();
        assert!(!f.contains(ctx("never")));
    }

    #[test]
    fn call_only_override_reverts() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        let c = ctx("a");
        let opts = CallOptions::executing().with_override("rate", 10.0);
        assert_eq!(f.execute_with(&[1.0], c, &opts).unwrap().value, vec![10.0]);
        assert_eq!(f.get_param("rate", Some(c)), Some(ParamValue::Scalar(1.0)));
        assert_eq!(f.execute(&[1.0], c).unwrap().value, vec![11.0]);
    }

    #[test]
    fn sticky_override_persists_for_that_context() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        let c = ctx("a");
        let opts = CallOptions::executing().with_override("rate", 10.0).sticky();
        f.execute_with(&[1.0], c, &opts).unwrap();
        assert_eq!(f.get_param("rate", Some(c)), Some(ParamValue::Scalar(10.0)));
        assert_eq!(f.get_param("rate", Some(ctx("b"))), Some(ParamValue::Scalar(1.0)));
    }

    #[test]
    fn unknown_override_is_ignored_and_bad_value_rejected() {
        let mut f = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(0.5)).unwrap();
        let c = ctx("a");
        let opts = CallOptions::executing().with_override("not_a_param", 1.0);
        assert_eq!(f.execute_with(&[10.0], c, &opts).unwrap().value, vec![5.0]);

        let bad = CallOptions::executing().with_override("rate", 1.5);
        let err = f.execute_with(&[10.0], c, &bad).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(f.state_attribute(c, "previous_value").unwrap(), vec![5.0]);
    }

    #[test]
    fn variable_length_must_match_state() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        let c = ctx("a");
        f.execute(&[1.0, 2.0], c).unwrap();
        let err = f.execute(&[1.0], c).unwrap_err();
        assert!(matches!(err, IntegratorError::LengthMismatch { len: 1, expected: 2, .. }));
    }

    #[test]
    fn reinitialize_and_attributes() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        let c = ctx("a");
        let out = f.reinitialize(c, &[&[4.0, 5.0]]).unwrap();
        assert_eq!(out.value, vec![4.0, 5.0]);
        assert_eq!(f.execute(&[1.0, 1.0], c).unwrap().value, vec![5.0, 6.0]);

        f.set_state_attribute(c, "previous_value", &[0.0, 0.0]).unwrap();
        assert_eq!(f.execute(&[1.0, 1.0], c).unwrap().value, vec![1.0, 1.0]);

        assert!(f.set_state_attribute(c, "previous_w", &[0.0]).is_err());
        assert!(f.set_state_attribute(c, "previous_value", &[0.0]).is_err());

        let out = f.reinitialize(c, &[]).unwrap();
        assert_eq!(out.value, vec![0.0, 0.0]);
    }

    #[test]
    fn discard_and_reseed() {
        let noisy = SimpleIntegrator::default().with_noise(Distribution::Normal {
            mean: 0.0,
            standard_deviation: 1.0,
        });
        let mut f = IntegratorFunction::new(noisy).unwrap().with_seed(9);
        let c = ctx("a");
        let first = f.execute(&[0.0], c).unwrap().value;
        assert!(f.discard(c));
        assert!(!f.discard(c));
        assert_eq!(f.execute(&[0.0], c).unwrap().value, first);

        f.reseed(c, 9);
        f.set_state_attribute(c, "previous_value", &[0.0]).unwrap();
        assert_eq!(f.execute(&[0.0], c).unwrap().value, first);
        assert_eq!(f.executions(c), 2);
        assert_eq!(f.context_ids(), vec![c]);
    }
}
