//! Config-driven construction and a single dispatch point over the closed set
//! of integrator kinds.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use tracing::warn;

use crate::context::ContextId;
use crate::dispatch::{BatchExecutor, BatchRequest};
use crate::error::{IntegratorError, Result};
#[cfg(feature = "serde")]
use crate::integrator::expected_for;
use crate::integrator::{CallOptions, Integrator, IntegratorFunction, StepOutput};
use crate::integrators::{
    AccumulatorIntegrator, AdaptiveIntegrator, ConstantIntegrator, DriftDiffusionIntegrator,
    DualAdaptiveIntegrator, FitzHughNagumoIntegrator, InteractiveActivationIntegrator,
    LeakyCompetingIntegrator, OrnsteinUhlenbeckIntegrator, SimpleIntegrator,
};
use crate::param::{ParamSpec, ParamValue};

/// The integrator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntegratorKind {
    #[cfg_attr(feature = "serde", serde(rename = "constant", alias = "ConstantIntegrator"))]
    Constant,
    #[cfg_attr(feature = "serde", serde(rename = "accumulator", alias = "AccumulatorIntegrator"))]
    Accumulator,
    #[cfg_attr(feature = "serde", serde(rename = "simple", alias = "SimpleIntegrator"))]
    Simple,
    #[cfg_attr(feature = "serde", serde(rename = "adaptive", alias = "AdaptiveIntegrator"))]
    Adaptive,
    #[cfg_attr(feature = "serde", serde(rename = "dual_adaptive", alias = "DualAdaptiveIntegrator"))]
    DualAdaptive,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "interactive_activation", alias = "InteractiveActivationIntegrator")
    )]
    InteractiveActivation,
    #[cfg_attr(feature = "serde", serde(rename = "drift_diffusion", alias = "DriftDiffusionIntegrator"))]
    DriftDiffusion,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "ornstein_uhlenbeck", alias = "OrnsteinUhlenbeckIntegrator")
    )]
    OrnsteinUhlenbeck,
    #[cfg_attr(feature = "serde", serde(rename = "leaky_competing", alias = "LeakyCompetingIntegrator"))]
    LeakyCompeting,
    #[cfg_attr(feature = "serde", serde(rename = "fitzhugh_nagumo", alias = "FitzHughNagumoIntegrator"))]
    FitzHughNagumo,
}

impl IntegratorKind {
    pub const ALL: [IntegratorKind; 10] = [
        IntegratorKind::Constant,
        IntegratorKind::Accumulator,
        IntegratorKind::Simple,
        IntegratorKind::Adaptive,
        IntegratorKind::DualAdaptive,
        IntegratorKind::InteractiveActivation,
        IntegratorKind::DriftDiffusion,
        IntegratorKind::OrnsteinUhlenbeck,
        IntegratorKind::LeakyCompeting,
        IntegratorKind::FitzHughNagumo,
    ];

    /// Short config name.
    pub fn as_str(self) -> &'static str {
        match self {
            IntegratorKind::Constant => "constant",
            IntegratorKind::Accumulator => "accumulator",
            IntegratorKind::Simple => "simple",
            IntegratorKind::Adaptive => "adaptive",
            IntegratorKind::DualAdaptive => "dual_adaptive",
            IntegratorKind::InteractiveActivation => "interactive_activation",
            IntegratorKind::DriftDiffusion => "drift_diffusion",
            IntegratorKind::OrnsteinUhlenbeck => "ornstein_uhlenbeck",
            IntegratorKind::LeakyCompeting => "leaky_competing",
            IntegratorKind::FitzHughNagumo => "fitzhugh_nagumo",
        }
    }

    /// Function name used in errors and logs.
    pub fn function_name(self) -> &'static str {
        match self {
            IntegratorKind::Constant => ConstantIntegrator::NAME,
            IntegratorKind::Accumulator => AccumulatorIntegrator::NAME,
            IntegratorKind::Simple => SimpleIntegrator::NAME,
            IntegratorKind::Adaptive => AdaptiveIntegrator::NAME,
            IntegratorKind::DualAdaptive => DualAdaptiveIntegrator::NAME,
            IntegratorKind::InteractiveActivation => InteractiveActivationIntegrator::NAME,
            IntegratorKind::DriftDiffusion => DriftDiffusionIntegrator::NAME,
            IntegratorKind::OrnsteinUhlenbeck => OrnsteinUhlenbeckIntegrator::NAME,
            IntegratorKind::LeakyCompeting => LeakyCompetingIntegrator::NAME,
            IntegratorKind::FitzHughNagumo => FitzHughNagumoIntegrator::NAME,
        }
    }
}

impl fmt::Display for IntegratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegratorKind {
    type Err = IntegratorError;

    fn from_str(s: &str) -> Result<Self> {
        IntegratorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.function_name() == s)
            .ok_or_else(|| IntegratorError::UnknownVariant {
                function: "IntegratorSpec",
                param: "kind",
                value: s.to_string(),
                expected: "a known integrator kind (e.g. 'simple', 'drift_diffusion')",
            })
    }
}

/// Any configured integrator function.
#[derive(Debug, Clone)]
pub enum AnyIntegrator {
    Constant(IntegratorFunction<ConstantIntegrator>),
    Accumulator(IntegratorFunction<AccumulatorIntegrator>),
    Simple(IntegratorFunction<SimpleIntegrator>),
    Adaptive(IntegratorFunction<AdaptiveIntegrator>),
    DualAdaptive(IntegratorFunction<DualAdaptiveIntegrator>),
    InteractiveActivation(IntegratorFunction<InteractiveActivationIntegrator>),
    DriftDiffusion(IntegratorFunction<DriftDiffusionIntegrator>),
    OrnsteinUhlenbeck(IntegratorFunction<OrnsteinUhlenbeckIntegrator>),
    LeakyCompeting(IntegratorFunction<LeakyCompetingIntegrator>),
    FitzHughNagumo(IntegratorFunction<FitzHughNagumoIntegrator>),
}

macro_rules! each_function {
    ($value:expr, $f:ident => $body:expr) => {
        match $value {
            AnyIntegrator::Constant($f) => $body,
            AnyIntegrator::Accumulator($f) => $body,
            AnyIntegrator::Simple($f) => $body,
            AnyIntegrator::Adaptive($f) => $body,
            AnyIntegrator::DualAdaptive($f) => $body,
            AnyIntegrator::InteractiveActivation($f) => $body,
            AnyIntegrator::DriftDiffusion($f) => $body,
            AnyIntegrator::OrnsteinUhlenbeck($f) => $body,
            AnyIntegrator::LeakyCompeting($f) => $body,
            AnyIntegrator::FitzHughNagumo($f) => $body,
        }
    };
}

/// Applies `(name, value)` pairs to a fresh configuration. Unknown names are
/// warned about and skipped.
#[cfg(feature = "serde")]
fn configure<K: Integrator + Default>(params: &BTreeMap<String, ParamValue>) -> Result<K> {
    let mut kind = K::default();
    for (name, value) in params {
        let Some(spec) = crate::param::resolve_spec(kind.param_specs(), name) else {
            warn!(function = K::NAME, param = %name, "ignoring unsupported parameter");
            continue;
        };
        if !spec.accepts(value) {
            return Err(crate::param::invalid_type(K::NAME, spec.name, value, expected_for(spec.kind)));
        }
        kind.set_param(spec.name, value.clone())?;
    }
    Ok(kind)
}

impl AnyIntegrator {
    /// A function of `kind` with every parameter at its default.
    pub fn with_defaults(kind: IntegratorKind) -> Result<Self> {
        Ok(match kind {
            IntegratorKind::Constant => AnyIntegrator::Constant(IntegratorFunction::new(Default::default())?),
            IntegratorKind::Accumulator => AnyIntegrator::Accumulator(IntegratorFunction::new(Default::default())?),
            IntegratorKind::Simple => AnyIntegrator::Simple(IntegratorFunction::new(Default::default())?),
            IntegratorKind::Adaptive => AnyIntegrator::Adaptive(IntegratorFunction::new(Default::default())?),
            IntegratorKind::DualAdaptive => AnyIntegrator::DualAdaptive(IntegratorFunction::new(Default::default())?),
            IntegratorKind::InteractiveActivation => {
                AnyIntegrator::InteractiveActivation(IntegratorFunction::new(Default::default())?)
            }
            IntegratorKind::DriftDiffusion => {
                AnyIntegrator::DriftDiffusion(IntegratorFunction::new(Default::default())?)
            }
            IntegratorKind::OrnsteinUhlenbeck => {
                AnyIntegrator::OrnsteinUhlenbeck(IntegratorFunction::new(Default::default())?)
            }
            IntegratorKind::LeakyCompeting => {
                AnyIntegrator::LeakyCompeting(IntegratorFunction::new(Default::default())?)
            }
            IntegratorKind::FitzHughNagumo => {
                AnyIntegrator::FitzHughNagumo(IntegratorFunction::new(Default::default())?)
            }
        })
    }

    pub fn kind(&self) -> IntegratorKind {
        match self {
            AnyIntegrator::Constant(_) => IntegratorKind::Constant,
            AnyIntegrator::Accumulator(_) => IntegratorKind::Accumulator,
            AnyIntegrator::Simple(_) => IntegratorKind::Simple,
            AnyIntegrator::Adaptive(_) => IntegratorKind::Adaptive,
            AnyIntegrator::DualAdaptive(_) => IntegratorKind::DualAdaptive,
            AnyIntegrator::InteractiveActivation(_) => IntegratorKind::InteractiveActivation,
            AnyIntegrator::DriftDiffusion(_) => IntegratorKind::DriftDiffusion,
            AnyIntegrator::OrnsteinUhlenbeck(_) => IntegratorKind::OrnsteinUhlenbeck,
            AnyIntegrator::LeakyCompeting(_) => IntegratorKind::LeakyCompeting,
            AnyIntegrator::FitzHughNagumo(_) => IntegratorKind::FitzHughNagumo,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().function_name()
    }

    pub fn with_seed(self, seed: u64) -> Self {
        match self {
            AnyIntegrator::Constant(f) => AnyIntegrator::Constant(f.with_seed(seed)),
            AnyIntegrator::Accumulator(f) => AnyIntegrator::Accumulator(f.with_seed(seed)),
            AnyIntegrator::Simple(f) => AnyIntegrator::Simple(f.with_seed(seed)),
            AnyIntegrator::Adaptive(f) => AnyIntegrator::Adaptive(f.with_seed(seed)),
            AnyIntegrator::DualAdaptive(f) => AnyIntegrator::DualAdaptive(f.with_seed(seed)),
            AnyIntegrator::InteractiveActivation(f) => AnyIntegrator::InteractiveActivation(f.with_seed(seed)),
            AnyIntegrator::DriftDiffusion(f) => AnyIntegrator::DriftDiffusion(f.with_seed(seed)),
            AnyIntegrator::OrnsteinUhlenbeck(f) => AnyIntegrator::OrnsteinUhlenbeck(f.with_seed(seed)),
            AnyIntegrator::LeakyCompeting(f) => AnyIntegrator::LeakyCompeting(f.with_seed(seed)),
            AnyIntegrator::FitzHughNagumo(f) => AnyIntegrator::FitzHughNagumo(f.with_seed(seed)),
        }
    }

    pub fn execute(&mut self, variable: &[f64], ctx: ContextId) -> Result<StepOutput> {
        each_function!(self, f => f.execute(variable, ctx))
    }

    pub fn execute_with(&mut self, variable: &[f64], ctx: ContextId, opts: &CallOptions) -> Result<StepOutput> {
        each_function!(self, f => f.execute_with(variable, ctx, opts))
    }

    /// Runs one batched step through `executor`.
    pub fn run_batch(
        &mut self,
        executor: &BatchExecutor,
        requests: &[BatchRequest<'_>],
        opts: &CallOptions,
    ) -> Result<Vec<StepOutput>> {
        each_function!(self, f => executor.run(f, requests, opts))
    }

    pub fn get_param(&self, name: &str, ctx: Option<ContextId>) -> Option<ParamValue> {
        each_function!(self, f => f.get_param(name, ctx))
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>, ctx: ContextId) -> Result<()> {
        let value = value.into();
        each_function!(self, f => f.set_param(name, value, ctx))
    }

    pub fn param_specs(&self) -> &'static [ParamSpec] {
        each_function!(self, f => f.param_specs())
    }

    pub fn stateful_attributes(&self) -> &'static [&'static str] {
        each_function!(self, f => f.stateful_attributes())
    }

    pub fn initializers(&self) -> &'static [&'static str] {
        each_function!(self, f => f.initializers())
    }

    pub fn reinitialize(&mut self, ctx: ContextId, values: &[&[f64]]) -> Result<StepOutput> {
        each_function!(self, f => f.reinitialize(ctx, values))
    }

    pub fn state_attribute(&self, ctx: ContextId, name: &str) -> Result<Vec<f64>> {
        each_function!(self, f => f.state_attribute(ctx, name))
    }

    pub fn set_state_attribute(&mut self, ctx: ContextId, name: &str, values: &[f64]) -> Result<()> {
        each_function!(self, f => f.set_state_attribute(ctx, name, values))
    }

    pub fn contains(&self, ctx: ContextId) -> bool {
        each_function!(self, f => f.contains(ctx))
    }

    pub fn discard(&mut self, ctx: ContextId) -> bool {
        each_function!(self, f => f.discard(ctx))
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        each_function!(self, f => f.context_ids())
    }

    pub fn executions(&self, ctx: ContextId) -> u64 {
        each_function!(self, f => f.executions(ctx))
    }

    pub fn snapshot(&self) -> crate::observer::FunctionSnapshot {
        each_function!(self, f => crate::observer::FunctionAdapter::new(f).snapshot())
    }

    #[cfg(feature = "serde")]
    pub fn save_image_to<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        each_function!(self, f => f.save_image_to(w))
    }

    #[cfg(feature = "serde")]
    pub fn load_image_from<R: std::io::Read>(&mut self, r: &mut R) -> Result<usize> {
        each_function!(self, f => f.load_image_from(r))
    }
}

/// JSON-configurable description of one integrator function:
///
/// ```json
/// { "kind": "drift_diffusion", "params": { "rate": 1.0, "threshold": 10.0 }, "seed": 0 }
/// ```
#[cfg(feature = "serde")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSpec {
    pub kind: IntegratorKind,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub seed: u64,
}

#[cfg(feature = "serde")]
impl IntegratorSpec {
    pub fn new(kind: IntegratorKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
            seed: 0,
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validates the configuration and builds the function.
    pub fn build(&self) -> Result<AnyIntegrator> {
        let p = &self.params;
        let any = match self.kind {
            IntegratorKind::Constant => AnyIntegrator::Constant(IntegratorFunction::new(configure(p)?)?),
            IntegratorKind::Accumulator => AnyIntegrator::Accumulator(IntegratorFunction::new(configure(p)?)?),
            IntegratorKind::Simple => AnyIntegrator::Simple(IntegratorFunction::new(configure(p)?)?),
            IntegratorKind::Adaptive => AnyIntegrator::Adaptive(IntegratorFunction::new(configure(p)?)?),
            IntegratorKind::DualAdaptive => AnyIntegrator::DualAdaptive(IntegratorFunction::new(configure(p)?)?),
            IntegratorKind::InteractiveActivation => {
                AnyIntegrator::InteractiveActivation(IntegratorFunction::new(configure(p)?)?)
            }
            IntegratorKind::DriftDiffusion => {
                AnyIntegrator::DriftDiffusion(IntegratorFunction::new(configure(p)?)?)
            }
            IntegratorKind::OrnsteinUhlenbeck => {
                AnyIntegrator::OrnsteinUhlenbeck(IntegratorFunction::new(configure(p)?)?)
            }
            IntegratorKind::LeakyCompeting => {
                AnyIntegrator::LeakyCompeting(IntegratorFunction::new(configure(p)?)?)
            }
            IntegratorKind::FitzHughNagumo => {
                AnyIntegrator::FitzHughNagumo(IntegratorFunction::new(configure(p)?)?)
            }
        };
        Ok(any.with_seed(self.seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_by_short_and_function_name() {
        for kind in IntegratorKind::ALL {
            assert_eq!(kind.as_str().parse::<IntegratorKind>().unwrap(), kind);
            assert_eq!(kind.function_name().parse::<IntegratorKind>().unwrap(), kind);
        }
        assert!("leaky".parse::<IntegratorKind>().is_err());
    }

    #[test]
    fn defaults_build_for_every_kind() {
        for kind in IntegratorKind::ALL {
            let mut f = AnyIntegrator::with_defaults(kind).unwrap();
            assert_eq!(f.kind(), kind);
            assert_eq!(f.name(), kind.function_name());
            let out = f.execute(&[0.5], ContextId(1)).unwrap();
            assert_eq!(out.value.len(), 1);
            assert!(!f.stateful_attributes().is_empty());
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn spec_from_json_builds_and_runs() {
        let spec = IntegratorSpec::from_json(
            r#"{ "kind": "drift_diffusion",
                 "params": { "rate": 1.0, "threshold": 10.0, "not_a_param": 3 } }"#,
        )
        .unwrap();
        let mut f = spec.build().unwrap();
        let ctx = ContextId::named("trial");
        let values: Vec<f64> = (0..4).map(|_| f.execute(&[3.0], ctx).unwrap().value[0]).collect();
        assert_eq!(values, vec![3.0, 6.0, 9.0, 10.0]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn spec_choices_and_validation() {
        let spec = IntegratorSpec::new(IntegratorKind::FitzHughNagumo).with_param("integration_method", "EULER");
        let f = spec.build().unwrap();
        assert_eq!(
            f.get_param("integration_method", None),
            Some(ParamValue::Choice("EULER".to_string()))
        );

        let bad = IntegratorSpec::new(IntegratorKind::DualAdaptive).with_param("operation", "ratio");
        assert!(matches!(bad.build().unwrap_err(), IntegratorError::UnknownVariant { .. }));

        let out_of_range = IntegratorSpec::new(IntegratorKind::Adaptive).with_param("rate", 1.5);
        assert!(out_of_range.build().unwrap_err().is_configuration());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn kind_serializes_to_short_name() {
        let json = serde_json::to_string(&IntegratorSpec::new(IntegratorKind::LeakyCompeting)).unwrap();
        assert!(json.contains("\"leaky_competing\""));
        let back: IntegratorSpec = serde_json::from_str(r#"{"kind":"OrnsteinUhlenbeckIntegrator"}"#).unwrap();
        assert_eq!(back.kind, IntegratorKind::OrnsteinUhlenbeck);
    }
}
