use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, ParamRole, ParamSpec, ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, value_state, ValueState};

/// Geometric accumulation independent of the input:
/// `previous * rate + noise + increment`.
///
/// `rate` defaults to 1 (pure accumulation) and `increment` to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorIntegrator {
    pub rate: ParamValue,
    pub increment: ParamValue,
    pub noise: ParamValue,
    pub initializer: ParamValue,
}

impl Default for AccumulatorIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            increment: ParamValue::Scalar(0.0),
            noise: ParamValue::Scalar(0.0),
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl AccumulatorIntegrator {
    pub fn with_rate(mut self, rate: impl Into<ParamValue>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_increment(mut self, increment: impl Into<ParamValue>) -> Self {
        self.increment = increment.into();
        self
    }

    pub fn with_noise(mut self, noise: impl Into<ParamValue>) -> Self {
        self.noise = noise.into();
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = initializer.into();
        self
    }

    fn affine(&self, len: usize, rng: &mut Prng) -> Result<AffineStep> {
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let increment = self.increment.coefficient(Self::NAME, "increment", len)?;
        let noise = self.noise.sample_noise(Self::NAME, "noise", len, rng)?;
        Ok(AffineStep::from_fn(len, |i| (rate.at(i), 0.0, noise[i] + increment.at(i))))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::numeric("increment").with_role(ParamRole::Additive),
    ParamSpec::noise("noise"),
    ParamSpec::initializer("initializer"),
];

impl Integrator for AccumulatorIntegrator {
    type State = ValueState;
    const NAME: &'static str = "AccumulatorIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "increment" => Some(self.increment.clone()),
            "noise" => Some(self.noise.clone()),
            "initializer" => Some(self.initializer.clone()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "increment" => self.increment = value,
            "noise" => self.noise = value,
            "initializer" => self.initializer = value,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "rate", &self.rate)?;
        require_numeric(Self::NAME, "increment", &self.increment)?;
        require_noise(Self::NAME, "noise", &self.noise)?;
        require_numeric(Self::NAME, "initializer", &self.initializer)?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("increment", &self.increment),
                ("noise", &self.noise),
                ("initializer", &self.initializer),
            ],
        )?;
        Ok(())
    }

    fn initializers(&self) -> &'static [&'static str] {
        &["initializer"]
    }

    fn initial_state(&self, len: usize) -> Result<ValueState> {
        value_state(Self::NAME, &self.initializer, len)
    }

    fn output(&self, state: &ValueState) -> Result<StepOutput> {
        Ok(StepOutput::value(state.previous_value.clone()))
    }

    fn step(&self, state: &ValueState, variable: &[f64], rng: &mut Prng) -> Result<(ValueState, StepOutput)> {
        let affine = self.affine(variable.len(), rng)?;
        let value = affine.apply(&state.previous_value, variable);
        Ok(commit_value(value))
    }

    fn lower(&self, _state: &ValueState, variable: &[f64], rng: &mut Prng) -> Result<Option<AffineStep>> {
        self.affine(variable.len(), rng).map(Some)
    }

    fn commit_affine(&self, _state: &ValueState, value: Vec<f64>, _step: &AffineStep) -> Option<(ValueState, StepOutput)> {
        Some(commit_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextId;
    use crate::integrator::IntegratorFunction;
    use crate::integrators::test_support::close;

    #[test]
    fn decays_and_increments() {
        let k = AccumulatorIntegrator::default().with_rate(0.9).with_increment(1.0);
        let mut f = IntegratorFunction::new(k).unwrap();
        let ctx = ContextId(1);
        assert_eq!(f.execute(&[0.0], ctx).unwrap().value, vec![1.0]);
        let second = f.execute(&[0.0], ctx).unwrap().first().unwrap();
        assert!(close(second, 1.9));
    }

    #[test]
    fn defaults_hold_value() {
        let mut f = IntegratorFunction::new(AccumulatorIntegrator::default().with_initializer(3.0)).unwrap();
        assert_eq!(f.execute(&[42.0], ContextId(1)).unwrap().value, vec![3.0]);
    }

    #[test]
    fn vector_rate_is_elementwise() {
        let k = AccumulatorIntegrator::default()
            .with_rate(vec![1.0, 0.5])
            .with_initializer(vec![2.0, 2.0]);
        let mut f = IntegratorFunction::new(k).unwrap();
        assert_eq!(f.execute(&[0.0, 0.0], ContextId(1)).unwrap().value, vec![2.0, 1.0]);
        assert!(f.execute(&[0.0, 0.0, 0.0], ContextId(2)).is_err());
    }
}
