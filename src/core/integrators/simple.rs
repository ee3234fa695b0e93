use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, ParamRole, ParamSpec, ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, value_state, ValueState};

/// Plain running sum: `previous + variable * rate + noise + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleIntegrator {
    pub rate: ParamValue,
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub initializer: ParamValue,
}

impl Default for SimpleIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl SimpleIntegrator {
    pub fn with_rate(mut self, rate: impl Into<ParamValue>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_noise(mut self, noise: impl Into<ParamValue>) -> Self {
        self.noise = noise.into();
        self
    }

    pub fn with_offset(mut self, offset: impl Into<ParamValue>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = initializer.into();
        self
    }

    fn affine(&self, len: usize, rng: &mut Prng) -> Result<AffineStep> {
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let offset = self.offset.coefficient(Self::NAME, "offset", len)?;
        let noise = self.noise.sample_noise(Self::NAME, "noise", len, rng)?;
        Ok(AffineStep::from_fn(len, |i| (1.0, rate.at(i), noise[i] + offset.at(i))))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::noise("noise"),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::initializer("initializer"),
];

impl Integrator for SimpleIntegrator {
    type State = ValueState;
    const NAME: &'static str = "SimpleIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "noise" => Some(self.noise.clone()),
            "offset" => Some(self.offset.clone()),
            "initializer" => Some(self.initializer.clone()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "noise" => self.noise = value,
            "offset" => self.offset = value,
            "initializer" => self.initializer = value,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "rate", &self.rate)?;
        require_noise(Self::NAME, "noise", &self.noise)?;
        require_numeric(Self::NAME, "offset", &self.offset)?;
        require_numeric(Self::NAME, "initializer", &self.initializer)?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("noise", &self.noise),
                ("offset", &self.offset),
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
    use crate::param::Distribution;

    #[test]
    fn accumulates_scaled_input() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(0.5).with_offset(1.0)).unwrap();
        let ctx = ContextId(1);
        assert_eq!(f.execute(&[4.0], ctx).unwrap().value, vec![3.0]);
        assert_eq!(f.execute(&[4.0], ctx).unwrap().value, vec![6.0]);
    }

    #[test]
    fn vector_variable_with_vector_rate() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(
            f.execute(&[1.0, 1.0, 1.0], ContextId(1)).unwrap().value,
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn sampled_noise_is_reproducible_per_seed() {
        let k = SimpleIntegrator::default().with_noise(Distribution::Uniform { low: -1.0, high: 1.0 });
        let mut a = IntegratorFunction::new(k.clone()).unwrap().with_seed(3);
        let mut b = IntegratorFunction::new(k).unwrap().with_seed(3);
        let ctx = ContextId(7);
        for _ in 0..5 {
            let va = a.execute(&[0.0, 0.0], ctx).unwrap().value;
            let vb = b.execute(&[0.0, 0.0], ctx).unwrap().value;
            assert_eq!(va, vb);
            assert!(va.iter().all(|v| v.abs() <= 5.0));
        }
    }

    #[test]
    fn rejects_non_numeric_rate() {
        let err = IntegratorFunction::new(SimpleIntegrator::default().with_rate("fast")).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.param(), Some("rate"));
    }
}
