use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, require_within, ParamRole, ParamSpec,
    ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, value_state, ValueState};

/// Exponentially weighted moving average:
/// `(1 - rate) * previous + rate * variable + noise + offset`.
///
/// `rate` must lie in `[0, 1]`, elementwise when it is a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveIntegrator {
    pub rate: ParamValue,
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub initializer: ParamValue,
}

impl Default for AdaptiveIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl AdaptiveIntegrator {
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
        Ok(AffineStep::from_fn(len, |i| {
            let r = rate.at(i);
            (1.0 - r, r, noise[i] + offset.at(i))
        }))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::noise("noise"),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::initializer("initializer"),
];

impl Integrator for AdaptiveIntegrator {
    type State = ValueState;
    const NAME: &'static str = "AdaptiveIntegrator";

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
        require_within(Self::NAME, "rate", &self.rate, 0.0, 1.0, "values in [0, 1]")?;
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
    use crate::error::IntegratorError;
    use crate::integrator::IntegratorFunction;

    #[test]
    fn converges_towards_input() {
        let mut f = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(0.5)).unwrap();
        let ctx = ContextId(1);
        let outs: Vec<f64> = (0..3)
            .map(|_| f.execute(&[10.0], ctx).unwrap().value[0])
            .collect();
        assert_eq!(outs, vec![5.0, 7.5, 8.75]);
    }

    #[test]
    fn rate_outside_unit_interval_is_rejected() {
        for bad in [1.5, -0.1] {
            let err = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(bad)).unwrap_err();
            match err {
                IntegratorError::OutOfRange { function, param, .. } => {
                    assert_eq!(function, "AdaptiveIntegrator");
                    assert_eq!(param, "rate");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
        let err = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(vec![0.2, 1.2])).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rate_one_tracks_input_exactly() {
        let mut f = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
        let ctx = ContextId(1);
        assert_eq!(f.execute(&[3.0, -2.0], ctx).unwrap().value, vec![3.0, -2.0]);
        assert_eq!(f.execute(&[1.0, 1.0], ctx).unwrap().value, vec![1.0, 1.0]);
    }
}
