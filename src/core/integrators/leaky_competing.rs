use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, require_within, ParamRole, ParamSpec,
    ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, scalar_param, value_state, ValueState};

/// Leaky competing accumulator, one Euler step per call:
///
/// `previous + (rate * previous + variable) * dt + noise * sqrt(dt) + offset`
///
/// `rate` acts as the leak (negative values decay). Lateral inhibition is
/// expected to arrive already folded into `variable`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyCompetingIntegrator {
    pub rate: ParamValue,
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub time_step_size: f64,
    pub initializer: ParamValue,
}

impl Default for LeakyCompetingIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            time_step_size: 0.1,
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl LeakyCompetingIntegrator {
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

    pub fn with_time_step_size(mut self, dt: f64) -> Self {
        self.time_step_size = dt;
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
        let dt = self.time_step_size;
        let sqrt_dt = dt.sqrt();
        Ok(AffineStep::from_fn(len, |i| {
            (1.0 + rate.at(i) * dt, dt, noise[i] * sqrt_dt + offset.at(i))
        }))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::noise("noise"),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::numeric("time_step_size"),
    ParamSpec::initializer("initializer"),
];

impl Integrator for LeakyCompetingIntegrator {
    type State = ValueState;
    const NAME: &'static str = "LeakyCompetingIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "noise" => Some(self.noise.clone()),
            "offset" => Some(self.offset.clone()),
            "time_step_size" => Some(ParamValue::Scalar(self.time_step_size)),
            "initializer" => Some(self.initializer.clone()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "noise" => self.noise = value,
            "offset" => self.offset = value,
            "time_step_size" => self.time_step_size = scalar_param(Self::NAME, "time_step_size", &value)?,
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
        require_within(
            Self::NAME,
            "time_step_size",
            &ParamValue::Scalar(self.time_step_size),
            0.0,
            f64::MAX,
            "a non-negative step",
        )?;
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
    use crate::integrators::test_support::all_close;

    #[test]
    fn euler_step_with_leak() {
        let k = LeakyCompetingIntegrator::default()
            .with_rate(-0.5)
            .with_initializer(vec![1.0, 2.0]);
        let mut f = IntegratorFunction::new(k).unwrap();
        let out = f.execute(&[1.0, 0.0], ContextId(1)).unwrap();
        // p + (r p + x) dt
        assert!(all_close(&out.value, &[1.0 + (-0.5 + 1.0) * 0.1, 2.0 + (-1.0) * 0.1]));
    }

    #[test]
    fn constant_noise_scales_with_sqrt_dt() {
        let k = LeakyCompetingIntegrator::default()
            .with_rate(0.0)
            .with_noise(1.0)
            .with_time_step_size(0.25);
        let mut f = IntegratorFunction::new(k).unwrap();
        let out = f.execute(&[0.0], ContextId(1)).unwrap();
        assert!(all_close(&out.value, &[0.5]));
    }

    #[test]
    fn negative_time_step_is_rejected() {
        let k = LeakyCompetingIntegrator::default().with_time_step_size(-0.1);
        assert!(IntegratorFunction::new(k).is_err());
    }
}
