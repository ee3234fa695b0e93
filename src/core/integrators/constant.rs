use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, ParamRole, ParamSpec, ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, value_state, ValueState};

/// Integrates a constant drift, ignoring the input:
/// `(previous + rate + noise) * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantIntegrator {
    pub rate: ParamValue,
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub scale: ParamValue,
    pub initializer: ParamValue,
}

impl Default for ConstantIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(0.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            scale: ParamValue::Scalar(1.0),
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl ConstantIntegrator {
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

    pub fn with_scale(mut self, scale: impl Into<ParamValue>) -> Self {
        self.scale = scale.into();
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = initializer.into();
        self
    }

    fn affine(&self, len: usize, rng: &mut Prng) -> Result<AffineStep> {
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let scale = self.scale.coefficient(Self::NAME, "scale", len)?;
        let offset = self.offset.coefficient(Self::NAME, "offset", len)?;
        let noise = self.noise.sample_noise(Self::NAME, "noise", len, rng)?;
        Ok(AffineStep::from_fn(len, |i| {
            let s = scale.at(i);
            (s, 0.0, (rate.at(i) + noise[i]) * s + offset.at(i))
        }))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Additive),
    ParamSpec::noise("noise"),
    ParamSpec::numeric("offset"),
    ParamSpec::numeric("scale").with_role(ParamRole::Multiplicative),
    ParamSpec::initializer("initializer"),
];

impl Integrator for ConstantIntegrator {
    type State = ValueState;
    const NAME: &'static str = "ConstantIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "noise" => Some(self.noise.clone()),
            "offset" => Some(self.offset.clone()),
            "scale" => Some(self.scale.clone()),
            "initializer" => Some(self.initializer.clone()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "noise" => self.noise = value,
            "offset" => self.offset = value,
            "scale" => self.scale = value,
            "initializer" => self.initializer = value,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "rate", &self.rate)?;
        require_noise(Self::NAME, "noise", &self.noise)?;
        require_numeric(Self::NAME, "offset", &self.offset)?;
        require_numeric(Self::NAME, "scale", &self.scale)?;
        require_numeric(Self::NAME, "initializer", &self.initializer)?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("noise", &self.noise),
                ("offset", &self.offset),
                ("scale", &self.scale),
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

    #[test]
    fn ignores_input_and_adds_rate() {
        let mut f = IntegratorFunction::new(ConstantIntegrator::default().with_rate(0.5)).unwrap();
        let ctx = ContextId(1);
        assert_eq!(f.execute(&[100.0], ctx).unwrap().value, vec![0.5]);
        assert_eq!(f.execute(&[-7.0], ctx).unwrap().value, vec![1.0]);
    }

    #[test]
    fn zero_rate_holds_value() {
        let mut f = IntegratorFunction::new(ConstantIntegrator::default().with_initializer(2.0)).unwrap();
        let ctx = ContextId(1);
        for x in [1.0, -3.0, 50.0] {
            assert_eq!(f.execute(&[x], ctx).unwrap().value, vec![2.0]);
        }
    }

    #[test]
    fn scale_and_offset_apply_after_rate() {
        let k = ConstantIntegrator::default()
            .with_rate(1.0)
            .with_scale(2.0)
            .with_offset(0.5)
            .with_initializer(1.0);
        let mut f = IntegratorFunction::new(k).unwrap();
        // (1 + 1) * 2 + 0.5
        assert_eq!(f.execute(&[0.0], ContextId(1)).unwrap().value, vec![4.5]);
    }

    #[test]
    fn role_aliases() {
        let f = IntegratorFunction::new(ConstantIntegrator::default().with_scale(3.0)).unwrap();
        assert_eq!(f.get_param("multiplicative_param", None), Some(ParamValue::Scalar(3.0)));
        assert_eq!(f.get_param("additive_param", None), Some(ParamValue::Scalar(0.0)));
    }
}
