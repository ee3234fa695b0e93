use crate::error::{IntegratorError, Result};
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_numeric, require_plain_scalar, require_within, ParamRole, ParamSpec,
    ParamValue,
};
use crate::prng::Prng;

use super::{scalar_param, timed_state, TimedState};

/// Biased random walk towards a symmetric decision threshold:
///
/// `previous + rate * variable * dt + sqrt(dt * noise) * N(0, 1)`
///
/// One Gaussian sample is drawn per call and shared by every element. Each
/// element whose walk reaches `|threshold|` is pinned to `±threshold`; the
/// others receive `offset`. Time advances by `time_step_size` every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftDiffusionIntegrator {
    pub rate: ParamValue,
    /// Variance scale of the diffusion term; must be one plain number.
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub starting_point: f64,
    pub threshold: ParamValue,
    pub time_step_size: f64,
    pub initializer: ParamValue,
}

impl Default for DriftDiffusionIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            starting_point: 0.0,
            threshold: ParamValue::Scalar(100.0),
            time_step_size: 1.0,
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl DriftDiffusionIntegrator {
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

    pub fn with_threshold(mut self, threshold: impl Into<ParamValue>) -> Self {
        self.threshold = threshold.into();
        self
    }

    pub fn with_time_step_size(mut self, dt: f64) -> Self {
        self.time_step_size = dt;
        self
    }

    pub fn with_starting_point(mut self, t0: f64) -> Self {
        self.starting_point = t0;
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = initializer.into();
        self
    }

    fn noise_scale(&self) -> f64 {
        self.noise.as_scalar().unwrap_or(0.0)
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::numeric("noise"),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::initializer("starting_point"),
    ParamSpec::numeric("threshold"),
    ParamSpec::numeric("time_step_size"),
    ParamSpec::initializer("initializer"),
];

impl Integrator for DriftDiffusionIntegrator {
    type State = TimedState;
    const NAME: &'static str = "DriftDiffusionIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "noise" => Some(self.noise.clone()),
            "offset" => Some(self.offset.clone()),
            "starting_point" => Some(ParamValue::Scalar(self.starting_point)),
            "threshold" => Some(self.threshold.clone()),
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
            "starting_point" => self.starting_point = scalar_param(Self::NAME, "starting_point", &value)?,
            "threshold" => self.threshold = value,
            "time_step_size" => self.time_step_size = scalar_param(Self::NAME, "time_step_size", &value)?,
            "initializer" => self.initializer = value,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "rate", &self.rate)?;
        require_plain_scalar(Self::NAME, "noise", &self.noise)?;
        if self.noise_scale() < 0.0 {
            return Err(IntegratorError::OutOfRange {
                function: Self::NAME,
                param: "noise",
                value: self.noise.to_string(),
                expected: "a non-negative variance",
            });
        }
        require_numeric(Self::NAME, "offset", &self.offset)?;
        require_numeric(Self::NAME, "threshold", &self.threshold)?;
        require_numeric(Self::NAME, "initializer", &self.initializer)?;
        require_within(
            Self::NAME,
            "time_step_size",
            &ParamValue::Scalar(self.time_step_size),
            0.0,
            f64::MAX,
            "a non-negative step",
        )?;
        require_numeric(Self::NAME, "starting_point", &ParamValue::Scalar(self.starting_point))?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("offset", &self.offset),
                ("threshold", &self.threshold),
                ("initializer", &self.initializer),
            ],
        )?;
        Ok(())
    }

    fn initializers(&self) -> &'static [&'static str] {
        &["initializer", "starting_point"]
    }

    fn initial_state(&self, len: usize) -> Result<TimedState> {
        timed_state(Self::NAME, &self.initializer, self.starting_point, len)
    }

    fn output(&self, state: &TimedState) -> Result<StepOutput> {
        Ok(StepOutput::timed(state.previous_value.clone(), state.previous_time))
    }

    fn step(&self, state: &TimedState, variable: &[f64], rng: &mut Prng) -> Result<(TimedState, StepOutput)> {
        let len = variable.len();
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let offset = self.offset.coefficient(Self::NAME, "offset", len)?;
        let threshold = self.threshold.coefficient(Self::NAME, "threshold", len)?;
        let dt = self.time_step_size;
        let diffusion = (dt * self.noise_scale()).sqrt() * rng.next_gaussian();

        let value: Vec<f64> = (0..len)
            .map(|i| {
                let walked = state.previous_value[i] + rate.at(i) * variable[i] * dt + diffusion;
                let bound = threshold.at(i).abs();
                if walked.abs() >= bound {
                    bound.copysign(walked)
                } else {
                    walked + offset.at(i)
                }
            })
            .collect();
        let time = state.previous_time + dt;
        let out = StepOutput::timed(value.clone(), time);
        Ok((
            TimedState {
                previous_value: value,
                previous_time: time,
            },
            out,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextId;
    use crate::integrator::IntegratorFunction;
    use crate::param::Distribution;

    #[test]
    fn clamps_at_threshold() {
        let k = DriftDiffusionIntegrator::default().with_threshold(10.0);
        let mut f = IntegratorFunction::new(k).unwrap();
        let ctx = ContextId(1);
        let values: Vec<f64> = (0..5).map(|_| f.execute(&[3.0], ctx).unwrap().value[0]).collect();
        assert_eq!(values, vec![3.0, 6.0, 9.0, 10.0, 10.0]);
        assert_eq!(f.state(ctx).unwrap().previous_time, 5.0);
    }

    #[test]
    fn negative_drift_clamps_to_negative_threshold() {
        let k = DriftDiffusionIntegrator::default().with_threshold(2.0).with_rate(0.5);
        let mut f = IntegratorFunction::new(k).unwrap();
        let ctx = ContextId(1);
        for _ in 0..10 {
            f.execute(&[-1.0], ctx).unwrap();
        }
        assert_eq!(f.state(ctx).unwrap().previous_value, vec![-2.0]);
    }

    #[test]
    fn clamping_is_per_element() {
        let k = DriftDiffusionIntegrator::default().with_threshold(5.0).with_offset(0.5);
        let mut f = IntegratorFunction::new(k).unwrap();
        let out = f.execute(&[6.0, 1.0], ContextId(1)).unwrap();
        assert_eq!(out.value, vec![5.0, 1.5]);
        assert_eq!(out.time, Some(1.0));
    }

    #[test]
    fn noise_must_be_a_plain_number() {
        let vector = DriftDiffusionIntegrator::default().with_noise(vec![0.1, 0.2]);
        assert!(matches!(
            IntegratorFunction::new(vector).unwrap_err(),
            IntegratorError::InvalidType { param: "noise", .. }
        ));
        let sampler = DriftDiffusionIntegrator::default().with_noise(Distribution::Normal {
            mean: 0.0,
            standard_deviation: 1.0,
        });
        assert!(IntegratorFunction::new(sampler).is_err());
    }

    #[test]
    fn shared_gaussian_moves_every_element_equally() {
        let k = DriftDiffusionIntegrator::default().with_noise(1.0).with_rate(0.0);
        let mut f = IntegratorFunction::new(k).unwrap().with_seed(11);
        let out = f.execute(&[0.0, 0.0, 0.0], ContextId(1)).unwrap();
        assert!(out.value.windows(2).all(|w| w[0] == w[1]));
        assert!(out.value[0] != 0.0);
    }

    #[test]
    fn starting_point_sets_the_clock() {
        let k = DriftDiffusionIntegrator::default()
            .with_starting_point(2.0)
            .with_time_step_size(0.5);
        let mut f = IntegratorFunction::new(k).unwrap();
        assert_eq!(f.execute(&[0.0], ContextId(1)).unwrap().time, Some(2.5));
    }

    #[test]
    fn negative_time_step_is_rejected() {
        let k = DriftDiffusionIntegrator::default().with_noise(1.0).with_time_step_size(-1.0);
        let err = IntegratorFunction::new(k).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.param(), Some("time_step_size"));

        let mut f = IntegratorFunction::new(DriftDiffusionIntegrator::default().with_noise(1.0)).unwrap();
        let ctx = ContextId(1);
        assert!(f.set_param("time_step_size", -0.5, ctx).is_err());
        let out = f.execute(&[1.0], ctx).unwrap();
        assert!(out.value[0].is_finite());
    }
}
