use crate::dispatch::AffineStep;
use crate::error::{IntegratorError, Result};
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_numeric, require_plain_scalar, require_within, ParamRole, ParamSpec,
    ParamValue,
};
use crate::prng::Prng;

use super::{commit_timed, scalar_param, timed_state, TimedState};

/// Ornstein-Uhlenbeck process, one Euler-Maruyama step per call:
///
/// `previous + (decay * previous - rate * variable) * dt + sqrt(dt * noise) * N(0, 1) + offset`
///
/// The Gaussian sample is shared by every element; time advances by
/// `time_step_size`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrnsteinUhlenbeckIntegrator {
    pub rate: ParamValue,
    pub decay: ParamValue,
    /// Variance scale of the diffusion term; must be one plain number.
    pub noise: ParamValue,
    pub offset: ParamValue,
    pub time_step_size: f64,
    pub starting_point: f64,
    pub initializer: ParamValue,
}

impl Default for OrnsteinUhlenbeckIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            decay: ParamValue::Scalar(1.0),
            noise: ParamValue::Scalar(0.0),
            offset: ParamValue::Scalar(0.0),
            time_step_size: 1.0,
            starting_point: 0.0,
            initializer: ParamValue::Scalar(0.0),
        }
    }
}

impl OrnsteinUhlenbeckIntegrator {
    pub fn with_rate(mut self, rate: impl Into<ParamValue>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_decay(mut self, decay: impl Into<ParamValue>) -> Self {
        self.decay = decay.into();
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

    pub fn with_starting_point(mut self, t0: f64) -> Self {
        self.starting_point = t0;
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = initializer.into();
        self
    }

    fn affine(&self, len: usize, rng: &mut Prng) -> Result<AffineStep> {
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let decay = self.decay.coefficient(Self::NAME, "decay", len)?;
        let offset = self.offset.coefficient(Self::NAME, "offset", len)?;
        let dt = self.time_step_size;
        let noise = self.noise.as_scalar().unwrap_or(0.0);
        let diffusion = (dt * noise).sqrt() * rng.next_gaussian();
        Ok(AffineStep::from_fn(len, |i| {
            (1.0 + decay.at(i) * dt, -rate.at(i) * dt, diffusion + offset.at(i))
        })
        .with_time(dt))
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::numeric("decay"),
    ParamSpec::numeric("noise"),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::numeric("time_step_size"),
    ParamSpec::initializer("starting_point"),
    ParamSpec::initializer("initializer"),
];

impl Integrator for OrnsteinUhlenbeckIntegrator {
    type State = TimedState;
    const NAME: &'static str = "OrnsteinUhlenbeckIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "rate" => Some(self.rate.clone()),
            "decay" => Some(self.decay.clone()),
            "noise" => Some(self.noise.clone()),
            "offset" => Some(self.offset.clone()),
            "time_step_size" => Some(ParamValue::Scalar(self.time_step_size)),
            "starting_point" => Some(ParamValue::Scalar(self.starting_point)),
            "initializer" => Some(self.initializer.clone()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "decay" => self.decay = value,
            "noise" => self.noise = value,
            "offset" => self.offset = value,
            "time_step_size" => self.time_step_size = scalar_param(Self::NAME, "time_step_size", &value)?,
            "starting_point" => self.starting_point = scalar_param(Self::NAME, "starting_point", &value)?,
            "initializer" => self.initializer = value,
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "rate", &self.rate)?;
        require_numeric(Self::NAME, "decay", &self.decay)?;
        require_plain_scalar(Self::NAME, "noise", &self.noise)?;
        if self.noise.as_scalar().is_some_and(|n| n < 0.0) {
            return Err(IntegratorError::OutOfRange {
                function: Self::NAME,
                param: "noise",
                value: self.noise.to_string(),
                expected: "a non-negative variance",
            });
        }
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
        require_numeric(Self::NAME, "starting_point", &ParamValue::Scalar(self.starting_point))?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("decay", &self.decay),
                ("offset", &self.offset),
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
        let affine = self.affine(variable.len(), rng)?;
        let value = affine.apply(&state.previous_value, variable);
        Ok(commit_timed(state, value, &affine))
    }

    fn lower(&self, _state: &TimedState, variable: &[f64], rng: &mut Prng) -> Result<Option<AffineStep>> {
        self.affine(variable.len(), rng).map(Some)
    }

    fn commit_affine(&self, state: &TimedState, value: Vec<f64>, step: &AffineStep) -> Option<(TimedState, StepOutput)> {
        Some(commit_timed(state, value, step))
    }
}
