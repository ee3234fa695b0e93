use crate::error::Result;
use crate::integrator::{Integrator, StepOutput};
use crate::param::{
    require_consistent_lengths, require_noise, require_numeric, require_within, ParamRole, ParamSpec,
    ParamValue,
};
use crate::prng::Prng;

use super::{commit_value, value_state, ValueState};

/// Interactive-activation update, pulling towards `max_val` on positive input,
/// towards `min_val` on negative input, and decaying towards `rest`:
///
/// `previous + rate * (variable + noise) * distance - decay * (previous - rest)`
///
/// where `distance` is `max_val - previous` for positive input,
/// `previous - min_val` for negative input and zero otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractiveActivationIntegrator {
    pub rate: ParamValue,
    pub decay: ParamValue,
    pub rest: ParamValue,
    pub max_val: ParamValue,
    pub min_val: ParamValue,
    pub noise: ParamValue,
    /// Starting value; `rest` when unset.
    pub initializer: Option<ParamValue>,
}

impl Default for InteractiveActivationIntegrator {
    fn default() -> Self {
        Self {
            rate: ParamValue::Scalar(1.0),
            decay: ParamValue::Scalar(0.0),
            rest: ParamValue::Scalar(0.0),
            max_val: ParamValue::Scalar(1.0),
            min_val: ParamValue::Scalar(-1.0),
            noise: ParamValue::Scalar(0.0),
            initializer: None,
        }
    }
}

impl InteractiveActivationIntegrator {
    pub fn with_rate(mut self, rate: impl Into<ParamValue>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_decay(mut self, decay: impl Into<ParamValue>) -> Self {
        self.decay = decay.into();
        self
    }

    pub fn with_rest(mut self, rest: impl Into<ParamValue>) -> Self {
        self.rest = rest.into();
        self
    }

    pub fn with_bounds(mut self, min_val: impl Into<ParamValue>, max_val: impl Into<ParamValue>) -> Self {
        self.min_val = min_val.into();
        self.max_val = max_val.into();
        self
    }

    pub fn with_noise(mut self, noise: impl Into<ParamValue>) -> Self {
        self.noise = noise.into();
        self
    }

    pub fn with_initializer(mut self, initializer: impl Into<ParamValue>) -> Self {
        self.initializer = Some(initializer.into());
        self
    }

    fn initializer(&self) -> &ParamValue {
        self.initializer.as_ref().unwrap_or(&self.rest)
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::numeric("decay"),
    ParamSpec::numeric("rest"),
    ParamSpec::numeric("max_val"),
    ParamSpec::numeric("min_val"),
    ParamSpec::noise("noise"),
    ParamSpec::initializer("initializer"),
];

impl Integrator for InteractiveActivationIntegrator {
    type State = ValueState;
    const NAME: &'static str = "InteractiveActivationIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "rate" => &self.rate,
            "decay" => &self.decay,
            "rest" => &self.rest,
            "max_val" => &self.max_val,
            "min_val" => &self.min_val,
            "noise" => &self.noise,
            "initializer" => self.initializer(),
            _ => return None,
        };
        Some(value.clone())
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "rate" => self.rate = value,
            "decay" => self.decay = value,
            "rest" => self.rest = value,
            "max_val" => self.max_val = value,
            "min_val" => self.min_val = value,
            "noise" => self.noise = value,
            "initializer" => self.initializer = Some(value),
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_within(Self::NAME, "rate", &self.rate, 0.0, 1.0, "values in [0, 1]")?;
        require_within(Self::NAME, "decay", &self.decay, 0.0, 1.0, "values in [0, 1]")?;
        require_numeric(Self::NAME, "rest", &self.rest)?;
        require_numeric(Self::NAME, "max_val", &self.max_val)?;
        require_numeric(Self::NAME, "min_val", &self.min_val)?;
        require_noise(Self::NAME, "noise", &self.noise)?;
        require_numeric(Self::NAME, "initializer", self.initializer())?;
        require_consistent_lengths(
            Self::NAME,
            &[
                ("rate", &self.rate),
                ("decay", &self.decay),
                ("rest", &self.rest),
                ("max_val", &self.max_val),
                ("min_val", &self.min_val),
                ("noise", &self.noise),
                ("initializer", self.initializer()),
            ],
        )?;
        Ok(())
    }

    fn initializers(&self) -> &'static [&'static str] {
        &["initializer"]
    }

    fn initial_state(&self, len: usize) -> Result<ValueState> {
        value_state(Self::NAME, self.initializer(), len)
    }

    fn output(&self, state: &ValueState) -> Result<StepOutput> {
        Ok(StepOutput::value(state.previous_value.clone()))
    }

    fn step(&self, state: &ValueState, variable: &[f64], rng: &mut Prng) -> Result<(ValueState, StepOutput)> {
        let len = variable.len();
        let rate = self.rate.coefficient(Self::NAME, "rate", len)?;
        let decay = self.decay.coefficient(Self::NAME, "decay", len)?;
        let rest = self.rest.coefficient(Self::NAME, "rest", len)?;
        let max_val = self.max_val.coefficient(Self::NAME, "max_val", len)?;
        let min_val = self.min_val.coefficient(Self::NAME, "min_val", len)?;
        let noise = self.noise.sample_noise(Self::NAME, "noise", len, rng)?;

        let value = (0..len)
            .map(|i| {
                let p = state.previous_value[i];
                let x = variable[i];
                let distance = if x > 0.0 {
                    max_val.at(i) - p
                } else if x < 0.0 {
                    p - min_val.at(i)
                } else {
                    0.0
                };
                p + rate.at(i) * (x + noise[i]) * distance - decay.at(i) * (p - rest.at(i))
            })
            .collect();
        Ok(commit_value(value))
    }
}
