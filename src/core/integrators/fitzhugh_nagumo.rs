use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{IntegratorError, Result};
use crate::integrator::{Integrator, StateRecord, StepOutput, TIME_ATTRIBUTE};
use crate::param::{invalid_type, require_consistent_lengths, require_numeric, ParamSpec, ParamValue};
use crate::prng::Prng;

use super::{scalar_param, seed};

/// Numerical scheme for one FitzHugh-Nagumo step. Fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum IntegrationMethod {
    /// Forward Euler.
    Euler,
    /// Classical fourth-order Runge-Kutta.
    #[default]
    Rk4,
}

impl IntegrationMethod {
    pub const EXPECTED: &'static str = "'RK4', 'EULER'";

    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationMethod::Euler => "EULER",
            IntegrationMethod::Rk4 => "RK4",
        }
    }
}

impl FromStr for IntegrationMethod {
    type Err = IntegratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EULER" => Ok(IntegrationMethod::Euler),
            "RK4" => Ok(IntegrationMethod::Rk4),
            other => Err(IntegratorError::UnknownVariant {
                function: FitzHughNagumoIntegrator::NAME,
                param: "integration_method",
                value: other.to_string(),
                expected: IntegrationMethod::EXPECTED,
            }),
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast (`v`) and slow (`w`) variables plus the clock of one context.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitzHughNagumoState {
    pub previous_v: Vec<f64>,
    pub previous_w: Vec<f64>,
    pub previous_time: f64,
}

impl StateRecord for FitzHughNagumoState {
    const ATTRIBUTES: &'static [&'static str] = &["previous_v", "previous_w", TIME_ATTRIBUTE];

    fn len(&self) -> usize {
        self.previous_v.len()
    }

    fn primary(&self) -> &[f64] {
        &self.previous_v
    }

    fn attribute(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "previous_v" => Some(self.previous_v.clone()),
            "previous_w" => Some(self.previous_w.clone()),
            TIME_ATTRIBUTE => Some(vec![self.previous_time]),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &str, values: &[f64]) -> bool {
        match (name, values) {
            ("previous_v", _) => self.previous_v = values.to_vec(),
            ("previous_w", _) => self.previous_w = values.to_vec(),
            (TIME_ATTRIBUTE, [t]) => self.previous_time = *t,
            _ => return false,
        }
        true
    }
}

/// FitzHugh-Nagumo oscillator advanced by one Euler or RK4 step per call.
///
/// ```text
/// dv/dt = (a_v v^3 + (1 + threshold) b_v v^2 - threshold c_v v + d_v + e_v w' + f_v x) / time_constant_v
/// dw/dt = (mode a_w v' + b_w w + c_w + (1 - mode) uncorrelated_activity) / time_constant_w
/// ```
///
/// `w'` and `v'` are the values stored at the start of the step; every stage
/// of the scheme couples through them rather than through the stage estimates.
/// The output value is `v`, with `w` as the recovery variable.
#[derive(Debug, Clone, PartialEq)]
pub struct FitzHughNagumoIntegrator {
    pub initial_v: ParamValue,
    pub initial_w: ParamValue,
    pub t_0: f64,
    pub time_step_size: f64,
    pub a_v: f64,
    pub b_v: f64,
    pub c_v: f64,
    pub d_v: f64,
    pub e_v: f64,
    pub f_v: f64,
    pub time_constant_v: f64,
    pub a_w: f64,
    pub b_w: f64,
    pub c_w: f64,
    pub threshold: f64,
    pub time_constant_w: f64,
    pub mode: f64,
    pub uncorrelated_activity: f64,
    pub integration_method: IntegrationMethod,
}

impl Default for FitzHughNagumoIntegrator {
    fn default() -> Self {
        Self {
            initial_v: ParamValue::Scalar(0.0),
            initial_w: ParamValue::Scalar(0.0),
            t_0: 0.0,
            time_step_size: 0.05,
            a_v: -1.0 / 3.0,
            b_v: 0.0,
            c_v: 1.0,
            d_v: 0.0,
            e_v: -1.0,
            f_v: 1.0,
            time_constant_v: 1.0,
            a_w: 1.0,
            b_w: -0.8,
            c_w: 0.7,
            threshold: -1.0,
            time_constant_w: 12.5,
            mode: 1.0,
            uncorrelated_activity: 0.0,
            integration_method: IntegrationMethod::Rk4,
        }
    }
}

impl FitzHughNagumoIntegrator {
    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.integration_method = method;
        self
    }

    pub fn with_time_step_size(mut self, dt: f64) -> Self {
        self.time_step_size = dt;
        self
    }

    pub fn with_initial(mut self, v: impl Into<ParamValue>, w: impl Into<ParamValue>) -> Self {
        self.initial_v = v.into();
        self.initial_w = w.into();
        self
    }

    pub fn with_t_0(mut self, t_0: f64) -> Self {
        self.t_0 = t_0;
        self
    }

    pub fn with_mode(mut self, mode: f64, uncorrelated_activity: f64) -> Self {
        self.mode = mode;
        self.uncorrelated_activity = uncorrelated_activity;
        self
    }

    /// Fast-variable slope at `v`, coupled through the stored `w`.
    #[inline]
    fn dv_dt(&self, v: f64, stored_w: f64, x: f64) -> f64 {
        (self.a_v * v * v * v + (1.0 + self.threshold) * self.b_v * v * v + (-self.threshold) * self.c_v * v
            + self.d_v
            + self.e_v * stored_w
            + self.f_v * x)
            / self.time_constant_v
    }

    /// Slow-variable slope at `w`, coupled through the stored `v`.
    #[inline]
    fn dw_dt(&self, w: f64, stored_v: f64) -> f64 {
        (self.mode * self.a_w * stored_v
            + self.b_w * w
            + self.c_w
            + (1.0 - self.mode) * self.uncorrelated_activity)
            / self.time_constant_w
    }

    fn euler(&self, v: f64, w: f64, x: f64) -> (f64, f64) {
        let dt = self.time_step_size;
        (v + dt * self.dv_dt(v, w, x), w + dt * self.dw_dt(w, v))
    }

    fn runge_kutta_4(&self, v: f64, w: f64, x: f64) -> (f64, f64) {
        let dt = self.time_step_size;
        let half = 0.5 * dt;

        let kv1 = self.dv_dt(v, w, x);
        let kw1 = self.dw_dt(w, v);

        let kv2 = self.dv_dt(v + half * kv1, w, x);
        let kw2 = self.dw_dt(w + half * kw1, v);

        let kv3 = self.dv_dt(v + half * kv2, w, x);
        let kw3 = self.dw_dt(w + half * kw2, v);

        let kv4 = self.dv_dt(v + dt * kv3, w, x);
        let kw4 = self.dw_dt(w + dt * kw3, v);

        (
            v + (dt / 6.0) * (kv1 + 2.0 * (kv2 + kv3) + kv4),
            w + (dt / 6.0) * (kw1 + 2.0 * (kw2 + kw3) + kw4),
        )
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::initializer("initial_v"),
    ParamSpec::initializer("initial_w"),
    ParamSpec::initializer("t_0"),
    ParamSpec::numeric("time_step_size"),
    ParamSpec::numeric("a_v"),
    ParamSpec::numeric("b_v"),
    ParamSpec::numeric("c_v"),
    ParamSpec::numeric("d_v"),
    ParamSpec::numeric("e_v"),
    ParamSpec::numeric("f_v"),
    ParamSpec::numeric("time_constant_v"),
    ParamSpec::numeric("a_w"),
    ParamSpec::numeric("b_w"),
    ParamSpec::numeric("c_w"),
    ParamSpec::numeric("threshold"),
    ParamSpec::numeric("time_constant_w"),
    ParamSpec::numeric("mode"),
    ParamSpec::numeric("uncorrelated_activity"),
    ParamSpec::choice("integration_method"),
];

impl FitzHughNagumoIntegrator {
    fn coefficient(&self, name: &str) -> Option<f64> {
        Some(match name {
            "t_0" => self.t_0,
            "time_step_size" => self.time_step_size,
            "a_v" => self.a_v,
            "b_v" => self.b_v,
            "c_v" => self.c_v,
            "d_v" => self.d_v,
            "e_v" => self.e_v,
            "f_v" => self.f_v,
            "time_constant_v" => self.time_constant_v,
            "a_w" => self.a_w,
            "b_w" => self.b_w,
            "c_w" => self.c_w,
            "threshold" => self.threshold,
            "time_constant_w" => self.time_constant_w,
            "mode" => self.mode,
            "uncorrelated_activity" => self.uncorrelated_activity,
            _ => return None,
        })
    }

    fn coefficient_mut(&mut self, name: &str) -> Option<&mut f64> {
        Some(match name {
            "t_0" => &mut self.t_0,
            "time_step_size" => &mut self.time_step_size,
            "a_v" => &mut self.a_v,
            "b_v" => &mut self.b_v,
            "c_v" => &mut self.c_v,
            "d_v" => &mut self.d_v,
            "e_v" => &mut self.e_v,
            "f_v" => &mut self.f_v,
            "time_constant_v" => &mut self.time_constant_v,
            "a_w" => &mut self.a_w,
            "b_w" => &mut self.b_w,
            "c_w" => &mut self.c_w,
            "threshold" => &mut self.threshold,
            "time_constant_w" => &mut self.time_constant_w,
            "mode" => &mut self.mode,
            "uncorrelated_activity" => &mut self.uncorrelated_activity,
            _ => return None,
        })
    }
}

impl Integrator for FitzHughNagumoIntegrator {
    type State = FitzHughNagumoState;
    const NAME: &'static str = "FitzHughNagumoIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        match name {
            "initial_v" => Some(self.initial_v.clone()),
            "initial_w" => Some(self.initial_w.clone()),
            "integration_method" => Some(ParamValue::Choice(self.integration_method.as_str().to_string())),
            other => self.coefficient(other).map(ParamValue::Scalar),
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "initial_v" => self.initial_v = value,
            "initial_w" => self.initial_w = value,
            "integration_method" => {
                let choice = value.as_choice().ok_or_else(|| {
                    invalid_type(Self::NAME, "integration_method", &value, IntegrationMethod::EXPECTED)
                })?;
                self.integration_method = choice.parse()?;
            }
            other => {
                let parsed = SPECS
                    .iter()
                    .find(|s| s.name == other)
                    .map(|s| scalar_param(Self::NAME, s.name, &value))
                    .transpose()?;
                if let (Some(parsed), Some(slot)) = (parsed, self.coefficient_mut(other)) {
                    *slot = parsed;
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_numeric(Self::NAME, "initial_v", &self.initial_v)?;
        require_numeric(Self::NAME, "initial_w", &self.initial_w)?;
        require_consistent_lengths(
            Self::NAME,
            &[("initial_v", &self.initial_v), ("initial_w", &self.initial_w)],
        )?;
        for spec in SPECS {
            if let Some(v) = self.coefficient(spec.name) {
                require_numeric(Self::NAME, spec.name, &ParamValue::Scalar(v))?;
            }
        }
        for (name, tau) in [
            ("time_constant_v", self.time_constant_v),
            ("time_constant_w", self.time_constant_w),
        ] {
            if tau == 0.0 {
                return Err(IntegratorError::OutOfRange {
                    function: Self::NAME,
                    param: name,
                    value: tau.to_string(),
                    expected: "a non-zero time constant",
                });
            }
        }
        Ok(())
    }

    fn initializers(&self) -> &'static [&'static str] {
        &["initial_v", "initial_w", "t_0"]
    }

    fn initial_state(&self, len: usize) -> Result<FitzHughNagumoState> {
        Ok(FitzHughNagumoState {
            previous_v: seed(Self::NAME, "initial_v", &self.initial_v, len)?,
            previous_w: seed(Self::NAME, "initial_w", &self.initial_w, len)?,
            previous_time: self.t_0,
        })
    }

    fn output(&self, state: &FitzHughNagumoState) -> Result<StepOutput> {
        Ok(StepOutput {
            value: state.previous_v.clone(),
            time: Some(state.previous_time),
            recovery: Some(state.previous_w.clone()),
        })
    }

    fn step(
        &self,
        state: &FitzHughNagumoState,
        variable: &[f64],
        _rng: &mut Prng,
    ) -> Result<(FitzHughNagumoState, StepOutput)> {
        let (v, w): (Vec<f64>, Vec<f64>) = variable
            .iter()
            .zip(state.previous_v.iter().zip(&state.previous_w))
            .map(|(&x, (&v, &w))| match self.integration_method {
                IntegrationMethod::Euler => self.euler(v, w, x),
                IntegrationMethod::Rk4 => self.runge_kutta_4(v, w, x),
            })
            .unzip();
        let next = FitzHughNagumoState {
            previous_v: v,
            previous_w: w,
            previous_time: state.previous_time + self.time_step_size,
        };
        let out = self.output(&next)?;
        Ok((next, out))
    }
}
