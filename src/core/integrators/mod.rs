//! The integrator kinds.
//!
//! Each kind is a typed configuration with `Default` matching the usual
//! constructor defaults, builder-style setters, and an [`Integrator`] impl
//! carrying its update rule.
//!
//! [`Integrator`]: crate::integrator::Integrator

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dispatch::AffineStep;
use crate::error::Result;
use crate::integrator::{StateRecord, StepOutput, TIME_ATTRIBUTE};
use crate::param::ParamValue;

mod accumulator;
mod adaptive;
mod constant;
mod drift_diffusion;
mod dual_adaptive;
mod fitzhugh_nagumo;
mod interactive_activation;
mod leaky_competing;
mod ornstein_uhlenbeck;
mod simple;

pub use accumulator::AccumulatorIntegrator;
pub use adaptive::AdaptiveIntegrator;
pub use constant::ConstantIntegrator;
pub use drift_diffusion::DriftDiffusionIntegrator;
pub use dual_adaptive::{DualAdaptiveIntegrator, DualAverageState, Operation};
pub use fitzhugh_nagumo::{FitzHughNagumoIntegrator, FitzHughNagumoState, IntegrationMethod};
pub use interactive_activation::InteractiveActivationIntegrator;
pub use leaky_competing::LeakyCompetingIntegrator;
pub use ornstein_uhlenbeck::OrnsteinUhlenbeckIntegrator;
pub use simple::SimpleIntegrator;

/// State of the kinds that carry only a previous value.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValueState {
    pub previous_value: Vec<f64>,
}

impl StateRecord for ValueState {
    const ATTRIBUTES: &'static [&'static str] = &["previous_value"];

    fn len(&self) -> usize {
        self.previous_value.len()
    }

    fn primary(&self) -> &[f64] {
        &self.previous_value
    }

    fn attribute(&self, name: &str) -> Option<Vec<f64>> {
        (name == "previous_value").then(|| self.previous_value.clone())
    }

    fn set_attribute(&mut self, name: &str, values: &[f64]) -> bool {
        if name != "previous_value" {
            return false;
        }
        self.previous_value = values.to_vec();
        true
    }
}

/// State of the random-walk kinds: a previous value and a clock.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimedState {
    pub previous_value: Vec<f64>,
    pub previous_time: f64,
}

impl StateRecord for TimedState {
    const ATTRIBUTES: &'static [&'static str] = &["previous_value", TIME_ATTRIBUTE];

    fn len(&self) -> usize {
        self.previous_value.len()
    }

    fn primary(&self) -> &[f64] {
        &self.previous_value
    }

    fn attribute(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "previous_value" => Some(self.previous_value.clone()),
            TIME_ATTRIBUTE => Some(vec![self.previous_time]),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &str, values: &[f64]) -> bool {
        match (name, values) {
            ("previous_value", _) => self.previous_value = values.to_vec(),
            (TIME_ATTRIBUTE, [t]) => self.previous_time = *t,
            _ => return false,
        }
        true
    }
}

/// Seeds a previous-value slot from an initializer parameter.
fn seed(function: &'static str, param: &'static str, initializer: &ParamValue, len: usize) -> Result<Vec<f64>> {
    initializer.broadcast(function, param, len)
}

fn value_state(function: &'static str, initializer: &ParamValue, len: usize) -> Result<ValueState> {
    Ok(ValueState {
        previous_value: seed(function, "initializer", initializer, len)?,
    })
}

fn timed_state(
    function: &'static str,
    initializer: &ParamValue,
    starting_point: f64,
    len: usize,
) -> Result<TimedState> {
    Ok(TimedState {
        previous_value: seed(function, "initializer", initializer, len)?,
        previous_time: starting_point,
    })
}

/// Commit for kinds whose affine step only replaces the previous value.
fn commit_value(value: Vec<f64>) -> (ValueState, StepOutput) {
    let out = StepOutput::value(value.clone());
    (ValueState { previous_value: value }, out)
}

/// Commit for kinds whose affine step also advances the clock.
fn commit_timed(previous: &TimedState, value: Vec<f64>, step: &AffineStep) -> (TimedState, StepOutput) {
    let time = previous.previous_time + step.advance_time.unwrap_or(0.0);
    let out = StepOutput::timed(value.clone(), time);
    (
        TimedState {
            previous_value: value,
            previous_time: time,
        },
        out,
    )
}

fn scalar_param(function: &'static str, param: &'static str, value: &ParamValue) -> Result<f64> {
    value
        .as_scalar()
        .ok_or_else(|| crate::param::invalid_type(function, param, value, "a single real number"))
}

#[cfg(test)]
pub(crate) mod test_support {
    pub fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()))
    }

    pub fn all_close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(*x, *y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_state_attributes() {
        let mut s = TimedState {
            previous_value: vec![1.0, 2.0],
            previous_time: 3.0,
        };
        assert_eq!(s.attribute(TIME_ATTRIBUTE), Some(vec![3.0]));
        assert!(s.set_attribute(TIME_ATTRIBUTE, &[4.0]));
        assert!(!s.set_attribute(TIME_ATTRIBUTE, &[4.0, 5.0]));
        assert!(!s.set_attribute("previous_v", &[0.0]));
        assert_eq!(s.previous_time, 4.0);
        assert_eq!(s.primary(), &[1.0, 2.0]);
    }

    #[test]
    fn vector_initializer_must_match_variable() {
        let init = ParamValue::Vector(vec![1.0, 2.0]);
        assert!(value_state("F", &init, 2).is_ok());
        assert!(value_state("F", &init, 3).is_err());
        assert_eq!(value_state("F", &ParamValue::Scalar(0.5), 3).unwrap().previous_value, vec![0.5; 3]);
    }
}
