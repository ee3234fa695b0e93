use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::context::ContextId;
use crate::error::{IntegratorError, Result};
use crate::integrator::{Integrator, IntegratorFunction, StateRecord, StepOutput};
use crate::param::{
    invalid_type, require_consistent_lengths, require_numeric, require_within, Coefficient, ParamRole,
    ParamSpec, ParamValue,
};
use crate::prng::Prng;

use super::seed;

/// How the two logistic-squashed averages are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Operation {
    /// `(1 - S) * L`
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "product"))]
    Product,
    /// `(1 - S) + L`
    #[cfg_attr(feature = "serde", serde(rename = "sum"))]
    Sum,
    /// `(1 - S) - L`
    #[cfg_attr(feature = "serde", serde(rename = "s-l"))]
    ShortMinusLong,
    /// `L - (1 - S)`
    #[cfg_attr(feature = "serde", serde(rename = "l-s"))]
    LongMinusShort,
}

impl Operation {
    pub const EXPECTED: &'static str = "'product', 'sum', 's-l', 'l-s'";

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Product => "product",
            Operation::Sum => "sum",
            Operation::ShortMinusLong => "s-l",
            Operation::LongMinusShort => "l-s",
        }
    }

    /// Combines the short-term logistic `s` and long-term logistic `l`.
    #[inline]
    pub fn combine(self, s: f64, l: f64) -> f64 {
        match self {
            Operation::Product => (1.0 - s) * l,
            Operation::Sum => (1.0 - s) + l,
            Operation::ShortMinusLong => (1.0 - s) - l,
            Operation::LongMinusShort => l - (1.0 - s),
        }
    }
}

impl FromStr for Operation {
    type Err = IntegratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "product" => Ok(Operation::Product),
            "sum" => Ok(Operation::Sum),
            "s-l" => Ok(Operation::ShortMinusLong),
            "l-s" => Ok(Operation::LongMinusShort),
            other => Err(IntegratorError::UnknownVariant {
                function: DualAdaptiveIntegrator::NAME,
                param: "operation",
                value: other.to_string(),
                expected: Operation::EXPECTED,
            }),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline]
fn logistic(avg: f64, gain: f64, bias: f64) -> f64 {
    1.0 / (1.0 + (-(gain * avg + bias)).exp())
}

/// Short- and long-term running averages of one context.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DualAverageState {
    pub previous_short_term_avg: Vec<f64>,
    pub previous_long_term_avg: Vec<f64>,
}

impl StateRecord for DualAverageState {
    const ATTRIBUTES: &'static [&'static str] = &["previous_short_term_avg", "previous_long_term_avg"];

    fn len(&self) -> usize {
        self.previous_short_term_avg.len()
    }

    fn primary(&self) -> &[f64] {
        &self.previous_short_term_avg
    }

    fn attribute(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "previous_short_term_avg" => Some(self.previous_short_term_avg.clone()),
            "previous_long_term_avg" => Some(self.previous_long_term_avg.clone()),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &str, values: &[f64]) -> bool {
        match name {
            "previous_short_term_avg" => self.previous_short_term_avg = values.to_vec(),
            "previous_long_term_avg" => self.previous_long_term_avg = values.to_vec(),
            _ => return false,
        }
        true
    }
}

/// Two exponentially weighted averages at different rates, each squashed by
/// a logistic `1 / (1 + exp(-(gain * avg + bias)))` and combined by
/// [`Operation`], plus `offset`.
///
/// The output is the combined value; the averages are the state.
#[derive(Debug, Clone, PartialEq)]
pub struct DualAdaptiveIntegrator {
    pub initial_short_term_avg: ParamValue,
    pub initial_long_term_avg: ParamValue,
    pub short_term_gain: ParamValue,
    pub long_term_gain: ParamValue,
    pub short_term_bias: ParamValue,
    pub long_term_bias: ParamValue,
    pub short_term_rate: ParamValue,
    pub long_term_rate: ParamValue,
    pub rate: ParamValue,
    pub offset: ParamValue,
    pub operation: Operation,
}

impl Default for DualAdaptiveIntegrator {
    fn default() -> Self {
        Self {
            initial_short_term_avg: ParamValue::Scalar(0.0),
            initial_long_term_avg: ParamValue::Scalar(0.0),
            short_term_gain: ParamValue::Scalar(1.0),
            long_term_gain: ParamValue::Scalar(1.0),
            short_term_bias: ParamValue::Scalar(0.0),
            long_term_bias: ParamValue::Scalar(0.0),
            short_term_rate: ParamValue::Scalar(0.9),
            long_term_rate: ParamValue::Scalar(0.1),
            rate: ParamValue::Scalar(0.5),
            offset: ParamValue::Scalar(0.0),
            operation: Operation::Product,
        }
    }
}

impl DualAdaptiveIntegrator {
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_rates(mut self, short_term: impl Into<ParamValue>, long_term: impl Into<ParamValue>) -> Self {
        self.short_term_rate = short_term.into();
        self.long_term_rate = long_term.into();
        self
    }

    pub fn with_gains(mut self, short_term: impl Into<ParamValue>, long_term: impl Into<ParamValue>) -> Self {
        self.short_term_gain = short_term.into();
        self.long_term_gain = long_term.into();
        self
    }

    pub fn with_biases(mut self, short_term: impl Into<ParamValue>, long_term: impl Into<ParamValue>) -> Self {
        self.short_term_bias = short_term.into();
        self.long_term_bias = long_term.into();
        self
    }

    pub fn with_initial_averages(
        mut self,
        short_term: impl Into<ParamValue>,
        long_term: impl Into<ParamValue>,
    ) -> Self {
        self.initial_short_term_avg = short_term.into();
        self.initial_long_term_avg = long_term.into();
        self
    }

    pub fn with_rate(mut self, rate: impl Into<ParamValue>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_offset(mut self, offset: impl Into<ParamValue>) -> Self {
        self.offset = offset.into();
        self
    }

    fn coefficient<'a>(&self, value: &'a ParamValue, param: &'static str, len: usize) -> Result<Coefficient<'a>> {
        value.coefficient(Self::NAME, param, len)
    }

    /// Combined output for a pair of averages.
    fn combine(&self, short: &[f64], long: &[f64]) -> Result<Vec<f64>> {
        let len = short.len();
        let sg = self.coefficient(&self.short_term_gain, "short_term_gain", len)?;
        let sb = self.coefficient(&self.short_term_bias, "short_term_bias", len)?;
        let lg = self.coefficient(&self.long_term_gain, "long_term_gain", len)?;
        let lb = self.coefficient(&self.long_term_bias, "long_term_bias", len)?;
        let offset = self.coefficient(&self.offset, "offset", len)?;
        Ok((0..len)
            .map(|i| {
                let s = logistic(short[i], sg.at(i), sb.at(i));
                let l = logistic(long[i], lg.at(i), lb.at(i));
                self.operation.combine(s, l) + offset.at(i)
            })
            .collect())
    }
}

const SPECS: &[ParamSpec] = &[
    ParamSpec::initializer("initial_short_term_avg"),
    ParamSpec::initializer("initial_long_term_avg"),
    ParamSpec::numeric("short_term_gain"),
    ParamSpec::numeric("long_term_gain"),
    ParamSpec::numeric("short_term_bias"),
    ParamSpec::numeric("long_term_bias"),
    ParamSpec::numeric("short_term_rate"),
    ParamSpec::numeric("long_term_rate"),
    ParamSpec::numeric("rate").with_role(ParamRole::Multiplicative),
    ParamSpec::numeric("offset").with_role(ParamRole::Additive),
    ParamSpec::choice("operation"),
];

impl Integrator for DualAdaptiveIntegrator {
    type State = DualAverageState;
    const NAME: &'static str = "DualAdaptiveIntegrator";

    fn param_specs(&self) -> &'static [ParamSpec] {
        SPECS
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "initial_short_term_avg" => &self.initial_short_term_avg,
            "initial_long_term_avg" => &self.initial_long_term_avg,
            "short_term_gain" => &self.short_term_gain,
            "long_term_gain" => &self.long_term_gain,
            "short_term_bias" => &self.short_term_bias,
            "long_term_bias" => &self.long_term_bias,
            "short_term_rate" => &self.short_term_rate,
            "long_term_rate" => &self.long_term_rate,
            "rate" => &self.rate,
            "offset" => &self.offset,
            "operation" => return Some(ParamValue::Choice(self.operation.as_str().to_string())),
            _ => return None,
        };
        Some(value.clone())
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let slot = match name {
            "initial_short_term_avg" => &mut self.initial_short_term_avg,
            "initial_long_term_avg" => &mut self.initial_long_term_avg,
            "short_term_gain" => &mut self.short_term_gain,
            "long_term_gain" => &mut self.long_term_gain,
            "short_term_bias" => &mut self.short_term_bias,
            "long_term_bias" => &mut self.long_term_bias,
            "short_term_rate" => &mut self.short_term_rate,
            "long_term_rate" => &mut self.long_term_rate,
            "rate" => &mut self.rate,
            "offset" => &mut self.offset,
            "operation" => {
                let choice = value
                    .as_choice()
                    .ok_or_else(|| invalid_type(Self::NAME, "operation", &value, Operation::EXPECTED))?;
                self.operation = choice.parse()?;
                return Ok(());
            }
            _ => return Ok(()),
        };
        *slot = value;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        require_within(Self::NAME, "rate", &self.rate, 0.0, 1.0, "values in [0, 1]")?;
        require_within(Self::NAME, "short_term_rate", &self.short_term_rate, 0.0, 1.0, "values in [0, 1]")?;
        require_within(Self::NAME, "long_term_rate", &self.long_term_rate, 0.0, 1.0, "values in [0, 1]")?;
        let numeric = [
            ("initial_short_term_avg", &self.initial_short_term_avg),
            ("initial_long_term_avg", &self.initial_long_term_avg),
            ("short_term_gain", &self.short_term_gain),
            ("long_term_gain", &self.long_term_gain),
            ("short_term_bias", &self.short_term_bias),
            ("long_term_bias", &self.long_term_bias),
            ("offset", &self.offset),
        ];
        for (name, value) in numeric {
            require_numeric(Self::NAME, name, value)?;
        }
        require_consistent_lengths(
            Self::NAME,
            &[
                ("initial_short_term_avg", &self.initial_short_term_avg),
                ("initial_long_term_avg", &self.initial_long_term_avg),
                ("short_term_gain", &self.short_term_gain),
                ("long_term_gain", &self.long_term_gain),
                ("short_term_bias", &self.short_term_bias),
                ("long_term_bias", &self.long_term_bias),
                ("short_term_rate", &self.short_term_rate),
                ("long_term_rate", &self.long_term_rate),
                ("offset", &self.offset),
            ],
        )?;
        Ok(())
    }

    fn initializers(&self) -> &'static [&'static str] {
        &["initial_short_term_avg", "initial_long_term_avg"]
    }

    fn initial_state(&self, len: usize) -> Result<DualAverageState> {
        Ok(DualAverageState {
            previous_short_term_avg: seed(Self::NAME, "initial_short_term_avg", &self.initial_short_term_avg, len)?,
            previous_long_term_avg: seed(Self::NAME, "initial_long_term_avg", &self.initial_long_term_avg, len)?,
        })
    }

    fn output(&self, state: &DualAverageState) -> Result<StepOutput> {
        let value = self.combine(&state.previous_short_term_avg, &state.previous_long_term_avg)?;
        Ok(StepOutput::value(value))
    }

    fn step(
        &self,
        state: &DualAverageState,
        variable: &[f64],
        _rng: &mut Prng,
    ) -> Result<(DualAverageState, StepOutput)> {
        let len = variable.len();
        let sr = self.coefficient(&self.short_term_rate, "short_term_rate", len)?;
        let lr = self.coefficient(&self.long_term_rate, "long_term_rate", len)?;
        let ewma = |rate: f64, previous: f64, x: f64| (1.0 - rate) * previous + rate * x;

        let short: Vec<f64> = (0..len)
            .map(|i| ewma(sr.at(i), state.previous_short_term_avg[i], variable[i]))
            .collect();
        let long: Vec<f64> = (0..len)
            .map(|i| ewma(lr.at(i), state.previous_long_term_avg[i], variable[i]))
            .collect();
        let value = self.combine(&short, &long)?;
        Ok((
            DualAverageState {
                previous_short_term_avg: short,
                previous_long_term_avg: long,
            },
            StepOutput::value(value),
        ))
    }
}

impl IntegratorFunction<DualAdaptiveIntegrator> {
    /// Restarts accumulation for `ctx` at the given averages (or the initial
    /// averages when `None`) and returns the combined value.
    pub fn reinitialize_averages(
        &mut self,
        ctx: ContextId,
        short_term: Option<&[f64]>,
        long_term: Option<&[f64]>,
    ) -> Result<StepOutput> {
        match (short_term, long_term) {
            (Some(s), Some(l)) => self.reinitialize(ctx, &[s, l]),
            (Some(s), None) => self.reinitialize(ctx, &[s]),
            (None, None) => self.reinitialize(ctx, &[]),
            (None, Some(l)) => {
                let initial = self
                    .get_param("initial_short_term_avg", Some(ctx))
                    .unwrap_or(ParamValue::Scalar(0.0));
                let short = seed(DualAdaptiveIntegrator::NAME, "initial_short_term_avg", &initial, l.len())?;
                self.reinitialize(ctx, &[short.as_slice(), l])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::test_support::close;

    fn lg(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn reinitialize_matches_each_operation() {
        let (s, l) = (0.3, -0.7);
        let cases = [
            (Operation::Product, (1.0 - lg(s)) * lg(l)),
            (Operation::Sum, (1.0 - lg(s)) + lg(l)),
            (Operation::ShortMinusLong, (1.0 - lg(s)) - lg(l)),
            (Operation::LongMinusShort, lg(l) - (1.0 - lg(s))),
        ];
        for (op, expected) in cases {
            let mut f = IntegratorFunction::new(DualAdaptiveIntegrator::default().with_operation(op)).unwrap();
            let out = f
                .reinitialize_averages(ContextId(1), Some(&[s]), Some(&[l]))
                .unwrap();
            assert!(close(out.value[0], expected), "{op}: {} vs {expected}", out.value[0]);
        }
    }

    #[test]
    fn step_runs_both_ewmas() {
        let mut f = IntegratorFunction::new(DualAdaptiveIntegrator::default()).unwrap();
        let ctx = ContextId(1);
        let out = f.execute(&[1.0], ctx).unwrap();
        let state = f.state(ctx).unwrap();
        assert!(close(state.previous_short_term_avg[0], 0.9));
        assert!(close(state.previous_long_term_avg[0], 0.1));
        assert!(close(out.value[0], (1.0 - lg(0.9)) * lg(0.1)));
    }

    #[test]
    fn reinitialize_without_arguments_uses_initial_averages() {
        let k = DualAdaptiveIntegrator::default().with_initial_averages(0.5, 0.25);
        let mut f = IntegratorFunction::new(k).unwrap();
        let ctx = ContextId(1);
        f.execute(&[3.0], ctx).unwrap();
        let out = f.reinitialize_averages(ctx, None, None).unwrap();
        assert!(close(out.value[0], (1.0 - lg(0.5)) * lg(0.25)));
        assert_eq!(f.state(ctx).unwrap().previous_long_term_avg, vec![0.25]);
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = "max".parse::<Operation>().unwrap_err();
        assert!(matches!(err, IntegratorError::UnknownVariant { param: "operation", .. }));
        let mut k = DualAdaptiveIntegrator::default();
        assert!(k.set_param("operation", ParamValue::from("sum")).is_ok());
        assert_eq!(k.operation, Operation::Sum);
    }

    #[test]
    fn non_choice_operation_reports_the_value() {
        let mut k = DualAdaptiveIntegrator::default();
        let err = k.set_param("operation", ParamValue::Scalar(2.0)).unwrap_err();
        match err {
            IntegratorError::InvalidType { param, value, .. } => {
                assert_eq!(param, "operation");
                assert_eq!(value, ParamValue::Scalar(2.0).to_string());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(k.operation, Operation::Product);
    }

    #[test]
    fn vector_coefficients_broadcast_per_element() {
        let k = DualAdaptiveIntegrator::default().with_gains(vec![1.0, 2.0], 1.0);
        let mut f = IntegratorFunction::new(k).unwrap();
        let out = f.execute(&[1.0, 1.0], ContextId(1)).unwrap();
        assert!(close(out.value[0], (1.0 - lg(0.9)) * lg(0.1)));
        assert!(close(out.value[1], (1.0 - lg(1.8)) * lg(0.1)));
    }

    #[test]
    fn rates_are_bounded() {
        let k = DualAdaptiveIntegrator::default().with_rates(1.2, 0.1);
        assert!(IntegratorFunction::new(k).is_err());
    }
}
