//! Parameter values, metadata and per-call overrides.
//!
//! Numeric parameters are either a scalar, applied uniformly to every element
//! of the integrated variable, or a vector applied elementwise (Hadamard). A
//! vector of length one behaves like a scalar.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{IntegratorError, Result};
use crate::prng::Prng;

/// Value of one declared parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ParamValue {
    Scalar(f64),
    Vector(Vec<f64>),
    /// Stochastic source sampled fresh on every call (noise parameters only).
    Sampler(Distribution),
    /// Enumerated setting such as `operation` or `integration_method`.
    Choice(String),
}

/// Noise distributions drawn from the owning context's generator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Distribution {
    Normal { mean: f64, standard_deviation: f64 },
    Uniform { low: f64, high: f64 },
}

impl Distribution {
    pub fn sample(&self, rng: &mut Prng) -> f64 {
        match *self {
            Distribution::Normal {
                mean,
                standard_deviation,
            } => mean + standard_deviation * rng.next_gaussian(),
            Distribution::Uniform { low, high } => rng.gen_range_f64(low, high),
        }
    }
}

/// Scalar-or-elementwise view of a numeric parameter, resolved against the
/// length of the integrated variable.
#[derive(Debug, Clone, Copy)]
pub enum Coefficient<'a> {
    Uniform(f64),
    PerElement(&'a [f64]),
}

impl Coefficient<'_> {
    #[inline]
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Coefficient::Uniform(v) => *v,
            Coefficient::PerElement(values) => values[i],
        }
    }
}

impl ParamValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Scalar(v) => Some(*v),
            ParamValue::Vector(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            ParamValue::Choice(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ParamValue::Scalar(_) | ParamValue::Vector(_))
    }

    /// Length this value forces on the variable, if it is a true vector.
    pub fn required_len(&self) -> Option<usize> {
        match self {
            ParamValue::Vector(values) if values.len() != 1 => Some(values.len()),
            _ => None,
        }
    }

    /// Elementwise view for a variable of length `len`.
    pub fn coefficient(
        &self,
        function: &'static str,
        param: &'static str,
        len: usize,
    ) -> Result<Coefficient<'_>> {
        match self {
            ParamValue::Scalar(v) => Ok(Coefficient::Uniform(*v)),
            ParamValue::Vector(values) if values.len() == 1 => Ok(Coefficient::Uniform(values[0])),
            ParamValue::Vector(values) if values.len() == len => {
                Ok(Coefficient::PerElement(values.as_slice()))
            }
            ParamValue::Vector(values) => Err(IntegratorError::LengthMismatch {
                function,
                param,
                len: values.len(),
                expected: len,
            }),
            other => Err(invalid_type(function, param, other, "a number or a list of numbers")),
        }
    }

    /// Materialized elementwise values for a variable of length `len`.
    pub fn broadcast(&self, function: &'static str, param: &'static str, len: usize) -> Result<Vec<f64>> {
        let c = self.coefficient(function, param, len)?;
        Ok((0..len).map(|i| c.at(i)).collect())
    }

    /// Noise for one call: constants are broadcast, samplers are drawn once per element.
    pub fn sample_noise(
        &self,
        function: &'static str,
        param: &'static str,
        len: usize,
        rng: &mut Prng,
    ) -> Result<Vec<f64>> {
        match self {
            ParamValue::Sampler(dist) => Ok((0..len).map(|_| dist.sample(rng)).collect()),
            other => other.broadcast(function, param, len),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Scalar(v) => write!(f, "{v}"),
            ParamValue::Vector(values) => write!(f, "{values:?}"),
            ParamValue::Sampler(dist) => write!(f, "{dist:?}"),
            ParamValue::Choice(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        ParamValue::Vector(values)
    }
}

impl From<&[f64]> for ParamValue {
    fn from(values: &[f64]) -> Self {
        ParamValue::Vector(values.to_vec())
    }
}

impl From<Distribution> for ParamValue {
    fn from(dist: Distribution) -> Self {
        ParamValue::Sampler(dist)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Choice(s.to_string())
    }
}

/// Generic modulation role a parameter can be addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Multiplicative,
    Additive,
}

impl ParamRole {
    pub fn alias(self) -> &'static str {
        match self {
            ParamRole::Multiplicative => "multiplicative_param",
            ParamRole::Additive => "additive_param",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Numeric,
    /// Numeric or a sampler.
    Noise,
    Choice,
}

/// Declared metadata for one parameter of an integrator kind.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub modulable: bool,
    pub role: Option<ParamRole>,
}

impl ParamSpec {
    pub const fn numeric(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Numeric,
            modulable: true,
            role: None,
        }
    }

    pub const fn noise(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Noise,
            modulable: true,
            role: None,
        }
    }

    pub const fn choice(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Choice,
            modulable: false,
            role: None,
        }
    }

    /// Initial values are read when a context is seeded, never per call.
    pub const fn initializer(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Numeric,
            modulable: false,
            role: None,
        }
    }

    pub const fn with_role(mut self, role: ParamRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn accepts(&self, value: &ParamValue) -> bool {
        match self.kind {
            ParamKind::Numeric => value.is_numeric(),
            ParamKind::Noise => matches!(
                value,
                ParamValue::Scalar(_) | ParamValue::Vector(_) | ParamValue::Sampler(_)
            ),
            ParamKind::Choice => matches!(value, ParamValue::Choice(_)),
        }
    }
}

/// Finds a declared parameter by name or by its role alias.
pub fn resolve_spec<'a>(specs: &'a [ParamSpec], name: &str) -> Option<&'a ParamSpec> {
    specs
        .iter()
        .find(|s| s.name == name)
        .or_else(|| specs.iter().find(|s| s.role.is_some_and(|r| r.alias() == name)))
}

/// How long a runtime override stays in effect for a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OverrideScope {
    /// Applies to the current call only, then the previous value is restored.
    #[default]
    CallOnly,
    /// Persists as the context's value after the call completes.
    Sticky,
}

/// Transient per-call parameter values, addressed by name or role alias.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuntimeOverrides {
    entries: Vec<(String, ParamValue)>,
}

impl RuntimeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

// ---------------------------------------------------------------------------
// Validation helpers shared by the integrator kinds
// ---------------------------------------------------------------------------

pub(crate) fn invalid_type(
    function: &'static str,
    param: &'static str,
    value: &ParamValue,
    expected: &'static str,
) -> IntegratorError {
    IntegratorError::InvalidType {
        function,
        param,
        value: value.to_string(),
        expected,
    }
}

pub(crate) fn require_numeric(function: &'static str, param: &'static str, value: &ParamValue) -> Result<()> {
    if !value.is_numeric() {
        return Err(invalid_type(function, param, value, "a number or a list of numbers"));
    }
    let finite = match value {
        ParamValue::Scalar(v) => v.is_finite(),
        ParamValue::Vector(values) => values.iter().all(|v| v.is_finite()),
        _ => true,
    };
    if !finite {
        return Err(IntegratorError::OutOfRange {
            function,
            param,
            value: value.to_string(),
            expected: "finite values",
        });
    }
    Ok(())
}

pub(crate) fn require_noise(function: &'static str, param: &'static str, value: &ParamValue) -> Result<()> {
    match value {
        ParamValue::Sampler(_) => Ok(()),
        other => require_numeric(function, param, other),
    }
}

/// Noise that seeds a standard Gaussian term must be one plain number.
pub(crate) fn require_plain_scalar(function: &'static str, param: &'static str, value: &ParamValue) -> Result<()> {
    match value {
        ParamValue::Scalar(v) if v.is_finite() => Ok(()),
        other => Err(invalid_type(function, param, other, "a single real number")),
    }
}

/// Every element of a numeric parameter must lie in `[lo, hi]`.
pub(crate) fn require_within(
    function: &'static str,
    param: &'static str,
    value: &ParamValue,
    lo: f64,
    hi: f64,
    expected: &'static str,
) -> Result<()> {
    require_numeric(function, param, value)?;
    let ok = match value {
        ParamValue::Scalar(v) => (lo..=hi).contains(v),
        ParamValue::Vector(values) => values.iter().all(|v| (lo..=hi).contains(v)),
        _ => false,
    };
    if !ok {
        return Err(IntegratorError::OutOfRange {
            function,
            param,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

/// Vector parameters must agree on a length with each other.
pub(crate) fn require_consistent_lengths(
    function: &'static str,
    params: &[(&'static str, &ParamValue)],
) -> Result<Option<usize>> {
    let mut seen: Option<(&'static str, usize)> = None;
    for (name, value) in params {
        let Some(len) = value.required_len() else {
            continue;
        };
        match seen {
            None => seen = Some((name, len)),
            Some((_, expected)) if expected != len => {
                return Err(IntegratorError::LengthMismatch {
                    function,
                    param: name,
                    len,
                    expected,
                });
            }
            Some(_) => {}
        }
    }
    Ok(seen.map(|(_, len)| len))
}
