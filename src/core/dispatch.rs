//! Batched execution across contexts, and the affine lowering shared by the
//! vectorized backends.
//!
//! Every backend honours the same contract as [`IntegratorFunction::execute_with`]:
//! one step per requested context, read-params → compute → commit, with each
//! context's own noise stream. A batch either commits every request or none.
//!
//! Kinds whose update is affine in the previous value and the input describe
//! one step as an [`AffineStep`] (`new = a·p + b·x + c`). The scalar rule of
//! those kinds evaluates the same staged step, so the SIMD and GPU paths never
//! carry a second copy of the math.

use core::fmt;
use core::ops::Range;
use core::str::FromStr;

use hashbrown::HashSet;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{ContextId, ExecutionPhase};
use crate::error::{IntegratorError, Result};
use crate::integrator::{CallOptions, ContextSlot, Integrator, IntegratorFunction, Pending, StepOutput};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "simd")]
use wide::f64x4;

/// Largest batch (in elements) sent to the GPU in one dispatch.
pub const GPU_MAX_ELEMENTS: usize = 1 << 20;

/// One step of an affine update: `new[i] = a[i]·p[i] + b[i]·x[i] + c[i]`.
///
/// Noise is already folded into `c`. `advance_time` is the clock increment
/// for time-based kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffineStep {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
    pub advance_time: Option<f64>,
}

impl AffineStep {
    /// Builds the coefficients element by element.
    pub fn from_fn(len: usize, mut f: impl FnMut(usize) -> (f64, f64, f64)) -> Self {
        let mut step = AffineStep {
            a: Vec::with_capacity(len),
            b: Vec::with_capacity(len),
            c: Vec::with_capacity(len),
            advance_time: None,
        };
        for i in 0..len {
            let (a, b, c) = f(i);
            step.a.push(a);
            step.b.push(b);
            step.c.push(c);
        }
        step
    }

    pub fn with_time(mut self, dt: f64) -> Self {
        self.advance_time = Some(dt);
        self
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Reference evaluation.
    pub fn apply(&self, previous: &[f64], variable: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.a[i] * previous[i] + self.b[i] * variable[i] + self.c[i])
            .collect()
    }
}

/// Execution tier for batched steps.
///
/// - `Scalar`: one context after another (reference path)
/// - `Simd`: affine kinds four lanes at a time (requires `simd` feature)
/// - `Parallel`: contexts on rayon worker threads (requires `parallel` feature)
/// - `Gpu`: affine kinds in one compute dispatch (requires `gpu` feature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    Simd,
    Parallel,
    Gpu,
}

impl ExecutionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionTier::Scalar => "scalar",
            ExecutionTier::Simd => "simd",
            ExecutionTier::Parallel => "parallel",
            ExecutionTier::Gpu => "gpu",
        }
    }

    /// The tier that will actually run, given compiled features and hardware.
    pub fn effective(self) -> ExecutionTier {
        match self {
            ExecutionTier::Scalar => ExecutionTier::Scalar,
            ExecutionTier::Simd => {
                #[cfg(feature = "simd")]
                {
                    ExecutionTier::Simd
                }
                #[cfg(not(feature = "simd"))]
                {
                    ExecutionTier::Scalar
                }
            }
            ExecutionTier::Parallel => {
                #[cfg(feature = "parallel")]
                {
                    ExecutionTier::Parallel
                }
                #[cfg(not(feature = "parallel"))]
                {
                    ExecutionTier::Scalar
                }
            }
            ExecutionTier::Gpu => {
                #[cfg(feature = "gpu")]
                {
                    if crate::gpu::gpu_available(GPU_MAX_ELEMENTS) {
                        ExecutionTier::Gpu
                    } else {
                        ExecutionTier::Scalar
                    }
                }
                #[cfg(not(feature = "gpu"))]
                {
                    ExecutionTier::Scalar
                }
            }
        }
    }

    /// Best tier compiled into this build.
    pub fn auto() -> ExecutionTier {
        #[cfg(feature = "gpu")]
        {
            if crate::gpu::gpu_available(GPU_MAX_ELEMENTS) {
                return ExecutionTier::Gpu;
            }
        }

        #[cfg(feature = "parallel")]
        {
            ExecutionTier::Parallel
        }

        #[cfg(all(not(feature = "parallel"), feature = "simd"))]
        {
            ExecutionTier::Simd
        }

        #[cfg(all(not(feature = "parallel"), not(feature = "simd")))]
        {
            ExecutionTier::Scalar
        }
    }
}

impl fmt::Display for ExecutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionTier {
    type Err = IntegratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" | "cpu" => Ok(ExecutionTier::Scalar),
            "simd" => Ok(ExecutionTier::Simd),
            "parallel" => Ok(ExecutionTier::Parallel),
            "gpu" => Ok(ExecutionTier::Gpu),
            other => Err(IntegratorError::UnknownVariant {
                function: "BatchExecutor",
                param: "tier",
                value: other.to_string(),
                expected: "'scalar', 'simd', 'parallel', 'gpu'",
            }),
        }
    }
}

/// One context's share of a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub context: ContextId,
    pub variable: &'a [f64],
}

impl<'a> BatchRequest<'a> {
    pub fn new(context: ContextId, variable: &'a [f64]) -> Self {
        Self { context, variable }
    }
}

/// Staged affine steps laid out as flat parallel arrays.
#[derive(Debug, Default)]
struct AffineBatch {
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    p: Vec<f64>,
    x: Vec<f64>,
    spans: Vec<Range<usize>>,
}

impl AffineBatch {
    fn push(&mut self, step: &AffineStep, previous: &[f64], variable: &[f64]) {
        let start = self.a.len();
        self.a.extend_from_slice(&step.a);
        self.b.extend_from_slice(&step.b);
        self.c.extend_from_slice(&step.c);
        self.p.extend_from_slice(previous);
        self.x.extend_from_slice(variable);
        self.spans.push(start..self.a.len());
    }

    fn len(&self) -> usize {
        self.a.len()
    }

    fn evaluate_scalar(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.a[i] * self.p[i] + self.b[i] * self.x[i] + self.c[i])
            .collect()
    }

    #[cfg(feature = "simd")]
    fn evaluate_simd(&self) -> Vec<f64> {
        let n = self.len();
        let mut out = vec![0.0; n];
        let lanes = |v: &[f64], i: usize| f64x4::from([v[i], v[i + 1], v[i + 2], v[i + 3]]);

        // Process 4 elements at a time.
        let simd_end = n - (n % 4);
        for i in (0..simd_end).step_by(4) {
            let value = lanes(&self.a, i) * lanes(&self.p, i) + lanes(&self.b, i) * lanes(&self.x, i)
                + lanes(&self.c, i);
            out[i..(i + 4)].copy_from_slice(&value.to_array());
        }

        for i in simd_end..n {
            out[i] = self.a[i] * self.p[i] + self.b[i] * self.x[i] + self.c[i];
        }
        out
    }

    #[cfg(feature = "gpu")]
    fn evaluate_gpu(&self) -> Option<Vec<f64>> {
        use crate::gpu::{with_gpu_context, GpuAffineRow};

        let rows: Vec<GpuAffineRow> = (0..self.len())
            .map(|i| GpuAffineRow {
                a: self.a[i] as f32,
                b: self.b[i] as f32,
                c: self.c[i] as f32,
                p: self.p[i] as f32,
            })
            .collect();
        let inputs: Vec<f32> = self.x.iter().map(|&v| v as f32).collect();

        let result = with_gpu_context(GPU_MAX_ELEMENTS, |ctx| ctx.map(|gpu| gpu.evaluate_affine(&rows, &inputs)));
        match result {
            Some(Ok(values)) => Some(values.into_iter().map(f64::from).collect()),
            Some(Err(e)) => {
                debug!(error = %e, "gpu evaluation failed; falling back to scalar");
                None
            }
            None => {
                debug!("no gpu adapter; falling back to scalar");
                None
            }
        }
    }

    fn split(&self, values: &[f64]) -> Vec<Vec<f64>> {
        self.spans.iter().map(|span| values[span.clone()].to_vec()).collect()
    }
}

/// Drives one step for many contexts of one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchExecutor {
    tier: ExecutionTier,
}

impl BatchExecutor {
    pub fn new(tier: ExecutionTier) -> Self {
        Self { tier }
    }

    /// Requested tier.
    pub fn tier(&self) -> ExecutionTier {
        self.tier
    }

    pub fn effective_tier(&self) -> ExecutionTier {
        self.tier.effective()
    }

    /// Advances every requested context once and returns the outputs in
    /// request order.
    ///
    /// A context may appear at most once per batch. When any request fails,
    /// no context is advanced.
    pub fn run<K: Integrator>(
        &self,
        function: &mut IntegratorFunction<K>,
        requests: &[BatchRequest<'_>],
        opts: &CallOptions,
    ) -> Result<Vec<StepOutput>> {
        let mut seen = HashSet::with_capacity(requests.len());
        for req in requests {
            if !seen.insert(req.context) {
                return Err(IntegratorError::DuplicateContext {
                    function: K::NAME,
                    context: req.context,
                });
            }
        }

        let tier = self.effective_tier();
        debug!(function = K::NAME, tier = %tier, contexts = requests.len(), "batch");

        let pending = match tier {
            ExecutionTier::Scalar => compute_scalar(function, requests, opts)?,
            ExecutionTier::Parallel => compute_parallel(function, requests, opts)?,
            ExecutionTier::Simd | ExecutionTier::Gpu => compute_lowered(function, requests, opts, tier)?,
        };

        if opts.phase == ExecutionPhase::Initializing {
            return Ok(pending.into_iter().map(|p| p.output().clone()).collect());
        }
        Ok(requests
            .iter()
            .zip(pending)
            .map(|(req, p)| function.slot_or_new(req.context).commit(p))
            .collect())
    }
}

fn compute_one<K: Integrator>(
    function: &IntegratorFunction<K>,
    req: &BatchRequest<'_>,
    opts: &CallOptions,
) -> Result<Pending<K>> {
    match function.contexts.get(req.context) {
        Some(slot) => slot.compute(&function.defaults, req.variable, opts),
        None => ContextSlot::<K>::new(function.seed, req.context).compute(&function.defaults, req.variable, opts),
    }
}

fn compute_scalar<K: Integrator>(
    function: &IntegratorFunction<K>,
    requests: &[BatchRequest<'_>],
    opts: &CallOptions,
) -> Result<Vec<Pending<K>>> {
    requests.iter().map(|req| compute_one(function, req, opts)).collect()
}

#[cfg(feature = "parallel")]
fn compute_parallel<K: Integrator>(
    function: &IntegratorFunction<K>,
    requests: &[BatchRequest<'_>],
    opts: &CallOptions,
) -> Result<Vec<Pending<K>>> {
    requests.par_iter().map(|req| compute_one(function, req, opts)).collect()
}

#[cfg(not(feature = "parallel"))]
fn compute_parallel<K: Integrator>(
    function: &IntegratorFunction<K>,
    requests: &[BatchRequest<'_>],
    opts: &CallOptions,
) -> Result<Vec<Pending<K>>> {
    compute_scalar(function, requests, opts)
}

/// Stages every request, evaluates the affine ones together, and runs the
/// scalar rule for the rest.
fn compute_lowered<K: Integrator>(
    function: &IntegratorFunction<K>,
    requests: &[BatchRequest<'_>],
    opts: &CallOptions,
    tier: ExecutionTier,
) -> Result<Vec<Pending<K>>> {
    let fresh: Vec<Option<ContextSlot<K>>> = requests
        .iter()
        .map(|req| {
            (!function.contexts.contains(req.context)).then(|| ContextSlot::new(function.seed, req.context))
        })
        .collect();
    let slots: Vec<&ContextSlot<K>> = requests
        .iter()
        .zip(&fresh)
        .map(|(req, fresh)| match fresh {
            Some(slot) => Ok(slot),
            None => function.contexts.get(req.context).ok_or(IntegratorError::UnknownContext {
                function: K::NAME,
                context: req.context,
            }),
        })
        .collect::<Result<_>>()?;

    let mut staged = Vec::with_capacity(requests.len());
    let mut batch = AffineBatch::default();
    for (slot, req) in slots.iter().zip(requests) {
        let s = slot.stage(&function.defaults, req.variable, opts)?;
        if let Some(s) = &s {
            batch.push(&s.step, s.previous(), req.variable);
        }
        staged.push(s);
    }

    let values = evaluate(&batch, tier);
    let mut values = batch.split(&values).into_iter();

    let mut pending = Vec::with_capacity(requests.len());
    for ((slot, req), s) in slots.iter().zip(requests).zip(staged) {
        let p = match s.map(|s| (s, values.next())) {
            Some((s, Some(value))) => slot.finish_staged(&function.defaults, s, value, req.variable, opts)?,
            _ => slot.compute(&function.defaults, req.variable, opts)?,
        };
        pending.push(p);
    }
    Ok(pending)
}

fn evaluate(batch: &AffineBatch, tier: ExecutionTier) -> Vec<f64> {
    if batch.a.is_empty() {
        return Vec::new();
    }
    match tier {
        #[cfg(feature = "gpu")]
        ExecutionTier::Gpu => batch.evaluate_gpu().unwrap_or_else(|| batch.evaluate_scalar()),
        #[cfg(feature = "simd")]
        ExecutionTier::Simd => batch.evaluate_simd(),
        _ => batch.evaluate_scalar(),
    }
}
