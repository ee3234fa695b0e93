//! # integra
//!
//! Stateful integrator functions for neural-process simulation.
//!
//! Every integrator is a discrete-time update rule (EWMA, Euler / Runge-Kutta
//! ODE steps, biased random walks) bound to a per-context state table, so a
//! single function instance can drive many independent simulation threads
//! ("execution contexts") without cross-talk.
//!
//! ## Quick Start
//!
//! ```
//! use integra::prelude::*;
//!
//! let mut f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(1.0)).unwrap();
//! let ctx = ContextId::named("trial-1");
//!
//! assert_eq!(f.execute(&[5.0], ctx).unwrap().value, vec![5.0]);
//! assert_eq!(f.execute(&[5.0], ctx).unwrap().value, vec![10.0]);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): JSON configuration and context-state images
//! - `parallel`: advance distinct contexts on rayon worker threads
//! - `simd`: evaluate lowered affine steps with the `wide` crate
//! - `gpu`: evaluate lowered affine steps in a wgpu compute shader
//!
//! ## Modules
//!
//! - [`integrator`]: the call contract and the per-context container
//! - [`integrators`]: the ten update rules
//! - [`dispatch`]: batched execution across contexts and execution tiers
//! - [`registry`]: config-driven construction and tagged dispatch
//! - [`observer`]: read-only observation adapters

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/param.rs"]
pub mod param;

#[path = "core/context.rs"]
pub mod context;

#[path = "core/integrator.rs"]
pub mod integrator;

#[path = "core/integrators/mod.rs"]
pub mod integrators;

#[path = "core/dispatch.rs"]
pub mod dispatch;

#[path = "core/registry.rs"]
pub mod registry;

#[cfg(feature = "serde")]
#[path = "core/storage.rs"]
pub mod storage;

#[cfg(feature = "gpu")]
#[path = "core/gpu.rs"]
pub mod gpu;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use integra::prelude::*;
/// ```
pub mod prelude {
    pub use crate::context::{ContextId, ExecutionPhase};
    pub use crate::dispatch::{BatchExecutor, BatchRequest, ExecutionTier};
    pub use crate::error::{IntegratorError, Result};
    pub use crate::integrator::{CallOptions, Integrator, IntegratorFunction, StepOutput};
    pub use crate::integrators::{
        AccumulatorIntegrator, AdaptiveIntegrator, ConstantIntegrator, DriftDiffusionIntegrator,
        DualAdaptiveIntegrator, FitzHughNagumoIntegrator, IntegrationMethod,
        InteractiveActivationIntegrator, LeakyCompetingIntegrator, Operation,
        OrnsteinUhlenbeckIntegrator, SimpleIntegrator,
    };
    pub use crate::param::{Distribution, OverrideScope, ParamRole, ParamValue, RuntimeOverrides};
    pub use crate::registry::{AnyIntegrator, IntegratorKind};
    #[cfg(feature = "serde")]
    pub use crate::registry::IntegratorSpec;
}
