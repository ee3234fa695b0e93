use std::collections::BTreeMap;
use std::process;

use integra::prelude::*;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A JSON run description:
///
/// ```json
/// {
///   "function": { "kind": "adaptive", "params": { "rate": 0.5 } },
///   "tier": "simd",
///   "steps": 3,
///   "contexts": { "A": [10.0], "B": [1.0, 2.0] }
/// }
/// ```
///
/// Every step feeds each context its fixed input vector.
#[derive(Debug, Deserialize)]
struct RunFile {
    function: IntegratorSpec,
    #[serde(default)]
    tier: ExecutionTier,
    #[serde(default = "default_steps")]
    steps: usize,
    contexts: BTreeMap<String, Vec<f64>>,
}

fn default_steps() -> usize {
    10
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        None | Some("scenarios") => run_scenarios(),
        Some("--help" | "-h" | "help") => {
            print_help();
            return;
        }
        Some("run") => match args.get(2) {
            Some(path) => run_file(path),
            None => {
                eprintln!("Missing run file");
                print_help();
                process::exit(2);
            }
        },
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            process::exit(2);
        }
    };

    if let Err(err) = result {
        error!(%err, "run failed");
        process::exit(1);
    }
}

fn print_help() {
    println!("integra: stateful integrator functions");
    println!();
    println!("Usage:");
    println!("  integra                 Run the built-in scenarios");
    println!("  integra scenarios       Same as above");
    println!("  integra run <file>      Execute a JSON run file");
    println!();
    println!("Log verbosity follows RUST_LOG (e.g. RUST_LOG=integra=debug).");
}

fn run_file(path: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let run: RunFile = serde_json::from_str(&text)?;
    let mut function = run.function.build()?;
    let executor = BatchExecutor::new(run.tier);
    info!(
        function = function.name(),
        tier = %executor.tier(),
        effective = %executor.effective_tier(),
        contexts = run.contexts.len(),
        steps = run.steps,
        "run started"
    );

    let ids: Vec<(&str, ContextId)> = run
        .contexts
        .keys()
        .map(|name| (name.as_str(), ContextId::named(name)))
        .collect();
    let requests: Vec<BatchRequest<'_>> = run
        .contexts
        .values()
        .zip(&ids)
        .map(|(input, (_, id))| BatchRequest::new(*id, input))
        .collect();

    for step in 1..=run.steps {
        let outputs = function.run_batch(&executor, &requests, &CallOptions::executing())?;
        for ((name, _), out) in ids.iter().zip(&outputs) {
            info!(step, context = name, value = ?out.value, time = ?out.time, "step");
        }
    }

    for ctx in function.snapshot().contexts {
        info!(context = %ctx.id, executions = ctx.executions, attributes = ?ctx.attributes, "final state");
    }
    Ok(())
}

fn run_scenarios() -> Result<()> {
    // Simple running sum.
    let mut simple = IntegratorFunction::new(SimpleIntegrator::default().with_rate(1.0))?;
    let ctx = ContextId::named("simple");
    let trajectory = [simple.execute(&[5.0], ctx)?.value, simple.execute(&[5.0], ctx)?.value];
    info!(scenario = "simple", ?trajectory);

    // EWMA toward a constant input.
    let mut adaptive = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(0.5))?;
    let ctx = ContextId::named("adaptive");
    let trajectory = (0..3)
        .map(|_| adaptive.execute(&[10.0], ctx).map(|out| out.value[0]))
        .collect::<Result<Vec<_>>>()?;
    info!(scenario = "adaptive", ?trajectory);

    // Accumulator ignores its input.
    let mut accumulator =
        IntegratorFunction::new(AccumulatorIntegrator::default().with_rate(0.9).with_increment(1.0))?;
    let ctx = ContextId::named("accumulator");
    let trajectory = (0..2)
        .map(|_| accumulator.execute(&[0.0], ctx).map(|out| out.value[0]))
        .collect::<Result<Vec<_>>>()?;
    info!(scenario = "accumulator", ?trajectory);

    // Drift diffusion saturating at the bound.
    let mut ddm = IntegratorFunction::new(DriftDiffusionIntegrator::default().with_threshold(10.0))?;
    let ctx = ContextId::named("ddm");
    let trajectory = (0..4)
        .map(|_| ddm.execute(&[3.0], ctx).map(|out| (out.value[0], out.time)))
        .collect::<Result<Vec<_>>>()?;
    info!(scenario = "drift_diffusion", ?trajectory);

    // Constant integrator holds its value.
    let mut constant = IntegratorFunction::new(ConstantIntegrator::default())?;
    let ctx = ContextId::named("constant");
    let trajectory = [constant.execute(&[1.0], ctx)?.value, constant.execute(&[42.0], ctx)?.value];
    info!(scenario = "constant", ?trajectory);

    // Two contexts on one instance stay independent.
    let mut shared = IntegratorFunction::new(SimpleIntegrator::default())?;
    let (a, b) = (ContextId::named("A"), ContextId::named("B"));
    for step in 0..3 {
        let va = shared.execute(&[1.0], a)?.value;
        let vb = shared.execute(&[-2.0], b)?.value;
        info!(scenario = "contexts", step, a = ?va, b = ?vb);
    }

    // The same batch through every tier built into this binary.
    let inputs: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64, 1.0]).collect();
    for tier in [ExecutionTier::Scalar, ExecutionTier::Simd, ExecutionTier::Parallel, ExecutionTier::Gpu] {
        let executor = BatchExecutor::new(tier);
        let mut lca = IntegratorFunction::new(LeakyCompetingIntegrator::default().with_rate(-0.5))?.with_seed(7);
        let requests: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(i, x)| BatchRequest::new(ContextId(i as u64), x))
            .collect();
        let mut last = Vec::new();
        for _ in 0..5 {
            last = executor.run(&mut lca, &requests, &CallOptions::executing())?;
        }
        let summary: Vec<f64> = last.iter().map(|out| out.value[0]).collect();
        info!(scenario = "tiers", %tier, effective = %executor.effective_tier(), ?summary);
    }

    // FitzHugh-Nagumo spike over a short window.
    let mut fhn = IntegratorFunction::new(FitzHughNagumoIntegrator::default())?;
    let ctx = ContextId::named("fhn");
    let mut peak = f64::NEG_INFINITY;
    for _ in 0..200 {
        let out = fhn.execute(&[1.0], ctx)?;
        peak = peak.max(out.value[0]);
    }
    let time = fhn.state_attribute(ctx, "previous_time")?;
    info!(scenario = "fitzhugh_nagumo", peak, ?time);

    Ok(())
}
