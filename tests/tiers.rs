//! Every execution tier must produce what single `execute` calls produce.

use integra::prelude::*;

fn agree(a: &[StepOutput], b: &[StepOutput], tol: f64) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert_eq!(x.value.len(), y.value.len());
        for (u, v) in x.value.iter().zip(&y.value) {
            assert!((u - v).abs() <= tol * (1.0 + u.abs()), "{u} vs {v}");
        }
        assert_eq!(x.time, y.time);
    }
}

fn inputs(contexts: usize, width: usize) -> Vec<Vec<f64>> {
    (0..contexts)
        .map(|i| (0..width).map(|j| (i as f64 - 3.0) * 0.25 + j as f64 * 0.1).collect())
        .collect()
}

fn tolerance(tier: ExecutionTier) -> f64 {
    match tier.effective() {
        ExecutionTier::Gpu => 1e-4,
        ExecutionTier::Simd => 1e-9,
        ExecutionTier::Scalar | ExecutionTier::Parallel => 0.0,
    }
}

fn check_kind(kind: IntegratorKind) {
    let xs = inputs(9, 3);
    let requests: Vec<BatchRequest<'_>> = xs
        .iter()
        .enumerate()
        .map(|(i, x)| BatchRequest::new(ContextId(100 + i as u64), x))
        .collect();

    for tier in [ExecutionTier::Scalar, ExecutionTier::Simd, ExecutionTier::Parallel, ExecutionTier::Gpu] {
        let mut reference = AnyIntegrator::with_defaults(kind).unwrap().with_seed(5);
        let mut batched = AnyIntegrator::with_defaults(kind).unwrap().with_seed(5);
        let executor = BatchExecutor::new(tier);
        for _ in 0..6 {
            let expected: Vec<StepOutput> = requests
                .iter()
                .map(|r| reference.execute(r.variable, r.context).unwrap())
                .collect();
            let got = batched
                .run_batch(&executor, &requests, &CallOptions::executing())
                .unwrap();
            agree(&expected, &got, tolerance(tier));
        }
        assert_eq!(batched.context_ids().len(), requests.len());
    }
}

#[test]
fn every_kind_agrees_across_tiers() {
    for kind in IntegratorKind::ALL {
        check_kind(kind);
    }
}

#[test]
fn noisy_affine_kinds_agree_across_tiers() {
    let noisy = LeakyCompetingIntegrator::default()
        .with_rate(-0.3)
        .with_noise(Distribution::Normal { mean: 0.0, standard_deviation: 0.2 });
    let xs = inputs(16, 4);
    let requests: Vec<_> = xs
        .iter()
        .enumerate()
        .map(|(i, x)| BatchRequest::new(ContextId(i as u64), x))
        .collect();

    let mut reference = IntegratorFunction::new(noisy.clone()).unwrap().with_seed(9);
    let mut parallel = IntegratorFunction::new(noisy.clone()).unwrap().with_seed(9);
    let mut simd = IntegratorFunction::new(noisy).unwrap().with_seed(9);
    for _ in 0..5 {
        let expected = BatchExecutor::new(ExecutionTier::Scalar)
            .run(&mut reference, &requests, &CallOptions::executing())
            .unwrap();
        let got = BatchExecutor::new(ExecutionTier::Parallel)
            .run(&mut parallel, &requests, &CallOptions::executing())
            .unwrap();
        agree(&expected, &got, 0.0);
        let got = BatchExecutor::new(ExecutionTier::Simd)
            .run(&mut simd, &requests, &CallOptions::executing())
            .unwrap();
        agree(&expected, &got, 1e-9);
    }
}

#[test]
fn batch_overrides_apply_to_every_request() {
    let xs = inputs(4, 2);
    let requests: Vec<_> = xs
        .iter()
        .enumerate()
        .map(|(i, x)| BatchRequest::new(ContextId(i as u64), x))
        .collect();
    let opts = CallOptions::executing().with_override("rate", 0.25);

    let mut single = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
    let expected: Vec<_> = requests
        .iter()
        .map(|r| single.execute_with(r.variable, r.context, &opts).unwrap())
        .collect();

    let mut batched = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
    let got = BatchExecutor::new(ExecutionTier::Simd)
        .run(&mut batched, &requests, &opts)
        .unwrap();
    agree(&expected, &got, 1e-9);
    assert_eq!(batched.get_param("rate", Some(ContextId(0))), Some(ParamValue::Scalar(1.0)));
}
