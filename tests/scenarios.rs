//! End-to-end behavior of the integrator family through the public API.

use integra::prelude::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()))
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[test]
fn simple_integrator_accumulates_its_input() {
    let kind = SimpleIntegrator::default().with_rate(1.0).with_noise(0.0).with_offset(0.0);
    let mut f = IntegratorFunction::new(kind).unwrap().with_seed(0);
    let ctx = ContextId::named("trial");
    assert_eq!(f.execute(&[5.0], ctx).unwrap().value, vec![5.0]);
    assert_eq!(f.execute(&[5.0], ctx).unwrap().value, vec![10.0]);
}

#[test]
fn adaptive_integrator_halves_the_gap() {
    let mut f = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(0.5)).unwrap();
    let ctx = ContextId::named("trial");
    let out: Vec<f64> = (0..3).map(|_| f.execute(&[10.0], ctx).unwrap().value[0]).collect();
    assert_eq!(out, vec![5.0, 7.5, 8.75]);
}

#[test]
fn accumulator_ignores_input() {
    let kind = AccumulatorIntegrator::default()
        .with_rate(0.9)
        .with_increment(1.0)
        .with_noise(0.0);
    let mut f = IntegratorFunction::new(kind).unwrap();
    let ctx = ContextId::named("trial");
    assert!(close(f.execute(&[123.0], ctx).unwrap().value[0], 1.0));
    assert!(close(f.execute(&[-7.0], ctx).unwrap().value[0], 1.9));
}

#[test]
fn drift_diffusion_clamps_when_threshold_is_reached() {
    let kind = DriftDiffusionIntegrator::default()
        .with_rate(1.0)
        .with_noise(0.0)
        .with_threshold(10.0)
        .with_time_step_size(1.0);
    let mut f = IntegratorFunction::new(kind).unwrap().with_seed(0);
    let ctx = ContextId::named("trial");
    let out: Vec<StepOutput> = (0..4).map(|_| f.execute(&[3.0], ctx).unwrap()).collect();
    let values: Vec<f64> = out.iter().map(|o| o.value[0]).collect();
    assert_eq!(values, vec![3.0, 6.0, 9.0, 10.0]);
    assert_eq!(out[3].time, Some(4.0));
}

#[test]
fn constant_integrator_ignores_input() {
    let mut f = IntegratorFunction::new(ConstantIntegrator::default()).unwrap();
    let ctx = ContextId::named("trial");
    for x in [1.0, -4.0, 1e6] {
        assert_eq!(f.execute(&[x], ctx).unwrap().value, vec![0.0]);
    }

    let mut stepping = IntegratorFunction::new(ConstantIntegrator::default().with_rate(2.0)).unwrap();
    assert_eq!(stepping.execute(&[9.0], ctx).unwrap().value, vec![2.0]);
    assert_eq!(stepping.execute(&[9.0], ctx).unwrap().value, vec![4.0]);
}

#[test]
fn two_contexts_do_not_interfere() {
    let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
    let (a, b) = (ContextId::named("A"), ContextId::named("B"));
    for _ in 0..3 {
        f.execute(&[1.0], a).unwrap();
        f.execute(&[-2.0], b).unwrap();
    }
    assert_eq!(f.state_attribute(a, "previous_value").unwrap(), vec![3.0]);
    assert_eq!(f.state_attribute(b, "previous_value").unwrap(), vec![-6.0]);
    assert_eq!(f.executions(a), 3);
    assert_eq!(f.context_count(), 2);
}

#[test]
fn dual_adaptive_reinitialize_uses_the_product_formula() {
    let mut f = IntegratorFunction::new(DualAdaptiveIntegrator::default()).unwrap();
    let ctx = ContextId::named("trial");
    let (s, l) = (0.4, 0.2);
    let out = f.reinitialize_averages(ctx, Some(&[s]), Some(&[l])).unwrap();
    assert!(close(out.value[0], (1.0 - logistic(s)) * logistic(l)));
}

#[test]
fn out_of_range_rates_fail_at_construction() {
    let err = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(1.5)).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.param(), Some("rate"));
    let msg = err.to_string();
    assert!(msg.contains("AdaptiveIntegrator") && msg.contains("1.5"));

    assert!(IntegratorFunction::new(InteractiveActivationIntegrator::default().with_decay(-0.1)).is_err());
    assert!(IntegratorFunction::new(InteractiveActivationIntegrator::default().with_rate(2.0)).is_err());
}

#[test]
fn vector_parameter_must_match_variable_length() {
    let mut f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(vec![1.0, 2.0])).unwrap();
    let ctx = ContextId::named("trial");
    assert_eq!(f.execute(&[1.0, 1.0], ctx).unwrap().value, vec![1.0, 2.0]);
    let err = f.execute(&[1.0, 1.0, 1.0], ContextId::named("other")).unwrap_err();
    assert!(matches!(err, IntegratorError::LengthMismatch { .. }));
    assert!(!f.contains(ContextId::named("other")));
}

#[test]
fn generic_noise_argument_is_ignored_by_fitzhugh_nagumo() {
    let mut f = IntegratorFunction::new(FitzHughNagumoIntegrator::default()).unwrap();
    let ctx = ContextId::named("trial");
    let opts = CallOptions::executing().with_override("noise", 5.0);
    let with_noise = f.execute_with(&[1.0], ctx, &opts).unwrap();

    let mut plain = IntegratorFunction::new(FitzHughNagumoIntegrator::default()).unwrap();
    let reference = plain.execute(&[1.0], ctx).unwrap();
    assert_eq!(with_noise, reference);
}

#[test]
fn registry_runs_a_json_configuration() {
    let spec = IntegratorSpec::from_json(
        r#"{ "kind": "AdaptiveIntegrator", "params": { "rate": 0.5, "offset": 1.0 }, "seed": 3 }"#,
    )
    .unwrap();
    let mut f = spec.build().unwrap();
    assert_eq!(f.kind(), IntegratorKind::Adaptive);
    assert_eq!(f.execute(&[10.0], ContextId(1)).unwrap().value, vec![6.0]);
}

#[test]
fn image_moves_contexts_between_workers() {
    let kind = OrnsteinUhlenbeckIntegrator::default().with_noise(0.5);
    let mut worker_a = IntegratorFunction::new(kind.clone()).unwrap().with_seed(11);
    let ctx = ContextId::named("migrating");
    for _ in 0..3 {
        worker_a.execute(&[0.2], ctx).unwrap();
    }
    let bytes = worker_a.export_context(ctx).unwrap();

    let mut worker_b = IntegratorFunction::new(kind).unwrap().with_seed(11);
    assert_eq!(worker_b.import_context(&bytes).unwrap(), vec![ctx]);

    let next_a = worker_a.execute(&[0.2], ctx).unwrap();
    let next_b = worker_b.execute(&[0.2], ctx).unwrap();
    assert_eq!(next_a, next_b);
    assert_eq!(worker_b.executions(ctx), 4);
}
