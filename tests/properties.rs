//! Property checks over random inputs and parameters.

use integra::prelude::*;
use proptest::prelude::*;

fn finite_input() -> impl Strategy<Value = f64> {
    -50.0f64..50.0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn advancing_one_context_never_touches_another(
        kind_index in 0usize..IntegratorKind::ALL.len(),
        inputs in prop::collection::vec(-1.0f64..1.0, 1..20),
        b_input in -1.0f64..1.0,
    ) {
        let kind = IntegratorKind::ALL[kind_index];
        let mut f = AnyIntegrator::with_defaults(kind).unwrap().with_seed(1);
        let (a, b) = (ContextId::named("A"), ContextId::named("B"));
        f.execute(&[b_input], b).unwrap();
        let before: Vec<Vec<f64>> = f
            .stateful_attributes()
            .iter()
            .map(|name| f.state_attribute(b, name).unwrap())
            .collect();

        for x in &inputs {
            f.execute(&[*x], a).unwrap();
        }

        let after: Vec<Vec<f64>> = f
            .stateful_attributes()
            .iter()
            .map(|name| f.state_attribute(b, name).unwrap())
            .collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(f.executions(b), 1);
        prop_assert_eq!(f.executions(a), inputs.len() as u64);
    }

    #[test]
    fn initializing_calls_are_idempotent(
        kind_index in 0usize..IntegratorKind::ALL.len(),
        warmup in prop::collection::vec(-1.0f64..1.0, 0..5),
        x in -1.0f64..1.0,
        repeats in 1usize..5,
    ) {
        let kind = IntegratorKind::ALL[kind_index];
        let mut f = AnyIntegrator::with_defaults(kind).unwrap().with_seed(2);
        let ctx = ContextId(9);
        for w in &warmup {
            f.execute(&[*w], ctx).unwrap();
        }
        let snapshot = f.snapshot();

        let init = CallOptions::initializing();
        let first = f.execute_with(&[x], ctx, &init).unwrap();
        for _ in 1..repeats {
            prop_assert_eq!(&f.execute_with(&[x], ctx, &init).unwrap(), &first);
        }
        prop_assert_eq!(f.snapshot(), snapshot);

        // An executing call from the same state yields the dry-run value.
        let executed = f.execute(&[x], ctx).unwrap();
        prop_assert_eq!(executed, first);
    }

    #[test]
    fn drift_diffusion_saturates_exactly_at_threshold(
        threshold in 0.5f64..50.0,
        rate in 0.1f64..5.0,
        dt in 0.05f64..2.0,
        x in finite_input().prop_filter("non-zero drift", |x| x.abs() > 0.5),
    ) {
        let kind = DriftDiffusionIntegrator::default()
            .with_rate(rate)
            .with_threshold(threshold)
            .with_time_step_size(dt);
        let mut f = IntegratorFunction::new(kind).unwrap();
        let ctx = ContextId(1);
        let step = rate * x.abs() * dt;
        let needed = (threshold / step).ceil() as usize + 1;

        let mut last = 0.0;
        for _ in 0..needed {
            last = f.execute(&[x], ctx).unwrap().value[0];
            prop_assert!(last.abs() <= threshold);
        }
        prop_assert_eq!(last, threshold * x.signum());
    }

    #[test]
    fn adaptive_rate_outside_unit_interval_is_rejected(rate in prop_oneof![-10.0f64..-1e-6, 1.0f64 + 1e-6..10.0]) {
        let err = IntegratorFunction::new(AdaptiveIntegrator::default().with_rate(rate)).unwrap_err();
        prop_assert!(err.is_configuration());
        prop_assert_eq!(err.param(), Some("rate"));
    }
}
