use crate::context::ContextId;
use crate::integrator::{Integrator, IntegratorFunction, StateRecord};

/// A read-only snapshot of one integrator function and its contexts.
///
/// Observers cannot mutate the function or advance any noise stream.
/// Snapshotting allocates; the execution path is unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSnapshot {
    pub function: &'static str,
    pub seed: u64,
    pub contexts: Vec<ContextSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    pub id: ContextId,
    pub executions: u64,
    /// True when the context carries its own parameter values.
    pub has_param_overrides: bool,
    /// Stateful attributes in declaration order; empty before the first step.
    pub attributes: Vec<(&'static str, Vec<f64>)>,
}

impl FunctionSnapshot {
    pub fn context(&self, id: ContextId) -> Option<&ContextSnapshot> {
        self.contexts.iter().find(|c| c.id == id)
    }
}

impl ContextSnapshot {
    pub fn attribute(&self, name: &str) -> Option<&[f64]> {
        self.attributes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_slice())
    }
}

pub struct FunctionAdapter<'a, K: Integrator> {
    function: &'a IntegratorFunction<K>,
}

impl<'a, K: Integrator> FunctionAdapter<'a, K> {
    pub fn new(function: &'a IntegratorFunction<K>) -> Self {
        Self { function }
    }

    pub fn snapshot(&self) -> FunctionSnapshot {
        let mut contexts: Vec<ContextSnapshot> = self
            .function
            .contexts
            .iter()
            .map(|(id, slot)| ContextSnapshot {
                id,
                executions: slot.executions,
                has_param_overrides: slot.params.is_some(),
                attributes: slot
                    .state
                    .as_ref()
                    .map(|state| {
                        K::State::ATTRIBUTES
                            .iter()
                            .filter_map(|&name| Some((name, state.attribute(name)?)))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        contexts.sort_by_key(|c| c.id);

        FunctionSnapshot {
            function: K::NAME,
            seed: self.function.seed,
            contexts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::{DriftDiffusionIntegrator, SimpleIntegrator};

    #[test]
    fn snapshot_reports_each_context() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default().with_rate(2.0)).unwrap();
        f.execute(&[1.0], ContextId(2)).unwrap();
        f.execute(&[1.0], ContextId(1)).unwrap();
        f.execute(&[1.0], ContextId(1)).unwrap();
        f.set_param("rate", 3.0, ContextId(2)).unwrap();

        let snap = FunctionAdapter::new(&f).snapshot();
        assert_eq!(snap.function, "SimpleIntegrator");
        let ids: Vec<_> = snap.contexts.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![ContextId(1), ContextId(2)]);

        let one = snap.context(ContextId(1)).unwrap();
        assert_eq!(one.executions, 2);
        assert!(!one.has_param_overrides);
        assert_eq!(one.attribute("previous_value"), Some(&[4.0][..]));
        assert!(snap.context(ContextId(2)).unwrap().has_param_overrides);
    }

    #[test]
    fn timed_state_exposes_the_clock() {
        let mut f = IntegratorFunction::new(DriftDiffusionIntegrator::default()).unwrap();
        f.execute(&[1.0], ContextId(7)).unwrap();
        let snap = FunctionAdapter::new(&f).snapshot();
        let ctx = snap.context(ContextId(7)).unwrap();
        assert_eq!(ctx.attribute("previous_time"), Some(&[1.0][..]));
    }
}
