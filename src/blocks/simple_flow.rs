//! Flows with a fixed or no capacity.
//!
//! Bounds and pins are applied to the flow variables when the sets are built; this block adds
//! full load time and gradient limits and the costs.
use super::{
    CapacityRef, ConstraintBlock, add_fixed_capacity_costs, add_flow_limits, add_variable_costs,
    flow_of,
};
use crate::energy_system::EnergySystem;
use crate::groupings::{FlowBlockKind, Group, flows_of_kind};
use crate::model::BlockContext;
use anyhow::Result;

/// Constraints and costs of simple flows
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFlowBlock;

impl ConstraintBlock for SimpleFlowBlock {
    fn name(&self) -> &str {
        "SimpleFlowBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Flows(flows_of_kind(es, FlowBlockKind::Simple))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        for key in group.flows() {
            let flow = flow_of(es, key)?;
            if let Some(capacity) = flow.fixed_capacity() {
                add_flow_limits(ctx, key, flow, CapacityRef::Fixed(capacity))?;
            }
            add_variable_costs(ctx, self.name(), key, flow)?;
            add_fixed_capacity_costs(ctx, self.name(), flow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::components::{Bus, Sink, Source};
    use crate::energy_system::EnergySystem;
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::results::Results;
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;

    /// A cheap source with a limited ramp and an expensive backup serving a step in demand
    fn ramp_system() -> EnergySystem {
        let mut es = EnergySystem::with_uniform_steps(4, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("coal")
                .output(
                    "el",
                    Flow::new()
                        .nominal_capacity(100.0)
                        .variable_costs(1.0)
                        .positive_gradient_limit(0.2),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("peaker")
                .output("el", Flow::new().variable_costs(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input(
                    "el",
                    Flow::new()
                        .nominal_capacity(1.0)
                        .fix(vec![10.0, 60.0, 60.0, 60.0]),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es
    }

    fn solve(es: &EnergySystem) -> Results {
        let mut model = Model::new(es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        model.results().unwrap()
    }

    #[test]
    fn positive_gradient_limits_ramp() {
        let results = solve(&ramp_system());
        let coal = results.get(&ResultKey::edge("coal", "el")).unwrap();
        let flow = coal.sequences.column("flow").unwrap();
        // Coal ramps by at most 20 per step
        assert_approx_eq!(f64, flow[0], 10.0, epsilon = 1e-6);
        assert_approx_eq!(f64, flow[1], 30.0, epsilon = 1e-6);
        assert_approx_eq!(f64, flow[2], 50.0, epsilon = 1e-6);
        assert_approx_eq!(f64, flow[3], 60.0, epsilon = 1e-6);
        let gradient = coal.sequences.column("positive_gradient").unwrap();
        assert_approx_eq!(f64, gradient[0], 0.0, epsilon = 1e-6);
        assert!(gradient[1] >= 20.0 - 1e-6);
    }

    #[test]
    fn full_load_time_max() {
        let mut es = EnergySystem::with_uniform_steps(4, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("pv")
                .output(
                    "el",
                    Flow::new().nominal_capacity(10.0).full_load_time_max(2.0),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("grid")
                .output("el", Flow::new().variable_costs(1.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(10.0).fix(1.0))
                .build()
                .unwrap(),
        )
        .unwrap();

        let results = solve(&es);
        let pv: f64 = results
            .get(&ResultKey::edge("pv", "el"))
            .unwrap()
            .sequences
            .column("flow")
            .unwrap()
            .iter()
            .take(4)
            .sum();
        // At most 2 full load hours of 10
        assert_approx_eq!(f64, pv, 20.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 20.0, epsilon = 1e-6);
    }
}
