//! Flows with on/off semantics whose capacity is sized by the optimisation.
//!
//! The product of status and installed capacity is linearised with a big-M formulation, where M
//! is the largest capacity installed in the period.
use super::investment_flow::add_investment;
use super::non_convex_flow::{add_status, add_status_nominal_bounds};
use super::{CapacityRef, ConstraintBlock, add_flow_limits, add_variable_costs, flow_of};
use crate::energy_system::EnergySystem;
use crate::groupings::{FlowBlockKind, Group, flows_of_kind};
use crate::model::BlockContext;
use crate::program::{LinearExpr, VarKind};
use crate::variables::ResultKey;
use anyhow::Result;

/// Constraints and costs of non-convex flows with an investment
#[derive(Debug, Clone, Copy, Default)]
pub struct InvestNonConvexFlowBlock;

impl ConstraintBlock for InvestNonConvexFlowBlock {
    fn name(&self) -> &str {
        "InvestNonConvexFlowBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Flows(flows_of_kind(es, FlowBlockKind::InvestNonConvex))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for key in group.flows() {
            let flow = flow_of(es, key)?;
            let (Some(nonconvex), Some(investment)) = (&flow.nonconvex, flow.investment_record())
            else {
                continue;
            };
            let owner = ResultKey::Edge(key.clone());
            let vars = add_investment(
                ctx,
                self.name(),
                &owner,
                investment,
                flow.fixed_costs.as_ref(),
            )?;
            let status = add_status(ctx, self.name(), key, nonconvex)?;

            let status_nominal = ctx.add_step_variables(
                &owner,
                "status_nominal",
                0.0,
                f64::INFINITY,
                VarKind::Continuous,
            )?;
            for t in sets.timesteps() {
                let p = sets.period(t);
                let big_m = investment.total_upper_bound(p);
                let total = LinearExpr::from(vars.total[p]);
                let nominal = LinearExpr::from(status_nominal[t]);
                let on = LinearExpr::term(status[t], big_m);
                ctx.add_constraint(
                    || format!("status_nominal_off({key},{t})"),
                    &(nominal.clone() - on.clone()),
                    f64::NEG_INFINITY,
                    0.0,
                )?;
                ctx.add_constraint(
                    || format!("status_nominal_total({key},{t})"),
                    &(nominal.clone() - total.clone()),
                    f64::NEG_INFINITY,
                    0.0,
                )?;
                ctx.add_constraint(
                    || format!("status_nominal_on({key},{t})"),
                    &(nominal - total - on),
                    -big_m,
                    f64::INFINITY,
                )?;
            }
            add_status_nominal_bounds(ctx, key, flow, &status_nominal)?;

            add_flow_limits(ctx, key, flow, CapacityRef::Invested(&vars.total))?;
            add_variable_costs(ctx, self.name(), key, flow)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::components::{Bus, Sink, Source};
    use crate::energy_system::{EnergySystem, Period};
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::options::{Investment, NonConvex};
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;

    #[test]
    fn sizes_for_minimum_load() {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("gas")
                .output(
                    "el",
                    Flow::new()
                        .investment(Investment::new().ep_costs(1.0).maximum(200.0))
                        .min(0.5)
                        .variable_costs(1.0)
                        .nonconvex(NonConvex::new()),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("backup")
                .output("el", Flow::new().variable_costs(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(1.0).fix(vec![30.0, 80.0]))
                .build()
                .unwrap(),
        )
        .unwrap();

        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        let results = model.results().unwrap();

        // A plant of 60 can still run at t = 0; a larger one would have to stay off
        let gas = results.get(&ResultKey::edge("gas", "el")).unwrap();
        assert_approx_eq!(f64, gas.scalars["invest"], 60.0, epsilon = 1e-6);
        let status = gas.sequences.column("status").unwrap();
        assert_approx_eq!(f64, status[0], 1.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 350.0, epsilon = 1e-6);
    }

    #[test]
    fn capacity_grows_beyond_one_period_maximum() {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0)
            .unwrap()
            .with_periods(vec![Period::new(0..1, 1), Period::new(1..2, 1)]);
        es.add(Bus::new("el").build().unwrap()).unwrap();
        let investment = Investment::new()
            .ep_costs(1.0)
            .maximum(100.0)
            .lifetime(20)
            .interest_rate(0.0);
        es.add(
            Source::new("gas")
                .output(
                    "el",
                    Flow::new()
                        .investment(investment)
                        .nonconvex(NonConvex::new()),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("backup")
                .output("el", Flow::new().variable_costs(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(1.0).fix(vec![80.0, 150.0]))
                .build()
                .unwrap(),
        )
        .unwrap();

        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        let results = model.results().unwrap();

        // Both periods' builds run together at t = 1, above the maximum of a single period
        let key = ResultKey::edge("gas", "el");
        let gas = results.period_scalars(&key).unwrap();
        assert_approx_eq!(f64, gas["invest"][0], 80.0, epsilon = 1e-6);
        assert_approx_eq!(f64, gas["invest"][1], 70.0, epsilon = 1e-6);
        assert_approx_eq!(f64, gas["total"][1], 150.0, epsilon = 1e-6);
        let flow = results.get(&key).unwrap().sequences.column("flow").unwrap();
        assert_approx_eq!(f64, flow[1], 150.0, epsilon = 1e-6);
        // The first build is paid in both periods
        assert_approx_eq!(f64, results.meta.objective, 2.0 * 80.0 + 70.0, epsilon = 1e-6);
    }
}
