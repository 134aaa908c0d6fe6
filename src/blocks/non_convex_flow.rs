//! Flows with on/off semantics (unit commitment) and a fixed capacity.
//!
//! The status rows are shared with [`InvestNonConvexFlowBlock`](super::InvestNonConvexFlowBlock),
//! which only differs in how `status_nominal` is linked to the capacity.
use super::{
    CapacityRef, ConstraintBlock, add_fixed_capacity_costs, add_flow_limits, add_variable_costs,
    flow_of,
};
use crate::energy_system::EnergySystem;
use crate::flow::{Flow, FlowKey};
use crate::groupings::{FlowBlockKind, Group, flows_of_kind};
use crate::model::BlockContext;
use crate::options::NonConvex;
use crate::program::{LinearExpr, VarId, VarKind};
use crate::sequence::Sequence;
use crate::variables::ResultKey;
use anyhow::Result;

/// Add the binary status of a flow with its switching rows and costs.
///
/// The status is pinned to the initial status before the first flexible time step. Startup and
/// shutdown variables are only created if they are costed or limited.
pub(crate) fn add_status(
    ctx: &mut BlockContext<'_>,
    block: &str,
    key: &FlowKey,
    nonconvex: &NonConvex,
) -> Result<Vec<VarId>> {
    let sets = ctx.sets;
    let owner = ResultKey::Edge(key.clone());
    let initial = if nonconvex.initial_status { 1.0 } else { 0.0 };
    let status = ctx.add_step_variables(&owner, "status", 0.0, 1.0, VarKind::Binary)?;
    for (t, var) in status.iter().enumerate() {
        if t < nonconvex.first_flexible_timestep {
            ctx.fix(*var, initial);
        }
    }

    if nonconvex.needs_startups() {
        let startups = add_switches(ctx, key, &status, initial, Switch::Startup)?;
        if let Some(limit) = nonconvex.maximum_startups {
            let expr: LinearExpr = startups.iter().map(|var| (*var, 1.0)).collect();
            ctx.add_constraint(
                || format!("max_startup({key})"),
                &expr,
                f64::NEG_INFINITY,
                limit,
            )?;
        }
        if let Some(costs) = &nonconvex.startup_costs {
            add_weighted_costs(ctx, block, &startups, costs);
        }
    }
    if nonconvex.needs_shutdowns() {
        let shutdowns = add_switches(ctx, key, &status, initial, Switch::Shutdown)?;
        if let Some(limit) = nonconvex.maximum_shutdowns {
            let expr: LinearExpr = shutdowns.iter().map(|var| (*var, 1.0)).collect();
            ctx.add_constraint(
                || format!("max_shutdown({key})"),
                &expr,
                f64::NEG_INFINITY,
                limit,
            )?;
        }
        if let Some(costs) = &nonconvex.shutdown_costs {
            add_weighted_costs(ctx, block, &shutdowns, costs);
        }
    }

    if let Some(uptime) = &nonconvex.minimum_uptime {
        add_minimum_time(ctx, key, nonconvex, &status, uptime, Switch::Startup)?;
    }
    if let Some(downtime) = &nonconvex.minimum_downtime {
        add_minimum_time(ctx, key, nonconvex, &status, downtime, Switch::Shutdown)?;
    }

    if let Some(costs) = &nonconvex.activity_costs {
        add_weighted_costs(ctx, block, &status, costs);
    }
    if let Some(costs) = &nonconvex.inactivity_costs {
        let mut expr = LinearExpr::new();
        for (t, var) in status.iter().enumerate() {
            let cost = costs.get(t) * sets.occurrence_weight(t);
            expr.add_constant(cost);
            expr.add_term(*var, -cost);
        }
        ctx.add_objective(block, expr);
    }

    Ok(status)
}

/// Bound a flow by the capacity switched on: `min·status_nominal ≤ flow ≤ max·status_nominal`
pub(crate) fn add_status_nominal_bounds(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    flow: &Flow,
    status_nominal: &[VarId],
) -> Result<()> {
    for (t, nominal) in status_nominal.iter().enumerate() {
        let var = LinearExpr::from(ctx.flow(key, t)?);
        let expr = var.clone() - LinearExpr::term(*nominal, flow.max_at(t));
        ctx.add_constraint(
            || format!("max({key},{t})"),
            &expr,
            f64::NEG_INFINITY,
            0.0,
        )?;
        let expr = var - LinearExpr::term(*nominal, flow.min_at(t));
        ctx.add_constraint(|| format!("min({key},{t})"), &expr, 0.0, f64::INFINITY)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Switch {
    Startup,
    Shutdown,
}

impl Switch {
    fn name(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
        }
    }

    /// `status[t] − status[prev]` for startups and its negation for shutdowns
    fn change(self, status: VarId, prev: LinearExpr) -> LinearExpr {
        match self {
            Self::Startup => LinearExpr::from(status) - prev,
            Self::Shutdown => prev - LinearExpr::from(status),
        }
    }
}

/// Variables counting the switches of the status, using the initial status before the first step
fn add_switches(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    status: &[VarId],
    initial: f64,
    switch: Switch,
) -> Result<Vec<VarId>> {
    let sets = ctx.sets;
    let owner = ResultKey::Edge(key.clone());
    let switches =
        ctx.add_step_variables(&owner, switch.name(), 0.0, 1.0, VarKind::Continuous)?;
    for t in sets.timesteps() {
        let prev = match sets.previous(t) {
            Some(prev) => LinearExpr::from(status[prev]),
            None => LinearExpr::constant(initial),
        };
        let expr = switch.change(status[t], prev) - LinearExpr::from(switches[t]);
        ctx.add_constraint(
            || format!("{}({key},{t})", switch.name()),
            &expr,
            f64::NEG_INFINITY,
            0.0,
        )?;
    }
    Ok(switches)
}

/// Keep the status on (off) for the given number of steps after a startup (shutdown).
///
/// The window is truncated at the end of the horizon.
fn add_minimum_time(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    nonconvex: &NonConvex,
    status: &[VarId],
    steps: &Sequence,
    switch: Switch,
) -> Result<()> {
    let sets = ctx.sets;
    let num_timesteps = sets.num_timesteps();
    let name = match switch {
        Switch::Startup => "min_uptime",
        Switch::Shutdown => "min_downtime",
    };
    for t in sets.timesteps() {
        if t <= nonconvex.first_flexible_timestep || t + 1 >= num_timesteps {
            continue;
        }
        let Some(prev) = sets.previous(t) else {
            continue;
        };
        let duration = steps.get(t).round();
        if duration <= 0.0 {
            continue;
        }
        let end = (t + duration as usize).min(num_timesteps);
        let window: LinearExpr = status[t..end].iter().map(|var| (*var, 1.0)).collect();
        let switched = switch.change(status[t], LinearExpr::from(status[prev])) * duration;
        let expr = match switch {
            // Σ status ≥ up·startup
            Switch::Startup => switched - window,
            // Σ (1 − status) ≥ down·shutdown
            Switch::Shutdown => switched + window - LinearExpr::constant(duration),
        };
        ctx.add_constraint(
            || format!("{name}({key},{t})"),
            &expr,
            f64::NEG_INFINITY,
            0.0,
        )?;
    }
    Ok(())
}

/// Add `Σ var[t]·costs[t]·occurrence_weight(t)` to the objective
fn add_weighted_costs(ctx: &mut BlockContext<'_>, block: &str, vars: &[VarId], costs: &Sequence) {
    let sets = ctx.sets;
    let expr = vars
        .iter()
        .enumerate()
        .map(|(t, var)| (*var, costs.get(t) * sets.occurrence_weight(t)))
        .collect();
    ctx.add_objective(block, expr);
}

/// Constraints and costs of non-convex flows with a fixed capacity
#[derive(Debug, Clone, Copy, Default)]
pub struct NonConvexFlowBlock;

impl ConstraintBlock for NonConvexFlowBlock {
    fn name(&self) -> &str {
        "NonConvexFlowBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Flows(flows_of_kind(es, FlowBlockKind::NonConvex))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        for key in group.flows() {
            let flow = flow_of(es, key)?;
            let (Some(nonconvex), Some(capacity)) = (&flow.nonconvex, flow.fixed_capacity())
            else {
                continue;
            };
            let status = add_status(ctx, self.name(), key, nonconvex)?;

            let owner = ResultKey::Edge(key.clone());
            let status_nominal = ctx.add_step_variables(
                &owner,
                "status_nominal",
                0.0,
                capacity,
                VarKind::Continuous,
            )?;
            for (t, (nominal, status)) in status_nominal.iter().zip(&status).enumerate() {
                let expr = LinearExpr::from(*nominal) - LinearExpr::term(*status, capacity);
                ctx.add_constraint(|| format!("status_nominal({key},{t})"), &expr, 0.0, 0.0)?;
            }
            add_status_nominal_bounds(ctx, key, flow, &status_nominal)?;

            add_flow_limits(ctx, key, flow, CapacityRef::Fixed(capacity))?;
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
    use crate::options::NonConvex;
    use crate::results::Results;
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;

    /// A gas plant with a minimum load, an expensive backup and a fixed demand
    fn unit_commitment(nonconvex: NonConvex, demand: Vec<f64>) -> Results {
        let mut es = EnergySystem::with_uniform_steps(demand.len(), 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("gas")
                .output(
                    "el",
                    Flow::new()
                        .nominal_capacity(100.0)
                        .min(0.5)
                        .variable_costs(1.0)
                        .nonconvex(nonconvex),
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
                .input("el", Flow::new().nominal_capacity(1.0).fix(demand))
                .build()
                .unwrap(),
        )
        .unwrap();

        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        model.results().unwrap()
    }

    #[test]
    fn minimum_load_switches_off() {
        let results = unit_commitment(NonConvex::new(), vec![30.0, 80.0]);
        let gas = results.get(&ResultKey::edge("gas", "el")).unwrap();
        let status = gas.sequences.column("status").unwrap();
        assert_approx_eq!(f64, status[0], 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, status[1], 1.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 380.0, epsilon = 1e-6);
    }

    #[test]
    fn startup_costs() {
        let results = unit_commitment(NonConvex::new().startup_costs(100.0), vec![80.0, 80.0]);
        let gas = results.get(&ResultKey::edge("gas", "el")).unwrap();
        let startup = gas.sequences.column("startup").unwrap();
        assert_approx_eq!(f64, startup[0], 1.0, epsilon = 1e-6);
        assert_approx_eq!(f64, startup[1], 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 260.0, epsilon = 1e-6);
    }

    #[test]
    fn initial_status_avoids_startup() {
        let nonconvex = NonConvex::new().startup_costs(100.0).initial_status(true);
        let results = unit_commitment(nonconvex, vec![80.0, 80.0]);
        assert_approx_eq!(f64, results.meta.objective, 160.0, epsilon = 1e-6);
    }

    #[test]
    fn maximum_startups() {
        let free = unit_commitment(NonConvex::new(), vec![80.0, 10.0, 80.0]);
        assert_approx_eq!(f64, free.meta.objective, 260.0, epsilon = 1e-6);

        // Only one of the two peaks can be served by gas
        let limited = unit_commitment(
            NonConvex::new().maximum_startups(1.0),
            vec![80.0, 10.0, 80.0],
        );
        assert_approx_eq!(f64, limited.meta.objective, 980.0, epsilon = 1e-6);
    }

    #[test]
    fn inactivity_costs() {
        // Gas cannot run at its minimum load at t = 0 and pays for being off
        let results = unit_commitment(NonConvex::new().inactivity_costs(50.0), vec![30.0, 80.0]);
        assert_approx_eq!(f64, results.meta.objective, 430.0, epsilon = 1e-6);
    }
}
