//! Constraint blocks: each block adds the variables, rows and costs of one dialect.
//!
//! The default blocks cover the flow dialects (simple, investment, non-convex and their
//! combination) and the node types (bus, converter, offset converter, link, extraction turbine
//! and storage). Further blocks can
//! be injected into a [`Model`](crate::model::Model) to extend it; by default such a block handles
//! the nodes declaring its name as their constraint group.
use crate::energy_system::EnergySystem;
use crate::error::ModelError;
use crate::flow::{Flow, FlowKey};
use crate::groupings::{Group, nodes_in_constraint_group};
use crate::model::BlockContext;
use crate::node::Node;
use crate::program::{LinearExpr, VarId, VarKind};
use crate::sequence::Sequence;
use crate::variables::{VarIndex, VariableKey};
use anyhow::Result;

pub mod bus;
pub mod converter;
pub mod extraction_turbine_chp;
pub mod investment_flow;
pub mod invest_non_convex_flow;
pub mod link;
pub mod non_convex_flow;
pub mod offset_converter;
pub mod simple_flow;
pub mod storage;

pub use bus::BusBlock;
pub use converter::ConverterBlock;
pub use extraction_turbine_chp::ExtractionTurbineChpBlock;
pub use invest_non_convex_flow::InvestNonConvexFlowBlock;
pub use investment_flow::InvestmentFlowBlock;
pub use link::LinkBlock;
pub use non_convex_flow::NonConvexFlowBlock;
pub use offset_converter::OffsetConverterBlock;
pub use simple_flow::SimpleFlowBlock;
pub use storage::GenericStorageBlock;

/// A set of constraints built for a group of flows or nodes
pub trait ConstraintBlock {
    /// Name of the block, used for cost attribution and as the constraint group of custom nodes
    fn name(&self) -> &str;

    /// Select the members of the block
    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_in_constraint_group(es, self.name()))
    }

    /// Add the variables, rows and costs for `group`
    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()>;
}

/// The default blocks, in build order
pub fn default_blocks() -> Vec<Box<dyn ConstraintBlock>> {
    vec![
        Box::new(SimpleFlowBlock),
        Box::new(InvestmentFlowBlock),
        Box::new(NonConvexFlowBlock),
        Box::new(InvestNonConvexFlowBlock),
        Box::new(BusBlock),
        Box::new(ConverterBlock),
        Box::new(OffsetConverterBlock),
        Box::new(LinkBlock),
        Box::new(ExtractionTurbineChpBlock),
        Box::new(GenericStorageBlock),
    ]
}

/// Look up a flow of a group
pub(crate) fn flow_of<'e>(es: &'e EnergySystem, key: &FlowKey) -> Result<&'e Flow> {
    es.flow(key)
        .ok_or_else(|| ModelError::construction(format!("unknown flow {key}")).into())
}

/// Look up a node of a group
pub(crate) fn node_of<'e>(es: &'e EnergySystem, label: &str) -> Result<&'e Node> {
    es.node(label)
        .ok_or_else(|| ModelError::construction(format!("unknown node {label}")).into())
}

/// The capacity a flow's bounds refer to
#[derive(Debug, Clone, Copy)]
pub(crate) enum CapacityRef<'v> {
    /// A fixed nominal capacity
    Fixed(f64),
    /// The total capacity of each period
    Invested(&'v [VarId]),
}

impl CapacityRef<'_> {
    /// `factor` times the capacity in period `p`
    pub(crate) fn scaled(self, factor: f64, p: usize) -> LinearExpr {
        match self {
            Self::Fixed(capacity) => LinearExpr::constant(factor * capacity),
            Self::Invested(total) => LinearExpr::term(total[p], factor),
        }
    }

    /// `factor` times the capacity summed over `periods` periods
    pub(crate) fn scaled_sum(self, factor: f64, periods: usize) -> LinearExpr {
        match self {
            Self::Fixed(capacity) => LinearExpr::constant(factor * capacity * periods as f64),
            Self::Invested(total) => total.iter().map(|var| (*var, factor)).collect(),
        }
    }
}

/// Add the costs of the flow's energy: `Σ flow·variable_costs·weight`
pub(crate) fn add_variable_costs(
    ctx: &mut BlockContext<'_>,
    block: &str,
    key: &FlowKey,
    flow: &Flow,
) -> Result<()> {
    if flow.variable_costs.is_none() {
        return Ok(());
    }
    let sets = ctx.sets;
    let mut costs = LinearExpr::new();
    for t in sets.timesteps() {
        costs.add_term(
            ctx.flow(key, t)?,
            flow.variable_costs_at(t) * sets.objective_weight(t),
        );
    }
    ctx.add_objective(block, costs);
    Ok(())
}

/// Add fixed operation costs of a flow with a fixed capacity (multi-period models only)
pub(crate) fn add_fixed_capacity_costs(
    ctx: &mut BlockContext<'_>,
    block: &str,
    flow: &Flow,
) {
    let sets = ctx.sets;
    let (Some(capacity), Some(fixed_costs)) = (flow.fixed_capacity(), &flow.fixed_costs) else {
        return;
    };
    if !sets.multi_period {
        return;
    }
    let costs: f64 = sets
        .periods
        .iter()
        .enumerate()
        .map(|(p, period)| {
            fixed_costs.get(p)
                * capacity
                * f64::from(period.years)
                * sets.discount_factor(p, sets.discount_rate)
        })
        .sum();
    ctx.add_objective(block, LinearExpr::constant(costs));
}

/// Add full load time limits and gradient limits of a flow
pub(crate) fn add_flow_limits(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    flow: &Flow,
    capacity: CapacityRef<'_>,
) -> Result<()> {
    let sets = ctx.sets;
    if flow.full_load_time_max.is_some() || flow.full_load_time_min.is_some() {
        let mut energy = LinearExpr::new();
        for t in sets.timesteps() {
            energy.add_term(ctx.flow(key, t)?, sets.energy_weight(t));
        }
        if let Some(hours) = flow.full_load_time_max {
            let expr = energy.clone() - capacity.scaled_sum(hours, sets.num_periods());
            ctx.add_constraint(
                || format!("full_load_time_max({key})"),
                &expr,
                f64::NEG_INFINITY,
                0.0,
            )?;
        }
        if let Some(hours) = flow.full_load_time_min {
            let expr = energy - capacity.scaled_sum(hours, sets.num_periods());
            ctx.add_constraint(
                || format!("full_load_time_min({key})"),
                &expr,
                0.0,
                f64::INFINITY,
            )?;
        }
    }

    if let Some(limit) = &flow.positive_gradient_limit {
        add_gradient(ctx, key, limit, capacity, Direction::Positive)?;
    }
    if let Some(limit) = &flow.negative_gradient_limit {
        add_gradient(ctx, key, limit, capacity, Direction::Negative)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Positive,
    Negative,
}

/// Gradient variables bounded by `limit·capacity`, with the change between consecutive steps
/// limited by the gradient. Steps without a predecessor have a zero gradient.
fn add_gradient(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    limit: &Sequence,
    capacity: CapacityRef<'_>,
    direction: Direction,
) -> Result<()> {
    let sets = ctx.sets;
    let name = match direction {
        Direction::Positive => "positive_gradient",
        Direction::Negative => "negative_gradient",
    };

    for t in sets.timesteps() {
        let p = sets.period(t);
        let var_key = VariableKey::new(key.clone(), name, VarIndex::Step(t));
        let gradient = ctx.add_variable(var_key, 0.0, f64::INFINITY, VarKind::Continuous)?;
        match capacity {
            CapacityRef::Fixed(capacity) => {
                ctx.set_bounds(gradient, 0.0, limit.get(t) * capacity);
            }
            CapacityRef::Invested(_) => {
                let expr = LinearExpr::from(gradient) - capacity.scaled(limit.get(t), p);
                ctx.add_constraint(
                    || format!("{name}_limit({key},{t})"),
                    &expr,
                    f64::NEG_INFINITY,
                    0.0,
                )?;
            }
        }

        let Some(prev) = sets.previous(t) else {
            ctx.fix(gradient, 0.0);
            continue;
        };
        let change = match direction {
            Direction::Positive => {
                LinearExpr::from(ctx.flow(key, t)?) - LinearExpr::from(ctx.flow(key, prev)?)
            }
            Direction::Negative => {
                LinearExpr::from(ctx.flow(key, prev)?) - LinearExpr::from(ctx.flow(key, t)?)
            }
        };
        ctx.add_constraint(
            || format!("{name}({key},{t})"),
            &(change - LinearExpr::from(gradient)),
            f64::NEG_INFINITY,
            0.0,
        )?;
    }
    Ok(())
}

/// Bound a flow by its capacity: `min·capacity ≤ flow ≤ max·capacity`, or pin it with `fix`
pub(crate) fn add_capacity_bounds(
    ctx: &mut BlockContext<'_>,
    key: &FlowKey,
    flow: &Flow,
    capacity: CapacityRef<'_>,
) -> Result<()> {
    let sets = ctx.sets;
    for t in sets.timesteps() {
        let p = sets.period(t);
        let var = LinearExpr::from(ctx.flow(key, t)?);
        if flow.fix.is_some() {
            let expr = var - capacity.scaled(flow.min_at(t), p);
            ctx.add_constraint(|| format!("fixed({key},{t})"), &expr, 0.0, 0.0)?;
            continue;
        }

        let expr = var.clone() - capacity.scaled(flow.max_at(t), p);
        ctx.add_constraint(
            || format!("max({key},{t})"),
            &expr,
            f64::NEG_INFINITY,
            0.0,
        )?;
        let min = flow.min_at(t);
        if min != 0.0 {
            let expr = var - capacity.scaled(min, p);
            ctx.add_constraint(|| format!("min({key},{t})"), &expr, 0.0, f64::INFINITY)?;
        }
    }
    Ok(())
}
