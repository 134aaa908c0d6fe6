//! Flows whose capacity is sized by the optimisation.
//!
//! The investment variables are shared with storages: [`add_investment`] creates `invest`,
//! `total` and (for non-convex investments) `invest_status` for any owner and adds the investment
//! and fixed operation costs.
use super::{
    CapacityRef, ConstraintBlock, add_capacity_bounds, add_flow_limits, add_variable_costs, flow_of,
};
use crate::energy_system::EnergySystem;
use crate::finance::{discount_factor, remaining_value_factor};
use crate::groupings::{FlowBlockKind, Group, flows_of_kind};
use crate::model::{BlockContext, ModelSets};
use crate::options::Investment;
use crate::program::{LinearExpr, VarId, VarKind};
use crate::sequence::Sequence;
use crate::variables::{ResultKey, VarIndex, VariableKey};
use anyhow::Result;
use log::warn;

/// The variables describing an investment
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InvestmentVars {
    /// Capacity built in each period
    pub invest: Vec<VarId>,
    /// Capacity installed in each period
    pub total: Vec<VarId>,
    /// Whether anything is built in each period (non-convex investments only)
    pub status: Option<Vec<VarId>>,
}

/// Whether capacity built in period `built` is still in operation in period `p`
fn is_alive(sets: &ModelSets, lifetime: Option<u32>, built: usize, p: usize) -> bool {
    built <= p
        && lifetime.is_none_or(|lifetime| {
            sets.periods[p].start_year - sets.periods[built].start_year < lifetime
        })
}

/// The part of the existing capacity still in operation in period `p`
fn existing_at(sets: &ModelSets, investment: &Investment, p: usize) -> f64 {
    match investment.lifetime {
        Some(lifetime) if lifetime.saturating_sub(investment.age) <= sets.periods[p].start_year => {
            0.0
        }
        _ => investment.existing,
    }
}

/// Add the variables, rows and costs of an investment.
///
/// # Arguments
///
/// * `ctx` - The block context
/// * `block` - The block the costs are attributed to
/// * `owner` - The flow or storage owning the investment
/// * `investment` - The investment parameters
/// * `fallback_fixed_costs` - Fixed costs used if the investment sets none (those of the flow)
pub(crate) fn add_investment(
    ctx: &mut BlockContext<'_>,
    block: &str,
    owner: &ResultKey,
    investment: &Investment,
    fallback_fixed_costs: Option<&Sequence>,
) -> Result<InvestmentVars> {
    let sets = ctx.sets;
    let mut invest = Vec::with_capacity(sets.num_periods());
    let mut status = investment.nonconvex.then(Vec::new);
    for p in 0..sets.num_periods() {
        let (minimum, maximum) = (investment.minimum.get(p), investment.maximum.get(p));
        let key = VariableKey::new(owner.clone(), "invest", VarIndex::Period(p));
        if let Some(status) = &mut status {
            let var = ctx.add_variable(key, 0.0, maximum, VarKind::Continuous)?;
            let key = VariableKey::new(owner.clone(), "invest_status", VarIndex::Period(p));
            let built = ctx.add_variable(key, 0.0, 1.0, VarKind::Binary)?;
            ctx.add_constraint(
                || format!("invest_min({owner},{p})"),
                &(LinearExpr::from(var) - LinearExpr::term(built, minimum)),
                0.0,
                f64::INFINITY,
            )?;
            ctx.add_constraint(
                || format!("invest_max({owner},{p})"),
                &(LinearExpr::from(var) - LinearExpr::term(built, maximum)),
                f64::NEG_INFINITY,
                0.0,
            )?;
            status.push(built);
            invest.push(var);
        } else {
            invest.push(ctx.add_variable(key, minimum, maximum, VarKind::Continuous)?);
        }
    }

    if sets.multi_period && investment.lifetime.is_none() {
        warn!("{owner}: no lifetime given, invested capacity is never decommissioned");
    }
    let mut total = Vec::with_capacity(sets.num_periods());
    for p in 0..sets.num_periods() {
        let key = VariableKey::new(owner.clone(), "total", VarIndex::Period(p));
        let var = ctx.add_variable(key, 0.0, f64::INFINITY, VarKind::Continuous)?;
        let mut expr = LinearExpr::from(var);
        for (built, invest) in invest.iter().enumerate() {
            if is_alive(sets, investment.lifetime, built, p) {
                expr.add_term(*invest, -1.0);
            }
        }
        let existing = existing_at(sets, investment, p);
        ctx.add_constraint(|| format!("total({owner},{p})"), &expr, existing, existing)?;

        if let Some(overall_maximum) = investment.overall_maximum {
            ctx.set_bounds(var, 0.0, overall_maximum);
        }
        total.push(var);
    }
    if let (Some(overall_minimum), Some(last)) = (investment.overall_minimum, total.last()) {
        ctx.add_constraint(
            || format!("overall_minimum({owner})"),
            &LinearExpr::from(*last),
            overall_minimum,
            f64::INFINITY,
        )?;
    }

    let rate = interest_rate(ctx, owner, investment);
    let mut costs = investment_costs(ctx, investment, rate, &invest);
    if let Some(status) = &status {
        for (p, built) in status.iter().enumerate() {
            costs.add_term(*built, investment.offset.get(p) * sets.discount_factor(p, rate));
        }
    }
    ctx.add_investment_costs(block, costs);
    let fixed_costs = investment.fixed_costs.as_ref().or(fallback_fixed_costs);
    if let Some(fixed_costs) = fixed_costs {
        let costs = operation_costs(ctx, fixed_costs, &total)?;
        ctx.add_objective(block, costs);
    }

    Ok(InvestmentVars {
        invest,
        total,
        status,
    })
}

/// The rate discounting investment expenditure
fn interest_rate(ctx: &BlockContext<'_>, owner: &ResultKey, investment: &Investment) -> f64 {
    match investment.interest_rate {
        Some(rate) => rate,
        None => {
            if ctx.sets.multi_period {
                warn!(
                    "{owner}: no interest_rate given, using the model discount rate {}",
                    ctx.sets.discount_rate
                );
            }
            ctx.sets.discount_rate
        }
    }
}

/// Investment annuities and the remaining value at the horizon
fn investment_costs(
    ctx: &BlockContext<'_>,
    investment: &Investment,
    rate: f64,
    invest: &[VarId],
) -> LinearExpr {
    let sets = ctx.sets;
    let mut costs = LinearExpr::new();

    if !sets.multi_period {
        costs.add_term(invest[0], investment.ep_costs.get(0));
    } else {
        let last = sets.num_periods() - 1;
        for (p, var) in invest.iter().enumerate() {
            // The annuity is paid in every period the capacity is in operation
            let annuities: f64 = (p..sets.num_periods())
                .filter(|alive| is_alive(sets, investment.lifetime, p, *alive))
                .map(|alive| sets.discount_factor(alive, rate))
                .sum();
            costs.add_term(*var, investment.ep_costs.get(p) * annuities);

            if ctx.es.use_remaining_value()
                && let Some(lifetime) = investment.lifetime
            {
                let remaining = (sets.periods[p].start_year + lifetime)
                    .saturating_sub(sets.end_year());
                let factor = remaining_value_factor(
                    rate,
                    sets.end_year(),
                    remaining,
                    sets.periods[last].years,
                );
                let value = investment.ep_costs.get(p) - investment.ep_costs.get(last);
                costs.add_term(*var, -value * factor);
            }
        }
    }

    costs
}

/// Fixed operation costs of the installed capacity over the years of each period
fn operation_costs(
    ctx: &BlockContext<'_>,
    fixed_costs: &Sequence,
    total: &[VarId],
) -> Result<LinearExpr> {
    let sets = ctx.sets;
    let mut costs = LinearExpr::new();
    for (p, var) in total.iter().enumerate() {
        let years = f64::from(sets.periods[p].years);
        let factor = if sets.multi_period {
            discount_factor(sets.discount_rate, sets.periods[p].start_year)
        } else {
            1.0
        };
        costs.add_term(*var, fixed_costs.try_get(p)? * years * factor);
    }
    Ok(costs)
}

/// Constraints and costs of flows with an investment
#[derive(Debug, Clone, Copy, Default)]
pub struct InvestmentFlowBlock;

impl ConstraintBlock for InvestmentFlowBlock {
    fn name(&self) -> &str {
        "InvestmentFlowBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Flows(flows_of_kind(es, FlowBlockKind::Investment))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        for key in group.flows() {
            let flow = flow_of(es, key)?;
            let Some(investment) = flow.investment_record() else {
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
            add_capacity_bounds(ctx, key, flow, CapacityRef::Invested(&vars.total))?;
            add_flow_limits(ctx, key, flow, CapacityRef::Invested(&vars.total))?;
            add_variable_costs(ctx, self.name(), key, flow)?;
        }
        Ok(())
    }
}
