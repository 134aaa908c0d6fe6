//! Storage content dynamics of generic storages.
//!
//! The content is defined on timepoints, so a grid of `T` steps has `T + 1` content variables.
//! When the grid holds typical clusters, the content is split into a trajectory within each
//! cluster (`storage_content_intra`, starting at zero) and the content at the start of every
//! position of the restored timeline (`storage_content_inter`).
use super::investment_flow::add_investment;
use super::{CapacityRef, ConstraintBlock, node_of};
use crate::components::{StorageParams, storage_flow_keys};
use crate::energy_system::EnergySystem;
use crate::error::construction_bail;
use crate::flow::{Capacity, FlowKey};
use crate::groupings::{Group, nodes_where};
use crate::id::NodeLabel;
use crate::model::{BlockContext, ModelSets, TsaPeriod};
use crate::program::{LinearExpr, VarId, VarKind};
use crate::variables::{ResultKey, VarIndex, VariableKey};
use anyhow::{Context, Result};

/// Share of the content of a storage kept over step `t`
pub(crate) fn retention(params: &StorageParams, sets: &ModelSets, t: usize) -> f64 {
    1.0 - params.loss_rate.get(t) * sets.timeincrement[t]
}

/// A storage together with the flows and capacity its rows refer to
struct StorageRef<'a> {
    label: &'a NodeLabel,
    params: &'a StorageParams,
    inflow: FlowKey,
    outflow: FlowKey,
    capacity: Option<CapacityRef<'a>>,
}

impl StorageRef<'_> {
    fn owner(&self) -> ResultKey {
        ResultKey::Node(self.label.clone())
    }

    /// `factor` times the capacity in period `p` (zero for an unbounded storage)
    fn capacity(&self, factor: f64, p: usize) -> LinearExpr {
        self.capacity
            .map_or_else(LinearExpr::new, |capacity| capacity.scaled(factor, p))
    }

    fn retention(&self, sets: &ModelSets, t: usize) -> f64 {
        retention(self.params, sets, t)
    }

    /// Change of content over step `t` apart from the relative loss
    fn net_inflow(&self, ctx: &BlockContext<'_>, t: usize) -> Result<LinearExpr> {
        let sets = ctx.sets;
        let params = self.params;
        let dt = sets.timeincrement[t];
        let mut expr = LinearExpr::term(
            ctx.flow(&self.inflow, t)?,
            params.inflow_conversion_factor.get(t) * dt,
        );
        expr.add_term(
            ctx.flow(&self.outflow, t)?,
            -dt / params.outflow_conversion_factor.get(t),
        );
        expr.add_constant(-params.fixed_losses_absolute.get(t) * dt);
        Ok(expr - self.capacity(params.fixed_losses_relative.get(t), sets.period(t)))
    }

    /// Bound `content` (the content at timepoint `t` of period `p`) by the storage levels
    fn add_level_rows(
        &self,
        ctx: &mut BlockContext<'_>,
        content: &LinearExpr,
        t: usize,
        p: usize,
    ) -> Result<()> {
        let label = self.label;
        let max = self.params.max_level_at(t);
        let min = self.params.min_level_at(t);
        if self.capacity.is_some() {
            ctx.add_constraint(
                || format!("max_storage_content({label},{t})"),
                &(content.clone() - self.capacity(max, p)),
                f64::NEG_INFINITY,
                0.0,
            )?;
        }
        ctx.add_constraint(
            || format!("min_storage_content({label},{t})"),
            &(content.clone() - self.capacity(min, p)),
            0.0,
            f64::INFINITY,
        )?;
        Ok(())
    }
}

/// Content, balance, level and cost rows of generic storages
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericStorageBlock;

impl ConstraintBlock for GenericStorageBlock {
    fn name(&self) -> &str {
        "GenericStorageBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| node.storage().is_some()))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let Some(params) = node.storage() else {
                continue;
            };
            let Some((inflow, outflow)) = storage_flow_keys(label, &node.inputs, &node.outputs)
            else {
                construction_bail!("storage {label} needs exactly one input and one output");
            };

            let owner = ResultKey::Node(label.clone());
            let investment = match params.investment() {
                Some(investment) => Some(add_investment(
                    ctx,
                    self.name(),
                    &owner,
                    investment,
                    None,
                )?),
                None => None,
            };
            let capacity = match (&params.nominal_capacity, &investment) {
                (Capacity::Fixed(capacity), _) => Some(CapacityRef::Fixed(*capacity)),
                (_, Some(vars)) => Some(CapacityRef::Invested(&vars.total)),
                _ => None,
            };
            let storage = StorageRef {
                label,
                params,
                inflow,
                outflow,
                capacity,
            };

            match &sets.tsa {
                Some(tsa) => {
                    let mut previous_end = None;
                    for (p, tsa_period) in tsa.iter().enumerate() {
                        let end = add_typical_content(
                            ctx,
                            self.name(),
                            &storage,
                            p,
                            tsa_period,
                            previous_end,
                        )?;
                        previous_end = Some(end);
                    }
                }
                None => add_content(ctx, self.name(), &storage)?,
            }
            let total = investment.as_ref().map(|vars| vars.total.as_slice());
            add_invest_relations(ctx, &storage, total)?;
        }
        Ok(())
    }
}

/// Content variables on the timepoints with balance, level, cyclic and cost terms
fn add_content(ctx: &mut BlockContext<'_>, block: &str, storage: &StorageRef<'_>) -> Result<()> {
    let sets = ctx.sets;
    let params = storage.params;
    let label = storage.label;
    let last_step = sets.num_timesteps() - 1;

    let mut content = Vec::with_capacity(sets.num_timesteps() + 1);
    for t in sets.timepoints() {
        let (lower, upper) = match storage.capacity {
            Some(CapacityRef::Fixed(capacity)) => (
                params.min_level_at(t) * capacity,
                params.max_level_at(t) * capacity,
            ),
            _ => (0.0, f64::INFINITY),
        };
        let key = VariableKey::new(storage.owner(), "storage_content", VarIndex::Timepoint(t));
        let var = ctx.add_variable(key, lower, upper, VarKind::Continuous)?;
        if let Some(CapacityRef::Invested(_)) = storage.capacity {
            let p = sets.period(t.min(last_step));
            storage.add_level_rows(ctx, &LinearExpr::from(var), t, p)?;
        }
        content.push(var);
    }

    for t in sets.timesteps() {
        let expr = LinearExpr::from(content[t + 1])
            - LinearExpr::term(content[t], storage.retention(sets, t))
            - storage.net_inflow(ctx, t)?;
        ctx.add_constraint(|| format!("balance({label},{t})"), &expr, 0.0, 0.0)?;
    }

    for (p, period) in sets.periods.iter().enumerate() {
        let start = content[period.steps.start];
        if params.balanced {
            let expr = LinearExpr::from(content[period.steps.end]) - LinearExpr::from(start);
            ctx.add_constraint(|| format!("balanced_cstr({label},{p})"), &expr, 0.0, 0.0)?;
        }
        if let Some(level) = params.initial_storage_level
            && (p == 0 || params.balanced)
        {
            let expr = LinearExpr::from(start) - storage.capacity(level, p);
            ctx.add_constraint(|| format!("initial_content({label},{p})"), &expr, 0.0, 0.0)?;
        }
    }

    if let Some(costs) = &params.storage_costs {
        let expr = sets
            .timesteps()
            .map(|t| (content[t + 1], costs.get(t) * sets.objective_weight(t)))
            .collect();
        ctx.add_objective(block, expr);
    }
    Ok(())
}

/// Content of a storage whose period `p` holds typical clusters.
///
/// The content at step `g` of position `i` of the restored timeline is
/// `inter[i]·decay(k, g) + intra[k, g]` with `k = order[i]`, where `decay` is the share of the
/// content at the start of the cluster kept until step `g`.
///
/// A non-balanced storage starts period `p` with `previous_end`, the content at the end of the
/// period before. Returns the content at the end of period `p`.
fn add_typical_content(
    ctx: &mut BlockContext<'_>,
    block: &str,
    storage: &StorageRef<'_>,
    p: usize,
    tsa: &TsaPeriod,
    previous_end: Option<VarId>,
) -> Result<VarId> {
    let sets = ctx.sets;
    let params = storage.params;
    let label = storage.label;
    let steps = tsa.timesteps_per_period;

    let mut intra = Vec::with_capacity(tsa.num_clusters);
    for cluster in 0..tsa.num_clusters {
        let vars = (0..=steps)
            .map(|step| {
                let index = VarIndex::Typical {
                    period: p,
                    cluster,
                    step,
                };
                let key = VariableKey::new(storage.owner(), "storage_content_intra", index);
                ctx.add_variable(key, f64::NEG_INFINITY, f64::INFINITY, VarKind::Continuous)
            })
            .collect::<Result<Vec<_>>>()?;
        ctx.fix(vars[0], 0.0);
        for g in 0..steps {
            let t = tsa.timestep(cluster, g);
            let expr = LinearExpr::from(vars[g + 1])
                - LinearExpr::term(vars[g], storage.retention(sets, t))
                - storage.net_inflow(ctx, t)?;
            ctx.add_constraint(
                || format!("intra_balance({label},{p},{cluster},{g})"),
                &expr,
                0.0,
                0.0,
            )?;
        }
        intra.push(vars);
    }
    let decay = |cluster: usize, g: usize| -> f64 {
        (0..g)
            .map(|step| storage.retention(sets, tsa.timestep(cluster, step)))
            .product()
    };

    let positions = tsa.order.len();
    let inter = (0..=positions)
        .map(|position| {
            let index = VarIndex::Inter {
                period: p,
                position,
            };
            let key = VariableKey::new(storage.owner(), "storage_content_inter", index);
            ctx.add_variable(key, 0.0, f64::INFINITY, VarKind::Continuous)
        })
        .collect::<Result<Vec<_>>>()?;

    for (i, cluster) in tsa.order.iter().copied().enumerate() {
        let expr = LinearExpr::from(inter[i + 1])
            - LinearExpr::term(inter[i], decay(cluster, steps))
            - LinearExpr::from(intra[cluster][steps]);
        ctx.add_constraint(
            || format!("inter_balance({label},{p},{i})"),
            &expr,
            0.0,
            0.0,
        )?;
        for g in 0..steps {
            let content =
                LinearExpr::term(inter[i], decay(cluster, g)) + LinearExpr::from(intra[cluster][g]);
            storage.add_level_rows(ctx, &content, tsa.timestep(cluster, g), p)?;
        }
    }
    let last_step = sets.periods[p].steps.end - 1;
    storage.add_level_rows(ctx, &LinearExpr::from(inter[positions]), last_step + 1, p)?;

    if params.balanced {
        let expr = LinearExpr::from(inter[positions]) - LinearExpr::from(inter[0]);
        ctx.add_constraint(|| format!("balanced_cstr({label},{p})"), &expr, 0.0, 0.0)?;
    }
    if let Some(level) = params.initial_storage_level
        && (p == 0 || params.balanced)
    {
        let expr = LinearExpr::from(inter[0]) - storage.capacity(level, p);
        ctx.add_constraint(|| format!("initial_content({label},{p})"), &expr, 0.0, 0.0)?;
    }
    if let Some(previous_end) = previous_end
        && !params.balanced
    {
        let expr = LinearExpr::from(inter[0]) - LinearExpr::from(previous_end);
        ctx.add_constraint(|| format!("period_link({label},{p})"), &expr, 0.0, 0.0)?;
    }

    // Every position of the restored timeline pays for its own content
    if let Some(costs) = &params.storage_costs {
        let mut expr = LinearExpr::new();
        for (i, cluster) in tsa.order.iter().copied().enumerate() {
            for g in 0..steps {
                let t = tsa.timestep(cluster, g);
                let weight = costs.get(t)
                    * sets.objective_weighting[t]
                    * sets.discount_factor(p, sets.discount_rate);
                expr.add_term(inter[i], weight * decay(cluster, g + 1));
                expr.add_term(intra[cluster][g + 1], weight);
            }
        }
        ctx.add_objective(block, expr);
    }
    Ok(inter[positions])
}

/// The total invested capacity of a storage flow in period `p`
fn flow_total(
    ctx: &BlockContext<'_>,
    label: &NodeLabel,
    flow: &FlowKey,
    p: usize,
) -> Result<VarId> {
    ctx.var(&VariableKey::new(flow.clone(), "total", VarIndex::Period(p)))
        .with_context(|| {
            format!("The invest relations of {label} need an investment on {flow}")
        })
}

/// Couple the invested charging, discharging and storage capacities
fn add_invest_relations(
    ctx: &mut BlockContext<'_>,
    storage: &StorageRef<'_>,
    capacity: Option<&[VarId]>,
) -> Result<()> {
    let sets = ctx.sets;
    let params = storage.params;
    let label = storage.label;
    for p in 0..sets.num_periods() {
        let capacity = capacity.map(|total| LinearExpr::from(total[p]));
        let relations = [
            (
                "storage_capacity_inflow",
                params.invest_relation_input_capacity,
                &storage.inflow,
            ),
            (
                "storage_capacity_outflow",
                params.invest_relation_output_capacity,
                &storage.outflow,
            ),
        ];
        for (name, ratio, flow) in relations {
            let Some(ratio) = ratio else { continue };
            let Some(capacity) = &capacity else {
                construction_bail!(
                    "{name} of {label} needs an investment in the storage capacity"
                );
            };
            let expr = LinearExpr::term(flow_total(ctx, label, flow, p)?, ratio) - capacity.clone();
            ctx.add_constraint(|| format!("{name}({label},{p})"), &expr, 0.0, 0.0)?;
        }

        if let Some(ratio) = params.invest_relation_input_output {
            let input = flow_total(ctx, label, &storage.inflow, p)?;
            let output = flow_total(ctx, label, &storage.outflow, p)?;
            let expr = LinearExpr::term(input, ratio) - LinearExpr::from(output);
            ctx.add_constraint(|| format!("power_coupled({label},{p})"), &expr, 0.0, 0.0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::components::{Bus, GenericStorage, Sink, Source};
    use crate::energy_system::{EnergySystem, TsaParameters};
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::options::Investment;
    use crate::results::Results;
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;

    /// A grid with time-varying prices, a demand and the given storage
    fn arbitrage(prices: Vec<f64>, demand: Vec<f64>, storage: GenericStorage) -> EnergySystem {
        let mut es = EnergySystem::with_uniform_steps(prices.len(), 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("grid")
                .output("el", Flow::new().variable_costs(prices))
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
        es.add(
            storage
                .input("el", Flow::new())
                .output("el", Flow::new())
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

    fn content(results: &Results) -> Vec<f64> {
        results
            .get(&ResultKey::node("battery"))
            .unwrap()
            .sequences
            .column("storage_content")
            .unwrap()
            .to_vec()
    }

    #[test]
    fn shifts_energy_to_expensive_step() {
        let storage = GenericStorage::new("battery")
            .nominal_capacity(20.0)
            .initial_storage_level(0.0)
            .balanced(false);
        let results = solve(&arbitrage(vec![1.0, 5.0], vec![10.0, 10.0], storage));
        let content = content(&results);
        assert_eq!(content.len(), 3);
        assert_approx_eq!(f64, content[1], 10.0, epsilon = 1e-6);
        assert_approx_eq!(f64, content[2], 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn loss_rate() {
        // Half of the content is lost per hour, so 20 must be charged to discharge 10
        let storage = GenericStorage::new("battery")
            .nominal_capacity(100.0)
            .initial_storage_level(0.0)
            .balanced(false)
            .loss_rate(0.5);
        let results = solve(&arbitrage(vec![1.0, 5.0], vec![0.0, 10.0], storage));
        assert_approx_eq!(f64, content(&results)[1], 20.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn balanced_returns_to_initial_level() {
        let storage = GenericStorage::new("battery")
            .nominal_capacity(10.0)
            .initial_storage_level(0.5);
        let results = solve(&arbitrage(vec![1.0, 1.0, 5.0], vec![1.0, 1.0, 1.0], storage));
        let content = content(&results);
        assert_approx_eq!(f64, content[0], 5.0, epsilon = 1e-6);
        assert_approx_eq!(f64, content[3], 5.0, epsilon = 1e-6);
        // The expensive step is served from the storage and refilled beforehand
        assert_approx_eq!(f64, results.meta.objective, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn invests_in_capacity() {
        let storage = GenericStorage::new("battery")
            .investment(Investment::new().ep_costs(1.0))
            .initial_storage_level(0.0)
            .balanced(false);
        let results = solve(&arbitrage(vec![1.0, 5.0], vec![0.0, 10.0], storage));
        let battery = results.get(&ResultKey::node("battery")).unwrap();
        assert_approx_eq!(f64, battery.scalars["invest"], 10.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn typical_clusters_carry_content() {
        let storage = GenericStorage::new("battery")
            .nominal_capacity(30.0)
            .initial_storage_level(0.0)
            .balanced(false);
        let es = arbitrage(
            vec![1.0, 1.0, 5.0, 5.0],
            vec![0.0, 0.0, 10.0, 10.0],
            storage,
        )
        .with_tsa_parameters(vec![TsaParameters::new(2, vec![0, 1])]);
        let results = solve(&es);

        // Charged in the first cluster, discharged in the second
        let content = content(&results);
        assert_approx_eq!(f64, content[2], 20.0, epsilon = 1e-6);
        assert_approx_eq!(f64, content[4], 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, results.meta.objective, 20.0, epsilon = 1e-6);
    }
}
