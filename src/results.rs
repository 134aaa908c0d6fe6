//! Results of a solved model, keyed by the flow or node they belong to.
//!
//! Time-indexed values are reported on the restored timeline: with typical clusters, every
//! position of the cluster order repeats the values of its cluster and storage contents are
//! rebuilt from the intra- and inter-cluster contents. All sequence columns have one row per
//! timepoint; columns defined on time steps are padded with `NaN` in the last row.
use crate::blocks::storage::retention;
use crate::error::ModelError;
use crate::id::NodeLabel;
use crate::model::{Model, ModelSets};
use crate::node::Capability;
use crate::solver::TerminationCondition;
use crate::variables::{ResultKey, VarIndex};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::iter;

/// Time-indexed results of one entity, one column per variable family
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequences {
    columns: IndexMap<String, Vec<f64>>,
}

impl Sequences {
    /// The values of a variable family, if the entity has it
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// All columns in the order the variables were created
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Whether there are no time-indexed results
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn insert(&mut self, name: &str, values: Vec<f64>) {
        self.columns.insert(name.to_string(), values);
    }
}

/// All results of a flow or node
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityResults {
    /// Time-indexed values
    pub sequences: Sequences,
    /// Scalar decisions of a single-period model (e.g. `invest`, `total`)
    pub scalars: IndexMap<String, f64>,
    /// Scalar decisions of a multi-period model, one value per period
    pub period_scalars: IndexMap<String, Vec<f64>>,
}

/// Summary information about the solved model
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    /// Objective value
    pub objective: f64,
    /// Contribution of every block to the objective
    pub objective_breakdown: IndexMap<String, f64>,
    /// How the solver finished
    pub termination: TerminationCondition,
    /// Number of columns
    pub num_variables: usize,
    /// Number of integer and binary columns
    pub num_integer_variables: usize,
    /// Number of rows
    pub num_constraints: usize,
}

/// Type and capabilities of a node, kept for filtering results
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// Short name of the kind of node, e.g. `Bus` or `GenericStorage`
    pub type_name: &'static str,
    /// Capabilities of the node
    pub capabilities: Vec<Capability>,
}

/// The results of a solved model
#[derive(Debug, Clone, PartialEq)]
pub struct Results {
    entries: IndexMap<ResultKey, EntityResults>,
    nodes: IndexMap<NodeLabel, NodeInfo>,
    timeindex: Option<Vec<NaiveDateTime>>,
    multi_period: bool,
    /// Objective, termination status and model size
    pub meta: Meta,
}

/// Raw values of one variable family before lifting
#[derive(Debug, Default)]
struct Families {
    steps: IndexMap<(ResultKey, &'static str), Vec<f64>>,
    timepoints: IndexMap<(ResultKey, &'static str), Vec<f64>>,
    periods: IndexMap<(ResultKey, &'static str), Vec<f64>>,
    intra: IndexMap<NodeLabel, IndexMap<(usize, usize, usize), f64>>,
    inter: IndexMap<NodeLabel, IndexMap<(usize, usize), f64>>,
}

impl Results {
    /// Collect the results of a solved model
    pub(crate) fn from_model(model: &Model<'_>) -> Result<Self> {
        let solution = model.solution().ok_or_else(|| ModelError::MissingResult {
            key: "the solution of an unsolved model".to_string(),
        })?;
        let sets = model.sets();
        let es = model.energy_system();
        let num_timesteps = sets.num_timesteps();
        let mut families = Families::default();
        for (key, var) in model.variables().iter() {
            let family = (key.owner.clone(), key.name);
            let value = solution.columns[var.index()];
            match key.index {
                VarIndex::Step(t) => {
                    families
                        .steps
                        .entry(family)
                        .or_insert_with(|| vec![f64::NAN; num_timesteps])[t] = value;
                }
                VarIndex::Timepoint(t) => {
                    families
                        .timepoints
                        .entry(family)
                        .or_insert_with(|| vec![f64::NAN; num_timesteps + 1])[t] = value;
                }
                VarIndex::Period(p) => {
                    families
                        .periods
                        .entry(family)
                        .or_insert_with(|| vec![f64::NAN; sets.num_periods()])[p] = value;
                }
                VarIndex::Typical {
                    period,
                    cluster,
                    step,
                } => {
                    if let ResultKey::Node(label) = &key.owner {
                        families
                            .intra
                            .entry(label.clone())
                            .or_default()
                            .insert((period, cluster, step), value);
                    }
                }
                VarIndex::Inter { period, position } => {
                    if let ResultKey::Node(label) = &key.owner {
                        families
                            .inter
                            .entry(label.clone())
                            .or_default()
                            .insert((period, position), value);
                    }
                }
            }
        }
        if let Some(duals) = &solution.row_duals {
            for key in model.dual_keys() {
                let family = (ResultKey::Node(key.bus.clone()), "duals");
                families
                    .steps
                    .entry(family)
                    .or_insert_with(|| vec![f64::NAN; num_timesteps])[key.timestep] =
                    duals[key.row.index()];
            }
        }

        let restored = restored_steps(sets);
        let mut entries: IndexMap<ResultKey, EntityResults> = IndexMap::new();
        for ((owner, name), values) in families.steps {
            let lifted = restored
                .iter()
                .map(|t| values[*t])
                .chain(iter::once(f64::NAN))
                .collect();
            entries.entry(owner).or_default().sequences.insert(name, lifted);
        }
        for ((owner, name), values) in families.timepoints {
            entries.entry(owner).or_default().sequences.insert(name, values);
        }
        for ((owner, name), values) in families.periods {
            let entity = entries.entry(owner).or_default();
            if sets.multi_period {
                entity.period_scalars.insert(name.to_string(), values);
            } else {
                entity.scalars.insert(name.to_string(), values[0]);
            }
        }
        for (label, inter) in &families.inter {
            let params = es
                .node(label.as_str())
                .and_then(|node| node.storage())
                .with_context(|| format!("{label} has typical contents but is no storage"))?;
            let intra = families
                .intra
                .get(label)
                .with_context(|| format!("{label} has no intra-cluster storage contents"))?;
            let content = typical_storage_content(sets, inter, intra, |t| {
                retention(params, sets, t)
            })?;
            entries
                .entry(ResultKey::Node(label.clone()))
                .or_default()
                .sequences
                .insert("storage_content", content);
        }
        entries.sort_keys();

        let program = model.program();
        let meta = Meta {
            objective: solution.objective,
            objective_breakdown: model
                .objective_terms()
                .iter()
                .map(|(block, expr)| (block.clone(), expr.evaluate(&solution.columns)))
                .collect(),
            termination: solution.termination.clone(),
            num_variables: program.num_variables(),
            num_integer_variables: program.num_integer_variables(),
            num_constraints: program.num_constraints(),
        };
        let nodes = es
            .nodes()
            .map(|node| {
                let info = NodeInfo {
                    type_name: node.kind.type_name(),
                    capabilities: node.kind.capabilities().to_vec(),
                };
                (node.label.clone(), info)
            })
            .collect();

        Ok(Self {
            entries,
            nodes,
            timeindex: sets.tsa.is_none().then(|| es.timeindex()).flatten().map(<[_]>::to_vec),
            multi_period: sets.multi_period,
            meta,
        })
    }

    /// The results of a flow or node
    pub fn get(&self, key: &ResultKey) -> Result<&EntityResults> {
        self.entries.get(key).ok_or_else(|| {
            ModelError::MissingResult {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// The period scalars of a flow or node.
    ///
    /// Fails with [`ModelError::NotMultiPeriod`] for single-period models, whose scalars are
    /// reported in [`EntityResults::scalars`].
    pub fn period_scalars(&self, key: &ResultKey) -> Result<&IndexMap<String, Vec<f64>>> {
        if !self.multi_period {
            return Err(ModelError::NotMultiPeriod.into());
        }
        Ok(&self.get(key)?.period_scalars)
    }

    /// All entries, sorted by key
    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, &EntityResults)> {
        self.entries.iter()
    }

    /// All keys, sorted
    pub fn keys(&self) -> impl Iterator<Item = &ResultKey> {
        self.entries.keys()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type and capabilities of every node of the energy system
    pub fn nodes(&self) -> &IndexMap<NodeLabel, NodeInfo> {
        &self.nodes
    }

    /// Timestamps of the timepoints, if the time grid has them and holds no typical clusters
    pub fn timeindex(&self) -> Option<&[NaiveDateTime]> {
        self.timeindex.as_deref()
    }

    /// Whether the model has several investment periods
    pub fn is_multi_period(&self) -> bool {
        self.multi_period
    }
}

/// The grid time step shown at every step of the restored timeline
fn restored_steps(sets: &ModelSets) -> Vec<usize> {
    match &sets.tsa {
        None => sets.timesteps().collect(),
        Some(tsa) => tsa
            .iter()
            .flat_map(|period| {
                period.order.iter().flat_map(move |cluster| {
                    (0..period.timesteps_per_period).map(move |g| period.timestep(*cluster, g))
                })
            })
            .collect(),
    }
}

/// Storage content on the restored timeline: `inter[i]·decay(k, g) + intra[k, g]`
fn typical_storage_content<F>(
    sets: &ModelSets,
    inter: &IndexMap<(usize, usize), f64>,
    intra: &IndexMap<(usize, usize, usize), f64>,
    retention: F,
) -> Result<Vec<f64>>
where
    F: Fn(usize) -> f64,
{
    let tsa = sets.tsa.as_deref().unwrap_or_default();
    let lookup = |found: Option<&f64>, what: &str| {
        found
            .copied()
            .with_context(|| format!("missing {what} storage content"))
    };

    let mut content = Vec::new();
    for (p, period) in tsa.iter().enumerate() {
        for (i, cluster) in period.order.iter().copied().enumerate() {
            let start = lookup(inter.get(&(p, i)), "inter-cluster")?;
            let mut decay = 1.0;
            for g in 0..period.timesteps_per_period {
                let within = lookup(intra.get(&(p, cluster, g)), "intra-cluster")?;
                content.push(start * decay + within);
                decay *= retention(period.timestep(cluster, g));
            }
        }
    }
    let last = tsa
        .iter()
        .enumerate()
        .last()
        .map(|(p, period)| (p, period.order.len()));
    if let Some(last) = last {
        content.push(lookup(inter.get(&last), "inter-cluster")?);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_system::{EnergySystem, Period};
    use crate::fixture::{assert_error, simple_system};
    use crate::model::ModelOptions;
    use crate::solver::{Highs, SolveOptions};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn solved(es: &EnergySystem) -> Results {
        let mut model = Model::new(es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        model.results().unwrap()
    }

    #[rstest]
    fn step_columns_are_padded(simple_system: EnergySystem) {
        let results = solved(&simple_system);
        let flow = results
            .get(&ResultKey::edge("el", "demand"))
            .unwrap()
            .sequences
            .column("flow")
            .unwrap();
        assert_eq!(flow.len(), 4);
        assert_approx_eq!(f64, flow[2], 30.0);
        assert!(flow[3].is_nan());
    }

    #[rstest]
    fn meta(simple_system: EnergySystem) {
        let results = solved(&simple_system);
        assert_eq!(results.meta.termination, TerminationCondition::Optimal);
        assert_approx_eq!(f64, results.meta.objective, 120.0, epsilon = 1e-6);
        assert_approx_eq!(
            f64,
            results.meta.objective_breakdown["SimpleFlowBlock"],
            120.0,
            epsilon = 1e-6
        );
        assert_eq!(results.meta.num_variables, 6);
        assert_eq!(results.meta.num_integer_variables, 0);
    }

    #[rstest]
    fn missing_key(simple_system: EnergySystem) {
        let results = solved(&simple_system);
        assert_error!(
            results.get(&ResultKey::edge("el", "grid")),
            "No results for (el, grid)"
        );
        assert_error!(
            results.period_scalars(&ResultKey::edge("grid", "el")),
            "Period scalars are only available for multi-period models"
        );
    }

    #[rstest]
    fn unsolved_model(simple_system: EnergySystem) {
        let model = Model::new(&simple_system, ModelOptions::default()).unwrap();
        assert!(model.results().is_err());
    }

    #[test]
    fn restored_timeline() {
        use crate::energy_system::TsaParameters;

        let es = EnergySystem::with_uniform_steps(4, 1.0)
            .unwrap()
            .with_periods(vec![Period::new(0..2, 1), Period::new(2..4, 1)])
            .with_tsa_parameters(vec![
                TsaParameters::new(1, vec![1, 0, 1]),
                TsaParameters::new(2, vec![0, 0]),
            ]);
        let sets = ModelSets::new(&es, vec![1.0; 4], vec![1.0; 4], 0.0);
        assert_eq!(restored_steps(&sets), vec![1, 0, 1, 2, 3, 2, 3]);
    }

    #[test]
    fn typical_content_with_losses() {
        use crate::energy_system::TsaParameters;

        let es = EnergySystem::with_uniform_steps(2, 1.0)
            .unwrap()
            .with_tsa_parameters(vec![TsaParameters::new(2, vec![0, 0])]);
        let sets = ModelSets::new(&es, vec![1.0; 2], vec![1.0; 2], 0.0);
        let inter = IndexMap::from([((0, 0), 10.0), ((0, 1), 7.0), ((0, 2), 5.5)]);
        let intra = IndexMap::from([((0, 0, 0), 0.0), ((0, 0, 1), 2.0), ((0, 0, 2), 2.0)]);
        let content = typical_storage_content(&sets, &inter, &intra, |_| 0.5).unwrap();
        assert_eq!(content, vec![10.0, 7.0, 7.0, 5.5, 5.5]);
    }
}
