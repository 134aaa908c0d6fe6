//! The energy system container: time grid, periods, typical periods and the node registry.
use crate::error::{ModelError, config_bail, construction_bail};
use crate::flow::{Flow, FlowKey};
use crate::id::NodeLabel;
use crate::node::{Component, Node, NodeKind};
use crate::options::Investment;
use crate::sequence::Sequence;
use anyhow::Result;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use itertools::Itertools;
use log::warn;
use petgraph::graph::DiGraph;
use std::fmt::Display;
use std::ops::Range;

/// An investment period: a contiguous range of time steps lasting a number of years
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    /// Time steps belonging to the period
    pub steps: Range<usize>,
    /// Duration of the period in years
    pub years: u32,
}

impl Period {
    /// Create a new [`Period`]
    pub fn new(steps: Range<usize>, years: u32) -> Self {
        Self { steps, years }
    }
}

/// Typical-period aggregation parameters for one investment period.
///
/// The time steps of the period hold the typical clusters back to back, each
/// `timesteps_per_period` long. `order` lists the cluster restored at each position of the full
/// timeline and `occurrences` how often each cluster appears.
#[derive(Debug, Clone, PartialEq)]
pub struct TsaParameters {
    /// Number of time steps in each typical cluster
    pub timesteps_per_period: usize,
    /// Cluster id at each position of the restored timeline
    pub order: Vec<usize>,
    /// Number of occurrences of each cluster id
    pub occurrences: IndexMap<usize, usize>,
}

impl TsaParameters {
    /// Create parameters, counting occurrences from `order`
    pub fn new(timesteps_per_period: usize, order: Vec<usize>) -> Self {
        let occurrences = order
            .iter()
            .copied()
            .counts()
            .into_iter()
            .sorted()
            .collect();
        Self {
            timesteps_per_period,
            order,
            occurrences,
        }
    }

    /// Create parameters with explicit occurrence counts
    pub fn with_occurrences(
        timesteps_per_period: usize,
        order: Vec<usize>,
        occurrences: IndexMap<usize, usize>,
    ) -> Self {
        Self {
            timesteps_per_period,
            order,
            occurrences,
        }
    }

    /// Number of typical clusters stored in the time grid
    pub fn num_clusters(&self) -> usize {
        self.order.iter().max().map_or(0, |max| max + 1)
    }

    /// Occurrence count of a cluster (zero if it never occurs)
    pub fn occurrence(&self, cluster: usize) -> usize {
        self.occurrences.get(&cluster).copied().unwrap_or(0)
    }
}

/// The energy system: a time grid and a graph of nodes connected by flows.
///
/// Flows are stored in a flat registry keyed by `(source, target)`, so cycles in the graph need
/// no special treatment.
#[derive(Debug, Clone)]
pub struct EnergySystem {
    timeindex: Option<Vec<NaiveDateTime>>,
    timeincrement: Vec<f64>,
    periods: Option<Vec<Period>>,
    tsa_parameters: Option<Vec<TsaParameters>>,
    use_remaining_value: bool,
    nodes: IndexMap<NodeLabel, Node>,
    flows: IndexMap<FlowKey, Flow>,
}

impl EnergySystem {
    /// Create an energy system from time step lengths in hours
    pub fn from_timeincrement(timeincrement: Vec<f64>) -> Result<Self> {
        if timeincrement.is_empty() {
            construction_bail!("the time grid must contain at least one time step");
        }
        if let Some((t, dt)) = timeincrement
            .iter()
            .find_position(|dt| !dt.is_finite() || **dt <= 0.0)
        {
            construction_bail!("timeincrement must be positive, but is {dt} at time step {t}");
        }

        Ok(Self {
            timeindex: None,
            timeincrement,
            periods: None,
            tsa_parameters: None,
            use_remaining_value: false,
            nodes: IndexMap::new(),
            flows: IndexMap::new(),
        })
    }

    /// Create an energy system with `steps` time steps of `hours` each
    pub fn with_uniform_steps(steps: usize, hours: f64) -> Result<Self> {
        Self::from_timeincrement(vec![hours; steps])
    }

    /// Create an energy system from timestamps.
    ///
    /// # Arguments
    ///
    /// * `timeindex` - Strictly increasing timestamps
    /// * `infer_last_interval` - If true, every timestamp starts a time step and the last step
    ///   repeats the length of the one before. Otherwise the last timestamp closes the horizon.
    pub fn from_timeindex(
        timeindex: Vec<NaiveDateTime>,
        infer_last_interval: bool,
    ) -> Result<Self> {
        if timeindex.len() < 2 {
            construction_bail!("a timeindex needs at least two timestamps");
        }
        let mut timeincrement = timeindex
            .iter()
            .tuple_windows()
            .map(|(start, end)| (*end - *start).num_seconds() as f64 / 3600.0)
            .collect::<Vec<_>>();
        let mut timeindex = timeindex;
        if infer_last_interval {
            let n = timeindex.len();
            let closing = timeindex[n - 1] + (timeindex[n - 1] - timeindex[n - 2]);
            timeincrement.push(timeincrement[n - 2]);
            timeindex.push(closing);
        }

        let mut energy_system = Self::from_timeincrement(timeincrement)?;
        energy_system.timeindex = Some(timeindex);
        Ok(energy_system)
    }

    /// Partition the time steps into investment periods
    pub fn with_periods(mut self, periods: Vec<Period>) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Declare the time steps to hold typical clusters (one entry per period)
    pub fn with_tsa_parameters(mut self, tsa_parameters: Vec<TsaParameters>) -> Self {
        self.tsa_parameters = Some(tsa_parameters);
        self
    }

    /// Whether the residual value of investments at the horizon reduces their costs
    pub fn with_use_remaining_value(mut self, use_remaining_value: bool) -> Self {
        self.use_remaining_value = use_remaining_value;
        self
    }

    /// Add a node with its flows.
    ///
    /// Flows may refer to nodes that are added later. Labels and flow pairs must be unique.
    pub fn add(&mut self, component: Component) -> Result<()> {
        let Component { node, flows } = component;
        if self.nodes.contains_key(&node.label) {
            config_bail!(node.label, "a node with this label already exists");
        }
        for (key, _) in &flows {
            if self.flows.contains_key(key) {
                config_bail!(key, "a flow between these nodes already exists");
            }
        }

        for (key, flow) in flows {
            self.flows.insert(key, flow);
        }
        self.nodes.insert(node.label.clone(), node);

        Ok(())
    }

    /// Add several nodes
    pub fn add_all<I>(&mut self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = Component>,
    {
        components.into_iter().try_for_each(|c| self.add(c))
    }

    /// Number of time steps
    pub fn num_timesteps(&self) -> usize {
        self.timeincrement.len()
    }

    /// Length of each time step in hours
    pub fn timeincrement(&self) -> &[f64] {
        &self.timeincrement
    }

    /// Timestamps of all timepoints (one more than there are time steps), if known
    pub fn timeindex(&self) -> Option<&[NaiveDateTime]> {
        self.timeindex.as_deref()
    }

    /// The investment periods, if the model is multi-period
    pub fn periods(&self) -> Option<&[Period]> {
        self.periods.as_deref()
    }

    /// Typical-period parameters, if the time grid holds typical clusters
    pub fn tsa_parameters(&self) -> Option<&[TsaParameters]> {
        self.tsa_parameters.as_deref()
    }

    /// Whether the model has more than one investment period
    pub fn is_multi_period(&self) -> bool {
        self.periods.is_some()
    }

    /// Whether the residual value of investments is taken into account
    pub fn use_remaining_value(&self) -> bool {
        self.use_remaining_value
    }

    /// All nodes in the order they were added
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a node by label
    pub fn node(&self, label: &str) -> Option<&Node> {
        self.nodes.get(label)
    }

    /// All flows in the order they were declared
    pub fn flows(&self) -> impl Iterator<Item = (&FlowKey, &Flow)> {
        self.flows.iter()
    }

    /// Look up a flow by its node pair
    pub fn flow(&self, key: &FlowKey) -> Option<&Flow> {
        self.flows.get(key)
    }

    /// Keys of all flows entering `label`, whichever node declared them
    pub fn inflows(&self, label: &str) -> Vec<FlowKey> {
        self.flows
            .keys()
            .filter(|key| key.target.as_str() == label)
            .cloned()
            .sorted()
            .collect()
    }

    /// Keys of all flows leaving `label`, whichever node declared them
    pub fn outflows(&self, label: &str) -> Vec<FlowKey> {
        self.flows
            .keys()
            .filter(|key| key.source.as_str() == label)
            .cloned()
            .sorted()
            .collect()
    }

    /// The graph of nodes connected by flows
    pub fn graph(&self) -> DiGraph<NodeLabel, FlowKey> {
        let mut graph = DiGraph::new();
        let indices: IndexMap<_, _> = self
            .nodes
            .keys()
            .map(|label| (label.clone(), graph.add_node(label.clone())))
            .collect();
        for key in self.flows.keys() {
            let (source, target) = (indices.get(&key.source), indices.get(&key.target));
            if let (Some(source), Some(target)) = (source, target) {
                graph.add_edge(*source, *target, key.clone());
            }
        }
        graph
    }

    /// Check that the energy system can be turned into a model.
    ///
    /// This checks the time grid, periods and typical-period parameters, that every flow connects
    /// existing nodes and that every time series covers the time grid.
    pub fn validate(&self) -> Result<()> {
        self.validate_periods()?;
        self.validate_tsa()?;
        self.validate_graph()?;
        self.validate_sequence_lengths()?;

        if self.is_multi_period() {
            warn!("Multi-period models are an experimental feature");
        }
        if self.tsa_parameters.is_some() {
            warn!("Time series aggregation is an experimental feature");
        }
        if self.use_remaining_value && !self.is_multi_period() {
            warn!("use_remaining_value has no effect in a single-period model");
        }

        Ok(())
    }

    fn validate_periods(&self) -> Result<()> {
        let Some(periods) = &self.periods else {
            return Ok(());
        };
        if periods.is_empty() {
            construction_bail!("at least one period must be given");
        }

        let mut next = 0;
        for (p, period) in periods.iter().enumerate() {
            if period.steps.start != next || period.steps.is_empty() {
                construction_bail!(
                    "periods do not partition the time steps: period {p} covers {:?}, but \
                     should start at step {next}",
                    period.steps
                );
            }
            if period.years == 0 {
                construction_bail!("period {p} must last at least one year");
            }
            next = period.steps.end;
        }
        if next != self.num_timesteps() {
            construction_bail!(
                "periods cover {next} time steps, but the time grid has {}",
                self.num_timesteps()
            );
        }

        Ok(())
    }

    fn validate_tsa(&self) -> Result<()> {
        let Some(tsa_parameters) = &self.tsa_parameters else {
            return Ok(());
        };
        let step_ranges = match &self.periods {
            Some(periods) => periods.iter().map(|p| p.steps.clone()).collect(),
            None => vec![0..self.num_timesteps()],
        };
        if tsa_parameters.len() != step_ranges.len() {
            construction_bail!(
                "{} sets of TSA parameters given for {} periods",
                tsa_parameters.len(),
                step_ranges.len()
            );
        }

        for (p, (params, steps)) in tsa_parameters.iter().zip(step_ranges).enumerate() {
            if params.timesteps_per_period == 0 || params.order.is_empty() {
                construction_bail!("TSA parameters of period {p} are empty");
            }
            let expected = params.num_clusters() * params.timesteps_per_period;
            if steps.len() != expected {
                construction_bail!(
                    "TSA parameters of period {p} describe {expected} time steps, but the period \
                     has {}",
                    steps.len()
                );
            }
            for cluster in &params.order {
                if params.occurrence(*cluster) == 0 {
                    construction_bail!(
                        "cluster {cluster} is used in period {p} but has no occurrences"
                    );
                }
            }
        }

        Ok(())
    }

    fn validate_graph(&self) -> Result<()> {
        for key in self.flows.keys() {
            for label in [&key.source, &key.target] {
                if !self.nodes.contains_key(label) {
                    return Err(ModelError::construction(format!(
                        "flow {key} refers to the unknown node {label}"
                    ))
                    .into());
                }
            }
        }

        for node in self.nodes.values() {
            if let NodeKind::OffsetConverter(params) = &node.kind
                && self
                    .flow(&params.reference)
                    .is_none_or(|flow| flow.nonconvex.is_none())
            {
                config_bail!(&node.label, "the reference flow must be non-convex");
            }
            if node.inputs.is_empty() && node.outputs.is_empty() && !node.is_bus() {
                warn!("Node {} has no flows", node.label);
            }
        }

        Ok(())
    }

    fn validate_sequence_lengths(&self) -> Result<()> {
        let steps = self.num_timesteps();
        let num_periods = self.periods.as_ref().map_or(1, Vec::len);

        for (key, flow) in &self.flows {
            for (name, seq) in flow.time_sequences() {
                check_len(key, name, seq, steps)?;
            }
            for (name, seq) in &flow.custom_properties {
                check_len(key, name, seq, steps)?;
            }
            if let Some(fixed_costs) = &flow.fixed_costs {
                check_len(key, "fixed_costs", fixed_costs, num_periods)?;
            }
            if let Some(investment) = flow.investment_record() {
                check_investment_lengths(key, investment, num_periods)?;
            }
        }

        for node in self.nodes.values() {
            match &node.kind {
                NodeKind::Converter { conversion_factors } => {
                    for (bus, factor) in conversion_factors {
                        let name = format!("conversion factor for {bus}");
                        check_len(&node.label, &name, factor, steps)?;
                    }
                }
                NodeKind::Link { conversion_factors } => {
                    for ((from, to), factor) in conversion_factors {
                        let name = format!("conversion factor from {from} to {to}");
                        check_len(&node.label, &name, factor, steps)?;
                    }
                }
                NodeKind::ExtractionTurbineChp(params) => {
                    for (name, seq) in params.time_sequences() {
                        check_len(&node.label, name, seq, steps)?;
                    }
                }
                NodeKind::OffsetConverter(params) => {
                    for (key, (slope, offset)) in &params.coefficients {
                        check_len(&node.label, &format!("slope for {key}"), slope, steps)?;
                        check_len(&node.label, &format!("offset for {key}"), offset, steps)?;
                    }
                }
                NodeKind::Storage(params) => {
                    for (name, seq) in params.time_sequences() {
                        check_len(&node.label, name, seq, steps)?;
                    }
                    if let Some(investment) = params.investment() {
                        check_investment_lengths(&node.label, investment, num_periods)?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Check that a sequence can be read at every index below `len`
fn check_len(entity: &dyn Display, name: &str, seq: &Sequence, len: usize) -> Result<()> {
    seq.check_len(len)
        .map_err(|err| ModelError::construction(format!("{name} of {entity}: {err}")))?;
    Ok(())
}

/// Check that every per-period parameter of an investment covers all periods
fn check_investment_lengths(
    entity: &dyn Display,
    investment: &Investment,
    num_periods: usize,
) -> Result<()> {
    for (name, seq) in [
        ("ep_costs", &investment.ep_costs),
        ("offset", &investment.offset),
        ("minimum", &investment.minimum),
        ("maximum", &investment.maximum),
    ] {
        check_len(entity, name, seq, num_periods)?;
    }
    if let Some(fixed_costs) = &investment.fixed_costs {
        check_len(entity, "fixed_costs", fixed_costs, num_periods)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Bus, Sink, Source};
    use crate::fixture::assert_error;
    use chrono::NaiveDate;

    fn stamps(hours: &[u32]) -> Vec<NaiveDateTime> {
        hours
            .iter()
            .map(|h| {
                NaiveDate::from_ymd_opt(2020, 1, 1)
                    .unwrap()
                    .and_hms_opt(*h, 0, 0)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn zero_length_grid_is_rejected() {
        assert_error!(
            EnergySystem::from_timeincrement(vec![]),
            "Cannot construct model: the time grid must contain at least one time step"
        );
    }

    #[test]
    fn timeindex_with_inferred_interval() {
        let es = EnergySystem::from_timeindex(stamps(&[0, 1, 3]), true).unwrap();
        assert_eq!(es.timeincrement(), &[1.0, 2.0, 2.0]);
        assert_eq!(es.timeindex().unwrap().len(), 4);
    }

    #[test]
    fn timeindex_closing_stamp() {
        let es = EnergySystem::from_timeindex(stamps(&[0, 1, 3]), false).unwrap();
        assert_eq!(es.timeincrement(), &[1.0, 2.0]);
        assert_eq!(es.num_timesteps(), 2);
    }

    #[test]
    fn periods_must_partition() {
        let es = EnergySystem::with_uniform_steps(4, 1.0)
            .unwrap()
            .with_periods(vec![Period::new(0..2, 5), Period::new(3..4, 5)]);
        assert!(es.validate().is_err());

        let es = EnergySystem::with_uniform_steps(4, 1.0)
            .unwrap()
            .with_periods(vec![Period::new(0..2, 5), Period::new(2..4, 5)]);
        assert!(es.validate().is_ok());
    }

    #[test]
    fn tsa_must_match_period_length() {
        let es = EnergySystem::with_uniform_steps(6, 1.0)
            .unwrap()
            .with_tsa_parameters(vec![TsaParameters::new(2, vec![0, 1, 1, 0])]);
        assert_error!(
            es.validate(),
            "Cannot construct model: TSA parameters of period 0 describe 4 time steps, but the \
             period has 6"
        );
    }

    #[test]
    fn occurrences_from_order() {
        let tsa = TsaParameters::new(24, vec![0, 1, 1, 2, 1]);
        assert_eq!(tsa.occurrence(1), 3);
        assert_eq!(tsa.occurrence(4), 0);
        assert_eq!(tsa.num_clusters(), 3);
    }

    #[test]
    fn duplicate_label() {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        assert_error!(
            es.add(Bus::new("el").build().unwrap()),
            "Invalid configuration for el: a node with this label already exists"
        );
    }

    #[test]
    fn unknown_flow_target() {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
        es.add(
            Source::new("pv")
                .output("el", Flow::new())
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_error!(
            es.validate(),
            "Cannot construct model: flow (pv, el) refers to the unknown node el"
        );
    }

    #[test]
    fn sequence_too_short() {
        let mut es = EnergySystem::with_uniform_steps(3, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(1.0).fix(vec![1.0, 2.0]))
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_error!(
            es.validate(),
            "Cannot construct model: fix of (el, demand): Index 2 is out of range for a sequence \
             of length 2"
        );
    }

    #[test]
    fn graph_has_all_flows() {
        let mut es = EnergySystem::with_uniform_steps(1, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("pv")
                .output("el", Flow::new())
                .build()
                .unwrap(),
        )
        .unwrap();
        let graph = es.graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(es.inflows("el"), vec![FlowKey::new("pv", "el")]);
        assert!(es.outflows("el").is_empty());
    }
}
