//! Builder and parameters for generic storages.
use super::Ports;
use crate::error::config_bail;
use crate::flow::{Capacity, Flow, FlowKey};
use crate::id::NodeLabel;
use crate::node::{Component, NodeKind};
use crate::options::Investment;
use crate::sequence::Sequence;
use anyhow::Result;

/// Parameters of a storage node
#[derive(Debug, Clone, PartialEq)]
pub struct StorageParams {
    /// Storage capacity (unbounded, fixed or invested)
    pub nominal_capacity: Capacity,
    /// Content at the start of the horizon relative to the capacity
    pub initial_storage_level: Option<f64>,
    /// Whether the content at the end of the horizon equals the content at the start
    pub balanced: bool,
    /// Relative loss of content per hour
    pub loss_rate: Sequence,
    /// Loss per time step relative to the capacity
    pub fixed_losses_relative: Sequence,
    /// Absolute loss per hour
    pub fixed_losses_absolute: Sequence,
    /// Efficiency of charging
    pub inflow_conversion_factor: Sequence,
    /// Efficiency of discharging
    pub outflow_conversion_factor: Sequence,
    /// Lower bound of the content relative to the capacity
    pub min_storage_level: Sequence,
    /// Upper bound of the content relative to the capacity
    pub max_storage_level: Sequence,
    /// Costs per unit of stored content and hour
    pub storage_costs: Option<Sequence>,
    /// Ratio of discharging to charging capacity
    pub invest_relation_input_output: Option<f64>,
    /// Ratio of storage capacity to charging capacity
    pub invest_relation_input_capacity: Option<f64>,
    /// Ratio of storage capacity to discharging capacity
    pub invest_relation_output_capacity: Option<f64>,
}

impl Default for StorageParams {
    fn default() -> Self {
        Self {
            nominal_capacity: Capacity::Unbounded,
            initial_storage_level: None,
            balanced: true,
            loss_rate: Sequence::scalar(0.0),
            fixed_losses_relative: Sequence::scalar(0.0),
            fixed_losses_absolute: Sequence::scalar(0.0),
            inflow_conversion_factor: Sequence::scalar(1.0),
            outflow_conversion_factor: Sequence::scalar(1.0),
            min_storage_level: Sequence::scalar(0.0),
            max_storage_level: Sequence::scalar(1.0),
            storage_costs: None,
            invest_relation_input_output: None,
            invest_relation_input_capacity: None,
            invest_relation_output_capacity: None,
        }
    }
}

impl StorageParams {
    /// The investment record, if the storage capacity is sized by the optimisation
    pub fn investment(&self) -> Option<&Investment> {
        match &self.nominal_capacity {
            Capacity::Investment(investment) => Some(investment),
            _ => None,
        }
    }

    /// Relative lower bound of the content at timepoint `t`
    pub fn min_level_at(&self, t: usize) -> f64 {
        level_at(&self.min_storage_level, t)
    }

    /// Relative upper bound of the content at timepoint `t`
    pub fn max_level_at(&self, t: usize) -> f64 {
        level_at(&self.max_storage_level, t)
    }

    /// All time-indexed sequences of the storage together with their names
    pub(crate) fn time_sequences(&self) -> impl Iterator<Item = (&'static str, &Sequence)> {
        [
            ("loss_rate", Some(&self.loss_rate)),
            ("fixed_losses_relative", Some(&self.fixed_losses_relative)),
            ("fixed_losses_absolute", Some(&self.fixed_losses_absolute)),
            (
                "inflow_conversion_factor",
                Some(&self.inflow_conversion_factor),
            ),
            (
                "outflow_conversion_factor",
                Some(&self.outflow_conversion_factor),
            ),
            ("min_storage_level", Some(&self.min_storage_level)),
            ("max_storage_level", Some(&self.max_storage_level)),
            ("storage_costs", self.storage_costs.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, seq)| seq.map(|seq| (name, seq)))
    }
}

/// Storage levels are given per time step; the final timepoint reuses the last step's value
fn level_at(level: &Sequence, t: usize) -> f64 {
    match level {
        Sequence::Series(values) if t >= values.len() && !values.is_empty() => {
            values[values.len() - 1]
        }
        _ => level.get(t),
    }
}

/// Builder for a storage with exactly one input and one output
#[derive(Debug, Clone)]
pub struct GenericStorage {
    label: NodeLabel,
    ports: Ports,
    params: StorageParams,
}

impl GenericStorage {
    /// Create a storage with default parameters
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            params: StorageParams::default(),
        }
    }

    /// Declare the charging flow from `source`
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare the discharging flow into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Set a fixed storage capacity
    pub fn nominal_capacity(mut self, capacity: f64) -> Self {
        self.params.nominal_capacity = Capacity::Fixed(capacity);
        self
    }

    /// Let the optimisation size the storage capacity
    pub fn investment(mut self, investment: Investment) -> Self {
        self.params.nominal_capacity = Capacity::Investment(investment);
        self
    }

    /// Set the initial content relative to the capacity
    pub fn initial_storage_level(mut self, level: f64) -> Self {
        self.params.initial_storage_level = Some(level);
        self
    }

    /// Whether the content must return to its initial value
    pub fn balanced(mut self, balanced: bool) -> Self {
        self.params.balanced = balanced;
        self
    }

    /// Set the relative loss per hour
    pub fn loss_rate(mut self, rate: impl Into<Sequence>) -> Self {
        self.params.loss_rate = rate.into();
        self
    }

    /// Set the loss per time step relative to the capacity
    pub fn fixed_losses_relative(mut self, losses: impl Into<Sequence>) -> Self {
        self.params.fixed_losses_relative = losses.into();
        self
    }

    /// Set the absolute loss per hour
    pub fn fixed_losses_absolute(mut self, losses: impl Into<Sequence>) -> Self {
        self.params.fixed_losses_absolute = losses.into();
        self
    }

    /// Set the charging efficiency
    pub fn inflow_conversion_factor(mut self, factor: impl Into<Sequence>) -> Self {
        self.params.inflow_conversion_factor = factor.into();
        self
    }

    /// Set the discharging efficiency
    pub fn outflow_conversion_factor(mut self, factor: impl Into<Sequence>) -> Self {
        self.params.outflow_conversion_factor = factor.into();
        self
    }

    /// Set the relative lower bound of the content
    pub fn min_storage_level(mut self, level: impl Into<Sequence>) -> Self {
        self.params.min_storage_level = level.into();
        self
    }

    /// Set the relative upper bound of the content
    pub fn max_storage_level(mut self, level: impl Into<Sequence>) -> Self {
        self.params.max_storage_level = level.into();
        self
    }

    /// Set the costs per unit of stored content and hour
    pub fn storage_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.params.storage_costs = Some(costs.into());
        self
    }

    /// Couple the invested discharging capacity to the invested charging capacity
    pub fn invest_relation_input_output(mut self, ratio: f64) -> Self {
        self.params.invest_relation_input_output = Some(ratio);
        self
    }

    /// Couple the invested storage capacity to the invested charging capacity
    pub fn invest_relation_input_capacity(mut self, ratio: f64) -> Self {
        self.params.invest_relation_input_capacity = Some(ratio);
        self
    }

    /// Couple the invested storage capacity to the invested discharging capacity
    pub fn invest_relation_output_capacity(mut self, ratio: f64) -> Self {
        self.params.invest_relation_output_capacity = Some(ratio);
        self
    }

    /// Validate and build the storage
    pub fn build(mut self) -> Result<Component> {
        let label = self.label;
        let params = &self.params;
        if self.ports.inputs.len() != 1 || self.ports.outputs.len() != 1 {
            config_bail!(label, "a storage needs exactly one input and one output");
        }

        match &params.nominal_capacity {
            Capacity::Unbounded => {
                if params.initial_storage_level.is_some() {
                    config_bail!(
                        label,
                        "initial_storage_level requires a nominal storage capacity"
                    );
                }
            }
            Capacity::Fixed(capacity) => {
                if !capacity.is_finite() || *capacity < 0.0 {
                    config_bail!(
                        label,
                        "nominal storage capacity must be finite and not negative"
                    );
                }
            }
            Capacity::Investment(investment) => {
                investment.validate(label.as_str())?;
                if params.fixed_losses_absolute.any_nonzero()
                    && investment.existing == 0.0
                    && !investment.minimum.any_nonzero()
                {
                    config_bail!(
                        label,
                        "fixed_losses_absolute with an investment needs an existing or minimum \
                         capacity"
                    );
                }
            }
        }

        if let Some(level) = params.initial_storage_level
            && (level < params.min_level_at(0) || level > params.max_level_at(0))
        {
            config_bail!(
                label,
                "initial_storage_level {level} lies outside the storage level bounds"
            );
        }
        if !params.loss_rate.within(0.0, 1.0) {
            config_bail!(label, "loss_rate must lie within [0, 1]");
        }
        for (name, factor) in [
            ("inflow_conversion_factor", &params.inflow_conversion_factor),
            (
                "outflow_conversion_factor",
                &params.outflow_conversion_factor,
            ),
        ] {
            if !factor.within(f64::MIN_POSITIVE, f64::INFINITY) {
                config_bail!(label, "{name} must be positive");
            }
        }

        let relations = [
            params.invest_relation_input_output,
            params.invest_relation_input_capacity,
            params.invest_relation_output_capacity,
        ];
        if relations.iter().all(Option::is_some) {
            config_bail!(
                label,
                "setting all three invest relations overdetermines the storage"
            );
        }
        let needs_input_investment = params.invest_relation_input_output.is_some()
            || params.invest_relation_input_capacity.is_some();
        let needs_output_investment = params.invest_relation_input_output.is_some()
            || params.invest_relation_output_capacity.is_some();
        let capacity_relation = params.invest_relation_input_capacity.is_some()
            || params.invest_relation_output_capacity.is_some();
        if capacity_relation && params.investment().is_none() {
            config_bail!(
                label,
                "invest relations with the storage capacity need an investment storage"
            );
        }

        for (needs_investment, flow) in [
            (needs_input_investment, self.ports.inputs.values_mut().next()),
            (
                needs_output_investment,
                self.ports.outputs.values_mut().next(),
            ),
        ] {
            let Some(flow) = flow else { continue };
            if !needs_investment {
                continue;
            }
            match flow.nominal_capacity {
                Capacity::Unbounded => {
                    flow.nominal_capacity = Capacity::Investment(Investment::new());
                }
                Capacity::Investment(_) => {}
                Capacity::Fixed(_) => {
                    config_bail!(
                        label,
                        "invest relations need investment flows, but a flow has a fixed capacity"
                    );
                }
            }
        }

        let ports = self.ports;
        ports.into_component(label, NodeKind::Storage(Box::new(self.params)))
    }
}

/// The charging and discharging flows of a storage node
pub fn storage_flow_keys(
    label: &NodeLabel,
    inputs: &[NodeLabel],
    outputs: &[NodeLabel],
) -> Option<(FlowKey, FlowKey)> {
    match (inputs, outputs) {
        ([input], [output]) => Some((FlowKey::new(input, label), FlowKey::new(label, output))),
        _ => None,
    }
}
