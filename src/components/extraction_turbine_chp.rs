//! Builder for CHP plants with an extraction turbine.
use super::Ports;
use crate::error::config_bail;
use crate::flow::{Flow, FlowKey};
use crate::id::NodeLabel;
use crate::node::{Component, ExtractionParams, NodeKind};
use crate::sequence::Sequence;
use anyhow::Result;
use indexmap::IndexMap;

/// Builder for a CHP plant with one fuel input, a main output and a tapped output.
///
/// The conversion factors of both outputs are the efficiencies at maximum extraction. The main
/// output is the one given a full condensation efficiency.
#[derive(Debug, Clone)]
pub struct ExtractionTurbineChp {
    label: NodeLabel,
    ports: Ports,
    conversion_factors: IndexMap<NodeLabel, Sequence>,
    full_condensation: Option<(NodeLabel, Sequence)>,
}

impl ExtractionTurbineChp {
    /// Create a plant without flows
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            conversion_factors: IndexMap::new(),
            full_condensation: None,
        }
    }

    /// Declare the fuel flow from `source` into the plant
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the plant into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Set the efficiency at maximum extraction of the output to `node`
    pub fn conversion_factor(
        mut self,
        node: impl Into<NodeLabel>,
        factor: impl Into<Sequence>,
    ) -> Self {
        self.conversion_factors.insert(node.into(), factor.into());
        self
    }

    /// Set the efficiency without extraction, making the output to `node` the main output
    pub fn conversion_factor_full_condensation(
        mut self,
        node: impl Into<NodeLabel>,
        factor: impl Into<Sequence>,
    ) -> Self {
        self.full_condensation = Some((node.into(), factor.into()));
        self
    }

    /// Validate and build the plant
    pub fn build(self) -> Result<Component> {
        let label = self.label;
        let mut inputs = self.ports.inputs.keys();
        let (Some(fuel), None) = (inputs.next(), inputs.next()) else {
            config_bail!(label, "an extraction turbine needs exactly one input");
        };
        if self.ports.outputs.len() != 2 {
            config_bail!(label, "an extraction turbine needs exactly two outputs");
        }
        let Some((main, full_condensation_efficiency)) = self.full_condensation else {
            config_bail!(label, "missing the full condensation efficiency");
        };
        let Some(tapped) = self.ports.outputs.keys().find(|target| **target != main) else {
            config_bail!(label, "the two outputs must go to different nodes");
        };
        if !self.ports.outputs.contains_key(&main) {
            config_bail!(
                label,
                "full condensation efficiency given for {main}, which is not an output"
            );
        }

        let efficiency = |node: &NodeLabel| -> Result<Sequence> {
            let Some(factor) = self.conversion_factors.get(node) else {
                config_bail!(&label, "missing the conversion factor for {node}");
            };
            if !factor.within(f64::MIN_POSITIVE, f64::INFINITY) {
                config_bail!(&label, "conversion factor for {node} must be positive");
            }
            Ok(factor.clone())
        };
        let main_efficiency = efficiency(&main)?;
        let tapped_efficiency = efficiency(tapped)?;
        if !full_condensation_efficiency.within(f64::MIN_POSITIVE, f64::INFINITY) {
            config_bail!(label, "full condensation efficiency must be positive");
        }

        let params = ExtractionParams {
            fuel: FlowKey::new(fuel, &label),
            main_output: FlowKey::new(&label, &main),
            tapped_output: FlowKey::new(&label, tapped),
            main_efficiency,
            tapped_efficiency,
            full_condensation_efficiency,
        };
        self.ports
            .into_component(label, NodeKind::ExtractionTurbineChp(Box::new(params)))
    }
}
