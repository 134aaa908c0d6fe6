//! Builders for buses and components.
//!
//! Every builder validates its parameters in `build`, so configuration errors surface as soon as
//! an entity is constructed.
use crate::error::config_bail;
use crate::flow::{Flow, FlowKey};
use crate::id::NodeLabel;
use crate::node::{Capability, Component, Node, NodeKind, OffsetParams};
use crate::sequence::Sequence;
use anyhow::Result;
use indexmap::IndexMap;

mod extraction_turbine_chp;
mod link;
mod storage;
pub use extraction_turbine_chp::ExtractionTurbineChp;
pub use link::Link;
pub use storage::{GenericStorage, StorageParams};
pub(crate) use storage::storage_flow_keys;

/// Flows declared on a component, keyed by the node at the other end
#[derive(Debug, Clone, Default)]
struct Ports {
    inputs: IndexMap<NodeLabel, Flow>,
    outputs: IndexMap<NodeLabel, Flow>,
}

impl Ports {
    /// Validate every flow and assemble the component
    fn into_component(self, label: NodeLabel, kind: NodeKind) -> Result<Component> {
        let mut flows = Vec::with_capacity(self.inputs.len() + self.outputs.len());
        for (source, flow) in self.inputs {
            let key = FlowKey::new(source, &label);
            flow.validate(&key)?;
            flows.push((key, flow));
        }
        for (target, flow) in self.outputs {
            let key = FlowKey::new(&label, target);
            flow.validate(&key)?;
            flows.push((key, flow));
        }

        let inputs = flows
            .iter()
            .filter(|(key, _)| key.target == label)
            .map(|(key, _)| key.source.clone())
            .collect();
        let outputs = flows
            .iter()
            .filter(|(key, _)| key.source == label)
            .map(|(key, _)| key.target.clone())
            .collect();

        Ok(Component {
            node: Node {
                label,
                kind,
                inputs,
                outputs,
            },
            flows,
        })
    }
}

/// Builder for a bus
#[derive(Debug, Clone)]
pub struct Bus {
    label: NodeLabel,
    balanced: bool,
    ports: Ports,
}

impl Bus {
    /// Create a balanced bus
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            balanced: true,
            ports: Ports::default(),
        }
    }

    /// Whether inflows and outflows must balance
    pub fn balanced(mut self, balanced: bool) -> Self {
        self.balanced = balanced;
        self
    }

    /// Declare a flow from `source` into the bus
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the bus into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Validate and build the bus
    pub fn build(self) -> Result<Component> {
        self.ports.into_component(
            self.label,
            NodeKind::Bus {
                balanced: self.balanced,
            },
        )
    }
}

/// Builder for a source (outputs only)
#[derive(Debug, Clone)]
pub struct Source {
    label: NodeLabel,
    ports: Ports,
}

impl Source {
    /// Create a source without outputs
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
        }
    }

    /// Declare a flow from the source into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Validate and build the source
    pub fn build(self) -> Result<Component> {
        if self.ports.outputs.is_empty() {
            config_bail!(self.label, "a source needs at least one output");
        }
        self.ports.into_component(self.label, NodeKind::Source)
    }
}

/// Builder for a sink (inputs only)
#[derive(Debug, Clone)]
pub struct Sink {
    label: NodeLabel,
    ports: Ports,
}

impl Sink {
    /// Create a sink without inputs
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
        }
    }

    /// Declare a flow from `source` into the sink
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Validate and build the sink
    pub fn build(self) -> Result<Component> {
        if self.ports.inputs.is_empty() {
            config_bail!(self.label, "a sink needs at least one input");
        }
        self.ports.into_component(self.label, NodeKind::Sink)
    }
}

/// Builder for a linear converter
#[derive(Debug, Clone)]
pub struct Converter {
    label: NodeLabel,
    ports: Ports,
    conversion_factors: IndexMap<NodeLabel, Sequence>,
}

impl Converter {
    /// Create a converter without flows
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            conversion_factors: IndexMap::new(),
        }
    }

    /// Declare a flow from `source` into the converter
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the converter into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Set the conversion factor for the flow connecting to `node`
    pub fn conversion_factor(
        mut self,
        node: impl Into<NodeLabel>,
        factor: impl Into<Sequence>,
    ) -> Self {
        self.conversion_factors.insert(node.into(), factor.into());
        self
    }

    /// Validate and build the converter
    pub fn build(self) -> Result<Component> {
        if self.ports.inputs.is_empty() {
            config_bail!(self.label, "a converter needs at least one input");
        }
        if self.ports.outputs.is_empty() {
            config_bail!(self.label, "a converter needs at least one output");
        }
        for (node, factor) in &self.conversion_factors {
            if !self.ports.inputs.contains_key(node) && !self.ports.outputs.contains_key(node) {
                config_bail!(
                    self.label,
                    "conversion factor given for {node}, which is not connected"
                );
            }
            if !factor.within(f64::MIN_POSITIVE, f64::INFINITY) {
                config_bail!(
                    self.label,
                    "conversion factor for {node} must be positive"
                );
            }
        }

        self.ports.into_component(
            self.label,
            NodeKind::Converter {
                conversion_factors: self.conversion_factors,
            },
        )
    }
}

/// Builder for a converter with an affine relation between its flows.
///
/// Exactly one flow must be non-convex; it is the reference flow whose status switches the
/// offsets on and off.
#[derive(Debug, Clone)]
pub struct OffsetConverter {
    label: NodeLabel,
    ports: Ports,
    coefficients: IndexMap<NodeLabel, (Sequence, Sequence)>,
}

impl OffsetConverter {
    /// Create an offset converter without flows
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            coefficients: IndexMap::new(),
        }
    }

    /// Declare a flow from `source` into the converter
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the converter into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Set slope and offset for the flow connecting to `node`
    pub fn coefficients(
        mut self,
        node: impl Into<NodeLabel>,
        slope: impl Into<Sequence>,
        offset: impl Into<Sequence>,
    ) -> Self {
        self.coefficients
            .insert(node.into(), (slope.into(), offset.into()));
        self
    }

    /// Validate and build the offset converter
    pub fn build(self) -> Result<Component> {
        let label = self.label;
        if self.ports.inputs.is_empty() {
            config_bail!(label, "an offset converter needs at least one input");
        }
        if self.ports.outputs.is_empty() {
            config_bail!(label, "an offset converter needs at least one output");
        }

        let flow_keys = self
            .ports
            .inputs
            .iter()
            .map(|(source, flow)| (source, FlowKey::new(source, &label), flow))
            .chain(
                self.ports
                    .outputs
                    .iter()
                    .map(|(target, flow)| (target, FlowKey::new(&label, target), flow)),
            )
            .collect::<Vec<_>>();
        let mut nonconvex = flow_keys.iter().filter(|(_, _, flow)| flow.nonconvex.is_some());
        let (Some((reference_node, reference, _)), None) = (nonconvex.next(), nonconvex.next())
        else {
            config_bail!(label, "an offset converter needs exactly one non-convex flow");
        };

        let mut coefficients = IndexMap::new();
        for (node, key, _) in &flow_keys {
            if node == reference_node {
                continue;
            }
            let Some(coefficient) = self.coefficients.get(*node) else {
                config_bail!(label, "missing slope and offset for the flow {key}");
            };
            coefficients.insert(key.clone(), coefficient.clone());
        }
        for node in self.coefficients.keys() {
            if !flow_keys.iter().any(|(n, _, _)| *n == node) {
                config_bail!(label, "coefficients given for {node}, which is not connected");
            }
        }
        if self.coefficients.contains_key(*reference_node) {
            config_bail!(
                label,
                "coefficients cannot be given for the reference flow {reference}"
            );
        }

        let params = OffsetParams {
            reference: reference.clone(),
            coefficients,
        };
        self.ports
            .into_component(label, NodeKind::OffsetConverter(params))
    }
}

/// Builder for a node handled by a user-supplied constraint block
#[derive(Debug, Clone)]
pub struct CustomNode {
    label: NodeLabel,
    ports: Ports,
    constraint_group: String,
    capabilities: Vec<Capability>,
}

impl CustomNode {
    /// Create a node handled by the constraint block named `constraint_group`
    pub fn new(label: impl Into<NodeLabel>, constraint_group: &str) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            constraint_group: constraint_group.to_string(),
            capabilities: Vec::new(),
        }
    }

    /// Declare a flow from `source` into the node
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the node into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Declare a capability of the node
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Validate and build the node
    pub fn build(self) -> Result<Component> {
        self.ports.into_component(
            self.label,
            NodeKind::Custom {
                constraint_group: self.constraint_group,
                capabilities: self.capabilities,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::options::NonConvex;

    #[test]
    fn sink_needs_input() {
        assert_error!(
            Sink::new("demand").build(),
            "Invalid configuration for demand: a sink needs at least one input"
        );
    }

    #[test]
    fn converter_needs_connected_factor() {
        let result = Converter::new("pp")
            .input("gas", Flow::new())
            .output("el", Flow::new())
            .conversion_factor("heat", 0.3)
            .build();
        assert_error!(
            result,
            "Invalid configuration for pp: conversion factor given for heat, which is not \
             connected"
        );
    }

    #[test]
    fn converter_flows() {
        let component = Converter::new("pp")
            .input("gas", Flow::new())
            .output("el", Flow::new().nominal_capacity(10.0))
            .conversion_factor("el", 0.58)
            .build()
            .unwrap();
        assert_eq!(component.node.inputs, vec![NodeLabel::new("gas")]);
        assert_eq!(component.node.outputs, vec![NodeLabel::new("el")]);
        assert_eq!(component.flows[0].0, FlowKey::new("gas", "pp"));
        assert_eq!(component.flows[1].0, FlowKey::new("pp", "el"));
    }

    #[test]
    fn invalid_flow_fails_component() {
        let result = Source::new("rgas")
            .output("gas", Flow::new().nominal_capacity(-5.0))
            .build();
        assert_error!(
            result,
            "Invalid configuration for (rgas, gas): nominal capacity must not be negative"
        );
    }

    #[test]
    fn offset_converter_reference() {
        let component = OffsetConverter::new("boiler")
            .input("gas", Flow::new())
            .output(
                "heat",
                Flow::new()
                    .nominal_capacity(10.0)
                    .min(0.3)
                    .nonconvex(NonConvex::new()),
            )
            .coefficients("gas", 1.1, 0.5)
            .build()
            .unwrap();
        let NodeKind::OffsetConverter(params) = component.node.kind else {
            panic!("Wrong node kind");
        };
        assert_eq!(params.reference, FlowKey::new("boiler", "heat"));
        assert!(
            params
                .coefficients
                .contains_key(&FlowKey::new("gas", "boiler"))
        );
    }

    #[test]
    fn offset_converter_needs_nonconvex() {
        let result = OffsetConverter::new("boiler")
            .input("gas", Flow::new())
            .output("heat", Flow::new().nominal_capacity(10.0))
            .coefficients("gas", 1.1, 0.5)
            .build();
        assert_error!(
            result,
            "Invalid configuration for boiler: an offset converter needs exactly one non-convex \
             flow"
        );
    }
}
