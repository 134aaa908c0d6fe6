//! Builder for links between buses.
use super::Ports;
use crate::error::config_bail;
use crate::flow::Flow;
use crate::id::NodeLabel;
use crate::node::{Component, NodeKind};
use crate::sequence::Sequence;
use anyhow::Result;
use indexmap::IndexMap;
use log::warn;

/// Builder for a link transporting a commodity between buses.
///
/// A link usually has two inputs and two outputs, one of each per bus, and a conversion factor
/// per direction: `flow[link, to, t] = factor[t]·flow[from, link, t]`.
#[derive(Debug, Clone)]
pub struct Link {
    label: NodeLabel,
    ports: Ports,
    conversion_factors: IndexMap<(NodeLabel, NodeLabel), Sequence>,
}

impl Link {
    /// Create a link without flows
    pub fn new(label: impl Into<NodeLabel>) -> Self {
        Self {
            label: label.into(),
            ports: Ports::default(),
            conversion_factors: IndexMap::new(),
        }
    }

    /// Declare a flow from `source` into the link
    pub fn input(mut self, source: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.inputs.insert(source.into(), flow);
        self
    }

    /// Declare a flow from the link into `target`
    pub fn output(mut self, target: impl Into<NodeLabel>, flow: Flow) -> Self {
        self.ports.outputs.insert(target.into(), flow);
        self
    }

    /// Set the factor for the direction from the input `from` to the output `to`
    pub fn conversion_factor(
        mut self,
        from: impl Into<NodeLabel>,
        to: impl Into<NodeLabel>,
        factor: impl Into<Sequence>,
    ) -> Self {
        self.conversion_factors
            .insert((from.into(), to.into()), factor.into());
        self
    }

    /// Validate and build the link
    pub fn build(self) -> Result<Component> {
        let label = self.label;
        if self.conversion_factors.is_empty() {
            config_bail!(label, "a link needs at least one conversion factor");
        }
        for ((from, to), factor) in &self.conversion_factors {
            if !self.ports.inputs.contains_key(from) || !self.ports.outputs.contains_key(to) {
                config_bail!(
                    label,
                    "conversion factor from {from} to {to} does not join an input to an output"
                );
            }
            if !factor.within(0.0, f64::INFINITY) {
                config_bail!(
                    label,
                    "conversion factor from {from} to {to} must not be negative"
                );
            }
        }
        if self.ports.inputs.len() != 2
            || self.ports.outputs.len() != 2
            || self.conversion_factors.len() != 2
        {
            warn!(
                "Link {label} does not have two inputs, two outputs and two conversion factors"
            );
        }

        self.ports.into_component(
            label,
            NodeKind::Link {
                conversion_factors: self.conversion_factors,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;

    #[test]
    fn factor_must_join_input_to_output() {
        let result = Link::new("cable")
            .input("el0", Flow::new())
            .output("el1", Flow::new())
            .conversion_factor("el1", "el0", 0.9)
            .build();
        assert_error!(
            result,
            "Invalid configuration for cable: conversion factor from el1 to el0 does not join \
             an input to an output"
        );
    }

    #[test]
    fn needs_factor() {
        let result = Link::new("cable")
            .input("el0", Flow::new())
            .output("el1", Flow::new())
            .build();
        assert_error!(
            result,
            "Invalid configuration for cable: a link needs at least one conversion factor"
        );
    }
}
