//! Assignment of flows and nodes to the constraint blocks handling them.
//!
//! Groups are returned in canonical order (flows by `(source, target)`, nodes by label) so that
//! repeated builds produce identical programs.
use crate::energy_system::EnergySystem;
use crate::flow::{Flow, FlowKey};
use crate::id::NodeLabel;
use crate::node::{Capability, Node};
use itertools::Itertools;

/// The flow dialect handling a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowBlockKind {
    /// Neither an investment nor unit commitment
    Simple,
    /// Capacity sized by an investment
    Investment,
    /// Unit commitment with a fixed capacity
    NonConvex,
    /// Unit commitment with an invested capacity
    InvestNonConvex,
}

impl FlowBlockKind {
    /// The dialect responsible for `flow`
    pub fn of(flow: &Flow) -> Self {
        match (flow.investment_record().is_some(), flow.nonconvex.is_some()) {
            (true, false) => Self::Investment,
            (false, true) => Self::NonConvex,
            (true, true) => Self::InvestNonConvex,
            (false, false) => Self::Simple,
        }
    }
}

/// The members of a constraint block
#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    /// A set of flows
    Flows(Vec<FlowKey>),
    /// A set of nodes
    Nodes(Vec<NodeLabel>),
}

impl Group {
    /// Number of members
    pub fn len(&self) -> usize {
        match self {
            Self::Flows(flows) => flows.len(),
            Self::Nodes(nodes) => nodes.len(),
        }
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The flows of the group (empty for a node group)
    pub fn flows(&self) -> &[FlowKey] {
        match self {
            Self::Flows(flows) => flows,
            Self::Nodes(_) => &[],
        }
    }

    /// The nodes of the group (empty for a flow group)
    pub fn nodes(&self) -> &[NodeLabel] {
        match self {
            Self::Flows(_) => &[],
            Self::Nodes(nodes) => nodes,
        }
    }
}

/// All flows handled by the given dialect
pub fn flows_of_kind(es: &EnergySystem, kind: FlowBlockKind) -> Vec<FlowKey> {
    es.flows()
        .filter(|(_, flow)| FlowBlockKind::of(flow) == kind)
        .map(|(key, _)| key.clone())
        .sorted()
        .collect()
}

/// All nodes matching `predicate`
pub fn nodes_where<P>(es: &EnergySystem, predicate: P) -> Vec<NodeLabel>
where
    P: Fn(&Node) -> bool,
{
    es.nodes()
        .filter(|node| predicate(node))
        .map(|node| node.label.clone())
        .sorted()
        .collect()
}

/// All nodes implementing a capability
pub fn nodes_with_capability(es: &EnergySystem, capability: Capability) -> Vec<NodeLabel> {
    nodes_where(es, |node| node.has_capability(capability))
}

/// All nodes declaring the named constraint group
pub fn nodes_in_constraint_group(es: &EnergySystem, name: &str) -> Vec<NodeLabel> {
    nodes_where(es, |node| node.constraint_group() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Bus, CustomNode, Sink, Source};
    use crate::options::{Investment, NonConvex};
    use rstest::rstest;

    #[rstest]
    #[case(Flow::new(), FlowBlockKind::Simple)]
    #[case(Flow::new().nominal_capacity(10.0), FlowBlockKind::Simple)]
    #[case(Flow::new().investment(Investment::new()), FlowBlockKind::Investment)]
    #[case(
        Flow::new().nominal_capacity(10.0).nonconvex(NonConvex::new()),
        FlowBlockKind::NonConvex
    )]
    #[case(
        Flow::new().investment(Investment::new().maximum(5.0)).nonconvex(NonConvex::new()),
        FlowBlockKind::InvestNonConvex
    )]
    fn dispatch(#[case] flow: Flow, #[case] expected: FlowBlockKind) {
        assert_eq!(FlowBlockKind::of(&flow), expected);
    }

    #[test]
    fn groups_are_sorted() {
        let mut es = EnergySystem::with_uniform_steps(1, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(Sink::new("demand").input("el", Flow::new()).build().unwrap())
            .unwrap();
        es.add(Source::new("coal").output("el", Flow::new()).build().unwrap())
            .unwrap();
        es.add(CustomNode::new("link", "LinkBlock").build().unwrap())
            .unwrap();

        assert_eq!(
            flows_of_kind(&es, FlowBlockKind::Simple),
            vec![FlowKey::new("coal", "el"), FlowKey::new("el", "demand")]
        );
        assert_eq!(
            nodes_with_capability(&es, Capability::Produces),
            vec![NodeLabel::from("coal")]
        );
        assert_eq!(
            nodes_in_constraint_group(&es, "LinkBlock"),
            vec![NodeLabel::from("link")]
        );
        assert!(nodes_in_constraint_group(&es, "Other").is_empty());
    }
}
