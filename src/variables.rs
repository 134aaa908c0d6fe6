//! Lookup of program variables by the entity, name and index they belong to.
//!
//! The same keys are used to build constraints and to lift the solution back onto the energy
//! system after solving.
use crate::flow::FlowKey;
use crate::id::NodeLabel;
use crate::program::VarId;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// The entity a variable (and its results) belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResultKey {
    /// A flow between two nodes
    Edge(FlowKey),
    /// A node, e.g. the content of a storage
    Node(NodeLabel),
}

impl ResultKey {
    /// Key for the flow from `source` to `target`
    pub fn edge(source: impl Into<NodeLabel>, target: impl Into<NodeLabel>) -> Self {
        Self::Edge(FlowKey::new(source, target))
    }

    /// Key for the node `label`
    pub fn node(label: impl Into<NodeLabel>) -> Self {
        Self::Node(label.into())
    }

    /// Whether the key refers to `label`, either as a node or as an end of a flow
    pub fn involves(&self, label: &str) -> bool {
        match self {
            Self::Edge(key) => key.source.as_str() == label || key.target.as_str() == label,
            Self::Node(node) => node.as_str() == label,
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge(key) => write!(f, "{key}"),
            Self::Node(label) => write!(f, "({label}, None)"),
        }
    }
}

impl From<FlowKey> for ResultKey {
    fn from(key: FlowKey) -> Self {
        Self::Edge(key)
    }
}

/// The index of a variable within its family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarIndex {
    /// A time step
    Step(usize),
    /// A timepoint (boundary between time steps, one more than there are steps)
    Timepoint(usize),
    /// An investment period
    Period(usize),
    /// A step within a typical cluster
    Typical {
        /// Investment period
        period: usize,
        /// Cluster id
        cluster: usize,
        /// Timepoint within the cluster
        step: usize,
    },
    /// A position in the restored cluster order
    Inter {
        /// Investment period
        period: usize,
        /// Position in the order (one more than there are positions)
        position: usize,
    },
}

impl fmt::Display for VarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(t) | Self::Timepoint(t) => write!(f, "{t}"),
            Self::Period(p) => write!(f, "p{p}"),
            Self::Typical {
                period,
                cluster,
                step,
            } => write!(f, "{period},{cluster},{step}"),
            Self::Inter { period, position } => write!(f, "{period},i{position}"),
        }
    }
}

/// A key for a [`VariableMap`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    /// The entity the variable belongs to
    pub owner: ResultKey,
    /// The variable family, e.g. `flow` or `status`
    pub name: &'static str,
    /// The index within the family
    pub index: VarIndex,
}

impl VariableKey {
    /// Create a new [`VariableKey`]
    pub fn new(owner: impl Into<ResultKey>, name: &'static str, index: VarIndex) -> Self {
        Self {
            owner: owner.into(),
            name,
            index,
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            ResultKey::Edge(key) => {
                write!(f, "{}({},{},{})", self.name, key.source, key.target, self.index)
            }
            ResultKey::Node(label) => write!(f, "{}({},{})", self.name, label, self.index),
        }
    }
}

/// A map for easy lookup of variables in the program.
///
/// The entries are ordered (see [`IndexMap`]), which keeps results in creation order.
#[derive(Debug, Clone, Default)]
pub struct VariableMap(IndexMap<VariableKey, VarId>);

impl VariableMap {
    /// Register a variable. Returns `false` if the key was already taken.
    pub fn insert(&mut self, key: VariableKey, var: VarId) -> bool {
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, var);
        true
    }

    /// Get the variable for the given key
    pub fn get(&self, key: &VariableKey) -> Option<VarId> {
        self.0.get(key).copied()
    }

    /// Iterate over all keys and variables in creation order
    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, VarId)> {
        self.0.iter().map(|(key, var)| (key, *var))
    }

    /// Number of registered variables
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no variable has been registered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keys() {
        let key = VariableKey::new(ResultKey::edge("gas", "pp"), "flow", VarIndex::Step(3));
        assert_eq!(key.to_string(), "flow(gas,pp,3)");
        let key = VariableKey::new(ResultKey::node("battery"), "invest", VarIndex::Period(0));
        assert_eq!(key.to_string(), "invest(battery,p0)");
        assert_eq!(ResultKey::node("battery").to_string(), "(battery, None)");
    }

    #[test]
    fn involves() {
        assert!(ResultKey::edge("gas", "pp").involves("pp"));
        assert!(!ResultKey::edge("gas", "pp").involves("el"));
    }
}
