//! A limit shared by flows and storage contents, e.g. a common grid connection or land area.
use crate::blocks::ConstraintBlock;
use crate::energy_system::EnergySystem;
use crate::error::construction_bail;
use crate::flow::FlowKey;
use crate::groupings::Group;
use crate::id::NodeLabel;
use crate::model::BlockContext;
use crate::program::LinearExpr;
use crate::variables::{ResultKey, VarIndex, VariableKey};
use anyhow::Result;

/// A quantity taking part in a shared limit
#[derive(Debug, Clone, PartialEq)]
pub enum SharedQuantity {
    /// The value of a flow in each time step
    Flow(FlowKey),
    /// The content of a storage at the start of each time step
    StorageContent(NodeLabel),
}

impl SharedQuantity {
    fn key(&self, t: usize) -> VariableKey {
        match self {
            Self::Flow(key) => VariableKey::new(key.clone(), "flow", VarIndex::Step(t)),
            Self::StorageContent(label) => VariableKey::new(
                ResultKey::Node(label.clone()),
                "storage_content",
                VarIndex::Timepoint(t),
            ),
        }
    }
}

/// `lower ≤ Σ_c weight[c]·quantity[c,t] ≤ upper` in every time step
#[derive(Debug, Clone, PartialEq)]
pub struct SharedLimit {
    name: String,
    components: Vec<(SharedQuantity, f64)>,
    lower: f64,
    upper: f64,
}

impl SharedLimit {
    /// Create a limit without members
    pub fn new(name: &str, lower: f64, upper: f64) -> Self {
        Self {
            name: name.to_string(),
            components: Vec::new(),
            lower,
            upper,
        }
    }

    /// Add a flow with its weight
    pub fn flow(mut self, key: FlowKey, weight: f64) -> Self {
        self.components.push((SharedQuantity::Flow(key), weight));
        self
    }

    /// Add the content of a storage with its weight
    pub fn storage_content(mut self, label: impl Into<NodeLabel>, weight: f64) -> Self {
        self.components
            .push((SharedQuantity::StorageContent(label.into()), weight));
        self
    }
}

impl ConstraintBlock for SharedLimit {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self, _es: &EnergySystem) -> Group {
        let flows = self
            .components
            .iter()
            .filter_map(|(quantity, _)| match quantity {
                SharedQuantity::Flow(key) => Some(key.clone()),
                SharedQuantity::StorageContent(_) => None,
            })
            .collect();
        let nodes = self
            .components
            .iter()
            .filter_map(|(quantity, _)| match quantity {
                SharedQuantity::StorageContent(label) => Some(label.clone()),
                SharedQuantity::Flow(_) => None,
            })
            .collect::<Vec<_>>();
        if nodes.is_empty() {
            Group::Flows(flows)
        } else {
            Group::Nodes(nodes)
        }
    }

    fn create(&self, ctx: &mut BlockContext<'_>, _group: &Group) -> Result<()> {
        for t in ctx.sets.timesteps() {
            let mut expr = LinearExpr::new();
            for (quantity, weight) in &self.components {
                let Some(var) = ctx.try_var(&quantity.key(t)) else {
                    construction_bail!(
                        "{}: {quantity:?} has no value at time step {t}; storage contents are \
                         not available with typical periods",
                        self.name
                    );
                };
                expr.add_term(var, *weight);
            }
            ctx.add_constraint(
                || format!("{}({t})", self.name),
                &expr,
                self.lower,
                self.upper,
            )?;
        }
        Ok(())
    }
}
