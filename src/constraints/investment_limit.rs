//! A budget for the investment expenditure of the whole model.
use crate::blocks::ConstraintBlock;
use crate::energy_system::EnergySystem;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use anyhow::Result;

/// Caps the investment costs of all flows and storages.
///
/// Fixed operation costs do not count towards the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvestmentLimit {
    limit: f64,
}

impl InvestmentLimit {
    /// Create a budget of `limit`
    pub fn new(limit: f64) -> Self {
        Self { limit }
    }
}

impl ConstraintBlock for InvestmentLimit {
    fn name(&self) -> &str {
        "investment_limit"
    }

    /// The nodes owning an investment, either in a flow or in a storage capacity
    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| {
            node.storage().is_some_and(|params| params.investment().is_some())
                || node
                    .input_keys()
                    .chain(node.output_keys())
                    .filter_map(|key| es.flow(&key))
                    .any(|flow| flow.investment_record().is_some())
        }))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, _group: &Group) -> Result<()> {
        let costs = ctx.investment_costs().clone();
        ctx.add_constraint(
            || "investment_limit".to_string(),
            &costs,
            f64::NEG_INFINITY,
            self.limit,
        )?;
        Ok(())
    }
}
