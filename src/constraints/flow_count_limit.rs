//! Limits on the number of non-convex flows active at the same time.
use super::flows_with_keyword;
use crate::blocks::ConstraintBlock;
use crate::energy_system::EnergySystem;
use crate::error::construction_bail;
use crate::flow::FlowKey;
use crate::groupings::{FlowBlockKind, Group};
use crate::model::BlockContext;
use crate::program::LinearExpr;
use crate::variables::{VarIndex, VariableKey};
use anyhow::Result;

/// Which flows are counted
#[derive(Debug, Clone, PartialEq)]
enum Selection {
    Listed(Vec<FlowKey>),
    Keyword(String),
}

/// `lower ≤ Σ_f status[f,t] ≤ upper` in every time step
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFlowCountLimit {
    name: String,
    selection: Selection,
    lower: f64,
    upper: f64,
}

impl ActiveFlowCountLimit {
    /// Count the given flows, all of which must be non-convex
    pub fn new(name: &str, flows: Vec<FlowKey>) -> Self {
        Self {
            name: name.to_string(),
            selection: Selection::Listed(flows),
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }

    /// Count the non-convex flows carrying the custom property `keyword`
    pub fn by_keyword(keyword: &str) -> Self {
        Self {
            selection: Selection::Keyword(keyword.to_string()),
            ..Self::new(keyword, Vec::new())
        }
    }

    /// Set the minimum number of active flows
    pub fn lower_limit(mut self, lower: f64) -> Self {
        self.lower = lower;
        self
    }

    /// Set the maximum number of active flows
    pub fn upper_limit(mut self, upper: f64) -> Self {
        self.upper = upper;
        self
    }
}

impl ConstraintBlock for ActiveFlowCountLimit {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self, es: &EnergySystem) -> Group {
        let flows = match &self.selection {
            Selection::Listed(flows) => flows.clone(),
            Selection::Keyword(keyword) => flows_with_keyword(es, keyword)
                .into_iter()
                .filter(|key| {
                    es.flow(key).is_some_and(|flow| {
                        matches!(
                            FlowBlockKind::of(flow),
                            FlowBlockKind::NonConvex | FlowBlockKind::InvestNonConvex
                        )
                    })
                })
                .collect(),
        };
        Group::Flows(flows)
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let sets = ctx.sets;
        for t in sets.timesteps() {
            let mut expr = LinearExpr::new();
            for key in group.flows() {
                let status = VariableKey::new(key.clone(), "status", VarIndex::Step(t));
                let Some(status) = ctx.try_var(&status) else {
                    construction_bail!("{}: flow {key} is not non-convex", self.name);
                };
                expr.add_term(status, 1.0);
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
