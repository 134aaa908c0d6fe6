//! Affine conversion switched by the status of a reference flow.
use super::{ConstraintBlock, node_of};
use crate::energy_system::EnergySystem;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use crate::node::NodeKind;
use crate::program::LinearExpr;
use crate::variables::{VarIndex, VariableKey};
use anyhow::{Context, Result};

/// `flow[x,t] = slope[x,t]·flow[ref,t] + offset[x,t]·status[ref,t]` for every non-reference flow
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetConverterBlock;

impl ConstraintBlock for OffsetConverterBlock {
    fn name(&self) -> &str {
        "OffsetConverterBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| {
            matches!(node.kind, NodeKind::OffsetConverter(_))
        }))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let NodeKind::OffsetConverter(params) = &node.kind else {
                continue;
            };
            let reference = &params.reference;
            for t in sets.timesteps() {
                let status_key =
                    VariableKey::new(reference.clone(), "status", VarIndex::Step(t));
                let status = ctx
                    .var(&status_key)
                    .with_context(|| format!("The reference flow of {label} has no status"))?;
                let reference_flow = ctx.flow(reference, t)?;
                for (key, (slope, offset)) in &params.coefficients {
                    let expr = LinearExpr::from(ctx.flow(key, t)?)
                        - LinearExpr::term(reference_flow, slope.get(t))
                        - LinearExpr::term(status, offset.get(t));
                    ctx.add_constraint(
                        || format!("offset_relation({key},{t})"),
                        &expr,
                        0.0,
                        0.0,
                    )?;
                }
            }
        }
        Ok(())
    }
}
