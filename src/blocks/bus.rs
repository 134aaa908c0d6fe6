//! Balance of inflows and outflows at buses.
use super::{ConstraintBlock, node_of};
use crate::energy_system::EnergySystem;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use crate::node::NodeKind;
use crate::program::LinearExpr;
use anyhow::Result;

/// `Σ inflow − Σ outflow = 0` for every balanced bus and time step
#[derive(Debug, Clone, Copy, Default)]
pub struct BusBlock;

impl ConstraintBlock for BusBlock {
    fn name(&self) -> &str {
        "BusBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| {
            matches!(node.kind, NodeKind::Bus { balanced: true })
        }))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let (inflows, outflows) = (es.inflows(label.as_str()), es.outflows(label.as_str()));
            for t in sets.timesteps() {
                let mut expr = LinearExpr::new();
                for key in &inflows {
                    expr.add_term(ctx.flow(key, t)?, 1.0);
                }
                for key in &outflows {
                    expr.add_term(ctx.flow(key, t)?, -1.0);
                }
                let row = ctx.add_constraint(
                    || format!("balance({},{t})", node.label),
                    &expr,
                    0.0,
                    0.0,
                )?;
                if ctx.options.receive_duals {
                    ctx.record_dual(&node.label, t, row);
                }
            }
        }
        Ok(())
    }
}
