//! CHP plants with an extraction turbine.
//!
//! Extracting heat costs electrical output. The fuel demand is `(main + tapped·β)/η_full`
//! with the power loss index `β = (η_full - η_main)/η_tapped`. The main output may not fall
//! below the back-pressure line `tapped·η_main/η_tapped`.
use super::{ConstraintBlock, node_of};
use crate::energy_system::EnergySystem;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use crate::node::NodeKind;
use crate::program::LinearExpr;
use anyhow::Result;

/// Input-output relation and back-pressure limit of extraction turbines
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionTurbineChpBlock;

impl ConstraintBlock for ExtractionTurbineChpBlock {
    fn name(&self) -> &str {
        "ExtractionTurbineCHPBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| {
            matches!(node.kind, NodeKind::ExtractionTurbineChp(_))
        }))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let NodeKind::ExtractionTurbineChp(params) = &node.kind else {
                continue;
            };
            for t in sets.timesteps() {
                let full = params.full_condensation_efficiency.get(t);
                let main = params.main_efficiency.get(t);
                let tapped = params.tapped_efficiency.get(t);
                let loss_index = (full - main) / tapped;

                let fuel = ctx.flow(&params.fuel, t)?;
                let main_flow = ctx.flow(&params.main_output, t)?;
                let tapped_flow = ctx.flow(&params.tapped_output, t)?;
                let relation = LinearExpr::term(fuel, full)
                    - LinearExpr::from(main_flow)
                    - LinearExpr::term(tapped_flow, loss_index);
                ctx.add_constraint(
                    || format!("input_output_relation({label},{t})"),
                    &relation,
                    0.0,
                    0.0,
                )?;

                let back_pressure =
                    LinearExpr::from(main_flow) - LinearExpr::term(tapped_flow, main / tapped);
                ctx.add_constraint(
                    || format!("out_flow_relation({label},{t})"),
                    &back_pressure,
                    0.0,
                    f64::INFINITY,
                )?;
            }
        }
        Ok(())
    }
}
