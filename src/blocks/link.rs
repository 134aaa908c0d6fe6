//! Transport between buses through links.
use super::{ConstraintBlock, node_of};
use crate::energy_system::EnergySystem;
use crate::flow::FlowKey;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use crate::node::NodeKind;
use crate::program::LinearExpr;
use anyhow::Result;

/// `flow[link,to,t] = factor[t]·flow[from,link,t]` for every direction of a link
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkBlock;

impl ConstraintBlock for LinkBlock {
    fn name(&self) -> &str {
        "LinkBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| matches!(node.kind, NodeKind::Link { .. })))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let NodeKind::Link { conversion_factors } = &node.kind else {
                continue;
            };
            for ((from, to), factor) in conversion_factors {
                let inflow = FlowKey::new(from, label);
                let outflow = FlowKey::new(label, to);
                for t in sets.timesteps() {
                    let expr = LinearExpr::from(ctx.flow(&outflow, t)?)
                        - LinearExpr::term(ctx.flow(&inflow, t)?, factor.get(t));
                    ctx.add_constraint(
                        || format!("relation({label},{from},{to},{t})"),
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

#[cfg(test)]
mod tests {
    use crate::components::{Bus, Link, Sink, Source};
    use crate::energy_system::EnergySystem;
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(20.0, 12.5)]
    #[case(10.0, 10.0 + 2.0 * 5.0)]
    fn imports_cheap_power(#[case] link_capacity: f64, #[case] expected: f64) {
        let mut es = EnergySystem::with_uniform_steps(1, 1.0).unwrap();
        for bus in ["el0", "el1"] {
            es.add(Bus::new(bus).build().unwrap()).unwrap();
        }
        es.add(
            Source::new("cheap")
                .output("el0", Flow::new().variable_costs(1.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("expensive")
                .output("el1", Flow::new().variable_costs(5.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Link::new("cable")
                .input("el0", Flow::new().nominal_capacity(link_capacity))
                .input("el1", Flow::new())
                .output("el0", Flow::new())
                .output("el1", Flow::new())
                .conversion_factor("el0", "el1", 0.8)
                .conversion_factor("el1", "el0", 0.9)
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el1", Flow::new().nominal_capacity(1.0).fix(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();

        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        let summary = model.solve(&Highs, &SolveOptions::default()).unwrap();
        let results = model.results().unwrap();

        // 80 % of what enters at el0 arrives at el1
        let sent = results.get(&ResultKey::edge("el0", "cable")).unwrap();
        let received = results.get(&ResultKey::edge("cable", "el1")).unwrap();
        assert_approx_eq!(
            f64,
            received.sequences.column("flow").unwrap()[0],
            0.8 * sent.sequences.column("flow").unwrap()[0],
            epsilon = 1e-6
        );
        assert_approx_eq!(f64, summary.objective, expected, epsilon = 1e-6);
    }
}
