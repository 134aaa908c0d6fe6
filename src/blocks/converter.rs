//! Linear conversion between the inputs and outputs of converters.
use super::{ConstraintBlock, node_of};
use crate::energy_system::EnergySystem;
use crate::groupings::{Group, nodes_where};
use crate::model::BlockContext;
use crate::node::NodeKind;
use crate::program::LinearExpr;
use anyhow::Result;
use itertools::{Itertools, iproduct};

/// `flow[i,c,t]·factor[o,t] = flow[c,o,t]·factor[i,t]` for every input `i` and output `o`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConverterBlock;

impl ConstraintBlock for ConverterBlock {
    fn name(&self) -> &str {
        "ConverterBlock"
    }

    fn group(&self, es: &EnergySystem) -> Group {
        Group::Nodes(nodes_where(es, |node| {
            matches!(node.kind, NodeKind::Converter { .. })
        }))
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        let es = ctx.es;
        let sets = ctx.sets;
        for label in group.nodes() {
            let node = node_of(es, label.as_str())?;
            let NodeKind::Converter { conversion_factors } = &node.kind else {
                continue;
            };
            let factor = |other: &str, t: usize| {
                conversion_factors
                    .get(other)
                    .map_or(1.0, |factor| factor.get(t))
            };

            let inputs = node.input_keys().collect_vec();
            let outputs = node.output_keys().collect_vec();
            for (input, output) in iproduct!(&inputs, &outputs) {
                for t in sets.timesteps() {
                    let expr = LinearExpr::term(
                        ctx.flow(input, t)?,
                        factor(output.target.as_str(), t),
                    ) - LinearExpr::term(
                        ctx.flow(output, t)?,
                        factor(input.source.as_str(), t),
                    );
                    ctx.add_constraint(
                        || format!("relation({input},{output},{t})"),
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
    use crate::components::{Bus, Converter, Sink, Source};
    use crate::energy_system::EnergySystem;
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;

    #[test]
    fn chp_couples_outputs() {
        let mut es = EnergySystem::with_uniform_steps(1, 1.0).unwrap();
        for bus in ["gas", "el", "heat"] {
            es.add(Bus::new(bus).build().unwrap()).unwrap();
        }
        es.add(
            Source::new("gas_supply")
                .output("gas", Flow::new().variable_costs(1.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Converter::new("chp")
                .input("gas", Flow::new())
                .output("el", Flow::new())
                .output("heat", Flow::new())
                .conversion_factor("el", 0.3)
                .conversion_factor("heat", 0.5)
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(30.0).fix(1.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("heat_excess")
                .input("heat", Flow::new())
                .build()
                .unwrap(),
        )
        .unwrap();

        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        model.solve(&Highs, &SolveOptions::default()).unwrap();
        let results = model.results().unwrap();

        let heat = results.get(&ResultKey::edge("chp", "heat")).unwrap();
        assert_approx_eq!(
            f64,
            heat.sequences.column("flow").unwrap()[0],
            50.0,
            epsilon = 1e-6
        );
        assert_approx_eq!(f64, results.meta.objective, 100.0, epsilon = 1e-6);
    }
}
