//! Limits on the weighted sum of flows over the horizon, e.g. emissions.
use super::flows_with_keyword;
use crate::blocks::{ConstraintBlock, flow_of};
use crate::energy_system::EnergySystem;
use crate::error::construction_bail;
use crate::flow::FlowKey;
use crate::groupings::Group;
use crate::model::BlockContext;
use crate::program::LinearExpr;
use anyhow::Result;

/// `lower ≤ Σ_f Σ_t flow[f,t]·factor[f,t]·Δt·weight[t] ≤ upper`.
///
/// The factor is the custom property `keyword` of each flow.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegralLimit {
    name: String,
    keyword: String,
    flows: Option<Vec<FlowKey>>,
    lower: f64,
    upper: f64,
}

impl IntegralLimit {
    /// Limit the sum over all flows carrying `keyword`
    pub fn new(keyword: &str, limit: f64) -> Self {
        Self {
            name: format!("integral_limit_{keyword}"),
            keyword: keyword.to_string(),
            flows: None,
            lower: f64::NEG_INFINITY,
            upper: limit,
        }
    }

    /// Limit the emissions given by the `emission_factor` of each flow
    pub fn emission_limit(limit: f64) -> Self {
        Self::new("emission_factor", limit)
    }

    /// Restrict the sum to the given flows, all of which must carry the keyword
    pub fn flows(mut self, flows: Vec<FlowKey>) -> Self {
        self.flows = Some(flows);
        self
    }

    /// Set a lower limit on the sum
    pub fn lower_limit(mut self, lower: f64) -> Self {
        self.lower = lower;
        self
    }
}

impl ConstraintBlock for IntegralLimit {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self, es: &EnergySystem) -> Group {
        match &self.flows {
            Some(flows) => Group::Flows(flows.clone()),
            None => Group::Flows(flows_with_keyword(es, &self.keyword)),
        }
    }

    fn create(&self, ctx: &mut BlockContext<'_>, group: &Group) -> Result<()> {
        if self.lower > self.upper {
            construction_bail!(
                "{}: lower limit {} exceeds upper limit {}",
                self.name,
                self.lower,
                self.upper
            );
        }
        let es = ctx.es;
        let sets = ctx.sets;
        let mut expr = LinearExpr::new();
        for key in group.flows() {
            let flow = flow_of(es, key)?;
            let Some(factor) = flow.custom_properties.get(&self.keyword) else {
                construction_bail!("flow {key} has no {}", self.keyword);
            };
            for t in sets.timesteps() {
                let weight = sets.timeincrement[t] * sets.tsa_weight[t];
                expr.add_term(ctx.flow(key, t)?, factor.get(t) * weight);
            }
        }
        ctx.add_constraint(|| self.name.clone(), &expr, self.lower, self.upper)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Bus, Sink, Source};
    use crate::flow::Flow;
    use crate::model::{Model, ModelOptions};
    use crate::solver::{Highs, SolveOptions};
    use crate::variables::ResultKey;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn power_system() -> EnergySystem {
        let mut es = EnergySystem::with_uniform_steps(2, 1.0).unwrap();
        es.add(Bus::new("el").build().unwrap()).unwrap();
        es.add(
            Source::new("coal")
                .output(
                    "el",
                    Flow::new()
                        .variable_costs(1.0)
                        .custom_property("emission_factor", 1.0),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Source::new("gas")
                .output(
                    "el",
                    Flow::new()
                        .variable_costs(3.0)
                        .custom_property("emission_factor", 0.4),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
        es.add(
            Sink::new("demand")
                .input("el", Flow::new().nominal_capacity(1.0).fix(10.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        es
    }

    #[rstest]
    #[case(25.0, 20.0, 20.0)]
    #[case(14.0, 10.0, 10.0 + 3.0 * 10.0)]
    fn emission_limit_shifts_to_gas(
        #[case] limit: f64,
        #[case] coal: f64,
        #[case] expected: f64,
    ) {
        let es = power_system();
        let mut model = Model::new(&es, ModelOptions::default())
            .unwrap()
            .with_constraint_group(Box::new(IntegralLimit::emission_limit(limit)))
            .unwrap();
        let summary = model.solve(&Highs, &SolveOptions::default()).unwrap();
        let results = model.results().unwrap();

        let flow = results.get(&ResultKey::edge("coal", "el")).unwrap();
        let burnt: f64 = flow.sequences.column("flow").unwrap()[..2].iter().sum();
        assert_approx_eq!(f64, burnt, coal, epsilon = 1e-6);
        assert_approx_eq!(f64, summary.objective, expected, epsilon = 1e-6);
    }

    #[test]
    fn listed_flow_needs_keyword() {
        let es = power_system();
        let limit = IntegralLimit::new("co2", 5.0).flows(vec![FlowKey::new("coal", "el")]);
        let result = Model::new(&es, ModelOptions::default())
            .unwrap()
            .with_constraint_group(Box::new(limit));
        assert!(result.is_err());
    }

    #[test]
    fn lower_limit_on_listed_flow() {
        let es = power_system();
        let limit = IntegralLimit::emission_limit(f64::INFINITY)
            .flows(vec![FlowKey::new("gas", "el")])
            .lower_limit(4.0);
        let mut model = Model::new(&es, ModelOptions::default())
            .unwrap()
            .with_constraint_group(Box::new(limit))
            .unwrap();
        let summary = model.solve(&Highs, &SolveOptions::default()).unwrap();
        // At 0.4 per unit, gas has to produce 10
        assert_approx_eq!(f64, summary.objective, 10.0 * 3.0 + 10.0, epsilon = 1e-6);
    }
}
