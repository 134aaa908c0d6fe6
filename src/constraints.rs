//! Constraint blocks spanning many flows or the whole model.
//!
//! None of these blocks are built by default. Add them to a model with
//! [`Model::with_constraint_group`](crate::model::Model::with_constraint_group), after the
//! default blocks have created the variables they refer to.
use crate::energy_system::EnergySystem;
use crate::flow::FlowKey;
use itertools::Itertools;

pub mod flow_count_limit;
pub mod integral_limit;
pub mod investment_limit;
pub mod shared_limit;

pub use flow_count_limit::ActiveFlowCountLimit;
pub use integral_limit::IntegralLimit;
pub use investment_limit::InvestmentLimit;
pub use shared_limit::{SharedLimit, SharedQuantity};

/// All flows carrying the custom property `keyword`, in canonical order
pub fn flows_with_keyword(es: &EnergySystem, keyword: &str) -> Vec<FlowKey> {
    es.flows()
        .filter(|(_, flow)| flow.custom_properties.contains_key(keyword))
        .map(|(key, _)| key.clone())
        .sorted()
        .collect()
}
