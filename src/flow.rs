//! Flows are the directed edges of the energy system, carrying a time-indexed quantity.
use crate::error::config_bail;
use crate::id::NodeLabel;
use crate::options::{Investment, NonConvex};
use crate::sequence::Sequence;
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The ordered pair of nodes a flow connects
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    /// The node the flow leaves
    pub source: NodeLabel,
    /// The node the flow enters
    pub target: NodeLabel,
}

impl FlowKey {
    /// Create a new [`FlowKey`]
    pub fn new(source: impl Into<NodeLabel>, target: impl Into<NodeLabel>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.source, self.target)
    }
}

/// The capacity limiting a flow
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum Capacity {
    /// No upper limit
    #[default]
    #[serde(skip)]
    Unbounded,
    /// A fixed nominal capacity
    Fixed(f64),
    /// A capacity sized by the optimisation
    Investment(Investment),
}

/// The parameters of a flow between two nodes.
///
/// Fractional bounds (`min`, `max`, `fix`, gradient limits) are relative to the nominal
/// capacity.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Flow {
    /// Nominal capacity of the flow
    pub nominal_capacity: Capacity,
    /// Lower bound relative to the nominal capacity
    pub min: Option<Sequence>,
    /// Upper bound relative to the nominal capacity
    pub max: Option<Sequence>,
    /// Fixed value relative to the nominal capacity
    pub fix: Option<Sequence>,
    /// Costs per unit of energy
    pub variable_costs: Option<Sequence>,
    /// Maximum increase between consecutive steps relative to the nominal capacity
    pub positive_gradient_limit: Option<Sequence>,
    /// Maximum decrease between consecutive steps relative to the nominal capacity
    pub negative_gradient_limit: Option<Sequence>,
    /// Lower bound on the full load time over the horizon
    pub full_load_time_min: Option<f64>,
    /// Upper bound on the full load time over the horizon
    pub full_load_time_max: Option<f64>,
    /// Whether the flow only takes integer values
    pub integer: bool,
    /// Whether the flow may be negative
    pub bidirectional: bool,
    /// Costs per unit of capacity and year (multi-period and investment models)
    pub fixed_costs: Option<Sequence>,
    /// Unit commitment parameters
    pub nonconvex: Option<NonConvex>,
    /// Named per-step factors read by extra constraint blocks, e.g. `emission_factor`
    pub custom_properties: IndexMap<String, Sequence>,
}

impl Flow {
    /// Create an unbounded, cost-free flow
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fixed nominal capacity
    pub fn nominal_capacity(mut self, capacity: f64) -> Self {
        self.nominal_capacity = Capacity::Fixed(capacity);
        self
    }

    /// Let the optimisation size the capacity of this flow
    pub fn investment(mut self, investment: Investment) -> Self {
        self.nominal_capacity = Capacity::Investment(investment);
        self
    }

    /// Set the relative lower bound
    pub fn min(mut self, min: impl Into<Sequence>) -> Self {
        self.min = Some(min.into());
        self
    }

    /// Set the relative upper bound
    pub fn max(mut self, max: impl Into<Sequence>) -> Self {
        self.max = Some(max.into());
        self
    }

    /// Pin the flow to a fraction of its nominal capacity
    pub fn fix(mut self, fix: impl Into<Sequence>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    /// Set the variable costs
    pub fn variable_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.variable_costs = Some(costs.into());
        self
    }

    /// Set the positive gradient limit
    pub fn positive_gradient_limit(mut self, limit: impl Into<Sequence>) -> Self {
        self.positive_gradient_limit = Some(limit.into());
        self
    }

    /// Set the negative gradient limit
    pub fn negative_gradient_limit(mut self, limit: impl Into<Sequence>) -> Self {
        self.negative_gradient_limit = Some(limit.into());
        self
    }

    /// Set the minimum full load time
    pub fn full_load_time_min(mut self, hours: f64) -> Self {
        self.full_load_time_min = Some(hours);
        self
    }

    /// Set the maximum full load time
    pub fn full_load_time_max(mut self, hours: f64) -> Self {
        self.full_load_time_max = Some(hours);
        self
    }

    /// Restrict the flow to integer values
    pub fn integer(mut self, integer: bool) -> Self {
        self.integer = integer;
        self
    }

    /// Allow negative flow values
    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    /// Set the fixed costs per unit of capacity
    pub fn fixed_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.fixed_costs = Some(costs.into());
        self
    }

    /// Add unit commitment semantics
    pub fn nonconvex(mut self, nonconvex: NonConvex) -> Self {
        self.nonconvex = Some(nonconvex);
        self
    }

    /// Attach a named per-step factor to the flow
    pub fn custom_property(mut self, name: &str, value: impl Into<Sequence>) -> Self {
        self.custom_properties.insert(name.to_string(), value.into());
        self
    }

    /// The investment record, if the capacity is sized by the optimisation
    pub fn investment_record(&self) -> Option<&Investment> {
        match &self.nominal_capacity {
            Capacity::Investment(investment) => Some(investment),
            _ => None,
        }
    }

    /// The fixed nominal capacity, if any
    pub fn fixed_capacity(&self) -> Option<f64> {
        match self.nominal_capacity {
            Capacity::Fixed(capacity) => Some(capacity),
            _ => None,
        }
    }

    /// Relative lower bound at step `t`, taking `fix` and the direction into account
    pub fn min_at(&self, t: usize) -> f64 {
        if let Some(fix) = &self.fix {
            return fix.get(t);
        }
        match &self.min {
            Some(min) => min.get(t),
            None if self.bidirectional => -1.0,
            None => 0.0,
        }
    }

    /// Relative upper bound at step `t`, taking `fix` into account
    pub fn max_at(&self, t: usize) -> f64 {
        if let Some(fix) = &self.fix {
            return fix.get(t);
        }
        self.max.as_ref().map_or(1.0, |max| max.get(t))
    }

    /// Whether the flow is pinned or has a nonzero relative lower bound
    pub fn has_lower_bound(&self) -> bool {
        self.fix.is_some() || self.min.as_ref().is_some_and(Sequence::any_nonzero)
    }

    /// Variable costs at step `t`, treating unset costs as zero
    pub fn variable_costs_at(&self, t: usize) -> f64 {
        self.variable_costs.as_ref().map_or(0.0, |c| c.get(t))
    }

    /// Fixed costs for period `p`, treating unset costs as zero
    pub fn fixed_costs_at(&self, p: usize) -> f64 {
        self.fixed_costs.as_ref().map_or(0.0, |c| c.get(p))
    }

    /// Check the parameters for mutual consistency.
    ///
    /// # Arguments
    ///
    /// * `key` - The node pair the flow connects, used in error messages
    pub fn validate(&self, key: &FlowKey) -> Result<()> {
        let entity = key.to_string();
        if self.fix.is_some() && (self.min.is_some() || self.max.is_some()) {
            config_bail!(entity, "fix cannot be combined with min or max");
        }

        match &self.nominal_capacity {
            Capacity::Unbounded => {
                let needs_capacity = [
                    ("min", self.min.is_some()),
                    ("max", self.max.is_some()),
                    ("fix", self.fix.is_some()),
                    ("full_load_time_min", self.full_load_time_min.is_some()),
                    ("full_load_time_max", self.full_load_time_max.is_some()),
                    (
                        "positive_gradient_limit",
                        self.positive_gradient_limit.is_some(),
                    ),
                    (
                        "negative_gradient_limit",
                        self.negative_gradient_limit.is_some(),
                    ),
                    ("nonconvex", self.nonconvex.is_some()),
                ];
                if let Some((name, _)) = needs_capacity.iter().find(|(_, set)| *set) {
                    config_bail!(entity, "{name} requires a nominal capacity");
                }
            }
            Capacity::Fixed(capacity) => {
                if !capacity.is_finite() {
                    config_bail!(entity, "nominal capacity must be finite");
                }
                if *capacity < 0.0 {
                    config_bail!(entity, "nominal capacity must not be negative");
                }
            }
            Capacity::Investment(investment) => {
                investment.validate(&entity)?;
                if self.nonconvex.is_some() && !investment.maximum.max().is_finite() {
                    config_bail!(
                        entity,
                        "a non-convex flow with an investment needs a finite investment maximum"
                    );
                }
            }
        }

        if let Some(nonconvex) = &self.nonconvex {
            nonconvex.validate(&entity)?;
        }

        if let (Some(lower), Some(upper)) = (self.full_load_time_min, self.full_load_time_max)
            && lower > upper
        {
            config_bail!(
                entity,
                "full_load_time_min ({lower}) exceeds full_load_time_max ({upper})"
            );
        }
        for (name, limit) in [
            ("positive_gradient_limit", &self.positive_gradient_limit),
            ("negative_gradient_limit", &self.negative_gradient_limit),
        ] {
            if let Some(limit) = limit
                && !limit.within(0.0, f64::INFINITY)
            {
                config_bail!(entity, "{name} must not be negative");
            }
        }

        Ok(())
    }

    /// All time-indexed sequences of the flow together with their names
    pub(crate) fn time_sequences(&self) -> impl Iterator<Item = (&'static str, &Sequence)> {
        let nonconvex = self.nonconvex.as_ref();
        [
            ("min", self.min.as_ref()),
            ("max", self.max.as_ref()),
            ("fix", self.fix.as_ref()),
            ("variable_costs", self.variable_costs.as_ref()),
            (
                "positive_gradient_limit",
                self.positive_gradient_limit.as_ref(),
            ),
            (
                "negative_gradient_limit",
                self.negative_gradient_limit.as_ref(),
            ),
            (
                "startup_costs",
                nonconvex.and_then(|nc| nc.startup_costs.as_ref()),
            ),
            (
                "shutdown_costs",
                nonconvex.and_then(|nc| nc.shutdown_costs.as_ref()),
            ),
            (
                "activity_costs",
                nonconvex.and_then(|nc| nc.activity_costs.as_ref()),
            ),
            (
                "inactivity_costs",
                nonconvex.and_then(|nc| nc.inactivity_costs.as_ref()),
            ),
            (
                "minimum_uptime",
                nonconvex.and_then(|nc| nc.minimum_uptime.as_ref()),
            ),
            (
                "minimum_downtime",
                nonconvex.and_then(|nc| nc.minimum_downtime.as_ref()),
            ),
        ]
        .into_iter()
        .filter_map(|(name, seq)| seq.map(|seq| (name, seq)))
    }
}
