//! Parameter records enabling investment and unit commitment on flows and storages.
use crate::error::config_bail;
use crate::sequence::Sequence;
use anyhow::Result;
use serde::Deserialize;

/// Parameters for endogenous sizing of a flow or storage capacity.
///
/// All cost and bound parameters are indexed by period. In a single-period model only the first
/// value is used.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Investment {
    /// Equivalent periodical costs (annuity) per unit of installed capacity
    pub ep_costs: Sequence,
    /// Fixed cost incurred whenever anything is built (requires `nonconvex`)
    pub offset: Sequence,
    /// Lower bound of the investment in each period
    pub minimum: Sequence,
    /// Upper bound of the investment in each period
    pub maximum: Sequence,
    /// Capacity already installed before the first period
    pub existing: f64,
    /// Whether the investment is all-or-nothing above `minimum`
    pub nonconvex: bool,
    /// Technical lifetime of newly built capacity, in years
    pub lifetime: Option<u32>,
    /// Age of the existing capacity at the start of the first period, in years
    pub age: u32,
    /// Interest rate used to discount investment expenditure (multi-period models)
    pub interest_rate: Option<f64>,
    /// Fixed operation and maintenance costs per unit of total capacity and year
    pub fixed_costs: Option<Sequence>,
    /// Upper bound on the total capacity in every period
    pub overall_maximum: Option<f64>,
    /// Lower bound on the total capacity in the last period
    pub overall_minimum: Option<f64>,
}

impl Default for Investment {
    fn default() -> Self {
        Self {
            ep_costs: Sequence::scalar(0.0),
            offset: Sequence::scalar(0.0),
            minimum: Sequence::scalar(0.0),
            maximum: Sequence::scalar(f64::INFINITY),
            existing: 0.0,
            nonconvex: false,
            lifetime: None,
            age: 0,
            interest_rate: None,
            fixed_costs: None,
            overall_maximum: None,
            overall_minimum: None,
        }
    }
}

impl Investment {
    /// Create an investment with default parameters (free, unbounded, convex)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the equivalent periodical costs
    pub fn ep_costs(mut self, ep_costs: impl Into<Sequence>) -> Self {
        self.ep_costs = ep_costs.into();
        self
    }

    /// Set the lump cost incurred if anything is built
    pub fn offset(mut self, offset: impl Into<Sequence>) -> Self {
        self.offset = offset.into();
        self
    }

    /// Set the lower investment bound
    pub fn minimum(mut self, minimum: impl Into<Sequence>) -> Self {
        self.minimum = minimum.into();
        self
    }

    /// Set the upper investment bound
    pub fn maximum(mut self, maximum: impl Into<Sequence>) -> Self {
        self.maximum = maximum.into();
        self
    }

    /// Set the existing capacity
    pub fn existing(mut self, existing: f64) -> Self {
        self.existing = existing;
        self
    }

    /// Make the investment non-convex
    pub fn nonconvex(mut self, nonconvex: bool) -> Self {
        self.nonconvex = nonconvex;
        self
    }

    /// Set the lifetime of new capacity in years
    pub fn lifetime(mut self, lifetime: u32) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Set the age of the existing capacity in years
    pub fn age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    /// Set the interest rate
    pub fn interest_rate(mut self, interest_rate: f64) -> Self {
        self.interest_rate = Some(interest_rate);
        self
    }

    /// Set the fixed operation and maintenance costs
    pub fn fixed_costs(mut self, fixed_costs: impl Into<Sequence>) -> Self {
        self.fixed_costs = Some(fixed_costs.into());
        self
    }

    /// Set the overall maximum of the total capacity
    pub fn overall_maximum(mut self, overall_maximum: f64) -> Self {
        self.overall_maximum = Some(overall_maximum);
        self
    }

    /// Set the overall minimum of the total capacity
    pub fn overall_minimum(mut self, overall_minimum: f64) -> Self {
        self.overall_minimum = Some(overall_minimum);
        self
    }

    /// Check the parameters for consistency.
    ///
    /// # Arguments
    ///
    /// * `entity` - Label of the flow or storage owning the investment, used in error messages
    pub fn validate(&self, entity: &str) -> Result<()> {
        if self.existing < 0.0 {
            config_bail!(entity, "existing capacity must not be negative");
        }
        if self.nonconvex {
            if self.existing != 0.0 {
                config_bail!(
                    entity,
                    "existing capacity is not supported for non-convex investments"
                );
            }
            if !self.maximum.max().is_finite() {
                config_bail!(entity, "a non-convex investment needs a finite maximum");
            }
        } else if self.offset.any_nonzero() {
            config_bail!(entity, "an investment offset requires nonconvex = true");
        }

        let periods = self.minimum.len().max(self.maximum.len()).max(1);
        for p in 0..periods {
            let (Ok(minimum), Ok(maximum)) = (self.minimum.try_get(p), self.maximum.try_get(p))
            else {
                continue;
            };
            if minimum < 0.0 || minimum > maximum {
                config_bail!(
                    entity,
                    "investment bounds [{minimum}, {maximum}] are invalid in period {p}"
                );
            }
        }

        if let (Some(lower), Some(upper)) = (self.overall_minimum, self.overall_maximum)
            && lower > upper
        {
            config_bail!(
                entity,
                "overall_minimum ({lower}) exceeds overall_maximum ({upper})"
            );
        }
        if self.lifetime == Some(0) {
            config_bail!(entity, "lifetime must be positive");
        }

        Ok(())
    }

    /// Upper bound of the installed capacity in period `p`, used as big-M in non-convex
    /// formulations.
    ///
    /// Capacity built in every period up to `p` may still be in operation.
    pub fn total_upper_bound(&self, p: usize) -> f64 {
        let built: f64 = (0..=p).map(|p| self.maximum.get(p)).sum();
        let bound = self.existing + built;
        self.overall_maximum
            .map_or(bound, |overall_maximum| bound.min(overall_maximum))
    }

    /// Fixed costs for the given period, treating an unset parameter as zero
    pub fn fixed_costs_at(&self, p: usize) -> f64 {
        self.fixed_costs.as_ref().map_or(0.0, |c| c.get(p))
    }
}

/// Parameters enabling on/off (unit commitment) semantics for a flow.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NonConvex {
    /// Costs for every start of the unit
    pub startup_costs: Option<Sequence>,
    /// Costs for every shutdown of the unit
    pub shutdown_costs: Option<Sequence>,
    /// Costs for every time step the unit is active
    pub activity_costs: Option<Sequence>,
    /// Costs for every time step the unit is inactive
    pub inactivity_costs: Option<Sequence>,
    /// Minimum number of steps the unit stays on after a startup
    pub minimum_uptime: Option<Sequence>,
    /// Minimum number of steps the unit stays off after a shutdown
    pub minimum_downtime: Option<Sequence>,
    /// Maximum number of startups over the horizon
    pub maximum_startups: Option<f64>,
    /// Maximum number of shutdowns over the horizon
    pub maximum_shutdowns: Option<f64>,
    /// Status of the unit before the first time step
    pub initial_status: bool,
    /// Status is pinned to `initial_status` before this time step
    pub first_flexible_timestep: usize,
}

impl NonConvex {
    /// Create a non-convex record without costs or time restrictions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the startup costs
    pub fn startup_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.startup_costs = Some(costs.into());
        self
    }

    /// Set the shutdown costs
    pub fn shutdown_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.shutdown_costs = Some(costs.into());
        self
    }

    /// Set the activity costs
    pub fn activity_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.activity_costs = Some(costs.into());
        self
    }

    /// Set the inactivity costs
    pub fn inactivity_costs(mut self, costs: impl Into<Sequence>) -> Self {
        self.inactivity_costs = Some(costs.into());
        self
    }

    /// Set the minimum uptime in time steps
    pub fn minimum_uptime(mut self, steps: impl Into<Sequence>) -> Self {
        self.minimum_uptime = Some(steps.into());
        self
    }

    /// Set the minimum downtime in time steps
    pub fn minimum_downtime(mut self, steps: impl Into<Sequence>) -> Self {
        self.minimum_downtime = Some(steps.into());
        self
    }

    /// Set the maximum number of startups
    pub fn maximum_startups(mut self, startups: f64) -> Self {
        self.maximum_startups = Some(startups);
        self
    }

    /// Set the maximum number of shutdowns
    pub fn maximum_shutdowns(mut self, shutdowns: f64) -> Self {
        self.maximum_shutdowns = Some(shutdowns);
        self
    }

    /// Set the status before the first time step
    pub fn initial_status(mut self, status: bool) -> Self {
        self.initial_status = status;
        self
    }

    /// Set the first time step at which the status may deviate from the initial status
    pub fn first_flexible_timestep(mut self, t: usize) -> Self {
        self.first_flexible_timestep = t;
        self
    }

    /// Whether startup variables are needed
    pub fn needs_startups(&self) -> bool {
        self.startup_costs.is_some() || self.maximum_startups.is_some()
    }

    /// Whether shutdown variables are needed
    pub fn needs_shutdowns(&self) -> bool {
        self.shutdown_costs.is_some() || self.maximum_shutdowns.is_some()
    }

    /// Check the parameters for consistency
    pub fn validate(&self, entity: &str) -> Result<()> {
        for (name, times) in [
            ("minimum_uptime", &self.minimum_uptime),
            ("minimum_downtime", &self.minimum_downtime),
        ] {
            if let Some(times) = times
                && !times.within(0.0, f64::INFINITY)
            {
                config_bail!(entity, "{name} must not be negative");
            }
        }
        for (name, limit) in [
            ("maximum_startups", self.maximum_startups),
            ("maximum_shutdowns", self.maximum_shutdowns),
        ] {
            if limit.is_some_and(|limit| limit < 0.0) {
                config_bail!(entity, "{name} must not be negative");
            }
        }

        Ok(())
    }
}
