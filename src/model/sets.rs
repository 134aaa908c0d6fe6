//! Index sets and weights of the time grid, derived once when the model is built.
use crate::energy_system::EnergySystem;
use crate::finance::discount_factor;
use crate::flow::FlowKey;
use crate::id::NodeLabel;
use indexmap::IndexMap;
use itertools::Itertools;
use std::ops::{Range, RangeInclusive};

/// An investment period as seen by the model
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodInfo {
    /// Time steps of the period
    pub steps: Range<usize>,
    /// Start of the period in years after the start of the first period
    pub start_year: u32,
    /// Duration in years
    pub years: u32,
}

/// Typical clusters of one period
#[derive(Debug, Clone, PartialEq)]
pub struct TsaPeriod {
    /// First time step of the period
    pub offset: usize,
    /// Length of each cluster
    pub timesteps_per_period: usize,
    /// Number of clusters stored in the grid
    pub num_clusters: usize,
    /// Cluster id at each position of the restored timeline
    pub order: Vec<usize>,
    /// Occurrences of each cluster id
    pub occurrences: IndexMap<usize, usize>,
}

impl TsaPeriod {
    /// The time step of the grid holding step `g` of cluster `cluster`
    pub fn timestep(&self, cluster: usize, g: usize) -> usize {
        self.offset + cluster * self.timesteps_per_period + g
    }
}

/// The sets of the model
#[derive(Debug, Clone)]
pub struct ModelSets {
    /// Node labels in registry order
    pub nodes: Vec<NodeLabel>,
    /// All flows in canonical (sorted) order
    pub flows: Vec<FlowKey>,
    /// Flows which may be negative
    pub bidirectional_flows: Vec<FlowKey>,
    /// Flows which are nonnegative
    pub unidirectional_flows: Vec<FlowKey>,
    /// Length of each time step in hours
    pub timeincrement: Vec<f64>,
    /// Weight of each time step in energy-related cost terms
    pub objective_weighting: Vec<f64>,
    /// Investment periods (a single one covering all steps in single-period models)
    pub periods: Vec<PeriodInfo>,
    /// Period of every time step
    pub period_of: Vec<usize>,
    /// Whether the model has several investment periods
    pub multi_period: bool,
    /// Typical clusters per period, if the grid holds typical clusters
    pub tsa: Option<Vec<TsaPeriod>>,
    /// Occurrence weight of every time step (1 without typical clusters)
    pub tsa_weight: Vec<f64>,
    /// Discount rate for operational costs in multi-period models
    pub discount_rate: f64,
}

impl ModelSets {
    /// Derive the sets from a validated energy system.
    ///
    /// # Arguments
    ///
    /// * `es` - The energy system
    /// * `timeincrement` - Step lengths in hours
    /// * `objective_weighting` - Weight of each time step in the objective
    /// * `discount_rate` - Discount rate for multi-period models
    pub fn new(
        es: &EnergySystem,
        timeincrement: Vec<f64>,
        objective_weighting: Vec<f64>,
        discount_rate: f64,
    ) -> Self {
        let num_timesteps = es.num_timesteps();
        let (periods, multi_period) = match es.periods() {
            Some(periods) => {
                let mut start_year = 0;
                let infos = periods
                    .iter()
                    .map(|period| {
                        let info = PeriodInfo {
                            steps: period.steps.clone(),
                            start_year,
                            years: period.years,
                        };
                        start_year += period.years;
                        info
                    })
                    .collect();
                (infos, true)
            }
            None => (
                vec![PeriodInfo {
                    steps: 0..num_timesteps,
                    start_year: 0,
                    years: 1,
                }],
                false,
            ),
        };
        let mut period_of = vec![0; num_timesteps];
        for (p, period) in periods.iter().enumerate() {
            for t in period.steps.clone() {
                period_of[t] = p;
            }
        }

        let tsa = es.tsa_parameters().map(|params| {
            params
                .iter()
                .zip(&periods)
                .map(|(params, period)| TsaPeriod {
                    offset: period.steps.start,
                    timesteps_per_period: params.timesteps_per_period,
                    num_clusters: params.num_clusters(),
                    order: params.order.clone(),
                    occurrences: params.occurrences.clone(),
                })
                .collect_vec()
        });
        let mut tsa_weight = vec![1.0; num_timesteps];
        if let Some(tsa) = &tsa {
            for tsa_period in tsa {
                for cluster in 0..tsa_period.num_clusters {
                    let weight = tsa_period.occurrences.get(&cluster).copied().unwrap_or(0);
                    for g in 0..tsa_period.timesteps_per_period {
                        tsa_weight[tsa_period.timestep(cluster, g)] = weight as f64;
                    }
                }
            }
        }

        let flows = es.flows().map(|(key, _)| key.clone()).sorted().collect_vec();
        let (bidirectional_flows, unidirectional_flows) = flows
            .iter()
            .cloned()
            .partition(|key| es.flow(key).is_some_and(|flow| flow.bidirectional));

        Self {
            nodes: es.nodes().map(|node| node.label.clone()).collect(),
            flows,
            bidirectional_flows,
            unidirectional_flows,
            timeincrement,
            objective_weighting,
            periods,
            period_of,
            multi_period,
            tsa,
            tsa_weight,
            discount_rate,
        }
    }

    /// Number of time steps
    pub fn num_timesteps(&self) -> usize {
        self.timeincrement.len()
    }

    /// The time steps
    pub fn timesteps(&self) -> Range<usize> {
        0..self.num_timesteps()
    }

    /// The timepoints, i.e. boundaries of the time steps
    pub fn timepoints(&self) -> RangeInclusive<usize> {
        0..=self.num_timesteps()
    }

    /// Pairs of `(period, timestep)`
    pub fn timeindex(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.timesteps().map(|t| (self.period_of[t], t))
    }

    /// Number of investment periods
    pub fn num_periods(&self) -> usize {
        self.periods.len()
    }

    /// The period of time step `t`
    pub fn period(&self, t: usize) -> usize {
        self.period_of[t]
    }

    /// Start year of the last period plus its duration
    pub fn end_year(&self) -> u32 {
        self.periods
            .last()
            .map_or(0, |period| period.start_year + period.years)
    }

    /// The time step preceding `t`, if there is one.
    ///
    /// With typical clusters, the first step of each cluster has no predecessor.
    pub fn previous(&self, t: usize) -> Option<usize> {
        if t == 0 {
            return None;
        }
        if let Some(tsa) = &self.tsa {
            let tsa_period = &tsa[self.period_of[t]];
            if (t - tsa_period.offset) % tsa_period.timesteps_per_period == 0 {
                return None;
            }
        }
        Some(t - 1)
    }

    /// Discount factor `(1 + rate)^-start_year` of a period, or 1 in single-period models
    pub fn discount_factor(&self, p: usize, rate: f64) -> f64 {
        if self.multi_period {
            discount_factor(rate, self.periods[p].start_year)
        } else {
            1.0
        }
    }

    /// Weight of time step `t` for costs per occurrence (status, startups, ...)
    pub fn occurrence_weight(&self, t: usize) -> f64 {
        self.tsa_weight[t] * self.discount_factor(self.period_of[t], self.discount_rate)
    }

    /// Weight of time step `t` for costs per unit of energy
    pub fn objective_weight(&self, t: usize) -> f64 {
        self.objective_weighting[t] * self.occurrence_weight(t)
    }

    /// Weight of time step `t` when summing energy over the restored horizon
    pub fn energy_weight(&self, t: usize) -> f64 {
        self.timeincrement[t] * self.tsa_weight[t]
    }
}
