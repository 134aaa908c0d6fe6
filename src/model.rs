//! The model assembler: turns a validated [`EnergySystem`] into a [`Program`], solves it and keeps
//! the solution for result processing.
//!
//! Assembly happens in three explicit steps ([`Model::build_sets`], [`Model::build_blocks`] and
//! [`Model::build_objective`]). With `auto_construct` (the default) all three run when the model is
//! created; otherwise the caller runs them, e.g. to add constraint groups in between.
use crate::blocks::{ConstraintBlock, default_blocks};
use crate::energy_system::EnergySystem;
use crate::error::{ModelError, construction_bail};
use crate::flow::FlowKey;
use crate::groupings::FlowBlockKind;
use crate::id::NodeLabel;
use crate::program::{LinearExpr, Program, RowId, VarId, VarKind};
use crate::results::Results;
use crate::solver::{SolveOptions, Solver, TerminationCondition};
use crate::variables::{ResultKey, VarIndex, VariableKey, VariableMap};
use anyhow::{Context, Result, ensure};
use float_cmp::approx_eq;
use indexmap::IndexMap;
use log::{debug, info, trace, warn};

pub mod sets;
pub use sets::{ModelSets, PeriodInfo, TsaPeriod};

/// Default discount rate for operational costs in multi-period models
pub const DEFAULT_DISCOUNT_RATE: f64 = 0.02;

/// Options controlling how a model is built
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    /// Name every row and column and trace each generated row
    pub debug: bool,
    /// Weight of each time step in the objective (defaults to the time increment)
    pub objective_weighting: Option<Vec<f64>>,
    /// Step lengths overriding those of the energy system
    pub timeincrement: Option<Vec<f64>>,
    /// Discount rate for operational costs in multi-period models
    pub discount_rate: f64,
    /// Run all build steps when the model is created
    pub auto_construct: bool,
    /// Report the duals of bus balances (LP models only)
    pub receive_duals: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            debug: false,
            objective_weighting: None,
            timeincrement: None,
            discount_rate: DEFAULT_DISCOUNT_RATE,
            auto_construct: true,
            receive_duals: false,
        }
    }
}

/// How far the model has been built
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Empty,
    SetsBuilt,
    BlocksBuilt,
    Constructed,
}

/// The row of a bus balance whose dual is reported
#[derive(Debug, Clone, PartialEq)]
pub struct DualKey {
    /// The bus
    pub bus: NodeLabel,
    /// The time step
    pub timestep: usize,
    /// The balance row
    pub row: RowId,
}

/// Variables, rows and objective terms collected while building a model
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    variables: VariableMap,
    objective_terms: IndexMap<String, LinearExpr>,
    objective_committed: bool,
    investment_costs: LinearExpr,
    duals: Vec<DualKey>,
    naming: bool,
}

impl ProgramBuilder {
    fn new(naming: bool) -> Self {
        Self {
            naming,
            ..Self::default()
        }
    }

    fn add_variable(
        &mut self,
        key: VariableKey,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> Result<VarId> {
        let name = self.naming.then(|| key.to_string());
        if self.variables.get(&key).is_some() {
            construction_bail!("variable {key} was created twice");
        }
        let var = self.program.add_variable(name, lower, upper, kind);
        self.variables.insert(key, var);
        Ok(var)
    }

    fn var(&self, key: &VariableKey) -> Result<VarId> {
        self.variables
            .get(key)
            .ok_or_else(|| ModelError::construction(format!("unknown variable {key}")).into())
    }

    fn add_constraint<F>(
        &mut self,
        name: F,
        expr: &LinearExpr,
        lower: f64,
        upper: f64,
    ) -> Result<Option<RowId>>
    where
        F: FnOnce() -> String,
    {
        let name = self.naming.then(name);
        if let Some(name) = &name {
            trace!("Adding row {name}: {lower} <= {expr:?} <= {upper}");
        }
        self.program.add_constraint(name, expr, lower, upper)
    }

    fn add_objective(&mut self, block: &str, expr: LinearExpr) {
        if self.objective_committed {
            self.program.add_objective(expr.clone());
        }
        *self.objective_terms.entry(block.to_string()).or_default() += expr;
    }

    fn commit_objective(&mut self) {
        for expr in self.objective_terms.values() {
            self.program.add_objective(expr.clone());
        }
        self.objective_committed = true;
    }
}

/// What a constraint block sees while it adds its variables, rows and costs.
///
/// The energy system, the sets and the options are shared references which may be copied out of
/// the context while rows are added through it.
pub struct BlockContext<'m> {
    /// The energy system being modelled
    pub es: &'m EnergySystem,
    /// Sets of the model
    pub sets: &'m ModelSets,
    /// Build options
    pub options: &'m ModelOptions,
    builder: &'m mut ProgramBuilder,
}

impl BlockContext<'_> {
    /// Add a variable, registered under `key`
    pub fn add_variable(
        &mut self,
        key: VariableKey,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> Result<VarId> {
        self.builder.add_variable(key, lower, upper, kind)
    }

    /// Add a continuous variable for every time step of the grid
    pub fn add_step_variables(
        &mut self,
        owner: &ResultKey,
        name: &'static str,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> Result<Vec<VarId>> {
        self.sets
            .timesteps()
            .map(|t| {
                let key = VariableKey::new(owner.clone(), name, VarIndex::Step(t));
                self.add_variable(key, lower, upper, kind)
            })
            .collect()
    }

    /// Look up a variable
    pub fn var(&self, key: &VariableKey) -> Result<VarId> {
        self.builder.var(key)
    }

    /// Look up a variable, if it exists
    pub fn try_var(&self, key: &VariableKey) -> Option<VarId> {
        self.builder.variables.get(key)
    }

    /// The flow variable of `key` at time step `t`
    pub fn flow(&self, key: &FlowKey, t: usize) -> Result<VarId> {
        self.var(&VariableKey::new(key.clone(), "flow", VarIndex::Step(t)))
    }

    /// All flow variables of `key`, in time step order
    pub fn flows(&self, key: &FlowKey) -> Result<Vec<VarId>> {
        self.sets.timesteps().map(|t| self.flow(key, t)).collect()
    }

    /// Replace the bounds of a variable
    pub fn set_bounds(&mut self, var: VarId, lower: f64, upper: f64) {
        self.builder.program.set_bounds(var, lower, upper);
    }

    /// Pin a variable to a value
    pub fn fix(&mut self, var: VarId, value: f64) {
        self.builder.program.fix(var, value);
    }

    /// Add a row `lower ≤ expr ≤ upper`. `name` is only evaluated in debug mode.
    pub fn add_constraint<F>(
        &mut self,
        name: F,
        expr: &LinearExpr,
        lower: f64,
        upper: f64,
    ) -> Result<Option<RowId>>
    where
        F: FnOnce() -> String,
    {
        self.builder.add_constraint(name, expr, lower, upper)
    }

    /// Add `expr` to the costs attributed to `block`
    pub fn add_objective(&mut self, block: &str, expr: LinearExpr) {
        self.builder.add_objective(block, expr);
    }

    /// Add investment expenditure to the costs attributed to `block`.
    ///
    /// The expenditure of all blocks is also collected, so later blocks can limit it.
    pub fn add_investment_costs(&mut self, block: &str, expr: LinearExpr) {
        self.builder.investment_costs += expr.clone();
        self.builder.add_objective(block, expr);
    }

    /// The investment expenditure added so far
    pub fn investment_costs(&self) -> &LinearExpr {
        &self.builder.investment_costs
    }

    /// Remember a bus balance row so its dual can be reported
    pub fn record_dual(&mut self, bus: &NodeLabel, timestep: usize, row: Option<RowId>) {
        if let Some(row) = row {
            self.builder.duals.push(DualKey {
                bus: bus.clone(),
                timestep,
                row,
            });
        }
    }
}

/// The solution of a solved model
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// How the solver finished
    pub termination: TerminationCondition,
    /// Objective value
    pub objective: f64,
    /// Value of every column
    pub columns: Vec<f64>,
    /// Dual of every row, if the solver reported them
    pub row_duals: Option<Vec<f64>>,
}

/// Summary returned by [`Model::solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct SolveSummary {
    /// How the solver finished
    pub termination: TerminationCondition,
    /// Objective value
    pub objective: f64,
}

/// An optimisation model of an energy system
pub struct Model<'a> {
    es: &'a EnergySystem,
    options: ModelOptions,
    sets: ModelSets,
    blocks: Vec<Box<dyn ConstraintBlock>>,
    builder: ProgramBuilder,
    stage: Stage,
    solution: Option<Solution>,
}

impl<'a> Model<'a> {
    /// Create a model with the default constraint blocks.
    ///
    /// The energy system is validated first. With `auto_construct`, the model is built straight
    /// away.
    pub fn new(es: &'a EnergySystem, options: ModelOptions) -> Result<Self> {
        Self::with_constraint_groups(es, options, Vec::new())
    }

    /// Create a model with additional constraint blocks, built after the default ones
    pub fn with_constraint_groups(
        es: &'a EnergySystem,
        options: ModelOptions,
        extra_blocks: Vec<Box<dyn ConstraintBlock>>,
    ) -> Result<Self> {
        es.validate()?;
        let sets = make_sets(es, &options)?;
        let mut blocks = default_blocks();
        blocks.extend(extra_blocks);

        let mut model = Self {
            es,
            builder: ProgramBuilder::new(options.debug),
            options,
            sets,
            blocks,
            stage: Stage::Empty,
            solution: None,
        };
        if model.options.auto_construct {
            model.construct()?;
        }

        Ok(model)
    }

    /// Add a constraint block.
    ///
    /// If the blocks have already been built, the new block is built immediately.
    pub fn with_constraint_group(mut self, block: Box<dyn ConstraintBlock>) -> Result<Self> {
        self.add_constraint_group(block)?;
        Ok(self)
    }

    /// Add a constraint block (see [`Model::with_constraint_group`])
    pub fn add_constraint_group(&mut self, block: Box<dyn ConstraintBlock>) -> Result<()> {
        if self.stage >= Stage::BlocksBuilt {
            self.create_block(block.as_ref())?;
            self.solution = None;
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Run all build steps which have not been run yet
    pub fn construct(&mut self) -> Result<()> {
        if self.stage < Stage::SetsBuilt {
            self.build_sets()?;
        }
        if self.stage < Stage::BlocksBuilt {
            self.build_blocks()?;
        }
        if self.stage < Stage::Constructed {
            self.build_objective()?;
        }
        Ok(())
    }

    /// Create the flow variables and apply their bounds
    pub fn build_sets(&mut self) -> Result<()> {
        ensure!(self.stage == Stage::Empty, "the sets have already been built");
        info!(
            "Building model sets: {} nodes, {} flows, {} time steps, {} period(s)",
            self.sets.nodes.len(),
            self.sets.flows.len(),
            self.sets.num_timesteps(),
            self.sets.num_periods()
        );

        for key in &self.sets.flows {
            let flow = self
                .es
                .flow(key)
                .with_context(|| format!("flow {key} is not part of the energy system"))?;
            let kind = if flow.integer {
                VarKind::Integer
            } else {
                VarKind::Continuous
            };
            for t in self.sets.timesteps() {
                let (lower, upper) = match (FlowBlockKind::of(flow), flow.fixed_capacity()) {
                    (FlowBlockKind::Simple, Some(capacity)) => {
                        (flow.min_at(t) * capacity, flow.max_at(t) * capacity)
                    }
                    (FlowBlockKind::NonConvex, Some(capacity)) => {
                        (0.0, flow.max_at(t) * capacity)
                    }
                    _ if flow.bidirectional => (f64::NEG_INFINITY, f64::INFINITY),
                    _ => (0.0, f64::INFINITY),
                };
                let key = VariableKey::new(key.clone(), "flow", VarIndex::Step(t));
                self.builder.add_variable(key, lower, upper, kind)?;
            }
        }

        self.stage = Stage::SetsBuilt;
        Ok(())
    }

    /// Let every constraint block add its variables, rows and costs
    pub fn build_blocks(&mut self) -> Result<()> {
        ensure!(
            self.stage == Stage::SetsBuilt,
            "build_sets must run before build_blocks"
        );
        let blocks = std::mem::take(&mut self.blocks);
        let result = blocks
            .iter()
            .try_for_each(|block| self.create_block(block.as_ref()));
        self.blocks = blocks;
        result?;

        self.stage = Stage::BlocksBuilt;
        Ok(())
    }

    /// Sum the cost contributions of all blocks into the objective
    pub fn build_objective(&mut self) -> Result<()> {
        ensure!(
            self.stage == Stage::BlocksBuilt,
            "build_blocks must run before build_objective"
        );
        self.builder.commit_objective();
        self.stage = Stage::Constructed;
        info!(
            "Model built with {} variables ({} integer) and {} constraints",
            self.builder.program.num_variables(),
            self.builder.program.num_integer_variables(),
            self.builder.program.num_constraints()
        );
        Ok(())
    }

    fn create_block(&mut self, block: &dyn ConstraintBlock) -> Result<()> {
        let group = block.group(self.es);
        if group.is_empty() {
            return Ok(());
        }

        let rows_before = self.builder.program.num_constraints();
        let vars_before = self.builder.program.num_variables();
        let mut ctx = BlockContext {
            es: self.es,
            sets: &self.sets,
            options: &self.options,
            builder: &mut self.builder,
        };
        block
            .create(&mut ctx, &group)
            .with_context(|| format!("Failed to build the {} block", block.name()))?;
        debug!(
            "{}: {} members, {} variables, {} constraints",
            block.name(),
            group.len(),
            self.builder.program.num_variables() - vars_before,
            self.builder.program.num_constraints() - rows_before
        );
        Ok(())
    }

    /// Solve the model.
    ///
    /// Remaining build steps are run first. A non-optimal termination is an error unless
    /// `options.allow_nonoptimal` is set, in which case a warning is logged.
    pub fn solve(&mut self, solver: &dyn Solver, options: &SolveOptions) -> Result<SolveSummary> {
        self.construct()?;
        info!("Solving model with {}", solver.name());
        let outcome = solver.solve(&self.builder.program, options)?;

        if outcome.termination != TerminationCondition::Optimal {
            if !options.allow_nonoptimal {
                return Err(ModelError::NonOptimal {
                    status: outcome.termination,
                }
                .into());
            }
            warn!(
                "Solver terminated with status {}; results may be meaningless",
                outcome.termination
            );
        }
        ensure!(
            outcome.columns.len() == self.builder.program.num_variables(),
            "Solver returned {} values for {} variables",
            outcome.columns.len(),
            self.builder.program.num_variables()
        );

        let objective = self.builder.program.objective().evaluate(&outcome.columns);
        info!("Objective value: {objective}");
        let summary = SolveSummary {
            termination: outcome.termination.clone(),
            objective,
        };
        self.solution = Some(Solution {
            termination: outcome.termination,
            objective,
            columns: outcome.columns,
            row_duals: outcome.row_duals,
        });

        Ok(summary)
    }

    /// Lift the solution onto the energy system
    pub fn results(&self) -> Result<Results> {
        Results::from_model(self)
    }

    /// The energy system being modelled
    pub fn energy_system(&self) -> &EnergySystem {
        self.es
    }

    /// Build options
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Sets of the model
    pub fn sets(&self) -> &ModelSets {
        &self.sets
    }

    /// The assembled program
    pub fn program(&self) -> &Program {
        &self.builder.program
    }

    /// All variables, keyed by owner, name and index
    pub fn variables(&self) -> &VariableMap {
        &self.builder.variables
    }

    /// Cost contributions by block
    pub fn objective_terms(&self) -> &IndexMap<String, LinearExpr> {
        &self.builder.objective_terms
    }

    /// Bus balance rows with reported duals
    pub fn dual_keys(&self) -> &[DualKey] {
        &self.builder.duals
    }

    /// Names of the constraint blocks, in build order
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|block| block.name())
    }

    /// The solution, if the model has been solved
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Whether all build steps have run
    pub fn is_constructed(&self) -> bool {
        self.stage == Stage::Constructed
    }
}

/// Derive the sets, applying the time increment and objective weighting overrides
fn make_sets(es: &EnergySystem, options: &ModelOptions) -> Result<ModelSets> {
    let steps = es.num_timesteps();
    let timeincrement = match &options.timeincrement {
        Some(timeincrement) => {
            check_override("timeincrement", timeincrement, steps)?;
            if !same_values(timeincrement, es.timeincrement()) {
                warn!(
                    "The model overrides the timeincrement of the energy system; the override is \
                     used for the model"
                );
            }
            timeincrement.clone()
        }
        None => es.timeincrement().to_vec(),
    };
    let objective_weighting = match &options.objective_weighting {
        Some(weighting) => {
            check_override("objective_weighting", weighting, steps)?;
            if !same_values(weighting, &timeincrement) {
                warn!("objective_weighting differs from the timeincrement; it is used for costs");
            }
            weighting.clone()
        }
        None => timeincrement.clone(),
    };
    if !(0.0..1.0).contains(&options.discount_rate) {
        construction_bail!(
            "discount_rate must lie in [0, 1), but is {}",
            options.discount_rate
        );
    }

    Ok(ModelSets::new(
        es,
        timeincrement,
        objective_weighting,
        options.discount_rate,
    ))
}

fn check_override(name: &str, values: &[f64], steps: usize) -> Result<()> {
    if values.len() != steps {
        construction_bail!(
            "{name} has {} values, but the time grid has {steps} time steps",
            values.len()
        );
    }
    if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
        construction_bail!("{name} must contain nonnegative values");
    }
    Ok(())
}

fn same_values(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| approx_eq!(f64, *x, *y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, simple_system, simple_system_with_capacity};
    use crate::solver::Highs;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn builds_flow_variables(simple_system: EnergySystem) {
        let model = Model::new(&simple_system, ModelOptions::default()).unwrap();
        assert!(model.is_constructed());
        let key = VariableKey::new(ResultKey::edge("el", "demand"), "flow", VarIndex::Step(1));
        let var = model.variables().get(&key).unwrap();
        let column = &model.program().variables()[var.index()];
        assert_eq!(column.lower, 20.0);
        assert_eq!(column.upper, 20.0);
    }

    #[rstest]
    fn deferred_construction(simple_system: EnergySystem) {
        let options = ModelOptions {
            auto_construct: false,
            ..ModelOptions::default()
        };
        let mut model = Model::new(&simple_system, options).unwrap();
        assert_eq!(model.program().num_variables(), 0);
        assert!(model.build_blocks().is_err());
        model.build_sets().unwrap();
        model.build_blocks().unwrap();
        model.build_objective().unwrap();
        assert!(model.is_constructed());
    }

    #[rstest]
    fn rebuild_is_identical(simple_system: EnergySystem) {
        let first = Model::new(&simple_system, ModelOptions::default()).unwrap();
        let second = Model::new(&simple_system, ModelOptions::default()).unwrap();
        assert_eq!(first.program(), second.program());
    }

    #[rstest]
    fn debug_names_rows(simple_system: EnergySystem) {
        let options = ModelOptions {
            debug: true,
            ..ModelOptions::default()
        };
        let model = Model::new(&simple_system, options).unwrap();
        assert!(
            model
                .program()
                .variables()
                .iter()
                .all(|var| var.name.is_some())
        );
        assert!(
            model
                .program()
                .constraints()
                .iter()
                .all(|row| row.name.is_some())
        );
    }

    #[rstest]
    fn timeincrement_override_length(simple_system: EnergySystem) {
        let options = ModelOptions {
            timeincrement: Some(vec![1.0]),
            ..ModelOptions::default()
        };
        assert_error!(
            Model::new(&simple_system, options),
            "Cannot construct model: timeincrement has 1 values, but the time grid has 3 time steps"
        );
    }

    #[rstest]
    fn solve_simple_system(simple_system: EnergySystem) {
        let mut model = Model::new(&simple_system, ModelOptions::default()).unwrap();
        let summary = model.solve(&Highs, &SolveOptions::default()).unwrap();
        assert_eq!(summary.termination, TerminationCondition::Optimal);
        // Demand of 10, 20 and 30 at a price of 2
        assert_approx_eq!(f64, summary.objective, 120.0, epsilon = 1e-6);
    }

    #[test]
    fn infeasible_is_an_error() {
        // The source cannot cover the peak demand of 30
        let es = simple_system_with_capacity(15.0);
        let mut model = Model::new(&es, ModelOptions::default()).unwrap();
        let err = model.solve(&Highs, &SolveOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::NonOptimal { .. })
        ));
    }
}
