//! Solver interface and the HiGHS backend.
use crate::program::{Program, VarKind};
use anyhow::Result;
use derive_more::Display;
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use indexmap::IndexMap;
use log::debug;

/// A decision variable in the HiGHS problem
type Variable = highs::Col;

/// How the solver finished
#[derive(Debug, Clone, PartialEq, Display)]
pub enum TerminationCondition {
    /// A proven optimal solution was found
    #[display("optimal")]
    Optimal,
    /// The program has no feasible solution
    #[display("infeasible")]
    Infeasible,
    /// The objective is unbounded
    #[display("unbounded")]
    Unbounded,
    /// The program is infeasible or unbounded
    #[display("infeasible or unbounded")]
    InfeasibleOrUnbounded,
    /// The time limit was reached
    #[display("time limit reached")]
    TimeLimit,
    /// The iteration limit was reached
    #[display("iteration limit reached")]
    IterationLimit,
    /// Any other status reported by the solver
    #[display("{_0}")]
    Other(String),
}

/// A value for a solver-specific option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// A boolean option
    Bool(bool),
    /// An integer option
    Int(i32),
    /// A floating point option
    Float(f64),
    /// A string option
    Text(String),
}

/// Options passed to the solver
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolveOptions {
    /// Return a solution even if the solver did not prove optimality (a warning is logged)
    pub allow_nonoptimal: bool,
    /// Time limit in seconds
    pub time_limit: Option<f64>,
    /// Relative MIP gap at which to stop
    pub mip_rel_gap: Option<f64>,
    /// Number of solver threads
    pub threads: Option<i32>,
    /// Whether the solver writes its own log to the console
    pub verbose: bool,
    /// Further solver-specific options, passed through unchanged
    pub cmdline_options: IndexMap<String, OptionValue>,
}

/// The raw outcome of a solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// How the solver finished
    pub termination: TerminationCondition,
    /// Value of every column, in program order
    pub columns: Vec<f64>,
    /// Dual value of every row, if available
    pub row_duals: Option<Vec<f64>>,
}

/// A MILP solver backend
pub trait Solver {
    /// Name of the backend
    fn name(&self) -> &str;

    /// Solve `program` (minimisation)
    fn solve(&self, program: &Program, options: &SolveOptions) -> Result<SolverOutcome>;
}

/// The HiGHS solver
#[derive(Debug, Clone, Copy, Default)]
pub struct Highs;

impl Solver for Highs {
    fn name(&self) -> &str {
        "highs"
    }

    fn solve(&self, program: &Program, options: &SolveOptions) -> Result<SolverOutcome> {
        let mut problem = Problem::default();
        let costs = program.objective_coefficients();

        // Add variables
        let variables: Vec<Variable> = program
            .variables()
            .iter()
            .zip(costs)
            .map(|(var, cost)| match var.kind {
                VarKind::Continuous => problem.add_column(cost, var.lower..=var.upper),
                VarKind::Integer | VarKind::Binary => {
                    problem.add_integer_column(cost, var.lower..=var.upper)
                }
            })
            .collect();

        // Add constraints
        for constraint in program.constraints() {
            problem.add_row(
                constraint.lower..=constraint.upper,
                constraint
                    .terms
                    .iter()
                    .map(|(var, coefficient)| (variables[var.index()], *coefficient)),
            );
        }
        debug!(
            "Passing {} columns and {} rows to HiGHS",
            program.num_variables(),
            program.num_constraints()
        );

        let mut model = problem.optimise(Sense::Minimise);
        model.set_option("output_flag", options.verbose);
        if let Some(time_limit) = options.time_limit {
            model.set_option("time_limit", time_limit);
        }
        if let Some(gap) = options.mip_rel_gap {
            model.set_option("mip_rel_gap", gap);
        }
        if let Some(threads) = options.threads {
            model.set_option("threads", threads);
        }
        for (name, value) in &options.cmdline_options {
            match value {
                OptionValue::Bool(value) => model.set_option(name.as_str(), *value),
                OptionValue::Int(value) => model.set_option(name.as_str(), *value),
                OptionValue::Float(value) => model.set_option(name.as_str(), *value),
                OptionValue::Text(value) => model.set_option(name.as_str(), value.as_str()),
            }
        }

        let solved = model.solve();
        let termination = match solved.status() {
            HighsModelStatus::Optimal | HighsModelStatus::ModelEmpty => {
                TerminationCondition::Optimal
            }
            HighsModelStatus::Infeasible => TerminationCondition::Infeasible,
            HighsModelStatus::Unbounded => TerminationCondition::Unbounded,
            HighsModelStatus::UnboundedOrInfeasible => TerminationCondition::InfeasibleOrUnbounded,
            HighsModelStatus::ReachedTimeLimit => TerminationCondition::TimeLimit,
            HighsModelStatus::ReachedIterationLimit => TerminationCondition::IterationLimit,
            status => TerminationCondition::Other(format!("{status:?}")),
        };

        let solution = solved.get_solution();
        let row_duals = (!program.is_mip()).then(|| solution.dual_rows().to_vec());
        Ok(SolverOutcome {
            termination,
            columns: solution.columns().to_vec(),
            row_duals,
        })
    }
}

/// Look up a solver backend by name
pub fn solver_by_name(name: &str) -> Result<Box<dyn Solver>> {
    match name.to_lowercase().as_str() {
        "highs" => Ok(Box::new(Highs)),
        _ => Err(crate::error::ModelError::SolverUnavailable(name.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::LinearExpr;
    use float_cmp::assert_approx_eq;

    #[test]
    fn solve_small_lp() {
        // min x + 2y s.t. x + y >= 4, x <= 3
        let mut program = Program::new();
        let x = program.add_variable(None, 0.0, 3.0, VarKind::Continuous);
        let y = program.add_variable(None, 0.0, f64::INFINITY, VarKind::Continuous);
        program
            .add_constraint(
                None,
                &(LinearExpr::from(x) + LinearExpr::from(y)),
                4.0,
                f64::INFINITY,
            )
            .unwrap();
        program.add_objective(LinearExpr::from(x) + LinearExpr::term(y, 2.0));

        let outcome = Highs.solve(&program, &SolveOptions::default()).unwrap();
        assert_eq!(outcome.termination, TerminationCondition::Optimal);
        assert_approx_eq!(f64, outcome.columns[0], 3.0, epsilon = 1e-7);
        assert_approx_eq!(f64, outcome.columns[1], 1.0, epsilon = 1e-7);
        assert!(outcome.row_duals.is_some());
    }

    #[test]
    fn solve_infeasible() {
        let mut program = Program::new();
        let x = program.add_variable(None, 0.0, 1.0, VarKind::Integer);
        program
            .add_constraint(None, &LinearExpr::from(x), 2.0, f64::INFINITY)
            .unwrap();
        let outcome = Highs.solve(&program, &SolveOptions::default()).unwrap();
        assert_ne!(outcome.termination, TerminationCondition::Optimal);
    }

    #[test]
    fn unknown_solver() {
        assert!(solver_by_name("cplex").is_err());
        assert_eq!(solver_by_name("HiGHS").unwrap().name(), "highs");
    }
}
