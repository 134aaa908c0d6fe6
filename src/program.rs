//! A solver-independent mixed-integer linear program.
//!
//! The model assembler writes variables, constraints and the objective into a [`Program`], which
//! a [`Solver`](crate::solver::Solver) then translates into its own representation.
use crate::error::construction_bail;
use anyhow::Result;
use indexmap::IndexMap;
use std::io::{self, Write};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Feasibility tolerance used when checking constraints without variables
const CONSTANT_TOLERANCE: f64 = 1e-9;

/// Refers to a column of the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    /// Index of the column
    pub fn index(self) -> usize {
        self.0
    }
}

/// Refers to a row of the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(usize);

impl RowId {
    /// Index of the row
    pub fn index(self) -> usize {
        self.0
    }
}

/// The domain of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Any real value within the bounds
    Continuous,
    /// Integer values within the bounds
    Integer,
    /// Zero or one
    Binary,
}

/// A column of the program
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Name used when writing the program, if naming is enabled
    pub name: Option<String>,
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Domain
    pub kind: VarKind,
}

/// An affine expression `Σ coefficient·variable + constant`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
    constant: f64,
}

impl LinearExpr {
    /// An empty expression
    pub fn new() -> Self {
        Self::default()
    }

    /// A single term `coefficient·var`
    pub fn term(var: VarId, coefficient: f64) -> Self {
        Self {
            terms: vec![(var, coefficient)],
            constant: 0.0,
        }
    }

    /// A constant expression
    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    /// Add `coefficient·var` in place
    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    /// Add a constant in place
    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// The terms (possibly with repeated variables)
    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    /// The constant part
    pub fn constant_value(&self) -> f64 {
        self.constant
    }

    /// Whether the expression contains no variables
    pub fn is_constant(&self) -> bool {
        self.terms.iter().all(|(_, c)| *c == 0.0)
    }

    /// Merge repeated variables and drop zero coefficients, keeping first-occurrence order
    pub fn normalised(&self) -> Self {
        let mut merged: IndexMap<VarId, f64> = IndexMap::with_capacity(self.terms.len());
        for (var, coefficient) in &self.terms {
            *merged.entry(*var).or_insert(0.0) += coefficient;
        }
        Self {
            terms: merged.into_iter().filter(|(_, c)| *c != 0.0).collect(),
            constant: self.constant,
        }
    }

    /// Evaluate the expression for the given column values
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coefficient)| coefficient * values[var.0])
            .sum::<f64>()
            + self.constant
    }
}

impl From<VarId> for LinearExpr {
    fn from(var: VarId) -> Self {
        Self::term(var, 1.0)
    }
}

impl AddAssign for LinearExpr {
    fn add_assign(&mut self, rhs: Self) {
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
    }
}

impl SubAssign for LinearExpr {
    fn sub_assign(&mut self, rhs: Self) {
        self.terms
            .extend(rhs.terms.into_iter().map(|(var, c)| (var, -c)));
        self.constant -= rhs.constant;
    }
}

impl Add for LinearExpr {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sub for LinearExpr {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl Mul<f64> for LinearExpr {
    type Output = Self;

    fn mul(mut self, rhs: f64) -> Self {
        for (_, coefficient) in &mut self.terms {
            *coefficient *= rhs;
        }
        self.constant *= rhs;
        self
    }
}

impl Neg for LinearExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self * -1.0
    }
}

impl FromIterator<(VarId, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        let mut expr = Self::new();
        for (var, coefficient) in iter {
            expr.add_term(var, coefficient);
        }
        expr
    }
}

/// A row `lower ≤ Σ coefficient·variable ≤ upper`
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Name used when writing the program, if naming is enabled
    pub name: Option<String>,
    /// Merged terms of the row
    pub terms: Vec<(VarId, f64)>,
    /// Lower bound (may be `-inf`)
    pub lower: f64,
    /// Upper bound (may be `inf`)
    pub upper: f64,
}

/// A mixed-integer linear program to be minimised
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: LinearExpr,
}

impl Program {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column and return its id
    pub fn add_variable(
        &mut self,
        name: Option<String>,
        lower: f64,
        upper: f64,
        kind: VarKind,
    ) -> VarId {
        let (lower, upper) = match kind {
            VarKind::Binary => (lower.max(0.0), upper.min(1.0)),
            _ => (lower, upper),
        };
        self.variables.push(Variable {
            name,
            lower,
            upper,
            kind,
        });
        VarId(self.variables.len() - 1)
    }

    /// Replace the bounds of a column
    pub fn set_bounds(&mut self, var: VarId, lower: f64, upper: f64) {
        let variable = &mut self.variables[var.0];
        variable.lower = lower;
        variable.upper = upper;
    }

    /// Pin a column to a value
    pub fn fix(&mut self, var: VarId, value: f64) {
        self.set_bounds(var, value, value);
    }

    /// Add a row `lower ≤ expr ≤ upper`.
    ///
    /// The constant part of `expr` is moved to the bounds. A row without variables is checked
    /// for feasibility and dropped, in which case `None` is returned.
    pub fn add_constraint(
        &mut self,
        name: Option<String>,
        expr: &LinearExpr,
        lower: f64,
        upper: f64,
    ) -> Result<Option<RowId>> {
        let expr = expr.normalised();
        let lower = lower - expr.constant;
        let upper = upper - expr.constant;
        if expr.terms.is_empty() {
            if lower > CONSTANT_TOLERANCE || upper < -CONSTANT_TOLERANCE {
                construction_bail!(
                    "constraint {} cannot be satisfied: 0 is not within [{lower}, {upper}]",
                    name.as_deref().unwrap_or("without variables")
                );
            }
            return Ok(None);
        }

        self.constraints.push(Constraint {
            name,
            terms: expr.terms,
            lower,
            upper,
        });
        Ok(Some(RowId(self.constraints.len() - 1)))
    }

    /// Add `expr` to the objective
    pub fn add_objective(&mut self, expr: LinearExpr) {
        self.objective += expr;
    }

    /// The columns of the program
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// The rows of the program
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// The objective to be minimised
    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    /// Objective coefficient of every column
    pub fn objective_coefficients(&self) -> Vec<f64> {
        let mut coefficients = vec![0.0; self.variables.len()];
        for (var, coefficient) in &self.objective.terms {
            coefficients[var.0] += coefficient;
        }
        coefficients
    }

    /// Number of columns
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Number of integer and binary columns
    pub fn num_integer_variables(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.kind != VarKind::Continuous)
            .count()
    }

    /// Number of rows
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Whether any column is integer or binary
    pub fn is_mip(&self) -> bool {
        self.num_integer_variables() > 0
    }

    /// Write the program in CPLEX LP format
    #[allow(clippy::float_cmp)]
    pub fn write_lp<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let var_name = |var: VarId| match &self.variables[var.0].name {
            Some(name) => lp_name(name),
            None => format!("x{}", var.0),
        };
        let write_terms = |out: &mut W, terms: &[(VarId, f64)]| -> io::Result<()> {
            if terms.is_empty() {
                return write!(out, " 0 x0");
            }
            for (var, coefficient) in terms {
                let sign = if *coefficient < 0.0 { '-' } else { '+' };
                write!(out, " {sign} {} {}", coefficient.abs(), var_name(*var))?;
            }
            Ok(())
        };

        writeln!(out, "\\ Objective constant: {}", self.objective.constant)?;
        writeln!(out, "Minimize")?;
        write!(out, " obj:")?;
        write_terms(out, &self.objective.normalised().terms)?;
        writeln!(out)?;

        writeln!(out, "Subject To")?;
        for (i, constraint) in self.constraints.iter().enumerate() {
            let name = constraint
                .name
                .as_deref()
                .map_or_else(|| format!("c{i}"), lp_name);
            let rows: Vec<(String, &str, f64)> = if constraint.lower == constraint.upper {
                vec![(name, "=", constraint.lower)]
            } else {
                let mut rows = Vec::with_capacity(2);
                if constraint.lower.is_finite() {
                    rows.push((format!("{name}_lo"), ">=", constraint.lower));
                }
                if constraint.upper.is_finite() {
                    rows.push((format!("{name}_up"), "<=", constraint.upper));
                }
                rows
            };
            for (row_name, sense, rhs) in rows {
                write!(out, " {row_name}:")?;
                write_terms(out, &constraint.terms)?;
                writeln!(out, " {sense} {rhs}")?;
            }
        }

        writeln!(out, "Bounds")?;
        for (i, variable) in self.variables.iter().enumerate() {
            let name = var_name(VarId(i));
            match (variable.lower.is_finite(), variable.upper.is_finite()) {
                _ if variable.lower == variable.upper => {
                    writeln!(out, " {name} = {}", variable.lower)?;
                }
                (true, true) => {
                    writeln!(out, " {} <= {name} <= {}", variable.lower, variable.upper)?;
                }
                (true, false) => writeln!(out, " {name} >= {}", variable.lower)?,
                (false, true) => writeln!(out, " -inf <= {name} <= {}", variable.upper)?,
                (false, false) => writeln!(out, " {name} free")?,
            }
        }

        for (section, kind) in [("General", VarKind::Integer), ("Binary", VarKind::Binary)] {
            let names: Vec<_> = self
                .variables
                .iter()
                .enumerate()
                .filter(|(_, v)| v.kind == kind)
                .map(|(i, _)| var_name(VarId(i)))
                .collect();
            if !names.is_empty() {
                writeln!(out, "{section}")?;
                for name in names {
                    writeln!(out, " {name}")?;
                }
            }
        }
        writeln!(out, "End")
    }
}

/// Replace characters that are not allowed in LP names
fn lp_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
