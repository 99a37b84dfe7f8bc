//! Parametric Linear Model
//!
//! A small algebraic modeling layer used by the dispatch blocks. Variables,
//! constraints and the objective are created once; coefficients and bounds
//! refer to named parameters that are rewritten every control window. A
//! solver backend evaluates the model against the current parameter values.

mod expr;
mod params;

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::Serialize;

pub use expr::{Coefficient, LinearExpr};
pub use params::{round_to, ParamDomain, ParamId, ParameterTable};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum VarKind {
    #[strum(serialize = "continuous")]
    Continuous,
    #[strum(serialize = "binary")]
    Binary,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    /// `None` means unbounded below.
    pub lower: Option<Coefficient>,
    /// `None` means unbounded above.
    pub upper: Option<Coefficient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConstraintSense {
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "==")]
    Equal,
}

/// `expr (sense) 0`
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: ConstraintSense,
}

/// Minimization objective.
#[derive(Debug, Clone)]
pub struct Objective {
    pub name: String,
    pub expr: LinearExpr,
}

/// Problem size counters reported alongside every solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub n_variables: usize,
    pub n_binary: usize,
    pub n_constraints: usize,
    pub n_nonzeros: usize,
}

/// Expression with all parameters substituted and duplicate variables merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedExpr {
    pub coefficients: BTreeMap<VarId, f64>,
    pub constant: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationModel {
    params: ParameterTable,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
}

impl OptimizationModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_param(
        &mut self,
        name: impl Into<String>,
        domain: ParamDomain,
        value: f64,
    ) -> Result<ParamId> {
        self.params.add(name.into(), domain, value)
    }

    pub fn set_param(&mut self, id: ParamId, value: f64) -> Result<()> {
        self.params.set(id, value)
    }

    pub fn param_value(&self, id: ParamId) -> f64 {
        self.params.value(id)
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        kind: VarKind,
        lower: Option<Coefficient>,
        upper: Option<Coefficient>,
    ) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            kind,
            lower,
            upper,
        });
        VarId(self.variables.len() - 1)
    }

    /// Continuous variable in `[0, inf)`.
    pub fn add_non_negative(&mut self, name: impl Into<String>) -> VarId {
        self.add_var(name, VarKind::Continuous, Some(0.0.into()), None)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_var(name, VarKind::Binary, Some(0.0.into()), Some(1.0.into()))
    }

    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(id.0)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinearExpr,
        sense: ConstraintSense,
    ) {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
            sense,
        });
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Attach `objective`, dropping whatever objective was attached before.
    ///
    /// Returns the previous objective, if any.
    pub fn replace_objective(&mut self, objective: Objective) -> Option<Objective> {
        self.objective.replace(objective)
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    pub fn evaluate(&self, expr: &LinearExpr) -> EvaluatedExpr {
        let mut evaluated = EvaluatedExpr::default();
        for (var, coef) in expr.terms() {
            *evaluated.coefficients.entry(*var).or_insert(0.0) += coef.evaluate(&self.params);
        }
        evaluated.constant = expr
            .constants()
            .iter()
            .map(|c| c.evaluate(&self.params))
            .sum();
        evaluated
    }

    /// Current numeric bounds of a variable; missing bounds are infinite.
    pub fn bounds(&self, var: &Variable) -> (f64, f64) {
        let lower = var
            .lower
            .as_ref()
            .map_or(f64::NEG_INFINITY, |c| c.evaluate(&self.params));
        let upper = var
            .upper
            .as_ref()
            .map_or(f64::INFINITY, |c| c.evaluate(&self.params));
        (lower, upper)
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            n_variables: self.variables.len(),
            n_binary: self
                .variables
                .iter()
                .filter(|v| v.kind == VarKind::Binary)
                .count(),
            n_constraints: self.constraints.len(),
            n_nonzeros: self
                .constraints
                .iter()
                .map(|c| c.expr.terms().iter().map(|(var, _)| var).unique().count())
                .sum(),
        }
    }
}

/// Primal values indexed by [`VarId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    values: Vec<f64>,
}

impl Solution {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, var: VarId) -> Option<f64> {
        self.values.get(var.0).copied()
    }

    /// Value of a variable of the solved model.
    ///
    /// An id the solution does not cover is a wiring bug: debug builds panic,
    /// release builds read NaN so it cannot pass for an idle dispatch.
    pub fn value(&self, var: VarId) -> f64 {
        debug_assert!(
            var.0 < self.values.len(),
            "variable #{} not in a solution of {} values",
            var.0,
            self.values.len()
        );
        self.get(var).unwrap_or(f64::NAN)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model() -> (OptimizationModel, VarId, VarId, ParamId) {
        let mut model = OptimizationModel::new();
        let limit = model.add_param("limit", ParamDomain::NonNegative, 10.0).unwrap();
        let x = model.add_var(
            "x",
            VarKind::Continuous,
            Some(0.0.into()),
            Some(Coefficient::param(limit)),
        );
        let on = model.add_binary("on");
        model.add_constraint(
            "x_gate",
            LinearExpr::from(x).minus(on, Coefficient::param(limit)),
            ConstraintSense::LessEqual,
        );
        (model, x, on, limit)
    }

    #[test]
    fn test_bounds_follow_parameters() {
        let (mut model, x, _, limit) = small_model();
        let var = model.variable(x).unwrap().clone();
        assert_eq!(model.bounds(&var), (0.0, 10.0));
        model.set_param(limit, 4.0).unwrap();
        assert_eq!(model.bounds(&var), (0.0, 4.0));
    }

    #[test]
    fn test_evaluate_merges_duplicate_terms() {
        let (model, x, on, _) = small_model();
        let expr = LinearExpr::from(x)
            .plus(x, 2.0)
            .minus(on, 1.0)
            .plus_constant(5.0)
            .plus_constant(-1.0);
        let evaluated = model.evaluate(&expr);
        assert_eq!(evaluated.coefficients[&x], 3.0);
        assert_eq!(evaluated.coefficients[&on], -1.0);
        assert_eq!(evaluated.constant, 4.0);
    }

    #[test]
    fn test_replace_objective_keeps_single_objective() {
        let (mut model, x, _, _) = small_model();
        let first = Objective {
            name: "cost".into(),
            expr: LinearExpr::from(x),
        };
        assert!(model.replace_objective(first).is_none());

        let second = Objective {
            name: "cost".into(),
            expr: LinearExpr::from(x).plus(x, 1.0),
        };
        let previous = model.replace_objective(second).unwrap();
        assert_eq!(previous.expr.size(), 1);
        assert_eq!(model.objective().unwrap().expr.size(), 2);
    }

    #[test]
    fn test_stats_count_distinct_nonzeros() {
        let (mut model, x, on, _) = small_model();
        model.add_constraint(
            "dup",
            LinearExpr::from(x).plus(x, 1.0).plus(on, 1.0),
            ConstraintSense::Equal,
        );
        let stats = model.stats();
        assert_eq!(stats.n_variables, 2);
        assert_eq!(stats.n_binary, 1);
        assert_eq!(stats.n_constraints, 2);
        assert_eq!(stats.n_nonzeros, 4);
    }

    #[test]
    fn test_solution_value_lookup() {
        let solution = Solution::new(vec![1.5, 0.0]);
        assert_eq!(solution.value(VarId(0)), 1.5);
        assert_eq!(solution.get(VarId(1)), Some(0.0));
        assert_eq!(solution.get(VarId(7)), None);
        assert_eq!(solution.len(), 2);
    }

    #[test]
    #[should_panic(expected = "not in a solution")]
    fn test_solution_value_outside_solution_panics_in_debug() {
        Solution::new(vec![1.5]).value(VarId(3));
    }
}
