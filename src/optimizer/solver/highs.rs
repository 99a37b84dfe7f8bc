//! HiGHS backend.
//!
//! Evaluates the parametric model at its current parameter values, loads it
//! as a row-wise problem and minimizes. When the MIP stops short of
//! optimality, the lower bound is recovered from the relative gap HiGHS
//! reports for the incumbent.

use std::time::Instant;

use highs::{Col, HighsModelStatus, RowProblem, Sense};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::model::{ConstraintSense, OptimizationModel, Solution, VarId, VarKind};

use super::{Optimizer, SolveMetrics, SolveOutcome, SolverOptions, TerminationCondition};

#[derive(Debug, Clone, Default)]
pub struct HighsOptimizer;

/// Evaluated problem ready for HiGHS plus the objective constant it cannot hold.
struct LoadedProblem {
    problem: RowProblem,
    objective_constant: f64,
    n_columns: usize,
}

fn load(model: &OptimizationModel) -> Result<LoadedProblem> {
    let objective = model.objective().ok_or(DispatchError::MissingObjective)?;
    let evaluated = model.evaluate(&objective.expr);
    if !evaluated.constant.is_finite() {
        return Err(DispatchError::InvalidConfig(format!(
            "objective {} evaluates to a non-finite constant",
            objective.name
        )));
    }

    let mut problem = RowProblem::default();
    let mut cols: Vec<Col> = Vec::with_capacity(model.variables().len());
    for (index, var) in model.variables().iter().enumerate() {
        let cost = evaluated
            .coefficients
            .get(&VarId(index))
            .copied()
            .unwrap_or(0.0);
        let (lower, upper) = model.bounds(var);
        if lower.is_nan() || upper.is_nan() || !cost.is_finite() {
            return Err(DispatchError::InvalidConfig(format!(
                "variable {} has undefined bounds or cost",
                var.name
            )));
        }
        let col = match var.kind {
            VarKind::Binary => problem.add_integer_column(cost, lower..=upper),
            VarKind::Continuous => problem.add_column(cost, lower..=upper),
        };
        cols.push(col);
    }

    for constraint in model.constraints() {
        let evaluated = model.evaluate(&constraint.expr);
        let rhs = -evaluated.constant;
        let factors: Vec<(Col, f64)> = evaluated
            .coefficients
            .iter()
            .filter(|(_, c)| **c != 0.0)
            .map(|(id, c)| (cols[id.index()], *c))
            .collect();
        if !rhs.is_finite() || factors.iter().any(|(_, c)| !c.is_finite()) {
            return Err(DispatchError::InvalidConfig(format!(
                "constraint {} evaluates to non-finite coefficients",
                constraint.name
            )));
        }
        match constraint.sense {
            ConstraintSense::LessEqual => problem.add_row(f64::NEG_INFINITY..=rhs, factors),
            ConstraintSense::GreaterEqual => problem.add_row(rhs..=f64::INFINITY, factors),
            ConstraintSense::Equal => problem.add_row(rhs..=rhs, factors),
        }
    }

    Ok(LoadedProblem {
        problem,
        objective_constant: evaluated.constant,
        n_columns: cols.len(),
    })
}

fn apply_options(highs_model: &mut highs::Model, options: &SolverOptions) {
    highs_model.set_option("output_flag", options.get("log_file").is_some());
    highs_model.set_option("log_to_console", false);
    for (key, value) in options.iter() {
        if let Err(err) = SolverOptions::check_value(key, value) {
            warn!(error = %err, "skipping solver option");
            continue;
        }
        let applied = match key {
            "cuts" => {
                debug!(value = %value, "HiGHS has no single cut-generation switch, ignoring `cuts`");
                continue;
            }
            "presolve" => value.as_bool().map(|on| {
                highs_model.set_option("presolve", if on { "on" } else { "off" });
            }),
            "time_limit" | "mip_rel_gap" => value.as_f64().map(|v| highs_model.set_option(key, v)),
            "threads" | "random_seed" => value.as_i32().map(|v| highs_model.set_option(key, v)),
            "output_flag" => value.as_bool().map(|v| highs_model.set_option(key, v)),
            "log_file" => value.as_str().map(|v| highs_model.set_option(key, v)),
            _ => {
                warn!(option = key, value = %value, "unknown solver option, skipping");
                continue;
            }
        };
        if applied.is_none() {
            warn!(option = key, value = %value, "solver option has the wrong type, skipping");
        }
    }
}

fn termination_of(status: HighsModelStatus) -> TerminationCondition {
    match status {
        HighsModelStatus::Optimal => TerminationCondition::Optimal,
        HighsModelStatus::Infeasible => TerminationCondition::Infeasible,
        HighsModelStatus::Unbounded | HighsModelStatus::UnboundedOrInfeasible => {
            TerminationCondition::Unbounded
        }
        HighsModelStatus::ReachedTimeLimit => TerminationCondition::MaxTimeLimit,
        HighsModelStatus::ReachedIterationLimit => TerminationCondition::MaxIterations,
        other => TerminationCondition::Other(format!("{other:?}")),
    }
}

/// Dual bound implied by HiGHS' `mip_gap = |primal - dual| / |primal|`.
///
/// `objective` excludes the model constant, which is added back afterwards.
fn gap_lower_bound(objective: f64, mip_gap: f64, constant: f64) -> Option<f64> {
    (objective.is_finite() && mip_gap.is_finite() && mip_gap >= 0.0)
        .then(|| objective - mip_gap * objective.abs() + constant)
}

impl Optimizer for HighsOptimizer {
    fn solve(&mut self, model: &OptimizationModel, options: &SolverOptions) -> Result<SolveOutcome> {
        let stats = model.stats();
        let loaded = load(model)?;
        let constant = loaded.objective_constant;
        let n_columns = loaded.n_columns;

        let mut highs_model = loaded.problem.optimise(Sense::Minimise);
        apply_options(&mut highs_model, options);

        let started = Instant::now();
        let solved = highs_model.try_solve();
        let wallclock_time = SolveMetrics::wallclock(started.elapsed());

        let (termination, solution, objective, gap_bound) = match solved {
            Ok(solved) => {
                let termination = termination_of(solved.status());
                let columns = solved.get_solution().columns().to_vec();
                let raw_objective = solved.objective_value();
                let objective = raw_objective + constant;
                let usable = termination.is_optimal()
                    || (termination.is_limit()
                        && objective.is_finite()
                        && columns.len() == n_columns);
                if usable {
                    let gap_bound = if stats.n_binary > 0 {
                        gap_lower_bound(raw_objective, solved.mip_gap(), constant)
                    } else {
                        None
                    };
                    (termination, Some(Solution::new(columns)), Some(objective), gap_bound)
                } else {
                    (termination, None, None, None)
                }
            }
            Err(status) => (
                TerminationCondition::Other(format!("{status:?}")),
                None,
                None,
                None,
            ),
        };

        let (lower_bound, upper_bound) = if termination.is_optimal() {
            (objective, objective)
        } else {
            (gap_bound, objective)
        };

        debug!(
            termination = %termination,
            objective = ?objective,
            wallclock_time,
            n_variables = stats.n_variables,
            n_constraints = stats.n_constraints,
            "HiGHS solve finished"
        );

        Ok(SolveOutcome {
            solution,
            metrics: SolveMetrics {
                termination,
                solve_time: None,
                wallclock_time,
                objective,
                lower_bound,
                upper_bound,
                stats,
            },
        })
    }
}
