use serde::Serialize;

use super::solver::{SolveMetrics, TerminationCondition};

/// Diagnostics of one window's solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveRecord {
    pub start_time: usize,
    /// Whole days in the simulated horizon.
    pub n_days: usize,
    pub termination_condition: TerminationCondition,
    pub solve_time: f64,
    pub objective: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub n_variables: usize,
    pub n_constraints: usize,
    pub n_nonzeros: usize,
    pub gap: f64,
    pub is_optimal: bool,
}

/// Append-only log of every solve in one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchProblemState {
    records: Vec<SolveRecord>,
    n_non_optimal_solves: usize,
}

impl DispatchProblemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the metrics of the solve for the window starting at `start_time`.
    pub fn store(&mut self, metrics: &SolveMetrics, start_time: usize, n_days: usize) -> &SolveRecord {
        let is_optimal = metrics.termination.is_optimal();
        if !is_optimal {
            self.n_non_optimal_solves += 1;
        }
        self.records.push(SolveRecord {
            start_time,
            n_days,
            termination_condition: metrics.termination.clone(),
            solve_time: metrics.elapsed(),
            objective: metrics.objective,
            lower_bound: metrics.lower_bound,
            upper_bound: metrics.upper_bound,
            n_variables: metrics.stats.n_variables,
            n_constraints: metrics.stats.n_constraints,
            n_nonzeros: metrics.stats.n_nonzeros,
            gap: metrics.gap(),
            is_optimal,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[SolveRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&SolveRecord> {
        self.records.last()
    }

    pub fn n_non_optimal_solves(&self) -> usize {
        self.n_non_optimal_solves
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the log for reporting. Infinite gaps become `null`.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
