//! Solver Invocation & Diagnostics
//!
//! An [`Optimizer`] takes the current parameterization of an
//! [`OptimizationModel`] and returns a primal solution (if one was found)
//! together with [`SolveMetrics`]. A solve that stops short of optimality is
//! reported through the metrics, never as an error.

#[cfg(feature = "optimization")]
pub mod highs;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{DispatchError, Result};
use crate::model::{ModelStats, OptimizationModel, Solution};

#[cfg(feature = "optimization")]
pub use self::highs::HighsOptimizer;

/// Log file attached to the solver when logging is requested.
pub const DEFAULT_LOG_FILE: &str = "dispatch_solver.log";

/// Outcome category reported by the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCondition {
    Optimal,
    Infeasible,
    Unbounded,
    MaxTimeLimit,
    MaxIterations,
    Other(String),
}

impl TerminationCondition {
    pub fn is_optimal(&self) -> bool {
        matches!(self, TerminationCondition::Optimal)
    }

    /// Stopped by a limit, so a feasible incumbent may still exist.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            TerminationCondition::MaxTimeLimit | TerminationCondition::MaxIterations
        )
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCondition::Optimal => f.write_str("optimal"),
            TerminationCondition::Infeasible => f.write_str("infeasible"),
            TerminationCondition::Unbounded => f.write_str("unbounded"),
            TerminationCondition::MaxTimeLimit => f.write_str("maxTimeLimit"),
            TerminationCondition::MaxIterations => f.write_str("maxIterations"),
            TerminationCondition::Other(label) => f.write_str(label),
        }
    }
}

impl Serialize for TerminationCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Diagnostics of one solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveMetrics {
    pub termination: TerminationCondition,
    /// Time reported by the solver itself, when it reports one.
    pub solve_time: Option<f64>,
    /// Wall-clock seconds spent around the solver call.
    pub wallclock_time: f64,
    /// Objective including constant terms, when a solution exists.
    pub objective: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub stats: ModelStats,
}

impl SolveMetrics {
    /// Reported solve time, or the elapsed wall-clock time when the solver gave none.
    pub fn elapsed(&self) -> f64 {
        self.solve_time.unwrap_or(self.wallclock_time)
    }

    pub fn gap(&self) -> f64 {
        relative_gap(self.lower_bound, self.upper_bound)
    }

    pub(crate) fn wallclock(elapsed: Duration) -> f64 {
        elapsed.as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    /// Primal values, `None` when the solver produced no usable point.
    pub solution: Option<Solution>,
    pub metrics: SolveMetrics,
}

/// Backend that solves an [`OptimizationModel`] at its current parameter values.
#[cfg_attr(test, mockall::automock)]
pub trait Optimizer {
    fn solve(&mut self, model: &OptimizationModel, options: &SolverOptions) -> Result<SolveOutcome>;
}

/// Optimizer used when none is injected.
pub fn default_optimizer() -> Result<Box<dyn Optimizer>> {
    #[cfg(feature = "optimization")]
    {
        Ok(Box::new(HighsOptimizer::default()))
    }
    #[cfg(not(feature = "optimization"))]
    {
        Err(DispatchError::Solver(
            "built without the `optimization` feature, no solver backend available".to_string(),
        ))
    }
}

/// Relative optimality gap `|upper - lower| / |upper|`.
///
/// Both bounds zero give 0. An upper bound of zero against a nonzero lower
/// bound, or a missing or non-finite bound, gives `+inf`.
pub fn relative_gap(lower: Option<f64>, upper: Option<f64>) -> f64 {
    let (Some(lower), Some(upper)) = (lower, upper) else {
        return f64::INFINITY;
    };
    if !lower.is_finite() || !upper.is_finite() {
        return f64::INFINITY;
    }
    if upper != 0.0 {
        (upper - lower).abs() / upper.abs()
    } else if lower == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// A single solver option value as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SolverOptionValue {
    Flag(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl SolverOptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SolverOptionValue::Flag(b) => Some(*b),
            SolverOptionValue::Integer(i) => Some(*i != 0),
            SolverOptionValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" => Some(true),
                "false" | "off" | "no" => Some(false),
                _ => None,
            },
            SolverOptionValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SolverOptionValue::Number(n) => Some(*n),
            SolverOptionValue::Integer(i) => Some(*i as f64),
            SolverOptionValue::Text(s) => s.parse().ok(),
            SolverOptionValue::Flag(_) => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            SolverOptionValue::Integer(i) => i32::try_from(*i).ok(),
            SolverOptionValue::Number(n) if n.fract() == 0.0 => Some(*n as i32),
            SolverOptionValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SolverOptionValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SolverOptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverOptionValue::Flag(b) => write!(f, "{b}"),
            SolverOptionValue::Integer(i) => write!(f, "{i}"),
            SolverOptionValue::Number(n) => write!(f, "{n}"),
            SolverOptionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SolverOptionValue {
    fn from(value: bool) -> Self {
        SolverOptionValue::Flag(value)
    }
}

impl From<i64> for SolverOptionValue {
    fn from(value: i64) -> Self {
        SolverOptionValue::Integer(value)
    }
}

impl From<f64> for SolverOptionValue {
    fn from(value: f64) -> Self {
        SolverOptionValue::Number(value)
    }
}

impl From<&str> for SolverOptionValue {
    fn from(value: &str) -> Self {
        SolverOptionValue::Text(value.to_string())
    }
}

/// Flat key/value solver options.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct SolverOptions {
    values: BTreeMap<String, SolverOptionValue>,
}

impl SolverOptions {
    /// Cut generation and presolve on, 30 s time limit.
    pub fn baseline() -> Self {
        let mut options = Self::default();
        options.insert("cuts", true);
        options.insert("presolve", true);
        options.insert("time_limit", 30.0);
        options
    }

    /// Baseline, then the log file when `log_enabled`, then `user`.
    ///
    /// User values win on any key collision.
    pub fn construct(user: &BTreeMap<String, SolverOptionValue>, log_enabled: bool) -> Self {
        let mut options = Self::baseline();
        if log_enabled {
            options.insert("log_file", DEFAULT_LOG_FILE);
        }
        for (key, value) in user {
            options.values.insert(key.clone(), value.clone());
        }
        options
    }

    /// Reject known options whose value the backend would refuse.
    ///
    /// Unknown keys pass; the backend skips them with a warning.
    pub fn validate(&self) -> Result<()> {
        self.iter()
            .try_for_each(|(key, value)| Self::check_value(key, value))
    }

    pub(crate) fn check_value(key: &str, value: &SolverOptionValue) -> Result<()> {
        let valid = match key {
            "time_limit" | "mip_rel_gap" => value.as_f64().is_some_and(|v| v.is_finite() && v >= 0.0),
            "threads" | "random_seed" => value.as_i32().is_some_and(|v| v >= 0),
            "cuts" | "presolve" | "output_flag" => value.as_bool().is_some(),
            "log_file" => value.as_str().is_some(),
            _ => true,
        };
        if valid {
            Ok(())
        } else {
            Err(DispatchError::InvalidConfig(format!(
                "solver option {key} has invalid value {value}"
            )))
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SolverOptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SolverOptionValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SolverOptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
