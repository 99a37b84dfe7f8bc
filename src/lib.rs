//! Rolling-horizon dispatch of storage and converter technologies.
//!
//! Each control window is dispatched either by a closed-form heuristic or by
//! solving a mixed-integer model of the plant, and the realized state of
//! charge carries over to the next window.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod simulation;
pub mod telemetry;

pub use config::{ControlStrategy, DispatchConfig, InitialSocPolicy};
pub use controller::{DispatchOutputs, RollingHorizonScheduler, SchedulerState};
pub use error::{DispatchError, Result};
pub use optimizer::{DispatchProblemState, Optimizer, SolverOptions, TerminationCondition};
pub use simulation::{PerformanceModel, SimpleStoragePerformance, WindowPerformance};
