//! Dispatch Optimization
//!
//! Technology blocks, the system coupling layer that joins them, the solver
//! seam with its diagnostics log, and the closed-form heuristic that stands
//! in for a solve when optimization is not requested.

pub mod blocks;
pub mod heuristic;
pub mod problem_state;
pub mod solver;
pub mod system;
pub mod window;

pub use blocks::{
    check_initial_soc, ConverterBlock, ConverterParameters, Port, PortBindings, PortKind,
    StorageBlock, StorageParameters, TechnologyBlock, TechnologyKind,
};
pub use heuristic::{HeuristicDispatch, HeuristicMode};
pub use problem_state::{DispatchProblemState, SolveRecord};
pub use solver::{
    default_optimizer, relative_gap, Optimizer, SolveMetrics, SolveOutcome, SolverOptionValue,
    SolverOptions, TerminationCondition,
};
pub use system::{SystemModel, SystemSettings};
pub use window::{CommodityInfo, TechName, TimeWindow, WindowDispatch};
