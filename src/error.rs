use thiserror::Error;

/// Errors raised while building or running a dispatch.
///
/// Configuration problems surface here immediately. A solve that finishes
/// without proving optimality is not an error: it is recorded in
/// [`DispatchProblemState`](crate::optimizer::DispatchProblemState) instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Length mismatch for {name}: expected {expected}, got {actual}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Time window must contain at least one timestep")]
    EmptyTimeWindow,

    #[error("Unknown technology: {0}")]
    UnknownTechnology(String),

    #[error("Technology registered twice: {0}")]
    DuplicateTechnology(String),

    #[error("Control strategy '{0}' was given, but has not been implemented yet")]
    NotImplemented(String),

    #[error("Initial state of charge {value} outside [{min}, {max}]")]
    InitialSocOutOfRange { value: f64, min: f64, max: f64 },

    #[error("Model has no objective attached")]
    MissingObjective,

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Performance model failed for window starting at {start}: {source}")]
    PerformanceModel {
        start: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    pub(crate) fn length_mismatch(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        DispatchError::LengthMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
