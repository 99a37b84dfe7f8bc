//! # Technology Performance Models
//!
//! The scheduler hands each window's dispatch commands to a
//! [`PerformanceModel`] and gets back what the asset actually did: realized
//! storage output and the SOC trajectory. Any physics can sit behind this
//! seam as long as it keeps the shape: one output and one SOC value per
//! command.
//!
//! ## Usage
//!
//! ```rust
//! use commodity_dispatch::simulation::{PerformanceModel, WindowPerformance};
//!
//! // A closure is a performance model too.
//! let mut passthrough = |commands: &[f64], _start: usize| -> anyhow::Result<WindowPerformance> {
//!     Ok(WindowPerformance {
//!         storage_out: commands.to_vec(),
//!         soc: vec![50.0; commands.len()],
//!     })
//! };
//! let realized = passthrough.simulate(&[1.0, -2.0], 0).unwrap();
//! assert_eq!(realized.storage_out, vec![1.0, -2.0]);
//! ```

pub mod storage;

pub use storage::SimpleStoragePerformance;

/// What a technology realized over one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowPerformance {
    /// Net storage output per timestep: positive delivered, negative absorbed.
    pub storage_out: Vec<f64>,
    /// State of charge at the end of each timestep, in percent.
    pub soc: Vec<f64>,
}

/// Converts dispatch commands into realized throughput and SOC.
pub trait PerformanceModel {
    /// `commands` holds one net command per timestep (positive discharges,
    /// negative charges); `start` is the global index of the first one.
    fn simulate(&mut self, commands: &[f64], start: usize) -> anyhow::Result<WindowPerformance>;
}

impl<F> PerformanceModel for F
where
    F: FnMut(&[f64], usize) -> anyhow::Result<WindowPerformance>,
{
    fn simulate(&mut self, commands: &[f64], start: usize) -> anyhow::Result<WindowPerformance> {
        self(commands, start)
    }
}
