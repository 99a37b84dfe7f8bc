//! # Rolling-Horizon Dispatch Controller
//!
//! Drives a full simulation horizon one control window at a time. Each
//! window is dispatched by either the closed-form heuristic or a solve of the
//! system optimization model, then handed to the caller's
//! [`PerformanceModel`](crate::simulation::PerformanceModel). The realized
//! SOC at the end of the window becomes the next window's initial SOC.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use commodity_dispatch::config::DispatchConfig;
//! use commodity_dispatch::controller::RollingHorizonScheduler;
//! use commodity_dispatch::simulation::SimpleStoragePerformance;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = DispatchConfig::load()?;
//! let mut battery = SimpleStoragePerformance::new(
//!     &config.storage_parameters()?,
//!     config.control.time_step_hours,
//! )?;
//! let mut scheduler = RollingHorizonScheduler::from_config(&config, 48)?;
//! let outputs = scheduler.run(&mut battery, vec![1000.0; 48], vec![6000.0; 48])?;
//! println!("unmet: {:?}", outputs.unmet_demand);
//! # Ok(())
//! # }
//! ```

pub mod outputs;
pub mod scheduler;

pub use outputs::{DispatchOutputs, ForecastInputs, TimestepBalance};
pub use scheduler::{RollingHorizonScheduler, SchedulerState};
