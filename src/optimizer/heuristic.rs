//! Heuristic Dispatch Rule
//!
//! Closed-form storage dispatch used when optimization is not requested.
//! Per timestep, a normalized dispatch fraction (positive discharges,
//! negative charges) is clipped against what on-site generation can supply
//! for charging and what the system interface can still absorb for
//! discharging. Storage is never charged from the interface.

use tracing::debug;

use crate::config::{check_fixed_dispatch, InitialSocPolicy};
use crate::error::{DispatchError, Result};
use crate::model::round_to;

use super::blocks::{check_initial_soc, StorageParameters};
use super::window::{TimeWindow, WindowDispatch};

/// Where the target dispatch fraction comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum HeuristicMode {
    /// `(demand - generation) / maximum_storage`
    LoadFollowing,
    /// A user profile of fractions in `[-1, 1]`, one per window timestep.
    FixedDispatch(Vec<f64>),
}

impl HeuristicMode {
    pub fn label(&self) -> &'static str {
        match self {
            HeuristicMode::LoadFollowing => "load_following",
            HeuristicMode::FixedDispatch(_) => "fixed_dispatch",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeuristicDispatch {
    window: TimeWindow,
    mode: HeuristicMode,
    round_digits: u32,
    policy: InitialSocPolicy,
    minimum_soc: f64,
    maximum_soc: f64,
    maximum_storage: f64,
    charge_efficiency: f64,
    discharge_efficiency: f64,
    initial_soc: f64,
    time_duration: Vec<f64>,
    max_charge_fraction: Vec<f64>,
    max_discharge_fraction: Vec<f64>,
    fixed_dispatch: Vec<f64>,
}

impl HeuristicDispatch {
    pub fn new(
        window: TimeWindow,
        params: &StorageParameters,
        mode: HeuristicMode,
        round_digits: u32,
        policy: InitialSocPolicy,
    ) -> Result<Self> {
        params.validate()?;
        if let HeuristicMode::FixedDispatch(profile) = &mode {
            check_fixed_dispatch(profile, window.len())?;
        }
        let initial_soc = check_initial_soc(
            params.initial_soc,
            params.minimum_soc,
            params.maximum_soc,
            round_digits,
            policy,
        )?;
        Ok(Self {
            window,
            mode,
            round_digits,
            policy,
            minimum_soc: params.minimum_soc,
            maximum_soc: params.maximum_soc,
            maximum_storage: params.maximum_storage,
            charge_efficiency: params.charge_efficiency,
            discharge_efficiency: params.discharge_efficiency,
            initial_soc,
            time_duration: vec![1.0; window.len()],
            max_charge_fraction: vec![0.0; window.len()],
            max_discharge_fraction: vec![0.0; window.len()],
            fixed_dispatch: vec![0.0; window.len()],
        })
    }

    pub fn mode(&self) -> &HeuristicMode {
        &self.mode
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn initial_soc(&self) -> f64 {
        self.initial_soc
    }

    /// Checks and stores the SOC the next window starts from; returns the value stored.
    pub fn set_initial_soc(&mut self, initial_soc: f64) -> Result<f64> {
        self.initial_soc = check_initial_soc(
            initial_soc,
            self.minimum_soc,
            self.maximum_soc,
            self.round_digits,
            self.policy,
        )?;
        Ok(self.initial_soc)
    }

    pub fn set_time_duration(&mut self, durations: &[f64]) -> Result<()> {
        self.window.check_len("time_duration", durations)?;
        self.time_duration = durations.to_vec();
        Ok(())
    }

    pub fn set_user_fixed_dispatch(&mut self, profile: Vec<f64>) -> Result<()> {
        check_fixed_dispatch(&profile, self.window.len())?;
        self.mode = HeuristicMode::FixedDispatch(profile);
        Ok(())
    }

    pub fn max_charge_fraction(&self) -> &[f64] {
        &self.max_charge_fraction
    }

    pub fn max_discharge_fraction(&self) -> &[f64] {
        &self.max_discharge_fraction
    }

    /// Fractions of the most recent [`set_fixed_dispatch`](Self::set_fixed_dispatch).
    pub fn fixed_dispatch(&self) -> &[f64] {
        &self.fixed_dispatch
    }

    /// Clip a power fraction into `[minimum, maximum]`.
    pub fn enforce_power_fraction_simple_bounds(fraction: f64, minimum: f64, maximum: f64) -> f64 {
        if fraction > maximum {
            maximum
        } else if fraction < minimum {
            minimum
        } else {
            fraction
        }
    }

    /// SOC after applying `fraction` for one step from `soc0`, kept within the SOC limits.
    pub fn update_soc(&self, fraction: f64, soc0: f64) -> f64 {
        let dt = self.time_duration[0];
        let soc = if fraction > 0.0 {
            soc0 - dt * fraction / self.discharge_efficiency
        } else if fraction < 0.0 {
            soc0 - dt * self.charge_efficiency * fraction
        } else {
            soc0
        };
        soc.clamp(self.minimum_soc, self.maximum_soc)
    }

    /// Compute the window's dispatch without a solve.
    ///
    /// `commodity_demand` is required in [`HeuristicMode::LoadFollowing`] and
    /// ignored otherwise.
    pub fn set_fixed_dispatch(
        &mut self,
        start: usize,
        commodity_in: &[f64],
        interface_limit: &[f64],
        commodity_demand: Option<&[f64]>,
    ) -> Result<WindowDispatch> {
        self.window.check_len("commodity_in", commodity_in)?;
        self.window
            .check_len("system_commodity_interface_limit", interface_limit)?;
        self.set_fraction_limits(commodity_in, interface_limit);

        let targets: Vec<f64> = match (&self.mode, commodity_demand) {
            (HeuristicMode::FixedDispatch(profile), _) => profile.clone(),
            (HeuristicMode::LoadFollowing, Some(demand)) => {
                self.window.check_len("commodity_demand", demand)?;
                demand
                    .iter()
                    .zip(commodity_in)
                    .map(|(d, g)| (d - g) / self.maximum_storage)
                    .collect()
            }
            (HeuristicMode::LoadFollowing, None) => {
                return Err(DispatchError::InvalidConfig(
                    "load-following dispatch needs a demand profile".to_string(),
                ))
            }
        };

        for (t, target) in targets.into_iter().enumerate() {
            self.fixed_dispatch[t] = if target > 0.0 {
                target.min(self.max_discharge_fraction[t])
            } else if target < 0.0 {
                target.max(-self.max_charge_fraction[t])
            } else {
                0.0
            };
        }

        let dispatch = self.fix_dispatch(start);
        debug!(
            start,
            mode = self.mode.label(),
            final_soc = ?dispatch.soc.last(),
            "heuristic dispatch fixed"
        );
        Ok(dispatch)
    }

    fn set_fraction_limits(&mut self, commodity_in: &[f64], interface_limit: &[f64]) {
        for t in self.window.indices() {
            self.max_charge_fraction[t] = Self::enforce_power_fraction_simple_bounds(
                commodity_in[t] / self.maximum_storage,
                0.0,
                self.maximum_soc,
            );
            self.max_discharge_fraction[t] = Self::enforce_power_fraction_simple_bounds(
                (interface_limit[t] - commodity_in[t]) / self.maximum_storage,
                0.0,
                self.maximum_soc,
            );
        }
    }

    fn fix_dispatch(&self, start: usize) -> WindowDispatch {
        let mut dispatch = WindowDispatch::idle(start, self.initial_soc, self.window.len());
        let mut soc0 = self.initial_soc;
        for (t, &fraction) in self.fixed_dispatch.iter().enumerate() {
            let soc = round_to(self.update_soc(fraction, soc0), self.round_digits);
            dispatch.soc[t] = soc;
            soc0 = soc;
            if fraction > 0.0 {
                dispatch.discharge[t] = fraction * self.maximum_storage;
            } else if fraction < 0.0 {
                dispatch.charge[t] = -fraction * self.maximum_storage;
            }
        }
        dispatch
    }
}
