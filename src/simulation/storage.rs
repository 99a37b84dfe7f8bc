use anyhow::{bail, Result};

use crate::optimizer::StorageParameters;

use super::{PerformanceModel, WindowPerformance};

/// Reference storage physics: rate limits, SOC limits and efficiency losses.
///
/// Power convention follows the dispatch commands:
/// - positive = discharging, delivered energy is drawn as `output / discharge_efficiency`
/// - negative = charging, stored energy is `input * charge_efficiency`
///
/// The SOC is kept across calls, so consecutive windows continue from where
/// the previous one ended.
#[derive(Debug, Clone)]
pub struct SimpleStoragePerformance {
    maximum_storage: f64,
    minimum_soc: f64,
    maximum_soc: f64,
    charge_efficiency: f64,
    discharge_efficiency: f64,
    max_charge_rate: f64,
    max_discharge_rate: f64,
    time_step_hours: f64,
    /// Fraction of `maximum_storage`.
    soc: f64,
}

impl SimpleStoragePerformance {
    pub fn new(params: &StorageParameters, time_step_hours: f64) -> Result<Self> {
        params.validate()?;
        if !(time_step_hours.is_finite() && time_step_hours > 0.0) {
            bail!("time_step_hours must be positive, got {time_step_hours}");
        }
        let soc = if params.initial_soc > 1.0 {
            params.initial_soc / 100.0
        } else {
            params.initial_soc
        };
        Ok(Self {
            maximum_storage: params.maximum_storage,
            minimum_soc: params.minimum_soc,
            maximum_soc: params.maximum_soc,
            charge_efficiency: params.charge_efficiency,
            discharge_efficiency: params.discharge_efficiency,
            max_charge_rate: params.max_charge_rate,
            max_discharge_rate: params.max_discharge_rate,
            time_step_hours,
            soc: soc.clamp(params.minimum_soc, params.maximum_soc),
        })
    }

    /// Current SOC as a fraction.
    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn set_soc(&mut self, soc: f64) {
        self.soc = soc.clamp(self.minimum_soc, self.maximum_soc);
    }

    /// Apply one command and return the realized net output.
    fn step(&mut self, command: f64) -> f64 {
        let dt = self.time_step_hours;
        if command > 0.0 {
            let stored = (self.soc - self.minimum_soc).max(0.0) * self.maximum_storage;
            let deliverable = stored * self.discharge_efficiency / dt;
            let output = command.min(self.max_discharge_rate).min(deliverable);
            self.soc -= dt * output / self.discharge_efficiency / self.maximum_storage;
            output
        } else if command < 0.0 {
            let headroom = (self.maximum_soc - self.soc).max(0.0) * self.maximum_storage;
            let absorbable = headroom / (self.charge_efficiency * dt);
            let input = (-command).min(self.max_charge_rate).min(absorbable);
            self.soc += dt * input * self.charge_efficiency / self.maximum_storage;
            -input
        } else {
            0.0
        }
    }
}

impl PerformanceModel for SimpleStoragePerformance {
    fn simulate(&mut self, commands: &[f64], _start: usize) -> Result<WindowPerformance> {
        let mut realized = WindowPerformance {
            storage_out: Vec::with_capacity(commands.len()),
            soc: Vec::with_capacity(commands.len()),
        };
        for &command in commands {
            if !command.is_finite() {
                bail!("dispatch command must be finite, got {command}");
            }
            realized.storage_out.push(self.step(command));
            self.soc = self.soc.clamp(self.minimum_soc, self.maximum_soc);
            realized.soc.push(self.soc * 100.0);
        }
        Ok(realized)
    }
}
