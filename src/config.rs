use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::DispatchError;
use crate::optimizer::{
    CommodityInfo, ConverterParameters, SolverOptionValue, SolverOptions, StorageParameters,
};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "DISPATCH__";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DispatchConfig {
    #[validate(nested)]
    pub control: ControlConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[serde(default)]
    #[validate(nested)]
    pub costs: CostConfig,
    #[serde(default)]
    pub commodity: CommodityInfo,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ControlConfig {
    /// Contains "heuristic" or "optimized".
    pub strategy: String,
    #[validate(range(min = 1))]
    pub n_control_window: usize,
    /// Look-ahead length. Accepted and checked, not used by the rolling loop.
    #[serde(default)]
    pub n_horizon_window: Option<usize>,
    #[serde(default = "default_interface_limit")]
    pub system_commodity_interface_limit: InterfaceLimit,
    #[serde(default = "default_time_weighting_factor")]
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub time_weighting_factor: f64,
    #[serde(default = "default_round_digits")]
    #[validate(range(max = 12))]
    pub round_digits: u32,
    #[serde(default = "default_time_step_hours")]
    #[validate(range(exclusive_min = 0.0))]
    pub time_step_hours: f64,
    #[serde(default)]
    pub initial_soc_policy: InitialSocPolicy,
    /// Normalized per-timestep profile in [-1, 1] for the fixed-dispatch heuristic.
    #[serde(default)]
    pub fixed_dispatch: Option<Vec<f64>>,
    /// Storage technology being dispatched.
    #[serde(default = "default_tech_name")]
    pub tech_name: String,
    /// Converters feeding the storage.
    #[serde(default = "default_converters")]
    pub converters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StorageConfig {
    #[validate(range(exclusive_min = 0.0))]
    pub max_capacity: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub max_charge_rate: f64,
    /// Defaults to `max_charge_rate`.
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0))]
    pub max_discharge_rate: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub minimum_storage: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_charge_percent: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_charge_percent: f64,
    /// Fraction, or percent when above 1.
    #[validate(range(min = 0.0, max = 100.0))]
    pub init_charge_percent: f64,
    #[serde(default = "default_efficiency")]
    pub charge_efficiency: f64,
    #[serde(default = "default_efficiency")]
    pub discharge_efficiency: f64,
    /// Overrides both efficiencies with its square root.
    #[serde(default)]
    pub round_trip_efficiency: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct CostConfig {
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cost_per_charge: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cost_per_discharge: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cost_per_production: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub commodity_met_value: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Attach the solver log file.
    #[serde(default)]
    pub log_enabled: bool,
    /// Merged over the baseline options; these win on collision.
    #[serde(default)]
    pub options: BTreeMap<String, SolverOptionValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
        }
    }
}

/// Interface capacity: one value for every timestep, or one per timestep.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InterfaceLimit {
    Scalar(f64),
    PerTimestep(Vec<f64>),
}

impl InterfaceLimit {
    /// Broadcast to a control window of length `len`.
    pub fn to_window(&self, len: usize) -> Result<Vec<f64>, DispatchError> {
        match self {
            InterfaceLimit::Scalar(value) => Ok(vec![*value; len]),
            InterfaceLimit::PerTimestep(values) if values.len() == len => Ok(values.clone()),
            InterfaceLimit::PerTimestep(values) => Err(DispatchError::length_mismatch(
                "system_commodity_interface_limit",
                len,
                values.len(),
            )),
        }
    }
}

/// What to do with an initial SOC outside `[min_soc, max_soc]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InitialSocPolicy {
    /// Clamp to the nearest bound and log a warning.
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ControlStrategy {
    Heuristic,
    Optimized,
}

impl ControlStrategy {
    /// Match on the configured strategy name, e.g. `heuristic_load_following`.
    pub fn from_name(name: &str) -> Result<Self, DispatchError> {
        if name.contains("heuristic") {
            Ok(ControlStrategy::Heuristic)
        } else if name.contains("optimized") {
            Ok(ControlStrategy::Optimized)
        } else {
            Err(DispatchError::NotImplemented(name.to_string()))
        }
    }
}

impl DispatchConfig {
    /// Load `config/default.toml` overlaid with `DISPATCH__*` environment variables.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(DEFAULT_CONFIG_PATH))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: DispatchConfig = figment.extract()?;
        config.validate_all()?;
        Ok(config)
    }

    /// Field ranges plus the checks that span several fields.
    pub fn validate_all(&self) -> Result<(), DispatchError> {
        self.validate()
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?;

        let storage = &self.storage;
        if storage.min_charge_percent > storage.max_charge_percent {
            return Err(DispatchError::InvalidConfig(format!(
                "min_charge_percent {} exceeds max_charge_percent {}",
                storage.min_charge_percent, storage.max_charge_percent
            )));
        }
        if self.n_horizon_window() < self.control.n_control_window {
            return Err(DispatchError::InvalidConfig(format!(
                "n_horizon_window {} is shorter than n_control_window {}",
                self.n_horizon_window(),
                self.control.n_control_window
            )));
        }
        self.interface_limit()?;
        if let Some(profile) = &self.control.fixed_dispatch {
            check_fixed_dispatch(profile, self.control.n_control_window)?;
        }
        if self.control.tech_name.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "tech_name must not be empty".to_string(),
            ));
        }
        ControlStrategy::from_name(&self.control.strategy)?;
        self.storage_parameters()?;
        self.solver_options().validate()?;
        Ok(())
    }

    pub fn strategy(&self) -> Result<ControlStrategy, DispatchError> {
        ControlStrategy::from_name(&self.control.strategy)
    }

    pub fn n_horizon_window(&self) -> usize {
        self.control
            .n_horizon_window
            .unwrap_or(self.control.n_control_window)
    }

    pub fn interface_limit(&self) -> Result<Vec<f64>, DispatchError> {
        self.control
            .system_commodity_interface_limit
            .to_window(self.control.n_control_window)
    }

    /// Storage block parameters with efficiencies normalized to fractions.
    pub fn storage_parameters(&self) -> Result<StorageParameters, DispatchError> {
        let storage = &self.storage;
        let (charge_efficiency, discharge_efficiency) = match storage.round_trip_efficiency {
            Some(rte) => {
                let each = normalize_efficiency(rte)?.sqrt();
                (each, each)
            }
            None => (
                normalize_efficiency(storage.charge_efficiency)?,
                normalize_efficiency(storage.discharge_efficiency)?,
            ),
        };
        let params = StorageParameters {
            minimum_storage: storage.minimum_storage,
            maximum_storage: storage.max_capacity,
            minimum_soc: storage.min_charge_percent,
            maximum_soc: storage.max_charge_percent,
            charge_efficiency,
            discharge_efficiency,
            max_charge_rate: storage.max_charge_rate,
            max_discharge_rate: storage.max_discharge_rate.unwrap_or(storage.max_charge_rate),
            cost_per_charge: self.costs.cost_per_charge,
            cost_per_discharge: self.costs.cost_per_discharge,
            commodity_met_value: self.costs.commodity_met_value,
            initial_soc: storage.init_charge_percent,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn converter_parameters(&self) -> ConverterParameters {
        ConverterParameters {
            cost_per_production: self.costs.cost_per_production,
        }
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions::construct(&self.solver.options, self.solver.log_enabled)
    }
}

/// Efficiencies above 1 are read as percent.
pub fn normalize_efficiency(efficiency: f64) -> Result<f64, DispatchError> {
    if !efficiency.is_finite() || efficiency <= 0.0 {
        return Err(DispatchError::InvalidConfig(format!(
            "efficiency must be greater than 0, got {efficiency}"
        )));
    }
    let fraction = if efficiency > 1.0 {
        efficiency / 100.0
    } else {
        efficiency
    };
    if fraction > 1.0 {
        return Err(DispatchError::InvalidConfig(format!(
            "efficiency must be between 0 and 1 or 0 and 100, got {efficiency}"
        )));
    }
    Ok(fraction)
}

pub(crate) fn check_fixed_dispatch(profile: &[f64], len: usize) -> Result<(), DispatchError> {
    if profile.len() != len {
        return Err(DispatchError::length_mismatch("fixed_dispatch", len, profile.len()));
    }
    if profile.iter().any(|v| !(-1.0..=1.0).contains(v)) {
        return Err(DispatchError::InvalidConfig(
            "fixed_dispatch must be normalized values between -1 and 1".to_string(),
        ));
    }
    Ok(())
}

fn default_interface_limit() -> InterfaceLimit {
    InterfaceLimit::Scalar(1e12)
}

fn default_time_weighting_factor() -> f64 {
    0.995
}

fn default_round_digits() -> u32 {
    4
}

fn default_time_step_hours() -> f64 {
    1.0
}

fn default_efficiency() -> f64 {
    0.94
}

fn default_tech_name() -> String {
    "battery".to_string()
}

fn default_converters() -> Vec<String> {
    vec!["generator".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
