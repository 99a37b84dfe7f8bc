#![allow(dead_code)]
//! Shared fixtures for the dispatch integration tests.
//!
//! The reference plant: a 200 MWh storage beside a generator that produces
//! 1000 units for the first half of every day and 10000 for the second half,
//! against a flat demand of 6000.

use commodity_dispatch::config::DispatchConfig;
use commodity_dispatch::simulation::SimpleStoragePerformance;
use figment::providers::{Format, Toml};
use figment::Figment;

pub const DEMAND: f64 = 6000.0;
pub const LOW_GENERATION: f64 = 1000.0;
pub const HIGH_GENERATION: f64 = 10000.0;
pub const HOURS_PER_DAY: usize = 24;

pub fn scenario_config(strategy: &str, efficiency: f64) -> DispatchConfig {
    config_from_toml(&format!(
        r#"
        [control]
        strategy = "{strategy}"
        n_control_window = 24
        time_weighting_factor = 0.995
        round_digits = 4

        [storage]
        max_capacity = 200000.0
        max_charge_rate = 50000.0
        min_charge_percent = 0.1
        max_charge_percent = 0.9
        init_charge_percent = 0.5
        charge_efficiency = {efficiency}
        discharge_efficiency = {efficiency}

        [costs]
        cost_per_charge = 0.004
        cost_per_discharge = 0.005
        cost_per_production = 0.0
        commodity_met_value = 0.1

        [solver.options]
        mip_rel_gap = 1e-9

        [logging]
        level = "warn"
        json = false
        "#
    ))
}

pub fn config_from_toml(toml: &str) -> DispatchConfig {
    DispatchConfig::from_figment(Figment::from(Toml::string(toml))).expect("scenario config is valid")
}

pub fn battery(config: &DispatchConfig) -> SimpleStoragePerformance {
    SimpleStoragePerformance::new(
        &config.storage_parameters().expect("storage parameters"),
        config.control.time_step_hours,
    )
    .expect("performance model")
}

pub fn is_low_hour(t: usize) -> bool {
    t % HOURS_PER_DAY < HOURS_PER_DAY / 2
}

pub fn oscillating_generation(n_timesteps: usize) -> Vec<f64> {
    (0..n_timesteps)
        .map(|t| if is_low_hour(t) { LOW_GENERATION } else { HIGH_GENERATION })
        .collect()
}

pub fn flat_demand(n_timesteps: usize) -> Vec<f64> {
    vec![DEMAND; n_timesteps]
}

/// Sum of `series` over the low-generation hours of `day`.
pub fn low_hour_sum(series: &[f64], day: usize) -> f64 {
    let start = day * HOURS_PER_DAY;
    series[start..start + HOURS_PER_DAY / 2].iter().sum()
}
