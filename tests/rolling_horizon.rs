#![cfg(feature = "optimization")]
//! Rolling-horizon dispatch solved window by window with HiGHS.

mod common;

use commodity_dispatch::controller::{RollingHorizonScheduler, SchedulerState};
use commodity_dispatch::optimizer::{TechName, TerminationCondition};

use common::*;

#[test]
fn test_full_year_with_oscillating_generation() {
    let n_timesteps = 8760;
    let config = scenario_config("optimized", 0.95);
    let mut battery = battery(&config);
    let mut scheduler = RollingHorizonScheduler::from_config(&config, n_timesteps).unwrap();

    let outputs = scheduler
        .run(
            &mut battery,
            oscillating_generation(n_timesteps),
            flat_demand(n_timesteps),
        )
        .unwrap();

    assert_eq!(outputs.len(), n_timesteps);
    assert_eq!(scheduler.state(), SchedulerState::Done);
    assert_eq!(scheduler.window_starts().len(), 365);
    assert_eq!(scheduler.problem_state().len(), 365);
    assert_eq!(scheduler.n_non_optimal_solves(), 0);

    // the starting charge covers the first night
    for t in 0..12 {
        assert!(outputs.unmet_demand[t] < 1e-3, "unmet at {t}: {}", outputs.unmet_demand[t]);
        assert!((outputs.total_commodity_out[t] - DEMAND).abs() < 1e-3);
    }

    // surplus hours absorb exactly the excess and never miss demand
    for t in (0..n_timesteps).filter(|&t| !is_low_hour(t)) {
        assert!(
            (outputs.storage_commodity_out[t] + 4000.0).abs() < 1.0,
            "storage output at {t}: {}",
            outputs.storage_commodity_out[t]
        );
        assert!(outputs.unmet_demand[t] < 1e-3);
        assert!(outputs.unused_commodity[t] < 1.0);
    }

    // one day of surplus does not refill what a night drains
    let day_two = low_hour_sum(&outputs.unmet_demand, 1);
    assert!(day_two > 600.0 && day_two < 760.0, "day two unmet: {day_two}");
    for day in 2..365 {
        assert!(low_hour_sum(&outputs.unmet_demand, day) > 0.0, "day {day}");
    }

    assert!(outputs.soc.iter().all(|&soc| (10.0 - 1e-6..=90.0 + 1e-6).contains(&soc)));
}

#[test]
fn test_soc_carries_across_windows() {
    let n_timesteps = 96;
    let config = scenario_config("optimized", 0.95);
    let mut battery = battery(&config);
    let mut scheduler = RollingHorizonScheduler::from_config(&config, n_timesteps).unwrap();
    scheduler
        .start(oscillating_generation(n_timesteps), flat_demand(n_timesteps))
        .unwrap();

    let mut carried = scheduler.initial_soc();
    assert_eq!(carried, 0.5);
    loop {
        let state = scheduler.step(&mut battery).unwrap();
        let dispatch = scheduler.last_dispatch().unwrap();
        assert!((dispatch.initial_soc - carried).abs() < 1e-4);

        let last = dispatch.start + HOURS_PER_DAY - 1;
        let realized = scheduler.outputs().soc[last] / 100.0;
        assert!((realized - scheduler.initial_soc()).abs() < 1e-4);
        carried = scheduler.initial_soc();

        if state == SchedulerState::Done {
            break;
        }
    }
    assert_eq!(scheduler.window_starts(), &[0, 24, 48, 72]);
}

#[test]
fn test_solved_windows_respect_storage_limits() {
    let n_timesteps = 96;
    let config = scenario_config("optimized", 0.95);
    let tech = TechName::from(config.control.tech_name.as_str());
    let mut battery = battery(&config);
    let mut scheduler = RollingHorizonScheduler::from_config(&config, n_timesteps).unwrap();
    scheduler
        .start(oscillating_generation(n_timesteps), flat_demand(n_timesteps))
        .unwrap();

    loop {
        let state = scheduler.step(&mut battery).unwrap();
        let storage = scheduler.system().unwrap().storage(&tech).unwrap();
        let solution = scheduler.last_solution().unwrap();
        let dispatch = scheduler.last_dispatch().unwrap();
        let start = dispatch.start;

        let charge = storage.charge(solution);
        let discharge = storage.discharge(solution);
        let is_charging = storage.is_charging(solution);
        let is_discharging = storage.is_discharging(solution);
        for t in 0..charge.len() {
            assert!(
                !(charge[t] > 1e-6 && discharge[t] > 1e-6),
                "window {start} step {t}: charge {} and discharge {}",
                charge[t],
                discharge[t]
            );
            assert!(!(is_charging[t] && is_discharging[t]), "window {start} step {t}");
        }
        for (t, soc) in storage.soc(solution).into_iter().enumerate() {
            assert!(
                (0.1 - 1e-6..=0.9 + 1e-6).contains(&soc),
                "window {start} step {t}: soc {soc}"
            );
        }

        // the storage covers the generation deficit whenever it has charge to give
        let night: f64 = dispatch.discharge[..HOURS_PER_DAY / 2].iter().sum();
        assert!(night > 0.0, "window {start} never discharged at night");
        if start == 0 {
            assert!(dispatch.discharge[..HOURS_PER_DAY / 2].iter().all(|&d| d > 0.0));
        }

        if state == SchedulerState::Done {
            break;
        }
    }
}

#[test]
fn test_lower_efficiency_delivers_less() {
    let n_timesteps = 96;
    let delivered = |efficiency: f64| {
        let config = scenario_config("optimized", efficiency);
        let mut battery = battery(&config);
        let mut scheduler = RollingHorizonScheduler::from_config(&config, n_timesteps).unwrap();
        let outputs = scheduler
            .run(
                &mut battery,
                oscillating_generation(n_timesteps),
                flat_demand(n_timesteps),
            )
            .unwrap();
        (0..n_timesteps / HOURS_PER_DAY)
            .map(|day| low_hour_sum(&outputs.total_commodity_out, day))
            .sum::<f64>()
    };

    let efficient = delivered(0.95);
    let lossy = delivered(0.8);
    assert!(lossy < efficient, "0.8 delivered {lossy}, 0.95 delivered {efficient}");
}

#[test]
fn test_truncated_final_window_and_solve_log() {
    let n_timesteps = 30;
    let config = scenario_config("optimized", 0.95);
    let mut battery = battery(&config);
    let mut scheduler = RollingHorizonScheduler::from_config(&config, n_timesteps).unwrap();
    let outputs = scheduler
        .run(
            &mut battery,
            oscillating_generation(n_timesteps),
            flat_demand(n_timesteps),
        )
        .unwrap();

    assert_eq!(outputs.len(), n_timesteps);
    assert_eq!(scheduler.window_starts(), &[0, 24]);

    let records = scheduler.problem_state().records();
    assert_eq!(records.len(), 2);
    for (record, start) in records.iter().zip([0, 24]) {
        assert_eq!(record.start_time, start);
        assert_eq!(record.n_days, 1);
        assert_eq!(record.termination_condition, TerminationCondition::Optimal);
        assert!(record.is_optimal);
        assert!(record.gap.abs() < 1e-9);
        assert!(record.n_variables > 0 && record.n_constraints > 0);
    }

    let json = scheduler.problem_state().to_json().unwrap();
    assert_eq!(json["n_non_optimal_solves"], 0);
    assert_eq!(json["records"][1]["termination_condition"], "optimal");
}
