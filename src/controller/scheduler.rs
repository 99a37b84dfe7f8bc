use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::{ControlStrategy, DispatchConfig, InitialSocPolicy};
use crate::error::{DispatchError, Result};
use crate::model::{round_to, OptimizationModel, Solution};
use crate::optimizer::{
    check_initial_soc, default_optimizer, ConverterBlock, DispatchProblemState, HeuristicDispatch,
    HeuristicMode, Optimizer, SolverOptions, StorageBlock, SystemModel, SystemSettings, TechName,
    TechnologyBlock, TimeWindow, WindowDispatch,
};
use crate::simulation::PerformanceModel;

use super::outputs::{DispatchOutputs, ForecastInputs};

/// Where the scheduler is in its window cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    WindowInit { start: usize },
    Dispatching { start: usize },
    Reconciling { start: usize },
    Done,
}

enum Dispatcher {
    Heuristic(HeuristicDispatch),
    Optimized {
        system: SystemModel,
        optimizer: Box<dyn Optimizer>,
        options: SolverOptions,
    },
}

/// Rolling-horizon dispatch over a full simulation horizon.
///
/// Windows of `n_control_window` timesteps are processed strictly in order:
/// forecasts are pushed into the heuristic or the optimization model, the
/// resulting commands go through the caller's performance model, and the
/// realized SOC at the end of the window seeds the next one.
pub struct RollingHorizonScheduler {
    strategy: ControlStrategy,
    dispatcher: Dispatcher,
    tech: TechName,
    window: TimeWindow,
    n_timesteps: usize,
    time_step_hours: f64,
    round_digits: u32,
    interface_limit: Vec<f64>,
    minimum_soc: f64,
    maximum_soc: f64,
    configured_initial_soc: f64,
    initial_soc: f64,
    state: SchedulerState,
    forecasts: Option<ForecastInputs>,
    outputs: DispatchOutputs,
    problem_state: DispatchProblemState,
    window_starts: Vec<usize>,
    last_dispatch: Option<WindowDispatch>,
    last_solution: Option<Solution>,
}

impl RollingHorizonScheduler {
    /// Build a scheduler, using the default solver backend for the optimized strategy.
    pub fn from_config(config: &DispatchConfig, n_timesteps: usize) -> Result<Self> {
        match config.strategy()? {
            ControlStrategy::Optimized => Self::with_optimizer(config, n_timesteps, default_optimizer()?),
            ControlStrategy::Heuristic => Self::build(config, n_timesteps, None),
        }
    }

    /// Build a scheduler that solves with `optimizer` in optimized mode.
    pub fn with_optimizer(
        config: &DispatchConfig,
        n_timesteps: usize,
        optimizer: Box<dyn Optimizer>,
    ) -> Result<Self> {
        Self::build(config, n_timesteps, Some(optimizer))
    }

    fn build(
        config: &DispatchConfig,
        n_timesteps: usize,
        optimizer: Option<Box<dyn Optimizer>>,
    ) -> Result<Self> {
        config.validate_all()?;
        let strategy = config.strategy()?;
        if n_timesteps == 0 {
            return Err(DispatchError::InvalidConfig(
                "n_timesteps must be positive".to_string(),
            ));
        }
        let control = &config.control;
        let window = TimeWindow::new(control.n_control_window)?;
        let params = config.storage_parameters()?;
        let tech = TechName::from(control.tech_name.as_str());
        let policy = control.initial_soc_policy;
        let initial_soc = check_initial_soc(
            params.initial_soc,
            params.minimum_soc,
            params.maximum_soc,
            control.round_digits,
            policy,
        )?;

        let dispatcher = match (strategy, optimizer) {
            (ControlStrategy::Heuristic, _) => {
                let mode = if control.strategy.contains("load_following") {
                    HeuristicMode::LoadFollowing
                } else {
                    HeuristicMode::FixedDispatch(
                        control
                            .fixed_dispatch
                            .clone()
                            .unwrap_or_else(|| vec![0.0; window.len()]),
                    )
                };
                let mut heuristic =
                    HeuristicDispatch::new(window, &params, mode, control.round_digits, policy)?;
                heuristic.set_time_duration(&vec![control.time_step_hours; window.len()])?;
                Dispatcher::Heuristic(heuristic)
            }
            (ControlStrategy::Optimized, Some(optimizer)) => Dispatcher::Optimized {
                system: Self::build_system(config, window, &tech, policy)?,
                optimizer,
                options: config.solver_options(),
            },
            (ControlStrategy::Optimized, None) => {
                return Err(DispatchError::Solver(
                    "optimized dispatch requested without an optimizer".to_string(),
                ))
            }
        };

        info!(
            strategy = %control.strategy,
            tech = %tech,
            n_timesteps,
            n_control_window = window.len(),
            n_horizon_window = config.n_horizon_window(),
            "dispatch scheduler ready"
        );

        Ok(Self {
            strategy,
            dispatcher,
            tech,
            window,
            n_timesteps,
            time_step_hours: control.time_step_hours,
            round_digits: control.round_digits,
            interface_limit: config.interface_limit()?,
            minimum_soc: params.minimum_soc,
            maximum_soc: params.maximum_soc,
            configured_initial_soc: initial_soc,
            initial_soc,
            state: SchedulerState::Idle,
            forecasts: None,
            outputs: DispatchOutputs::zeros(n_timesteps),
            problem_state: DispatchProblemState::new(),
            window_starts: Vec::new(),
            last_dispatch: None,
            last_solution: None,
        })
    }

    fn build_system(
        config: &DispatchConfig,
        window: TimeWindow,
        tech: &TechName,
        policy: InitialSocPolicy,
    ) -> Result<SystemModel> {
        let control = &config.control;
        let mut model = OptimizationModel::new();
        let mut blocks = BTreeMap::new();

        let storage = StorageBlock::build(
            &mut model,
            tech.clone(),
            window,
            config.commodity.clone(),
            &config.storage_parameters()?,
            control.round_digits,
            policy,
        )?;
        blocks.insert(tech.clone(), TechnologyBlock::from(storage));

        for name in &control.converters {
            let name = TechName::from(name.as_str());
            if blocks.contains_key(&name) {
                return Err(DispatchError::DuplicateTechnology(name.to_string()));
            }
            let converter = ConverterBlock::build(
                &mut model,
                name.clone(),
                window,
                config.commodity.clone(),
                &config.converter_parameters(),
                control.round_digits,
            )?;
            blocks.insert(name, TechnologyBlock::from(converter));
        }

        SystemModel::assemble(
            model,
            window,
            blocks,
            SystemSettings {
                time_weighting_factor: control.time_weighting_factor,
                round_digits: control.round_digits,
            },
        )
    }

    /// Load the forecasts and reset to the first window.
    pub fn start(&mut self, commodity_in: Vec<f64>, commodity_demand: Vec<f64>) -> Result<()> {
        self.forecasts = Some(ForecastInputs::new(
            commodity_in,
            commodity_demand,
            self.n_timesteps,
        )?);
        self.outputs = DispatchOutputs::zeros(self.n_timesteps);
        self.problem_state = DispatchProblemState::new();
        self.window_starts.clear();
        self.last_dispatch = None;
        self.last_solution = None;
        self.initial_soc = self.configured_initial_soc;
        self.state = SchedulerState::WindowInit { start: 0 };
        Ok(())
    }

    /// Process one full window and return the state the scheduler moved to.
    pub fn step(&mut self, performance: &mut dyn PerformanceModel) -> Result<SchedulerState> {
        let start = match self.state {
            SchedulerState::WindowInit { start } => start,
            SchedulerState::Done => return Ok(SchedulerState::Done),
            SchedulerState::Idle => {
                return Err(DispatchError::InvalidConfig(
                    "scheduler has no forecasts, call start first".to_string(),
                ))
            }
            SchedulerState::Dispatching { start } | SchedulerState::Reconciling { start } => {
                return Err(DispatchError::InvalidConfig(format!(
                    "window starting at {start} did not complete"
                )))
            }
        };
        let forecasts = self
            .forecasts
            .take()
            .ok_or_else(|| DispatchError::InvalidConfig("forecasts missing".to_string()))?;
        let result = self.run_window(start, &forecasts, performance);
        self.forecasts = Some(forecasts);
        result?;

        let next = start + self.window.len();
        self.state = if next >= self.n_timesteps {
            info!(
                windows = self.window_starts.len(),
                n_non_optimal_solves = self.problem_state.n_non_optimal_solves(),
                "dispatch complete"
            );
            SchedulerState::Done
        } else {
            SchedulerState::WindowInit { start: next }
        };
        Ok(self.state)
    }

    /// Dispatch the whole horizon.
    pub fn run(
        &mut self,
        performance: &mut dyn PerformanceModel,
        commodity_in: Vec<f64>,
        commodity_demand: Vec<f64>,
    ) -> Result<DispatchOutputs> {
        self.start(commodity_in, commodity_demand)?;
        while self.step(performance)? != SchedulerState::Done {}
        Ok(self.outputs.clone())
    }

    fn run_window(
        &mut self,
        start: usize,
        forecasts: &ForecastInputs,
        performance: &mut dyn PerformanceModel,
    ) -> Result<()> {
        let width = self.window.len();
        let len = width.min(self.n_timesteps - start);
        let (commodity_in, demand) = forecasts.window(start, len, width);
        let durations = vec![self.time_step_hours; width];
        self.window_starts.push(start);
        debug!(start, len, initial_soc = self.initial_soc, "dispatch window");

        self.state = SchedulerState::Dispatching { start };
        let dispatch = self.dispatch_window(start, &commodity_in, &demand, &durations)?;

        self.state = SchedulerState::Reconciling { start };
        let commands: Vec<f64> = dispatch.commands().into_iter().take(len).collect();
        let realized = performance
            .simulate(&commands, start)
            .map_err(|source| DispatchError::PerformanceModel { start, source })?;
        for (name, series) in [("storage_out", &realized.storage_out), ("soc", &realized.soc)] {
            if series.len() != len {
                return Err(DispatchError::length_mismatch(
                    format!("performance model {name}"),
                    len,
                    series.len(),
                ));
            }
        }
        self.outputs.record_window(start, forecasts, &realized);
        if let Some(&last) = realized.soc.last() {
            self.initial_soc = self.carry_soc(last / 100.0);
        }
        self.last_dispatch = Some(dispatch);
        Ok(())
    }

    fn dispatch_window(
        &mut self,
        start: usize,
        commodity_in: &[f64],
        demand: &[f64],
        durations: &[f64],
    ) -> Result<WindowDispatch> {
        let n_days = (self.n_timesteps as f64 * self.time_step_hours / 24.0).floor() as usize;
        let quarter = (self.n_timesteps / 4).max(1);
        let initial_soc = self.initial_soc;

        match &mut self.dispatcher {
            Dispatcher::Heuristic(heuristic) => {
                heuristic.set_initial_soc(initial_soc)?;
                heuristic.set_time_duration(durations)?;
                heuristic.set_fixed_dispatch(start, commodity_in, &self.interface_limit, Some(demand))
            }
            Dispatcher::Optimized {
                system,
                optimizer,
                options,
            } => {
                if start % quarter < self.window.len() {
                    let pct = (start as f64 / self.n_timesteps as f64 * 100.0).round();
                    info!("{pct}% done with dispatch");
                }
                system.update_time_series_parameters(commodity_in, demand, durations, initial_soc)?;
                let outcome = optimizer.solve(system.model(), options)?;
                let record = self.problem_state.store(&outcome.metrics, start, n_days);
                if !record.is_optimal {
                    warn!(
                        start,
                        termination = %record.termination_condition,
                        gap = record.gap,
                        "dispatch solve did not finish optimally"
                    );
                }
                let storage = system.storage(&self.tech)?;
                match outcome.solution {
                    Some(solution) => {
                        let dispatch = storage.dispatch(system.model(), &solution, start);
                        self.last_solution = Some(solution);
                        Ok(dispatch)
                    }
                    None => {
                        warn!(start, "no dispatch solution available, holding storage idle");
                        self.last_solution = None;
                        Ok(WindowDispatch::idle(start, storage.initial_soc(system.model()), self.window.len()))
                    }
                }
            }
        }
    }

    /// SOC handed over to the next window, always kept inside the limits.
    fn carry_soc(&self, soc: f64) -> f64 {
        let soc = round_to(soc, self.round_digits);
        if (self.minimum_soc..=self.maximum_soc).contains(&soc) {
            soc
        } else {
            let clamped = soc.clamp(self.minimum_soc, self.maximum_soc);
            warn!(soc, clamped, "performance model left SOC outside its limits, clamping");
            clamped
        }
    }

    pub fn strategy(&self) -> ControlStrategy {
        self.strategy
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn problem_state(&self) -> &DispatchProblemState {
        &self.problem_state
    }

    pub fn n_non_optimal_solves(&self) -> usize {
        self.problem_state.n_non_optimal_solves()
    }

    /// Fractional SOC the next window starts from.
    pub fn initial_soc(&self) -> f64 {
        self.initial_soc
    }

    pub fn window_starts(&self) -> &[usize] {
        &self.window_starts
    }

    pub fn last_dispatch(&self) -> Option<&WindowDispatch> {
        self.last_dispatch.as_ref()
    }

    /// Raw solver values of the most recent optimized window.
    pub fn last_solution(&self) -> Option<&Solution> {
        self.last_solution.as_ref()
    }

    pub fn outputs(&self) -> &DispatchOutputs {
        &self.outputs
    }

    /// The optimization model in optimized mode.
    pub fn system(&self) -> Option<&SystemModel> {
        match &self.dispatcher {
            Dispatcher::Optimized { system, .. } => Some(system),
            Dispatcher::Heuristic(_) => None,
        }
    }

    pub fn n_timesteps(&self) -> usize {
        self.n_timesteps
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ControlConfig, CostConfig, InterfaceLimit, LoggingConfig, SolverConfig, StorageConfig,
    };
    use crate::model::{ModelStats, Solution};
    use crate::optimizer::solver::MockOptimizer;
    use crate::optimizer::{CommodityInfo, SolveMetrics, SolveOutcome, TerminationCondition};
    use crate::simulation::WindowPerformance;

    fn config(strategy: &str, n_control_window: usize) -> DispatchConfig {
        DispatchConfig {
            control: ControlConfig {
                strategy: strategy.to_string(),
                n_control_window,
                n_horizon_window: None,
                system_commodity_interface_limit: InterfaceLimit::Scalar(1e12),
                time_weighting_factor: 0.995,
                round_digits: 4,
                time_step_hours: 1.0,
                initial_soc_policy: InitialSocPolicy::Clamp,
                fixed_dispatch: None,
                tech_name: "battery".to_string(),
                converters: vec!["generator".to_string()],
            },
            storage: StorageConfig {
                max_capacity: 200_000.0,
                max_charge_rate: 50_000.0,
                max_discharge_rate: None,
                minimum_storage: 0.0,
                min_charge_percent: 0.1,
                max_charge_percent: 0.9,
                init_charge_percent: 0.5,
                charge_efficiency: 0.95,
                discharge_efficiency: 0.95,
                round_trip_efficiency: None,
            },
            costs: CostConfig {
                cost_per_charge: 0.004,
                cost_per_discharge: 0.005,
                cost_per_production: 0.0,
                commodity_met_value: 0.1,
            },
            commodity: CommodityInfo::default(),
            solver: SolverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn metrics(termination: TerminationCondition) -> SolveMetrics {
        SolveMetrics {
            termination,
            solve_time: None,
            wallclock_time: 30.0,
            objective: None,
            lower_bound: Some(1.0),
            upper_bound: None,
            stats: ModelStats::default(),
        }
    }

    /// Echoes commands back with a fixed SOC trajectory in percent.
    fn echo(soc_percent: f64) -> impl FnMut(&[f64], usize) -> anyhow::Result<WindowPerformance> {
        move |commands: &[f64], _start: usize| {
            Ok(WindowPerformance {
                storage_out: commands.to_vec(),
                soc: vec![soc_percent; commands.len()],
            })
        }
    }

    #[test]
    fn test_unknown_strategy_fails_before_any_window() {
        let optimizer = MockOptimizer::new();
        let result = RollingHorizonScheduler::with_optimizer(
            &config("greedy_arbitrage", 24),
            48,
            Box::new(optimizer),
        );
        assert!(matches!(result, Err(DispatchError::NotImplemented(name)) if name == "greedy_arbitrage"));
    }

    #[test]
    fn test_non_optimal_solves_are_recorded_and_run_continues() {
        let mut optimizer = MockOptimizer::new();
        optimizer
            .expect_solve()
            .times(3)
            .returning(|_, _| {
                Ok(SolveOutcome {
                    solution: None,
                    metrics: metrics(TerminationCondition::MaxTimeLimit),
                })
            });
        let mut scheduler =
            RollingHorizonScheduler::with_optimizer(&config("optimized", 24), 72, Box::new(optimizer))
                .unwrap();

        let outputs = scheduler
            .run(&mut echo(50.0), vec![1000.0; 72], vec![6000.0; 72])
            .unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Done);
        assert_eq!(scheduler.n_non_optimal_solves(), 3);
        assert_eq!(scheduler.problem_state().len(), 3);
        let record = &scheduler.problem_state().records()[1];
        assert_eq!(record.start_time, 24);
        assert_eq!(record.n_days, 3);
        assert_eq!(record.gap, f64::INFINITY);
        assert_eq!(record.solve_time, 30.0);
        // idle storage: only generation reaches the demand
        assert!(outputs.storage_commodity_out.iter().all(|&x| x == 0.0));
        assert!(outputs.total_commodity_out.iter().all(|&x| x == 1000.0));
        assert!(outputs.unmet_demand.iter().all(|&x| x == 5000.0));
    }

    #[test]
    fn test_solution_flows_into_reconciliation() {
        let mut optimizer = MockOptimizer::new();
        optimizer.expect_solve().times(2).returning(|model, options| {
            assert_eq!(options.get("time_limit").and_then(|v| v.as_f64()), Some(30.0));
            Ok(SolveOutcome {
                solution: Some(Solution::new(vec![0.0; model.variables().len()])),
                metrics: SolveMetrics {
                    objective: Some(0.0),
                    upper_bound: Some(0.0),
                    lower_bound: Some(0.0),
                    ..metrics(TerminationCondition::Optimal)
                },
            })
        });
        let mut scheduler =
            RollingHorizonScheduler::with_optimizer(&config("optimized", 4), 8, Box::new(optimizer))
                .unwrap();
        scheduler.start(vec![10000.0; 8], vec![6000.0; 8]).unwrap();

        assert_eq!(scheduler.step(&mut echo(42.0)).unwrap(), SchedulerState::WindowInit { start: 4 });
        assert_eq!(scheduler.initial_soc(), 0.42);
        let storage = scheduler
            .system()
            .unwrap()
            .storage(&TechName::from("battery"))
            .unwrap();
        assert_eq!(storage.initial_soc(scheduler.system().unwrap().model()), 0.5);

        assert_eq!(scheduler.step(&mut echo(42.0)).unwrap(), SchedulerState::Done);
        let system = scheduler.system().unwrap();
        let storage = system.storage(&TechName::from("battery")).unwrap();
        assert_eq!(storage.initial_soc(system.model()), 0.42);
        assert_eq!(scheduler.n_non_optimal_solves(), 0);
        assert_eq!(scheduler.outputs().unused_commodity, vec![4000.0; 8]);
        assert_eq!(scheduler.window_starts(), &[0, 4]);
    }

    #[test]
    fn test_final_window_is_truncated() {
        let mut scheduler =
            RollingHorizonScheduler::from_config(&config("heuristic_load_following", 24), 30).unwrap();
        let mut lengths = Vec::new();
        let mut recorder = |commands: &[f64], start: usize| -> anyhow::Result<WindowPerformance> {
            lengths.push((start, commands.len()));
            Ok(WindowPerformance {
                storage_out: commands.to_vec(),
                soc: vec![50.0; commands.len()],
            })
        };
        let outputs = scheduler
            .run(&mut recorder, vec![1000.0; 30], vec![6000.0; 30])
            .unwrap();
        assert_eq!(lengths, vec![(0, 24), (24, 6)]);
        assert_eq!(outputs.len(), 30);
        assert_eq!(scheduler.window_starts(), &[0, 24]);
        assert!(scheduler.problem_state().is_empty());
    }

    #[test]
    fn test_forecast_length_mismatch() {
        let mut scheduler =
            RollingHorizonScheduler::from_config(&config("heuristic_load_following", 24), 48).unwrap();
        let err = scheduler
            .run(&mut echo(50.0), vec![1000.0; 47], vec![6000.0; 48])
            .unwrap_err();
        assert!(matches!(err, DispatchError::LengthMismatch { expected: 48, actual: 47, .. }));
    }

    #[test]
    fn test_performance_model_failure_names_the_window() {
        let mut scheduler =
            RollingHorizonScheduler::from_config(&config("heuristic_load_following", 24), 48).unwrap();
        let mut failing = |_: &[f64], start: usize| -> anyhow::Result<WindowPerformance> {
            if start == 24 {
                anyhow::bail!("thermal limit")
            }
            Ok(WindowPerformance {
                storage_out: vec![0.0; 24],
                soc: vec![50.0; 24],
            })
        };
        let err = scheduler
            .run(&mut failing, vec![1000.0; 48], vec![6000.0; 48])
            .unwrap_err();
        assert!(matches!(err, DispatchError::PerformanceModel { start: 24, .. }));
    }

    #[test]
    fn test_out_of_range_window_soc_is_clamped() {
        let mut scheduler =
            RollingHorizonScheduler::from_config(&config("heuristic_load_following", 24), 48).unwrap();
        scheduler.start(vec![1000.0; 48], vec![6000.0; 48]).unwrap();
        scheduler.step(&mut echo(97.0)).unwrap();
        assert_eq!(scheduler.initial_soc(), 0.9);
    }

    #[test]
    fn test_step_requires_start() {
        let mut scheduler =
            RollingHorizonScheduler::from_config(&config("heuristic_load_following", 24), 48).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.step(&mut echo(50.0)).is_err());
    }

    #[test]
    fn test_duplicate_converter_rejected() {
        let mut config = config("optimized", 24);
        config.control.converters = vec!["battery".to_string()];
        let result =
            RollingHorizonScheduler::with_optimizer(&config, 48, Box::new(MockOptimizer::new()));
        assert!(matches!(result, Err(DispatchError::DuplicateTechnology(_))));
    }
}
