use tracing::warn;

use crate::config::{normalize_efficiency, InitialSocPolicy};
use crate::error::{DispatchError, Result};
use crate::model::{
    round_to, Coefficient, ConstraintSense, LinearExpr, OptimizationModel, ParamDomain, ParamId,
    Solution, VarId, VarKind,
};
use crate::optimizer::window::{CommodityInfo, TechName, TimeWindow, WindowDispatch};

use super::{Port, PortBindings, PortKind};

/// Physical and economic parameters of a storage technology.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageParameters {
    pub minimum_storage: f64,
    /// Capacity the SOC is normalized against.
    pub maximum_storage: f64,
    pub minimum_soc: f64,
    pub maximum_soc: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub max_charge_rate: f64,
    pub max_discharge_rate: f64,
    pub cost_per_charge: f64,
    pub cost_per_discharge: f64,
    pub commodity_met_value: f64,
    /// Fraction, or percent when above 1.
    pub initial_soc: f64,
}

impl StorageParameters {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("maximum_storage", self.maximum_storage),
            ("max_charge_rate", self.max_charge_rate),
            ("max_discharge_rate", self.max_discharge_rate),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DispatchError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("minimum_storage", self.minimum_storage),
            ("cost_per_charge", self.cost_per_charge),
            ("cost_per_discharge", self.cost_per_discharge),
            ("commodity_met_value", self.commodity_met_value),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(DispatchError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("minimum_soc", self.minimum_soc),
            ("maximum_soc", self.maximum_soc),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DispatchError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.minimum_soc > self.maximum_soc {
            return Err(DispatchError::InvalidConfig(format!(
                "minimum_soc {} exceeds maximum_soc {}",
                self.minimum_soc, self.maximum_soc
            )));
        }
        if self.minimum_storage > self.max_charge_rate.min(self.max_discharge_rate) {
            return Err(DispatchError::InvalidConfig(format!(
                "minimum_storage {} exceeds the charge/discharge rate",
                self.minimum_storage
            )));
        }
        for (name, value) in [
            ("charge_efficiency", self.charge_efficiency),
            ("discharge_efficiency", self.discharge_efficiency),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(DispatchError::InvalidConfig(format!(
                    "{name} must be within (0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Normalize, round and bound-check an initial state of charge.
///
/// Values above 1 are read as percent. Out-of-range values are clamped with
/// a warning under [`InitialSocPolicy::Clamp`] and rejected under
/// [`InitialSocPolicy::Reject`].
pub fn check_initial_soc(
    initial_soc: f64,
    minimum_soc: f64,
    maximum_soc: f64,
    round_digits: u32,
    policy: InitialSocPolicy,
) -> Result<f64> {
    if !initial_soc.is_finite() {
        return Err(DispatchError::InvalidConfig(format!(
            "initial state of charge must be finite, got {initial_soc}"
        )));
    }
    let fraction = if initial_soc > 1.0 {
        initial_soc / 100.0
    } else {
        initial_soc
    };
    let soc = round_to(fraction, round_digits);
    if (minimum_soc..=maximum_soc).contains(&soc) {
        return Ok(soc);
    }
    match policy {
        InitialSocPolicy::Reject => Err(DispatchError::InitialSocOutOfRange {
            value: soc,
            min: minimum_soc,
            max: maximum_soc,
        }),
        InitialSocPolicy::Clamp => {
            let clamped = soc.clamp(minimum_soc, maximum_soc);
            warn!(
                initial_soc = soc,
                clamped, "storage dispatch initialized outside its SOC limits, clamping"
            );
            Ok(clamped)
        }
    }
}

/// Decision variables of one storage timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageVars {
    pub charge: VarId,
    pub discharge: VarId,
    pub soc: VarId,
    pub soc0: VarId,
    pub is_charging: VarId,
    pub is_discharging: VarId,
    pub system_production: VarId,
    pub system_load: VarId,
    pub commodity_out: VarId,
    pub is_generating: VarId,
}

#[derive(Debug, Clone)]
struct ScalarParams {
    minimum_storage: ParamId,
    maximum_storage: ParamId,
    minimum_soc: ParamId,
    maximum_soc: ParamId,
    charge_efficiency: ParamId,
    discharge_efficiency: ParamId,
    max_charge: ParamId,
    max_discharge: ParamId,
    cost_per_charge: ParamId,
    cost_per_discharge: ParamId,
    commodity_met_value: ParamId,
    initial_soc: ParamId,
}

/// Charge, discharge and state of charge of one storage asset over a window.
///
/// The state of charge follows
/// `soc[t] = soc0[t] + dt[t] * (ce * charge[t] - discharge[t] / de) / maximum_storage`,
/// with `soc0[0]` pinned to the `initial_soc` parameter and `soc0[t] = soc[t-1]`.
/// Binary flags keep charging and discharging mutually exclusive.
#[derive(Debug, Clone)]
pub struct StorageBlock {
    name: TechName,
    commodity: CommodityInfo,
    window: TimeWindow,
    round_digits: u32,
    policy: InitialSocPolicy,
    scalars: ScalarParams,
    time_duration: Vec<ParamId>,
    commodity_load_demand: Vec<ParamId>,
    load_production_limit: Vec<ParamId>,
    vars: Vec<StorageVars>,
}

impl StorageBlock {
    pub fn build(
        model: &mut OptimizationModel,
        name: TechName,
        window: TimeWindow,
        commodity: CommodityInfo,
        params: &StorageParameters,
        round_digits: u32,
        policy: InitialSocPolicy,
    ) -> Result<Self> {
        params.validate()?;
        let r = |v: f64| round_to(v, round_digits);
        let initial_soc = check_initial_soc(
            params.initial_soc,
            params.minimum_soc,
            params.maximum_soc,
            round_digits,
            policy,
        )?;

        let mut scalar = |label: &str, domain: ParamDomain, value: f64| {
            model.add_param(format!("{name}_{label}"), domain, r(value))
        };
        let scalars = ScalarParams {
            minimum_storage: scalar("minimum_storage", ParamDomain::NonNegative, params.minimum_storage)?,
            maximum_storage: scalar("maximum_storage", ParamDomain::NonNegative, params.maximum_storage)?,
            minimum_soc: scalar("minimum_soc", ParamDomain::Fraction, params.minimum_soc)?,
            maximum_soc: scalar("maximum_soc", ParamDomain::Fraction, params.maximum_soc)?,
            charge_efficiency: scalar("charge_efficiency", ParamDomain::Fraction, params.charge_efficiency)?,
            discharge_efficiency: scalar("discharge_efficiency", ParamDomain::Fraction, params.discharge_efficiency)?,
            max_charge: scalar("max_charge", ParamDomain::NonNegative, params.max_charge_rate)?,
            max_discharge: scalar("max_discharge", ParamDomain::NonNegative, params.max_discharge_rate)?,
            cost_per_charge: scalar("cost_per_charge", ParamDomain::NonNegative, params.cost_per_charge)?,
            cost_per_discharge: scalar("cost_per_discharge", ParamDomain::NonNegative, params.cost_per_discharge)?,
            commodity_met_value: scalar("commodity_met_value", ParamDomain::NonNegative, params.commodity_met_value)?,
            initial_soc: scalar("initial_soc", ParamDomain::Fraction, initial_soc)?,
        };

        let mut time_duration = Vec::with_capacity(window.len());
        let mut commodity_load_demand = Vec::with_capacity(window.len());
        let mut load_production_limit = Vec::with_capacity(window.len());
        for t in window.indices() {
            time_duration.push(model.add_param(
                format!("{name}_time_duration[{t}]"),
                ParamDomain::NonNegative,
                1.0,
            )?);
            commodity_load_demand.push(model.add_param(
                format!("{name}_commodity_load_demand[{t}]"),
                ParamDomain::NonNegative,
                0.0,
            )?);
            load_production_limit.push(model.add_param(
                format!("{name}_load_production_limit[{t}]"),
                ParamDomain::NonNegative,
                0.0,
            )?);
        }

        let mut block = Self {
            name,
            commodity,
            window,
            round_digits,
            policy,
            scalars,
            time_duration,
            commodity_load_demand,
            load_production_limit,
            vars: Vec::with_capacity(window.len()),
        };
        for t in window.indices() {
            let vars = block.create_variables(model, t);
            block.vars.push(vars);
            block.create_constraints(model, t);
        }
        block.create_soc_linking(model);
        Ok(block)
    }

    fn create_variables(&self, model: &mut OptimizationModel, t: usize) -> StorageVars {
        let name = &self.name;
        let soc_lower = Some(Coefficient::param(self.scalars.minimum_soc));
        let soc_upper = Some(Coefficient::param(self.scalars.maximum_soc));
        StorageVars {
            charge: model.add_non_negative(format!("{name}_charge[{t}]")),
            discharge: model.add_non_negative(format!("{name}_discharge[{t}]")),
            soc: model.add_var(
                format!("{name}_soc[{t}]"),
                VarKind::Continuous,
                soc_lower.clone(),
                soc_upper.clone(),
            ),
            soc0: model.add_var(
                format!("{name}_soc0[{t}]"),
                VarKind::Continuous,
                soc_lower,
                soc_upper,
            ),
            is_charging: model.add_binary(format!("{name}_is_charging[{t}]")),
            is_discharging: model.add_binary(format!("{name}_is_discharging[{t}]")),
            system_production: model.add_non_negative(format!("{name}_system_production[{t}]")),
            system_load: model.add_non_negative(format!("{name}_system_load[{t}]")),
            commodity_out: model.add_var(
                format!("{name}_commodity_out[{t}]"),
                VarKind::Continuous,
                Some(0.0.into()),
                Some(Coefficient::param(self.commodity_load_demand[t])),
            ),
            is_generating: model.add_binary(format!("{name}_is_generating[{t}]")),
        }
    }

    fn create_constraints(&self, model: &mut OptimizationModel, t: usize) {
        let name = &self.name;
        let v = self.vars[t];
        let s = &self.scalars;

        model.add_constraint(
            format!("{name}_charge_upper[{t}]"),
            LinearExpr::from(v.charge).minus(v.is_charging, s.max_charge),
            ConstraintSense::LessEqual,
        );
        model.add_constraint(
            format!("{name}_charge_lower[{t}]"),
            LinearExpr::from(v.charge).minus(v.is_charging, s.minimum_storage),
            ConstraintSense::GreaterEqual,
        );
        model.add_constraint(
            format!("{name}_discharge_upper[{t}]"),
            LinearExpr::from(v.discharge).minus(v.is_discharging, s.max_discharge),
            ConstraintSense::LessEqual,
        );
        model.add_constraint(
            format!("{name}_discharge_lower[{t}]"),
            LinearExpr::from(v.discharge).minus(v.is_discharging, s.minimum_storage),
            ConstraintSense::GreaterEqual,
        );
        model.add_constraint(
            format!("{name}_charge_discharge_packing[{t}]"),
            LinearExpr::from(v.is_charging)
                .plus(v.is_discharging, 1.0)
                .plus_constant(-1.0),
            ConstraintSense::LessEqual,
        );
        model.add_constraint(
            format!("{name}_balance[{t}]"),
            LinearExpr::from(v.commodity_out)
                .minus(v.system_production, 1.0)
                .plus(v.system_load, 1.0),
            ConstraintSense::Equal,
        );
        model.add_constraint(
            format!("{name}_generation_gate[{t}]"),
            LinearExpr::from(v.commodity_out).minus(v.is_generating, self.commodity_load_demand[t]),
            ConstraintSense::LessEqual,
        );

        let dt = self.time_duration[t];
        model.add_constraint(
            format!("{name}_soc_inventory[{t}]"),
            LinearExpr::from(v.soc)
                .minus(v.soc0, 1.0)
                .minus(
                    v.charge,
                    Coefficient::param(dt)
                        .times(s.charge_efficiency)
                        .per(s.maximum_storage),
                )
                .plus(
                    v.discharge,
                    Coefficient::param(dt)
                        .per(s.discharge_efficiency)
                        .per(s.maximum_storage),
                ),
            ConstraintSense::Equal,
        );
    }

    fn create_soc_linking(&self, model: &mut OptimizationModel) {
        for t in self.window.indices() {
            let expr = if t == 0 {
                LinearExpr::from(self.vars[0].soc0).minus_constant(self.scalars.initial_soc)
            } else {
                LinearExpr::from(self.vars[t].soc0).minus(self.vars[t - 1].soc, 1.0)
            };
            model.add_constraint(
                format!("{}_soc_linking[{t}]", self.name),
                expr,
                ConstraintSense::Equal,
            );
        }
    }

    pub fn name(&self) -> &TechName {
        &self.name
    }

    pub fn commodity(&self) -> &CommodityInfo {
        &self.commodity
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn round_digits(&self) -> u32 {
        self.round_digits
    }

    pub fn vars(&self) -> &[StorageVars] {
        &self.vars
    }

    pub fn ports(&self) -> Vec<Port> {
        let collect = |f: fn(&StorageVars) -> VarId| self.vars.iter().map(f).collect::<Vec<_>>();
        vec![
            Port { kind: PortKind::Charge, vars: collect(|v| v.charge) },
            Port { kind: PortKind::Discharge, vars: collect(|v| v.discharge) },
            Port { kind: PortKind::SystemProduction, vars: collect(|v| v.system_production) },
            Port { kind: PortKind::SystemLoad, vars: collect(|v| v.system_load) },
            Port { kind: PortKind::CommodityOut, vars: collect(|v| v.commodity_out) },
        ]
    }

    /// `dt * tw * (cost_per_discharge * discharge - cost_per_charge * charge
    ///  + (demand - commodity_out) * commodity_met_value)`
    pub fn operating_cost(
        &self,
        t: usize,
        bindings: &PortBindings,
        time_weighting: ParamId,
    ) -> Result<LinearExpr> {
        let s = &self.scalars;
        let weight = Coefficient::param(time_weighting).times(self.time_duration[t]);
        Ok(LinearExpr::new()
            .plus(
                bindings.var(PortKind::Discharge, t)?,
                weight.clone().times(s.cost_per_discharge),
            )
            .minus(
                bindings.var(PortKind::Charge, t)?,
                weight.clone().times(s.cost_per_charge),
            )
            .plus_constant(
                weight
                    .clone()
                    .times(self.commodity_load_demand[t])
                    .times(s.commodity_met_value),
            )
            .minus(
                bindings.var(PortKind::CommodityOut, t)?,
                weight.times(s.commodity_met_value),
            ))
    }

    /// Push scalar parameters, e.g. after a capacity change.
    pub fn apply_parameters(
        &self,
        model: &mut OptimizationModel,
        params: &StorageParameters,
    ) -> Result<()> {
        params.validate()?;
        let s = &self.scalars;
        let r = |v: f64| round_to(v, self.round_digits);
        model.set_param(s.minimum_storage, r(params.minimum_storage))?;
        model.set_param(s.maximum_storage, r(params.maximum_storage))?;
        model.set_param(s.minimum_soc, r(params.minimum_soc))?;
        model.set_param(s.maximum_soc, r(params.maximum_soc))?;
        model.set_param(s.charge_efficiency, r(params.charge_efficiency))?;
        model.set_param(s.discharge_efficiency, r(params.discharge_efficiency))?;
        model.set_param(s.max_charge, r(params.max_charge_rate))?;
        model.set_param(s.max_discharge, r(params.max_discharge_rate))?;
        model.set_param(s.cost_per_charge, r(params.cost_per_charge))?;
        model.set_param(s.cost_per_discharge, r(params.cost_per_discharge))?;
        model.set_param(s.commodity_met_value, r(params.commodity_met_value))?;
        self.set_initial_soc(model, params.initial_soc)?;
        Ok(())
    }

    /// Current parameter values.
    pub fn parameters(&self, model: &OptimizationModel) -> StorageParameters {
        let s = &self.scalars;
        let v = |id| model.param_value(id);
        StorageParameters {
            minimum_storage: v(s.minimum_storage),
            maximum_storage: v(s.maximum_storage),
            minimum_soc: v(s.minimum_soc),
            maximum_soc: v(s.maximum_soc),
            charge_efficiency: v(s.charge_efficiency),
            discharge_efficiency: v(s.discharge_efficiency),
            max_charge_rate: v(s.max_charge),
            max_discharge_rate: v(s.max_discharge),
            cost_per_charge: v(s.cost_per_charge),
            cost_per_discharge: v(s.cost_per_discharge),
            commodity_met_value: v(s.commodity_met_value),
            initial_soc: v(s.initial_soc),
        }
    }

    /// Sets both efficiencies to the square root of `round_trip_efficiency`.
    pub fn set_round_trip_efficiency(
        &self,
        model: &mut OptimizationModel,
        round_trip_efficiency: f64,
    ) -> Result<()> {
        let each = normalize_efficiency(round_trip_efficiency)?.sqrt();
        let each = round_to(each, self.round_digits);
        model.set_param(self.scalars.charge_efficiency, each)?;
        model.set_param(self.scalars.discharge_efficiency, each)
    }

    pub fn round_trip_efficiency(&self, model: &OptimizationModel) -> f64 {
        model.param_value(self.scalars.charge_efficiency)
            * model.param_value(self.scalars.discharge_efficiency)
    }

    /// Checks and writes the SOC the window starts from; returns the value written.
    pub fn set_initial_soc(&self, model: &mut OptimizationModel, initial_soc: f64) -> Result<f64> {
        let soc = check_initial_soc(
            initial_soc,
            model.param_value(self.scalars.minimum_soc),
            model.param_value(self.scalars.maximum_soc),
            self.round_digits,
            self.policy,
        )?;
        model.set_param(self.scalars.initial_soc, soc)?;
        Ok(soc)
    }

    pub fn initial_soc(&self, model: &OptimizationModel) -> f64 {
        model.param_value(self.scalars.initial_soc)
    }

    pub fn set_time_duration(&self, model: &mut OptimizationModel, durations: &[f64]) -> Result<()> {
        self.set_series(model, "time_duration", &self.time_duration, durations)
    }

    pub fn set_commodity_load_demand(
        &self,
        model: &mut OptimizationModel,
        demand: &[f64],
    ) -> Result<()> {
        self.set_series(model, "commodity_load_demand", &self.commodity_load_demand, demand)?;
        self.set_series(model, "load_production_limit", &self.load_production_limit, demand)
    }

    pub fn commodity_load_demand(&self, model: &OptimizationModel) -> Vec<f64> {
        self.series(model, &self.commodity_load_demand)
    }

    pub fn load_production_limit(&self, model: &OptimizationModel) -> Vec<f64> {
        self.series(model, &self.load_production_limit)
    }

    pub fn time_duration(&self, model: &OptimizationModel) -> Vec<f64> {
        self.series(model, &self.time_duration)
    }

    /// Refresh everything that changes between windows.
    pub fn update_time_series_parameters(
        &self,
        model: &mut OptimizationModel,
        commodity_demand: &[f64],
        time_duration: &[f64],
        initial_soc: f64,
    ) -> Result<f64> {
        self.set_time_duration(model, time_duration)?;
        self.set_commodity_load_demand(model, commodity_demand)?;
        self.set_initial_soc(model, initial_soc)
    }

    fn set_series(
        &self,
        model: &mut OptimizationModel,
        label: &str,
        ids: &[ParamId],
        values: &[f64],
    ) -> Result<()> {
        self.window.check_len(label, values)?;
        for (&id, &value) in ids.iter().zip(values) {
            model.set_param(id, round_to(value, self.round_digits))?;
        }
        Ok(())
    }

    fn series(&self, model: &OptimizationModel, ids: &[ParamId]) -> Vec<f64> {
        ids.iter().map(|&id| model.param_value(id)).collect()
    }

    fn read(&self, solution: &Solution, f: fn(&StorageVars) -> VarId) -> Vec<f64> {
        self.vars.iter().map(|v| solution.value(f(v))).collect()
    }

    pub fn soc(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.soc)
    }

    pub fn soc0(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.soc0)
    }

    pub fn charge(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.charge)
    }

    pub fn discharge(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.discharge)
    }

    pub fn is_charging(&self, solution: &Solution) -> Vec<bool> {
        self.read(solution, |v| v.is_charging)
            .into_iter()
            .map(|x| x > 0.5)
            .collect()
    }

    pub fn is_discharging(&self, solution: &Solution) -> Vec<bool> {
        self.read(solution, |v| v.is_discharging)
            .into_iter()
            .map(|x| x > 0.5)
            .collect()
    }

    pub fn is_generating(&self, solution: &Solution) -> Vec<bool> {
        self.read(solution, |v| v.is_generating)
            .into_iter()
            .map(|x| x > 0.5)
            .collect()
    }

    pub fn system_production(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.system_production)
    }

    pub fn system_load(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.system_load)
    }

    pub fn commodity_out(&self, solution: &Solution) -> Vec<f64> {
        self.read(solution, |v| v.commodity_out)
    }

    /// `discharge - charge` per timestep.
    pub fn storage_output(&self, solution: &Solution) -> Vec<f64> {
        self.discharge(solution)
            .into_iter()
            .zip(self.charge(solution))
            .map(|(d, c)| d - c)
            .collect()
    }

    /// Solved dispatch in the strategy-neutral shape.
    ///
    /// Solver noise is trimmed: negative flows become zero and SOC is
    /// clamped into the current limits.
    pub fn dispatch(&self, model: &OptimizationModel, solution: &Solution, start: usize) -> WindowDispatch {
        let min_soc = model.param_value(self.scalars.minimum_soc);
        let max_soc = model.param_value(self.scalars.maximum_soc);
        WindowDispatch {
            start,
            initial_soc: self.initial_soc(model),
            charge: self.charge(solution).into_iter().map(|x| x.max(0.0)).collect(),
            discharge: self.discharge(solution).into_iter().map(|x| x.max(0.0)).collect(),
            soc: self
                .soc(solution)
                .into_iter()
                .map(|x| x.clamp(min_soc, max_soc))
                .collect(),
        }
    }
}
