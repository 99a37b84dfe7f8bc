//! System Coupling Layer
//!
//! Binds every technology block into one plant-wide model. Each block port
//! is tied to a system-side variable through an equality arc, generation and
//! load ports are summed into `system_production` and `system_load`, and the
//! objective is the time-weighted sum of every block's operating cost.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::model::{
    round_to, ConstraintSense, LinearExpr, Objective, OptimizationModel, ParamDomain, ParamId,
    Solution, VarId,
};

use super::blocks::{
    BalanceRole, ConverterBlock, PortBindings, PortKind, StorageBlock, StorageParameters,
    TechnologyBlock,
};
use super::window::{TechName, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSettings {
    /// Per-step discount, `tw(t) = factor^t`.
    pub time_weighting_factor: f64,
    pub round_digits: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            time_weighting_factor: 0.995,
            round_digits: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemModel {
    model: OptimizationModel,
    window: TimeWindow,
    blocks: BTreeMap<TechName, TechnologyBlock>,
    bindings: BTreeMap<TechName, PortBindings>,
    system_production: Vec<VarId>,
    system_load: Vec<VarId>,
    commodity_out: Vec<VarId>,
    time_weighting: Vec<ParamId>,
    time_weighting_factor: f64,
    round_digits: u32,
}

impl SystemModel {
    /// Couple `blocks`, all built into `model`, into one dispatch problem.
    pub fn assemble(
        mut model: OptimizationModel,
        window: TimeWindow,
        blocks: BTreeMap<TechName, TechnologyBlock>,
        settings: SystemSettings,
    ) -> Result<Self> {
        if blocks.is_empty() {
            return Err(DispatchError::InvalidConfig(
                "a system needs at least one technology".to_string(),
            ));
        }
        for (name, block) in &blocks {
            if name != block.name() {
                return Err(DispatchError::InvalidConfig(format!(
                    "block {} registered under name {name}",
                    block.name()
                )));
            }
            if block.window() != window {
                return Err(DispatchError::length_mismatch(
                    format!("{name} time window"),
                    window.len(),
                    block.window().len(),
                ));
            }
        }
        check_time_weighting_factor(settings.time_weighting_factor)?;

        let mut time_weighting = Vec::with_capacity(window.len());
        for t in window.indices() {
            time_weighting.push(model.add_param(
                format!("time_weighting_factor[{t}]"),
                ParamDomain::Fraction,
                weight_at(settings.time_weighting_factor, t, settings.round_digits),
            )?);
        }

        let has_storage = blocks.values().any(|b| b.as_storage().is_some());
        let system_production = window
            .indices()
            .map(|t| model.add_non_negative(format!("system_production[{t}]")))
            .collect();
        let system_load = window
            .indices()
            .map(|t| model.add_non_negative(format!("system_load[{t}]")))
            .collect();
        let commodity_out = if has_storage {
            window
                .indices()
                .map(|t| model.add_non_negative(format!("commodity_out[{t}]")))
                .collect()
        } else {
            Vec::new()
        };

        let mut system = Self {
            model,
            window,
            blocks,
            bindings: BTreeMap::new(),
            system_production,
            system_load,
            commodity_out,
            time_weighting,
            time_weighting_factor: settings.time_weighting_factor,
            round_digits: settings.round_digits,
        };
        system.create_arcs()?;
        system.create_balance_constraints()?;
        system.create_min_operating_cost_objective()?;
        debug!(
            technologies = system.blocks.len(),
            stats = ?system.model.stats(),
            "assembled dispatch system"
        );
        Ok(system)
    }

    /// Tie each technology port to its system-side variable.
    fn create_arcs(&mut self) -> Result<()> {
        for (name, block) in &self.blocks {
            let mut bindings = PortBindings::new(name);
            for port in block.ports() {
                if port.vars.len() != self.window.len() {
                    return Err(DispatchError::length_mismatch(
                        format!("{name} {} port", port.kind),
                        self.window.len(),
                        port.vars.len(),
                    ));
                }
                let targets: Vec<VarId> = match port.kind {
                    PortKind::SystemProduction => self.system_production.clone(),
                    PortKind::SystemLoad => self.system_load.clone(),
                    PortKind::CommodityOut => self.commodity_out.clone(),
                    kind => self
                        .window
                        .indices()
                        .map(|t| self.model.add_non_negative(format!("plant_{name}_{kind}[{t}]")))
                        .collect(),
                };
                for (t, (&source, &target)) in port.vars.iter().zip(&targets).enumerate() {
                    self.model.add_constraint(
                        format!("{name}_{}_arc[{t}]", port.kind),
                        LinearExpr::from(source).minus(target, 1.0),
                        ConstraintSense::Equal,
                    );
                }
                bindings.insert(port.kind, targets);
            }
            self.bindings.insert(name.clone(), bindings);
        }
        Ok(())
    }

    fn create_balance_constraints(&mut self) -> Result<()> {
        for t in self.window.indices() {
            let mut production = LinearExpr::from(self.system_production[t]);
            let mut load = LinearExpr::from(self.system_load[t]);
            for bindings in self.bindings.values() {
                for kind in [PortKind::Charge, PortKind::Discharge, PortKind::Production] {
                    if bindings.vars(kind).is_none() {
                        continue;
                    }
                    let var = bindings.var(kind, t)?;
                    match kind.balance_role() {
                        Some(BalanceRole::Generation) => production.add_term(var, -1.0),
                        Some(BalanceRole::Load) => load.add_term(var, -1.0),
                        None => {}
                    }
                }
            }
            self.model.add_constraint(
                format!("production_total[{t}]"),
                production,
                ConstraintSense::Equal,
            );
            self.model
                .add_constraint(format!("load_total[{t}]"), load, ConstraintSense::Equal);
        }
        Ok(())
    }

    /// Build the time-weighted operating cost and attach it, replacing any
    /// objective attached before.
    pub fn create_min_operating_cost_objective(&mut self) -> Result<()> {
        let mut expr = LinearExpr::new();
        for (name, block) in &self.blocks {
            let bindings = self
                .bindings
                .get(name)
                .ok_or_else(|| DispatchError::UnknownTechnology(name.to_string()))?;
            for t in self.window.indices() {
                expr.extend(block.operating_cost(t, bindings, self.time_weighting[t])?);
            }
        }
        self.model.replace_objective(Objective {
            name: "operating_cost".to_string(),
            expr,
        });
        Ok(())
    }

    pub fn set_time_weighting_factor(&mut self, factor: f64) -> Result<()> {
        check_time_weighting_factor(factor)?;
        for (t, &id) in self.time_weighting.iter().enumerate() {
            self.model
                .set_param(id, weight_at(factor, t, self.round_digits))?;
        }
        self.time_weighting_factor = factor;
        Ok(())
    }

    pub fn time_weighting_factor(&self) -> f64 {
        self.time_weighting_factor
    }

    pub fn time_weights(&self) -> Vec<f64> {
        self.time_weighting
            .iter()
            .map(|&id| self.model.param_value(id))
            .collect()
    }

    /// Push one window of forecasts into every block.
    ///
    /// Storage blocks take the demand and `initial_soc`; converters take the
    /// available supply. Returns the checked SOC written to the storage blocks.
    pub fn update_time_series_parameters(
        &mut self,
        commodity_in: &[f64],
        commodity_demand: &[f64],
        time_duration: &[f64],
        initial_soc: f64,
    ) -> Result<Option<f64>> {
        let mut written = None;
        for block in self.blocks.values() {
            match block {
                TechnologyBlock::Storage(storage) => {
                    written = Some(storage.update_time_series_parameters(
                        &mut self.model,
                        commodity_demand,
                        time_duration,
                        initial_soc,
                    )?);
                }
                TechnologyBlock::Converter(converter) => converter.update_time_series_parameters(
                    &mut self.model,
                    commodity_in,
                    time_duration,
                )?,
            }
        }
        Ok(written)
    }

    pub fn set_storage_parameters(
        &mut self,
        name: &TechName,
        params: &StorageParameters,
    ) -> Result<()> {
        let storage = lookup_storage(&self.blocks, name)?;
        storage.apply_parameters(&mut self.model, params)
    }

    pub fn model(&self) -> &OptimizationModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut OptimizationModel {
        &mut self.model
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn blocks(&self) -> &BTreeMap<TechName, TechnologyBlock> {
        &self.blocks
    }

    pub fn block(&self, name: &TechName) -> Result<&TechnologyBlock> {
        self.blocks
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTechnology(name.to_string()))
    }

    pub fn storage(&self, name: &TechName) -> Result<&StorageBlock> {
        lookup_storage(&self.blocks, name)
    }

    pub fn converter(&self, name: &TechName) -> Result<&ConverterBlock> {
        self.block(name)?
            .as_converter()
            .ok_or_else(|| DispatchError::UnknownTechnology(format!("{name} is not a converter")))
    }

    pub fn bindings(&self, name: &TechName) -> Result<&PortBindings> {
        self.bindings
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTechnology(name.to_string()))
    }

    pub fn system_production(&self, solution: &Solution) -> Vec<f64> {
        values(solution, &self.system_production)
    }

    pub fn system_load(&self, solution: &Solution) -> Vec<f64> {
        values(solution, &self.system_load)
    }

    pub fn commodity_out(&self, solution: &Solution) -> Vec<f64> {
        values(solution, &self.commodity_out)
    }

    /// `discharge - charge` of a storage technology, read on the system side.
    pub fn storage_commodity_out(&self, name: &TechName, solution: &Solution) -> Result<Vec<f64>> {
        let bindings = self.bindings(name)?;
        let discharge = bindings
            .vars(PortKind::Discharge)
            .ok_or_else(|| DispatchError::UnknownTechnology(format!("{name} is not storage")))?;
        let charge = bindings
            .vars(PortKind::Charge)
            .ok_or_else(|| DispatchError::UnknownTechnology(format!("{name} is not storage")))?;
        Ok(discharge
            .iter()
            .zip(charge)
            .map(|(&d, &c)| solution.value(d) - solution.value(c))
            .collect())
    }
}

fn lookup_storage<'a>(
    blocks: &'a BTreeMap<TechName, TechnologyBlock>,
    name: &TechName,
) -> Result<&'a StorageBlock> {
    blocks
        .get(name)
        .ok_or_else(|| DispatchError::UnknownTechnology(name.to_string()))?
        .as_storage()
        .ok_or_else(|| DispatchError::UnknownTechnology(format!("{name} is not storage")))
}

fn values(solution: &Solution, vars: &[VarId]) -> Vec<f64> {
    vars.iter().map(|&v| solution.value(v)).collect()
}

fn weight_at(factor: f64, t: usize, round_digits: u32) -> f64 {
    round_to(factor.powi(t as i32), round_digits)
}

fn check_time_weighting_factor(factor: f64) -> Result<()> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(DispatchError::InvalidConfig(format!(
            "time_weighting_factor must be within (0, 1], got {factor}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialSocPolicy;
    use crate::optimizer::blocks::ConverterParameters;
    use crate::optimizer::window::CommodityInfo;

    fn battery_params() -> StorageParameters {
        StorageParameters {
            minimum_storage: 0.0,
            maximum_storage: 200_000.0,
            minimum_soc: 0.1,
            maximum_soc: 0.9,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            max_charge_rate: 50_000.0,
            max_discharge_rate: 50_000.0,
            cost_per_charge: 0.004,
            cost_per_discharge: 0.005,
            commodity_met_value: 0.1,
            initial_soc: 0.5,
        }
    }

    fn assemble(len: usize) -> SystemModel {
        let window = TimeWindow::new(len).unwrap();
        let mut model = OptimizationModel::new();
        let battery = StorageBlock::build(
            &mut model,
            "battery".into(),
            window,
            CommodityInfo::default(),
            &battery_params(),
            4,
            InitialSocPolicy::Clamp,
        )
        .unwrap();
        let generator = ConverterBlock::build(
            &mut model,
            "generator".into(),
            window,
            CommodityInfo::default(),
            &ConverterParameters::default(),
            4,
        )
        .unwrap();
        let blocks = BTreeMap::from([
            (TechName::from("battery"), TechnologyBlock::from(battery)),
            (TechName::from("generator"), TechnologyBlock::from(generator)),
        ]);
        SystemModel::assemble(model, window, blocks, SystemSettings::default()).unwrap()
    }

    #[test]
    fn test_objective_reassembly_does_not_duplicate_terms() {
        let mut system = assemble(4);
        let before = system.model().objective().unwrap().expr.size();
        system.create_min_operating_cost_objective().unwrap();
        system.create_min_operating_cost_objective().unwrap();
        let after = system.model().objective().unwrap().expr.size();
        assert_eq!(before, after);
        // storage: discharge, charge, demand constant, commodity_out; converter: production
        assert_eq!(after, 4 * 5);
    }

    #[test]
    fn test_arcs_and_balance_rows() {
        let system = assemble(3);
        let names: Vec<_> = system
            .model()
            .constraints()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        for expected in [
            "battery_charge_arc[0]",
            "battery_discharge_arc[2]",
            "battery_commodity_out_arc[1]",
            "generator_production_arc[0]",
            "production_total[2]",
            "load_total[0]",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }

        let production_total = system
            .model()
            .constraints()
            .iter()
            .find(|c| c.name == "production_total[0]")
            .unwrap();
        // system_production minus battery discharge and generator production
        assert_eq!(production_total.expr.terms().len(), 3);
    }

    #[test]
    fn test_time_weights_are_rounded_powers() {
        let mut system = assemble(4);
        assert_eq!(system.time_weights(), vec![1.0, 0.995, 0.99, 0.9851]);
        system.set_time_weighting_factor(0.5).unwrap();
        assert_eq!(system.time_weights(), vec![1.0, 0.5, 0.25, 0.125]);
        assert!(system.set_time_weighting_factor(1.5).is_err());
        assert_eq!(system.time_weighting_factor(), 0.5);
    }

    #[test]
    fn test_update_time_series_reaches_every_block() {
        let mut system = assemble(2);
        let written = system
            .update_time_series_parameters(&[1000.0, 10000.0], &[6000.0, 6000.0], &[1.0, 1.0], 0.45)
            .unwrap();
        assert_eq!(written, Some(0.45));

        let generator = system.converter(&"generator".into()).unwrap();
        assert_eq!(generator.available_production(system.model()), vec![1000.0, 10000.0]);
        let battery = system.storage(&"battery".into()).unwrap();
        assert_eq!(battery.commodity_load_demand(system.model()), vec![6000.0, 6000.0]);
        assert_eq!(battery.initial_soc(system.model()), 0.45);

        assert!(system
            .update_time_series_parameters(&[1.0], &[6000.0, 6000.0], &[1.0, 1.0], 0.5)
            .is_err());
    }

    #[test]
    fn test_mismatched_windows_rejected() {
        let mut model = OptimizationModel::new();
        let generator = ConverterBlock::build(
            &mut model,
            "generator".into(),
            TimeWindow::new(3).unwrap(),
            CommodityInfo::default(),
            &ConverterParameters::default(),
            4,
        )
        .unwrap();
        let blocks = BTreeMap::from([(TechName::from("generator"), TechnologyBlock::from(generator))]);
        let result = SystemModel::assemble(
            model,
            TimeWindow::new(4).unwrap(),
            blocks,
            SystemSettings::default(),
        );
        assert!(matches!(result, Err(DispatchError::LengthMismatch { .. })));
    }

    #[test]
    fn test_unknown_storage_lookup() {
        let system = assemble(2);
        assert!(system.storage(&"generator".into()).is_err());
        assert!(system.storage(&"pumped_hydro".into()).is_err());
        assert!(system.storage(&"battery".into()).is_ok());
    }
}
