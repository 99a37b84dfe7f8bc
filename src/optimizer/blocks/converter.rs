use crate::error::{DispatchError, Result};
use crate::model::{
    round_to, Coefficient, LinearExpr, OptimizationModel, ParamDomain, ParamId, Solution, VarId,
    VarKind,
};
use crate::optimizer::window::{CommodityInfo, TechName, TimeWindow};

use super::{Port, PortBindings, PortKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterParameters {
    pub cost_per_production: f64,
}

/// Generic production technology: `0 <= production[t] <= available_production[t]`.
#[derive(Debug, Clone)]
pub struct ConverterBlock {
    name: TechName,
    commodity: CommodityInfo,
    window: TimeWindow,
    round_digits: u32,
    cost_per_production: ParamId,
    available_production: Vec<ParamId>,
    time_duration: Vec<ParamId>,
    production: Vec<VarId>,
}

impl ConverterBlock {
    pub fn build(
        model: &mut OptimizationModel,
        name: TechName,
        window: TimeWindow,
        commodity: CommodityInfo,
        params: &ConverterParameters,
        round_digits: u32,
    ) -> Result<Self> {
        if !(params.cost_per_production.is_finite() && params.cost_per_production >= 0.0) {
            return Err(DispatchError::InvalidConfig(format!(
                "cost_per_production must be non-negative, got {}",
                params.cost_per_production
            )));
        }
        let cost_per_production = model.add_param(
            format!("{name}_cost_per_production"),
            ParamDomain::NonNegative,
            round_to(params.cost_per_production, round_digits),
        )?;

        let mut available_production = Vec::with_capacity(window.len());
        let mut time_duration = Vec::with_capacity(window.len());
        let mut production = Vec::with_capacity(window.len());
        for t in window.indices() {
            let available = model.add_param(
                format!("{name}_available_production[{t}]"),
                ParamDomain::NonNegative,
                0.0,
            )?;
            time_duration.push(model.add_param(
                format!("{name}_time_duration[{t}]"),
                ParamDomain::NonNegative,
                1.0,
            )?);
            production.push(model.add_var(
                format!("{name}_{}[{t}]", commodity.commodity_name),
                VarKind::Continuous,
                Some(0.0.into()),
                Some(Coefficient::param(available)),
            ));
            available_production.push(available);
        }

        Ok(Self {
            name,
            commodity,
            window,
            round_digits,
            cost_per_production,
            available_production,
            time_duration,
            production,
        })
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

    pub fn production_vars(&self) -> &[VarId] {
        &self.production
    }

    pub fn ports(&self) -> Vec<Port> {
        vec![Port {
            kind: PortKind::Production,
            vars: self.production.clone(),
        }]
    }

    /// `tw * dt * cost_per_production * production`
    pub fn operating_cost(
        &self,
        t: usize,
        bindings: &PortBindings,
        time_weighting: ParamId,
    ) -> Result<LinearExpr> {
        let coef = Coefficient::param(time_weighting)
            .times(self.time_duration[t])
            .times(self.cost_per_production);
        Ok(LinearExpr::new().plus(bindings.var(PortKind::Production, t)?, coef))
    }

    pub fn set_available_production(
        &self,
        model: &mut OptimizationModel,
        available: &[f64],
    ) -> Result<()> {
        self.window.check_len("available_production", available)?;
        for (&id, &value) in self.available_production.iter().zip(available) {
            model.set_param(id, round_to(value, self.round_digits))?;
        }
        Ok(())
    }

    pub fn available_production(&self, model: &OptimizationModel) -> Vec<f64> {
        self.available_production
            .iter()
            .map(|&id| model.param_value(id))
            .collect()
    }

    pub fn set_cost_per_production(&self, model: &mut OptimizationModel, cost: f64) -> Result<()> {
        model.set_param(self.cost_per_production, round_to(cost, self.round_digits))
    }

    pub fn set_time_duration(&self, model: &mut OptimizationModel, durations: &[f64]) -> Result<()> {
        self.window.check_len("time_duration", durations)?;
        for (&id, &value) in self.time_duration.iter().zip(durations) {
            model.set_param(id, round_to(value, self.round_digits))?;
        }
        Ok(())
    }

    pub fn update_time_series_parameters(
        &self,
        model: &mut OptimizationModel,
        commodity_in: &[f64],
        time_duration: &[f64],
    ) -> Result<()> {
        self.set_time_duration(model, time_duration)?;
        self.set_available_production(model, commodity_in)
    }

    pub fn production(&self, solution: &Solution) -> Vec<f64> {
        self.production.iter().map(|&v| solution.value(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(len: usize) -> (OptimizationModel, ConverterBlock) {
        let mut model = OptimizationModel::new();
        let block = ConverterBlock::build(
            &mut model,
            TechName::from("generator"),
            TimeWindow::new(len).unwrap(),
            CommodityInfo::default(),
            &ConverterParameters::default(),
            4,
        )
        .unwrap();
        (model, block)
    }

    #[test]
    fn test_production_bounded_by_available_supply() {
        let (mut model, block) = build(2);
        block
            .set_available_production(&mut model, &[1000.0, 10000.00001])
            .unwrap();
        let bounds: Vec<_> = block
            .production_vars()
            .iter()
            .map(|&v| model.bounds(model.variable(v).unwrap()))
            .collect();
        assert_eq!(bounds, vec![(0.0, 1000.0), (0.0, 10000.0)]);
        assert_eq!(model.variable(block.production_vars()[0]).unwrap().name, "generator_electricity[0]");
    }

    #[test]
    fn test_available_production_length_checked() {
        let (mut model, block) = build(3);
        assert!(matches!(
            block.set_available_production(&mut model, &[1.0]),
            Err(DispatchError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_negative_available_production_rejected() {
        let (mut model, block) = build(2);
        assert!(matches!(
            block.set_available_production(&mut model, &[1000.0, -1.0]),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let mut model = OptimizationModel::new();
        let result = ConverterBlock::build(
            &mut model,
            TechName::from("generator"),
            TimeWindow::new(1).unwrap(),
            CommodityInfo::default(),
            &ConverterParameters {
                cost_per_production: -1.0,
            },
            4,
        );
        assert!(result.is_err());
    }
}
