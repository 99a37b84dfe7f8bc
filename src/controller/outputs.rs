use serde::Serialize;

use crate::error::{DispatchError, Result};
use crate::simulation::WindowPerformance;

/// Full-horizon forecasts the scheduler slices window by window.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastInputs {
    pub commodity_in: Vec<f64>,
    pub commodity_demand: Vec<f64>,
}

impl ForecastInputs {
    pub fn new(commodity_in: Vec<f64>, commodity_demand: Vec<f64>, n_timesteps: usize) -> Result<Self> {
        for (name, series) in [("commodity_in", &commodity_in), ("commodity_demand", &commodity_demand)] {
            if series.len() != n_timesteps {
                return Err(DispatchError::length_mismatch(name, n_timesteps, series.len()));
            }
            if let Some((t, value)) = series
                .iter()
                .enumerate()
                .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
            {
                return Err(DispatchError::InvalidConfig(format!(
                    "{name}[{t}] must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(Self {
            commodity_in,
            commodity_demand,
        })
    }

    /// `[start, start + len)` of both series, zero-padded to `width`.
    pub(crate) fn window(&self, start: usize, len: usize, width: usize) -> (Vec<f64>, Vec<f64>) {
        let slice = |series: &[f64]| {
            let mut out = series[start..start + len].to_vec();
            out.resize(width, 0.0);
            out
        };
        (slice(&self.commodity_in), slice(&self.commodity_demand))
    }
}

/// Delivery balance of one timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestepBalance {
    pub total_commodity_out: f64,
    pub unmet_demand: f64,
    pub unused_commodity: f64,
}

impl TimestepBalance {
    pub fn compute(demand: f64, generation: f64, storage_out: f64) -> Self {
        let supply = storage_out + generation;
        let total_commodity_out = demand.min(supply);
        Self {
            total_commodity_out,
            unmet_demand: (demand - total_commodity_out).max(0.0),
            unused_commodity: (supply - demand).max(0.0),
        }
    }
}

/// Full-horizon results, written one window at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchOutputs {
    pub total_commodity_out: Vec<f64>,
    pub storage_commodity_out: Vec<f64>,
    pub unmet_demand: Vec<f64>,
    pub unused_commodity: Vec<f64>,
    /// State of charge in percent, as reported by the performance model.
    pub soc: Vec<f64>,
}

impl DispatchOutputs {
    pub fn zeros(n_timesteps: usize) -> Self {
        Self {
            total_commodity_out: vec![0.0; n_timesteps],
            storage_commodity_out: vec![0.0; n_timesteps],
            unmet_demand: vec![0.0; n_timesteps],
            unused_commodity: vec![0.0; n_timesteps],
            soc: vec![0.0; n_timesteps],
        }
    }

    pub fn len(&self) -> usize {
        self.total_commodity_out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_commodity_out.is_empty()
    }

    /// Write the realized window starting at `start`.
    pub(crate) fn record_window(
        &mut self,
        start: usize,
        forecasts: &ForecastInputs,
        realized: &WindowPerformance,
    ) {
        for (offset, (&storage_out, &soc)) in realized.storage_out.iter().zip(&realized.soc).enumerate() {
            let t = start + offset;
            let balance = TimestepBalance::compute(
                forecasts.commodity_demand[t],
                forecasts.commodity_in[t],
                storage_out,
            );
            self.storage_commodity_out[t] = storage_out;
            self.soc[t] = soc;
            self.total_commodity_out[t] = balance.total_commodity_out;
            self.unmet_demand[t] = balance.unmet_demand;
            self.unused_commodity[t] = balance.unused_commodity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::deficit(6000.0, 1000.0, 4000.0, 5000.0, 1000.0, 0.0)]
    #[case::surplus(6000.0, 10000.0, -2000.0, 6000.0, 0.0, 2000.0)]
    #[case::exact(6000.0, 10000.0, -4000.0, 6000.0, 0.0, 0.0)]
    fn test_balance(
        #[case] demand: f64,
        #[case] generation: f64,
        #[case] storage_out: f64,
        #[case] total: f64,
        #[case] unmet: f64,
        #[case] unused: f64,
    ) {
        let balance = TimestepBalance::compute(demand, generation, storage_out);
        assert_eq!(balance.total_commodity_out, total);
        assert_eq!(balance.unmet_demand, unmet);
        assert_eq!(balance.unused_commodity, unused);
    }

    proptest! {
        #[test]
        fn prop_balance_is_non_negative_and_closes(
            demand in 0.0f64..1e5,
            generation in 0.0f64..1e5,
            storage_out in -1e5f64..1e5,
        ) {
            let b = TimestepBalance::compute(demand, generation, storage_out);
            prop_assert!(b.unmet_demand >= 0.0);
            prop_assert!(b.unused_commodity >= 0.0);
            prop_assert!(b.total_commodity_out <= demand);
            if storage_out + generation < demand {
                prop_assert!((b.unmet_demand + b.total_commodity_out - demand).abs() < 1e-6);
            } else {
                prop_assert_eq!(b.unmet_demand, 0.0);
            }
        }
    }

    #[test]
    fn test_forecast_window_is_zero_padded() {
        let forecasts = ForecastInputs::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], 3).unwrap();
        let (generation, demand) = forecasts.window(2, 1, 3);
        assert_eq!(generation, vec![3.0, 0.0, 0.0]);
        assert_eq!(demand, vec![6.0, 0.0, 0.0]);
    }

    #[test]
    fn test_forecast_lengths_checked() {
        let err = ForecastInputs::new(vec![1.0; 3], vec![1.0; 4], 4).unwrap_err();
        assert!(matches!(err, DispatchError::LengthMismatch { expected: 4, actual: 3, .. }));
        assert!(ForecastInputs::new(vec![f64::NAN], vec![1.0], 1).is_err());
    }

    #[test]
    fn test_negative_forecasts_rejected() {
        let err = ForecastInputs::new(vec![1000.0, -5.0], vec![6000.0; 2], 2).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(msg) if msg.contains("commodity_in[1]")));
        assert!(ForecastInputs::new(vec![0.0; 2], vec![6000.0, -1.0], 2).is_err());
    }

    #[test]
    fn test_record_window_writes_only_its_slice() {
        let forecasts = ForecastInputs::new(vec![1000.0; 4], vec![6000.0; 4], 4).unwrap();
        let mut outputs = DispatchOutputs::zeros(4);
        outputs.record_window(
            2,
            &forecasts,
            &WindowPerformance {
                storage_out: vec![5000.0, 2000.0],
                soc: vec![40.0, 35.0],
            },
        );
        assert_eq!(outputs.total_commodity_out, vec![0.0, 0.0, 6000.0, 3000.0]);
        assert_eq!(outputs.unmet_demand, vec![0.0, 0.0, 0.0, 3000.0]);
        assert_eq!(outputs.soc, vec![0.0, 0.0, 40.0, 35.0]);
    }
}
