use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Local time index set `0..len` shared by every block of one dispatch model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    len: usize,
}

impl TimeWindow {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(DispatchError::EmptyTimeWindow);
        }
        Ok(Self { len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn indices(&self) -> Range<usize> {
        0..self.len
    }

    /// Error unless `values` has one entry per timestep.
    pub fn check_len(&self, name: &str, values: &[f64]) -> Result<()> {
        if values.len() == self.len {
            Ok(())
        } else {
            Err(DispatchError::length_mismatch(name, self.len, values.len()))
        }
    }
}

/// Name of a participating technology, e.g. `battery` or `generator`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechName(String);

impl TechName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TechName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TechName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TechName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommodityInfo {
    pub commodity_name: String,
    pub commodity_storage_units: String,
}

impl Default for CommodityInfo {
    fn default() -> Self {
        Self {
            commodity_name: "electricity".to_string(),
            commodity_storage_units: "kW".to_string(),
        }
    }
}

/// Storage dispatch decided for one control window.
///
/// Both the heuristic rule and the optimizer produce this shape, so
/// reconciliation does not care which strategy ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowDispatch {
    /// First global timestep of the window.
    pub start: usize,
    /// Fractional SOC the window started from.
    pub initial_soc: f64,
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
    /// Fractional SOC at the end of each timestep.
    pub soc: Vec<f64>,
}

impl WindowDispatch {
    /// Net command per timestep: positive discharges, negative charges.
    pub fn commands(&self) -> Vec<f64> {
        self.discharge
            .iter()
            .zip(&self.charge)
            .map(|(d, c)| d - c)
            .collect()
    }

    /// All-zero dispatch holding `initial_soc`.
    pub fn idle(start: usize, initial_soc: f64, len: usize) -> Self {
        Self {
            start,
            initial_soc,
            charge: vec![0.0; len],
            discharge: vec![0.0; len],
            soc: vec![initial_soc; len],
        }
    }
}
