use std::fmt;

use crate::error::{DispatchError, Result};

/// Handle to a mutable parameter inside an [`OptimizationModel`](super::OptimizationModel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Admissible range of a parameter value, checked on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDomain {
    Real,
    NonNegative,
    /// Closed unit interval, e.g. state of charge or efficiency.
    Fraction,
}

impl ParamDomain {
    pub fn contains(self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            ParamDomain::Real => true,
            ParamDomain::NonNegative => value >= 0.0,
            ParamDomain::Fraction => (0.0..=1.0).contains(&value),
        }
    }
}

impl fmt::Display for ParamDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamDomain::Real => write!(f, "finite reals"),
            ParamDomain::NonNegative => write!(f, "[0, inf)"),
            ParamDomain::Fraction => write!(f, "[0, 1]"),
        }
    }
}

#[derive(Debug, Clone)]
struct Parameter {
    name: String,
    domain: ParamDomain,
    value: f64,
}

/// Flat storage for every parameter of a model.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    entries: Vec<Parameter>,
}

impl ParameterTable {
    pub(crate) fn add(&mut self, name: String, domain: ParamDomain, value: f64) -> Result<ParamId> {
        check_domain(&name, domain, value)?;
        self.entries.push(Parameter {
            name,
            domain,
            value,
        });
        Ok(ParamId(self.entries.len() - 1))
    }

    pub(crate) fn set(&mut self, id: ParamId, value: f64) -> Result<()> {
        let entry = self
            .entries
            .get_mut(id.0)
            .ok_or_else(|| DispatchError::InvalidConfig(format!("unknown parameter #{}", id.0)))?;
        check_domain(&entry.name, entry.domain, value)?;
        entry.value = value;
        Ok(())
    }

    pub fn value(&self, id: ParamId) -> f64 {
        self.entries.get(id.0).map(|p| p.value).unwrap_or(f64::NAN)
    }

    pub fn name(&self, id: ParamId) -> Option<&str> {
        self.entries.get(id.0).map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_domain(name: &str, domain: ParamDomain, value: f64) -> Result<()> {
    if domain.contains(value) {
        Ok(())
    } else {
        Err(DispatchError::InvalidConfig(format!(
            "parameter {name} = {value} outside {domain}"
        )))
    }
}

/// Round to a fixed number of decimal digits.
///
/// Every parameter write goes through this so that solver inputs do not
/// drift with floating-point noise from one window to the next.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let rounded = (value * scale).round() / scale;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}
