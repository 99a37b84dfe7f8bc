use std::ops::{Mul, Neg};

use super::params::{ParamId, ParameterTable};
use super::VarId;

/// A coefficient that depends on parameter values.
///
/// Represents `factor * p1^e1 * p2^e2 * ...` with each exponent `+1` or `-1`.
/// Expressions hold coefficients symbolically so that a model built once
/// can be re-parameterized for every control window.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    factor: f64,
    params: Vec<(ParamId, i32)>,
}

impl Coefficient {
    pub fn constant(value: f64) -> Self {
        Self {
            factor: value,
            params: Vec::new(),
        }
    }

    pub fn param(id: ParamId) -> Self {
        Self {
            factor: 1.0,
            params: vec![(id, 1)],
        }
    }

    /// Multiply by a parameter.
    pub fn times(mut self, id: ParamId) -> Self {
        self.params.push((id, 1));
        self
    }

    /// Divide by a parameter.
    pub fn per(mut self, id: ParamId) -> Self {
        self.params.push((id, -1));
        self
    }

    pub fn is_constant(&self) -> bool {
        self.params.is_empty()
    }

    pub fn evaluate(&self, table: &ParameterTable) -> f64 {
        self.params
            .iter()
            .fold(self.factor, |acc, &(id, exp)| acc * table.value(id).powi(exp))
    }
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Coefficient::constant(value)
    }
}

impl From<ParamId> for Coefficient {
    fn from(id: ParamId) -> Self {
        Coefficient::param(id)
    }
}

impl Mul<f64> for Coefficient {
    type Output = Coefficient;

    fn mul(mut self, rhs: f64) -> Self::Output {
        self.factor *= rhs;
        self
    }
}

impl Neg for Coefficient {
    type Output = Coefficient;

    fn neg(self) -> Self::Output {
        self * -1.0
    }
}

/// `Σ coefficient * variable + Σ constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, Coefficient)>,
    constants: Vec<Coefficient>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plus(mut self, var: VarId, coef: impl Into<Coefficient>) -> Self {
        self.terms.push((var, coef.into()));
        self
    }

    pub fn minus(self, var: VarId, coef: impl Into<Coefficient>) -> Self {
        let coef = -coef.into();
        self.plus(var, coef)
    }

    pub fn plus_constant(mut self, coef: impl Into<Coefficient>) -> Self {
        self.constants.push(coef.into());
        self
    }

    pub fn minus_constant(self, coef: impl Into<Coefficient>) -> Self {
        let coef = -coef.into();
        self.plus_constant(coef)
    }

    pub fn add_term(&mut self, var: VarId, coef: impl Into<Coefficient>) {
        self.terms.push((var, coef.into()));
    }

    pub fn add_constant(&mut self, coef: impl Into<Coefficient>) {
        self.constants.push(coef.into());
    }

    pub fn extend(&mut self, other: LinearExpr) {
        self.terms.extend(other.terms);
        self.constants.extend(other.constants);
    }

    pub fn terms(&self) -> &[(VarId, Coefficient)] {
        &self.terms
    }

    pub fn constants(&self) -> &[Coefficient] {
        &self.constants
    }

    /// Number of variable terms plus constant terms.
    pub fn size(&self) -> usize {
        self.terms.len() + self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constants.is_empty()
    }
}

impl From<VarId> for LinearExpr {
    fn from(var: VarId) -> Self {
        LinearExpr::new().plus(var, 1.0)
    }
}
