//! Technology Blocks
//!
//! Each participating technology contributes one block to the shared
//! dispatch model: its decision variables, parameters and constraints for
//! every timestep of the control window, plus the ports through which the
//! system layer couples it to the plant-wide balance.

mod converter;
mod storage;

use std::collections::BTreeMap;

pub use converter::{ConverterBlock, ConverterParameters};
pub use storage::{check_initial_soc, StorageBlock, StorageParameters, StorageVars};

use crate::error::{DispatchError, Result};
use crate::model::{LinearExpr, ParamId, VarId};

use super::window::{CommodityInfo, TechName, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TechnologyKind {
    Storage,
    Converter,
}

/// Quantity a block exposes for system-level coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PortKind {
    Charge,
    Discharge,
    Production,
    SystemProduction,
    SystemLoad,
    CommodityOut,
}

/// Which side of the system balance a port feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceRole {
    Generation,
    Load,
}

impl PortKind {
    pub fn balance_role(self) -> Option<BalanceRole> {
        match self {
            PortKind::Discharge | PortKind::Production => Some(BalanceRole::Generation),
            PortKind::Charge => Some(BalanceRole::Load),
            _ => None,
        }
    }

    /// Ports bound to a plant-wide variable rather than a per-technology mirror.
    pub fn is_system_quantity(self) -> bool {
        matches!(
            self,
            PortKind::SystemProduction | PortKind::SystemLoad | PortKind::CommodityOut
        )
    }
}

/// Named per-timestep variables a block exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub kind: PortKind,
    pub vars: Vec<VarId>,
}

/// System-side variables each port of one technology is bound to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortBindings {
    tech: String,
    vars: BTreeMap<PortKind, Vec<VarId>>,
}

impl PortBindings {
    pub fn new(tech: &TechName) -> Self {
        Self {
            tech: tech.to_string(),
            vars: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, kind: PortKind, vars: Vec<VarId>) {
        self.vars.insert(kind, vars);
    }

    pub fn var(&self, kind: PortKind, t: usize) -> Result<VarId> {
        self.vars
            .get(&kind)
            .and_then(|vars| vars.get(t).copied())
            .ok_or_else(|| {
                DispatchError::InvalidConfig(format!("{} has no {kind} port at t={t}", self.tech))
            })
    }

    pub fn vars(&self, kind: PortKind) -> Option<&[VarId]> {
        self.vars.get(&kind).map(Vec::as_slice)
    }
}

/// One technology's fragment of the dispatch model.
#[derive(Debug, Clone)]
pub enum TechnologyBlock {
    Storage(StorageBlock),
    Converter(ConverterBlock),
}

impl TechnologyBlock {
    pub fn name(&self) -> &TechName {
        match self {
            TechnologyBlock::Storage(block) => block.name(),
            TechnologyBlock::Converter(block) => block.name(),
        }
    }

    pub fn kind(&self) -> TechnologyKind {
        match self {
            TechnologyBlock::Storage(_) => TechnologyKind::Storage,
            TechnologyBlock::Converter(_) => TechnologyKind::Converter,
        }
    }

    pub fn window(&self) -> TimeWindow {
        match self {
            TechnologyBlock::Storage(block) => block.window(),
            TechnologyBlock::Converter(block) => block.window(),
        }
    }

    pub fn commodity(&self) -> &CommodityInfo {
        match self {
            TechnologyBlock::Storage(block) => block.commodity(),
            TechnologyBlock::Converter(block) => block.commodity(),
        }
    }

    pub fn round_digits(&self) -> u32 {
        match self {
            TechnologyBlock::Storage(block) => block.round_digits(),
            TechnologyBlock::Converter(block) => block.round_digits(),
        }
    }

    pub fn ports(&self) -> Vec<Port> {
        match self {
            TechnologyBlock::Storage(block) => block.ports(),
            TechnologyBlock::Converter(block) => block.ports(),
        }
    }

    /// Per-unit operating cost at `t`, written against the system-side port variables.
    pub fn operating_cost(
        &self,
        t: usize,
        bindings: &PortBindings,
        time_weighting: ParamId,
    ) -> Result<LinearExpr> {
        match self {
            TechnologyBlock::Storage(block) => block.operating_cost(t, bindings, time_weighting),
            TechnologyBlock::Converter(block) => block.operating_cost(t, bindings, time_weighting),
        }
    }

    pub fn as_storage(&self) -> Option<&StorageBlock> {
        match self {
            TechnologyBlock::Storage(block) => Some(block),
            TechnologyBlock::Converter(_) => None,
        }
    }

    pub fn as_converter(&self) -> Option<&ConverterBlock> {
        match self {
            TechnologyBlock::Converter(block) => Some(block),
            TechnologyBlock::Storage(_) => None,
        }
    }
}

impl From<StorageBlock> for TechnologyBlock {
    fn from(block: StorageBlock) -> Self {
        TechnologyBlock::Storage(block)
    }
}

impl From<ConverterBlock> for TechnologyBlock {
    fn from(block: ConverterBlock) -> Self {
        TechnologyBlock::Converter(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_port_roles() {
        assert_eq!(PortKind::Discharge.balance_role(), Some(BalanceRole::Generation));
        assert_eq!(PortKind::Production.balance_role(), Some(BalanceRole::Generation));
        assert_eq!(PortKind::Charge.balance_role(), Some(BalanceRole::Load));
        assert_eq!(PortKind::CommodityOut.balance_role(), None);
        assert!(PortKind::SystemLoad.is_system_quantity());
        assert!(!PortKind::Charge.is_system_quantity());
    }

    #[test]
    fn test_technology_kind_parses() {
        assert_eq!(TechnologyKind::from_str("storage").unwrap(), TechnologyKind::Storage);
        assert_eq!(TechnologyKind::Converter.to_string(), "converter");
        assert!(TechnologyKind::from_str("turbine").is_err());
    }

    #[test]
    fn test_bindings_report_missing_port() {
        let mut bindings = PortBindings::new(&TechName::from("battery"));
        bindings.insert(PortKind::Charge, vec![VarId(3)]);
        assert_eq!(bindings.var(PortKind::Charge, 0).unwrap(), VarId(3));
        assert!(bindings.var(PortKind::Charge, 1).is_err());
        assert!(bindings.var(PortKind::Production, 0).is_err());
    }
}
