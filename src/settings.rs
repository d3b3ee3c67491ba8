//! # Settings Module
//!
//! ## Purpose
//! Collects every tunable of an equilibrium solve in one serializable structure so that a run
//! can be reproduced from a JSON file.
//!
//! ## Usage Pattern
//! ```rust
//! use equilibria_rs::settings::{EquilibriumSettings, NeqSysType};
//! use equilibria_rs::Equilibria::num_sys::NumSysKind;
//!
//! let json = r#"{ "neqsys_type": "StaticConditions", "numsys": ["Log", "Lin"] }"#;
//! let settings = EquilibriumSettings::from_json_str(json).unwrap();
//! assert_eq!(settings.neqsys_type, NeqSysType::StaticConditions);
//! assert_eq!(settings.numsys, vec![NumSysKind::Log, NumSysKind::Lin]);
//! assert_eq!(settings.conditional_maxiter, 20);
//! ```
//!
//! ## Defaults
//! | Field | Default |
//! |-------|---------|
//! | neqsys_type | ChainedConditional |
//! | numsys | [Log, Lin] |
//! | phase_rtol | 1e-14 |
//! | conditional_maxiter | 20 |
//! | sanity_rtol | 1e-12 |

use crate::Equilibria::eq_errors::EquilibriumError;
use crate::Equilibria::num_sys::{NumSysKind, NumSysOptions};
use crate::Utils::nonlinear_solver::NewtonConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// how phase states and formulation stages are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeqSysType {
    /// one fixed phase state (given, or all solids absent), the chain is run once
    StaticConditions,
    /// the phase state is chosen for the whole chain and revised after it while it changes
    ConditionalChained,
    /// the phase state is revised before and after every stage of the chain
    ChainedConditional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibriumSettings {
    pub neqsys_type: NeqSysType,
    /// formulations solved one after another, each seeded with the previous result
    pub numsys: Vec<NumSysKind>,
    pub rref_equil: bool,
    pub rref_preserv: bool,
    pub include_charge: bool,
    /// relative tolerance of the supersaturation test
    pub phase_rtol: f64,
    /// limit of phase state revisions in one conditional solve
    pub conditional_maxiter: usize,
    /// relative tolerance of the conservation bound check
    pub sanity_rtol: f64,
    pub newton: NewtonConfig,
}

impl Default for EquilibriumSettings {
    fn default() -> Self {
        Self {
            neqsys_type: NeqSysType::ChainedConditional,
            numsys: vec![NumSysKind::Log, NumSysKind::Lin],
            rref_equil: false,
            rref_preserv: false,
            include_charge: false,
            phase_rtol: 1e-14,
            conditional_maxiter: 20,
            sanity_rtol: 1e-12,
            newton: NewtonConfig::default(),
        }
    }
}

impl EquilibriumSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, EquilibriumError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EquilibriumError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, EquilibriumError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_neqsys_type(mut self, neqsys_type: NeqSysType) -> Self {
        self.neqsys_type = neqsys_type;
        self
    }

    pub fn with_numsys(mut self, numsys: Vec<NumSysKind>) -> Self {
        self.numsys = numsys;
        self
    }

    /// formulation options for one phase state
    pub fn numsys_options(&self, precipitates: &[bool]) -> NumSysOptions {
        NumSysOptions {
            precipitates: precipitates.to_vec(),
            rref_equil: self.rref_equil,
            rref_preserv: self.rref_preserv,
            include_charge: self.include_charge,
        }
    }
}
