//! Typed configuration for each restraint family
//!
//! Every option a family recognizes is an explicit struct field; unknown
//! keys in the input are rejected by serde rather than silently dropped.

use crate::grid::{GridError, ParameterGrid};
use crate::reference::ReferenceMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A `(min, max, step)` range for one nuisance-parameter grid.
/// Serialized as a three-element array, e.g. `"sigma": [0.05, 20.0, 1.02]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec(pub f64, pub f64, pub f64);

impl GridSpec {
    pub fn min(&self) -> f64 {
        self.0
    }

    pub fn max(&self) -> f64 {
        self.1
    }

    pub fn step(&self) -> f64 {
        self.2
    }

    /// Realize this spec as a log-spaced grid (step is a multiplicative factor)
    pub fn log_grid(&self, name: &str) -> Result<ParameterGrid, GridError> {
        ParameterGrid::log_spaced(name, self.0, self.1, self.2)
    }

    /// Realize this spec as a linearly spaced grid
    pub fn linear_grid(&self, name: &str) -> Result<ParameterGrid, GridError> {
        ParameterGrid::linear(name, self.0, self.1, self.2)
    }
}

fn default_sigma() -> GridSpec {
    GridSpec(0.05, 20.0, 1.02)
}

fn default_gamma() -> GridSpec {
    GridSpec(0.2, 10.0, 1.01)
}

fn default_weight() -> f64 {
    1.0
}

/// Options for chemical-shift restraints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChemicalShiftConfig {
    /// Reference potential mode
    #[serde(rename = "ref", default)]
    pub ref_mode: ReferenceMode,

    /// Error-scale grid, log-spaced
    #[serde(default = "default_sigma")]
    pub sigma: GridSpec,

    /// Per-record weight applied at ingestion
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for ChemicalShiftConfig {
    fn default() -> Self {
        Self {
            ref_mode: ReferenceMode::Uniform,
            sigma: default_sigma(),
            weight: 1.0,
        }
    }
}

/// Options for scalar-coupling restraints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalarCouplingConfig {
    #[serde(rename = "ref", default)]
    pub ref_mode: ReferenceMode,

    #[serde(default = "default_sigma")]
    pub sigma: GridSpec,
}

impl Default for ScalarCouplingConfig {
    fn default() -> Self {
        Self {
            ref_mode: ReferenceMode::Uniform,
            sigma: default_sigma(),
        }
    }
}

/// Options for distance (NOE) restraints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistanceConfig {
    #[serde(rename = "ref", default)]
    pub ref_mode: ReferenceMode,

    #[serde(default = "default_sigma")]
    pub sigma: GridSpec,

    /// Grid of candidate scaling corrections for model distances, log-spaced
    #[serde(default = "default_gamma")]
    pub gamma: GridSpec,

    /// Use the log-normal residual `ln(model / (gamma * exp))` instead of
    /// the linear residual `gamma * exp - model`
    #[serde(default)]
    pub log_normal: bool,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            ref_mode: ReferenceMode::Uniform,
            sigma: default_sigma(),
            gamma: default_gamma(),
            log_normal: false,
        }
    }
}

/// Options for protection-factor restraints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtectionFactorConfig {
    #[serde(rename = "ref", default)]
    pub ref_mode: ReferenceMode,

    #[serde(default = "default_sigma")]
    pub sigma: GridSpec,

    /// If true, predicted protection factors are supplied in the data
    /// table and the restraint reduces to a scalar-SSE, single-sigma form
    #[serde(default)]
    pub precomputed: bool,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_beta_c")]
    pub beta_c: GridSpec,

    #[serde(default = "default_beta_h")]
    pub beta_h: GridSpec,

    #[serde(default = "default_beta_0")]
    pub beta_0: GridSpec,

    #[serde(default = "default_xcs")]
    pub xcs: GridSpec,

    #[serde(default = "default_xhs")]
    pub xhs: GridSpec,

    #[serde(default = "default_bs")]
    pub bs: GridSpec,

    /// Optional path to a JSON prior-penalty tensor added verbatim to
    /// the posterior; must match the SSE tensor shape exactly
    #[serde(default)]
    pub pf_prior: Option<PathBuf>,
}

fn default_beta_c() -> GridSpec {
    GridSpec(0.05, 0.25, 0.01)
}

fn default_beta_h() -> GridSpec {
    GridSpec(0.0, 5.2, 0.2)
}

fn default_beta_0() -> GridSpec {
    GridSpec(-10.0, 0.0, 0.2)
}

fn default_xcs() -> GridSpec {
    GridSpec(5.0, 8.5, 0.5)
}

fn default_xhs() -> GridSpec {
    GridSpec(2.0, 2.7, 0.1)
}

fn default_bs() -> GridSpec {
    GridSpec(15.0, 16.0, 1.0)
}

impl Default for ProtectionFactorConfig {
    fn default() -> Self {
        Self {
            ref_mode: ReferenceMode::Uniform,
            sigma: default_sigma(),
            precomputed: false,
            weight: 1.0,
            beta_c: default_beta_c(),
            beta_h: default_beta_h(),
            beta_0: default_beta_0(),
            xcs: default_xcs(),
            xhs: default_xhs(),
            bs: default_bs(),
            pf_prior: None,
        }
    }
}

/// Configuration for one observable family, dispatched by the
/// `"family"` tag when read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FamilyConfig {
    ChemicalShift(ChemicalShiftConfig),
    ScalarCoupling(ScalarCouplingConfig),
    Distance(DistanceConfig),
    ProtectionFactor(ProtectionFactorConfig),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_grid_spec_realizes_grids() {
        let spec = GridSpec(0.05, 20.0, 1.02);
        let grid = spec.log_grid("sigma").unwrap();
        assert!(grid.len() > 100);

        let spec = GridSpec(15.0, 16.0, 1.0);
        let grid = spec.linear_grid("bs").unwrap();
        assert_eq!(grid.len(), 1);
        assert_approx_eq!(grid.values()[0], 15.0);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "family": "distance",
            "ref": "exp",
            "sigma": [0.05, 20.0, 1.02],
            "gamma": [0.5, 2.0, 1.01],
            "log_normal": true
        }"#;
        let config: FamilyConfig = serde_json::from_str(json).unwrap();
        match config {
            FamilyConfig::Distance(c) => {
                assert!(c.log_normal);
                assert_approx_eq!(c.gamma.min(), 0.5);
                assert_eq!(c.ref_mode, crate::reference::ReferenceMode::Exp);
            }
            _ => panic!("expected a distance config"),
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{ "family": "chemical_shift", "sigmaa": [1.0, 2.0, 1.1] }"#;
        assert!(serde_json::from_str::<FamilyConfig>(json).is_err());
    }

    #[test]
    fn test_defaults_match_documented_ranges() {
        let c = ProtectionFactorConfig::default();
        assert_approx_eq!(c.beta_c.min(), 0.05);
        assert_approx_eq!(c.beta_c.max(), 0.25);
        assert_approx_eq!(c.xhs.step(), 0.1);
        assert!(!c.precomputed);
        assert!(c.pf_prior.is_none());

        let c = DistanceConfig::default();
        assert_approx_eq!(c.gamma.min(), 0.2);
        assert_approx_eq!(c.gamma.max(), 10.0);
        assert!(!c.log_normal);
    }
}
