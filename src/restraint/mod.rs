//! Restraint energy model: one implementation per observable family
//!
//! A restraint owns the experimental/predicted observations for one
//! observable family on one conformational state, together with the
//! discretized nuisance-parameter grids and the SSE surface precomputed
//! over them. The external Markov-chain sampler queries
//! `neg_log_posterior` many times per second; that call is a pure
//! lookup plus O(1) arithmetic and never recomputes the SSE.

pub mod chemical_shift;
pub mod distance;
pub mod protection_factor;
pub mod scalar_coupling;

use crate::grid::{GridError, ParameterGrid};
use crate::observation::{Observation, TableError};
use crate::reference::{self, ReferenceError, ReferenceMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub use chemical_shift::ChemicalShiftRestraint;
pub use distance::DistanceRestraint;
pub use protection_factor::{ContactCountSource, ContactSourceError, ProtectionFactorRestraint};
pub use scalar_coupling::ScalarCouplingRestraint;

/// Errors that can occur while building or evaluating restraints
#[derive(Error, Debug)]
pub enum RestraintError {
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Reference potential error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Contact-count source error: {0}")]
    ContactSource(#[from] protection_factor::ContactSourceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),
}

/// The four supported observable families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservableFamily {
    ChemicalShift,
    ScalarCoupling,
    Distance,
    ProtectionFactor,
}

impl fmt::Display for ObservableFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservableFamily::ChemicalShift => "chemical shift",
            ObservableFamily::ScalarCoupling => "scalar coupling",
            ObservableFamily::Distance => "distance",
            ObservableFamily::ProtectionFactor => "protection factor",
        };
        write!(f, "{}", name)
    }
}

/// Common contract implemented by every restraint variant.
/// The Send + Sync bounds let independent ensembles be sampled from
/// parallel workers.
pub trait Restraint: Send + Sync {
    /// Observable family this restraint scores
    fn family(&self) -> ObservableFamily;

    /// Effective degrees of freedom (sum of observation weights)
    fn dof(&self) -> f64;

    /// Lambda-scaled conformational free energy of the owning state
    fn energy(&self) -> f64;

    /// Ingested observation records
    fn observations(&self) -> &[Observation];

    /// Error-scale (sigma) grid; sigma is always the first nuisance parameter
    fn sigma_grid(&self) -> &ParameterGrid;

    /// Nuisance-parameter values and grid indices the sampler starts from,
    /// in the order `neg_log_posterior` expects them
    fn initial_parameters(&self) -> (Vec<f64>, Vec<usize>);

    /// Negative-log-posterior contribution for one nuisance-parameter
    /// assignment. `params[0]` is the error scale sigma; the remaining
    /// entries of `params`/`indices` are variant-specific.
    fn neg_log_posterior(&self, params: &[f64], indices: &[usize]) -> Result<f64, RestraintError>;
}

/// State shared by all restraint variants: the observation collection,
/// the sigma grid, the lambda-scaled state energy, and the lazily
/// populated reference-potential corrections.
#[derive(Debug)]
pub struct RestraintCore {
    family: ObservableFamily,
    observations: Vec<Observation>,
    sigma: ParameterGrid,
    energy: f64,
    ref_mode: ReferenceMode,
    dof: f64,
    // Populated at most once on first request; the only mutation after
    // construction, guarded against concurrent first access.
    exp_ref: OnceLock<f64>,
    gaussian_ref: OnceLock<f64>,
}

impl RestraintCore {
    pub fn new(
        family: ObservableFamily,
        sigma: ParameterGrid,
        energy: f64,
        ref_mode: ReferenceMode,
    ) -> Self {
        Self {
            family,
            observations: Vec::new(),
            sigma,
            energy,
            ref_mode,
            dof: 0.0,
            exp_ref: OnceLock::new(),
            gaussian_ref: OnceLock::new(),
        }
    }

    /// Append an observation record. No validation beyond arity, which
    /// the `AtomIndices` variant already encodes.
    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn family(&self) -> ObservableFamily {
        self.family
    }

    pub fn sigma_grid(&self) -> &ParameterGrid {
        &self.sigma
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn ref_mode(&self) -> ReferenceMode {
        self.ref_mode
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }

    /// Scan all records for shared equivalency-group tags and set every
    /// member of a group of size n to weight 1/n, so each group
    /// contributes exactly one effective degree of freedom to the SSE.
    pub fn adjust_equivalency_weights(&mut self) {
        let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, obs) in self.observations.iter().enumerate() {
            if let Some(tag) = obs.equivalency_group {
                groups.entry(tag).or_default().push(i);
            }
        }
        for members in groups.values() {
            let w = 1.0 / members.len() as f64;
            for &i in members {
                self.observations[i].weight = w;
            }
        }
    }

    /// Weighted sum of squared residuals `model - exp` across all
    /// records; also fixes the degrees of freedom (sum of weights).
    /// Called exactly once at construction time by the scalar variants.
    pub fn finalize_scalar_sse(&mut self) -> f64 {
        let mut sse = 0.0;
        let mut dof = 0.0;
        for obs in &self.observations {
            let err = obs.model - obs.exp;
            sse += obs.weight * err * err;
            dof += obs.weight;
        }
        self.dof = dof;
        sse
    }

    /// Fix the degrees of freedom without computing a scalar SSE; used
    /// by variants whose SSE lives on a grid.
    pub fn finalize_dof(&mut self) {
        self.dof = self.observations.iter().map(|o| o.weight).sum();
    }

    /// The common posterior-energy form shared by every variant:
    /// `dof * ln(sigma) + sse / (2 sigma^2) + (dof / 2) * ln(2 pi)`.
    pub fn neg_log_common(&self, sigma: f64, sse: f64) -> f64 {
        self.dof * sigma.ln() + sse / (2.0 * sigma * sigma) + self.dof / 2.0 * (2.0 * PI).ln()
    }

    /// Extract sigma from the sampler's parameter vector
    pub fn sigma_from_params(&self, params: &[f64]) -> Result<f64, RestraintError> {
        match params.first() {
            Some(&sigma) if sigma > 0.0 => Ok(sigma),
            Some(&sigma) => Err(RestraintError::Precondition(format!(
                "sigma must be positive, got {}",
                sigma
            ))),
            None => Err(RestraintError::Precondition(
                "empty nuisance-parameter vector".to_string(),
            )),
        }
    }

    /// Compute and cache the exponential reference correction from the
    /// externally calibrated betas (one per record). Idempotent: the
    /// first computed value wins and later calls return it unchanged.
    pub fn init_exponential_reference(&self, betas: &[f64]) -> Result<f64, RestraintError> {
        if let Some(&cached) = self.exp_ref.get() {
            return Ok(cached);
        }
        let sum = reference::neglog_exponential(&self.observations, betas)?;
        let _ = self.exp_ref.set(sum);
        Ok(*self.exp_ref.get().unwrap_or(&sum))
    }

    /// Compute and cache the Gaussian reference correction from the
    /// externally calibrated per-record means and sigmas. Idempotent.
    pub fn init_gaussian_reference(
        &self,
        means: &[f64],
        sigmas: &[f64],
    ) -> Result<f64, RestraintError> {
        if let Some(&cached) = self.gaussian_ref.get() {
            return Ok(cached);
        }
        let sum = reference::neglog_gaussian(&self.observations, means, sigmas)?;
        let _ = self.gaussian_ref.set(sum);
        Ok(*self.gaussian_ref.get().unwrap_or(&sum))
    }

    /// Reference correction subtracted from the posterior energy. Zero
    /// for the uniform mode and for modes whose calibration has not been
    /// supplied yet (matching the null-model convention that an absent
    /// correction contributes nothing).
    pub fn reference_correction(&self) -> f64 {
        match self.ref_mode {
            ReferenceMode::Uniform => 0.0,
            ReferenceMode::Exp => self.exp_ref.get().copied().unwrap_or(0.0),
            ReferenceMode::Gaussian => self.gaussian_ref.get().copied().unwrap_or(0.0),
        }
    }

    /// Explicitly evaluate the configured reference potential. Fails
    /// with a precondition error if the required calibration arrays have
    /// not been supplied.
    pub fn reference_potential(&self) -> Result<f64, RestraintError> {
        match self.ref_mode {
            ReferenceMode::Uniform => Ok(0.0),
            ReferenceMode::Exp => self.exp_ref.get().copied().ok_or_else(|| {
                RestraintError::Precondition(
                    "exponential reference requested before betas were supplied".to_string(),
                )
            }),
            ReferenceMode::Gaussian => self.gaussian_ref.get().copied().ok_or_else(|| {
                RestraintError::Precondition(
                    "Gaussian reference requested before ref_mean/ref_sigma were supplied"
                        .to_string(),
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::AtomIndices;
    use assert_approx_eq::assert_approx_eq;

    fn core_with(records: Vec<Observation>) -> RestraintCore {
        let sigma = ParameterGrid::log_spaced("sigma", 0.05, 20.0, 1.02).unwrap();
        let mut core = RestraintCore::new(
            ObservableFamily::ChemicalShift,
            sigma,
            0.0,
            ReferenceMode::Uniform,
        );
        for r in records {
            core.add_observation(r);
        }
        core
    }

    fn grouped(exp: f64, model: f64, group: i64) -> Observation {
        Observation::new(AtomIndices::Single(0), exp, model).with_equivalency_group(group)
    }

    #[test]
    fn test_equivalency_group_weights_sum_to_one() {
        let mut core = core_with(vec![
            grouped(1.0, 1.1, 7),
            grouped(1.0, 1.2, 7),
            grouped(1.0, 1.3, 7),
            grouped(2.0, 2.1, 9),
            Observation::new(AtomIndices::Single(4), 3.0, 3.1),
        ]);
        core.adjust_equivalency_weights();

        let group7: f64 = core
            .observations()
            .iter()
            .filter(|o| o.equivalency_group == Some(7))
            .map(|o| o.weight)
            .sum();
        assert_approx_eq!(group7, 1.0, 1e-12);

        let group9: f64 = core
            .observations()
            .iter()
            .filter(|o| o.equivalency_group == Some(9))
            .map(|o| o.weight)
            .sum();
        assert_approx_eq!(group9, 1.0, 1e-12);

        // Ungrouped records keep the default weight
        assert_approx_eq!(core.observations()[4].weight, 1.0, 1e-12);
    }

    #[test]
    fn test_zero_residual_sse_is_zero() {
        let mut core = core_with(vec![
            Observation::new(AtomIndices::Single(0), 1.5, 1.5),
            Observation::new(AtomIndices::Single(1), -2.0, -2.0),
        ]);
        let sse = core.finalize_scalar_sse();
        assert_approx_eq!(sse, 0.0, 1e-15);
        assert_approx_eq!(core.dof(), 2.0, 1e-12);
    }

    #[test]
    fn test_neg_log_monotone_in_sse_and_minimal_at_sigma_star() {
        let mut core = core_with(vec![
            Observation::new(AtomIndices::Single(0), 1.0, 2.0),
            Observation::new(AtomIndices::Single(1), 0.0, 1.5),
        ]);
        let sse = core.finalize_scalar_sse();
        assert!(sse > 0.0);

        // Monotone in SSE for fixed sigma
        let e1 = core.neg_log_common(1.3, sse);
        let e2 = core.neg_log_common(1.3, sse + 0.5);
        assert!(e2 > e1);

        // Unique minimum over sigma at sigma* = sqrt(sse / dof)
        let sigma_star = (sse / core.dof()).sqrt();
        let at_star = core.neg_log_common(sigma_star, sse);
        assert!(core.neg_log_common(sigma_star * 1.01, sse) > at_star);
        assert!(core.neg_log_common(sigma_star * 0.99, sse) > at_star);
    }

    #[test]
    fn test_reference_precondition() {
        let sigma = ParameterGrid::log_spaced("sigma", 0.05, 20.0, 1.02).unwrap();
        let core = RestraintCore::new(
            ObservableFamily::ChemicalShift,
            sigma,
            0.0,
            ReferenceMode::Exp,
        );

        // Requested before calibration: precondition error, but the
        // posterior correction silently stays at zero
        assert!(matches!(
            core.reference_potential(),
            Err(RestraintError::Precondition(_))
        ));
        assert_approx_eq!(core.reference_correction(), 0.0, 1e-15);
    }

    #[test]
    fn test_exponential_reference_is_idempotent() {
        let mut core = core_with(vec![Observation::new(AtomIndices::Single(0), 1.0, 2.0)]);
        core.finalize_dof();

        let first = core.init_exponential_reference(&[2.0]).unwrap();
        assert_approx_eq!(first, 2.0_f64.ln() + 1.0, 1e-12);

        // A second call with different betas must not change the cached value
        let second = core.init_exponential_reference(&[5.0]).unwrap();
        assert_approx_eq!(first, second, 1e-15);

        // The correction is ignored unless the configured mode matches
        assert_approx_eq!(core.reference_correction(), 0.0, 1e-15);
    }

    #[test]
    fn test_sigma_from_params() {
        let core = core_with(vec![]);
        assert!(core.sigma_from_params(&[]).is_err());
        assert!(core.sigma_from_params(&[-1.0]).is_err());
        assert_approx_eq!(core.sigma_from_params(&[1.5]).unwrap(), 1.5);
    }
}
