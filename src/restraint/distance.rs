//! Distance (NOE) restraints

use crate::config::DistanceConfig;
use crate::grid::ParameterGrid;
use crate::observation::{AtomIndices, DataTable, Observation};
use crate::restraint::{ObservableFamily, Restraint, RestraintCore, RestraintError};

/// Restraint over inter-atomic NOE distances for one conformational state.
///
/// Two nuisance parameters: the error scale sigma and a scaling
/// correction gamma applied to the experimental distances. The SSE is
/// precomputed for every candidate gamma so the sampler looks up
/// `sse[gamma_index]` in O(1). The residual is either linear,
/// `gamma * exp - model`, or log-normal, `ln(model / (gamma * exp))`,
/// selected at construction.
#[derive(Debug)]
pub struct DistanceRestraint {
    core: RestraintCore,
    gamma: ParameterGrid,
    log_normal: bool,

    /// One SSE per gamma grid point
    sse_by_gamma: Vec<f64>,
}

impl DistanceRestraint {
    /// Build from a column-oriented table with `atom_index1`,
    /// `atom_index2`, `exp`, `model` and `restraint_index` columns.
    pub fn from_table(
        table: &DataTable,
        energy: f64,
        config: &DistanceConfig,
    ) -> Result<Self, RestraintError> {
        let sigma = config.sigma.log_grid("sigma")?;
        let gamma = config.gamma.log_grid("gamma")?;
        let mut core =
            RestraintCore::new(ObservableFamily::Distance, sigma, energy, config.ref_mode);

        let a1 = table.ints("atom_index1")?;
        let a2 = table.ints("atom_index2")?;
        let exp = table.floats("exp")?;
        let model = table.floats("model")?;
        let group = table.ints("restraint_index")?;
        for row in 0..table.rows() {
            let atoms = AtomIndices::Pair(a1[row] as usize, a2[row] as usize);
            core.add_observation(
                Observation::new(atoms, exp[row], model[row]).with_equivalency_group(group[row]),
            );
        }

        core.adjust_equivalency_weights();
        core.finalize_dof();

        if config.log_normal {
            for obs in core.observations() {
                if obs.model <= 0.0 || obs.exp <= 0.0 {
                    return Err(RestraintError::Config(format!(
                        "log-normal residual requires positive distances, got exp={} model={}",
                        obs.exp, obs.model
                    )));
                }
            }
        }

        let sse_by_gamma = gamma
            .values()
            .iter()
            .map(|&g| {
                core.observations()
                    .iter()
                    .map(|obs| {
                        let err = if config.log_normal {
                            (obs.model / (g * obs.exp)).ln()
                        } else {
                            g * obs.exp - obs.model
                        };
                        obs.weight * err * err
                    })
                    .sum()
            })
            .collect();

        Ok(Self {
            core,
            gamma,
            log_normal: config.log_normal,
            sse_by_gamma,
        })
    }

    /// Gamma grid
    pub fn gamma_grid(&self) -> &ParameterGrid {
        &self.gamma
    }

    /// Whether the log-normal residual was selected
    pub fn log_normal(&self) -> bool {
        self.log_normal
    }

    /// Precomputed SSE for each gamma grid point
    pub fn sse_by_gamma(&self) -> &[f64] {
        &self.sse_by_gamma
    }

    pub fn init_exponential_reference(&self, betas: &[f64]) -> Result<f64, RestraintError> {
        self.core.init_exponential_reference(betas)
    }

    pub fn init_gaussian_reference(
        &self,
        means: &[f64],
        sigmas: &[f64],
    ) -> Result<f64, RestraintError> {
        self.core.init_gaussian_reference(means, sigmas)
    }

    pub fn reference_potential(&self) -> Result<f64, RestraintError> {
        self.core.reference_potential()
    }
}

impl Restraint for DistanceRestraint {
    fn family(&self) -> ObservableFamily {
        ObservableFamily::Distance
    }

    fn dof(&self) -> f64 {
        self.core.dof()
    }

    fn energy(&self) -> f64 {
        self.core.energy()
    }

    fn observations(&self) -> &[Observation] {
        self.core.observations()
    }

    fn sigma_grid(&self) -> &ParameterGrid {
        self.core.sigma_grid()
    }

    fn initial_parameters(&self) -> (Vec<f64>, Vec<usize>) {
        let sigma = self.core.sigma_grid();
        (
            vec![sigma.initial_value(), self.gamma.initial_value()],
            vec![sigma.initial_index(), self.gamma.initial_index()],
        )
    }

    /// `indices[1]` selects the gamma grid point
    fn neg_log_posterior(&self, params: &[f64], indices: &[usize]) -> Result<f64, RestraintError> {
        let sigma = self.core.sigma_from_params(params)?;
        let gamma_index = *indices.get(1).ok_or_else(|| {
            RestraintError::Precondition(
                "distance restraint requires a gamma index at position 1".to_string(),
            )
        })?;
        let sse = *self.sse_by_gamma.get(gamma_index).ok_or_else(|| {
            RestraintError::Precondition(format!(
                "gamma index {} out of range for grid of {}",
                gamma_index,
                self.gamma.len()
            ))
        })?;
        Ok(self.core.neg_log_common(sigma, sse) - self.core.reference_correction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Column;
    use assert_approx_eq::assert_approx_eq;

    fn table(exp: &[f64], model: &[f64], groups: &[i64]) -> DataTable {
        let n = exp.len();
        let mut t = DataTable::new();
        t.insert("atom_index1", Column::Int((0..n as i64).collect()))
            .unwrap();
        t.insert("atom_index2", Column::Int((10..10 + n as i64).collect()))
            .unwrap();
        t.insert("exp", Column::Float(exp.to_vec())).unwrap();
        t.insert("model", Column::Float(model.to_vec())).unwrap();
        t.insert("restraint_index", Column::Int(groups.to_vec()))
            .unwrap();
        t
    }

    fn config(log_normal: bool) -> DistanceConfig {
        DistanceConfig {
            log_normal,
            ..DistanceConfig::default()
        }
    }

    #[test]
    fn test_sse_is_indexed_by_gamma() {
        let t = table(&[3.0, 4.5], &[3.2, 4.4], &[1, 2]);
        let r = DistanceRestraint::from_table(&t, 0.0, &config(false)).unwrap();

        assert_eq!(r.sse_by_gamma().len(), r.gamma_grid().len());
        for (g, &sse) in r.gamma_grid().values().iter().zip(r.sse_by_gamma()) {
            let expected = (g * 3.0 - 3.2_f64).powi(2) + (g * 4.5 - 4.4_f64).powi(2);
            assert_approx_eq!(sse, expected, 1e-10);
        }
    }

    #[test]
    fn test_zero_residual_gives_zero_sse_in_both_modes() {
        // With model == exp, the residual vanishes exactly at gamma = 1
        // for both metrics; the two metrics are NOT expected to agree at
        // other grid points.
        for log_normal in [false, true] {
            let cfg = DistanceConfig {
                gamma: crate::config::GridSpec(0.999999, 1.000001, 1.0000005),
                ..config(log_normal)
            };
            let t = table(&[2.5], &[2.5], &[1]);
            let r = DistanceRestraint::from_table(&t, 0.0, &cfg).unwrap();
            let sse_at_unit_gamma = r.sse_by_gamma()[0];
            assert_approx_eq!(sse_at_unit_gamma, 0.0, 1e-10);
        }
    }

    #[test]
    fn test_log_normal_sse() {
        let t = table(&[2.0], &[4.0], &[7]);
        let r = DistanceRestraint::from_table(&t, 0.0, &config(true)).unwrap();

        for (g, &sse) in r.gamma_grid().values().iter().zip(r.sse_by_gamma()) {
            let expected = (4.0_f64 / (g * 2.0)).ln().powi(2);
            assert_approx_eq!(sse, expected, 1e-10);
        }
    }

    #[test]
    fn test_log_normal_rejects_nonpositive_distances() {
        let t = table(&[2.0], &[-4.0], &[1]);
        assert!(DistanceRestraint::from_table(&t, 0.0, &config(true)).is_err());
    }

    #[test]
    fn test_posterior_looks_up_gamma_index() {
        let t = table(&[3.0, 3.0], &[3.5, 2.5], &[1, 1]);
        let r = DistanceRestraint::from_table(&t, 0.0, &config(false)).unwrap();

        let (params, indices) = r.initial_parameters();
        assert_eq!(indices.len(), 2);
        let e = r.neg_log_posterior(&params, &indices).unwrap();
        assert!(e.is_finite());

        // Missing or out-of-range gamma index is a precondition error
        assert!(r.neg_log_posterior(&params, &indices[..1]).is_err());
        assert!(r
            .neg_log_posterior(&params, &[indices[0], r.gamma_grid().len()])
            .is_err());
    }

    #[test]
    fn test_equivalency_groups_share_weight() {
        let t = table(&[3.0, 3.0, 5.0], &[3.1, 2.9, 5.2], &[4, 4, 8]);
        let r = DistanceRestraint::from_table(&t, 0.0, &config(false)).unwrap();
        assert_approx_eq!(r.dof(), 2.0, 1e-12);
        assert_approx_eq!(r.observations()[0].weight, 0.5, 1e-12);
    }
}
