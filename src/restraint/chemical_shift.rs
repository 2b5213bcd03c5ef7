//! Chemical-shift restraints

use crate::config::ChemicalShiftConfig;
use crate::grid::ParameterGrid;
use crate::observation::{AtomIndices, DataTable, Observation};
use crate::restraint::{ObservableFamily, Restraint, RestraintCore, RestraintError};

/// Restraint over NMR chemical shifts for one conformational state.
///
/// Single nuisance parameter (sigma); the SSE is a scalar weighted sum
/// of squared `model - exp` residuals. Weights come from the caller's
/// configuration, not from equivalency grouping.
#[derive(Debug)]
pub struct ChemicalShiftRestraint {
    core: RestraintCore,

    /// Nucleus this data set was measured on ("H", "Ca", "N"), parsed
    /// from the input tag
    extension: Option<String>,

    sse: f64,
}

impl ChemicalShiftRestraint {
    /// Build from a column-oriented table with `atom_index1`, `exp` and
    /// `model` columns.
    pub fn from_table(
        table: &DataTable,
        energy: f64,
        extension: Option<&str>,
        config: &ChemicalShiftConfig,
    ) -> Result<Self, RestraintError> {
        let sigma = config.sigma.log_grid("sigma")?;
        let mut core = RestraintCore::new(
            ObservableFamily::ChemicalShift,
            sigma,
            energy,
            config.ref_mode,
        );

        let atoms = table.ints("atom_index1")?;
        let exp = table.floats("exp")?;
        let model = table.floats("model")?;
        for row in 0..table.rows() {
            let mut obs = Observation::new(
                AtomIndices::Single(atoms[row] as usize),
                exp[row],
                model[row],
            );
            obs.weight = config.weight;
            core.add_observation(obs);
        }

        let sse = core.finalize_scalar_sse();
        Ok(Self {
            core,
            extension: extension.map(|s| s.to_string()),
            sse,
        })
    }

    /// Nucleus extension, if the input carried one
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Precomputed scalar SSE
    pub fn sse(&self) -> f64 {
        self.sse
    }

    /// Supply the externally calibrated betas for the exponential
    /// reference potential
    pub fn init_exponential_reference(&self, betas: &[f64]) -> Result<f64, RestraintError> {
        self.core.init_exponential_reference(betas)
    }

    /// Supply the externally calibrated per-record mean/sigma for the
    /// Gaussian reference potential
    pub fn init_gaussian_reference(
        &self,
        means: &[f64],
        sigmas: &[f64],
    ) -> Result<f64, RestraintError> {
        self.core.init_gaussian_reference(means, sigmas)
    }

    /// Evaluate the configured reference potential
    pub fn reference_potential(&self) -> Result<f64, RestraintError> {
        self.core.reference_potential()
    }
}

impl Restraint for ChemicalShiftRestraint {
    fn family(&self) -> ObservableFamily {
        ObservableFamily::ChemicalShift
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
        (vec![sigma.initial_value()], vec![sigma.initial_index()])
    }

    fn neg_log_posterior(&self, params: &[f64], _indices: &[usize]) -> Result<f64, RestraintError> {
        let sigma = self.core.sigma_from_params(params)?;
        Ok(self.core.neg_log_common(sigma, self.sse) - self.core.reference_correction())
    }
}
