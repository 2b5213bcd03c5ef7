//! Scalar-coupling (J) restraints

use crate::config::ScalarCouplingConfig;
use crate::grid::ParameterGrid;
use crate::observation::{AtomIndices, DataTable, Observation};
use crate::restraint::{ObservableFamily, Restraint, RestraintCore, RestraintError};

/// Restraint over scalar coupling constants for one conformational state.
///
/// Single nuisance parameter (sigma). Records sharing a `restraint_index`
/// are chemically equivalent; ingestion collects those groups and sets
/// every member's weight to `1/|group|` before the scalar SSE is fixed.
#[derive(Debug)]
pub struct ScalarCouplingRestraint {
    core: RestraintCore,
    sse: f64,
}

impl ScalarCouplingRestraint {
    /// Build from a column-oriented table with `atom_index1..4`, `exp`,
    /// `model` and `restraint_index` columns.
    pub fn from_table(
        table: &DataTable,
        energy: f64,
        config: &ScalarCouplingConfig,
    ) -> Result<Self, RestraintError> {
        let sigma = config.sigma.log_grid("sigma")?;
        let mut core = RestraintCore::new(
            ObservableFamily::ScalarCoupling,
            sigma,
            energy,
            config.ref_mode,
        );

        let a1 = table.ints("atom_index1")?;
        let a2 = table.ints("atom_index2")?;
        let a3 = table.ints("atom_index3")?;
        let a4 = table.ints("atom_index4")?;
        let exp = table.floats("exp")?;
        let model = table.floats("model")?;
        let group = table.ints("restraint_index")?;
        for row in 0..table.rows() {
            let atoms = AtomIndices::Quad(
                a1[row] as usize,
                a2[row] as usize,
                a3[row] as usize,
                a4[row] as usize,
            );
            core.add_observation(
                Observation::new(atoms, exp[row], model[row]).with_equivalency_group(group[row]),
            );
        }

        core.adjust_equivalency_weights();
        let sse = core.finalize_scalar_sse();
        Ok(Self { core, sse })
    }

    /// Precomputed scalar SSE
    pub fn sse(&self) -> f64 {
        self.sse
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

impl Restraint for ScalarCouplingRestraint {
    fn family(&self) -> ObservableFamily {
        ObservableFamily::ScalarCoupling
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
