//! Protection-factor (HDX) restraints

use crate::config::ProtectionFactorConfig;
use crate::grid::{ParameterGrid, Tensor};
use crate::observation::{AtomIndices, DataTable, Observation};
use crate::restraint::{ObservableFamily, Restraint, RestraintCore, RestraintError};
use std::f64::consts::PI;
use std::sync::OnceLock;
use thiserror::Error;

/// Error reported by an external contact-count supplier
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ContactSourceError(pub String);

/// External supplier of per-residue structural contact counts for the
/// protection-factor model. One array is required per
/// (threshold grid point, b_s grid point) pair for a given state.
pub trait ContactCountSource: Sync {
    /// Heavy-atom contact counts `N_c` at a carbon-threshold/b_s pair
    fn carbon_counts(
        &self,
        xcs: f64,
        bs: f64,
        state: usize,
    ) -> Result<Vec<f64>, ContactSourceError>;

    /// Hydrogen-bond counts `N_h` at a hydrogen-threshold/b_s pair
    fn hydrogen_counts(
        &self,
        xhs: f64,
        bs: f64,
        state: usize,
    ) -> Result<Vec<f64>, ContactSourceError>;
}

/// Assemble the `(|x|, |b_s|, n_residues)` contact tensors for one state
/// by querying the supplier at every grid-point pair.
pub fn assemble_contact_tensors(
    source: &dyn ContactCountSource,
    xcs: &ParameterGrid,
    xhs: &ParameterGrid,
    bs: &ParameterGrid,
    state: usize,
    n_residues: usize,
) -> Result<(Tensor, Tensor), RestraintError> {
    let mut ncs = Tensor::zeros(&[xcs.len(), bs.len(), n_residues])?;
    let mut nhs = Tensor::zeros(&[xhs.len(), bs.len(), n_residues])?;

    for (o, &x) in xcs.values().iter().enumerate() {
        for (q, &b) in bs.values().iter().enumerate() {
            let counts = source.carbon_counts(x, b, state)?;
            fill_residue_row(&mut ncs, o, q, &counts, "N_c")?;
        }
    }
    for (p, &x) in xhs.values().iter().enumerate() {
        for (q, &b) in bs.values().iter().enumerate() {
            let counts = source.hydrogen_counts(x, b, state)?;
            fill_residue_row(&mut nhs, p, q, &counts, "N_h")?;
        }
    }
    Ok((ncs, nhs))
}

fn fill_residue_row(
    tensor: &mut Tensor,
    x_index: usize,
    b_index: usize,
    counts: &[f64],
    name: &str,
) -> Result<(), RestraintError> {
    let n_residues = tensor.shape()[2];
    if counts.len() != n_residues {
        return Err(RestraintError::Config(format!(
            "{} supplier returned {} residues, expected {}",
            name,
            counts.len(),
            n_residues
        )));
    }
    for (j, &c) in counts.iter().enumerate() {
        tensor.set(&[x_index, b_index, j], c)?;
    }
    Ok(())
}

/// Nuisance grids for the protection-factor forward model,
/// `ln PF = beta_c * N_c + beta_h * N_h + beta_0`
#[derive(Debug)]
struct ModelGrids {
    beta_c: ParameterGrid,
    beta_h: ParameterGrid,
    beta_0: ParameterGrid,
    xcs: ParameterGrid,
    xhs: ParameterGrid,
    bs: ParameterGrid,
}

impl ModelGrids {
    /// SSE/prior/reference tensor shape, in grid-axis order
    fn shape(&self) -> [usize; 6] {
        [
            self.beta_c.len(),
            self.beta_h.len(),
            self.beta_0.len(),
            self.xcs.len(),
            self.xhs.len(),
            self.bs.len(),
        ]
    }
}

#[derive(Debug)]
enum PfMode {
    /// Predicted protection factors supplied directly: scalar SSE,
    /// single sigma grid, like a chemical-shift restraint
    Precomputed { sse: f64 },

    /// Protection factors predicted from structural contact counts over
    /// five extra nuisance dimensions
    Model {
        grids: ModelGrids,

        /// Contact counts, shape `(|x_cs|, |b_s|, n_residues)`
        ncs: Tensor,

        /// Contact counts, shape `(|x_hs|, |b_s|, n_residues)`
        nhs: Tensor,

        /// Residue-reduced SSE, one value per grid-point tuple
        sse: Tensor,

        /// Optional prior penalty added verbatim to the posterior
        prior: Option<Tensor>,

        // Tensor-valued reference corrections; populated at most once.
        exp_ref: OnceLock<Tensor>,
        gaussian_ref: OnceLock<Tensor>,
    },
}

/// Restraint over hydrogen-exchange protection factors for one
/// conformational state.
///
/// In model mode the predicted `ln PF` for residue j is
/// `beta_c * N_c[j] + beta_h * N_h[j] + beta_0`, where the contact
/// counts themselves depend on the threshold parameters x_cs/x_hs and
/// the shared b_s. The SSE is reduced over residues into a dense
/// 6-axis tensor at construction; sampling looks it up by index tuple.
#[derive(Debug)]
pub struct ProtectionFactorRestraint {
    core: RestraintCore,
    mode: PfMode,
}

impl ProtectionFactorRestraint {
    /// Build from a column-oriented table. Precomputed mode requires
    /// `atom_index1`, `exp` and `model` columns; model mode requires
    /// `atom_index1` and `exp` plus the per-state contact tensors and
    /// optionally an already-loaded prior tensor (`pf_prior`).
    pub fn from_table(
        table: &DataTable,
        energy: f64,
        config: &ProtectionFactorConfig,
        contacts: Option<(Tensor, Tensor)>,
        prior: Option<Tensor>,
    ) -> Result<Self, RestraintError> {
        if config.precomputed {
            if prior.is_some() {
                return Err(RestraintError::Config(
                    "pf_prior is only meaningful in model mode".to_string(),
                ));
            }
            Self::precomputed(table, energy, config)
        } else {
            let (ncs, nhs) = contacts.ok_or_else(|| {
                RestraintError::Config(
                    "protection-factor model mode requires N_c/N_h contact-count tensors"
                        .to_string(),
                )
            })?;
            Self::model(table, energy, config, ncs, nhs, prior)
        }
    }

    fn precomputed(
        table: &DataTable,
        energy: f64,
        config: &ProtectionFactorConfig,
    ) -> Result<Self, RestraintError> {
        let sigma = config.sigma.log_grid("sigma")?;
        let mut core = RestraintCore::new(
            ObservableFamily::ProtectionFactor,
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
            mode: PfMode::Precomputed { sse },
        })
    }

    fn model(
        table: &DataTable,
        energy: f64,
        config: &ProtectionFactorConfig,
        ncs: Tensor,
        nhs: Tensor,
        prior: Option<Tensor>,
    ) -> Result<Self, RestraintError> {
        let sigma = config.sigma.log_grid("sigma")?;
        let grids = ModelGrids {
            beta_c: config.beta_c.linear_grid("beta_c")?,
            beta_h: config.beta_h.linear_grid("beta_h")?,
            beta_0: config.beta_0.linear_grid("beta_0")?,
            xcs: config.xcs.linear_grid("xcs")?,
            xhs: config.xhs.linear_grid("xhs")?,
            bs: config.bs.linear_grid("bs")?,
        };

        let mut core = RestraintCore::new(
            ObservableFamily::ProtectionFactor,
            sigma,
            energy,
            config.ref_mode,
        );

        let atoms = table.ints("atom_index1")?;
        let exp = table.floats("exp")?;
        let n_residues = table.rows();

        expect_shape(&ncs, &[grids.xcs.len(), grids.bs.len(), n_residues], "N_c")?;
        expect_shape(&nhs, &[grids.xhs.len(), grids.bs.len(), n_residues], "N_h")?;

        for row in 0..n_residues {
            let mut obs = Observation::new(
                AtomIndices::Single(atoms[row] as usize),
                exp[row],
                // Representative prediction at the initial grid indices;
                // the full per-grid-point prediction is recomputed where needed
                predict(
                    grids.beta_c.initial_value(),
                    grids.beta_h.initial_value(),
                    grids.beta_0.initial_value(),
                    contact(&ncs, grids.xcs.initial_index(), grids.bs.initial_index(), row),
                    contact(&nhs, grids.xhs.initial_index(), grids.bs.initial_index(), row),
                ),
            );
            obs.weight = config.weight;
            core.add_observation(obs);
        }
        core.finalize_dof();

        let sse = reduce_over_residues(&grids, &ncs, &nhs, |pred, row| {
            let err = pred - core.observations()[row].exp;
            core.observations()[row].weight * err * err
        })?;

        if let Some(p) = &prior {
            expect_shape(p, &grids.shape(), "pf_prior")?;
        }

        Ok(Self {
            core,
            mode: PfMode::Model {
                grids,
                ncs,
                nhs,
                sse,
                prior,
                exp_ref: OnceLock::new(),
                gaussian_ref: OnceLock::new(),
            },
        })
    }

    /// Whether this restraint runs in precomputed mode
    pub fn is_precomputed(&self) -> bool {
        matches!(self.mode, PfMode::Precomputed { .. })
    }

    /// Scalar SSE (precomputed mode only)
    pub fn scalar_sse(&self) -> Option<f64> {
        match &self.mode {
            PfMode::Precomputed { sse } => Some(*sse),
            PfMode::Model { .. } => None,
        }
    }

    /// SSE tensor (model mode only)
    pub fn sse_tensor(&self) -> Option<&Tensor> {
        match &self.mode {
            PfMode::Model { sse, .. } => Some(sse),
            PfMode::Precomputed { .. } => None,
        }
    }

    /// Supply betas for the exponential reference in precomputed mode;
    /// model mode needs no calibration (its exponential reference is
    /// `max(-ln PF, 0)` per residue, reduced to a tensor).
    pub fn init_exponential_reference(&self, betas: &[f64]) -> Result<(), RestraintError> {
        match &self.mode {
            PfMode::Precomputed { .. } => {
                self.core.init_exponential_reference(betas)?;
                Ok(())
            }
            PfMode::Model {
                grids,
                ncs,
                nhs,
                exp_ref,
                ..
            } => {
                if exp_ref.get().is_some() {
                    return Ok(());
                }
                let tensor = reduce_over_residues(grids, ncs, nhs, |pred, row| {
                    self.core.observations()[row].weight * (-pred).max(0.0)
                })?;
                let _ = exp_ref.set(tensor);
                Ok(())
            }
        }
    }

    /// Supply per-record mean/sigma calibration for the Gaussian
    /// reference; in model mode the correction is a full tensor.
    pub fn init_gaussian_reference(
        &self,
        means: &[f64],
        sigmas: &[f64],
    ) -> Result<(), RestraintError> {
        let n = self.core.observations().len();
        if means.len() != n || sigmas.len() != n {
            return Err(RestraintError::Config(format!(
                "Gaussian calibration arrays must have one entry per record ({}), got {}/{}",
                n,
                means.len(),
                sigmas.len()
            )));
        }
        if sigmas.iter().any(|&s| s <= 0.0) {
            return Err(RestraintError::Config(
                "ref_sigma must be strictly positive".to_string(),
            ));
        }

        match &self.mode {
            PfMode::Precomputed { .. } => {
                self.core.init_gaussian_reference(means, sigmas)?;
                Ok(())
            }
            PfMode::Model {
                grids,
                ncs,
                nhs,
                gaussian_ref,
                ..
            } => {
                if gaussian_ref.get().is_some() {
                    return Ok(());
                }
                let half_ln_2pi = 0.5 * (2.0 * PI).ln();
                let tensor = reduce_over_residues(grids, ncs, nhs, |pred, row| {
                    let dev = pred - means[row];
                    self.core.observations()[row].weight
                        * (half_ln_2pi + sigmas[row].ln() + dev * dev / (2.0 * sigmas[row] * sigmas[row]))
                })?;
                let _ = gaussian_ref.set(tensor);
                Ok(())
            }
        }
    }
}

/// Predicted `ln PF` for one residue at one grid-point tuple
fn predict(beta_c: f64, beta_h: f64, beta_0: f64, nc: f64, nh: f64) -> f64 {
    beta_c * nc + beta_h * nh + beta_0
}

/// Contact count at (threshold index, b_s index, residue); the tensor
/// layout is validated at construction so direct offsets are safe.
fn contact(tensor: &Tensor, x_index: usize, b_index: usize, row: usize) -> f64 {
    let shape = tensor.shape();
    tensor.data()[(x_index * shape[1] + b_index) * shape[2] + row]
}

/// Build the dense `(|beta_c|, |beta_h|, |beta_0|, |x_cs|, |x_hs|, |b_s|)`
/// tensor by iterating every grid axis directly and reducing `term(pred,
/// residue)` over residues at each grid-point tuple. Axis order matches
/// the nuisance-index tuple the sampler passes.
fn reduce_over_residues<F>(
    grids: &ModelGrids,
    ncs: &Tensor,
    nhs: &Tensor,
    term: F,
) -> Result<Tensor, RestraintError>
where
    F: Fn(f64, usize) -> f64,
{
    let shape = grids.shape();
    let n_residues = ncs.shape()[2];
    let mut out = Tensor::zeros(&shape)?;
    let data = out.data_mut();

    let mut offset = 0;
    for &bc in grids.beta_c.values() {
        for &bh in grids.beta_h.values() {
            for &b0 in grids.beta_0.values() {
                for xc_i in 0..grids.xcs.len() {
                    for xh_i in 0..grids.xhs.len() {
                        for b_i in 0..grids.bs.len() {
                            let mut acc = 0.0;
                            for row in 0..n_residues {
                                let pred = predict(
                                    bc,
                                    bh,
                                    b0,
                                    contact(ncs, xc_i, b_i, row),
                                    contact(nhs, xh_i, b_i, row),
                                );
                                acc += term(pred, row);
                            }
                            data[offset] = acc;
                            offset += 1;
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

fn expect_shape(tensor: &Tensor, expected: &[usize], name: &str) -> Result<(), RestraintError> {
    if tensor.shape() != expected {
        return Err(RestraintError::Config(format!(
            "{} tensor has shape {:?}, expected {:?}",
            name,
            tensor.shape(),
            expected
        )));
    }
    Ok(())
}

impl Restraint for ProtectionFactorRestraint {
    fn family(&self) -> ObservableFamily {
        ObservableFamily::ProtectionFactor
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
        match &self.mode {
            PfMode::Precomputed { .. } => {
                (vec![sigma.initial_value()], vec![sigma.initial_index()])
            }
            PfMode::Model { grids, .. } => {
                let axes = [
                    &grids.beta_c,
                    &grids.beta_h,
                    &grids.beta_0,
                    &grids.xcs,
                    &grids.xhs,
                    &grids.bs,
                ];
                let mut params = vec![sigma.initial_value()];
                let mut indices = vec![sigma.initial_index()];
                for grid in axes {
                    params.push(grid.initial_value());
                    indices.push(grid.initial_index());
                }
                (params, indices)
            }
        }
    }

    /// Model mode reads the grid-point tuple from `indices[1..7]`; the
    /// prior and any tensor-valued reference correction are indexed with
    /// the exact same tuple.
    fn neg_log_posterior(&self, params: &[f64], indices: &[usize]) -> Result<f64, RestraintError> {
        let sigma = self.core.sigma_from_params(params)?;
        match &self.mode {
            PfMode::Precomputed { sse } => {
                Ok(self.core.neg_log_common(sigma, *sse) - self.core.reference_correction())
            }
            PfMode::Model {
                sse,
                prior,
                exp_ref,
                gaussian_ref,
                ..
            } => {
                if indices.len() < 7 {
                    return Err(RestraintError::Precondition(format!(
                        "protection-factor model mode requires 7 nuisance indices, got {}",
                        indices.len()
                    )));
                }
                let tuple = &indices[1..7];
                let mut result = self.core.neg_log_common(sigma, sse.get(tuple)?);
                if let Some(prior) = prior {
                    result += prior.get(tuple)?;
                }
                match self.core.ref_mode() {
                    crate::reference::ReferenceMode::Uniform => {}
                    crate::reference::ReferenceMode::Exp => {
                        if let Some(t) = exp_ref.get() {
                            result -= t.get(tuple)?;
                        }
                    }
                    crate::reference::ReferenceMode::Gaussian => {
                        if let Some(t) = gaussian_ref.get() {
                            result -= t.get(tuple)?;
                        }
                    }
                }
                Ok(result)
            }
        }
    }
}
