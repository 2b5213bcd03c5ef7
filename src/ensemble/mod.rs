//! Per-state aggregation of restraints over a conformational ensemble

use crate::config::FamilyConfig;
use crate::observation::DataTable;
use crate::restraint::{
    protection_factor::assemble_contact_tensors, ChemicalShiftRestraint, ContactCountSource,
    DistanceRestraint, ObservableFamily, ProtectionFactorRestraint, Restraint, RestraintError,
    ScalarCouplingRestraint,
};
use log::{debug, info};
use rayon::prelude::*;
use thiserror::Error;

/// Errors that can occur while building an ensemble
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Unsupported restraint family: '{0}'")]
    UnsupportedFamily(String),

    #[error("Lambda must be a finite scalar, got {0}")]
    InvalidLambda(f64),

    #[error("State energies must be finite: energy[{index}] = {value}")]
    InvalidEnergy { index: usize, value: f64 },

    #[error("Expected {expected} input states to match the energies, got {actual}")]
    StateCount { expected: usize, actual: usize },

    #[error("Expected one config per observable family ({expected}), got {actual}")]
    ConfigCount { expected: usize, actual: usize },

    #[error("Config kind does not match family '{tag}' of state 0")]
    ConfigKindMismatch { tag: String },

    #[error("State {state} is missing data for family '{tag}'")]
    MissingFamilyData { state: usize, tag: String },

    #[error("State {state} has duplicate data for family '{tag}'")]
    DuplicateFamilyData { state: usize, tag: String },

    #[error("Protection-factor model mode requires a contact-count source")]
    MissingContactSource,

    #[error("Failed to read pf_prior tensor: {0}")]
    PriorTensor(#[from] crate::io::IoError),

    #[error("Restraint error: {0}")]
    Restraint(#[from] RestraintError),
}

/// Observation data for one observable family of one conformational
/// state, tagged with the family label parsed from the input filename
/// (e.g. `"cs_H"`, `"J"`, `"noe"`, `"pf"`).
#[derive(Debug, Clone)]
pub struct StateInput {
    pub tag: String,
    pub table: DataTable,
}

impl StateInput {
    pub fn new(tag: &str, table: DataTable) -> Self {
        Self {
            tag: tag.to_string(),
            table,
        }
    }
}

/// Resolve an input tag to its observable family and optional nucleus
/// extension. The mapping is a closed table; anything else is an
/// `UnsupportedFamily` error rather than a dynamic lookup.
pub fn resolve_family(tag: &str) -> Result<(ObservableFamily, Option<&str>), EnsembleError> {
    let (key, extension) = match tag.split_once('_') {
        Some((key, ext)) => (key, Some(ext)),
        None => (tag, None),
    };
    let family = match key {
        "cs" => ObservableFamily::ChemicalShift,
        "J" => ObservableFamily::ScalarCoupling,
        "noe" => ObservableFamily::Distance,
        "pf" => ObservableFamily::ProtectionFactor,
        _ => return Err(EnsembleError::UnsupportedFamily(tag.to_string())),
    };
    Ok((family, extension))
}

/// A collection of restraints per conformational state, scaled by a
/// thermodynamic coupling strength lambda.
pub struct Ensemble {
    lambda: f64,
    energies: Vec<f64>,
    states: Vec<Vec<Box<dyn Restraint>>>,
}

impl Ensemble {
    /// Validate lambda and the per-state free energies, scaling the
    /// energies by lambda.
    pub fn new(lambda: f64, energies: Vec<f64>) -> Result<Self, EnsembleError> {
        if !lambda.is_finite() {
            return Err(EnsembleError::InvalidLambda(lambda));
        }
        for (index, &value) in energies.iter().enumerate() {
            if !value.is_finite() {
                return Err(EnsembleError::InvalidEnergy { index, value });
            }
        }

        let energies = energies.into_iter().map(|e| lambda * e).collect();
        Ok(Self {
            lambda,
            energies,
            states: Vec::new(),
        })
    }

    /// Coupling strength
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Lambda-scaled state energies
    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    /// Number of conformational states
    pub fn num_states(&self) -> usize {
        self.energies.len()
    }

    /// Build one restraint per (state, observable family) pair.
    ///
    /// Family order is fixed by `input[0]`; every other state is matched
    /// to those tags by name, so per-state restraint lists stay
    /// positionally aligned regardless of input order within a state.
    /// `configs` is positionally aligned with the family order of state 0.
    pub fn initialize_restraints(
        &mut self,
        input: &[Vec<StateInput>],
        configs: &[FamilyConfig],
        contact_source: Option<&dyn ContactCountSource>,
    ) -> Result<(), EnsembleError> {
        if input.len() != self.energies.len() {
            return Err(EnsembleError::StateCount {
                expected: self.energies.len(),
                actual: input.len(),
            });
        }
        let family_order: Vec<&str> = match input.first() {
            Some(state) => state.iter().map(|s| s.tag.as_str()).collect(),
            None => return Ok(()),
        };
        if configs.len() != family_order.len() {
            return Err(EnsembleError::ConfigCount {
                expected: family_order.len(),
                actual: configs.len(),
            });
        }

        info!(
            "initializing {} restraint(s) x {} state(s) at lambda = {}",
            family_order.len(),
            self.energies.len(),
            self.lambda
        );

        self.states = Vec::with_capacity(self.energies.len());
        for (state, state_input) in input.iter().enumerate() {
            let energy = self.energies[state];
            let mut restraints: Vec<Box<dyn Restraint>> = Vec::with_capacity(family_order.len());
            for (tag, config) in family_order.iter().zip(configs) {
                let table = find_state_table(state_input, state, tag)?;
                let restraint =
                    build_restraint(tag, table, energy, config, state, contact_source)?;
                debug!(
                    "state {}: {} restraint with {} observation(s), dof = {}",
                    state,
                    restraint.family(),
                    restraint.observations().len(),
                    restraint.dof()
                );
                restraints.push(restraint);
            }
            self.states.push(restraints);
        }
        Ok(())
    }

    /// Read-only view of the per-state restraint collections
    pub fn to_list(&self) -> &[Vec<Box<dyn Restraint>>] {
        &self.states
    }
}

fn find_state_table<'a>(
    state_input: &'a [StateInput],
    state: usize,
    tag: &str,
) -> Result<&'a DataTable, EnsembleError> {
    let mut found = None;
    for input in state_input {
        if input.tag == tag {
            if found.is_some() {
                return Err(EnsembleError::DuplicateFamilyData {
                    state,
                    tag: tag.to_string(),
                });
            }
            found = Some(&input.table);
        }
    }
    found.ok_or_else(|| EnsembleError::MissingFamilyData {
        state,
        tag: tag.to_string(),
    })
}

/// Closed dispatch from a family tag to a concrete restraint variant
fn build_restraint(
    tag: &str,
    table: &DataTable,
    energy: f64,
    config: &FamilyConfig,
    state: usize,
    contact_source: Option<&dyn ContactCountSource>,
) -> Result<Box<dyn Restraint>, EnsembleError> {
    let (family, extension) = resolve_family(tag)?;
    match (family, config) {
        (ObservableFamily::ChemicalShift, FamilyConfig::ChemicalShift(c)) => Ok(Box::new(
            ChemicalShiftRestraint::from_table(table, energy, extension, c)?,
        )),
        (ObservableFamily::ScalarCoupling, FamilyConfig::ScalarCoupling(c)) => Ok(Box::new(
            ScalarCouplingRestraint::from_table(table, energy, c)?,
        )),
        (ObservableFamily::Distance, FamilyConfig::Distance(c)) => {
            Ok(Box::new(DistanceRestraint::from_table(table, energy, c)?))
        }
        (ObservableFamily::ProtectionFactor, FamilyConfig::ProtectionFactor(c)) => {
            let contacts = if c.precomputed {
                None
            } else {
                let source = contact_source.ok_or(EnsembleError::MissingContactSource)?;
                let xcs = c.xcs.linear_grid("xcs").map_err(RestraintError::from)?;
                let xhs = c.xhs.linear_grid("xhs").map_err(RestraintError::from)?;
                let bs = c.bs.linear_grid("bs").map_err(RestraintError::from)?;
                Some(assemble_contact_tensors(
                    source,
                    &xcs,
                    &xhs,
                    &bs,
                    state,
                    table.rows(),
                )?)
            };
            let prior = match &c.pf_prior {
                Some(path) => Some(crate::io::read_tensor(path)?),
                None => None,
            };
            Ok(Box::new(ProtectionFactorRestraint::from_table(
                table, energy, c, contacts, prior,
            )?))
        }
        _ => Err(EnsembleError::ConfigKindMismatch {
            tag: tag.to_string(),
        }),
    }
}

/// Build one independent ensemble per lambda value in parallel. The
/// ensembles share no mutable state and can be handed to separate
/// sampler workers.
pub fn build_lambda_ensembles(
    lambdas: &[f64],
    energies: &[f64],
    input: &[Vec<StateInput>],
    configs: &[FamilyConfig],
    contact_source: Option<&dyn ContactCountSource>,
) -> Result<Vec<Ensemble>, EnsembleError> {
    lambdas
        .par_iter()
        .map(|&lambda| {
            let mut ensemble = Ensemble::new(lambda, energies.to_vec())?;
            ensemble.initialize_restraints(input, configs, contact_source)?;
            Ok(ensemble)
        })
        .collect()
}
