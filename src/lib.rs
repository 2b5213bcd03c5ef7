//! Bayesemble: Bayesian restraint energies for conformational ensembles
//!
//! This library reconciles simulated conformational ensembles with sparse,
//! noisy experimental observables. Each conformational state carries one
//! restraint per observable family (chemical shifts, scalar couplings,
//! NOE distances, hydrogen-exchange protection factors); a restraint
//! scores any nuisance-parameter assignment drawn from discretized grids
//! by a negative-log-posterior lookup, ready for an external
//! Markov-chain sampler.

pub mod config;
pub mod ensemble;
pub mod grid;
pub mod io;
pub mod observation;
pub mod reference;
pub mod restraint;

// Re-export commonly used types and functions
pub use config::FamilyConfig;
pub use ensemble::{build_lambda_ensembles, Ensemble, StateInput};
pub use grid::{ParameterGrid, Tensor};
pub use restraint::{ObservableFamily, Restraint};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
