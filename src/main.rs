//! Main executable for bayesemble

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use bayesemble::ensemble::{build_lambda_ensembles, Ensemble};
use bayesemble::io::{collect_state_inputs, read_configs, read_vector, DirContactSource};
use bayesemble::restraint::ContactCountSource;

/// Command-line arguments for the application
#[derive(Parser, Debug)]
#[clap(
    name = "bayesemble",
    version = bayesemble::VERSION,
    about = "Bayesian restraint energies for conformational ensembles"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build restraints and report per-state posterior energies at the
    /// initial nuisance-parameter assignment
    Score {
        /// Directory of observation files named <state>.<family>
        #[clap(long, value_parser)]
        data: PathBuf,

        /// File of per-state conformational free energies (kT units)
        #[clap(long, value_parser)]
        energies: PathBuf,

        /// JSON array of per-family restraint configurations
        #[clap(long, short, value_parser)]
        config: PathBuf,

        /// Directory of per-grid-point contact-count files, required
        /// for protection-factor restraints in model mode
        #[clap(long, value_parser)]
        contacts: Option<PathBuf>,

        /// Coupling strengths; one ensemble is built per value
        #[clap(long, value_parser, value_delimiter = ',', default_value = "1.0")]
        lambdas: Vec<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            data,
            energies,
            config,
            contacts,
            lambdas,
        } => {
            let energies = read_vector(&energies)
                .with_context(|| format!("Failed to read energies: {}", energies.display()))?;
            let configs = read_configs(&config)
                .with_context(|| format!("Failed to read config: {}", config.display()))?;
            let input = collect_state_inputs(&data)
                .with_context(|| format!("Failed to read observation data: {}", data.display()))?;

            info!(
                "loaded {} state(s), {} famil(ies), {} lambda value(s)",
                energies.len(),
                configs.len(),
                lambdas.len()
            );

            let contact_source = contacts.map(DirContactSource::new);
            let ensembles = build_lambda_ensembles(
                &lambdas,
                &energies,
                &input,
                &configs,
                contact_source
                    .as_ref()
                    .map(|s| s as &dyn ContactCountSource),
            )?;

            for ensemble in &ensembles {
                report(ensemble)?;
            }

            info!("scoring completed successfully");
        }
    }

    Ok(())
}

/// Print per-state posterior energies at the initial grid indices
fn report(ensemble: &Ensemble) -> Result<()> {
    println!("lambda = {}", ensemble.lambda());
    for (state, restraints) in ensemble.to_list().iter().enumerate() {
        let mut total = ensemble.energies()[state];
        for restraint in restraints {
            let (params, indices) = restraint.initial_parameters();
            total += restraint.neg_log_posterior(&params, &indices)?;
        }
        println!("  state {:>4}: -ln P = {:.6}", state, total);
    }
    Ok(())
}
