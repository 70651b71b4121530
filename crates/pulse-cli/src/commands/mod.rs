//! CLI command implementations for pulse

use clap::{Args, Parser, Subcommand};
use pulse_runtime::{KernelConfig, NetworkBuilder};
use std::path::PathBuf;
use tracing::debug;

use crate::{config::NetworkFile, error::CliResult};

pub mod check;
pub mod run;

/// pulse - deterministic simulation of spiking point-neuron networks
#[derive(Parser, Debug)]
#[command(
    name = "pulse",
    version,
    about = "Deterministic simulation of spiking point-neuron networks",
    long_about = "pulse builds a network of spiking point neurons from a TOML description \
                  and advances it on a fixed time grid. Results are identical for any \
                  number of worker threads."
)]
pub struct PulseCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and validate a network, then print a summary
    Check(check::CheckCommand),

    /// Build a network and advance it a number of steps
    Run(run::RunCommand),
}

impl PulseCli {
    /// Execute the CLI command, writing its output to stdout
    pub fn execute(self) -> CliResult<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        match self.command {
            Commands::Check(cmd) => cmd.execute(&mut out),
            Commands::Run(cmd) => cmd.execute(&mut out),
        }
    }
}

/// Network selection shared by all commands
#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Network description (TOML)
    #[arg(short, long)]
    pub network: PathBuf,

    /// Override the number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Override the seed for stochastic synapses
    #[arg(long)]
    pub seed: Option<u64>,
}

impl NetworkArgs {
    /// Load the network file and apply the command-line overrides
    pub fn load(&self) -> CliResult<(NetworkBuilder, KernelConfig)> {
        let file = NetworkFile::load(&self.network)?;
        debug!(
            "Loaded {} with {} units in {} groups",
            self.network.display(),
            file.num_units(),
            file.units.len()
        );
        let mut config = file.kernel.clone();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        Ok((file.builder(), config))
    }
}
