//! # pulse - command-line driver
//!
//! Builds a network from a static TOML description, validates it and
//! advances the kernel for a fixed number of steps.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_cli::PulseCli;

fn main() {
    let cli = PulseCli::parse();

    // RUST_LOG wins over --verbose; kernel `log` records are bridged in by `init`
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
