//! Network validation

use clap::Args;
use std::{collections::BTreeMap, io::Write};
use tracing::info;

use super::NetworkArgs;
use crate::error::CliResult;

/// Build and validate a network without running it
#[derive(Args, Debug)]
pub struct CheckCommand {
    #[command(flatten)]
    pub network: NetworkArgs,
}

impl CheckCommand {
    pub fn execute(self, out: &mut impl Write) -> CliResult<()> {
        let (net, config) = self.network.load()?;
        let kernel = net.build(config.clone())?;
        info!("Network {} is valid", self.network.network.display());

        let mut models: BTreeMap<&str, usize> = BTreeMap::new();
        for unit in net.units() {
            *models.entry(unit.params.name()).or_default() += 1;
        }
        let mut rules: BTreeMap<&str, usize> = BTreeMap::new();
        for connection in net.connections() {
            *rules.entry(connection.rule.name()).or_default() += 1;
        }

        writeln!(out, "units: {} ({})", kernel.num_units(), tally(&models))?;
        writeln!(out, "connections: {} ({})", kernel.num_connections(), tally(&rules))?;
        writeln!(out, "resolution: {} ms", config.resolution_ms)?;
        writeln!(
            out,
            "min delay: {} steps ({} ms)",
            kernel.min_delay(),
            kernel.min_delay() as f64 * config.resolution_ms
        )?;
        writeln!(
            out,
            "partitions: {} ({:?})",
            kernel.partitions().len(),
            config.partitioning
        )?;
        Ok(())
    }
}

fn tally(counts: &BTreeMap<&str, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    counts
        .iter()
        .map(|(name, n)| format!("{name}: {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
