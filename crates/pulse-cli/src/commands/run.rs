//! Simulation runs

use clap::Args;
use pulse_runtime::{MemoryRecorder, RecordingSpec, SpikeRecord, Step, UnitId};
use serde::Serialize;
use std::{collections::BTreeMap, io::Write};
use tracing::info;

use super::NetworkArgs;
use crate::error::CliResult;

/// Advance a network and report its spikes
#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    pub network: NetworkArgs,

    /// Number of resolution steps to simulate
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub steps: u64,

    /// Print the spike list as JSON instead of per-unit counts
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RunReport {
    steps: Step,
    resolution_ms: f64,
    min_delay: Step,
    spikes: Vec<SpikeRecord>,
}

impl RunCommand {
    pub fn execute(self, out: &mut impl Write) -> CliResult<()> {
        let (net, config) = self.network.load()?;
        let mut kernel = net.build(config.clone())?;
        let recorder = MemoryRecorder::new();
        let handle = recorder.handle();
        kernel.add_recorder(RecordingSpec::new().with_spikes(), Box::new(recorder))?;

        info!(
            "Running {} units for {} steps ({} ms)",
            kernel.num_units(),
            self.steps,
            self.steps as f64 * config.resolution_ms
        );
        let summary = kernel.advance(self.steps)?;
        info!(
            "Finished in {:.3?}: {} spikes, {} events delivered, {} exchanges",
            summary.wall_time, summary.spikes, summary.events_delivered, summary.intervals
        );
        let spikes = handle.spikes();

        if self.json {
            let report = RunReport {
                steps: summary.steps,
                resolution_ms: config.resolution_ms,
                min_delay: summary.min_delay,
                spikes,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
            return Ok(());
        }

        let mut counts: BTreeMap<UnitId, u64> = BTreeMap::new();
        for spike in &spikes {
            *counts.entry(spike.unit).or_default() += 1;
        }
        let seconds = summary.steps as f64 * config.resolution_ms / 1000.0;
        writeln!(out, "{:>8}  {:<16} {:>8} {:>10}", "unit", "model", "spikes", "rate_hz")?;
        for index in 0..kernel.num_units() {
            let unit = UnitId::new(index as u32);
            let n = counts.get(&unit).copied().unwrap_or(0);
            writeln!(
                out,
                "{:>8}  {:<16} {:>8} {:>10.2}",
                index,
                kernel.model_name(unit)?,
                n,
                n as f64 / seconds
            )?;
        }
        writeln!(
            out,
            "total: {} spikes in {} steps, mean rate {:.2} Hz",
            summary.spikes,
            summary.steps,
            summary.mean_rate_hz(kernel.num_units(), config.resolution_ms)
        )?;
        Ok(())
    }
}
