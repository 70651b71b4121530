//! Unit emitting spikes at prescribed times

use crate::{config::SimContext, error::*, Step};

/// Parameters of a spike source
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpikeSourceParams {
    /// Emission times (ms); rounded to the nearest step
    pub spike_times_ms: Vec<f64>,
}

impl SpikeSourceParams {
    /// Source firing at the given times
    pub fn new(spike_times_ms: impl Into<Vec<f64>>) -> Self {
        Self {
            spike_times_ms: spike_times_ms.into(),
        }
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for &t in &self.spike_times_ms {
            if !(t.is_finite() && t >= 0.0) {
                return Err(RuntimeError::invalid_parameter(
                    "spike_times_ms",
                    t.to_string(),
                    "finite and >= 0.0",
                ));
            }
        }
        Ok(())
    }
}

/// Spike source replaying a sorted step schedule
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeSource {
    schedule: Vec<Step>,
    next: usize,
}

impl SpikeSource {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] = &[];

    /// Convert emission times to steps; coinciding steps fire once
    pub fn new(params: SpikeSourceParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let mut schedule: Vec<Step> = params
            .spike_times_ms
            .iter()
            .map(|t| (t / ctx.resolution_ms).round() as Step)
            .collect();
        schedule.sort_unstable();
        let requested = schedule.len();
        schedule.dedup();
        if schedule.len() < requested {
            log::warn!(
                "spike_source: {} spike times collapse onto an earlier step and are dropped",
                requested - schedule.len()
            );
        }
        let next = schedule.partition_point(|&s| s < ctx.step);
        Ok(Self { schedule, next })
    }

    /// Scheduled emission steps
    pub fn schedule(&self) -> &[Step] {
        &self.schedule
    }

    /// True if the source emits at `step`; consumes the schedule entry
    pub fn fires_at(&mut self, step: Step) -> bool {
        while self.next < self.schedule.len() && self.schedule[self.next] < step {
            self.next += 1;
        }
        if self.schedule.get(self.next) == Some(&step) {
            self.next += 1;
            true
        } else {
            false
        }
    }
}
