//! Unit state machine: integrate, apply arriving events, detect spikes

use crate::{
    config::SimContext,
    delivery::{Event, EventRing},
    error::*,
    ids::{PartitionId, Step, UnitId},
    model::{Dynamics, SpikeDetector},
    plasticity::PostArchive,
};
use smallvec::SmallVec;

/// Whether a unit may currently emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    /// Free to emit
    Integrating,
    /// Emission suppressed for the given number of further steps
    Refractory(Step),
}

/// A simulated unit owned by one partition
#[derive(Debug, Clone)]
pub struct Unit {
    id: UnitId,
    dynamics: Dynamics,
    detector: SpikeDetector,
    refractory_steps: Step,
    refractory: Step,
    prev_membrane: f64,
    ring: EventRing,
    archive: Option<PostArchive>,
    targets: SmallVec<[PartitionId; 4]>,
}

impl Unit {
    /// Wrap built dynamics with a ring covering `span` steps
    pub fn new(id: UnitId, dynamics: Dynamics, span: usize, resolution_ms: f64) -> Self {
        Self {
            id,
            detector: dynamics.detector(),
            refractory_steps: dynamics.refractory_steps(resolution_ms),
            refractory: 0,
            prev_membrane: dynamics.membrane(),
            ring: EventRing::new(span),
            archive: None,
            targets: SmallVec::new(),
            dynamics,
        }
    }

    /// Unit id
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Dynamics
    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    /// Mutable dynamics, for setting initial state
    pub fn dynamics_mut(&mut self) -> &mut Dynamics {
        &mut self.dynamics
    }

    /// Current phase
    pub fn phase(&self) -> UnitPhase {
        if self.refractory > 0 {
            UnitPhase::Refractory(self.refractory)
        } else {
            UnitPhase::Integrating
        }
    }

    /// Read a named state variable
    pub fn state(&self, name: &str) -> Option<f64> {
        self.dynamics.state(name)
    }

    /// Partitions hosting connections from this unit
    pub fn targets(&self) -> &[PartitionId] {
        &self.targets
    }

    /// Register a partition that hosts a connection from this unit
    pub fn add_target(&mut self, partition: PartitionId) {
        if let Err(pos) = self.targets.binary_search(&partition) {
            self.targets.insert(pos, partition);
        }
    }

    /// Attach a spike archive for incoming timing-dependent connections
    pub fn attach_archive(&mut self, archive: PostArchive) {
        self.archive = Some(archive);
    }

    /// Spike archive, if any plastic connection targets this unit
    pub fn archive_mut(&mut self) -> Option<&mut PostArchive> {
        self.archive.as_mut()
    }

    /// Queue an event for its arrival step
    pub fn register(&mut self, event: Event) {
        self.ring.register(event);
    }

    /// Events waiting in the ring
    pub fn pending_events(&self) -> usize {
        self.ring.len()
    }

    /// Advance through step `ctx.step`
    ///
    /// The dynamics integrate first, then events arriving at this step are
    /// applied and the detector runs. `delivered` sees every applied event.
    /// Returns true if the unit emitted a spike.
    pub fn update<F>(&mut self, ctx: &SimContext, mut delivered: F) -> Result<bool>
    where
        F: FnMut(&Event),
    {
        let step = ctx.step;
        self.dynamics
            .integrate(ctx, self.refractory > 0)
            .map_err(|failure| RuntimeError::numerical_fault(self.id, step, failure.to_string()))?;
        if self.refractory > 0 {
            self.refractory -= 1;
        }

        let dynamics = &mut self.dynamics;
        self.ring.drain(step, |event| {
            dynamics.receive(event.channel, event.payload);
            delivered(event);
        });

        if !self.dynamics.is_finite() {
            return Err(RuntimeError::numerical_fault(
                self.id,
                step,
                "state is not finite",
            ));
        }

        let membrane = self.dynamics.membrane();
        let crossed = match self.detector {
            SpikeDetector::Threshold => membrane >= self.dynamics.threshold(),
            SpikeDetector::Peak { level } => membrane >= level && membrane <= self.prev_membrane,
            SpikeDetector::Scheduled => self.dynamics.scheduled_at(step),
            SpikeDetector::Silent => false,
        };
        self.prev_membrane = membrane;

        if !crossed || self.refractory > 0 {
            return Ok(false);
        }

        self.dynamics.on_spike();
        self.refractory = self.refractory_steps;
        if let Some(archive) = self.archive.as_mut() {
            archive.record(step, ctx.resolution_ms);
        }
        Ok(true)
    }
}
