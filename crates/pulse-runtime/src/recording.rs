//! Recording interface
//!
//! Recorders observe state samples, spikes and event deliveries. The kernel
//! hands them over after every exchange, merged across partitions in
//! non-decreasing step order with ties broken by unit id, so a recorder sees
//! the same sequence for every partitioning.

use crate::{
    error::*,
    ids::{Step, UnitId},
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Value of one state variable at the end of a step
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StateSample {
    /// Sampled unit
    pub unit: UnitId,
    /// Step
    pub step: Step,
    /// State variable name
    pub name: &'static str,
    /// Value
    pub value: f64,
}

/// A spike emitted by a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SpikeRecord {
    /// Emitting unit
    pub unit: UnitId,
    /// Emission step
    pub step: Step,
}

/// An event applied to its target
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeliveredEvent {
    /// Emitting unit
    pub source: UnitId,
    /// Receiving unit
    pub target: UnitId,
    /// Step at which the event was applied
    pub arrival: Step,
    /// Applied weight
    pub payload: f64,
}

/// Any record passed to a recorder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    /// State sample
    State(StateSample),
    /// Spike
    Spike(SpikeRecord),
    /// Delivered event
    Delivery(DeliveredEvent),
}

/// Observer of a running kernel
///
/// All methods default to ignoring the record.
pub trait Recorder: Send {
    /// A state variable was sampled
    fn on_state(&mut self, _sample: &StateSample) {}

    /// A unit emitted a spike
    fn on_spike(&mut self, _spike: &SpikeRecord) {}

    /// An event was applied to its target
    fn on_delivery(&mut self, _event: &DeliveredEvent) {}
}

/// What a recorder wants to see
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecordingSpec {
    /// Observed units; `None` observes every unit
    pub units: Option<Vec<UnitId>>,
    /// State variables sampled each `every` steps
    pub state: Vec<String>,
    /// Record spikes
    pub spikes: bool,
    /// Record event deliveries
    pub deliveries: bool,
    /// Sampling period of state variables (steps)
    pub every: Step,
}

impl Default for RecordingSpec {
    fn default() -> Self {
        Self {
            units: None,
            state: Vec::new(),
            spikes: false,
            deliveries: false,
            every: 1,
        }
    }
}

impl RecordingSpec {
    /// Record nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict recording to the given units
    pub fn with_units(mut self, units: impl IntoIterator<Item = UnitId>) -> Self {
        self.units = Some(units.into_iter().collect());
        self
    }

    /// Sample the named state variables
    pub fn with_state<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.state.extend(names.into_iter().map(Into::into));
        self
    }

    /// Record spikes
    pub fn with_spikes(mut self) -> Self {
        self.spikes = true;
        self
    }

    /// Record deliveries
    pub fn with_deliveries(mut self) -> Self {
        self.deliveries = true;
        self
    }

    /// Sample state every `steps` steps
    pub fn with_period(mut self, steps: Step) -> Self {
        self.every = steps;
        self
    }

    /// Validate the specification
    pub fn validate(&self) -> Result<()> {
        if self.every == 0 {
            return Err(RuntimeError::invalid_parameter("every", "0", ">= 1"));
        }
        if self.state.is_empty() && !self.spikes && !self.deliveries {
            return Err(RuntimeError::invalid_config(
                "recording spec selects neither state, spikes nor deliveries",
            ));
        }
        Ok(())
    }
}

/// Records captured by a [`MemoryRecorder`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    /// State samples
    pub states: Vec<StateSample>,
    /// Spikes
    pub spikes: Vec<SpikeRecord>,
    /// Deliveries
    pub deliveries: Vec<DeliveredEvent>,
}

impl Recording {
    /// Samples of one state variable of one unit
    pub fn trace(&self, unit: UnitId, name: &str) -> Vec<(Step, f64)> {
        self.states
            .iter()
            .filter(|s| s.unit == unit && s.name == name)
            .map(|s| (s.step, s.value))
            .collect()
    }

    /// Emission steps of one unit
    pub fn spike_steps(&self, unit: UnitId) -> Vec<Step> {
        self.spikes
            .iter()
            .filter(|s| s.unit == unit)
            .map(|s| s.step)
            .collect()
    }
}

/// Recorder that keeps everything in a shared buffer
///
/// The buffer stays readable through [`MemoryRecorder::handle`] after the
/// recorder itself has been moved into the kernel.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    buffer: Arc<Mutex<Recording>>,
}

impl MemoryRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the recorded data
    pub fn handle(&self) -> RecordingHandle {
        RecordingHandle {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl Recorder for MemoryRecorder {
    fn on_state(&mut self, sample: &StateSample) {
        self.buffer.lock().states.push(*sample);
    }

    fn on_spike(&mut self, spike: &SpikeRecord) {
        self.buffer.lock().spikes.push(*spike);
    }

    fn on_delivery(&mut self, event: &DeliveredEvent) {
        self.buffer.lock().deliveries.push(*event);
    }
}

/// Read access to a [`MemoryRecorder`]'s buffer
#[derive(Debug, Clone)]
pub struct RecordingHandle {
    buffer: Arc<Mutex<Recording>>,
}

impl RecordingHandle {
    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Recording {
        self.buffer.lock().clone()
    }

    /// Recorded spikes
    pub fn spikes(&self) -> Vec<SpikeRecord> {
        self.buffer.lock().spikes.clone()
    }

    /// Samples of one state variable of one unit
    pub fn trace(&self, unit: UnitId, name: &str) -> Vec<(Step, f64)> {
        self.buffer.lock().trace(unit, name)
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        *self.buffer.lock() = Recording::default();
    }
}

/// Recorder forwarding every record to a closure
pub struct CallbackRecorder<F>
where
    F: FnMut(&Record) + Send,
{
    callback: F,
}

impl<F> CallbackRecorder<F>
where
    F: FnMut(&Record) + Send,
{
    /// Wrap a closure
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Recorder for CallbackRecorder<F>
where
    F: FnMut(&Record) + Send,
{
    fn on_state(&mut self, sample: &StateSample) {
        (self.callback)(&Record::State(*sample));
    }

    fn on_spike(&mut self, spike: &SpikeRecord) {
        (self.callback)(&Record::Spike(*spike));
    }

    fn on_delivery(&mut self, event: &DeliveredEvent) {
        (self.callback)(&Record::Delivery(*event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_validation() {
        assert!(RecordingSpec::new().validate().is_err());
        assert!(RecordingSpec::new().with_spikes().validate().is_ok());
        assert!(RecordingSpec::new()
            .with_spikes()
            .with_period(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_unit_filter() {
        let spec = RecordingSpec::new().with_units([UnitId::new(2)]).with_spikes();
        assert_eq!(spec.units, Some(vec![UnitId::new(2)]));
        assert_eq!(RecordingSpec::new().units, None);
    }

    #[test]
    fn test_memory_recorder_handle() {
        let mut recorder = MemoryRecorder::new();
        let handle = recorder.handle();
        recorder.on_spike(&SpikeRecord {
            unit: UnitId::new(1),
            step: 4,
        });
        recorder.on_state(&StateSample {
            unit: UnitId::new(1),
            step: 4,
            name: "V_m",
            value: -65.0,
        });
        assert_eq!(handle.spikes().len(), 1);
        assert_eq!(handle.trace(UnitId::new(1), "V_m"), vec![(4, -65.0)]);
        assert_eq!(handle.snapshot().spike_steps(UnitId::new(1)), vec![4]);
        handle.clear();
        assert!(handle.spikes().is_empty());
    }

    #[test]
    fn test_callback_recorder() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut recorder = CallbackRecorder::new(move |record: &Record| {
            sink.lock().push(*record);
        });
        recorder.on_spike(&SpikeRecord {
            unit: UnitId::new(0),
            step: 1,
        });
        assert!(matches!(seen.lock()[0], Record::Spike(_)));
    }
}
