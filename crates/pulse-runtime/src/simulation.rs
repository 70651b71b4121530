//! Simulation kernel: interval loop, exchange and recording

use crate::{
    config::KernelConfig,
    delivery::{EmittedSpike, OutboxBatch, RoutedSpike, SpikeExchange},
    error::*,
    ids::{ConnectionId, PartitionId, Step, UnitId},
    partition::{Partition, Probe},
    plasticity::Connection,
    recording::{Record, Recorder, RecordingSpec, SpikeRecord},
};
use smallvec::SmallVec;
use std::{
    collections::BTreeSet,
    fmt,
    time::{Duration, Instant},
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of one [`Kernel::advance`] call
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Steps simulated by this call
    pub steps: Step,
    /// First step of this call
    pub start_step: Step,
    /// Step the kernel will compute next
    pub end_step: Step,
    /// Exchanges performed
    pub intervals: u64,
    /// Spikes emitted during this call
    pub spikes: u64,
    /// Events applied to their targets during this call
    pub events_delivered: u64,
    /// Minimum network delay (steps)
    pub min_delay: Step,
    /// Wall-clock duration of the call
    pub wall_time: Duration,
}

impl RunSummary {
    fn empty(step: Step, min_delay: Step) -> Self {
        Self {
            steps: 0,
            start_step: step,
            end_step: step,
            intervals: 0,
            spikes: 0,
            events_delivered: 0,
            min_delay,
            wall_time: Duration::ZERO,
        }
    }

    /// Mean spike rate per unit (Hz) over the simulated span
    pub fn mean_rate_hz(&self, units: usize, resolution_ms: f64) -> f64 {
        let seconds = self.steps as f64 * resolution_ms / 1000.0;
        if units == 0 || seconds <= 0.0 {
            return 0.0;
        }
        self.spikes as f64 / units as f64 / seconds
    }
}

struct RecorderSlot {
    spec: RecordingSpec,
    recorder: Box<dyn Recorder>,
}

/// A built network ready to run
///
/// Time advances in intervals of at most `min_delay` steps. Within an
/// interval every partition runs independently; spikes are exchanged and
/// registered at the interval end. Results do not depend on the number of
/// workers, the partitioning strategy or how a run is split across
/// [`Kernel::advance`] calls.
pub struct Kernel {
    config: KernelConfig,
    partitions: Vec<Partition>,
    locations: Vec<(usize, usize)>,
    connection_locations: Vec<(usize, usize)>,
    exchange: SpikeExchange,
    recorders: Vec<RecorderSlot>,
    spike_watch: Vec<SmallVec<[usize; 2]>>,
    pending_records: Vec<(usize, Record)>,
    min_delay: Step,
    current_step: Step,
    interval: u64,
    spikes_total: u64,
    fault: Option<RuntimeError>,
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("units", &self.locations.len())
            .field("connections", &self.connection_locations.len())
            .field("partitions", &self.partitions.len())
            .field("recorders", &self.recorders.len())
            .field("min_delay", &self.min_delay)
            .field("current_step", &self.current_step)
            .field("faulted", &self.fault.is_some())
            .finish()
    }
}

impl Kernel {
    pub(crate) fn new(
        config: KernelConfig,
        partitions: Vec<Partition>,
        locations: Vec<(usize, usize)>,
        min_delay: Step,
    ) -> Result<Self> {
        let n_connections: usize = partitions.iter().map(|p| p.connections().len()).sum();
        let mut connection_locations = vec![(0, 0); n_connections];
        for (p, partition) in partitions.iter().enumerate() {
            for (index, conn) in partition.connections().iter().enumerate() {
                connection_locations[conn.id.index()] = (p, index);
            }
        }

        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("pulse-worker-{i}"))
            .build()
            .map_err(|e| RuntimeError::invalid_config(format!("worker pool: {e}")))?;

        let exchange = SpikeExchange::new(
            partitions.len(),
            Duration::from_millis(config.exchange_timeout_ms),
        );
        let n_units = locations.len();

        Ok(Self {
            config,
            partitions,
            locations,
            connection_locations,
            exchange,
            recorders: Vec::new(),
            spike_watch: vec![SmallVec::new(); n_units],
            pending_records: Vec::new(),
            min_delay,
            current_step: 0,
            interval: 0,
            spikes_total: 0,
            fault: None,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Kernel configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Number of units
    pub fn num_units(&self) -> usize {
        self.locations.len()
    }

    /// Number of connections
    pub fn num_connections(&self) -> usize {
        self.connection_locations.len()
    }

    /// Minimum network delay (steps), the interval length
    pub fn min_delay(&self) -> Step {
        self.min_delay
    }

    /// Step the kernel will compute next
    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// Simulated time (ms)
    pub fn time_ms(&self) -> f64 {
        self.current_step as f64 * self.config.resolution_ms
    }

    /// Spikes emitted since the kernel was built
    pub fn spikes_emitted(&self) -> u64 {
        self.spikes_total
    }

    /// Fault that stopped the kernel, if any
    pub fn fault(&self) -> Option<&RuntimeError> {
        self.fault.as_ref()
    }

    /// Partitions in index order
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Partition hosting `unit`
    pub fn partition_of(&self, unit: UnitId) -> Option<PartitionId> {
        self.locations
            .get(unit.index())
            .map(|&(p, _)| PartitionId::new(p as u16))
    }

    fn locate(&self, unit: UnitId) -> Result<(usize, usize)> {
        self.locations
            .get(unit.index())
            .copied()
            .ok_or(RuntimeError::UnitNotFound { unit })
    }

    /// Model name of a unit
    pub fn model_name(&self, unit: UnitId) -> Result<&'static str> {
        let (p, local) = self.locate(unit)?;
        Ok(self.partitions[p].units()[local].dynamics().model_name())
    }

    /// Read a named state variable
    pub fn state(&self, unit: UnitId, name: &str) -> Result<f64> {
        let (p, local) = self.locate(unit)?;
        let hosted = &self.partitions[p].units()[local];
        hosted.state(name).ok_or_else(|| {
            RuntimeError::invalid_parameter(
                name,
                format!("unit {unit}"),
                format!("a state variable of {}", hosted.dynamics().model_name()),
            )
        })
    }

    /// Overwrite a named state variable between runs
    pub fn set_state(&mut self, unit: UnitId, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                name,
                value.to_string(),
                "finite",
            ));
        }
        let (p, local) = self.locate(unit)?;
        let hosted = self.partitions[p]
            .unit_mut(local)
            .ok_or(RuntimeError::UnitNotFound { unit })?;
        if hosted.dynamics_mut().set_state(name, value) {
            Ok(())
        } else {
            Err(RuntimeError::invalid_parameter(
                name,
                format!("unit {unit}"),
                format!("a state variable of {}", hosted.dynamics().model_name()),
            ))
        }
    }

    /// Connection by id
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        let &(p, index) = self.connection_locations.get(id.index())?;
        self.partitions[p].connections().get(index)
    }

    /// Current weight of a connection
    pub fn weight(&self, id: ConnectionId) -> Option<f64> {
        self.connection(id).map(|c| c.weight)
    }

    /// Attach a recorder; returns its index
    ///
    /// State names are checked against the observed units' models. A name
    /// that no observed unit provides is an error; units whose model lacks a
    /// name simply produce no samples for it.
    pub fn add_recorder(
        &mut self,
        spec: RecordingSpec,
        recorder: Box<dyn Recorder>,
    ) -> Result<usize> {
        spec.validate()?;
        let observed: BTreeSet<UnitId> = match &spec.units {
            Some(units) => {
                for &unit in units {
                    self.locate(unit)?;
                }
                units.iter().copied().collect()
            }
            None => (0..self.locations.len())
                .map(|i| UnitId::new(i as u32))
                .collect(),
        };

        let index = self.recorders.len();
        let mut probes = Vec::new();
        let mut matched: BTreeSet<&str> = BTreeSet::new();
        for &unit in &observed {
            let (p, local) = self.locate(unit)?;
            let available = self.partitions[p].units()[local].dynamics().state_names();
            let names: Vec<&'static str> = spec
                .state
                .iter()
                .filter_map(|wanted| available.iter().copied().find(|n| *n == wanted.as_str()))
                .collect();
            matched.extend(names.iter().copied());
            if !names.is_empty() || spec.deliveries {
                probes.push((
                    p,
                    local,
                    Probe {
                        recorder: index,
                        names,
                        every: spec.every,
                        deliveries: spec.deliveries,
                    },
                ));
            }
        }
        if let Some(missing) = spec.state.iter().find(|n| !matched.contains(n.as_str())) {
            return Err(RuntimeError::invalid_parameter(
                "state",
                missing.clone(),
                "a state variable of at least one observed unit",
            ));
        }

        for (p, local, probe) in probes {
            self.partitions[p].add_probe(local, probe);
        }
        if spec.spikes {
            for unit in &observed {
                self.spike_watch[unit.index()].push(index);
            }
        }
        log::debug!(
            "recorder {}: {} units, state {:?}, spikes {}, deliveries {}",
            index,
            observed.len(),
            spec.state,
            spec.spikes,
            spec.deliveries
        );
        self.recorders.push(RecorderSlot { spec, recorder });
        Ok(index)
    }

    /// Recording specification of a recorder
    pub fn recording_spec(&self, index: usize) -> Option<&RecordingSpec> {
        self.recorders.get(index).map(|slot| &slot.spec)
    }

    /// Simulate `steps` further steps
    ///
    /// A fault leaves the kernel stopped; later calls return the same fault.
    pub fn advance(&mut self, steps: Step) -> Result<RunSummary> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        let start_step = self.current_step;
        if steps == 0 {
            return Ok(RunSummary::empty(start_step, self.min_delay));
        }
        let target = start_step.checked_add(steps).ok_or_else(|| {
            RuntimeError::invalid_parameter("steps", steps.to_string(), "within the step range")
        })?;

        log::info!(
            "Advancing {} steps ({} ms) from step {}: {} partitions, min delay {} steps",
            steps,
            steps as f64 * self.config.resolution_ms,
            start_step,
            self.partitions.len(),
            self.min_delay
        );
        let started = Instant::now();
        let spikes_before = self.spikes_total;
        let delivered_before = self.events_delivered();
        let expected_intervals = steps.div_ceil(self.min_delay).max(1);
        let progress_every = (expected_intervals / 10).max(1);
        let mut intervals = 0u64;

        while self.current_step < target {
            let end = (self.current_step + self.min_delay).min(target);
            if let Err(err) = self.run_interval(end) {
                log::error!("Run aborted at step {}: {}", self.current_step, err);
                self.fault = Some(err.clone());
                return Err(err);
            }
            self.current_step = end;
            self.interval += 1;
            intervals += 1;
            if intervals % progress_every == 0 {
                log::debug!(
                    "Simulation progress: {:.1}% (step {})",
                    100.0 * (end - start_step) as f64 / steps as f64,
                    end
                );
            }
        }

        let summary = RunSummary {
            steps,
            start_step,
            end_step: self.current_step,
            intervals,
            spikes: self.spikes_total - spikes_before,
            events_delivered: self.events_delivered() - delivered_before,
            min_delay: self.min_delay,
            wall_time: started.elapsed(),
        };
        log::info!(
            "Simulation completed: {} spikes in {} steps ({} intervals, {:?})",
            summary.spikes,
            summary.steps,
            summary.intervals,
            summary.wall_time
        );
        Ok(summary)
    }

    fn events_delivered(&self) -> u64 {
        self.partitions.iter().map(Partition::events_delivered).sum()
    }

    fn run_interval(&mut self, end: Step) -> Result<()> {
        let interval = self.interval;
        self.run_partitions(end, interval);

        let merged = self.exchange.collect(interval)?;
        self.spikes_total += merged.len() as u64;

        self.pending_records.clear();
        for spike in merged {
            for &recorder in &self.spike_watch[spike.source.index()] {
                self.pending_records.push((
                    recorder,
                    Record::Spike(SpikeRecord {
                        unit: spike.source,
                        step: spike.step,
                    }),
                ));
            }
        }
        self.dispatch_records();
        self.deliver_routed();
        Ok(())
    }

    fn run_partitions(&mut self, end: Step, interval: u64) {
        let ctx = self.config.context(self.current_step);
        let outboxes: Vec<Vec<EmittedSpike>> = (0..self.partitions.len())
            .map(|p| self.exchange.take_buffer(p))
            .collect();
        let sender = self.exchange.sender();

        #[cfg(feature = "parallel")]
        {
            let partitions = &mut self.partitions;
            self.pool.install(|| {
                partitions
                    .par_iter_mut()
                    .zip(outboxes.into_par_iter())
                    .for_each_with(sender, |tx, (partition, outbox)| {
                        let batch = OutboxBatch {
                            interval,
                            partition: partition.id(),
                            spikes: partition.run_interval(ctx, end, outbox),
                        };
                        if tx.send(batch).is_err() {
                            log::error!("exchange closed before partition {} reported", partition.id());
                        }
                    });
            });
        }

        #[cfg(not(feature = "parallel"))]
        for (partition, outbox) in self.partitions.iter_mut().zip(outboxes) {
            let batch = OutboxBatch {
                interval,
                partition: partition.id(),
                spikes: partition.run_interval(ctx, end, outbox),
            };
            if sender.send(batch).is_err() {
                log::error!("exchange closed before partition {} reported", partition.id());
            }
        }
    }

    /// Hand the interval's records to the recorders in (step, unit) order
    fn dispatch_records(&mut self) {
        for partition in &mut self.partitions {
            let records = partition.records_mut();
            self.pending_records.extend(
                records
                    .deliveries
                    .drain(..)
                    .map(|(r, event)| (r, Record::Delivery(event))),
            );
            self.pending_records
                .extend(records.states.drain(..).map(|(r, s)| (r, Record::State(s))));
        }
        if self.pending_records.is_empty() {
            return;
        }
        // within one unit and step: applied events, then the spike, then samples
        self.pending_records.sort_by_key(|(_, record)| match record {
            Record::Delivery(e) => (e.arrival, e.target, 0u8),
            Record::Spike(s) => (s.step, s.unit, 1),
            Record::State(s) => (s.step, s.unit, 2),
        });
        for (index, record) in self.pending_records.drain(..) {
            let recorder = &mut self.recorders[index].recorder;
            match &record {
                Record::State(sample) => recorder.on_state(sample),
                Record::Spike(spike) => recorder.on_spike(spike),
                Record::Delivery(event) => recorder.on_delivery(event),
            }
        }
    }

    fn deliver_routed(&mut self) {
        let resolution_ms = self.config.resolution_ms;
        let inboxes: &[Vec<RoutedSpike>] = self.exchange.route();

        #[cfg(feature = "parallel")]
        let registered: usize = {
            let partitions = &mut self.partitions;
            self.pool.install(|| {
                partitions
                    .par_iter_mut()
                    .zip(inboxes.par_iter())
                    .map(|(partition, inbox)| partition.deliver(inbox, resolution_ms))
                    .sum()
            })
        };

        #[cfg(not(feature = "parallel"))]
        let registered: usize = self
            .partitions
            .iter_mut()
            .zip(inboxes.iter())
            .map(|(partition, inbox)| partition.deliver(inbox, resolution_ms))
            .sum();

        log::trace!(
            "interval {}: registered {} events",
            self.interval,
            registered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{IafPscExpParams, ModelParams, SpikeSourceParams},
        network::{ConnectionDescriptor, NetworkBuilder},
        recording::MemoryRecorder,
    };

    fn driven_pair(workers: usize) -> (Kernel, UnitId, UnitId) {
        let mut net = NetworkBuilder::new();
        let a = net.add_unit(ModelParams::IafPscExp(
            IafPscExpParams::default().with_current(500.0),
        ));
        let b = net.add_unit(ModelParams::IafPscExp(IafPscExpParams::default()));
        net.connect(ConnectionDescriptor::new(a, b, 50.0, 15));
        let kernel = net
            .build(KernelConfig::default().with_workers(workers))
            .unwrap();
        (kernel, a, b)
    }

    #[test]
    fn test_advance_is_resumable() {
        let (mut kernel, _, _) = driven_pair(1);
        let first = kernel.advance(37).unwrap();
        assert_eq!(first.start_step, 0);
        assert_eq!(first.end_step, 37);
        // 15-step intervals, the last one partial
        assert_eq!(first.intervals, 3);
        let second = kernel.advance(13).unwrap();
        assert_eq!(second.start_step, 37);
        assert_eq!(kernel.current_step(), 50);
        assert!((kernel.time_ms() - 5.0).abs() < 1e-12);
        assert_eq!(kernel.advance(0).unwrap().steps, 0);
    }

    #[test]
    fn test_split_runs_match_single_run() {
        let (mut whole, _, b) = driven_pair(1);
        whole.advance(3000).unwrap();
        let (mut split, _, _) = driven_pair(1);
        for chunk in [7, 1, 992, 1500, 500] {
            split.advance(chunk).unwrap();
        }
        assert_eq!(whole.spikes_emitted(), split.spikes_emitted());
        assert_eq!(
            whole.state(b, "V_m").unwrap().to_bits(),
            split.state(b, "V_m").unwrap().to_bits()
        );
    }

    #[test]
    fn test_recorder_sees_spikes_in_order() {
        let (mut kernel, a, _) = driven_pair(2);
        let recorder = MemoryRecorder::new();
        let handle = recorder.handle();
        kernel
            .add_recorder(RecordingSpec::new().with_spikes(), Box::new(recorder))
            .unwrap();
        kernel.advance(2000).unwrap();
        let spikes = handle.spikes();
        assert!(!spikes.is_empty());
        assert!(spikes
            .windows(2)
            .all(|w| (w[0].step, w[0].unit) <= (w[1].step, w[1].unit)));
        assert!(spikes.iter().any(|s| s.unit == a));
        assert_eq!(spikes.len() as u64, kernel.spikes_emitted());
    }

    #[test]
    fn test_recorder_rejects_unknown_state() {
        let (mut kernel, a, _) = driven_pair(1);
        let spec = RecordingSpec::new().with_units([a]).with_state(["theta"]);
        assert!(kernel
            .add_recorder(spec, Box::new(MemoryRecorder::new()))
            .is_err());
        let spec = RecordingSpec::new()
            .with_units([UnitId::new(9)])
            .with_spikes();
        assert!(matches!(
            kernel.add_recorder(spec, Box::new(MemoryRecorder::new())),
            Err(RuntimeError::UnitNotFound { .. })
        ));
    }

    #[test]
    fn test_state_access() {
        let (mut kernel, a, _) = driven_pair(1);
        assert_eq!(kernel.state(a, "V_m").unwrap(), -70.0);
        kernel.set_state(a, "V_m", -60.0).unwrap();
        assert_eq!(kernel.state(a, "V_m").unwrap(), -60.0);
        assert!(kernel.set_state(a, "V_m", f64::NAN).is_err());
        assert!(kernel.state(a, "nope").is_err());
        assert!(kernel.state(UnitId::new(7), "V_m").is_err());
        assert_eq!(kernel.weight(ConnectionId::new(0)), Some(50.0));
        assert_eq!(kernel.weight(ConnectionId::new(1)), None);
        assert_eq!(kernel.model_name(a).unwrap(), "iaf_psc_exp");
    }

    #[test]
    fn test_fault_stops_the_kernel() {
        let (mut kernel, a, _) = driven_pair(1);
        kernel.advance(10).unwrap();
        // bypass the finite check of set_state
        let (p, local) = kernel.locate(a).unwrap();
        kernel.partitions[p]
            .unit_mut(local)
            .unwrap()
            .dynamics_mut()
            .set_state("V_m", f64::INFINITY);
        let err = kernel.advance(10).unwrap_err();
        assert!(matches!(err, RuntimeError::NumericalFault { step: 10, .. }));
        assert!(kernel.fault().is_some());
        assert_eq!(kernel.advance(10).unwrap_err(), err);
    }

    #[test]
    fn test_source_spike_reaches_target_after_delay() {
        let mut net = NetworkBuilder::new();
        let src = net.add_unit(ModelParams::SpikeSource(SpikeSourceParams::new(vec![1.0])));
        let dst = net.add_unit(ModelParams::IafPscExp(IafPscExpParams::default()));
        net.connect(ConnectionDescriptor::new(src, dst, 100.0, 20));
        let mut kernel = net.build(KernelConfig::default().with_workers(2)).unwrap();
        let recorder = MemoryRecorder::new();
        let handle = recorder.handle();
        kernel
            .add_recorder(
                RecordingSpec::new().with_units([dst]).with_deliveries(),
                Box::new(recorder),
            )
            .unwrap();
        kernel.advance(100).unwrap();
        let deliveries = handle.snapshot().deliveries;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].arrival, 30);
        assert_eq!(deliveries[0].source, src);
        assert_eq!(deliveries[0].payload, 100.0);
    }
}
