//! Partitions: disjoint sets of units with their incoming connections
//!
//! A partition is the unit of parallel work. During an interval it touches
//! nothing but its own units, rings and connections; spikes leave through the
//! outbox and come back, merged, through [`Partition::deliver`].

use crate::{
    config::SimContext,
    delivery::{EmittedSpike, Event, RoutedSpike},
    error::*,
    ids::{PartitionId, Step, UnitId},
    plasticity::Connection,
    recording::{DeliveredEvent, StateSample},
    unit::Unit,
};
use std::{collections::HashMap, ops::Range};

/// Recording request attached to one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    /// Index of the recorder in the kernel
    pub recorder: usize,
    /// Sampled state variables
    pub names: Vec<&'static str>,
    /// Sampling period (steps)
    pub every: Step,
    /// Report applied events
    pub deliveries: bool,
}

/// Records produced by one partition during an interval, tagged with the
/// recorder they belong to
#[derive(Debug, Default)]
pub struct RecordBuffer {
    /// State samples in update order
    pub states: Vec<(usize, StateSample)>,
    /// Applied events in update order
    pub deliveries: Vec<(usize, DeliveredEvent)>,
}

impl RecordBuffer {
    /// Drop all records, keeping the allocations
    pub fn clear(&mut self) {
        self.states.clear();
        self.deliveries.clear();
    }
}

/// Units and incoming connections owned by one worker
#[derive(Debug)]
pub struct Partition {
    id: PartitionId,
    units: Vec<Unit>,
    connections: Vec<Connection>,
    incoming: HashMap<UnitId, Range<usize>>,
    probes: Vec<Vec<Probe>>,
    records: RecordBuffer,
    events_delivered: u64,
}

impl Partition {
    /// Assemble a partition
    ///
    /// Connections are grouped by source and ordered by id within a group,
    /// which fixes the order in which one spike's events are registered.
    pub fn new(id: PartitionId, units: Vec<Unit>, mut connections: Vec<Connection>) -> Self {
        connections.sort_by_key(|c| (c.source, c.id));
        let mut incoming: HashMap<UnitId, Range<usize>> = HashMap::new();
        for (index, conn) in connections.iter().enumerate() {
            incoming
                .entry(conn.source)
                .and_modify(|range| range.end = index + 1)
                .or_insert(index..index + 1);
        }
        let probes = vec![Vec::new(); units.len()];
        Self {
            id,
            units,
            connections,
            incoming,
            probes,
            records: RecordBuffer::default(),
            events_delivered: 0,
        }
    }

    /// Partition id
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Hosted units in local order
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Hosted unit by local index
    pub fn unit(&self, local: usize) -> Option<&Unit> {
        self.units.get(local)
    }

    /// Mutable hosted unit by local index
    pub fn unit_mut(&mut self, local: usize) -> Option<&mut Unit> {
        self.units.get_mut(local)
    }

    /// Hosted connections, grouped by source
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of events applied so far
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered
    }

    /// Attach a recording probe to a local unit
    pub fn add_probe(&mut self, local: usize, probe: Probe) {
        if let Some(probes) = self.probes.get_mut(local) {
            probes.push(probe);
        }
    }

    /// Records of the last interval
    pub fn records_mut(&mut self) -> &mut RecordBuffer {
        &mut self.records
    }

    /// Advance every hosted unit through steps `ctx.step..end`
    ///
    /// Emitted spikes are appended to `outbox` in step order, then local
    /// unit order.
    pub fn run_interval(
        &mut self,
        ctx: SimContext,
        end: Step,
        mut outbox: Vec<EmittedSpike>,
    ) -> Result<Vec<EmittedSpike>> {
        outbox.clear();
        self.records.clear();
        let records = &mut self.records;
        let mut delivered_count = 0u64;

        for step in ctx.step..end {
            let step_ctx = SimContext { step, ..ctx };
            for (local, unit) in self.units.iter_mut().enumerate() {
                let probes = &self.probes[local];
                let target = unit.id();
                let spiked = unit.update(&step_ctx, |event: &Event| {
                    delivered_count += 1;
                    for probe in probes.iter().filter(|p| p.deliveries) {
                        records.deliveries.push((
                            probe.recorder,
                            DeliveredEvent {
                                source: event.source,
                                target,
                                arrival: event.arrival,
                                payload: event.payload,
                            },
                        ));
                    }
                })?;

                if spiked {
                    outbox.push(EmittedSpike {
                        step,
                        source: target,
                        targets: unit.targets().iter().copied().collect(),
                    });
                }

                for probe in probes.iter().filter(|p| step % p.every == 0) {
                    for &name in &probe.names {
                        if let Some(value) = unit.state(name) {
                            records.states.push((
                                probe.recorder,
                                StateSample {
                                    unit: target,
                                    step,
                                    name,
                                    value,
                                },
                            ));
                        }
                    }
                }
            }
        }
        self.events_delivered += delivered_count;
        Ok(outbox)
    }

    /// Run the synapse rules for routed spikes and queue their events
    ///
    /// `inbox` must be in merge order. Returns the number of registered
    /// events.
    pub fn deliver(&mut self, inbox: &[RoutedSpike], resolution_ms: f64) -> usize {
        let mut registered = 0;
        for spike in inbox {
            let Some(range) = self.incoming.get(&spike.source).cloned() else {
                continue;
            };
            for conn in &mut self.connections[range] {
                let unit = &mut self.units[conn.target_local];
                let archive = if conn.rule.is_stdp() {
                    unit.archive_mut()
                } else {
                    None
                };
                if let Some(event) = conn.transmit(spike.step, resolution_ms, archive) {
                    unit.register(event);
                    registered += 1;
                }
            }
        }
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::KernelConfig,
        ids::ConnectionId,
        model::{IafPscExpParams, ModelParams, Receptor},
        plasticity::SynapseSpec,
    };

    fn lif(id: u32, config: &KernelConfig, i_e: f64) -> Unit {
        let params = ModelParams::IafPscExp(IafPscExpParams::default().with_current(i_e));
        let dynamics = params.build(&config.context(0)).unwrap();
        Unit::new(UnitId::new(id), dynamics, 16, config.resolution_ms)
    }

    fn static_conn(id: u32, source: u32, target: u32, local: usize, delay: Step) -> Connection {
        Connection {
            id: ConnectionId::new(id),
            source: UnitId::new(source),
            target: UnitId::new(target),
            target_local: local,
            receptor: Receptor::Default,
            delay,
            weight: 10.0,
            rule: SynapseSpec::Static.instantiate(ConnectionId::new(id), 0),
        }
    }

    #[test]
    fn test_connections_grouped_by_source() {
        let config = KernelConfig::default();
        let units = vec![lif(5, &config, 0.0), lif(6, &config, 0.0)];
        let conns = vec![
            static_conn(3, 1, 5, 0, 2),
            static_conn(0, 2, 6, 1, 2),
            static_conn(1, 1, 6, 1, 4),
        ];
        let partition = Partition::new(PartitionId::new(0), units, conns);
        let ids: Vec<u32> = partition.connections().iter().map(|c| c.id.raw()).collect();
        assert_eq!(ids, vec![1, 3, 0]);
    }

    #[test]
    fn test_deliver_registers_events() {
        let config = KernelConfig::default();
        let units = vec![lif(5, &config, 0.0), lif(6, &config, 0.0)];
        let conns = vec![static_conn(0, 1, 5, 0, 2), static_conn(1, 1, 6, 1, 4)];
        let mut partition = Partition::new(PartitionId::new(0), units, conns);
        let inbox = [
            RoutedSpike {
                step: 10,
                source: UnitId::new(1),
            },
            RoutedSpike {
                step: 10,
                source: UnitId::new(9),
            },
        ];
        assert_eq!(partition.deliver(&inbox, 0.1), 2);
        assert_eq!(partition.unit(0).unwrap().pending_events(), 1);
        assert_eq!(partition.unit(1).unwrap().pending_events(), 1);
    }

    #[test]
    fn test_run_interval_collects_spikes_and_samples() {
        let config = KernelConfig::default();
        let units = vec![lif(0, &config, 1e5), lif(1, &config, 0.0)];
        let mut partition = Partition::new(PartitionId::new(0), units, Vec::new());
        partition.add_probe(
            1,
            Probe {
                recorder: 0,
                names: vec!["V_m"],
                every: 2,
                deliveries: false,
            },
        );
        let outbox = partition
            .run_interval(config.context(0), 10, Vec::new())
            .unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].step, 0);
        assert_eq!(outbox[0].source, UnitId::new(0));
        let steps: Vec<Step> = partition
            .records_mut()
            .states
            .iter()
            .map(|(_, s)| s.step)
            .collect();
        assert_eq!(steps, vec![0, 2, 4, 6, 8]);
    }
}
