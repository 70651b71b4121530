//! Delayed event delivery
//!
//! Spikes leave a partition through its outbox at the end of every interval.
//! The [`SpikeExchange`] collects exactly one batch per partition, merges them
//! into `(emission step, source)` order and hands the result back for
//! registration. Registered events wait in the target unit's [`EventRing`]
//! until their arrival step.

use crate::{
    error::*,
    ids::{PartitionId, Step, UnitId},
    model::Receptor,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use smallvec::SmallVec;
use std::time::Duration;

/// Weighted event waiting for delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Emitting unit
    pub source: UnitId,
    /// Step at which the event is applied
    pub arrival: Step,
    /// Receptor of the target
    pub channel: Receptor,
    /// Effective weight after the synapse rule
    pub payload: f64,
}

/// Circular buffer of pending events for one unit
///
/// The span is fixed at build time and covers every delay the network uses,
/// so a slot is always drained before it is written for a later arrival.
#[derive(Debug, Clone)]
pub struct EventRing {
    slots: Vec<Vec<Event>>,
}

impl EventRing {
    /// Create a ring covering `span` steps
    pub fn new(span: usize) -> Self {
        Self {
            slots: vec![Vec::new(); span.max(1)],
        }
    }

    /// Number of slots
    pub fn span(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, step: Step) -> usize {
        (step % self.slots.len() as Step) as usize
    }

    /// Queue an event at the slot of its arrival step
    pub fn register(&mut self, event: Event) {
        let slot = self.slot(event.arrival);
        debug_assert!(
            self.slots[slot].iter().all(|e| e.arrival == event.arrival),
            "ring slot reused before it was drained"
        );
        self.slots[slot].push(event);
    }

    /// Apply and clear all events arriving at `step`
    ///
    /// Events are visited in registration order. The slot keeps its
    /// allocation for reuse.
    pub fn drain<F: FnMut(&Event)>(&mut self, step: Step, mut f: F) {
        let slot = self.slot(step);
        for event in &self.slots[slot] {
            debug_assert_eq!(event.arrival, step);
            f(event);
        }
        self.slots[slot].clear();
    }

    /// Total number of queued events
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// True if no event is queued
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}

/// Spike as it travels through the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSpike {
    /// Step at which the unit crossed threshold
    pub step: Step,
    /// Emitting unit
    pub source: UnitId,
    /// Partitions hosting connections of `source`
    pub targets: SmallVec<[PartitionId; 4]>,
}

/// Entry of a partition inbox
///
/// Only the emission step and the source are needed to look up local
/// connections, so routing copies these instead of the whole spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutedSpike {
    /// Step at which the unit crossed threshold
    pub step: Step,
    /// Emitting unit
    pub source: UnitId,
}

/// Outcome of one partition's interval
pub type BatchOutcome = std::result::Result<Vec<EmittedSpike>, RuntimeError>;

/// One partition's contribution to an exchange
#[derive(Debug)]
pub struct OutboxBatch {
    /// Interval number the batch belongs to
    pub interval: u64,
    /// Sending partition
    pub partition: PartitionId,
    /// Spikes emitted during the interval, or the fault that stopped it
    pub spikes: BatchOutcome,
}

/// Message-passing barrier between intervals
#[derive(Debug)]
pub struct SpikeExchange {
    partitions: usize,
    timeout: Duration,
    tx: Sender<OutboxBatch>,
    rx: Receiver<OutboxBatch>,
    received: Vec<Option<Vec<EmittedSpike>>>,
    merged: Vec<EmittedSpike>,
    inboxes: Vec<Vec<RoutedSpike>>,
}

impl SpikeExchange {
    /// Create an exchange for `partitions` senders
    pub fn new(partitions: usize, timeout: Duration) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            partitions,
            timeout,
            tx,
            rx,
            received: (0..partitions).map(|_| None).collect(),
            merged: Vec::new(),
            inboxes: vec![Vec::new(); partitions],
        }
    }

    /// Sending half, cloned into every partition's run
    pub fn sender(&self) -> Sender<OutboxBatch> {
        self.tx.clone()
    }

    /// Wait for one batch per partition and merge them
    ///
    /// A missing, duplicated or stale batch is a synchronization fault; a
    /// partition that reported a fault instead of spikes aborts the exchange
    /// with that fault (lowest partition index first).
    pub fn collect(&mut self, interval: u64) -> Result<&[EmittedSpike]> {
        for slot in self.received.iter_mut() {
            *slot = None;
        }
        let mut faults: Vec<(usize, RuntimeError)> = Vec::new();
        let mut outstanding = self.partitions;
        while outstanding > 0 {
            let batch = match self.rx.recv_timeout(self.timeout) {
                Ok(batch) => batch,
                Err(RecvTimeoutError::Timeout) => {
                    let missing = self.missing_partition(&faults);
                    return Err(RuntimeError::synchronization(
                        interval,
                        missing,
                        format!("no batch within {} ms", self.timeout.as_millis()),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let missing = self.missing_partition(&faults);
                    return Err(RuntimeError::synchronization(
                        interval,
                        missing,
                        "exchange channel disconnected",
                    ));
                }
            };
            let index = batch.partition.index();
            if batch.interval != interval {
                return Err(RuntimeError::synchronization(
                    interval,
                    index,
                    format!("batch belongs to interval {}", batch.interval),
                ));
            }
            if index >= self.partitions
                || self.received[index].is_some()
                || faults.iter().any(|(p, _)| *p == index)
            {
                return Err(RuntimeError::synchronization(
                    interval,
                    index,
                    "duplicate or unknown partition",
                ));
            }
            match batch.spikes {
                Ok(spikes) => self.received[index] = Some(spikes),
                Err(err) => faults.push((index, err)),
            }
            outstanding -= 1;
        }

        if let Some((_, err)) = faults.into_iter().min_by_key(|(p, _)| *p) {
            return Err(err);
        }

        self.merged.clear();
        for spikes in self.received.iter_mut().flatten() {
            self.merged.append(spikes);
        }
        // order is independent of which partition produced each spike
        self.merged.sort_unstable_by_key(|s| (s.step, s.source));
        log::trace!(
            "interval {}: exchanged {} spikes",
            interval,
            self.merged.len()
        );
        Ok(&self.merged)
    }

    fn missing_partition(&self, faults: &[(usize, RuntimeError)]) -> usize {
        (0..self.partitions)
            .find(|p| self.received[*p].is_none() && !faults.iter().any(|(f, _)| f == p))
            .unwrap_or(0)
    }

    /// Split the last merged list into per-partition inboxes, preserving
    /// merge order
    ///
    /// The inboxes keep their allocation across intervals.
    pub fn route(&mut self) -> &[Vec<RoutedSpike>] {
        for inbox in self.inboxes.iter_mut() {
            inbox.clear();
        }
        for spike in &self.merged {
            let routed = RoutedSpike {
                step: spike.step,
                source: spike.source,
            };
            for target in &spike.targets {
                if let Some(inbox) = self.inboxes.get_mut(target.index()) {
                    inbox.push(routed);
                }
            }
        }
        &self.inboxes
    }

    /// Spikes of the last completed exchange, in merge order
    pub fn merged(&self) -> &[EmittedSpike] {
        &self.merged
    }

    /// Hand an emptied outbox back for reuse by partition `index`
    pub fn take_buffer(&mut self, index: usize) -> Vec<EmittedSpike> {
        self.received
            .get_mut(index)
            .and_then(Option::take)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike(step: Step, source: u32, targets: &[u16]) -> EmittedSpike {
        EmittedSpike {
            step,
            source: UnitId::new(source),
            targets: targets.iter().map(|p| PartitionId::new(*p)).collect(),
        }
    }

    fn event(source: u32, arrival: Step, payload: f64) -> Event {
        Event {
            source: UnitId::new(source),
            arrival,
            channel: Receptor::Default,
            payload,
        }
    }

    #[test]
    fn test_ring_register_and_drain() {
        let mut ring = EventRing::new(5);
        ring.register(event(0, 3, 1.0));
        ring.register(event(1, 3, 2.0));
        ring.register(event(0, 4, 5.0));
        assert_eq!(ring.len(), 3);

        let mut seen = Vec::new();
        ring.drain(3, |e| seen.push(e.payload));
        assert_eq!(seen, vec![1.0, 2.0]);
        assert_eq!(ring.len(), 1);

        // slot 3 is reused for arrival 8
        ring.register(event(2, 8, 7.0));
        assert_eq!(ring.len(), 2);
        ring.drain(4, |_| {});
        ring.drain(8, |_| {});
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_drain_empty_slot() {
        let mut ring = EventRing::new(3);
        let mut count = 0;
        ring.drain(10, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_exchange_merges_in_emission_order() {
        let mut exchange = SpikeExchange::new(2, Duration::from_millis(100));
        let tx = exchange.sender();
        tx.send(OutboxBatch {
            interval: 0,
            partition: PartitionId::new(1),
            spikes: Ok(vec![spike(2, 1, &[0]), spike(4, 3, &[0, 1])]),
        })
        .unwrap();
        tx.send(OutboxBatch {
            interval: 0,
            partition: PartitionId::new(0),
            spikes: Ok(vec![spike(2, 0, &[1]), spike(3, 2, &[1])]),
        })
        .unwrap();

        let merged: Vec<_> = exchange
            .collect(0)
            .unwrap()
            .iter()
            .map(|s| (s.step, s.source.raw()))
            .collect();
        assert_eq!(merged, vec![(2, 0), (2, 1), (3, 2), (4, 3)]);

        let inboxes = exchange.route();
        let p0: Vec<_> = inboxes[0].iter().map(|s| s.source.raw()).collect();
        let p1: Vec<_> = inboxes[1].iter().map(|s| s.source.raw()).collect();
        assert_eq!(p0, vec![1, 3]);
        assert_eq!(p1, vec![0, 2, 3]);
    }

    #[test]
    fn test_route_reuses_inboxes_across_intervals() {
        let mut exchange = SpikeExchange::new(6, Duration::from_millis(100));
        let tx = exchange.sender();
        let wide: Vec<u16> = (0..6).collect();
        for interval in 0..2u64 {
            for p in 0..6u16 {
                let spikes = if p == 0 {
                    (0..8).map(|i| spike(interval * 10 + i, i as u32, &wide)).collect()
                } else {
                    Vec::new()
                };
                tx.send(OutboxBatch {
                    interval,
                    partition: PartitionId::new(p),
                    spikes: Ok(spikes),
                })
                .unwrap();
            }
        }

        exchange.collect(0).unwrap();
        let first: Vec<_> = exchange
            .route()
            .iter()
            .map(|inbox| (inbox.as_ptr(), inbox.capacity()))
            .collect();
        assert_eq!(exchange.route()[5].len(), 8);

        exchange.collect(1).unwrap();
        let inboxes = exchange.route();
        let second: Vec<_> = inboxes
            .iter()
            .map(|inbox| (inbox.as_ptr(), inbox.capacity()))
            .collect();
        assert_eq!(first, second);
        assert_eq!(
            inboxes[3][0],
            RoutedSpike {
                step: 10,
                source: UnitId::new(0),
            }
        );
    }

    #[test]
    fn test_exchange_missing_batch_times_out() {
        let mut exchange = SpikeExchange::new(2, Duration::from_millis(20));
        exchange
            .sender()
            .send(OutboxBatch {
                interval: 5,
                partition: PartitionId::new(0),
                spikes: Ok(Vec::new()),
            })
            .unwrap();
        let err = exchange.collect(5).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Synchronization {
                interval: 5,
                partition: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_exchange_rejects_stale_batch() {
        let mut exchange = SpikeExchange::new(1, Duration::from_millis(20));
        exchange
            .sender()
            .send(OutboxBatch {
                interval: 3,
                partition: PartitionId::new(0),
                spikes: Ok(Vec::new()),
            })
            .unwrap();
        assert!(matches!(
            exchange.collect(4),
            Err(RuntimeError::Synchronization { .. })
        ));
    }

    #[test]
    fn test_exchange_surfaces_partition_fault() {
        let mut exchange = SpikeExchange::new(2, Duration::from_millis(50));
        let tx = exchange.sender();
        tx.send(OutboxBatch {
            interval: 0,
            partition: PartitionId::new(1),
            spikes: Err(RuntimeError::numerical_fault(UnitId::new(9), 4, "NaN")),
        })
        .unwrap();
        tx.send(OutboxBatch {
            interval: 0,
            partition: PartitionId::new(0),
            spikes: Ok(Vec::new()),
        })
        .unwrap();
        let err = exchange.collect(0).unwrap_err();
        assert!(matches!(err, RuntimeError::NumericalFault { step: 4, .. }));
    }
}
