//! Results must not depend on the number of workers, the partitioning
//! strategy or how a run is split into `advance` calls.

use pulse_runtime::{
    model::{
        HillTononiParams, HodgkinHuxleyParams, IafPscAlphaParams, IafPscExpParams,
        SiegertUnitParams, SpikeSourceParams,
    },
    ConnectionDescriptor, ConnectionId, Kernel, KernelConfig, MemoryRecorder, ModelParams,
    NetworkBuilder, PartitionStrategy, QuantalParams, Receptor, RecordingSpec, SpikeRecord,
    StdpParams, SynapseSpec, TsodyksParams, UnitId,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

const STEPS: u64 = 2000;

/// Mixed network: every model, every rule, delays from 0.5 to 4 ms
fn mixed_network() -> NetworkBuilder {
    let mut rng = StdRng::seed_from_u64(7);
    let mut net = NetworkBuilder::new();
    let mut emitters = Vec::new();
    let mut current_targets = Vec::new();

    for i in 0..40 {
        let params = IafPscExpParams::default().with_current(340.0 + 2.5 * i as f64);
        let id = net.add_unit(ModelParams::IafPscExp(params));
        emitters.push(id);
        current_targets.push(id);
    }
    for i in 0..10 {
        let params = IafPscAlphaParams {
            i_e: 360.0 + 5.0 * i as f64,
            ..Default::default()
        };
        let id = net.add_unit(ModelParams::IafPscAlpha(params));
        emitters.push(id);
        current_targets.push(id);
    }
    for i in 0..5 {
        let times: Vec<f64> = (0..20).map(|k| 3.0 + 9.7 * k as f64 + i as f64).collect();
        emitters.push(net.add_unit(ModelParams::SpikeSource(SpikeSourceParams::new(times))));
    }
    for i in 0..4 {
        let i_e = if i < 2 { 900.0 } else { 0.0 };
        let id = net.add_unit(ModelParams::HodgkinHuxley(
            HodgkinHuxleyParams::default().with_current(i_e),
        ));
        emitters.push(id);
        current_targets.push(id);
    }
    let mut conductance_targets = Vec::new();
    for i in 0..3 {
        let params = HillTononiParams {
            i_e: 20.0 + 10.0 * i as f64,
            ..Default::default()
        };
        let id = net.add_unit(ModelParams::HillTononi(params));
        emitters.push(id);
        conductance_targets.push(id);
    }
    for _ in 0..2 {
        current_targets.push(net.add_unit(ModelParams::Siegert(SiegertUnitParams::default())));
    }

    for &source in &emitters {
        for _ in 0..6 {
            let target = current_targets[rng.gen_range(0..current_targets.len())];
            let delay = rng.gen_range(5..=40);
            let rule = match rng.gen_range(0..4) {
                0 => SynapseSpec::Static,
                1 => SynapseSpec::Stdp(StdpParams {
                    lambda: 0.05,
                    ..Default::default()
                }),
                2 => SynapseSpec::Tsodyks(TsodyksParams {
                    tau_fac: 50.0,
                    ..Default::default()
                }),
                _ => SynapseSpec::Quantal(QuantalParams {
                    n: 3,
                    ..Default::default()
                }),
            };
            let weight = if matches!(rule, SynapseSpec::Stdp(_)) {
                rng.gen_range(10.0..90.0)
            } else {
                rng.gen_range(-60.0..120.0)
            };
            net.connect(ConnectionDescriptor::new(source, target, weight, delay).with_rule(rule));
        }
        let target = conductance_targets[rng.gen_range(0..conductance_targets.len())];
        let receptor = Receptor::CONDUCTANCES[rng.gen_range(0..4)];
        net.connect(
            ConnectionDescriptor::new(source, target, rng.gen_range(0.1..2.0), rng.gen_range(5..=40))
                .with_receptor(receptor),
        );
    }
    net
}

#[derive(Debug, PartialEq)]
struct Fingerprint {
    spikes: Vec<SpikeRecord>,
    states: BTreeMap<(UnitId, &'static str), u64>,
    weights: Vec<u64>,
}

fn fingerprint(kernel: &Kernel, spikes: Vec<SpikeRecord>) -> Fingerprint {
    let mut states = BTreeMap::new();
    for partition in kernel.partitions() {
        for unit in partition.units() {
            for &name in unit.dynamics().state_names() {
                let value = kernel.state(unit.id(), name).unwrap();
                states.insert((unit.id(), name), value.to_bits());
            }
        }
    }
    let weights = (0..kernel.num_connections())
        .map(|i| kernel.weight(ConnectionId::new(i as u32)).unwrap().to_bits())
        .collect();
    Fingerprint {
        spikes,
        states,
        weights,
    }
}

fn run(config: KernelConfig, chunks: &[u64]) -> Fingerprint {
    let mut kernel = mixed_network().build(config).unwrap();
    let recorder = MemoryRecorder::new();
    let handle = recorder.handle();
    kernel
        .add_recorder(RecordingSpec::new().with_spikes(), Box::new(recorder))
        .unwrap();
    for &steps in chunks {
        kernel.advance(steps).unwrap();
    }
    assert_eq!(kernel.current_step(), chunks.iter().sum::<u64>());
    fingerprint(&kernel, handle.spikes())
}

#[test]
fn test_identical_across_workers_and_strategies() {
    let reference = run(KernelConfig::default(), &[STEPS]);
    assert!(reference.spikes.len() > 100, "network is too quiet");

    let units_spiking: BTreeSet<UnitId> = reference.spikes.iter().map(|s| s.unit).collect();
    assert!(units_spiking.len() > 20);

    for strategy in [PartitionStrategy::RoundRobin, PartitionStrategy::Blocks] {
        for workers in [2, 3, 5] {
            let config = KernelConfig::default()
                .with_workers(workers)
                .with_partitioning(strategy);
            let other = run(config, &[STEPS]);
            assert_eq!(
                other, reference,
                "results differ with {workers} workers ({strategy:?})"
            );
        }
    }
}

#[test]
fn test_identical_when_split_into_chunks() {
    let reference = run(KernelConfig::default().with_workers(2), &[STEPS]);
    let split = run(
        KernelConfig::default().with_workers(2),
        &[1, 4, 333, 662, 1000],
    );
    assert_eq!(split, reference);
}

#[test]
fn test_plastic_weights_change() {
    let net = mixed_network();
    let mut kernel = net.build(KernelConfig::default().with_workers(2)).unwrap();
    kernel.advance(STEPS).unwrap();
    let changed = net
        .connections()
        .iter()
        .enumerate()
        .filter(|(i, desc)| {
            matches!(desc.rule, SynapseSpec::Stdp(_))
                && kernel.weight(ConnectionId::new(*i as u32)) != Some(desc.weight)
        })
        .count();
    assert!(changed > 0);
}

#[test]
fn test_seed_changes_quantal_outcome_only() {
    let a = run(KernelConfig::default().with_seed(1), &[STEPS]);
    let b = run(KernelConfig::default().with_seed(1).with_workers(3), &[STEPS]);
    let c = run(KernelConfig::default().with_seed(2), &[STEPS]);
    assert_eq!(a, b);
    assert_ne!(a, c);
}
