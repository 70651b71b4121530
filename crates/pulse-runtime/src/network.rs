//! Network description and kernel construction

use crate::{
    config::KernelConfig,
    error::*,
    ids::{ConnectionId, PartitionId, Step, UnitId},
    model::{ModelParams, Receptor},
    partition::Partition,
    plasticity::{Connection, PostArchive, SynapseSpec},
    simulation::Kernel,
    unit::Unit,
};
use std::collections::BTreeMap;

/// Ring spans above this many steps are reported as suspicious
const LARGE_SPAN_STEPS: usize = 100_000;

/// Build-time description of a unit
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitDescriptor {
    /// Model and parameters
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub params: ModelParams,
    /// Initial values overriding the model's resting state
    #[cfg_attr(feature = "serde", serde(default))]
    pub initial_state: BTreeMap<String, f64>,
}

impl UnitDescriptor {
    /// Unit with the model's default initial state
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            initial_state: BTreeMap::new(),
        }
    }

    /// Override one state variable at build time
    pub fn with_state(mut self, name: impl Into<String>, value: f64) -> Self {
        self.initial_state.insert(name.into(), value);
        self
    }
}

impl From<ModelParams> for UnitDescriptor {
    fn from(params: ModelParams) -> Self {
        Self::new(params)
    }
}

/// Build-time description of a connection
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionDescriptor {
    /// Presynaptic unit
    pub source: UnitId,
    /// Postsynaptic unit
    pub target: UnitId,
    /// Receptor of the target
    #[cfg_attr(feature = "serde", serde(default))]
    pub receptor: Receptor,
    /// Delay (steps)
    pub delay_steps: Step,
    /// Initial weight
    pub weight: f64,
    /// Transmission rule
    #[cfg_attr(feature = "serde", serde(default))]
    pub rule: SynapseSpec,
}

impl ConnectionDescriptor {
    /// Static connection on the default receptor
    pub fn new(source: UnitId, target: UnitId, weight: f64, delay_steps: Step) -> Self {
        Self {
            source,
            target,
            receptor: Receptor::Default,
            delay_steps,
            weight,
            rule: SynapseSpec::Static,
        }
    }

    /// Set the receptor
    pub fn with_receptor(mut self, receptor: Receptor) -> Self {
        self.receptor = receptor;
        self
    }

    /// Set the transmission rule
    pub fn with_rule(mut self, rule: SynapseSpec) -> Self {
        self.rule = rule;
        self
    }
}

/// Builder for a network of units and connections
///
/// Ids are assigned in insertion order. Nothing is validated before
/// [`NetworkBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    units: Vec<UnitDescriptor>,
    connections: Vec<ConnectionDescriptor>,
}

impl NetworkBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit
    pub fn add_unit(&mut self, desc: impl Into<UnitDescriptor>) -> UnitId {
        let id = UnitId::new(self.units.len() as u32);
        self.units.push(desc.into());
        id
    }

    /// Add `count` identical units
    pub fn add_units(&mut self, count: usize, desc: impl Into<UnitDescriptor>) -> Vec<UnitId> {
        let desc = desc.into();
        (0..count).map(|_| self.add_unit(desc.clone())).collect()
    }

    /// Add a connection
    pub fn connect(&mut self, desc: ConnectionDescriptor) -> ConnectionId {
        let id = ConnectionId::new(self.connections.len() as u32);
        self.connections.push(desc);
        id
    }

    /// Number of units added
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Number of connections added
    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Unit descriptions in id order
    pub fn units(&self) -> &[UnitDescriptor] {
        &self.units
    }

    /// Connection descriptions in id order
    pub fn connections(&self) -> &[ConnectionDescriptor] {
        &self.connections
    }

    /// Validate the description and build a kernel
    pub fn build(&self, config: KernelConfig) -> Result<Kernel> {
        config.validate()?;
        let ctx = config.context(0);

        let mut dynamics = Vec::with_capacity(self.units.len());
        for (index, desc) in self.units.iter().enumerate() {
            let mut built = desc.params.build(&ctx)?;
            for (name, &value) in &desc.initial_state {
                if !built.set_state(name, value) {
                    return Err(RuntimeError::invalid_parameter(
                        format!("initial_state.{name}"),
                        format!("{} for unit {}", value, UnitId::new(index as u32)),
                        format!("a state variable of {}", built.model_name()),
                    ));
                }
            }
            dynamics.push(built);
        }

        let mut stdp_inputs: BTreeMap<UnitId, (u32, f64)> = BTreeMap::new();
        for desc in &self.connections {
            let (pre, post) = (desc.source, desc.target);
            let source = dynamics
                .get(pre.index())
                .ok_or(RuntimeError::UnitNotFound { unit: pre })?;
            let target = dynamics
                .get(post.index())
                .ok_or(RuntimeError::UnitNotFound { unit: post })?;

            if desc.delay_steps < 1 || desc.delay_steps > config.max_delay_steps {
                return Err(RuntimeError::InvalidDelay {
                    pre,
                    post,
                    delay: desc.delay_steps,
                    min: 1,
                    max: config.max_delay_steps,
                });
            }
            if !source.can_emit() {
                return Err(RuntimeError::invalid_config(format!(
                    "unit {} ({}) cannot emit spikes",
                    pre,
                    source.model_name()
                )));
            }
            if !target.accepts(desc.receptor) {
                return Err(RuntimeError::ReceptorMismatch {
                    unit: post,
                    receptor: desc.receptor.to_string(),
                    model: target.model_name().to_string(),
                });
            }
            if !desc.weight.is_finite()
                || (target.requires_non_negative_weights() && desc.weight < 0.0)
            {
                return Err(RuntimeError::invalid_parameter(
                    "weight",
                    format!("{} on connection {} -> {}", desc.weight, pre, post),
                    if target.requires_non_negative_weights() {
                        "finite and >= 0.0 for conductance receptors"
                    } else {
                        "finite"
                    },
                ));
            }
            desc.rule.validate(desc.weight)?;

            if let SynapseSpec::Stdp(params) = desc.rule {
                let entry = stdp_inputs.entry(post).or_insert((0, params.tau_minus));
                if entry.1 != params.tau_minus {
                    return Err(RuntimeError::invalid_parameter(
                        "tau_minus",
                        format!("{} and {} into unit {}", entry.1, params.tau_minus, post),
                        "equal for all plastic inputs of a unit",
                    ));
                }
                entry.0 += 1;
            }
        }

        let min_delay = self
            .connections
            .iter()
            .map(|c| c.delay_steps)
            .min()
            .unwrap_or(1);
        let span = (min_delay + config.max_delay_steps) as usize;
        if span > LARGE_SPAN_STEPS {
            log::warn!(
                "event rings span {} steps per unit; consider a smaller max_delay_steps",
                span
            );
        }

        let workers = config.workers;
        let n_units = self.units.len();
        let mut locations = Vec::with_capacity(n_units);
        let mut hosted: Vec<Vec<Unit>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, built) in dynamics.into_iter().enumerate() {
            let id = UnitId::new(index as u32);
            let partition = config.partitioning.assign(index, n_units, workers);
            let mut unit = Unit::new(id, built, span, config.resolution_ms);
            if let Some(&(n_incoming, tau_minus)) = stdp_inputs.get(&id) {
                unit.attach_archive(PostArchive::new(tau_minus, n_incoming, span as Step));
            }
            locations.push((partition, hosted[partition].len()));
            hosted[partition].push(unit);
        }

        let mut incoming: Vec<Vec<Connection>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, desc) in self.connections.iter().enumerate() {
            let id = ConnectionId::new(index as u32);
            let (source_partition, source_local) = locations[desc.source.index()];
            let (partition, local) = locations[desc.target.index()];
            hosted[source_partition][source_local].add_target(PartitionId::new(partition as u16));
            incoming[partition].push(Connection {
                id,
                source: desc.source,
                target: desc.target,
                target_local: local,
                receptor: desc.receptor,
                delay: desc.delay_steps,
                weight: desc.weight,
                rule: desc.rule.instantiate(id, config.seed),
            });
        }

        let partitions: Vec<Partition> = hosted
            .into_iter()
            .zip(incoming)
            .enumerate()
            .map(|(p, (units, conns))| Partition::new(PartitionId::new(p as u16), units, conns))
            .collect();
        for partition in &partitions {
            log::debug!(
                "partition {}: {} units, {} incoming connections",
                partition.id(),
                partition.units().len(),
                partition.connections().len()
            );
        }
        log::info!(
            "Built network: {} units, {} connections, {} partitions, min delay {} steps",
            n_units,
            self.connections.len(),
            workers,
            min_delay
        );

        Kernel::new(config, partitions, locations, min_delay)
    }
}
