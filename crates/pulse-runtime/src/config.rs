//! Kernel configuration and the per-step simulation context

use crate::{error::*, ids::Step};
use pulse_math::PropagatorTolerance;

/// Numerical tolerances consumed by the unit models
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NumericTolerances {
    /// Relative distance below which two time constants use the coinciding
    /// propagator forms
    pub propagator_degeneracy: f64,
    /// Absolute error bound of the adaptive solver
    pub ode_abs: f64,
    /// Relative error bound of the adaptive solver
    pub ode_rel: f64,
    /// Maximum adaptive substeps per resolution step
    pub ode_max_substeps: u32,
    /// Tolerance multiplier applied on the single retry after a failed step
    pub retry_factor: f64,
}

impl Default for NumericTolerances {
    fn default() -> Self {
        Self {
            propagator_degeneracy: PropagatorTolerance::default().relative(),
            ode_abs: 1e-6,
            ode_rel: 1e-6,
            ode_max_substeps: 10_000,
            retry_factor: 0.1,
        }
    }
}

impl NumericTolerances {
    /// Validate tolerances
    pub fn validate(&self) -> Result<()> {
        if PropagatorTolerance::new(self.propagator_degeneracy).is_none() {
            return Err(RuntimeError::invalid_parameter(
                "propagator_degeneracy",
                self.propagator_degeneracy.to_string(),
                ">= 0.0 and finite",
            ));
        }
        if !(self.ode_abs > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "ode_abs",
                self.ode_abs.to_string(),
                "> 0.0",
            ));
        }
        if !(self.ode_rel > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "ode_rel",
                self.ode_rel.to_string(),
                "> 0.0",
            ));
        }
        if self.ode_max_substeps == 0 {
            return Err(RuntimeError::invalid_parameter(
                "ode_max_substeps",
                "0",
                "> 0",
            ));
        }
        if !(self.retry_factor > 0.0 && self.retry_factor < 1.0) {
            return Err(RuntimeError::invalid_parameter(
                "retry_factor",
                self.retry_factor.to_string(),
                "in (0, 1)",
            ));
        }
        Ok(())
    }

    /// Degeneracy tolerance as the propagator library type
    pub fn propagator_tolerance(&self) -> PropagatorTolerance {
        PropagatorTolerance(self.propagator_degeneracy)
    }

    /// Tolerances for the retry after a failed adaptive step
    pub fn tightened(&self) -> Self {
        Self {
            ode_abs: self.ode_abs * self.retry_factor,
            ode_rel: self.ode_rel * self.retry_factor,
            ..*self
        }
    }
}

/// How units are assigned to partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PartitionStrategy {
    /// Unit `i` goes to partition `i % workers`
    #[default]
    RoundRobin,
    /// Contiguous blocks of units per partition
    Blocks,
}

impl PartitionStrategy {
    /// Partition of unit `index` out of `units` spread over `partitions`
    pub fn assign(&self, index: usize, units: usize, partitions: usize) -> usize {
        let partitions = partitions.max(1);
        match self {
            PartitionStrategy::RoundRobin => index % partitions,
            PartitionStrategy::Blocks => {
                let block = units.div_ceil(partitions).max(1);
                (index / block).min(partitions - 1)
            }
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KernelConfig {
    /// Resolution step (ms)
    pub resolution_ms: f64,
    /// Largest connection delay the event rings can represent (steps)
    pub max_delay_steps: u64,
    /// Number of partitions (and worker threads)
    pub workers: usize,
    /// Unit-to-partition assignment
    pub partitioning: PartitionStrategy,
    /// Seed for stochastic synapses
    pub seed: u64,
    /// Numerical tolerances
    pub tolerances: NumericTolerances,
    /// How long the exchange waits for a partition's batch (ms)
    pub exchange_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            resolution_ms: 0.1,
            max_delay_steps: 200, // 20 ms at the default resolution
            workers: 1,
            partitioning: PartitionStrategy::RoundRobin,
            seed: 12345,
            tolerances: NumericTolerances::default(),
            exchange_timeout_ms: 10_000,
        }
    }
}

impl KernelConfig {
    /// Create a configuration with validation
    pub fn new(resolution_ms: f64, max_delay_steps: u64) -> Result<Self> {
        let config = Self {
            resolution_ms,
            max_delay_steps,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Set number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set partitioning strategy
    pub fn with_partitioning(mut self, partitioning: PartitionStrategy) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Set seed for stochastic synapses
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set numerical tolerances
    pub fn with_tolerances(mut self, tolerances: NumericTolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    /// Set exchange timeout
    pub fn with_exchange_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.exchange_timeout_ms = timeout_ms;
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution_ms > 0.0 && self.resolution_ms.is_finite()) {
            return Err(RuntimeError::invalid_parameter(
                "resolution_ms",
                self.resolution_ms.to_string(),
                "> 0.0 and finite",
            ));
        }
        if self.max_delay_steps == 0 {
            return Err(RuntimeError::invalid_parameter(
                "max_delay_steps",
                "0",
                ">= 1",
            ));
        }
        if self.workers == 0 || self.workers > u16::MAX as usize {
            return Err(RuntimeError::invalid_parameter(
                "workers",
                self.workers.to_string(),
                "in 1..=65535",
            ));
        }
        if self.exchange_timeout_ms == 0 {
            return Err(RuntimeError::invalid_parameter(
                "exchange_timeout_ms",
                "0",
                "> 0",
            ));
        }
        self.tolerances.validate()
    }

    /// Convert a duration to whole steps, rounding to nearest
    pub fn ms_to_steps(&self, ms: f64) -> Step {
        (ms / self.resolution_ms).round().max(0.0) as Step
    }

    /// Context for the update of `step`
    pub fn context(&self, step: Step) -> SimContext {
        SimContext {
            step,
            resolution_ms: self.resolution_ms,
            tolerances: self.tolerances,
        }
    }
}

/// Explicit clock passed to every update call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimContext {
    /// Step being computed
    pub step: Step,
    /// Resolution (ms)
    pub resolution_ms: f64,
    /// Numerical tolerances
    pub tolerances: NumericTolerances,
}

impl SimContext {
    /// Time of the current step (ms)
    pub fn time_ms(&self) -> f64 {
        self.step as f64 * self.resolution_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_config_default() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ms_to_steps(1.0), 10);
        assert_eq!(config.ms_to_steps(2.0), 20);
    }

    #[test]
    fn test_kernel_config_validation() {
        assert!(KernelConfig::new(0.0, 10).is_err());
        assert!(KernelConfig::new(-0.1, 10).is_err());
        assert!(KernelConfig::new(0.1, 0).is_err());
        assert!(KernelConfig::new(0.1, 10).is_ok());

        let config = KernelConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tolerance_validation() {
        let mut tol = NumericTolerances::default();
        assert!(tol.validate().is_ok());
        tol.retry_factor = 1.5;
        assert!(tol.validate().is_err());
        tol.retry_factor = 0.1;
        tol.propagator_degeneracy = -1.0;
        assert!(tol.validate().is_err());
    }

    #[test]
    fn test_tightened_tolerances() {
        let tol = NumericTolerances::default();
        let tight = tol.tightened();
        assert!(tight.ode_abs < tol.ode_abs);
        assert!(tight.ode_rel < tol.ode_rel);
        assert_eq!(tight.ode_max_substeps, tol.ode_max_substeps);
    }

    #[test]
    fn test_partition_assignment() {
        let rr: Vec<usize> = (0..5)
            .map(|i| PartitionStrategy::RoundRobin.assign(i, 5, 2))
            .collect();
        assert_eq!(rr, vec![0, 1, 0, 1, 0]);
        let blocks: Vec<usize> = (0..5)
            .map(|i| PartitionStrategy::Blocks.assign(i, 5, 2))
            .collect();
        assert_eq!(blocks, vec![0, 0, 0, 1, 1]);
        assert_eq!(PartitionStrategy::Blocks.assign(0, 1, 3), 0);
    }

    #[test]
    fn test_context_clock() {
        let config = KernelConfig::default();
        let ctx = config.context(25);
        assert!((ctx.time_ms() - 2.5).abs() < 1e-12);
        assert_eq!(ctx.step, 25);
    }

    proptest::proptest! {
        #[test]
        fn prop_assignment_in_range_and_monotone_blocks(
            units in 1usize..500,
            partitions in 1usize..17,
        ) {
            let mut previous = 0;
            for i in 0..units {
                let rr = PartitionStrategy::RoundRobin.assign(i, units, partitions);
                let block = PartitionStrategy::Blocks.assign(i, units, partitions);
                proptest::prop_assert!(rr < partitions && block < partitions);
                proptest::prop_assert!(block >= previous);
                previous = block;
            }
        }
    }
}
