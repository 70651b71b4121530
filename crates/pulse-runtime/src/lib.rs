//! Simulation kernel for networks of spiking point neurons
//!
//! Networks are described with a [`NetworkBuilder`], validated and built into
//! a [`Kernel`], then advanced on a fixed resolution grid. Units are spread
//! over partitions that run in parallel between spike exchanges; spikes are
//! merged in `(emission step, source)` order, so results are bit-identical
//! for any number of workers.
//!
//! ```no_run
//! use pulse_runtime::{
//!     model::{IafPscExpParams, ModelParams},
//!     ConnectionDescriptor, KernelConfig, MemoryRecorder, NetworkBuilder, RecordingSpec,
//! };
//!
//! # fn main() -> pulse_runtime::Result<()> {
//! let mut net = NetworkBuilder::new();
//! let driver = net.add_unit(ModelParams::IafPscExp(
//!     IafPscExpParams::default().with_current(400.0),
//! ));
//! let target = net.add_unit(ModelParams::IafPscExp(IafPscExpParams::default()));
//! net.connect(ConnectionDescriptor::new(driver, target, 80.0, 10));
//!
//! let mut kernel = net.build(KernelConfig::default().with_workers(2))?;
//! let recorder = MemoryRecorder::new();
//! let spikes = recorder.handle();
//! kernel.add_recorder(RecordingSpec::new().with_spikes(), Box::new(recorder))?;
//! kernel.advance(10_000)?;
//! println!("{} spikes", spikes.spikes().len());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod delivery;
pub mod error;
pub mod ids;
pub mod integrator;
pub mod model;
pub mod network;
pub mod partition;
pub mod plasticity;
pub mod recording;
pub mod simulation;
pub mod unit;

pub use config::{KernelConfig, NumericTolerances, PartitionStrategy, SimContext};
pub use error::{Result, RuntimeError};
pub use ids::{ConnectionId, PartitionId, Step, UnitId};
pub use model::{Dynamics, ModelParams, Receptor};
pub use network::{ConnectionDescriptor, NetworkBuilder, UnitDescriptor};
pub use plasticity::{QuantalParams, StdpParams, SynapseSpec, TsodyksParams};
pub use recording::{
    CallbackRecorder, DeliveredEvent, MemoryRecorder, Record, Recorder, Recording,
    RecordingHandle, RecordingSpec, SpikeRecord, StateSample,
};
pub use simulation::{Kernel, RunSummary};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(ModelParams::default().name(), "iaf_psc_exp");
        assert_eq!(SynapseSpec::default().name(), "static");

        let mut net = NetworkBuilder::new();
        let a = net.add_unit(ModelParams::default());
        let kernel = net.build(config).unwrap();
        assert_eq!(kernel.num_units(), 1);
        assert_eq!(kernel.min_delay(), 1);
        assert!(kernel.state(a, "V_m").is_ok());
    }
}
