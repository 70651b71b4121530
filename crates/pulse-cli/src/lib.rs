//! pulse CLI crate
//!
//! Thin driver around `pulse_runtime`:
//! - `check`: parse a TOML network description, build the kernel and print a summary.
//! - `run`: build, advance a fixed number of steps and print spike counts per unit,
//!   or the full spike list as JSON.
//!
//! The library view exists so the commands and the network file format can be
//! exercised from tests without spawning the binary.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::PulseCli;
