//! Numerics for point-neuron simulation kernels
//!
//! This crate provides the closed-form pieces a simulation kernel needs to
//! advance linear subthreshold dynamics exactly and to evaluate rate
//! transfer functions without overflow:
//!
//! - [`propagator`]: exact one-step propagator coefficients for exponential
//!   and alpha shaped synaptic currents, with branch selection near
//!   coinciding time constants, and peak normalization of double-exponential
//!   conductance kernels.
//! - [`special`]: the scaled complementary error function, Dawson's integral,
//!   and the Siegert first-passage rate built on top of them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod propagator;
pub mod special;

pub use propagator::{
    beta_normalization, is_degenerate, Propagator, PropagatorTolerance, PscAlphaCoefficients,
    PscExpCoefficients,
};
pub use special::{dawson, erfcx, erfcx_area, siegert_rate, SiegertParams};

/// Floating point type used throughout the numerics
pub type Float = f64;

/// Mathematical constants not provided by `core`
pub mod constants {
    use crate::Float;

    /// sqrt(pi)
    pub const SQRT_PI: Float = 1.772_453_850_905_516;

    /// 1/sqrt(pi)
    pub const FRAC_1_SQRT_PI: Float = 0.564_189_583_547_756_3;

    /// sqrt(2) * |zeta(1/2)|, the colored-noise threshold shift coefficient
    pub const ALPHA_SHIFT: Float = 2.065_253_152_231_217;
}
