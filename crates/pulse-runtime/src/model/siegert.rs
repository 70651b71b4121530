//! Rate unit relaxing towards the Siegert transfer function
//!
//! Incoming event weights accumulate in an exponentially filtered drive that
//! shifts the mean input; the rate follows the stationary LIF rate of that
//! input with first-order dynamics. The unit never emits spikes.

use crate::{config::SimContext, error::*};
use pulse_math::{siegert_rate, SiegertParams};

/// Parameters of the Siegert rate unit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SiegertUnitParams {
    /// Relaxation time constant of the rate (ms)
    pub tau: f64,
    /// Baseline mean input (mV)
    pub mean: f64,
    /// Input noise amplitude (mV)
    pub sigma: f64,
    /// Time constant of the event-driven drive (ms)
    pub tau_input: f64,
    /// The LIF whose rate is tracked
    pub lif: SiegertParams,
}

impl Default for SiegertUnitParams {
    fn default() -> Self {
        Self {
            tau: 1.0,
            mean: 0.0,
            sigma: 0.0,
            tau_input: 10.0,
            lif: SiegertParams::default(),
        }
    }
}

impl SiegertUnitParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tau", self.tau),
            ("tau_input", self.tau_input),
            ("lif.tau_m", self.lif.tau_m),
        ] {
            if !(value > 0.0) {
                return Err(RuntimeError::invalid_parameter(name, value.to_string(), "> 0.0"));
            }
        }
        if !(self.sigma >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "sigma",
                self.sigma.to_string(),
                ">= 0.0",
            ));
        }
        if !(self.lif.tau_syn >= 0.0 && self.lif.t_ref >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "lif.tau_syn/lif.t_ref",
                format!("{}/{}", self.lif.tau_syn, self.lif.t_ref),
                ">= 0.0",
            ));
        }
        if !(self.lif.v_reset < self.lif.theta) {
            return Err(RuntimeError::invalid_parameter(
                "lif.v_reset",
                format!("{} (with theta={})", self.lif.v_reset, self.lif.theta),
                "< lif.theta",
            ));
        }
        if !self.mean.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "mean",
                self.mean.to_string(),
                "finite",
            ));
        }
        Ok(())
    }
}

/// Siegert rate unit
#[derive(Debug, Clone, PartialEq)]
pub struct Siegert {
    params: SiegertUnitParams,
    rate_decay: f64,
    drive_decay: f64,
    rate: f64,
    drive: f64,
}

impl Siegert {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] = &["rate", "drive"];

    /// Build the unit with zero drive at its stationary rate
    pub fn new(params: SiegertUnitParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let h = ctx.resolution_ms;
        let rate = siegert_rate(&params.lif, params.mean, params.sigma);
        Ok(Self {
            rate_decay: (-h / params.tau).exp(),
            drive_decay: (-h / params.tau_input).exp(),
            params,
            rate,
            drive: 0.0,
        })
    }

    /// Parameters
    pub fn params(&self) -> &SiegertUnitParams {
        &self.params
    }

    /// Stationary rate for the current drive (Hz)
    pub fn target_rate(&self) -> f64 {
        siegert_rate(&self.params.lif, self.params.mean + self.drive, self.params.sigma)
    }

    /// Advance one resolution step
    pub fn integrate(&mut self) {
        self.drive *= self.drive_decay;
        let target = self.target_rate();
        self.rate = target + (self.rate - target) * self.rate_decay;
    }

    /// Add an event weight to the drive
    pub fn receive(&mut self, weight: f64) {
        self.drive += weight;
    }

    /// Current rate (Hz)
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Read a state variable
    pub fn state(&self, name: &str) -> Option<f64> {
        match name {
            "rate" => Some(self.rate),
            "drive" => Some(self.drive),
            _ => None,
        }
    }

    /// Overwrite a state variable
    pub fn set_state(&mut self, name: &str, value: f64) -> bool {
        match name {
            "rate" => self.rate = value,
            "drive" => self.drive = value,
            _ => return false,
        }
        true
    }

    /// True if every state variable is finite
    pub fn is_finite(&self) -> bool {
        self.rate.is_finite() && self.drive.is_finite()
    }
}
