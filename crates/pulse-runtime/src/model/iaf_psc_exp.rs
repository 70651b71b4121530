//! Leaky integrate-and-fire unit with exponentially decaying synaptic currents

use crate::{config::SimContext, error::*};
use pulse_math::{Propagator, PscExpCoefficients};

/// Parameters for the exponential-current LIF unit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IafPscExpParams {
    /// Resting potential (mV)
    pub e_l: f64,
    /// Membrane capacitance (pF)
    pub c_m: f64,
    /// Membrane time constant (ms)
    pub tau_m: f64,
    /// Refractory period (ms)
    pub t_ref: f64,
    /// Threshold (mV)
    pub v_th: f64,
    /// Reset potential (mV)
    pub v_reset: f64,
    /// Excitatory current time constant (ms)
    pub tau_syn_ex: f64,
    /// Inhibitory current time constant (ms)
    pub tau_syn_in: f64,
    /// Constant external current (pA)
    pub i_e: f64,
}

impl Default for IafPscExpParams {
    fn default() -> Self {
        Self {
            e_l: -70.0,
            c_m: 250.0,
            tau_m: 10.0,
            t_ref: 2.0,
            v_th: -55.0,
            v_reset: -70.0,
            tau_syn_ex: 2.0,
            tau_syn_in: 2.0,
            i_e: 0.0,
        }
    }
}

impl IafPscExpParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        validate_lif(
            self.c_m,
            self.tau_m,
            self.t_ref,
            self.v_th,
            self.v_reset,
            self.tau_syn_ex,
            self.tau_syn_in,
        )
    }

    /// Set the constant external current
    pub fn with_current(mut self, i_e: f64) -> Self {
        self.i_e = i_e;
        self
    }
}

/// Shared checks of the current-based LIF parameter sets
pub(crate) fn validate_lif(
    c_m: f64,
    tau_m: f64,
    t_ref: f64,
    v_th: f64,
    v_reset: f64,
    tau_syn_ex: f64,
    tau_syn_in: f64,
) -> Result<()> {
    if !(c_m > 0.0) {
        return Err(RuntimeError::invalid_parameter("c_m", c_m.to_string(), "> 0.0"));
    }
    if !(tau_m > 0.0) {
        return Err(RuntimeError::invalid_parameter("tau_m", tau_m.to_string(), "> 0.0"));
    }
    if !(t_ref >= 0.0) {
        return Err(RuntimeError::invalid_parameter("t_ref", t_ref.to_string(), ">= 0.0"));
    }
    if !(v_reset < v_th) {
        return Err(RuntimeError::invalid_parameter(
            "v_reset",
            format!("{} (with v_th={})", v_reset, v_th),
            "< v_th",
        ));
    }
    if !(tau_syn_ex > 0.0) {
        return Err(RuntimeError::invalid_parameter(
            "tau_syn_ex",
            tau_syn_ex.to_string(),
            "> 0.0",
        ));
    }
    if !(tau_syn_in > 0.0) {
        return Err(RuntimeError::invalid_parameter(
            "tau_syn_in",
            tau_syn_in.to_string(),
            "> 0.0",
        ));
    }
    Ok(())
}

/// Exponential-current LIF integrated with its exact propagator
///
/// The membrane potential is stored relative to `e_l`.
#[derive(Debug, Clone, PartialEq)]
pub struct IafPscExp {
    params: IafPscExpParams,
    ex: PscExpCoefficients,
    inh: PscExpCoefficients,
    v_m: f64,
    i_syn_ex: f64,
    i_syn_in: f64,
}

impl IafPscExp {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] = &["V_m", "I_syn_ex", "I_syn_in"];

    /// Build the unit at rest
    pub fn new(params: IafPscExpParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let prop = Propagator::new(
            ctx.resolution_ms,
            params.tau_m,
            params.c_m,
            ctx.tolerances.propagator_tolerance(),
        );
        let ex = prop.exp_psc(params.tau_syn_ex);
        let inh = prop.exp_psc(params.tau_syn_in);
        if ex.degenerate || inh.degenerate {
            log::warn!(
                "iaf_psc_exp: synaptic time constant within {} of tau_m={}, using the coinciding propagator",
                ctx.tolerances.propagator_degeneracy,
                params.tau_m
            );
        }
        Ok(Self {
            params,
            ex,
            inh,
            v_m: 0.0,
            i_syn_ex: 0.0,
            i_syn_in: 0.0,
        })
    }

    /// Parameters
    pub fn params(&self) -> &IafPscExpParams {
        &self.params
    }

    /// Excitatory propagator coefficients
    pub fn coefficients(&self) -> &PscExpCoefficients {
        &self.ex
    }

    /// Advance one resolution step
    pub fn integrate(&mut self) {
        self.v_m = self.ex.p22 * self.v_m
            + self.ex.p21 * self.i_syn_ex
            + self.inh.p21 * self.i_syn_in
            + self.ex.p20 * self.params.i_e;
        self.i_syn_ex *= self.ex.p11;
        self.i_syn_in *= self.inh.p11;
    }

    /// Apply an event; the sign selects the current
    pub fn receive(&mut self, weight: f64) {
        if weight >= 0.0 {
            self.i_syn_ex += weight;
        } else {
            self.i_syn_in += weight;
        }
    }

    /// Membrane potential relative to rest
    pub fn membrane(&self) -> f64 {
        self.v_m
    }

    /// Threshold relative to rest
    pub fn threshold(&self) -> f64 {
        self.params.v_th - self.params.e_l
    }

    /// Reset after a spike
    pub fn on_spike(&mut self) {
        self.v_m = self.params.v_reset - self.params.e_l;
    }

    /// Read a state variable
    pub fn state(&self, name: &str) -> Option<f64> {
        match name {
            "V_m" => Some(self.v_m + self.params.e_l),
            "I_syn_ex" => Some(self.i_syn_ex),
            "I_syn_in" => Some(self.i_syn_in),
            _ => None,
        }
    }

    /// Overwrite a state variable
    pub fn set_state(&mut self, name: &str, value: f64) -> bool {
        match name {
            "V_m" => self.v_m = value - self.params.e_l,
            "I_syn_ex" => self.i_syn_ex = value,
            "I_syn_in" => self.i_syn_in = value,
            _ => return false,
        }
        true
    }

    /// True if every state variable is finite
    pub fn is_finite(&self) -> bool {
        self.v_m.is_finite() && self.i_syn_ex.is_finite() && self.i_syn_in.is_finite()
    }
}
