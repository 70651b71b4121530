//! Leaky integrate-and-fire unit with alpha-shaped synaptic currents

use super::iaf_psc_exp::validate_lif;
use crate::{config::SimContext, error::*};
use core::f64::consts::E;
use pulse_math::{Propagator, PscAlphaCoefficients};

/// Parameters for the alpha-current LIF unit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IafPscAlphaParams {
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
    /// Excitatory rise time (ms)
    pub tau_syn_ex: f64,
    /// Inhibitory rise time (ms)
    pub tau_syn_in: f64,
    /// Constant external current (pA)
    pub i_e: f64,
}

impl Default for IafPscAlphaParams {
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

impl IafPscAlphaParams {
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
}

/// Alpha-current LIF integrated with its exact propagator
///
/// A unit-weight event produces a current peaking at 1 pA after `tau_syn`.
#[derive(Debug, Clone, PartialEq)]
pub struct IafPscAlpha {
    params: IafPscAlphaParams,
    ex: PscAlphaCoefficients,
    inh: PscAlphaCoefficients,
    v_m: f64,
    di_ex: f64,
    i_ex: f64,
    di_in: f64,
    i_in: f64,
}

impl IafPscAlpha {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] =
        &["V_m", "I_syn_ex", "I_syn_in", "dI_syn_ex", "dI_syn_in"];

    /// Build the unit at rest
    pub fn new(params: IafPscAlphaParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let prop = Propagator::new(
            ctx.resolution_ms,
            params.tau_m,
            params.c_m,
            ctx.tolerances.propagator_tolerance(),
        );
        let ex = prop.alpha_psc(params.tau_syn_ex);
        let inh = prop.alpha_psc(params.tau_syn_in);
        if ex.degenerate || inh.degenerate {
            log::warn!(
                "iaf_psc_alpha: synaptic time constant within {} of tau_m={}, using the coinciding propagator",
                ctx.tolerances.propagator_degeneracy,
                params.tau_m
            );
        }
        Ok(Self {
            params,
            ex,
            inh,
            v_m: 0.0,
            di_ex: 0.0,
            i_ex: 0.0,
            di_in: 0.0,
            i_in: 0.0,
        })
    }

    /// Parameters
    pub fn params(&self) -> &IafPscAlphaParams {
        &self.params
    }

    /// Advance one resolution step
    pub fn integrate(&mut self) {
        self.v_m = self.ex.p30 * self.params.i_e
            + self.ex.p31 * self.di_ex
            + self.ex.p32 * self.i_ex
            + self.inh.p31 * self.di_in
            + self.inh.p32 * self.i_in
            + self.ex.p33 * self.v_m;

        self.i_ex = self.ex.p21 * self.di_ex + self.ex.p22 * self.i_ex;
        self.di_ex *= self.ex.p11;
        self.i_in = self.inh.p21 * self.di_in + self.inh.p22 * self.i_in;
        self.di_in *= self.inh.p11;
    }

    /// Apply an event; the sign selects the current
    pub fn receive(&mut self, weight: f64) {
        if weight >= 0.0 {
            self.di_ex += E / self.params.tau_syn_ex * weight;
        } else {
            self.di_in += E / self.params.tau_syn_in * weight;
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
            "I_syn_ex" => Some(self.i_ex),
            "I_syn_in" => Some(self.i_in),
            "dI_syn_ex" => Some(self.di_ex),
            "dI_syn_in" => Some(self.di_in),
            _ => None,
        }
    }

    /// Overwrite a state variable
    pub fn set_state(&mut self, name: &str, value: f64) -> bool {
        match name {
            "V_m" => self.v_m = value - self.params.e_l,
            "I_syn_ex" => self.i_ex = value,
            "I_syn_in" => self.i_in = value,
            "dI_syn_ex" => self.di_ex = value,
            "dI_syn_in" => self.di_in = value,
            _ => return false,
        }
        true
    }

    /// True if every state variable is finite
    pub fn is_finite(&self) -> bool {
        [self.v_m, self.di_ex, self.i_ex, self.di_in, self.i_in]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn ctx() -> SimContext {
        KernelConfig::default().context(0)
    }

    #[test]
    fn test_current_peaks_at_tau_syn() {
        let mut unit = IafPscAlpha::new(IafPscAlphaParams::default(), &ctx()).unwrap();
        unit.receive(1.0);
        let mut peak = (0usize, 0.0f64);
        for step in 1..=100 {
            unit.integrate();
            let i = unit.state("I_syn_ex").unwrap();
            if i > peak.1 {
                peak = (step, i);
            }
        }
        // tau_syn = 2 ms = 20 steps
        assert_eq!(peak.0, 20);
        assert!((peak.1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_matches_quadrature() {
        let mut unit = IafPscAlpha::new(IafPscAlphaParams::default(), &ctx()).unwrap();
        unit.receive(100.0);
        let steps = 40;
        for _ in 0..steps {
            unit.integrate();
        }
        // V(t) = 1/C int_0^t e^{-(t-s)/tau_m} I(s) ds with I(s) = w e/tau s e^{-s/tau}
        let (tau_s, tau_m, c) = (2.0f64, 10.0f64, 250.0f64);
        let t = steps as f64 * 0.1;
        let n = 20_000;
        let ds = t / n as f64;
        let mut v = 0.0;
        for k in 0..n {
            let s = (k as f64 + 0.5) * ds;
            let i = 100.0 * E / tau_s * s * (-s / tau_s).exp();
            v += (-(t - s) / tau_m).exp() * i * ds / c;
        }
        assert!((unit.membrane() - v).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_time_constants_stay_finite() {
        let params = IafPscAlphaParams {
            tau_syn_ex: 10.0,
            ..Default::default()
        };
        let mut unit = IafPscAlpha::new(params, &ctx()).unwrap();
        unit.receive(50.0);
        for _ in 0..100 {
            unit.integrate();
        }
        assert!(unit.is_finite());
        assert!(unit.membrane() > 0.0);
    }
}
