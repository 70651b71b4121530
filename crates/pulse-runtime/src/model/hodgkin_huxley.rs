//! Hodgkin-Huxley unit with alpha-shaped synaptic currents

use crate::{
    config::SimContext,
    error::*,
    integrator::{IntegrationFailure, OdeSystem, Rkf45},
};
use core::f64::consts::E;

/// Parameters of the Hodgkin-Huxley unit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HodgkinHuxleyParams {
    /// Sodium peak conductance (nS)
    pub g_na: f64,
    /// Potassium peak conductance (nS)
    pub g_k: f64,
    /// Leak conductance (nS)
    pub g_l: f64,
    /// Membrane capacitance (pF)
    pub c_m: f64,
    /// Sodium reversal potential (mV)
    pub e_na: f64,
    /// Potassium reversal potential (mV)
    pub e_k: f64,
    /// Leak reversal potential (mV)
    pub e_l: f64,
    /// Excitatory rise time (ms)
    pub tau_syn_ex: f64,
    /// Inhibitory rise time (ms)
    pub tau_syn_in: f64,
    /// Refractory period (ms)
    pub t_ref: f64,
    /// Constant external current (pA)
    pub i_e: f64,
}

impl Default for HodgkinHuxleyParams {
    fn default() -> Self {
        Self {
            g_na: 12_000.0,
            g_k: 3_600.0,
            g_l: 30.0,
            c_m: 100.0,
            e_na: 50.0,
            e_k: -77.0,
            e_l: -54.402,
            tau_syn_ex: 0.2,
            tau_syn_in: 2.0,
            t_ref: 2.0,
            i_e: 0.0,
        }
    }
}

impl HodgkinHuxleyParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("c_m", self.c_m),
            ("tau_syn_ex", self.tau_syn_ex),
            ("tau_syn_in", self.tau_syn_in),
        ] {
            if !(value > 0.0) {
                return Err(RuntimeError::invalid_parameter(name, value.to_string(), "> 0.0"));
            }
        }
        for (name, value) in [
            ("g_na", self.g_na),
            ("g_k", self.g_k),
            ("g_l", self.g_l),
            ("t_ref", self.t_ref),
        ] {
            if !(value >= 0.0) {
                return Err(RuntimeError::invalid_parameter(name, value.to_string(), ">= 0.0"));
            }
        }
        Ok(())
    }

    /// Set the constant external current
    pub fn with_current(mut self, i_e: f64) -> Self {
        self.i_e = i_e;
        self
    }
}

/// `x / (1 - exp(-x / y))` with the removable singularity at `x = 0` filled in
fn vtrap(x: f64, y: f64) -> f64 {
    if (x / y).abs() < 1e-6 {
        y + x / 2.0
    } else {
        x / (1.0 - (-x / y).exp())
    }
}

/// Opening and closing rates `(alpha, beta)` of the m, h and n gates
fn gate_rates(v: f64) -> [(f64, f64); 3] {
    let m = (0.1 * vtrap(v + 40.0, 10.0), 4.0 * (-(v + 65.0) / 18.0).exp());
    let h = (
        0.07 * (-(v + 65.0) / 20.0).exp(),
        1.0 / (1.0 + (-(v + 35.0) / 10.0).exp()),
    );
    let n = (0.01 * vtrap(v + 55.0, 10.0), 0.125 * (-(v + 65.0) / 80.0).exp());
    [m, h, n]
}

const V_M: usize = 0;
const GATE: usize = 1; // m, h, n
const DI_EX: usize = 4;
const I_EX: usize = 5;
const DI_IN: usize = 6;
const I_IN: usize = 7;
const DIM: usize = 8;

struct HhSystem<'a>(&'a HodgkinHuxleyParams);

impl OdeSystem<DIM> for HhSystem<'_> {
    fn derivatives(&self, y: &[f64; DIM], f: &mut [f64; DIM]) {
        let p = self.0;
        let v = y[V_M];
        let (m, h, n) = (y[GATE], y[GATE + 1], y[GATE + 2]);

        let i_na = p.g_na * m * m * m * h * (v - p.e_na);
        let i_k = p.g_k * n * n * n * n * (v - p.e_k);
        let i_l = p.g_l * (v - p.e_l);
        f[V_M] = (-(i_na + i_k + i_l) + p.i_e + y[I_EX] + y[I_IN]) / p.c_m;

        for (g, (alpha, beta)) in gate_rates(v).into_iter().enumerate() {
            let x = y[GATE + g];
            f[GATE + g] = alpha * (1.0 - x) - beta * x;
        }

        f[DI_EX] = -y[DI_EX] / p.tau_syn_ex;
        f[I_EX] = y[DI_EX] - y[I_EX] / p.tau_syn_ex;
        f[DI_IN] = -y[DI_IN] / p.tau_syn_in;
        f[I_IN] = y[DI_IN] - y[I_IN] / p.tau_syn_in;
    }
}

/// Hodgkin-Huxley unit integrated with the adaptive solver
///
/// Spikes are detected as local maxima above 0 mV; the membrane is not
/// reset.
#[derive(Debug, Clone, PartialEq)]
pub struct HodgkinHuxley {
    params: HodgkinHuxleyParams,
    y: [f64; DIM],
    solver: Rkf45,
}

impl HodgkinHuxley {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] =
        &["V_m", "Act_m", "Inact_h", "Act_n", "I_syn_ex", "I_syn_in"];

    /// Initial membrane potential (mV)
    pub const V_INIT: f64 = -65.0;

    /// Build the unit at -65 mV with gates at their steady state
    pub fn new(params: HodgkinHuxleyParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let mut y = [0.0; DIM];
        y[V_M] = Self::V_INIT;
        for (g, (alpha, beta)) in gate_rates(Self::V_INIT).into_iter().enumerate() {
            y[GATE + g] = alpha / (alpha + beta);
        }
        Ok(Self {
            params,
            y,
            solver: Rkf45::new(ctx.resolution_ms),
        })
    }

    /// Parameters
    pub fn params(&self) -> &HodgkinHuxleyParams {
        &self.params
    }

    /// Advance one resolution step
    pub fn integrate(&mut self, ctx: &SimContext) -> std::result::Result<(), IntegrationFailure> {
        self.solver.advance_with_retry(
            &HhSystem(&self.params),
            &mut self.y,
            ctx.resolution_ms,
            &ctx.tolerances,
        )?;
        Ok(())
    }

    /// Apply an event; the sign selects the current
    pub fn receive(&mut self, weight: f64) {
        if weight >= 0.0 {
            self.y[DI_EX] += E / self.params.tau_syn_ex * weight;
        } else {
            self.y[DI_IN] += E / self.params.tau_syn_in * weight;
        }
    }

    /// Membrane potential (mV)
    pub fn membrane(&self) -> f64 {
        self.y[V_M]
    }

    fn index(name: &str) -> Option<usize> {
        Some(match name {
            "V_m" => V_M,
            "Act_m" => GATE,
            "Inact_h" => GATE + 1,
            "Act_n" => GATE + 2,
            "I_syn_ex" => I_EX,
            "I_syn_in" => I_IN,
            _ => return None,
        })
    }

    /// Read a state variable
    pub fn state(&self, name: &str) -> Option<f64> {
        Self::index(name).map(|i| self.y[i])
    }

    /// Overwrite a state variable
    pub fn set_state(&mut self, name: &str, value: f64) -> bool {
        match Self::index(name) {
            Some(i) => {
                self.y[i] = value;
                true
            }
            None => false,
        }
    }

    /// True if every state variable is finite
    pub fn is_finite(&self) -> bool {
        self.y.iter().all(|v| v.is_finite())
    }
}
