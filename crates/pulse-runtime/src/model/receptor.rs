//! Synaptic receptors: beta conductance kernels and NMDA gating

use crate::error::*;
use core::fmt;
use pulse_math::beta_normalization;

/// Input channel of a unit addressed by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Receptor {
    /// Current-based input; the sign of the weight selects excitation or
    /// inhibition
    #[default]
    Default,
    /// Fast excitatory conductance
    Ampa,
    /// Voltage-gated excitatory conductance
    Nmda,
    /// Fast inhibitory conductance
    GabaA,
    /// Slow inhibitory conductance
    GabaB,
}

impl Receptor {
    /// All conductance receptors in state order
    pub const CONDUCTANCES: [Receptor; 4] = [
        Receptor::Ampa,
        Receptor::Nmda,
        Receptor::GabaA,
        Receptor::GabaB,
    ];

    /// Index into a four-receptor conductance block
    pub fn conductance_index(&self) -> Option<usize> {
        match self {
            Receptor::Default => None,
            Receptor::Ampa => Some(0),
            Receptor::Nmda => Some(1),
            Receptor::GabaA => Some(2),
            Receptor::GabaB => Some(3),
        }
    }

    /// Lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            Receptor::Default => "default",
            Receptor::Ampa => "ampa",
            Receptor::Nmda => "nmda",
            Receptor::GabaA => "gaba_a",
            Receptor::GabaB => "gaba_b",
        }
    }
}

impl fmt::Display for Receptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of a double-exponential conductance
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BetaParams {
    /// Reversal potential (mV)
    pub e_rev: f64,
    /// Rise time constant (ms)
    pub tau_rise: f64,
    /// Decay time constant (ms)
    pub tau_decay: f64,
    /// Peak conductance for a unit-weight event
    pub g_peak: f64,
}

impl BetaParams {
    /// Create receptor parameters with validation
    pub fn new(e_rev: f64, tau_rise: f64, tau_decay: f64, g_peak: f64) -> Result<Self> {
        if !(tau_rise > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_rise",
                tau_rise.to_string(),
                "> 0.0",
            ));
        }
        if !(tau_decay > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_decay",
                tau_decay.to_string(),
                "> 0.0",
            ));
        }
        if !(g_peak >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "g_peak",
                g_peak.to_string(),
                ">= 0.0",
            ));
        }
        Ok(Self {
            e_rev,
            tau_rise,
            tau_decay,
            g_peak,
        })
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        Self::new(self.e_rev, self.tau_rise, self.tau_decay, self.g_peak)?;
        Ok(())
    }
}

/// Conductance driven by a peak-normalized double-exponential kernel
///
/// `dg' = -dg/tau_rise`, `g' = dg - g/tau_decay`. The state lives in the
/// owning model's ODE vector; this type holds the per-receptor constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaReceptor {
    /// Kernel parameters
    pub params: BetaParams,
    /// Increment of `dg` per unit weight
    pub normalization: f64,
}

impl BetaReceptor {
    /// Compute the peak normalization once
    pub fn new(params: BetaParams, degeneracy: f64) -> Result<Self> {
        params.validate()?;
        let normalization = beta_normalization(params.tau_rise, params.tau_decay, degeneracy);
        Ok(Self {
            params,
            normalization,
        })
    }

    /// Jump of `dg` caused by an event of weight `w`
    pub fn kick(&self, w: f64) -> f64 {
        w * self.params.g_peak * self.normalization
    }

    /// Time derivatives of `(g, dg)`
    pub fn derivatives(&self, g: f64, dg: f64) -> (f64, f64) {
        (dg - g / self.params.tau_decay, -dg / self.params.tau_rise)
    }

    /// Current into the membrane at voltage `v`, scaled by `gate`
    pub fn current(&self, g: f64, v: f64, gate: f64) -> f64 {
        -g * gate * (v - self.params.e_rev)
    }
}

/// Magnesium unblock of NMDA channels
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NmdaGate {
    /// Steepness of the activation sigmoid (1/mV)
    pub s_act: f64,
    /// Half-activation voltage (mV)
    pub v_act: f64,
    /// Fast unblock time constant (ms)
    pub tau_fast: f64,
    /// Slow unblock time constant (ms)
    pub tau_slow: f64,
}

impl Default for NmdaGate {
    fn default() -> Self {
        Self {
            s_act: 0.081,
            v_act: -25.57,
            tau_fast: 0.68,
            tau_slow: 22.7,
        }
    }
}

impl NmdaGate {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.tau_fast > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_Mg_fast_NMDA",
                self.tau_fast.to_string(),
                "> 0.0",
            ));
        }
        if !(self.tau_slow > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_Mg_slow_NMDA",
                self.tau_slow.to_string(),
                "> 0.0",
            ));
        }
        Ok(())
    }

    /// Steady-state unblocked fraction at voltage `v`
    pub fn m_eq(&self, v: f64) -> f64 {
        1.0 / (1.0 + (-self.s_act * (v - self.v_act)).exp())
    }

    /// Weight of the fast component at voltage `v`
    pub fn fast_fraction(v: f64) -> f64 {
        (0.51 - 0.0028 * v).clamp(0.0, 1.0)
    }

    /// Effective unblocked fraction
    pub fn blend(&self, v: f64, m_fast: f64, m_slow: f64) -> f64 {
        let a = Self::fast_fraction(v);
        a * m_fast + (1.0 - a) * m_slow
    }

    /// Time derivatives of `(m_fast, m_slow)`
    pub fn derivatives(&self, v: f64, m_fast: f64, m_slow: f64) -> (f64, f64) {
        let m_eq = self.m_eq(v);
        (
            (m_eq - m_fast) / self.tau_fast,
            (m_eq - m_slow) / self.tau_slow,
        )
    }

    /// Blocking is instantaneous: neither component may exceed `m_eq(v)`
    pub fn clamp(&self, v: f64, m_fast: &mut f64, m_slow: &mut f64) {
        let m_eq = self.m_eq(v);
        *m_fast = m_fast.min(m_eq);
        *m_slow = m_slow.min(m_eq);
    }
}
