//! Conductance-based unit with dynamic threshold after Hill & Tononi (2005)
//!
//! The membrane has sodium and potassium leaks, four beta-kernel receptors
//! and a threshold that relaxes towards `theta_eq`. A spike sets membrane
//! potential and threshold to `e_na`; a potassium spike current then pulls
//! the membrane back for `t_spike` ms. That window doubles as the refractory
//! period, so detections during repolarization are suppressed.

use super::receptor::{BetaParams, BetaReceptor, NmdaGate, Receptor};
use crate::{
    config::SimContext,
    error::*,
    integrator::{IntegrationFailure, OdeSystem, Rkf45},
};

/// Parameters of the Hill-Tononi unit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HillTononiParams {
    /// Sodium reversal potential (mV)
    pub e_na: f64,
    /// Potassium reversal potential (mV)
    pub e_k: f64,
    /// Sodium leak conductance
    pub g_nal: f64,
    /// Potassium leak conductance
    pub g_kl: f64,
    /// Membrane time constant (ms)
    pub tau_m: f64,
    /// Equilibrium threshold (mV)
    pub theta_eq: f64,
    /// Threshold time constant (ms)
    pub tau_theta: f64,
    /// Time constant of the repolarizing spike current (ms)
    pub tau_spike: f64,
    /// Duration of the spike current (ms)
    pub t_spike: f64,
    /// Constant external drive (mV/ms scaled by tau_m)
    pub i_e: f64,
    /// AMPA receptor
    pub ampa: BetaParams,
    /// NMDA receptor
    pub nmda: BetaParams,
    /// GABA_A receptor
    pub gaba_a: BetaParams,
    /// GABA_B receptor
    pub gaba_b: BetaParams,
    /// NMDA magnesium unblock
    pub nmda_gate: NmdaGate,
    /// Use the steady-state unblock instead of the two-component dynamics
    pub instant_unblock_nmda: bool,
}

impl Default for HillTononiParams {
    fn default() -> Self {
        Self {
            e_na: 30.0,
            e_k: -90.0,
            g_nal: 0.2,
            g_kl: 1.0,
            tau_m: 16.0,
            theta_eq: -51.0,
            tau_theta: 2.0,
            tau_spike: 1.75,
            t_spike: 2.0,
            i_e: 0.0,
            ampa: BetaParams {
                e_rev: 0.0,
                tau_rise: 0.5,
                tau_decay: 2.4,
                g_peak: 0.1,
            },
            nmda: BetaParams {
                e_rev: 0.0,
                tau_rise: 4.0,
                tau_decay: 40.0,
                g_peak: 0.075,
            },
            gaba_a: BetaParams {
                e_rev: -70.0,
                tau_rise: 1.0,
                tau_decay: 7.0,
                g_peak: 0.33,
            },
            gaba_b: BetaParams {
                e_rev: -90.0,
                tau_rise: 60.0,
                tau_decay: 200.0,
                g_peak: 0.0132,
            },
            nmda_gate: NmdaGate::default(),
            instant_unblock_nmda: false,
        }
    }
}

impl HillTononiParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tau_m", self.tau_m),
            ("tau_theta", self.tau_theta),
            ("tau_spike", self.tau_spike),
        ] {
            if !(value > 0.0) {
                return Err(RuntimeError::invalid_parameter(name, value.to_string(), "> 0.0"));
            }
        }
        if !(self.t_spike >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "t_spike",
                self.t_spike.to_string(),
                ">= 0.0",
            ));
        }
        if !(self.g_nal >= 0.0 && self.g_kl >= 0.0 && self.g_nal + self.g_kl > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "g_nal/g_kl",
                format!("{}/{}", self.g_nal, self.g_kl),
                "non-negative with positive sum",
            ));
        }
        if !(self.theta_eq < self.e_na) {
            return Err(RuntimeError::invalid_parameter(
                "theta_eq",
                format!("{} (with e_na={})", self.theta_eq, self.e_na),
                "< e_na",
            ));
        }
        self.ampa.validate()?;
        self.nmda.validate()?;
        self.gaba_a.validate()?;
        self.gaba_b.validate()?;
        self.nmda_gate.validate()
    }

    /// Leak reversal: the potential the membrane rests at without input
    pub fn resting_potential(&self) -> f64 {
        (self.g_nal * self.e_na + self.g_kl * self.e_k) / (self.g_nal + self.g_kl)
    }
}

const V_M: usize = 0;
const THETA: usize = 1;
const G: usize = 2; // (g, dg) pairs for AMPA, NMDA, GABA_A, GABA_B
const M_FAST: usize = 10;
const M_SLOW: usize = 11;
const DIM: usize = 12;

struct HtSystem<'a> {
    params: &'a HillTononiParams,
    receptors: &'a [BetaReceptor; 4],
    spike_current: bool,
}

impl OdeSystem<DIM> for HtSystem<'_> {
    fn derivatives(&self, y: &[f64; DIM], f: &mut [f64; DIM]) {
        let p = self.params;
        let v = y[V_M];

        let m_nmda = if p.instant_unblock_nmda {
            p.nmda_gate.m_eq(v)
        } else {
            p.nmda_gate.blend(v, y[M_FAST], y[M_SLOW])
        };

        let mut i_syn = 0.0;
        for (r, receptor) in self.receptors.iter().enumerate() {
            let g = y[G + 2 * r];
            let dg = y[G + 2 * r + 1];
            let gate = if r == 1 { m_nmda } else { 1.0 };
            i_syn += receptor.current(g, v, gate);
            let (dgdt, ddgdt) = receptor.derivatives(g, dg);
            f[G + 2 * r] = dgdt;
            f[G + 2 * r + 1] = ddgdt;
        }

        let i_na = p.g_nal * (v - p.e_na);
        let i_k = p.g_kl * (v - p.e_k);
        let i_spike = if self.spike_current {
            -(v - p.e_k) / p.tau_spike
        } else {
            0.0
        };
        f[V_M] = (-i_na - i_k + i_syn + p.i_e) / p.tau_m + i_spike;
        f[THETA] = -(y[THETA] - p.theta_eq) / p.tau_theta;

        let (dm_fast, dm_slow) = p.nmda_gate.derivatives(v, y[M_FAST], y[M_SLOW]);
        f[M_FAST] = dm_fast;
        f[M_SLOW] = dm_slow;
    }
}

/// Hill-Tononi unit integrated with the adaptive solver
#[derive(Debug, Clone, PartialEq)]
pub struct HillTononi {
    params: HillTononiParams,
    receptors: [BetaReceptor; 4],
    y: [f64; DIM],
    solver: Rkf45,
}

impl HillTononi {
    /// State variable names
    pub const STATE_NAMES: &'static [&'static str] = &[
        "V_m",
        "theta",
        "g_AMPA",
        "g_NMDA",
        "g_GABA_A",
        "g_GABA_B",
        "m_fast_NMDA",
        "m_slow_NMDA",
    ];

    /// Build the unit at its resting potential
    pub fn new(params: HillTononiParams, ctx: &SimContext) -> Result<Self> {
        params.validate()?;
        let degeneracy = ctx.tolerances.propagator_degeneracy;
        let receptors = [
            BetaReceptor::new(params.ampa, degeneracy)?,
            BetaReceptor::new(params.nmda, degeneracy)?,
            BetaReceptor::new(params.gaba_a, degeneracy)?,
            BetaReceptor::new(params.gaba_b, degeneracy)?,
        ];
        let v = params.resting_potential();
        let m_eq = params.nmda_gate.m_eq(v);
        let mut y = [0.0; DIM];
        y[V_M] = v;
        y[THETA] = params.theta_eq;
        y[M_FAST] = m_eq;
        y[M_SLOW] = m_eq;
        Ok(Self {
            params,
            receptors,
            y,
            solver: Rkf45::new(ctx.resolution_ms),
        })
    }

    /// Parameters
    pub fn params(&self) -> &HillTononiParams {
        &self.params
    }

    /// Advance one resolution step; the spike current is active while the
    /// unit is refractory
    pub fn integrate(
        &mut self,
        ctx: &SimContext,
        refractory: bool,
    ) -> std::result::Result<(), IntegrationFailure> {
        let system = HtSystem {
            params: &self.params,
            receptors: &self.receptors,
            spike_current: refractory,
        };
        self.solver
            .advance_with_retry(&system, &mut self.y, ctx.resolution_ms, &ctx.tolerances)?;

        let v = self.y[V_M];
        let (fast, slow) = self.y.split_at_mut(M_SLOW);
        self.params.nmda_gate.clamp(v, &mut fast[M_FAST], &mut slow[0]);
        Ok(())
    }

    /// Apply an event to a conductance receptor
    pub fn receive(&mut self, receptor: Receptor, weight: f64) {
        if let Some(r) = receptor.conductance_index() {
            self.y[G + 2 * r + 1] += self.receptors[r].kick(weight);
        }
    }

    /// Membrane potential (mV)
    pub fn membrane(&self) -> f64 {
        self.y[V_M]
    }

    /// Dynamic threshold (mV)
    pub fn threshold(&self) -> f64 {
        self.y[THETA]
    }

    /// Spike: membrane and threshold jump to the sodium reversal
    pub fn on_spike(&mut self) {
        self.y[V_M] = self.params.e_na;
        self.y[THETA] = self.params.e_na;
    }

    fn index(name: &str) -> Option<usize> {
        Some(match name {
            "V_m" => V_M,
            "theta" => THETA,
            "g_AMPA" => G,
            "g_NMDA" => G + 2,
            "g_GABA_A" => G + 4,
            "g_GABA_B" => G + 6,
            "m_fast_NMDA" => M_FAST,
            "m_slow_NMDA" => M_SLOW,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn ctx() -> SimContext {
        KernelConfig::default().context(0)
    }

    #[test]
    fn test_rests_at_leak_reversal() {
        let mut unit = HillTononi::new(HillTononiParams::default(), &ctx()).unwrap();
        let v0 = unit.membrane();
        assert!((v0 - (-70.0)).abs() < 1e-12);
        for _ in 0..100 {
            unit.integrate(&ctx(), false).unwrap();
        }
        assert!((unit.membrane() - v0).abs() < 1e-9);
        assert!((unit.threshold() - (-51.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ampa_event_depolarizes() {
        let mut unit = HillTononi::new(HillTononiParams::default(), &ctx()).unwrap();
        unit.receive(Receptor::Ampa, 1.0);
        let mut g_max: f64 = 0.0;
        let mut v_max = f64::MIN;
        for _ in 0..200 {
            unit.integrate(&ctx(), false).unwrap();
            g_max = g_max.max(unit.state("g_AMPA").unwrap());
            v_max = v_max.max(unit.membrane());
        }
        assert!((g_max - 0.1).abs() < 1e-3, "g_max = {g_max}");
        assert!(v_max > -70.0);
    }

    #[test]
    fn test_spike_current_repolarizes() {
        let mut unit = HillTononi::new(HillTononiParams::default(), &ctx()).unwrap();
        unit.on_spike();
        assert_eq!(unit.membrane(), 30.0);
        for _ in 0..20 {
            unit.integrate(&ctx(), true).unwrap();
        }
        assert!(unit.membrane() < unit.threshold());
    }

    #[test]
    fn test_nmda_block_is_instant() {
        let mut unit = HillTononi::new(HillTononiParams::default(), &ctx()).unwrap();
        // fully unblocked gating at a hyperpolarized membrane is clamped
        unit.set_state("m_fast_NMDA", 1.0);
        unit.set_state("m_slow_NMDA", 1.0);
        unit.integrate(&ctx(), false).unwrap();
        let m_eq = unit.params().nmda_gate.m_eq(unit.membrane());
        assert!(unit.state("m_fast_NMDA").unwrap() <= m_eq);
        assert!(unit.state("m_slow_NMDA").unwrap() <= m_eq);
    }
}
