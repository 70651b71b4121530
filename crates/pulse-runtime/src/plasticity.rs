//! Synaptic transmission rules
//!
//! Every [`Connection`] carries a [`SynapseRule`] that turns a presynaptic
//! spike into the payload of the delivered event. Rules run when the spike is
//! routed to the target's partition, in merge order, so their state evolves
//! identically for every partitioning.
//!
//! Timing-dependent plasticity needs the postsynaptic spike history, kept per
//! target unit in a [`PostArchive`].

use crate::{
    delivery::Event,
    error::*,
    ids::{ConnectionId, Step, UnitId},
    model::Receptor,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::VecDeque;

/// Parameters for multiplicative STDP
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StdpParams {
    /// Presynaptic trace time constant (ms)
    pub tau_plus: f64,
    /// Postsynaptic trace time constant (ms); shared by all plastic inputs
    /// of a unit
    pub tau_minus: f64,
    /// Learning rate
    pub lambda: f64,
    /// Ratio of depression to potentiation
    pub alpha: f64,
    /// Weight dependence exponent of potentiation
    pub mu_plus: f64,
    /// Weight dependence exponent of depression
    pub mu_minus: f64,
    /// Maximum weight; its sign is the sign of the connection
    pub w_max: f64,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            tau_plus: 20.0,
            tau_minus: 20.0,
            lambda: 0.01,
            alpha: 1.0,
            mu_plus: 1.0,
            mu_minus: 1.0,
            w_max: 100.0,
        }
    }
}

impl StdpParams {
    /// Create new STDP parameters with validation
    pub fn new(
        tau_plus: f64,
        tau_minus: f64,
        lambda: f64,
        alpha: f64,
        w_max: f64,
    ) -> Result<Self> {
        let params = Self {
            tau_plus,
            tau_minus,
            lambda,
            alpha,
            w_max,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.tau_plus > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_plus",
                self.tau_plus.to_string(),
                "> 0.0",
            ));
        }
        if !(self.tau_minus > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "tau_minus",
                self.tau_minus.to_string(),
                "> 0.0",
            ));
        }
        if !(self.lambda >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "lambda",
                self.lambda.to_string(),
                ">= 0.0",
            ));
        }
        if !(self.alpha >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "alpha",
                self.alpha.to_string(),
                ">= 0.0",
            ));
        }
        if !(self.mu_plus >= 0.0 && self.mu_minus >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "mu_plus/mu_minus",
                format!("{}/{}", self.mu_plus, self.mu_minus),
                ">= 0.0",
            ));
        }
        if !(self.w_max != 0.0 && self.w_max.is_finite()) {
            return Err(RuntimeError::invalid_parameter(
                "w_max",
                self.w_max.to_string(),
                "finite and != 0.0",
            ));
        }
        Ok(())
    }

    fn facilitate(&self, w: f64, k_plus: f64) -> f64 {
        let norm = w / self.w_max + self.lambda * (1.0 - w / self.w_max).powf(self.mu_plus) * k_plus;
        norm.min(1.0) * self.w_max
    }

    fn depress(&self, w: f64, k_minus: f64) -> f64 {
        let norm = w / self.w_max
            - self.alpha * self.lambda * (w / self.w_max).powf(self.mu_minus) * k_minus;
        norm.max(0.0) * self.w_max
    }
}

/// Parameters for Tsodyks-Markram short-term plasticity
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TsodyksParams {
    /// Baseline utilization
    pub u: f64,
    /// Recovery time constant (ms)
    pub tau_rec: f64,
    /// Facilitation time constant (ms); 0 disables facilitation
    pub tau_fac: f64,
}

impl Default for TsodyksParams {
    fn default() -> Self {
        Self {
            u: 0.5,
            tau_rec: 800.0,
            tau_fac: 0.0,
        }
    }
}

impl TsodyksParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        validate_short_term(self.u, self.tau_rec, self.tau_fac)
    }
}

/// Parameters for stochastic quantal release
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QuantalParams {
    /// Baseline release probability
    pub u: f64,
    /// Site recovery time constant (ms)
    pub tau_rec: f64,
    /// Facilitation time constant (ms); 0 disables facilitation
    pub tau_fac: f64,
    /// Number of release sites
    pub n: u32,
}

impl Default for QuantalParams {
    fn default() -> Self {
        Self {
            u: 0.5,
            tau_rec: 800.0,
            tau_fac: 0.0,
            n: 1,
        }
    }
}

impl QuantalParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        validate_short_term(self.u, self.tau_rec, self.tau_fac)?;
        if self.n == 0 {
            return Err(RuntimeError::invalid_parameter("n", "0", ">= 1"));
        }
        Ok(())
    }
}

fn validate_short_term(u: f64, tau_rec: f64, tau_fac: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&u) {
        return Err(RuntimeError::invalid_parameter("U", u.to_string(), "in [0, 1]"));
    }
    if !(tau_rec > 0.0) {
        return Err(RuntimeError::invalid_parameter(
            "tau_rec",
            tau_rec.to_string(),
            "> 0.0",
        ));
    }
    if !(tau_fac >= 0.0) {
        return Err(RuntimeError::invalid_parameter(
            "tau_fac",
            tau_fac.to_string(),
            ">= 0.0",
        ));
    }
    Ok(())
}

/// Facilitation constants below this disable facilitation
const TAU_FAC_EPS: f64 = 1e-10;

fn facilitation(params_u: f64, u: f64, tau_fac: f64, elapsed_ms: f64) -> f64 {
    let decay = if tau_fac < TAU_FAC_EPS {
        0.0
    } else {
        (-elapsed_ms / tau_fac).exp()
    };
    params_u + u * (1.0 - params_u) * decay
}

/// Build-time choice of transmission rule
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "rule", rename_all = "snake_case"))]
pub enum SynapseSpec {
    /// Fixed weight
    #[default]
    Static,
    /// Spike-timing dependent plasticity
    Stdp(StdpParams),
    /// Deterministic short-term depression and facilitation
    Tsodyks(TsodyksParams),
    /// Stochastic vesicle release
    Quantal(QuantalParams),
}

impl SynapseSpec {
    /// Rule name
    pub fn name(&self) -> &'static str {
        match self {
            SynapseSpec::Static => "static",
            SynapseSpec::Stdp(_) => "stdp",
            SynapseSpec::Tsodyks(_) => "tsodyks",
            SynapseSpec::Quantal(_) => "quantal",
        }
    }

    /// Validate parameters against the connection weight
    pub fn validate(&self, weight: f64) -> Result<()> {
        match self {
            SynapseSpec::Static => Ok(()),
            SynapseSpec::Stdp(p) => {
                p.validate()?;
                if weight != 0.0 && weight.signum() != p.w_max.signum() {
                    return Err(RuntimeError::invalid_parameter(
                        "weight",
                        format!("{} (with w_max={})", weight, p.w_max),
                        "same sign as w_max",
                    ));
                }
                Ok(())
            }
            SynapseSpec::Tsodyks(p) => p.validate(),
            SynapseSpec::Quantal(p) => p.validate(),
        }
    }

    /// Instantiate the rule state of connection `id`
    pub fn instantiate(&self, id: ConnectionId, seed: u64) -> SynapseRule {
        match *self {
            SynapseSpec::Static => SynapseRule::Static,
            SynapseSpec::Stdp(params) => SynapseRule::Stdp {
                params,
                k_plus: 0.0,
                t_last: 0,
            },
            SynapseSpec::Tsodyks(params) => SynapseRule::Tsodyks {
                params,
                x: 1.0,
                u: params.u,
                t_last: None,
            },
            SynapseSpec::Quantal(params) => SynapseRule::Quantal {
                params,
                u: params.u,
                available: params.n,
                t_last: None,
                rng: StdRng::seed_from_u64(connection_seed(seed, id)),
            },
        }
    }
}

/// Seed of a connection's private generator
///
/// Depends only on the kernel seed and the connection id, never on where the
/// connection is hosted.
pub fn connection_seed(seed: u64, id: ConnectionId) -> u64 {
    seed.wrapping_add((id.raw() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Runtime state of a transmission rule
#[derive(Debug, Clone)]
pub enum SynapseRule {
    /// Fixed weight
    Static,
    /// STDP with presynaptic trace
    Stdp {
        /// Parameters
        params: StdpParams,
        /// Presynaptic trace at `t_last`
        k_plus: f64,
        /// Step of the previous presynaptic spike
        t_last: Step,
    },
    /// Tsodyks-Markram
    Tsodyks {
        /// Parameters
        params: TsodyksParams,
        /// Available resources
        x: f64,
        /// Utilization
        u: f64,
        /// Step of the previous spike
        t_last: Option<Step>,
    },
    /// Quantal release
    Quantal {
        /// Parameters
        params: QuantalParams,
        /// Release probability
        u: f64,
        /// Sites ready to release
        available: u32,
        /// Step of the previous spike
        t_last: Option<Step>,
        /// Private generator
        rng: StdRng,
    },
}

impl SynapseRule {
    /// True for timing-dependent rules that read the target's archive
    pub fn is_stdp(&self) -> bool {
        matches!(self, SynapseRule::Stdp { .. })
    }

    /// Presynaptic STDP trace at the last spike, if any
    pub fn k_plus(&self) -> Option<f64> {
        match self {
            SynapseRule::Stdp { k_plus, .. } => Some(*k_plus),
            _ => None,
        }
    }
}

/// A delayed, weighted link into a unit hosted by the owning partition
#[derive(Debug, Clone)]
pub struct Connection {
    /// Global id
    pub id: ConnectionId,
    /// Presynaptic unit
    pub source: UnitId,
    /// Postsynaptic unit
    pub target: UnitId,
    /// Index of the target within its partition
    pub target_local: usize,
    /// Receptor of the target
    pub receptor: Receptor,
    /// Delay in steps
    pub delay: Step,
    /// Current weight
    pub weight: f64,
    /// Transmission rule
    pub rule: SynapseRule,
}

impl Connection {
    /// Run the rule for a presynaptic spike at `spike_step`
    ///
    /// Returns the event to register, or `None` if nothing is transmitted.
    /// STDP connections need the target's archive.
    pub fn transmit(
        &mut self,
        spike_step: Step,
        resolution_ms: f64,
        archive: Option<&mut PostArchive>,
    ) -> Option<Event> {
        let payload = match &mut self.rule {
            SynapseRule::Static => self.weight,
            SynapseRule::Stdp {
                params,
                k_plus,
                t_last,
            } => {
                let d = self.delay as i64;
                let t = spike_step as i64;
                let t_last_ms = *t_last as f64 * resolution_ms;
                let t_ms = spike_step as f64 * resolution_ms;
                let mut w = self.weight;
                if let Some(archive) = archive {
                    for post in archive.range(*t_last as i64 - d, t - d) {
                        let minus_dt = (*t_last as i64 - (post + d)) as f64 * resolution_ms;
                        w = params.facilitate(w, *k_plus * (minus_dt / params.tau_plus).exp());
                    }
                    w = params.depress(w, archive.k_minus(t - d, resolution_ms));
                }
                self.weight = w;
                *k_plus = *k_plus * ((t_last_ms - t_ms) / params.tau_plus).exp() + 1.0;
                *t_last = spike_step;
                w
            }
            SynapseRule::Tsodyks {
                params,
                x,
                u,
                t_last,
            } => {
                if let Some(last) = *t_last {
                    let h = (spike_step - last) as f64 * resolution_ms;
                    *x = 1.0 + (*x - *x * *u - 1.0) * (-h / params.tau_rec).exp();
                    *u = facilitation(params.u, *u, params.tau_fac, h);
                }
                *t_last = Some(spike_step);
                self.weight * *u * *x
            }
            SynapseRule::Quantal {
                params,
                u,
                available,
                t_last,
                rng,
            } => {
                if let Some(last) = *t_last {
                    let h = (spike_step - last) as f64 * resolution_ms;
                    *u = facilitation(params.u, *u, params.tau_fac, h);
                    let p_recover = 1.0 - (-h / params.tau_rec).exp();
                    let depleted = params.n - *available;
                    for _ in 0..depleted {
                        if rng.gen::<f64>() < p_recover {
                            *available += 1;
                        }
                    }
                }
                *t_last = Some(spike_step);
                let mut released = 0u32;
                for _ in 0..*available {
                    if rng.gen::<f64>() < *u {
                        released += 1;
                    }
                }
                if released == 0 {
                    return None;
                }
                *available -= released;
                self.weight * released as f64
            }
        };
        Some(Event {
            source: self.source,
            arrival: spike_step + self.delay,
            channel: self.receptor,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PostSpike {
    step: Step,
    k_minus: f64,
    accessed: u32,
}

/// History length above which [`PostArchive::record`] warns once
const ARCHIVE_WARN_LEN: usize = 10_000;

/// Postsynaptic spike history with trace values for STDP
///
/// An entry is dropped once every plastic input has read it and the next
/// entry is older than the ring span, so lookups for spikes still in flight
/// always find their predecessor.
///
/// A plastic input whose source never fires never reads, so the history of
/// its target grows with every postsynaptic spike. The pending depression for
/// that input depends on the whole history once it fires again, so nothing
/// is dropped early; a warning is logged once the history gets long.
#[derive(Debug, Clone, PartialEq)]
pub struct PostArchive {
    tau_minus: f64,
    n_incoming: u32,
    horizon: Step,
    history: VecDeque<PostSpike>,
    k_minus: f64,
    warned: bool,
}

impl PostArchive {
    /// Archive read by `n_incoming` plastic connections; entries older than
    /// `horizon` steps become eligible for pruning
    pub fn new(tau_minus: f64, n_incoming: u32, horizon: Step) -> Self {
        Self {
            tau_minus,
            n_incoming,
            horizon,
            history: VecDeque::new(),
            k_minus: 0.0,
            warned: false,
        }
    }

    /// Postsynaptic trace time constant (ms)
    pub fn tau_minus(&self) -> f64 {
        self.tau_minus
    }

    /// Number of archived spikes
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True if nothing is archived
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Record a postsynaptic spike
    pub fn record(&mut self, step: Step, resolution_ms: f64) {
        if let Some(last) = self.history.back() {
            let elapsed = (step - last.step) as f64 * resolution_ms;
            self.k_minus = self.k_minus * (-elapsed / self.tau_minus).exp() + 1.0;
        } else {
            self.k_minus = 1.0;
        }

        while self.history.len() > 1 {
            let front = self.history[0];
            let next = self.history[1];
            if front.accessed >= self.n_incoming && step - next.step > self.horizon {
                self.history.pop_front();
            } else {
                break;
            }
        }

        self.history.push_back(PostSpike {
            step,
            k_minus: self.k_minus,
            accessed: 0,
        });

        if !self.warned && self.history.len() > ARCHIVE_WARN_LEN {
            self.warned = true;
            log::warn!(
                "post-synaptic archive holds {} spikes at step {}; a plastic input \
                 that never fires keeps them alive",
                self.history.len(),
                step
            );
        }
    }

    /// Steps of archived spikes in `(from, to]`, marking them as read
    pub fn range(&mut self, from: i64, to: i64) -> Vec<i64> {
        let mut steps = Vec::new();
        for entry in self.history.iter_mut() {
            let s = entry.step as i64;
            if s > from && s <= to {
                entry.accessed += 1;
                steps.push(s);
            }
        }
        steps
    }

    /// Postsynaptic trace just before step `at`
    pub fn k_minus(&self, at: i64, resolution_ms: f64) -> f64 {
        self.history
            .iter()
            .rev()
            .find(|e| (e.step as i64) < at)
            .map(|e| {
                let elapsed = (at - e.step as i64) as f64 * resolution_ms;
                e.k_minus * (-elapsed / self.tau_minus).exp()
            })
            .unwrap_or(0.0)
    }
}
