//! Unit dynamics
//!
//! Every model kind is a variant of the closed [`Dynamics`] enum and is
//! dispatched with a `match` in the update loop. [`ModelParams`] is the
//! build-time description of a unit's dynamics.

pub mod hill_tononi;
pub mod hodgkin_huxley;
pub mod iaf_psc_alpha;
pub mod iaf_psc_exp;
pub mod receptor;
pub mod siegert;
pub mod spike_source;

pub use hill_tononi::{HillTononi, HillTononiParams};
pub use hodgkin_huxley::{HodgkinHuxley, HodgkinHuxleyParams};
pub use iaf_psc_alpha::{IafPscAlpha, IafPscAlphaParams};
pub use iaf_psc_exp::{IafPscExp, IafPscExpParams};
pub use receptor::{BetaParams, BetaReceptor, NmdaGate, Receptor};
pub use siegert::{Siegert, SiegertUnitParams};
pub use spike_source::{SpikeSource, SpikeSourceParams};

use crate::{config::SimContext, error::*, integrator::IntegrationFailure, Step};

/// How a unit decides that it emits a spike
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpikeDetector {
    /// Membrane potential at or above the (possibly dynamic) threshold
    Threshold,
    /// Membrane potential at or above `level` and no longer rising
    Peak {
        /// Minimum potential of a detected peak (mV)
        level: f64,
    },
    /// Emission follows a prescribed schedule
    Scheduled,
    /// The unit never emits
    Silent,
}

/// Build-time parameters of a unit, tagged by model name
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "model", rename_all = "snake_case"))]
pub enum ModelParams {
    /// LIF with exponential currents
    IafPscExp(IafPscExpParams),
    /// LIF with alpha currents
    IafPscAlpha(IafPscAlphaParams),
    /// Conductance-based unit with dynamic threshold
    HillTononi(HillTononiParams),
    /// Hodgkin-Huxley with alpha currents
    HodgkinHuxley(HodgkinHuxleyParams),
    /// Siegert rate unit
    Siegert(SiegertUnitParams),
    /// Scheduled spike source
    SpikeSource(SpikeSourceParams),
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams::IafPscExp(IafPscExpParams::default())
    }
}

impl ModelParams {
    /// Model name as used in network descriptions
    pub fn name(&self) -> &'static str {
        match self {
            ModelParams::IafPscExp(_) => "iaf_psc_exp",
            ModelParams::IafPscAlpha(_) => "iaf_psc_alpha",
            ModelParams::HillTononi(_) => "hill_tononi",
            ModelParams::HodgkinHuxley(_) => "hodgkin_huxley",
            ModelParams::Siegert(_) => "siegert",
            ModelParams::SpikeSource(_) => "spike_source",
        }
    }

    /// Validate parameters without building the unit
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelParams::IafPscExp(p) => p.validate(),
            ModelParams::IafPscAlpha(p) => p.validate(),
            ModelParams::HillTononi(p) => p.validate(),
            ModelParams::HodgkinHuxley(p) => p.validate(),
            ModelParams::Siegert(p) => p.validate(),
            ModelParams::SpikeSource(p) => p.validate(),
        }
    }

    /// Build the dynamics for the given resolution
    pub fn build(&self, ctx: &SimContext) -> Result<Dynamics> {
        Ok(match self {
            ModelParams::IafPscExp(p) => Dynamics::IafPscExp(IafPscExp::new(p.clone(), ctx)?),
            ModelParams::IafPscAlpha(p) => {
                Dynamics::IafPscAlpha(IafPscAlpha::new(p.clone(), ctx)?)
            }
            ModelParams::HillTononi(p) => Dynamics::HillTononi(Box::new(HillTononi::new(
                p.clone(),
                ctx,
            )?)),
            ModelParams::HodgkinHuxley(p) => {
                Dynamics::HodgkinHuxley(HodgkinHuxley::new(p.clone(), ctx)?)
            }
            ModelParams::Siegert(p) => Dynamics::Siegert(Siegert::new(p.clone(), ctx)?),
            ModelParams::SpikeSource(p) => {
                Dynamics::SpikeSource(SpikeSource::new(p.clone(), ctx)?)
            }
        })
    }
}

/// Runtime state of a unit
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamics {
    /// LIF with exponential currents
    IafPscExp(IafPscExp),
    /// LIF with alpha currents
    IafPscAlpha(IafPscAlpha),
    /// Conductance-based unit with dynamic threshold
    HillTononi(Box<HillTononi>),
    /// Hodgkin-Huxley with alpha currents
    HodgkinHuxley(HodgkinHuxley),
    /// Siegert rate unit
    Siegert(Siegert),
    /// Scheduled spike source
    SpikeSource(SpikeSource),
}

impl Dynamics {
    /// Model name
    pub fn model_name(&self) -> &'static str {
        match self {
            Dynamics::IafPscExp(_) => "iaf_psc_exp",
            Dynamics::IafPscAlpha(_) => "iaf_psc_alpha",
            Dynamics::HillTononi(_) => "hill_tononi",
            Dynamics::HodgkinHuxley(_) => "hodgkin_huxley",
            Dynamics::Siegert(_) => "siegert",
            Dynamics::SpikeSource(_) => "spike_source",
        }
    }

    /// Names accepted by [`Dynamics::state`]
    pub fn state_names(&self) -> &'static [&'static str] {
        match self {
            Dynamics::IafPscExp(_) => IafPscExp::STATE_NAMES,
            Dynamics::IafPscAlpha(_) => IafPscAlpha::STATE_NAMES,
            Dynamics::HillTononi(_) => HillTononi::STATE_NAMES,
            Dynamics::HodgkinHuxley(_) => HodgkinHuxley::STATE_NAMES,
            Dynamics::Siegert(_) => Siegert::STATE_NAMES,
            Dynamics::SpikeSource(_) => SpikeSource::STATE_NAMES,
        }
    }

    /// Advance one resolution step
    ///
    /// `refractory` is true while the unit's refractory counter runs.
    pub fn integrate(
        &mut self,
        ctx: &SimContext,
        refractory: bool,
    ) -> core::result::Result<(), IntegrationFailure> {
        match self {
            Dynamics::IafPscExp(m) => m.integrate(),
            Dynamics::IafPscAlpha(m) => m.integrate(),
            Dynamics::HillTononi(m) => m.integrate(ctx, refractory)?,
            Dynamics::HodgkinHuxley(m) => m.integrate(ctx)?,
            Dynamics::Siegert(m) => m.integrate(),
            Dynamics::SpikeSource(_) => {}
        }
        Ok(())
    }

    /// True if events on `receptor` can be applied
    pub fn accepts(&self, receptor: Receptor) -> bool {
        match self {
            Dynamics::IafPscExp(_)
            | Dynamics::IafPscAlpha(_)
            | Dynamics::HodgkinHuxley(_)
            | Dynamics::Siegert(_) => receptor == Receptor::Default,
            Dynamics::HillTononi(_) => receptor.conductance_index().is_some(),
            Dynamics::SpikeSource(_) => false,
        }
    }

    /// True if incoming weights must be non-negative
    pub fn requires_non_negative_weights(&self) -> bool {
        matches!(self, Dynamics::HillTononi(_))
    }

    /// True if the unit can emit spikes
    pub fn can_emit(&self) -> bool {
        !matches!(self, Dynamics::Siegert(_))
    }

    /// Apply an arriving event
    pub fn receive(&mut self, receptor: Receptor, weight: f64) {
        match self {
            Dynamics::IafPscExp(m) => m.receive(weight),
            Dynamics::IafPscAlpha(m) => m.receive(weight),
            Dynamics::HillTononi(m) => m.receive(receptor, weight),
            Dynamics::HodgkinHuxley(m) => m.receive(weight),
            Dynamics::Siegert(m) => m.receive(weight),
            Dynamics::SpikeSource(_) => {}
        }
    }

    /// Spike detection rule
    pub fn detector(&self) -> SpikeDetector {
        match self {
            Dynamics::IafPscExp(_) | Dynamics::IafPscAlpha(_) | Dynamics::HillTononi(_) => {
                SpikeDetector::Threshold
            }
            Dynamics::HodgkinHuxley(_) => SpikeDetector::Peak { level: 0.0 },
            Dynamics::SpikeSource(_) => SpikeDetector::Scheduled,
            Dynamics::Siegert(_) => SpikeDetector::Silent,
        }
    }

    /// Refractory period in steps at resolution `h`
    pub fn refractory_steps(&self, h: f64) -> Step {
        let t_ref = match self {
            Dynamics::IafPscExp(m) => m.params().t_ref,
            Dynamics::IafPscAlpha(m) => m.params().t_ref,
            Dynamics::HillTononi(m) => m.params().t_spike,
            Dynamics::HodgkinHuxley(m) => m.params().t_ref,
            Dynamics::Siegert(_) | Dynamics::SpikeSource(_) => 0.0,
        };
        (t_ref / h).round() as Step
    }

    /// Value compared by the detector (mV)
    pub fn membrane(&self) -> f64 {
        match self {
            Dynamics::IafPscExp(m) => m.membrane(),
            Dynamics::IafPscAlpha(m) => m.membrane(),
            Dynamics::HillTononi(m) => m.membrane(),
            Dynamics::HodgkinHuxley(m) => m.membrane(),
            Dynamics::Siegert(_) | Dynamics::SpikeSource(_) => 0.0,
        }
    }

    /// Threshold on the same scale as [`Dynamics::membrane`]
    pub fn threshold(&self) -> f64 {
        match self {
            Dynamics::IafPscExp(m) => m.threshold(),
            Dynamics::IafPscAlpha(m) => m.threshold(),
            Dynamics::HillTononi(m) => m.threshold(),
            _ => f64::INFINITY,
        }
    }

    /// True if a scheduled emission falls on `step`
    pub fn scheduled_at(&mut self, step: Step) -> bool {
        match self {
            Dynamics::SpikeSource(m) => m.fires_at(step),
            _ => false,
        }
    }

    /// Post-spike reset
    pub fn on_spike(&mut self) {
        match self {
            Dynamics::IafPscExp(m) => m.on_spike(),
            Dynamics::IafPscAlpha(m) => m.on_spike(),
            Dynamics::HillTononi(m) => m.on_spike(),
            Dynamics::HodgkinHuxley(_) | Dynamics::Siegert(_) | Dynamics::SpikeSource(_) => {}
        }
    }

    /// Read a named state variable
    pub fn state(&self, name: &str) -> Option<f64> {
        match self {
            Dynamics::IafPscExp(m) => m.state(name),
            Dynamics::IafPscAlpha(m) => m.state(name),
            Dynamics::HillTononi(m) => m.state(name),
            Dynamics::HodgkinHuxley(m) => m.state(name),
            Dynamics::Siegert(m) => m.state(name),
            Dynamics::SpikeSource(_) => None,
        }
    }

    /// Overwrite a named state variable; false if the name is unknown
    pub fn set_state(&mut self, name: &str, value: f64) -> bool {
        match self {
            Dynamics::IafPscExp(m) => m.set_state(name, value),
            Dynamics::IafPscAlpha(m) => m.set_state(name, value),
            Dynamics::HillTononi(m) => m.set_state(name, value),
            Dynamics::HodgkinHuxley(m) => m.set_state(name, value),
            Dynamics::Siegert(m) => m.set_state(name, value),
            Dynamics::SpikeSource(_) => false,
        }
    }

    /// True if the state contains no NaN or infinity
    pub fn is_finite(&self) -> bool {
        match self {
            Dynamics::IafPscExp(m) => m.is_finite(),
            Dynamics::IafPscAlpha(m) => m.is_finite(),
            Dynamics::HillTononi(m) => m.is_finite(),
            Dynamics::HodgkinHuxley(m) => m.is_finite(),
            Dynamics::Siegert(m) => m.is_finite(),
            Dynamics::SpikeSource(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn all_models() -> Vec<ModelParams> {
        vec![
            ModelParams::IafPscExp(Default::default()),
            ModelParams::IafPscAlpha(Default::default()),
            ModelParams::HillTononi(Default::default()),
            ModelParams::HodgkinHuxley(Default::default()),
            ModelParams::Siegert(Default::default()),
            ModelParams::SpikeSource(Default::default()),
        ]
    }

    #[test]
    fn test_names_agree() {
        let ctx = KernelConfig::default().context(0);
        for params in all_models() {
            let dynamics = params.build(&ctx).unwrap();
            assert_eq!(params.name(), dynamics.model_name());
            for name in dynamics.state_names() {
                assert!(dynamics.state(name).is_some(), "{}: {name}", params.name());
            }
        }
    }

    #[test]
    fn test_receptor_pairing() {
        let ctx = KernelConfig::default().context(0);
        let lif = ModelParams::IafPscExp(Default::default()).build(&ctx).unwrap();
        assert!(lif.accepts(Receptor::Default));
        assert!(!lif.accepts(Receptor::Ampa));

        let ht = ModelParams::HillTononi(Default::default()).build(&ctx).unwrap();
        assert!(!ht.accepts(Receptor::Default));
        assert!(ht.accepts(Receptor::GabaB));
        assert!(ht.requires_non_negative_weights());

        let source = ModelParams::SpikeSource(Default::default()).build(&ctx).unwrap();
        assert!(!source.accepts(Receptor::Default));
        assert!(source.can_emit());

        let rate = ModelParams::Siegert(Default::default()).build(&ctx).unwrap();
        assert!(!rate.can_emit());
        assert_eq!(rate.detector(), SpikeDetector::Silent);
    }

    #[test]
    fn test_refractory_steps() {
        let ctx = KernelConfig::default().context(0);
        let lif = ModelParams::IafPscExp(Default::default()).build(&ctx).unwrap();
        assert_eq!(lif.refractory_steps(0.1), 20);
        let ht = ModelParams::HillTononi(Default::default()).build(&ctx).unwrap();
        assert_eq!(ht.refractory_steps(0.1), 20);
    }
}
