//! Exact propagators for linear subthreshold dynamics
//!
//! A leaky membrane driven by a filtered synaptic current is a linear ODE
//! system, so the state after one resolution step `h` is an exact linear map
//! of the state before it. This module computes the coefficients of that map
//! ("propagator") for exponential and alpha shaped currents.
//!
//! The coupling coefficients contain a difference of exponentials divided by
//! the difference of the two rates. When the synaptic and membrane time
//! constants coincide the exp form is 0/0, and near coincidence it cancels
//! catastrophically. The alpha coupling is rewritten around a series in the
//! rate difference and stays accurate on its own. [`is_degenerate`] decides
//! which closed form to use; the degenerate forms carry their first-order
//! correction in the rate difference so the two branches agree to second
//! order at the crossover.

use crate::Float;

/// Relative tolerance below which two time constants are treated as equal
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropagatorTolerance(pub Float);

impl PropagatorTolerance {
    /// Create a tolerance, rejecting negative or non-finite values
    pub fn new(relative: Float) -> Option<Self> {
        if relative.is_finite() && relative >= 0.0 {
            Some(Self(relative))
        } else {
            None
        }
    }

    /// Raw relative tolerance
    pub fn relative(&self) -> Float {
        self.0
    }
}

impl Default for PropagatorTolerance {
    fn default() -> Self {
        Self(1e-4)
    }
}

/// True if `a` and `b` differ by less than `rel_tol` relative to the larger one
pub fn is_degenerate(a: Float, b: Float, rel_tol: Float) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() < rel_tol * scale
}

/// Propagator coefficients for an exponentially decaying synaptic current
///
/// State `(I, V)`: `I(t+h) = p11 * I(t)`,
/// `V(t+h) = p22 * V(t) + p21 * I(t) + p20 * I_const`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PscExpCoefficients {
    /// Synaptic current decay
    pub p11: Float,
    /// Membrane decay
    pub p22: Float,
    /// Current-to-voltage coupling
    pub p21: Float,
    /// Constant-input contribution
    pub p20: Float,
    /// Whether the degenerate branch was selected
    pub degenerate: bool,
}

/// Propagator coefficients for an alpha shaped synaptic current
///
/// State `(dI, I, V)`: `dI' = p11 dI`, `I' = p21 dI + p22 I`,
/// `V' = p31 dI + p32 I + p33 V + p30 I_const`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PscAlphaCoefficients {
    /// Decay of the current derivative
    pub p11: Float,
    /// Derivative-to-current coupling
    pub p21: Float,
    /// Current decay
    pub p22: Float,
    /// Derivative-to-voltage coupling
    pub p31: Float,
    /// Current-to-voltage coupling
    pub p32: Float,
    /// Membrane decay
    pub p33: Float,
    /// Constant-input contribution
    pub p30: Float,
    /// Whether the degenerate branch was selected
    pub degenerate: bool,
}

/// Propagator factory for a membrane with fixed `tau_m`, `c_m` and step `h`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Propagator {
    h: Float,
    tau_m: Float,
    c_m: Float,
    tolerance: PropagatorTolerance,
}

impl Propagator {
    /// Create a propagator for step `h` (ms), membrane time constant `tau_m`
    /// (ms) and capacitance `c_m` (pF)
    pub fn new(h: Float, tau_m: Float, c_m: Float, tolerance: PropagatorTolerance) -> Self {
        Self {
            h,
            tau_m,
            c_m,
            tolerance,
        }
    }

    /// Step size (ms)
    pub fn step(&self) -> Float {
        self.h
    }

    /// Membrane decay over one step
    pub fn membrane_decay(&self) -> Float {
        (-self.h / self.tau_m).exp()
    }

    /// Voltage response to a constant unit current held for one step
    pub fn constant_input(&self) -> Float {
        -self.tau_m / self.c_m * (-self.h / self.tau_m).exp_m1()
    }

    /// Coefficients for an exponential current with time constant `tau_syn`
    pub fn exp_psc(&self, tau_syn: Float) -> PscExpCoefficients {
        let degenerate = is_degenerate(tau_syn, self.tau_m, self.tolerance.relative());
        let p21 = if degenerate {
            psc_exp_p21_degenerate(tau_syn, self.tau_m, self.c_m, self.h)
        } else {
            psc_exp_p21_general(tau_syn, self.tau_m, self.c_m, self.h)
        };
        PscExpCoefficients {
            p11: (-self.h / tau_syn).exp(),
            p22: self.membrane_decay(),
            p21,
            p20: self.constant_input(),
            degenerate,
        }
    }

    /// Coefficients for an alpha current with time constant `tau_syn`
    pub fn alpha_psc(&self, tau_syn: Float) -> PscAlphaCoefficients {
        let degenerate = is_degenerate(tau_syn, self.tau_m, self.tolerance.relative());
        let (p31, p32) = if degenerate {
            (
                psc_alpha_p31_degenerate(tau_syn, self.tau_m, self.c_m, self.h),
                psc_exp_p21_degenerate(tau_syn, self.tau_m, self.c_m, self.h),
            )
        } else {
            (
                psc_alpha_p31_general(tau_syn, self.tau_m, self.c_m, self.h),
                psc_exp_p21_general(tau_syn, self.tau_m, self.c_m, self.h),
            )
        };
        let syn_decay = (-self.h / tau_syn).exp();
        PscAlphaCoefficients {
            p11: syn_decay,
            p21: self.h * syn_decay,
            p22: syn_decay,
            p31,
            p32,
            p33: self.membrane_decay(),
            p30: self.constant_input(),
            degenerate,
        }
    }
}

/// Current-to-voltage coupling for distinct time constants
pub fn psc_exp_p21_general(tau_syn: Float, tau_m: Float, c_m: Float, h: Float) -> Float {
    tau_syn * tau_m / (c_m * (tau_m - tau_syn)) * ((-h / tau_m).exp() - (-h / tau_syn).exp())
}

/// Current-to-voltage coupling in the coinciding limit, with its first-order
/// correction in `1/tau_syn - 1/tau_m`
pub fn psc_exp_p21_degenerate(tau_syn: Float, tau_m: Float, c_m: Float, h: Float) -> Float {
    let delta = 1.0 / tau_syn - 1.0 / tau_m;
    h / c_m * (-h / tau_m).exp() * (1.0 - 0.5 * delta * h)
}

/// Derivative-to-voltage coupling of the alpha current for distinct constants
///
/// Written as `h^2 e^{-h/tau_m} g(x) / c_m` with `x = (1/tau_syn - 1/tau_m) h`
/// so that the quadratic cancellation in `1 - (1 + x) e^{-x}` never reaches
/// the result.
pub fn psc_alpha_p31_general(tau_syn: Float, tau_m: Float, c_m: Float, h: Float) -> Float {
    let x = (1.0 / tau_syn - 1.0 / tau_m) * h;
    h * h / c_m * (-h / tau_m).exp() * alpha_coupling_shape(x)
}

/// `g(x) = (1 - (1 + x) e^{-x}) / x^2`, with `g(0) = 1/2`
fn alpha_coupling_shape(x: Float) -> Float {
    if x.abs() >= 0.5 {
        return (-(-x).exp_m1() - x * (-x).exp()) / (x * x);
    }
    // sum_{k>=2} (-1)^k (k-1) x^(k-2) / k!
    let mut power = 1.0;
    let mut factorial = 2.0;
    let mut sum = 0.5;
    for k in 3..32 {
        power *= -x;
        factorial *= k as Float;
        let term = (k - 1) as Float * power / factorial;
        sum += term;
        if term.abs() <= Float::EPSILON * sum.abs() {
            break;
        }
    }
    sum
}

/// Derivative-to-voltage coupling of the alpha current in the coinciding
/// limit, with its first-order correction
pub fn psc_alpha_p31_degenerate(tau_syn: Float, tau_m: Float, c_m: Float, h: Float) -> Float {
    let d = 1.0 / tau_syn - 1.0 / tau_m;
    h * h / (2.0 * c_m) * (-h / tau_m).exp() * (1.0 - 2.0 * d * h / 3.0)
}

/// Factor that scales a double-exponential kernel to unit peak
///
/// The kernel is the solution of `dg' = -dg/tau_rise`, `g' = dg - g/tau_decay`
/// started from `dg = 1, g = 0`. Adding `g_peak * factor` to `dg` makes the
/// resulting conductance peak at exactly `g_peak`. Coinciding constants reduce
/// to the alpha function, whose factor is `e / tau`.
pub fn beta_normalization(tau_rise: Float, tau_decay: Float, rel_tol: Float) -> Float {
    if is_degenerate(tau_rise, tau_decay, rel_tol) {
        // symmetric in the two constants, so the midpoint has no first-order error
        let tau = 0.5 * (tau_rise + tau_decay);
        return core::f64::consts::E / tau;
    }
    let t_peak = tau_decay * tau_rise * (tau_decay / tau_rise).ln() / (tau_decay - tau_rise);
    (1.0 / tau_rise - 1.0 / tau_decay) / ((-t_peak / tau_decay).exp() - (-t_peak / tau_rise).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel_diff(a: Float, b: Float) -> Float {
        (a - b).abs() / a.abs().max(b.abs())
    }

    #[test]
    fn test_degeneracy_rule() {
        assert!(is_degenerate(10.0, 10.0, 1e-4));
        assert!(is_degenerate(10.0, 10.0005, 1e-4));
        assert!(!is_degenerate(10.0, 10.01, 1e-4));
        assert!(!is_degenerate(2.0, 10.0, 0.0));
    }

    #[test]
    fn test_exp_psc_branches_agree_near_crossover() {
        let h = 0.1;
        for eps in [1e-3, 1e-4, 1e-5, 1e-6] {
            let tau_m = 10.0;
            let tau_s = tau_m * (1.0 + eps);
            let general = psc_exp_p21_general(tau_s, tau_m, 250.0, h);
            let degenerate = psc_exp_p21_degenerate(tau_s, tau_m, 250.0, h);
            assert!(rel_diff(general, degenerate) < 1e-6, "eps={eps}");
        }
    }

    #[test]
    fn test_alpha_psc_branches_agree_near_crossover() {
        let h = 0.1;
        for eps in [5e-2, 1e-2, 1e-3, 5e-4, 2e-4, 1.5e-4, 1e-5, 1e-7] {
            let tau_m = 10.0;
            let tau_s = tau_m * (1.0 - eps);
            let general = psc_alpha_p31_general(tau_s, tau_m, 250.0, h);
            let degenerate = psc_alpha_p31_degenerate(tau_s, tau_m, 250.0, h);
            assert!(rel_diff(general, degenerate) < 1e-6, "eps={eps}");
        }
    }

    #[test]
    fn test_alpha_coupling_shape_is_continuous() {
        assert_eq!(alpha_coupling_shape(0.0), 0.5);
        // both sides of the series cutoff
        for x in [0.5, -0.5] {
            let below = alpha_coupling_shape(x * (1.0 - 1e-12));
            let above = alpha_coupling_shape(x);
            assert!(rel_diff(below, above) < 1e-11, "x={x}");
        }
        let x: Float = 2.0;
        let direct = (1.0 - (1.0 + x) * (-x).exp()) / (x * x);
        assert!(rel_diff(alpha_coupling_shape(x), direct) < 1e-14);
    }

    #[test]
    fn test_alpha_p31_general_just_outside_tolerance() {
        let (tau_m, c_m, h) = (10.0, 250.0, 0.1);
        let propagator = Propagator::new(h, tau_m, c_m, PropagatorTolerance::default());
        let tau_s = tau_m * (1.0 - 1.5e-4);
        let coefficients = propagator.alpha_psc(tau_s);
        assert!(!coefficients.degenerate);
        let limit = psc_alpha_p31_degenerate(tau_s, tau_m, c_m, h);
        assert!(rel_diff(coefficients.p31, limit) < 1e-9);
    }

    #[test]
    fn test_exp_psc_selects_branch() {
        let prop = Propagator::new(0.1, 10.0, 250.0, PropagatorTolerance::default());
        assert!(prop.exp_psc(10.0).degenerate);
        assert!(!prop.exp_psc(2.0).degenerate);
        let c = prop.exp_psc(10.0);
        assert!(c.p21.is_finite() && c.p21 > 0.0);
    }

    #[test]
    fn test_constant_input_matches_closed_form() {
        let prop = Propagator::new(0.1, 10.0, 250.0, PropagatorTolerance::default());
        let expected = 10.0 / 250.0 * (1.0 - (-0.01f64).exp());
        assert!(rel_diff(prop.constant_input(), expected) < 1e-12);
    }

    #[test]
    fn test_beta_normalization_peaks_at_one() {
        let (tau_r, tau_d) = (0.5, 2.4);
        let norm = beta_normalization(tau_r, tau_d, 1e-6);
        let t_peak = tau_d * tau_r * (tau_d / tau_r).ln() / (tau_d - tau_r);
        let g = norm * ((-t_peak / tau_d).exp() - (-t_peak / tau_r).exp())
            / (1.0 / tau_r - 1.0 / tau_d);
        assert!((g - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_beta_normalization_alpha_limit() {
        let near = beta_normalization(2.0, 2.002, 1e-6);
        assert!(rel_diff(near, core::f64::consts::E / 2.001) < 1e-6);
        let exact = beta_normalization(2.0, 2.0, 1e-6);
        assert!(rel_diff(exact, core::f64::consts::E / 2.0) < 1e-15);
    }
}
