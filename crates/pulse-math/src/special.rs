//! Numerically stable special functions
//!
//! Rate transfer functions of noisy integrate-and-fire units involve
//! `exp(u^2) * (1 + erf(u))`. For negative `u` the error-function factor
//! cancels to zero while the exponential overflows, so the product is never
//! evaluated directly: it is the scaled complementary error function
//! [`erfcx`] at `-u`, which stays bounded where it is bounded, and its
//! unbounded part is integrated in closed form through Dawson's integral.

use crate::constants::{ALPHA_SHIFT, FRAC_1_SQRT_PI, SQRT_PI};
use crate::Float;

/// Scaled complementary error function `exp(x^2) * erfc(x)`
///
/// Finite for every `x > -26.6`; `+inf` below, where the true value
/// overflows.
pub fn erfcx(x: Float) -> Float {
    if x < 0.0 {
        if x < -26.0 {
            return Float::INFINITY;
        }
        return 2.0 * (x * x).exp() - erfcx(-x);
    }
    if x < 10.0 {
        return (x * x).exp() * libm::erfc(x);
    }
    // Laplace continued fraction, evaluated backwards
    let mut t = x;
    for k in (1..=60).rev() {
        t = x + (k as Float * 0.5) / t;
    }
    FRAC_1_SQRT_PI / t
}

const DAWSON_H: Float = 0.2;
const DAWSON_TERMS: usize = 16;

/// Dawson's integral `exp(-x^2) * integral_0^x exp(t^2) dt`
///
/// Power series near the origin, Rybicki's exponentially convergent sampling
/// formula elsewhere.
pub fn dawson(x: Float) -> Float {
    let xx = x.abs();
    if xx < 0.5 {
        let x2 = x * x;
        let mut term = x;
        let mut sum = x;
        for n in 1..40 {
            term *= -2.0 * x2 / (2 * n + 1) as Float;
            sum += term;
            if term.abs() < 1e-17 * sum.abs() {
                break;
            }
        }
        return sum;
    }

    let n0 = 2.0 * (0.5 * xx / DAWSON_H).round();
    let xp = xx - n0 * DAWSON_H;
    let mut e1 = (2.0 * xp * DAWSON_H).exp();
    let e2 = e1 * e1;
    let mut d1 = n0 + 1.0;
    let mut d2 = d1 - 2.0;
    let mut sum = 0.0;
    for i in 0..DAWSON_TERMS {
        let c = {
            let a = (2 * i + 1) as Float * DAWSON_H;
            (-a * a).exp()
        };
        sum += c * (e1 / d1 + 1.0 / (d2 * e1));
        d1 += 2.0;
        d2 -= 2.0;
        e1 *= e2;
    }
    FRAC_1_SQRT_PI * x.signum() * (-xp * xp).exp() * sum
}

// 8-point Gauss-Legendre, symmetric half
const GL_NODES: [Float; 4] = [
    0.183_434_642_495_649_8,
    0.525_532_409_916_329_0,
    0.796_666_477_413_626_7,
    0.960_289_856_497_536_3,
];
const GL_WEIGHTS: [Float; 4] = [
    0.362_683_783_378_362_0,
    0.313_706_645_877_887_3,
    0.222_381_034_453_374_5,
    0.101_228_536_290_376_3,
];

fn gauss_legendre<F: Fn(Float) -> Float>(f: F, a: Float, b: Float, panel_width: Float) -> Float {
    if b <= a {
        return 0.0;
    }
    let panels = ((b - a) / panel_width).ceil().clamp(1.0, 400.0) as usize;
    let h = (b - a) / panels as Float;
    let r = 0.5 * h;
    let mut sum = 0.0;
    for p in 0..panels {
        let mid = a + (p as Float + 0.5) * h;
        for (x, w) in GL_NODES.iter().zip(GL_WEIGHTS.iter()) {
            sum += w * (f(mid - r * x) + f(mid + r * x)) * r;
        }
    }
    sum
}

/// Area under `erfcx` on `[lo, hi]`, for `0 <= lo <= hi`
///
/// Beyond `u = 1` the integrand behaves like `1/(u sqrt(pi))`; that part is
/// integrated in `ln u` so arbitrarily long ranges (the deterministic limit)
/// stay well resolved.
pub fn erfcx_area(lo: Float, hi: Float) -> Float {
    debug_assert!(lo >= 0.0, "erfcx_area expects non-negative bounds");
    if hi <= lo {
        return 0.0;
    }
    let mut area = 0.0;
    if lo < 1.0 {
        area += gauss_legendre(erfcx, lo, hi.min(1.0), 0.25);
    }
    if hi > 1.0 {
        let a = lo.max(1.0).ln();
        let b = hi.ln();
        area += gauss_legendre(
            |s| {
                let u = s.exp();
                erfcx(u) * u
            },
            a,
            b,
            0.25,
        );
    }
    area
}

/// Parameters of the leaky integrate-and-fire unit whose rate is evaluated
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiegertParams {
    /// Membrane time constant (ms)
    pub tau_m: Float,
    /// Synaptic time constant for the colored-noise threshold shift (ms)
    pub tau_syn: Float,
    /// Refractory period (ms)
    pub t_ref: Float,
    /// Threshold relative to rest (mV)
    pub theta: Float,
    /// Reset relative to rest (mV)
    pub v_reset: Float,
}

impl Default for SiegertParams {
    fn default() -> Self {
        Self {
            tau_m: 10.0,
            tau_syn: 0.0,
            t_ref: 2.0,
            theta: 15.0,
            v_reset: 0.0,
        }
    }
}

/// Stationary firing rate (Hz) of an LIF unit with mean input `mu` and noise
/// amplitude `sigma` (both mV)
///
/// The first-passage integral is split by the sign of the integration bounds
/// so that no evaluated exponential has a positive argument. With
/// `sigma == 0` the deterministic rate is returned, and the noisy branches
/// converge to it as `sigma` shrinks.
pub fn siegert_rate(params: &SiegertParams, mu: Float, sigma: Float) -> Float {
    let SiegertParams {
        tau_m,
        tau_syn,
        t_ref,
        theta,
        v_reset,
    } = *params;

    if sigma <= 0.0 {
        if mu <= theta {
            return 0.0;
        }
        return 1e3 / (t_ref + tau_m * ((mu - v_reset) / (mu - theta)).ln());
    }

    let shift = 0.5 * sigma * ALPHA_SHIFT * (tau_syn / tau_m).sqrt();
    let y_th = (theta + shift - mu) / sigma;
    let y_r = (v_reset + shift - mu) / sigma;

    if y_th <= 0.0 {
        // both bounds negative: integrand bounded everywhere
        let integral = erfcx_area(-y_th, -y_r);
        return 1e3 / (t_ref + tau_m * SQRT_PI * integral);
    }

    // factor exp(y_th^2) out of numerator and denominator
    let scale = (-y_th * y_th).exp();
    let denominator = if y_r >= 0.0 {
        t_ref * scale
            + tau_m
                * SQRT_PI
                * (2.0 * dawson(y_th)
                    - 2.0 * (y_r * y_r - y_th * y_th).exp() * dawson(y_r)
                    - scale * erfcx_area(y_r, y_th))
    } else {
        scale * (t_ref + tau_m * SQRT_PI * (erfcx_area(0.0, -y_r) - erfcx_area(0.0, y_th)))
            + 2.0 * tau_m * SQRT_PI * dawson(y_th)
    };
    1e3 * scale / denominator
}
