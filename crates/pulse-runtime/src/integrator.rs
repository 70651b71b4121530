//! Adaptive Runge-Kutta-Fehlberg 4(5) stepping for nonlinear unit models
//!
//! Only the models that have no closed-form propagator use this. Each unit
//! owns one [`Rkf45`] so the internal step size carries over between
//! resolution steps.

use crate::config::NumericTolerances;
use core::fmt;

/// Right-hand side of an autonomous ODE system with `N` state variables
///
/// Inputs that change only at step boundaries (constant currents, event
/// kicks) are captured by the implementor, not passed as time.
pub trait OdeSystem<const N: usize> {
    /// Evaluate `dy/dt` at `y`
    fn derivatives(&self, y: &[f64; N], dydt: &mut [f64; N]);
}

/// Why an adaptive step was abandoned
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntegrationFailure {
    /// Substep budget exhausted before reaching the end of the step
    TooManySubsteps {
        /// Budget that was exhausted
        limit: u32,
    },
    /// Proposed substep fell below what the step can resolve
    StepUnderflow {
        /// Last proposed substep (ms)
        h: f64,
    },
    /// The right-hand side produced NaN or infinity
    NonFinite,
}

impl fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManySubsteps { limit } => write!(f, "no convergence within {limit} substeps"),
            Self::StepUnderflow { h } => write!(f, "substep underflow (h = {h:e} ms)"),
            Self::NonFinite => f.write_str("non-finite derivative"),
        }
    }
}

const A2: [f64; 1] = [1.0 / 4.0];
const A3: [f64; 2] = [3.0 / 32.0, 9.0 / 32.0];
const A4: [f64; 3] = [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0];
const A5: [f64; 4] = [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0];
const A6: [f64; 5] = [
    -8.0 / 27.0,
    2.0,
    -3544.0 / 2565.0,
    1859.0 / 4104.0,
    -11.0 / 40.0,
];
const TABLEAU: [&[f64]; 5] = [&A2, &A3, &A4, &A5, &A6];
const B4: [f64; 6] = [
    25.0 / 216.0,
    0.0,
    1408.0 / 2565.0,
    2197.0 / 4104.0,
    -1.0 / 5.0,
    0.0,
];
const B5: [f64; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];

const SAFETY: f64 = 0.9;
const MIN_SHRINK: f64 = 0.2;
const MAX_GROWTH: f64 = 5.0;

/// Embedded RKF45 stepper with a persistent step-size estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rkf45 {
    h_try: f64,
}

impl Rkf45 {
    /// Start with the full resolution step as first guess
    pub fn new(resolution_ms: f64) -> Self {
        Self {
            h_try: resolution_ms,
        }
    }

    /// Current internal step estimate (ms)
    pub fn step_estimate(&self) -> f64 {
        self.h_try
    }

    /// Forget the step estimate
    pub fn reset(&mut self, resolution_ms: f64) {
        self.h_try = resolution_ms;
    }

    /// Advance `y` by `span` ms. Returns the number of accepted substeps.
    ///
    /// On failure `y` is left at the last accepted substep.
    pub fn advance<S, const N: usize>(
        &mut self,
        system: &S,
        y: &mut [f64; N],
        span: f64,
        tol: &NumericTolerances,
    ) -> Result<u32, IntegrationFailure>
    where
        S: OdeSystem<N>,
    {
        let mut t = 0.0;
        let mut h = self.h_try.min(span);
        let mut accepted = 0u32;
        let mut attempts = 0u32;
        let min_h = span * 1e-12;

        let mut k = [[0.0; N]; 6];
        let mut tmp = [0.0; N];

        while t < span {
            if attempts >= tol.ode_max_substeps {
                return Err(IntegrationFailure::TooManySubsteps {
                    limit: tol.ode_max_substeps,
                });
            }
            attempts += 1;
            // the final substep is clipped to the remaining span; `h` keeps
            // the nominal size for the next resolution step
            let last = t + h >= span;
            let step = if last { span - t } else { h };

            system.derivatives(y, &mut k[0]);
            for (s, a) in TABLEAU.iter().enumerate() {
                for i in 0..N {
                    let mut acc = 0.0;
                    for (j, aj) in a.iter().enumerate() {
                        acc += aj * k[j][i];
                    }
                    tmp[i] = y[i] + step * acc;
                }
                system.derivatives(&tmp, &mut k[s + 1]);
            }

            let mut err: f64 = 0.0;
            let mut y5 = [0.0; N];
            for i in 0..N {
                let mut s4 = 0.0;
                let mut s5 = 0.0;
                for (j, kj) in k.iter().enumerate() {
                    s4 += B4[j] * kj[i];
                    s5 += B5[j] * kj[i];
                }
                y5[i] = y[i] + step * s5;
                let scale = tol.ode_abs + tol.ode_rel * y[i].abs().max(y5[i].abs());
                err = err.max((step * (s5 - s4)).abs() / scale);
            }
            if !err.is_finite() || y5.iter().any(|v| !v.is_finite()) {
                // a large step can overflow where a smaller one would not
                if step <= min_h {
                    return Err(IntegrationFailure::NonFinite);
                }
                h = step * MIN_SHRINK;
                continue;
            }

            if err <= 1.0 {
                *y = y5;
                t = if last { span } else { t + step };
                accepted += 1;
                if !last {
                    let growth = if err == 0.0 {
                        MAX_GROWTH
                    } else {
                        (SAFETY * err.powf(-0.2)).clamp(MIN_SHRINK, MAX_GROWTH)
                    };
                    h = step * growth;
                }
            } else {
                h = step * (SAFETY * err.powf(-0.25)).clamp(MIN_SHRINK, 1.0);
                if h < min_h {
                    return Err(IntegrationFailure::StepUnderflow { h });
                }
            }
        }
        self.h_try = h.min(span);
        Ok(accepted)
    }

    /// Advance `y` by `span` ms, retrying once with tightened tolerances
    ///
    /// The retry restarts from the original state with a fresh step estimate.
    pub fn advance_with_retry<S, const N: usize>(
        &mut self,
        system: &S,
        y: &mut [f64; N],
        span: f64,
        tol: &NumericTolerances,
    ) -> Result<u32, IntegrationFailure>
    where
        S: OdeSystem<N>,
    {
        let start = *y;
        match self.advance(system, y, span, tol) {
            Ok(n) => Ok(n),
            Err(first) => {
                log::debug!("adaptive step failed ({first}), retrying with tightened tolerance");
                *y = start;
                self.reset(span);
                self.advance(system, y, span, &tol.tightened())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay(f64);

    impl OdeSystem<1> for Decay {
        fn derivatives(&self, y: &[f64; 1], dydt: &mut [f64; 1]) {
            dydt[0] = -y[0] / self.0;
        }
    }

    struct Oscillator;

    impl OdeSystem<2> for Oscillator {
        fn derivatives(&self, y: &[f64; 2], dydt: &mut [f64; 2]) {
            dydt[0] = y[1];
            dydt[1] = -y[0];
        }
    }

    struct Blowup;

    impl OdeSystem<1> for Blowup {
        fn derivatives(&self, y: &[f64; 1], dydt: &mut [f64; 1]) {
            dydt[0] = if y[0] > 10.0 { f64::NAN } else { 1e6 * y[0] };
        }
    }

    #[test]
    fn test_exponential_decay() {
        let tol = NumericTolerances::default();
        let mut solver = Rkf45::new(0.1);
        let mut y = [1.0];
        for _ in 0..100 {
            solver.advance(&Decay(10.0), &mut y, 0.1, &tol).unwrap();
        }
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_oscillator_energy() {
        let tol = NumericTolerances {
            ode_abs: 1e-10,
            ode_rel: 1e-10,
            ..Default::default()
        };
        let mut solver = Rkf45::new(0.5);
        let mut y = [1.0, 0.0];
        let steps = 20;
        for _ in 0..steps {
            solver.advance(&Oscillator, &mut y, 0.5, &tol).unwrap();
        }
        let t = 0.5 * steps as f64;
        assert!((y[0] - t.cos()).abs() < 1e-7);
        assert!((y[1] + t.sin()).abs() < 1e-7);
    }

    #[test]
    fn test_substep_budget_exhausted() {
        let tol = NumericTolerances {
            ode_max_substeps: 3,
            ..Default::default()
        };
        let mut solver = Rkf45::new(1.0);
        let mut y = [1.0];
        let err = solver.advance(&Decay(1e-4), &mut y, 1.0, &tol).unwrap_err();
        assert_eq!(err, IntegrationFailure::TooManySubsteps { limit: 3 });
    }

    #[test]
    fn test_retry_then_fail() {
        let tol = NumericTolerances {
            ode_max_substeps: 50,
            ..Default::default()
        };
        let mut solver = Rkf45::new(1.0);
        let mut y = [1.0];
        let result = solver.advance_with_retry(&Blowup, &mut y, 1.0, &tol);
        assert!(result.is_err());
    }

    #[test]
    fn test_step_estimate_persists() {
        let tol = NumericTolerances::default();
        let mut solver = Rkf45::new(0.1);
        let mut y = [1.0];
        solver.advance(&Decay(0.01), &mut y, 0.1, &tol).unwrap();
        assert!(solver.step_estimate() <= 0.1);
        assert!(y[0] > 0.0 && y[0] < 1e-3);
    }
}
