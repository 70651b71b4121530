//! Error types for the simulation kernel

use crate::ids::{Step, UnitId};
use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while building or advancing a kernel
///
/// Configuration faults are raised by `build` and prevent the kernel from
/// starting. Numerical and synchronization faults abort `advance`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Invalid kernel or network configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Connection delay outside the representable range
    #[error("Invalid delay {delay} on connection {pre} -> {post} (allowed {min}..={max} steps)")]
    InvalidDelay {
        /// Presynaptic unit
        pre: UnitId,
        /// Postsynaptic unit
        post: UnitId,
        /// Requested delay (steps)
        delay: u64,
        /// Smallest allowed delay (steps)
        min: u64,
        /// Largest allowed delay (steps)
        max: u64,
    },

    /// Receptor not provided by the target's model
    #[error("Unit {unit} ({model}) has no receptor {receptor}")]
    ReceptorMismatch {
        /// Target unit
        unit: UnitId,
        /// Requested receptor
        receptor: String,
        /// Model name of the target
        model: String,
    },

    /// Unit not found
    #[error("Unit {unit} not found")]
    UnitNotFound {
        /// Unit ID that was not found
        unit: UnitId,
    },

    /// Integration produced an unusable state
    #[error("Numerical fault in unit {unit} at step {step}: {reason}")]
    NumericalFault {
        /// Offending unit
        unit: UnitId,
        /// Step being integrated
        step: Step,
        /// What went wrong
        reason: String,
    },

    /// A partition did not complete its spike exchange
    #[error("Synchronization fault in interval {interval} (partition {partition}): {reason}")]
    Synchronization {
        /// Interval number
        interval: u64,
        /// Partition index
        partition: usize,
        /// What went wrong
        reason: String,
    },
}

impl RuntimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a numerical fault
    pub fn numerical_fault(unit: UnitId, step: Step, reason: impl Into<String>) -> Self {
        Self::NumericalFault {
            unit,
            step,
            reason: reason.into(),
        }
    }

    /// Create a synchronization fault
    pub fn synchronization(interval: u64, partition: usize, reason: impl Into<String>) -> Self {
        Self::Synchronization {
            interval,
            partition,
            reason: reason.into(),
        }
    }

    /// True for faults detected before the kernel starts
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Self::NumericalFault { .. } | Self::Synchronization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RuntimeError::invalid_config("no units");
        assert!(matches!(err, RuntimeError::InvalidConfiguration { .. }));
        assert!(err.is_configuration());

        let err = RuntimeError::invalid_parameter("tau_m", "0", "> 0");
        assert!(matches!(err, RuntimeError::InvalidParameter { .. }));

        let err = RuntimeError::numerical_fault(UnitId::new(3), 17, "NaN in V_m");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::UnitNotFound {
            unit: UnitId::new(42),
        };
        assert!(err.to_string().contains("Unit U42 not found"));

        let err = RuntimeError::InvalidDelay {
            pre: UnitId::new(0),
            post: UnitId::new(1),
            delay: 0,
            min: 1,
            max: 200,
        };
        let msg = err.to_string();
        assert!(msg.contains("U0 -> U1"));
        assert!(msg.contains("1..=200"));

        let err = RuntimeError::numerical_fault(UnitId::new(2), 99, "step size underflow");
        assert!(err.to_string().contains("unit U2 at step 99"));
    }
}
