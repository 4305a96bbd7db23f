//! Stateful estimators over the raw weight stream.
//!
//! Every filter owns its belief exclusively and is driven through the
//! [`Filter`] trait by the bank. The concrete types also expose an inherent
//! `update` with their natural signature for direct use and tests.

pub mod ekf;
pub mod ema;
pub mod kalman;
pub mod kalman_pv;
pub mod model;
pub mod moving_average;
pub mod ukf;

pub use ekf::ExtendedKalman;
pub use ema::Ema;
pub use kalman::SimpleKalman;
pub use kalman_pv::PvKalman;
pub use model::{
    ConstantVelocity, DirectPosition, FnMeasurement, FnProcess, MeasurementModel, ProcessModel,
};
pub use moving_average::MovingAverage;
pub use ukf::{SigmaWeights, UnscentedKalman};

use crate::config::VectorKalmanCfg;
use crate::error::PourError;

/// Output of one filter step. Vector filters also report a rate (g/s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub rate: Option<f64>,
}

impl Reading {
    pub fn scalar(value: f64) -> Self {
        Self { value, rate: None }
    }

    pub fn with_rate(value: f64, rate: f64) -> Self {
        Self {
            value,
            rate: Some(rate),
        }
    }
}

/// Shared capability of every estimator in the bank.
pub trait Filter: Send {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Consume one measurement taken `dt` seconds after the previous one.
    /// Scalar filters ignore `dt`.
    ///
    /// An `Err` means the internal state is no longer usable; the caller is
    /// expected to `reset` the filter.
    fn step(&mut self, measurement: f64, dt: f64) -> Result<Reading, PourError>;

    /// Forget all state; the next measurement re-initializes the filter.
    fn reset(&mut self);
}

pub(crate) fn ensure_finite(
    filter: &'static str,
    what: &str,
    values: &[f64],
) -> Result<(), PourError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PourError::unstable(filter, format!("non-finite {what}")))
    }
}

pub(crate) fn validate_noise(
    filter: &str,
    process_noise: f64,
    measurement_noise: f64,
) -> Result<(), PourError> {
    if !(process_noise.is_finite() && process_noise >= 0.0) {
        return Err(PourError::config(format!(
            "{filter}: process_noise must be a finite value >= 0, got {process_noise}"
        )));
    }
    if !(measurement_noise.is_finite() && measurement_noise >= 0.0) {
        return Err(PourError::config(format!(
            "{filter}: measurement_noise must be a finite value >= 0, got {measurement_noise}"
        )));
    }
    if process_noise == 0.0 && measurement_noise == 0.0 {
        return Err(PourError::config(format!(
            "{filter}: process_noise and measurement_noise cannot both be 0"
        )));
    }
    Ok(())
}

pub(crate) fn validate_vector(filter: &str, cfg: &VectorKalmanCfg) -> Result<(), PourError> {
    validate_noise(filter, cfg.process_noise, cfg.measurement_noise)?;
    let v0 = cfg.initial_velocity_variance;
    if !(v0.is_finite() && v0 > 0.0) {
        return Err(PourError::config(format!(
            "{filter}: initial_velocity_variance must be > 0, got {v0}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_validation_rejects_negative_and_double_zero() {
        assert!(validate_noise("k", -0.1, 1.0).is_err());
        assert!(validate_noise("k", 1.0, f64::NAN).is_err());
        assert!(validate_noise("k", 0.0, 0.0).is_err());
        assert!(validate_noise("k", 0.0, 1.0).is_ok());
        assert!(validate_noise("k", 1.0, 0.0).is_ok());
    }

    #[test]
    fn ensure_finite_names_the_filter() {
        let err = ensure_finite("ukf", "state", &[1.0, f64::INFINITY]).unwrap_err();
        assert!(matches!(
            err,
            PourError::NumericInstability { filter: "ukf", .. }
        ));
    }
}
