use super::{Filter, Reading, ensure_finite, validate_noise};
use crate::config::NoiseCfg;
use crate::error::PourError;

/// One-dimensional Kalman filter with a random-walk model.
///
/// Predict: `P += Q`. Correct: `K = P / (P + R)`, `x += K (z - x)`,
/// `P *= 1 - K`. The first measurement seeds `x` with `P = 1`.
#[derive(Debug, Clone)]
pub struct SimpleKalman {
    q: f64,
    r: f64,
    estimate: f64,
    error_estimate: f64,
    initialized: bool,
}

impl SimpleKalman {
    const INITIAL_ERROR: f64 = 1.0;

    pub fn new(cfg: &NoiseCfg) -> Result<Self, PourError> {
        validate_noise("kalman_simple", cfg.process_noise, cfg.measurement_noise)?;
        Ok(Self {
            q: cfg.process_noise,
            r: cfg.measurement_noise,
            estimate: 0.0,
            error_estimate: Self::INITIAL_ERROR,
            initialized: false,
        })
    }

    pub fn update(&mut self, z: f64) -> f64 {
        if !self.initialized {
            self.estimate = z;
            self.error_estimate = Self::INITIAL_ERROR;
            self.initialized = true;
            return z;
        }
        let predicted_error = self.error_estimate + self.q;
        let gain = predicted_error / (predicted_error + self.r);
        self.estimate += gain * (z - self.estimate);
        self.error_estimate = (1.0 - gain) * predicted_error;
        self.estimate
    }

    pub fn estimate(&self) -> Option<f64> {
        self.initialized.then_some(self.estimate)
    }

    pub fn error_estimate(&self) -> f64 {
        self.error_estimate
    }
}

impl Filter for SimpleKalman {
    fn name(&self) -> &'static str {
        "kalman_simple"
    }

    fn step(&mut self, measurement: f64, _dt: f64) -> Result<Reading, PourError> {
        let x = self.update(measurement);
        ensure_finite(self.name(), "state", &[x, self.error_estimate])?;
        Ok(Reading::scalar(x))
    }

    fn reset(&mut self) {
        self.estimate = 0.0;
        self.error_estimate = Self::INITIAL_ERROR;
        self.initialized = false;
    }
}
