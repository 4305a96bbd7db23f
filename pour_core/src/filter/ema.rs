use super::{Filter, Reading, ensure_finite};
use crate::error::PourError;

/// Exponential moving average: `e = alpha * x + (1 - alpha) * e`.
/// The first measurement seeds the estimate.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    estimate: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Result<Self, PourError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(PourError::config(format!(
                "exponential_average: alpha must be in (0.0, 1.0], got {alpha}"
            )));
        }
        Ok(Self {
            alpha,
            estimate: None,
        })
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.estimate {
            None => x,
            Some(e) => self.alpha * x + (1.0 - self.alpha) * e,
        };
        self.estimate = Some(next);
        next
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Filter for Ema {
    fn name(&self) -> &'static str {
        "exponential_average"
    }

    fn step(&mut self, measurement: f64, _dt: f64) -> Result<Reading, PourError> {
        let e = self.update(measurement);
        ensure_finite(self.name(), "estimate", &[e])?;
        Ok(Reading::scalar(e))
    }

    fn reset(&mut self) {
        self.estimate = None;
    }
}
