use std::sync::Arc;

use nalgebra::{Matrix2, Vector2};

use super::model::{
    ConstantVelocity, DirectPosition, MeasurementModel, ProcessModel, initial_covariance,
    white_noise_accel,
};
use super::{Filter, Reading, ensure_finite, validate_vector};
use crate::config::VectorKalmanCfg;
use crate::error::PourError;

/// Extended Kalman filter over `[position, velocity]`.
///
/// Models are linearized at the current estimate every step. With the
/// default models the result is identical to [`super::PvKalman`].
#[derive(Clone)]
pub struct ExtendedKalman {
    cfg: VectorKalmanCfg,
    process: Arc<dyn ProcessModel>,
    measurement: Arc<dyn MeasurementModel>,
    x: Vector2<f64>,
    p: Matrix2<f64>,
    initialized: bool,
}

impl std::fmt::Debug for ExtendedKalman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKalman")
            .field("cfg", &self.cfg)
            .field("x", &self.x)
            .field("p", &self.p)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl ExtendedKalman {
    pub fn new(cfg: &VectorKalmanCfg) -> Result<Self, PourError> {
        Self::with_models(cfg, Arc::new(ConstantVelocity), Arc::new(DirectPosition))
    }

    pub fn with_models(
        cfg: &VectorKalmanCfg,
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
    ) -> Result<Self, PourError> {
        validate_vector("ekf", cfg)?;
        Ok(Self {
            cfg: *cfg,
            process,
            measurement,
            x: Vector2::zeros(),
            p: initial_covariance(cfg.measurement_noise, cfg.initial_velocity_variance),
            initialized: false,
        })
    }

    /// Returns `(position, velocity)` after incorporating `z`.
    pub fn update(&mut self, z: f64, dt: f64) -> Result<(f64, f64), PourError> {
        if !self.initialized {
            let pos = self.measurement.initial_position(z);
            ensure_finite("ekf", "initial position", &[pos])?;
            self.x = Vector2::new(pos, 0.0);
            self.p = initial_covariance(
                self.cfg.measurement_noise,
                self.cfg.initial_velocity_variance,
            );
            self.initialized = true;
            return Ok((pos, 0.0));
        }

        let f = self.process.jacobian(&self.x, dt);
        let x_pred = self.process.transition(&self.x, dt);
        let p_pred = f * self.p * f.transpose() + white_noise_accel(self.cfg.process_noise, dt);

        let h = self.measurement.jacobian(&x_pred);
        let innovation = z - self.measurement.measure(&x_pred);
        let s = (h * p_pred * h.transpose())[0] + self.cfg.measurement_noise;
        if !(s > 0.0) {
            return Err(PourError::unstable(
                "ekf",
                format!("innovation variance {s} is not positive"),
            ));
        }
        let k = p_pred * h.transpose() / s;

        let x = x_pred + k * innovation;
        let p = (Matrix2::identity() - k * h) * p_pred;
        ensure_finite("ekf", "state", x.as_slice())?;
        ensure_finite("ekf", "covariance", p.as_slice())?;

        self.x = x;
        self.p = p;
        Ok((x[0], x[1]))
    }

    pub fn state(&self) -> Option<Vector2<f64>> {
        self.initialized.then_some(self.x)
    }

    pub fn covariance(&self) -> Matrix2<f64> {
        self.p
    }
}

impl Filter for ExtendedKalman {
    fn name(&self) -> &'static str {
        "ekf"
    }

    fn step(&mut self, measurement: f64, dt: f64) -> Result<Reading, PourError> {
        let (pos, vel) = self.update(measurement, dt)?;
        Ok(Reading::with_rate(pos, vel))
    }

    fn reset(&mut self) {
        self.x = Vector2::zeros();
        self.p = initial_covariance(self.cfg.measurement_noise, self.cfg.initial_velocity_variance);
        self.initialized = false;
    }
}
