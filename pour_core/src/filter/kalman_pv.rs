use nalgebra::{Matrix2, RowVector2, Vector2};

use super::model::{initial_covariance, transition_matrix, white_noise_accel};
use super::{Filter, Reading, ensure_finite, validate_vector};
use crate::config::VectorKalmanCfg;
use crate::error::PourError;

/// Linear Kalman filter over `[position, velocity]` with a
/// constant-velocity model and direct position measurements.
#[derive(Debug, Clone)]
pub struct PvKalman {
    cfg: VectorKalmanCfg,
    x: Vector2<f64>,
    p: Matrix2<f64>,
    initialized: bool,
}

impl PvKalman {
    pub fn new(cfg: &VectorKalmanCfg) -> Result<Self, PourError> {
        validate_vector("kalman_pv", cfg)?;
        Ok(Self {
            cfg: *cfg,
            x: Vector2::zeros(),
            p: initial_covariance(cfg.measurement_noise, cfg.initial_velocity_variance),
            initialized: false,
        })
    }

    /// Returns `(position, velocity)` after incorporating `z`.
    pub fn update(&mut self, z: f64, dt: f64) -> Result<(f64, f64), PourError> {
        if !self.initialized {
            self.x = Vector2::new(z, 0.0);
            self.p = initial_covariance(
                self.cfg.measurement_noise,
                self.cfg.initial_velocity_variance,
            );
            self.initialized = true;
            return Ok((z, 0.0));
        }

        let h = RowVector2::new(1.0, 0.0);
        let f = transition_matrix(dt);
        let x_pred = f * self.x;
        let p_pred = f * self.p * f.transpose() + white_noise_accel(self.cfg.process_noise, dt);

        let innovation = z - (h * x_pred)[0];
        let s = (h * p_pred * h.transpose())[0] + self.cfg.measurement_noise;
        if !(s > 0.0) {
            return Err(PourError::unstable(
                "kalman_pv",
                format!("innovation variance {s} is not positive"),
            ));
        }
        let k = p_pred * h.transpose() / s;

        let x = x_pred + k * innovation;
        let p = (Matrix2::identity() - k * h) * p_pred;
        ensure_finite("kalman_pv", "state", x.as_slice())?;
        ensure_finite("kalman_pv", "covariance", p.as_slice())?;

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

impl Filter for PvKalman {
    fn name(&self) -> &'static str {
        "kalman_pv"
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

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(q: f64, r: f64) -> VectorKalmanCfg {
        VectorKalmanCfg {
            process_noise: q,
            measurement_noise: r,
            initial_velocity_variance: 10.0,
        }
    }

    #[test]
    fn seeds_from_first_measurement_with_zero_velocity() {
        let mut k = PvKalman::new(&cfg(1.0, 10.0)).unwrap();
        assert_eq!(k.update(42.0, 0.1).unwrap(), (42.0, 0.0));
        assert_eq!(k.covariance(), Matrix2::new(10.0, 0.0, 0.0, 10.0));
    }

    #[test]
    fn constant_input_keeps_velocity_near_zero() {
        let mut k = PvKalman::new(&cfg(1.0, 10.0)).unwrap();
        let mut last = (0.0, 0.0);
        for _ in 0..200 {
            last = k.update(100.0, 0.1).unwrap();
        }
        assert!((last.0 - 100.0).abs() < 1e-6);
        assert!(last.1.abs() < 1e-6);
    }

    #[test]
    fn ramp_velocity_converges_to_slope() {
        let mut k = PvKalman::new(&cfg(0.0, 1.0)).unwrap();
        let mut vel = 0.0;
        for i in 0..300 {
            let t = i as f64 * 0.1;
            vel = k.update(5.0 * t, 0.1).unwrap().1;
        }
        assert!((vel - 5.0).abs() < 0.05, "velocity {vel}");
    }

    #[test]
    fn covariance_stays_symmetric_positive() {
        let mut k = PvKalman::new(&cfg(1.0, 10.0)).unwrap();
        for i in 0..50 {
            k.update(i as f64, 0.1).unwrap();
        }
        let p = k.covariance();
        assert!((p[(0, 1)] - p[(1, 0)]).abs() < 1e-9);
        assert!(p[(0, 0)] > 0.0 && p[(1, 1)] > 0.0);
    }

    #[test]
    fn infinite_input_is_instability_and_keeps_state() {
        let mut k = PvKalman::new(&cfg(1.0, 10.0)).unwrap();
        k.update(3.0, 0.1).unwrap();
        assert!(k.update(f64::INFINITY, 0.1).is_err());
        assert_eq!(k.state(), Some(Vector2::new(3.0, 0.0)));
    }

    #[test]
    fn reset_reseeds() {
        let mut k = PvKalman::new(&cfg(1.0, 10.0)).unwrap();
        k.update(1.0, 0.1).unwrap();
        k.update(2.0, 0.1).unwrap();
        k.reset();
        assert!(k.state().is_none());
        assert_eq!(k.update(7.0, 0.1).unwrap(), (7.0, 0.0));
    }
}
