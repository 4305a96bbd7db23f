//! Unscented Kalman filter with scaled (Merwe) sigma points.

use std::sync::Arc;

use nalgebra::{Matrix2, Vector2};

use super::model::{
    ConstantVelocity, DirectPosition, MeasurementModel, ProcessModel, initial_covariance,
    white_noise_accel,
};
use super::{Filter, Reading, ensure_finite, validate_vector};
use crate::config::UkfCfg;
use crate::error::PourError;

const N: f64 = 2.0;
const POINTS: usize = 5;
/// Eigenvalue floor used when repairing a covariance that lost
/// positive-definiteness to round-off.
const MIN_EIGENVALUE: f64 = 1e-9;

/// Mean and covariance weights for the `2n + 1` sigma points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaWeights {
    pub mean: [f64; POINTS],
    pub cov: [f64; POINTS],
    /// `n + lambda`, the spread scale.
    pub scale: f64,
}

impl SigmaWeights {
    pub fn merwe(alpha: f64, beta: f64, kappa: f64) -> Result<Self, PourError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(PourError::config(format!(
                "ukf: alpha must be in (0.0, 1.0], got {alpha}"
            )));
        }
        if !(beta.is_finite() && beta >= 0.0) {
            return Err(PourError::config(format!("ukf: beta must be >= 0, got {beta}")));
        }
        if !kappa.is_finite() {
            return Err(PourError::config("ukf: kappa must be finite"));
        }
        let scale = alpha * alpha * (N + kappa);
        if !(scale > 0.0) {
            return Err(PourError::config(format!(
                "ukf: alpha^2 * (2 + kappa) must be > 0, got {scale}"
            )));
        }
        let lambda = scale - N;
        let w = 1.0 / (2.0 * scale);
        let mut mean = [w; POINTS];
        let mut cov = [w; POINTS];
        mean[0] = lambda / scale;
        cov[0] = lambda / scale + (1.0 - alpha * alpha + beta);
        Ok(Self { mean, cov, scale })
    }
}

/// Lower-triangular `L` with `L Lᵀ ≈ cov`.
///
/// Tries Cholesky on the symmetrized matrix first. If that fails the
/// eigenvalues are clamped to a small positive floor and the matrix is
/// recomposed before a second attempt.
pub fn guarded_sqrt(cov: &Matrix2<f64>) -> Result<Matrix2<f64>, PourError> {
    ensure_finite("ukf", "covariance", cov.as_slice())?;
    let sym = (cov + cov.transpose()) * 0.5;
    if let Some(chol) = sym.cholesky() {
        return Ok(chol.l());
    }

    let eig = sym.symmetric_eigen();
    let floor = MIN_EIGENVALUE.max(eig.eigenvalues.amax() * 1e-12);
    let clamped = eig.eigenvalues.map(|l| l.max(floor));
    let repaired =
        eig.eigenvectors * Matrix2::from_diagonal(&clamped) * eig.eigenvectors.transpose();
    let repaired = (repaired + repaired.transpose()) * 0.5;
    tracing::debug!(
        eigenvalues = ?eig.eigenvalues.as_slice(),
        "ukf covariance not positive definite; clamped eigenvalues"
    );
    repaired
        .cholesky()
        .map(|c| c.l())
        .ok_or_else(|| PourError::unstable("ukf", "covariance square root failed after repair"))
}

/// `[x, x + sqrt(c) L_i, x - sqrt(c) L_i]` for the columns of `L`.
pub fn sigma_points(
    mean: &Vector2<f64>,
    cov: &Matrix2<f64>,
    weights: &SigmaWeights,
) -> Result<[Vector2<f64>; POINTS], PourError> {
    let spread = guarded_sqrt(cov)? * weights.scale.sqrt();
    let c0 = spread.column(0).into_owned();
    let c1 = spread.column(1).into_owned();
    Ok([mean.clone_owned(), mean + c0, mean + c1, mean - c0, mean - c1])
}

/// Weighted mean and covariance of a sigma-point set.
pub fn reconstruct(
    points: &[Vector2<f64>; POINTS],
    weights: &SigmaWeights,
) -> (Vector2<f64>, Matrix2<f64>) {
    let mean = points
        .iter()
        .zip(weights.mean)
        .fold(Vector2::zeros(), |acc, (p, w)| acc + p * w);
    let cov = points
        .iter()
        .zip(weights.cov)
        .fold(Matrix2::zeros(), |acc, (p, w)| {
            let d = p - mean;
            acc + d * d.transpose() * w
        });
    (mean, cov)
}

#[derive(Clone)]
pub struct UnscentedKalman {
    cfg: UkfCfg,
    weights: SigmaWeights,
    process: Arc<dyn ProcessModel>,
    measurement: Arc<dyn MeasurementModel>,
    x: Vector2<f64>,
    p: Matrix2<f64>,
    initialized: bool,
}

impl std::fmt::Debug for UnscentedKalman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnscentedKalman")
            .field("cfg", &self.cfg)
            .field("x", &self.x)
            .field("p", &self.p)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl UnscentedKalman {
    pub fn new(cfg: &UkfCfg) -> Result<Self, PourError> {
        Self::with_models(cfg, Arc::new(ConstantVelocity), Arc::new(DirectPosition))
    }

    pub fn with_models(
        cfg: &UkfCfg,
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
    ) -> Result<Self, PourError> {
        validate_vector("ukf", &cfg.noise)?;
        let weights = SigmaWeights::merwe(cfg.alpha, cfg.beta, cfg.kappa)?;
        Ok(Self {
            cfg: *cfg,
            weights,
            process,
            measurement,
            x: Vector2::zeros(),
            p: Self::seed_covariance(cfg),
            initialized: false,
        })
    }

    fn seed_covariance(cfg: &UkfCfg) -> Matrix2<f64> {
        initial_covariance(cfg.noise.measurement_noise, cfg.noise.initial_velocity_variance)
    }

    /// Returns `(position, velocity)` after incorporating `z`.
    pub fn update(&mut self, z: f64, dt: f64) -> Result<(f64, f64), PourError> {
        if !self.initialized {
            let pos = self.measurement.initial_position(z);
            ensure_finite("ukf", "initial position", &[pos])?;
            self.x = Vector2::new(pos, 0.0);
            self.p = Self::seed_covariance(&self.cfg);
            self.initialized = true;
            return Ok((pos, 0.0));
        }

        let prior = sigma_points(&self.x, &self.p, &self.weights)?;
        let propagated = prior.map(|s| self.process.transition(&s, dt));
        let (x_pred, p_pred) = reconstruct(&propagated, &self.weights);
        let p_pred = p_pred + white_noise_accel(self.cfg.noise.process_noise, dt);

        // Redraw around the predicted belief so the added process noise is
        // reflected in the measurement spread.
        let sigmas = sigma_points(&x_pred, &p_pred, &self.weights)?;
        let zs = sigmas.map(|s| self.measurement.measure(&s));
        let z_pred: f64 = zs.iter().zip(self.weights.mean).map(|(z, w)| z * w).sum();

        let mut s = self.cfg.noise.measurement_noise;
        let mut cross = Vector2::zeros();
        for i in 0..POINTS {
            let dz = zs[i] - z_pred;
            s += self.weights.cov[i] * dz * dz;
            cross += (sigmas[i] - x_pred) * (self.weights.cov[i] * dz);
        }
        if !(s > 0.0) {
            return Err(PourError::unstable(
                "ukf",
                format!("innovation variance {s} is not positive"),
            ));
        }

        let k = cross / s;
        let x = x_pred + k * (z - z_pred);
        let p = p_pred - k * k.transpose() * s;
        let p = (p + p.transpose()) * 0.5;
        ensure_finite("ukf", "state", x.as_slice())?;
        ensure_finite("ukf", "covariance", p.as_slice())?;

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

    pub fn weights(&self) -> &SigmaWeights {
        &self.weights
    }
}

impl Filter for UnscentedKalman {
    fn name(&self) -> &'static str {
        "ukf"
    }

    fn step(&mut self, measurement: f64, dt: f64) -> Result<Reading, PourError> {
        let (pos, vel) = self.update(measurement, dt)?;
        Ok(Reading::with_rate(pos, vel))
    }

    fn reset(&mut self) {
        self.x = Vector2::zeros();
        self.p = Self::seed_covariance(&self.cfg);
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorKalmanCfg;
    use crate::filter::PvKalman;
    use rstest::rstest;

    fn cfg() -> UkfCfg {
        UkfCfg {
            noise: VectorKalmanCfg {
                process_noise: 1.0,
                measurement_noise: 10.0,
                initial_velocity_variance: 10.0,
            },
            alpha: 1.0,
            beta: 2.0,
            kappa: 1.0,
        }
    }

    #[rstest]
    #[case(1.0, 2.0, 1.0)]
    #[case(0.5, 2.0, 0.0)]
    #[case(1e-3, 2.0, 0.0)]
    fn mean_weights_sum_to_one(#[case] alpha: f64, #[case] beta: f64, #[case] kappa: f64) {
        let w = SigmaWeights::merwe(alpha, beta, kappa).unwrap();
        let sum: f64 = w.mean.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(0.0, 1.0)]
    #[case(1.5, 1.0)]
    #[case(1.0, -2.0)]
    #[case(1.0, -3.0)]
    fn rejects_degenerate_scaling(#[case] alpha: f64, #[case] kappa: f64) {
        assert!(SigmaWeights::merwe(alpha, 2.0, kappa).is_err());
    }

    #[rstest]
    #[case(-0.5)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn rejects_negative_or_non_finite_beta(#[case] beta: f64) {
        assert!(matches!(
            SigmaWeights::merwe(1.0, beta, 1.0),
            Err(PourError::InvalidConfiguration(_))
        ));
        assert!(SigmaWeights::merwe(1.0, 0.0, 1.0).is_ok());
    }

    #[test]
    fn sigma_points_reconstruct_their_moments() {
        let w = SigmaWeights::merwe(1.0, 2.0, 1.0).unwrap();
        let mean = Vector2::new(12.0, -0.5);
        let cov = Matrix2::new(4.0, 0.6, 0.6, 2.0);
        let pts = sigma_points(&mean, &cov, &w).unwrap();
        assert_eq!(pts[0], mean);
        let (m, c) = reconstruct(&pts, &w);
        assert!((m - mean).amax() < 1e-12);
        assert!((c - cov).amax() < 1e-12);
    }

    #[test]
    fn guarded_sqrt_repairs_semidefinite_covariance() {
        let singular = Matrix2::new(1.0, 1.0, 1.0, 1.0);
        let l = guarded_sqrt(&singular).unwrap();
        assert!((l * l.transpose() - singular).amax() < 1e-6);

        let slightly_negative = Matrix2::new(1.0, 1.0 + 1e-12, 1.0 + 1e-12, 1.0);
        assert!(guarded_sqrt(&slightly_negative).is_ok());
    }

    #[test]
    fn guarded_sqrt_rejects_non_finite() {
        let bad = Matrix2::new(f64::NAN, 0.0, 0.0, 1.0);
        assert!(matches!(
            guarded_sqrt(&bad),
            Err(PourError::NumericInstability { filter: "ukf", .. })
        ));
    }

    #[test]
    fn tracks_linear_filter_on_linear_models() {
        let mut ukf = UnscentedKalman::new(&cfg()).unwrap();
        let mut pv = PvKalman::new(&cfg().noise).unwrap();
        for i in 0..100 {
            let z = 3.0 * i as f64 * 0.1 + if i % 2 == 0 { 0.4 } else { -0.4 };
            let (up, uv) = ukf.update(z, 0.1).unwrap();
            let (pp, pvv) = pv.update(z, 0.1).unwrap();
            assert!((up - pp).abs() < 1e-6, "step {i}: {up} vs {pp}");
            assert!((uv - pvv).abs() < 1e-6, "step {i}: {uv} vs {pvv}");
        }
    }

    #[test]
    fn covariance_is_symmetric_after_every_update() {
        let mut ukf = UnscentedKalman::new(&cfg()).unwrap();
        for i in 0..40 {
            ukf.update((i as f64).sin() * 5.0 + 20.0, 0.1).unwrap();
            let p = ukf.covariance();
            assert_eq!(p[(0, 1)], p[(1, 0)]);
        }
    }

    #[test]
    fn reset_reseeds() {
        let mut ukf = UnscentedKalman::new(&cfg()).unwrap();
        ukf.update(9.0, 0.1).unwrap();
        ukf.update(10.0, 0.1).unwrap();
        ukf.reset();
        assert!(ukf.state().is_none());
        assert_eq!(ukf.update(1.0, 0.1).unwrap(), (1.0, 0.0));
    }
}
