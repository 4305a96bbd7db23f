//! Process and measurement models for the position–velocity filters.
//!
//! State is `[position, velocity]`. The linear defaults reproduce the PV
//! Kalman filter exactly; the `Fn*` variants let callers plug in a
//! nonlinear sensor curve or motion model.

use std::fmt;

use nalgebra::{Matrix2, RowVector2, Vector2};

/// Constant-velocity transition `[[1, dt], [0, 1]]`.
#[inline]
pub fn transition_matrix(dt: f64) -> Matrix2<f64> {
    Matrix2::new(1.0, dt, 0.0, 1.0)
}

/// Discrete white-noise acceleration covariance scaled by `q`.
#[inline]
pub fn white_noise_accel(q: f64, dt: f64) -> Matrix2<f64> {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt2 * dt2;
    Matrix2::new(dt4 / 4.0, dt3 / 2.0, dt3 / 2.0, dt2) * q
}

/// Covariance used when a vector filter seeds from its first measurement.
#[inline]
pub fn initial_covariance(measurement_noise: f64, velocity_variance: f64) -> Matrix2<f64> {
    Matrix2::new(measurement_noise, 0.0, 0.0, velocity_variance)
}

pub trait ProcessModel: Send + Sync {
    /// Propagate a state `dt` seconds forward.
    fn transition(&self, x: &Vector2<f64>, dt: f64) -> Vector2<f64>;
    /// Jacobian of `transition` with respect to the state, evaluated at `x`.
    fn jacobian(&self, x: &Vector2<f64>, dt: f64) -> Matrix2<f64>;
}

pub trait MeasurementModel: Send + Sync {
    /// Predicted measurement for a state.
    fn measure(&self, x: &Vector2<f64>) -> f64;
    /// Row Jacobian of `measure`, evaluated at `x`.
    fn jacobian(&self, x: &Vector2<f64>) -> RowVector2<f64>;
    /// Position to seed from when the first measurement `z` arrives.
    fn initial_position(&self, z: f64) -> f64 {
        z
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantVelocity;

impl ProcessModel for ConstantVelocity {
    fn transition(&self, x: &Vector2<f64>, dt: f64) -> Vector2<f64> {
        transition_matrix(dt) * x
    }

    fn jacobian(&self, _x: &Vector2<f64>, dt: f64) -> Matrix2<f64> {
        transition_matrix(dt)
    }
}

/// The scale reads position directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPosition;

impl MeasurementModel for DirectPosition {
    fn measure(&self, x: &Vector2<f64>) -> f64 {
        x[0]
    }

    fn jacobian(&self, _x: &Vector2<f64>) -> RowVector2<f64> {
        RowVector2::new(1.0, 0.0)
    }
}

fn step_size(at: f64) -> f64 {
    1e-6 * at.abs().max(1.0)
}

type CurveFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// Measurement defined by a sensor curve `z = h(position)`.
///
/// The Jacobian is a central finite difference unless an analytic
/// derivative is supplied. An optional inverse maps the first reading back
/// to a position; without it the reading seeds the position as-is.
pub struct FnMeasurement {
    h: CurveFn,
    derivative: Option<CurveFn>,
    inverse: Option<CurveFn>,
}

impl FnMeasurement {
    pub fn new(h: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            h: Box::new(h),
            derivative: None,
            inverse: None,
        }
    }

    pub fn with_derivative(mut self, dh: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.derivative = Some(Box::new(dh));
        self
    }

    pub fn with_inverse(mut self, inv: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.inverse = Some(Box::new(inv));
        self
    }
}

impl fmt::Debug for FnMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMeasurement")
            .field("analytic_derivative", &self.derivative.is_some())
            .field("inverse", &self.inverse.is_some())
            .finish()
    }
}

impl MeasurementModel for FnMeasurement {
    fn measure(&self, x: &Vector2<f64>) -> f64 {
        (self.h)(x[0])
    }

    fn jacobian(&self, x: &Vector2<f64>) -> RowVector2<f64> {
        let p = x[0];
        let d = match &self.derivative {
            Some(dh) => dh(p),
            None => {
                let e = step_size(p);
                ((self.h)(p + e) - (self.h)(p - e)) / (2.0 * e)
            }
        };
        RowVector2::new(d, 0.0)
    }

    fn initial_position(&self, z: f64) -> f64 {
        match &self.inverse {
            Some(inv) => inv(z),
            None => z,
        }
    }
}

type MotionFn = Box<dyn Fn(&Vector2<f64>, f64) -> Vector2<f64> + Send + Sync>;

/// Process defined by an arbitrary `f(x, dt)` with a finite-difference
/// Jacobian.
pub struct FnProcess {
    f: MotionFn,
}

impl FnProcess {
    pub fn new(f: impl Fn(&Vector2<f64>, f64) -> Vector2<f64> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProcess")
    }
}

impl ProcessModel for FnProcess {
    fn transition(&self, x: &Vector2<f64>, dt: f64) -> Vector2<f64> {
        (self.f)(x, dt)
    }

    fn jacobian(&self, x: &Vector2<f64>, dt: f64) -> Matrix2<f64> {
        let mut jac = Matrix2::zeros();
        for col in 0..2 {
            let e = step_size(x[col]);
            let mut hi = *x;
            let mut lo = *x;
            hi[col] += e;
            lo[col] -= e;
            let diff = ((self.f)(&hi, dt) - (self.f)(&lo, dt)) / (2.0 * e);
            jac.set_column(col, &diff);
        }
        jac
    }
}
