use std::collections::VecDeque;

use super::{Filter, Reading, ensure_finite};
use crate::error::PourError;

/// Arithmetic mean of the last `window` measurements.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    buf: VecDeque<f64>,
}

impl MovingAverage {
    pub fn new(window: usize) -> Result<Self, PourError> {
        if window == 0 {
            return Err(PourError::config("moving_average: window must be >= 1"));
        }
        Ok(Self {
            window,
            buf: VecDeque::with_capacity(window),
        })
    }

    /// Push `x` and return the mean over at most `window` most recent values.
    pub fn update(&mut self, x: f64) -> f64 {
        if self.buf.len() == self.window {
            self.buf.pop_front();
        }
        self.buf.push_back(x);
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Filter for MovingAverage {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn step(&mut self, measurement: f64, _dt: f64) -> Result<Reading, PourError> {
        let mean = self.update(measurement);
        ensure_finite(self.name(), "mean", &[mean])?;
        Ok(Reading::scalar(mean))
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn rejects_zero_window() {
        assert!(matches!(
            MovingAverage::new(0),
            Err(PourError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn averages_only_what_it_has_seen_before_filling() {
        let mut ma = MovingAverage::new(4).unwrap();
        assert_eq!(ma.update(2.0), 2.0);
        assert_eq!(ma.update(4.0), 3.0);
        assert_eq!(ma.len(), 2);
    }

    #[rstest]
    #[case(1, &[1.0, 5.0, 9.0], 9.0)]
    #[case(2, &[1.0, 5.0, 9.0], 7.0)]
    #[case(3, &[1.0, 5.0, 9.0, 3.0], 17.0 / 3.0)]
    fn evicts_oldest(#[case] window: usize, #[case] xs: &[f64], #[case] expected: f64) {
        let mut ma = MovingAverage::new(window).unwrap();
        let mut last = f64::NAN;
        for &x in xs {
            last = ma.update(x);
        }
        assert!((last - expected).abs() < 1e-12);
        assert!(ma.len() <= window);
    }

    #[test]
    fn reset_empties_the_window() {
        let mut ma = MovingAverage::new(3).unwrap();
        ma.update(10.0);
        ma.reset();
        assert!(ma.is_empty());
        assert_eq!(ma.update(1.0), 1.0);
    }

    #[test]
    fn infinite_input_is_reported_as_instability() {
        let mut ma = MovingAverage::new(3).unwrap();
        assert!(ma.step(f64::INFINITY, 0.1).is_err());
    }
}
