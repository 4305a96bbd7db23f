//! Fan-out of one raw sample to every filter and fan-in to one record.

use std::sync::Arc;
use std::time::Instant;

use crate::config::BankCfg;
use crate::error::PourError;
use crate::filter::{
    Ema, ExtendedKalman, Filter, MeasurementModel, MovingAverage, PvKalman, ProcessModel,
    SimpleKalman, UnscentedKalman,
};
use crate::record::{Channel, Estimate, Estimates, FilterRecord, Sample};

/// Measured intervals longer than this many nominal periods are treated as
/// gaps and replaced by the nominal interval.
const MAX_DT_FACTOR: f64 = 10.0;

struct Slot {
    filter: Box<dyn Filter>,
    value: Channel,
    rate: Option<Channel>,
}

/// One instance of each filter, updated in a fixed order:
/// moving average, EMA, simple Kalman, PV Kalman, EKF, UKF.
pub struct FilterBank {
    slots: Vec<Slot>,
    last: Estimates,
    last_timestamp: Option<Instant>,
    nominal_dt: f64,
    use_measured_dt: bool,
    failures: u64,
}

impl std::fmt::Debug for FilterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterBank")
            .field(
                "filters",
                &self.slots.iter().map(|s| s.filter.name()).collect::<Vec<_>>(),
            )
            .field("nominal_dt", &self.nominal_dt)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl FilterBank {
    /// Build the bank with the linear constant-velocity / direct-position
    /// models for EKF and UKF.
    pub fn new(cfg: &BankCfg) -> Result<Self, PourError> {
        let ekf = ExtendedKalman::new(&cfg.ekf)?;
        let ukf = UnscentedKalman::new(&cfg.ukf)?;
        Self::assemble(cfg, ekf, ukf)
    }

    /// Build the bank with a custom model pair for the nonlinear filters.
    pub fn with_models(
        cfg: &BankCfg,
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
    ) -> Result<Self, PourError> {
        let ekf = ExtendedKalman::with_models(&cfg.ekf, process.clone(), measurement.clone())?;
        let ukf = UnscentedKalman::with_models(&cfg.ukf, process, measurement)?;
        Self::assemble(cfg, ekf, ukf)
    }

    fn assemble(
        cfg: &BankCfg,
        ekf: ExtendedKalman,
        ukf: UnscentedKalman,
    ) -> Result<Self, PourError> {
        let nominal_dt = cfg.nominal_dt.as_secs_f64();
        if !(nominal_dt > 0.0) {
            return Err(PourError::config("nominal sample interval must be > 0"));
        }
        let slot = |filter: Box<dyn Filter>, value: Channel, rate: Option<Channel>| Slot {
            filter,
            value,
            rate,
        };
        let slots = vec![
            slot(
                Box::new(MovingAverage::new(cfg.moving_average_window)?),
                Channel::MovingAverage,
                None,
            ),
            slot(
                Box::new(Ema::new(cfg.ema_alpha)?),
                Channel::ExponentialAverage,
                None,
            ),
            slot(
                Box::new(SimpleKalman::new(&cfg.kalman)?),
                Channel::KalmanSimple,
                None,
            ),
            slot(
                Box::new(PvKalman::new(&cfg.kalman_pv)?),
                Channel::KalmanPvPosition,
                Some(Channel::KalmanPvVelocity),
            ),
            slot(Box::new(ekf), Channel::Ekf, None),
            slot(Box::new(ukf), Channel::Ukf, None),
        ];
        Ok(Self {
            slots,
            last: Estimates::default(),
            last_timestamp: None,
            nominal_dt,
            use_measured_dt: cfg.use_measured_dt,
            failures: 0,
        })
    }

    /// Interval in seconds to hand the vector filters for a sample at `ts`.
    fn dt_for(&self, ts: Instant) -> f64 {
        if !self.use_measured_dt {
            return self.nominal_dt;
        }
        match self.last_timestamp {
            Some(prev) => {
                let measured = ts.saturating_duration_since(prev).as_secs_f64();
                if measured > 0.0 && measured <= self.nominal_dt * MAX_DT_FACTOR {
                    measured
                } else {
                    self.nominal_dt
                }
            }
            None => self.nominal_dt,
        }
    }

    /// Update every filter with `sample` and return the labeled record.
    ///
    /// Never fails: a filter that errors is reset and its slots carry the
    /// previous value flagged stale. A non-finite raw value leaves all
    /// filters untouched and marks every slot stale.
    pub fn process(&mut self, sample: &Sample) -> FilterRecord {
        if !sample.value.is_finite() {
            tracing::warn!(raw = sample.value, "non-finite sample skipped");
            self.last.mark_all_stale();
            return FilterRecord {
                timestamp: sample.timestamp,
                raw: sample.value,
                estimates: self.last.clone(),
            };
        }

        let dt = self.dt_for(sample.timestamp);
        self.last_timestamp = Some(sample.timestamp);

        for slot in &mut self.slots {
            match slot.filter.step(sample.value, dt) {
                Ok(reading) if reading.value.is_finite() => {
                    self.last.set(slot.value, Estimate::fresh(reading.value));
                    if let Some(rate_channel) = slot.rate {
                        let rate = reading.rate.unwrap_or(f64::NAN);
                        self.last.set(rate_channel, Estimate::fresh(rate));
                    }
                }
                outcome => {
                    let error = match outcome {
                        Err(e) => e,
                        Ok(r) => PourError::unstable(
                            slot.filter.name(),
                            format!("non-finite output {}", r.value),
                        ),
                    };
                    self.failures += 1;
                    tracing::warn!(
                        filter = slot.filter.name(),
                        error = %error,
                        "filter update failed; resetting"
                    );
                    slot.filter.reset();
                    self.last.set(slot.value, self.last.get(slot.value).into_stale());
                    if let Some(rate_channel) = slot.rate {
                        self.last
                            .set(rate_channel, self.last.get(rate_channel).into_stale());
                    }
                }
            }
        }

        FilterRecord {
            timestamp: sample.timestamp,
            raw: sample.value,
            estimates: self.last.clone(),
        }
    }

    /// Reset every filter and forget the last estimates.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.filter.reset();
        }
        self.last = Estimates::default();
        self.last_timestamp = None;
    }

    pub fn last(&self) -> &Estimates {
        &self.last
    }

    /// Total filter failures since construction.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Filter names in update order.
    pub fn order(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|s| s.filter.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn samples(values: &[f64], period: Duration) -> Vec<Sample> {
        let t0 = Instant::now();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(t0 + period * i as u32, v))
            .collect()
    }

    #[test]
    fn update_order_is_fixed() {
        let bank = FilterBank::new(&BankCfg::default()).unwrap();
        let order: Vec<_> = bank.order().collect();
        assert_eq!(
            order,
            [
                "moving_average",
                "exponential_average",
                "kalman_simple",
                "kalman_pv",
                "ekf",
                "ukf"
            ]
        );
    }

    #[test]
    fn first_sample_fills_every_channel() {
        let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
        let rec = bank.process(&samples(&[12.5], Duration::from_millis(100))[0]);
        for (channel, est) in rec.estimates.iter() {
            assert!(!est.stale, "{channel} stale");
            let expected = if channel.is_weight() { 12.5 } else { 0.0 };
            assert_eq!(est.value, expected, "{channel}");
        }
    }

    #[test]
    fn non_finite_sample_marks_everything_stale_and_keeps_state() {
        let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
        let s = samples(&[10.0, f64::NAN, 10.0], Duration::from_millis(100));
        bank.process(&s[0]);
        let rec = bank.process(&s[1]);
        assert_eq!(rec.estimates.stale_channels().count(), Channel::COUNT);
        assert_eq!(rec.estimate(Channel::Ukf).value, 10.0);
        let rec = bank.process(&s[2]);
        assert_eq!(rec.estimates.stale_channels().count(), 0);
        assert_eq!(bank.failures(), 0);
    }

    #[test]
    fn overflowing_sample_isolates_failing_filters() {
        let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
        let s = samples(&[10.0, f64::MAX, f64::MAX, 10.0], Duration::from_millis(100));
        bank.process(&s[0]);
        let before = bank.process(&s[1]).estimate(Channel::MovingAverage);
        assert!(!before.stale);
        assert!(before.value.is_finite());
        let rec = bank.process(&s[2]);
        // The EMA survives any finite input.
        assert!(!rec.estimate(Channel::ExponentialAverage).stale);
        // The moving-average sum overflows and is reset; its slot keeps the
        // last valid value.
        let failed = rec.estimate(Channel::MovingAverage);
        assert!(failed.stale);
        assert_eq!(failed.value, before.value);
        assert!(bank.failures() >= 1);
        let rec = bank.process(&s[3]);
        assert!(!rec.estimate(Channel::MovingAverage).stale);
        assert_eq!(rec.estimate(Channel::MovingAverage).value, 10.0);
    }

    #[test]
    fn measured_dt_falls_back_to_nominal_on_gaps() {
        let bank_cfg = BankCfg::default();
        let mut bank = FilterBank::new(&bank_cfg).unwrap();
        let t0 = Instant::now();
        assert_eq!(bank.dt_for(t0), 0.1);
        bank.process(&Sample::new(t0, 1.0));
        assert!((bank.dt_for(t0 + Duration::from_millis(130)) - 0.13).abs() < 1e-9);
        assert_eq!(bank.dt_for(t0 + Duration::from_secs(5)), 0.1);
        assert_eq!(bank.dt_for(t0), 0.1);
    }

    #[test]
    fn nominal_dt_only_when_measurement_disabled() {
        let cfg = BankCfg {
            use_measured_dt: false,
            ..BankCfg::default()
        };
        let mut bank = FilterBank::new(&cfg).unwrap();
        let t0 = Instant::now();
        bank.process(&Sample::new(t0, 1.0));
        assert_eq!(bank.dt_for(t0 + Duration::from_millis(130)), 0.1);
    }

    #[test]
    fn rejects_invalid_filter_parameters() {
        let cfg = BankCfg {
            moving_average_window: 0,
            ..BankCfg::default()
        };
        assert!(matches!(
            FilterBank::new(&cfg),
            Err(PourError::InvalidConfiguration(_))
        ));
        let cfg = BankCfg {
            nominal_dt: Duration::ZERO,
            ..BankCfg::default()
        };
        assert!(FilterBank::new(&cfg).is_err());
    }

    #[test]
    fn reset_clears_estimates() {
        let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
        bank.process(&samples(&[3.0], Duration::from_millis(100))[0]);
        bank.reset();
        assert!(bank.last().get(Channel::Ekf).value.is_nan());
    }
}
