//! End-to-end filter behavior on scripted weight profiles.

use pour_core::filter::{ExtendedKalman, PvKalman, SimpleKalman, UnscentedKalman};
use pour_core::{BankCfg, Channel, FilterBank, NoiseCfg, Sample, UkfCfg, VectorKalmanCfg};
use rstest::rstest;
use std::time::{Duration, Instant};

fn feed(
    bank: &mut FilterBank,
    values: impl IntoIterator<Item = f64>,
) -> Vec<pour_core::FilterRecord> {
    let t0 = Instant::now();
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let at = t0 + Duration::from_millis(100) * (i as u32 + 1);
            bank.process(&Sample::new(at, v))
        })
        .collect()
}

/// Empty scale, a cup dropped on it, then a ramp that holds at 100 g.
fn step_profile() -> Vec<f64> {
    let mut v = vec![0.0, 0.0, 0.0];
    v.extend((0..=10).map(|i| 50.0 + 5.0 * f64::from(i)));
    v.extend(std::iter::repeat_n(100.0, 100));
    v
}

#[test]
fn simple_kalman_settles_within_one_percent_after_step() {
    let mut k = SimpleKalman::new(&NoiseCfg {
        process_noise: 1.0,
        measurement_noise: 10.0,
    })
    .unwrap();
    let out: Vec<f64> = step_profile().into_iter().map(|z| k.update(z)).collect();
    // 50 samples after the step at index 3.
    for v in &out[53..] {
        assert!((v - 100.0).abs() <= 1.0, "estimate {v} not within 1% of 100");
    }
    assert!(k.error_estimate() > 0.0);
}

#[rstest]
#[case(0.0)]
#[case(18.5)]
#[case(250.0)]
#[case(-3.0)]
fn every_channel_converges_on_constant_input(#[case] c: f64) {
    let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
    let records = feed(&mut bank, std::iter::repeat_n(c, 200));
    let last = records.last().unwrap();
    for (channel, est) in last.estimates.iter() {
        assert!(!est.stale, "{channel} went stale");
        let expected = if channel.is_weight() { c } else { 0.0 };
        assert!(
            (est.value - expected).abs() < 1e-6,
            "{channel}: {} vs {expected}",
            est.value
        );
    }
}

#[test]
fn velocity_tracks_a_steady_pour_rate() {
    let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
    // 3 g/s at 10 Hz.
    let records = feed(&mut bank, (0..300).map(|i| 0.3 * f64::from(i)));
    let v = records.last().unwrap().estimate(Channel::KalmanPvVelocity).value;
    assert!((v - 3.0).abs() < 0.05, "velocity {v}");
}

#[test]
fn linear_ekf_and_ukf_follow_the_pv_filter() {
    let cfg = VectorKalmanCfg::default();
    let mut pv = PvKalman::new(&cfg).unwrap();
    let mut ekf = ExtendedKalman::new(&cfg).unwrap();
    let mut ukf = UnscentedKalman::new(&UkfCfg {
        noise: cfg,
        ..UkfCfg::default()
    })
    .unwrap();

    for z in step_profile() {
        let a = pv.update(z, 0.1).unwrap();
        let b = ekf.update(z, 0.1).unwrap();
        let c = ukf.update(z, 0.1).unwrap();
        assert_eq!(a, b);
        assert!((a.0 - c.0).abs() < 1e-6, "{} vs {}", a.0, c.0);
        assert!((a.1 - c.1).abs() < 1e-6, "{} vs {}", a.1, c.1);
    }
}

#[test]
fn a_nan_burst_only_marks_the_burst_stale() {
    let mut bank = FilterBank::new(&BankCfg::default()).unwrap();
    let mut values = vec![10.0; 20];
    values.extend([f64::NAN, f64::NAN]);
    values.extend(std::iter::repeat_n(10.0, 5));
    let records = feed(&mut bank, values);

    for r in &records[20..22] {
        assert_eq!(r.estimates.stale_channels().count(), Channel::COUNT);
        assert!((r.estimate(Channel::Ukf).value - 10.0).abs() < 1e-9);
    }
    let after = records.last().unwrap();
    assert_eq!(after.estimates.stale_channels().count(), 0);
    assert_eq!(bank.failures(), 0);
}
