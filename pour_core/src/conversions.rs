//! `From` implementations bridging `pour_config` types to `pour_core` types.
//!
//! The CLI builds an `EngineCfg` with one `From` call instead of mapping
//! fields by hand.

use std::time::Duration;

use crate::config::{
    BankCfg, EngineCfg, NoiseCfg, Pacing, PourCfg, SamplingCfg, ScoreWeights, UkfCfg,
    VectorKalmanCfg,
};
use crate::record::Channel;

/// Out-of-range seconds become zero, which the analyzer rejects at
/// construction.
fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

// ── Filters ──────────────────────────────────────────────────────────────────

impl From<&pour_config::NoiseCfg> for NoiseCfg {
    fn from(c: &pour_config::NoiseCfg) -> Self {
        Self {
            process_noise: c.process_noise,
            measurement_noise: c.measurement_noise,
        }
    }
}

impl From<&pour_config::VectorKalmanCfg> for VectorKalmanCfg {
    fn from(c: &pour_config::VectorKalmanCfg) -> Self {
        Self {
            process_noise: c.process_noise,
            measurement_noise: c.measurement_noise,
            initial_velocity_variance: c.initial_velocity_variance,
        }
    }
}

impl From<&pour_config::UkfCfg> for UkfCfg {
    fn from(c: &pour_config::UkfCfg) -> Self {
        Self {
            noise: VectorKalmanCfg {
                process_noise: c.process_noise,
                measurement_noise: c.measurement_noise,
                initial_velocity_variance: c.initial_velocity_variance,
            },
            alpha: c.alpha,
            beta: c.beta,
            kappa: c.kappa,
        }
    }
}

impl From<&pour_config::Config> for BankCfg {
    fn from(c: &pour_config::Config) -> Self {
        let f = &c.filters;
        Self {
            moving_average_window: f.moving_average.window,
            ema_alpha: f.ema.alpha,
            kalman: (&f.kalman).into(),
            kalman_pv: (&f.kalman_pv).into(),
            ekf: (&f.ekf).into(),
            ukf: (&f.ukf).into(),
            nominal_dt: crate::util::period(c.sampling.sample_rate_hz),
            use_measured_dt: c.sampling.use_measured_dt,
        }
    }
}

// ── Pouring ──────────────────────────────────────────────────────────────────

impl From<pour_config::EstimateSource> for Channel {
    fn from(s: pour_config::EstimateSource) -> Self {
        use pour_config::EstimateSource as E;
        match s {
            E::MovingAverage => Channel::MovingAverage,
            E::ExponentialAverage => Channel::ExponentialAverage,
            E::KalmanSimple => Channel::KalmanSimple,
            E::KalmanPvPosition => Channel::KalmanPvPosition,
            E::Ekf => Channel::Ekf,
            E::Ukf => Channel::Ukf,
        }
    }
}

impl From<&pour_config::ScoreWeights> for ScoreWeights {
    fn from(w: &pour_config::ScoreWeights) -> Self {
        Self {
            accuracy: w.accuracy,
            stability: w.stability,
            responsiveness: w.responsiveness,
            overshoot: w.overshoot,
        }
    }
}

impl From<&pour_config::Pouring> for PourCfg {
    fn from(p: &pour_config::Pouring) -> Self {
        Self {
            source: p.source.into(),
            rate_threshold_gps: p.rate_threshold_gps,
            stability_window: p.stability_window,
            rate_window: p.rate_window,
            tolerance_g: p.tolerance_g,
            max_duration: secs(p.max_duration_s),
            timeout: secs(p.timeout_s),
            status_every: p.status_every,
            weights: (&p.weights).into(),
        }
    }
}

// ── Sampling ─────────────────────────────────────────────────────────────────

impl From<&pour_config::Sampling> for SamplingCfg {
    fn from(s: &pour_config::Sampling) -> Self {
        Self {
            sample_rate_hz: s.sample_rate_hz,
            read_timeout: Duration::from_millis(s.read_timeout_ms),
            stall: Duration::from_millis(s.stall_ms),
            channel_capacity: s.channel_capacity,
            pacing: match s.pacing {
                pour_config::Pacing::Fixed => Pacing::Fixed(s.sample_rate_hz),
                pour_config::Pacing::Source => Pacing::SourceDriven,
            },
        }
    }
}

impl From<&pour_config::Config> for EngineCfg {
    fn from(c: &pour_config::Config) -> Self {
        Self {
            bank: c.into(),
            pouring: c.pouring.enabled.then(|| (&c.pouring).into()),
            default_target_g: c.pouring.default_target_g,
            stats_window: c.stats.window,
            sampling: (&c.sampling).into(),
        }
    }
}
