//! Runtime configuration types for the estimation engine.
//!
//! These are the structs handed to `FilterBank`, `PourAnalyzer` and the
//! runner at construction. They are separate from the TOML-deserialized
//! config in `pour_config`; see `conversions` for the mapping.

use std::time::Duration;

use crate::record::Channel;

/// Noise parameters for the scalar Kalman filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseCfg {
    /// Process noise Q (variance added per step).
    pub process_noise: f64,
    /// Measurement noise R.
    pub measurement_noise: f64,
}

impl Default for NoiseCfg {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 10.0,
        }
    }
}

/// Parameters for the position–velocity filters (PV Kalman, EKF).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorKalmanCfg {
    /// Continuous white-noise acceleration intensity q.
    pub process_noise: f64,
    /// Position measurement variance r.
    pub measurement_noise: f64,
    /// Velocity variance used when the state is (re)initialized.
    pub initial_velocity_variance: f64,
}

impl Default for VectorKalmanCfg {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 10.0,
            initial_velocity_variance: 10.0,
        }
    }
}

/// Unscented filter parameters: vector noise plus sigma-point scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UkfCfg {
    pub noise: VectorKalmanCfg,
    pub alpha: f64,
    pub beta: f64,
    pub kappa: f64,
}

impl Default for UkfCfg {
    fn default() -> Self {
        Self {
            noise: VectorKalmanCfg::default(),
            alpha: 1.0,
            beta: 2.0,
            kappa: 1.0,
        }
    }
}

/// Everything the filter bank needs to build its six filters.
#[derive(Debug, Clone, PartialEq)]
pub struct BankCfg {
    pub moving_average_window: usize,
    pub ema_alpha: f64,
    pub kalman: NoiseCfg,
    pub kalman_pv: VectorKalmanCfg,
    pub ekf: VectorKalmanCfg,
    pub ukf: UkfCfg,
    /// Sample interval assumed when no sane measured interval is available.
    pub nominal_dt: Duration,
    /// Prefer the measured interval between consecutive samples.
    pub use_measured_dt: bool,
}

impl Default for BankCfg {
    fn default() -> Self {
        Self {
            moving_average_window: 10,
            ema_alpha: 0.2,
            kalman: NoiseCfg::default(),
            kalman_pv: VectorKalmanCfg::default(),
            ekf: VectorKalmanCfg::default(),
            ukf: UkfCfg::default(),
            nominal_dt: Duration::from_millis(100),
            use_measured_dt: true,
        }
    }
}

/// Component weights of the composite pour score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub accuracy: f64,
    pub stability: f64,
    pub responsiveness: f64,
    pub overshoot: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.3,
            stability: 0.3,
            responsiveness: 0.2,
            overshoot: 0.2,
        }
    }
}

/// Pouring analyzer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PourCfg {
    /// Which bank output feeds the analyzer.
    pub source: Channel,
    /// |rate| below this many g/s counts as quiet.
    pub rate_threshold_gps: f64,
    /// Consecutive quiet samples needed for "stable"; also the scoring tail.
    pub stability_window: usize,
    /// Samples in the least-squares rate estimate.
    pub rate_window: usize,
    /// Completion band below target (g).
    pub tolerance_g: f64,
    /// Time-to-band at which responsiveness reaches zero.
    pub max_duration: Duration,
    /// Active sessions older than this are aborted.
    pub timeout: Duration,
    /// Emit a progress status every N samples while active (0 disables).
    pub status_every: usize,
    pub weights: ScoreWeights,
}

impl Default for PourCfg {
    fn default() -> Self {
        Self {
            source: Channel::Ukf,
            rate_threshold_gps: 0.5,
            stability_window: 20,
            rate_window: 5,
            tolerance_g: 1.0,
            max_duration: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
            status_every: 10,
            weights: ScoreWeights::default(),
        }
    }
}

/// How the sampler thread paces reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep one period between reads.
    Fixed(u32),
    /// The source blocks until data is ready; no extra sleeps.
    SourceDriven,
}

/// Sampler and runner timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingCfg {
    pub sample_rate_hz: u32,
    pub read_timeout: Duration,
    /// Silence longer than this aborts an active pour as `SensorStall`.
    pub stall: Duration,
    pub channel_capacity: usize,
    pub pacing: Pacing,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            read_timeout: Duration::from_millis(150),
            stall: Duration::from_secs(1),
            channel_capacity: 64,
            pacing: Pacing::Fixed(10),
        }
    }
}

/// Top-level runtime configuration assembled from `pour_config::Config`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCfg {
    pub bank: BankCfg,
    /// `None` disables the pouring analyzer.
    pub pouring: Option<PourCfg>,
    pub default_target_g: Option<f64>,
    pub stats_window: usize,
    pub sampling: SamplingCfg,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            bank: BankCfg::default(),
            pouring: Some(PourCfg::default()),
            default_target_g: None,
            stats_window: 100,
            sampling: SamplingCfg::default(),
        }
    }
}
