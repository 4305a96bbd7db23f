#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and sample-trace parsing for the pour workspace.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//!   Every section is optional; an empty document yields the defaults the
//!   scale publisher has always run with (10 Hz, MA window 10, EMA 0.2,
//!   Kalman Q=1.0 / R=10.0).
//! - The sample CSV loader enforces headers and time ordering so a recorded
//!   trace can be replayed through the filter bank offline.
use serde::Deserialize;

/// Recorded sample CSV schema.
///
/// Expected headers:
/// t_s,value
///
/// Example:
/// t_s,value
/// 0.0,0.12
/// 0.1,0.31
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SampleRow {
    /// Seconds since the start of the recording.
    pub t_s: f64,
    /// Raw weight in grams.
    pub value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sampling {
    /// Nominal sensor rate; the nominal filter dt is derived from it.
    pub sample_rate_hz: u32,
    /// Per-read timeout handed to the sample source (ms).
    pub read_timeout_ms: u64,
    /// A sensor silent for longer than this is considered stalled (ms).
    pub stall_ms: u64,
    /// Use the measured interval between samples as dt when it is sane.
    pub use_measured_dt: bool,
    /// Bounded queue between the sampler thread and the pipeline.
    pub channel_capacity: usize,
    /// Pace reads at `sample_rate_hz` ("fixed") or let the source block ("source").
    pub pacing: Pacing,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10,
            read_timeout_ms: 150,
            stall_ms: 1_000,
            use_measured_dt: true,
            channel_capacity: 64,
            pacing: Pacing::Fixed,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    #[default]
    Fixed,
    Source,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MovingAverageCfg {
    pub window: usize,
}

impl Default for MovingAverageCfg {
    fn default() -> Self {
        Self { window: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmaCfg {
    /// Smoothing factor in (0.0, 1.0].
    pub alpha: f64,
}

impl Default for EmaCfg {
    fn default() -> Self {
        Self { alpha: 0.2 }
    }
}

/// Noise parameters shared by the Kalman family.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct NoiseCfg {
    pub process_noise: f64,
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

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct VectorKalmanCfg {
    pub process_noise: f64,
    pub measurement_noise: f64,
    /// Prior velocity variance used when the state is (re)initialized.
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

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct UkfCfg {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_velocity_variance: f64,
    /// Sigma-point spread.
    pub alpha: f64,
    /// Prior knowledge of the distribution (2 is optimal for Gaussians).
    pub beta: f64,
    /// Secondary scaling parameter.
    pub kappa: f64,
}

impl Default for UkfCfg {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 10.0,
            initial_velocity_variance: 10.0,
            alpha: 1.0,
            beta: 2.0,
            kappa: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Filters {
    pub moving_average: MovingAverageCfg,
    pub ema: EmaCfg,
    pub kalman: NoiseCfg,
    pub kalman_pv: VectorKalmanCfg,
    pub ekf: VectorKalmanCfg,
    pub ukf: UkfCfg,
}

/// Filter output that feeds the pouring analyzer.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    MovingAverage,
    ExponentialAverage,
    KalmanSimple,
    KalmanPvPosition,
    Ekf,
    #[default]
    Ukf,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
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

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.accuracy + self.stability + self.responsiveness + self.overshoot
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pouring {
    pub enabled: bool,
    pub source: EstimateSource,
    /// |rate| below this (g/s) counts as not moving.
    pub rate_threshold_gps: f64,
    /// Consecutive quiet samples required to call the stream stable.
    pub stability_window: usize,
    /// Samples used for the least-squares rate estimate.
    pub rate_window: usize,
    /// Completion band below target (g).
    pub tolerance_g: f64,
    /// Time-to-band at which responsiveness scores zero (s).
    pub max_duration_s: f64,
    /// Abort an active session after this long (s).
    pub timeout_s: f64,
    /// Emit a progress status every N samples while active (0 disables).
    pub status_every: usize,
    /// Target used by a start command that carries none.
    pub default_target_g: Option<f64>,
    pub weights: ScoreWeights,
}

impl Default for Pouring {
    fn default() -> Self {
        Self {
            enabled: true,
            source: EstimateSource::Ukf,
            rate_threshold_gps: 0.5,
            stability_window: 20,
            rate_window: 5,
            tolerance_g: 1.0,
            max_duration_s: 30.0,
            timeout_s: 120.0,
            status_every: 10,
            default_target_g: None,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Stats {
    /// Rolling window (samples) for per-filter noise statistics.
    pub window: usize,
}

impl Default for Stats {
    fn default() -> Self {
        Self { window: 100 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sampling: Sampling,
    pub filters: Filters,
    pub pouring: Pouring,
    pub stats: Stats,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Load a recorded trace. Headers must be exactly `t_s,value` and
/// timestamps must be finite and non-decreasing.
pub fn load_samples_csv(path: &std::path::Path) -> eyre::Result<Vec<SampleRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open sample CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["t_s", "value"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "sample CSV must have headers 't_s,value', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<SampleRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<SampleRow>().enumerate() {
        // +2: header line plus 1-based numbering
        let line = idx + 2;
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", line, e))?;
        if !row.t_s.is_finite() || row.t_s < 0.0 {
            eyre::bail!("CSV row {}: t_s must be a finite value >= 0", line);
        }
        if let Some(prev) = rows.last()
            && row.t_s < prev.t_s
        {
            eyre::bail!(
                "CSV row {}: t_s {} goes backwards (previous {})",
                line,
                row.t_s,
                prev.t_s
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

fn check_noise(section: &str, process_noise: f64, measurement_noise: f64) -> eyre::Result<()> {
    if !(process_noise.is_finite() && process_noise >= 0.0) {
        eyre::bail!("{section}.process_noise must be >= 0");
    }
    if !(measurement_noise.is_finite() && measurement_noise >= 0.0) {
        eyre::bail!("{section}.measurement_noise must be >= 0");
    }
    if process_noise == 0.0 && measurement_noise == 0.0 {
        eyre::bail!("{section}: process_noise and measurement_noise cannot both be 0");
    }
    Ok(())
}

/// Seconds that convert to a non-zero `Duration`.
fn check_secs(field: &str, s: f64) -> eyre::Result<()> {
    match std::time::Duration::try_from_secs_f64(s) {
        Ok(d) if !d.is_zero() => Ok(()),
        _ => eyre::bail!("{field} must be > 0 (and representable in seconds)"),
    }
}

fn check_vector(section: &str, c: &VectorKalmanCfg) -> eyre::Result<()> {
    check_noise(section, c.process_noise, c.measurement_noise)?;
    if !(c.initial_velocity_variance.is_finite() && c.initial_velocity_variance > 0.0) {
        eyre::bail!("{section}.initial_velocity_variance must be > 0");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sampling
        if self.sampling.sample_rate_hz == 0 {
            eyre::bail!("sampling.sample_rate_hz must be > 0");
        }
        if self.sampling.sample_rate_hz > 10_000 {
            eyre::bail!("sampling.sample_rate_hz is unreasonably large (>10 kHz)");
        }
        if self.sampling.read_timeout_ms == 0 {
            eyre::bail!("sampling.read_timeout_ms must be >= 1");
        }
        if self.sampling.stall_ms == 0 {
            eyre::bail!("sampling.stall_ms must be >= 1");
        }
        if self.sampling.channel_capacity == 0 {
            eyre::bail!("sampling.channel_capacity must be >= 1");
        }

        // Filters
        if self.filters.moving_average.window == 0 {
            eyre::bail!("filters.moving_average.window must be >= 1");
        }
        let alpha = self.filters.ema.alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            eyre::bail!("filters.ema.alpha must be in (0.0, 1.0]");
        }
        check_noise(
            "filters.kalman",
            self.filters.kalman.process_noise,
            self.filters.kalman.measurement_noise,
        )?;
        check_vector("filters.kalman_pv", &self.filters.kalman_pv)?;
        check_vector("filters.ekf", &self.filters.ekf)?;
        let ukf = &self.filters.ukf;
        check_vector(
            "filters.ukf",
            &VectorKalmanCfg {
                process_noise: ukf.process_noise,
                measurement_noise: ukf.measurement_noise,
                initial_velocity_variance: ukf.initial_velocity_variance,
            },
        )?;
        if !(ukf.alpha.is_finite() && ukf.alpha > 0.0 && ukf.alpha <= 1.0) {
            eyre::bail!("filters.ukf.alpha must be in (0.0, 1.0]");
        }
        if !(ukf.beta.is_finite() && ukf.beta >= 0.0) {
            eyre::bail!("filters.ukf.beta must be >= 0");
        }
        // n + lambda must stay positive for the sigma-point spread (n = 2)
        if !ukf.kappa.is_finite() || ukf.alpha * ukf.alpha * (2.0 + ukf.kappa) <= 0.0 {
            eyre::bail!("filters.ukf.kappa must satisfy alpha^2 * (2 + kappa) > 0");
        }

        // Pouring
        let p = &self.pouring;
        if !(p.rate_threshold_gps.is_finite() && p.rate_threshold_gps > 0.0) {
            eyre::bail!("pouring.rate_threshold_gps must be > 0");
        }
        if p.stability_window < 2 {
            eyre::bail!("pouring.stability_window must be >= 2");
        }
        if p.rate_window < 2 {
            eyre::bail!("pouring.rate_window must be >= 2");
        }
        if !(p.tolerance_g.is_finite() && p.tolerance_g >= 0.0) {
            eyre::bail!("pouring.tolerance_g must be >= 0");
        }
        check_secs("pouring.max_duration_s", p.max_duration_s)?;
        check_secs("pouring.timeout_s", p.timeout_s)?;
        if let Some(t) = p.default_target_g
            && !(t.is_finite() && t > 0.0)
        {
            eyre::bail!("pouring.default_target_g must be > 0");
        }
        let w = &p.weights;
        for (name, v) in [
            ("accuracy", w.accuracy),
            ("stability", w.stability),
            ("responsiveness", w.responsiveness),
            ("overshoot", w.overshoot),
        ] {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                eyre::bail!("pouring.weights.{name} must be in [0.0, 1.0]");
            }
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            eyre::bail!("pouring.weights must sum to 1.0 (got {:.4})", w.sum());
        }

        // Stats
        if self.stats.window < 2 {
            eyre::bail!("stats.window must be >= 2");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
