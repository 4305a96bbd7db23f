//! Simulated scale: an empty cup, a steady pour, then a settled weight,
//! plus seeded Gaussian noise.

use pour_traits::SampleSource;
use std::time::Duration;

/// Seconds of empty scale before the pour begins.
const LEAD_S: f64 = 1.0;

// Deterministic tiny PRNG (xorshift32)
#[derive(Debug, Clone)]
struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// [0, 1)
    fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }
}

/// Box-Muller transform for standard normal N(0,1)
#[derive(Debug, Clone)]
struct Gauss {
    rng: XorShift32,
    spare: Option<f64>,
}

impl Gauss {
    fn new(seed: u32) -> Self {
        Self {
            rng: XorShift32::new(seed),
            spare: None,
        }
    }

    fn next_std(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // Avoid log(0)
        let u1 = self.rng.next_f64().clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        let u2 = self.rng.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let th = 2.0 * std::f64::consts::PI * u2;
        self.spare = Some(r * th.sin());
        r * th.cos()
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedScale {
    rate_gps: f64,
    fill_g: f64,
    noise_g: f64,
    /// Seconds of simulated time per read.
    dt: f64,
    reads: u64,
    noise: Gauss,
}

impl SimulatedScale {
    pub fn new(rate_gps: f64, fill_g: f64, noise_g: f64, sample_rate_hz: u32, seed: u32) -> Self {
        Self {
            rate_gps: rate_gps.max(0.0),
            fill_g: fill_g.max(0.0),
            noise_g: noise_g.max(0.0),
            dt: 1.0 / f64::from(sample_rate_hz.max(1)),
            reads: 0,
            noise: Gauss::new(seed),
        }
    }

    /// Noise-free weight at simulated time `t` seconds.
    pub fn truth(&self, t: f64) -> f64 {
        (self.rate_gps * (t - LEAD_S)).clamp(0.0, self.fill_g)
    }
}

impl SampleSource for SimulatedScale {
    fn read(
        &mut self,
        _timeout: Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        let t = self.reads as f64 * self.dt;
        self.reads += 1;
        Ok(self.truth(t) + self.noise_g * self.noise.next_std())
    }
}
