//! Accuracy regression under additive Gaussian noise.
//!
//! A 4 g/s pour to 100 g is sampled at 10 Hz with seeded noise
//! (sigma 0.5 g) and fed through the full pipeline. Asserts:
//! - every seed completes (any abort fails the test)
//! - the final estimate lands within 1 g of target
//! - the composite score is the configured weighted sum of its parts
//! - the bank's smoothing channels beat the raw signal on a flat line

use pour_core::{
    Channel, Command, EngineCfg, Pipeline, PourEvent, PourOutcome, Sample, ScoreWeights, Sink,
    VecSink,
};
use rstest::rstest;
use std::time::{Duration, Instant};

// Deterministic tiny PRNG (xorshift32)
#[derive(Clone)]
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
    fn next_f64(&mut self) -> f64 {
        // [0, 1)
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }
}

// Box-Muller transform for standard normal N(0,1)
#[derive(Clone)]
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

fn at(t0: Instant, i: usize) -> Instant {
    t0 + Duration::from_millis(100) * (i as u32 + 1)
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
#[case(1234)]
#[case(99)]
fn noisy_pour_completes_near_target(#[case] seed: u32) {
    let mut noise = Gauss::new(seed);
    let mut pipeline = Pipeline::new(&EngineCfg::default()).unwrap();
    let mut sink = VecSink::default();
    let t0 = Instant::now();
    for e in pipeline
        .command(Command::Start { target_g: Some(100.0) }, t0)
        .unwrap()
    {
        sink.pour_event(&e).unwrap();
    }

    let truth = (1..=25)
        .map(|i| 4.0 * f64::from(i))
        .chain(std::iter::repeat_n(100.0, 200));
    for (i, w) in truth.enumerate() {
        let z = w + 0.5 * noise.next_std();
        pipeline.process(&Sample::new(at(t0, i), z)).emit(&mut sink).unwrap();
        if !pipeline.pour_active() {
            break;
        }
    }

    let report = sink
        .events
        .iter()
        .find_map(|e| match e {
            PourEvent::Finished(r) => Some(r),
            _ => None,
        })
        .expect("pour never finished");
    assert_eq!(report.outcome, PourOutcome::Completed, "seed {seed}");
    let final_g = report.final_g.unwrap();
    assert!((final_g - 100.0).abs() <= 1.0, "seed {seed}: final {final_g}");
    let score = report.score.unwrap();
    assert!(score.accuracy > 0.98, "seed {seed}: {score:?}");
    assert!((0.0..=1.0).contains(&score.composite));
    let w = ScoreWeights::default();
    let weighted = w.accuracy * score.accuracy
        + w.stability * score.stability
        + w.responsiveness * score.responsiveness
        + w.overshoot * score.overshoot;
    assert!((score.composite - weighted).abs() < 1e-12, "seed {seed}: {score:?}");
}

#[rstest]
#[case(3)]
#[case(11)]
#[case(2024)]
fn smoothing_channels_reduce_noise(#[case] seed: u32) {
    let mut noise = Gauss::new(seed);
    let cfg = EngineCfg {
        stats_window: 200,
        pouring: None,
        ..EngineCfg::default()
    };
    let mut pipeline = Pipeline::new(&cfg).unwrap();
    let t0 = Instant::now();
    let mut last_stats = None;
    for i in 0..400 {
        let step = pipeline.process(&Sample::new(at(t0, i), 100.0 + 2.0 * noise.next_std()));
        if step.stats.is_some() {
            last_stats = step.stats;
        }
    }

    let stats = last_stats.expect("two full windows");
    assert_eq!(stats.samples, 200);
    for ch in stats.channels.iter().filter(|c| c.channel.is_weight()) {
        let reduction = ch.noise_reduction.unwrap();
        assert!(reduction > 0.2, "{}: {reduction}", ch.channel);
        assert!(ch.std_dev.unwrap() < stats.raw_std_dev.unwrap());
    }
    let velocity = stats
        .channels
        .iter()
        .find(|c| c.channel == Channel::KalmanPvVelocity)
        .unwrap();
    assert_eq!(velocity.noise_reduction, None);
}
