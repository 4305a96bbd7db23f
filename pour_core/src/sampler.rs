//! Background sensor sampling.
//!
//! Spawns a thread that owns the `SampleSource`, timestamps each reading
//! with the injected clock, pushes it through a bounded channel, and tracks
//! the last-ok time for stall detection. Fixed-rate and source-driven
//! pacing are supported.
//!
//! Each `Sampler` owns exactly one thread, which is shut down and joined
//! when the `Sampler` is dropped.
use crossbeam_channel as xch;
use pour_traits::SampleSource;
use pour_traits::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{Pacing, SamplingCfg};
use crate::record::Sample;

/// How long a full channel may block the sampler before it re-checks the
/// shutdown flag.
const SEND_RETRY: Duration = Duration::from_millis(50);

pub struct Sampler {
    rx: xch::Receiver<Sample>,
    last_ok: Arc<AtomicU64>,
    read_errors: Arc<AtomicU64>,
    epoch: Instant,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

/// Blocking send that gives up when the consumer is gone or shutdown is
/// requested. Returns false when the sampler should exit.
fn push(tx: &xch::Sender<Sample>, mut sample: Sample, shutdown: &AtomicBool) -> bool {
    loop {
        match tx.send_timeout(sample, SEND_RETRY) {
            Ok(()) => return true,
            Err(xch::SendTimeoutError::Timeout(s)) => {
                if shutdown.load(Ordering::Relaxed) {
                    return false;
                }
                tracing::trace!("sample channel full; waiting for consumer");
                sample = s;
            }
            Err(xch::SendTimeoutError::Disconnected(_)) => {
                tracing::debug!("Sampler consumer disconnected, exiting thread");
                return false;
            }
        }
    }
}

impl Sampler {
    pub fn spawn<S, C>(mut source: S, cfg: &SamplingCfg, clock: C) -> Self
    where
        S: SampleSource + Send + 'static,
        C: Clock + Send + 'static,
    {
        let (tx, rx) = xch::bounded(cfg.channel_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let read_errors = Arc::new(AtomicU64::new(0));
        let read_errors_clone = read_errors.clone();
        let timeout = cfg.read_timeout;
        // Source-driven reads block until data is ready; no extra sleep.
        let pause = match cfg.pacing {
            Pacing::Fixed(hz) => Some(crate::util::period(hz)),
            Pacing::SourceDriven => None,
        };
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("Sampler thread received shutdown signal");
                    break;
                }

                match source.read(timeout) {
                    Ok(value) => {
                        let sample = Sample::new(clock.now(), value);
                        last_ok_clone.store(clock.ms_since(epoch), Ordering::Relaxed);
                        if !push(&tx, sample, &shutdown_clone) {
                            break;
                        }
                    }
                    Err(e) => {
                        read_errors_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(error = %e, "sample read failed");
                    }
                }

                // Check shutdown before sleep to avoid unnecessary delay
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(p) = pause {
                    clock.sleep(p);
                }
            }
            tracing::trace!("Sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            read_errors,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Receiver for use in `select!`. Disconnects when the thread exits.
    pub fn receiver(&self) -> &xch::Receiver<Sample> {
        &self.rx
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Milliseconds since the last successful read, given the current time
    /// in milliseconds since `epoch()`.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between reads immediately, or once the current
        // source.read() returns (bounded by the read timeout).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("Sampler thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "Sampler thread panicked during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedSource;
    use pour_traits::ManualClock;

    fn cfg(pacing: Pacing) -> SamplingCfg {
        SamplingCfg {
            sample_rate_hz: 10,
            read_timeout: Duration::from_millis(5),
            stall: Duration::from_secs(1),
            channel_capacity: 4,
            pacing,
        }
    }

    #[test]
    fn fixed_pacing_stamps_samples_one_period_apart() {
        let clock = ManualClock::new();
        let origin = clock.origin();
        let sampler = Sampler::spawn(
            ScriptedSource::new([1.0, 2.0, 3.0]),
            &cfg(Pacing::Fixed(10)),
            clock,
        );
        let got: Vec<Sample> = sampler.receiver().iter().take(3).collect();
        assert_eq!(
            got.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
        for (i, s) in got.iter().enumerate() {
            assert_eq!(s.timestamp, origin + Duration::from_millis(100) * i as u32);
        }
    }

    #[test]
    fn source_driven_counts_read_errors() {
        let clock = ManualClock::new();
        let sampler = Sampler::spawn(
            ScriptedSource::new([7.0]),
            &cfg(Pacing::SourceDriven),
            clock,
        );
        let first = sampler
            .receiver()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(first.value, 7.0);
        let deadline = Instant::now() + Duration::from_secs(2);
        while sampler.read_errors() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(sampler.read_errors() > 0);
    }

    #[test]
    fn drop_joins_even_with_full_channel() {
        let clock = ManualClock::new();
        let sampler = Sampler::spawn(
            ScriptedSource::repeating(1.0),
            &cfg(Pacing::Fixed(1000)),
            clock,
        );
        std::thread::sleep(Duration::from_millis(20));
        drop(sampler);
    }

    #[test]
    fn stall_is_measured_from_last_ok() {
        let clock = ManualClock::new();
        let sampler = Sampler::spawn(
            ScriptedSource::new([1.0]),
            &cfg(Pacing::SourceDriven),
            clock,
        );
        sampler
            .receiver()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(sampler.stalled_for(250), 250);
        assert_eq!(sampler.stalled_for(0), 0);
    }
}
