//! Live loop: sampler thread -> pipeline -> sink, with commands in between.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel as xch;
use pour_traits::SampleSource;
use pour_traits::clock::Clock;

use crate::config::{EngineCfg, SamplingCfg};
use crate::error::{PourError, Result};
use crate::pipeline::{Command, Pipeline, Sink};
use crate::sampler::Sampler;
use crate::util::{as_millis_u64, period, period_ms};

/// How often the loop wakes without input to check stall and shutdown.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Compute the stall threshold in milliseconds.
///
/// The configured value is raised to at least two sampling periods (one
/// missed sample never trips it) and at least one read timeout (a single
/// slow read never trips it).
#[inline]
fn stall_threshold_ms(stall_ms: u64, read_timeout_ms: u64, period_ms: u64) -> u64 {
    stall_ms
        .max(two_periods_ms(period_ms))
        .max(read_timeout_ms)
        .max(1)
}

#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

/// Outside controls for one run.
pub struct RunControl {
    pub commands: xch::Receiver<Command>,
    pub shutdown: Arc<AtomicBool>,
    /// Stop after this many samples.
    pub max_samples: Option<u64>,
}

impl RunControl {
    /// No commands, no sample limit; runs until `shutdown` is set.
    pub fn until(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            commands: xch::never(),
            shutdown,
            max_samples: None,
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub samples: u64,
    pub commands: u64,
    pub rejected_commands: u64,
    pub pour_events: u64,
    pub missed_deadlines: u64,
    pub max_latency: Duration,
    pub total_latency: Duration,
    pub stalls: u64,
    pub read_errors: u64,
    pub filter_failures: u64,
}

impl RunSummary {
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.samples > 0).then(|| {
            let n = u32::try_from(self.samples).unwrap_or(u32::MAX);
            self.total_latency / n
        })
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    SampleLimit,
    SourceClosed,
}

fn emit_events(
    sink: &mut dyn Sink,
    events: &[crate::analyzer::PourEvent],
    summary: &mut RunSummary,
) -> Result<()> {
    for e in events {
        sink.pour_event(e).map_err(eyre::Report::new)?;
        summary.pour_events += 1;
    }
    Ok(())
}

/// Spawn the sampler for `source` and drive `pipeline` until shutdown, the
/// sample limit, or the sampler exits.
///
/// Commands are applied between samples and stamped with the timestamp of
/// the last processed sample (the sampler epoch before the first one), so
/// session timing stays on the sample timeline even when samples are queued.
/// A sensor silent for longer than
/// the stall threshold aborts an active pour once per silence. Sink
/// failures end the run with `PourError::Sink`. An active pour is stopped
/// (and scored) on exit.
pub fn run<S, C>(
    source: S,
    sampling: &SamplingCfg,
    pipeline: &mut Pipeline,
    sink: &mut dyn Sink,
    control: RunControl,
    clock: C,
) -> Result<(RunSummary, ExitReason)>
where
    S: SampleSource + Send + 'static,
    C: Clock + Clone + Send + 'static,
{
    if sampling.sample_rate_hz == 0 {
        return Err(eyre::Report::new(PourError::config(
            "sample rate must be > 0",
        )));
    }
    let deadline = period(sampling.sample_rate_hz);
    let stall_ms = stall_threshold_ms(
        as_millis_u64(sampling.stall),
        as_millis_u64(sampling.read_timeout),
        period_ms(sampling.sample_rate_hz),
    );
    let sampler = Sampler::spawn(source, sampling, clock.clone());
    let samples_rx = sampler.receiver().clone();
    let commands = control.commands;
    let closed = xch::never::<Command>();
    let mut commands_open = true;
    let mut summary = RunSummary::default();
    let mut stalled = false;

    tracing::info!(
        hz = sampling.sample_rate_hz,
        pacing = ?sampling.pacing,
        stall_ms,
        "pipeline start"
    );

    let exit = 'run: loop {
        if control.shutdown.load(Ordering::Relaxed) {
            break 'run ExitReason::Shutdown;
        }

        let commands_rx = if commands_open { &commands } else { &closed };
        xch::select! {
            recv(samples_rx) -> msg => match msg {
                Ok(sample) => {
                    let began = clock.now();
                    let step = pipeline.process(&sample);
                    step.emit(sink).map_err(eyre::Report::new)?;
                    let latency = clock.now().saturating_duration_since(began);

                    summary.samples += 1;
                    summary.pour_events += step.events.len() as u64;
                    summary.total_latency += latency;
                    summary.max_latency = summary.max_latency.max(latency);
                    if latency > deadline {
                        summary.missed_deadlines += 1;
                        tracing::debug!(?latency, ?deadline, "processing missed soft deadline");
                    }
                    if stalled {
                        tracing::info!("sensor recovered");
                        stalled = false;
                    }
                    if control.max_samples.is_some_and(|m| summary.samples >= m) {
                        break 'run ExitReason::SampleLimit;
                    }
                }
                Err(_) => break 'run ExitReason::SourceClosed,
            },
            recv(commands_rx) -> msg => match msg {
                Ok(cmd) => {
                    summary.commands += 1;
                    let at = pipeline.last_sample_at().unwrap_or(sampler.epoch());
                    match pipeline.command(cmd, at) {
                        Ok(events) => emit_events(sink, &events, &mut summary)?,
                        Err(e) => {
                            summary.rejected_commands += 1;
                            tracing::warn!(error = %e, ?cmd, "command rejected");
                        }
                    }
                }
                Err(_) => {
                    tracing::debug!("command channel closed");
                    commands_open = false;
                }
            },
            default(IDLE_POLL) => {}
        }

        let silent_ms = sampler.stalled_for(clock.ms_since(sampler.epoch()));
        if !stalled && silent_ms > stall_ms {
            stalled = true;
            summary.stalls += 1;
            tracing::warn!(
                error = %PourError::Timeout,
                silent_ms,
                "sensor stalled"
            );
            let events = pipeline.stall(clock.now());
            emit_events(sink, &events, &mut summary)?;
        }
    };

    if pipeline.pour_active() {
        let at = pipeline.last_sample_at().unwrap_or(sampler.epoch());
        let events = pipeline
            .command(Command::Stop, at)
            .map_err(eyre::Report::new)?;
        emit_events(sink, &events, &mut summary)?;
    }

    summary.read_errors = sampler.read_errors();
    summary.filter_failures = pipeline.bank().failures();
    tracing::info!(
        samples = summary.samples,
        missed_deadlines = summary.missed_deadlines,
        stalls = summary.stalls,
        reason = ?exit,
        "pipeline stop"
    );
    Ok((summary, exit))
}

/// Convenience for a full engine config.
pub fn run_engine<S, C>(
    source: S,
    cfg: &EngineCfg,
    sink: &mut dyn Sink,
    control: RunControl,
    clock: C,
) -> Result<(RunSummary, ExitReason)>
where
    S: SampleSource + Send + 'static,
    C: Clock + Clone + Send + 'static,
{
    let mut pipeline = Pipeline::new(cfg).map_err(eyre::Report::new)?;
    run(source, &cfg.sampling, &mut pipeline, sink, control, clock)
}
