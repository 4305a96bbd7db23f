//! Single-consumer processing: sample -> bank -> analyzer -> sink.

use std::sync::Arc;
use std::time::Instant;

use crate::analyzer::{PourAnalyzer, PourEvent, PourState};
use crate::bank::FilterBank;
use crate::config::EngineCfg;
use crate::error::PourError;
use crate::filter::{MeasurementModel, ProcessModel};
use crate::record::{Channel, FilterRecord, Sample};
use crate::stats::{FilterStats, StatsSummary};

/// Operator commands, applied between two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Begin a pour. Without an explicit target the last `SetTarget` (or
    /// the configured default) is used.
    Start { target_g: Option<f64> },
    /// Remember a target for the next start; re-aims an active pour.
    SetTarget { target_g: f64 },
    Stop,
}

/// Downstream distribution seam.
pub trait Sink {
    fn record(&mut self, record: &FilterRecord) -> Result<(), PourError>;

    fn pour_event(&mut self, event: &PourEvent) -> Result<(), PourError>;

    /// Called once per full statistics window.
    fn stats(&mut self, _summary: &StatsSummary) -> Result<(), PourError> {
        Ok(())
    }
}

/// Collects everything in memory.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub records: Vec<FilterRecord>,
    pub events: Vec<PourEvent>,
    pub stats: Vec<StatsSummary>,
}

impl Sink for VecSink {
    fn record(&mut self, record: &FilterRecord) -> Result<(), PourError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn pour_event(&mut self, event: &PourEvent) -> Result<(), PourError> {
        self.events.push(event.clone());
        Ok(())
    }

    fn stats(&mut self, summary: &StatsSummary) -> Result<(), PourError> {
        self.stats.push(summary.clone());
        Ok(())
    }
}

/// Output of one processed sample.
#[derive(Debug, Clone)]
pub struct Step {
    pub record: FilterRecord,
    pub events: Vec<PourEvent>,
    /// Present when this sample closed a statistics window.
    pub stats: Option<StatsSummary>,
}

impl Step {
    /// Hand everything in this step to `sink`, record first.
    pub fn emit(&self, sink: &mut dyn Sink) -> Result<(), PourError> {
        sink.record(&self.record)?;
        for e in &self.events {
            sink.pour_event(e)?;
        }
        if let Some(s) = &self.stats {
            sink.stats(s)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Pipeline {
    bank: FilterBank,
    analyzer: Option<PourAnalyzer>,
    source: Channel,
    stats: FilterStats,
    stats_window: usize,
    default_target_g: Option<f64>,
    pending_target_g: Option<f64>,
    processed: u64,
    last_sample_at: Option<Instant>,
}

impl Pipeline {
    pub fn new(cfg: &EngineCfg) -> Result<Self, PourError> {
        Self::with_bank(FilterBank::new(&cfg.bank)?, cfg)
    }

    /// Pipeline whose EKF and UKF use a custom model pair.
    pub fn with_models(
        cfg: &EngineCfg,
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
    ) -> Result<Self, PourError> {
        Self::with_bank(FilterBank::with_models(&cfg.bank, process, measurement)?, cfg)
    }

    fn with_bank(bank: FilterBank, cfg: &EngineCfg) -> Result<Self, PourError> {
        let analyzer = cfg.pouring.clone().map(PourAnalyzer::new).transpose()?;
        let source = cfg
            .pouring
            .as_ref()
            .map_or(Channel::Ukf, |p| p.source);
        if !source.is_weight() {
            return Err(PourError::config(format!(
                "pouring source must be a weight channel, got {source}"
            )));
        }
        if let Some(t) = cfg.default_target_g {
            check_target(t)?;
        }
        Ok(Self {
            bank,
            analyzer,
            source,
            stats: FilterStats::new(cfg.stats_window)?,
            stats_window: cfg.stats_window,
            default_target_g: cfg.default_target_g,
            pending_target_g: None,
            processed: 0,
            last_sample_at: None,
        })
    }

    pub fn process(&mut self, sample: &Sample) -> Step {
        let record = self.bank.process(sample);
        self.stats.observe(&record);
        self.processed += 1;
        self.last_sample_at = Some(sample.timestamp);

        let mut events = Vec::new();
        if let Some(analyzer) = self.analyzer.as_mut() {
            let est = record.estimate(self.source);
            if !est.stale && est.value.is_finite() {
                events = analyzer.observe(sample.timestamp, est.value);
            }
        }

        let stats = (self.processed % self.stats_window as u64 == 0).then(|| {
            let summary = self.stats.summary();
            tracing::debug!(samples = summary.samples, "statistics window complete");
            summary
        });

        Step {
            record,
            events,
            stats,
        }
    }

    pub fn command(&mut self, cmd: Command, now: Instant) -> Result<Vec<PourEvent>, PourError> {
        tracing::debug!(?cmd, "command");
        match cmd {
            Command::SetTarget { target_g } => {
                check_target(target_g)?;
                self.pending_target_g = Some(target_g);
                match self.analyzer.as_mut() {
                    Some(a) if a.active().is_some() => Ok(a.retarget(target_g)),
                    _ => {
                        tracing::info!(target_g, "target set for next pour");
                        Ok(Vec::new())
                    }
                }
            }
            Command::Start { target_g } => {
                let target_g = target_g
                    .or(self.pending_target_g)
                    .or(self.default_target_g)
                    .ok_or_else(|| PourError::config("start without a target and no default"))?;
                check_target(target_g)?;
                let analyzer = self.analyzer_mut()?;
                Ok(analyzer.start(target_g, now))
            }
            Command::Stop => {
                let analyzer = self.analyzer_mut()?;
                if analyzer.active().is_none() {
                    tracing::debug!("stop without an active pour");
                }
                Ok(analyzer.stop(now))
            }
        }
    }

    /// Abort an active pour because the sensor went quiet.
    pub fn stall(&mut self, now: Instant) -> Vec<PourEvent> {
        match self.analyzer.as_mut() {
            Some(a) if a.active().is_some() => a.stall(now),
            _ => Vec::new(),
        }
    }

    fn analyzer_mut(&mut self) -> Result<&mut PourAnalyzer, PourError> {
        self.analyzer
            .as_mut()
            .ok_or_else(|| PourError::config("pouring analyzer is disabled"))
    }

    pub fn pour_state(&self) -> Option<&PourState> {
        self.analyzer.as_ref().map(PourAnalyzer::state)
    }

    pub fn pour_active(&self) -> bool {
        self.analyzer
            .as_ref()
            .is_some_and(|a| a.active().is_some())
    }

    pub fn pending_target_g(&self) -> Option<f64> {
        self.pending_target_g
    }

    pub fn stats(&self) -> StatsSummary {
        self.stats.summary()
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Timestamp of the most recently processed sample. Commands applied
    /// between samples belong at this point of the sample timeline.
    pub fn last_sample_at(&self) -> Option<Instant> {
        self.last_sample_at
    }
}

fn check_target(target_g: f64) -> Result<(), PourError> {
    if target_g.is_finite() && target_g > 0.0 {
        Ok(())
    } else {
        Err(PourError::config(format!(
            "target must be a finite value > 0, got {target_g}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::PourOutcome;
    use crate::config::PourCfg;
    use std::time::Duration;

    fn at(t0: Instant, i: u32) -> Instant {
        t0 + Duration::from_millis(100) * i
    }

    #[test]
    fn start_uses_pending_then_default_target() {
        let cfg = EngineCfg {
            default_target_g: Some(25.0),
            ..EngineCfg::default()
        };
        let mut p = Pipeline::new(&cfg).unwrap();
        let t0 = Instant::now();
        let ev = p.command(Command::Start { target_g: None }, t0).unwrap();
        assert_eq!(ev, vec![PourEvent::Started { target_g: 25.0 }]);
        p.command(Command::Stop, t0).unwrap();

        p.command(Command::SetTarget { target_g: 40.0 }, t0).unwrap();
        assert_eq!(p.pending_target_g(), Some(40.0));
        let ev = p.command(Command::Start { target_g: None }, t0).unwrap();
        assert_eq!(ev, vec![PourEvent::Started { target_g: 40.0 }]);
    }

    #[test]
    fn start_without_any_target_is_rejected() {
        let mut p = Pipeline::new(&EngineCfg::default()).unwrap();
        let err = p
            .command(Command::Start { target_g: None }, Instant::now())
            .unwrap_err();
        assert!(matches!(err, PourError::InvalidConfiguration(_)));
        assert!(!p.pour_active());
    }

    #[test]
    fn set_target_while_active_retargets() {
        let mut p = Pipeline::new(&EngineCfg::default()).unwrap();
        let t0 = Instant::now();
        p.command(Command::Start { target_g: Some(10.0) }, t0)
            .unwrap();
        let ev = p
            .command(Command::SetTarget { target_g: 12.0 }, t0)
            .unwrap();
        assert_eq!(
            ev,
            vec![PourEvent::Retargeted {
                from_g: 10.0,
                to_g: 12.0
            }]
        );
    }

    #[test]
    fn commands_fail_when_analyzer_disabled() {
        let cfg = EngineCfg {
            pouring: None,
            ..EngineCfg::default()
        };
        let mut p = Pipeline::new(&cfg).unwrap();
        assert!(
            p.command(Command::Start { target_g: Some(5.0) }, Instant::now())
                .is_err()
        );
        assert!(p.pour_state().is_none());
    }

    #[test]
    fn velocity_cannot_feed_the_analyzer() {
        let cfg = EngineCfg {
            pouring: Some(PourCfg {
                source: Channel::KalmanPvVelocity,
                ..PourCfg::default()
            }),
            ..EngineCfg::default()
        };
        assert!(Pipeline::new(&cfg).is_err());
    }

    #[test]
    fn full_pour_through_the_pipeline() {
        let cfg = EngineCfg {
            stats_window: 10,
            ..EngineCfg::default()
        };
        let mut p = Pipeline::new(&cfg).unwrap();
        let mut sink = VecSink::default();
        let t0 = Instant::now();
        p.command(Command::Start { target_g: Some(50.0) }, t0)
            .unwrap()
            .iter()
            .for_each(|e| sink.pour_event(e).unwrap());

        let profile = (1..=25)
            .map(|i| 2.0 * f64::from(i))
            .chain(std::iter::repeat_n(50.0, 300));
        for (i, v) in profile.enumerate() {
            let step = p.process(&Sample::new(at(t0, i as u32 + 1), v));
            step.emit(&mut sink).unwrap();
            if !p.pour_active() {
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
            .unwrap();
        assert_eq!(report.outcome, PourOutcome::Completed);
        assert!(report.score.unwrap().accuracy > 0.97);
        assert!(!sink.stats.is_empty());
        assert_eq!(sink.records.len() as u64, p.processed());
    }

    #[test]
    fn stall_aborts_active_pour_only() {
        let mut p = Pipeline::new(&EngineCfg::default()).unwrap();
        let t0 = Instant::now();
        assert!(p.stall(t0).is_empty());
        p.command(Command::Start { target_g: Some(5.0) }, t0)
            .unwrap();
        let ev = p.stall(t0);
        let stalled = PourOutcome::Aborted(crate::error::AbortReason::SensorStall);
        assert!(matches!(
            ev.as_slice(),
            [PourEvent::Finished(r)] if r.outcome == stalled
        ));
    }

    #[test]
    fn tracks_the_last_sample_time() {
        let mut p = Pipeline::new(&EngineCfg::default()).unwrap();
        assert_eq!(p.last_sample_at(), None);
        let t0 = Instant::now();
        p.process(&Sample::new(at(t0, 1), 1.0));
        p.process(&Sample::new(at(t0, 2), f64::NAN));
        assert_eq!(p.last_sample_at(), Some(at(t0, 2)));
    }
}
