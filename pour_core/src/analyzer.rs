//! Pour session tracking and scoring.
//!
//! The session lifecycle is `Idle -> Active -> {Completed | Aborted} -> Idle`.
//! [`transition`] is a pure function over [`PourState`]; [`PourAnalyzer`]
//! owns the current state, applies inputs and logs what happened.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::PourCfg;
use crate::error::{AbortReason, PourError};

/// One in-progress pour.
#[derive(Debug, Clone, PartialEq)]
pub struct PourSession {
    pub target_g: f64,
    pub started_at: Instant,
    /// Every filtered value observed since start, in arrival order.
    pub samples: Vec<(Instant, f64)>,
    /// Last `rate_window` samples for the slope estimate.
    recent: VecDeque<(Instant, f64)>,
    max_g: f64,
    reached_band_at: Option<Instant>,
    quiet_run: usize,
    last_rate: Option<f64>,
}

impl PourSession {
    fn new(target_g: f64, started_at: Instant) -> Self {
        Self {
            target_g,
            started_at,
            samples: Vec::new(),
            recent: VecDeque::new(),
            max_g: f64::NEG_INFINITY,
            reached_band_at: None,
            quiet_run: 0,
            last_rate: None,
        }
    }

    fn band_floor(&self, cfg: &PourCfg) -> f64 {
        self.target_g - cfg.tolerance_g
    }

    fn push(&mut self, at: Instant, value: f64, cfg: &PourCfg) {
        self.samples.push((at, value));
        self.recent.push_back((at, value));
        while self.recent.len() > cfg.rate_window {
            self.recent.pop_front();
        }
        self.max_g = self.max_g.max(value);
        if self.reached_band_at.is_none() && value >= self.band_floor(cfg) {
            self.reached_band_at = Some(at);
        }
        self.last_rate = least_squares_slope(&self.recent);
        match self.last_rate {
            Some(r) if r.abs() < cfg.rate_threshold_gps => self.quiet_run += 1,
            _ => self.quiet_run = 0,
        }
    }

    fn retarget(&mut self, target_g: f64, cfg: &PourCfg) {
        self.target_g = target_g;
        let floor = self.band_floor(cfg);
        self.reached_band_at = self
            .samples
            .iter()
            .find(|(_, v)| *v >= floor)
            .map(|(t, _)| *t);
    }

    pub fn is_stable(&self, cfg: &PourCfg) -> bool {
        self.quiet_run >= cfg.stability_window
    }

    pub fn last_value(&self) -> Option<f64> {
        self.samples.last().map(|(_, v)| *v)
    }

    pub fn rate_gps(&self) -> Option<f64> {
        self.last_rate
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    fn status(&self, now: Instant, cfg: &PourCfg) -> PourStatus {
        let current_g = self.last_value().unwrap_or(f64::NAN);
        PourStatus {
            target_g: self.target_g,
            current_g,
            progress: current_g / self.target_g,
            rate_gps: self.last_rate,
            stable: self.is_stable(cfg),
            elapsed_s: self.elapsed(now).as_secs_f64(),
            samples: self.samples.len(),
        }
    }

    fn report(&self, outcome: PourOutcome, now: Instant, cfg: &PourCfg) -> PourReport {
        let score = match outcome {
            PourOutcome::Completed | PourOutcome::Aborted(AbortReason::Stopped) => {
                score(self, cfg)
            }
            PourOutcome::Aborted(_) => None,
        };
        PourReport {
            outcome,
            target_g: self.target_g,
            final_g: self.last_value(),
            max_g: (!self.samples.is_empty()).then_some(self.max_g),
            elapsed_s: self.elapsed(now).as_secs_f64(),
            samples: self.samples.len(),
            score,
        }
    }
}

/// Slope in units per second of a least-squares line through `points`.
/// `None` with fewer than two points or no time spread.
pub fn least_squares_slope<'a, I>(points: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a (Instant, f64)>,
    I::IntoIter: Clone,
{
    let iter = points.into_iter();
    let (t0, _) = *iter.clone().next()?;
    let mut n = 0.0;
    let (mut st, mut sv) = (0.0, 0.0);
    for (t, v) in iter.clone() {
        n += 1.0;
        st += t.saturating_duration_since(t0).as_secs_f64();
        sv += v;
    }
    if n < 2.0 {
        return None;
    }
    let (mt, mv) = (st / n, sv / n);
    let (mut num, mut den) = (0.0, 0.0);
    for (t, v) in iter {
        let dt = t.saturating_duration_since(t0).as_secs_f64() - mt;
        num += dt * (v - mv);
        den += dt * dt;
    }
    (den > 0.0).then(|| num / den)
}

/// Component scores in `[0, 1]` and their weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PourScore {
    pub accuracy: f64,
    pub stability: f64,
    pub responsiveness: f64,
    pub overshoot: f64,
    pub composite: f64,
}

/// Score a session from its recorded samples. `None` if it saw no samples.
pub fn score(session: &PourSession, cfg: &PourCfg) -> Option<PourScore> {
    let final_g = session.last_value()?;
    let target = session.target_g;
    let unit = |x: f64| if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };

    let accuracy = unit(1.0 - (final_g - target).abs() / target);

    let tail_len = session.samples.len().min(cfg.stability_window);
    let tail = &session.samples[session.samples.len() - tail_len..];
    let mean = tail.iter().map(|(_, v)| v).sum::<f64>() / tail_len as f64;
    let var = tail.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / tail_len as f64;
    let stability = unit(1.0 - var.sqrt() / target);

    let responsiveness = match session.reached_band_at {
        Some(at) => {
            let took = at.saturating_duration_since(session.started_at).as_secs_f64();
            unit(1.0 - took / cfg.max_duration.as_secs_f64())
        }
        None => 0.0,
    };

    let overshoot = unit(1.0 - (session.max_g - target).max(0.0) / target);

    let w = &cfg.weights;
    let composite = unit(
        w.accuracy * accuracy
            + w.stability * stability
            + w.responsiveness * responsiveness
            + w.overshoot * overshoot,
    );
    Some(PourScore {
        accuracy,
        stability,
        responsiveness,
        overshoot,
        composite,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum PourOutcome {
    Completed,
    Aborted(AbortReason),
}

/// Final account of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PourReport {
    pub outcome: PourOutcome,
    pub target_g: f64,
    pub final_g: Option<f64>,
    pub max_g: Option<f64>,
    pub elapsed_s: f64,
    pub samples: usize,
    /// Present for completed and explicitly stopped sessions.
    pub score: Option<PourScore>,
}

/// Periodic snapshot while a session is active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PourStatus {
    pub target_g: f64,
    pub current_g: f64,
    pub progress: f64,
    pub rate_gps: Option<f64>,
    pub stable: bool,
    pub elapsed_s: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PourEvent {
    Started { target_g: f64 },
    Retargeted { from_g: f64, to_g: f64 },
    Progress(PourStatus),
    Finished(PourReport),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PourState {
    Idle,
    Active(Box<PourSession>),
    Completed(PourReport),
    Aborted(PourReport),
}

impl PourState {
    pub fn name(&self) -> &'static str {
        match self {
            PourState::Idle => "idle",
            PourState::Active(_) => "active",
            PourState::Completed(_) => "completed",
            PourState::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PourInput {
    Start { target_g: f64, at: Instant },
    Retarget { target_g: f64 },
    Stop { at: Instant },
    /// The sensor went silent.
    Stall { at: Instant },
    Sample { at: Instant, value: f64 },
}

/// Result of one [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PourState,
    pub events: Vec<PourEvent>,
    /// Condition worth a warning that did not stop the transition.
    pub warning: Option<PourError>,
}

impl Transition {
    fn quiet(state: PourState) -> Self {
        Self {
            state,
            events: Vec::new(),
            warning: None,
        }
    }
}

fn finish(session: &PourSession, outcome: PourOutcome, at: Instant, cfg: &PourCfg) -> Transition {
    let report = session.report(outcome, at, cfg);
    let events = vec![PourEvent::Finished(report.clone())];
    let state = match outcome {
        PourOutcome::Completed => PourState::Completed(report),
        PourOutcome::Aborted(_) => PourState::Aborted(report),
    };
    Transition {
        state,
        events,
        warning: None,
    }
}

fn valid_target(target_g: f64) -> Result<(), PourError> {
    if target_g.is_finite() && target_g > 0.0 {
        Ok(())
    } else {
        Err(PourError::config(format!(
            "pour target must be a finite value > 0, got {target_g}"
        )))
    }
}

/// Advance the session state machine by one input.
pub fn transition(state: PourState, input: PourInput, cfg: &PourCfg) -> Transition {
    match (state, input) {
        (state, PourInput::Start { target_g, .. } | PourInput::Retarget { target_g })
            if valid_target(target_g).is_err() =>
        {
            Transition {
                state,
                events: Vec::new(),
                warning: valid_target(target_g).err(),
            }
        }

        (PourState::Active(session), PourInput::Start { target_g, at }) => {
            let conflict = PourError::SessionConflict {
                active_target_g: session.target_g,
                requested_target_g: target_g,
            };
            let mut t = finish(&session, PourOutcome::Aborted(AbortReason::Superseded), at, cfg);
            t.events.push(PourEvent::Started { target_g });
            t.state = PourState::Active(Box::new(PourSession::new(target_g, at)));
            t.warning = Some(conflict);
            t
        }
        (_, PourInput::Start { target_g, at }) => Transition {
            state: PourState::Active(Box::new(PourSession::new(target_g, at))),
            events: vec![PourEvent::Started { target_g }],
            warning: None,
        },

        (PourState::Active(mut session), PourInput::Retarget { target_g }) => {
            let from_g = session.target_g;
            session.retarget(target_g, cfg);
            Transition {
                state: PourState::Active(session),
                events: vec![PourEvent::Retargeted {
                    from_g,
                    to_g: target_g,
                }],
                warning: None,
            }
        }

        (PourState::Active(session), PourInput::Stop { at }) => {
            finish(&session, PourOutcome::Aborted(AbortReason::Stopped), at, cfg)
        }
        (PourState::Active(session), PourInput::Stall { at }) => {
            finish(&session, PourOutcome::Aborted(AbortReason::SensorStall), at, cfg)
        }

        (PourState::Active(mut session), PourInput::Sample { at, value }) => {
            session.push(at, value, cfg);
            if value >= session.band_floor(cfg) && session.is_stable(cfg) {
                return finish(&session, PourOutcome::Completed, at, cfg);
            }
            if session.elapsed(at) >= cfg.timeout {
                return finish(&session, PourOutcome::Aborted(AbortReason::Timeout), at, cfg);
            }
            let mut events = Vec::new();
            if cfg.status_every > 0 && session.samples.len() % cfg.status_every == 0 {
                events.push(PourEvent::Progress(session.status(at, cfg)));
            }
            Transition {
                state: PourState::Active(session),
                events,
                warning: None,
            }
        }

        // A closed session is reported once; the next sample returns to idle.
        (PourState::Completed(_) | PourState::Aborted(_), PourInput::Sample { .. }) => {
            Transition::quiet(PourState::Idle)
        }

        (state, _) => Transition::quiet(state),
    }
}

/// Owns the pour state and applies inputs to it.
#[derive(Debug)]
pub struct PourAnalyzer {
    cfg: PourCfg,
    state: PourState,
}

impl PourAnalyzer {
    pub fn new(cfg: PourCfg) -> Result<Self, PourError> {
        validate(&cfg)?;
        Ok(Self {
            cfg,
            state: PourState::Idle,
        })
    }

    pub fn cfg(&self) -> &PourCfg {
        &self.cfg
    }

    pub fn state(&self) -> &PourState {
        &self.state
    }

    pub fn active(&self) -> Option<&PourSession> {
        match &self.state {
            PourState::Active(s) => Some(s),
            _ => None,
        }
    }

    pub fn start(&mut self, target_g: f64, at: Instant) -> Vec<PourEvent> {
        self.apply(PourInput::Start { target_g, at })
    }

    pub fn retarget(&mut self, target_g: f64) -> Vec<PourEvent> {
        self.apply(PourInput::Retarget { target_g })
    }

    pub fn stop(&mut self, at: Instant) -> Vec<PourEvent> {
        self.apply(PourInput::Stop { at })
    }

    pub fn stall(&mut self, at: Instant) -> Vec<PourEvent> {
        self.apply(PourInput::Stall { at })
    }

    pub fn observe(&mut self, at: Instant, value: f64) -> Vec<PourEvent> {
        self.apply(PourInput::Sample { at, value })
    }

    fn apply(&mut self, input: PourInput) -> Vec<PourEvent> {
        let state = std::mem::replace(&mut self.state, PourState::Idle);
        let from = state.name();
        let t = transition(state, input, &self.cfg);
        if let Some(w) = &t.warning {
            tracing::warn!(error = %w, "pour input");
        }
        if from != t.state.name() {
            tracing::debug!(from, to = t.state.name(), "pour state change");
        }
        for e in &t.events {
            match e {
                PourEvent::Started { target_g } => tracing::info!(target_g, "pour started"),
                PourEvent::Finished(r) => tracing::info!(
                    outcome = ?r.outcome,
                    target_g = r.target_g,
                    final_g = r.final_g,
                    composite = r.score.map(|s| s.composite),
                    "pour finished"
                ),
                _ => {}
            }
        }
        self.state = t.state;
        t.events
    }
}

fn validate(cfg: &PourCfg) -> Result<(), PourError> {
    if !(cfg.rate_threshold_gps.is_finite() && cfg.rate_threshold_gps > 0.0) {
        return Err(PourError::config("pouring: rate threshold must be > 0"));
    }
    if cfg.stability_window < 2 {
        return Err(PourError::config("pouring: stability window must be >= 2"));
    }
    if cfg.rate_window < 2 {
        return Err(PourError::config("pouring: rate window must be >= 2"));
    }
    if !(cfg.tolerance_g.is_finite() && cfg.tolerance_g >= 0.0) {
        return Err(PourError::config("pouring: tolerance must be >= 0"));
    }
    if cfg.max_duration.is_zero() || cfg.timeout.is_zero() {
        return Err(PourError::config(
            "pouring: max duration and timeout must be > 0",
        ));
    }
    let w = &cfg.weights;
    let parts = [w.accuracy, w.stability, w.responsiveness, w.overshoot];
    if parts.iter().any(|p| !(p.is_finite() && *p >= 0.0)) {
        return Err(PourError::config("pouring: weights must be >= 0"));
    }
    let sum: f64 = parts.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(PourError::config(format!(
            "pouring: weights must sum to 1.0, got {sum}"
        )));
    }
    Ok(())
}
