//! Rolling comparison of each filter output against the raw signal.

use std::collections::VecDeque;

use serde::Serialize;

use crate::error::PourError;
use crate::record::{Channel, FilterRecord};

#[derive(Debug, Clone, Copy)]
struct Row {
    raw: f64,
    /// NaN where the slot was stale.
    values: [f64; Channel::COUNT],
}

/// Per-channel figures over the current window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub channel: Channel,
    /// Fresh values in the window.
    pub samples: usize,
    pub std_dev: Option<f64>,
    /// `1 - sd(diff(channel)) / sd(diff(raw))`; positive means smoother than
    /// raw. Weight channels only.
    pub noise_reduction: Option<f64>,
    /// Mean `|channel - raw|`. Weight channels only.
    pub mean_abs_residual: Option<f64>,
    /// Stale records since construction.
    pub stale_total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub window: usize,
    pub samples: usize,
    pub raw_std_dev: Option<f64>,
    pub channels: Vec<ChannelStats>,
}

#[derive(Debug, Clone)]
pub struct FilterStats {
    window: usize,
    rows: VecDeque<Row>,
    stale_total: [u64; Channel::COUNT],
    observed: u64,
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> Option<f64> {
    let n = values.clone().count();
    if n < 2 {
        return None;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    Some(var.sqrt())
}

impl FilterStats {
    pub fn new(window: usize) -> Result<Self, PourError> {
        if window < 2 {
            return Err(PourError::config("stats window must be >= 2"));
        }
        Ok(Self {
            window,
            rows: VecDeque::with_capacity(window),
            stale_total: [0; Channel::COUNT],
            observed: 0,
        })
    }

    pub fn observe(&mut self, record: &FilterRecord) {
        self.observed += 1;
        let mut values = [f64::NAN; Channel::COUNT];
        for (i, (_, est)) in record.estimates.iter().enumerate() {
            if est.stale {
                self.stale_total[i] += 1;
            } else {
                values[i] = est.value;
            }
        }
        if !record.raw.is_finite() {
            return;
        }
        if self.rows.len() == self.window {
            self.rows.pop_front();
        }
        self.rows.push_back(Row {
            raw: record.raw,
            values,
        });
    }

    /// Records seen since construction, including skipped ones.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn summary(&self) -> StatsSummary {
        let raw_diffs: Vec<f64> = self
            .rows
            .iter()
            .zip(self.rows.iter().skip(1))
            .map(|(a, b)| b.raw - a.raw)
            .collect();
        let raw_diff_sd = std_dev(raw_diffs.iter().copied());

        let channels = Channel::ALL
            .iter()
            .enumerate()
            .map(|(i, &channel)| {
                let fresh = self.rows.iter().map(|r| r.values[i]).filter(|v| v.is_finite());
                let samples = fresh.clone().count();
                let std_dev_c = std_dev(fresh);

                let (noise_reduction, mean_abs_residual) = if channel.is_weight() {
                    let diffs = self
                        .rows
                        .iter()
                        .zip(self.rows.iter().skip(1))
                        .map(|(a, b)| b.values[i] - a.values[i])
                        .filter(|d| d.is_finite());
                    let reduction = match (std_dev(diffs), raw_diff_sd) {
                        (Some(c), Some(r)) if r > 0.0 => Some(1.0 - c / r),
                        _ => None,
                    };
                    let residuals = self
                        .rows
                        .iter()
                        .map(|r| (r.values[i] - r.raw).abs())
                        .filter(|d| d.is_finite());
                    let n = residuals.clone().count();
                    let residual = (n > 0).then(|| residuals.sum::<f64>() / n as f64);
                    (reduction, residual)
                } else {
                    (None, None)
                };

                ChannelStats {
                    channel,
                    samples,
                    std_dev: std_dev_c,
                    noise_reduction,
                    mean_abs_residual,
                    stale_total: self.stale_total[i],
                }
            })
            .collect();

        StatsSummary {
            window: self.window,
            samples: self.rows.len(),
            raw_std_dev: std_dev(self.rows.iter().map(|r| r.raw)),
            channels,
        }
    }
}
