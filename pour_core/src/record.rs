//! Samples in, labeled records out.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

/// One raw measurement in grams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Instant, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Named output slot of the filter bank. The declaration order is the
/// record's key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    MovingAverage,
    ExponentialAverage,
    KalmanSimple,
    KalmanPvPosition,
    KalmanPvVelocity,
    Ekf,
    Ukf,
}

impl Channel {
    pub const COUNT: usize = 7;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::MovingAverage,
        Channel::ExponentialAverage,
        Channel::KalmanSimple,
        Channel::KalmanPvPosition,
        Channel::KalmanPvVelocity,
        Channel::Ekf,
        Channel::Ukf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::MovingAverage => "moving_average",
            Channel::ExponentialAverage => "exponential_average",
            Channel::KalmanSimple => "kalman_simple",
            Channel::KalmanPvPosition => "kalman_pv_position",
            Channel::KalmanPvVelocity => "kalman_pv_velocity",
            Channel::Ekf => "ekf",
            Channel::Ukf => "ukf",
        }
    }

    /// True for outputs measured in grams (everything except velocity).
    pub fn is_weight(&self) -> bool {
        !matches!(self, Channel::KalmanPvVelocity)
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown filter channel '{s}'"))
    }
}

/// One slot's value. `stale` means the owning filter failed on this sample
/// and `value` is its last valid output (NaN if it never produced one).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub value: f64,
    pub stale: bool,
}

impl Estimate {
    pub const UNSET: Estimate = Estimate {
        value: f64::NAN,
        stale: true,
    };

    pub fn fresh(value: f64) -> Self {
        Self {
            value,
            stale: false,
        }
    }

    pub(crate) fn into_stale(self) -> Self {
        Self {
            value: self.value,
            stale: true,
        }
    }
}

/// Exactly one estimate per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimates([Estimate; Channel::COUNT]);

impl Default for Estimates {
    fn default() -> Self {
        Self([Estimate::UNSET; Channel::COUNT])
    }
}

impl Estimates {
    pub fn get(&self, channel: Channel) -> Estimate {
        self.0[channel.index()]
    }

    pub(crate) fn set(&mut self, channel: Channel, estimate: Estimate) {
        self.0[channel.index()] = estimate;
    }

    pub(crate) fn mark_all_stale(&mut self) {
        for e in &mut self.0 {
            *e = e.into_stale();
        }
    }

    /// Channels in record order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, Estimate)> + '_ {
        Channel::ALL.into_iter().zip(self.0.iter().copied())
    }

    pub fn stale_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.iter().filter(|(_, e)| e.stale).map(|(c, _)| c)
    }
}

/// Serialized as `{ "moving_average": 1.0, ... }` in channel order.
/// Never-valid slots serialize as NaN, which JSON writers render as null.
impl Serialize for Estimates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Channel::COUNT))?;
        for (channel, estimate) in self.iter() {
            map.serialize_entry(channel.as_str(), &estimate.value)?;
        }
        map.end()
    }
}

/// Fan-in result for one raw sample. Handed downstream by shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRecord {
    pub timestamp: Instant,
    pub raw: f64,
    pub estimates: Estimates,
}

impl FilterRecord {
    pub fn estimate(&self, channel: Channel) -> Estimate {
        self.estimates.get(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_round_trip_through_from_str() {
        for c in Channel::ALL {
            assert_eq!(c.as_str().parse::<Channel>(), Ok(c));
        }
        assert!("kalman".parse::<Channel>().is_err());
    }

    #[test]
    fn all_is_in_declaration_order() {
        for (i, c) in Channel::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn default_estimates_are_unset_and_stale() {
        let e = Estimates::default();
        assert_eq!(e.stale_channels().count(), Channel::COUNT);
        assert!(e.get(Channel::Ukf).value.is_nan());
    }

    #[test]
    fn marking_stale_keeps_values() {
        let mut e = Estimates::default();
        e.set(Channel::Ekf, Estimate::fresh(4.0));
        e.mark_all_stale();
        assert_eq!(
            e.get(Channel::Ekf),
            Estimate {
                value: 4.0,
                stale: true
            }
        );
    }
}
