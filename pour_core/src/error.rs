use serde::Serialize;
use thiserror::Error;

/// Why a pour session ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Explicit stop command.
    Stopped,
    /// Session exceeded `pouring.timeout_s`.
    Timeout,
    /// A new start arrived while this session was active.
    Superseded,
    /// The sensor stopped delivering samples.
    SensorStall,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::Stopped => "stopped",
            AbortReason::Timeout => "timeout",
            AbortReason::Superseded => "superseded",
            AbortReason::SensorStall => "sensor_stall",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PourError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("numeric instability in {filter}: {detail}")]
    NumericInstability {
        filter: &'static str,
        detail: String,
    },
    #[error(
        "session conflict: start toward {requested_target_g} g while pouring toward {active_target_g} g"
    )]
    SessionConflict {
        active_target_g: f64,
        requested_target_g: f64,
    },
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("sink error: {0}")]
    Sink(String),
}

impl PourError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PourError::InvalidConfiguration(msg.into())
    }

    pub(crate) fn unstable(filter: &'static str, detail: impl Into<String>) -> Self {
        PourError::NumericInstability {
            filter,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
