#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Multi-filter weight estimation and pour scoring (hardware-agnostic).
//!
//! Raw readings come in through `pour_traits::SampleSource`; everything
//! here is pure computation plus one sampler thread.
//!
//! ## Architecture
//!
//! - **Filters**: moving average, EMA, scalar Kalman, position–velocity
//!   Kalman, EKF and UKF behind one `Filter` trait (`filter` module)
//! - **Bank**: one of each filter, fixed update order, seven labeled
//!   outputs per sample with per-filter failure isolation (`bank`)
//! - **Analyzer**: pour session state machine and scoring (`analyzer`)
//! - **Statistics**: rolling per-channel noise figures (`stats`)
//! - **Pipeline / runner**: sampler thread, command handling, sink
//!   routing, stall and deadline accounting (`pipeline`, `runner`)
//!
//! Filter state is private to each filter. Records are handed downstream
//! by shared reference and never mutated after construction.

pub mod analyzer;
pub mod bank;
pub mod config;
pub mod conversions;
pub mod error;
pub mod filter;
pub mod mocks;
pub mod pipeline;
pub mod record;
pub mod runner;
pub mod sampler;
pub mod stats;
pub mod util;

pub use analyzer::{
    PourAnalyzer, PourEvent, PourInput, PourOutcome, PourReport, PourScore, PourSession,
    PourState, PourStatus, Transition, transition,
};
pub use bank::FilterBank;
pub use config::{
    BankCfg, EngineCfg, NoiseCfg, Pacing, PourCfg, SamplingCfg, ScoreWeights, UkfCfg,
    VectorKalmanCfg,
};
pub use error::{AbortReason, PourError, Report, Result};
pub use filter::{Filter, Reading};
pub use pipeline::{Command, Pipeline, Sink, Step, VecSink};
pub use record::{Channel, Estimate, Estimates, FilterRecord, Sample};
pub use runner::{ExitReason, RunControl, RunSummary, run, run_engine};
pub use sampler::Sampler;
pub use stats::{ChannelStats, FilterStats, StatsSummary};
