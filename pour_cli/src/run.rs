//! `pour run`: live pipeline over the simulated scale.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crossbeam_channel as xch;
use eyre::Result;
use pour_core::{Command, EngineCfg, ExitReason, Pipeline, RunControl, RunSummary};
use pour_traits::clock::{Clock, ManualClock, MonotonicClock};
use serde_json::json;

use crate::output::ConsoleSink;
use crate::sim::SimulatedScale;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub target: Option<f64>,
    pub samples: Option<u64>,
    pub rate_gps: f64,
    pub fill_g: Option<f64>,
    pub noise_g: f64,
    pub seed: u32,
    pub fast: bool,
    pub stdin: bool,
    pub records: bool,
}

/// Parse one operator line: `start [grams]`, `target <grams>`, `stop`.
/// Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    if verb.starts_with('#') {
        return Ok(None);
    }
    let grams = |w: Option<&str>| -> Result<Option<f64>, String> {
        w.map(|s| {
            s.parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number of grams"))
        })
        .transpose()
    };
    let cmd = match verb.to_ascii_lowercase().as_str() {
        "start" => Command::Start {
            target_g: grams(words.next())?,
        },
        "target" | "set_target" => Command::SetTarget {
            target_g: grams(words.next())?.ok_or("target needs a value in grams")?,
        },
        "stop" => Command::Stop,
        other => return Err(format!("unknown command '{other}'")),
    };
    if let Some(extra) = words.next() {
        return Err(format!("unexpected '{extra}' after {verb}"));
    }
    Ok(Some(cmd))
}

/// Forward stdin lines as commands until EOF. The thread is detached; it
/// dies with the process if stdin never closes.
fn spawn_stdin_reader(tx: xch::Sender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(input = %line.trim(), error = %e, "ignoring command"),
            }
        }
        tracing::debug!("stdin closed");
    });
}

fn exit_name(exit: ExitReason) -> &'static str {
    match exit {
        ExitReason::Shutdown => "shutdown",
        ExitReason::SampleLimit => "sample_limit",
        ExitReason::SourceClosed => "source_closed",
    }
}

fn summary_json(s: &RunSummary, exit: ExitReason) -> serde_json::Value {
    json!({
        "type": "summary",
        "exit": exit_name(exit),
        "samples": s.samples,
        "commands": s.commands,
        "rejected_commands": s.rejected_commands,
        "pour_events": s.pour_events,
        "missed_deadlines": s.missed_deadlines,
        "mean_latency_us": s.mean_latency().map(|d| d.as_micros() as u64),
        "max_latency_us": s.max_latency.as_micros() as u64,
        "stalls": s.stalls,
        "read_errors": s.read_errors,
        "filter_failures": s.filter_failures,
    })
}

fn drive<C>(
    engine: &EngineCfg,
    args: &RunArgs,
    json: bool,
    shutdown: Arc<AtomicBool>,
    clock: C,
) -> Result<(RunSummary, ExitReason)>
where
    C: Clock + Clone + Send + 'static,
{
    let fill_g = args
        .fill_g
        .or(args.target)
        .or(engine.default_target_g)
        .unwrap_or(100.0);
    let source = SimulatedScale::new(
        args.rate_gps,
        fill_g,
        args.noise_g,
        engine.sampling.sample_rate_hz,
        args.seed,
    );

    let (tx, rx) = xch::unbounded();
    if let Some(target_g) = args.target {
        tx.send(Command::Start {
            target_g: Some(target_g),
        })?;
    }
    if args.stdin {
        spawn_stdin_reader(tx);
    } else {
        drop(tx);
    }

    let mut pipeline = Pipeline::new(engine)?;
    let stdout = std::io::stdout().lock();
    let mut sink = ConsoleSink::new(stdout, json, args.records, clock.now());
    let control = RunControl {
        commands: rx,
        shutdown,
        max_samples: args.samples,
    };
    tracing::info!(fill_g, rate_gps = args.rate_gps, fast = args.fast, "simulated run");
    let result = pour_core::run(
        source,
        &engine.sampling,
        &mut pipeline,
        &mut sink,
        control,
        clock,
    )?;
    sink.flush()?;
    Ok(result)
}

pub fn run_live(
    engine: &EngineCfg,
    args: &RunArgs,
    json: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (summary, exit) = if args.fast {
        drive(engine, args, json, shutdown, ManualClock::new())?
    } else {
        drive(engine, args, json, shutdown, MonotonicClock::new())?
    };

    if json {
        println!("{}", summary_json(&summary, exit));
    } else {
        println!(
            "{} samples, {} pour events, {} missed deadlines, {} stalls ({})",
            summary.samples,
            summary.pour_events,
            summary.missed_deadlines,
            summary.stalls,
            exit_name(exit)
        );
        if let Some(mean) = summary.mean_latency() {
            println!(
                "latency mean {} us, max {} us",
                mean.as_micros(),
                summary.max_latency.as_micros()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("start", Some(Command::Start { target_g: None }))]
    #[case("start 18.5", Some(Command::Start { target_g: Some(18.5) }))]
    #[case("  TARGET 40 ", Some(Command::SetTarget { target_g: 40.0 }))]
    #[case("set_target 7", Some(Command::SetTarget { target_g: 7.0 }))]
    #[case("stop", Some(Command::Stop))]
    #[case("", None)]
    #[case("# comment", None)]
    fn parses_operator_lines(#[case] line: &str, #[case] expected: Option<Command>) {
        assert_eq!(parse_command(line), Ok(expected));
    }

    #[rstest]
    #[case("pour 5")]
    #[case("target")]
    #[case("target abc")]
    #[case("stop now")]
    fn rejects_bad_lines(#[case] line: &str) {
        assert!(parse_command(line).is_err());
    }

    #[test]
    fn summary_json_names_the_exit() {
        let v = summary_json(&RunSummary::default(), ExitReason::SampleLimit);
        assert_eq!(v["exit"], "sample_limit");
        assert_eq!(v["mean_latency_us"], serde_json::Value::Null);
    }
}
