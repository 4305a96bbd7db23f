//! `pour replay`: run a recorded trace through the pipeline offline.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use pour_core::{Command, EngineCfg, Pipeline, PourEvent, PourReport, Sample, Sink, StatsSummary};

use crate::output::{CsvSink, describe_report, describe_stats, event_json, stats_json};

/// Everything a replay produced besides the CSV rows.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub samples: usize,
    pub reports: Vec<PourReport>,
    pub stats: StatsSummary,
    pub filter_failures: u64,
}

fn offset(t_s: f64, line: usize) -> Result<Duration> {
    Duration::try_from_secs_f64(t_s)
        .wrap_err_with(|| format!("CSV row {line}: t_s {t_s} out of range"))
}

/// Replay `input` into CSV at `output` (stdout when `None`). With a
/// target, a pour starts at the first row and is stopped at the last one if
/// it is still active.
pub fn replay(
    engine: &EngineCfg,
    input: &Path,
    output: Option<&Path>,
    target_g: Option<f64>,
) -> Result<ReplayOutcome> {
    let rows = pour_config::load_samples_csv(input)?;
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        eyre::bail!("sample CSV {} has no rows", input.display());
    };
    let mut pipeline = Pipeline::new(engine)?;
    let t0 = Instant::now();

    let out: Box<dyn Write> = match output {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).wrap_err_with(|| format!("create output CSV {}", p.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut sink = CsvSink::new(out, t0)?;

    if let Some(target_g) = target_g {
        let events = pipeline.command(
            Command::Start {
                target_g: Some(target_g),
            },
            t0 + offset(first.t_s, 2)?,
        )?;
        for e in &events {
            sink.pour_event(e)?;
        }
    }

    for (i, row) in rows.iter().enumerate() {
        let at = t0 + offset(row.t_s, i + 2)?;
        pipeline.process(&Sample::new(at, row.value)).emit(&mut sink)?;
    }

    if pipeline.pour_active() {
        let end = t0 + offset(last.t_s, rows.len() + 1)?;
        for e in &pipeline.command(Command::Stop, end)? {
            sink.pour_event(e)?;
        }
    }
    sink.flush()?;

    let reports = sink
        .events
        .iter()
        .filter_map(|e| match e {
            PourEvent::Finished(r) => Some(r.clone()),
            _ => None,
        })
        .collect();
    tracing::info!(samples = rows.len(), "replay complete");
    Ok(ReplayOutcome {
        samples: rows.len(),
        reports,
        stats: pipeline.stats(),
        filter_failures: pipeline.bank().failures(),
    })
}

/// Print the outcome; to stderr when the CSV itself went to stdout.
pub fn print_outcome(outcome: &ReplayOutcome, json: bool, to_stderr: bool) -> Result<()> {
    let mut text = String::new();
    if json {
        for r in &outcome.reports {
            text.push_str(&event_json(&PourEvent::Finished(r.clone()))?.to_string());
            text.push('\n');
        }
        text.push_str(&stats_json(&outcome.stats)?.to_string());
        text.push('\n');
    } else {
        text.push_str(&format!(
            "replayed {} samples ({} filter failures)\n",
            outcome.samples, outcome.filter_failures
        ));
        for r in &outcome.reports {
            text.push_str(&describe_report(r));
            text.push('\n');
        }
        text.push_str(&describe_stats(&outcome.stats));
    }
    if to_stderr {
        eprint!("{text}");
    } else {
        print!("{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pour_core::PourOutcome;

    fn trace(dir: &Path, rows: impl IntoIterator<Item = (f64, f64)>) -> std::path::PathBuf {
        let p = dir.join("trace.csv");
        let mut f = File::create(&p).unwrap();
        writeln!(f, "t_s,value").unwrap();
        for (t, v) in rows {
            writeln!(f, "{t},{v}").unwrap();
        }
        p
    }

    #[test]
    fn replay_writes_one_row_per_sample_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let profile = (0..250).map(|i| {
            let t = f64::from(i) * 0.1;
            (t, (2.0 * f64::from(i)).min(50.0))
        });
        let input = trace(dir.path(), profile);
        let output = dir.path().join("out.csv");

        let outcome = replay(&EngineCfg::default(), &input, Some(&output), Some(50.0)).unwrap();
        assert_eq!(outcome.samples, 250);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].outcome, PourOutcome::Completed);

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.lines().count(), 251);
    }

    #[test]
    fn empty_trace_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = trace(dir.path(), []);
        let err = replay(&EngineCfg::default(), &input, None, None).unwrap_err();
        assert!(err.to_string().contains("no rows"));
    }
}
