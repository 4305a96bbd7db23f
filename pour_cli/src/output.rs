//! Sinks for the console and for replay CSV files.

use std::io::Write;
use std::time::Instant;

use pour_core::{
    Channel, FilterRecord, PourError, PourEvent, PourOutcome, PourReport, Sink, StatsSummary,
};
use serde_json::json;

fn sink_err(e: impl std::fmt::Display) -> PourError {
    PourError::Sink(e.to_string())
}

fn stale_list(record: &FilterRecord) -> Vec<&'static str> {
    record
        .estimates
        .stale_channels()
        .map(|c| c.as_str())
        .collect()
}

/// One-line human description of a finished pour.
pub fn describe_report(r: &PourReport) -> String {
    let outcome = match r.outcome {
        PourOutcome::Completed => "completed".to_string(),
        PourOutcome::Aborted(reason) => format!("aborted ({})", reason.as_str()),
    };
    let final_g = r
        .final_g
        .map_or_else(|| "-".to_string(), |g| format!("{g:.2} g"));
    let mut line = format!(
        "pour {outcome}: target {:.2} g, final {final_g}, {:.1} s, {} samples",
        r.target_g, r.elapsed_s, r.samples
    );
    if let Some(s) = r.score {
        line.push_str(&format!(
            "\n  score {:.3} (accuracy {:.3}, stability {:.3}, responsiveness {:.3}, overshoot {:.3})",
            s.composite, s.accuracy, s.stability, s.responsiveness, s.overshoot
        ));
    }
    line
}

/// JSON object for a pour event, tagged `"type": "pour"`.
pub fn event_json(event: &PourEvent) -> Result<serde_json::Value, PourError> {
    let mut v = serde_json::to_value(event).map_err(sink_err)?;
    if let Some(obj) = v.as_object_mut() {
        obj.insert("type".into(), "pour".into());
    }
    Ok(v)
}

/// JSON object for a statistics summary, tagged `"type": "stats"`.
pub fn stats_json(summary: &StatsSummary) -> Result<serde_json::Value, PourError> {
    let mut v = serde_json::to_value(summary).map_err(sink_err)?;
    if let Some(obj) = v.as_object_mut() {
        obj.insert("type".into(), "stats".into());
    }
    Ok(v)
}

fn opt(v: Option<f64>, prec: usize) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.prec$}"))
}

/// Per-channel table for a statistics summary.
pub fn describe_stats(summary: &StatsSummary) -> String {
    let mut out = format!(
        "filter statistics over {} samples (raw std dev {})\n",
        summary.samples,
        opt(summary.raw_std_dev, 4)
    );
    out.push_str(&format!(
        "  {:<20} {:>10} {:>10} {:>10} {:>6}\n",
        "channel", "std_dev", "noise_red", "residual", "stale"
    ));
    for c in &summary.channels {
        out.push_str(&format!(
            "  {:<20} {:>10} {:>10} {:>10} {:>6}\n",
            c.channel.as_str(),
            opt(c.std_dev, 4),
            opt(c.noise_reduction, 3),
            opt(c.mean_abs_residual, 4),
            c.stale_total
        ));
    }
    out
}

/// Writes pour events (and optionally every record) as JSON lines or text.
pub struct ConsoleSink<W: Write> {
    out: W,
    json: bool,
    records: bool,
    epoch: Instant,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, json: bool, records: bool, epoch: Instant) -> Self {
        Self {
            out,
            json,
            records,
            epoch,
        }
    }

    fn line(&mut self, s: &str) -> Result<(), PourError> {
        writeln!(self.out, "{s}").map_err(sink_err)
    }

    pub fn flush(&mut self) -> Result<(), PourError> {
        self.out.flush().map_err(sink_err)
    }
}

impl<W: Write> Sink for ConsoleSink<W> {
    fn record(&mut self, record: &FilterRecord) -> Result<(), PourError> {
        if !self.records {
            return Ok(());
        }
        let t_s = record
            .timestamp
            .saturating_duration_since(self.epoch)
            .as_secs_f64();
        if self.json {
            let v = json!({
                "type": "record",
                "t_s": t_s,
                "raw": record.raw,
                "estimates": record.estimates,
                "stale": stale_list(record),
            });
            self.line(&v.to_string())
        } else {
            let mut s = format!("{t_s:8.2}s raw {:9.3}", record.raw);
            for (channel, e) in record.estimates.iter() {
                let mark = if e.stale { "*" } else { "" };
                s.push_str(&format!(" {channel}={:.3}{mark}", e.value));
            }
            self.line(&s)
        }
    }

    fn pour_event(&mut self, event: &PourEvent) -> Result<(), PourError> {
        if self.json {
            let v = event_json(event)?;
            return self.line(&v.to_string());
        }
        let s = match event {
            PourEvent::Started { target_g } => format!("pour started: target {target_g:.2} g"),
            PourEvent::Retargeted { from_g, to_g } => {
                format!("target changed: {from_g:.2} g -> {to_g:.2} g")
            }
            PourEvent::Progress(st) => {
                let rate = st
                    .rate_gps
                    .map_or_else(|| "-".to_string(), |r| format!("{r:.2} g/s"));
                format!(
                    "  {:7.2} / {:.2} g ({:3.0}%) rate {rate}{}",
                    st.current_g,
                    st.target_g,
                    st.progress * 100.0,
                    if st.stable { " stable" } else { "" }
                )
            }
            PourEvent::Finished(r) => describe_report(r),
        };
        self.line(&s)
    }

    fn stats(&mut self, summary: &StatsSummary) -> Result<(), PourError> {
        if self.json {
            let v = stats_json(summary)?;
            return self.line(&v.to_string());
        }
        tracing::info!(
            samples = summary.samples,
            raw_std_dev = ?summary.raw_std_dev,
            "statistics window"
        );
        Ok(())
    }
}

/// CSV header for replay output.
pub fn csv_header() -> Vec<&'static str> {
    let mut h = vec!["t_s", "raw"];
    h.extend(Channel::ALL.iter().map(|c| c.as_str()));
    h.push("stale");
    h
}

fn cell(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

/// One CSV row per record; pour events are kept for the caller to report
/// afterwards.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    epoch: Instant,
    pub events: Vec<PourEvent>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W, epoch: Instant) -> Result<Self, PourError> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(csv_header()).map_err(sink_err)?;
        Ok(Self {
            writer,
            epoch,
            events: Vec::new(),
        })
    }

    pub fn flush(&mut self) -> Result<(), PourError> {
        self.writer.flush().map_err(sink_err)
    }
}

impl<W: Write> Sink for CsvSink<W> {
    fn record(&mut self, record: &FilterRecord) -> Result<(), PourError> {
        let t_s = record
            .timestamp
            .saturating_duration_since(self.epoch)
            .as_secs_f64();
        let mut row = vec![t_s.to_string(), cell(record.raw)];
        row.extend(record.estimates.iter().map(|(_, e)| cell(e.value)));
        row.push(stale_list(record).join(";"));
        self.writer.write_record(&row).map_err(sink_err)
    }

    fn pour_event(&mut self, event: &PourEvent) -> Result<(), PourError> {
        self.events.push(event.clone());
        Ok(())
    }
}
