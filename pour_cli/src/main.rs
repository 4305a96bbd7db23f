mod cli;
mod error_fmt;
mod output;
mod replay;
mod run;
mod sim;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::{Result, WrapErr};
use pour_core::{EngineCfg, Pipeline, PourError, Sample};
use pour_traits::SampleSource;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::RunArgs;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = real_main(cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    color_eyre::install()?;
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cli.log_level, cli.json, &cfg.logging)?;
    let engine = EngineCfg::from(&cfg);

    match cli.cmd {
        Commands::Run {
            target,
            samples,
            rate_gps,
            fill_g,
            noise_g,
            seed,
            fast,
            stdin,
            records,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                tracing::warn!(error = %e, "failed to install Ctrl-C handler");
            }
            let args = RunArgs {
                target,
                samples,
                rate_gps,
                fill_g,
                noise_g,
                seed,
                fast,
                stdin,
                records,
            };
            run::run_live(&engine, &args, cli.json, shutdown)
        }
        Commands::Replay {
            input,
            output,
            target,
        } => {
            let outcome = replay::replay(&engine, &input, output.as_deref(), target)?;
            replay::print_outcome(&outcome, cli.json, output.is_none())
        }
        Commands::SelfCheck => {
            self_check(&engine)?;
            if cli.json {
                println!("{}", serde_json::json!({ "type": "self_check", "ok": true }));
            } else {
                println!("OK");
            }
            Ok(())
        }
    }
}

/// Read, parse, and validate the config; defaults when no path is given.
fn load_config(path: Option<&Path>) -> Result<pour_config::Config> {
    let Some(path) = path else {
        return Ok(pour_config::Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = pour_config::load_toml(&text).wrap_err("parse config TOML")?;
    cfg.validate()
        .map_err(|e| PourError::InvalidConfiguration(e.to_string()))?;
    Ok(cfg)
}

fn init_tracing(level: &str, json: bool, logging: &pour_config::Logging) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid log level '{level}'"))?,
    };
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);
    if json {
        layers.push(console.json().with_filter(console_filter).boxed());
    } else {
        layers.push(console.with_filter(console_filter).boxed());
    }

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file '{file}' has no file name"))?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
            .wrap_err("invalid logging.level")?;
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

/// Build every filter from the config and push a short simulated pour
/// through the pipeline; any stale channel or filter failure is an error.
fn self_check(engine: &EngineCfg) -> Result<()> {
    let mut pipeline = Pipeline::new(engine)?;
    let hz = engine.sampling.sample_rate_hz;
    let mut scale = sim::SimulatedScale::new(4.0, 20.0, 0.2, hz, 7);
    let period = pour_core::util::period(hz);
    let t0 = Instant::now();
    for i in 1..=100u32 {
        let value = scale
            .read(Duration::from_millis(10))
            .map_err(|e| eyre::eyre!("simulated read failed: {e}"))?;
        let step = pipeline.process(&Sample::new(t0 + period * i, value));
        if let Some(channel) = step.record.estimates.stale_channels().next() {
            eyre::bail!("self-check: {channel} went stale at sample {i}");
        }
    }
    let failures = pipeline.bank().failures();
    if failures > 0 {
        eyre::bail!("self-check: {failures} filter failures");
    }
    tracing::info!(
        filters = ?pipeline.bank().order().collect::<Vec<_>>(),
        "self-check passed"
    );
    Ok(())
}
