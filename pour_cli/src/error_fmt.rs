//! Human-readable error descriptions and structured JSON error formatting.

use pour_core::PourError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(pe) = err.downcast_ref::<PourError>() {
        return match pe {
            PourError::InvalidConfiguration(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML, or a bad --target.\nHow to fix: Edit the config file or arguments, then rerun."
            ),
            PourError::NumericInstability { filter, detail } => format!(
                "What happened: The {filter} filter became numerically unstable ({detail}).\nLikely causes: Extreme readings or noise parameters far from the signal's scale.\nHow to fix: Check the sensor output and the [filters] noise settings."
            ),
            PourError::SessionConflict { .. } => format!(
                "What happened: {pe}.\nLikely causes: A start arrived while a pour was still active.\nHow to fix: Stop the active pour before starting another."
            ),
            PourError::Timeout => "What happened: The sensor stopped delivering samples.\nLikely causes: Disconnected scale, wrong port, or a read timeout set too low.\nHow to fix: Check the connection and consider raising sampling.read_timeout_ms / sampling.stall_ms.".to_string(),
            PourError::Sink(msg) => format!(
                "What happened: Output could not be written ({msg}).\nLikely causes: Closed pipe, full disk, or missing permissions.\nHow to fix: Check the output destination and retry."
            ),
        };
    }

    // String-based heuristics for errors coming from config or CSV loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("sample csv must have headers") {
        return "Invalid headers in sample CSV. Expected 't_s,value'.".to_string();
    }

    if lower.contains("goes backwards") || lower.contains("invalid csv row") {
        return format!(
            "What happened: The sample CSV is malformed ({msg}).\nLikely causes: Rows out of time order or non-numeric values.\nHow to fix: Sort the trace by t_s and make sure every row has two numbers."
        );
    }

    if lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: The config file is not valid TOML for this tool.\nDetails: {cause}\nHow to fix: Fix the syntax or the field types in the config file."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: configuration 2, output 3, sensor 4, anything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<PourError>() {
        Some(PourError::InvalidConfiguration(_)) => 2,
        Some(PourError::Sink(_)) => 3,
        Some(PourError::Timeout) => 4,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<PourError>() {
        Some(PourError::InvalidConfiguration(_)) => "InvalidConfiguration",
        Some(PourError::NumericInstability { .. }) => "NumericInstability",
        Some(PourError::SessionConflict { .. }) => "SessionConflict",
        Some(PourError::Timeout) => "Timeout",
        Some(PourError::Sink(_)) => "Sink",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}
