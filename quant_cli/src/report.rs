/// report.rs — Terminal and artifact reporting for a finished run
///
/// Prints the `Metrics` banner (via its own `Display` impl) plus a short
/// per-event summary, and persists the full `BacktestResult` to
/// `RESULT_PATH` using the schema-versioned binary format.
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use quant_engine::{BacktestResult, EngineEvent};
use tracing::info;

pub fn print_summary(result: &BacktestResult) {
    println!("{}", result.metrics);

    let events = &result.events;
    let skipped = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::SkippedInsufficientCash { .. }))
        .count();
    let clamped = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PolicyViolationClamped { .. }))
        .count();
    let retried = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::BarFetchRetried { .. }))
        .count();
    if skipped + clamped + retried > 0 {
        println!(
            "  events: {skipped} skipped (insufficient cash), {clamped} weight clamped, {retried} bar fetch retries"
        );
    }
}

pub fn write_artifact(result: &BacktestResult, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating result artifact at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    result
        .write_to(&mut writer)
        .map_err(|e| anyhow::anyhow!("writing result artifact: {e}"))?;
    info!(path = %path.display(), "result artifact written");
    Ok(())
}
