/// error.rs — Centralised error taxonomy
///
/// Every identifier named in the error-handling design maps to exactly one
/// variant here. Fatal variants are returned as `Err(EngineError)`; local
/// recoverable conditions (a missing score, a skipped buy, a clamped weight)
/// are never constructed as an `Err` — they are logged and recorded as an
/// `EngineEvent` on the run (see `backtest::EngineEvent`), per the
/// propagation policy: only `ArtifactMissing`, `ArtifactCorrupt`,
/// `BarDataInvalid`, and post-budget `BarFetch*` ever leave the engine.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("score artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("score artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    #[error("score artifact has zero rows: {0}")]
    Empty(String),

    #[error("score artifact key/column structure invalid: {0}")]
    FormatInvalid(String),

    #[error("bar fetch failed for {instrument}: {reason}")]
    BarFetchFailed { instrument: String, reason: String },

    #[error("bar fetch timed out for {instrument} after {deadline_ms}ms")]
    BarFetchTimeout { instrument: String, deadline_ms: u64 },

    #[error("bar data invalid for {instrument} at {timestamp}: {reason}")]
    BarDataInvalid {
        instrument: String,
        timestamp: String,
        reason: String,
    },

    #[error("run canceled at {0}")]
    Canceled(String),
}
