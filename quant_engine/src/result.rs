/// result.rs — Persisted backtest artifact
///
/// One binary file per run, schema-versioned with a 4-byte magic + 2-byte
/// version prefix, followed by a `bincode`-encoded
/// `BacktestResult`. Round-trip preserves every field exactly.
use std::io::{Read, Write};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::EngineEvent;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::portfolio::Trade;
use crate::types::DateRange;

const MAGIC: [u8; 4] = *b"QTWC";
const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub date_range: DateRange,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(NaiveDate, Decimal)>,
    pub metrics: Metrics,
    pub events: Vec<EngineEvent>,
}

impl BacktestResult {
    /// Write the magic + version header followed by a `bincode`-serialized
    /// copy of `self`.
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), EngineError> {
        w.write_all(&MAGIC)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("writing magic: {e}")))?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())
            .map_err(|e| EngineError::ArtifactCorrupt(format!("writing version: {e}")))?;
        let encoded = bincode::serialize(self)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("encoding result: {e}")))?;
        w.write_all(&encoded)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("writing body: {e}")))?;
        Ok(())
    }

    /// Validate the header and decode the body. A mismatched magic or an
    /// unknown version is `ArtifactCorrupt`, not a panic.
    pub fn read_from(r: &mut impl Read) -> Result<Self, EngineError> {
        let mut header = [0u8; 6];
        r.read_exact(&mut header)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("reading header: {e}")))?;
        if header[..4] != MAGIC {
            return Err(EngineError::ArtifactCorrupt(
                "result artifact magic mismatch".into(),
            ));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(EngineError::ArtifactCorrupt(format!(
                "unsupported result artifact version {version}"
            )));
        }
        let mut body = Vec::new();
        r.read_to_end(&mut body)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("reading body: {e}")))?;
        bincode::deserialize(&body)
            .map_err(|e| EngineError::ArtifactCorrupt(format!("decoding result: {e}")))
    }
}
