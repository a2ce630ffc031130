/// bar.rs — OHLCV bars and the external Bar Store capability
///
/// `Bar` is produced by a `BarStore` and never mutated downstream; the
/// engine holds only its iteration cursor, never the whole series, so an
/// implementation may stream arbitrarily long histories.
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::InstrumentCode;

/// Sampling period a `BarStore` can be asked for. Only `DAY` is exercised by
/// the backtest engine today; the finer-grained variants are accepted by
/// `BarStore::bars` so a real implementation can serve them, even though this
/// engine's scheduling model only ever requests `DAY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Day,
    Week,
    Month,
    Min1,
    Min5,
    Min15,
    Min30,
    Min60,
}

/// One OHLCV observation. `high >= max(open, close)` and
/// `low <= min(open, close)` are checked by `validate`, not at construction,
/// so a `BarStore` can build a batch and let the engine surface
/// `BarDataInvalid` with full run context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: InstrumentCode,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub amount: Decimal,
}

impl Bar {
    pub fn validate(&self) -> Result<(), EngineError> {
        let hi_ok = self.high >= self.open.max(self.close);
        let lo_ok = self.low <= self.open.min(self.close);
        if !hi_ok || !lo_ok || self.volume < Decimal::ZERO {
            return Err(EngineError::BarDataInvalid {
                instrument: self.instrument.to_string(),
                timestamp: self.timestamp.to_string(),
                reason: format!(
                    "OHLCV invariant violated: o={} h={} l={} c={} v={}",
                    self.open, self.high, self.low, self.close, self.volume
                ),
            });
        }
        Ok(())
    }

    pub fn date(&self) -> chrono::NaiveDate {
        self.timestamp.date()
    }
}

/// Capability interface satisfied by a real market-data provider and by test
/// doubles alike — an explicit interface, not a runtime nil-backend branch.
pub trait BarStore: Send + Sync {
    /// Ordered bars for one instrument over a date range, at the given
    /// period. Implementations must return bars in non-decreasing
    /// timestamp order.
    fn bars(
        &self,
        instrument: InstrumentCode,
        range: crate::types::DateRange,
        period: Period,
    ) -> Result<Vec<Bar>, EngineError>;

    /// All instruments known for a market (e.g. `"sh"`).
    fn instruments(&self, market: &str) -> Result<Vec<InstrumentCode>, EngineError>;

    /// Members of a named index (e.g. `"csi300"`).
    fn members(&self, index_name: &str) -> Result<Vec<InstrumentCode>, EngineError>;
}

/// In-memory `BarStore` used by tests and by small offline backtests where
/// the whole universe's history fits in memory. Not used by the production
/// CLI path, which reads bars from `DATA_PATH` instead.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBarStore {
    bars: Vec<Bar>,
}

impl InMemoryBarStore {
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| (b.timestamp, b.instrument));
        Self { bars }
    }
}

impl BarStore for InMemoryBarStore {
    fn bars(
        &self,
        instrument: InstrumentCode,
        range: crate::types::DateRange,
        _period: Period,
    ) -> Result<Vec<Bar>, EngineError> {
        Ok(self
            .bars
            .iter()
            .filter(|b| b.instrument == instrument && range.contains(b.date()))
            .copied()
            .collect())
    }

    fn instruments(&self, _market: &str) -> Result<Vec<InstrumentCode>, EngineError> {
        let mut seen: Vec<InstrumentCode> = self.bars.iter().map(|b| b.instrument).collect();
        seen.sort();
        seen.dedup();
        Ok(seen)
    }

    fn members(&self, _index_name: &str) -> Result<Vec<InstrumentCode>, EngineError> {
        self.instruments("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn bar(close: &str) -> Bar {
        let c = Decimal::from_str(close).unwrap();
        Bar {
            instrument: InstrumentCode::parse("sh600000").unwrap(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: Decimal::ONE,
            amount: Decimal::ONE,
        }
    }

    #[test]
    fn flat_bar_is_valid() {
        assert!(bar("10.00").validate().is_ok());
    }

    #[test]
    fn high_below_close_is_invalid() {
        let mut b = bar("10.00");
        b.high = Decimal::from_str("9.00").unwrap();
        assert!(b.validate().is_err());
    }

    #[test]
    fn negative_volume_is_invalid() {
        let mut b = bar("10.00");
        b.volume = Decimal::from_str("-1").unwrap();
        assert!(b.validate().is_err());
    }
}
