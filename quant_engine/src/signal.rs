/// signal.rs — Signal Adapter
///
/// Converts a score table plus a per-instrument bar stream into trading
/// signals. The time-alignment rule is load-bearing: a bar's normalized
/// date is compared to the score's date key, and any mismatch (including a
/// bar whose date has no score at all) yields HOLD, never an error.
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::bar::Bar;
use crate::scheduler::{Transition, TransitionKind};
use crate::score::ScoreTable;
use crate::types::InstrumentCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

/// The magnitude bands used to classify `Strength` from `|score|`. These
/// values are never defaulted; callers must supply them explicitly rather
/// than this crate guessing a threshold.
#[derive(Debug, Clone, Copy)]
pub struct StrengthBands {
    /// `|s| < weak_medium_boundary` -> WEAK
    pub weak_medium_boundary: f64,
    /// `weak_medium_boundary <= |s| < medium_strong_boundary` -> MEDIUM
    pub medium_strong_boundary: f64,
}

impl StrengthBands {
    pub fn classify(&self, value: f64) -> Strength {
        let a = value.abs();
        if a < self.weak_medium_boundary {
            Strength::Weak
        } else if a < self.medium_strong_boundary {
            Strength::Medium
        } else {
            Strength::Strong
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradingSignal {
    pub instrument: InstrumentCode,
    pub timestamp: chrono::NaiveDateTime,
    pub kind: SignalKind,
    pub strength: Strength,
    pub source_score: Option<f64>,
}

/// Which strategy a `SignalAdapter` evaluates.
#[derive(Debug, Clone)]
pub enum Strategy {
    Threshold {
        buy_threshold: f64,
        sell_threshold: f64,
    },
    TopK,
    Percentile {
        /// P in `[0, 100]`.
        percentile: f64,
    },
}

/// Per-instrument, bar-driven signal translator. Caches its own
/// (date -> score) sub-index from the shared `ScoreTable` on first use; the
/// sub-index is append-only and never discarded mid-run.
pub struct SignalAdapter<'a> {
    table: &'a ScoreTable,
    strategy: Strategy,
    bands: StrengthBands,
    cache: BTreeMap<InstrumentCode, &'a BTreeMap<NaiveDate, crate::score::Score>>,
    warned: HashSet<(InstrumentCode, NaiveDate)>,
    /// The `RebalanceScheduler`'s transitions for the most recent rebalance,
    /// and the date they apply to. `Strategy::TopK` only ever fires a
    /// Buy/Sell on that exact date, for instruments named in the list —
    /// never by recomputing top-K membership per bar.
    pending_transitions: HashMap<InstrumentCode, TransitionKind>,
    transition_date: Option<NaiveDate>,
}

impl<'a> SignalAdapter<'a> {
    pub fn new(table: &'a ScoreTable, strategy: Strategy, bands: StrengthBands) -> Self {
        Self {
            table,
            strategy,
            bands,
            cache: BTreeMap::new(),
            warned: HashSet::new(),
            pending_transitions: HashMap::new(),
            transition_date: None,
        }
    }

    /// Record the `RebalanceScheduler`'s transitions for rebalance date
    /// `date`. Called by the engine immediately after
    /// `RebalanceScheduler::rebalance` returns, so `Strategy::TopK` observes
    /// transitions the scheduler computed, rather than re-deriving them from
    /// shared top-K state.
    pub fn set_transitions(&mut self, date: NaiveDate, transitions: &[Transition]) {
        self.transition_date = Some(date);
        self.pending_transitions = transitions.iter().map(|t| (t.instrument, t.kind)).collect();
    }

    fn series(&mut self, instrument: InstrumentCode) -> Option<&'a BTreeMap<NaiveDate, crate::score::Score>> {
        if let Some(existing) = self.cache.get(&instrument) {
            return Some(*existing);
        }
        let series = self.table.instrument_series(instrument)?;
        self.cache.insert(instrument, series);
        Some(series)
    }

    /// Decide BUY / SELL / HOLD for `bar`. Never returns an `Err` — a
    /// missing score, or a score present but NaN/Inf, yields HOLD (the
    /// latter logs a one-time warning per (instrument, date)).
    pub fn decide(&mut self, bar: &Bar) -> TradingSignal {
        let date = bar.date();
        let instrument = bar.instrument;

        let score = self
            .series(instrument)
            .and_then(|series| series.get(&date))
            .copied();

        let Some(score) = score else {
            return self.hold(bar, None);
        };

        if !score.value.is_finite() {
            if self.warned.insert((instrument, date)) {
                tracing::warn!(
                    instrument = %instrument,
                    %date,
                    value = score.value,
                    "numeric anomaly in score (NaN/Inf); treating as HOLD"
                );
            }
            return self.hold(bar, Some(score.value));
        }

        let kind = match &self.strategy {
            Strategy::Threshold {
                buy_threshold,
                sell_threshold,
            } => {
                if score.value > *buy_threshold {
                    SignalKind::Buy
                } else if score.value < *sell_threshold {
                    SignalKind::Sell
                } else {
                    SignalKind::Hold
                }
            }
            Strategy::TopK => {
                if self.transition_date == Some(date) {
                    match self.pending_transitions.get(&instrument) {
                        Some(TransitionKind::Entry) => SignalKind::Buy,
                        Some(TransitionKind::Exit) => SignalKind::Sell,
                        None => SignalKind::Hold,
                    }
                } else {
                    SignalKind::Hold
                }
            }
            Strategy::Percentile { percentile } => {
                let values: Vec<f64> = self
                    .table
                    .scores_on(date)
                    .map(|s| s.value)
                    .filter(|v| v.is_finite())
                    .collect();
                let buy_cut = percentile_of(&values, *percentile);
                let sell_cut = percentile_of(&values, 100.0 - percentile);
                match (buy_cut, sell_cut) {
                    (Some(buy_cut), _) if score.value >= buy_cut => SignalKind::Buy,
                    (_, Some(sell_cut)) if score.value <= sell_cut => SignalKind::Sell,
                    _ => SignalKind::Hold,
                }
            }
        };

        TradingSignal {
            instrument,
            timestamp: bar.timestamp,
            kind,
            strength: self.bands.classify(score.value),
            source_score: Some(score.value),
        }
    }

    fn hold(&self, bar: &Bar, source_score: Option<f64>) -> TradingSignal {
        TradingSignal {
            instrument: bar.instrument,
            timestamp: bar.timestamp,
            kind: SignalKind::Hold,
            strength: Strength::Weak,
            source_score,
        }
    }
}

/// Nearest-rank percentile of `values` at `p` in `[0, 100]`. Returns `None`
/// for an empty slice.
fn percentile_of(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank.min(sorted.len() - 1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn table() -> ScoreTable {
        let df = df! {
            "date" => ["2024-01-02", "2024-01-03"],
            "instrument" => ["sh600000", "sh600000"],
            "score" => [0.03, f64::NAN],
        }
        .unwrap();
        ScoreTable::from_dataframe(df, "test").unwrap()
    }

    fn bar_on(date: &str) -> Bar {
        let d = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        Bar {
            instrument: InstrumentCode::parse("sh600000").unwrap(),
            timestamp: d.and_hms_opt(0, 0, 0).unwrap(),
            open: Decimal::from_str("10").unwrap(),
            high: Decimal::from_str("10").unwrap(),
            low: Decimal::from_str("10").unwrap(),
            close: Decimal::from_str("10").unwrap(),
            volume: Decimal::ONE,
            amount: Decimal::ONE,
        }
    }

    #[test]
    fn threshold_buy_above_threshold() {
        let table = table();
        let bands = StrengthBands {
            weak_medium_boundary: 0.01,
            medium_strong_boundary: 0.02,
        };
        let mut adapter = SignalAdapter::new(
            &table,
            Strategy::Threshold {
                buy_threshold: 0.02,
                sell_threshold: -0.02,
            },
            bands,
        );
        let signal = adapter.decide(&bar_on("2024-01-02"));
        assert_eq!(signal.kind, SignalKind::Buy);
        assert_eq!(signal.strength, Strength::Strong);
    }

    #[test]
    fn missing_score_holds() {
        let table = table();
        let bands = StrengthBands {
            weak_medium_boundary: 0.01,
            medium_strong_boundary: 0.02,
        };
        let mut adapter = SignalAdapter::new(
            &table,
            Strategy::Threshold {
                buy_threshold: 0.02,
                sell_threshold: -0.02,
            },
            bands,
        );
        let signal = adapter.decide(&bar_on("2024-06-01"));
        assert_eq!(signal.kind, SignalKind::Hold);
    }

    #[test]
    fn nan_score_holds() {
        let table = table();
        let bands = StrengthBands {
            weak_medium_boundary: 0.01,
            medium_strong_boundary: 0.02,
        };
        let mut adapter = SignalAdapter::new(
            &table,
            Strategy::Threshold {
                buy_threshold: 0.02,
                sell_threshold: -0.02,
            },
            bands,
        );
        let signal = adapter.decide(&bar_on("2024-01-03"));
        assert_eq!(signal.kind, SignalKind::Hold);
    }
}
