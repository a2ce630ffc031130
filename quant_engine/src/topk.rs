/// topk.rs — Top-K Index and rebalance-date derivation
///
/// Precomputed once from a `ScoreTable` and shared read-only by every
/// `SignalAdapter` and the `RebalanceScheduler` for the lifetime of a run.
use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::score::ScoreTable;
use crate::types::{DateRange, InstrumentCode};

/// How often the held set is allowed to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalancePeriod {
    Day,
    Week,
    Month,
}

/// For each date present in a `ScoreTable`, the K instruments with highest
/// score, descending, ties broken lexicographically by instrument code.
#[derive(Debug, Default)]
pub struct TopKIndex {
    k: usize,
    by_date: BTreeMap<NaiveDate, Vec<InstrumentCode>>,
}

impl TopKIndex {
    /// Build the index. `O(D * n log n)` where `n` is the number of scored
    /// instruments per date; a heap-based top-K is not needed at this scale
    /// (memory, not CPU, is the binding constraint at `D * K` scale).
    pub fn build(table: &ScoreTable, k: usize) -> Self {
        let mut by_date = BTreeMap::new();
        for date in table.dates() {
            let mut scored: Vec<(InstrumentCode, f64)> =
                table.scores_on(date).map(|s| (s.instrument, s.value)).collect();
            // Descending by score, ties broken ascending by instrument code.
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.truncate(k);
            by_date.insert(date, scored.into_iter().map(|(i, _)| i).collect());
        }
        Self { k, by_date }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// The cached top-K list for `date`, or an empty list if the date is
    /// absent from the underlying score table.
    pub fn top_k_at(&self, date: NaiveDate) -> &[InstrumentCode] {
        self.by_date.get(&date).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.by_date.keys().copied()
    }

    /// Pure, deterministic derivation of rebalance dates within `range` for
    /// the given `period`, drawn from the set of dates the index actually
    /// has top-K lists for.
    pub fn rebalance_dates(&self, range: DateRange, period: RebalancePeriod) -> Vec<NaiveDate> {
        let candidates: Vec<NaiveDate> = self
            .by_date
            .keys()
            .copied()
            .filter(|d| range.contains(*d))
            .collect();

        match period {
            RebalancePeriod::Day => candidates,
            RebalancePeriod::Week => {
                first_per_key(&candidates, |d| (d.iso_week().year(), d.iso_week().week()))
            }
            RebalancePeriod::Month => first_per_key(&candidates, |d| (d.year(), d.month())),
        }
    }
}

fn first_per_key<K: PartialEq>(dates: &[NaiveDate], key_of: impl Fn(&NaiveDate) -> K) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut last_key: Option<K> = None;
    for d in dates {
        let k = key_of(d);
        if last_key.as_ref() != Some(&k) {
            out.push(*d);
            last_key = Some(k);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn table_from_rows(rows: &[(&str, &str, f64)]) -> ScoreTable {
        let dates: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let instruments: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let scores: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let df = df! {
            "date" => dates,
            "instrument" => instruments,
            "score" => scores,
        }
        .unwrap();
        ScoreTable::from_dataframe(df, "test").unwrap()
    }

    #[test]
    fn top_k_orders_descending_with_lexicographic_tiebreak() {
        let table = table_from_rows(&[
            ("2024-01-02", "sh600001", 0.5),
            ("2024-01-02", "sz000001", 0.5),
            ("2024-01-02", "sh600002", 0.9),
        ]);
        let idx = TopKIndex::build(&table, 2);
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let top = idx.top_k_at(d);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].as_str(), "sh600002");
        assert_eq!(top[1].as_str(), "sh600001"); // tie broken lexicographically
    }

    #[test]
    fn k_larger_than_universe_returns_full_set() {
        let table = table_from_rows(&[("2024-01-02", "sh600001", 0.1), ("2024-01-02", "sz000001", 0.2)]);
        let idx = TopKIndex::build(&table, 10);
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(idx.top_k_at(d).len(), 2);
    }

    #[test]
    fn absent_date_returns_empty() {
        let table = table_from_rows(&[("2024-01-02", "sh600001", 0.1)]);
        let idx = TopKIndex::build(&table, 5);
        let other = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
        assert!(idx.top_k_at(other).is_empty());
    }

    #[test]
    fn month_rebalance_picks_first_date_of_each_month() {
        let table = table_from_rows(&[
            ("2024-01-02", "sh600001", 0.1),
            ("2024-01-15", "sh600001", 0.2),
            ("2024-02-01", "sh600001", 0.3),
        ]);
        let idx = TopKIndex::build(&table, 5);
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        )
        .unwrap();
        let dates = idx.rebalance_dates(range, RebalancePeriod::Month);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            ]
        );
    }
}
