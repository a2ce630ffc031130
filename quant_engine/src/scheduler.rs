/// scheduler.rs — Rebalance Scheduler
///
/// Owns the held set exclusively; the `SignalAdapter` observes transitions
/// by receiving the `Transition` records this type emits, rather than
/// reading shared mutable state.
use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::topk::TopKIndex;
use crate::types::InstrumentCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub instrument: InstrumentCode,
    pub kind: TransitionKind,
    pub date: NaiveDate,
    pub target_weight: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub enum WeightPolicy {
    EqualWeight,
    ScoreWeighted,
}

impl WeightPolicy {
    /// Target allocation per held instrument, capped at `max_position_pct`.
    /// `scores` is `(instrument, raw score)` for every entry in the new held
    /// set, in the same order as `held`.
    /// Returns `(instrument, weight, was_clamped)`; `was_clamped` is true
    /// when the policy's raw allocation exceeded `max_position_pct` and was
    /// capped — a policy violation that is clamped, not fatal.
    pub fn weights(
        &self,
        held: &[InstrumentCode],
        scores: &[(InstrumentCode, f64)],
        max_position_pct: Decimal,
    ) -> Vec<(InstrumentCode, Decimal, bool)> {
        if held.is_empty() {
            return Vec::new();
        }
        let raw: Vec<(InstrumentCode, Decimal)> = match self {
            WeightPolicy::EqualWeight => {
                let w = Decimal::ONE / Decimal::from(held.len());
                held.iter().map(|i| (*i, w)).collect()
            }
            WeightPolicy::ScoreWeighted => {
                let by_instrument: std::collections::HashMap<_, _> = scores.iter().copied().collect();
                let exps: Vec<(InstrumentCode, f64)> = held
                    .iter()
                    .map(|i| {
                        let s = by_instrument.get(i).copied().unwrap_or(0.0);
                        (*i, s.exp())
                    })
                    .collect();
                let total: f64 = exps.iter().map(|(_, e)| e).sum();
                exps.into_iter()
                    .map(|(i, e)| {
                        let w = if total > 0.0 { e / total } else { 1.0 / held.len() as f64 };
                        (i, Decimal::from_f64(w).unwrap_or(Decimal::ZERO))
                    })
                    .collect()
            }
        };
        raw.into_iter()
            .map(|(i, w)| (i, w.min(max_position_pct), w > max_position_pct))
            .collect()
    }
}

/// Run-scoped state: the current held set and the last rebalance date.
#[derive(Debug, Default)]
pub struct RebalanceScheduler {
    held: HashSet<InstrumentCode>,
    last_rebalance_date: Option<NaiveDate>,
    current_weights: std::collections::HashMap<InstrumentCode, Decimal>,
    clamped: Vec<InstrumentCode>,
}

impl RebalanceScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> &HashSet<InstrumentCode> {
        &self.held
    }

    /// Compute entry/exit transitions for rebalance date `date`, applying
    /// `policy` to size the entries, and commit the new held set. Two
    /// consecutive rebalances with an identical top-K emit zero
    /// transitions.
    pub fn rebalance(
        &mut self,
        date: NaiveDate,
        top_k: &TopKIndex,
        policy: WeightPolicy,
        scores: &[(InstrumentCode, f64)],
        max_position_pct: Decimal,
    ) -> Vec<Transition> {
        let new_set: HashSet<InstrumentCode> = top_k.top_k_at(date).iter().copied().collect();
        let entries: Vec<InstrumentCode> = new_set.difference(&self.held).copied().collect();
        let exits: Vec<InstrumentCode> = self.held.difference(&new_set).copied().collect();

        let ordered_new: Vec<InstrumentCode> = top_k.top_k_at(date).to_vec();
        let weights = policy.weights(&ordered_new, scores, max_position_pct);
        let weight_of = |i: &InstrumentCode| {
            weights
                .iter()
                .find(|(w_i, _, _)| w_i == i)
                .map(|(_, w, _)| *w)
                .unwrap_or(Decimal::ZERO)
        };

        self.clamped = weights
            .iter()
            .filter(|(_, _, clamped)| *clamped)
            .map(|(i, _, _)| *i)
            .collect();
        self.current_weights = weights.into_iter().map(|(i, w, _)| (i, w)).collect();

        let mut transitions = Vec::with_capacity(entries.len() + exits.len());
        for i in &entries {
            transitions.push(Transition {
                instrument: *i,
                kind: TransitionKind::Entry,
                date,
                target_weight: weight_of(i),
            });
        }
        for i in &exits {
            transitions.push(Transition {
                instrument: *i,
                kind: TransitionKind::Exit,
                date,
                target_weight: Decimal::ZERO,
            });
        }
        transitions.sort_by_key(|t| t.instrument);

        self.held = new_set;
        self.last_rebalance_date = Some(date);
        transitions
    }

    pub fn last_rebalance_date(&self) -> Option<NaiveDate> {
        self.last_rebalance_date
    }

    /// The target weight assigned to `instrument` as of the last rebalance,
    /// or `None` if it is not currently held.
    pub fn weight_of(&self, instrument: InstrumentCode) -> Option<Decimal> {
        self.current_weights.get(&instrument).copied()
    }

    /// Instruments whose raw weight-policy allocation was clamped to
    /// `max_position_pct` at the last rebalance.
    pub fn clamped(&self) -> &[InstrumentCode] {
        &self.clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use std::str::FromStr;

    fn idx(rows: &[(&str, &str, f64)], k: usize) -> TopKIndex {
        let dates: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let instruments: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let scores: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let df = df! { "date" => dates, "instrument" => instruments, "score" => scores }.unwrap();
        let table = crate::score::ScoreTable::from_dataframe(df, "test").unwrap();
        TopKIndex::build(&table, k)
    }

    #[test]
    fn first_rebalance_is_all_entries() {
        let top_k = idx(
            &[("2024-01-02", "sh600001", 0.5), ("2024-01-02", "sz000001", 0.3)],
            2,
        );
        let mut sched = RebalanceScheduler::new();
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let transitions = sched.rebalance(d, &top_k, WeightPolicy::EqualWeight, &[], Decimal::ONE);
        assert_eq!(transitions.len(), 2);
        assert!(transitions.iter().all(|t| t.kind == TransitionKind::Entry));
        assert_eq!(sched.held().len(), 2);
    }

    #[test]
    fn identical_top_k_emits_no_transitions() {
        let top_k = idx(
            &[
                ("2024-01-02", "sh600001", 0.5),
                ("2024-01-09", "sh600001", 0.6),
            ],
            1,
        );
        let mut sched = RebalanceScheduler::new();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        sched.rebalance(d1, &top_k, WeightPolicy::EqualWeight, &[], Decimal::ONE);
        let transitions = sched.rebalance(d2, &top_k, WeightPolicy::EqualWeight, &[], Decimal::ONE);
        assert!(transitions.is_empty());
    }

    #[test]
    fn entries_and_exits_on_membership_change() {
        let top_k = idx(
            &[
                ("2024-01-02", "sh600001", 0.9),
                ("2024-01-02", "sz000001", 0.5),
                ("2024-01-09", "sz000002", 0.9),
                ("2024-01-09", "sz000001", 0.5),
            ],
            2,
        );
        let mut sched = RebalanceScheduler::new();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        sched.rebalance(d1, &top_k, WeightPolicy::EqualWeight, &[], Decimal::ONE);
        let transitions = sched.rebalance(d2, &top_k, WeightPolicy::EqualWeight, &[], Decimal::ONE);
        let exits: Vec<_> = transitions.iter().filter(|t| t.kind == TransitionKind::Exit).collect();
        let entries: Vec<_> = transitions.iter().filter(|t| t.kind == TransitionKind::Entry).collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].instrument.as_str(), "sh600001");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instrument.as_str(), "sz000002");
    }

    #[test]
    fn weight_capped_at_max_position_pct() {
        let w = WeightPolicy::EqualWeight.weights(
            &[InstrumentCode::parse("sh600001").unwrap()],
            &[],
            Decimal::from_str("0.2").unwrap(),
        );
        assert_eq!(w[0].1, Decimal::from_str("0.2").unwrap());
    }
}
