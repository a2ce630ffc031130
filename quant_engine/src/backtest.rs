/// backtest.rs — Event-Driven Backtesting Engine
///
/// Drives a bar-by-bar simulation, applies the A-share cost model to
/// candidate fills, maintains cash and positions, and emits a timestamped
/// `BacktestResult`.
///
/// ARCHITECTURE
/// ```text
///   Bar Store (per instrument) ──merge, time order──▶ one bar stream
///         │
///         ▼
///   mark positions to close ──▶ SignalAdapter::decide ──▶ BUY/SELL/HOLD
///         │                                                   │
///         │                                      ┌────────────┴────────────┐
///         │                                      ▼                         ▼
///         │                               open_position()           close_position()
///         ▼
///   end-of-day: Portfolio::record_equity
/// ```
use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::bar::{Bar, BarStore, Period};
use crate::config::BacktestConfig;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::portfolio::{Portfolio, Position, Trade};
use crate::result::BacktestResult;
use crate::scheduler::{RebalanceScheduler, WeightPolicy};
use crate::score::ScoreTable;
use crate::signal::{SignalAdapter, SignalKind, Strategy, StrengthBands};
use crate::topk::{RebalancePeriod, TopKIndex};
use crate::types::{DateRange, InstrumentCode, Market};

/// Strategy-level configuration, distinct from `BacktestConfig`'s cost and
/// capital fields: this is what varies between runs of the same cost model.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: Strategy,
    pub bands: StrengthBands,
    pub rebalance_period: RebalancePeriod,
    pub weight_policy: WeightPolicy,
}

/// A locally-recovered condition, logged and appended here instead of
/// propagated as an `Err`. Carried on `BacktestResult` so a caller can audit
/// what was skipped without re-running at a higher log level.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum EngineEvent {
    SkippedInsufficientCash {
        instrument: InstrumentCode,
        date: NaiveDate,
    },
    PolicyViolationClamped {
        instrument: InstrumentCode,
        date: NaiveDate,
        requested_pct: Decimal,
        capped_pct: Decimal,
    },
    BarFetchRetried {
        instrument: InstrumentCode,
        attempt: u32,
    },
}

/// Non-error run outcome: either the engine ran to completion, or an
/// external cancel signal was observed between bars.
pub enum RunOutcome {
    Completed(BacktestResult),
    Canceled(BacktestResult),
}

pub struct BacktestEngine<'a> {
    cfg: BacktestConfig,
    econf: EngineConfig,
    score_table: &'a ScoreTable,
    top_k: Option<&'a TopKIndex>,
    portfolio: Portfolio,
    scheduler: RebalanceScheduler,
    events: Vec<EngineEvent>,
    trades: Vec<Trade>,
    open_entries: HashMap<InstrumentCode, (NaiveDateTime, Decimal)>,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(
        cfg: BacktestConfig,
        econf: EngineConfig,
        score_table: &'a ScoreTable,
        top_k: Option<&'a TopKIndex>,
    ) -> Self {
        let initial_capital = cfg.initial_capital;
        Self {
            cfg,
            econf,
            score_table,
            top_k,
            portfolio: Portfolio::new(initial_capital),
            scheduler: RebalanceScheduler::new(),
            events: Vec::new(),
            trades: Vec::new(),
            open_entries: HashMap::new(),
        }
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    /// Run the simulation over `universe` within `range`, pulling bars from
    /// `bar_store`. `cancel` is polled between bars; when it returns `true`
    /// the engine finalizes the current bar and returns `Canceled`.
    pub fn run(
        mut self,
        bar_store: &dyn BarStore,
        universe: &[InstrumentCode],
        range: DateRange,
        mut cancel: impl FnMut() -> bool,
    ) -> Result<RunOutcome, EngineError> {
        let initial_capital = self.cfg.initial_capital;
        info!(instruments = universe.len(), start = %range.start, end = %range.end, "starting backtest run");

        let mut all_bars: Vec<Bar> = Vec::new();
        for instrument in universe {
            let mut retries = 0;
            loop {
                let started = std::time::Instant::now();
                let fetched = bar_store.bars(*instrument, range, Period::Day);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let fetched = match fetched {
                    Ok(_) if elapsed_ms > self.cfg.bar_fetch_deadline_ms => Err(EngineError::BarFetchTimeout {
                        instrument: instrument.to_string(),
                        deadline_ms: self.cfg.bar_fetch_deadline_ms,
                    }),
                    other => other,
                };
                match fetched {
                    Ok(bars) => {
                        for b in &bars {
                            b.validate()?;
                        }
                        all_bars.extend(bars);
                        break;
                    }
                    Err(e @ (EngineError::BarFetchFailed { .. } | EngineError::BarFetchTimeout { .. }))
                        if retries < self.cfg.retry_budget =>
                    {
                        retries += 1;
                        self.events.push(EngineEvent::BarFetchRetried {
                            instrument: *instrument,
                            attempt: retries,
                        });
                        warn!(%instrument, attempt = retries, reason = %e, "bar fetch failed, retrying");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        // Time-ordered merge across instruments; ties broken by instrument code.
        all_bars.sort_by(|a, b| (a.timestamp, a.instrument).cmp(&(b.timestamp, b.instrument)));

        let rebalance_dates: std::collections::HashSet<NaiveDate> = match (&self.econf.strategy, self.top_k) {
            (Strategy::TopK, Some(idx)) => idx
                .rebalance_dates(range, self.econf.rebalance_period)
                .into_iter()
                .collect(),
            _ => std::collections::HashSet::new(),
        };

        let mut adapter = SignalAdapter::new(self.score_table, self.econf.strategy.clone(), self.econf.bands);

        let mut current_date: Option<NaiveDate> = None;
        let mut canceled = false;

        for bar in &all_bars {
            if cancel() {
                canceled = true;
            }

            let date = bar.date();
            if current_date != Some(date) {
                if let Some(prev) = current_date {
                    self.portfolio.record_equity(prev);
                }
                current_date = Some(date);

                if rebalance_dates.contains(&date) {
                    if let Some(idx) = self.top_k {
                        let scores: Vec<(InstrumentCode, f64)> = self
                            .score_table
                            .scores_on(date)
                            .map(|s| (s.instrument, s.value))
                            .collect();
                        let transitions = self
                            .scheduler
                            .rebalance(date, idx, self.econf.weight_policy, &scores, self.cfg.max_position_pct);
                        adapter.set_transitions(date, &transitions);
                        for instrument in self.scheduler.clamped() {
                            self.events.push(EngineEvent::PolicyViolationClamped {
                                instrument: *instrument,
                                date,
                                requested_pct: self.scheduler.weight_of(*instrument).unwrap_or(self.cfg.max_position_pct),
                                capped_pct: self.cfg.max_position_pct,
                            });
                        }
                    }
                }
            }

            self.portfolio.mark_price(bar.instrument, bar.close);

            let signal = adapter.decide(bar);
            match signal.kind {
                SignalKind::Buy => self.try_open(bar, date),
                SignalKind::Sell => self.try_close(bar, date),
                SignalKind::Hold => {}
            }

            if canceled {
                break;
            }
        }
        if let Some(last) = current_date {
            self.portfolio.record_equity(last);
        }

        if self.portfolio.positions().next().is_some() && self.cfg.force_liquidate_at_end {
            if let Some(last_bar_date) = current_date {
                let instruments: Vec<InstrumentCode> = self.portfolio.positions().map(|p| p.instrument).collect();
                for instrument in instruments {
                    if let Some(last) = all_bars.iter().rev().find(|b| b.instrument == instrument) {
                        self.close_position(instrument, last.timestamp, last.close);
                    }
                }
                self.portfolio.record_equity(last_bar_date);
            }
        }

        let final_equity = self.portfolio.total_equity();
        let metrics = Metrics::compute(&self.trades, &self.portfolio.equity_history, initial_capital, final_equity);

        let result = BacktestResult {
            date_range: range,
            initial_capital,
            final_equity,
            trades: self.trades,
            equity_curve: self.portfolio.equity_history,
            metrics,
            events: self.events,
        };

        if canceled {
            Ok(RunOutcome::Canceled(result))
        } else {
            Ok(RunOutcome::Completed(result))
        }
    }

    /// Target allocation weight for `instrument`. Under `Strategy::TopK` the
    /// `RebalanceScheduler` has already sized every held instrument (equal-
    /// weight or score-weighted, capped at `max_position_pct`) at the last
    /// rebalance; everything else (threshold / percentile strategies) has no
    /// scheduler sizing, so it invests up to the configured position cap.
    fn target_weight(&self, instrument: InstrumentCode) -> Decimal {
        match self.econf.strategy {
            Strategy::TopK => self
                .scheduler
                .weight_of(instrument)
                .unwrap_or(self.cfg.max_position_pct),
            _ => self.cfg.max_position_pct,
        }
    }

    fn try_open(&mut self, bar: &Bar, date: NaiveDate) {
        if self.portfolio.has_position(bar.instrument) {
            return; // NONE -> OPEN transitions only; BUY while OPEN is idempotent.
        }

        let target_weight = self.target_weight(bar.instrument);
        let equity = self.portfolio.total_equity();
        let desired_cash = equity * target_weight;

        let fill_price = bar.open * (Decimal::ONE + self.cfg.slippage_rate);
        if fill_price <= Decimal::ZERO {
            return;
        }
        let lot = Decimal::from(self.cfg.lot_size);
        let max_shares = (desired_cash / fill_price / lot).floor() * lot;
        let quantity: u64 = max_shares.to_u64().unwrap_or(0);
        if quantity == 0 {
            return;
        }

        let notional = Decimal::from(quantity) * fill_price;
        let commission = commission_fee(notional, self.cfg.commission_rate, self.cfg.min_commission);
        let transfer_fee = if bar.instrument.market() == Market::Shanghai {
            notional * self.cfg.transfer_fee_rate
        } else {
            Decimal::ZERO
        };
        let total_cost = notional + commission + transfer_fee;
        let available = self.portfolio.cash * (Decimal::ONE - self.cfg.starting_cash_buffer);

        if total_cost > available {
            self.events.push(EngineEvent::SkippedInsufficientCash {
                instrument: bar.instrument,
                date,
            });
            return;
        }

        self.portfolio.cash -= total_cost;
        self.portfolio.open(Position {
            instrument: bar.instrument,
            quantity,
            cost_basis: fill_price,
            current_price: fill_price,
        });
        self.open_entries.insert(bar.instrument, (bar.timestamp, fill_price));
    }

    fn try_close(&mut self, bar: &Bar, _date: NaiveDate) {
        if !self.portfolio.has_position(bar.instrument) {
            return; // SELL while NONE is skipped.
        }
        self.close_position(bar.instrument, bar.timestamp, bar.open);
    }

    fn close_position(&mut self, instrument: InstrumentCode, exit_ts: NaiveDateTime, exit_px: Decimal) {
        let Some(position) = self.portfolio.close(instrument) else {
            return;
        };

        let fill_price = exit_px * (Decimal::ONE - self.cfg.slippage_rate);
        let notional = Decimal::from(position.quantity) * fill_price;
        let commission = commission_fee(notional, self.cfg.commission_rate, self.cfg.min_commission);
        let stamp_tax = notional * self.cfg.stamp_tax_rate;
        let transfer_fee = if instrument.market() == Market::Shanghai {
            notional * self.cfg.transfer_fee_rate
        } else {
            Decimal::ZERO
        };
        let fees_total = commission + stamp_tax + transfer_fee;

        self.portfolio.cash += notional - fees_total;

        let (entry_ts, entry_price) = self
            .open_entries
            .remove(&instrument)
            .unwrap_or((exit_ts, position.cost_basis));
        let realized_pnl = (fill_price - entry_price) * Decimal::from(position.quantity) - fees_total;

        self.trades.push(Trade {
            instrument,
            entry_ts,
            entry_price,
            exit_ts,
            exit_price: fill_price,
            quantity: position.quantity,
            realized_pnl,
            fees_total,
        });
    }
}

/// `max(notional * commission_rate, min_commission)`, applied per leg.
pub fn commission_fee(notional: Decimal, commission_rate: Decimal, min_commission: Decimal) -> Decimal {
    (notional * commission_rate).max(min_commission)
}
