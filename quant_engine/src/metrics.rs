/// metrics.rs — Performance Metrics
///
/// ─────────────────────────────────────────────────────────────────────────
/// Metric definitions
/// ─────────────────────────────────────────────────────────────────────────
///
/// TOTAL RETURN
///   total_return = final_equity / initial_capital − 1
///
/// ANNUALIZED RETURN
///   annualized_return = (1 + total_return)^(252 / trading_days) − 1
///
/// MAXIMUM DRAWDOWN
///   Equity curve: E_t ; running peak: peak_t = max_{s≤t}(E_s)
///   Drawdown at t: DD_t = (peak_t − E_t) / peak_t ; MaxDD = max_t(DD_t)
///
/// SHARPE RATIO (annualised, risk-free rate = 0)
///   SR = mean(daily_returns) / stddev(daily_returns) × √252
///   Undefined (NaN) when stddev = 0 or fewer than 2 samples.
///
/// WIN RATE & PROFIT FACTOR
///   win_rate = winning_trades / total_trades  (winner: realized_pnl > 0)
///   profit_factor = Σ(gains) / |Σ(losses)|  ; undefined when losses sum to 0
/// ─────────────────────────────────────────────────────────────────────────
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::portfolio::Trade;

/// End-of-run statistics, computed purely from the engine's emitted trade
/// and equity streams; the aggregator owns no mutable state beyond its own
/// accumulators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BACKTEST PERFORMANCE REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Trades           : {}", self.total_trades)?;
        writeln!(f, "  Win Rate         : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Profit Factor    : {:.3}", self.profit_factor)?;
        writeln!(f, "  Total Return     : {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "  Annualized Return: {:.2}%", self.annualized_return * 100.0)?;
        writeln!(f, "  Sharpe Ratio     : {:.3}", self.sharpe)?;
        writeln!(f, "  Max Drawdown     : {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

impl Metrics {
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[(NaiveDate, Decimal)],
        initial_capital: Decimal,
        final_equity: Decimal,
    ) -> Self {
        let total_return = if initial_capital.is_zero() {
            0.0
        } else {
            ((final_equity / initial_capital) - Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0)
        };

        let trading_days = equity_curve.len().max(1) as f64;
        let annualized_return = (1.0 + total_return).powf(252.0 / trading_days) - 1.0;

        let max_drawdown = max_drawdown(equity_curve);
        let sharpe = sharpe_ratio(equity_curve);

        let n = trades.len();
        let winners = trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
        let win_rate = if n == 0 { 0.0 } else { winners as f64 / n as f64 };

        let gains: Decimal = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p > Decimal::ZERO)
            .sum();
        let losses: Decimal = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p < Decimal::ZERO)
            .sum();
        let profit_factor = if losses.is_zero() {
            f64::NAN
        } else {
            (gains / losses.abs()).to_f64().unwrap_or(f64::NAN)
        };

        Metrics {
            total_return,
            annualized_return,
            max_drawdown,
            sharpe,
            win_rate,
            profit_factor,
            total_trades: n,
        }
    }
}

/// `max_t { (peak_t − E_t) / peak_t }`, a non-negative fraction.
pub fn max_drawdown(equity_curve: &[(NaiveDate, Decimal)]) -> f64 {
    if equity_curve.is_empty() {
        return 0.0;
    }
    let mut peak = equity_curve[0].1;
    let mut max_dd = Decimal::ZERO;
    for (_, e) in equity_curve {
        if *e > peak {
            peak = *e;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - *e) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd.to_f64().unwrap_or(0.0)
}

/// Daily-return Sharpe ratio, annualised by √252 with a zero risk-free
/// rate. `NaN` when stddev is zero or there are fewer than 2 samples.
pub fn sharpe_ratio(equity_curve: &[(NaiveDate, Decimal)]) -> f64 {
    if equity_curve.len() < 3 {
        return f64::NAN;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter_map(|w| {
            let (prev, curr) = (w[0].1, w[1].1);
            if prev.is_zero() {
                None
            } else {
                ((curr - prev) / prev).to_f64()
            }
        })
        .collect();
    if returns.len() < 2 {
        return f64::NAN;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev < 1e-12 {
        return f64::NAN;
    }
    (mean / std_dev) * (252.0_f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn max_drawdown_flat() {
        let curve = vec![
            (d(2024, 1, 1), Decimal::from(100)),
            (d(2024, 1, 2), Decimal::from(100)),
        ];
        assert_eq!(max_drawdown(&curve), 0.0);
    }

    #[test]
    fn max_drawdown_50_pct() {
        let curve = vec![
            (d(2024, 1, 1), Decimal::from(100)),
            (d(2024, 1, 2), Decimal::from(120)),
            (d(2024, 1, 3), Decimal::from(60)),
            (d(2024, 1, 4), Decimal::from(80)),
        ];
        let dd = max_drawdown(&curve);
        assert!((dd - 0.5).abs() < 1e-9, "dd = {dd}");
    }

    #[test]
    fn sharpe_undefined_for_zero_variance() {
        let curve = vec![
            (d(2024, 1, 1), Decimal::from_str("100").unwrap()),
            (d(2024, 1, 2), Decimal::from_str("100").unwrap()),
            (d(2024, 1, 3), Decimal::from_str("100").unwrap()),
        ];
        assert!(sharpe_ratio(&curve).is_nan());
    }

    #[test]
    fn profit_factor_undefined_with_no_losses() {
        let trades = vec![];
        let m = Metrics::compute(&trades, &[], Decimal::from(100), Decimal::from(100));
        assert!(m.profit_factor.is_nan());
    }

    #[test]
    fn win_rate_counts_positive_pnl_only() {
        let instrument = crate::types::InstrumentCode::parse("sh600000").unwrap();
        let ts = d(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        let trades = vec![
            Trade {
                instrument,
                entry_ts: ts,
                entry_price: Decimal::from(10),
                exit_ts: ts,
                exit_price: Decimal::from(11),
                quantity: 100,
                realized_pnl: Decimal::from(90),
                fees_total: Decimal::from(10),
            },
            Trade {
                instrument,
                entry_ts: ts,
                entry_price: Decimal::from(10),
                exit_ts: ts,
                exit_price: Decimal::from(9),
                quantity: 100,
                realized_pnl: Decimal::from(-110),
                fees_total: Decimal::from(10),
            },
        ];
        let m = Metrics::compute(&trades, &[], Decimal::from(1000), Decimal::from(980));
        assert_eq!(m.win_rate, 0.5);
    }
}
