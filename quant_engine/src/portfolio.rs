/// portfolio.rs — Position, Portfolio, Trade
///
/// Portfolio owns Positions by value-keyed map; a Position holds no
/// back-pointer to its Portfolio — every P&L query passes the current price
/// in explicitly, rather than a `Position` holding a back-pointer to its
/// owning `Portfolio`.
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::InstrumentCode;

#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub instrument: InstrumentCode,
    pub quantity: u64,
    pub cost_basis: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * self.current_price
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: InstrumentCode,
    pub entry_ts: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_ts: NaiveDateTime,
    pub exit_price: Decimal,
    pub quantity: u64,
    pub realized_pnl: Decimal,
    pub fees_total: Decimal,
}

#[derive(Debug, Default)]
pub struct Portfolio {
    pub cash: Decimal,
    positions: BTreeMap<InstrumentCode, Position>,
    pub equity_history: Vec<(NaiveDate, Decimal)>,
}

impl Portfolio {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: BTreeMap::new(),
            equity_history: Vec::new(),
        }
    }

    pub fn position(&self, instrument: InstrumentCode) -> Option<&Position> {
        self.positions.get(&instrument)
    }

    pub fn has_position(&self, instrument: InstrumentCode) -> bool {
        self.positions.contains_key(&instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// `NONE -> OPEN`. Idempotent: opening while already OPEN is a no-op.
    pub fn open(&mut self, position: Position) {
        self.positions.entry(position.instrument).or_insert(position);
    }

    /// `OPEN -> NONE`. No-op if there is no open position.
    pub fn close(&mut self, instrument: InstrumentCode) -> Option<Position> {
        self.positions.remove(&instrument)
    }

    /// Mark every position matching `instrument` to `price`.
    pub fn mark_price(&mut self, instrument: InstrumentCode, price: Decimal) {
        if let Some(p) = self.positions.get_mut(&instrument) {
            p.current_price = price;
        }
    }

    pub fn positions_notional(&self) -> Decimal {
        self.positions.values().map(Position::notional).sum()
    }

    pub fn total_equity(&self) -> Decimal {
        self.cash + self.positions_notional()
    }

    pub fn record_equity(&mut self, date: NaiveDate) {
        let equity = self.total_equity();
        self.equity_history.push((date, equity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn code() -> InstrumentCode {
        InstrumentCode::parse("sh600000").unwrap()
    }

    #[test]
    fn opening_twice_is_idempotent() {
        let mut p = Portfolio::new(Decimal::from_str("1000").unwrap());
        let pos = Position {
            instrument: code(),
            quantity: 100,
            cost_basis: Decimal::from_str("10").unwrap(),
            current_price: Decimal::from_str("10").unwrap(),
        };
        p.open(pos);
        let mut pos2 = pos;
        pos2.quantity = 200;
        p.open(pos2);
        assert_eq!(p.position(code()).unwrap().quantity, 100);
    }

    #[test]
    fn closing_absent_position_is_noop() {
        let mut p = Portfolio::new(Decimal::from_str("1000").unwrap());
        assert!(p.close(code()).is_none());
    }

    #[test]
    fn total_equity_is_cash_plus_notional() {
        let mut p = Portfolio::new(Decimal::from_str("1000").unwrap());
        p.open(Position {
            instrument: code(),
            quantity: 100,
            cost_basis: Decimal::from_str("10").unwrap(),
            current_price: Decimal::from_str("10").unwrap(),
        });
        assert_eq!(p.total_equity(), Decimal::from_str("2000").unwrap());
    }
}
