/// config.rs — Centralised configuration
///
/// All parameters the backtest engine consumes are defined here. Loading
/// happens once at startup (`BacktestConfig::from_env`, layered with CLI
/// overrides by the caller); every module downstream borrows `&BacktestConfig`.
/// There is no process-wide mutable config after that point.
use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::EngineError;

/// A-share cost-model defaults.
pub const DEFAULT_COMMISSION_RATE: &str = "0.0003";
pub const DEFAULT_MIN_COMMISSION: &str = "5";
pub const DEFAULT_STAMP_TAX_RATE: &str = "0.001";
pub const DEFAULT_TRANSFER_FEE_RATE: &str = "0.00002";
pub const DEFAULT_SLIPPAGE_RATE: &str = "0.001";
pub const DEFAULT_MAX_POSITION_PCT: &str = "0.25";
pub const DEFAULT_LOT_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    // ── Capital & cost model ─────────────────────────────────────────────
    pub initial_capital: Decimal,
    pub commission_rate: Decimal,
    pub min_commission: Decimal,
    pub stamp_tax_rate: Decimal,
    pub transfer_fee_rate: Decimal,
    pub slippage_rate: Decimal,
    pub max_position_pct: Decimal,
    pub lot_size: u64,
    /// Cash fraction held back from any single order as a safety buffer.
    pub starting_cash_buffer: Decimal,
    /// Whether unclosed positions are force-liquidated at the final bar
    /// before equity is reported. Defaults to false: positions are
    /// marked-to-market, not forcibly sold.
    pub force_liquidate_at_end: bool,

    // ── I/O & run control ────────────────────────────────────────────────
    pub data_path: String,
    pub result_path: String,
    /// Reserved for a future randomized tie-break policy; today's tie-breaks
    /// are all deterministic and this field is unread.
    pub random_seed: Option<u64>,
    /// Per-run retry budget for recoverable `BarFetch*` failures before
    /// they become fatal.
    pub retry_budget: u32,
    /// Wall-clock budget for a single `BarStore::bars` call; a call that
    /// returns successfully but runs past this deadline is treated as a
    /// `BarFetchTimeout` and retried exactly like a `BarFetchFailed`.
    pub bar_fetch_deadline_ms: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from_str("100000").unwrap(),
            commission_rate: Decimal::from_str(DEFAULT_COMMISSION_RATE).unwrap(),
            min_commission: Decimal::from_str(DEFAULT_MIN_COMMISSION).unwrap(),
            stamp_tax_rate: Decimal::from_str(DEFAULT_STAMP_TAX_RATE).unwrap(),
            transfer_fee_rate: Decimal::from_str(DEFAULT_TRANSFER_FEE_RATE).unwrap(),
            slippage_rate: Decimal::from_str(DEFAULT_SLIPPAGE_RATE).unwrap(),
            max_position_pct: Decimal::from_str(DEFAULT_MAX_POSITION_PCT).unwrap(),
            lot_size: DEFAULT_LOT_SIZE,
            starting_cash_buffer: Decimal::ZERO,
            force_liquidate_at_end: false,
            data_path: "./data".to_string(),
            result_path: "./result.bin".to_string(),
            random_seed: None,
            retry_budget: 3,
            bar_fetch_deadline_ms: 5_000,
        }
    }
}

impl BacktestConfig {
    /// Load from environment variables (after `.env`), falling back to the
    /// A-share defaults above for anything unset.
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            initial_capital: parse_env("INITIAL_CAPITAL", defaults.initial_capital)?,
            commission_rate: parse_env("COMMISSION_RATE", defaults.commission_rate)?,
            min_commission: parse_env("MIN_COMMISSION", defaults.min_commission)?,
            stamp_tax_rate: parse_env("STAMP_TAX_RATE", defaults.stamp_tax_rate)?,
            transfer_fee_rate: parse_env("TRANSFER_FEE_RATE", defaults.transfer_fee_rate)?,
            slippage_rate: parse_env("SLIPPAGE_RATE", defaults.slippage_rate)?,
            max_position_pct: parse_env("MAX_POSITION_PCT", defaults.max_position_pct)?,
            lot_size: parse_env("LOT_SIZE", defaults.lot_size)?,
            starting_cash_buffer: parse_env("STARTING_CASH_BUFFER", defaults.starting_cash_buffer)?,
            force_liquidate_at_end: env::var("FORCE_LIQUIDATE_AT_END")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.force_liquidate_at_end),
            data_path: env::var("DATA_PATH").unwrap_or(defaults.data_path),
            result_path: env::var("RESULT_PATH").unwrap_or(defaults.result_path),
            random_seed: env::var("RANDOM_SEED").ok().and_then(|v| v.parse().ok()),
            retry_budget: parse_env("RETRY_BUDGET", defaults.retry_budget)?,
            bar_fetch_deadline_ms: parse_env("BAR_FETCH_DEADLINE_MS", defaults.bar_fetch_deadline_ms)?,
        })
    }

    /// Validate numeric bounds before any I/O happens: `ConfigInvalid` is
    /// fatal and raised up front.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::ConfigInvalid("initial_capital must be > 0".into()));
        }
        if self.commission_rate < Decimal::ZERO {
            return Err(EngineError::ConfigInvalid("commission_rate must be >= 0".into()));
        }
        if self.max_position_pct <= Decimal::ZERO || self.max_position_pct > Decimal::ONE {
            return Err(EngineError::ConfigInvalid(
                "max_position_pct must be in (0, 1]".into(),
            ));
        }
        if self.lot_size == 0 {
            return Err(EngineError::ConfigInvalid("lot_size must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, EngineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| EngineError::ConfigInvalid(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
