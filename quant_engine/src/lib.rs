pub mod bar;
pub mod backtest;
pub mod config;
pub mod error;
pub mod metrics;
pub mod portfolio;
pub mod result;
pub mod scheduler;
pub mod score;
pub mod signal;
pub mod topk;
pub mod types;

pub use backtest::{BacktestEngine, EngineConfig, EngineEvent, RunOutcome};
pub use bar::{Bar, BarStore, InMemoryBarStore, Period};
pub use config::BacktestConfig;
pub use error::EngineError;
pub use metrics::Metrics;
pub use portfolio::{Portfolio, Position, Trade};
pub use result::BacktestResult;
pub use scheduler::{RebalanceScheduler, Transition, TransitionKind, WeightPolicy};
pub use score::{Score, ScoreTable};
pub use signal::{SignalAdapter, SignalKind, Strategy, Strength, StrengthBands, TradingSignal};
pub use topk::{RebalancePeriod, TopKIndex};
pub use types::{DateRange, InstrumentCode, Market};
