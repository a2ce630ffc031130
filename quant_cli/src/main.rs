/// main.rs — CLI Entry Point
///
/// Two stable subcommands:
///   `quant workflow` — full pipeline: load scores, build the Top-K index,
///   run the backtest, print and persist the result.
///   `quant backtest` — backtest only, against a predictions artifact
///   already on disk.
///
/// Exit codes: 0 success, 1 config error, 2 data error, 3 engine fatal.
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use quant_cli::report;
use quant_cli::CsvBarStore;
use quant_engine::{
    BacktestConfig, BacktestEngine, DateRange, EngineConfig, EngineError, InstrumentCode, RebalancePeriod,
    RunOutcome, ScoreTable, Strategy, StrengthBands, TopKIndex, WeightPolicy,
};

#[derive(Parser)]
#[command(name = "quant", about = "Quantitative trading workflow coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: score loading, Top-K indexing, backtest.
    Workflow {
        #[arg(long, conflicts_with = "stocks")]
        index: Option<String>,
        #[arg(long, value_delimiter = ',', conflicts_with = "index")]
        stocks: Option<Vec<String>>,
        #[arg(long)]
        max_stocks: Option<usize>,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Run the backtest against an existing predictions artifact.
    Backtest {
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        initial_capital: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, value_enum)]
        rebalance: Option<CliRebalancePeriod>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRebalancePeriod {
    Day,
    Week,
    Month,
}

impl From<CliRebalancePeriod> for RebalancePeriod {
    fn from(v: CliRebalancePeriod) -> Self {
        match v {
            CliRebalancePeriod::Day => RebalancePeriod::Day,
            CliRebalancePeriod::Week => RebalancePeriod::Week,
            CliRebalancePeriod::Month => RebalancePeriod::Month,
        }
    }
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("quant — quantitative trading workflow coordinator");

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Config(msg)) => {
            error!("config error: {msg}");
            ExitCode::from(1)
        }
        Err(CliError::Data(msg)) => {
            error!("data error: {msg}");
            ExitCode::from(2)
        }
        Err(CliError::Engine(msg)) => {
            error!("engine fatal: {msg}");
            ExitCode::from(3)
        }
    }
}

enum CliError {
    Config(String),
    Data(String),
    Engine(String),
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ConfigInvalid(_) | EngineError::FormatInvalid(_) => CliError::Config(e.to_string()),
            EngineError::ArtifactMissing(_) | EngineError::ArtifactCorrupt(_) | EngineError::Empty(_) => {
                CliError::Data(e.to_string())
            }
            EngineError::BarFetchFailed { .. }
            | EngineError::BarFetchTimeout { .. }
            | EngineError::BarDataInvalid { .. }
            | EngineError::Canceled(_) => CliError::Engine(e.to_string()),
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    let mut cfg = BacktestConfig::from_env()?;
    cfg.validate()?;

    match command {
        Command::Workflow {
            index,
            stocks,
            max_stocks,
            from,
            to,
        } => run_workflow(cfg, index, stocks, max_stocks, from, to),
        Command::Backtest {
            predictions,
            from,
            to,
            initial_capital,
            top_k,
            rebalance,
        } => {
            cfg.data_path = predictions.display().to_string();
            if let Some(capital) = initial_capital {
                cfg.initial_capital = capital
                    .parse()
                    .map_err(|e| CliError::Config(format!("--initial-capital: {e}")))?;
            }
            run_backtest(cfg, predictions, from, to, top_k, rebalance.map(Into::into))
        }
    }
}

fn default_universe(bar_store: &CsvBarStore, index: &Option<String>, stocks: &Option<Vec<String>>, max_stocks: Option<usize>) -> Result<Vec<InstrumentCode>, CliError> {
    let mut universe = if let Some(index) = index {
        bar_store.members(index)?
    } else if let Some(stocks) = stocks {
        stocks
            .iter()
            .map(|s| InstrumentCode::parse(s))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        bar_store.instruments("")?
    };
    if let Some(max) = max_stocks {
        universe.truncate(max);
    }
    Ok(universe)
}

fn run_workflow(
    cfg: BacktestConfig,
    index: Option<String>,
    stocks: Option<Vec<String>>,
    max_stocks: Option<usize>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(), CliError> {
    let bar_store = CsvBarStore::new(&cfg.data_path);
    let universe = default_universe(&bar_store, &index, &stocks, max_stocks)?;
    if universe.is_empty() {
        return Err(CliError::Data("resolved universe is empty".into()));
    }
    info!(instruments = universe.len(), "resolved universe");

    let table = ScoreTable::load(&cfg.data_path)?;
    let top_k = TopKIndex::build(&table, universe.len().min(50));
    execute(cfg, &table, Some(&top_k), &universe, from, to, RebalancePeriod::Week)
}

fn run_backtest(
    cfg: BacktestConfig,
    predictions: PathBuf,
    from: NaiveDate,
    to: NaiveDate,
    top_k: Option<usize>,
    rebalance: Option<RebalancePeriod>,
) -> Result<(), CliError> {
    let table = ScoreTable::load(&predictions)?;
    let universe: Vec<InstrumentCode> = table
        .dates()
        .next()
        .map(|d| table.scores_on(d).map(|s| s.instrument).collect())
        .unwrap_or_default();
    if universe.is_empty() {
        return Err(CliError::Data("predictions artifact has no scored instruments".into()));
    }

    let top_k_index = top_k.map(|k| TopKIndex::build(&table, k));
    let mut cfg = cfg;
    cfg.data_path = predictions.parent().map(|p| p.display().to_string()).unwrap_or_default();
    execute(
        cfg,
        &table,
        top_k_index.as_ref(),
        &universe,
        from,
        to,
        rebalance.unwrap_or(RebalancePeriod::Week),
    )
}

fn execute(
    cfg: BacktestConfig,
    table: &ScoreTable,
    top_k: Option<&TopKIndex>,
    universe: &[InstrumentCode],
    from: NaiveDate,
    to: NaiveDate,
    rebalance_period: RebalancePeriod,
) -> Result<(), CliError> {
    let range = DateRange::new(from, to)?;
    let bar_store = CsvBarStore::new(&cfg.data_path);

    let econf = EngineConfig {
        strategy: if top_k.is_some() {
            Strategy::TopK
        } else {
            Strategy::Threshold {
                buy_threshold: 0.02,
                sell_threshold: -0.02,
            }
        },
        bands: StrengthBands {
            weak_medium_boundary: 0.01,
            medium_strong_boundary: 0.02,
        },
        rebalance_period,
        weight_policy: WeightPolicy::EqualWeight,
    };

    let result_path = PathBuf::from(&cfg.result_path);
    let engine = BacktestEngine::new(cfg, econf, table, top_k);
    let outcome = engine.run(&bar_store, universe, range, || false)?;

    let result = match outcome {
        RunOutcome::Completed(r) => r,
        RunOutcome::Canceled(r) => {
            info!("run canceled; reporting partial result");
            r
        }
    };

    report::print_summary(&result);
    report::write_artifact(&result, &result_path).map_err(|e| CliError::Engine(e.to_string()))?;
    Ok(())
}
