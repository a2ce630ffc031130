/// csv_bar_store.rs — Filesystem-backed Bar Store
///
/// Production `BarStore` implementation for the CLI: `DATA_PATH` is a
/// directory containing one CSV file per instrument, named
/// `<instrument>.csv`, with columns `date,open,high,low,close,volume,amount`.
/// A sibling `<index>.members` file (one instrument code per line) resolves
/// `--index` universes; `instruments()` lists every `*.csv` stem present.
use std::fs;
use std::path::PathBuf;

use polars::prelude::*;
use quant_engine::{Bar, BarStore, DateRange, EngineError, InstrumentCode, Period};

pub struct CsvBarStore {
    root: PathBuf,
}

impl CsvBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instrument_path(&self, instrument: InstrumentCode) -> PathBuf {
        self.root.join(format!("{instrument}.csv"))
    }
}

impl BarStore for CsvBarStore {
    fn bars(&self, instrument: InstrumentCode, range: DateRange, _period: Period) -> Result<Vec<Bar>, EngineError> {
        let path = self.instrument_path(instrument);
        if !path.exists() {
            return Err(EngineError::BarFetchFailed {
                instrument: instrument.to_string(),
                reason: format!("no bar file at {}", path.display()),
            });
        }

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.clone()))
            .map_err(|e| EngineError::BarFetchFailed {
                instrument: instrument.to_string(),
                reason: e.to_string(),
            })?
            .finish()
            .map_err(|e| EngineError::BarFetchFailed {
                instrument: instrument.to_string(),
                reason: e.to_string(),
            })?;

        rows_to_bars(&df, instrument)?
            .into_iter()
            .filter(|b| range.contains(b.date()))
            .map(Ok)
            .collect()
    }

    fn instruments(&self, market: &str) -> Result<Vec<InstrumentCode>, EngineError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| EngineError::ArtifactMissing(format!("{}: {e}", self.root.display())))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(code) = InstrumentCode::parse(stem) {
                if market.is_empty() || code.as_str().starts_with(market) {
                    out.push(code);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn members(&self, index_name: &str) -> Result<Vec<InstrumentCode>, EngineError> {
        let path = self.root.join(format!("{index_name}.members"));
        let contents = fs::read_to_string(&path)
            .map_err(|e| EngineError::ArtifactMissing(format!("{}: {e}", path.display())))?;
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(InstrumentCode::parse)
            .collect()
    }
}

fn rows_to_bars(df: &DataFrame, instrument: InstrumentCode) -> Result<Vec<Bar>, EngineError> {
    use chrono::NaiveDate;
    use rust_decimal::prelude::*;
    use rust_decimal::Decimal;

    let fail = |col: &str, e: PolarsError| EngineError::BarFetchFailed {
        instrument: instrument.to_string(),
        reason: format!("column `{col}`: {e}"),
    };

    let date_col = df
        .column("date")
        .map_err(|e| fail("date", e))?
        .cast(&DataType::String)
        .map_err(|e| fail("date", e))?;
    let dates = date_col.str().map_err(|e| fail("date", e))?;

    let col_f64 = |name: &str| -> Result<Float64Chunked, EngineError> {
        Ok(df
            .column(name)
            .map_err(|e| fail(name, e))?
            .cast(&DataType::Float64)
            .map_err(|e| fail(name, e))?
            .f64()
            .map_err(|e| fail(name, e))?
            .clone())
    };
    let opens = col_f64("open")?;
    let highs = col_f64("high")?;
    let lows = col_f64("low")?;
    let closes = col_f64("close")?;
    let volumes = col_f64("volume")?;
    let amounts = col_f64("amount")?;

    let to_decimal = |v: Option<f64>, col: &str, row: usize| -> Result<Decimal, EngineError> {
        let v = v.ok_or_else(|| EngineError::BarFetchFailed {
            instrument: instrument.to_string(),
            reason: format!("null `{col}` at row {row}"),
        })?;
        Decimal::from_f64(v).ok_or_else(|| EngineError::BarFetchFailed {
            instrument: instrument.to_string(),
            reason: format!("non-finite `{col}` at row {row}"),
        })
    };

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let raw_date = dates.get(i).ok_or_else(|| EngineError::BarFetchFailed {
            instrument: instrument.to_string(),
            reason: format!("null `date` at row {i}"),
        })?;
        let date_only = raw_date.split(&[' ', 'T'][..]).next().unwrap_or(raw_date);
        let date = NaiveDate::parse_from_str(date_only, "%Y-%m-%d").map_err(|e| EngineError::BarFetchFailed {
            instrument: instrument.to_string(),
            reason: format!("unparseable date {raw_date:?}: {e}"),
        })?;

        out.push(Bar {
            instrument,
            timestamp: date.and_hms_opt(0, 0, 0).expect("midnight is always valid"),
            open: to_decimal(opens.get(i), "open", i)?,
            high: to_decimal(highs.get(i), "high", i)?,
            low: to_decimal(lows.get(i), "low", i)?,
            close: to_decimal(closes.get(i), "close", i)?,
            volume: to_decimal(volumes.get(i), "volume", i)?,
            amount: to_decimal(amounts.get(i), "amount", i)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_bars_for_one_instrument() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "sh600000.csv",
            "date,open,high,low,close,volume,amount\n2024-01-02,10,10,10,10,1000,10000\n",
        );
        let store = CsvBarStore::new(dir.path());
        let instrument = InstrumentCode::parse("sh600000").unwrap();
        let range = DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        let bars = store.bars(instrument, range, Period::Day).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn missing_file_is_bar_fetch_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvBarStore::new(dir.path());
        let instrument = InstrumentCode::parse("sh600000").unwrap();
        let range = DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        let err = store.bars(instrument, range, Period::Day).unwrap_err();
        assert!(matches!(err, EngineError::BarFetchFailed { .. }));
    }

    #[test]
    fn instruments_lists_csv_stems() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "sh600000.csv", "date,open,high,low,close,volume,amount\n");
        write_file(dir.path(), "sz000001.csv", "date,open,high,low,close,volume,amount\n");
        let store = CsvBarStore::new(dir.path());
        let found = store.instruments("").unwrap();
        assert_eq!(found.len(), 2);
    }
}
