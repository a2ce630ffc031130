/// score.rs — Score Table Loader
///
/// Parses once per run; everything downstream sees an already-indexed
/// structure so per-bar lookups are O(log n) or O(1).
use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::EngineError;
use crate::types::InstrumentCode;

/// One (date, instrument) prediction. `value` carries the model's raw score;
/// higher is more bullish by convention. `confidence`, when present, is a
/// real in `[0, 1]` and is currently informational only — no operation in
/// this crate consumes it, but it round-trips through the loader so a
/// future strategy can.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub date: NaiveDate,
    pub instrument: InstrumentCode,
    pub value: f64,
    pub confidence: Option<f64>,
}

/// A loaded score artifact with by-date and by-instrument secondary
/// indices, built during a single pass over the parsed rows. Immutable and
/// shared read-only by every `SignalAdapter` in a run.
#[derive(Debug, Default)]
pub struct ScoreTable {
    by_date: BTreeMap<NaiveDate, BTreeMap<InstrumentCode, Score>>,
    by_instrument: BTreeMap<InstrumentCode, BTreeMap<NaiveDate, Score>>,
}

impl ScoreTable {
    /// Load a score artifact from a CSV or Parquet file. The format is
    /// inferred from the file extension; both paths fall through the same
    /// row-building code, so the (date, instrument, score) extraction logic
    /// is written once.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::ArtifactMissing(path.display().to_string()));
        }

        let df = read_frame(path)?;
        Self::from_dataframe(df, &path.display().to_string())
    }

    pub fn from_dataframe(df: DataFrame, source: &str) -> Result<Self, EngineError> {
        if df.height() == 0 {
            return Err(EngineError::Empty(source.to_string()));
        }

        let date_col = df
            .column("date")
            .map_err(|_| EngineError::FormatInvalid(format!("{source}: missing `date` column")))?;
        let instrument_col = df.column("instrument").map_err(|_| {
            EngineError::FormatInvalid(format!("{source}: missing `instrument` column"))
        })?;
        let score_col = df
            .column("score")
            .map_err(|_| EngineError::FormatInvalid(format!("{source}: missing `score` column")))?;
        let confidence_col = df.column("confidence").ok();

        let date_str = date_col
            .cast(&DataType::String)
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `date` column: {e}")))?;
        let dates = date_str
            .str()
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `date` column: {e}")))?;
        let instrument_str = instrument_col
            .cast(&DataType::String)
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `instrument` column: {e}")))?;
        let instruments = instrument_str
            .str()
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `instrument` column: {e}")))?;
        let score_f64 = score_col
            .cast(&DataType::Float64)
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `score` column: {e}")))?;
        let scores = score_f64
            .f64()
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `score` column: {e}")))?;
        let confidence_f64 = confidence_col
            .map(|c| c.cast(&DataType::Float64))
            .transpose()
            .map_err(|e| EngineError::FormatInvalid(format!("{source}: `confidence` column: {e}")))?;
        let confidences = confidence_f64.as_ref().map(|c| c.f64().unwrap());

        let mut table = ScoreTable::default();
        for i in 0..df.height() {
            let raw_date = dates
                .get(i)
                .ok_or_else(|| EngineError::FormatInvalid(format!("{source}: null date at row {i}")))?;
            let date = parse_date(raw_date)
                .ok_or_else(|| EngineError::FormatInvalid(format!("{source}: unparseable date {raw_date:?} at row {i}")))?;
            let raw_instrument = instruments.get(i).ok_or_else(|| {
                EngineError::FormatInvalid(format!("{source}: null instrument at row {i}"))
            })?;
            let instrument = InstrumentCode::parse(raw_instrument)?;
            let value = scores
                .get(i)
                .ok_or_else(|| EngineError::FormatInvalid(format!("{source}: null score at row {i}")))?;
            let confidence = confidences.and_then(|c| c.get(i));

            if table
                .by_date
                .entry(date)
                .or_default()
                .contains_key(&instrument)
            {
                return Err(EngineError::FormatInvalid(format!(
                    "{source}: duplicate (date={date}, instrument={instrument}) pair"
                )));
            }

            let score = Score {
                date,
                instrument,
                value,
                confidence,
            };
            table.by_date.entry(date).or_default().insert(instrument, score);
            table
                .by_instrument
                .entry(instrument)
                .or_default()
                .insert(date, score);
        }

        Ok(table)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.by_date.keys().copied()
    }

    pub fn scores_on(&self, date: NaiveDate) -> impl Iterator<Item = &Score> {
        self.by_date.get(&date).into_iter().flat_map(|m| m.values())
    }

    pub fn get(&self, date: NaiveDate, instrument: InstrumentCode) -> Option<&Score> {
        self.by_date.get(&date).and_then(|m| m.get(&instrument))
    }

    /// The append-only, per-instrument (date → score) view a `SignalAdapter`
    /// memoizes on first use.
    pub fn instrument_series(&self, instrument: InstrumentCode) -> Option<&BTreeMap<NaiveDate, Score>> {
        self.by_instrument.get(&instrument)
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

fn read_frame(path: &Path) -> Result<DataFrame, EngineError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "parquet" => ParquetReader::new(
            std::fs::File::open(path)
                .map_err(|e| EngineError::ArtifactCorrupt(format!("{}: {e}", path.display())))?,
        )
        .finish()
        .map_err(|e| EngineError::ArtifactCorrupt(format!("{}: {e}", path.display()))),
        _ => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .map_err(|e| EngineError::ArtifactCorrupt(format!("{}: {e}", path.display())))?
            .finish()
            .map_err(|e| EngineError::ArtifactCorrupt(format!("{}: {e}", path.display()))),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_only = raw.split(&[' ', 'T'][..]).next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_only, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_csv() {
        let f = write_csv("date,instrument,score\n2024-01-02,sh600000,0.5\n2024-01-02,sz000001,0.1\n");
        let table = ScoreTable::load(f.path()).unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(table.scores_on(d).count(), 2);
        let sh = InstrumentCode::parse("sh600000").unwrap();
        assert_eq!(table.get(d, sh).unwrap().value, 0.5);
    }

    #[test]
    fn missing_file_is_artifact_missing() {
        let err = ScoreTable::load("/nonexistent/path/scores.csv").unwrap_err();
        assert!(matches!(err, EngineError::ArtifactMissing(_)));
    }

    #[test]
    fn empty_table_is_rejected() {
        let f = write_csv("date,instrument,score\n");
        let err = ScoreTable::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::Empty(_)));
    }

    #[test]
    fn duplicate_key_is_format_invalid() {
        let f = write_csv(
            "date,instrument,score\n2024-01-02,sh600000,0.5\n2024-01-02,sh600000,0.2\n",
        );
        let err = ScoreTable::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::FormatInvalid(_)));
    }

    #[test]
    fn time_of_day_is_stripped_from_date() {
        let f = write_csv("date,instrument,score\n2024-01-02T00:00:00,sh600000,0.5\n");
        let table = ScoreTable::load(f.path()).unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(table.scores_on(d).count(), 1);
    }
}
