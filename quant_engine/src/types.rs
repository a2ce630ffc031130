/// types.rs — Shared value types
///
/// `InstrumentCode` and `DateRange` are constructed once and compared by
/// value everywhere downstream; neither carries a back-pointer to any
/// container that holds it.
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A-share market prefix: Shanghai, Shenzhen, or Beijing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Market {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Market {
    fn prefix(self) -> &'static str {
        match self {
            Market::Shanghai => "sh",
            Market::Shenzhen => "sz",
            Market::Beijing => "bj",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sh" => Some(Market::Shanghai),
            "sz" => Some(Market::Shenzhen),
            "bj" => Some(Market::Beijing),
            _ => None,
        }
    }
}

/// Eight-character instrument identifier: 2-char market prefix + 6-digit
/// code, e.g. `sh600000`. Value-equal on byte content; sorts bytewise, which
/// is the tie-break order used for Top-K selection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentCode([u8; 8]);

impl InstrumentCode {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.len() != 8 {
            return Err(EngineError::FormatInvalid(format!(
                "instrument code {raw:?} must be 8 characters, got {}",
                lower.len()
            )));
        }
        let (prefix, digits) = lower.split_at(2);
        if Market::from_prefix(prefix).is_none() {
            return Err(EngineError::FormatInvalid(format!(
                "instrument code {raw:?} has unknown market prefix {prefix:?}"
            )));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::FormatInvalid(format!(
                "instrument code {raw:?} has non-numeric suffix {digits:?}"
            )));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(lower.as_bytes());
        Ok(Self(bytes))
    }

    pub fn market(&self) -> Market {
        Market::from_prefix(self.as_str().get(..2).unwrap_or("")).expect("validated at parse time")
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("validated ascii at parse time")
    }
}

impl fmt::Debug for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrumentCode({})", self.as_str())
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// An inclusive calendar-date range; `start <= end` is enforced at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::ConfigInvalid(format!(
                "date range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_code() {
        let code = InstrumentCode::parse("SH600000").unwrap();
        assert_eq!(code.as_str(), "sh600000");
        assert_eq!(code.market(), Market::Shanghai);
    }

    #[test]
    fn rejects_unknown_market() {
        assert!(InstrumentCode::parse("xx600000").is_err());
    }

    #[test]
    fn rejects_non_numeric_suffix() {
        assert!(InstrumentCode::parse("sh60000a").is_err());
    }

    #[test]
    fn date_range_rejects_inverted() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(DateRange::new(a, b).is_err());
    }

    #[test]
    fn instrument_codes_sort_lexicographically() {
        let a = InstrumentCode::parse("sh600000").unwrap();
        let b = InstrumentCode::parse("sz000001").unwrap();
        assert!(a < b);
    }
}
