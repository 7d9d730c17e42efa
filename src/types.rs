//! Core data types shared by the screener

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error, PartialEq)]
pub enum BarValidationError {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One daily OHLCV session. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(date, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (trusted sources and test fixtures)
    pub fn new_unchecked(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(BarValidationError::NonFinite { field, value });
            }
        }

        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Sort bars ascending by date and drop repeated sessions, keeping the last
/// bar seen for each date.
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Ticker symbol using Arc<str> for cheap cloning
///
/// Symbols travel through the engine, results, reports and notifications;
/// Arc<str> keeps each clone O(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A screenable equity. Identity is the symbol; the ISIN is descriptive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub isin: String,
}

impl Instrument {
    pub fn new(symbol: impl AsRef<str>, isin: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(symbol),
            isin: isin.into(),
        }
    }

    /// Broker instrument key for NSE cash equities
    pub fn instrument_key(&self) -> String {
        format!("NSE_EQ|{}", self.isin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    #[test]
    fn test_valid_bar() {
        let bar = Bar::new(day(1), 100.0, 105.0, 99.0, 103.0, 1000.0);
        assert!(bar.is_ok());
    }

    #[test]
    fn test_bar_rejects_high_below_low() {
        let err = Bar::new(day(1), 100.0, 98.0, 99.0, 99.0, 1000.0).unwrap_err();
        assert!(matches!(err, BarValidationError::HighLessThanLow { .. }));
    }

    #[test]
    fn test_bar_rejects_negative_volume() {
        let err = Bar::new(day(1), 100.0, 105.0, 99.0, 103.0, -1.0).unwrap_err();
        assert_eq!(err, BarValidationError::NegativeVolume(-1.0));
    }

    #[test]
    fn test_bar_rejects_close_outside_range() {
        let err = Bar::new(day(1), 100.0, 105.0, 99.0, 110.0, 1000.0).unwrap_err();
        assert!(matches!(err, BarValidationError::CloseOutOfRange { .. }));
    }

    #[test]
    fn test_bar_rejects_non_finite_values() {
        let err = Bar::new(day(1), 10.0, 12.0, 9.0, f64::NAN, 100.0).unwrap_err();
        assert!(matches!(err, BarValidationError::NonFinite { field: "close", .. }));

        let err = Bar::new(day(1), 10.0, 12.0, 9.0, 11.0, f64::NAN).unwrap_err();
        assert!(matches!(err, BarValidationError::NonFinite { field: "volume", .. }));

        let err = Bar::new(day(1), 10.0, f64::INFINITY, 9.0, 11.0, 100.0).unwrap_err();
        assert!(matches!(err, BarValidationError::NonFinite { field: "high", .. }));

        assert!(!Bar::new_unchecked(day(1), f64::NEG_INFINITY, 12.0, 9.0, 11.0, 100.0).is_valid());
    }

    #[test]
    fn test_bar_allows_zero_volume() {
        assert!(Bar::new(day(1), 100.0, 105.0, 99.0, 103.0, 0.0).is_ok());
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let bars = vec![
            Bar::new_unchecked(day(3), 1.0, 1.0, 1.0, 3.0, 1.0),
            Bar::new_unchecked(day(1), 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new_unchecked(day(3), 1.0, 1.0, 1.0, 4.0, 1.0),
            Bar::new_unchecked(day(2), 1.0, 1.0, 1.0, 2.0, 1.0),
        ];
        let out = normalize_bars(bars);
        let closes: Vec<f64> = out.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_instrument_key() {
        let inst = Instrument::new("RELIANCE", "INE002A01018");
        assert_eq!(inst.instrument_key(), "NSE_EQ|INE002A01018");
        assert_eq!(inst.symbol.as_str(), "RELIANCE");
    }
}
