//! Instrument universe loading and validation
//!
//! The stock list is a CSV with `symbol` and `isin` columns. Rows missing
//! either are dropped with a warning; repeated symbols keep the first row.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ScreenError, ScreenResult};
use crate::provider::{ProviderError, SeriesProvider};
use crate::Instrument;

/// Load instruments from a stock list CSV
pub fn load_universe(path: impl AsRef<Path>) -> ScreenResult<Vec<Instrument>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let (symbol_idx, isin_idx) = match (column("symbol"), column("isin")) {
        (Some(s), Some(i)) => (s, i),
        _ => {
            return Err(ScreenError::Config(format!(
                "{} must contain 'symbol' and 'isin' columns",
                path.display()
            )))
        }
    };

    let mut seen = HashSet::new();
    let mut instruments = Vec::new();

    for (row_idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unreadable row {}: {}", row_idx + 2, e);
                continue;
            }
        };

        let symbol = record.get(symbol_idx).unwrap_or("").trim().to_uppercase();
        let isin = record.get(isin_idx).unwrap_or("").trim().to_string();

        if symbol.is_empty() || isin.is_empty() {
            warn!("Skipping row {} with missing symbol or isin", row_idx + 2);
            continue;
        }
        if !seen.insert(symbol.clone()) {
            warn!(symbol = %symbol, "Skipping duplicate symbol at row {}", row_idx + 2);
            continue;
        }

        instruments.push(Instrument::new(symbol, isin));
    }

    info!("Loaded {} instruments from {}", instruments.len(), path.display());
    Ok(instruments)
}

#[derive(Serialize)]
struct UniverseRow<'a> {
    symbol: &'a str,
    isin: &'a str,
}

/// Write instruments back out in stock list format
pub fn write_universe(path: impl AsRef<Path>, instruments: &[Instrument]) -> ScreenResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for inst in instruments {
        writer.serialize(UniverseRow {
            symbol: inst.symbol.as_str(),
            isin: &inst.isin,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Outcome of probing the universe against the provider
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: Vec<Instrument>,
    pub invalid: Vec<Instrument>,
}

/// Check each instrument with a short fetch ending at `as_of`.
///
/// Instruments the provider does not know are dropped; transient failures
/// keep the instrument. Authentication failures abort.
pub async fn validate_universe(
    provider: &dyn SeriesProvider,
    instruments: Vec<Instrument>,
    as_of: NaiveDate,
) -> ScreenResult<ValidationReport> {
    let from = as_of - Duration::days(5);
    let mut report = ValidationReport::default();

    for inst in instruments {
        match provider.fetch_daily_bars(&inst, from, as_of).await {
            Ok(_) => report.valid.push(inst),
            Err(ProviderError::NotFound(msg)) => {
                warn!(symbol = %inst.symbol, isin = %inst.isin, "Invalid instrument: {}", msg);
                report.invalid.push(inst);
            }
            Err(ProviderError::Auth(msg)) => return Err(ScreenError::Auth(msg)),
            Err(e) => {
                warn!(symbol = %inst.symbol, "Could not validate, keeping: {}", e);
                report.valid.push(inst);
            }
        }
    }

    info!(
        valid = report.valid.len(),
        invalid = report.invalid.len(),
        "Universe validation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResult;
    use crate::Bar;
    use async_trait::async_trait;

    fn write(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("stock_list.csv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_drops_malformed_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "symbol,isin\n\
             reliance , INE002A01018\n\
             ,INE467B01029\n\
             HDFCBANK,\n\
             RELIANCE,INE002A01018\n\
             TCS,INE467B01029\n",
        );
        let universe = load_universe(&path).unwrap();
        let symbols: Vec<&str> = universe.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["RELIANCE", "TCS"]);
        assert_eq!(universe[0].isin, "INE002A01018");
    }

    #[test]
    fn test_missing_columns_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "ticker,code\nTCS,INE467B01029\n");
        assert!(matches!(load_universe(&path), Err(ScreenError::Config(_))));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("valid.csv");
        let instruments = vec![
            Instrument::new("INFY", "INE009A01021"),
            Instrument::new("TCS", "INE467B01029"),
        ];
        write_universe(&path, &instruments).unwrap();
        assert_eq!(load_universe(&path).unwrap(), instruments);
    }

    struct Known(&'static str);

    #[async_trait]
    impl SeriesProvider for Known {
        async fn fetch_daily_bars(
            &self,
            instrument: &Instrument,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> ProviderResult<Vec<Bar>> {
            match instrument.symbol.as_str() {
                s if s == self.0 => Ok(vec![]),
                "FLAKY" => Err(ProviderError::Transient("timeout".into())),
                _ => Err(ProviderError::NotFound(instrument.instrument_key())),
            }
        }
    }

    #[tokio::test]
    async fn test_validate_drops_unknown_keeps_transient() {
        let provider = Known("TCS");
        let report = validate_universe(
            &provider,
            vec![
                Instrument::new("TCS", "INE467B01029"),
                Instrument::new("GONE", "INE000000000"),
                Instrument::new("FLAKY", "INE000000001"),
            ],
            NaiveDate::from_ymd_opt(2025, 4, 25).unwrap(),
        )
        .await
        .unwrap();
        let valid: Vec<&str> = report.valid.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(valid, vec!["TCS", "FLAKY"]);
        assert_eq!(report.invalid.len(), 1);
    }
}
