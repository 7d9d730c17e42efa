//! Offline series provider reading `{data_dir}/{SYMBOL}.csv`
//!
//! Expected columns: `date,open,high,low,close,volume` with ISO dates
//! (`YYYY-MM-DD`, or a full timestamp whose date part is used).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{ProviderError, ProviderResult, SeriesProvider};
use crate::types::normalize_bars;
use crate::{Bar, Instrument};

#[derive(Debug, Clone)]
pub struct CsvSeriesProvider {
    data_dir: PathBuf,
}

impl CsvSeriesProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, instrument: &Instrument) -> PathBuf {
        self.data_dir
            .join(format!("{}.csv", instrument.symbol.as_str()))
    }
}

#[async_trait]
impl SeriesProvider for CsvSeriesProvider {
    async fn fetch_daily_bars(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Vec<Bar>> {
        let path = self.path_for(instrument);
        if !path.exists() {
            return Err(ProviderError::NotFound(format!(
                "no data file {}",
                path.display()
            )));
        }

        let bars = tokio::task::spawn_blocking(move || load_csv(&path))
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?
            .map_err(|e| ProviderError::Transient(format!("{:#}", e)))?;

        Ok(bars
            .into_iter()
            .filter(|b| b.date >= from && b.date <= to)
            .collect())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.date())
        .with_context(|| format!("Failed to parse date: {}", s))
}

/// Load daily bars from a CSV file, skipping rows that fail validation
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).context("Failed to open CSV file")?;

    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 1))
        };

        let date = parse_date(record.get(0).context("Missing date column")?.trim())?;

        match Bar::new(
            date,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    row_idx + 2,
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars out of {} in {:?}",
            invalid_count,
            invalid_count + bars.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(normalize_bars(bars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_reads_and_filters_range() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "INFY.csv",
            "date,open,high,low,close,volume\n\
             2025-04-03,10,12,9,11,100\n\
             2025-04-01,10,12,9,11,100\n\
             2025-04-02,10,12,9,11,100\n\
             2025-04-04,10,12,9,11,100\n",
        );
        let provider = CsvSeriesProvider::new(dir.path());
        let inst = Instrument::new("INFY", "INE009A01021");
        let bars = provider
            .fetch_daily_bars(
                &inst,
                NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(),
                NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
            )
            .await
            .unwrap();
        let dates: Vec<u32> = bars.iter().map(|b| chrono::Datelike::day(&b.date)).collect();
        assert_eq!(dates, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvSeriesProvider::new(dir.path());
        let inst = Instrument::new("NOPE", "INE000000000");
        let err = provider
            .fetch_daily_bars(
                &inst,
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_invalid_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "X.csv",
            "date,open,high,low,close,volume\n\
             2025-04-01,10,12,9,11,100\n\
             2025-04-02,10,8,9,11,100\n\
             2025-04-03T00:00:00+05:30,10,12,9,11,-5\n\
             2025-04-04 00:00:00,10,12,9,11,50\n",
        );
        let bars = load_csv(dir.path().join("X.csv")).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].volume, 50.0);
    }

    #[test]
    fn test_nan_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "Y.csv",
            "date,open,high,low,close,volume\n\
             2025-04-01,10,12,9,11,100\n\
             2025-04-02,10,12,9,NaN,100\n\
             2025-04-03,10,12,9,11,inf\n",
        );
        let bars = load_csv(dir.path().join("Y.csv")).unwrap();
        assert_eq!(bars.len(), 1);
        assert!(bars[0].close.is_finite());
    }
}
