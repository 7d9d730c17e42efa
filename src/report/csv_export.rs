//! Metrics export for every evaluated instrument

use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::engine::ScreeningRun;
use crate::error::ScreenResult;

#[derive(Debug, Serialize)]
struct MetricsRow<'a> {
    symbol: &'a str,
    isin: &'a str,
    date: NaiveDate,
    close: f64,
    ema_short: f64,
    ema_long: f64,
    breakout_level: f64,
    volume: f64,
    avg_volume: f64,
    volume_ratio: f64,
    price_drop_pct: f64,
    rules_passed: usize,
    passed: bool,
}

pub fn metrics_csv_filename(date: NaiveDate) -> String {
    format!("analysis_{}.csv", date.format("%Y%m%d"))
}

/// Write passed and failed instruments (skips excluded) to `dir`
pub fn write_metrics_csv(dir: impl AsRef<Path>, run: &ScreeningRun) -> ScreenResult<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(metrics_csv_filename(run.screening_date));

    let mut writer = csv::Writer::from_path(&path)?;
    let mut rows = 0usize;
    for r in run.evaluated() {
        let m = &r.metrics;
        writer.serialize(MetricsRow {
            symbol: r.instrument.symbol.as_str(),
            isin: &r.instrument.isin,
            date: r.date,
            close: m.close,
            ema_short: m.ema_short,
            ema_long: m.ema_long,
            breakout_level: m.breakout_level,
            volume: m.volume,
            avg_volume: m.avg_volume,
            volume_ratio: m.surge_ratio,
            price_drop_pct: m.price_drop_pct,
            rules_passed: r.rules_passed_count(),
            passed: r.passed,
        })?;
        rows += 1;
    }
    writer.flush()?;

    info!(rows, "Metrics exported to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{result, run};

    #[test]
    fn test_filename() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 5).unwrap();
        assert_eq!(metrics_csv_filename(date), "analysis_20250405.csv");
    }

    #[test]
    fn test_export_excludes_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let run = run(
            vec![result("INFY", 1500.0, 120.0, [true; 4])],
            vec![result("WIPRO", 250.0, 10.0, [true, false, false, true])],
            2,
        );
        let path = write_metrics_csv(dir.path(), &run).unwrap();
        assert!(path.ends_with("analysis_20250425.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "symbol");
        assert_eq!(&headers[headers.len() - 1], "passed");

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][0], "INFY");
        assert_eq!(&records[1][0], "WIPRO");
        assert_eq!(&records[1][11], "2");
        assert_eq!(&records[1][12], "false");
    }
}
