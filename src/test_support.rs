//! Shared fixtures for unit tests

use chrono::{NaiveDate, TimeZone, Utc};
use std::time::Duration;

use crate::engine::{ScreeningRun, SkipReason, SkippedInstrument};
use crate::evaluator::{Condition, ConditionOutcome, Evaluation, Metrics, ScreeningResult};
use crate::Instrument;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 25).unwrap()
}

/// A result whose per-rule outcomes follow `mask` (in `Condition::ALL` order)
pub fn result(symbol: &str, close: f64, surge_pct: f64, mask: [bool; 4]) -> ScreeningResult {
    let outcomes = Condition::ALL
        .iter()
        .zip(mask)
        .map(|(&condition, passed)| ConditionOutcome {
            condition,
            passed,
            reason: (!passed).then(|| format!("{} failed", condition.label())),
        })
        .collect();

    ScreeningResult::new(
        Instrument::new(symbol, format!("INE{}01", symbol)),
        date(),
        Evaluation {
            metrics: Metrics {
                close,
                breakout_level: close * 0.97,
                volume_surge_pct: surge_pct,
                ema_short: close * 0.95,
                ema_long: close * 0.9,
                volume: 300_000.0,
                avg_volume: 300_000.0 / (1.0 + surge_pct / 100.0),
                surge_ratio: 1.0 + surge_pct / 100.0,
                price_drop_pct: -3.09,
            },
            outcomes,
        },
    )
}

pub fn run(passed: Vec<ScreeningResult>, failed: Vec<ScreeningResult>, skipped: usize) -> ScreeningRun {
    let skipped: Vec<SkippedInstrument> = (0..skipped)
        .map(|i| SkippedInstrument {
            instrument: Instrument::new(format!("SKIP{}", i), format!("INESKIP{}", i)),
            reason: SkipReason::Timeout,
        })
        .collect();

    ScreeningRun {
        total: passed.len() + failed.len() + skipped.len(),
        failed_count: failed.len(),
        passed,
        failed,
        skipped,
        screening_date: date(),
        run_timestamp: Utc.with_ymd_and_hms(2025, 4, 25, 16, 5, 0).unwrap(),
        duration: Duration::from_millis(4200),
    }
}
