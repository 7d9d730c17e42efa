//! Technical indicators for the screening conditions
//!
//! Window aggregates (mean, maximum) are computed with the `ta` crate. The EMA
//! is recursive and seeded with the simple average of the first `period`
//! closes; `ta`'s own EMA seeds from the first value instead, so only the seed
//! is taken from `ta` here.
//!
//! Rolling windows always cover the sessions immediately *preceding* the
//! evaluation bar and never read the evaluation bar itself.

use serde::{Deserialize, Serialize};
use ta::indicators::{Maximum, SimpleMovingAverage};
use ta::Next;

use crate::config::ScreenerConfig;
use crate::error::{ScreenError, ScreenResult};
use crate::Bar;

/// Derived per-instrument values for the latest session. Recomputed every run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub ema_short: f64,
    pub ema_long: f64,
    /// Highest close over the lookback window, excluding the current bar
    pub highest_close_lookback: f64,
    /// Mean volume over the volume window, excluding the current bar
    pub avg_volume_lookback: f64,
}

impl IndicatorSnapshot {
    pub fn compute(bars: &[Bar], config: &ScreenerConfig) -> ScreenResult<Self> {
        ensure_history(bars.len(), config.required_history())?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        Ok(Self {
            ema_short: ema_latest(&closes, config.ema_period_short)?,
            ema_long: ema_latest(&closes, config.ema_period_long)?,
            highest_close_lookback: highest_close(bars, config.lookback_period)?,
            avg_volume_lookback: average_volume(bars, config.avg_volume_lookback)?,
        })
    }
}

fn ensure_history(available: usize, required: usize) -> ScreenResult<()> {
    if available < required {
        return Err(ScreenError::InsufficientHistory {
            required,
            available,
        });
    }
    Ok(())
}

fn window_error(e: impl std::fmt::Debug) -> ScreenError {
    ScreenError::Config(format!("invalid indicator window: {:?}", e))
}

/// Simple average of `values` using `ta`'s SMA over the full slice
fn mean(values: &[f64]) -> ScreenResult<f64> {
    let mut sma = SimpleMovingAverage::new(values.len()).map_err(window_error)?;
    Ok(values.iter().fold(0.0, |_, &v| sma.next(v)))
}

/// Calculate Exponential Moving Average series
///
/// Entries before index `period - 1` are `None`. The value at `period - 1` is
/// the SMA of the first `period` values; later values follow
/// `ema = value * k + ema_prev * (1 - k)` with `k = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 || values.len() < period {
        return vec![None; values.len()];
    }

    let seed = match mean(&values[..period]) {
        Ok(v) => v,
        Err(_) => return vec![None; values.len()],
    };
    let k = 2.0 / (period as f64 + 1.0);

    let mut result = Vec::with_capacity(values.len());
    result.extend(std::iter::repeat(None).take(period - 1));
    result.push(Some(seed));

    let mut prev = seed;
    for &value in &values[period..] {
        prev = value * k + prev * (1.0 - k);
        result.push(Some(prev));
    }

    result
}

/// Latest EMA value. Fails with `InsufficientHistory` when fewer than
/// `period` values are available.
pub fn ema_latest(values: &[f64], period: usize) -> ScreenResult<f64> {
    if period == 0 {
        return Err(ScreenError::Config("EMA period must be >= 1".into()));
    }
    ensure_history(values.len(), period)?;
    ema(values, period)
        .last()
        .copied()
        .flatten()
        .ok_or(ScreenError::InsufficientHistory {
            required: period,
            available: values.len(),
        })
}

/// The `lookback` bars immediately preceding the last bar
fn trailing_window(bars: &[Bar], lookback: usize) -> ScreenResult<&[Bar]> {
    if lookback == 0 {
        return Err(ScreenError::Config("lookback must be >= 1".into()));
    }
    ensure_history(bars.len(), lookback + 1)?;
    let end = bars.len() - 1;
    Ok(&bars[end - lookback..end])
}

/// Highest close over the `lookback` sessions before the current bar
pub fn highest_close(bars: &[Bar], lookback: usize) -> ScreenResult<f64> {
    let window = trailing_window(bars, lookback)?;
    let mut max = Maximum::new(lookback).map_err(window_error)?;
    Ok(window
        .iter()
        .fold(f64::NEG_INFINITY, |_, b| max.next(b.close)))
}

/// Mean volume over the `lookback` sessions before the current bar
pub fn average_volume(bars: &[Bar], lookback: usize) -> ScreenResult<f64> {
    let window = trailing_window(bars, lookback)?;
    let volumes: Vec<f64> = window.iter().map(|b| b.volume).collect();
    mean(&volumes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bars_from(closes: &[f64], volumes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&c, &v))| {
                Bar::new_unchecked(start + chrono::Duration::days(i as i64), c, c, c, c, v)
            })
            .collect()
    }

    #[test]
    fn test_ema_over_exactly_period_is_sma() {
        let values = [10.0, 11.0, 12.0, 13.0, 14.0];
        let result = ema_latest(&values, 5).unwrap();
        assert_relative_eq!(result, 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ema_recursion() {
        let values = [2.0, 4.0, 6.0, 8.0];
        let series = ema(&values, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_relative_eq!(series[2].unwrap(), 4.0);
        // k = 0.5 → 8 * 0.5 + 4 * 0.5
        assert_relative_eq!(series[3].unwrap(), 6.0);
    }

    #[test]
    fn test_ema_deterministic() {
        let values: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0).collect();
        let a = ema_latest(&values, 20).unwrap();
        let b = ema_latest(&values, 20).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn test_ema_insufficient() {
        let err = ema_latest(&[1.0, 2.0], 3).unwrap_err();
        assert!(matches!(
            err,
            ScreenError::InsufficientHistory {
                required: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn test_highest_close_excludes_current() {
        let bars = bars_from(&[5.0, 9.0, 7.0, 8.0, 50.0], &[1.0; 5]);
        assert_relative_eq!(highest_close(&bars, 3).unwrap(), 9.0);
        assert_relative_eq!(highest_close(&bars, 2).unwrap(), 8.0);
    }

    #[test]
    fn test_average_volume_excludes_current() {
        let bars = bars_from(&[1.0; 5], &[100.0, 200.0, 300.0, 400.0, 10_000.0]);
        assert_relative_eq!(average_volume(&bars, 4).unwrap(), 250.0);
        assert_relative_eq!(average_volume(&bars, 2).unwrap(), 350.0);
    }

    #[test]
    fn test_window_requires_lookback_plus_one() {
        let bars = bars_from(&[1.0; 3], &[1.0; 3]);
        assert!(highest_close(&bars, 2).is_ok());
        assert!(matches!(
            highest_close(&bars, 3),
            Err(ScreenError::InsufficientHistory {
                required: 4,
                available: 3
            })
        ));
        assert!(average_volume(&bars, 3).is_err());
    }

    #[test]
    fn test_perturbing_current_bar_leaves_windows_unchanged() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let volumes: Vec<f64> = (0..30).map(|i| 1000.0 + i as f64 * 10.0).collect();
        let mut bars = bars_from(&closes, &volumes);

        let high_before = highest_close(&bars, 20).unwrap();
        let vol_before = average_volume(&bars, 20).unwrap();

        let last = bars.len() - 1;
        bars[last].close = 9_999.0;
        bars[last].volume = 1e9;

        assert_relative_eq!(highest_close(&bars, 20).unwrap(), high_before);
        assert_relative_eq!(average_volume(&bars, 20).unwrap(), vol_before);
    }

    #[test]
    fn test_snapshot_reports_required_history() {
        let bars = bars_from(&[100.0; 15], &[1000.0; 15]);
        let config = ScreenerConfig {
            lookback_period: 20,
            avg_volume_lookback: 20,
            ..Default::default()
        };
        let err = IndicatorSnapshot::compute(&bars, &config).unwrap_err();
        assert!(matches!(
            err,
            ScreenError::InsufficientHistory {
                required: 50,
                available: 15
            }
        ));
    }
}
