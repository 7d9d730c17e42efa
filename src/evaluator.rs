//! Condition evaluator
//!
//! Applies the four screening rules to the latest bar of one instrument:
//!
//! 1. Trend alignment: EMA(short) above EMA(long)
//! 2. Proximity to the rolling high: drop from the prior high within
//!    `[price_drop_percent_min, price_drop_percent_max]`
//! 3. Volume ratio: today's volume over the trailing average within
//!    `[volume_surge_min, volume_surge_max]`
//! 4. Price range: close at least `min_price` and, when the limit is enabled,
//!    at most `max_price`
//!
//! Metrics are reported for passing and failing instruments alike.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScreenerConfig;
use crate::error::{ScreenError, ScreenResult};
use crate::indicators::IndicatorSnapshot;
use crate::{Bar, Instrument};

/// Screening rule, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    TrendAlignment,
    ProximityToHigh,
    VolumeRatio,
    PriceRange,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::TrendAlignment,
        Condition::ProximityToHigh,
        Condition::VolumeRatio,
        Condition::PriceRange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Condition::TrendAlignment => "trend_alignment",
            Condition::ProximityToHigh => "proximity_to_high",
            Condition::VolumeRatio => "volume_ratio",
            Condition::PriceRange => "price_range",
        }
    }

    /// Human-friendly label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Condition::TrendAlignment => "Trend",
            Condition::ProximityToHigh => "Drop%",
            Condition::VolumeRatio => "Volume",
            Condition::PriceRange => "Price",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of a single rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub condition: Condition,
    pub passed: bool,
    /// Set only when the rule failed
    pub reason: Option<String>,
}

impl ConditionOutcome {
    fn check(condition: Condition, passed: bool, reason: impl FnOnce() -> String) -> Self {
        Self {
            condition,
            passed,
            reason: (!passed).then(reason),
        }
    }
}

/// Raw values behind a decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub close: f64,
    /// Highest close of the lookback window (excluding the current bar)
    pub breakout_level: f64,
    pub volume_surge_pct: f64,
    pub ema_short: f64,
    pub ema_long: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub surge_ratio: f64,
    pub price_drop_pct: f64,
}

/// Per-rule outcomes plus metrics for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: Metrics,
    pub outcomes: Vec<ConditionOutcome>,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }
}

/// Final decision for one instrument on one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub instrument: Instrument,
    /// Session date of the evaluated bar
    pub date: NaiveDate,
    pub passed: bool,
    pub metrics: Metrics,
    pub outcomes: Vec<ConditionOutcome>,
    /// Failed rules in evaluation order; empty iff `passed`
    pub failure_reasons: Vec<Condition>,
}

impl ScreeningResult {
    pub fn new(instrument: Instrument, date: NaiveDate, evaluation: Evaluation) -> Self {
        let failure_reasons: Vec<Condition> = evaluation
            .outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.condition)
            .collect();

        Self {
            instrument,
            date,
            passed: failure_reasons.is_empty(),
            metrics: evaluation.metrics,
            outcomes: evaluation.outcomes,
            failure_reasons,
        }
    }

    pub fn rules_passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn passed_rule(&self, condition: Condition) -> bool {
        self.outcomes
            .iter()
            .find(|o| o.condition == condition)
            .is_some_and(|o| o.passed)
    }
}

/// Evaluate all four rules for `bar` against precomputed indicators.
///
/// Fails with `DivisionUndefined` when the trailing average volume or the
/// rolling high is zero.
pub fn evaluate(
    bar: &Bar,
    snapshot: &IndicatorSnapshot,
    config: &ScreenerConfig,
) -> ScreenResult<Evaluation> {
    if snapshot.avg_volume_lookback <= 0.0 {
        return Err(ScreenError::DivisionUndefined(format!(
            "average volume over {} sessions is zero",
            config.avg_volume_lookback
        )));
    }
    if snapshot.highest_close_lookback <= 0.0 {
        return Err(ScreenError::DivisionUndefined(
            "rolling high close is zero".to_string(),
        ));
    }

    let close = bar.close;
    let breakout_level = snapshot.highest_close_lookback;
    let drop_pct = (breakout_level - close) / breakout_level * 100.0;
    let surge_ratio = bar.volume / snapshot.avg_volume_lookback;

    let trend = ConditionOutcome::check(
        Condition::TrendAlignment,
        snapshot.ema_short > snapshot.ema_long,
        || {
            format!(
                "EMA({}) {:.2} not above EMA({}) {:.2}",
                config.ema_period_short,
                snapshot.ema_short,
                config.ema_period_long,
                snapshot.ema_long
            )
        },
    );

    let proximity = ConditionOutcome::check(
        Condition::ProximityToHigh,
        config.price_drop_percent_min <= drop_pct && drop_pct <= config.price_drop_percent_max,
        || {
            format!(
                "drop {:.2}% from high {:.2} outside [{}, {}]",
                drop_pct,
                breakout_level,
                config.price_drop_percent_min,
                config.price_drop_percent_max
            )
        },
    );

    let volume = ConditionOutcome::check(
        Condition::VolumeRatio,
        config.volume_surge_min <= surge_ratio && surge_ratio <= config.volume_surge_max,
        || {
            format!(
                "volume ratio {:.2}x outside [{}, {}]",
                surge_ratio, config.volume_surge_min, config.volume_surge_max
            )
        },
    );

    let above_min = close >= config.min_price;
    let below_max = !config.enable_max_price_limit || close <= config.max_price;
    let price = ConditionOutcome::check(Condition::PriceRange, above_min && below_max, || {
        if !above_min {
            format!("close {:.2} below min price {}", close, config.min_price)
        } else {
            format!("close {:.2} above max price {}", close, config.max_price)
        }
    });

    let outcomes = vec![trend, proximity, volume, price];
    for outcome in &outcomes {
        debug!(
            condition = %outcome.condition,
            passed = outcome.passed,
            reason = outcome.reason.as_deref().unwrap_or(""),
            "Condition check"
        );
    }

    Ok(Evaluation {
        metrics: Metrics {
            close,
            breakout_level,
            volume_surge_pct: (surge_ratio - 1.0) * 100.0,
            ema_short: snapshot.ema_short,
            ema_long: snapshot.ema_long,
            volume: bar.volume,
            avg_volume: snapshot.avg_volume_lookback,
            surge_ratio,
            price_drop_pct: drop_pct,
        },
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar::new_unchecked(
            NaiveDate::from_ymd_opt(2025, 4, 25).unwrap(),
            close,
            close,
            close,
            close,
            volume,
        )
    }

    fn snapshot(ema_short: f64, ema_long: f64, high: f64, avg_vol: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_short,
            ema_long,
            highest_close_lookback: high,
            avg_volume_lookback: avg_vol,
        }
    }

    fn failed(eval: &Evaluation) -> Vec<Condition> {
        eval.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.condition)
            .collect()
    }

    #[test]
    fn test_all_rules_pass() {
        let config = ScreenerConfig::default();
        // 5% below a high of 100, volume 2.2x
        let eval = evaluate(&bar(95.0, 2200.0), &snapshot(94.0, 90.0, 100.0, 1000.0), &config)
            .unwrap();
        assert!(eval.passed());
        assert_relative_eq!(eval.metrics.price_drop_pct, 5.0);
        assert_relative_eq!(eval.metrics.volume_surge_pct, 120.0, epsilon = 1e-9);
        assert_relative_eq!(eval.metrics.breakout_level, 100.0);
    }

    #[test]
    fn test_trend_failure() {
        let config = ScreenerConfig::default();
        let eval = evaluate(&bar(95.0, 2200.0), &snapshot(90.0, 90.0, 100.0, 1000.0), &config)
            .unwrap();
        assert_eq!(failed(&eval), vec![Condition::TrendAlignment]);
        assert!(eval.outcomes[0].reason.is_some());
        assert!(eval.outcomes[1].reason.is_none());
    }

    #[test]
    fn test_drop_bounds_inclusive() {
        let config = ScreenerConfig::default();
        let snap = snapshot(94.0, 90.0, 100.0, 1000.0);

        // Exactly at the high: drop 0% == min
        assert!(evaluate(&bar(100.0, 2200.0), &snap, &config).unwrap().passed());
        // Exactly 10% below: drop == max
        assert!(evaluate(&bar(90.0, 2200.0), &snap, &config).unwrap().passed());
        // Beyond max
        let eval = evaluate(&bar(89.0, 2200.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::ProximityToHigh]);
    }

    #[test]
    fn test_close_above_high_needs_negative_min() {
        let mut config = ScreenerConfig::default();
        let snap = snapshot(94.0, 90.0, 100.0, 1000.0);

        // Close above the prior high gives a negative drop; rejected at min = 0
        let eval = evaluate(&bar(101.0, 2200.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::ProximityToHigh]);
        assert_relative_eq!(eval.metrics.price_drop_pct, -1.0, epsilon = 1e-9);

        // A negative min admits breakouts above the high, boundary inclusive
        config.price_drop_percent_min = -1.0;
        assert!(evaluate(&bar(101.0, 2200.0), &snap, &config).unwrap().passed());
        let eval = evaluate(&bar(101.5, 2200.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::ProximityToHigh]);
    }

    #[test]
    fn test_volume_ratio_bounds() {
        let config = ScreenerConfig::default();
        let snap = snapshot(94.0, 90.0, 100.0, 1000.0);

        assert!(evaluate(&bar(95.0, 2000.0), &snap, &config).unwrap().passed());
        assert!(evaluate(&bar(95.0, 2500.0), &snap, &config).unwrap().passed());
        let eval = evaluate(&bar(95.0, 2600.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::VolumeRatio]);
        let eval = evaluate(&bar(95.0, 1900.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::VolumeRatio]);
    }

    #[test]
    fn test_zero_average_volume_is_division_undefined() {
        let config = ScreenerConfig::default();
        let err = evaluate(&bar(95.0, 0.0), &snapshot(94.0, 90.0, 100.0, 0.0), &config)
            .unwrap_err();
        assert!(matches!(err, ScreenError::DivisionUndefined(_)));
    }

    #[test]
    fn test_price_range_with_limit() {
        let config = ScreenerConfig::default();
        let snap = snapshot(1900.0, 1800.0, 2000.0, 1000.0);
        let eval = evaluate(&bar(1950.0, 2200.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::PriceRange]);
        assert!(eval.outcomes[3]
            .reason
            .as_deref()
            .unwrap()
            .contains("above max price"));
    }

    #[test]
    fn test_max_price_not_applied_when_disabled() {
        let config = ScreenerConfig {
            enable_max_price_limit: false,
            ..Default::default()
        };
        for close in [1501.0, 10_000.0, 1e7] {
            let snap = snapshot(close, close * 0.9, close / 0.95, 1000.0);
            let eval = evaluate(&bar(close, 2200.0), &snap, &config).unwrap();
            assert!(eval.outcomes[3].passed, "close {} rejected", close);
        }
    }

    #[test]
    fn test_min_price_always_applied() {
        let config = ScreenerConfig {
            enable_max_price_limit: false,
            ..Default::default()
        };
        let snap = snapshot(20.0, 19.0, 20.0, 1000.0);
        let eval = evaluate(&bar(19.0, 2200.0), &snap, &config).unwrap();
        assert_eq!(failed(&eval), vec![Condition::PriceRange]);
    }

    #[test]
    fn test_passed_iff_all_outcomes_pass() {
        let instrument = Instrument::new("TEST", "INE000000000");
        let date = NaiveDate::from_ymd_opt(2025, 4, 25).unwrap();
        let metrics = evaluate(
            &bar(95.0, 2200.0),
            &snapshot(94.0, 90.0, 100.0, 1000.0),
            &ScreenerConfig::default(),
        )
        .unwrap()
        .metrics;

        for mask in 0u8..16 {
            let outcomes: Vec<ConditionOutcome> = Condition::ALL
                .iter()
                .enumerate()
                .map(|(i, &c)| ConditionOutcome::check(c, mask & (1 << i) != 0, || "x".into()))
                .collect();
            let result = ScreeningResult::new(
                instrument.clone(),
                date,
                Evaluation {
                    metrics,
                    outcomes,
                },
            );
            assert_eq!(result.passed, mask == 0b1111, "mask {:04b}", mask);
            assert_eq!(result.failure_reasons.is_empty(), result.passed);
            assert_eq!(result.rules_passed_count(), mask.count_ones() as usize);
        }
    }

    #[test]
    fn test_failure_reasons_keep_rule_order() {
        let config = ScreenerConfig::default();
        // Trend, volume and price all fail
        let eval = evaluate(&bar(10.0, 100.0), &snapshot(9.0, 10.0, 10.5, 1000.0), &config)
            .unwrap();
        let result = ScreeningResult::new(
            Instrument::new("PENNY", "INE000000001"),
            NaiveDate::from_ymd_opt(2025, 4, 25).unwrap(),
            eval,
        );
        assert_eq!(
            result.failure_reasons,
            vec![
                Condition::TrendAlignment,
                Condition::VolumeRatio,
                Condition::PriceRange
            ]
        );
        assert!(result.passed_rule(Condition::ProximityToHigh));
        assert_eq!(result.rules_passed_count(), 1);
    }
}
