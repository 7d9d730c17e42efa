//! Screening engine
//!
//! Drives one batch run over the universe:
//! `Init -> Loading -> Evaluating(i) -> Aggregating -> Done`.
//!
//! Each instrument is fetched, computed and evaluated independently, up to
//! `run.concurrency` at a time. Every instrument owns one result slot, so
//! completion order never affects the output. Per-instrument failures become
//! skip entries; only `Config` and `Auth` errors abort the run.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, RankingPolicy};
use crate::error::{ScreenError, ScreenResult};
use crate::evaluator::{evaluate, ScreeningResult};
use crate::indicators::IndicatorSnapshot;
use crate::provider::SeriesProvider;
use crate::types::normalize_bars;
use crate::Instrument;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Loading,
    Evaluating { index: usize, total: usize },
    Aggregating,
    Done,
}

/// Why an instrument was left out of both the pass and fail tallies
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SkipReason {
    InsufficientHistory { required: usize, available: usize },
    DivisionUndefined(String),
    NotFound(String),
    Transient(String),
    Timeout,
}

impl SkipReason {
    /// Per-instrument skip for a non-fatal error; `None` for fatal ones
    pub fn from_error(err: &ScreenError) -> Option<Self> {
        if err.is_fatal() {
            return None;
        }
        Some(match err {
            ScreenError::InsufficientHistory {
                required,
                available,
            } => SkipReason::InsufficientHistory {
                required: *required,
                available: *available,
            },
            ScreenError::DivisionUndefined(msg) => SkipReason::DivisionUndefined(msg.clone()),
            ScreenError::NotFound(msg) => SkipReason::NotFound(msg.clone()),
            ScreenError::RateLimited { .. } => SkipReason::Transient("rate limited".to_string()),
            other => SkipReason::Transient(other.to_string()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory { .. } => "InsufficientHistory",
            SkipReason::DivisionUndefined(_) => "DivisionUndefined",
            SkipReason::NotFound(_) => "NotFound",
            SkipReason::Transient(_) => "Transient",
            SkipReason::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InsufficientHistory {
                required,
                available,
            } => write!(
                f,
                "insufficient history ({} of {} bars)",
                available, required
            ),
            SkipReason::DivisionUndefined(msg) => write!(f, "division undefined: {}", msg),
            SkipReason::NotFound(msg) => write!(f, "not found: {}", msg),
            SkipReason::Transient(msg) => write!(f, "transient: {}", msg),
            SkipReason::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedInstrument {
    pub instrument: Instrument,
    pub reason: SkipReason,
}

/// Aggregated output of one run
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningRun {
    /// Shortlist, in display order
    pub passed: Vec<ScreeningResult>,
    /// Evaluated instruments that failed at least one rule, in input order
    pub failed: Vec<ScreeningResult>,
    pub failed_count: usize,
    pub skipped: Vec<SkippedInstrument>,
    pub total: usize,
    /// Latest session date among evaluated instruments, or the requested end date
    pub screening_date: NaiveDate,
    pub run_timestamp: DateTime<Utc>,
    pub duration: Duration,
}

impl ScreeningRun {
    pub fn evaluated(&self) -> impl Iterator<Item = &ScreeningResult> {
        self.passed.iter().chain(self.failed.iter())
    }
}

enum InstrumentOutcome {
    Evaluated(ScreeningResult),
    Skipped(SkipReason),
}

pub struct ScreeningEngine {
    provider: Arc<dyn SeriesProvider>,
    config: Arc<Config>,
    phase: Mutex<RunPhase>,
    progress: Option<ProgressBar>,
}

impl ScreeningEngine {
    pub fn new(provider: Arc<dyn SeriesProvider>, config: Arc<Config>) -> Self {
        Self {
            provider,
            config,
            phase: Mutex::new(RunPhase::Init),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.lock().map(|p| *p).unwrap_or(RunPhase::Init)
    }

    fn enter(&self, phase: RunPhase) {
        debug!(?phase, "Run phase");
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Calendar window requested from the provider for a run ending at `to`
    pub fn fetch_window(&self, to: NaiveDate) -> (NaiveDate, NaiveDate) {
        let sessions = self.config.screener.required_history() as i64;
        // ~5 sessions per 7 calendar days, plus a buffer for holidays
        let days = sessions * 7 / 5 + self.config.provider.fetch_buffer_days;
        (to - ChronoDuration::days(days), to)
    }

    /// Screen `universe` with bars up to and including `to`
    pub async fn run(&self, universe: &[Instrument], to: NaiveDate) -> ScreenResult<ScreeningRun> {
        let started = Instant::now();
        let run_timestamp = Utc::now();

        self.enter(RunPhase::Loading);
        self.config.validate()?;
        let mut seen = HashSet::new();
        if let Some(dup) = universe.iter().find(|i| !seen.insert(&i.symbol)) {
            return Err(ScreenError::Config(format!(
                "duplicate symbol in universe: {}",
                dup.symbol
            )));
        }

        let total = universe.len();
        let (from, to) = self.fetch_window(to);
        info!(total, %from, %to, "Starting screening run");

        let mut slots: Vec<Option<InstrumentOutcome>> = (0..total).map(|_| None).collect();
        let instrument_timeout = self.config.run.instrument_timeout();
        let deadline = self
            .config
            .run
            .deadline()
            .map(|d| tokio::time::Instant::now() + d);

        let mut results = stream::iter(universe.iter().enumerate())
            .map(|(index, instrument)| async move {
                self.enter(RunPhase::Evaluating { index, total });
                let outcome =
                    match tokio::time::timeout(instrument_timeout, self.screen_one(instrument, from, to))
                        .await
                    {
                        Ok(Ok(result)) => Ok(InstrumentOutcome::Evaluated(result)),
                        Ok(Err(err)) => {
                            debug!(symbol = %instrument.symbol, kind = err.kind(), "Screening error: {}", err);
                            match SkipReason::from_error(&err) {
                                Some(reason) => Ok(InstrumentOutcome::Skipped(reason)),
                                None => Err(err),
                            }
                        }
                        Err(_) => Ok(InstrumentOutcome::Skipped(SkipReason::Timeout)),
                    };
                (index, outcome)
            })
            .buffer_unordered(self.config.run.concurrency);

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, results.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Run deadline reached; abandoning unfinished instruments");
                        break;
                    }
                },
                None => results.next().await,
            };

            let Some((index, outcome)) = next else { break };
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }

            let instrument = &universe[index];
            match outcome {
                Ok(InstrumentOutcome::Evaluated(result)) => {
                    info!(
                        symbol = %instrument.symbol,
                        passed = result.passed,
                        rules_passed = result.rules_passed_count(),
                        "Evaluated"
                    );
                    slots[index] = Some(InstrumentOutcome::Evaluated(result));
                }
                Ok(InstrumentOutcome::Skipped(reason)) => {
                    warn!(symbol = %instrument.symbol, reason = %reason, "Skipping instrument");
                    slots[index] = Some(InstrumentOutcome::Skipped(reason));
                }
                Err(err) => {
                    warn!(symbol = %instrument.symbol, error = %err, "Fatal error, aborting run");
                    return Err(err);
                }
            }
        }
        drop(results);

        self.enter(RunPhase::Aggregating);
        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();

        for (instrument, slot) in universe.iter().zip(slots) {
            match slot {
                Some(InstrumentOutcome::Evaluated(result)) if result.passed => passed.push(result),
                Some(InstrumentOutcome::Evaluated(result)) => failed.push(result),
                Some(InstrumentOutcome::Skipped(reason)) => skipped.push(SkippedInstrument {
                    instrument: instrument.clone(),
                    reason,
                }),
                None => skipped.push(SkippedInstrument {
                    instrument: instrument.clone(),
                    reason: SkipReason::Timeout,
                }),
            }
        }

        if self.config.run.ranking == RankingPolicy::VolumeSurgeDesc {
            // Stable sort keeps input order among equal surges
            passed.sort_by(|a, b| {
                b.metrics
                    .volume_surge_pct
                    .total_cmp(&a.metrics.volume_surge_pct)
            });
        }

        let screening_date = passed
            .iter()
            .chain(failed.iter())
            .map(|r| r.date)
            .max()
            .unwrap_or(to);

        let run = ScreeningRun {
            failed_count: failed.len(),
            passed,
            failed,
            skipped,
            total,
            screening_date,
            run_timestamp,
            duration: started.elapsed(),
        };

        info!(
            total = run.total,
            passed = run.passed.len(),
            failed = run.failed_count,
            skipped = run.skipped.len(),
            duration_secs = format!("{:.2}", run.duration.as_secs_f64()),
            "Screening complete"
        );
        self.enter(RunPhase::Done);
        Ok(run)
    }

    /// Fetch, compute and evaluate a single instrument
    async fn screen_one(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ScreenResult<ScreeningResult> {
        let screener = &self.config.screener;
        let bars = self
            .provider
            .fetch_daily_bars(instrument, from, to)
            .await
            .map_err(ScreenError::from)?;
        let bars = normalize_bars(bars);

        let snapshot = IndicatorSnapshot::compute(&bars, screener)?;
        let latest = bars.last().ok_or(ScreenError::InsufficientHistory {
            required: screener.required_history(),
            available: 0,
        })?;

        debug!(
            symbol = %instrument.symbol,
            close = latest.close,
            ema_short = snapshot.ema_short,
            ema_long = snapshot.ema_long,
            high = snapshot.highest_close_lookback,
            avg_volume = snapshot.avg_volume_lookback,
            "Indicators"
        );

        let evaluation = evaluate(latest, &snapshot, screener)?;
        Ok(ScreeningResult::new(
            instrument.clone(),
            latest.date,
            evaluation,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_from_error() {
        assert!(SkipReason::from_error(&ScreenError::Auth("x".into())).is_none());
        assert!(SkipReason::from_error(&ScreenError::Config("x".into())).is_none());
        assert_eq!(
            SkipReason::from_error(&ScreenError::InsufficientHistory {
                required: 51,
                available: 15
            }),
            Some(SkipReason::InsufficientHistory {
                required: 51,
                available: 15
            })
        );
        assert_eq!(
            SkipReason::from_error(&ScreenError::RateLimited { retry_after: None })
                .unwrap()
                .kind(),
            "Transient"
        );
        assert_eq!(
            SkipReason::from_error(&ScreenError::Io(std::io::Error::other("disk"))),
            Some(SkipReason::Transient("I/O error: disk".to_string()))
        );
    }

    #[test]
    fn test_fetch_window_covers_required_sessions() {
        struct Never;
        #[async_trait::async_trait]
        impl SeriesProvider for Never {
            async fn fetch_daily_bars(
                &self,
                _i: &Instrument,
                _f: NaiveDate,
                _t: NaiveDate,
            ) -> crate::provider::ProviderResult<Vec<crate::Bar>> {
                Ok(vec![])
            }
        }

        let engine = ScreeningEngine::new(Arc::new(Never), Arc::new(Config::default()));
        let to = NaiveDate::from_ymd_opt(2025, 4, 25).unwrap();
        let (from, end) = engine.fetch_window(to);
        assert_eq!(end, to);
        // 51 sessions → 71 calendar days + 40 buffer
        assert_eq!((to - from).num_days(), 111);
        assert_eq!(engine.phase(), RunPhase::Init);
    }
}
