//! Series providers
//!
//! A `SeriesProvider` supplies ascending daily bars for one instrument. The
//! engine only depends on this trait; the broker client, the offline CSV
//! reader and test fakes all implement it.

pub mod csv;
pub mod token;
pub mod upstox;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::error::ScreenError;
use crate::{Bar, Instrument};

pub use self::csv::CsvSeriesProvider;
pub use token::{FileTokenStore, StoredToken};
pub use upstox::UpstoxClient;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("auth error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient error: {0}")]
    Transient(String),
}

impl From<ProviderError> for ScreenError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Auth(msg) => ScreenError::Auth(msg),
            ProviderError::NotFound(msg) => ScreenError::NotFound(msg),
            ProviderError::RateLimited { retry_after } => ScreenError::RateLimited { retry_after },
            ProviderError::Transient(msg) => ScreenError::Transient(msg),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transient(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Source of daily OHLCV bars
#[async_trait]
pub trait SeriesProvider: Send + Sync {
    /// Bars for `instrument` between `from` and `to` inclusive, ascending by date
    async fn fetch_daily_bars(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Vec<Bar>>;
}

/// Supplies a currently valid access token to authenticated providers
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn valid_token(&self) -> ProviderResult<String>;
}

/// Retry policy for rate-limited requests
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^attempt, or the server's hint if larger
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        retry_after.map_or(backoff, |hint| hint.max(backoff))
    }
}

/// Wraps a provider so that `RateLimited` answers are retried with backoff
/// and demoted to `Transient` once the retry budget is spent.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: SeriesProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SeriesProvider> SeriesProvider for RetryingProvider<P> {
    async fn fetch_daily_bars(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Vec<Bar>> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch_daily_bars(instrument, from, to).await {
                Err(ProviderError::RateLimited { retry_after }) => {
                    if attempt >= self.policy.max_retries {
                        return Err(ProviderError::Transient(format!(
                            "rate limited after {} retries",
                            attempt
                        )));
                    }
                    let delay = self.policy.delay_for(attempt, retry_after);
                    warn!(
                        symbol = %instrument.symbol,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
