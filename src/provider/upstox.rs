//! Upstox historical candle client
//!
//! Fetches daily candles for NSE equities with:
//! - Bearer token from an injected `AuthProvider`
//! - Token-bucket rate limiting shared across concurrent fetches
//! - Status-code mapping onto the provider error classes

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AuthProvider, ProviderError, ProviderResult, SeriesProvider};
use crate::common::{RateLimiter, RateLimiterConfig};
use crate::config::{Credentials, ProviderConfig};
use crate::types::normalize_bars;
use crate::{Bar, Instrument};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.upstox.com".to_string(),
            api_version: "v2".to_string(),
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default().with_rate(10),
        }
    }
}

impl From<&ProviderConfig> for ClientConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_version: config.api_version.clone(),
            timeout: config.request_timeout(),
            rate_limiter: RateLimiterConfig::default().with_rate(config.rate_limit),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    status: String,
    #[serde(default)]
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct UpstoxClient {
    client: Client,
    config: ClientConfig,
    auth: Arc<dyn AuthProvider>,
    rate_limiter: RateLimiter,
}

impl UpstoxClient {
    pub fn new(config: ClientConfig, auth: Arc<dyn AuthProvider>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to build HTTP client: {}", e)))?;
        let rate_limiter = RateLimiter::new(config.rate_limiter.clone());

        Ok(Self {
            client,
            config,
            auth,
            rate_limiter,
        })
    }

    fn candle_url(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Url> {
        // The '|' in instrument keys must be percent-encoded in the path
        let key = instrument.instrument_key().replace('|', "%7C");
        let url = format!(
            "{}/{}/historical-candle/{}/day/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            key,
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        Url::parse(&url).map_err(|e| ProviderError::Transient(format!("invalid URL {}: {}", url, e)))
    }
}

#[async_trait]
impl SeriesProvider for UpstoxClient {
    async fn fetch_daily_bars(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Vec<Bar>> {
        let token = self.auth.valid_token().await?;
        let url = self.candle_url(instrument, from, to)?;

        self.rate_limiter.acquire().await;
        debug!(symbol = %instrument.symbol, %url, "Fetching daily candles");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        if let Some(err) = classify_status(status, &body, retry_after) {
            return Err(err);
        }

        parse_candles(&body, &instrument.symbol.to_string())
    }
}

/// Map a non-success HTTP status onto a provider error
fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    let snippet: String = body.chars().take(200).collect();
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Auth(format!("{}: {}", status, snippet))
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(snippet),
        // Unknown instrument keys come back as 400 with an "Invalid Instrument" message
        StatusCode::BAD_REQUEST if body.to_lowercase().contains("invalid instrument") => {
            ProviderError::NotFound(snippet)
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        _ => ProviderError::Transient(format!("{}: {}", status, snippet)),
    })
}

/// Convert the candle payload (newest first) into ascending validated bars
fn parse_candles(body: &str, symbol: &str) -> ProviderResult<Vec<Bar>> {
    let response: CandleResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Transient(format!("failed to parse candles: {}", e)))?;

    if response.status != "success" {
        return Err(ProviderError::Transient(format!(
            "unexpected response status '{}'",
            response.status
        )));
    }

    let rows = response.data.map(|d| d.candles).unwrap_or_default();
    let mut bars = Vec::with_capacity(rows.len());
    let mut invalid = 0usize;

    for row in rows {
        match parse_row(&row) {
            Some(bar) if bar.is_valid() => bars.push(bar),
            _ => invalid += 1,
        }
    }

    if invalid > 0 {
        warn!(symbol, invalid, "Dropped malformed candles");
    }

    Ok(normalize_bars(bars))
}

fn parse_row(row: &[Value]) -> Option<Bar> {
    let ts = row.first()?.as_str()?;
    let date = DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(ts.get(..10)?, "%Y-%m-%d").ok())?;
    let num = |i: usize| row.get(i).and_then(Value::as_f64);
    Some(Bar::new_unchecked(date, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?))
}

/// Browser URL the user opens to authorise the app
pub fn authorization_url(config: &ProviderConfig, credentials: &Credentials) -> Option<String> {
    let api_key = credentials.api_key.as_deref()?;
    let redirect_uri = credentials.redirect_uri.as_deref()?;
    let mut url = Url::parse(&format!(
        "{}/{}/login/authorization/dialog",
        config.base_url.trim_end_matches('/'),
        config.api_version
    ))
    .ok()?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", api_key)
        .append_pair("redirect_uri", redirect_uri);
    Some(url.to_string())
}

/// Exchange an authorisation code for an access token
pub async fn exchange_code_for_token(
    config: &ProviderConfig,
    credentials: &Credentials,
    code: &str,
) -> ProviderResult<String> {
    let missing = |name: &str| ProviderError::Auth(format!("{} is not set", name));
    let api_key = credentials.api_key.as_deref().ok_or_else(|| missing("UPSTOX_API_KEY"))?;
    let api_secret = credentials
        .api_secret
        .as_deref()
        .ok_or_else(|| missing("UPSTOX_API_SECRET"))?;
    let redirect_uri = credentials
        .redirect_uri
        .as_deref()
        .ok_or_else(|| missing("UPSTOX_REDIRECT_URI"))?;

    let url = format!(
        "{}/{}/login/authorization/token",
        config.base_url.trim_end_matches('/'),
        config.api_version
    );
    let client = Client::builder().timeout(config.request_timeout()).build()?;
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .form(&[
            ("code", code),
            ("client_id", api_key),
            ("client_secret", api_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::Auth(format!("token exchange failed ({}): {}", status, body)));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| ProviderError::Auth(format!("unexpected token response: {}", e)))?;
    Ok(token.access_token)
}
