//! Configuration management
//!
//! Handles loading and validating the JSON configuration file, with
//! environment variable support (via `.env`) for broker credentials and the
//! webhook URL. The resulting `Config` is immutable for the rest of the run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{ScreenError, ScreenResult};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub screener: ScreenerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    /// Populated from the environment only
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Config {
    /// Load configuration from a JSON file, apply environment overrides and
    /// validate. A missing file falls back to defaults.
    pub fn load(path: impl AsRef<Path>) -> ScreenResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ScreenError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Self::from_json_str(&contents)?
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Config::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration JSON. Missing sections and fields take defaults.
    pub fn from_json_str(contents: &str) -> ScreenResult<Self> {
        serde_json::from_str(contents)
            .map_err(|e| ScreenError::Config(format!("failed to parse config JSON: {}", e)))
    }

    /// Pull secrets from the process environment
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("UPSTOX_API_KEY") {
            self.credentials.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("UPSTOX_API_SECRET") {
            self.credentials.api_secret = Some(v);
        }
        if let Ok(v) = std::env::var("UPSTOX_REDIRECT_URI") {
            self.credentials.redirect_uri = Some(v);
        }
        if let Ok(v) = std::env::var("DISCORD_WEBHOOK_URL") {
            self.notification.webhook_url = Some(v);
        }
    }

    pub fn validate(&self) -> ScreenResult<()> {
        self.screener.validate()?;

        if self.reporting.max_reports == 0 {
            return Err(ScreenError::Config("max_reports must be >= 1".into()));
        }
        if self.run.concurrency == 0 {
            return Err(ScreenError::Config("concurrency must be >= 1".into()));
        }
        if self.provider.rate_limit == 0 {
            return Err(ScreenError::Config("rate_limit must be >= 1".into()));
        }
        if self.reporting.failure_report_min_rules_passed > 4 {
            return Err(ScreenError::Config(
                "failure_report_min_rules_passed must be between 0 and 4".into(),
            ));
        }
        Ok(())
    }
}

/// Screening thresholds and indicator windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerConfig {
    #[serde(default = "default_ema_period_short")]
    pub ema_period_short: usize,
    #[serde(default = "default_ema_period_long")]
    pub ema_period_long: usize,
    /// Sessions preceding the evaluation bar used for the rolling high
    #[serde(default = "default_lookback_period")]
    pub lookback_period: usize,
    /// Sessions preceding the evaluation bar used for the average volume
    #[serde(default = "default_avg_volume_lookback")]
    pub avg_volume_lookback: usize,
    #[serde(default = "default_price_drop_percent_min")]
    pub price_drop_percent_min: f64,
    #[serde(default = "default_price_drop_percent_max")]
    pub price_drop_percent_max: f64,
    #[serde(default = "default_volume_surge_min")]
    pub volume_surge_min: f64,
    #[serde(default = "default_volume_surge_max")]
    pub volume_surge_max: f64,
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    #[serde(default = "default_true")]
    pub enable_max_price_limit: bool,
}

fn default_ema_period_short() -> usize {
    20
}
fn default_ema_period_long() -> usize {
    50
}
fn default_lookback_period() -> usize {
    50
}
fn default_avg_volume_lookback() -> usize {
    50
}
fn default_price_drop_percent_min() -> f64 {
    0.0
}
fn default_price_drop_percent_max() -> f64 {
    10.0
}
fn default_volume_surge_min() -> f64 {
    2.0
}
fn default_volume_surge_max() -> f64 {
    2.5
}
fn default_min_price() -> f64 {
    25.0
}
fn default_max_price() -> f64 {
    1500.0
}
fn default_true() -> bool {
    true
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            ema_period_short: default_ema_period_short(),
            ema_period_long: default_ema_period_long(),
            lookback_period: default_lookback_period(),
            avg_volume_lookback: default_avg_volume_lookback(),
            price_drop_percent_min: default_price_drop_percent_min(),
            price_drop_percent_max: default_price_drop_percent_max(),
            volume_surge_min: default_volume_surge_min(),
            volume_surge_max: default_volume_surge_max(),
            min_price: default_min_price(),
            max_price: default_max_price(),
            enable_max_price_limit: true,
        }
    }
}

impl ScreenerConfig {
    /// Number of bars needed to evaluate the latest session
    pub fn required_history(&self) -> usize {
        self.ema_period_long
            .max(self.ema_period_short)
            .max(self.lookback_period + 1)
            .max(self.avg_volume_lookback + 1)
    }

    pub fn validate(&self) -> ScreenResult<()> {
        let periods = [
            ("ema_period_short", self.ema_period_short),
            ("ema_period_long", self.ema_period_long),
            ("lookback_period", self.lookback_period),
            ("avg_volume_lookback", self.avg_volume_lookback),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ScreenError::Config(format!("{} must be >= 1", name)));
            }
        }

        if self.ema_period_short >= self.ema_period_long {
            return Err(ScreenError::Config(format!(
                "ema_period_short ({}) must be < ema_period_long ({})",
                self.ema_period_short, self.ema_period_long
            )));
        }

        let thresholds = [
            ("price_drop_percent_min", self.price_drop_percent_min),
            ("price_drop_percent_max", self.price_drop_percent_max),
            ("volume_surge_min", self.volume_surge_min),
            ("volume_surge_max", self.volume_surge_max),
            ("min_price", self.min_price),
            ("max_price", self.max_price),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(ScreenError::Config(format!("{} must be finite", name)));
            }
        }

        if self.price_drop_percent_min > self.price_drop_percent_max {
            return Err(ScreenError::Config(format!(
                "price_drop_percent_min ({}) > price_drop_percent_max ({})",
                self.price_drop_percent_min, self.price_drop_percent_max
            )));
        }
        if self.volume_surge_min < 0.0 {
            return Err(ScreenError::Config("volume_surge_min must be >= 0".into()));
        }
        if self.volume_surge_min > self.volume_surge_max {
            return Err(ScreenError::Config(format!(
                "volume_surge_min ({}) > volume_surge_max ({})",
                self.volume_surge_min, self.volume_surge_max
            )));
        }
        if self.min_price < 0.0 {
            return Err(ScreenError::Config("min_price must be >= 0".into()));
        }
        if self.enable_max_price_limit && self.max_price < self.min_price {
            return Err(ScreenError::Config(format!(
                "max_price ({}) < min_price ({})",
                self.max_price, self.min_price
            )));
        }
        Ok(())
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub stock_list_file: String,
    pub valid_stock_list_file: String,
    pub output_dir: String,
    pub report_dir: String,
    pub analysis_dir: String,
    pub token_store_file: String,
    /// Directory of `{SYMBOL}.csv` files for the offline provider
    pub data_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stock_list_file: "stock_list.csv".to_string(),
            valid_stock_list_file: "valid_stock_list.csv".to_string(),
            output_dir: "outputs".to_string(),
            report_dir: "outputs/reports".to_string(),
            analysis_dir: "outputs/analysis".to_string(),
            token_store_file: "token_store.json".to_string(),
            data_dir: "data".to_string(),
        }
    }
}

/// Report artifacts and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Keep only this many shortlist reports (and as many failure reports)
    #[serde(default = "default_max_reports")]
    pub max_reports: usize,
    #[serde(default = "default_true")]
    pub failure_report: bool,
    /// Only list failed instruments that passed at least this many rules
    #[serde(default)]
    pub failure_report_min_rules_passed: usize,
    #[serde(default)]
    pub export_csv: bool,
}

fn default_max_reports() -> usize {
    2
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            max_reports: default_max_reports(),
            failure_report: true,
            failure_report_min_rules_passed: 0,
            export_csv: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Upstox,
    Csv,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upstox" => Ok(ProviderKind::Upstox),
            "csv" => Ok(ProviderKind::Csv),
            _ => Err(format!("Unknown provider: {}. Use 'upstox' or 'csv'", s)),
        }
    }
}

/// Series provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Retries for rate-limited requests before demoting to transient
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra calendar days fetched beyond the required sessions (weekends, holidays)
    #[serde(default = "default_fetch_buffer_days")]
    pub fetch_buffer_days: i64,
}

fn default_base_url() -> String {
    "https://api.upstox.com".to_string()
}
fn default_api_version() -> String {
    "v2".to_string()
}
fn default_rate_limit() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_fetch_buffer_days() -> i64 {
    40
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_base_url(),
            api_version: default_api_version(),
            rate_limit: default_rate_limit(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            fetch_buffer_days: default_fetch_buffer_days(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Display order of the shortlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingPolicy {
    #[default]
    InputOrder,
    VolumeSurgeDesc,
}

/// Engine execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum instruments fetched and evaluated at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_instrument_timeout_secs")]
    pub instrument_timeout_secs: u64,
    /// Whole-run deadline; unfinished instruments are skipped with a timeout
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub ranking: RankingPolicy,
}

fn default_concurrency() -> usize {
    3
}
fn default_instrument_timeout_secs() -> u64 {
    60
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            instrument_timeout_secs: default_instrument_timeout_secs(),
            deadline_secs: None,
            ranking: RankingPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn instrument_timeout(&self) -> Duration {
        Duration::from_secs(self.instrument_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Webhook notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, skip_serializing)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_notification_timeout_secs() -> u64 {
    15
}
fn default_username() -> String {
    "Breakout Screener".to_string()
}

impl NotificationConfig {
    /// Upper bound on delivering the run summary
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notification_timeout_secs(),
            username: default_username(),
        }
    }
}

/// Broker credentials (environment only)
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub redirect_uri: Option<String>,
}
