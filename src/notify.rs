//! Run summary notifications
//!
//! Discord webhook delivery. Failures here are logged and never fail the run.

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::engine::ScreeningRun;

pub const MAX_LINES_PER_EMBED: usize = 40;
pub const MAX_CHARS_PER_EMBED: usize = 4000;
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;

const COLOR_RESULTS: u32 = 0x2ECC71;
const COLOR_NO_RESULTS: u32 = 0xFFA500;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected message {message}/{total}: HTTP {status}: {body}")]
    Rejected {
        message: usize,
        total: usize,
        status: u16,
        body: String,
    },
}

/// Sink for a run summary
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, run: &ScreeningRun) -> Result<(), NotifyError>;
}

pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
    username: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>, username: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            webhook_url: webhook_url.into(),
            username: username.into(),
        }
    }

    /// `None` when no webhook is configured
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        let url = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(Self::new(
            url,
            config.username.clone(),
            config.timeout(),
        ))
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, run: &ScreeningRun) -> Result<(), NotifyError> {
        let messages = build_messages(run, &self.username);
        let total = messages.len();

        for (i, payload) in messages.iter().enumerate() {
            let response = self.client.post(&self.webhook_url).json(payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Rejected {
                    message: i + 1,
                    total,
                    status: status.as_u16(),
                    body,
                });
            }
            info!("Discord notification sent (message {}/{})", i + 1, total);

            if i + 1 < total {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Ok(())
    }
}

/// Pack lines into descriptions of at most `max_lines` lines and `max_chars` characters
pub fn split_descriptions(lines: &[String], max_lines: usize, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for line in lines {
        let len = line.chars().count() + 1;
        if count > 0 && (count >= max_lines || current.chars().count() + len > max_chars) {
            parts.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push_str(line);
        current.push('\n');
        count += 1;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn footer_text(run: &ScreeningRun) -> String {
    let mut text = format!(
        "{} of {} passed | {} skipped",
        run.passed.len(),
        run.total,
        run.skipped.len()
    );
    if !run.skipped.is_empty() {
        let by_kind = run
            .skipped
            .iter()
            .map(|s| s.reason.kind())
            .counts()
            .into_iter()
            .sorted()
            .map(|(kind, n)| format!("{}: {}", kind, n))
            .join(", ");
        text.push_str(&format!(" ({})", by_kind));
    }
    text.push_str(&format!(" | {:.1}s", run.duration.as_secs_f64()));
    text
}

/// Webhook payloads for a run, at most `MAX_EMBEDS_PER_MESSAGE` embeds each
pub fn build_messages(run: &ScreeningRun, username: &str) -> Vec<Value> {
    let date = run.screening_date.format("%d %B %Y").to_string();
    let timestamp = run.run_timestamp.to_rfc3339();

    if run.passed.is_empty() {
        return vec![json!({
            "username": username,
            "embeds": [{
                "title": format!("📉 Daily Scan - {}", date),
                "description": "No instruments met the breakout criteria today.",
                "color": COLOR_NO_RESULTS,
                "footer": { "text": footer_text(run) },
                "timestamp": timestamp,
            }]
        })];
    }

    let lines: Vec<String> = run
        .passed
        .iter()
        .map(|r| format!("**{}** - ₹{:.2}", r.instrument.symbol, r.metrics.close))
        .collect();
    let parts = split_descriptions(&lines, MAX_LINES_PER_EMBED, MAX_CHARS_PER_EMBED);
    let total_parts = parts.len();
    debug!(lines = lines.len(), embeds = total_parts, "Built notification embeds");

    let embeds: Vec<Value> = parts
        .into_iter()
        .enumerate()
        .map(|(i, description)| {
            let mut title = format!("🚀 Breakout Alert - {}", date);
            if total_parts > 1 {
                title.push_str(&format!(" (Part {}/{})", i + 1, total_parts));
            }
            let mut embed = json!({
                "title": title,
                "description": description,
                "color": COLOR_RESULTS,
            });
            if i == 0 {
                embed["footer"] = json!({ "text": footer_text(run) });
                embed["timestamp"] = json!(timestamp);
            }
            embed
        })
        .collect();

    embeds
        .chunks(MAX_EMBEDS_PER_MESSAGE)
        .map(|chunk| json!({ "username": username, "embeds": chunk }))
        .collect()
}

/// Deliver the summary, bounded by `timeout`. Never fails the caller.
pub async fn send_summary(notifier: Option<&dyn Notifier>, run: &ScreeningRun, timeout: Duration) {
    let Some(notifier) = notifier else {
        warn!("Discord webhook URL not configured; skipping notification");
        return;
    };

    match tokio::time::timeout(timeout, notifier.notify(run)).await {
        Ok(Ok(())) => info!("Notification delivered"),
        Ok(Err(e)) => error!("Notification failed: {}", e),
        Err(_) => error!("Notification timed out after {:?}", timeout),
    }
}
