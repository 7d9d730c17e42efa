//! File-backed access token store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{AuthProvider, ProviderError, ProviderResult};
use crate::error::{ScreenError, ScreenResult};

/// Broker tokens are treated as valid for 12 hours after issue
pub const TOKEN_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn issued_now(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Utc::now() + Duration::hours(TOKEN_TTL_HOURS),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Token persisted as JSON; implements `AuthProvider` for the broker client
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, token: &StoredToken) -> ScreenResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| ScreenError::Auth(format!("failed to serialise token: {}", e)))?;
        std::fs::write(&self.path, json)?;
        info!("Token saved to {}", self.path.display());
        Ok(())
    }

    /// Read the stored token; `None` when missing or unreadable
    pub fn load(&self) -> Option<StoredToken> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Ignoring unreadable token file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl AuthProvider for FileTokenStore {
    async fn valid_token(&self) -> ProviderResult<String> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.load();
        }

        match cached.as_ref() {
            Some(token) if !token.is_expired_at(Utc::now()) => Ok(token.access_token.clone()),
            Some(_) => Err(ProviderError::Auth(
                "access token has expired; run `breakout-screener login`".to_string(),
            )),
            None => Err(ProviderError::Auth(format!(
                "no access token in {}; run `breakout-screener login`",
                self.path.display()
            ))),
        }
    }
}
