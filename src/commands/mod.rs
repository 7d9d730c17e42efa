pub mod login;
pub mod screen;
pub mod validate;

use anyhow::{Context, Result};
use breakout_screener::config::{Config, ProviderKind};
use breakout_screener::provider::{
    upstox::ClientConfig, AuthProvider, CsvSeriesProvider, FileTokenStore, RetryPolicy,
    RetryingProvider, SeriesProvider, UpstoxClient,
};
use std::sync::Arc;
use tracing::info;

/// Load the config file and apply a command-line provider override
pub fn load_config(path: &str, provider: Option<ProviderKind>) -> Result<Config> {
    let mut config = Config::load(path).with_context(|| format!("Failed to load config from {}", path))?;
    if let Some(kind) = provider {
        config.provider.kind = kind;
    }
    Ok(config)
}

/// Series provider selected by the config
pub fn build_provider(config: &Config) -> Result<Arc<dyn SeriesProvider>> {
    let policy = RetryPolicy {
        max_retries: config.provider.max_retries,
        base_delay: config.provider.retry_base_delay(),
    };

    match config.provider.kind {
        ProviderKind::Upstox => {
            let auth: Arc<dyn AuthProvider> =
                Arc::new(FileTokenStore::new(&config.paths.token_store_file));
            let client = UpstoxClient::new(ClientConfig::from(&config.provider), auth)
                .context("Failed to create Upstox client")?;
            info!(
                base_url = %config.provider.base_url,
                rate_limit = config.provider.rate_limit,
                "Using Upstox series provider"
            );
            Ok(Arc::new(RetryingProvider::new(client, policy)))
        }
        ProviderKind::Csv => {
            info!(data_dir = %config.paths.data_dir, "Using CSV series provider");
            Ok(Arc::new(CsvSeriesProvider::new(&config.paths.data_dir)))
        }
    }
}
