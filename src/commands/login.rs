//! Login commands - obtain and store a broker access token

use anyhow::{anyhow, Context, Result};
use breakout_screener::provider::upstox::{authorization_url, exchange_code_for_token};
use breakout_screener::provider::{FileTokenStore, StoredToken};
use tracing::info;

use super::load_config;

/// Print the authorisation URL the user has to open
pub fn run(config_path: String) -> Result<()> {
    let config = load_config(&config_path, None)?;
    let url = authorization_url(&config.provider, &config.credentials)
        .ok_or_else(|| anyhow!("UPSTOX_API_KEY and UPSTOX_REDIRECT_URI must be set (environment or .env)"))?;

    println!("\nOpen this URL in a browser and log in:\n");
    println!("  {}\n", url);
    println!("After login you are redirected to your redirect URI with ?code=...");
    println!("Then run:\n");
    println!("  breakout-screener exchange-token --code <CODE>\n");
    Ok(())
}

/// Exchange the authorisation code and persist the token
pub fn exchange(config_path: String, code: String) -> Result<()> {
    let config = load_config(&config_path, None)?;

    let rt = tokio::runtime::Runtime::new()?;
    let access_token = rt
        .block_on(exchange_code_for_token(
            &config.provider,
            &config.credentials,
            code.trim(),
        ))
        .context("Token exchange failed")?;

    let token = StoredToken::issued_now(access_token);
    let store = FileTokenStore::new(&config.paths.token_store_file);
    store.save(&token)?;

    info!(expires_at = %token.expires_at, "Access token stored");
    println!(
        "Access token saved to {} (valid until {})",
        store.path().display(),
        token.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}
