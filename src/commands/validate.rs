//! Validate command - check the raw stock list and write the validated list

use anyhow::{Context, Result};
use breakout_screener::config::ProviderKind;
use breakout_screener::universe::{load_universe, validate_universe, write_universe};
use chrono::Local;
use tracing::info;

use super::{build_provider, load_config};

pub fn run(config_path: String, provider: Option<ProviderKind>) -> Result<()> {
    let config = load_config(&config_path, provider)?;
    let source = &config.paths.stock_list_file;
    let target = &config.paths.valid_stock_list_file;

    let instruments = load_universe(source)
        .with_context(|| format!("Failed to load stock list from {}", source))?;
    let total = instruments.len();
    info!("Validating {} instruments from {}", total, source);

    let rt = tokio::runtime::Runtime::new()?;
    let provider = build_provider(&config)?;
    let report = rt
        .block_on(validate_universe(
            provider.as_ref(),
            instruments,
            Local::now().date_naive(),
        ))
        .context("Validation aborted")?;

    write_universe(target, &report.valid)
        .with_context(|| format!("Failed to write {}", target))?;

    println!("\n{}", "=".repeat(60));
    println!("STOCK LIST VALIDATION");
    println!("{}", "=".repeat(60));
    println!("  Checked: {}", total);
    println!("  Valid:   {}", report.valid.len());
    println!("  Invalid: {}", report.invalid.len());
    for inst in &report.invalid {
        println!("    {:<14} {}", inst.symbol.as_str(), inst.isin);
    }
    println!("  Written: {}", target);
    println!("{}\n", "=".repeat(60));

    Ok(())
}
