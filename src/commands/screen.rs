//! Screen command - daily breakout screen over the validated stock list

use anyhow::{bail, Context, Result};
use breakout_screener::config::{Config, ProviderKind};
use breakout_screener::engine::{ScreeningEngine, ScreeningRun};
use breakout_screener::notify::{send_summary, DiscordNotifier, Notifier};
use breakout_screener::report::{
    publish_failure_report, publish_shortlist, write_metrics_csv, FsReportStore, FAILURE_PREFIX,
    SHORTLIST_PREFIX,
};
use breakout_screener::universe::load_universe;
use chrono::{Local, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{build_provider, load_config};

pub fn run(
    config_path: String,
    provider: Option<ProviderKind>,
    date: Option<String>,
    universe: Option<String>,
    progress: bool,
) -> Result<()> {
    let config = load_config(&config_path, provider)?;

    let to_date = match date {
        Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", d))?,
        None => Local::now().date_naive(),
    };

    let universe_path = universe.unwrap_or_else(|| default_universe_path(&config));
    let instruments = load_universe(&universe_path)
        .with_context(|| format!("Failed to load stock list from {}", universe_path))?;
    if instruments.is_empty() {
        bail!("No instruments loaded from {}", universe_path);
    }

    info!("Starting daily screen");
    info!("  Stock list: {} ({} instruments)", universe_path, instruments.len());
    info!("  Date:       {}", to_date);
    info!("  Provider:   {:?}", config.provider.kind);
    info!("  Ranking:    {:?}", config.run.ranking);

    let rt = tokio::runtime::Runtime::new()?;
    let config = Arc::new(config);
    let provider = build_provider(&config)?;

    let mut engine = ScreeningEngine::new(provider, Arc::clone(&config));
    let pb = if progress {
        let pb = ProgressBar::new(instruments.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}]")?
                .progress_chars("█░ "),
        );
        engine = engine.with_progress(pb.clone());
        Some(pb)
    } else {
        None
    };

    let run = rt
        .block_on(engine.run(&instruments, to_date))
        .context("Screening run aborted")?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    write_outputs(&config, &run);

    let notifier = DiscordNotifier::from_config(&config.notification);
    rt.block_on(send_summary(
        notifier.as_ref().map(|n| n as &dyn Notifier),
        &run,
        config.notification.timeout(),
    ));

    print_summary(&run);
    Ok(())
}

/// Validated list when present, otherwise the raw stock list
fn default_universe_path(config: &Config) -> String {
    let valid = &config.paths.valid_stock_list_file;
    if Path::new(valid).exists() {
        valid.clone()
    } else {
        warn!(
            "Validated stock list {} not found; using {}",
            valid, config.paths.stock_list_file
        );
        config.paths.stock_list_file.clone()
    }
}

/// Reports and exports; failures are logged and do not fail the run
fn write_outputs(config: &Config, run: &ScreeningRun) {
    let reports = FsReportStore::new(&config.paths.report_dir, SHORTLIST_PREFIX, "html");
    if let Err(e) = publish_shortlist(&reports, run, &config.screener, config.reporting.max_reports) {
        error!("Failed to write shortlist report: {}", e);
    }

    let analysis = FsReportStore::new(&config.paths.analysis_dir, FAILURE_PREFIX, "html");
    if let Err(e) = publish_failure_report(&analysis, run, &config.screener, &config.reporting) {
        error!("Failed to write failure report: {}", e);
    }

    if config.reporting.export_csv {
        if let Err(e) = write_metrics_csv(&config.paths.analysis_dir, run) {
            error!("Failed to export metrics CSV: {}", e);
        }
    }
}

fn print_summary(run: &ScreeningRun) {
    println!("\n{}", "=".repeat(60));
    println!("BREAKOUT SCREEN - {}", run.screening_date.format("%d %B %Y"));
    println!("{}", "=".repeat(60));
    println!("  Processed: {}", run.total);
    println!("  Passed:    {}", run.passed.len());
    println!("  Failed:    {}", run.failed_count);
    println!("  Skipped:   {}", run.skipped.len());
    println!("  Duration:  {:.1}s", run.duration.as_secs_f64());

    if !run.passed.is_empty() {
        println!("\n{:<4} {:<14} {:>10} {:>10} {:>10}", "#", "Symbol", "Close", "High", "Surge%");
        println!("{}", "-".repeat(52));
        for (i, r) in run.passed.iter().enumerate() {
            println!(
                "{:<4} {:<14} {:>10.2} {:>10.2} {:>9.1}%",
                i + 1,
                r.instrument.symbol.as_str(),
                r.metrics.close,
                r.metrics.breakout_level,
                r.metrics.volume_surge_pct
            );
        }
    }

    if !run.skipped.is_empty() {
        println!("\nSkipped:");
        for s in &run.skipped {
            println!("  {:<14} {}", s.instrument.symbol.as_str(), s.reason);
        }
    }
    println!("{}\n", "=".repeat(60));
}
