//! Breakout screener - main entry point
//!
//! Subcommands:
//! - screen: run the daily screen, write reports, send the summary
//! - validate: drop instruments the data provider does not recognise
//! - login: print the broker authorisation URL
//! - exchange-token: trade an authorisation code for an access token

use anyhow::Result;
use breakout_screener::config::ProviderKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "breakout-screener")]
#[command(about = "Daily equity breakout screener with HTML reports and webhook notifications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "configs/screener.json")]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daily screen
    Screen {
        /// Series provider (overrides config file): upstox or csv
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Last session to evaluate (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Stock list to screen (defaults to the validated list, then the raw list)
        #[arg(short, long)]
        universe: Option<String>,

        /// Show a progress bar; logs go to file only
        #[arg(long)]
        progress: bool,
    },

    /// Check the stock list and write the validated list
    Validate {
        /// Series provider (overrides config file): upstox or csv
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },

    /// Print the broker login URL
    Login,

    /// Exchange an authorisation code for an access token
    ExchangeToken {
        /// Code from the redirect URL after login
        #[arg(long)]
        code: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    // Credentials and the webhook URL may live in .env
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Screen { progress, .. } => ("screen", *progress),
        Commands::Validate { .. } => ("validate", false),
        Commands::Login => ("login", false),
        Commands::ExchangeToken { .. } => ("exchange_token", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Screen {
            provider,
            date,
            universe,
            progress,
        } => commands::screen::run(cli.config, provider, date, universe, progress),

        Commands::Validate { provider } => commands::validate::run(cli.config, provider),

        Commands::Login => commands::login::run(cli.config),

        Commands::ExchangeToken { code } => commands::login::exchange(cli.config, code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_screen_args() {
        let cli = Cli::parse_from([
            "breakout-screener",
            "screen",
            "--provider",
            "csv",
            "--date",
            "2025-04-25",
            "--progress",
        ]);
        assert_eq!(cli.config, "configs/screener.json");
        match cli.command {
            Commands::Screen {
                provider,
                date,
                progress,
                ..
            } => {
                assert_eq!(provider, Some(ProviderKind::Csv));
                assert_eq!(date.as_deref(), Some("2025-04-25"));
                assert!(progress);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
