//! Daily Breakout Screener
//!
//! Screens a fixed universe of NSE equities once per day against four
//! technical conditions (trend alignment, proximity to the rolling high,
//! volume surge, price range). Produces a shortlist, an HTML report with
//! bounded retention, and a webhook summary.

pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod indicators;
pub mod notify;
pub mod provider;
pub mod report;
pub mod types;
pub mod universe;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use engine::{ScreeningEngine, ScreeningRun, SkipReason, SkippedInstrument};
pub use error::{ScreenError, ScreenResult};
pub use evaluator::{Condition, ScreeningResult};
pub use types::*;
