//! HTML rendering for the shortlist and failure-analysis reports

use chrono::Local;

use crate::config::ScreenerConfig;
use crate::engine::ScreeningRun;
use crate::evaluator::{Condition, ScreeningResult};

const SHORTLIST_STYLE: &str = r#"
        body { font-family: sans-serif; margin: 20px; }
        h1 { text-align: center; color: #333; }
        table { width: 100%; border-collapse: collapse; margin-top: 20px; }
        th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
        th { background-color: #f2f2f2; }
        tr:nth-child(even) { background-color: #f9f9f9; }
        tr:hover { background-color: #e2e2e2; }
        .empty { text-align: center; color: #777; }
        .footer { margin-top: 20px; font-size: 0.8em; text-align: center; color: #777; }
"#;

const FAILURE_STYLE: &str = r#"
        body { font-family: 'Segoe UI', Tahoma, sans-serif; margin: 0; padding: 20px; background-color: #f8f9fa; color: #212529; }
        .container { max-width: 1200px; margin: 0 auto; background-color: #fff; padding: 30px; border-radius: 8px; }
        h1, h2 { color: #007bff; margin-top: 0; }
        .stats-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 15px; margin: 15px 0 25px; }
        .stat-card { border-radius: 6px; padding: 15px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); text-align: center; }
        .stat-value { font-size: 2em; font-weight: bold; margin: 10px 0; }
        .stat-percent { font-size: 0.9em; color: #6c757d; }
        table { width: 100%; border-collapse: collapse; }
        th, td { border: 1px solid #dee2e6; padding: 8px; text-align: center; }
        th { background-color: #e9ecef; }
        td.symbol { text-align: left; font-weight: bold; }
        .pass { color: #28a745; }
        .fail { color: #dc3545; }
        .footer { margin-top: 20px; font-size: 0.8em; text-align: center; color: #777; }
"#;

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, style: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n    <meta charset=\"UTF-8\">\n    \
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    \
         <title>{}</title>\n    <style>{}    </style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        style,
        body
    )
}

fn footer(run: &ScreeningRun) -> String {
    format!(
        "    <div class=\"footer\">\n        Generated on: {} | {} processed, {} skipped, {:.1}s\n    </div>\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        run.total,
        run.skipped.len(),
        run.duration.as_secs_f64()
    )
}

/// Shortlist of instruments that passed every rule
pub fn render_shortlist(run: &ScreeningRun, screener: &ScreenerConfig) -> String {
    let date = run.screening_date.format("%Y-%m-%d");
    let mut body = String::new();

    body.push_str("    <h1>Daily Breakout Screener Report</h1>\n");
    body.push_str(&format!(
        "    <p style=\"text-align: center;\">Screening Date: {}</p>\n",
        date
    ));
    body.push_str("    <table>\n        <thead>\n            <tr>\n");
    for header in [
        "#".to_string(),
        "Symbol".to_string(),
        "ISIN".to_string(),
        "Close Price (₹)".to_string(),
        "Breakout Level (₹)".to_string(),
        "Volume Surge (%)".to_string(),
        format!("EMA({}) (₹)", screener.ema_period_short),
        format!("EMA({}) (₹)", screener.ema_period_long),
        "Volume".to_string(),
    ] {
        body.push_str(&format!("                <th>{}</th>\n", escape_html(&header)));
    }
    body.push_str("            </tr>\n        </thead>\n        <tbody>\n");

    if run.passed.is_empty() {
        body.push_str(
            "            <tr><td colspan=\"9\" class=\"empty\">No instruments passed screening</td></tr>\n",
        );
    }
    for (i, r) in run.passed.iter().enumerate() {
        let m = &r.metrics;
        body.push_str(&format!(
            "            <tr>\n                <td>{}</td>\n                <td>{}</td>\n                \
             <td>{}</td>\n                <td>{:.2}</td>\n                <td>{:.2}</td>\n                \
             <td>{:.2}%</td>\n                <td>{:.2}</td>\n                <td>{:.2}</td>\n                \
             <td>{:.0}</td>\n            </tr>\n",
            i + 1,
            escape_html(r.instrument.symbol.as_str()),
            escape_html(&r.instrument.isin),
            m.close,
            m.breakout_level,
            m.volume_surge_pct,
            m.ema_short,
            m.ema_long,
            m.volume,
        ));
    }
    body.push_str("        </tbody>\n    </table>\n");
    body.push_str(&footer(run));

    page(&format!("Daily Breakout Screener Report - {}", date), SHORTLIST_STYLE, &body)
}

/// Aggregates shown at the top of the failure report
#[derive(Debug, Clone, PartialEq)]
pub struct FailureStats {
    pub total_failed: usize,
    /// Failed exactly one rule
    pub almost_passed: usize,
    /// Failure count per rule, in `Condition::ALL` order
    pub rule_failures: [(Condition, usize); 4],
}

impl FailureStats {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ScreeningResult>) -> Self {
        let mut rule_failures = Condition::ALL.map(|c| (c, 0usize));
        let mut total_failed = 0;
        let mut almost_passed = 0;

        for r in results {
            total_failed += 1;
            if r.rules_passed_count() == Condition::ALL.len() - 1 {
                almost_passed += 1;
            }
            for (condition, count) in rule_failures.iter_mut() {
                if !r.passed_rule(*condition) {
                    *count += 1;
                }
            }
        }

        Self {
            total_failed,
            almost_passed,
            rule_failures,
        }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn rule_description(condition: Condition, screener: &ScreenerConfig) -> String {
    match condition {
        Condition::TrendAlignment => format!(
            "EMA({}) > EMA({})",
            screener.ema_period_short, screener.ema_period_long
        ),
        Condition::ProximityToHigh => format!(
            "{}% ≤ drop from {}-day high ≤ {}%",
            screener.price_drop_percent_min, screener.lookback_period, screener.price_drop_percent_max
        ),
        Condition::VolumeRatio => format!(
            "{}x ≤ volume / {}-day avg ≤ {}x",
            screener.volume_surge_min, screener.avg_volume_lookback, screener.volume_surge_max
        ),
        Condition::PriceRange if screener.enable_max_price_limit => {
            format!("₹{} ≤ close ≤ ₹{}", screener.min_price, screener.max_price)
        }
        Condition::PriceRange => format!("close ≥ ₹{}", screener.min_price),
    }
}

/// Per-rule breakdown of instruments that were evaluated but failed.
///
/// Only instruments passing at least `min_rules_passed` rules are listed;
/// the statistics cover the listed instruments.
pub fn render_failure_report(
    run: &ScreeningRun,
    screener: &ScreenerConfig,
    min_rules_passed: usize,
) -> String {
    let date = run.screening_date.format("%Y-%m-%d");
    let mut listed: Vec<&ScreeningResult> = run
        .failed
        .iter()
        .filter(|r| r.rules_passed_count() >= min_rules_passed)
        .collect();
    // Closest misses first; stable so input order breaks ties
    listed.sort_by(|a, b| b.rules_passed_count().cmp(&a.rules_passed_count()));

    let stats = FailureStats::from_results(listed.iter().copied());
    let mut body = String::from("<div class=\"container\">\n");

    body.push_str(&format!("    <h1>Failure Analysis Report - {}</h1>\n", date));
    if min_rules_passed > 0 {
        body.push_str(&format!(
            "    <p>Showing instruments that passed at least {} of {} rules.</p>\n",
            min_rules_passed,
            Condition::ALL.len()
        ));
    }

    body.push_str("    <div class=\"stats-grid\">\n");
    body.push_str(&format!(
        "        <div class=\"stat-card\"><h3>Failed Instruments</h3><div class=\"stat-value\">{}</div>\
         <div class=\"stat-percent\">{} passed, {} skipped</div></div>\n",
        stats.total_failed,
        run.passed.len(),
        run.skipped.len()
    ));
    body.push_str(&format!(
        "        <div class=\"stat-card\"><h3>Almost Passed</h3><div class=\"stat-value\">{}</div>\
         <div class=\"stat-percent\">{:.1}% failed one rule</div></div>\n",
        stats.almost_passed,
        percent(stats.almost_passed, stats.total_failed)
    ));
    for (condition, count) in stats.rule_failures {
        body.push_str(&format!(
            "        <div class=\"stat-card\"><h3>{}</h3><div class=\"stat-value\">{}</div>\
             <div class=\"stat-percent\">{:.1}% failed | {}</div></div>\n",
            condition.label(),
            count,
            percent(count, stats.total_failed),
            escape_html(&rule_description(condition, screener))
        ));
    }
    body.push_str("    </div>\n");

    body.push_str("    <h2>Instruments</h2>\n    <table>\n        <thead><tr><th>Symbol</th><th>ISIN</th>\
                   <th>Close (₹)</th><th>Drop %</th><th>Volume Ratio</th><th>Rules Passed</th>");
    for condition in Condition::ALL {
        body.push_str(&format!("<th>{}</th>", condition.label()));
    }
    body.push_str("</tr></thead>\n        <tbody>\n");

    for r in &listed {
        let m = &r.metrics;
        body.push_str(&format!(
            "            <tr><td class=\"symbol\">{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td>\
             <td>{:.2}x</td><td>{}/{}</td>",
            escape_html(r.instrument.symbol.as_str()),
            escape_html(&r.instrument.isin),
            m.close,
            m.price_drop_pct,
            m.surge_ratio,
            r.rules_passed_count(),
            Condition::ALL.len()
        ));
        for outcome in &r.outcomes {
            if outcome.passed {
                body.push_str("<td class=\"pass\">✓</td>");
            } else {
                let reason = outcome.reason.as_deref().unwrap_or("failed");
                body.push_str(&format!(
                    "<td class=\"fail\" title=\"{}\">✗</td>",
                    escape_html(reason)
                ));
            }
        }
        body.push_str("</tr>\n");
    }
    body.push_str("        </tbody>\n    </table>\n");
    body.push_str(&footer(run));
    body.push_str("</div>");

    page(&format!("Failure Analysis Report - {}", date), FAILURE_STYLE, &body)
}
