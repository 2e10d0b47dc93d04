//! Cross-run ledger commands

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use perfcore_lib::classify::{ClassificationLedger, ClassifierRule};
use perfcore_lib::AnalysisConfig;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{
    color_status, color_verdict, format_fraction, format_optional, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled, Serialize)]
struct EntryRow {
    #[tabled(rename = "Run")]
    run_label: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Recorded")]
    recorded_at: String,
}

#[derive(Tabled, Serialize)]
struct AggregateRow {
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Runs")]
    runs: usize,
    #[tabled(rename = "Memory runs")]
    memory_runs: usize,
    #[tabled(rename = "Fraction")]
    fraction: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn open(config: &AnalysisConfig, path: Option<PathBuf>) -> ClassificationLedger {
    let path = path.unwrap_or_else(|| crate::config::default_ledger_path(config));
    ClassificationLedger::new(path, config.roofline.lock_timeout())
}

fn parse_rules(rule: Option<String>) -> Result<Vec<ClassifierRule>> {
    match rule {
        Some(rule) => Ok(vec![rule.parse::<ClassifierRule>().map_err(|e| anyhow!(e))?]),
        None => Ok(vec![ClassifierRule::Strict, ClassifierRule::Evidence]),
    }
}

/// List ledger entries
pub async fn show(
    config: &AnalysisConfig,
    path: Option<PathBuf>,
    rule: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let ledger = open(config, path);
    let rules = parse_rules(rule)?;
    let entries = ledger
        .read()
        .await
        .with_context(|| format!("Failed to read ledger {}", ledger.path().display()))?;

    let entries: Vec<_> = entries.into_iter().filter(|e| rules.contains(&e.rule)).collect();

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            let rows: Vec<EntryRow> = entries
                .iter()
                .map(|e| EntryRow {
                    run_label: e.run_label.clone(),
                    rule: e.rule.as_str().to_string(),
                    verdict: color_verdict(e.verdict.as_str()),
                    confidence: e
                        .confidence
                        .map(format_fraction)
                        .unwrap_or_else(|| format_optional(None)),
                    recorded_at: e.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            print_table(&rows, format);
            println!("\nTotal: {} entries", entries.len());
        }
    }
    Ok(())
}

/// Apply the cross-run confirmation rule per classifier rule
pub async fn aggregate(
    config: &AnalysisConfig,
    path: Option<PathBuf>,
    rule: Option<String>,
    threshold: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let ledger = open(config, path);
    let threshold = threshold.unwrap_or(config.aggregate_threshold);

    let mut rows = Vec::new();
    for rule in parse_rules(rule)? {
        let verdict = ledger
            .aggregate_rule(rule, threshold)
            .await
            .with_context(|| format!("Failed to read ledger {}", ledger.path().display()))?;
        let status = if verdict.confirmed { "confirmed" } else { "incomplete" };
        rows.push(AggregateRow {
            rule: rule.as_str().to_string(),
            runs: verdict.runs,
            memory_runs: verdict.memory_runs,
            fraction: verdict
                .fraction
                .map(format_fraction)
                .unwrap_or_else(|| format_optional(None)),
            status: match format {
                OutputFormat::Table => color_status(status),
                OutputFormat::Json => status.to_string(),
            },
        });
    }

    if let OutputFormat::Table = format {
        println!(
            "{} (threshold {})",
            "Cross-run verdicts".bold(),
            format_fraction(threshold)
        );
    }
    print_table(&rows, format);
    Ok(())
}
