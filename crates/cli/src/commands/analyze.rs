//! Analyze counter reports from one measurement window

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use perfcore_lib::classify::Classification;
use perfcore_lib::roofline::{LikwidBenchRunner, NodeSignature};
use perfcore_lib::{AnalysisConfig, AnalysisOutcome, AnalysisRequest, Analyzer, ClassifierMode, CounterGroup};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{
    color_status, color_verdict, format_fraction, format_optional, format_value, print_info,
    print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Counter reports as `[GROUP=]PATH`; the group defaults to the file stem
    #[arg(required = true)]
    pub reports: Vec<String>,

    /// Run label recorded in the summary and ledger
    #[arg(long, short)]
    pub label: Option<String>,

    /// Measured window length in seconds
    #[arg(long)]
    pub runtime: Option<f64>,

    /// Skip the roofline lookup
    #[arg(long)]
    pub no_roofline: bool,

    /// Re-measure roofs even when the cache is complete
    #[arg(long)]
    pub force_remeasure: bool,

    /// Write the summary CSV here
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Ledger file (defaults beside the roofline cache)
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Do not append this run to the ledger
    #[arg(long)]
    pub no_ledger: bool,

    /// Classifier override (strict, evidence, both)
    #[arg(long)]
    pub classifier: Option<String>,

    /// Node signature override
    #[arg(long)]
    pub signature: Option<String>,
}

/// Row for the summary table
#[derive(Tabled, serde::Serialize)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

/// Split `GROUP=PATH` into its parts
pub fn parse_report_spec(spec: &str) -> (Option<CounterGroup>, PathBuf) {
    match spec.split_once('=') {
        Some((group, path)) if !group.is_empty() && !group.contains(['/', '\\']) => {
            let group = group.parse().unwrap_or(CounterGroup::Other(group.to_string()));
            (Some(group), PathBuf::from(path))
        }
        _ => (None, PathBuf::from(spec)),
    }
}

fn default_label() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"))
}

pub async fn run(mut config: AnalysisConfig, args: AnalyzeArgs, format: OutputFormat) -> Result<()> {
    if let Some(mode) = &args.classifier {
        config.classifier = mode.parse::<ClassifierMode>().map_err(|e| anyhow!(e))?;
    }

    let ledger_path = if args.no_ledger {
        None
    } else {
        Some(
            args.ledger
                .clone()
                .unwrap_or_else(|| crate::config::default_ledger_path(&config)),
        )
    };

    let label = args.label.clone().unwrap_or_else(default_label);
    let mut request = AnalysisRequest::new(label)
        .with_runtime_hint(args.runtime)
        .with_roofline(!args.no_roofline, args.force_remeasure);
    for spec in &args.reports {
        let (group, path) = parse_report_spec(spec);
        request = request
            .with_report_file(&path, group)
            .await
            .with_context(|| format!("Failed to read counter report {}", path.display()))?;
    }
    if let Some(path) = &args.summary {
        request = request.with_summary_path(path);
    }
    if let Some(path) = ledger_path {
        request = request.with_ledger_path(path);
    }

    let analyzer = match &args.signature {
        Some(raw) => {
            let signature = NodeSignature::from_raw(raw)
                .ok_or_else(|| anyhow!("Signature `{raw}` has no usable characters"))?;
            let runner = Arc::new(LikwidBenchRunner::from_config(&config.roofline));
            Analyzer::with_parts(config, runner, Some(signature))
        }
        None => Analyzer::new(config)
            .await
            .context("Failed to detect node identity")?,
    };

    let outcome = analyzer
        .analyze(&request)
        .await
        .context("Analysis failed")?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "run_label": request.run_label,
            "node_signature": analyzer.signature().map(|s| s.to_string()),
            "summary": outcome.summary,
            "classifications": outcome.classifications,
            "aggregates": outcome
                .aggregates
                .iter()
                .map(|(rule, verdict)| json!({ "rule": rule, "verdict": verdict }))
                .collect::<Vec<_>>(),
            "roofline_error": outcome.roofline_error,
        }))?,
        OutputFormat::Table => {
            print_outcome(&request, &outcome, format);
            if let Some(path) = &request.summary_path {
                print_success(&format!("Summary written to {}", path.display()));
            }
        }
    }
    Ok(())
}

fn print_outcome(request: &AnalysisRequest, outcome: &AnalysisOutcome, format: OutputFormat) {
    println!("{} {}", "Analysis".bold(), request.run_label.cyan());
    println!("{}", "=".repeat(60));

    let rows: Vec<MetricRow> = outcome
        .summary
        .rows
        .iter()
        .filter(|r| !r.metric.starts_with("signal_") && !r.metric.starts_with("verdict_"))
        .map(|r| MetricRow {
            metric: r.metric.clone(),
            value: format_value(r.value),
            unit: r.unit.clone(),
            notes: r.notes.clone(),
        })
        .collect();
    print_table(&rows, format);

    let unavailable = outcome.derived.unavailable();
    if !unavailable.is_empty() {
        print_warning(&format!("Unavailable: {}", unavailable.join(", ")));
    }

    match (&outcome.roofline, &outcome.roofline_error) {
        (Some(roofline), _) => {
            let status = if roofline.cache_hit { "hit" } else { "miss" };
            print_info(&format!(
                "Roofline cache {} ({} measured, {} failed)",
                color_status(status),
                roofline.measured.len(),
                roofline.failed.len()
            ));
        }
        (None, Some(error)) => print_warning(&format!("Roofline unavailable: {error}")),
        (None, None) => {}
    }
    if let Some(region) = outcome.analysis.as_ref().and_then(|a| a.region) {
        println!("Roofline region:  {}", region.as_str().bold());
    }
    println!();

    for classification in &outcome.classifications {
        print_classification(classification);
    }

    for (rule, verdict) in &outcome.aggregates {
        let status = if verdict.confirmed { "confirmed" } else { "incomplete" };
        println!(
            "Cross-run {}: {}/{} memory runs ({}) {}",
            rule.as_str().bold(),
            verdict.memory_runs,
            verdict.runs,
            verdict.fraction.map(format_fraction).unwrap_or_else(|| "-".to_string()),
            color_status(status)
        );
    }
}

fn print_classification(classification: &Classification) {
    let confidence = classification
        .confidence
        .map(|c| format!(" (confidence {})", format_fraction(c)))
        .unwrap_or_default();
    println!(
        "{} rule: {}{}",
        classification.rule.as_str().bold(),
        color_verdict(classification.verdict.as_str()),
        confidence
    );
    for signal in &classification.signals {
        println!(
            "  {:<14} >= {:<8} observed {:<12} {}",
            signal.name,
            format_value(signal.threshold),
            format_optional(signal.observed),
            color_status(signal.status())
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_spec_with_group() {
        let (group, path) = parse_report_spec("caches=/tmp/run-1/caches.txt");
        assert_eq!(group, Some(CounterGroup::CacheEvents));
        assert_eq!(path, PathBuf::from("/tmp/run-1/caches.txt"));
    }

    #[test]
    fn test_report_spec_without_group() {
        let (group, path) = parse_report_spec("/tmp/run-1/mem.txt");
        assert_eq!(group, None);
        assert_eq!(path, PathBuf::from("/tmp/run-1/mem.txt"));

        // An `=` inside the path is not a group separator
        let (group, _) = parse_report_spec("./out/a=b/mem.txt");
        assert_eq!(group, None);
    }
}
