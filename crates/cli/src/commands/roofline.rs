//! Roofline cache commands

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use perfcore_lib::roofline::{
    HostIdentity, LikwidBenchRunner, NodeSignature, RoofTarget, RooflineRecord, RooflineStore,
};
use perfcore_lib::AnalysisConfig;
use serde_json::json;
use tabled::Tabled;

use crate::output::{
    color_status, format_optional, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Row for the roofs table
#[derive(Tabled, serde::Serialize)]
struct RoofRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Kernel")]
    kernel: String,
    #[tabled(rename = "Working set")]
    working_set: String,
}

fn roof_rows(record: &RooflineRecord) -> Vec<RoofRow> {
    RoofTarget::ALL
        .into_iter()
        .map(|target| {
            let (kernel, working_set, unit) = match target {
                RoofTarget::Level(level) => {
                    let roof = record.level(level);
                    (
                        roof.map(|r| r.kernel.clone()).unwrap_or_default(),
                        roof.map(|r| r.working_set.clone()).unwrap_or_default(),
                        "MBytes/s",
                    )
                }
                RoofTarget::Compute => (
                    record.compute.kernel.clone(),
                    record.compute.working_set.clone(),
                    "MFLOP/s",
                ),
            };
            RoofRow {
                target: target.as_str().to_string(),
                value: record
                    .value(target)
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| color_status("absent")),
                unit: unit.to_string(),
                kernel,
                working_set,
            }
        })
        .collect()
}

async fn resolve_signature(raw: Option<String>) -> Result<Option<NodeSignature>> {
    match raw {
        Some(raw) => NodeSignature::from_raw(&raw)
            .map(Some)
            .ok_or_else(|| anyhow!("Signature `{raw}` has no usable characters")),
        None => NodeSignature::detect()
            .await
            .context("Failed to detect node identity"),
    }
}

/// Show the cached record for this node
pub async fn show(config: &AnalysisConfig, signature: Option<String>, format: OutputFormat) -> Result<()> {
    let Some(signature) = resolve_signature(signature).await? else {
        print_warning("No node identity available; roofs are never cached on this host");
        return Ok(());
    };

    let store = RooflineStore::from_config(&config.roofline);
    let record = store
        .load(&signature)
        .await
        .with_context(|| format!("Failed to read roofline cache in {}", store.cache_dir().display()))?;
    let Some(record) = record else {
        print_warning(&format!("No cached roofline for {}", signature));
        return Ok(());
    };
    let complete = store.is_complete(&signature, &config.roofline.kernels).await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "signature": signature.as_str(),
            "complete": complete,
            "record": record,
        }))?,
        OutputFormat::Table => {
            println!("{} {}", "Roofline".bold(), signature.as_str().cyan());
            println!("Measured at: {}", record.measured_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
            print_table(&roof_rows(&record), format);
            let status = if complete { "complete" } else { "incomplete" };
            print_info(&format!("Cache entry {}", color_status(status)));
        }
    }
    Ok(())
}

/// Measure missing roofs, or all of them with `force`
pub async fn measure(
    config: &AnalysisConfig,
    force: bool,
    signature: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let signature = resolve_signature(signature).await?;
    let store = RooflineStore::from_config(&config.roofline);
    let runner = LikwidBenchRunner::from_config(&config.roofline);

    let outcome = store
        .get_or_measure(signature.as_ref(), &config.roofline.kernels, &runner, force)
        .await
        .context("Roofline measurement failed")?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "signature": signature.as_ref().map(|s| s.as_str()),
            "cache_hit": outcome.cache_hit,
            "measured": outcome.measured.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "failed": outcome.failed.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "record": outcome.record,
        }))?,
        OutputFormat::Table => {
            print_table(&roof_rows(&outcome.record), format);
            if outcome.cache_hit {
                print_success("Cache complete, nothing measured");
            } else if outcome.failed.is_empty() {
                print_success(&format!("Measured {} targets", outcome.measured.len()));
            } else {
                let failed: Vec<&str> = outcome.failed.iter().map(|t| t.as_str()).collect();
                print_warning(&format!("No usable figure for: {}", failed.join(", ")));
            }
            if signature.is_none() {
                print_info(&format!("Roofs {} (no node identity)", color_status("ephemeral")));
            }
        }
    }
    Ok(())
}

/// Print the detected host identity and node signature
pub async fn signature(format: OutputFormat) -> Result<()> {
    let identity = HostIdentity::detect()
        .await
        .context("Failed to detect node identity")?;
    let signature = NodeSignature::from_identity(&identity);

    match format {
        OutputFormat::Json => print_json(&json!({
            "identity": identity,
            "signature": signature.as_ref().map(|s| s.as_str()),
        }))?,
        OutputFormat::Table => {
            println!("Hostname:   {}", format_field(identity.hostname.as_deref()));
            println!("CPU model:  {}", format_field(identity.cpu_model.as_deref()));
            println!("Arch:       {}", identity.arch);
            match &signature {
                Some(signature) => println!("Signature:  {}", signature.as_str().cyan()),
                None => print_warning("No hostname or CPU model found; caching disabled"),
            }
        }
    }
    Ok(())
}

fn format_field(value: Option<&str>) -> String {
    value.map(str::to_string).unwrap_or_else(|| format_optional(None))
}
