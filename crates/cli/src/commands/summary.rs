//! Summary record commands

use anyhow::{Context, Result};
use perfcore_lib::read_summary;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_optional, print_json, print_table, OutputFormat};

#[derive(Tabled, Serialize)]
struct ValueRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Print a summary file as metric/value pairs
pub async fn show(path: &Path, format: OutputFormat) -> Result<()> {
    let values = read_summary(path)
        .await
        .with_context(|| format!("Failed to read summary {}", path.display()))?;

    match format {
        OutputFormat::Json => print_json(&values)?,
        OutputFormat::Table => {
            let rows: Vec<ValueRow> = values
                .iter()
                .map(|(metric, value)| ValueRow {
                    metric: metric.clone(),
                    value: format_optional(*value),
                })
                .collect();
            print_table(&rows, format);
        }
    }
    Ok(())
}
