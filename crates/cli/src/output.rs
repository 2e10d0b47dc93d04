//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Compact rendering for values spanning many magnitudes
pub fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-3..1e7).contains(&magnitude) {
        format!("{:.4e}", value)
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.4}", value)
    }
}

pub fn format_optional(value: Option<f64>) -> String {
    value.map(format_value).unwrap_or_else(|| "-".to_string())
}

/// Format a [0, 1] fraction as a percentage
pub fn format_fraction(fraction: f64) -> String {
    format!("{:.0}%", fraction * 100.0)
}

/// Color a verdict name by which side it lands on
pub fn color_verdict(verdict: &str) -> String {
    match verdict {
        "memory_bound" | "memory_sensitive" => verdict.red().bold().to_string(),
        "compute_bound" => verdict.green().bold().to_string(),
        "inconclusive_lean_compute" => verdict.yellow().to_string(),
        _ => verdict.to_string(),
    }
}

/// Color a signal or cache status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "pass" | "hit" | "complete" | "confirmed" => status.green().to_string(),
        "fail" | "failed" | "absent" => status.red().to_string(),
        "unavailable" | "miss" | "incomplete" | "ephemeral" => status.yellow().to_string(),
        _ => status.to_string(),
    }
}
