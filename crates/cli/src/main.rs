//! Performance counter analysis CLI
//!
//! Analyzes counter reports from a measurement window, manages the per-node
//! roofline cache, and inspects summaries and the cross-run ledger.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{analyze, ledger, roofline, summary};
use perfcore_lib::EngineMetrics;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Performance counter analysis engine
#[derive(Parser)]
#[command(name = "perfcore")]
#[command(author, version, about = "Performance counter analysis engine", long_about = None)]
pub struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(long, short, env = "PERFCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    /// Write Prometheus text metrics here after the command completes
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze counter reports from one measurement window
    Analyze(analyze::AnalyzeArgs),

    /// Inspect or measure this node's roofline bounds
    #[command(subcommand)]
    Roofline(RooflineCommands),

    /// Cross-run classification ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),

    /// Read back summary records
    #[command(subcommand)]
    Summary(SummaryCommands),
}

#[derive(Subcommand)]
pub enum RooflineCommands {
    /// Show the cached record for this node
    Show {
        /// Use this signature instead of the detected one
        #[arg(long)]
        signature: Option<String>,
    },

    /// Measure missing roofs (or all of them with --force)
    Measure {
        /// Re-measure even when the cache is complete
        #[arg(long)]
        force: bool,

        /// Use this signature instead of the detected one
        #[arg(long)]
        signature: Option<String>,
    },

    /// Print the detected host identity and node signature
    Signature,
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// List ledger entries
    Show {
        /// Ledger file (defaults beside the roofline cache)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Only show entries for this rule (strict, evidence)
        #[arg(long)]
        rule: Option<String>,
    },

    /// Apply the cross-run confirmation rule
    Aggregate {
        /// Ledger file (defaults beside the roofline cache)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Only aggregate this rule (strict, evidence)
        #[arg(long)]
        rule: Option<String>,

        /// Memory-run fraction needed to confirm
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Subcommand)]
pub enum SummaryCommands {
    /// Print a summary file as metric/value pairs
    Show {
        /// Summary CSV path
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool, log_json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(filter)
        .with(log_json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!log_json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = config::load(cli.config.as_deref())?;
    debug!(
        classifier = ?config.classifier,
        cache_dir = %config.roofline.cache_dir.display(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Analyze(args) => {
            analyze::run(config, args, cli.format).await?;
        }
        Commands::Roofline(roofline_cmd) => match roofline_cmd {
            RooflineCommands::Show { signature } => {
                roofline::show(&config, signature, cli.format).await?;
            }
            RooflineCommands::Measure { force, signature } => {
                roofline::measure(&config, force, signature, cli.format).await?;
            }
            RooflineCommands::Signature => {
                roofline::signature(cli.format).await?;
            }
        },
        Commands::Ledger(ledger_cmd) => match ledger_cmd {
            LedgerCommands::Show { ledger: path, rule } => {
                ledger::show(&config, path, rule, cli.format).await?;
            }
            LedgerCommands::Aggregate {
                ledger: path,
                rule,
                threshold,
            } => {
                ledger::aggregate(&config, path, rule, threshold, cli.format).await?;
            }
        },
        Commands::Summary(summary_cmd) => match summary_cmd {
            SummaryCommands::Show { path } => {
                summary::show(&path, cli.format).await?;
            }
        },
    }

    if let Some(path) = &cli.metrics_file {
        let text = EngineMetrics::new().export_text();
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
