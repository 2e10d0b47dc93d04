//! Performance counter analysis engine
//!
//! This crate provides the core functionality for:
//! - Extracting named metrics from heterogeneous counter reports
//! - Deriving bottleneck indicators (CPI, MPKI, miss ratio, intensity)
//! - Measuring and caching per-node roofline bounds
//! - Classifying workloads as memory- or compute-bound
//! - Writing stable summary records and cross-run ledgers

pub mod classify;
pub mod config;
pub mod derived;
pub mod error;
mod lock;
pub mod models;
pub mod observability;
pub mod parser;
pub mod pipeline;
pub mod roofline;
pub mod summary;

pub use config::{AnalysisConfig, ClassifierMode, RooflineConfig};
pub use error::{EngineError, Result};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use pipeline::{AnalysisOutcome, AnalysisRequest, Analyzer};
pub use summary::{read_summary, SummaryRecord, SummaryRow};
