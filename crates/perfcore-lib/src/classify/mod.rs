//! Bottleneck classification
//!
//! This module provides:
//! - The strict rule (all of MPKI, CPI and miss ratio over threshold)
//! - The evidence-weighted rule (four signals, confidence = passed / 4)
//! - Cross-run aggregation and the on-disk classification ledger
//!
//! Every classification carries a per-signal trace so a verdict can be
//! reproduced from the derived metrics alone.

mod aggregate;
mod evidence;
mod strict;

pub use aggregate::{aggregate, AggregateVerdict, ClassificationLedger, LedgerEntry};
pub use evidence::EvidenceClassifier;
pub use strict::StrictClassifier;

use crate::config::{AnalysisConfig, ClassifierMode};
use crate::derived::DerivedMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of one threshold check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTrace {
    pub name: String,
    pub threshold: f64,
    /// `None` when the input metric was unavailable
    pub observed: Option<f64>,
    pub passed: bool,
}

impl SignalTrace {
    /// `pass`, `fail`, or `unavailable`
    pub fn status(&self) -> &'static str {
        match (self.observed, self.passed) {
            (None, _) => "unavailable",
            (Some(_), true) => "pass",
            (Some(_), false) => "fail",
        }
    }
}

/// Evaluate `observed >= threshold`; an unavailable input never passes
pub fn evaluate_signal(name: &str, threshold: f64, observed: Option<f64>) -> SignalTrace {
    SignalTrace {
        name: name.to_string(),
        threshold,
        observed,
        passed: observed.is_some_and(|v| v >= threshold),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    MemoryBound,
    ComputeBound,
    MemorySensitive,
    InconclusiveLeanCompute,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::MemoryBound => "memory_bound",
            Verdict::ComputeBound => "compute_bound",
            Verdict::MemorySensitive => "memory_sensitive",
            Verdict::InconclusiveLeanCompute => "inconclusive_lean_compute",
        }
    }

    /// Counts toward the memory side of a cross-run aggregate
    pub fn is_memory(&self) -> bool {
        matches!(self, Verdict::MemoryBound | Verdict::MemorySensitive)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "memory_bound" => Ok(Verdict::MemoryBound),
            "compute_bound" => Ok(Verdict::ComputeBound),
            "memory_sensitive" => Ok(Verdict::MemorySensitive),
            "inconclusive_lean_compute" => Ok(Verdict::InconclusiveLeanCompute),
            other => Err(format!("unknown verdict `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierRule {
    Strict,
    Evidence,
}

impl ClassifierRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierRule::Strict => "strict",
            ClassifierRule::Evidence => "evidence",
        }
    }
}

impl fmt::Display for ClassifierRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ClassifierRule::Strict),
            "evidence" => Ok(ClassifierRule::Evidence),
            other => Err(format!("unknown classifier rule `{other}`")),
        }
    }
}

/// Verdict plus the signal trace that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub rule: ClassifierRule,
    pub verdict: Verdict,
    pub signals: Vec<SignalTrace>,
    /// Evidence rule only: passed / total signals
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn passed(&self) -> usize {
        self.signals.iter().filter(|s| s.passed).count()
    }

    /// Signals that could not be evaluated, as opposed to ones ruled out
    pub fn unavailable_signals(&self) -> Vec<&str> {
        self.signals
            .iter()
            .filter(|s| s.observed.is_none())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// One line per signal, e.g. `cpi >= 1.0: observed 1.5 (pass)`
    pub fn explain(&self) -> Vec<String> {
        self.signals
            .iter()
            .map(|s| match s.observed {
                Some(v) => format!("{} >= {}: observed {} ({})", s.name, s.threshold, v, s.status()),
                None => format!("{} >= {}: unavailable", s.name, s.threshold),
            })
            .collect()
    }
}

/// A classification rule over derived metrics
pub trait Classifier: Send + Sync {
    fn rule(&self) -> ClassifierRule;

    fn classify(&self, derived: &DerivedMetrics) -> Classification;
}

/// Classifiers enabled by the configured mode, strict first
pub fn classifiers_for(config: &AnalysisConfig) -> Vec<Box<dyn Classifier>> {
    let strict = || Box::new(StrictClassifier::new(config.strict.clone())) as Box<dyn Classifier>;
    let evidence = || Box::new(EvidenceClassifier::new(config.evidence.clone())) as Box<dyn Classifier>;

    match config.classifier {
        ClassifierMode::Strict => vec![strict()],
        ClassifierMode::Evidence => vec![evidence()],
        ClassifierMode::Both => vec![strict(), evidence()],
    }
}
