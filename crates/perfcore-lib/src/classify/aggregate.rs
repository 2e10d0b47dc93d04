//! Cross-run aggregation and the classification ledger

use super::{Classification, ClassifierRule, Verdict};
use crate::error::{EngineError, Result};
use crate::lock::acquire_exclusive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Fraction of memory-classified runs across a set of runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateVerdict {
    pub runs: usize,
    pub memory_runs: usize,
    /// `None` for an empty set
    pub fraction: Option<f64>,
    pub confirmed: bool,
}

/// Confirm when the memory fraction reaches `threshold` (inclusive)
pub fn aggregate(memory_flags: &[bool], threshold: f64) -> AggregateVerdict {
    let runs = memory_flags.len();
    let memory_runs = memory_flags.iter().filter(|m| **m).count();
    let fraction = (runs > 0).then(|| memory_runs as f64 / runs as f64);

    AggregateVerdict {
        runs,
        memory_runs,
        fraction,
        confirmed: fraction.is_some_and(|f| f >= threshold),
    }
}

/// One ledger row per evaluated run and rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_label: String,
    pub rule: ClassifierRule,
    pub verdict: Verdict,
    pub memory_flag: bool,
    pub confidence: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_classification(run_label: &str, classification: &Classification) -> Self {
        Self {
            run_label: run_label.to_string(),
            rule: classification.rule,
            verdict: classification.verdict,
            memory_flag: classification.verdict.is_memory(),
            confidence: classification.confidence,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only CSV of per-run verdicts
pub struct ClassificationLedger {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ClassificationLedger {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Append entries under an exclusive lock, writing the header for a new file
    pub async fn append(&self, entries: &[LedgerEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _lock = acquire_exclusive(&self.lock_path(), self.lock_timeout).await?;

        let is_new = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(EngineError::io(&self.path, e)),
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(Vec::new());
        for entry in entries {
            writer.serialize(entry)?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| EngineError::io(&self.path, e.into_error()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.flush().await.map_err(|e| EngineError::io(&self.path, e))?;
        Ok(())
    }

    /// All entries in file order; a missing ledger is empty
    pub async fn read(&self) -> Result<Vec<LedgerEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::io(&self.path, e)),
        };

        let mut reader = csv::Reader::from_reader(content.as_bytes());
        reader
            .deserialize()
            .collect::<std::result::Result<Vec<LedgerEntry>, _>>()
            .map_err(EngineError::from)
    }

    /// Aggregate the latest verdict per run label for one rule
    pub async fn aggregate_rule(&self, rule: ClassifierRule, threshold: f64) -> Result<AggregateVerdict> {
        let entries = self.read().await?;
        Ok(aggregate(&latest_flags(&entries, rule), threshold))
    }
}

fn latest_flags(entries: &[LedgerEntry], rule: ClassifierRule) -> Vec<bool> {
    let mut latest: BTreeMap<&str, &LedgerEntry> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.rule == rule) {
        match latest.get(entry.run_label.as_str()) {
            Some(seen) if seen.recorded_at > entry.recorded_at => {}
            _ => {
                latest.insert(entry.run_label.as_str(), entry);
            }
        }
    }
    latest.values().map(|e| e.memory_flag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(run: &str, rule: ClassifierRule, verdict: Verdict) -> LedgerEntry {
        LedgerEntry {
            run_label: run.to_string(),
            rule,
            verdict,
            memory_flag: verdict.is_memory(),
            confidence: match rule {
                ClassifierRule::Strict => None,
                ClassifierRule::Evidence => Some(0.75),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_six_of_ten_confirms() {
        let flags: Vec<bool> = (0..10).map(|i| i < 6).collect();
        let result = aggregate(&flags, 0.60);
        assert_eq!(result.fraction, Some(0.6));
        assert!(result.confirmed);
        assert_eq!(result.memory_runs, 6);
    }

    #[test]
    fn test_below_threshold_and_empty() {
        let flags: Vec<bool> = (0..10).map(|i| i < 5).collect();
        assert!(!aggregate(&flags, 0.60).confirmed);

        let empty = aggregate(&[], 0.60);
        assert_eq!(empty.fraction, None);
        assert!(!empty.confirmed);
    }

    #[tokio::test]
    async fn test_ledger_append_and_aggregate() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ClassificationLedger::new(temp_dir.path().join("ledger.csv"), Duration::from_secs(5));

        for i in 0..10 {
            let verdict = if i < 6 { Verdict::MemoryBound } else { Verdict::ComputeBound };
            ledger
                .append(&[
                    entry(&format!("run-{i}"), ClassifierRule::Strict, verdict),
                    entry(&format!("run-{i}"), ClassifierRule::Evidence, Verdict::InconclusiveLeanCompute),
                ])
                .await
                .unwrap();
        }

        let content = tokio::fs::read_to_string(ledger.path()).await.unwrap();
        assert!(content.starts_with("run_label,rule,verdict,memory_flag,confidence,recorded_at\n"));
        assert_eq!(content.matches("run_label").count(), 1);

        let entries = ledger.read().await.unwrap();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].confidence, None);
        assert_eq!(entries[1].confidence, Some(0.75));

        let strict = ledger.aggregate_rule(ClassifierRule::Strict, 0.60).await.unwrap();
        assert_eq!(strict.runs, 10);
        assert!(strict.confirmed);

        let evidence = ledger.aggregate_rule(ClassifierRule::Evidence, 0.60).await.unwrap();
        assert_eq!(evidence.fraction, Some(0.0));
        assert!(!evidence.confirmed);
    }

    #[tokio::test]
    async fn test_rerun_replaces_earlier_verdict() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ClassificationLedger::new(temp_dir.path().join("ledger.csv"), Duration::from_secs(5));

        let mut first = entry("run-1", ClassifierRule::Strict, Verdict::ComputeBound);
        first.recorded_at = Utc::now() - chrono::Duration::seconds(60);
        let second = entry("run-1", ClassifierRule::Strict, Verdict::MemoryBound);
        ledger.append(&[first, second]).await.unwrap();

        let result = ledger.aggregate_rule(ClassifierRule::Strict, 0.60).await.unwrap();
        assert_eq!(result.runs, 1);
        assert!(result.confirmed);
    }

    #[tokio::test]
    async fn test_missing_ledger_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ClassificationLedger::new(temp_dir.path().join("none.csv"), Duration::from_secs(1));
        assert!(ledger.read().await.unwrap().is_empty());
        assert_eq!(ledger.aggregate_rule(ClassifierRule::Strict, 0.6).await.unwrap().runs, 0);
    }
}
