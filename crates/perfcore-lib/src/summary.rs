//! Summary record writer
//!
//! One `metric,value,unit,notes` row per computable field. Unavailable
//! values are omitted rather than written as zero. Metric names for the
//! roofline fields match what the plotting tools read back.

use crate::classify::Classification;
use crate::derived::DerivedMetrics;
use crate::error::{EngineError, Result};
use crate::lock::write_atomic;
use crate::models::MetricUnit;
use crate::roofline::{CacheLevel, RooflineAnalysis, RooflineRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SUMMARY_HEADER: [&str; 4] = ["metric", "value", "unit", "notes"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub notes: String,
}

/// Everything computed for one run, flattened to rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub run_label: String,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<SummaryRow>,
}

struct RowBuilder {
    rows: Vec<SummaryRow>,
}

impl RowBuilder {
    fn push(&mut self, metric: impl Into<String>, value: Option<f64>, unit: MetricUnit, notes: impl Into<String>) {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return;
        };
        self.rows.push(SummaryRow {
            metric: metric.into(),
            value,
            unit: unit.as_str().to_string(),
            notes: notes.into(),
        });
    }
}

impl SummaryRecord {
    /// Flatten derived metrics, roofs and verdicts into rows
    pub fn build(
        run_label: &str,
        derived: &DerivedMetrics,
        roofline: Option<&RooflineRecord>,
        analysis: Option<&RooflineAnalysis>,
        classifications: &[Classification],
    ) -> Self {
        let mut b = RowBuilder { rows: Vec::new() };

        b.push("instructions", derived.instructions, MetricUnit::Count, "");
        b.push("cycles", derived.cycles, MetricUnit::Count, "");
        b.push("runtime_s", derived.runtime_seconds, MetricUnit::Seconds, "");
        b.push("cpi", derived.cpi, MetricUnit::Ratio, "cycles / instructions");
        b.push("ipc", derived.ipc, MetricUnit::Ratio, "instructions / cycles");
        b.push("mpki", derived.mpki, MetricUnit::Ratio, "cache misses per 1000 instructions");
        b.push("llc_mpki", derived.llc_mpki, MetricUnit::Ratio, "LLC load misses per 1000 instructions");
        b.push("miss_ratio", derived.miss_ratio, MetricUnit::Ratio, "cache misses / cache references");
        b.push("backend_bound", derived.backend_bound, MetricUnit::Ratio, "topdown");
        b.push(
            "memory_bandwidth",
            derived.memory_bandwidth_mbps,
            MetricUnit::MBytesPerSec,
            derived.bandwidth_source.map(|s| s.as_str()).unwrap_or_default(),
        );
        b.push("bytes_per_sec", derived.bytes_per_sec, MetricUnit::BytesPerSec, "");
        b.push("app_instr_per_sec", derived.instr_per_sec, MetricUnit::InstrPerSec, "");
        b.push(
            "app_instr_per_byte",
            derived.instr_per_byte,
            MetricUnit::InstrPerByte,
            analysis
                .and_then(|a| a.region)
                .map(|r| format!("region {}", r.as_str()))
                .unwrap_or_default(),
        );

        if let Some(record) = roofline {
            let signature = record.node_signature.as_deref().unwrap_or("ephemeral");
            for roof in &record.levels {
                b.push(
                    format!("roof_{}", roof.level.as_str()),
                    roof.bandwidth_mbps.filter(|v| *v > 0.0),
                    MetricUnit::MBytesPerSec,
                    format!("{} {} on {}", roof.kernel, roof.working_set, signature),
                );
            }
            b.push(
                "roof_compute_mflops",
                record.compute.mflops.filter(|v| *v > 0.0),
                MetricUnit::MFlopsPerSec,
                format!("{} {} on {}", record.compute.kernel, record.compute.working_set, signature),
            );
        }

        if let Some(analysis) = analysis {
            b.push(
                "roof_compute_instr_per_sec_est",
                analysis.compute_instr_per_sec,
                MetricUnit::InstrPerSec,
                "estimated from MFLOP/s",
            );
            for level in CacheLevel::ALL {
                b.push(
                    format!("knee_{}", level.as_str()),
                    analysis.level(level).and_then(|l| l.knee),
                    MetricUnit::InstrPerByte,
                    "",
                );
            }
            b.push(
                "memory_utilization",
                analysis.memory_utilization,
                MetricUnit::Ratio,
                "achieved / attainable at MEM roof",
            );
        }

        for classification in classifications {
            let rule = classification.rule.as_str();
            let unavailable = classification.unavailable_signals();
            let notes = if unavailable.is_empty() {
                classification.verdict.as_str().to_string()
            } else {
                format!(
                    "{}; unavailable: {}",
                    classification.verdict.as_str(),
                    unavailable.join(" ")
                )
            };
            b.push(
                format!("verdict_{rule}"),
                Some(if classification.verdict.is_memory() { 1.0 } else { 0.0 }),
                MetricUnit::Flag,
                notes,
            );
            b.push(format!("confidence_{rule}"), classification.confidence, MetricUnit::Ratio, "");
            for signal in &classification.signals {
                b.push(
                    format!("signal_{rule}_{}", signal.name),
                    signal.observed,
                    MetricUnit::Ratio,
                    format!("threshold {} {}", signal.threshold, signal.status()),
                );
            }
        }

        Self {
            run_label: run_label.to_string(),
            generated_at: Utc::now(),
            rows: b.rows,
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.rows.iter().find(|r| r.metric == metric).map(|r| r.value)
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        // A record with no rows still carries the header
        if self.rows.is_empty() {
            writer.write_record(SUMMARY_HEADER)?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| EngineError::Csv(e.into_error().into()))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Replace any previous summary at `path` with this record
    pub async fn write_csv(&self, path: &Path) -> Result<()> {
        let content = self.to_csv_string()?;
        write_atomic(path, content.as_bytes()).await
    }
}

/// Read a summary back as metric -> value; an empty or non-numeric value
/// reads as `None`
pub async fn read_summary(path: &Path) -> Result<BTreeMap<String, Option<f64>>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::io(path, e))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut values = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let Some(metric) = record.get(0).map(str::trim).filter(|m| !m.is_empty()) else {
            continue;
        };
        let value = record
            .get(1)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<f64>().ok());
        values.insert(metric.to_string(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, EvidenceClassifier, StrictClassifier};
    use crate::config::RooflineKernels;
    use crate::roofline::RoofTarget;
    use tempfile::TempDir;

    fn derived() -> DerivedMetrics {
        DerivedMetrics {
            instructions: Some(1_000_000.0),
            cycles: Some(1_500_000.0),
            runtime_seconds: Some(1.0),
            cpi: Some(1.5),
            mpki: Some(15.0),
            miss_ratio: Some(0.3),
            instr_per_sec: Some(1_000_000.0),
            ..Default::default()
        }
    }

    fn roofs() -> RooflineRecord {
        let mut record = RooflineRecord::empty(Some("node-a".to_string()), &RooflineKernels::default());
        record.set(RoofTarget::Level(CacheLevel::L1), Some(4.0));
        record.set(RoofTarget::Level(CacheLevel::Mem), Some(1.0));
        record.set(RoofTarget::Compute, Some(2.0));
        record
    }

    #[test]
    fn test_unavailable_fields_are_omitted() {
        let summary = SummaryRecord::build("run-1", &derived(), None, None, &[]);

        assert_eq!(summary.get("cpi"), Some(1.5));
        assert_eq!(summary.get("mpki"), Some(15.0));
        assert_eq!(summary.get("llc_mpki"), None);
        assert_eq!(summary.get("bytes_per_sec"), None);
        assert!(summary.rows.iter().all(|r| !r.metric.starts_with("roof_")));
    }

    #[test]
    fn test_absent_roof_level_is_not_zero() {
        let record = roofs();
        let summary = SummaryRecord::build("run-1", &derived(), Some(&record), None, &[]);

        assert_eq!(summary.get("roof_L1"), Some(4.0));
        assert_eq!(summary.get("roof_MEM"), Some(1.0));
        assert_eq!(summary.get("roof_L2"), None);
        assert_eq!(summary.get("roof_compute_mflops"), Some(2.0));
        let l1 = summary.rows.iter().find(|r| r.metric == "roof_L1").unwrap();
        assert_eq!(l1.unit, "MBytes/s");
        assert!(l1.notes.contains("node-a"));
    }

    #[test]
    fn test_roofline_analysis_rows() {
        let record = roofs();
        let mut input = derived();
        input.instr_per_byte = Some(0.5);
        let analysis = RooflineAnalysis::new(&record, input.instr_per_byte, input.instr_per_sec);
        let summary = SummaryRecord::build("run-1", &input, Some(&record), Some(&analysis), &[]);

        assert_eq!(summary.get("roof_compute_instr_per_sec_est"), Some(2_000_000.0));
        assert!(summary.get("knee_L1").is_some());
        assert!(summary.get("knee_MEM").is_some());
        assert_eq!(summary.get("knee_L2"), None);
        let point = summary.rows.iter().find(|r| r.metric == "app_instr_per_byte").unwrap();
        assert!(point.notes.starts_with("region "));
    }

    #[test]
    fn test_verdict_and_trace_rows() {
        let input = derived();
        let classifications = vec![
            StrictClassifier::default().classify(&input),
            EvidenceClassifier::default().classify(&input),
        ];
        let summary = SummaryRecord::build("run-1", &input, None, None, &classifications);

        assert_eq!(summary.get("verdict_strict"), Some(1.0));
        assert_eq!(summary.get("confidence_strict"), None);
        assert_eq!(summary.get("signal_strict_mpki"), Some(15.0));
        assert_eq!(summary.get("confidence_evidence"), Some(0.5));
        assert_eq!(summary.get("signal_evidence_backend_bound"), None);

        let evidence = summary.rows.iter().find(|r| r.metric == "verdict_evidence").unwrap();
        assert_eq!(evidence.notes, "memory_sensitive; unavailable: llc_mpki backend_bound");
    }

    #[tokio::test]
    async fn test_write_replaces_previous_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run-1").join("summary.csv");

        let first = SummaryRecord::build("run-1", &derived(), Some(&roofs()), None, &[]);
        first.write_csv(&path).await.unwrap();

        let second = SummaryRecord::build("run-1", &derived(), None, None, &[]);
        second.write_csv(&path).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("metric,value,unit,notes\n"));
        assert!(!content.contains("roof_L1"));

        let values = read_summary(&path).await.unwrap();
        assert_eq!(values.get("cpi"), Some(&Some(1.5)));
        assert_eq!(values.len(), second.rows.len());
    }

    #[tokio::test]
    async fn test_read_summary_empty_value_is_absent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("summary.csv");
        tokio::fs::write(
            &path,
            "metric,value,unit,notes\nroof_L1,51200,MBytes/s,\nroof_L2,,MBytes/s,failed\napp_instr_per_byte,0.25,instr/byte,\n",
        )
        .await
        .unwrap();

        let values = read_summary(&path).await.unwrap();
        assert_eq!(values["roof_L1"], Some(51200.0));
        assert_eq!(values["roof_L2"], None);
        assert_eq!(values["app_instr_per_byte"], Some(0.25));
    }

    #[test]
    fn test_empty_record_keeps_header_and_json() {
        let summary = SummaryRecord::build("empty", &DerivedMetrics::default(), None, None, &[]);
        assert!(summary.rows.is_empty());
        assert_eq!(summary.to_csv_string().unwrap(), "metric,value,unit,notes\n");

        let json: serde_json::Value = serde_json::from_str(&summary.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["run_label"], "empty");
        assert!(json["rows"].as_array().unwrap().is_empty());
    }
}
