//! One analysis invocation
//!
//! Parse and derive run concurrently with the roofline lookup; both finish
//! before classification results and roofs are written to the summary.
//! Roofline and report problems degrade to missing values, they never
//! abort the run.

use crate::classify::{classifiers_for, AggregateVerdict, Classification, ClassificationLedger, ClassifierRule, LedgerEntry};
use crate::config::AnalysisConfig;
use crate::derived::{derive, DerivedMetrics};
use crate::error::Result;
use crate::models::{CounterGroup, MetricMap};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::parser::{parse_reports, CounterReport};
use crate::roofline::{BenchmarkRunner, LikwidBenchRunner, NodeSignature, RooflineAnalysis, RooflineOutcome, RooflineStore};
use crate::summary::SummaryRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs for one measurement window
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub run_label: String,
    pub reports: Vec<CounterReport>,
    /// Externally measured window length in seconds
    pub runtime_hint: Option<f64>,
    pub measure_roofline: bool,
    pub force_remeasure: bool,
    pub summary_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

impl AnalysisRequest {
    pub fn new(run_label: impl Into<String>) -> Self {
        Self {
            run_label: run_label.into(),
            measure_roofline: true,
            ..Default::default()
        }
    }

    pub fn with_report(mut self, report: CounterReport) -> Self {
        self.reports.push(report);
        self
    }

    /// Load a report file; the group is inferred from the file stem
    /// (`mem.txt`, `caches.txt`, ...)
    pub async fn with_report_file(mut self, path: &Path, group: Option<CounterGroup>) -> Result<Self> {
        let group = group.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(CounterGroup::Other(String::new()))
        });
        let report = CounterReport::load(path, group, self.run_label.clone()).await?;
        self.reports.push(report);
        Ok(self)
    }

    pub fn with_runtime_hint(mut self, seconds: Option<f64>) -> Self {
        self.runtime_hint = seconds;
        self
    }

    pub fn with_roofline(mut self, measure: bool, force: bool) -> Self {
        self.measure_roofline = measure;
        self.force_remeasure = force;
        self
    }

    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub metrics: MetricMap,
    pub derived: DerivedMetrics,
    pub roofline: Option<RooflineOutcome>,
    /// Why the roofline lookup produced nothing, if it was attempted
    pub roofline_error: Option<String>,
    pub analysis: Option<RooflineAnalysis>,
    pub classifications: Vec<Classification>,
    /// Cross-run verdict per rule after this run was appended to the ledger
    pub aggregates: Vec<(ClassifierRule, AggregateVerdict)>,
    pub summary: SummaryRecord,
}

pub struct Analyzer {
    config: AnalysisConfig,
    runner: Arc<dyn BenchmarkRunner>,
    signature: Option<NodeSignature>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Analyzer {
    /// Analyzer with the configured benchmark command and a detected node
    /// signature
    pub async fn new(config: AnalysisConfig) -> Result<Self> {
        let runner: Arc<dyn BenchmarkRunner> = Arc::new(LikwidBenchRunner::from_config(&config.roofline));
        let signature = NodeSignature::detect().await?;
        Ok(Self::with_parts(config, runner, signature))
    }

    pub fn with_parts(
        config: AnalysisConfig,
        runner: Arc<dyn BenchmarkRunner>,
        signature: Option<NodeSignature>,
    ) -> Self {
        let node = signature
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "ephemeral".to_string());
        Self {
            config,
            runner,
            signature,
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new(node),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn signature(&self) -> Option<&NodeSignature> {
        self.signature.as_ref()
    }

    pub fn store(&self) -> RooflineStore {
        RooflineStore::from_config(&self.config.roofline).with_logger(self.logger.clone())
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        self.logger.log_analysis_started(
            &request.run_label,
            request.reports.len(),
            request.measure_roofline,
        );

        let roof_lookup = async {
            if !request.measure_roofline {
                return None;
            }
            let result = self
                .store()
                .get_or_measure(
                    self.signature.as_ref(),
                    &self.config.roofline.kernels,
                    self.runner.as_ref(),
                    request.force_remeasure,
                )
                .await;
            Some(result)
        };

        let derivation = async {
            let metrics = parse_reports(&request.reports);
            let derived = derive(&metrics, request.runtime_hint);
            (metrics, derived)
        };

        let (roof_result, (metrics, derived)) = tokio::join!(roof_lookup, derivation);

        let missing = metrics.missing();
        if !missing.is_empty() {
            debug!(run_label = %request.run_label, missing = ?missing, "Metrics not found in reports");
            self.metrics.add_extraction_misses(missing.len() as u64);
        }

        let (roofline, roofline_error) = match roof_result {
            Some(Ok(outcome)) => (Some(outcome), None),
            Some(Err(e)) => {
                warn!(run_label = %request.run_label, error = %e, "Roofline lookup failed, continuing without roofs");
                (None, Some(e.to_string()))
            }
            None => (None, None),
        };

        let classifications: Vec<Classification> = classifiers_for(&self.config)
            .iter()
            .map(|classifier| classifier.classify(&derived))
            .collect();
        for classification in &classifications {
            self.metrics
                .inc_classification(classification.rule.as_str(), classification.verdict.as_str());
            self.logger.log_classification(
                &request.run_label,
                classification.rule.as_str(),
                classification.verdict.as_str(),
                classification.confidence,
                &classification.unavailable_signals(),
            );
        }

        let analysis = roofline
            .as_ref()
            .map(|r| RooflineAnalysis::new(&r.record, derived.instr_per_byte, derived.instr_per_sec));

        let summary = SummaryRecord::build(
            &request.run_label,
            &derived,
            roofline.as_ref().map(|r| &r.record),
            analysis.as_ref(),
            &classifications,
        );

        if let Some(path) = &request.summary_path {
            summary.write_csv(path).await?;
            self.logger.log_summary_written(
                &request.run_label,
                &path.display().to_string(),
                summary.rows.len(),
            );
        }

        let aggregates = match &request.ledger_path {
            Some(path) => self.record_in_ledger(path, &request.run_label, &classifications).await?,
            None => Vec::new(),
        };

        Ok(AnalysisOutcome {
            metrics,
            derived,
            roofline,
            roofline_error,
            analysis,
            classifications,
            aggregates,
            summary,
        })
    }

    async fn record_in_ledger(
        &self,
        path: &Path,
        run_label: &str,
        classifications: &[Classification],
    ) -> Result<Vec<(ClassifierRule, AggregateVerdict)>> {
        let ledger = ClassificationLedger::new(path, self.config.roofline.lock_timeout());
        let entries: Vec<LedgerEntry> = classifications
            .iter()
            .map(|c| LedgerEntry::from_classification(run_label, c))
            .collect();
        ledger.append(&entries).await?;

        let mut aggregates = Vec::new();
        for classification in classifications {
            let verdict = ledger
                .aggregate_rule(classification.rule, self.config.aggregate_threshold)
                .await?;
            self.logger.log_aggregate(
                classification.rule.as_str(),
                verdict.runs,
                verdict.fraction,
                verdict.confirmed,
            );
            aggregates.push((classification.rule, verdict));
        }
        Ok(aggregates)
    }
}
