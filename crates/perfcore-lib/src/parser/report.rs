//! Counter report loading and metric extraction

use super::numeric::LabelPattern;
use super::strategy::{AggregateColumn, Extracted, ExtractionContext, ExtractionRule};
use super::table::{tokenize, ReportRow, ReportTable};
use crate::error::{EngineError, Result};
use crate::models::{CounterGroup, MetricKey, MetricMap};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const DIRECT: &[ExtractionRule] = &[ExtractionRule::SumRow, ExtractionRule::SingleRow];

const WITH_CYCLES: &[ExtractionRule] = &[
    ExtractionRule::SumRow,
    ExtractionRule::SingleRow,
    ExtractionRule::DerivedFromCycles,
];

const WITH_READ_ONLY: &[ExtractionRule] = &[
    ExtractionRule::SumRow,
    ExtractionRule::SingleRow,
    ExtractionRule::ReadOnlyFallback(&["memory read bandwidth", "memory read data volume rate"]),
];

/// Which counter groups a catalog entry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupScope {
    Any,
    CacheEvents,
    NotCacheEvents,
}

impl GroupScope {
    fn admits(&self, group: &CounterGroup) -> bool {
        match self {
            GroupScope::Any => true,
            GroupScope::CacheEvents => *group == CounterGroup::CacheEvents,
            GroupScope::NotCacheEvents => *group != CounterGroup::CacheEvents,
        }
    }
}

/// How one known metric is found in a report
struct MetricSpec {
    key: MetricKey,
    labels: &'static [&'static str],
    rules: &'static [ExtractionRule],
    column: AggregateColumn,
    scope: GroupScope,
}

impl MetricSpec {
    const fn new(key: MetricKey, labels: &'static [&'static str]) -> Self {
        Self {
            key,
            labels,
            rules: DIRECT,
            column: AggregateColumn::Sum,
            scope: GroupScope::Any,
        }
    }

    const fn rules(mut self, rules: &'static [ExtractionRule]) -> Self {
        self.rules = rules;
        self
    }

    const fn averaged(mut self) -> Self {
        self.column = AggregateColumn::Avg;
        self
    }

    const fn scope(mut self, scope: GroupScope) -> Self {
        self.scope = scope;
        self
    }

    fn patterns(&self) -> Vec<LabelPattern> {
        self.labels.iter().map(|l| LabelPattern::new(l)).collect()
    }
}

// Cycles, CPI and IPC come before instructions so the derived-from-cycles
// rule can see them.
const CATALOG: &[MetricSpec] = &[
    MetricSpec::new(
        MetricKey::Cycles,
        &["cycles", "cpu-cycles", "cpu_clk_unhalted_core", "cpu_clk_unhalted.thread"],
    ),
    MetricSpec::new(MetricKey::Cpi, &["cpi"]).averaged(),
    MetricSpec::new(MetricKey::Ipc, &["ipc"]).averaged(),
    MetricSpec::new(
        MetricKey::Instructions,
        &["instructions", "instr_retired_any", "inst_retired.any"],
    )
    .rules(WITH_CYCLES),
    MetricSpec::new(MetricKey::CacheMisses, &["cache-misses", "cache_misses", "cache misses"]),
    MetricSpec::new(
        MetricKey::CacheReferences,
        &["cache-references", "cache_references", "cache references"],
    ),
    MetricSpec::new(
        MetricKey::LlcLoadMisses,
        &[
            "llc-load-misses",
            "llc_load_misses",
            "mem_load_retired.l3_miss",
            "longest_lat_cache_miss",
            "longest_lat_cache.miss",
        ],
    ),
    MetricSpec::new(MetricKey::MemoryBandwidth, &["memory bandwidth"])
        .rules(WITH_READ_ONLY)
        .scope(GroupScope::NotCacheEvents),
    MetricSpec::new(MetricKey::CacheGroupBandwidth, &["memory bandwidth", "l3 bandwidth"])
        .rules(WITH_READ_ONLY)
        .scope(GroupScope::CacheEvents),
    MetricSpec::new(
        MetricKey::BackendBound,
        &["backend bound", "back end", "tma_backend_bound", "backend_bound"],
    )
    .averaged(),
    MetricSpec::new(
        MetricKey::Runtime,
        &["runtime (rdtsc)", "rdtsc runtime", "runtime", "seconds time elapsed"],
    )
    .averaged(),
    MetricSpec::new(MetricKey::ClockMhz, &["clock"]).averaged(),
];

/// One textual counter report, identified by (group, run label)
#[derive(Debug, Clone)]
pub struct CounterReport {
    pub group: CounterGroup,
    pub run_label: String,
    text: String,
    tables: Vec<ReportTable>,
}

impl CounterReport {
    pub fn new(group: CounterGroup, run_label: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let tables = tokenize(&text);
        Self {
            group,
            run_label: run_label.into(),
            text,
            tables,
        }
    }

    /// Read a report from disk
    pub async fn load(
        path: impl AsRef<Path>,
        group: CounterGroup,
        run_label: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        Ok(Self::new(group, run_label, text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tables(&self) -> &[ReportTable] {
        &self.tables
    }

    /// Best available value for a label pattern, or `None`
    pub fn find(&self, pattern: &str) -> Option<f64> {
        let known = MetricMap::new();
        ExtractionContext::new(&self.tables, &known)
            .extract(&[LabelPattern::new(pattern)], DIRECT, AggregateColumn::Sum)
            .map(|hit| hit.value)
    }

    /// Wall time of the measurement window, if the report prints one
    pub fn runtime_seconds(&self) -> Option<f64> {
        let spec = CATALOG.iter().find(|s| s.key == MetricKey::Runtime)?;
        let known = MetricMap::new();
        ExtractionContext::new(&self.tables, &known)
            .extract(&spec.patterns(), spec.rules, spec.column)
            .map(|hit| hit.value)
    }
}

/// Metrics pulled out of one report with the rule that produced each
#[derive(Debug, Clone, Default)]
pub struct ParsedReport {
    pub metrics: MetricMap,
    pub sources: BTreeMap<MetricKey, Extracted>,
}

impl ParsedReport {
    fn is_derived(&self, key: MetricKey) -> bool {
        self.sources
            .get(&key)
            .is_some_and(|hit| hit.rule == ExtractionRule::DerivedFromCycles)
    }
}

/// Extract every known metric from a report.
///
/// Never fails: metrics that cannot be found are simply absent. Rows that
/// match no known metric land in the map's additional bucket.
pub fn parse_report(report: &CounterReport) -> ParsedReport {
    let mut parsed = ParsedReport::default();

    for spec in CATALOG.iter().filter(|s| s.scope.admits(&report.group)) {
        let hit = ExtractionContext::new(&report.tables, &parsed.metrics).extract(
            &spec.patterns(),
            spec.rules,
            spec.column,
        );

        let Some(mut hit) = hit else {
            debug!(
                group = %report.group,
                run_label = %report.run_label,
                metric = %spec.key,
                "Metric not found in report"
            );
            continue;
        };

        if spec.key == MetricKey::BackendBound && (hit.percent || hit.value > 1.0) {
            hit.value /= 100.0;
        }

        if parsed.metrics.insert(spec.key, hit.value) {
            debug!(
                group = %report.group,
                metric = %spec.key,
                value = hit.value,
                rule = hit.rule.as_str(),
                "Extracted metric"
            );
            parsed.sources.insert(spec.key, hit);
        }
    }

    collect_additional(report, &mut parsed.metrics);
    parsed
}

/// Parse and merge several reports covering the same measurement window.
///
/// Directly reported values win over values derived from cycles, whichever
/// report they come from; earlier reports win ties.
pub fn parse_reports(reports: &[CounterReport]) -> MetricMap {
    let parsed: Vec<ParsedReport> = reports.iter().map(parse_report).collect();
    let mut merged = MetricMap::new();

    for report in &parsed {
        let mut direct = report.metrics.clone();
        if report.is_derived(MetricKey::Instructions) {
            direct = without(&direct, MetricKey::Instructions);
        }
        merged.merge(&direct);
    }

    if !merged.contains(MetricKey::Instructions) {
        let hit = ExtractionContext::new(&[], &merged).extract(
            &[],
            &[ExtractionRule::DerivedFromCycles],
            AggregateColumn::Sum,
        );
        if let Some(hit) = hit {
            merged.insert(MetricKey::Instructions, hit.value);
        }
    }

    merged
}

fn without(map: &MetricMap, key: MetricKey) -> MetricMap {
    let mut out = MetricMap::new();
    for (k, v) in map.known().filter(|(k, _)| *k != key) {
        out.insert(k, v);
    }
    for (label, v) in map.additional_entries() {
        out.insert_additional(label, v);
    }
    out
}

fn collect_additional(report: &CounterReport, metrics: &mut MetricMap) {
    let known: Vec<LabelPattern> = CATALOG.iter().flat_map(|s| s.patterns()).collect();

    for table in &report.tables {
        for row in &table.rows {
            if known.iter().any(|p| p.matches(&row.label)) {
                continue;
            }
            let Some(value) = additional_value(table, row) else {
                continue;
            };
            let label = row.label.strip_suffix(" stat").unwrap_or(&row.label);
            if metrics.additional(label).is_none() {
                metrics.insert_additional(label, value);
            }
        }
    }
}

fn additional_value(table: &ReportTable, row: &ReportRow) -> Option<f64> {
    let numeric = row.numeric_cells();
    if let Some(index) = table.column("sum") {
        return numeric.iter().find(|(i, _)| *i == index).map(|(_, v)| *v);
    }
    if row.is_stat_row() {
        return numeric.first().map(|(_, v)| *v);
    }
    match numeric.as_slice() {
        [(_, value)] => Some(*value),
        _ => None,
    }
}
