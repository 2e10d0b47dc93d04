//! Prioritized extraction rules
//!
//! A metric is looked up by trying each [`ExtractionRule`] of its catalog entry in
//! order until one produces a finite value.

use super::numeric::{is_percent, parse_number, LabelPattern};
use super::table::{ReportRow, ReportTable};
use crate::models::{MetricKey, MetricMap};
use tracing::trace;

/// One way of pulling a metric out of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    /// Aggregate row summed across execution units (`STAT` tables)
    SumRow,
    /// A row carrying exactly one numeric value
    SingleRow,
    /// Named read-only variant of a bandwidth metric
    ReadOnlyFallback(&'static [&'static str]),
    /// Instructions reconstructed from cycles and CPI or IPC
    DerivedFromCycles,
}

impl ExtractionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionRule::SumRow => "sum_row",
            ExtractionRule::SingleRow => "single_row",
            ExtractionRule::ReadOnlyFallback(_) => "read_only_fallback",
            ExtractionRule::DerivedFromCycles => "derived_from_cycles",
        }
    }
}

/// Which aggregate column carries the metric.
///
/// Counts and bandwidths add up across units; ratios, clocks and
/// runtimes are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateColumn {
    Sum,
    Avg,
}

impl AggregateColumn {
    fn header(&self) -> &'static str {
        match self {
            AggregateColumn::Sum => "sum",
            AggregateColumn::Avg => "avg",
        }
    }
}

/// A successfully extracted value and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: f64,
    pub rule: ExtractionRule,
    /// Raw label of the matched row
    pub label: String,
    /// Value was printed as a percentage
    pub percent: bool,
}

/// Tables of one report plus the metrics already extracted from it
pub struct ExtractionContext<'a> {
    pub tables: &'a [ReportTable],
    pub known: &'a MetricMap,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(tables: &'a [ReportTable], known: &'a MetricMap) -> Self {
        Self { tables, known }
    }

    /// Try `rules` in order and return the first hit
    pub fn extract(
        &self,
        patterns: &[LabelPattern],
        rules: &[ExtractionRule],
        column: AggregateColumn,
    ) -> Option<Extracted> {
        rules.iter().find_map(|rule| {
            let hit = self.apply(*rule, patterns, column);
            if hit.is_none() {
                trace!(rule = rule.as_str(), "Extraction rule missed");
            }
            hit
        })
    }

    fn apply(
        &self,
        rule: ExtractionRule,
        patterns: &[LabelPattern],
        column: AggregateColumn,
    ) -> Option<Extracted> {
        match rule {
            ExtractionRule::SumRow => self.sum_row(patterns, column),
            ExtractionRule::SingleRow => self.single_row(patterns),
            ExtractionRule::ReadOnlyFallback(labels) => {
                let fallback: Vec<LabelPattern> = labels.iter().map(|l| LabelPattern::new(l)).collect();
                self.sum_row(&fallback, column)
                    .or_else(|| self.single_row(&fallback))
                    .map(|hit| Extracted { rule, ..hit })
            }
            ExtractionRule::DerivedFromCycles => self.derived_from_cycles(),
        }
    }

    fn sum_row(&self, patterns: &[LabelPattern], column: AggregateColumn) -> Option<Extracted> {
        self.tables
            .iter()
            .filter(|table| table.is_aggregate())
            .find_map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|row| matches_any(patterns, &row.label))
                    .find_map(|row| aggregate_value(table, row, column))
            })
            .map(|(row, value)| hit(row, value, ExtractionRule::SumRow))
    }

    fn single_row(&self, patterns: &[LabelPattern]) -> Option<Extracted> {
        self.tables
            .iter()
            .flat_map(|table| table.rows.iter())
            .filter(|row| !row.is_stat_row() && matches_any(patterns, &row.label))
            .find_map(|row| match row.numeric_cells().as_slice() {
                [(index, value)] => Some((row, *index, *value)),
                _ => None,
            })
            .map(|(row, index, value)| {
                let mut extracted = hit(row, value, ExtractionRule::SingleRow);
                extracted.percent |= is_percent(&row.cells[index]);
                extracted
            })
    }

    fn derived_from_cycles(&self) -> Option<Extracted> {
        let cycles = self.known.get(MetricKey::Cycles)?;

        let (value, label) = match (self.known.get(MetricKey::Cpi), self.known.get(MetricKey::Ipc)) {
            (Some(cpi), _) if cpi > 0.0 => (cycles / cpi, "cycles / cpi"),
            (_, Some(ipc)) if ipc > 0.0 => (cycles * ipc, "cycles * ipc"),
            _ => return None,
        };

        value.is_finite().then(|| Extracted {
            value,
            rule: ExtractionRule::DerivedFromCycles,
            label: label.to_string(),
            percent: false,
        })
    }
}

fn matches_any(patterns: &[LabelPattern], label: &str) -> bool {
    patterns.iter().any(|p| p.matches(label))
}

fn hit(row: &ReportRow, value: f64, rule: ExtractionRule) -> Extracted {
    Extracted {
        value,
        rule,
        label: row.raw_label.clone(),
        percent: is_percent(&row.raw_label),
    }
}

/// Value of an aggregate row in the requested column.
///
/// Headerless `STAT` rows are laid out Sum, Min, Max, Avg.
fn aggregate_value<'r>(
    table: &ReportTable,
    row: &'r ReportRow,
    column: AggregateColumn,
) -> Option<(&'r ReportRow, f64)> {
    if let Some(index) = table.column(column.header()) {
        let value = row.cells.get(index).and_then(|c| parse_number(c))?;
        return Some((row, value));
    }

    if !row.is_stat_row() {
        return None;
    }

    let numeric = row.numeric_cells();
    let value = match column {
        AggregateColumn::Sum => numeric.first(),
        AggregateColumn::Avg => numeric.last(),
    }?;
    Some((row, value.1))
}
