//! Counter report parsing
//!
//! Turns loosely structured counter-tool output into a flat [`MetricMap`].
//! Reports from different counter groups covering the same window are
//! parsed independently and merged. Extraction never fails: a metric that
//! cannot be found is absent from the map, not zero.
//!
//! [`MetricMap`]: crate::models::MetricMap

mod numeric;
mod report;
mod strategy;
mod table;


pub use numeric::{is_percent, normalize_label, parse_number, LabelPattern};
pub use report::{parse_report, parse_reports, CounterReport, ParsedReport};
pub use strategy::{AggregateColumn, Extracted, ExtractionContext, ExtractionRule};
pub use table::{tokenize, ReportRow, ReportTable, RowLayout};
