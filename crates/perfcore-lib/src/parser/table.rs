//! Counter report tokenization
//!
//! Counter tools print the same logical data in several shapes:
//! - boxed pipe tables (`| Memory bandwidth [MBytes/s] | 2048.0 |`)
//! - comma tables from CSV output mode (`Runtime (RDTSC) [s] STAT,4.0,1.0,1.0,1.0`)
//! - `perf stat` columns (`   1,000,000      instructions   # 0.67 insn per cycle`)
//! - `key: value` summaries (`MByte/s:    12345.67`)
//!
//! Each shape is reduced to [`ReportTable`]s of labelled [`ReportRow`]s.
//! Truncated or partial input simply yields fewer rows.

use super::numeric::{normalize_label, parse_number};

/// Labels that open a new table when they appear in the first column
const HEADER_LABELS: &[&str] = &["metric", "event"];

/// Unit tokens `perf stat` prints between the value and the event name
const PERF_UNIT_TOKENS: &[&str] = &["%", "msec", "ms", "us", "ns", "joules", "mib"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    Pipe,
    Comma,
    Column,
    KeyValue,
}

/// One labelled row of a report
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// Normalized label
    pub label: String,
    pub raw_label: String,
    /// Value cells, excluding the label column
    pub cells: Vec<String>,
    pub layout: RowLayout,
}

impl ReportRow {
    fn new(raw_label: &str, cells: Vec<String>, layout: RowLayout) -> Self {
        Self {
            label: normalize_label(raw_label),
            raw_label: raw_label.trim().to_string(),
            cells,
            layout,
        }
    }

    /// Parseable numeric cells in column order
    pub fn numeric_cells(&self) -> Vec<(usize, f64)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| parse_number(c).map(|v| (i, v)))
            .collect()
    }

    /// Aggregate rows carry a trailing `STAT` marker
    pub fn is_stat_row(&self) -> bool {
        self.label.ends_with(" stat")
    }
}

/// Rows sharing one header
#[derive(Debug, Clone, Default)]
pub struct ReportTable {
    /// Normalized column names, excluding the label column
    pub header: Option<Vec<String>>,
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    /// Index into row cells for a named column
    pub fn column(&self, name: &str) -> Option<usize> {
        let name = normalize_label(name);
        self.header.as_ref()?.iter().position(|c| *c == name)
    }

    /// Whether this table carries per-metric aggregates across execution units
    pub fn is_aggregate(&self) -> bool {
        self.column("sum").is_some() || self.rows.iter().any(ReportRow::is_stat_row)
    }

    fn is_empty(&self) -> bool {
        self.header.is_none() && self.rows.is_empty()
    }
}

struct Tokenizer {
    tables: Vec<ReportTable>,
    current: ReportTable,
}

impl Tokenizer {
    fn new() -> Self {
        Self {
            tables: Vec::new(),
            current: ReportTable::default(),
        }
    }

    fn close(&mut self) {
        if !self.current.is_empty() {
            self.tables.push(std::mem::take(&mut self.current));
        }
    }

    fn push_cells(&mut self, mut cells: Vec<String>, layout: RowLayout) {
        if cells.is_empty() {
            return;
        }
        let label = cells.remove(0);
        if label.trim().is_empty() {
            return;
        }

        if HEADER_LABELS.contains(&normalize_label(&label).as_str()) {
            self.close();
            self.current.header = Some(cells.iter().map(|c| normalize_label(c)).collect());
            return;
        }

        self.current.rows.push(ReportRow::new(&label, cells, layout));
    }

    fn push_row(&mut self, row: ReportRow) {
        self.current.rows.push(row);
    }

    fn finish(mut self) -> Vec<ReportTable> {
        self.close();
        self.tables
    }
}

/// Split report text into tables
pub fn tokenize(text: &str) -> Vec<ReportTable> {
    let mut tokenizer = Tokenizer::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            tokenizer.close();
            continue;
        }

        if is_separator(trimmed) {
            continue;
        }

        if trimmed.starts_with('|') {
            tokenizer.push_cells(split_pipe(trimmed), RowLayout::Pipe);
        } else if trimmed.starts_with("TABLE,") {
            tokenizer.close();
        } else if starts_with_value(trimmed) {
            if let Some(row) = parse_perf_line(trimmed) {
                tokenizer.push_row(row);
            }
        } else if let Some((label, value)) = split_key_value(trimmed) {
            tokenizer.push_row(ReportRow::new(label, vec![value.to_string()], RowLayout::KeyValue));
        } else if trimmed.contains(',') {
            let cells = trimmed.split(',').map(|c| c.trim().to_string()).collect();
            tokenizer.push_cells(cells, RowLayout::Comma);
        }
    }

    tokenizer.finish()
}

fn is_separator(line: &str) -> bool {
    (line.starts_with('+') || line.starts_with('-') || line.starts_with('='))
        && line.chars().all(|c| matches!(c, '+' | '-' | '=' | ' '))
}

/// `label: value`, unless the line is really a comma row such as
/// `CPU name:,Intel(R) Xeon(R)` or `Region: r1,1.0,2.0`
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (label, value) = line.split_once(':')?;
    let value = value.trim();
    if label.contains(',') || value.starts_with(',') {
        return None;
    }
    let first = value.split_whitespace().next().unwrap_or("");
    if value.contains(',') && !(is_grouped_number(first) && !value[first.len()..].contains(',')) {
        return None;
    }
    Some((label, value))
}

/// `1,000` or `-12,345,678.9`: comma-grouped digits in threes
fn is_grouped_number(token: &str) -> bool {
    let token = token.strip_prefix('-').unwrap_or(token);
    let (int, frac) = token.split_once('.').unwrap_or((token, ""));
    let mut groups = int.split(',');
    let head_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()));
    let rest: Vec<&str> = groups.collect();
    head_ok
        && !rest.is_empty()
        && rest.iter().all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit()))
        && frac.bytes().all(|b| b.is_ascii_digit())
}

fn split_pipe(line: &str) -> Vec<String> {
    let inner = line.trim_start_matches('|').trim_end_matches('|');
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn starts_with_value(line: &str) -> bool {
    let mut chars = line.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() || c == '<' => true,
        Some('-') | Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Parse one `perf stat` line, either human-readable or `-x,` separated
fn parse_perf_line(line: &str) -> Option<ReportRow> {
    // `-x,` mode: value,unit,event,...
    if !line.contains(char::is_whitespace) && line.contains(',') {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() >= 3 && !fields[2].trim().is_empty() {
            let cell = format!("{} {}", fields[0], fields[1]).trim().to_string();
            return Some(ReportRow::new(fields[2], vec![cell], RowLayout::Column));
        }
        return None;
    }

    let body = line.split('#').next().unwrap_or(line);
    let mut tokens = body.split_whitespace().peekable();

    let mut value = tokens.next()?.to_string();
    if value.starts_with('<') && !value.ends_with('>') {
        // "<not counted>" spans two tokens
        if let Some(rest) = tokens.next() {
            value = format!("{value} {rest}");
        }
    }

    let mut cell = value;
    while let Some(token) = tokens.peek() {
        if PERF_UNIT_TOKENS.contains(&token.to_ascii_lowercase().as_str()) {
            cell = format!("{cell} {token}");
            tokens.next();
        } else {
            break;
        }
    }

    let label: Vec<&str> = tokens.collect();
    if label.is_empty() {
        return None;
    }

    Some(ReportRow::new(&label.join(" "), vec![cell], RowLayout::Column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_pipe_tables() {
        let text = r#"
+-----------------------------------+------------+
|               Metric              | HWThread 0 |
+-----------------------------------+------------+
|        Runtime (RDTSC) [s]        |     1.0000 |
|    Memory bandwidth [MBytes/s]    |  2048.0000 |
+-----------------------------------+------------+
"#;
        let tables = tokenize(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].header, Some(vec!["hwthread 0".to_string()]));
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[1].label, "memory bandwidth [mbytes/s]");
        assert_eq!(tables[0].rows[1].numeric_cells(), vec![(0, 2048.0)]);
    }

    #[test]
    fn test_adjacent_boxed_tables_split_on_header() {
        let text = r#"+-------+---------+------------+
| Event | Counter | HWThread 0 |
+-------+---------+------------+
| INSTR_RETIRED_ANY | FIXC0 | 1000000 |
+-------+---------+------------+
+--------+------------+
| Metric | HWThread 0 |
+--------+------------+
| CPI    |     1.5000 |
+--------+------------+
"#;
        let tables = tokenize(text);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].column("counter"), Some(0));
        assert_eq!(tables[0].rows[0].numeric_cells(), vec![(1, 1_000_000.0)]);
        assert_eq!(tables[1].rows[0].label, "cpi");
    }

    #[test]
    fn test_tokenize_comma_stat_table() {
        let text = "TABLE,Region 1,Group 1 Metric STAT,MEM\n\
                    Metric,Sum,Min,Max,Avg\n\
                    Runtime (RDTSC) [s] STAT,4.0,1.0,1.0,1.0\n\
                    Memory bandwidth [MBytes/s] STAT,8192.0,2000.0,2100.0,2048.0\n";
        let tables = tokenize(text);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].is_aggregate());
        assert_eq!(tables[0].column("sum"), Some(0));
        assert_eq!(tables[0].column("avg"), Some(3));
        assert!(tables[0].rows[1].is_stat_row());
    }

    #[test]
    fn test_tokenize_perf_stat_output() {
        let text = r#"
 Performance counter stats for 'system wide':

         1,000,000      instructions              #    0.67  insn per cycle
         1,500,000      cycles
            15,000      cache-misses              #   30.000 % of all cache refs
   <not counted>      LLC-load-misses
       35.2 %  tma_backend_bound

       1.001234567 seconds time elapsed
"#;
        let tables = tokenize(text);
        let rows: Vec<&ReportRow> = tables.iter().flat_map(|t| t.rows.iter()).collect();

        let find = |label: &str| rows.iter().find(|r| r.label == label).copied();
        assert_eq!(find("instructions").unwrap().cells, vec!["1,000,000"]);
        assert_eq!(find("cache-misses").unwrap().numeric_cells(), vec![(0, 15_000.0)]);
        assert!(find("llc-load-misses").unwrap().numeric_cells().is_empty());
        assert_eq!(find("tma_backend_bound").unwrap().cells, vec!["35.2 %"]);
        assert_eq!(
            find("seconds time elapsed").unwrap().numeric_cells(),
            vec![(0, 1.001234567)]
        );
    }

    #[test]
    fn test_tokenize_perf_csv_mode() {
        let tables = tokenize("1000000,,instructions,1000000,100.00,,\n");
        assert_eq!(tables[0].rows[0].label, "instructions");
        assert_eq!(tables[0].rows[0].numeric_cells(), vec![(0, 1_000_000.0)]);
    }

    #[test]
    fn test_key_value_with_thousands_separators() {
        let tables = tokenize("Instructions:\t1,000,000\nCycles: 1,500 cycles\n");
        let rows = &tables[0].rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "instructions");
        assert_eq!(rows[0].layout, RowLayout::KeyValue);
        assert_eq!(rows[0].numeric_cells(), vec![(0, 1_000_000.0)]);
        assert_eq!(rows[1].numeric_cells(), vec![(0, 1_500.0)]);
    }

    #[test]
    fn test_comma_rows_with_colons_stay_comma_rows() {
        let tables = tokenize("CPU name:,Intel(R) Xeon(R)\nRegion: r1,1.0,2.0\n");
        let rows = &tables[0].rows;
        assert!(rows.iter().all(|r| r.layout == RowLayout::Comma));
        assert_eq!(rows[1].cells, vec!["1.0", "2.0"]);
    }

    #[test]
    fn test_grouped_number_detection() {
        assert!(is_grouped_number("1,000"));
        assert!(is_grouped_number("-12,345,678.9"));
        assert!(!is_grouped_number("1000"));
        assert!(!is_grouped_number("1.0,2.0"));
        assert!(!is_grouped_number("10,00"));
        assert!(!is_grouped_number("r1,1.0"));
    }

    #[test]
    fn test_tokenize_key_value() {
        let tables = tokenize("Cycles:\t\t\t123456\nMByte/s:\t\t45678.90\n");
        let row = &tables[0].rows[1];
        assert_eq!(row.label, "mbyte/s");
        assert_eq!(row.layout, RowLayout::KeyValue);
        assert_eq!(row.numeric_cells(), vec![(0, 45678.9)]);
    }
}
