//! Cell and label normalization

/// Collapse internal whitespace, trim and lowercase a label
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a report cell into a finite number.
///
/// Tolerates thousands separators (`1,234,567`), surrounding whitespace and
/// trailing units (`2048.5 MBytes/s`, `35.2%`). Returns `None` for anything
/// that does not reduce to a finite value, including `<not counted>`.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | '\''))
        .collect();
    let token = cleaned.split_whitespace().next()?;

    // Longest prefix that parses, so "2048MBytes/s" and "35.2%" both work
    let mut boundaries: Vec<usize> = token.char_indices().map(|(i, _)| i).skip(1).collect();
    boundaries.push(token.len());

    for end in boundaries.into_iter().rev() {
        if let Ok(value) = token[..end].parse::<f64>() {
            return value.is_finite().then_some(value);
        }
    }

    None
}

/// Whether a cell or label marks its value as a percentage
pub fn is_percent(text: &str) -> bool {
    text.contains('%')
}

/// Normalized label pattern.
///
/// A label matches when, after normalization, it starts with the pattern
/// and whatever follows is only a unit, qualifier or aggregate suffix:
/// `memory bandwidth` matches `Memory  bandwidth [MBytes/s] STAT` but
/// `runtime` does not match `Runtime unhalted [s]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPattern {
    normalized: String,
}

impl LabelPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            normalized: normalize_label(pattern),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Match against an already-normalized label
    pub fn matches(&self, normalized_label: &str) -> bool {
        let Some(rest) = normalized_label.strip_prefix(self.normalized.as_str()) else {
            return false;
        };
        let rest = rest.trim_start();
        rest.is_empty()
            || rest.starts_with('[')
            || rest.starts_with('(')
            || rest.starts_with(':')
            || rest.starts_with('#')
            || rest == "stat"
            || rest.starts_with("stat ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_plain() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("  1.5  "), Some(1.5));
        assert_eq!(parse_number("-0.25"), Some(-0.25));
        assert_eq!(parse_number("1.2e3"), Some(1200.0));
    }

    #[test]
    fn test_parse_number_separators_and_units() {
        assert_eq!(parse_number("1,000,000"), Some(1_000_000.0));
        assert_eq!(parse_number("2048.0000 MBytes/s"), Some(2048.0));
        assert_eq!(parse_number("2048MBytes/s"), Some(2048.0));
        assert_eq!(parse_number("35.2%"), Some(35.2));
        assert_eq!(parse_number("1_500"), Some(1500.0));
    }

    #[test]
    fn test_parse_number_rejects_garbage() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("   "), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("<not counted>"), None);
        assert_eq!(parse_number("<not supported>"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("FIXC0"), None);
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(
            normalize_label("  Memory   bandwidth [MBytes/s]  STAT "),
            "memory bandwidth [mbytes/s] stat"
        );
    }

    #[test]
    fn test_label_pattern_matching() {
        let bw = LabelPattern::new("Memory bandwidth");
        assert!(bw.matches("memory bandwidth [mbytes/s]"));
        assert!(bw.matches("memory bandwidth [mbytes/s] stat"));
        assert!(bw.matches("memory bandwidth"));
        assert!(!bw.matches("memory bandwidth read"));
        assert!(!bw.matches("memory read bandwidth [mbytes/s]"));

        let runtime = LabelPattern::new("runtime");
        assert!(runtime.matches("runtime [s]"));
        assert!(!runtime.matches("runtime unhalted [s]"));

        let cycles = LabelPattern::new("cycles");
        assert!(cycles.matches("cycles:u"));
        assert!(!cycles.matches("ref-cycles"));
    }
}
