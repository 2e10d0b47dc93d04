//! Strict AND rule
//!
//! Memory-bound only when MPKI, CPI and miss ratio all meet their
//! thresholds. Any failing or unavailable signal flips the verdict to
//! compute-bound. No confidence score.

use super::{evaluate_signal, Classification, Classifier, ClassifierRule, Verdict};
use crate::config::StrictThresholds;
use crate::derived::DerivedMetrics;

pub struct StrictClassifier {
    pub thresholds: StrictThresholds,
}

impl StrictClassifier {
    pub fn new(thresholds: StrictThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for StrictClassifier {
    fn default() -> Self {
        Self::new(StrictThresholds::default())
    }
}

impl Classifier for StrictClassifier {
    fn rule(&self) -> ClassifierRule {
        ClassifierRule::Strict
    }

    fn classify(&self, derived: &DerivedMetrics) -> Classification {
        let signals = vec![
            evaluate_signal("mpki", self.thresholds.mpki, derived.mpki),
            evaluate_signal("cpi", self.thresholds.cpi, derived.cpi),
            evaluate_signal("miss_ratio", self.thresholds.miss_ratio, derived.miss_ratio),
        ];

        let verdict = if signals.iter().all(|s| s.passed) {
            Verdict::MemoryBound
        } else {
            Verdict::ComputeBound
        };

        Classification {
            rule: ClassifierRule::Strict,
            verdict,
            signals,
            confidence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::derive;
    use crate::models::{MetricKey, MetricMap};

    fn metrics(cache_misses: f64) -> DerivedMetrics {
        let map = MetricMap::new()
            .with(MetricKey::Instructions, 1_000_000.0)
            .with(MetricKey::Cycles, 1_500_000.0)
            .with(MetricKey::CacheMisses, cache_misses)
            .with(MetricKey::CacheReferences, 50_000.0)
            .with(MetricKey::MemoryBandwidth, 2048.0);
        derive(&map, Some(1.0))
    }

    #[test]
    fn test_all_signals_pass_is_memory_bound() {
        let result = StrictClassifier::default().classify(&metrics(15_000.0));
        assert_eq!(result.verdict, Verdict::MemoryBound);
        assert_eq!(result.passed(), 3);
        assert_eq!(result.confidence, None);
    }

    #[test]
    fn test_single_failing_signal_flips_verdict() {
        let result = StrictClassifier::default().classify(&metrics(2_000.0));
        assert_eq!(result.verdict, Verdict::ComputeBound);

        let mpki = &result.signals[0];
        assert_eq!(mpki.name, "mpki");
        assert!(!mpki.passed);
        assert!((mpki.observed.unwrap() - 2.0).abs() < 1e-9);
        // CPI still passes on its own
        assert!(result.signals[1].passed);
    }

    #[test]
    fn test_exact_thresholds_pass() {
        let derived = DerivedMetrics {
            mpki: Some(10.0),
            cpi: Some(1.0),
            miss_ratio: Some(0.25),
            ..Default::default()
        };
        let result = StrictClassifier::default().classify(&derived);
        assert_eq!(result.verdict, Verdict::MemoryBound);
    }

    #[test]
    fn test_unavailable_signal_never_passes() {
        let derived = DerivedMetrics {
            mpki: Some(50.0),
            cpi: Some(3.0),
            miss_ratio: None,
            ..Default::default()
        };
        let result = StrictClassifier::default().classify(&derived);
        assert_eq!(result.verdict, Verdict::ComputeBound);
        assert_eq!(result.unavailable_signals(), vec!["miss_ratio"]);
    }

    #[test]
    fn test_injected_thresholds() {
        let classifier = StrictClassifier::new(StrictThresholds {
            mpki: 1.0,
            cpi: 1.0,
            miss_ratio: 0.01,
        });
        assert_eq!(classifier.classify(&metrics(2_000.0)).verdict, Verdict::MemoryBound);
    }
}
