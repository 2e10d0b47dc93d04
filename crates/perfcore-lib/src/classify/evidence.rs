//! Evidence-weighted rule
//!
//! Four independent signals vote; confidence is the fraction that pass.
//! The backend-bound signal comes from a topdown decomposition when one of
//! the reports carries it.

use super::{evaluate_signal, Classification, Classifier, ClassifierRule, Verdict};
use crate::config::EvidenceThresholds;
use crate::derived::DerivedMetrics;

pub struct EvidenceClassifier {
    pub thresholds: EvidenceThresholds,
}

impl EvidenceClassifier {
    pub fn new(thresholds: EvidenceThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for EvidenceClassifier {
    fn default() -> Self {
        Self::new(EvidenceThresholds::default())
    }
}

impl Classifier for EvidenceClassifier {
    fn rule(&self) -> ClassifierRule {
        ClassifierRule::Evidence
    }

    fn classify(&self, derived: &DerivedMetrics) -> Classification {
        let t = &self.thresholds;
        let signals = vec![
            evaluate_signal("cpi", t.cpi, derived.cpi),
            evaluate_signal("llc_mpki", t.llc_mpki, derived.llc_mpki),
            evaluate_signal("miss_ratio", t.miss_ratio, derived.miss_ratio),
            evaluate_signal("backend_bound", t.backend_bound, derived.backend_bound),
        ];

        let passed = signals.iter().filter(|s| s.passed).count();
        let confidence = passed as f64 / signals.len() as f64;

        let verdict = if confidence >= t.min_confidence {
            Verdict::MemorySensitive
        } else {
            Verdict::InconclusiveLeanCompute
        };

        Classification {
            rule: ClassifierRule::Evidence,
            verdict,
            signals,
            confidence: Some(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived(cpi: Option<f64>, llc_mpki: Option<f64>, miss_ratio: Option<f64>, backend: Option<f64>) -> DerivedMetrics {
        DerivedMetrics {
            cpi,
            llc_mpki,
            miss_ratio,
            backend_bound: backend,
            ..Default::default()
        }
    }

    #[test]
    fn test_confidence_is_fraction_passed() {
        let classifier = EvidenceClassifier::default();

        let all = classifier.classify(&derived(Some(1.5), Some(5.0), Some(0.3), Some(0.4)));
        assert_eq!(all.confidence, Some(1.0));
        assert_eq!(all.verdict, Verdict::MemorySensitive);

        let one = classifier.classify(&derived(Some(1.5), Some(1.0), Some(0.01), Some(0.1)));
        assert_eq!(one.confidence, Some(0.25));
        assert_eq!(one.verdict, Verdict::InconclusiveLeanCompute);
    }

    #[test]
    fn test_half_confidence_is_memory_sensitive() {
        let result = EvidenceClassifier::default()
            .classify(&derived(Some(0.8), Some(3.0), Some(0.05), Some(0.1)));
        assert_eq!(result.confidence, Some(0.5));
        assert_eq!(result.verdict, Verdict::MemorySensitive);
    }

    #[test]
    fn test_unavailable_signals_count_as_not_passing() {
        let result = EvidenceClassifier::default().classify(&derived(Some(2.0), None, None, None));
        assert_eq!(result.confidence, Some(0.25));
        assert_eq!(result.verdict, Verdict::InconclusiveLeanCompute);
        assert_eq!(
            result.unavailable_signals(),
            vec!["llc_mpki", "miss_ratio", "backend_bound"]
        );
    }

    #[test]
    fn test_deterministic_trace() {
        let input = derived(Some(0.9), Some(2.0), Some(0.2), None);
        let classifier = EvidenceClassifier::default();
        assert_eq!(classifier.classify(&input), classifier.classify(&input));
    }
}
