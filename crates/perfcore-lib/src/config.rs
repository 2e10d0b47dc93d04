//! Analysis configuration
//!
//! Thresholds, classifier selection and roofline benchmark settings. Every
//! field has a default so partial configuration files deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fraction of memory-classified runs needed to confirm a cross-run verdict
pub const DEFAULT_AGGREGATE_THRESHOLD: f64 = 0.60;

/// Default benchmark timeout (2 minutes per kernel)
pub const DEFAULT_BENCHMARK_TIMEOUT_SECS: u64 = 120;

/// Default wait for the roofline cache lock
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Which classifier variant(s) a deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    Strict,
    Evidence,
    #[default]
    Both,
}

impl std::str::FromStr for ClassifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ClassifierMode::Strict),
            "evidence" => Ok(ClassifierMode::Evidence),
            "both" => Ok(ClassifierMode::Both),
            other => Err(format!("unknown classifier mode `{other}`")),
        }
    }
}

/// Thresholds for the legacy AND rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrictThresholds {
    pub mpki: f64,
    pub cpi: f64,
    pub miss_ratio: f64,
}

impl Default for StrictThresholds {
    fn default() -> Self {
        Self {
            mpki: 10.0,
            cpi: 1.0,
            miss_ratio: 0.25,
        }
    }
}

/// Thresholds for the evidence-weighted vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceThresholds {
    pub cpi: f64,
    pub llc_mpki: f64,
    pub miss_ratio: f64,
    pub backend_bound: f64,
    /// Minimum confidence for a memory-sensitive verdict
    pub min_confidence: f64,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self {
            cpi: 0.80,
            llc_mpki: 3.0,
            miss_ratio: 0.10,
            backend_bound: 0.30,
            min_confidence: 0.5,
        }
    }
}

/// Micro-benchmark kernel and working-set size for one roof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub kernel: String,
    pub working_set: String,
}

impl KernelSpec {
    pub fn new(kernel: impl Into<String>, working_set: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            working_set: working_set.into(),
        }
    }
}

/// Kernels used for each cache level plus the compute roof
///
/// Working sets are sized to sit inside each level; the memory run goes
/// far past the last-level cache and the compute run fits in L1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RooflineKernels {
    pub l1: KernelSpec,
    pub l2: KernelSpec,
    pub l3: KernelSpec,
    pub mem: KernelSpec,
    pub compute: KernelSpec,
}

impl Default for RooflineKernels {
    fn default() -> Self {
        Self {
            l1: KernelSpec::new("load_avx", "32kB"),
            l2: KernelSpec::new("load_avx", "256kB"),
            l3: KernelSpec::new("load_avx", "8MB"),
            mem: KernelSpec::new("load_avx", "2GB"),
            compute: KernelSpec::new("peakflops_avx", "16kB"),
        }
    }
}

/// Roofline measurement and cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RooflineConfig {
    pub cache_dir: PathBuf,
    pub benchmark_command: String,
    pub benchmark_timeout_secs: u64,
    pub lock_timeout_secs: u64,
    pub threads: usize,
    pub kernels: RooflineKernels,
}

impl RooflineConfig {
    pub fn benchmark_timeout(&self) -> Duration {
        Duration::from_secs(self.benchmark_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for RooflineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            benchmark_command: "likwid-bench".to_string(),
            benchmark_timeout_secs: DEFAULT_BENCHMARK_TIMEOUT_SECS,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            threads: 1,
            kernels: RooflineKernels::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs_next::cache_dir()
        .map(|dir| dir.join("perfcore").join("roofline"))
        .unwrap_or_else(|| PathBuf::from(".perfcore").join("roofline"))
}

/// Top-level configuration for one analysis invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub classifier: ClassifierMode,
    pub strict: StrictThresholds,
    pub evidence: EvidenceThresholds,
    pub aggregate_threshold: f64,
    pub roofline: RooflineConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierMode::default(),
            strict: StrictThresholds::default(),
            evidence: EvidenceThresholds::default(),
            aggregate_threshold: DEFAULT_AGGREGATE_THRESHOLD,
            roofline: RooflineConfig::default(),
        }
    }
}
