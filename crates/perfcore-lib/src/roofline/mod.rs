//! Per-node roofline bounds
//!
//! Peak bandwidth for each cache level and peak compute throughput,
//! measured with micro-benchmarks and cached on disk by node signature so
//! repeated runs on the same host skip re-measurement.

mod bench;
mod model;
mod signature;
mod store;

pub use bench::{parse_bandwidth, parse_mflops, BenchmarkRunner, LikwidBenchRunner};
pub use model::{BoundRegion, LevelAnalysis, RooflineAnalysis};
pub use signature::{HostIdentity, NodeSignature};
pub use store::{RooflineOutcome, RooflineStore};

use crate::config::{KernelSpec, RooflineKernels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory hierarchy level with a bandwidth roof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheLevel {
    L1,
    L2,
    L3,
    #[serde(rename = "MEM")]
    Mem,
}

impl CacheLevel {
    pub const ALL: [CacheLevel; 4] = [CacheLevel::L1, CacheLevel::L2, CacheLevel::L3, CacheLevel::Mem];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::L1 => "L1",
            CacheLevel::L2 => "L2",
            CacheLevel::L3 => "L3",
            CacheLevel::Mem => "MEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        CacheLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One benchmark the store runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoofTarget {
    Level(CacheLevel),
    Compute,
}

impl RoofTarget {
    pub const ALL: [RoofTarget; 5] = [
        RoofTarget::Level(CacheLevel::L1),
        RoofTarget::Level(CacheLevel::L2),
        RoofTarget::Level(CacheLevel::L3),
        RoofTarget::Level(CacheLevel::Mem),
        RoofTarget::Compute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoofTarget::Level(level) => level.as_str(),
            RoofTarget::Compute => "compute",
        }
    }

    pub fn kernel<'k>(&self, kernels: &'k RooflineKernels) -> &'k KernelSpec {
        match self {
            RoofTarget::Level(CacheLevel::L1) => &kernels.l1,
            RoofTarget::Level(CacheLevel::L2) => &kernels.l2,
            RoofTarget::Level(CacheLevel::L3) => &kernels.l3,
            RoofTarget::Level(CacheLevel::Mem) => &kernels.mem,
            RoofTarget::Compute => &kernels.compute,
        }
    }
}

impl fmt::Display for RoofTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bandwidth roof of one level; `None` when the benchmark failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRoof {
    pub level: CacheLevel,
    pub bandwidth_mbps: Option<f64>,
    pub kernel: String,
    pub working_set: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRoof {
    pub mflops: Option<f64>,
    pub kernel: String,
    pub working_set: String,
}

/// Canonical roof measurements for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RooflineRecord {
    /// `None` for an ephemeral measurement that was never cached
    pub node_signature: Option<String>,
    pub levels: Vec<LevelRoof>,
    pub compute: ComputeRoof,
    pub measured_at: DateTime<Utc>,
}

impl RooflineRecord {
    /// Record with every roof absent, carrying the configured kernels
    pub fn empty(node_signature: Option<String>, kernels: &RooflineKernels) -> Self {
        let levels = CacheLevel::ALL
            .into_iter()
            .map(|level| {
                let spec = RoofTarget::Level(level).kernel(kernels);
                LevelRoof {
                    level,
                    bandwidth_mbps: None,
                    kernel: spec.kernel.clone(),
                    working_set: spec.working_set.clone(),
                }
            })
            .collect();

        Self {
            node_signature,
            levels,
            compute: ComputeRoof {
                mflops: None,
                kernel: kernels.compute.kernel.clone(),
                working_set: kernels.compute.working_set.clone(),
            },
            measured_at: Utc::now(),
        }
    }

    pub fn level(&self, level: CacheLevel) -> Option<&LevelRoof> {
        self.levels.iter().find(|l| l.level == level)
    }

    pub fn bandwidth(&self, level: CacheLevel) -> Option<f64> {
        self.level(level).and_then(|l| l.bandwidth_mbps)
    }

    fn level_mut(&mut self, level: CacheLevel) -> Option<&mut LevelRoof> {
        self.levels.iter_mut().find(|l| l.level == level)
    }

    /// Store a benchmark result for one target
    pub fn set(&mut self, target: RoofTarget, value: Option<f64>) {
        match target {
            RoofTarget::Level(level) => {
                if let Some(roof) = self.level_mut(level) {
                    roof.bandwidth_mbps = value;
                }
            }
            RoofTarget::Compute => self.compute.mflops = value,
        }
    }

    pub fn value(&self, target: RoofTarget) -> Option<f64> {
        match target {
            RoofTarget::Level(level) => self.bandwidth(level),
            RoofTarget::Compute => self.compute.mflops,
        }
    }

    /// Every level plus compute has a value
    pub fn is_complete(&self) -> bool {
        RoofTarget::ALL.iter().all(|t| self.value(*t).is_some())
    }

    pub fn missing(&self) -> Vec<RoofTarget> {
        RoofTarget::ALL
            .into_iter()
            .filter(|t| self.value(*t).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_incomplete() {
        let kernels = RooflineKernels::default();
        let mut record = RooflineRecord::empty(Some("node".to_string()), &kernels);
        assert!(!record.is_complete());
        assert_eq!(record.missing().len(), 5);
        assert_eq!(record.level(CacheLevel::L3).unwrap().working_set, "8MB");

        for target in RoofTarget::ALL {
            record.set(target, Some(1000.0));
        }
        assert!(record.is_complete());

        record.set(RoofTarget::Compute, None);
        assert_eq!(record.missing(), vec![RoofTarget::Compute]);
    }

    #[test]
    fn test_cache_level_parse() {
        assert_eq!(CacheLevel::parse("mem"), Some(CacheLevel::Mem));
        assert_eq!(CacheLevel::parse("L2"), Some(CacheLevel::L2));
        assert_eq!(CacheLevel::parse("L4"), None);
    }
}
