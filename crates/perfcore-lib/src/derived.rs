//! Derived bottleneck indicators
//!
//! Pure functions over a merged [`MetricMap`]. Every output is an
//! `Option`: a missing input or a zero denominator yields `None`, never
//! zero or infinity.

use crate::models::{MetricKey, MetricMap};
use serde::{Deserialize, Serialize};

/// Bandwidth counters report MBytes/s with binary megabytes
pub const BYTES_PER_MBYTE: f64 = 1_048_576.0;

/// Counter group the bandwidth figure was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthSource {
    MemoryGroup,
    CacheGroup,
}

impl BandwidthSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BandwidthSource::MemoryGroup => "memory group",
            BandwidthSource::CacheGroup => "cache-events group",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub instructions: Option<f64>,
    pub cycles: Option<f64>,
    pub runtime_seconds: Option<f64>,
    pub memory_bandwidth_mbps: Option<f64>,
    pub bandwidth_source: Option<BandwidthSource>,
    pub cpi: Option<f64>,
    pub ipc: Option<f64>,
    /// Legacy misses per kilo-instruction over all cache misses
    pub mpki: Option<f64>,
    pub llc_mpki: Option<f64>,
    pub miss_ratio: Option<f64>,
    pub instr_per_sec: Option<f64>,
    pub bytes_per_sec: Option<f64>,
    /// Roofline intensity axis
    pub instr_per_byte: Option<f64>,
    /// Topdown backend-bound share in [0, 1]
    pub backend_bound: Option<f64>,
}

impl DerivedMetrics {
    /// Names of indicators that could not be computed
    pub fn unavailable(&self) -> Vec<&'static str> {
        [
            ("cpi", self.cpi),
            ("ipc", self.ipc),
            ("mpki", self.mpki),
            ("llc_mpki", self.llc_mpki),
            ("miss_ratio", self.miss_ratio),
            ("instr_per_sec", self.instr_per_sec),
            ("bytes_per_sec", self.bytes_per_sec),
            ("instr_per_byte", self.instr_per_byte),
            ("backend_bound", self.backend_bound),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Guarded division: `None` when either side is missing, the denominator
/// is zero, or the result is not finite
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    let value = n / d;
    value.is_finite().then_some(value)
}

fn per_kilo(misses: Option<f64>, instructions: Option<f64>) -> Option<f64> {
    ratio(misses, instructions).map(|r| r * 1000.0)
}

/// Compute the derived metric set.
///
/// `runtime_hint` is the externally supplied window length; when absent or
/// not positive the report's own runtime is used.
pub fn derive(metrics: &MetricMap, runtime_hint: Option<f64>) -> DerivedMetrics {
    let instructions = metrics.get(MetricKey::Instructions);
    let cycles = metrics.get(MetricKey::Cycles);

    let runtime_seconds = runtime_hint
        .filter(|t| *t > 0.0 && t.is_finite())
        .or_else(|| metrics.get(MetricKey::Runtime).filter(|t| *t > 0.0));

    let (memory_bandwidth_mbps, bandwidth_source) =
        match (metrics.get(MetricKey::MemoryBandwidth), metrics.get(MetricKey::CacheGroupBandwidth)) {
            (Some(bw), _) => (Some(bw), Some(BandwidthSource::MemoryGroup)),
            (None, Some(bw)) => (Some(bw), Some(BandwidthSource::CacheGroup)),
            (None, None) => (None, None),
        };

    // Prefer computing from counts; fall back to the reported ratio
    let cpi = ratio(cycles, instructions).or_else(|| metrics.get(MetricKey::Cpi));
    let ipc = ratio(instructions, cycles)
        .or_else(|| metrics.get(MetricKey::Ipc))
        .or_else(|| ratio(Some(1.0), cpi));

    let instr_per_sec = ratio(instructions, runtime_seconds);
    let bytes_per_sec = memory_bandwidth_mbps
        .map(|bw| bw * BYTES_PER_MBYTE)
        .filter(|b| b.is_finite());

    DerivedMetrics {
        instructions,
        cycles,
        runtime_seconds,
        memory_bandwidth_mbps,
        bandwidth_source,
        cpi,
        ipc,
        mpki: per_kilo(metrics.get(MetricKey::CacheMisses), instructions),
        llc_mpki: per_kilo(metrics.get(MetricKey::LlcLoadMisses), instructions),
        miss_ratio: ratio(
            metrics.get(MetricKey::CacheMisses),
            metrics.get(MetricKey::CacheReferences),
        ),
        instr_per_sec,
        bytes_per_sec,
        instr_per_byte: ratio(instr_per_sec, bytes_per_sec),
        backend_bound: metrics.get(MetricKey::BackendBound),
    }
}
