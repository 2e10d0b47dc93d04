//! Core data models for the analysis engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Counter metrics the engine knows how to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    Instructions,
    Cycles,
    Cpi,
    Ipc,
    CacheMisses,
    CacheReferences,
    LlcLoadMisses,
    /// Bandwidth from the dedicated memory counter group
    MemoryBandwidth,
    /// Bandwidth reported by the combined cache-events group
    CacheGroupBandwidth,
    /// Topdown backend-bound share, stored as a fraction in [0, 1]
    BackendBound,
    Runtime,
    ClockMhz,
}

impl MetricKey {
    pub const ALL: [MetricKey; 12] = [
        MetricKey::Instructions,
        MetricKey::Cycles,
        MetricKey::Cpi,
        MetricKey::Ipc,
        MetricKey::CacheMisses,
        MetricKey::CacheReferences,
        MetricKey::LlcLoadMisses,
        MetricKey::MemoryBandwidth,
        MetricKey::CacheGroupBandwidth,
        MetricKey::BackendBound,
        MetricKey::Runtime,
        MetricKey::ClockMhz,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::Instructions => "instructions",
            MetricKey::Cycles => "cycles",
            MetricKey::Cpi => "cpi",
            MetricKey::Ipc => "ipc",
            MetricKey::CacheMisses => "cache_misses",
            MetricKey::CacheReferences => "cache_references",
            MetricKey::LlcLoadMisses => "llc_load_misses",
            MetricKey::MemoryBandwidth => "memory_bandwidth",
            MetricKey::CacheGroupBandwidth => "cache_group_bandwidth",
            MetricKey::BackendBound => "backend_bound",
            MetricKey::Runtime => "runtime",
            MetricKey::ClockMhz => "clock",
        }
    }

    pub fn unit(&self) -> MetricUnit {
        match self {
            MetricKey::Instructions
            | MetricKey::Cycles
            | MetricKey::CacheMisses
            | MetricKey::CacheReferences
            | MetricKey::LlcLoadMisses => MetricUnit::Count,
            MetricKey::Cpi | MetricKey::Ipc | MetricKey::BackendBound => MetricUnit::Ratio,
            MetricKey::MemoryBandwidth | MetricKey::CacheGroupBandwidth => MetricUnit::MBytesPerSec,
            MetricKey::Runtime => MetricUnit::Seconds,
            MetricKey::ClockMhz => MetricUnit::Megahertz,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implicit unit attached to a metric or summary row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Count,
    Seconds,
    MBytesPerSec,
    MFlopsPerSec,
    BytesPerSec,
    InstrPerSec,
    InstrPerByte,
    Megahertz,
    Ratio,
    Flag,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Count => "count",
            MetricUnit::Seconds => "s",
            MetricUnit::MBytesPerSec => "MBytes/s",
            MetricUnit::MFlopsPerSec => "MFLOP/s",
            MetricUnit::BytesPerSec => "bytes/s",
            MetricUnit::InstrPerSec => "instr/s",
            MetricUnit::InstrPerByte => "instr/byte",
            MetricUnit::Megahertz => "MHz",
            MetricUnit::Ratio => "ratio",
            MetricUnit::Flag => "bool",
        }
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter group a report was sampled under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterGroup {
    Memory,
    CyclesInstructions,
    CacheEvents,
    Topdown,
    Other(String),
}

impl CounterGroup {
    pub fn as_str(&self) -> &str {
        match self {
            CounterGroup::Memory => "memory",
            CounterGroup::CyclesInstructions => "cycles_instructions",
            CounterGroup::CacheEvents => "cache_events",
            CounterGroup::Topdown => "topdown",
            CounterGroup::Other(name) => name,
        }
    }
}

impl FromStr for CounterGroup {
    type Err = std::convert::Infallible;

    /// Accepts the usual counter-group spellings (`MEM`, `CLOCK`, `CACHES`, `TMA`, ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let group = match s.trim().to_ascii_lowercase().as_str() {
            "mem" | "memory" | "membw" | "mem_dp" | "mem_sp" => CounterGroup::Memory,
            "clock" | "cpi" | "cycles" | "instructions" | "cycles_instructions" | "perf" => {
                CounterGroup::CyclesInstructions
            }
            "cache" | "caches" | "cache_events" | "l3" | "l3cache" => CounterGroup::CacheEvents,
            "topdown" | "tma" => CounterGroup::Topdown,
            other => CounterGroup::Other(other.to_string()),
        };
        Ok(group)
    }
}

impl fmt::Display for CounterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat mapping of extracted metric values
///
/// Known metrics are keyed by [`MetricKey`]; anything else the parser
/// found lands in the `additional` bucket under its normalized label.
/// Only finite values are ever stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMap {
    known: BTreeMap<MetricKey, f64>,
    additional: BTreeMap<String, f64>,
}

impl MetricMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MetricKey) -> Option<f64> {
        self.known.get(&key).copied()
    }

    pub fn contains(&self, key: MetricKey) -> bool {
        self.known.contains_key(&key)
    }

    /// Insert a known metric; non-finite values are dropped
    pub fn insert(&mut self, key: MetricKey, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.known.insert(key, value);
        true
    }

    pub fn with(mut self, key: MetricKey, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert_additional(&mut self, label: impl Into<String>, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.additional.insert(label.into(), value);
        true
    }

    pub fn additional(&self, label: &str) -> Option<f64> {
        self.additional.get(label).copied()
    }

    pub fn known(&self) -> impl Iterator<Item = (MetricKey, f64)> + '_ {
        self.known.iter().map(|(k, v)| (*k, *v))
    }

    pub fn additional_entries(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.additional.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Known keys that have no value
    pub fn missing(&self) -> Vec<MetricKey> {
        MetricKey::ALL
            .iter()
            .copied()
            .filter(|k| !self.known.contains_key(k))
            .collect()
    }

    /// Merge another map covering the same measurement window.
    ///
    /// Existing values win; the other map only fills gaps.
    pub fn merge(&mut self, other: &MetricMap) {
        for (key, value) in &other.known {
            self.known.entry(*key).or_insert(*value);
        }
        for (label, value) in &other.additional {
            self.additional.entry(label.clone()).or_insert(*value);
        }
    }

    pub fn len(&self) -> usize {
        self.known.len() + self.additional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.additional.is_empty()
    }
}
