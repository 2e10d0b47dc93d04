//! Instruction roofline model
//!
//! Places an application point (instructions per byte, instructions per
//! second) under the measured roofs. Bandwidth roofs are converted to
//! bytes/s; the compute ceiling is estimated in instructions/s from the
//! peak MFLOP/s figure.

use super::{CacheLevel, RooflineRecord};
use crate::derived::BYTES_PER_MBYTE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the application point sits relative to the knees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundRegion {
    /// Left of every knee
    MemoryBound,
    /// Between the smallest and largest knee
    Mixed,
    /// At or right of every knee
    ComputeBound,
}

impl BoundRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundRegion::MemoryBound => "memory_bound",
            BoundRegion::Mixed => "mixed",
            BoundRegion::ComputeBound => "compute_bound",
        }
    }
}

impl fmt::Display for BoundRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAnalysis {
    pub level: CacheLevel,
    pub bandwidth_bytes_per_sec: f64,
    /// Intensity where this bandwidth roof meets the compute roof
    pub knee: Option<f64>,
    /// `min(intensity × bandwidth, compute)` at the application's intensity
    pub attainable_instr_per_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RooflineAnalysis {
    pub levels: Vec<LevelAnalysis>,
    pub compute_instr_per_sec: Option<f64>,
    pub app_instr_per_byte: Option<f64>,
    pub app_instr_per_sec: Option<f64>,
    pub region: Option<BoundRegion>,
    /// Achieved fraction of what the memory roof allows at this intensity
    pub memory_utilization: Option<f64>,
}

impl RooflineAnalysis {
    pub fn new(
        record: &RooflineRecord,
        app_instr_per_byte: Option<f64>,
        app_instr_per_sec: Option<f64>,
    ) -> Self {
        let compute_instr_per_sec = record
            .compute
            .mflops
            .filter(|m| *m > 0.0)
            .map(|m| m * 1e6);
        let intensity = app_instr_per_byte.filter(|x| *x > 0.0 && x.is_finite());

        let levels: Vec<LevelAnalysis> = CacheLevel::ALL
            .into_iter()
            .filter_map(|level| {
                let bandwidth = record.bandwidth(level).filter(|b| *b > 0.0)? * BYTES_PER_MBYTE;
                let attainable = intensity.map(|x| {
                    let memory = x * bandwidth;
                    compute_instr_per_sec.map_or(memory, |c| memory.min(c))
                });
                Some(LevelAnalysis {
                    level,
                    bandwidth_bytes_per_sec: bandwidth,
                    knee: compute_instr_per_sec.map(|c| c / bandwidth),
                    attainable_instr_per_sec: attainable,
                })
            })
            .collect();

        let region = intensity.and_then(|x| classify_region(x, &levels));

        let memory_utilization = levels
            .iter()
            .find(|l| l.level == CacheLevel::Mem)
            .and_then(|l| l.attainable_instr_per_sec)
            .zip(app_instr_per_sec)
            .and_then(|(attainable, achieved)| {
                (attainable > 0.0).then(|| achieved / attainable)
            });

        Self {
            levels,
            compute_instr_per_sec,
            app_instr_per_byte: intensity,
            app_instr_per_sec,
            region,
            memory_utilization,
        }
    }

    pub fn level(&self, level: CacheLevel) -> Option<&LevelAnalysis> {
        self.levels.iter().find(|l| l.level == level)
    }

    pub fn knees(&self) -> Vec<f64> {
        self.levels.iter().filter_map(|l| l.knee).collect()
    }
}

fn classify_region(intensity: f64, levels: &[LevelAnalysis]) -> Option<BoundRegion> {
    let knees: Vec<f64> = levels.iter().filter_map(|l| l.knee).collect();
    let smallest = knees.iter().copied().reduce(f64::min)?;
    let largest = knees.iter().copied().reduce(f64::max)?;

    Some(if intensity < smallest {
        BoundRegion::MemoryBound
    } else if intensity >= largest {
        BoundRegion::ComputeBound
    } else {
        BoundRegion::Mixed
    })
}
