//! File-backed roofline cache
//!
//! Layout under the cache directory:
//!
//! ```text
//! <signature>.csv          canonical record, one `key,value` row per field
//! <signature>.lock         advisory lock held for check-measure-persist
//! <signature>/<target>.txt raw benchmark output per level and compute
//! ```
//!
//! A lookup is a hit only when the record parses, was measured with the
//! configured kernels, has every roof present, and every artifact exists.

use super::bench::parse_target;
use super::{BenchmarkRunner, CacheLevel, NodeSignature, RoofTarget, RooflineRecord};
use crate::config::{RooflineConfig, RooflineKernels};
use crate::error::{EngineError, Result};
use crate::lock::{acquire_exclusive, write_atomic};
use crate::observability::{EngineMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

/// Result of a roofline lookup
#[derive(Debug, Clone)]
pub struct RooflineOutcome {
    pub record: RooflineRecord,
    pub cache_hit: bool,
    /// Targets benchmarked during this lookup
    pub measured: Vec<RoofTarget>,
    /// Targets whose benchmark produced no usable figure
    pub failed: Vec<RoofTarget>,
}

pub struct RooflineStore {
    cache_dir: PathBuf,
    lock_timeout: Duration,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl RooflineStore {
    pub fn new(cache_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            lock_timeout,
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn from_config(config: &RooflineConfig) -> Self {
        Self::new(config.cache_dir.clone(), config.lock_timeout())
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn record_path(&self, signature: &NodeSignature) -> PathBuf {
        self.cache_dir.join(format!("{signature}.csv"))
    }

    fn lock_path(&self, signature: &NodeSignature) -> PathBuf {
        self.cache_dir.join(format!("{signature}.lock"))
    }

    pub fn artifact_path(&self, signature: &NodeSignature, target: RoofTarget) -> PathBuf {
        self.cache_dir
            .join(signature.as_str())
            .join(format!("{}.txt", target.as_str()))
    }

    /// Read the cached record for a node, if any
    pub async fn load(&self, signature: &NodeSignature) -> Result<Option<RooflineRecord>> {
        let path = self.record_path(signature);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        decode_record(&path, &content).map(Some)
    }

    /// Targets of `record` that would need measuring before a hit
    async fn stale_targets(
        &self,
        signature: &NodeSignature,
        record: &RooflineRecord,
        kernels: &RooflineKernels,
    ) -> Vec<RoofTarget> {
        let mut stale = Vec::new();
        for target in RoofTarget::ALL {
            let spec = target.kernel(kernels);
            let recorded = recorded_kernel(record, target);
            let artifact = fs::try_exists(self.artifact_path(signature, target))
                .await
                .unwrap_or(false);

            if record.value(target).is_none()
                || !artifact
                || recorded != Some((spec.kernel.as_str(), spec.working_set.as_str()))
            {
                stale.push(target);
            }
        }
        stale
    }

    /// Whether a complete cached record exists for this node and kernel set
    pub async fn is_complete(&self, signature: &NodeSignature, kernels: &RooflineKernels) -> Result<bool> {
        match self.load(signature).await? {
            Some(record) => Ok(self.stale_targets(signature, &record, kernels).await.is_empty()),
            None => Ok(false),
        }
    }

    /// Return the cached record for `signature` or measure the roofs.
    ///
    /// With a signature the whole check-measure-persist sequence runs under
    /// an exclusive per-node lock, and only missing or outdated targets are
    /// re-measured. Without a signature every roof is measured and nothing
    /// is cached.
    pub async fn get_or_measure(
        &self,
        signature: Option<&NodeSignature>,
        kernels: &RooflineKernels,
        runner: &dyn BenchmarkRunner,
        force: bool,
    ) -> Result<RooflineOutcome> {
        let Some(signature) = signature else {
            debug!("No node signature, measuring ephemeral roofline");
            self.metrics.inc_cache_miss();
            let mut record = RooflineRecord::empty(None, kernels);
            let (measured, failed) = self
                .measure(None, &mut record, &RoofTarget::ALL, kernels, runner)
                .await?;
            self.logger
                .log_roofline_measured(None, measured.len(), failed.len(), false);
            return Ok(RooflineOutcome {
                record,
                cache_hit: false,
                measured,
                failed,
            });
        };

        let _lock = acquire_exclusive(&self.lock_path(signature), self.lock_timeout).await?;

        let cached = if force {
            None
        } else {
            match self.load(signature).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Ignoring unreadable roofline record");
                    None
                }
            }
        };

        let (mut record, targets) = match cached {
            Some(record) => {
                let stale = self.stale_targets(signature, &record, kernels).await;
                if stale.is_empty() {
                    self.metrics.inc_cache_hit();
                    self.logger.log_roofline_cache_hit(signature.as_str());
                    return Ok(RooflineOutcome {
                        record,
                        cache_hit: true,
                        measured: Vec::new(),
                        failed: Vec::new(),
                    });
                }
                debug!(signature = %signature, stale = ?stale, "Roofline record incomplete");
                (refresh_kernels(record, kernels, &stale), stale)
            }
            None => (
                RooflineRecord::empty(Some(signature.to_string()), kernels),
                RoofTarget::ALL.to_vec(),
            ),
        };

        self.metrics.inc_cache_miss();
        let (measured, failed) = self
            .measure(Some(signature), &mut record, &targets, kernels, runner)
            .await?;

        record.node_signature = Some(signature.to_string());
        record.measured_at = Utc::now();
        self.persist(signature, &record).await?;
        self.logger.log_roofline_measured(
            Some(signature.as_str()),
            measured.len(),
            failed.len(),
            true,
        );

        Ok(RooflineOutcome {
            record,
            cache_hit: false,
            measured,
            failed,
        })
    }

    /// Benchmark `targets` one at a time; they would interfere if run together
    async fn measure(
        &self,
        signature: Option<&NodeSignature>,
        record: &mut RooflineRecord,
        targets: &[RoofTarget],
        kernels: &RooflineKernels,
        runner: &dyn BenchmarkRunner,
    ) -> Result<(Vec<RoofTarget>, Vec<RoofTarget>)> {
        let mut measured = Vec::new();
        let mut failed = Vec::new();

        for &target in targets {
            let spec = target.kernel(kernels);
            let started = Instant::now();
            let result = runner.run(target, spec).await;
            self.metrics
                .observe_benchmark_duration(started.elapsed().as_secs_f64());
            measured.push(target);

            let value = match result {
                Ok(output) => {
                    let value = parse_target(target, &output);
                    if let (Some(signature), Some(_)) = (signature, value) {
                        write_atomic(&self.artifact_path(signature, target), output.as_bytes()).await?;
                    }
                    if value.is_none() {
                        self.logger.log_benchmark_failed(
                            target.as_str(),
                            &spec.kernel,
                            "no parseable figure in output",
                        );
                    }
                    value
                }
                Err(e) => {
                    self.logger
                        .log_benchmark_failed(target.as_str(), &spec.kernel, &e.to_string());
                    None
                }
            };

            if value.is_none() {
                self.metrics.inc_benchmark_failure();
                failed.push(target);
                // Drop a stale artifact so the level cannot look complete
                if let Some(signature) = signature {
                    let _ = fs::remove_file(self.artifact_path(signature, target)).await;
                }
            } else {
                info!(target = %target, value = ?value, kernel = %spec.kernel, "Measured roof");
            }
            record.set(target, value);
        }

        Ok((measured, failed))
    }

    async fn persist(&self, signature: &NodeSignature, record: &RooflineRecord) -> Result<()> {
        let encoded = encode_record(record)?;
        write_atomic(&self.record_path(signature), &encoded).await
    }
}

/// Carry over kernel names for targets about to be re-measured
fn refresh_kernels(mut record: RooflineRecord, kernels: &RooflineKernels, stale: &[RoofTarget]) -> RooflineRecord {
    for target in stale {
        let spec = target.kernel(kernels);
        match target {
            RoofTarget::Level(level) => {
                if let Some(roof) = record.levels.iter_mut().find(|l| l.level == *level) {
                    roof.kernel = spec.kernel.clone();
                    roof.working_set = spec.working_set.clone();
                }
            }
            RoofTarget::Compute => {
                record.compute.kernel = spec.kernel.clone();
                record.compute.working_set = spec.working_set.clone();
            }
        }
    }
    record
}

fn recorded_kernel(record: &RooflineRecord, target: RoofTarget) -> Option<(&str, &str)> {
    match target {
        RoofTarget::Level(level) => record
            .level(level)
            .map(|l| (l.kernel.as_str(), l.working_set.as_str())),
        RoofTarget::Compute => Some((
            record.compute.kernel.as_str(),
            record.compute.working_set.as_str(),
        )),
    }
}

fn roof_key(target: RoofTarget) -> String {
    match target {
        RoofTarget::Level(level) => format!("roof_{}", level.as_str()),
        RoofTarget::Compute => "roof_compute".to_string(),
    }
}

/// Flat `key,value` rows; absent roofs are omitted
fn encode_record(record: &RooflineRecord) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["key", "value"])?;

    if let Some(signature) = &record.node_signature {
        writer.write_record(["node_signature", signature.as_str()])?;
    }
    let measured_at = record.measured_at.to_rfc3339();
    writer.write_record(["measured_at", measured_at.as_str()])?;

    for level in &record.levels {
        let key = roof_key(RoofTarget::Level(level.level));
        if let Some(bw) = level.bandwidth_mbps {
            writer.write_record([key.clone(), bw.to_string()])?;
        }
        writer.write_record([format!("{key}_kernel"), level.kernel.clone()])?;
        writer.write_record([format!("{key}_working_set"), level.working_set.clone()])?;
    }

    if let Some(mflops) = record.compute.mflops {
        writer.write_record(["roof_compute_mflops".to_string(), mflops.to_string()])?;
    }
    writer.write_record(["roof_compute_kernel", record.compute.kernel.as_str()])?;
    writer.write_record(["roof_compute_working_set", record.compute.working_set.as_str()])?;

    writer
        .into_inner()
        .map_err(|e| EngineError::io("roofline record", e.into_error()))
}

fn decode_record(path: &Path, content: &str) -> Result<RooflineRecord> {
    let malformed = |reason: String| EngineError::MalformedRecord {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut fields = BTreeMap::new();
    for row in reader.records() {
        let row = row?;
        if let (Some(key), Some(value)) = (row.get(0), row.get(1)) {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let text = |key: &str| -> Result<String> {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| malformed(format!("missing `{key}`")))
    };
    let number = |key: &str| -> Result<Option<f64>> {
        match fields.get(key).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| malformed(format!("`{key}` is not a number: {v}"))),
        }
    };

    let measured_at = DateTime::parse_from_rfc3339(&text("measured_at")?)
        .map_err(|e| malformed(format!("bad `measured_at`: {e}")))?
        .with_timezone(&Utc);

    let mut levels = Vec::with_capacity(CacheLevel::ALL.len());
    for level in CacheLevel::ALL {
        let key = roof_key(RoofTarget::Level(level));
        levels.push(super::LevelRoof {
            level,
            bandwidth_mbps: number(&key)?,
            kernel: text(&format!("{key}_kernel"))?,
            working_set: text(&format!("{key}_working_set"))?,
        });
    }

    Ok(RooflineRecord {
        node_signature: fields.get("node_signature").cloned(),
        levels,
        compute: super::ComputeRoof {
            mflops: number("roof_compute_mflops")?,
            kernel: text("roof_compute_kernel")?,
            working_set: text("roof_compute_working_set")?,
        },
        measured_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelSpec;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Counts invocations and fails the configured targets
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        failing: Mutex<HashSet<&'static str>>,
    }

    impl CountingRunner {
        fn failing(targets: &[&'static str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing: Mutex::new(targets.iter().copied().collect()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl BenchmarkRunner for CountingRunner {
        async fn run(&self, target: RoofTarget, spec: &KernelSpec) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(target.as_str()) {
                return Err(EngineError::benchmark(&spec.kernel, "simulated failure"));
            }
            Ok(match target {
                RoofTarget::Level(CacheLevel::L1) => "MByte/s:\t\t400000.00\n".to_string(),
                RoofTarget::Level(CacheLevel::L2) => "MByte/s:\t\t200000.00\n".to_string(),
                RoofTarget::Level(CacheLevel::L3) => "MByte/s:\t\t100000.00\n".to_string(),
                RoofTarget::Level(CacheLevel::Mem) => "MByte/s:\t\t20000.00\n".to_string(),
                RoofTarget::Compute => "MFlops/s:\t\t50000.00\n".to_string(),
            })
        }
    }

    fn signature() -> NodeSignature {
        NodeSignature::from_raw("node-a_test-cpu_x86-64").unwrap()
    }

    fn store(dir: &TempDir) -> RooflineStore {
        RooflineStore::new(dir.path(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_cache_hit_runs_no_benchmarks() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let kernels = RooflineKernels::default();
        let sig = signature();

        let runner = CountingRunner::default();
        let first = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert!(!first.cache_hit);
        assert_eq!(runner.calls(), 5);
        assert!(first.record.is_complete());
        assert!(store.is_complete(&sig, &kernels).await.unwrap());

        let runner = CountingRunner::default();
        let second = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(runner.calls(), 0);
        assert_eq!(second.record.bandwidth(CacheLevel::Mem), Some(20000.0));
        assert_eq!(second.record.compute.mflops, Some(50000.0));
    }

    #[tokio::test]
    async fn test_partial_failure_leaves_cache_incomplete() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let kernels = RooflineKernels::default();
        let sig = signature();

        let runner = CountingRunner::failing(&["L3"]);
        let outcome = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert_eq!(outcome.failed, vec![RoofTarget::Level(CacheLevel::L3)]);
        assert_eq!(outcome.record.bandwidth(CacheLevel::L3), None);
        assert_eq!(outcome.record.bandwidth(CacheLevel::L2), Some(200000.0));
        assert!(!store.is_complete(&sig, &kernels).await.unwrap());

        // The absent level is omitted from the record, not written as zero
        let content = std::fs::read_to_string(store.record_path(&sig)).unwrap();
        assert!(!content.contains("roof_L3,"));
        assert!(content.contains("roof_L3_kernel,load_avx"));

        // Next lookup re-measures only the missing level
        runner.heal();
        let before = runner.calls();
        let outcome = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(runner.calls() - before, 1);
        assert!(outcome.record.is_complete());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_a_hit() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let kernels = RooflineKernels::default();
        let sig = signature();

        let runner = CountingRunner::default();
        store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        std::fs::remove_file(store.artifact_path(&sig, RoofTarget::Compute)).unwrap();

        let runner = CountingRunner::default();
        let outcome = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(outcome.measured, vec![RoofTarget::Compute]);
    }

    #[tokio::test]
    async fn test_kernel_change_and_force_remeasure() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let mut kernels = RooflineKernels::default();
        let sig = signature();

        let runner = CountingRunner::default();
        store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();

        kernels.mem = KernelSpec::new("load_avx512", "4GB");
        let runner = CountingRunner::default();
        let outcome = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();
        assert_eq!(runner.calls(), 1);
        assert_eq!(outcome.record.level(CacheLevel::Mem).unwrap().kernel, "load_avx512");

        let runner = CountingRunner::default();
        store
            .get_or_measure(Some(&sig), &kernels, &runner, true)
            .await
            .unwrap();
        assert_eq!(runner.calls(), 5);
    }

    #[tokio::test]
    async fn test_ephemeral_measurement_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let kernels = RooflineKernels::default();

        let runner = CountingRunner::default();
        let outcome = store.get_or_measure(None, &kernels, &runner, false).await.unwrap();
        assert!(!outcome.cache_hit);
        assert!(outcome.record.node_signature.is_none());
        assert!(outcome.record.is_complete());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_measure_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(store(&temp_dir));
        let runner = Arc::new(CountingRunner::default());
        let sig = signature();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let runner = runner.clone();
            let sig = sig.clone();
            handles.push(tokio::spawn(async move {
                let kernels = RooflineKernels::default();
                store
                    .get_or_measure(Some(&sig), &kernels, runner.as_ref(), false)
                    .await
                    .unwrap()
                    .cache_hit
            }));
        }

        let mut hits = 0;
        for handle in handles {
            if handle.await.unwrap() {
                hits += 1;
            }
        }
        assert_eq!(hits, 3);
        assert_eq!(runner.calls(), 5);
    }

    #[test]
    fn test_malformed_record() {
        let err = decode_record(Path::new("x.csv"), "key,value\nroof_L1,fast\n").unwrap_err();
        assert!(matches!(err, EngineError::MalformedRecord { .. }));
    }
}
