//! Micro-benchmark execution

use super::RoofTarget;
use crate::config::{KernelSpec, RooflineConfig};
use crate::error::{EngineError, Result};
use crate::parser::{tokenize, LabelPattern, RowLayout};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs one roofline micro-benchmark and returns its raw output
#[async_trait]
pub trait BenchmarkRunner: Send + Sync {
    async fn run(&self, target: RoofTarget, spec: &KernelSpec) -> Result<String>;
}

/// Runs kernels through `likwid-bench`
#[derive(Debug, Clone)]
pub struct LikwidBenchRunner {
    command: String,
    threads: usize,
    timeout: Duration,
}

impl LikwidBenchRunner {
    pub fn new(command: impl Into<String>, threads: usize, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            threads: threads.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &RooflineConfig) -> Self {
        Self::new(
            config.benchmark_command.clone(),
            config.threads,
            config.benchmark_timeout(),
        )
    }

    fn args(&self, spec: &KernelSpec) -> Vec<String> {
        vec![
            "-t".to_string(),
            spec.kernel.clone(),
            "-w".to_string(),
            format!("N:{}:{}", spec.working_set, self.threads),
        ]
    }
}

#[async_trait]
impl BenchmarkRunner for LikwidBenchRunner {
    async fn run(&self, target: RoofTarget, spec: &KernelSpec) -> Result<String> {
        let args = self.args(spec);
        debug!(
            target = %target,
            command = %self.command,
            args = ?args,
            "Running roofline benchmark"
        );

        let child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::benchmark(&spec.kernel, format!("failed to spawn {}: {e}", self.command)))?;

        // Dropping the future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::benchmark(&spec.kernel, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| EngineError::benchmark(&spec.kernel, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::benchmark(
                &spec.kernel,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn key_value(output: &str, labels: &[&str]) -> Option<f64> {
    let patterns: Vec<LabelPattern> = labels.iter().map(|l| LabelPattern::new(l)).collect();
    tokenize(output)
        .iter()
        .flat_map(|table| table.rows.iter())
        .filter(|row| row.layout == RowLayout::KeyValue)
        .filter(|row| patterns.iter().any(|p| p.matches(&row.label)))
        .find_map(|row| row.numeric_cells().first().map(|(_, v)| *v))
        .filter(|v| *v > 0.0)
}

/// Sustained bandwidth in MBytes/s from benchmark output
pub fn parse_bandwidth(output: &str) -> Option<f64> {
    key_value(output, &["mbyte/s", "mbytes/s"])
}

/// Peak compute throughput in MFLOP/s from benchmark output
pub fn parse_mflops(output: &str) -> Option<f64> {
    key_value(output, &["mflop/s", "mflops/s"])
}

/// Pull the figure relevant to `target` out of benchmark output
pub(crate) fn parse_target(target: RoofTarget, output: &str) -> Option<f64> {
    match target {
        RoofTarget::Level(_) => parse_bandwidth(output),
        RoofTarget::Compute => parse_mflops(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roofline::CacheLevel;

    const LOAD_OUTPUT: &str = r#"Allocate: Process running on hwthread 0 (Domain N) - Vector length 4000/32000 Offset 0 Alignment 512
--------------------------------------------------------------------------------
Cycles:			2400107386
CPU Clock:		2100000000
Cycle Clock:		2100000000
Time:			1.142909e+00 sec
Iterations:		4194304
Iterations per thread:	4194304
Inner loop executions:	1000
Size (Byte):		32000
Size per thread:	32000
Number of Flops:	0
MFlops/s:		0.00
Data volume (Byte):	134217728000
MByte/s:		117434.27
Cycles per update:	0.286118
Cycles per cacheline:	2.288942
Loads per update:	1
Stores per update:	0
--------------------------------------------------------------------------------
"#;

    #[test]
    fn test_parse_bandwidth() {
        assert_eq!(parse_bandwidth(LOAD_OUTPUT), Some(117434.27));
        // Load kernels report zero flops; that is not a compute roof
        assert_eq!(parse_mflops(LOAD_OUTPUT), None);
    }

    #[test]
    fn test_parse_mflops() {
        let output = "Number of Flops:\t67108864000\nMFlops/s:\t\t35212.10\nMByte/s:\t\t0.00\n";
        assert_eq!(parse_mflops(output), Some(35212.10));
        assert_eq!(parse_target(RoofTarget::Compute, output), Some(35212.10));
        assert_eq!(parse_target(RoofTarget::Level(CacheLevel::L1), output), None);
    }

    #[test]
    fn test_unparseable_output() {
        assert_eq!(parse_bandwidth("ERROR: kernel not found\n"), None);
        assert_eq!(parse_bandwidth(""), None);
    }

    #[test]
    fn test_runner_args() {
        let runner = LikwidBenchRunner::new("likwid-bench", 0, Duration::from_secs(1));
        let args = runner.args(&KernelSpec::new("load_avx", "32kB"));
        assert_eq!(args, vec!["-t", "load_avx", "-w", "N:32kB:1"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_benchmark_error() {
        let runner = LikwidBenchRunner::new(
            "perfcore-definitely-missing-benchmark",
            1,
            Duration::from_secs(5),
        );
        let result = runner
            .run(RoofTarget::Compute, &KernelSpec::new("peakflops_avx", "16kB"))
            .await;
        assert!(matches!(result, Err(EngineError::Benchmark { .. })));
    }

    /// Executable script standing in for the benchmark binary
    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-likwid-bench");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_benchmark_times_out() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let runner = LikwidBenchRunner::new(
            script(temp_dir.path(), "sleep 10"),
            1,
            Duration::from_millis(200),
        );

        let start = std::time::Instant::now();
        let result = runner
            .run(RoofTarget::Level(CacheLevel::Mem), &KernelSpec::new("load_avx", "1GB"))
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        match result {
            Err(EngineError::Benchmark { kernel, reason }) => {
                assert_eq!(kernel, "load_avx");
                assert!(reason.contains("timed out"), "unexpected reason: {reason}");
            }
            other => panic!("expected benchmark error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_benchmark_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let runner = LikwidBenchRunner::new(
            script(temp_dir.path(), "echo 'kernel missing' >&2; exit 3"),
            1,
            Duration::from_secs(5),
        );
        let result = runner
            .run(RoofTarget::Compute, &KernelSpec::new("peakflops_avx", "16kB"))
            .await;
        match result {
            Err(EngineError::Benchmark { reason, .. }) => assert!(reason.contains("kernel missing")),
            other => panic!("expected benchmark error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_targets_are_recorded_as_failed() {
        use crate::config::RooflineKernels;
        use crate::roofline::{NodeSignature, RooflineStore};

        let temp_dir = tempfile::TempDir::new().unwrap();
        let runner = LikwidBenchRunner::new(
            script(temp_dir.path(), "sleep 10"),
            1,
            Duration::from_millis(200),
        );
        let store = RooflineStore::new(temp_dir.path().join("cache"), Duration::from_secs(5));
        let sig = NodeSignature::from_raw("slow-node").unwrap();
        let kernels = RooflineKernels::default();

        let outcome = store
            .get_or_measure(Some(&sig), &kernels, &runner, false)
            .await
            .unwrap();

        // Every target was attempted and none produced a figure
        assert_eq!(outcome.measured.len(), RoofTarget::ALL.len());
        assert_eq!(outcome.failed.len(), RoofTarget::ALL.len());
        assert_eq!(outcome.record.bandwidth(CacheLevel::Mem), None);
        assert!(!outcome.record.is_complete());
        assert!(!store.is_complete(&sig, &kernels).await.unwrap());
    }
}
