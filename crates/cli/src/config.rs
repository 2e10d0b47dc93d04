//! Configuration loading for the CLI
//!
//! An optional file (any format the `config` crate reads) is layered under
//! `PERFCORE_*` environment variables, e.g. `PERFCORE_CLASSIFIER=strict` or
//! `PERFCORE_ROOFLINE__THREADS=4`. Command-line flags are applied last by
//! the commands themselves.

use anyhow::{Context, Result};
use perfcore_lib::AnalysisConfig;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "PERFCORE";

/// Build the analysis configuration from file and environment
pub fn load(file: Option<&Path>) -> Result<AnalysisConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| match file {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration from environment".to_string(),
        })?;

    settings
        .try_deserialize()
        .context("Invalid analysis configuration")
}

/// Default ledger location next to the roofline cache
pub fn default_ledger_path(config: &AnalysisConfig) -> PathBuf {
    config
        .roofline
        .cache_dir
        .parent()
        .map(|dir| dir.join("ledger.csv"))
        .unwrap_or_else(|| PathBuf::from("ledger.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfcore_lib::ClassifierMode;
    use tempfile::TempDir;

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("perfcore.toml");
        std::fs::write(
            &path,
            "classifier = \"strict\"\naggregate_threshold = 0.75\n\n[strict]\nmpki = 5.0\n\n[roofline]\nthreads = 4\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.classifier, ClassifierMode::Strict);
        assert_eq!(config.aggregate_threshold, 0.75);
        assert_eq!(config.strict.mpki, 5.0);
        // Unset fields keep their defaults
        assert_eq!(config.strict.cpi, 1.0);
        assert_eq!(config.roofline.threads, 4);
        assert_eq!(config.roofline.benchmark_command, "likwid-bench");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_ledger_defaults_beside_cache() {
        let mut config = AnalysisConfig::default();
        config.roofline.cache_dir = PathBuf::from("/var/cache/perfcore/roofline");
        assert_eq!(
            default_ledger_path(&config),
            PathBuf::from("/var/cache/perfcore/ledger.csv")
        );
    }
}
