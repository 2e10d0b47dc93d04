//! Node identity for keying cached roofline records

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Prefix lengths keep cache file names readable
const MAX_HOST_CHARS: usize = 32;
const MAX_CPU_CHARS: usize = 48;
const HASH_CHARS: usize = 12;

/// Best-effort host facts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub hostname: Option<String>,
    pub cpu_model: Option<String>,
    pub arch: String,
}

impl HostIdentity {
    /// Read identity files under `root` (normally `/`) without running commands
    pub fn probe(root: &Path) -> Self {
        let hostname = read_trimmed(&root.join("proc/sys/kernel/hostname"))
            .or_else(|| read_trimmed(&root.join("etc/hostname")));

        let cpu_model = fs::read_to_string(root.join("proc/cpuinfo"))
            .ok()
            .and_then(|content| cpu_model_from_cpuinfo(&content));

        Self {
            hostname,
            cpu_model,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Probe the running host on the blocking pool
    pub async fn detect() -> Result<Self> {
        Ok(tokio::task::spawn_blocking(Self::detect_blocking).await?)
    }

    /// Probe the running host, falling back to the environment and
    /// `hostname`/`lscpu` when the identity files are unavailable
    fn detect_blocking() -> Self {
        let mut identity = Self::probe(Path::new("/"));

        if identity.hostname.is_none() {
            identity.hostname = std::env::var("HOSTNAME")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .or_else(|| command_output("hostname", &[]));
        }

        if identity.cpu_model.is_none() {
            identity.cpu_model = command_output("lscpu", &[]).and_then(|out| {
                out.lines()
                    .find(|l| l.trim_start().starts_with("Model name"))
                    .and_then(|l| l.split_once(':'))
                    .map(|(_, v)| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            });
        }

        debug!(
            hostname = ?identity.hostname,
            cpu_model = ?identity.cpu_model,
            arch = %identity.arch,
            "Detected host identity"
        );
        identity
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// CPU model string from `/proc/cpuinfo`, covering x86 and common ARM,
/// MIPS and POWER layouts
fn cpu_model_from_cpuinfo(content: &str) -> Option<String> {
    const KEYS: [&str; 4] = ["model name", "Hardware", "cpu model", "Processor"];

    KEYS.iter().find_map(|key| {
        content
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim() == *key)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Stable, path-safe key for one physical node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSignature(String);

impl NodeSignature {
    /// Build a signature; `None` when neither hostname nor CPU model is known
    ///
    /// The readable prefix is sanitized and truncated; the hash suffix covers
    /// the full, unmodified facts so distinct machines never collide on
    /// sanitization.
    pub fn from_identity(identity: &HostIdentity) -> Option<Self> {
        if identity.hostname.is_none() && identity.cpu_model.is_none() {
            warn!("No host identity source available, roofline caching disabled for this run");
            return None;
        }

        let host = identity.hostname.as_deref().unwrap_or("unknown-host");
        let cpu = identity.cpu_model.as_deref().unwrap_or("unknown-cpu");

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0u8]);
        hasher.update(cpu.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.arch.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Some(Self(format!(
            "{}_{}_{}_{}",
            sanitize(host, MAX_HOST_CHARS),
            sanitize(cpu, MAX_CPU_CHARS),
            sanitize(&identity.arch, MAX_HOST_CHARS),
            &digest[..HASH_CHARS]
        )))
    }

    /// Signature of the running host
    pub async fn detect() -> Result<Option<Self>> {
        Ok(Self::from_identity(&HostIdentity::detect().await?))
    }

    /// Wrap an operator-supplied signature, sanitizing it for use in paths
    ///
    /// Leading dots are dropped so the result is never `.`, `..` or a
    /// hidden entry.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let cleaned = sanitize(raw, usize::MAX);
        let cleaned = cleaned.trim_start_matches(['.', '-']);
        (!cleaned.is_empty()).then(|| Self(cleaned.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keep `[A-Za-z0-9.-]`, map everything else to `-`, collapse runs
fn sanitize(value: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(value.len().min(max_chars));
    for c in value.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
        if out.len() >= max_chars {
            break;
        }
    }
    out.trim_end_matches('-').to_string()
}
