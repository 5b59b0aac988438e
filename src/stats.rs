//! Per-build statistics, appended to a JSON ledger across runs.
//!
//! One entry per label; rebuilding under the same label replaces its
//! entry, so the ledger tracks the current size and digest of each
//! configuration rather than growing without bound.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// Unix timestamp of the build.
    pub time: i64,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    /// Size of the output archive in bytes.
    pub output_size: u64,
    /// SHA-256 of the output archive, lowercase hex.
    pub sha256: String,
}

impl BuildStats {
    /// Stats for a finished build of `output`.
    pub fn measure(label: &str, elapsed: Duration, output: &Path) -> Result<BuildStats> {
        let meta = fs::metadata(output)
            .with_context(|| format!("Failed to stat output {}", output.display()))?;
        Ok(BuildStats {
            label: label.to_string(),
            time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            duration: elapsed.as_secs_f64(),
            output_size: meta.len(),
            sha256: sha256_hex(output)?,
        })
    }
}

/// SHA-256 of a file, streaming.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Merge `stats` into the ledger at `path`: same-label entries are
/// replaced, the result is sorted by label.
pub fn append(path: &Path, stats: BuildStats) -> Result<()> {
    let mut all: Vec<BuildStats> = match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s)
            .with_context(|| format!("Stats file {} is not a JSON array", path.display()))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).context("Failed to read stats file"),
    };

    all.retain(|s| s.label != stats.label);
    all.push(stats);
    all.sort_by(|a, b| a.label.cmp(&b.label));

    let json = serde_json::to_string_pretty(&all)?;
    fs::write(path, json + "\n")
        .with_context(|| format!("Failed to write stats file {}", path.display()))?;
    Ok(())
}
