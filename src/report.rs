//! Machine-readable result file.
//!
//! With `--result-file`, the coordinator writes one JSON document after the
//! run ends: run metadata plus one entry per measured descriptor.

use crate::descriptor::BenchmarkDescriptor;
use crate::results::RunResult;
use crate::utils::calculate_stats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Host the run executed on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub memory_gb: Option<f64>,
    pub rust_version: String,
    pub harness_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            memory_gb: Self::memory_gb(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            harness_version: crate::VERSION.to_string(),
        }
    }

    /// Total memory from `/proc/meminfo`; `None` where that is unavailable
    fn memory_gb() -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let kb: f64 = meminfo
            .lines()
            .find_map(|line| line.strip_prefix("MemTotal:"))?
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse()
            .ok()?;
        Some(kb / (1024.0 * 1024.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub system_info: SystemInfo,
}

/// Final numbers for one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub name: String,
    pub mode: String,
    pub threads: u32,
    pub score: Option<f64>,
    pub unit: String,
    /// Runs (forks, or the one embedded run) merged into the score
    pub runs: u32,
    pub iterations: usize,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub secondary: BTreeMap<String, Option<f64>>,
}

impl BenchmarkEntry {
    pub fn new(descriptor: &BenchmarkDescriptor, result: &RunResult) -> Self {
        let scores = result.iteration_scores();
        let (mean, min, max) = if scores.is_empty() {
            (None, None, None)
        } else {
            let (mean, min, max, _) = calculate_stats(scores);
            (Some(mean), Some(min), Some(max))
        };

        Self {
            name: descriptor.name().to_string(),
            mode: descriptor.mode().label().to_string(),
            threads: descriptor.threads(),
            score: result.primary().score(),
            unit: result.primary().score_unit(),
            runs: result.contributions(),
            iterations: scores.len(),
            min,
            mean,
            max,
            secondary: result
                .secondary()
                .iter()
                .map(|(name, value)| (name.clone(), value.score()))
                .collect(),
        }
    }
}

/// Complete result document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub benchmarks: Vec<BenchmarkEntry>,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        results: &BTreeMap<BenchmarkDescriptor, RunResult>,
    ) -> Self {
        Self {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id,
                started_at,
                finished_at: Utc::now(),
                system_info: SystemInfo::collect(),
            },
            benchmarks: results
                .iter()
                .map(|(descriptor, result)| BenchmarkEntry::new(descriptor, result))
                .collect(),
        }
    }

    /// Write as pretty-printed JSON, replacing any existing file
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write result file {}", path.display()))?;
        info!("Results written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Mode;
    use crate::results::{IterationKind, IterationSample, ResultValue, ThreadResult, TimeUnit};
    use tempfile::NamedTempFile;

    fn result(ops: &[u64]) -> RunResult {
        let samples: Vec<IterationSample> = ops
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let value = ResultValue::throughput("bench", n, 1_000_000_000, TimeUnit::Seconds);
                IterationSample::from_threads(
                    i as u32 + 1,
                    IterationKind::Measurement,
                    1_000_000_000,
                    vec![ThreadResult::new(value)],
                )
                .unwrap()
            })
            .collect();
        RunResult::from_iterations(&samples).unwrap()
    }

    #[test]
    fn test_entry_statistics() {
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 2);
        let entry = BenchmarkEntry::new(&d, &result(&[100, 200, 300]));

        assert_eq!(entry.name, "bench");
        assert_eq!(entry.mode, "thrpt");
        assert_eq!(entry.threads, 2);
        assert_eq!(entry.score, Some(200.0));
        assert_eq!(entry.unit, "ops/s");
        assert_eq!(entry.runs, 1);
        assert_eq!(entry.iterations, 3);
        assert_eq!(entry.min, Some(100.0));
        assert_eq!(entry.max, Some(300.0));
    }

    #[test]
    fn test_write_json() {
        let mut results = BTreeMap::new();
        results.insert(
            BenchmarkDescriptor::new("bench", Mode::Throughput, 1),
            result(&[1000]).merge(&result(&[2000])),
        );
        let report = RunReport::new(Uuid::new_v4(), Utc::now(), &results);

        let file = NamedTempFile::new().unwrap();
        report.write(file.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(json["benchmarks"][0]["name"], "bench");
        assert_eq!(json["benchmarks"][0]["runs"], 2);
        assert_eq!(json["benchmarks"][0]["score"], 1500.0);
        assert_eq!(json["metadata"]["version"], crate::VERSION);
    }
}
