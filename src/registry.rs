//! # Benchmark Registry
//!
//! Named workloads plus their per-benchmark defaults, and the resolution of
//! include/exclude patterns into the descriptor sets the orchestrator runs.
//!
//! Resolution happens once per invocation, before anything executes, so
//! every configuration error (bad pattern, unknown name) surfaces up front.

use crate::descriptor::{expand_with_modes, BenchmarkDescriptor, Mode};
use crate::error::HarnessError;
use crate::executor::InvocationContext;
use crate::options::{BenchmarkParams, RunOptions};
use crate::results::TimeUnit;
use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A benchmark body. Called once per invocation; returning `Err` fails the
/// iteration.
pub type Workload = Arc<dyn Fn(&InvocationContext) -> Result<()> + Send + Sync>;

/// One registered benchmark
#[derive(Clone)]
pub struct BenchmarkDefinition {
    name: String,
    mode: Mode,
    threads: u32,
    forks: Option<u32>,
    warmup_forks: Option<u32>,
    time_unit: Option<TimeUnit>,
    workload: Workload,
}

impl BenchmarkDefinition {
    /// Define a throughput benchmark on one thread; refine with the builder
    /// methods below.
    pub fn new<F>(name: impl Into<String>, workload: F) -> Self
    where
        F: Fn(&InvocationContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            mode: Mode::Throughput,
            threads: crate::defaults::THREADS,
            forks: None,
            warmup_forks: None,
            time_unit: None,
            workload: Arc::new(workload),
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Fork count for this benchmark; beats the global option
    pub fn forks(mut self, forks: u32) -> Self {
        self.forks = Some(forks);
        self
    }

    /// Warmup-fork count for this benchmark; beats the global option
    pub fn warmup_forks(mut self, forks: u32) -> Self {
        self.warmup_forks = Some(forks);
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = Some(unit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workload(&self) -> Workload {
        self.workload.clone()
    }

    /// Descriptor with this benchmark's own mode and thread count
    pub fn descriptor(&self) -> BenchmarkDescriptor {
        BenchmarkDescriptor::new(self.name.clone(), self.mode, self.threads)
    }
}

impl fmt::Debug for BenchmarkDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkDefinition")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("threads", &self.threads)
            .field("forks", &self.forks)
            .field("warmup_forks", &self.warmup_forks)
            .field("time_unit", &self.time_unit)
            .finish_non_exhaustive()
    }
}

/// Descriptor sets for one invocation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunPlan {
    /// Descriptors that are measured and reported
    pub measured: BTreeSet<BenchmarkDescriptor>,
    /// Extra descriptors that only ever run warmup iterations
    pub warmup_only: BTreeSet<BenchmarkDescriptor>,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool {
        self.measured.is_empty() && self.warmup_only.is_empty()
    }
}

/// All benchmarks known to this binary, by name
#[derive(Clone, Debug, Default)]
pub struct BenchmarkRegistry {
    benchmarks: BTreeMap<String, BenchmarkDefinition>,
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a benchmark. Names must be unique.
    pub fn register(&mut self, definition: BenchmarkDefinition) -> Result<(), HarnessError> {
        if self.benchmarks.contains_key(definition.name()) {
            return Err(HarnessError::Config(format!(
                "Benchmark '{}' is registered twice",
                definition.name()
            )));
        }
        self.benchmarks
            .insert(definition.name().to_string(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&BenchmarkDefinition, HarnessError> {
        self.benchmarks
            .get(name)
            .ok_or_else(|| HarnessError::NoSuchBenchmark(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.benchmarks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    /// Descriptors of every benchmark whose name matches at least one
    /// include pattern and no exclude pattern. An empty include list
    /// matches everything.
    pub fn find(
        &self,
        includes: &[String],
        excludes: &[String],
    ) -> Result<BTreeSet<BenchmarkDescriptor>, HarnessError> {
        let includes = compile_all(includes)?;
        let excludes = compile_all(excludes)?;

        Ok(self
            .benchmarks
            .values()
            .filter(|d| includes.is_empty() || includes.iter().any(|re| re.is_match(d.name())))
            .filter(|d| !excludes.iter().any(|re| re.is_match(d.name())))
            .map(BenchmarkDefinition::descriptor)
            .collect())
    }

    /// Resolve the measured and warmup-only sets for `options`, with mode
    /// and thread overrides applied and "all modes" expanded.
    pub fn resolve(&self, options: &RunOptions) -> Result<RunPlan, HarnessError> {
        let measured = self.expand_set(self.find(options.includes(), options.excludes())?, options);

        let warmup_only = if options.warmup_includes().is_empty() {
            BTreeSet::new()
        } else {
            let found = self.find(options.warmup_includes(), options.excludes())?;
            self.expand_set(found, options)
                .into_iter()
                .filter(|d| !measured.contains(d))
                .collect()
        };

        Ok(RunPlan {
            measured,
            warmup_only,
        })
    }

    fn expand_set(
        &self,
        found: BTreeSet<BenchmarkDescriptor>,
        options: &RunOptions,
    ) -> BTreeSet<BenchmarkDescriptor> {
        found
            .into_iter()
            .map(|d| match options.threads() {
                Some(threads) => d.with_threads(threads),
                None => d,
            })
            .flat_map(|d| expand_with_modes(&d, options.modes()))
            .collect()
    }

    /// Parameters for running `descriptor`. Per-benchmark values beat global
    /// options, which beat the built-in defaults.
    pub fn params_for(
        &self,
        descriptor: &BenchmarkDescriptor,
        options: &RunOptions,
    ) -> Result<BenchmarkParams, HarnessError> {
        let definition = self.get(descriptor.name())?;
        let time_unit = definition
            .time_unit
            .or(options.time_unit())
            .unwrap_or_else(|| default_unit(descriptor.mode()));

        Ok(BenchmarkParams {
            warmup: options.warmup(),
            measurement: options.measurement(),
            threads: descriptor.threads(),
            sync_iterations: options.sync_iterations(),
            time_unit,
            forks: definition
                .forks
                .or(options.forks())
                .unwrap_or(crate::defaults::FORKS),
            warmup_forks: definition
                .warmup_forks
                .or(options.warmup_forks())
                .unwrap_or(crate::defaults::WARMUP_FORKS),
        })
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, HarnessError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| HarnessError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn default_unit(mode: Mode) -> TimeUnit {
    match mode {
        Mode::Throughput => TimeUnit::Seconds,
        _ => TimeUnit::Microseconds,
    }
}
