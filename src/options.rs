//! # Run Options
//!
//! The resolved configuration snapshot for one invocation. It is built once,
//! either from command-line [`Args`](crate::cli::Args) or programmatically via
//! [`RunOptionsBuilder`], and never changes afterwards. Forked workers receive
//! the parent's snapshot over the link, so the parent stays the single
//! authority on configuration.
//!
//! `RunOptionsBuilder::build` consumes the builder: a sealed builder cannot be
//! touched again, and trying to is a compile error rather than a runtime one.

use crate::cli::{Args, OutputFormat};
use crate::descriptor::Mode;
use crate::error::HarnessError;
use crate::results::{IterationKind, TimeUnit};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// When warmup iterations run relative to measurement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum WarmupMode {
    /// Warmup inline, as part of each benchmark's own cycle
    #[default]
    #[clap(name = "none")]
    None,

    /// Dedicated warmup right before each benchmark's measurement
    #[clap(name = "before-each")]
    BeforeEach,

    /// Warm every requested benchmark before any of them is measured
    #[clap(name = "before-any")]
    BeforeAny,
}

impl WarmupMode {
    /// Whether the requested benchmarks themselves join the bulk warmup pass
    pub fn is_bulk(&self) -> bool {
        matches!(self, WarmupMode::BeforeAny)
    }
}

/// Count and duration for one kind of iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationParams {
    pub count: u32,
    pub time: Duration,
}

/// Fully resolved parameters for running one descriptor.
///
/// Combines the global [`RunOptions`] with per-benchmark settings from the
/// registry. This is what sinks display in benchmark headers and what the
/// executor reads to size each iteration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkParams {
    pub warmup: IterationParams,
    pub measurement: IterationParams,
    pub threads: u32,
    pub sync_iterations: bool,
    pub time_unit: TimeUnit,
    pub forks: u32,
    pub warmup_forks: u32,
}

impl BenchmarkParams {
    /// Parameters for a warmup-only pass: no measurement iterations
    pub fn warmup_only(&self) -> Self {
        let mut copy = self.clone();
        copy.measurement.count = 0;
        copy
    }

    /// Parameters that skip warmup, for descriptors already warmed in bulk
    pub fn without_warmup(&self) -> Self {
        let mut copy = self.clone();
        copy.warmup.count = 0;
        copy
    }

    pub fn iteration(&self, kind: IterationKind) -> IterationParams {
        match kind {
            IterationKind::Warmup => self.warmup,
            IterationKind::Measurement => self.measurement,
        }
    }
}

/// Immutable configuration for one invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    includes: Vec<String>,
    excludes: Vec<String>,
    warmup_includes: Vec<String>,
    modes: Vec<Mode>,
    warmup: IterationParams,
    measurement: IterationParams,
    forks: Option<u32>,
    warmup_forks: Option<u32>,
    warmup_mode: WarmupMode,
    threads: Option<u32>,
    sync_iterations: bool,
    fail_on_error: bool,
    verbose: bool,
    detailed_results: bool,
    time_unit: Option<TimeUnit>,
    output_format: OutputFormat,
    output: Option<PathBuf>,
    result_file: Option<PathBuf>,
    list_only: bool,
}

impl RunOptions {
    /// Start a builder seeded with the built-in defaults
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    /// Resolve options from parsed command-line arguments
    pub fn from_args(args: &Args) -> Result<Self, HarnessError> {
        let mut builder = RunOptions::builder()
            .warmup_time(args.warmup_time)
            .measurement_time(args.time)
            .warmup_mode(args.warmup_mode)
            .sync_iterations(args.sync_iterations)
            .fail_on_error(args.fail_on_error)
            .verbose(args.verbose)
            .detailed_results(args.details)
            .output_format(args.format)
            .list_only(args.list);

        for pattern in &args.includes {
            builder = builder.include(pattern);
        }
        for pattern in &args.excludes {
            builder = builder.exclude(pattern);
        }
        for pattern in &args.warmup_benchmarks {
            builder = builder.include_warmup(pattern);
        }
        for mode in &args.modes {
            builder = builder.mode(*mode);
        }
        if let Some(count) = args.warmup_iterations {
            builder = builder.warmup_iterations(count);
        }
        if let Some(count) = args.iterations {
            builder = builder.measurement_iterations(count);
        }
        if let Some(forks) = args.forks {
            builder = builder.forks(forks);
        }
        if let Some(warmup_forks) = args.warmup_forks {
            builder = builder.warmup_forks(warmup_forks);
        }
        if let Some(threads) = args.threads {
            builder = builder.threads(threads);
        }
        if let Some(unit) = args.time_unit {
            builder = builder.time_unit(unit);
        }
        if let Some(ref output) = args.output {
            builder = builder.output(output.clone());
        }
        if let Some(ref result_file) = args.result_file {
            builder = builder.result_file(result_file.clone());
        }

        builder.build()
    }

    /// A copy with forced iteration counts, used by forked workers that were
    /// launched with explicit overrides (e.g. warmup forks).
    pub fn with_iteration_overrides(&self, warmup: Option<u32>, measurement: Option<u32>) -> Self {
        let mut copy = self.clone();
        if let Some(count) = warmup {
            copy.warmup.count = count;
        }
        if let Some(count) = measurement {
            copy.measurement.count = count;
        }
        copy
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Patterns of extra benchmarks that only ever run warmup
    pub fn warmup_includes(&self) -> &[String] {
        &self.warmup_includes
    }

    /// Mode override; empty means each benchmark keeps its own
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn warmup(&self) -> IterationParams {
        self.warmup
    }

    pub fn measurement(&self) -> IterationParams {
        self.measurement
    }

    /// Global fork count, if set
    pub fn forks(&self) -> Option<u32> {
        self.forks
    }

    /// Global warmup-fork count, if set
    pub fn warmup_forks(&self) -> Option<u32> {
        self.warmup_forks
    }

    pub fn warmup_mode(&self) -> WarmupMode {
        self.warmup_mode
    }

    /// Thread-count override, if set
    pub fn threads(&self) -> Option<u32> {
        self.threads
    }

    pub fn sync_iterations(&self) -> bool {
        self.sync_iterations
    }

    pub fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn detailed_results(&self) -> bool {
        self.detailed_results
    }

    pub fn time_unit(&self) -> Option<TimeUnit> {
        self.time_unit
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn output(&self) -> Option<&PathBuf> {
        self.output.as_ref()
    }

    pub fn result_file(&self) -> Option<&PathBuf> {
        self.result_file.as_ref()
    }

    pub fn list_only(&self) -> bool {
        self.list_only
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            warmup_includes: Vec::new(),
            modes: Vec::new(),
            warmup: IterationParams {
                count: crate::defaults::WARMUP_ITERATIONS,
                time: crate::defaults::WARMUP_TIME,
            },
            measurement: IterationParams {
                count: crate::defaults::MEASUREMENT_ITERATIONS,
                time: crate::defaults::MEASUREMENT_TIME,
            },
            forks: None,
            warmup_forks: None,
            warmup_mode: WarmupMode::default(),
            threads: None,
            sync_iterations: true,
            fail_on_error: false,
            verbose: false,
            detailed_results: false,
            time_unit: None,
            output_format: OutputFormat::Pretty,
            output: None,
            result_file: None,
            list_only: false,
        }
    }
}

/// Staged builder for [`RunOptions`]; `build` seals it.
#[derive(Clone, Debug, Default)]
pub struct RunOptionsBuilder {
    options: RunOptions,
}

impl RunOptionsBuilder {
    /// Add a benchmark include pattern (regular expression)
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.options.includes.push(pattern.into());
        self
    }

    /// Add a benchmark exclude pattern (regular expression)
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.options.excludes.push(pattern.into());
        self
    }

    /// Add a pattern for extra benchmarks that run warmup only
    pub fn include_warmup(mut self, pattern: impl Into<String>) -> Self {
        self.options.warmup_includes.push(pattern.into());
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.options.modes.push(mode);
        self
    }

    pub fn warmup_iterations(mut self, count: u32) -> Self {
        self.options.warmup.count = count;
        self
    }

    pub fn warmup_time(mut self, time: Duration) -> Self {
        self.options.warmup.time = time;
        self
    }

    pub fn measurement_iterations(mut self, count: u32) -> Self {
        self.options.measurement.count = count;
        self
    }

    pub fn measurement_time(mut self, time: Duration) -> Self {
        self.options.measurement.time = time;
        self
    }

    /// Global fork count; 0 runs every benchmark embedded
    pub fn forks(mut self, forks: u32) -> Self {
        self.options.forks = Some(forks);
        self
    }

    pub fn warmup_forks(mut self, forks: u32) -> Self {
        self.options.warmup_forks = Some(forks);
        self
    }

    pub fn warmup_mode(mut self, mode: WarmupMode) -> Self {
        self.options.warmup_mode = mode;
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.options.threads = Some(threads);
        self
    }

    pub fn sync_iterations(mut self, value: bool) -> Self {
        self.options.sync_iterations = value;
        self
    }

    pub fn fail_on_error(mut self, value: bool) -> Self {
        self.options.fail_on_error = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.options.verbose = value;
        self
    }

    pub fn detailed_results(mut self, value: bool) -> Self {
        self.options.detailed_results = value;
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.options.time_unit = Some(unit);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.options.output_format = format;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output = Some(path.into());
        self
    }

    pub fn result_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.result_file = Some(path.into());
        self
    }

    pub fn list_only(mut self, value: bool) -> Self {
        self.options.list_only = value;
        self
    }

    /// Validate and seal the options
    pub fn build(self) -> Result<RunOptions, HarnessError> {
        let options = self.options;
        if options.threads == Some(0) {
            return Err(HarnessError::Config(
                "Thread count must be at least 1".to_string(),
            ));
        }
        if options.measurement.count > 0 && options.measurement.time.is_zero() {
            return Err(HarnessError::Config(
                "Measurement time must be greater than zero".to_string(),
            ));
        }
        if options.warmup.count > 0 && options.warmup.time.is_zero() {
            return Err(HarnessError::Config(
                "Warmup time must be greater than zero".to_string(),
            ));
        }
        Ok(options)
    }
}
