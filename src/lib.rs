//! # benchfork
//!
//! A benchmark harness that runs each benchmark through controlled warmup
//! and measurement iterations, either inside the harness process or in
//! forked worker processes, and merges what every run measured into one
//! score per benchmark.
//!
//! ## Architecture Overview
//!
//! - `registry`: named workloads and the include/exclude resolution of the
//!   benchmark set
//! - `orchestrator`: warmup scheduling, embedded runs, and the fork path
//! - `link`: the framed loopback protocol between parent and workers
//! - `results`: unit-aware result values and the fork-aware aggregator
//! - `sink`: where progress and results are shown
//! - `coordinator`: sequencing of one whole invocation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use benchfork::{shared, BenchmarkDefinition, BenchmarkRegistry, PrettyPrintSink, RunCoordinator, RunOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = BenchmarkRegistry::new();
//!     registry.register(BenchmarkDefinition::new("sum", |_ctx| {
//!         std::hint::black_box((0..1000u64).sum::<u64>());
//!         Ok(())
//!     }))?;
//!
//!     let options = RunOptions::builder().forks(0).build()?;
//!     let sink = shared(PrettyPrintSink::stdout(false));
//!     let results = RunCoordinator::new(Arc::new(registry), options, sink).run().await?;
//!
//!     for (descriptor, result) in &results {
//!         println!("{}: {:?}", descriptor, result.primary().score());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Forking
//!
//! With a fork count above zero the parent opens a link server on an
//! ephemeral loopback port and re-executes the harness binary once per fork
//! with `--internal-worker`. The worker asks the parent for its options,
//! runs the one descriptor, forwards everything it would have printed, and
//! reports its result before exiting. Forks of one descriptor run one after
//! another, so merged results never race.

/// Command-line interface
///
/// Argument parsing with clap, including the hidden flags a forked worker is
/// launched with.
pub mod cli;

/// Sequencing of one invocation, bracketed by `run_start` / `run_end`
pub mod coordinator;

/// Benchmark identity (name, mode, threads) and mode expansion
pub mod descriptor;

pub mod error;

/// Iteration execution
///
/// The `BenchmarkExecutor` seam and the built-in timed-loop executor.
pub mod executor;

/// Parent/worker link protocol
///
/// Length-prefixed bincode frames over loopback TCP, a task-per-connection
/// server in the parent, and a blocking client in the worker.
pub mod link;

pub mod logging;

/// Resolved run options and per-descriptor parameters
pub mod options;

/// Warmup scheduling, embedded runs and forked workers
pub mod orchestrator;

pub mod registry;

/// JSON result file
pub mod report;

/// Result values, iteration samples and fork-aware aggregation
///
/// Scores are always derived from raw counts and nanoseconds, so merging
/// runs is associative and independent of arrival order.
pub mod results;

pub mod runner;

/// Benchmarks shipped with the binary
pub mod samples;

/// Output sinks
pub mod sink;

pub mod utils;

pub mod worker;

pub use coordinator::RunCoordinator;
pub use descriptor::{BenchmarkDescriptor, Mode};
pub use error::HarnessError;
pub use executor::{BenchmarkExecutor, InvocationContext, TimedLoopExecutor};
pub use options::{BenchmarkParams, RunOptions, WarmupMode};
pub use orchestrator::ForkCommand;
pub use registry::{BenchmarkDefinition, BenchmarkRegistry};
pub use results::{ResultStore, ResultValue, RunResult, TimeUnit};
pub use sink::{shared, OutputSink, PrettyPrintSink, RecordingSink, SharedSink, SilentSink};

/// The current version of the harness, as reported in result files
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Used wherever neither the benchmark definition nor the command line
/// says otherwise.
pub mod defaults {
    use std::time::Duration;

    /// Warmup iterations per run
    pub const WARMUP_ITERATIONS: u32 = 5;

    /// Duration of each warmup iteration
    pub const WARMUP_TIME: Duration = Duration::from_secs(1);

    /// Measurement iterations per run
    pub const MEASUREMENT_ITERATIONS: u32 = 5;

    /// Duration of each measurement iteration
    pub const MEASUREMENT_TIME: Duration = Duration::from_secs(1);

    /// Worker processes per benchmark
    ///
    /// One fork isolates each benchmark from the harness and from the
    /// benchmarks before it. Zero runs everything in the harness process.
    pub const FORKS: u32 = 1;

    /// Disposable warmup processes per benchmark
    pub const WARMUP_FORKS: u32 = 0;

    /// Threads per benchmark
    pub const THREADS: u32 = 1;
}
