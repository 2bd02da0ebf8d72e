//! # Run Coordinator
//!
//! Sequencing for one invocation: resolve the benchmark set, bracket the run
//! with the sink's `run_start` / `run_end`, hand the plan to the
//! [`Orchestrator`], and write the optional result file.
//!
//! `run_end` is called exactly once for every run that started, with
//! whatever was merged, including when a fatal failure stopped the run.

use crate::descriptor::BenchmarkDescriptor;
use crate::error::HarnessError;
use crate::executor::{BenchmarkExecutor, TimedLoopExecutor};
use crate::options::RunOptions;
use crate::orchestrator::{ForkCommand, Orchestrator};
use crate::registry::BenchmarkRegistry;
use crate::report::RunReport;
use crate::results::{ResultStore, RunResult};
use crate::sink::SharedSink;
use crate::utils::generate_run_id;
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Drives one invocation of the harness
pub struct RunCoordinator {
    registry: Arc<BenchmarkRegistry>,
    options: Arc<RunOptions>,
    sink: SharedSink,
    executor: Arc<dyn BenchmarkExecutor>,
    fork_command: ForkCommand,
}

impl RunCoordinator {
    /// Coordinator using [`TimedLoopExecutor`] and the current executable
    /// for forks
    pub fn new(registry: Arc<BenchmarkRegistry>, options: RunOptions, sink: SharedSink) -> Self {
        let executor = Arc::new(TimedLoopExecutor::new(registry.clone()));
        Self {
            registry,
            options: Arc::new(options),
            sink,
            executor,
            fork_command: ForkCommand::default(),
        }
    }

    /// Run embedded descriptors through `executor` instead
    pub fn with_executor(mut self, executor: Arc<dyn BenchmarkExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_fork_command(mut self, fork_command: ForkCommand) -> Self {
        self.fork_command = fork_command;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run everything the options select and return the final results.
    ///
    /// Configuration errors are returned before anything runs. With
    /// `list_only`, matching benchmarks are printed and nothing runs.
    pub async fn run(&self) -> Result<BTreeMap<BenchmarkDescriptor, RunResult>> {
        let plan = self.registry.resolve(&self.options)?;

        if self.options.list_only() {
            let mut sink = self.sink.lock();
            sink.println("Benchmarks:")?;
            for descriptor in &plan.measured {
                sink.println(&descriptor.to_string())?;
            }
            sink.flush()?;
            return Ok(BTreeMap::new());
        }

        if plan.is_empty() {
            self.sink
                .lock()
                .println("No matching benchmarks. Miss-spelled regexp?")?;
            return Err(HarnessError::NoSuchBenchmark(self.options.includes().join(", ")).into());
        }

        let run_id = generate_run_id();
        let started_at = Utc::now();
        info!(
            "Run {}: {} measured, {} warmup-only descriptor(s)",
            run_id,
            plan.measured.len(),
            plan.warmup_only.len()
        );

        self.sink.lock().run_start()?;

        let store = ResultStore::new();
        let orchestrator = Orchestrator::new(
            self.registry.clone(),
            self.executor.clone(),
            self.options.clone(),
            self.sink.clone(),
            store.clone(),
            self.fork_command.clone(),
        );
        let outcome = orchestrator.run(&plan).await;
        if let Err(e) = &outcome {
            error!("Run aborted: {:#}", e);
        }

        let results = store.snapshot();
        {
            let mut sink = self.sink.lock();
            sink.run_end(&results)?;
            sink.flush()?;
        }
        outcome?;

        if let Some(path) = self.options.result_file() {
            RunReport::new(run_id, started_at, &results).write(path)?;
        }

        Ok(results)
    }
}
