//! # Process Orchestrator
//!
//! Decides how and when every descriptor of a [`RunPlan`] runs, and drives
//! forked worker processes.
//!
//! ## Execution Order
//!
//! 1. **Bulk warmup**: with `BEFORE_ANY`, or when extra warmup-only
//!    benchmarks were requested, every descriptor of the combined warmup set
//!    runs its warmup iterations only, in descriptor order, in this process.
//! 2. **Embedded**: descriptors with a fork count of 0 run here through the
//!    normal cycle. Under `BEFORE_ANY` they skip their own warmup, since the
//!    bulk pass already covered it.
//! 3. **Forked**: each remaining descriptor gets its warmup forks (results
//!    discarded) and then its real forks, one process at a time. After each
//!    process exits the link server's [`wait_finish`](LinkServer::wait_finish)
//!    runs as a barrier, so every fork's results are merged before the next
//!    one starts.
//!
//! ## Failures
//!
//! Benchmark failures, non-zero worker exits and spawn failures are reported
//! through the output sink and `tracing`, then the run moves on. With
//! fail-on-error set they abort the run instead, and any live worker
//! connections are torn down.

use crate::descriptor::BenchmarkDescriptor;
use crate::error::HarnessError;
use crate::executor::BenchmarkExecutor;
use crate::link::LinkServer;
use crate::options::{BenchmarkParams, RunOptions};
use crate::registry::{BenchmarkRegistry, RunPlan};
use crate::results::ResultStore;
use crate::runner::run_benchmark;
use crate::sink::SharedSink;
use crate::utils::resolve_worker_binary;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Flag that switches the binary into worker mode
pub const WORKER_FLAG: &str = "--internal-worker";

/// Program used to launch forked workers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ForkCommand {
    /// Re-execute the harness binary
    #[default]
    CurrentExe,
    /// A specific program, with leading arguments placed before the worker
    /// arguments
    Program { program: PathBuf, args: Vec<String> },
}

impl ForkCommand {
    pub fn program(program: impl Into<PathBuf>) -> Self {
        ForkCommand::Program {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a leading argument. No effect on `CurrentExe`.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let ForkCommand::Program { args, .. } = &mut self {
            args.push(arg.into());
        }
        self
    }

    /// Worker arguments selecting `descriptor` and pointing at the link.
    /// Warmup forks get a forced single warmup iteration and no measurement.
    pub fn worker_args(
        host: &str,
        port: u16,
        descriptor: &BenchmarkDescriptor,
        warmup_fork: bool,
    ) -> Vec<String> {
        let mut args = vec![
            WORKER_FLAG.to_string(),
            "--link-host".to_string(),
            host.to_string(),
            "--link-port".to_string(),
            port.to_string(),
            "--benchmark".to_string(),
            descriptor.name().to_string(),
            "--benchmark-mode".to_string(),
            descriptor.mode().label().to_string(),
            "--benchmark-threads".to_string(),
            descriptor.threads().to_string(),
        ];
        if warmup_fork {
            args.extend(
                ["--warmup-iterations", "1", "--iterations", "0"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        args
    }

    fn build(
        &self,
        host: &str,
        port: u16,
        descriptor: &BenchmarkDescriptor,
        warmup_fork: bool,
    ) -> Result<Command> {
        let (program, leading) = match self {
            ForkCommand::CurrentExe => (resolve_worker_binary()?, Vec::new()),
            ForkCommand::Program { program, args } => (program.clone(), args.clone()),
        };
        debug!("Spawning worker binary: {}", program.display());

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(Self::worker_args(host, port, descriptor, warmup_fork))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

/// Runs one [`RunPlan`] against a shared result store
pub struct Orchestrator {
    registry: Arc<BenchmarkRegistry>,
    executor: Arc<dyn BenchmarkExecutor>,
    options: Arc<RunOptions>,
    sink: SharedSink,
    store: ResultStore,
    fork_command: ForkCommand,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<BenchmarkRegistry>,
        executor: Arc<dyn BenchmarkExecutor>,
        options: Arc<RunOptions>,
        sink: SharedSink,
        store: ResultStore,
        fork_command: ForkCommand,
    ) -> Self {
        Self {
            registry,
            executor,
            options,
            sink,
            store,
            fork_command,
        }
    }

    /// Execute `plan`. Results land in the store given at construction.
    ///
    /// Returns an error only for fatal failures; everything else has been
    /// reported by the time this returns.
    pub async fn run(&self, plan: &RunPlan) -> Result<()> {
        let mut embedded = Vec::new();
        let mut forked = Vec::new();
        for descriptor in &plan.measured {
            let params = self.registry.params_for(descriptor, &self.options)?;
            if params.forks == 0 {
                embedded.push((descriptor.clone(), params));
            } else {
                forked.push((descriptor.clone(), params));
            }
        }

        let server = if forked.is_empty() {
            None
        } else {
            Some(
                LinkServer::open(self.sink.clone(), self.options.clone(), self.store.clone())
                    .await
                    .map_err(HarnessError::from)?,
            )
        };

        let outcome = self.run_phases(plan, embedded, forked, server.as_ref()).await;

        if let Some(server) = server {
            server.terminate().await;
        }
        outcome
    }

    async fn run_phases(
        &self,
        plan: &RunPlan,
        embedded: Vec<(BenchmarkDescriptor, BenchmarkParams)>,
        forked: Vec<(BenchmarkDescriptor, BenchmarkParams)>,
        server: Option<&LinkServer>,
    ) -> Result<()> {
        let bulk = self.options.warmup_mode().is_bulk();

        if bulk || !plan.warmup_only.is_empty() {
            let mut warmup_set: BTreeSet<BenchmarkDescriptor> = plan.warmup_only.clone();
            if bulk {
                warmup_set.extend(plan.measured.iter().cloned());
            }
            info!("Bulk warmup of {} benchmark(s)", warmup_set.len());
            for descriptor in &warmup_set {
                let params = self
                    .registry
                    .params_for(descriptor, &self.options)?
                    .warmup_only();
                self.run_embedded(descriptor, params).await?;
            }
        }

        for (descriptor, params) in embedded {
            let params = if bulk { params.without_warmup() } else { params };
            self.run_embedded(&descriptor, params).await?;
        }

        if let Some(server) = server {
            for (descriptor, params) in forked {
                self.run_forked(server, &descriptor, &params).await?;
            }
        }

        Ok(())
    }

    /// Run a descriptor in this process and merge what it measured
    async fn run_embedded(&self, descriptor: &BenchmarkDescriptor, params: BenchmarkParams) -> Result<()> {
        debug!("Running {} embedded", descriptor);
        let executor = self.executor.clone();
        let sink = self.sink.clone();
        let detailed = self.options.detailed_results();
        let target = descriptor.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            run_benchmark(&target, &params, executor.as_ref(), &sink, detailed)
        })
        .await
        .context("Benchmark task panicked")?;

        match outcome {
            Ok(Some(result)) => {
                self.store.merge(descriptor.clone(), result);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => match e.downcast::<HarnessError>() {
                Ok(failure) => self.report(failure),
                Err(other) => Err(other),
            },
        }
    }

    /// Warmup forks, then real forks, one process at a time
    async fn run_forked(
        &self,
        server: &LinkServer,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
    ) -> Result<()> {
        for i in 1..=params.warmup_forks {
            info!("{}: warmup fork {} of {}", descriptor, i, params.warmup_forks);
            self.sink
                .lock()
                .println(&format!("# Warmup Fork: {} of {}", i, params.warmup_forks))?;
            self.run_fork(server, descriptor, true).await?;
        }

        for i in 1..=params.forks {
            info!("{}: fork {} of {}", descriptor, i, params.forks);
            self.sink
                .lock()
                .println(&format!("# Fork: {} of {}", i, params.forks))?;

            let before = self.store.contributions(descriptor);
            let status = self.run_fork(server, descriptor, false).await?;
            let after = self.store.contributions(descriptor);

            if status.is_some() && after == before && params.measurement.count > 0 {
                let message = format!("WARNING: Forked run of {} reported no results", descriptor);
                warn!("{}", message);
                self.sink.lock().println(&message)?;
            }
        }

        Ok(())
    }

    /// Launch one worker and wait for it and its link handler. Returns the
    /// exit status, or `None` if the process could not be run.
    async fn run_fork(
        &self,
        server: &LinkServer,
        descriptor: &BenchmarkDescriptor,
        warmup_fork: bool,
    ) -> Result<Option<ExitStatus>> {
        let spawn_failure = |source: std::io::Error| HarnessError::WorkerSpawn {
            descriptor: descriptor.clone(),
            source,
        };

        let mut cmd = match self
            .fork_command
            .build(&server.host(), server.port(), descriptor, warmup_fork)
        {
            Ok(cmd) => cmd,
            Err(e) => {
                let source = std::io::Error::new(std::io::ErrorKind::NotFound, format!("{:#}", e));
                self.report(spawn_failure(source))?;
                return Ok(None);
            }
        };

        let status = match cmd.status().await {
            Ok(status) => status,
            Err(source) => {
                self.report(spawn_failure(source))?;
                return Ok(None);
            }
        };

        server.wait_finish().await;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let message = format!("WARNING: Forked process returned code: {}", code);
            warn!("{} for {}", message, descriptor);
            self.sink.lock().println(&message)?;

            let failure = HarnessError::WorkerExit {
                descriptor: descriptor.clone(),
                code,
            };
            if failure.is_fatal_under(self.options.fail_on_error()) {
                return Err(failure.into());
            }
        }

        Ok(Some(status))
    }

    /// Report a run-time failure through the sink; fatal ones are returned
    fn report(&self, failure: HarnessError) -> Result<()> {
        warn!("{}", failure);
        self.sink.lock().exception(&failure.to_string())?;
        if failure.is_fatal_under(self.options.fail_on_error()) {
            return Err(failure.into());
        }
        Ok(())
    }
}
