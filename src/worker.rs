//! # Forked Worker
//!
//! Entry point of a worker process. The parent launches the harness binary
//! again with `--internal-worker` plus the link address and the one
//! descriptor to run. The worker then:
//!
//! 1. connects to the parent's link server, before anything else,
//! 2. asks for the parent's resolved [`RunOptions`],
//! 3. applies its own forced iteration overrides (warmup forks),
//! 4. runs the descriptor with every sink call forwarded over the link,
//! 5. reports the result, if any, and sends `Finish`.
//!
//! Link failures abort the worker with an error. Benchmark failures are
//! forwarded as an `exception` and turned into the exit code.

use crate::descriptor::{BenchmarkDescriptor, Mode};
use crate::error::HarnessError;
use crate::executor::TimedLoopExecutor;
use crate::link::{LinkClient, LinkSink};
use crate::registry::BenchmarkRegistry;
use crate::runner::run_benchmark;
use crate::sink::shared;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a worker was launched to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub host: String,
    pub port: u16,
    pub benchmark: String,
    pub mode: Mode,
    pub threads: u32,
    /// Forced warmup iteration count, beating the parent's options
    pub warmup_iterations: Option<u32>,
    /// Forced measurement iteration count, beating the parent's options
    pub iterations: Option<u32>,
}

impl WorkerArgs {
    pub fn descriptor(&self) -> BenchmarkDescriptor {
        BenchmarkDescriptor::new(self.benchmark.clone(), self.mode, self.threads)
    }
}

/// Run one forked descriptor against the parent's link. Blocking.
///
/// Returns the process exit code: 0 on success, 1 when the benchmark failed
/// under fail-on-error.
pub fn run_worker(args: &WorkerArgs, registry: Arc<BenchmarkRegistry>) -> Result<i32> {
    let client = Arc::new(
        LinkClient::connect(&args.host, args.port)
            .with_context(|| format!("Failed to connect to parent at {}:{}", args.host, args.port))?,
    );

    let options = client
        .request_options()
        .context("Failed to receive run options from parent")?
        .with_iteration_overrides(args.warmup_iterations, args.iterations);

    let descriptor = args.descriptor();
    let params = registry.params_for(&descriptor, &options)?;
    info!("Worker running {}", descriptor);

    let executor = TimedLoopExecutor::new(registry);
    let sink = shared(LinkSink::new(client.clone()));

    let code = match run_benchmark(
        &descriptor,
        &params,
        &executor,
        &sink,
        options.detailed_results(),
    ) {
        Ok(Some(result)) => {
            client.report(&descriptor, &result)?;
            debug!("Reported {} iteration(s) for {}", result.iteration_scores().len(), descriptor);
            0
        }
        Ok(None) => 0,
        Err(e) => match e.downcast::<HarnessError>() {
            Ok(failure @ HarnessError::BenchmarkFailed { .. }) => {
                warn!("{}", failure);
                sink.lock().exception(&failure.to_string())?;
                if failure.is_fatal_under(options.fail_on_error()) {
                    1
                } else {
                    0
                }
            }
            Ok(other) => return Err(other.into()),
            Err(other) => return Err(other),
        },
    };

    sink.lock().flush()?;
    client.finish()?;
    Ok(code)
}
