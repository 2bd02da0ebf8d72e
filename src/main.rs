//! # benchfork - Main Entry Point
//!
//! The same binary plays two roles:
//!
//! - **Host** (default): resolves the benchmark set from the command line,
//!   runs embedded benchmarks itself and launches workers for forked ones.
//! - **Fork** (`--internal-worker`): runs exactly one benchmark descriptor
//!   for its parent and reports back over the link.
//!
//! ## Exit Codes
//!
//! The host exits 1 when the run failed fatally (configuration error, or any
//! failure under `--fail-on-error`). A worker exits non-zero when its link
//! broke or when its benchmark failed under `--fail-on-error`.

use anyhow::Result;
use benchfork::{
    cli::{Args, OutputFormat},
    coordinator::RunCoordinator,
    logging::{self, ProcessRole},
    options::RunOptions,
    samples,
    sink::{shared, PrettyPrintSink, SharedSink, SilentSink},
    worker::run_worker,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = if args.internal_worker {
        logging::init(ProcessRole::Fork, args.verbose);
        match worker_main(&args).await {
            Ok(code) => code,
            Err(e) => {
                error!("Worker failed: {:#}", e);
                1
            }
        }
    } else {
        logging::init(ProcessRole::Host, args.verbose);
        match host_main(&args).await {
            Ok(()) => 0,
            Err(e) => {
                error!("{:#}", e);
                1
            }
        }
    };

    std::process::exit(code);
}

/// Run the whole invocation in the host role
async fn host_main(args: &Args) -> Result<()> {
    info!("Starting benchfork {}", benchfork::VERSION);
    let options = RunOptions::from_args(args)?;
    let sink = open_sink(&options)?;
    let registry = Arc::new(samples::registry()?);

    let results = RunCoordinator::new(registry, options, sink).run().await?;
    info!("Run finished with {} result(s)", results.len());
    Ok(())
}

/// Run one forked descriptor; the worker is blocking, so it gets its own thread
async fn worker_main(args: &Args) -> Result<i32> {
    let worker = args.worker_args()?;
    let registry = Arc::new(samples::registry()?);
    tokio::task::spawn_blocking(move || run_worker(&worker, registry)).await?
}

fn open_sink(options: &RunOptions) -> Result<SharedSink> {
    let sink = match (options.output_format(), options.output()) {
        (OutputFormat::Silent, _) => shared(SilentSink),
        (OutputFormat::Pretty, Some(path)) => {
            shared(PrettyPrintSink::to_file(path, options.verbose())?)
        }
        (OutputFormat::Pretty, None) => shared(PrettyPrintSink::stdout(options.verbose())),
    };
    Ok(sink)
}
