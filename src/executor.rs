//! # Benchmark Execution
//!
//! The harness only needs one thing from an executor: run one iteration of a
//! descriptor and hand back its [`IterationSample`]. [`TimedLoopExecutor`] is
//! the built-in implementation. It runs a registered workload on
//! `descriptor.threads()` OS threads until the iteration time is used up, and
//! turns what it observed into per-thread result values for the descriptor's
//! mode:
//!
//! - **Throughput / AverageTime**: invocations completed and time taken
//! - **SampleTime**: every invocation timed individually
//! - **SingleShot**: exactly one timed invocation per thread
//!
//! When `sync_iterations` is set, threads start timing together behind a
//! barrier.

use crate::descriptor::{BenchmarkDescriptor, Mode};
use crate::options::{BenchmarkParams, IterationParams};
use crate::registry::{BenchmarkRegistry, Workload};
use crate::results::{
    IterationKind, IterationSample, ResultValue, SampleRecorder, ThreadResult, TimeUnit,
};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::{Arc, Barrier};
use std::time::Instant;

/// Where a workload invocation sits within the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvocationContext {
    pub kind: IterationKind,
    /// 1-based iteration index
    pub iteration: u32,
    /// 0-based invocation index within the iteration, per thread
    pub invocation: u64,
    /// 0-based thread index
    pub thread: u32,
}

impl InvocationContext {
    /// Whether this is the thread's first call in the current iteration
    pub fn is_first_call(&self) -> bool {
        self.invocation == 0
    }
}

/// Runs single iterations of a benchmark descriptor
pub trait BenchmarkExecutor: Send + Sync {
    fn run_iteration(
        &self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        kind: IterationKind,
        index: u32,
    ) -> Result<IterationSample>;
}

/// Executor that loops registered workloads for the iteration duration
#[derive(Clone)]
pub struct TimedLoopExecutor {
    registry: Arc<BenchmarkRegistry>,
}

impl TimedLoopExecutor {
    pub fn new(registry: Arc<BenchmarkRegistry>) -> Self {
        Self { registry }
    }
}

impl BenchmarkExecutor for TimedLoopExecutor {
    fn run_iteration(
        &self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        kind: IterationKind,
        index: u32,
    ) -> Result<IterationSample> {
        let definition = self.registry.get(descriptor.name())?;
        let workload = definition.workload();
        let iteration = params.iteration(kind);
        let threads = descriptor.threads();
        let barrier = Arc::new(Barrier::new(threads as usize));

        let started = Instant::now();
        let outcomes: Vec<Result<ThreadResult>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|thread| {
                    let barrier = barrier.clone();
                    let workload = workload.clone();
                    let slot = ThreadSlot {
                        descriptor,
                        unit: params.time_unit,
                        iteration,
                        kind,
                        index,
                        thread,
                    };
                    scope.spawn(move || {
                        if params.sync_iterations {
                            barrier.wait();
                        }
                        slot.run(&workload)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(anyhow!("Benchmark thread panicked")))
                })
                .collect()
        });
        let elapsed_ns = duration_ns(started);

        let results = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
        IterationSample::from_threads(index, kind, elapsed_ns, results)
            .ok_or_else(|| anyhow!("No thread reported a result for {}", descriptor))
    }
}

/// One thread's share of an iteration
struct ThreadSlot<'a> {
    descriptor: &'a BenchmarkDescriptor,
    unit: TimeUnit,
    iteration: IterationParams,
    kind: IterationKind,
    index: u32,
    thread: u32,
}

impl ThreadSlot<'_> {
    fn context(&self, invocation: u64) -> InvocationContext {
        InvocationContext {
            kind: self.kind,
            iteration: self.index,
            invocation,
            thread: self.thread,
        }
    }

    fn invoke(&self, workload: &Workload, invocation: u64) -> Result<()> {
        workload(&self.context(invocation)).with_context(|| {
            format!(
                "{} failed on thread {} in iteration {}",
                self.descriptor.name(),
                self.thread,
                self.index
            )
        })
    }

    fn run(&self, workload: &Workload) -> Result<ThreadResult> {
        let label = self.descriptor.name();
        let budget = self.iteration.time;

        let value = match self.descriptor.mode() {
            Mode::Throughput | Mode::AverageTime => {
                let start = Instant::now();
                let mut operations = 0u64;
                loop {
                    self.invoke(workload, operations)?;
                    operations += 1;
                    if start.elapsed() >= budget {
                        break;
                    }
                }
                let elapsed = duration_ns(start);
                if self.descriptor.mode() == Mode::Throughput {
                    ResultValue::throughput(label, operations, elapsed, self.unit)
                } else {
                    ResultValue::average_time(label, operations, elapsed, self.unit)
                }
            }
            Mode::SampleTime => {
                let mut recorder =
                    SampleRecorder::new().context("failed to create sample histogram")?;
                let start = Instant::now();
                let mut invocation = 0u64;
                loop {
                    let call = Instant::now();
                    self.invoke(workload, invocation)?;
                    recorder.record(duration_ns(call));
                    invocation += 1;
                    if start.elapsed() >= budget {
                        break;
                    }
                }
                ResultValue::sample_time(label, recorder.finish(), self.unit)
            }
            Mode::SingleShot => {
                let call = Instant::now();
                self.invoke(workload, 0)?;
                ResultValue::single_shot(label, duration_ns(call), self.unit)
            }
            Mode::All => bail!("{} must be expanded to concrete modes before running", label),
        };

        Ok(ThreadResult::new(value))
    }
}

fn duration_ns(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BenchmarkDefinition;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn params(threads: u32) -> BenchmarkParams {
        let iteration = IterationParams {
            count: 1,
            time: Duration::from_millis(20),
        };
        BenchmarkParams {
            warmup: iteration,
            measurement: iteration,
            threads,
            sync_iterations: true,
            time_unit: TimeUnit::Seconds,
            forks: 0,
            warmup_forks: 0,
        }
    }

    fn executor_with(definition: BenchmarkDefinition) -> TimedLoopExecutor {
        let mut registry = BenchmarkRegistry::new();
        registry.register(definition).unwrap();
        TimedLoopExecutor::new(Arc::new(registry))
    }

    #[test]
    fn test_throughput_counts_invocations() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let executor = executor_with(BenchmarkDefinition::new("count", move |_ctx: &InvocationContext| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
        let d = BenchmarkDescriptor::new("count", Mode::Throughput, 2);

        let sample = executor
            .run_iteration(&d, &params(2), IterationKind::Measurement, 1)
            .unwrap();

        assert_eq!(sample.raw_primary.len(), 2);
        let reported: u64 = sample
            .raw_primary
            .iter()
            .map(|v| match v.measurement() {
                crate::results::Measurement::Throughput { operations, .. } => *operations,
                other => panic!("unexpected measurement {:?}", other),
            })
            .sum();
        assert_eq!(reported, calls.load(Ordering::Relaxed));
        assert!(sample.primary.score().unwrap() > 0.0);
    }

    #[test]
    fn test_single_shot_invokes_once_per_thread() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let executor = executor_with(BenchmarkDefinition::new("once", move |ctx: &InvocationContext| {
            assert!(ctx.is_first_call());
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));
        let d = BenchmarkDescriptor::new("once", Mode::SingleShot, 3);

        executor
            .run_iteration(&d, &params(3), IterationKind::Warmup, 1)
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_sample_time_records_every_call() {
        let executor = executor_with(BenchmarkDefinition::new("sampled", |_ctx: &InvocationContext| {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }));
        let d = BenchmarkDescriptor::new("sampled", Mode::SampleTime, 1);
        let sample = executor
            .run_iteration(&d, &params(1), IterationKind::Measurement, 1)
            .unwrap();
        match sample.primary.measurement() {
            crate::results::Measurement::SampleTime { samples } => {
                assert!(!samples.is_empty());
                assert!(samples.total_ns() >= samples.len() * 1_000_000);
                assert!(samples.histogram().unwrap().value_at_quantile(0.0) >= 1_000_000);
            }
            other => panic!("unexpected measurement {:?}", other),
        }
    }

    #[test]
    fn test_workload_error_fails_iteration() {
        let executor = executor_with(BenchmarkDefinition::new("broken", |_ctx: &InvocationContext| {
            Err(anyhow!("boom"))
        }));
        let d = BenchmarkDescriptor::new("broken", Mode::Throughput, 1);
        let err = executor
            .run_iteration(&d, &params(1), IterationKind::Measurement, 1)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("boom"));
    }

    #[test]
    fn test_unknown_benchmark() {
        let executor = TimedLoopExecutor::new(Arc::new(BenchmarkRegistry::new()));
        let d = BenchmarkDescriptor::new("missing", Mode::Throughput, 1);
        assert!(executor
            .run_iteration(&d, &params(1), IterationKind::Measurement, 1)
            .is_err());
    }
}
