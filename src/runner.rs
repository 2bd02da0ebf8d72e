//! The per-descriptor warmup/measurement cycle, shared by embedded runs in
//! the parent and by forked workers.

use crate::descriptor::BenchmarkDescriptor;
use crate::error::HarnessError;
use crate::executor::BenchmarkExecutor;
use crate::options::BenchmarkParams;
use crate::results::{IterationKind, IterationSample, RunResult};
use crate::sink::SharedSink;
use anyhow::Result;
use tracing::debug;

/// Run one descriptor through its full cycle:
///
/// `benchmark_start`, the warmup iterations, the measurement iterations
/// (each bracketed by `iteration_start` / `iteration_end`), then
/// `benchmark_end` with the aggregated result.
///
/// Returns `Ok(None)` when no measurement iteration ran. An executor failure
/// comes back as [`HarnessError::BenchmarkFailed`] and abandons the
/// descriptor; nothing partial is returned for it. Sink failures propagate
/// unchanged.
pub fn run_benchmark(
    descriptor: &BenchmarkDescriptor,
    params: &BenchmarkParams,
    executor: &dyn BenchmarkExecutor,
    sink: &SharedSink,
    detailed_results: bool,
) -> Result<Option<RunResult>> {
    sink.lock().benchmark_start(descriptor, params)?;

    let mut samples: Vec<IterationSample> = Vec::with_capacity(params.measurement.count as usize);
    for kind in [IterationKind::Warmup, IterationKind::Measurement] {
        for index in 1..=params.iteration(kind).count {
            sink.lock().iteration_start(descriptor, params, index, kind)?;

            let sample = executor
                .run_iteration(descriptor, params, kind, index)
                .map_err(|e| HarnessError::BenchmarkFailed {
                    descriptor: descriptor.clone(),
                    message: format!("{:#}", e),
                })?;

            {
                let mut sink = sink.lock();
                sink.iteration_end(descriptor, params, index, kind, &sample)?;
                if detailed_results && kind == IterationKind::Measurement {
                    sink.detailed_results(descriptor, index, &sample)?;
                }
            }

            if kind == IterationKind::Measurement {
                samples.push(sample);
            }
        }
    }

    let result = RunResult::from_iterations(&samples);
    debug!(
        "{} finished with {} measurement iteration(s)",
        descriptor,
        samples.len()
    );
    sink.lock().benchmark_end(descriptor, result.as_ref())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Mode;
    use crate::link::SinkCall;
    use crate::options::IterationParams;
    use crate::results::{ResultValue, ThreadResult, TimeUnit};
    use crate::sink::{shared, RecordingSink, SinkEvent};
    use anyhow::anyhow;
    use std::time::Duration;

    /// Executor reporting a fixed 100 ops per 1 s per iteration
    struct FixedExecutor {
        fail_at: Option<(IterationKind, u32)>,
    }

    impl BenchmarkExecutor for FixedExecutor {
        fn run_iteration(
            &self,
            descriptor: &BenchmarkDescriptor,
            params: &BenchmarkParams,
            kind: IterationKind,
            index: u32,
        ) -> Result<IterationSample> {
            if self.fail_at == Some((kind, index)) {
                return Err(anyhow!("induced failure"));
            }
            let value = ResultValue::throughput(descriptor.name(), 100, 1_000_000_000, params.time_unit);
            Ok(IterationSample::from_threads(index, kind, 1_000_000_000, vec![ThreadResult::new(value)])
                .unwrap())
        }
    }

    fn params(warmup: u32, measurement: u32) -> BenchmarkParams {
        BenchmarkParams {
            warmup: IterationParams {
                count: warmup,
                time: Duration::from_secs(1),
            },
            measurement: IterationParams {
                count: measurement,
                time: Duration::from_secs(1),
            },
            threads: 1,
            sync_iterations: true,
            time_unit: TimeUnit::Seconds,
            forks: 0,
            warmup_forks: 0,
        }
    }

    fn iteration_kinds(events: &[SinkEvent]) -> Vec<(IterationKind, u32)> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Call(SinkCall::IterationStart { kind, index, .. }) => Some((*kind, *index)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_cycle() {
        let recorder = RecordingSink::new();
        let sink = shared(recorder.clone());
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);

        let result = run_benchmark(&d, &params(2, 3), &FixedExecutor { fail_at: None }, &sink, true)
            .unwrap()
            .unwrap();

        assert_eq!(result.primary().score(), Some(100.0));
        assert_eq!(result.iteration_scores().len(), 3);

        let events = recorder.events();
        assert!(matches!(events.first(), Some(SinkEvent::Call(SinkCall::BenchmarkStart { .. }))));
        assert!(matches!(events.last(), Some(SinkEvent::Call(SinkCall::BenchmarkEnd { result: Some(_), .. }))));
        assert_eq!(
            iteration_kinds(&events),
            vec![
                (IterationKind::Warmup, 1),
                (IterationKind::Warmup, 2),
                (IterationKind::Measurement, 1),
                (IterationKind::Measurement, 2),
                (IterationKind::Measurement, 3),
            ]
        );
        let detailed = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Call(SinkCall::DetailedResults { .. })))
            .count();
        assert_eq!(detailed, 3);
    }

    #[test]
    fn test_warmup_only_returns_none() {
        let recorder = RecordingSink::new();
        let sink = shared(recorder.clone());
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);

        let result = run_benchmark(&d, &params(1, 0), &FixedExecutor { fail_at: None }, &sink, false).unwrap();

        assert!(result.is_none());
        assert!(matches!(
            recorder.events().last(),
            Some(SinkEvent::Call(SinkCall::BenchmarkEnd { result: None, .. }))
        ));
    }

    #[test]
    fn test_executor_failure_abandons_descriptor() {
        let recorder = RecordingSink::new();
        let sink = shared(recorder.clone());
        let d = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);
        let executor = FixedExecutor {
            fail_at: Some((IterationKind::Measurement, 2)),
        };

        let err = run_benchmark(&d, &params(0, 3), &executor, &sink, false).unwrap_err();

        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::BenchmarkFailed { message, .. }) => {
                assert!(message.contains("induced failure"))
            }
            other => panic!("unexpected error {:?}", other),
        }
        // never reached benchmark_end
        assert!(!recorder
            .events()
            .iter()
            .any(|e| matches!(e, SinkEvent::Call(SinkCall::BenchmarkEnd { .. }))));
    }
}
