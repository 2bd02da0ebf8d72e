use anyhow::Result;
use benchfork::{
    shared, BenchmarkDefinition, BenchmarkRegistry, InvocationContext, RecordingSink,
    RunCoordinator, RunOptions, WarmupMode,
};
use benchfork::results::IterationKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Registry with "big" and "small", each appending one letter per
/// iteration (uppercase for "big") on its first call of that iteration.
fn tracing_registry(trace: Arc<Mutex<String>>) -> Result<BenchmarkRegistry> {
    let mut registry = BenchmarkRegistry::new();
    for (name, warmup, measure) in [("big", 'W', 'I'), ("small", 'w', 'i')] {
        let trace = trace.clone();
        registry.register(BenchmarkDefinition::new(name, move |ctx: &InvocationContext| {
            if ctx.is_first_call() && ctx.thread == 0 {
                trace.lock().push(match ctx.kind {
                    IterationKind::Warmup => warmup,
                    IterationKind::Measurement => measure,
                });
            }
            Ok(())
        }))?;
    }
    Ok(registry)
}

fn embedded() -> benchfork::options::RunOptionsBuilder {
    RunOptions::builder()
        .include("big")
        .include("small")
        .forks(0)
        .warmup_iterations(2)
        .warmup_time(Duration::from_millis(5))
        .measurement_iterations(1)
        .measurement_time(Duration::from_millis(5))
}

/// Both descriptors are warmed before either is measured.
#[tokio::test]
async fn before_any_warms_everything_first() -> Result<()> {
    let trace = Arc::new(Mutex::new(String::new()));
    let registry = Arc::new(tracing_registry(trace.clone())?);
    let options = embedded().warmup_mode(WarmupMode::BeforeAny).build()?;

    let results = RunCoordinator::new(registry, options, shared(RecordingSink::new()))
        .run()
        .await?;

    assert_eq!(trace.lock().as_str(), "WWwwIi");
    assert_eq!(results.len(), 2);
    Ok(())
}

/// Without bulk warmup each descriptor runs its own full cycle in turn.
#[tokio::test]
async fn inline_warmup_runs_per_descriptor() -> Result<()> {
    let trace = Arc::new(Mutex::new(String::new()));
    let registry = Arc::new(tracing_registry(trace.clone())?);
    let options = embedded().build()?;

    RunCoordinator::new(registry, options, shared(RecordingSink::new()))
        .run()
        .await?;

    assert_eq!(trace.lock().as_str(), "WWIwwi");
    Ok(())
}

/// Warmup-only benchmarks are warmed in the bulk pass and never measured.
#[tokio::test]
async fn warmup_only_benchmarks_are_not_measured() -> Result<()> {
    let trace = Arc::new(Mutex::new(String::new()));
    let registry = Arc::new(tracing_registry(trace.clone())?);
    let options = RunOptions::builder()
        .include("^small$")
        .include_warmup("^big$")
        .forks(0)
        .warmup_iterations(2)
        .warmup_time(Duration::from_millis(5))
        .measurement_iterations(1)
        .measurement_time(Duration::from_millis(5))
        .build()?;

    let results = RunCoordinator::new(registry, options, shared(RecordingSink::new()))
        .run()
        .await?;

    // "small" keeps its own warmup outside BEFORE_ANY
    assert_eq!(trace.lock().as_str(), "WWwwi");
    assert_eq!(results.len(), 1);
    assert!(results.keys().all(|d| d.name() == "small"));
    Ok(())
}
