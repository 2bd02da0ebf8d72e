use anyhow::Result;
use benchfork::link::{LinkClient, LinkServer};
use benchfork::results::{IterationKind, IterationSample, ThreadResult};
use benchfork::{
    shared, BenchmarkDescriptor, Mode, RecordingSink, ResultStore, ResultValue, RunOptions,
    RunResult, TimeUnit,
};
use std::sync::Arc;

fn run_of(operations: u64, duration_ns: u64) -> RunResult {
    let value = ResultValue::throughput("bench", operations, duration_ns, TimeUnit::Seconds);
    let sample = IterationSample::from_threads(
        1,
        IterationKind::Measurement,
        duration_ns,
        vec![ThreadResult::new(value)],
    )
    .expect("one thread value");
    RunResult::from_iterations(&[sample]).expect("one measurement iteration")
}

/// Play one forked worker: handshake, report, finish.
async fn fork(port: u16, descriptor: BenchmarkDescriptor, result: RunResult) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let client = LinkClient::connect(benchfork::link::LINK_HOST, port)?;
        client.request_options()?;
        client.report(&descriptor, &result)?;
        client.finish()?;
        Ok(())
    })
    .await?
}

async fn merged_score(runs: Vec<(u64, u64)>) -> Result<(f64, u32)> {
    let store = ResultStore::new();
    let server = LinkServer::open(
        shared(RecordingSink::new()),
        Arc::new(RunOptions::default()),
        store.clone(),
    )
    .await?;
    let descriptor = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);

    // forks run one after another, with the barrier in between
    for (operations, duration_ns) in runs {
        fork(server.port(), descriptor.clone(), run_of(operations, duration_ns)).await?;
        server.wait_finish().await;
        assert_eq!(server.active_handlers(), 0);
    }
    server.terminate().await;

    let merged = store.get(&descriptor).expect("merged result");
    let score = merged.primary().score().expect("defined score");
    Ok((score, merged.contributions()))
}

#[tokio::test(flavor = "multi_thread")]
async fn two_forks_sum_counts_and_time() -> Result<()> {
    let (score, contributions) =
        merged_score(vec![(1000, 1_000_000_000), (2000, 1_000_000_000)]).await?;
    assert!((score - 1500.0).abs() < 1e-9);
    assert_eq!(contributions, 2);
    Ok(())
}

/// With unequal fork durations the merged rate is Σops / Σtime, not the
/// mean of the two rates (which would be ~833.3).
#[tokio::test(flavor = "multi_thread")]
async fn unequal_forks_sum_then_divide() -> Result<()> {
    let (score, contributions) =
        merged_score(vec![(1000, 1_000_000_000), (2000, 3_000_000_000)]).await?;
    assert!((score - 750.0).abs() < 1e-9);
    assert_eq!(contributions, 2);
    Ok(())
}

/// Reports on concurrent connections land in the same store regardless of
/// arrival order.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_reports_merge_order_independently() -> Result<()> {
    let store = ResultStore::new();
    let server = LinkServer::open(
        shared(RecordingSink::new()),
        Arc::new(RunOptions::default()),
        store.clone(),
    )
    .await?;
    let descriptor = BenchmarkDescriptor::new("bench", Mode::Throughput, 1);

    let forks: Vec<_> = [(1000, 1_000_000_000), (2000, 3_000_000_000), (500, 500_000_000)]
        .into_iter()
        .map(|(ops, ns)| fork(server.port(), descriptor.clone(), run_of(ops, ns)))
        .collect();
    for outcome in join_all(forks).await {
        outcome?;
    }
    server.wait_finish().await;
    server.terminate().await;

    let merged = store.get(&descriptor).expect("merged result");
    assert_eq!(merged.contributions(), 3);
    // 3500 ops over 4.5 s
    let score = merged.primary().score().expect("defined score");
    assert!((score - 3500.0 / 4.5).abs() < 1e-9);
    Ok(())
}

async fn join_all<F: std::future::Future<Output = Result<()>> + Send + 'static>(
    futures: Vec<F>,
) -> Vec<Result<()>> {
    let handles: Vec<_> = futures.into_iter().map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.map_err(anyhow::Error::from).and_then(|r| r));
    }
    out
}
