use anyhow::Result;
use benchfork::{shared, samples, RunCoordinator, RunOptions, SilentSink};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn result_file_lists_every_measured_benchmark() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.json");

    let options = RunOptions::builder()
        .include("^baseline$|^cpu_burn_small$")
        .forks(0)
        .warmup_iterations(0)
        .measurement_iterations(2)
        .measurement_time(Duration::from_millis(10))
        .result_file(&path)
        .build()?;

    RunCoordinator::new(Arc::new(samples::registry()?), options, shared(SilentSink))
        .run()
        .await?;

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let benchmarks = json["benchmarks"].as_array().expect("benchmarks array");
    let names: Vec<&str> = benchmarks
        .iter()
        .filter_map(|b| b["name"].as_str())
        .collect();
    assert_eq!(names, vec!["baseline", "cpu_burn_small"]);

    for entry in benchmarks {
        assert_eq!(entry["runs"], 1);
        assert_eq!(entry["iterations"], 2);
        assert_eq!(entry["unit"], "ops/s");
    }
    assert_eq!(json["metadata"]["version"], benchfork::VERSION);
    assert!(json["metadata"]["run_id"].is_string());
    Ok(())
}

#[tokio::test]
async fn no_result_file_when_run_aborts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.json");

    let options = RunOptions::builder()
        .include("^failing$")
        .forks(0)
        .warmup_iterations(0)
        .measurement_iterations(1)
        .measurement_time(Duration::from_millis(10))
        .fail_on_error(true)
        .result_file(&path)
        .build()?;

    let outcome = RunCoordinator::new(Arc::new(samples::registry()?), options, shared(SilentSink))
        .run()
        .await;

    assert!(outcome.is_err());
    assert!(!path.exists());
    Ok(())
}
