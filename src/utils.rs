//! # Utility Functions
//!
//! Small helpers shared by the sinks, the orchestrator and the report writer.
//! Durations and summary tables are formatted here, iteration scores are
//! summarized, and the binary that forked workers re-execute is located.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Name of the harness binary, used when re-executing as a worker
pub const BINARY_NAME: &str = "benchfork";

/// Generate a unique identifier for one harness invocation
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Format a duration in a human-readable way
///
/// Automatically selects the most appropriate unit based on magnitude:
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: compound format (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use benchfork::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Calculate basic statistics for a set of values
///
/// Returns `(mean, min, max, standard_deviation)`, using the population
/// standard deviation. An empty slice yields all zeros.
pub fn calculate_stats(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let sum: f64 = values.iter().sum();
    let count = values.len() as f64;
    let mean = sum / count;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();

    (mean, min, max, std_dev)
}

/// Format a table row with left-aligned columns and pipe separators
///
/// Columns beyond the end of `widths` fall back to a width of 10.
///
/// ```rust
/// # use benchfork::utils::{format_table_row, format_table_separator};
/// let widths = [9, 5];
/// assert_eq!(format_table_separator(&widths), "+-----------+-------+");
/// assert_eq!(format_table_row(&["Benchmark", "Mode"], &widths), "| Benchmark | Mode  |");
/// ```
pub fn format_table_row(columns: &[&str], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        row.push_str(&format!(" {:width$} |", column, width = width));
    }
    row
}

/// Format a horizontal separator matching [`format_table_row`] widths
pub fn format_table_separator(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for &width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

/// Locate the binary that forked workers should execute.
///
/// When running tests, `current_exe()` points to the test runner rather than
/// the harness binary, so resolution goes:
/// 1) the current executable if its file name is the harness binary,
/// 2) `CARGO_BIN_EXE_benchfork` if Cargo set it,
/// 3) `target/debug/benchfork` under the manifest directory.
pub fn resolve_worker_binary() -> Result<PathBuf> {
    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let current_name = current_exe.file_stem().and_then(|n| n.to_str());
    if current_name == Some(BINARY_NAME) {
        return Ok(current_exe);
    }

    if let Ok(p) = std::env::var("CARGO_BIN_EXE_benchfork") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Ok(path);
        }
    }

    let fallback = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("debug")
        .join(BINARY_NAME);
    if fallback.exists() {
        return Ok(fallback);
    }

    Err(anyhow!(
        "Could not resolve '{}' binary for forked runs. Build it with `cargo build --bin {}`.",
        BINARY_NAME,
        BINARY_NAME
    ))
}
