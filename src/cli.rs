use crate::descriptor::Mode;
use crate::error::HarnessError;
use crate::options::WarmupMode;
use crate::results::TimeUnit;
use crate::worker::WorkerArgs;
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// benchfork - run benchmarks under controlled warmup and measurement, in
/// this process or in forked workers
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Benchmarks to run (regular expressions; all benchmarks if omitted)
    #[clap(value_name = "REGEX", help_heading = "Selection")]
    pub includes: Vec<String>,

    /// Benchmarks to exclude (regular expressions)
    #[clap(short = 'e', long = "exclude", value_name = "REGEX", help_heading = "Selection")]
    pub excludes: Vec<String>,

    /// Extra benchmarks to run for warmup only (regular expressions)
    #[clap(long = "warmup-benchmark", value_name = "REGEX", help_heading = "Selection")]
    pub warmup_benchmarks: Vec<String>,

    /// List matching benchmarks and exit
    #[clap(short = 'l', long, default_value_t = false, help_heading = "Selection")]
    pub list: bool,

    /// Benchmark modes, replacing each benchmark's own (comma-separated: thrpt, avgt, sample, ss, or all)
    #[clap(
        short = 'm',
        long = "mode",
        value_enum,
        num_args = 1,
        value_delimiter = ',',
        help_heading = "Execution"
    )]
    pub modes: Vec<Mode>,

    /// Number of warmup iterations
    #[clap(short = 'w', long, help_heading = "Execution")]
    pub warmup_iterations: Option<u32>,

    /// Duration of each warmup iteration
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Execution")]
    pub warmup_time: Duration,

    /// Number of measurement iterations
    #[clap(short = 'i', long, help_heading = "Execution")]
    pub iterations: Option<u32>,

    /// Duration of each measurement iteration
    #[clap(short = 'r', long, value_parser = parse_duration, default_value = "1s", help_heading = "Execution")]
    pub time: Duration,

    /// Worker processes per benchmark (0 runs in this process)
    #[clap(short = 'f', long, help_heading = "Execution")]
    pub forks: Option<u32>,

    /// Disposable warmup processes per benchmark, launched before the real forks
    #[clap(long, help_heading = "Execution")]
    pub warmup_forks: Option<u32>,

    /// When warmup runs relative to measurement
    #[clap(long, value_enum, default_value_t = WarmupMode::None, help_heading = "Execution")]
    pub warmup_mode: WarmupMode,

    /// Threads per benchmark, replacing each benchmark's own
    #[clap(short = 't', long, help_heading = "Execution")]
    pub threads: Option<u32>,

    /// Start every iteration's threads together
    #[clap(long, default_value_t = true, action = ArgAction::Set, help_heading = "Execution")]
    pub sync_iterations: bool,

    /// Abort the whole run on the first benchmark or worker failure
    #[clap(long, default_value_t = false, help_heading = "Execution")]
    pub fail_on_error: bool,

    /// Time unit for scores (default: ops/s for throughput, us/op otherwise)
    #[clap(long, value_enum, help_heading = "Output")]
    pub time_unit: Option<TimeUnit>,

    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Pretty, help_heading = "Output")]
    pub format: OutputFormat,

    /// Write human-readable output to this file instead of stdout
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output: Option<PathBuf>,

    /// Write machine-readable results (JSON) to this file
    #[clap(long, help_heading = "Output")]
    pub result_file: Option<PathBuf>,

    /// Print per-thread results for each measurement iteration
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub details: bool,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false, help_heading = "Output")]
    pub verbose: bool,

    /// Internal flag: run as a forked worker
    #[clap(long, hide = true, default_value_t = false)]
    pub internal_worker: bool,

    /// Internal: parent link host
    #[clap(long, hide = true)]
    pub link_host: Option<String>,

    /// Internal: parent link port
    #[clap(long, hide = true)]
    pub link_port: Option<u16>,

    /// Internal: benchmark to run in this worker
    #[clap(long, hide = true)]
    pub benchmark: Option<String>,

    /// Internal: mode of the benchmark to run in this worker
    #[clap(long, hide = true, value_enum)]
    pub benchmark_mode: Option<Mode>,

    /// Internal: thread count of the benchmark to run in this worker
    #[clap(long, hide = true)]
    pub benchmark_threads: Option<u32>,
}

impl Args {
    /// Worker launch parameters; a configuration error if any is missing
    pub fn worker_args(&self) -> Result<WorkerArgs, HarnessError> {
        fn required<T: Clone>(value: &Option<T>, flag: &str) -> Result<T, HarnessError> {
            value
                .clone()
                .ok_or_else(|| HarnessError::Config(format!("Worker mode requires {}", flag)))
        }

        Ok(WorkerArgs {
            host: required(&self.link_host, "--link-host")?,
            port: required(&self.link_port, "--link-port")?,
            benchmark: required(&self.benchmark, "--benchmark")?,
            mode: required(&self.benchmark_mode, "--benchmark-mode")?,
            threads: required(&self.benchmark_threads, "--benchmark-threads")?,
            warmup_iterations: self.warmup_iterations,
            iterations: self.iterations,
        })
    }
}

/// Output format of the parent's sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[clap(name = "pretty")]
    Pretty,

    /// No output
    #[clap(name = "silent")]
    Silent,
}

/// Parse duration string (e.g., "10s", "500ms", "1m", "1.5s")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration {}: {}", s, e))
}
