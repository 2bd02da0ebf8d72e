use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a benchmark is measured
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
pub enum Mode {
    /// Operations per unit of time
    #[clap(name = "thrpt")]
    Throughput,

    /// Average time per operation
    #[clap(name = "avgt")]
    AverageTime,

    /// Sampled time per operation
    #[clap(name = "sample")]
    SampleTime,

    /// Time of a single cold invocation
    #[clap(name = "ss")]
    SingleShot,

    /// Every concrete mode; expanded before scheduling
    #[clap(name = "all")]
    All,
}

impl Mode {
    /// All concrete modes, in scheduling order
    pub const CONCRETE: [Mode; 4] = [
        Mode::Throughput,
        Mode::AverageTime,
        Mode::SampleTime,
        Mode::SingleShot,
    ];

    /// Short label used on command lines and in tables
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Throughput => "thrpt",
            Mode::AverageTime => "avgt",
            Mode::SampleTime => "sample",
            Mode::SingleShot => "ss",
            Mode::All => "all",
        }
    }

    /// Descriptive label used in benchmark headers
    pub fn long_label(&self) -> &'static str {
        match self {
            Mode::Throughput => "Throughput, ops/time",
            Mode::AverageTime => "Average time, time/op",
            Mode::SampleTime => "Sampling time",
            Mode::SingleShot => "Single shot invocation time",
            Mode::All => "All benchmark modes",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Identity of one runnable unit: benchmark name, mode and thread count.
///
/// Ordering is by name, then mode, then thread count, so descriptor sets can
/// live in ordered containers and always iterate in the same order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BenchmarkDescriptor {
    name: String,
    mode: Mode,
    threads: u32,
}

impl BenchmarkDescriptor {
    pub fn new(name: impl Into<String>, mode: Mode, threads: u32) -> Self {
        Self {
            name: name.into(),
            mode,
            threads: threads.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn threads(&self) -> u32 {
        self.threads
    }

    /// A copy of this descriptor with a different mode
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self::new(self.name.clone(), mode, self.threads)
    }

    /// A copy of this descriptor with a different thread count
    pub fn with_threads(&self, threads: u32) -> Self {
        Self::new(self.name.clone(), self.mode, threads)
    }
}

impl fmt::Display for BenchmarkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode)
    }
}

/// Expand a descriptor into one descriptor per concrete mode.
///
/// Descriptors that already carry a concrete mode come back unchanged.
pub fn expand(descriptor: &BenchmarkDescriptor) -> Vec<BenchmarkDescriptor> {
    match descriptor.mode() {
        Mode::All => Mode::CONCRETE
            .iter()
            .map(|mode| descriptor.with_mode(*mode))
            .collect(),
        _ => vec![descriptor.clone()],
    }
}

/// Apply a mode override to a descriptor, then expand it.
///
/// Each requested mode yields its own descriptor; an empty override keeps the
/// descriptor's own mode.
pub fn expand_with_modes(descriptor: &BenchmarkDescriptor, modes: &[Mode]) -> Vec<BenchmarkDescriptor> {
    if modes.is_empty() {
        return expand(descriptor);
    }
    modes
        .iter()
        .flat_map(|mode| expand(&descriptor.with_mode(*mode)))
        .collect()
}
