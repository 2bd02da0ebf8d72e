//! # Result Values and Aggregation
//!
//! Typed, unit-aware scores and the two merge operators applied to them:
//!
//! - **Iteration aggregation** combines the per-thread values reported within
//!   one iteration into a single iteration value.
//! - **Run aggregation** combines iteration values, and whole runs coming back
//!   from several forks, into one score for a benchmark descriptor.
//!
//! Both operators add raw counts and raw nanoseconds first and divide once at
//! the end. Averaging per-run rates would weigh a short fork the same as a long
//! one, so it is never done here.
//!
//! Scores are computed in `f64`, multiplying the operation count by the
//! `nanos-per-unit / elapsed` ratio. Intermediate integer products such as
//! `operations * nanos_per_day` are never formed, so 10^9 operations reported
//! in `ops/day` cannot overflow.

use crate::descriptor::BenchmarkDescriptor;
use crate::utils::calculate_stats;
use clap::ValueEnum;
use hdrhistogram::{CreationError, Histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Time unit a score is reported in
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
pub enum TimeUnit {
    #[clap(name = "ns")]
    Nanoseconds,
    #[clap(name = "us")]
    Microseconds,
    #[clap(name = "ms")]
    Milliseconds,
    #[clap(name = "s")]
    Seconds,
    #[clap(name = "min")]
    Minutes,
    #[clap(name = "hr")]
    Hours,
    #[clap(name = "day")]
    Days,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit
    pub fn nanos(&self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }

    /// Suffix used in score units ("ops/s", "us/op")
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "hr",
            TimeUnit::Days => "day",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Whether an iteration warms up or measures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationKind {
    Warmup,
    Measurement,
}

/// Raw data behind a score. Only counts and nanoseconds are stored; scores
/// are derived on demand so merging never compounds rounding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurement {
    /// Operations completed within the elapsed time
    Throughput { operations: u64, duration_ns: u64 },
    /// Elapsed time spent on the given number of operations
    AverageTime { operations: u64, duration_ns: u64 },
    /// Individually timed operations, summarized as a bounded histogram
    SampleTime { samples: SampleDistribution },
    /// Cold invocations and their total time
    SingleShot { invocations: u64, duration_ns: u64 },
}

impl Measurement {
    fn same_kind(&self, other: &Measurement) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// A unit-aware score together with the raw data it came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultValue {
    label: String,
    unit: TimeUnit,
    measurement: Measurement,
}

impl ResultValue {
    pub fn throughput(label: impl Into<String>, operations: u64, duration_ns: u64, unit: TimeUnit) -> Self {
        Self::new(label, unit, Measurement::Throughput { operations, duration_ns })
    }

    pub fn average_time(label: impl Into<String>, operations: u64, duration_ns: u64, unit: TimeUnit) -> Self {
        Self::new(label, unit, Measurement::AverageTime { operations, duration_ns })
    }

    pub fn sample_time(label: impl Into<String>, samples: SampleDistribution, unit: TimeUnit) -> Self {
        Self::new(label, unit, Measurement::SampleTime { samples })
    }

    pub fn single_shot(label: impl Into<String>, duration_ns: u64, unit: TimeUnit) -> Self {
        Self::new(
            label,
            unit,
            Measurement::SingleShot {
                invocations: 1,
                duration_ns,
            },
        )
    }

    fn new(label: impl Into<String>, unit: TimeUnit, measurement: Measurement) -> Self {
        Self {
            label: label.into(),
            unit,
            measurement,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// The score in this value's unit, or `None` when it is undefined
    /// (zero elapsed time for a rate, zero operations for a time per op).
    /// Callers must check before display.
    pub fn score(&self) -> Option<f64> {
        let unit_ns = self.unit.nanos() as f64;
        match &self.measurement {
            Measurement::Throughput {
                operations,
                duration_ns,
            } => {
                if *duration_ns == 0 {
                    return None;
                }
                Some(*operations as f64 * (unit_ns / *duration_ns as f64))
            }
            Measurement::AverageTime {
                operations,
                duration_ns,
            } => {
                if *operations == 0 {
                    return None;
                }
                Some((*duration_ns as f64 / unit_ns) / *operations as f64)
            }
            Measurement::SampleTime { samples } => {
                if samples.is_empty() {
                    return None;
                }
                Some((samples.total_ns() as f64 / samples.len() as f64) / unit_ns)
            }
            Measurement::SingleShot {
                invocations,
                duration_ns,
            } => {
                if *invocations == 0 {
                    return None;
                }
                Some((*duration_ns as f64 / unit_ns) / *invocations as f64)
            }
        }
    }

    /// Human-readable unit of [`score`](Self::score)
    pub fn score_unit(&self) -> String {
        match self.measurement {
            Measurement::Throughput { .. } => format!("ops/{}", self.unit.suffix()),
            _ => format!("{}/op", self.unit.suffix()),
        }
    }

    /// Combine the values reported by the threads of one iteration.
    ///
    /// Throughput adds operations and divides by the mean thread time, since
    /// the threads ran side by side: `Σops / (Σtime / threads)`. Time-per-op
    /// modes add time and operations. Values of a different kind than the
    /// first one are ignored.
    pub fn aggregate_iteration(values: &[ResultValue]) -> Option<ResultValue> {
        let first = values.first()?;
        let same: Vec<&ResultValue> = values
            .iter()
            .filter(|v| v.measurement.same_kind(&first.measurement))
            .collect();

        let measurement = match &first.measurement {
            Measurement::Throughput { .. } => {
                let mut operations = 0u64;
                let mut total_ns = 0u128;
                for v in &same {
                    if let Measurement::Throughput {
                        operations: ops,
                        duration_ns,
                    } = v.measurement
                    {
                        operations = operations.saturating_add(ops);
                        total_ns += duration_ns as u128;
                    }
                }
                let threads = same.len() as u128;
                let mean_ns = (total_ns + threads / 2) / threads;
                Measurement::Throughput {
                    operations,
                    duration_ns: u64::try_from(mean_ns).unwrap_or(u64::MAX),
                }
            }
            _ => {
                let mut acc = first.measurement.clone();
                for v in same.iter().skip(1) {
                    acc = sum_measurements(&acc, &v.measurement);
                }
                acc
            }
        };

        Some(ResultValue::new(first.label.clone(), first.unit, measurement))
    }

    /// Combine iteration values, or whole runs, into one score.
    ///
    /// Every mode adds raw counts and raw time before dividing, which makes
    /// the operation associative and independent of arrival order.
    pub fn aggregate_run(values: &[ResultValue]) -> Option<ResultValue> {
        let (first, rest) = values.split_first()?;
        Some(rest.iter().fold(first.clone(), |acc, v| acc.merge(v)))
    }

    /// Binary form of [`aggregate_run`](Self::aggregate_run). A value of a
    /// different kind leaves `self` unchanged.
    pub fn merge(&self, other: &ResultValue) -> ResultValue {
        if !self.measurement.same_kind(&other.measurement) {
            return self.clone();
        }
        ResultValue::new(
            self.label.clone(),
            self.unit,
            sum_measurements(&self.measurement, &other.measurement),
        )
    }

    /// Multi-line summary used at the end of a benchmark
    pub fn extended_info(&self, label: Option<&str>) -> String {
        let prefix = match label {
            Some(l) => format!("Result \"{}\"", l),
            None => "Result".to_string(),
        };
        let mut out = format!("{}: {}", prefix, self);
        if let Measurement::SampleTime { samples } = &self.measurement {
            if let Some(histogram) = samples.histogram() {
                let unit_ns = self.unit.nanos() as f64;
                out.push_str(&format!("\n  Samples, N = {}", samples.len()));
                for q in [0.0, 0.5, 0.9, 0.99, 1.0] {
                    let v = histogram.value_at_quantile(q) as f64 / unit_ns;
                    out.push_str(&format!(
                        "\n        p({:6.2}) = {:12.3} {}",
                        q * 100.0,
                        v,
                        self.score_unit()
                    ));
                }
            }
        }
        out
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.score() {
            Some(score) => write!(f, "{:.3} {}", score, self.score_unit()),
            None => write!(f, "undefined {}", self.score_unit()),
        }
    }
}

fn sum_measurements(a: &Measurement, b: &Measurement) -> Measurement {
    match (a, b) {
        (
            Measurement::Throughput {
                operations: o1,
                duration_ns: d1,
            },
            Measurement::Throughput {
                operations: o2,
                duration_ns: d2,
            },
        ) => Measurement::Throughput {
            operations: o1.saturating_add(*o2),
            duration_ns: d1.saturating_add(*d2),
        },
        (
            Measurement::AverageTime {
                operations: o1,
                duration_ns: d1,
            },
            Measurement::AverageTime {
                operations: o2,
                duration_ns: d2,
            },
        ) => Measurement::AverageTime {
            operations: o1.saturating_add(*o2),
            duration_ns: d1.saturating_add(*d2),
        },
        (Measurement::SampleTime { samples: s1 }, Measurement::SampleTime { samples: s2 }) => {
            Measurement::SampleTime {
                samples: s1.merge(s2),
            }
        }
        (
            Measurement::SingleShot {
                invocations: i1,
                duration_ns: d1,
            },
            Measurement::SingleShot {
                invocations: i2,
                duration_ns: d2,
            },
        ) => Measurement::SingleShot {
            invocations: i1.saturating_add(*i2),
            duration_ns: d1.saturating_add(*d2),
        },
        _ => a.clone(),
    }
}

/// Longest single sample tracked; slower calls are clamped to it
pub const MAX_SAMPLE_NS: u64 = 3_600 * 1_000_000_000;

/// Significant digits kept by sample histograms
const SAMPLE_SIGFIGS: u8 = 3;

fn sample_histogram() -> Result<Histogram<u64>, CreationError> {
    Histogram::new_with_bounds(1, MAX_SAMPLE_NS, SAMPLE_SIGFIGS)
}

/// Individually timed operations in bounded form.
///
/// The count and total time are exact, so the mean matches what the raw
/// samples would give. Percentiles come from hdrhistogram buckets, stored as
/// `(highest equivalent value, count)` pairs in ascending order. The fixed
/// histogram bounds cap the number of buckets, so the size of this value
/// does not grow with the number of samples.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDistribution {
    count: u64,
    total_ns: u64,
    buckets: Vec<(u64, u64)>,
}

impl SampleDistribution {
    /// Summarize a slice of raw samples
    pub fn from_samples(samples_ns: &[u64]) -> Result<Self, CreationError> {
        let mut recorder = SampleRecorder::new()?;
        for s in samples_ns {
            recorder.record(*s);
        }
        Ok(recorder.finish())
    }

    fn from_histogram(histogram: &Histogram<u64>, total_ns: u64) -> Self {
        let buckets = histogram
            .iter_recorded()
            .map(|v| (v.value_iterated_to(), v.count_at_value()))
            .collect();
        Self {
            count: histogram.len(),
            total_ns,
            buckets,
        }
    }

    /// Number of samples
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Exact sum of all samples
    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }

    pub fn buckets(&self) -> &[(u64, u64)] {
        &self.buckets
    }

    /// Rebuild the histogram for percentile queries. `None` when empty.
    pub fn histogram(&self) -> Option<Histogram<u64>> {
        if self.is_empty() {
            return None;
        }
        let mut histogram = sample_histogram().ok()?;
        for (value, count) in &self.buckets {
            histogram.saturating_record_n(*value, *count);
        }
        Some(histogram)
    }

    /// Combine two distributions. Buckets share the same bounds, so counts
    /// are added per bucket value and the result does not depend on order.
    pub fn merge(&self, other: &SampleDistribution) -> SampleDistribution {
        let mut buckets: BTreeMap<u64, u64> = self.buckets.iter().copied().collect();
        for (value, count) in &other.buckets {
            let slot = buckets.entry(*value).or_insert(0);
            *slot = slot.saturating_add(*count);
        }
        SampleDistribution {
            count: self.count.saturating_add(other.count),
            total_ns: self.total_ns.saturating_add(other.total_ns),
            buckets: buckets.into_iter().collect(),
        }
    }
}

/// Records sample times for one thread and iteration
pub struct SampleRecorder {
    histogram: Histogram<u64>,
    total_ns: u64,
}

impl SampleRecorder {
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: sample_histogram()?,
            total_ns: 0,
        })
    }

    pub fn record(&mut self, sample_ns: u64) {
        self.histogram.saturating_record(sample_ns);
        self.total_ns = self.total_ns.saturating_add(sample_ns);
    }

    pub fn finish(self) -> SampleDistribution {
        SampleDistribution::from_histogram(&self.histogram, self.total_ns)
    }
}

/// One iteration's measurement: the aggregated value plus the per-thread
/// values it was built from, kept for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationSample {
    pub index: u32,
    pub kind: IterationKind,
    pub elapsed_ns: u64,
    pub primary: ResultValue,
    pub secondary: BTreeMap<String, ResultValue>,
    pub raw_primary: Vec<ResultValue>,
    pub raw_secondary: BTreeMap<String, Vec<ResultValue>>,
}

/// Values reported by one thread for one iteration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadResult {
    pub primary: ResultValue,
    pub secondary: BTreeMap<String, ResultValue>,
}

impl ThreadResult {
    pub fn new(primary: ResultValue) -> Self {
        Self {
            primary,
            secondary: BTreeMap::new(),
        }
    }

    pub fn with_secondary(mut self, name: impl Into<String>, value: ResultValue) -> Self {
        self.secondary.insert(name.into(), value);
        self
    }
}

impl IterationSample {
    /// Build an iteration sample by iteration-aggregating per-thread values.
    /// Returns `None` when no thread reported anything.
    pub fn from_threads(
        index: u32,
        kind: IterationKind,
        elapsed_ns: u64,
        threads: Vec<ThreadResult>,
    ) -> Option<Self> {
        let raw_primary: Vec<ResultValue> = threads.iter().map(|t| t.primary.clone()).collect();
        let primary = ResultValue::aggregate_iteration(&raw_primary)?;

        let mut raw_secondary: BTreeMap<String, Vec<ResultValue>> = BTreeMap::new();
        for t in threads {
            for (name, value) in t.secondary {
                raw_secondary.entry(name).or_default().push(value);
            }
        }
        let secondary = raw_secondary
            .iter()
            .filter_map(|(name, values)| {
                ResultValue::aggregate_iteration(values).map(|v| (name.clone(), v))
            })
            .collect();

        Some(Self {
            index,
            kind,
            elapsed_ns,
            primary,
            secondary,
            raw_primary,
            raw_secondary,
        })
    }
}

/// Aggregated outcome for one benchmark descriptor.
///
/// Built from the measurement iterations of one run; runs of the same
/// descriptor (forks) are combined with [`RunResult::merge`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    primary: ResultValue,
    secondary: BTreeMap<String, ResultValue>,
    iteration_scores: Vec<f64>,
    contributions: u32,
}

impl RunResult {
    /// Run-aggregate the measurement iterations among `samples`.
    /// Returns `None` when there are none, e.g. for a warmup-only pass.
    pub fn from_iterations(samples: &[IterationSample]) -> Option<Self> {
        let measured: Vec<&IterationSample> = samples
            .iter()
            .filter(|s| s.kind == IterationKind::Measurement)
            .collect();

        let primaries: Vec<ResultValue> = measured.iter().map(|s| s.primary.clone()).collect();
        let primary = ResultValue::aggregate_run(&primaries)?;

        let mut by_name: BTreeMap<String, Vec<ResultValue>> = BTreeMap::new();
        for s in &measured {
            for (name, value) in &s.secondary {
                by_name.entry(name.clone()).or_default().push(value.clone());
            }
        }
        let secondary = by_name
            .iter()
            .filter_map(|(name, values)| {
                ResultValue::aggregate_run(values).map(|v| (name.clone(), v))
            })
            .collect();

        let mut iteration_scores: Vec<f64> =
            measured.iter().filter_map(|s| s.primary.score()).collect();
        iteration_scores.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            primary,
            secondary,
            iteration_scores,
            contributions: 1,
        })
    }

    pub fn primary(&self) -> &ResultValue {
        &self.primary
    }

    pub fn secondary(&self) -> &BTreeMap<String, ResultValue> {
        &self.secondary
    }

    /// Primary scores of every measurement iteration merged so far, ascending
    pub fn iteration_scores(&self) -> &[f64] {
        &self.iteration_scores
    }

    /// Number of runs (embedded or forked) merged into this result
    pub fn contributions(&self) -> u32 {
        self.contributions
    }

    /// Associative, commutative merge of two runs of the same descriptor
    pub fn merge(&self, other: &RunResult) -> RunResult {
        let mut secondary = self.secondary.clone();
        for (name, value) in &other.secondary {
            let merged = match secondary.get(name) {
                Some(existing) => existing.merge(value),
                None => value.clone(),
            };
            secondary.insert(name.clone(), merged);
        }

        let mut iteration_scores = self.iteration_scores.clone();
        iteration_scores.extend_from_slice(&other.iteration_scores);
        iteration_scores.sort_by(|a, b| a.total_cmp(b));

        RunResult {
            primary: self.primary.merge(&other.primary),
            secondary,
            iteration_scores,
            contributions: self.contributions.saturating_add(other.contributions),
        }
    }

    /// Merge any number of runs; `None` for an empty input
    pub fn merge_all<'a>(results: impl IntoIterator<Item = &'a RunResult>) -> Option<RunResult> {
        results.into_iter().fold(None, |acc, r| match acc {
            None => Some(r.clone()),
            Some(existing) => Some(existing.merge(r)),
        })
    }

    /// Summary lines printed at the end of a benchmark
    pub fn extended_info(&self) -> String {
        let mut out = self.primary.extended_info(None);
        if self.iteration_scores.len() > 1 {
            let (mean, min, max, std_dev) = calculate_stats(&self.iteration_scores);
            out.push_str(&format!(
                "\n  Statistics: (min, avg, max) = ({:.3}, {:.3}, {:.3}), stdev = {:.3}",
                min, mean, max, std_dev
            ));
        }
        for (name, value) in &self.secondary {
            out.push('\n');
            out.push_str(&value.extended_info(Some(name)));
        }
        out
    }
}

/// Results of one invocation, keyed by descriptor.
///
/// A cloneable handle over internally synchronized state: the orchestrator
/// merges embedded results into it and link handlers merge forked results
/// into it concurrently. Merges use [`RunResult::merge`], so arrival order
/// across connections does not matter.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<BTreeMap<BenchmarkDescriptor, RunResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one run into the entry for `descriptor`
    pub fn merge(&self, descriptor: BenchmarkDescriptor, result: RunResult) {
        let mut map = self.inner.lock();
        let merged = match map.get(&descriptor) {
            Some(existing) => existing.merge(&result),
            None => result,
        };
        map.insert(descriptor, merged);
    }

    pub fn get(&self, descriptor: &BenchmarkDescriptor) -> Option<RunResult> {
        self.inner.lock().get(descriptor).cloned()
    }

    /// Number of runs merged for `descriptor` so far
    pub fn contributions(&self, descriptor: &BenchmarkDescriptor) -> u32 {
        self.inner
            .lock()
            .get(descriptor)
            .map_or(0, RunResult::contributions)
    }

    /// Copy of every entry, in descriptor order
    pub fn snapshot(&self) -> BTreeMap<BenchmarkDescriptor, RunResult> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
