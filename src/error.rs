//! Error taxonomy for the harness.
//!
//! Configuration errors are raised before anything executes. Execution,
//! process and link errors are raised while running; whether they stop the
//! whole run is decided in one place, [`HarnessError::is_fatal_under`], so
//! embedded and forked failures share a single escalation rule.

use crate::descriptor::BenchmarkDescriptor;
use crate::link::LinkError;
use thiserror::Error;

/// Failures surfaced by the orchestrator and its collaborators
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An include, exclude or warmup pattern failed to compile
    #[error("Invalid benchmark pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A benchmark name could not be resolved against the registry
    #[error("No such benchmark: {0}")]
    NoSuchBenchmark(String),

    /// The benchmark body failed while running in this process
    #[error("Benchmark {descriptor} failed: {message}")]
    BenchmarkFailed {
        descriptor: BenchmarkDescriptor,
        message: String,
    },

    /// A forked worker exited with a non-zero code
    #[error("Forked process for {descriptor} returned code: {code}")]
    WorkerExit {
        descriptor: BenchmarkDescriptor,
        code: i32,
    },

    /// The worker process could not be started or waited on
    #[error("Failed to run forked process for {descriptor}: {source}")]
    WorkerSpawn {
        descriptor: BenchmarkDescriptor,
        #[source]
        source: std::io::Error,
    },

    /// Transport failure on the parent/worker link
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl HarnessError {
    /// Whether this error stops the whole run.
    ///
    /// Configuration errors always do. Everything raised while running only
    /// escalates when fail-on-error is set; otherwise it is reported and the
    /// run continues with the next fork or descriptor.
    pub fn is_fatal_under(&self, fail_on_error: bool) -> bool {
        match self {
            HarnessError::Config(_)
            | HarnessError::InvalidPattern { .. }
            | HarnessError::NoSuchBenchmark(_) => true,
            HarnessError::BenchmarkFailed { .. }
            | HarnessError::WorkerExit { .. }
            | HarnessError::WorkerSpawn { .. }
            | HarnessError::Link(_) => fail_on_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Mode;

    #[test]
    fn test_escalation_rule() {
        let descriptor = BenchmarkDescriptor::new("a", Mode::Throughput, 1);
        let exit = HarnessError::WorkerExit {
            descriptor: descriptor.clone(),
            code: 1,
        };
        assert!(!exit.is_fatal_under(false));
        assert!(exit.is_fatal_under(true));

        let config = HarnessError::Config("bad".to_string());
        assert!(config.is_fatal_under(false));

        let failed = HarnessError::BenchmarkFailed {
            descriptor,
            message: "boom".to_string(),
        };
        assert!(!failed.is_fatal_under(false));
        assert!(failed.to_string().contains("boom"));
    }
}
