//! # Output Sinks
//!
//! Everything the harness shows to the user goes through an [`OutputSink`].
//! The parent owns one sink for the whole invocation; forked workers get a
//! [`LinkSink`](crate::link::LinkSink) that forwards each call back to it, so
//! output looks the same whether a benchmark ran embedded or forked.
//!
//! - [`PrettyPrintSink`]: human-readable text on stdout or a file
//! - [`SilentSink`]: discards everything
//! - [`RecordingSink`]: keeps every call as a [`SinkEvent`], for tests and
//!   embedding

use crate::descriptor::BenchmarkDescriptor;
use crate::options::BenchmarkParams;
use crate::results::{IterationKind, IterationSample, RunResult};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod pretty;
pub mod recording;

pub use pretty::PrettyPrintSink;
pub use recording::{RecordingSink, SinkEvent};

/// Consumer of harness progress and results.
///
/// `run_start` and `run_end` bracket a whole invocation and are only ever
/// called by the parent process.
pub trait OutputSink: Send {
    fn iteration_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
    ) -> Result<()>;

    fn iteration_end(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
        sample: &IterationSample,
    ) -> Result<()>;

    fn benchmark_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
    ) -> Result<()>;

    /// `result` is `None` when the descriptor ran no measurement iterations
    fn benchmark_end(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        result: Option<&RunResult>,
    ) -> Result<()>;

    fn run_start(&mut self) -> Result<()>;

    /// Final results of the invocation, merged across forks
    fn run_end(&mut self, results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()>;

    /// Per-thread values of one measurement iteration
    fn detailed_results(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        index: u32,
        sample: &IterationSample,
    ) -> Result<()>;

    fn exception(&mut self, message: &str) -> Result<()>;

    fn println(&mut self, line: &str) -> Result<()>;

    /// Printed only when verbose output is enabled
    fn verbose_println(&mut self, line: &str) -> Result<()>;

    fn write_byte(&mut self, byte: u8) -> Result<()>;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Sink handle shared between the orchestrator and link handlers
pub type SharedSink = Arc<Mutex<Box<dyn OutputSink>>>;

/// Wrap a sink for sharing
pub fn shared<S: OutputSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Sink that drops all output
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl OutputSink for SilentSink {
    fn iteration_start(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _params: &BenchmarkParams,
        _index: u32,
        _kind: IterationKind,
    ) -> Result<()> {
        Ok(())
    }

    fn iteration_end(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _params: &BenchmarkParams,
        _index: u32,
        _kind: IterationKind,
        _sample: &IterationSample,
    ) -> Result<()> {
        Ok(())
    }

    fn benchmark_start(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _params: &BenchmarkParams,
    ) -> Result<()> {
        Ok(())
    }

    fn benchmark_end(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _result: Option<&RunResult>,
    ) -> Result<()> {
        Ok(())
    }

    fn run_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_end(&mut self, _results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()> {
        Ok(())
    }

    fn detailed_results(
        &mut self,
        _descriptor: &BenchmarkDescriptor,
        _index: u32,
        _sample: &IterationSample,
    ) -> Result<()> {
        Ok(())
    }

    fn exception(&mut self, _message: &str) -> Result<()> {
        Ok(())
    }

    fn println(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }

    fn verbose_println(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }

    fn write_byte(&mut self, _byte: u8) -> Result<()> {
        Ok(())
    }

    fn write_bytes(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
