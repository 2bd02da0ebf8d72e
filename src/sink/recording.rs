use super::OutputSink;
use crate::descriptor::BenchmarkDescriptor;
use crate::link::SinkCall;
use crate::options::BenchmarkParams;
use crate::results::{IterationKind, IterationSample, RunResult};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One recorded sink call
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    RunStart,
    RunEnd(BTreeMap<BenchmarkDescriptor, RunResult>),
    /// Any forwardable call
    Call(SinkCall),
}

/// Sink that records every call in order.
///
/// Clones share the same event log, so a test can keep one clone and hand
/// the other to the harness.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Lines passed to `println`, in order
    pub fn lines(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Call(SinkCall::Println(line)) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages passed to `exception`, in order
    pub fn exceptions(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Call(SinkCall::Exception(message)) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) -> Result<()> {
        self.events.lock().push(SinkEvent::Call(call));
        Ok(())
    }
}

impl OutputSink for RecordingSink {
    fn iteration_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
    ) -> Result<()> {
        self.record(SinkCall::IterationStart {
            descriptor: descriptor.clone(),
            params: params.clone(),
            index,
            kind,
        })
    }

    fn iteration_end(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
        sample: &IterationSample,
    ) -> Result<()> {
        self.record(SinkCall::IterationEnd {
            descriptor: descriptor.clone(),
            params: params.clone(),
            index,
            kind,
            sample: sample.clone(),
        })
    }

    fn benchmark_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
    ) -> Result<()> {
        self.record(SinkCall::BenchmarkStart {
            descriptor: descriptor.clone(),
            params: params.clone(),
        })
    }

    fn benchmark_end(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        result: Option<&RunResult>,
    ) -> Result<()> {
        self.record(SinkCall::BenchmarkEnd {
            descriptor: descriptor.clone(),
            result: result.cloned(),
        })
    }

    fn run_start(&mut self) -> Result<()> {
        self.events.lock().push(SinkEvent::RunStart);
        Ok(())
    }

    fn run_end(&mut self, results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()> {
        self.events.lock().push(SinkEvent::RunEnd(results.clone()));
        Ok(())
    }

    fn detailed_results(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        index: u32,
        sample: &IterationSample,
    ) -> Result<()> {
        self.record(SinkCall::DetailedResults {
            descriptor: descriptor.clone(),
            index,
            sample: sample.clone(),
        })
    }

    fn exception(&mut self, message: &str) -> Result<()> {
        self.record(SinkCall::Exception(message.to_string()))
    }

    fn println(&mut self, line: &str) -> Result<()> {
        self.record(SinkCall::Println(line.to_string()))
    }

    fn verbose_println(&mut self, line: &str) -> Result<()> {
        self.record(SinkCall::VerbosePrintln(line.to_string()))
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.record(SinkCall::WriteByte(byte))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.record(SinkCall::WriteBytes(bytes.to_vec()))
    }

    fn flush(&mut self) -> Result<()> {
        self.record(SinkCall::Flush)
    }

    fn close(&mut self) -> Result<()> {
        self.record(SinkCall::Close)
    }
}
