//! Worker side of the link.
//!
//! Workers run benchmarks on plain OS threads, so the client is blocking.
//! Every send failure surfaces as an error: results that cannot reach the
//! parent are never written anywhere else.

use super::call::SinkCall;
use super::frame::{read_frame_blocking, write_frame_blocking, InfraRequest, LinkFrame};
use super::LinkError;
use crate::descriptor::BenchmarkDescriptor;
use crate::options::{BenchmarkParams, RunOptions};
use crate::results::{IterationKind, IterationSample, RunResult};
use crate::sink::OutputSink;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use tracing::debug;

/// Connection from a worker to its parent
#[derive(Debug)]
pub struct LinkClient {
    stream: Mutex<TcpStream>,
}

impl LinkClient {
    /// Connect to the parent's link server
    pub fn connect(host: &str, port: u16) -> Result<Self, LinkError> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        debug!("Connected to link server at {}:{}", host, port);
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    /// Ask the parent for its resolved options and wait for the answer
    pub fn request_options(&self) -> Result<RunOptions, LinkError> {
        let mut stream = self.stream.lock();
        write_frame_blocking(&mut *stream, &LinkFrame::InfraRequest(InfraRequest::Options))?;
        match read_frame_blocking(&mut *stream)? {
            Some(LinkFrame::InfraResponse(options)) => Ok(*options),
            Some(other) => Err(LinkError::UnexpectedFrame {
                expected: "InfraResponse",
                actual: other.kind(),
            }),
            None => Err(LinkError::Disconnected),
        }
    }

    /// Forward one sink call
    pub fn send_call(&self, call: &SinkCall) -> Result<(), LinkError> {
        let (method, args) = call.encode()?;
        let frame = LinkFrame::OutputCall {
            method: method.to_string(),
            args,
        };
        self.send(&frame)
    }

    /// Report a finished descriptor's results
    pub fn report(&self, descriptor: &BenchmarkDescriptor, result: &RunResult) -> Result<(), LinkError> {
        self.send(&LinkFrame::ResultsReport {
            descriptor: descriptor.clone(),
            result: result.clone(),
        })
    }

    /// Send `Finish` and close the write side
    pub fn finish(&self) -> Result<(), LinkError> {
        self.send(&LinkFrame::Finish)?;
        self.stream.lock().shutdown(Shutdown::Write)?;
        Ok(())
    }

    /// Independent handle on the underlying socket
    pub fn try_clone_stream(&self) -> Result<TcpStream, LinkError> {
        Ok(self.stream.lock().try_clone()?)
    }

    fn send(&self, frame: &LinkFrame) -> Result<(), LinkError> {
        let mut stream = self.stream.lock();
        write_frame_blocking(&mut *stream, frame)
    }
}

/// Output sink that forwards every call to the parent.
///
/// `run_start` and `run_end` belong to the parent and are not forwarded.
#[derive(Clone, Debug)]
pub struct LinkSink {
    client: Arc<LinkClient>,
}

impl LinkSink {
    pub fn new(client: Arc<LinkClient>) -> Self {
        Self { client }
    }

    fn forward(&self, call: SinkCall) -> Result<()> {
        self.client.send_call(&call)?;
        Ok(())
    }
}

impl OutputSink for LinkSink {
    fn iteration_start(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        params: &BenchmarkParams,
        index: u32,
        kind: IterationKind,
    ) -> Result<()> {
        self.forward(SinkCall::IterationStart {
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
        self.forward(SinkCall::IterationEnd {
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
        self.forward(SinkCall::BenchmarkStart {
            descriptor: descriptor.clone(),
            params: params.clone(),
        })
    }

    fn benchmark_end(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        result: Option<&RunResult>,
    ) -> Result<()> {
        self.forward(SinkCall::BenchmarkEnd {
            descriptor: descriptor.clone(),
            result: result.cloned(),
        })
    }

    fn run_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_end(&mut self, _results: &BTreeMap<BenchmarkDescriptor, RunResult>) -> Result<()> {
        Ok(())
    }

    fn detailed_results(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        index: u32,
        sample: &IterationSample,
    ) -> Result<()> {
        self.forward(SinkCall::DetailedResults {
            descriptor: descriptor.clone(),
            index,
            sample: sample.clone(),
        })
    }

    fn exception(&mut self, message: &str) -> Result<()> {
        self.forward(SinkCall::Exception(message.to_string()))
    }

    fn println(&mut self, line: &str) -> Result<()> {
        self.forward(SinkCall::Println(line.to_string()))
    }

    fn verbose_println(&mut self, line: &str) -> Result<()> {
        self.forward(SinkCall::VerbosePrintln(line.to_string()))
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.forward(SinkCall::WriteByte(byte))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.forward(SinkCall::WriteBytes(bytes.to_vec()))
    }

    fn flush(&mut self) -> Result<()> {
        self.forward(SinkCall::Flush)
    }

    fn close(&mut self) -> Result<()> {
        self.forward(SinkCall::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_refused() {
        // grab a free port, then release it
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(matches!(
            LinkClient::connect("127.0.0.1", port),
            Err(LinkError::Io(_))
        ));
    }

    #[test]
    fn test_send_fails_fast_after_parent_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = Arc::new(LinkClient::connect("127.0.0.1", port).unwrap());
        let (accepted, _) = listener.accept().unwrap();
        drop(accepted);
        drop(listener);

        let mut sink = LinkSink::new(client);
        // the first write may still be buffered by the kernel; a later one
        // observes the reset
        let failed = (0..50).any(|_| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            sink.println("lost").is_err()
        });
        assert!(failed);
    }

    #[test]
    fn test_options_request_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut accepted, _) = listener.accept().unwrap();
            // consume the request, then hang up
            let _ = read_frame_blocking(&mut accepted);
        });
        let client = LinkClient::connect("127.0.0.1", port).unwrap();
        let result = client.request_options();
        handle.join().unwrap();
        assert!(matches!(
            result,
            Err(LinkError::Disconnected) | Err(LinkError::Io(_))
        ));
    }
}
