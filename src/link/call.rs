//! Forwardable output-sink calls.
//!
//! On the wire a call is a method name plus its arguments encoded as one
//! `bincode` tuple. The parent maps the name to a [`SinkCall`] variant with a
//! static match and decodes the arguments for that variant only. An unknown
//! name, or arguments that do not decode for the named method, is a
//! [`DispatchError`] for that single frame; the connection keeps going.

use super::LinkError;
use crate::descriptor::BenchmarkDescriptor;
use crate::options::BenchmarkParams;
use crate::results::{IterationKind, IterationSample, RunResult};
use crate::sink::OutputSink;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Sink methods owned by the parent's own lifecycle. Never forwarded, and
/// ignored if a worker sends them anyway.
pub const FORBIDDEN_METHODS: [&str; 2] = ["run_start", "run_end"];

/// Why a forwarded call was dropped
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown method to forward: {0}")]
    Unknown(String),

    #[error("Forbidden method to forward: {0}")]
    Forbidden(String),

    #[error("Bad arguments for forwarded method {method}: {source}")]
    BadArguments {
        method: String,
        #[source]
        source: bincode::Error,
    },
}

/// Every output-sink operation that may cross the link
#[derive(Clone, Debug, PartialEq)]
pub enum SinkCall {
    IterationStart {
        descriptor: BenchmarkDescriptor,
        params: BenchmarkParams,
        index: u32,
        kind: IterationKind,
    },
    IterationEnd {
        descriptor: BenchmarkDescriptor,
        params: BenchmarkParams,
        index: u32,
        kind: IterationKind,
        sample: IterationSample,
    },
    BenchmarkStart {
        descriptor: BenchmarkDescriptor,
        params: BenchmarkParams,
    },
    BenchmarkEnd {
        descriptor: BenchmarkDescriptor,
        result: Option<RunResult>,
    },
    DetailedResults {
        descriptor: BenchmarkDescriptor,
        index: u32,
        sample: IterationSample,
    },
    Exception(String),
    Println(String),
    VerbosePrintln(String),
    WriteByte(u8),
    WriteBytes(Vec<u8>),
    Flush,
    Close,
}

fn encode_args<T: Serialize>(args: &T) -> Result<Vec<u8>, LinkError> {
    bincode::serialize(args).map_err(LinkError::Encode)
}

fn decode_args<T: DeserializeOwned>(method: &str, args: &[u8]) -> Result<T, DispatchError> {
    bincode::deserialize(args).map_err(|source| DispatchError::BadArguments {
        method: method.to_string(),
        source,
    })
}

impl SinkCall {
    /// Wire name of this call, matching the [`OutputSink`] method name
    pub fn method(&self) -> &'static str {
        match self {
            SinkCall::IterationStart { .. } => "iteration_start",
            SinkCall::IterationEnd { .. } => "iteration_end",
            SinkCall::BenchmarkStart { .. } => "benchmark_start",
            SinkCall::BenchmarkEnd { .. } => "benchmark_end",
            SinkCall::DetailedResults { .. } => "detailed_results",
            SinkCall::Exception(_) => "exception",
            SinkCall::Println(_) => "println",
            SinkCall::VerbosePrintln(_) => "verbose_println",
            SinkCall::WriteByte(_) => "write_byte",
            SinkCall::WriteBytes(_) => "write_bytes",
            SinkCall::Flush => "flush",
            SinkCall::Close => "close",
        }
    }

    /// Method name and encoded argument tuple
    pub fn encode(&self) -> Result<(&'static str, Vec<u8>), LinkError> {
        let args = match self {
            SinkCall::IterationStart {
                descriptor,
                params,
                index,
                kind,
            } => encode_args(&(descriptor, params, index, kind))?,
            SinkCall::IterationEnd {
                descriptor,
                params,
                index,
                kind,
                sample,
            } => encode_args(&(descriptor, params, index, kind, sample))?,
            SinkCall::BenchmarkStart { descriptor, params } => encode_args(&(descriptor, params))?,
            SinkCall::BenchmarkEnd { descriptor, result } => encode_args(&(descriptor, result))?,
            SinkCall::DetailedResults {
                descriptor,
                index,
                sample,
            } => encode_args(&(descriptor, index, sample))?,
            SinkCall::Exception(message) => encode_args(&(message,))?,
            SinkCall::Println(line) => encode_args(&(line,))?,
            SinkCall::VerbosePrintln(line) => encode_args(&(line,))?,
            SinkCall::WriteByte(byte) => encode_args(&(byte,))?,
            SinkCall::WriteBytes(bytes) => encode_args(&(bytes,))?,
            SinkCall::Flush | SinkCall::Close => Vec::new(),
        };
        Ok((self.method(), args))
    }

    /// Look up `method` and decode its arguments
    pub fn decode(method: &str, args: &[u8]) -> Result<SinkCall, DispatchError> {
        if FORBIDDEN_METHODS.contains(&method) {
            return Err(DispatchError::Forbidden(method.to_string()));
        }
        let call = match method {
            "iteration_start" => {
                let (descriptor, params, index, kind): (
                    BenchmarkDescriptor,
                    BenchmarkParams,
                    u32,
                    IterationKind,
                ) = decode_args(method, args)?;
                SinkCall::IterationStart {
                    descriptor,
                    params,
                    index,
                    kind,
                }
            }
            "iteration_end" => {
                let (descriptor, params, index, kind, sample): (
                    BenchmarkDescriptor,
                    BenchmarkParams,
                    u32,
                    IterationKind,
                    IterationSample,
                ) = decode_args(method, args)?;
                SinkCall::IterationEnd {
                    descriptor,
                    params,
                    index,
                    kind,
                    sample,
                }
            }
            "benchmark_start" => {
                let (descriptor, params): (BenchmarkDescriptor, BenchmarkParams) =
                    decode_args(method, args)?;
                SinkCall::BenchmarkStart { descriptor, params }
            }
            "benchmark_end" => {
                let (descriptor, result): (BenchmarkDescriptor, Option<RunResult>) =
                    decode_args(method, args)?;
                SinkCall::BenchmarkEnd { descriptor, result }
            }
            "detailed_results" => {
                let (descriptor, index, sample): (BenchmarkDescriptor, u32, IterationSample) =
                    decode_args(method, args)?;
                SinkCall::DetailedResults {
                    descriptor,
                    index,
                    sample,
                }
            }
            "exception" => {
                let (message,): (String,) = decode_args(method, args)?;
                SinkCall::Exception(message)
            }
            "println" => {
                let (line,): (String,) = decode_args(method, args)?;
                SinkCall::Println(line)
            }
            "verbose_println" => {
                let (line,): (String,) = decode_args(method, args)?;
                SinkCall::VerbosePrintln(line)
            }
            "write_byte" => {
                let (byte,): (u8,) = decode_args(method, args)?;
                SinkCall::WriteByte(byte)
            }
            "write_bytes" => {
                let (bytes,): (Vec<u8>,) = decode_args(method, args)?;
                SinkCall::WriteBytes(bytes)
            }
            "flush" => SinkCall::Flush,
            "close" => SinkCall::Close,
            other => return Err(DispatchError::Unknown(other.to_string())),
        };
        Ok(call)
    }

    /// Invoke the matching method on `sink`
    pub fn apply(&self, sink: &mut dyn OutputSink) -> Result<()> {
        match self {
            SinkCall::IterationStart {
                descriptor,
                params,
                index,
                kind,
            } => sink.iteration_start(descriptor, params, *index, *kind),
            SinkCall::IterationEnd {
                descriptor,
                params,
                index,
                kind,
                sample,
            } => sink.iteration_end(descriptor, params, *index, *kind, sample),
            SinkCall::BenchmarkStart { descriptor, params } => {
                sink.benchmark_start(descriptor, params)
            }
            SinkCall::BenchmarkEnd { descriptor, result } => {
                sink.benchmark_end(descriptor, result.as_ref())
            }
            SinkCall::DetailedResults {
                descriptor,
                index,
                sample,
            } => sink.detailed_results(descriptor, *index, sample),
            SinkCall::Exception(message) => sink.exception(message),
            SinkCall::Println(line) => sink.println(line),
            SinkCall::VerbosePrintln(line) => sink.verbose_println(line),
            SinkCall::WriteByte(byte) => sink.write_byte(*byte),
            SinkCall::WriteBytes(bytes) => sink.write_bytes(bytes),
            SinkCall::Flush => sink.flush(),
            SinkCall::Close => sink.close(),
        }
    }
}
