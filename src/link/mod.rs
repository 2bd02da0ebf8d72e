//! # Parent/Worker Link
//!
//! A forked worker reports back to the parent over a loopback TCP
//! connection. Everything the worker would have printed, and every result it
//! produced, travels as a [`LinkFrame`]:
//!
//! - `OutputCall`: one output-sink call, by method name plus encoded arguments
//! - `InfraRequest` / `InfraResponse`: the worker asks for the parent's
//!   resolved [`RunOptions`](crate::options::RunOptions)
//! - `ResultsReport`: a finished descriptor's [`RunResult`](crate::results::RunResult)
//! - `Finish`: graceful end of stream
//!
//! ## Wire Format
//!
//! Each frame is a 4-byte little-endian length followed by a `bincode`
//! payload, capped at [`MAX_FRAME_SIZE`]. Frames decode independently, and a
//! stream that closes on a frame boundary is treated exactly like `Finish`.
//!
//! ## Components
//!
//! - [`LinkServer`]: parent side, one handler task per accepted connection
//! - [`LinkClient`]: worker side, blocking, plus the [`LinkSink`] adapter
//! - [`SinkCall`]: closed set of forwardable sink operations

use thiserror::Error;

pub mod call;
pub mod client;
pub mod frame;
pub mod server;

pub use call::{SinkCall, FORBIDDEN_METHODS};
pub use client::{LinkClient, LinkSink};
pub use frame::{InfraRequest, LinkFrame};
pub use server::{LinkServer, LINK_HOST};

/// Upper bound on a single frame's payload
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Transport failures on the link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Link closed by peer")]
    Disconnected,
}
