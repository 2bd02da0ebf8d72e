//! Frame vocabulary and the length-prefixed codec, in async (parent) and
//! blocking (worker) flavors.

use super::{LinkError, MAX_FRAME_SIZE};
use crate::descriptor::BenchmarkDescriptor;
use crate::options::RunOptions;
use crate::results::RunResult;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Requests a worker may send to the parent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfraRequest {
    /// Ask for the resolved run options
    Options,
}

/// One message on the link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LinkFrame {
    /// A forwarded output-sink call. `args` is decoded per method on the
    /// parent, so an unknown method only costs that one frame.
    OutputCall { method: String, args: Vec<u8> },
    InfraRequest(InfraRequest),
    InfraResponse(Box<RunOptions>),
    ResultsReport {
        descriptor: BenchmarkDescriptor,
        result: RunResult,
    },
    Finish,
}

impl LinkFrame {
    /// Frame kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            LinkFrame::OutputCall { .. } => "OutputCall",
            LinkFrame::InfraRequest(_) => "InfraRequest",
            LinkFrame::InfraResponse(_) => "InfraResponse",
            LinkFrame::ResultsReport { .. } => "ResultsReport",
            LinkFrame::Finish => "Finish",
        }
    }

    /// Serialize to a length-prefixed buffer ready to write
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        let payload = bincode::serialize(self).map_err(LinkError::Encode)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(LinkError::FrameTooLarge(payload.len()));
        }
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(payload).map_err(LinkError::Decode)
    }
}

fn checked_len(len_bytes: [u8; 4]) -> Result<usize, LinkError> {
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(LinkError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Outcome of filling the length prefix: `filled` bytes arrived before EOF
fn prefix_state(filled: usize) -> Result<bool, LinkError> {
    match filled {
        0 => Ok(false),
        4 => Ok(true),
        n => Err(LinkError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("stream closed after {} of 4 length bytes", n),
        ))),
    }
}

/// Read one frame. Returns `Ok(None)` when the peer closed the stream on a
/// frame boundary; a close anywhere inside a frame, including its length
/// prefix, is an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<LinkFrame>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    if !prefix_state(filled)? {
        return Ok(None);
    }
    let len = checked_len(len_bytes)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    LinkFrame::decode(&payload).map(Some)
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &LinkFrame) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let buf = frame.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`]
pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<Option<LinkFrame>, LinkError> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if !prefix_state(filled)? {
        return Ok(None);
    }
    let len = checked_len(len_bytes)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    LinkFrame::decode(&payload).map(Some)
}

/// Blocking counterpart of [`write_frame`]
pub fn write_frame_blocking<W: Write>(writer: &mut W, frame: &LinkFrame) -> Result<(), LinkError> {
    let buf = frame.encode()?;
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Mode;
    use crate::results::{IterationKind, IterationSample, ResultValue, ThreadResult, TimeUnit};
    use std::io::Cursor;

    fn report() -> LinkFrame {
        let value = ResultValue::throughput("bench", 1000, 1_000_000_000, TimeUnit::Seconds);
        let sample = IterationSample::from_threads(
            1,
            IterationKind::Measurement,
            1_000_000_000,
            vec![ThreadResult::new(value)],
        )
        .unwrap();
        LinkFrame::ResultsReport {
            descriptor: BenchmarkDescriptor::new("bench", Mode::Throughput, 1),
            result: RunResult::from_iterations(&[sample]).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_async_stream_of_frames() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        write_frame(&mut client, &LinkFrame::InfraRequest(InfraRequest::Options))
            .await
            .unwrap();
        write_frame(&mut client, &report()).await.unwrap();
        write_frame(&mut client, &LinkFrame::Finish).await.unwrap();
        drop(client);

        assert_eq!(
            read_frame(&mut server).await.unwrap(),
            Some(LinkFrame::InfraRequest(InfraRequest::Options))
        );
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(report()));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(LinkFrame::Finish));
        // closed on a boundary
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[test]
    fn test_blocking_codec_reads_async_encoding() {
        let buf = report().encode().unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame_blocking(&mut cursor).unwrap(), Some(report()));
        assert_eq!(read_frame_blocking(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let len = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        assert!(matches!(
            read_frame_blocking(&mut cursor),
            Err(LinkError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut buf = LinkFrame::Finish.encode().unwrap();
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame_blocking(&mut cursor).unwrap(), Some(LinkFrame::Finish));
        assert!(matches!(read_frame_blocking(&mut cursor), Err(LinkError::Io(_))));
    }

    #[test]
    fn test_partial_length_prefix_is_an_error() {
        for cut in 1..4 {
            let mut buf = LinkFrame::Finish.encode().unwrap();
            buf.extend_from_slice(&[7u8; 4][..cut]);
            let mut cursor = Cursor::new(buf);
            assert_eq!(read_frame_blocking(&mut cursor).unwrap(), Some(LinkFrame::Finish));
            match read_frame_blocking(&mut cursor) {
                Err(LinkError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
                other => panic!("cut after {} bytes gave {:?}", cut, other),
            }
        }
    }

    #[tokio::test]
    async fn test_async_partial_length_prefix_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[1, 0]).await.unwrap();
        drop(client);
        match read_frame(&mut server).await {
            Err(LinkError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected an I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_report_near_the_frame_limit_round_trips() {
        let frame = large_report(MAX_FRAME_SIZE - 64 * 1024);
        let buf = frame.encode().unwrap();
        assert!(buf.len() > MAX_FRAME_SIZE / 2);
        assert!(buf.len() <= MAX_FRAME_SIZE + 4);
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame_blocking(&mut cursor).unwrap(), Some(frame));
    }

    /// A results report whose secondary label pads it to roughly `bytes`
    fn large_report(bytes: usize) -> LinkFrame {
        let value = ResultValue::throughput("bench", 1000, 1_000_000_000, TimeUnit::Seconds);
        let thread = ThreadResult::new(value).with_secondary(
            "x".repeat(bytes),
            ResultValue::throughput("pad", 1, 1, TimeUnit::Seconds),
        );
        let sample =
            IterationSample::from_threads(1, IterationKind::Measurement, 1_000_000_000, vec![thread])
                .unwrap();
        LinkFrame::ResultsReport {
            descriptor: BenchmarkDescriptor::new("bench", Mode::Throughput, 1),
            result: RunResult::from_iterations(&[sample]).unwrap(),
        }
    }

    #[test]
    fn test_garbage_payload_fails_to_decode() {
        let mut buf = 2u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0xff, 0xff]);
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_frame_blocking(&mut cursor),
            Err(LinkError::Decode(_))
        ));
    }
}
