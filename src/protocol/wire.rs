//! Wire protocol utilities
//!
//! Async helpers for reading and writing control lines and length-prefixed
//! payload frames.

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

use crate::error::TorrentError;

/// Size of the big-endian length prefix in front of every payload
pub const LENGTH_HEADER_SIZE: usize = 8;

/// Longest control line accepted, excluding the newline
pub const MAX_LINE_LENGTH: usize = 4096;

/// Upper bound on the buffer reserved up front for a payload
const INITIAL_PAYLOAD_CAPACITY: u64 = 1 << 20;

/// Largest single read while receiving a payload
const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Encode the length prefix for a payload
pub fn encode_frame_header(length: u64) -> [u8; LENGTH_HEADER_SIZE] {
    length.to_be_bytes()
}

/// Read one newline-terminated control line
///
/// Returns `None` when the peer closed the connection before sending
/// anything. The trailing `\r\n` or `\n` is stripped.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, peer: &str) -> Result<Option<String>> {
    let mut line = String::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_line(&mut line)
        .await?;

    if read == 0 {
        trace!("{} closed the connection while awaiting a line", peer);
        return Ok(None);
    }

    if !line.ends_with('\n') {
        if line.len() > MAX_LINE_LENGTH {
            return Err(TorrentError::protocol_violation_with_peer(
                format!("Control line exceeds {} bytes", MAX_LINE_LENGTH),
                peer,
            )
            .into());
        }
        // Final unterminated line before EOF
        debug!("{} sent an unterminated line before closing", peer);
    }

    let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
    trace!("Read line from {}: {:?}", peer, trimmed);
    Ok(Some(trimmed))
}

/// Write a control line, appending the newline
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a length-prefixed payload
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&encode_frame_header(payload.len() as u64)).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    trace!("Wrote frame of {} bytes", payload.len());
    Ok(())
}

/// Read a length-prefixed payload
///
/// A close before the full header or the full payload arrives is a
/// `TransferIncomplete` error; it is never reported as a short payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, peer: &str) -> Result<Vec<u8>> {
    read_frame_inner(reader, peer, None).await
}

/// Read a length-prefixed payload, failing when no byte arrives for `idle`
///
/// The limit applies to each read, not to the whole frame: a transfer that
/// keeps making progress completes however long it takes.
pub async fn read_frame_idle<R: AsyncRead + Unpin>(reader: &mut R, peer: &str, idle: Duration) -> Result<Vec<u8>> {
    read_frame_inner(reader, peer, Some(idle)).await
}

async fn read_frame_inner<R: AsyncRead + Unpin>(reader: &mut R, peer: &str, idle: Option<Duration>) -> Result<Vec<u8>> {
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    let mut filled = 0;
    while filled < LENGTH_HEADER_SIZE {
        let n = read_some(reader, &mut header[filled..], peer, idle).await?;
        if n == 0 {
            return Err(TorrentError::transfer_incomplete(
                "Connection closed before the length header",
                peer,
                LENGTH_HEADER_SIZE as u64,
                filled as u64,
            )
            .into());
        }
        filled += n;
    }

    let expected = u64::from_be_bytes(header);
    debug!("Expecting {} bytes from {}", expected, peer);

    let mut payload = Vec::with_capacity(expected.min(INITIAL_PAYLOAD_CAPACITY) as usize);
    let mut chunk = vec![0u8; expected.min(READ_CHUNK_SIZE) as usize];
    let mut received = 0u64;
    while received < expected {
        let want = (expected - received).min(READ_CHUNK_SIZE) as usize;
        let n = read_some(reader, &mut chunk[..want], peer, idle).await?;
        if n == 0 {
            return Err(TorrentError::transfer_incomplete(
                "Connection closed before the full payload",
                peer,
                expected,
                received,
            )
            .into());
        }
        payload.extend_from_slice(&chunk[..n]);
        received += n as u64;
    }

    Ok(payload)
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    peer: &str,
    idle: Option<Duration>,
) -> Result<usize> {
    let n = match idle {
        None => reader.read(buf).await?,
        Some(limit) => timeout(limit, reader.read(buf)).await.map_err(|e| {
            TorrentError::connectivity_error_full(
                format!("No data for {}s", limit.as_secs()),
                peer.to_string(),
                e.to_string(),
            )
        })??,
    };
    Ok(n)
}
