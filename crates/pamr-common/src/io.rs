//! Frame I/O over byte streams.
//!
//! Frames are written back to back. The reader trusts the LENGTH field of
//! the header, bounded by a caller-supplied maximum.

use crate::frame::{FrameError, HEADER_SIZE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted by default (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Largest frame accepted by default: payload plus header and data body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = DEFAULT_MAX_PAYLOAD + HEADER_SIZE + 16;

/// Errors raised while moving frames over a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The peer closed the stream.
    #[error("connection closed")]
    Closed,
    /// The LENGTH field is below the header size or above the limit.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one complete frame, header included.
///
/// # Errors
///
/// Returns [`StreamError::Closed`] on end of stream, [`StreamError::Frame`]
/// if the declared length is out of bounds, [`StreamError::Io`] otherwise.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(StreamError::Closed);
        }
        Err(e) => return Err(StreamError::Io(e)),
    }

    let declared = i32::from_be_bytes(length);
    let len = usize::try_from(declared).map_err(|_| FrameError::LengthMismatch {
        declared,
        actual: 0,
    })?;
    if len < HEADER_SIZE {
        return Err(FrameError::TooShort {
            expected: HEADER_SIZE,
            actual: len,
        }
        .into());
    }
    if len > max_frame_size {
        return Err(FrameError::TooLarge {
            max: max_frame_size,
            actual: len,
        }
        .into());
    }

    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&length);
    match reader.read_exact(&mut frame[4..]).await {
        Ok(_) => Ok(frame),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(StreamError::Closed),
        Err(e) => Err(StreamError::Io(e)),
    }
}

/// Writes one serialized frame and flushes.
///
/// # Errors
///
/// Returns [`StreamError::Io`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
