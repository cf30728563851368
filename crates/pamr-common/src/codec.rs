//! Big-endian integer codec over byte buffers.
//!
//! Every accessor is bounds-checked: reading or writing past the end of the
//! buffer yields [`CodecError::OutOfBounds`] instead of panicking.

use thiserror::Error;

/// Error returned when an access does not fit in the buffer.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("out of bounds: {width} bytes at offset {offset}, buffer is {len} bytes")]
pub struct CodecError {
    /// Requested offset.
    pub offset: usize,
    /// Width of the integer in bytes.
    pub width: usize,
    /// Buffer length.
    pub len: usize,
}

fn window(len: usize, offset: usize, width: usize) -> Result<std::ops::Range<usize>, CodecError> {
    let end = offset
        .checked_add(width)
        .filter(|end| *end <= len)
        .ok_or(CodecError { offset, width, len })?;
    Ok(offset..end)
}

/// Reads a big-endian `i32` at `offset`.
///
/// # Errors
///
/// Returns [`CodecError`] if `offset + 4` exceeds the buffer.
pub fn read_i32(buf: &[u8], offset: usize) -> Result<i32, CodecError> {
    let range = window(buf.len(), offset, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[range]);
    Ok(i32::from_be_bytes(raw))
}

/// Reads a big-endian `i64` at `offset`.
///
/// # Errors
///
/// Returns [`CodecError`] if `offset + 8` exceeds the buffer.
pub fn read_i64(buf: &[u8], offset: usize) -> Result<i64, CodecError> {
    let range = window(buf.len(), offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[range]);
    Ok(i64::from_be_bytes(raw))
}

/// Writes `value` big-endian at `offset`.
///
/// # Errors
///
/// Returns [`CodecError`] if `offset + 4` exceeds the buffer.
pub fn write_i32(buf: &mut [u8], offset: usize, value: i32) -> Result<(), CodecError> {
    let range = window(buf.len(), offset, 4)?;
    buf[range].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Writes `value` big-endian at `offset`.
///
/// # Errors
///
/// Returns [`CodecError`] if `offset + 8` exceeds the buffer.
pub fn write_i64(buf: &mut [u8], offset: usize, value: i64) -> Result<(), CodecError> {
    let range = window(buf.len(), offset, 8)?;
    buf[range].copy_from_slice(&value.to_be_bytes());
    Ok(())
}
