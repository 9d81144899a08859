//! Binary data parsing utilities shared by the container and property-set codecs.
//!
//! This module provides bounds-checked functions for reading little-endian values from
//! byte slices and appending little-endian values to output buffers. Every on-disk
//! structure of the compound file format is little-endian.

use thiserror::Error;
use zerocopy::{F32, F64, FromBytes, I16, I32, I64, LE, U16, U32, U64};

/// Binary parsing error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinaryError {
    /// Not enough data to read the requested type
    #[error("Insufficient data: expected {expected}, got {available}")]
    InsufficientData { expected: usize, available: usize },
    /// Failed to parse the data
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

#[inline]
fn window(data: &[u8], offset: usize, len: usize) -> BinaryResult<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| BinaryError::ParseError(format!("offset {} overflows", offset)))?;
    if end > data.len() {
        return Err(BinaryError::InsufficientData {
            expected: end,
            available: data.len(),
        });
    }
    Ok(&data[offset..end])
}

/// Read a little-endian u16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use litchi_cfb::common::binary::read_u16_le;
/// let data = [0x34, 0x12, 0x78, 0x56];
/// assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
/// assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
/// ```
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> BinaryResult<u16> {
    U16::<LE>::read_from_bytes(window(data, offset, 2)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u16".to_string()))
}

/// Read a little-endian i16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use litchi_cfb::common::binary::read_i16_le;
/// let data = [0xFF, 0xFF];
/// assert_eq!(read_i16_le(&data, 0).unwrap(), -1i16);
/// ```
#[inline]
pub fn read_i16_le(data: &[u8], offset: usize) -> BinaryResult<i16> {
    I16::<LE>::read_from_bytes(window(data, offset, 2)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read i16".to_string()))
}

/// Read a little-endian u32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use litchi_cfb::common::binary::read_u32_le;
/// let data = [0x78, 0x56, 0x34, 0x12];
/// assert_eq!(read_u32_le(&data, 0).unwrap(), 0x12345678);
/// ```
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> BinaryResult<u32> {
    U32::<LE>::read_from_bytes(window(data, offset, 4)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u32".to_string()))
}

/// Read a little-endian i32 from a byte slice at the given offset.
#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> BinaryResult<i32> {
    I32::<LE>::read_from_bytes(window(data, offset, 4)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read i32".to_string()))
}

/// Read a little-endian u64 from a byte slice at the given offset.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> BinaryResult<u64> {
    U64::<LE>::read_from_bytes(window(data, offset, 8)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u64".to_string()))
}

/// Read a little-endian i64 from a byte slice at the given offset.
#[inline]
pub fn read_i64_le(data: &[u8], offset: usize) -> BinaryResult<i64> {
    I64::<LE>::read_from_bytes(window(data, offset, 8)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read i64".to_string()))
}

/// Read a little-endian f32 from a byte slice at the given offset.
#[inline]
pub fn read_f32_le(data: &[u8], offset: usize) -> BinaryResult<f32> {
    F32::<LE>::read_from_bytes(window(data, offset, 4)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read f32".to_string()))
}

/// Read a little-endian f64 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use litchi_cfb::common::binary::read_f64_le;
/// let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF0, 0x3F];
/// assert!((read_f64_le(&data, 0).unwrap() - 1.0).abs() < f64::EPSILON);
/// ```
#[inline]
pub fn read_f64_le(data: &[u8], offset: usize) -> BinaryResult<f64> {
    F64::<LE>::read_from_bytes(window(data, offset, 8)?)
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read f64".to_string()))
}

/// Borrow `len` bytes starting at `offset`.
#[inline]
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> BinaryResult<&[u8]> {
    window(data, offset, len)
}

/// Decode a little-endian `u32` table (FAT, MiniFAT, DIFAT payloads).
///
/// Trailing bytes that do not form a whole entry are ignored.
pub fn read_u32_table(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Append a little-endian u16.
#[inline]
pub fn write_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Append a little-endian u32.
#[inline]
pub fn write_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Append a little-endian u64.
#[inline]
pub fn write_u64_le(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Overwrite four bytes at `offset` with a little-endian u32.
///
/// The caller guarantees `offset + 4 <= out.len()`.
#[inline]
pub fn patch_u32_le(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Pad `out` with zero bytes up to the next multiple of four.
#[inline]
pub fn pad_to_4(out: &mut Vec<u8>) {
    let rem = out.len() % 4;
    if rem != 0 {
        out.resize(out.len() + (4 - rem), 0);
    }
}

/// Round `len` up to the next multiple of four.
#[inline]
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_out_of_bounds() {
        let data = [0u8; 3];
        assert_eq!(
            read_u32_le(&data, 0),
            Err(BinaryError::InsufficientData {
                expected: 4,
                available: 3
            })
        );
        assert!(read_u16_le(&data, 2).is_err());
        assert!(read_u16_le(&data, usize::MAX).is_err());
    }

    #[test]
    fn test_signed_and_float_reads() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(-2i64).to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        assert_eq!(read_i64_le(&buf, 0).unwrap(), -2);
        assert_eq!(read_f32_le(&buf, 8).unwrap(), 1.5);
    }

    #[test]
    fn test_u32_table() {
        let data = [1, 0, 0, 0, 0xFE, 0xFF, 0xFF, 0xFF, 9];
        assert_eq!(read_u32_table(&data), vec![1, 0xFFFF_FFFE]);
    }

    #[test]
    fn test_padding_helpers() {
        let mut out = vec![1u8, 2, 3, 4, 5];
        pad_to_4(&mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(&out[5..], &[0, 0, 0]);

        let mut aligned = vec![0u8; 4];
        pad_to_4(&mut aligned);
        assert_eq!(aligned.len(), 4);

        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(8), 8);
    }

    #[test]
    fn test_writers_round_trip() {
        let mut out = Vec::new();
        write_u16_le(&mut out, 0xFFFE);
        write_u32_le(&mut out, 7);
        write_u64_le(&mut out, 1 << 40);
        assert_eq!(read_u16_le(&out, 0).unwrap(), 0xFFFE);
        assert_eq!(read_u32_le(&out, 2).unwrap(), 7);
        assert_eq!(read_u64_le(&out, 6).unwrap(), 1 << 40);

        patch_u32_le(&mut out, 2, 9);
        assert_eq!(read_u32_le(&out, 2).unwrap(), 9);
    }
}
