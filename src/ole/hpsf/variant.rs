//! Typed property values.
//!
//! Every value on disk starts with a 16-bit type tag and two bytes of padding, followed
//! by the payload padded to a multiple of four bytes. `VT_VECTOR` values hold a count
//! followed by elements of the base type: two-byte scalars are packed, strings and
//! nested variants are each padded to four bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::binary::{
    align4, read_bytes, read_f32_le, read_f64_le, read_i16_le, read_i32_le,
    read_i64_le, read_u16_le, read_u32_le, read_u64_le, write_u16_le, write_u32_le,
    write_u64_le,
};
use crate::common::filetime::filetime_to_datetime;
use crate::ole::codepage::{decode_bytes, decode_utf16le, encode_str, terminator_len};
use crate::ole::consts::*;
use crate::ole::error::{CfbError, Result};

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Empty,
    Null,
    I1(i8),
    I2(i16),
    I4(i32),
    I8(i64),
    UI1(u8),
    UI2(u16),
    UI4(u32),
    UI8(u64),
    R4(f32),
    R8(f64),
    /// Currency, scaled by 10 000
    Currency(i64),
    /// OLE automation date (days since 1899-12-30)
    Date(f64),
    /// HRESULT / SCODE
    Error(u32),
    Bool(bool),
    /// String in the section's code page
    Lpstr(String),
    /// UTF-16 string
    Lpwstr(String),
    /// Raw FILETIME (100ns ticks since 1601-01-01)
    Filetime(u64),
    Blob(Vec<u8>),
    /// Clipboard data: format tag and payload
    ClipboardData { format: i32, data: Vec<u8> },
    Clsid([u8; 16]),
    /// `VT_VECTOR | element_type`
    Vector { element_type: u16, items: Vec<Variant> },
    /// A type this codec does not understand, kept as raw payload bytes
    Unknown { type_tag: u16, bytes: Vec<u8> },
}

impl Variant {
    /// On-disk type tag.
    pub fn type_tag(&self) -> u16 {
        match self {
            Variant::Empty => VT_EMPTY,
            Variant::Null => VT_NULL,
            Variant::I1(_) => VT_I1,
            Variant::I2(_) => VT_I2,
            Variant::I4(_) => VT_I4,
            Variant::I8(_) => VT_I8,
            Variant::UI1(_) => VT_UI1,
            Variant::UI2(_) => VT_UI2,
            Variant::UI4(_) => VT_UI4,
            Variant::UI8(_) => VT_UI8,
            Variant::R4(_) => VT_R4,
            Variant::R8(_) => VT_R8,
            Variant::Currency(_) => VT_CY,
            Variant::Date(_) => VT_DATE,
            Variant::Error(_) => VT_ERROR,
            Variant::Bool(_) => VT_BOOL,
            Variant::Lpstr(_) => VT_LPSTR,
            Variant::Lpwstr(_) => VT_LPWSTR,
            Variant::Filetime(_) => VT_FILETIME,
            Variant::Blob(_) => VT_BLOB,
            Variant::ClipboardData { .. } => VT_CF,
            Variant::Clsid(_) => VT_CLSID,
            Variant::Vector { element_type, .. } => VT_VECTOR | element_type,
            Variant::Unknown { type_tag, .. } => *type_tag,
        }
    }

    /// String content of `Lpstr` and `Lpwstr` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Lpstr(s) | Variant::Lpwstr(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content of any integer-typed value.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Variant::I1(v) => Some(v as i64),
            Variant::I2(v) => Some(v as i64),
            Variant::I4(v) => Some(v as i64),
            Variant::I8(v) => Some(v),
            Variant::UI1(v) => Some(v as i64),
            Variant::UI2(v) => Some(v as i64),
            Variant::UI4(v) => Some(v as i64),
            Variant::UI8(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Timestamp of a `Filetime` value; `None` for zero or out-of-range times.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match *self {
            Variant::Filetime(ft) => filetime_to_datetime(ft),
            _ => None,
        }
    }
}

/// Element types allowed inside `VT_VECTOR`.
fn is_vector_element(vt: u16) -> bool {
    matches!(
        vt,
        VT_I1
            | VT_UI1
            | VT_I2
            | VT_UI2
            | VT_BOOL
            | VT_I4
            | VT_UI4
            | VT_R4
            | VT_ERROR
            | VT_I8
            | VT_UI8
            | VT_R8
            | VT_CY
            | VT_DATE
            | VT_FILETIME
            | VT_LPSTR
            | VT_LPWSTR
            | VT_CF
            | VT_CLSID
            | VT_VARIANT
    )
}

/// Whether this codec can decode a value tagged `vt`.
fn is_known(vt: u16) -> bool {
    if vt & VT_VECTOR != 0 {
        return vt & !VT_VECTOR & 0xF000 == 0 && is_vector_element(vt & !VT_VECTOR);
    }
    matches!(vt, VT_EMPTY | VT_NULL | VT_BLOB) || (vt != VT_VARIANT && is_vector_element(vt))
}

fn malformed(what: impl Into<String>) -> CfbError {
    CfbError::MalformedPropertySet(what.into())
}

/// Decode the typed value at `offset` of `data`.
///
/// `end` bounds the value; a type this codec does not know keeps every byte between
/// the type header and `end`.
pub(crate) fn read_typed(data: &[u8], offset: usize, end: usize, codepage: u16) -> Result<Variant> {
    let vt = read_u16_le(data, offset)?;
    let start = offset + 4;
    if !is_known(vt) {
        let end = end.max(start).min(data.len());
        return Ok(Variant::Unknown {
            type_tag: vt,
            bytes: data.get(start..end).unwrap_or_default().to_vec(),
        });
    }
    let mut pos = start;
    read_value(data, &mut pos, vt, codepage, false)
}

/// Decode a value of type `vt` at `*pos`, advancing `*pos` past it.
///
/// `packed` is set for vector elements, where scalars are not padded.
fn read_value(data: &[u8], pos: &mut usize, vt: u16, codepage: u16, packed: bool) -> Result<Variant> {
    let at = *pos;
    let (value, len) = match vt {
        VT_EMPTY => (Variant::Empty, 0),
        VT_NULL => (Variant::Null, 0),
        VT_I1 => (Variant::I1(read_bytes(data, at, 1)?[0] as i8), 1),
        VT_UI1 => (Variant::UI1(read_bytes(data, at, 1)?[0]), 1),
        VT_I2 => (Variant::I2(read_i16_le(data, at)?), 2),
        VT_UI2 => (Variant::UI2(read_u16_le(data, at)?), 2),
        VT_BOOL => (Variant::Bool(read_u16_le(data, at)? != 0), 2),
        VT_I4 => (Variant::I4(read_i32_le(data, at)?), 4),
        VT_UI4 => (Variant::UI4(read_u32_le(data, at)?), 4),
        VT_R4 => (Variant::R4(read_f32_le(data, at)?), 4),
        VT_ERROR => (Variant::Error(read_u32_le(data, at)?), 4),
        VT_I8 => (Variant::I8(read_i64_le(data, at)?), 8),
        VT_UI8 => (Variant::UI8(read_u64_le(data, at)?), 8),
        VT_R8 => (Variant::R8(read_f64_le(data, at)?), 8),
        VT_CY => (Variant::Currency(read_i64_le(data, at)?), 8),
        VT_DATE => (Variant::Date(read_f64_le(data, at)?), 8),
        VT_FILETIME => (Variant::Filetime(read_u64_le(data, at)?), 8),
        VT_CLSID => {
            let mut clsid = [0u8; 16];
            clsid.copy_from_slice(read_bytes(data, at, 16)?);
            (Variant::Clsid(clsid), 16)
        },
        VT_LPSTR => {
            let size = read_u32_le(data, at)? as usize;
            let bytes = read_bytes(data, at + 4, size)?;
            (Variant::Lpstr(decode_bytes(bytes, codepage)), align4(4 + size))
        },
        VT_LPWSTR => {
            let chars = read_u32_le(data, at)? as usize;
            let size = chars
                .checked_mul(2)
                .ok_or_else(|| malformed("string length overflows"))?;
            let bytes = read_bytes(data, at + 4, size)?;
            (Variant::Lpwstr(decode_utf16le(bytes)), align4(4 + size))
        },
        VT_BLOB => {
            let size = read_u32_le(data, at)? as usize;
            let bytes = read_bytes(data, at + 4, size)?;
            (Variant::Blob(bytes.to_vec()), align4(4 + size))
        },
        VT_CF => {
            let size = read_u32_le(data, at)? as usize;
            if size < 4 {
                return Err(malformed(format!("clipboard data of {} bytes", size)));
            }
            let format = read_i32_le(data, at + 4)?;
            let bytes = read_bytes(data, at + 8, size - 4)?;
            (
                Variant::ClipboardData {
                    format,
                    data: bytes.to_vec(),
                },
                align4(4 + size),
            )
        },
        VT_VARIANT => {
            let inner = read_u16_le(data, at)?;
            if inner == VT_VARIANT || !is_known(inner) {
                return Err(malformed(format!(
                    "vector element of unsupported type 0x{:04X}",
                    inner
                )));
            }
            let mut inner_pos = at + 4;
            let value = read_value(data, &mut inner_pos, inner, codepage, false)?;
            (value, align4(inner_pos - at))
        },
        vector if vector & VT_VECTOR != 0 => {
            let element_type = vector & !VT_VECTOR;
            let count = read_u32_le(data, at)? as usize;
            let remaining = data.len().saturating_sub(at + 4);
            if count > remaining {
                return Err(malformed(format!(
                    "vector claims {} elements in {} bytes",
                    count, remaining
                )));
            }
            let mut items = Vec::with_capacity(count);
            let mut item_pos = at + 4;
            for _ in 0..count {
                items.push(read_value(data, &mut item_pos, element_type, codepage, true)?);
            }
            (
                Variant::Vector {
                    element_type,
                    items,
                },
                align4(item_pos - at),
            )
        },
        other => {
            return Err(malformed(format!("unsupported type 0x{:04X}", other)));
        },
    };
    *pos = at + if packed { len } else { align4(len) };
    Ok(value)
}

/// Encode `value` with its type header, padded to four bytes.
///
/// An `Unknown` value is written verbatim, so it must carry a tag this codec does not
/// decode and a payload that is already a multiple of four bytes; anything else would
/// read back as a different value.
pub(crate) fn write_typed(out: &mut Vec<u8>, value: &Variant, codepage: u16) -> Result<()> {
    if let Variant::Unknown { type_tag, bytes } = value {
        if is_known(*type_tag) {
            return Err(CfbError::InvalidArgument(format!(
                "raw value tagged 0x{:04X} would decode as a typed value",
                type_tag
            )));
        }
        if bytes.len() % 4 != 0 {
            return Err(CfbError::InvalidArgument(format!(
                "raw value of type 0x{:04X} has {} bytes, not a multiple of four",
                type_tag,
                bytes.len()
            )));
        }
    }
    let start = out.len();
    write_u16_le(out, value.type_tag());
    write_u16_le(out, 0);
    if let Variant::Unknown { bytes, .. } = value {
        out.extend_from_slice(bytes);
    } else {
        write_value(out, value, codepage)?;
    }
    pad_from(out, start);
    Ok(())
}

/// Zero-pad `out` so that the bytes written since `start` are a multiple of four.
fn pad_from(out: &mut Vec<u8>, start: usize) {
    let target = start + align4(out.len() - start);
    out.resize(target, 0);
}

fn write_sized(out: &mut Vec<u8>, bytes: &[u8]) {
    let start = out.len();
    write_u32_le(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
    pad_from(out, start);
}

/// Encode the payload of `value` (no type header). Scalars are not padded.
fn write_value(out: &mut Vec<u8>, value: &Variant, codepage: u16) -> Result<()> {
    match value {
        Variant::Empty | Variant::Null => {},
        Variant::I1(v) => out.push(*v as u8),
        Variant::UI1(v) => out.push(*v),
        Variant::I2(v) => write_u16_le(out, *v as u16),
        Variant::UI2(v) => write_u16_le(out, *v),
        Variant::Bool(v) => write_u16_le(out, if *v { 0xFFFF } else { 0 }),
        Variant::I4(v) => write_u32_le(out, *v as u32),
        Variant::UI4(v) | Variant::Error(v) => write_u32_le(out, *v),
        Variant::R4(v) => write_u32_le(out, v.to_bits()),
        Variant::I8(v) | Variant::Currency(v) => write_u64_le(out, *v as u64),
        Variant::UI8(v) | Variant::Filetime(v) => write_u64_le(out, *v),
        Variant::R8(v) | Variant::Date(v) => write_u64_le(out, v.to_bits()),
        Variant::Clsid(clsid) => out.extend_from_slice(clsid),
        Variant::Lpstr(s) => {
            let mut bytes = encode_str(s, codepage)?;
            bytes.resize(bytes.len() + terminator_len(codepage), 0);
            write_sized(out, &bytes);
        },
        Variant::Lpwstr(s) => {
            let start = out.len();
            let mut bytes = encode_str(s, CODEPAGE_UTF16)?;
            bytes.extend_from_slice(&[0, 0]);
            write_u32_le(out, (bytes.len() / 2) as u32);
            out.extend_from_slice(&bytes);
            pad_from(out, start);
        },
        Variant::Blob(bytes) => write_sized(out, bytes),
        Variant::ClipboardData { format, data } => {
            let start = out.len();
            write_u32_le(out, (data.len() + 4) as u32);
            write_u32_le(out, *format as u32);
            out.extend_from_slice(data);
            pad_from(out, start);
        },
        Variant::Vector {
            element_type,
            items,
        } => {
            if !is_vector_element(*element_type) {
                return Err(CfbError::InvalidArgument(format!(
                    "type 0x{:04X} cannot be a vector element",
                    element_type
                )));
            }
            let start = out.len();
            write_u32_le(out, items.len() as u32);
            for item in items {
                if *element_type == VT_VARIANT {
                    if matches!(item, Variant::Vector { .. } | Variant::Unknown { .. }) {
                        return Err(CfbError::InvalidArgument(format!(
                            "variant vector cannot hold a value of type 0x{:04X}",
                            item.type_tag()
                        )));
                    }
                    write_typed(out, item, codepage)?;
                } else if item.type_tag() != *element_type {
                    return Err(CfbError::InvalidArgument(format!(
                        "vector of type 0x{:04X} holds a value of type 0x{:04X}",
                        element_type,
                        item.type_tag()
                    )));
                } else {
                    write_value(out, item, codepage)?;
                }
            }
            pad_from(out, start);
        },
        Variant::Unknown { type_tag, .. } => {
            return Err(CfbError::InvalidArgument(format!(
                "raw value of type 0x{:04X} cannot be a vector element",
                type_tag
            )));
        },
    }
    Ok(())
}
