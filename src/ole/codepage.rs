//! Code page conversion for property set strings.
//!
//! Property sets store narrow strings (`VT_LPSTR`) and dictionary names in the code
//! page named by the section's `PID_CODEPAGE` property. Code page 1200 means UTF-16LE,
//! which `encoding_rs` can decode but not encode, so it is handled here directly.
//!
//! Unknown code pages fall back to Windows-1252.

use encoding_rs::Encoding;

use super::consts::CODEPAGE_UTF16;
use super::error::{CfbError, Result};

/// Map a Windows code page identifier to an `encoding_rs` encoding.
///
/// Returns `None` for code pages without an `encoding_rs` counterpart (including 1200,
/// which callers handle as UTF-16LE).
#[inline]
pub fn codepage_to_encoding(codepage: u16) -> Option<&'static Encoding> {
    match codepage {
        437 => Some(encoding_rs::IBM866), // closest available to CP437

        874 => Some(encoding_rs::WINDOWS_874),
        1250 => Some(encoding_rs::WINDOWS_1250),
        1251 => Some(encoding_rs::WINDOWS_1251),
        1252 => Some(encoding_rs::WINDOWS_1252),
        1253 => Some(encoding_rs::WINDOWS_1253),
        1254 => Some(encoding_rs::WINDOWS_1254),
        1255 => Some(encoding_rs::WINDOWS_1255),
        1256 => Some(encoding_rs::WINDOWS_1256),
        1257 => Some(encoding_rs::WINDOWS_1257),
        1258 => Some(encoding_rs::WINDOWS_1258),

        932 => Some(encoding_rs::SHIFT_JIS),
        936 => Some(encoding_rs::GBK),
        949 => Some(encoding_rs::EUC_KR),
        950 => Some(encoding_rs::BIG5),
        20932 => Some(encoding_rs::EUC_JP),
        54936 => Some(encoding_rs::GB18030),

        28592 => Some(encoding_rs::ISO_8859_2),
        28593 => Some(encoding_rs::ISO_8859_3),
        28594 => Some(encoding_rs::ISO_8859_4),
        28595 => Some(encoding_rs::ISO_8859_5),
        28596 => Some(encoding_rs::ISO_8859_6),
        28597 => Some(encoding_rs::ISO_8859_7),
        28598 => Some(encoding_rs::ISO_8859_8),
        28605 => Some(encoding_rs::ISO_8859_15),

        10000 => Some(encoding_rs::MACINTOSH),
        65001 => Some(encoding_rs::UTF_8),

        _ => None,
    }
}

#[inline]
fn encoding_or_default(codepage: u16) -> &'static Encoding {
    codepage_to_encoding(codepage).unwrap_or(encoding_rs::WINDOWS_1252)
}

/// Decode a (possibly NUL-terminated) string stored in `codepage`.
///
/// # Examples
///
/// ```
/// use litchi_cfb::ole::codepage::decode_bytes;
///
/// assert_eq!(decode_bytes(b"Hello\x00", 1252), "Hello");
/// assert_eq!(decode_bytes(b"H\x00i\x00\x00\x00", 1200), "Hi");
/// ```
pub fn decode_bytes(bytes: &[u8], codepage: u16) -> String {
    if codepage == CODEPAGE_UTF16 {
        return decode_utf16le(bytes);
    }
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    encoding_or_default(codepage).decode_without_bom_handling(&bytes[..end]).0.into_owned()
}

/// Encode a string into `codepage`, without a terminator.
///
/// Fails with `InvalidArgument` when the string holds a NUL or a character the code
/// page cannot represent, since neither would decode back to the same string.
///
/// # Examples
///
/// ```
/// use litchi_cfb::ole::codepage::encode_str;
///
/// assert_eq!(encode_str("Grüße", 1252).unwrap(), b"Gr\xFC\xDFe");
/// assert!(encode_str("日本", 1252).is_err());
/// ```
pub fn encode_str(text: &str, codepage: u16) -> Result<Vec<u8>> {
    if text.contains('\0') {
        return Err(CfbError::InvalidArgument(format!(
            "string {:?} contains a NUL character",
            text
        )));
    }
    if codepage == CODEPAGE_UTF16 {
        return Ok(encode_utf16le(text));
    }
    let encoding = encoding_or_default(codepage);
    let (bytes, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(CfbError::InvalidArgument(format!(
            "string {:?} cannot be represented in code page {} ({})",
            text,
            codepage,
            encoding.name()
        )));
    }
    Ok(bytes.into_owned())
}

/// Width of the terminator a string needs in `codepage`.
#[inline]
pub fn terminator_len(codepage: u16) -> usize {
    if codepage == CODEPAGE_UTF16 { 2 } else { 1 }
}

/// Decode UTF-16LE bytes, stopping at the first NUL code unit.
///
/// Invalid sequences are replaced with U+FFFD and an odd trailing byte is ignored.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as UTF-16LE, without a terminator.
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
