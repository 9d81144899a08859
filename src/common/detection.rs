//! Container signature sniffing.
//!
//! Only the leading bytes are inspected. This is enough to tell a compound file apart
//! from the ZIP packages used by OOXML/ODF, which is the most common way a caller ends up
//! handing the wrong kind of document to this crate.

use std::fmt;

use crate::ole::consts::MAGIC;

/// Local file header signature of a ZIP archive.
pub const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Signature of an empty ZIP archive (end of central directory record only).
pub const ZIP_EMPTY_MAGIC: &[u8; 4] = b"PK\x05\x06";

/// Kind of container recognised from a byte signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// OLE2 compound file (`.doc`, `.xls`, `.ppt`, `.msg`, ...)
    Ole2,
    /// ZIP package (`.docx`, `.xlsx`, `.pptx`, `.odt`, ...)
    Zip,
    /// Anything else
    Unknown,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Ole2 => write!(f, "OLE2 compound file"),
            ContainerKind::Zip => write!(f, "ZIP package (OOXML/ODF)"),
            ContainerKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identify the container kind from the first bytes of a file.
///
/// # Examples
///
/// ```
/// use litchi_cfb::common::detection::{ContainerKind, detect_container};
/// assert_eq!(detect_container(b"PK\x03\x04rest"), ContainerKind::Zip);
/// assert_eq!(detect_container(b"hello"), ContainerKind::Unknown);
/// ```
pub fn detect_container(bytes: &[u8]) -> ContainerKind {
    if bytes.starts_with(MAGIC) {
        ContainerKind::Ole2
    } else if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        ContainerKind::Zip
    } else {
        ContainerKind::Unknown
    }
}

/// Check whether the bytes start with the compound file signature.
#[inline]
pub fn is_ole_file(bytes: &[u8]) -> bool {
    detect_container(bytes) == ContainerKind::Ole2
}
