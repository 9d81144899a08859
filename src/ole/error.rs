//! Error type for compound file operations.
//!
//! Structural damage (bad header, broken chains, inconsistent directory) is always
//! reported; nothing in the container layer tries to repair it. Only property values
//! of unknown type degrade gracefully, and that happens inside the codec without an error.

use thiserror::Error;

use crate::common::binary::BinaryError;
use crate::common::detection::ContainerKind;
use crate::ole::fat::TableKind;

/// Main error type for compound file operations.
#[derive(Error, Debug)]
pub enum CfbError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad signature, byte order, or sector size exponents
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// The input is a different container format altogether
    #[error("Wrong container format: found a {detected}, expected an OLE2 compound file")]
    WrongContainerFormat { detected: ContainerKind },

    /// Header declares a version or layout this crate does not handle
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    /// Cycle, out-of-range pointer, or wrong length in an allocation chain
    #[error("Corrupt {table} chain at sector {sector}: {reason}")]
    CorruptChain {
        table: TableKind,
        sector: u32,
        reason: String,
    },

    /// Directory structure is inconsistent
    #[error("Corrupt directory: {0}")]
    CorruptDirectory(String),

    /// Fewer bytes available than the structures claim
    #[error("Truncated input: expected {expected} bytes, got {available}")]
    TruncatedInput { expected: u64, available: u64 },

    /// A sibling with the same name already exists
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Name too long, empty, or containing a forbidden character
    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage still has children
    #[error("Storage is not empty: {0}")]
    NotEmpty(String),

    /// Entry exists but is not a stream
    #[error("Not a stream: {0}")]
    NotAStream(String),

    /// Entry exists but is not a storage
    #[error("Not a storage: {0}")]
    NotAStorage(String),

    /// Stream access beyond the declared size
    #[error("Out of range: offset {offset} + length {length} exceeds stream size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    /// Sector or entry index beyond the current count
    #[error("Index {index} out of bounds (count {count})")]
    OutOfBounds { index: u32, count: u32 },

    /// Caller passed an argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The sector store reached its configured limit
    #[error("Storage full: sector limit {limit} reached")]
    StorageFull { limit: u32 },

    /// Property set bytes are structurally invalid
    #[error("Malformed property set: {0}")]
    MalformedPropertySet(String),
}

impl From<BinaryError> for CfbError {
    fn from(err: BinaryError) -> Self {
        match err {
            BinaryError::InsufficientData {
                expected,
                available,
            } => CfbError::TruncatedInput {
                expected: expected as u64,
                available: available as u64,
            },
            BinaryError::ParseError(msg) => CfbError::MalformedPropertySet(msg),
        }
    }
}

/// Result type for compound file operations.
pub type Result<T> = std::result::Result<T, CfbError>;
