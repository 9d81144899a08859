//! # Litchi CFB
//!
//! A read-write engine for the OLE2 Compound File Binary Format, the container behind
//! legacy Microsoft Office documents (.doc, .xls, .ppt), Outlook messages and many
//! other Windows file types.
//!
//! ## Features
//!
//! - **Both versions**: 512-byte (version 3) and 4096-byte (version 4) sectors
//! - **Full directory support**: storages, streams, CLSIDs, state bits and timestamps
//! - **Transparent mini streams**: small streams move in and out of the mini stream as they grow or shrink
//! - **Deterministic commits**: the same container always serializes to the same bytes
//! - **Property sets**: typed access to `SummaryInformation` and friends
//! - **Integrity checks**: cycles, cross-linked chains and truncated files are reported as errors
//!
//! ## Example: Building a container
//!
//! ```rust
//! use litchi_cfb::ole::CompoundFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cfb = CompoundFile::create();
//! cfb.put_stream(&["WordDocument"], b"document body")?;
//! cfb.put_stream(&["ObjectPool", "_1234", "\u{1}Ole"], &[0u8; 20])?;
//!
//! let bytes = cfb.commit()?;
//! assert_eq!(&bytes[..4], &[0xD0, 0xCF, 0x11, 0xE0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: Reading streams
//!
//! ```rust,no_run
//! use litchi_cfb::ole::CompoundFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfb = CompoundFile::open_path("document.doc")?;
//!
//! for path in cfb.list_streams() {
//!     println!("Stream: {}", path.join("/"));
//! }
//!
//! let data = cfb.open_stream(&["WordDocument"])?;
//! println!("Stream size: {} bytes", data.len());
//!
//! let metadata = cfb.metadata()?;
//! println!("Title: {:?}", metadata.title);
//! # Ok(())
//! # }
//! ```

/// Format-independent helpers
///
/// Little-endian readers and writers, FILETIME conversion and container detection.
pub mod common;

/// OLE2 compound file engine
///
/// Sector storage, allocation tables, the directory tree, stream I/O, commit and
/// property sets.
pub mod ole;

// Re-export commonly used types for convenience
pub use ole::{CfbError, CompoundFile, CompoundFileOptions, Result, Version};
