//! OLE2 Compound File Binary Format.
//!
//! A compound file is a small file system inside one file: a tree of storages
//! (directories) and streams (files) whose bytes are spread over fixed-size sectors.
//! Sector chains are recorded in the FAT; streams below 4096 bytes live in 64-byte
//! mini sectors inside the mini stream and are chained through the MiniFAT.
//!
//! The whole container is decoded into memory on open and re-encoded on commit.
//!
//! # Examples
//!
//! ```rust
//! use litchi_cfb::ole::{CompoundFile, StorageMode};
//!
//! let mut cfb = CompoundFile::create();
//! let id = cfb.put_stream(&["Workbook"], &[0u8; 100]).unwrap();
//! assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Mini);
//!
//! cfb.write_at(id, 100, &[1u8; 5000]).unwrap();
//! assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Big);
//!
//! let bytes = cfb.commit().unwrap();
//! let reopened = CompoundFile::from_bytes(&bytes).unwrap();
//! assert_eq!(reopened.open_stream(&["Workbook"]).unwrap().len(), 5100);
//! ```

/// Constants for the compound file format and property sets
pub mod consts;

/// Windows code page conversion
pub mod codepage;

mod commit;
mod config;
mod difat;
/// Directory entries and the directory tree
pub mod directory;
mod error;
/// FAT and MiniFAT
pub mod fat;
mod file;
mod header;
/// Property set streams
pub mod hpsf;
mod ministream;
/// Sector store
pub mod sector;
mod stream;

#[cfg(test)]
mod tests;

// Re-export public types for convenient access
pub use config::CompoundFileOptions;
pub use directory::{DirEntry, EntryId, ObjectType, ROOT_ID};
pub use error::{CfbError, Result};
pub use fat::{AllocationTable, BlockSource, TableKind};
pub use file::CompoundFile;
pub use header::{Header, Version};
pub use hpsf::{CustomProperties, OleMetadata, Property, PropertySet, Section, Variant};
pub use sector::SectorStore;
pub use stream::StorageMode;
