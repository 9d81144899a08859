//! Directory entries and the storage/stream namespace.

pub mod entry;
pub mod tree;

pub use entry::{DirEntry, ObjectType, compare_names, format_clsid, validate_name};
pub use tree::{Directory, EntryId, ROOT_ID};
