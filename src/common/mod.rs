//! Format-independent helpers shared by the container engine and the property set codec.

// Submodule declarations
pub mod binary;
pub mod detection;
pub mod filetime;

// Re-exports for convenience
pub use binary::{BinaryError, BinaryResult};
pub use detection::{ContainerKind, detect_container, is_ole_file};
pub use filetime::{datetime_to_filetime, filetime_to_datetime};
