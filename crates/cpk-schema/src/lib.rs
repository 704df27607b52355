//! Shared types for the `cpk` pack manager: version algebra, pack reference
//! parsing, index entries and the pack descriptor model.

pub mod descriptor;
pub mod entry;
pub mod identity;
pub mod version;

// Re-exports
pub use descriptor::{Dependency, Descriptor, DescriptorError, Release};
pub use entry::IndexEntry;
pub use identity::{Extension, IdentityError, PackageIdentity, VersionModifier};

/// Schema version written into newly created index files.
pub const INDEX_SCHEMA_VERSION: &str = "1.1.0";
