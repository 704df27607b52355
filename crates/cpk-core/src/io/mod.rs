//! External collaborators of the install pipeline.
//!
//! The coordinator only talks to these traits, so tests can substitute any
//! of them; the default implementations live in the submodules.

pub mod copy;
pub mod download;
pub mod extract;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::reporter::Reporter;

pub use download::HttpFetcher;
pub use extract::ZipExtractor;
pub use verify::VerificationPolicy;

/// Turns a source reference into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Local path for `source`. URLs are downloaded (or served from cache);
    /// local paths are only checked for existence.
    async fn fetch(&self, source: &str, cancel: &CancellationToken) -> Result<PathBuf>;
}

/// Integrity and authenticity checks on a fetched archive.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// File names that must sit next to `archive_name` before
    /// [`Verifier::verify`] runs (checksum lists, signatures).
    fn sidecars(&self, archive_name: &str) -> Vec<String>;

    /// Pass or fail; failures are [`crate::PackError::IntegrityFailed`].
    async fn verify(&self, archive: &Path) -> Result<()>;
}

/// Structural facts about a pack archive.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    /// Folder prefix to strip on extraction, `""` or `"folder/"`.
    pub prefix: String,
    /// Raw bytes of the bundled descriptor.
    pub descriptor: Vec<u8>,
}

/// Everything needed to extract one archive.
pub struct ExtractRequest {
    /// Archive to read.
    pub archive: PathBuf,
    /// Destination directory.
    pub dest: PathBuf,
    /// Folder prefix stripped from entry names.
    pub strip_prefix: String,
    /// Label used for progress reports.
    pub pack: String,
    /// Progress sink.
    pub reporter: Arc<dyn Reporter>,
    /// Abort signal, polled between chunks.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ExtractRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractRequest")
            .field("archive", &self.archive)
            .field("dest", &self.dest)
            .field("strip_prefix", &self.strip_prefix)
            .field("pack", &self.pack)
            .finish_non_exhaustive()
    }
}

/// Archive inspection and extraction.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Locate `descriptor_name` inside the archive and read it.
    async fn inspect(&self, archive: &Path, descriptor_name: &str) -> Result<ArchiveLayout>;

    /// Extract every entry, rejecting names that escape the destination.
    async fn extract(&self, request: ExtractRequest) -> Result<Vec<PathBuf>>;
}
