//! Pack archive inspection and extraction.
//!
//! Packs are zip archives. The descriptor `Vendor.Name.pdsc` sits either at
//! the archive root or inside exactly one top-level folder, which is then
//! stripped from every entry during extraction.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipArchive;

use super::copy::{CopyError, copy_bounded};
use super::{ArchiveLayout, ExtractRequest, Extractor};
use crate::error::{PackError, Result};

fn open(archive_path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive_path)
        .map_err(|e| PackError::io(format!("opening {}", archive_path.display()), e))?;
    ZipArchive::new(file).map_err(|e| {
        PackError::ExtractionFailed(format!("{}: {e}", archive_path.display()))
    })
}

/// Names of every file (non-directory) entry in the archive.
pub fn list_entries(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open(archive_path)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index(i)
            .map_err(|e| PackError::ExtractionFailed(e.to_string()))?;
        if !file.is_dir() {
            names.push(file.name().to_string());
        }
    }
    Ok(names)
}

/// Contents of one entry, capped at `limit` bytes.
pub fn read_entry(archive_path: &Path, name: &str, limit: u64) -> Result<Vec<u8>> {
    let mut archive = open(archive_path)?;
    let mut file = archive
        .by_name(name)
        .map_err(|e| PackError::ExtractionFailed(format!("{name}: {e}")))?;
    let mut buf = Vec::new();
    copy_bounded(&mut file, &mut buf, limit, &CancellationToken::new()).map_err(|e| match e {
        CopyError::Io(e) => PackError::io(format!("reading {name}"), e),
        other => PackError::ExtractionFailed(format!("{name}: {other}")),
    })?;
    Ok(buf)
}

/// Find `descriptor_name` at the root or one folder deep and return the
/// folder prefix to strip (`""` or `"folder/"`).
pub fn locate_descriptor(entries: &[String], descriptor_name: &str) -> Result<String> {
    let mut nested_too_deep = false;
    for name in entries {
        let normalized = name.replace('\\', "/");
        let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
        if parts.last() != Some(&descriptor_name) {
            continue;
        }
        match parts.len() {
            1 => return Ok(String::new()),
            2 => return Ok(format!("{}/", parts[0])),
            _ => nested_too_deep = true,
        }
    }
    if nested_too_deep {
        return Err(PackError::ExtractionFailed(format!(
            "{descriptor_name} must be at the archive root or one folder deep"
        )));
    }
    Err(PackError::ExtractionFailed(format!(
        "archive does not contain {descriptor_name}"
    )))
}

/// Relative output path for an entry, `None` for the stripped folder itself.
fn relative_path(enclosed: &Path, strip_prefix: &str) -> Option<PathBuf> {
    let prefix = strip_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(enclosed.to_path_buf());
    }
    match enclosed.strip_prefix(prefix) {
        Ok(rest) if rest.as_os_str().is_empty() => None,
        Ok(rest) => Some(rest.to_path_buf()),
        Err(_) => Some(enclosed.to_path_buf()),
    }
}

/// Extract every entry of a zip archive into `dest_dir`.
///
/// Entry names that are absolute or climb out of `dest_dir` abort the
/// extraction. Each entry is copied in chunks, capped at `max_size` bytes and
/// checked for cancellation between chunks; a cancelled entry's partial
/// file is removed.
pub fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    strip_prefix: &str,
    max_size: u64,
    cancel: &CancellationToken,
    mut progress: impl FnMut(u64, u64),
) -> Result<Vec<PathBuf>> {
    let mut archive = open(archive_path)?;
    fs::create_dir_all(dest_dir)
        .map_err(|e| PackError::io(format!("creating {}", dest_dir.display()), e))?;

    let total = archive.len() as u64;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let mut file = archive
            .by_index(i)
            .map_err(|e| PackError::ExtractionFailed(e.to_string()))?;

        let Some(enclosed) = file.enclosed_name() else {
            return Err(PackError::ExtractionFailed(format!(
                "entry '{}' escapes the destination directory",
                file.name()
            )));
        };
        if enclosed
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(PackError::ExtractionFailed(format!(
                "entry '{}' escapes the destination directory",
                file.name()
            )));
        }
        let Some(relative) = relative_path(&enclosed, strip_prefix) else {
            continue;
        };
        let target = dest_dir.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| PackError::io(format!("creating {}", target.display()), e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PackError::io(format!("creating {}", parent.display()), e))?;
        }

        let mut out = File::create(&target)
            .map_err(|e| PackError::io(format!("creating {}", target.display()), e))?;
        if let Err(err) = copy_bounded(&mut file, &mut out, max_size, cancel) {
            drop(out);
            let _ = fs::remove_file(&target);
            return Err(match err {
                CopyError::Cancelled => PackError::Cancelled,
                CopyError::TooLarge { limit } => PackError::ExtractionFailed(format!(
                    "entry '{}' exceeds the {limit} byte limit",
                    relative.display()
                )),
                CopyError::Io(e) => PackError::io(format!("writing {}", target.display()), e),
            });
        }

        extracted.push(target);
        progress(i as u64 + 1, total);
    }

    debug!(archive = %archive_path.display(), dest = %dest_dir.display(), files = extracted.len(), "extracted");
    Ok(extracted)
}

/// [`Extractor`] backed by the `zip` crate, running on the blocking pool.
#[derive(Debug, Clone)]
pub struct ZipExtractor {
    max_file_size: u64,
}

impl ZipExtractor {
    /// Extractor capping every entry at `max_file_size` bytes.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

#[async_trait]
impl Extractor for ZipExtractor {
    async fn inspect(&self, archive: &Path, descriptor_name: &str) -> Result<ArchiveLayout> {
        let archive = archive.to_path_buf();
        let descriptor_name = descriptor_name.to_string();
        let limit = self.max_file_size;
        tokio::task::spawn_blocking(move || {
            let entries = list_entries(&archive)?;
            let prefix = locate_descriptor(&entries, &descriptor_name)?;
            let descriptor = read_entry(&archive, &format!("{prefix}{descriptor_name}"), limit)?;
            Ok(ArchiveLayout { prefix, descriptor })
        })
        .await
        .map_err(|e| PackError::ExtractionFailed(e.to_string()))?
    }

    async fn extract(&self, request: ExtractRequest) -> Result<Vec<PathBuf>> {
        let limit = self.max_file_size;
        tokio::task::spawn_blocking(move || {
            let ExtractRequest {
                archive,
                dest,
                strip_prefix,
                pack,
                reporter,
                cancel,
            } = request;
            extract_zip(&archive, &dest, &strip_prefix, limit, &cancel, |current, total| {
                reporter.extracting(&pack, current, total);
            })
        })
        .await
        .map_err(|e| PackError::ExtractionFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_locate_descriptor() {
        let root = vec!["V.P.pdsc".to_string(), "docs/readme.txt".to_string()];
        assert_eq!(locate_descriptor(&root, "V.P.pdsc").unwrap(), "");

        let nested = vec!["V.P.1.0.0/V.P.pdsc".to_string()];
        assert_eq!(locate_descriptor(&nested, "V.P.pdsc").unwrap(), "V.P.1.0.0/");

        let deep = vec!["a/b/V.P.pdsc".to_string()];
        assert!(matches!(
            locate_descriptor(&deep, "V.P.pdsc"),
            Err(PackError::ExtractionFailed(_))
        ));

        assert!(matches!(
            locate_descriptor(&root, "Other.P.pdsc"),
            Err(PackError::ExtractionFailed(_))
        ));
    }

    #[test]
    fn test_extract_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("V.P.1.0.0.pack");
        build_zip(
            &archive,
            &[("top/V.P.pdsc", &b"<package/>"[..]), ("top/src/a.c", &b"int a;"[..])],
        );
        let dest = dir.path().join("out");
        let mut calls = 0;
        let files = extract_zip(
            &archive,
            &dest,
            "top/",
            1024,
            &CancellationToken::new(),
            |_, _| calls += 1,
        )
        .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(calls, 2);
        assert!(dest.join("V.P.pdsc").exists());
        assert_eq!(fs::read_to_string(dest.join("src/a.c")).unwrap(), "int a;");
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(&archive, &[("../escape.txt", &b"gotcha"[..])]);
        let dest = dir.path().join("out");
        let err = extract_zip(&archive, &dest, "", 1024, &CancellationToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PackError::ExtractionFailed(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_caps_entry_size() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("big.zip");
        build_zip(&archive, &[("big.bin", &[0u8; 4096][..])]);
        let dest = dir.path().join("out");
        let err = extract_zip(&archive, &dest, "", 1000, &CancellationToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PackError::ExtractionFailed(_)));
        assert!(!dest.join("big.bin").exists());
    }

    #[test]
    fn test_extract_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("V.P.1.0.0.pack");
        build_zip(&archive, &[("V.P.pdsc", &b"<package/>"[..])]);
        let token = CancellationToken::new();
        token.cancel();
        let err = extract_zip(&archive, &dir.path().join("out"), "", 1024, &token, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PackError::Cancelled));
    }

    #[test]
    fn test_read_entry_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("V.P.1.0.0.pack");
        build_zip(&archive, &[("V.P.pdsc", &b"<package/>"[..]), ("x/y.txt", &b"y"[..])]);
        assert_eq!(list_entries(&archive).unwrap().len(), 2);
        assert_eq!(read_entry(&archive, "V.P.pdsc", 100).unwrap(), &b"<package/>"[..]);
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("V.P.1.0.0.pack");
        fs::write(&archive, "not a zip").unwrap();
        assert!(matches!(
            list_entries(&archive),
            Err(PackError::ExtractionFailed(_))
        ));
    }
}
