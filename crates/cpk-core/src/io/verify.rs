//! Pack integrity and authenticity checks.
//!
//! - Checksums: `<stem>.sha256.checksum` next to the archive, one
//!   `<hex digest> <entry name>` line per archive entry.
//! - Signatures: detached ed25519 signature over the archive bytes, base64
//!   encoded in `<archive>.sig`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Verifier;
use super::copy::{CopyError, copy_bounded};
use crate::config::Config;
use crate::error::{PackError, Result};

/// Suffix replacing the archive extension for checksum files.
pub const CHECKSUM_SUFFIX: &str = ".sha256.checksum";

/// Suffix appended to the archive name for signature files.
pub const SIGNATURE_SUFFIX: &str = ".sig";

fn archive_stem(archive_name: &str) -> &str {
    archive_name
        .strip_suffix(".pack")
        .or_else(|| archive_name.strip_suffix(".zip"))
        .unwrap_or(archive_name)
}

/// `V.P.1.0.0.pack` becomes `V.P.1.0.0.sha256.checksum`.
pub fn checksum_file_name(archive_name: &str) -> String {
    format!("{}{CHECKSUM_SUFFIX}", archive_stem(archive_name))
}

/// `V.P.1.0.0.pack` becomes `V.P.1.0.0.pack.sig`.
pub fn signature_file_name(archive_name: &str) -> String {
    format!("{archive_name}{SIGNATURE_SUFFIX}")
}

fn sibling(archive: &Path, name: impl FnOnce(&str) -> String) -> PathBuf {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive.with_file_name(name(&file_name))
}

/// SHA-256 digest of every file entry, keyed by entry name.
pub fn entry_digests(archive_path: &Path) -> Result<BTreeMap<String, String>> {
    let file = File::open(archive_path)
        .map_err(|e| PackError::io(format!("opening {}", archive_path.display()), e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PackError::IntegrityFailed(format!("{}: {e}", archive_path.display())))?;

    let never = CancellationToken::new();
    let mut digests = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PackError::IntegrityFailed(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let mut hasher = Sha256::new();
        copy_bounded(&mut entry, &mut HashWriter(&mut hasher), u64::MAX, &never).map_err(
            |e| match e {
                CopyError::Io(e) => PackError::io(format!("hashing {}", archive_path.display()), e),
                other => PackError::IntegrityFailed(other.to_string()),
            },
        )?;
        digests.insert(entry.name().to_string(), hex::encode(hasher.finalize()));
    }
    Ok(digests)
}

struct HashWriter<'a>(&'a mut Sha256);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Render the checksum file contents for an archive.
pub fn checksum_manifest(archive_path: &Path) -> Result<String> {
    Ok(entry_digests(archive_path)?
        .into_iter()
        .map(|(name, digest)| format!("{digest} {name}\n"))
        .collect())
}

/// Check every archive entry against a checksum file.
pub fn verify_checksum(archive_path: &Path, checksum_path: &Path) -> Result<()> {
    if !checksum_path.exists() {
        return Err(PackError::IntegrityFailed(format!(
            "checksum file {} not found",
            checksum_path.display()
        )));
    }
    let digests = entry_digests(archive_path)?;
    let listing = std::fs::read_to_string(checksum_path)
        .map_err(|e| PackError::io(format!("reading {}", checksum_path.display()), e))?;
    let lines: Vec<&str> = listing.lines().filter(|l| !l.trim().is_empty()).collect();

    if lines.len() != digests.len() {
        return Err(PackError::IntegrityFailed(format!(
            "checksum file lists {} file(s), but pack contains {} file(s)",
            lines.len(),
            digests.len()
        )));
    }

    let mut mismatched = Vec::new();
    for line in lines {
        let Some((expected, name)) = line.trim().split_once(' ') else {
            return Err(PackError::IntegrityFailed(format!(
                "malformed checksum line '{line}'"
            )));
        };
        match digests.get(name) {
            None => {
                return Err(PackError::IntegrityFailed(format!(
                    "{name} is listed in the checksum file but not in the pack"
                )));
            }
            Some(actual) if !actual.eq_ignore_ascii_case(expected) => {
                debug!(%name, %expected, %actual, "digest mismatch");
                mismatched.push(name.to_string());
            }
            Some(_) => {}
        }
    }
    if !mismatched.is_empty() {
        return Err(PackError::IntegrityFailed(format!(
            "computed checksum did not match for {}",
            mismatched.join(", ")
        )));
    }
    info!(archive = %archive_path.display(), "pack integrity verified");
    Ok(())
}

/// ed25519 signature check against a fixed public key.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
    max_size: u64,
}

impl SignatureVerifier {
    /// Build from a base64-encoded 32-byte public key.
    pub fn from_base64(key: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| PackError::IntegrityFailed(format!("invalid public key: {e}")))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            PackError::IntegrityFailed(format!(
                "invalid public key: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| PackError::IntegrityFailed(format!("invalid public key: {e}")))?;
        Ok(Self {
            key,
            max_size: u64::MAX,
        })
    }

    /// Refuse archives larger than `max_size` bytes; the whole archive is
    /// held in memory while its signature is checked.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Verify `archive_path` against its `.sig` sibling.
    pub fn verify_file(&self, archive_path: &Path) -> Result<()> {
        let sig_path = sibling(archive_path, signature_file_name);
        let encoded = std::fs::read_to_string(&sig_path).map_err(|_| {
            PackError::IntegrityFailed(format!("signature file {} not found", sig_path.display()))
        })?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| PackError::IntegrityFailed(format!("malformed signature: {e}")))?;
        let raw: [u8; 64] = raw.as_slice().try_into().map_err(|_| {
            PackError::IntegrityFailed(format!(
                "malformed signature: expected 64 bytes, got {}",
                raw.len()
            ))
        })?;
        let signature = Signature::from_bytes(&raw);

        let message = self.read_bounded(archive_path)?;
        self.key.verify(&message, &signature).map_err(|_| {
            warn!(archive = %archive_path.display(), "signature verification failed");
            PackError::IntegrityFailed(format!(
                "signature of {} does not match",
                archive_path.display()
            ))
        })?;
        info!(archive = %archive_path.display(), "signature verified");
        Ok(())
    }

    fn read_bounded(&self, archive_path: &Path) -> Result<Vec<u8>> {
        let context = || format!("reading {}", archive_path.display());
        let too_large = || {
            PackError::IntegrityFailed(format!(
                "{} exceeds the {} byte limit for signed archives",
                archive_path.display(),
                self.max_size
            ))
        };
        let file = File::open(archive_path).map_err(|e| PackError::io(context(), e))?;
        let len = file
            .metadata()
            .map_err(|e| PackError::io(context(), e))?
            .len();
        if len > self.max_size {
            return Err(too_large());
        }
        let mut message = Vec::new();
        file.take(self.max_size.saturating_add(1))
            .read_to_end(&mut message)
            .map_err(|e| PackError::io(context(), e))?;
        if message.len() as u64 > self.max_size {
            return Err(too_large());
        }
        Ok(message)
    }
}

/// Checks configured for a session. Both disabled is a no-op.
#[derive(Debug, Clone, Default)]
pub struct VerificationPolicy {
    checksum: bool,
    signature: Option<SignatureVerifier>,
}

impl VerificationPolicy {
    /// No checks.
    pub fn none() -> Self {
        Self::default()
    }

    /// Policy described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let signature = config
            .public_key
            .as_deref()
            .map(SignatureVerifier::from_base64)
            .transpose()?
            .map(|verifier| verifier.with_max_size(config.max_file_size));
        Ok(Self {
            checksum: config.verify_checksum,
            signature,
        })
    }

    /// Require checksum files.
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    /// Require signatures made with `verifier`'s key.
    pub fn with_signature(mut self, verifier: SignatureVerifier) -> Self {
        self.signature = Some(verifier);
        self
    }
}

#[async_trait]
impl Verifier for VerificationPolicy {
    fn sidecars(&self, archive_name: &str) -> Vec<String> {
        let mut names = Vec::new();
        if self.checksum {
            names.push(checksum_file_name(archive_name));
        }
        if self.signature.is_some() {
            names.push(signature_file_name(archive_name));
        }
        names
    }

    async fn verify(&self, archive: &Path) -> Result<()> {
        if !self.checksum && self.signature.is_none() {
            return Ok(());
        }
        let archive = archive.to_path_buf();
        let policy = self.clone();
        tokio::task::spawn_blocking(move || {
            if policy.checksum {
                let file_name = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                verify_checksum(&archive, &archive.with_file_name(checksum_file_name(&file_name)))?;
            }
            if let Some(signature) = &policy.signature {
                signature.verify_file(&archive)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| PackError::IntegrityFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use zip::write::SimpleFileOptions;

    fn build_pack(path: &Path) {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        zip.start_file("V.P.pdsc", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"<package/>").unwrap();
        zip.start_file("src/main.c", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"int main;").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_file_names() {
        assert_eq!(checksum_file_name("V.P.1.0.0.pack"), "V.P.1.0.0.sha256.checksum");
        assert_eq!(checksum_file_name("V.P.1.0.0.zip"), "V.P.1.0.0.sha256.checksum");
        assert_eq!(signature_file_name("V.P.1.0.0.pack"), "V.P.1.0.0.pack.sig");
    }

    #[test]
    fn test_checksum_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);
        let checksum = dir.path().join("V.P.1.0.0.sha256.checksum");
        std::fs::write(&checksum, checksum_manifest(&pack).unwrap()).unwrap();
        verify_checksum(&pack, &checksum).unwrap();
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);
        let checksum = dir.path().join("V.P.1.0.0.sha256.checksum");
        let tampered: String = checksum_manifest(&pack)
            .unwrap()
            .lines()
            .map(|line| {
                let (_, name) = line.split_once(' ').unwrap();
                format!("{} {name}\n", "0".repeat(64))
            })
            .collect();
        std::fs::write(&checksum, tampered).unwrap();
        assert!(matches!(
            verify_checksum(&pack, &checksum),
            Err(PackError::IntegrityFailed(_))
        ));
    }

    #[test]
    fn test_checksum_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);
        let checksum = dir.path().join("V.P.1.0.0.sha256.checksum");
        let first_line: String = checksum_manifest(&pack).unwrap().lines().take(1).collect();
        std::fs::write(&checksum, first_line).unwrap();
        assert!(matches!(
            verify_checksum(&pack, &checksum),
            Err(PackError::IntegrityFailed(ref m)) if m.contains("lists 1")
        ));
    }

    #[test]
    fn test_missing_checksum_file() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);
        assert!(matches!(
            verify_checksum(&pack, &dir.path().join("nope.checksum")),
            Err(PackError::IntegrityFailed(_))
        ));
    }

    #[test]
    fn test_signature() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);

        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let public = base64::engine::general_purpose::STANDARD
            .encode(signing.verifying_key().to_bytes());
        let signature = signing.sign(&std::fs::read(&pack).unwrap());
        std::fs::write(
            dir.path().join("V.P.1.0.0.pack.sig"),
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        )
        .unwrap();

        let verifier = SignatureVerifier::from_base64(&public).unwrap();
        verifier.verify_file(&pack).unwrap();

        let other = SigningKey::from_bytes(&[9u8; 32]);
        let wrong = SignatureVerifier::from_base64(
            &base64::engine::general_purpose::STANDARD.encode(other.verifying_key().to_bytes()),
        )
        .unwrap();
        assert!(matches!(
            wrong.verify_file(&pack),
            Err(PackError::IntegrityFailed(_))
        ));
    }

    #[test]
    fn test_signature_rejects_oversized_archive() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);

        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let signature = signing.sign(&std::fs::read(&pack).unwrap());
        std::fs::write(
            dir.path().join("V.P.1.0.0.pack.sig"),
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        )
        .unwrap();
        let public = base64::engine::general_purpose::STANDARD
            .encode(signing.verifying_key().to_bytes());
        let len = std::fs::metadata(&pack).unwrap().len();

        let verifier = SignatureVerifier::from_base64(&public).unwrap();
        verifier.clone().with_max_size(len).verify_file(&pack).unwrap();
        assert!(matches!(
            verifier.with_max_size(len - 1).verify_file(&pack),
            Err(PackError::IntegrityFailed(ref m)) if m.contains("byte limit")
        ));
    }

    #[test]
    fn test_invalid_key() {
        assert!(SignatureVerifier::from_base64("not base64!").is_err());
        assert!(SignatureVerifier::from_base64("AAAA").is_err());
    }

    #[tokio::test]
    async fn test_policy() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("V.P.1.0.0.pack");
        build_pack(&pack);

        let none = VerificationPolicy::none();
        assert!(none.sidecars("V.P.1.0.0.pack").is_empty());
        none.verify(&pack).await.unwrap();

        let checked = VerificationPolicy::none().with_checksum(true);
        assert_eq!(checked.sidecars("V.P.1.0.0.pack"), vec!["V.P.1.0.0.sha256.checksum"]);
        assert!(checked.verify(&pack).await.is_err());
        std::fs::write(
            dir.path().join("V.P.1.0.0.sha256.checksum"),
            checksum_manifest(&pack).unwrap(),
        )
        .unwrap();
        checked.verify(&pack).await.unwrap();
    }
}
