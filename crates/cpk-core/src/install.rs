//! Install and removal of single packs.
//!
//! The index is the last thing touched: an install fetches, verifies,
//! validates and extracts first, and only then records the entry. Any
//! failure before that point leaves the index exactly as it was.
//!
//! | reference                  | index  | effect                            |
//! |----------------------------|--------|-----------------------------------|
//! | `https://../V.P.1.0.0.pack` | web    | download, extract, add            |
//! | `/dir/V.P.1.0.0.pack`       | local  | extract, back up archive, add     |
//! | `/dir/V.P.pdsc`             | local  | add or move to the latest release |
//! | `V::P@^1.0.0`               | web    | resolve via web index, then as URL |

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpk_schema::identity::location_path;
use cpk_schema::{Descriptor, IndexEntry, PackageIdentity, VersionModifier, version};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PackError, Result};
use crate::index::PackageIndex;
use crate::io::copy::copy_file;
use crate::io::download::{is_remote, sanitize_url};
use crate::io::verify::{checksum_file_name, signature_file_name};
use crate::io::{ExtractRequest, Extractor, Fetcher, Verifier};
use crate::paths::PackRoot;
use crate::reporter::Reporter;

/// Groups the state shared by install and removal operations.
#[derive(Clone)]
pub struct Context {
    /// Pack-root layout.
    pub root: PackRoot,
    /// Remote index (`.Web/index.pidx`).
    pub web: Arc<PackageIndex>,
    /// Local/dev index (`.Local/local_repository.pidx`).
    pub local: Arc<PackageIndex>,
    /// Archive fetcher.
    pub fetcher: Arc<dyn Fetcher>,
    /// Checksum/signature policy.
    pub verifier: Arc<dyn Verifier>,
    /// Archive extractor.
    pub extractor: Arc<dyn Extractor>,
    /// Progress sink.
    pub reporter: Arc<dyn Reporter>,
    /// Session-wide abort signal.
    pub cancel: CancellationToken,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("web", &self.web.path())
            .field("local", &self.local.path())
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// Entry committed to the index.
    pub entry: IndexEntry,
    /// Extraction directory, or the descriptor path for dev installs.
    pub path: PathBuf,
    /// Whether the entry went to the local index.
    pub local: bool,
}

/// Drives one install or one removal to completion.
#[derive(Debug, Clone)]
pub struct InstallationCoordinator {
    ctx: Context,
}

impl InstallationCoordinator {
    /// Coordinator over `ctx`.
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Shared context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn index_for(&self, identity: &PackageIdentity) -> &Arc<PackageIndex> {
        if identity.is_remote() {
            &self.ctx.web
        } else {
            &self.ctx.local
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        Ok(())
    }

    /// Install a pack archive (path or URL), a pack id resolved against the
    /// web index, or register a dev descriptor.
    pub async fn install(&self, reference: &str) -> Result<Installed> {
        let identity = parse_reference(reference)?;
        if identity.is_pack_id() {
            return self.install_pack_id(&identity).await;
        }
        if identity.is_descriptor() {
            return self.install_descriptor(&identity);
        }
        for index in [&self.ctx.local, &self.ctx.web] {
            if let Some(existing) = claimed_by(index, &identity) {
                return Err(PackError::EntryExists(existing.exact_key()));
            }
        }
        self.install_archive(&identity, self.index_for(&identity)).await
    }

    /// Newest web-index entry the id selects, installed from its pack URL.
    async fn install_pack_id(&self, identity: &PackageIdentity) -> Result<Installed> {
        let known = self
            .ctx
            .web
            .find_pdsc_tags(&IndexEntry::family(identity.vendor(), identity.name()));
        let Some(chosen) = identity
            .select(&known)
            .into_iter()
            .max_by(|a, b| version::compare(&a.version, &b.version))
            .cloned()
        else {
            return Err(PackError::EntryNotFound(identity.to_string()));
        };
        debug!(pack = %identity, resolved = %chosen.exact_key(), url = %chosen.url, "resolved pack id");

        let target = parse_reference(&chosen.pack_url())?;
        let dest = self
            .ctx
            .root
            .pack_dir(target.vendor(), target.name(), target.version());
        if dest.is_dir() {
            return Err(PackError::EntryExists(chosen.exact_key()));
        }
        if let Some(existing) = claimed_by(&self.ctx.local, &target) {
            return Err(PackError::EntryExists(existing.exact_key()));
        }
        self.install_archive(&target, &self.ctx.web).await
    }

    /// Fetch, verify, validate and extract, then record in `index`. An
    /// entry the index already holds under the same key is kept as is.
    async fn install_archive(
        &self,
        identity: &PackageIdentity,
        index: &PackageIndex,
    ) -> Result<Installed> {
        let entry = identity.to_entry();
        self.ensure_running()?;

        let label = entry.exact_key();
        let source = source_path(identity);
        debug!(%label, %source, local = !identity.is_remote(), "installing");

        let archive = self.ctx.fetcher.fetch(&source, &self.ctx.cancel).await?;
        self.fetch_sidecars(identity).await?;
        self.ctx.verifier.verify(&archive).await?;

        let descriptor_name = entry.descriptor_file_name();
        let layout = self.ctx.extractor.inspect(&archive, &descriptor_name).await?;
        validate_descriptor(identity, &layout.descriptor, &descriptor_name)?;
        self.ensure_running()?;

        let dest = self
            .ctx
            .root
            .pack_dir(identity.vendor(), identity.name(), identity.version());
        let extracted = self
            .ctx
            .extractor
            .extract(ExtractRequest {
                archive: archive.clone(),
                dest: dest.clone(),
                strip_prefix: layout.prefix.clone(),
                pack: label.clone(),
                reporter: Arc::clone(&self.ctx.reporter),
                cancel: self.ctx.cancel.clone(),
            })
            .await;
        let extracted = match extracted {
            Ok(files) => files,
            Err(PackError::Cancelled) => {
                remove_dir_quietly(&dest);
                return Err(PackError::Cancelled);
            }
            Err(err) => return Err(err),
        };
        if self.ctx.cancel.is_cancelled() {
            remove_dir_quietly(&dest);
            return Err(PackError::Cancelled);
        }
        debug!(%label, files = extracted.len(), dest = %dest.display(), "extracted");

        self.write_bookkeeping(identity, &archive, &dest, &descriptor_name)?;
        let catalogued = IndexEntry::new(&entry.vendor, &entry.name, &entry.version, "");
        if index.has_pdsc(&catalogued).is_none() {
            index.add_pdsc(entry.clone())?;
        }

        info!(pack = %label, dest = %dest.display(), "installed");
        self.ctx
            .reporter
            .installed(&label, &dest.display().to_string());
        Ok(Installed {
            entry,
            path: dest,
            local: !index.is_web(),
        })
    }

    /// Remote verification material sits next to the archive URL.
    async fn fetch_sidecars(&self, identity: &PackageIdentity) -> Result<()> {
        if !identity.is_remote() {
            return Ok(());
        }
        for name in self.ctx.verifier.sidecars(&identity.file_name()) {
            let url = format!("{}{name}", identity.location());
            match self.ctx.fetcher.fetch(&url, &self.ctx.cancel).await {
                Ok(_) => {}
                Err(PackError::Cancelled) => return Err(PackError::Cancelled),
                Err(err) => {
                    return Err(PackError::IntegrityFailed(format!(
                        "cannot obtain {name}: {err}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn write_bookkeeping(
        &self,
        identity: &PackageIdentity,
        archive: &Path,
        dest: &Path,
        descriptor_name: &str,
    ) -> Result<()> {
        let download = self.ctx.root.download_dir();
        let extracted_descriptor = dest.join(descriptor_name);
        let versioned = format!("{}.{}.pdsc", identity.vname(), identity.version());
        copy_file(&extracted_descriptor, &download.join(versioned))?;

        if !identity.is_remote() {
            copy_file(
                &extracted_descriptor,
                &self.ctx.root.local_dir().join(descriptor_name),
            )?;
            let backup = download.join(identity.file_name());
            if archive != backup {
                copy_file(archive, &backup)?;
            }
        }
        Ok(())
    }

    fn install_descriptor(&self, identity: &PackageIdentity) -> Result<Installed> {
        let path = PathBuf::from(source_path(identity));
        if !path.is_file() {
            return Err(PackError::fetch(
                path.display().to_string(),
                "file not found",
            ));
        }
        let descriptor = Descriptor::from_path(&path)?;
        check_names(identity, &descriptor)?;

        let latest = descriptor.latest_version();
        if latest.is_empty() {
            return Err(PackError::ExtractionFailed(format!(
                "{} lists no releases",
                path.display()
            )));
        }
        let entry = IndexEntry::new(identity.vendor(), identity.name(), latest, identity.location());
        let local = &self.ctx.local;
        let registered: Vec<IndexEntry> = local
            .find_pdsc_tags(&IndexEntry::family(identity.vendor(), identity.name()))
            .into_iter()
            .filter(|e| e.url == identity.location())
            .collect();

        if registered
            .iter()
            .any(|e| version::same_version(&e.version, latest))
        {
            return Err(PackError::EntryExists(entry.exact_key()));
        }
        // Another source already holds the new version.
        let taken = IndexEntry::new(identity.vendor(), identity.name(), latest, "");
        if local.has_pdsc(&taken).is_some() {
            return Err(PackError::EntryExists(entry.exact_key()));
        }
        for previous in &registered {
            debug!(pack = %identity.vname(), from = %previous.version, to = %latest, "descriptor version changed");
            local.remove_pdsc(previous)?;
        }
        local.add_pdsc(entry.clone())?;

        info!(pack = %entry.exact_key(), path = %path.display(), "registered descriptor");
        self.ctx
            .reporter
            .installed(&entry.exact_key(), &path.display().to_string());
        Ok(Installed {
            entry,
            path,
            local: true,
        })
    }

    /// Remove the index records a reference designates.
    ///
    /// Extracted files stay on disk; `purge` additionally deletes cached
    /// archives and descriptor copies from `.Download`.
    pub fn uninstall(&self, reference: &str, purge: bool) -> Result<Vec<IndexEntry>> {
        let identity = parse_reference(reference)?;
        let mut removed = Vec::new();

        if identity.is_pack_id() {
            for index in [&self.ctx.local, &self.ctx.web] {
                removed.extend(remove_matching(index, &identity)?);
            }
        } else {
            let index = self.index_for(&identity);
            let found: Vec<IndexEntry> = if identity.is_descriptor() {
                index
                    .find_pdsc_tags(&IndexEntry::family(identity.vendor(), identity.name()))
                    .into_iter()
                    .filter(|e| e.url == identity.location())
                    .collect()
            } else {
                index.find_pdsc_tags(&identity.to_entry())
            };
            if found.is_empty() {
                return Err(PackError::EntryNotFound(identity.to_string()));
            }
            for entry in &found {
                index.remove_pdsc(entry)?;
            }
            removed.extend(found);
        }

        if removed.is_empty() {
            return Err(PackError::EntryNotFound(identity.to_string()));
        }
        for entry in &removed {
            info!(pack = %entry.exact_key(), "removed");
            self.ctx.reporter.removed(&entry.exact_key());
        }
        if purge {
            self.purge(&removed)?;
        }
        Ok(removed)
    }

    fn purge(&self, removed: &[IndexEntry]) -> Result<usize> {
        let download = self.ctx.root.download_dir();
        let mut names = Vec::new();
        for entry in removed {
            let key = format!("{}.{}", entry.vname(), version::strip_meta(&entry.version));
            for archive in [format!("{key}.pack"), format!("{key}.zip")] {
                names.push(checksum_file_name(&archive));
                names.push(signature_file_name(&archive));
                names.push(archive);
            }
            names.push(format!("{}.pdsc", entry.exact_key()));
            names.push(entry.descriptor_file_name());
        }
        names.sort();
        names.dedup();

        let mut deleted = 0;
        for name in names {
            let path = download.join(&name);
            if !path.is_file() {
                continue;
            }
            std::fs::remove_file(&path)
                .map_err(|e| PackError::io(format!("removing {}", path.display()), e))?;
            debug!(path = %path.display(), "purged");
            deleted += 1;
        }
        if deleted == 0 {
            self.ctx.reporter.info("nothing to purge");
        }
        Ok(deleted)
    }
}

/// Entry of the same family whose version, build metadata aside, equals the
/// requested one. Both would extract into the same directory.
fn claimed_by(index: &PackageIndex, identity: &PackageIdentity) -> Option<IndexEntry> {
    let wanted = version::strip_meta(identity.version());
    index
        .find_pdsc_tags(&IndexEntry::family(identity.vendor(), identity.name()))
        .into_iter()
        .find(|e| version::compare(version::strip_meta(&e.version), wanted) == Ordering::Equal)
}

/// Remove every entry of `index` that a pack id selects.
fn remove_matching(index: &PackageIndex, identity: &PackageIdentity) -> Result<Vec<IndexEntry>> {
    let family = IndexEntry::family(identity.vendor(), identity.name());
    let all = index.find_pdsc_tags(&family);
    if all.is_empty() {
        return Ok(Vec::new());
    }
    if identity.modifier() == VersionModifier::Any {
        index.remove_pdsc(&family)?;
        return Ok(all);
    }
    let selected: Vec<IndexEntry> = identity.select(&all).into_iter().cloned().collect();
    for entry in &selected {
        index.remove_pdsc(entry)?;
    }
    Ok(selected)
}

/// Sanitize URLs, then parse.
pub fn parse_reference(reference: &str) -> Result<PackageIdentity> {
    let reference = reference.trim();
    if is_remote(reference) {
        return Ok(PackageIdentity::parse(&sanitize_url(reference)?)?);
    }
    Ok(PackageIdentity::parse(reference)?)
}

/// Fetchable source of a file reference: the URL, or the filesystem path
/// behind its `file://localhost/` location.
pub fn source_path(identity: &PackageIdentity) -> String {
    match location_path(identity.location()) {
        Some(dir) => format!("{dir}{}", identity.file_name()),
        None => identity.source(),
    }
}

fn check_names(identity: &PackageIdentity, descriptor: &Descriptor) -> Result<()> {
    if !descriptor.vendor.eq_ignore_ascii_case(identity.vendor())
        || !descriptor.name.eq_ignore_ascii_case(identity.name())
    {
        return Err(PackError::ExtractionFailed(format!(
            "descriptor describes {}.{}, expected {}",
            descriptor.vendor,
            descriptor.name,
            identity.vname()
        )));
    }
    Ok(())
}

/// The bundled descriptor must name the pack and list its version as the
/// latest release.
fn validate_descriptor(identity: &PackageIdentity, raw: &[u8], name: &str) -> Result<()> {
    let xml = std::str::from_utf8(raw)
        .map_err(|e| PackError::ExtractionFailed(format!("{name}: {e}")))?;
    let descriptor = Descriptor::from_xml(xml)
        .map_err(|e| PackError::ExtractionFailed(format!("{name}: {e}")))?;
    check_names(identity, &descriptor)?;

    let requested = identity.version();
    let latest = descriptor.latest_version();
    if version::compare(latest, requested) == Ordering::Equal {
        return Ok(());
    }
    if descriptor.find_release(requested).is_some() {
        warn!(pack = %identity.vname(), %requested, %latest, "pack version is not the latest release");
        return Err(PackError::ExtractionFailed(format!(
            "version {requested} is not the latest release in {name} (latest is {latest})"
        )));
    }
    Err(PackError::ExtractionFailed(format!(
        "version {requested} is not listed in {name}"
    )))
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), "failed to clean up: {e}");
        }
    }
}
