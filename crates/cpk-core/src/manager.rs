//! Session root: owns both indices, the collaborators and the abort signal
//! for one invocation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use cpk_schema::identity::location_path;
use cpk_schema::{Dependency, Descriptor, IndexEntry, version};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{PackError, Result};
use crate::index::PackageIndex;
use crate::install::{Context, InstallationCoordinator, Installed, parse_reference};
use crate::io::{Extractor, Fetcher, HttpFetcher, VerificationPolicy, Verifier, ZipExtractor};
use crate::paths::PackRoot;
use crate::reporter::Reporter;

/// Which index an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `.Web/index.pidx`
    Web,
    /// `.Local/local_repository.pidx`
    Local,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Web => "web",
            Self::Local => "local",
        })
    }
}

/// One installed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    /// The index record.
    pub entry: IndexEntry,
    /// Index it came from.
    pub scope: Scope,
}

/// A declared requirement and the installed version satisfying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    /// Raw requirement.
    pub dependency: Dependency,
    /// Highest installed version within the range.
    pub installed: Option<String>,
}

impl DependencyStatus {
    /// Whether an installed version satisfies the requirement.
    pub fn is_satisfied(&self) -> bool {
        self.installed.is_some()
    }
}

/// Tally of a batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// References that succeeded.
    pub succeeded: usize,
    /// References that failed, with their errors.
    pub failures: Vec<(String, PackError)>,
    /// The batch stopped early on cancellation.
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Every reference succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Pack manager session.
pub struct PackManager {
    config: Config,
    coordinator: InstallationCoordinator,
}

impl fmt::Debug for PackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackManager")
            .field("pack_root", &self.config.pack_root)
            .finish_non_exhaustive()
    }
}

impl PackManager {
    /// Open a session with the default HTTP, zip and verification
    /// collaborators.
    pub fn open(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let root = PackRoot::new(&config.pack_root);
        let fetcher = HttpFetcher::new(&config, root.download_dir(), Arc::clone(&reporter))?;
        let verifier = VerificationPolicy::from_config(&config)?;
        let extractor = ZipExtractor::new(config.max_file_size);
        Self::open_with(
            config,
            reporter,
            Arc::new(fetcher),
            Arc::new(verifier),
            Arc::new(extractor),
        )
    }

    /// Open a session with explicit collaborators.
    ///
    /// Creates the bookkeeping directories and loads both indices; a
    /// missing index file is created empty.
    pub fn open_with(
        config: Config,
        reporter: Arc<dyn Reporter>,
        fetcher: Arc<dyn Fetcher>,
        verifier: Arc<dyn Verifier>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        let root = PackRoot::new(&config.pack_root);
        for dir in root.bookkeeping_dirs() {
            std::fs::create_dir_all(&dir)
                .map_err(|e| PackError::io(format!("creating {}", dir.display()), e))?;
        }

        let web = Arc::new(PackageIndex::new(root.web_index(), true));
        web.read()?;
        let local = Arc::new(PackageIndex::new(root.local_index(), false));
        local.read()?;
        debug!(
            root = %root.path().display(),
            web = web.len(),
            local = local.len(),
            "opened pack root"
        );

        let coordinator = InstallationCoordinator::new(Context {
            root,
            web,
            local,
            fetcher,
            verifier,
            extractor,
            reporter,
            cancel: CancellationToken::new(),
        });
        Ok(Self {
            config,
            coordinator,
        })
    }

    fn ctx(&self) -> &Context {
        self.coordinator.context()
    }

    /// Session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pack-root layout.
    pub fn root(&self) -> &PackRoot {
        &self.ctx().root
    }

    /// Token that aborts in-flight work when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.ctx().cancel.clone()
    }

    /// Remote index.
    pub fn web_index(&self) -> &PackageIndex {
        &self.ctx().web
    }

    /// Local/dev index.
    pub fn local_index(&self) -> &PackageIndex {
        &self.ctx().local
    }

    /// Install one reference. The index is not persisted; call
    /// [`PackManager::save`].
    pub async fn install(&self, reference: &str) -> Result<Installed> {
        self.coordinator.install(reference).await
    }

    /// Remove one reference from its index. Not persisted until
    /// [`PackManager::save`].
    pub fn uninstall(&self, reference: &str, purge: bool) -> Result<Vec<IndexEntry>> {
        self.coordinator.uninstall(reference, purge)
    }

    /// Install every reference, continuing past failures until a
    /// cancellation, then save once.
    pub async fn install_all(&self, references: &[String]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for reference in references {
            let result = self.coordinator.install(reference).await.map(|_| ());
            if !self.record(&mut outcome, reference, result) {
                break;
            }
        }
        self.finish(&outcome, "installed")?;
        Ok(outcome)
    }

    /// Remove every reference, continuing past failures, then save once.
    pub fn uninstall_all(&self, references: &[String], purge: bool) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for reference in references {
            let result = self.coordinator.uninstall(reference, purge).map(|_| ());
            if !self.record(&mut outcome, reference, result) {
                break;
            }
        }
        self.finish(&outcome, "removed")?;
        Ok(outcome)
    }

    /// Returns false when the batch must stop.
    fn record(&self, outcome: &mut BatchOutcome, reference: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => {
                outcome.succeeded += 1;
                true
            }
            Err(err) => {
                self.ctx().reporter.failed(reference, &err.to_string());
                let stop = err.aborts_batch();
                outcome.cancelled = stop;
                outcome.failures.push((reference.to_string(), err));
                !stop
            }
        }
    }

    fn finish(&self, outcome: &BatchOutcome, action: &str) -> Result<()> {
        if outcome.succeeded > 0 {
            self.save()?;
        }
        self.ctx()
            .reporter
            .summary(outcome.succeeded, outcome.failures.len(), action);
        Ok(())
    }

    /// Entries of both indices, optionally filtered by a pack id or file
    /// reference, sorted by exact key.
    pub fn list(&self, filter: Option<&str>) -> Result<Vec<Listed>> {
        let identity = filter.map(parse_reference).transpose()?;
        let mut listed = Vec::new();
        for (scope, index) in [(Scope::Web, &self.ctx().web), (Scope::Local, &self.ctx().local)] {
            let entries = index.list_pdsc_tags();
            let selected: Vec<IndexEntry> = match &identity {
                Some(identity) => identity.select(&entries).into_iter().cloned().collect(),
                None => entries,
            };
            listed.extend(selected.into_iter().map(|entry| Listed { entry, scope }));
        }
        listed.sort_by(|a, b| {
            a.entry
                .family_key()
                .cmp(&b.entry.family_key())
                .then_with(|| version::compare(&a.entry.version, &b.entry.version))
        });
        Ok(listed)
    }

    /// Requirements declared by the newest installed pack matching
    /// `reference`, with the installed version satisfying each.
    pub fn deps(&self, reference: &str) -> Result<Vec<DependencyStatus>> {
        let target = self
            .list(Some(reference))?
            .into_iter()
            .max_by(|a, b| version::compare(&a.entry.version, &b.entry.version))
            .ok_or_else(|| PackError::EntryNotFound(reference.to_string()))?;

        let path = self.descriptor_path(&target);
        debug!(pack = %target.entry.exact_key(), path = %path.display(), "reading dependencies");
        let descriptor = Descriptor::from_path(&path)?;
        let installed = self.list(None)?;

        Ok(descriptor
            .dependencies()
            .into_iter()
            .map(|dependency| {
                let installed = installed
                    .iter()
                    .filter(|l| {
                        l.entry.vendor.eq_ignore_ascii_case(&dependency.vendor)
                            && l.entry.name.eq_ignore_ascii_case(&dependency.name)
                            && dependency.is_satisfied_by(&l.entry.version)
                    })
                    .map(|l| l.entry.version.clone())
                    .max_by(|a, b| version::compare(a, b));
                DependencyStatus {
                    dependency,
                    installed,
                }
            })
            .collect())
    }

    /// Extracted packs keep their descriptor in the version directory;
    /// dev descriptors are read from where they were registered.
    fn descriptor_path(&self, listed: &Listed) -> PathBuf {
        let entry = &listed.entry;
        let extracted = self
            .root()
            .pack_dir(&entry.vendor, &entry.name, &entry.version)
            .join(entry.descriptor_file_name());
        if listed.scope == Scope::Web || extracted.is_file() {
            return extracted;
        }
        match location_path(&entry.url) {
            Some(dir) => PathBuf::from(dir).join(entry.descriptor_file_name()),
            None => extracted,
        }
    }

    /// Freshness of the remote index.
    pub fn check_index(&self) -> Result<()> {
        self.ctx().web.check_time()
    }

    /// Persist both indices and touch `pack.idx`.
    pub fn save(&self) -> Result<()> {
        self.ctx().web.write()?;
        self.ctx().local.write()?;
        let marker = self.root().pack_idx();
        std::fs::File::create(&marker)
            .map_err(|e| PackError::io(format!("touching {}", marker.display()), e))?;
        info!(root = %self.root().path().display(), "saved indices");
        Ok(())
    }

    /// Dependency range in `>=x` / `x:y` display form.
    pub fn describe_range(dependency: &Dependency) -> String {
        match dependency.range.as_str() {
            "latest" => "latest".to_string(),
            range => version::format_range(range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    fn session(root: &std::path::Path) -> PackManager {
        PackManager::open(Config::new(root), Arc::new(NullReporter)).unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session(dir.path());
        assert!(dir.path().join(".Web/index.pidx").is_file());
        assert!(dir.path().join(".Local/local_repository.pidx").is_file());
        assert!(dir.path().join(".Download").is_dir());
        assert!(manager.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_list_filters_by_modifier() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session(dir.path());
        for version in ["1.0.0", "1.2.0", "2.0.0"] {
            manager
                .web_index()
                .add_pdsc(IndexEntry::new("ARM", "CMSIS", version, "https://a.com/"))
                .unwrap();
        }
        manager
            .local_index()
            .add_pdsc(IndexEntry::new("Other", "Pack", "0.1.0", "file://localhost/x/"))
            .unwrap();

        assert_eq!(manager.list(None).unwrap().len(), 4);
        let versions = |filter: &str| -> Vec<String> {
            manager
                .list(Some(filter))
                .unwrap()
                .into_iter()
                .map(|l| l.entry.version)
                .collect()
        };
        assert_eq!(versions("arm::cmsis"), ["1.0.0", "1.2.0", "2.0.0"]);
        assert_eq!(versions("ARM::CMSIS@latest"), ["2.0.0"]);
        assert_eq!(versions("ARM::CMSIS@^1.0.0"), ["1.0.0", "1.2.0"]);
        assert_eq!(versions("ARM::CMSIS@>=1.2.0"), ["1.2.0", "2.0.0"]);
        assert_eq!(versions("ARM.CMSIS.1.0.0:1.9.9"), ["1.0.0", "1.2.0"]);
        assert!(versions("ARM::Missing").is_empty());
    }

    #[test]
    fn test_save_touches_marker() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session(dir.path());
        manager.save().unwrap();
        assert!(dir.path().join("pack.idx").is_file());
    }

    #[test]
    fn test_check_index_fresh_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session(dir.path());
        assert!(manager.check_index().is_ok());
    }

    #[test]
    fn test_deps_reports_satisfaction() {
        let dir = tempfile::tempdir().unwrap();
        let manager = session(dir.path());
        let pack_dir = dir.path().join("V/P/1.0.0");
        std::fs::create_dir_all(&pack_dir).unwrap();
        std::fs::write(
            pack_dir.join("V.P.pdsc"),
            r#"<package><vendor>V</vendor><name>P</name>
                <releases><release version="1.0.0"/></releases>
                <requirements><packages>
                  <package vendor="ARM" name="CMSIS" version="5.0.0:5.9.9"/>
                  <package vendor="ARM" name="Missing"/>
                </packages></requirements></package>"#,
        )
        .unwrap();
        manager
            .web_index()
            .add_pdsc(IndexEntry::new("V", "P", "1.0.0", "https://v.com/"))
            .unwrap();
        manager
            .web_index()
            .add_pdsc(IndexEntry::new("ARM", "CMSIS", "5.4.0", "https://a.com/"))
            .unwrap();

        let deps = manager.deps("V::P").unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].installed.as_deref(), Some("5.4.0"));
        assert!(!deps[1].is_satisfied());
        assert_eq!(PackManager::describe_range(&deps[1].dependency), "latest");

        assert!(matches!(
            manager.deps("V::Absent"),
            Err(PackError::EntryNotFound(_))
        ));
    }
}
