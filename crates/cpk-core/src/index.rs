//! Persisted pack index (`.pidx`).
//!
//! One [`PackageIndex`] backs one scope: the remote index under `.Web` or
//! the local/dev index under `.Local`. Entries live in two maps behind a
//! single mutex:
//!
//! - exact key (`Vendor.Name.Version`) to the entries stored under it; more
//!   than one only when a file on disk listed the same triple twice with
//!   different source URLs;
//! - lowercase family key (`vendor.name`) to the exact keys of that family
//!   and the one currently considered canonical.
//!
//! On disk the index is a flat XML list:
//!
//! ```xml
//! <index schemaVersion="1.1.0">
//!   <vendor>local_repository</vendor>
//!   <url></url>
//!   <timestamp>2024-05-01T10:00:00.000000000Z</timestamp>
//!   <pindex>
//!     <pdsc url="file://localhost/packs/" vendor="V" name="P" version="1.0.0"/>
//!   </pindex>
//! </index>
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use cpk_schema::{INDEX_SCHEMA_VERSION, IndexEntry, version};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PackError, Result};

/// Age in hours after which an index is considered stale.
pub const FRESHNESS_HOURS: i64 = 24;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "index")]
struct IndexDocument {
    #[serde(rename = "@schemaVersion", default)]
    schema_version: String,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(default)]
    pindex: Pindex,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pindex {
    #[serde(rename = "pdsc", default)]
    pdscs: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct Family {
    canonical: String,
    members: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    schema_version: String,
    vendor: String,
    url: String,
    timestamp: Option<String>,
    entries: HashMap<String, Vec<IndexEntry>>,
    families: HashMap<String, Family>,
}

impl State {
    fn fresh(vendor: String) -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION.to_string(),
            vendor,
            ..Self::default()
        }
    }

    /// Appends without the uniqueness check; used when loading from disk.
    fn insert(&mut self, entry: IndexEntry) {
        let key = entry.exact_key();
        let family = entry.family_key();
        self.entries.entry(key.clone()).or_default().push(entry);
        let fam = self.families.entry(family).or_default();
        if !fam.members.contains(&key) {
            fam.members.push(key.clone());
        }
        fam.canonical = key;
    }

    /// Forgets `key` as a member of `family`, dropping the family when empty.
    fn detach(&mut self, family: &str, key: &str) {
        let Some(fam) = self.families.get_mut(family) else {
            return;
        };
        fam.members.retain(|m| m != key);
        match fam.members.last() {
            None => {
                self.families.remove(family);
            }
            Some(last) if fam.canonical == key => fam.canonical = last.clone(),
            Some(_) => {}
        }
    }

    fn flatten(&self) -> Vec<IndexEntry> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| self.entries[k].iter().cloned())
            .collect()
    }
}

/// Disk-backed, mutex-guarded collection of [`IndexEntry`] records.
#[derive(Debug)]
pub struct PackageIndex {
    path: PathBuf,
    is_web: bool,
    state: Mutex<State>,
}

impl PackageIndex {
    /// Create an empty index bound to `path`. Nothing is read until
    /// [`PackageIndex::read`].
    pub fn new(path: impl Into<PathBuf>, is_web: bool) -> Self {
        let path = path.into();
        let vendor = vendor_label(&path);
        Self {
            path,
            is_web,
            state: Mutex::new(State::fresh(vendor)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this is the remote index.
    pub fn is_web(&self) -> bool {
        self.is_web
    }

    /// Vendor label written into the document.
    pub fn vendor(&self) -> String {
        self.lock().vendor.clone()
    }

    /// Timestamp of the last read or write, if any.
    pub fn timestamp(&self) -> Option<String> {
        self.lock().timestamp.clone()
    }

    /// Load the backing file, replacing in-memory state.
    ///
    /// A missing file yields an empty index, which is written immediately so
    /// later reads see a well-formed document.
    pub fn read(&self) -> Result<()> {
        let mut state = self.lock();

        if !self.path.exists() {
            debug!(path = %self.path.display(), "index missing, creating empty one");
            *state = State::fresh(vendor_label(&self.path));
            return self.write_locked(&mut state);
        }

        debug!(path = %self.path.display(), "reading index");
        let doc = load_document(&self.path)?;
        let mut fresh = State {
            schema_version: doc.schema_version,
            vendor: doc.vendor,
            url: doc.url,
            timestamp: doc.timestamp,
            ..State::default()
        };
        if fresh.vendor.is_empty() {
            fresh.vendor = vendor_label(&self.path);
        }
        for entry in doc.pindex.pdscs {
            fresh.insert(entry);
        }
        *state = fresh;
        Ok(())
    }

    /// Flatten and persist, stamping the current time.
    pub fn write(&self) -> Result<()> {
        let mut state = self.lock();
        self.write_locked(&mut state)
    }

    fn write_locked(&self, state: &mut State) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let doc = IndexDocument {
            schema_version: state.schema_version.clone(),
            vendor: state.vendor.clone(),
            url: state.url.clone(),
            timestamp: Some(timestamp.clone()),
            pindex: Pindex {
                pdscs: state.flatten(),
            },
        };

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut ser = quick_xml::se::Serializer::new(&mut xml);
        ser.indent(' ', 2);
        doc.serialize(ser).map_err(|e| PackError::IndexCorrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        xml.push('\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PackError::io(format!("creating {}", parent.display()), e))?;
        }
        let tmp = self.path.with_extension("pidx.tmp");
        std::fs::write(&tmp, xml)
            .map_err(|e| PackError::io(format!("writing {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| PackError::io(format!("replacing {}", self.path.display()), e))?;

        debug!(path = %self.path.display(), entries = doc.pindex.pdscs.len(), "wrote index");
        state.timestamp = Some(timestamp);
        Ok(())
    }

    /// Freshness check against the file on disk.
    ///
    /// Fails with [`PackError::StaleIndex`] when the file or its timestamp
    /// is missing, or the timestamp is older than [`FRESHNESS_HOURS`].
    /// In-memory state is untouched.
    pub fn check_time(&self) -> Result<()> {
        let stale = || PackError::StaleIndex(self.path.display().to_string());
        if !self.path.exists() {
            return Err(stale());
        }
        let doc = load_document(&self.path)?;
        let Some(raw) = doc.timestamp.filter(|t| !t.trim().is_empty()) else {
            return Err(stale());
        };
        let stamped = DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| {
            warn!(path = %self.path.display(), timestamp = %raw, "unparseable index timestamp: {e}");
            stale()
        })?;
        let age = Utc::now().signed_duration_since(stamped.with_timezone(&Utc));
        if age > TimeDelta::hours(FRESHNESS_HOURS) {
            warn!(path = %self.path.display(), hours = age.num_hours(), "index is stale");
            return Err(stale());
        }
        Ok(())
    }

    /// Insert a new entry. Fails with [`PackError::EntryExists`] if its exact
    /// key is already present, regardless of URL.
    pub fn add_pdsc(&self, entry: IndexEntry) -> Result<()> {
        let mut state = self.lock();
        let key = entry.exact_key();
        if state.entries.contains_key(&key) {
            return Err(PackError::EntryExists(key));
        }
        debug!(index = %self.path.display(), %key, url = %entry.url, "adding entry");
        state.insert(entry);
        Ok(())
    }

    /// Move the family's canonical entry to `entry.version`, also taking
    /// `entry.url` when non-empty.
    ///
    /// Fails with [`PackError::EntryNotFound`] when the family is unknown.
    pub fn replace_pdsc_version(&self, entry: &IndexEntry) -> Result<()> {
        let mut state = self.lock();
        let family = entry.family_key();
        let Some(old_key) = state.families.get(&family).map(|f| f.canonical.clone()) else {
            return Err(PackError::EntryNotFound(entry.vname()));
        };

        let Some(mut seq) = state.entries.remove(&old_key) else {
            return Err(PackError::EntryNotFound(old_key));
        };
        let mut moved = seq.remove(0);
        if seq.is_empty() {
            state.detach(&family, &old_key);
        } else {
            state.entries.insert(old_key.clone(), seq);
        }

        moved.version.clone_from(&entry.version);
        if !entry.url.is_empty() {
            moved.url.clone_from(&entry.url);
        }
        let new_key = moved.exact_key();
        debug!(index = %self.path.display(), from = %old_key, to = %new_key, "replacing entry version");

        let slot = state.entries.entry(new_key.clone()).or_default();
        if !slot.iter().any(|e| e.url == moved.url) {
            slot.push(moved);
        }
        let fam = state.families.entry(family).or_default();
        if !fam.members.contains(&new_key) {
            fam.members.push(new_key.clone());
        }
        fam.canonical = new_key;
        Ok(())
    }

    /// Remove entries.
    ///
    /// With a version: the entry under that exact key (only the one with a
    /// matching URL when `entry.url` is set). Without a version: every entry
    /// of the family.
    pub fn remove_pdsc(&self, entry: &IndexEntry) -> Result<()> {
        let mut state = self.lock();
        let family = entry.family_key();

        if entry.version.is_empty() {
            let Some(fam) = state.families.remove(&family) else {
                return Err(PackError::EntryNotFound(entry.vname()));
            };
            for key in &fam.members {
                state.entries.remove(key);
            }
            debug!(index = %self.path.display(), family = %family, versions = fam.members.len(), "removed all versions");
            return Ok(());
        }

        let key = entry.exact_key();
        let Some(seq) = state.entries.get_mut(&key) else {
            return Err(PackError::EntryNotFound(key));
        };
        if entry.url.is_empty() {
            seq.clear();
        } else {
            let Some(pos) = seq.iter().position(|e| e.url == entry.url) else {
                return Err(PackError::EntryNotFound(entry.to_string()));
            };
            seq.remove(pos);
        }
        if seq.is_empty() {
            state.entries.remove(&key);
            state.detach(&family, &key);
        }
        debug!(index = %self.path.display(), %key, "removed entry");
        Ok(())
    }

    /// Position of the matching entry within its exact-key sequence.
    ///
    /// An empty `entry.url` matches the first stored entry.
    pub fn has_pdsc(&self, entry: &IndexEntry) -> Option<usize> {
        let state = self.lock();
        let seq = state.entries.get(&entry.exact_key())?;
        if entry.url.is_empty() {
            return (!seq.is_empty()).then_some(0);
        }
        seq.iter().position(|e| e.url == entry.url)
    }

    /// Entries matching `entry`.
    ///
    /// With a version: the exact key, falling back to a build-metadata
    /// tolerant match within the family (`1.2.3` finds `1.2.3+meta`).
    /// Without a version: every version of the family.
    pub fn find_pdsc_tags(&self, entry: &IndexEntry) -> Vec<IndexEntry> {
        let guard = self.lock();
        let state: &State = &guard;
        let family_members = || {
            state
                .families
                .get(&entry.family_key())
                .into_iter()
                .flat_map(|f| f.members.iter())
                .filter_map(|k| state.entries.get(k))
                .flatten()
        };

        if entry.version.is_empty() {
            return family_members().cloned().collect();
        }
        if let Some(seq) = state.entries.get(&entry.exact_key()) {
            return seq.clone();
        }
        if version::has_meta(&entry.version) {
            return Vec::new();
        }
        family_members()
            .filter(|e| version::same_version(&entry.version, &e.version))
            .cloned()
            .collect()
    }

    /// Every entry, ordered by exact key.
    pub fn list_pdsc_tags(&self) -> Vec<IndexEntry> {
        self.lock().flatten()
    }

    /// True iff no exact keys remain.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().entries.values().map(Vec::len).sum()
    }
}

fn vendor_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_document(path: &Path) -> Result<IndexDocument> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
    quick_xml::de::from_str(&xml).map_err(|e| PackError::IndexCorrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn entry(vendor: &str, name: &str, version: &str) -> IndexEntry {
        IndexEntry::new(vendor, name, version, "https://vendor.com/")
    }

    fn temp_index(is_web: bool) -> (tempfile::TempDir, PackageIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = PackageIndex::new(dir.path().join("index.pidx"), is_web);
        (dir, index)
    }

    /// Family consistency: every family resolves to non-empty sequences and
    /// every entry is reachable from its own family.
    fn assert_consistent(index: &PackageIndex) {
        let state = index.lock();
        for (family, fam) in &state.families {
            assert!(!fam.members.is_empty(), "{family} has no members");
            assert!(fam.members.contains(&fam.canonical));
            for key in &fam.members {
                let seq = state.entries.get(key).expect("member key present");
                assert!(!seq.is_empty());
                assert!(seq.iter().all(|e| &e.family_key() == family));
            }
        }
        for (key, seq) in &state.entries {
            let family = seq[0].family_key();
            assert!(state.families[&family].members.contains(key));
        }
    }

    #[test]
    fn test_read_missing_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".Local").join("local_repository.pidx");
        let index = PackageIndex::new(&path, false);
        index.read().unwrap();
        assert!(path.exists());
        assert!(index.is_empty());
        assert_eq!(index.vendor(), "local_repository");
        assert!(index.timestamp().is_some());
    }

    #[test]
    fn test_round_trip() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.0.0")).unwrap();
        index.add_pdsc(entry("V", "P", "2.0.0")).unwrap();
        let mut deprecated = entry("Old", "Pack", "0.1.0");
        deprecated.deprecated = Some("2023-01-01".into());
        deprecated.replacement = Some("New.Pack".into());
        index.add_pdsc(deprecated).unwrap();
        index.write().unwrap();
        index.write().unwrap();

        let reloaded = PackageIndex::new(index.path(), true);
        reloaded.read().unwrap();
        let before: HashSet<IndexEntry> = index.list_pdsc_tags().into_iter().collect();
        let after: HashSet<IndexEntry> = reloaded.list_pdsc_tags().into_iter().collect();
        assert_eq!(before, after);
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.vendor(), "index");
        assert_consistent(&reloaded);
    }

    #[test]
    fn test_add_rejects_duplicate_exact_key() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.0.0")).unwrap();
        let mut other_url = entry("V", "P", "1.0.0");
        other_url.url = "https://mirror.com/".into();
        let err = index.add_pdsc(other_url).unwrap_err();
        assert!(matches!(err, PackError::EntryExists(ref k) if k == "V.P.1.0.0"));
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.list_pdsc_tags()[0].url,
            "https://vendor.com/",
            "duplicate add must leave the index unchanged"
        );
    }

    #[test]
    fn test_versions_coexist() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.0.0")).unwrap();
        index.add_pdsc(entry("V", "P", "2.0.0")).unwrap();
        assert_eq!(index.find_pdsc_tags(&IndexEntry::family("v", "p")).len(), 2);
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_without_version_removes_family() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("Vendor", "Pack", "1.0.0")).unwrap();
        index.add_pdsc(entry("Vendor", "Pack", "2.0.0")).unwrap();
        index.add_pdsc(entry("Other", "Pack", "1.0.0")).unwrap();

        index.remove_pdsc(&IndexEntry::family("Vendor", "Pack")).unwrap();

        assert!(index.has_pdsc(&entry("Vendor", "Pack", "1.0.0")).is_none());
        assert!(index.has_pdsc(&entry("Vendor", "Pack", "2.0.0")).is_none());
        assert_eq!(index.has_pdsc(&entry("Other", "Pack", "1.0.0")), Some(0));
        assert_eq!(index.len(), 1);
        assert_consistent(&index);
    }

    #[test]
    fn test_remove_single_version() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.0.0")).unwrap();
        index.add_pdsc(entry("V", "P", "2.0.0")).unwrap();

        index.remove_pdsc(&entry("V", "P", "2.0.0")).unwrap();
        assert_eq!(index.find_pdsc_tags(&IndexEntry::family("V", "P")).len(), 1);
        assert_consistent(&index);

        let err = index.remove_pdsc(&entry("V", "P", "2.0.0")).unwrap_err();
        assert!(matches!(err, PackError::EntryNotFound(_)));

        index.remove_pdsc(&entry("V", "P", "1.0.0")).unwrap();
        assert!(index.is_empty());
        assert!(index.lock().families.is_empty());
    }

    #[test]
    fn test_remove_missing_family() {
        let (_dir, index) = temp_index(true);
        let err = index.remove_pdsc(&IndexEntry::family("V", "P")).unwrap_err();
        assert!(matches!(err, PackError::EntryNotFound(_)));
    }

    #[test]
    fn test_replace_version() {
        let (_dir, index) = temp_index(false);
        index.add_pdsc(entry("Vendor", "Pack", "1.0.0")).unwrap();

        let mut next = entry("Vendor", "Pack", "2.0.0");
        next.url = String::new();
        index.replace_pdsc_version(&next).unwrap();

        assert!(index.has_pdsc(&entry("Vendor", "Pack", "1.0.0")).is_none());
        assert_eq!(index.has_pdsc(&entry("Vendor", "Pack", "2.0.0")), Some(0));
        assert_eq!(index.find_pdsc_tags(&IndexEntry::family("Vendor", "Pack")).len(), 1);
        assert_eq!(index.list_pdsc_tags()[0].url, "https://vendor.com/");
        assert_consistent(&index);
    }

    #[test]
    fn test_replace_moves_last_added_version() {
        let (_dir, index) = temp_index(false);
        index.add_pdsc(entry("Vendor", "Pack", "1.0.0")).unwrap();
        index.add_pdsc(entry("Vendor", "Pack", "1.5.0")).unwrap();

        index.replace_pdsc_version(&entry("Vendor", "Pack", "2.0.0")).unwrap();

        assert_eq!(index.has_pdsc(&entry("Vendor", "Pack", "1.0.0")), Some(0));
        assert!(index.has_pdsc(&entry("Vendor", "Pack", "1.5.0")).is_none());
        assert_eq!(index.has_pdsc(&entry("Vendor", "Pack", "2.0.0")), Some(0));
        assert_eq!(index.len(), 2);
        assert_consistent(&index);

        // The moved entry is now the one a further replace picks up.
        index.replace_pdsc_version(&entry("Vendor", "Pack", "3.0.0")).unwrap();
        assert_eq!(index.has_pdsc(&entry("Vendor", "Pack", "1.0.0")), Some(0));
        assert!(index.has_pdsc(&entry("Vendor", "Pack", "2.0.0")).is_none());
        assert_eq!(index.has_pdsc(&entry("Vendor", "Pack", "3.0.0")), Some(0));
        assert_consistent(&index);
    }

    #[test]
    fn test_replace_unknown_family() {
        let (_dir, index) = temp_index(false);
        let err = index.replace_pdsc_version(&entry("V", "P", "1.0.0")).unwrap_err();
        assert!(matches!(err, PackError::EntryNotFound(_)));
    }

    #[test]
    fn test_has_pdsc_checks_url() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.0.0")).unwrap();
        assert_eq!(index.has_pdsc(&entry("V", "P", "1.0.0")), Some(0));
        let mut other = entry("V", "P", "1.0.0");
        other.url = "https://elsewhere.com/".into();
        assert!(index.has_pdsc(&other).is_none());
        other.url = String::new();
        assert_eq!(index.has_pdsc(&other), Some(0));
    }

    #[test]
    fn test_find_is_metadata_tolerant() {
        let (_dir, index) = temp_index(true);
        index.add_pdsc(entry("V", "P", "1.2.3+meta")).unwrap();
        assert_eq!(index.find_pdsc_tags(&entry("V", "P", "1.2.3")).len(), 1);
        assert_eq!(index.find_pdsc_tags(&entry("V", "P", "1.2.3+meta")).len(), 1);
        assert!(index.find_pdsc_tags(&entry("V", "P", "1.2.3+other")).is_empty());
        assert!(index.find_pdsc_tags(&entry("V", "P", "1.2.4")).is_empty());
    }

    #[test]
    fn test_duplicates_on_disk_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.pidx");
        std::fs::write(
            &path,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<index schemaVersion="1.1.0">
  <vendor>index</vendor>
  <url>https://www.keil.com/pack/</url>
  <timestamp>2024-01-01T00:00:00.000000000Z</timestamp>
  <pindex>
    <pdsc url="https://a.com/" vendor="V" name="P" version="1.0.0"/>
    <pdsc url="https://b.com/" vendor="V" name="P" version="1.0.0"/>
  </pindex>
</index>
"#,
        )
        .unwrap();
        let index = PackageIndex::new(&path, true);
        index.read().unwrap();
        assert_eq!(index.len(), 2);

        let mut b = entry("V", "P", "1.0.0");
        b.url = "https://b.com/".into();
        assert_eq!(index.has_pdsc(&b), Some(1));
        index.remove_pdsc(&b).unwrap();
        assert_eq!(index.len(), 1);
        assert_consistent(&index);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.pidx");
        std::fs::write(&path, "<index><pindex><pdsc").unwrap();
        let index = PackageIndex::new(&path, true);
        let err = index.read().unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupt { .. }));
        assert!(err.is_fatal());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "<index><pindex><pdsc",
            "corrupt index must not be rewritten"
        );
    }

    fn write_with_timestamp(path: &Path, timestamp: Option<DateTime<Utc>>) {
        let stamp = timestamp
            .map(|t| format!("<timestamp>{}</timestamp>", t.to_rfc3339_opts(SecondsFormat::Nanos, true)))
            .unwrap_or_default();
        std::fs::write(
            path,
            format!(r#"<index schemaVersion="1.1.0"><vendor>index</vendor><url/>{stamp}<pindex/></index>"#),
        )
        .unwrap();
    }

    #[test]
    fn test_check_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.pidx");
        let index = PackageIndex::new(&path, true);

        assert!(matches!(index.check_time(), Err(PackError::StaleIndex(_))));

        write_with_timestamp(&path, Some(Utc::now() - TimeDelta::hours(48)));
        assert!(matches!(index.check_time(), Err(PackError::StaleIndex(_))));

        write_with_timestamp(&path, Some(Utc::now() - TimeDelta::hours(1)));
        assert!(index.check_time().is_ok());

        write_with_timestamp(&path, None);
        assert!(matches!(index.check_time(), Err(PackError::StaleIndex(_))));
    }

    #[test]
    fn test_fresh_write_is_fresh() {
        let (_dir, index) = temp_index(true);
        index.read().unwrap();
        assert!(index.check_time().is_ok());
    }

    #[test]
    fn test_concurrent_adds() {
        let (_dir, index) = temp_index(true);
        let index = Arc::new(index);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        index.add_pdsc(entry("V", &format!("P{i}"), &format!("1.0.{j}"))).unwrap();
                    }
                    // every thread also races on one shared key
                    let _ = index.add_pdsc(entry("Shared", "Pack", "1.0.0"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 8 * 25 + 1);
        assert_consistent(&index);
    }

    #[test]
    fn test_random_sequence_keeps_invariants() {
        let (_dir, index) = temp_index(true);
        for round in 0..5u32 {
            for v in 0..4u32 {
                let _ = index.add_pdsc(entry("V", "P", &format!("{round}.{v}.0")));
                let _ = index.add_pdsc(entry("W", "Q", &format!("{v}.0.0")));
            }
            let _ = index.replace_pdsc_version(&entry("V", "P", &format!("9.{round}.0")));
            let _ = index.remove_pdsc(&entry("W", "Q", &format!("{round}.0.0")));
            assert_consistent(&index);
        }
        index.remove_pdsc(&IndexEntry::family("V", "P")).unwrap();
        assert_consistent(&index);
        assert!(index.find_pdsc_tags(&IndexEntry::family("V", "P")).is_empty());
    }
}
