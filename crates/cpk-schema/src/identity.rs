//! Pack reference parsing.
//!
//! A reference is whatever the user typed: a pack file path or URL
//! (`/tmp/ARM.CMSIS.5.9.0.pack`, `https://host/ARM.CMSIS.5.9.0.pack`), a
//! development descriptor (`./ARM.CMSIS.pdsc`), or a pack id in either the
//! dotted (`ARM.CMSIS.5.9.0`) or the legacy (`ARM::CMSIS@^5.0.0`) notation.
//! Parsing is a pure function of the input and the working directory used to
//! absolutise relative file paths; no filesystem access happens here.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::entry::IndexEntry;
use crate::version::{self, VERSION_PATTERN};

/// Pack vendor and pack name grammar.
pub const NAME_PATTERN: &str = r"[\-_A-Za-z0-9]+";

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{NAME_PATTERN}$")).expect("NAME_PATTERN is a valid regex")
});

static FILE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<vendor>{NAME_PATTERN})\.(?P<name>{NAME_PATTERN})\.(?:(?P<version>{VERSION_PATTERN})\.(?P<ext>pack|zip)|(?P<pdsc>pdsc))$"
    ))
    .expect("file name pattern is a valid regex")
});

static DOTTED_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<vendor>{NAME_PATTERN})\.(?P<name>{NAME_PATTERN})(?:\.(?P<version>{VERSION_PATTERN}))?$"
    ))
    .expect("dotted id pattern is a valid regex")
});

static LEGACY_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<vendor>{NAME_PATTERN})::(?P<name>{NAME_PATTERN})(?:(?P<modifier>@\^|@~|@>=|>=|@)(?P<version>{VERSION_PATTERN}|latest))?$"
    ))
    .expect("legacy id pattern is a valid regex")
});

// `Vendor.Pack.a.b.c:` prefix of a ranged dotted id.
static RANGE_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\-_A-Za-z0-9]+\.){4}[\-_A-Za-z0-9+]+:").expect("range pattern is a valid regex")
});

static LATEST_SUFFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\-_A-Za-z0-9]+\.){2}latest$").expect("latest pattern is a valid regex")
});

/// Errors produced while parsing a pack reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Neither the file name grammar nor the pack id grammar matched.
    #[error(
        "bad pack reference '{0}': expected Vendor.Pack.x.y.z.pack, Vendor.Pack.pdsc, Vendor.Pack[.x.y.z] or Vendor::Pack[@x.y.z]"
    )]
    Malformed(String),

    /// Vendor does not match `[A-Za-z0-9_-]+`.
    #[error("bad pack vendor '{0}'")]
    InvalidVendor(String),

    /// Pack name does not match `[A-Za-z0-9_-]+`.
    #[error("bad pack name '{0}'")]
    InvalidName(String),

    /// Version is not a semantic version.
    #[error("bad pack version '{0}'")]
    InvalidVersion(String),

    /// The working directory needed to absolutise a relative path is unknown.
    #[error("cannot resolve working directory: {0}")]
    WorkingDirectory(String),
}

/// How the version of a pack id selects among available versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VersionModifier {
    /// `Vendor::Pack@x.y.z`, `Vendor.Pack.x.y.z`
    Exact,
    /// `Vendor::Pack@latest`
    Latest,
    /// `Vendor::Pack`, `Vendor.Pack`
    #[default]
    Any,
    /// `Vendor::Pack@>=x.y.z`
    GreaterOrEqual,
    /// `Vendor::Pack@^x.y.z`
    CompatibleMajor,
    /// `Vendor::Pack@~x.y.z`
    CompatiblePatch,
    /// `Vendor.Pack.a.b.c:x.y.z`
    Range,
}

impl VersionModifier {
    fn from_legacy(token: &str) -> Self {
        match token {
            "@^" => Self::CompatibleMajor,
            "@~" => Self::CompatiblePatch,
            "@>=" | ">=" => Self::GreaterOrEqual,
            _ => Self::Exact,
        }
    }
}

/// Archive or descriptor extension of a file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// `.pack`
    Pack,
    /// `.zip`
    Zip,
    /// `.pdsc`
    Pdsc,
}

impl Extension {
    /// Extension without the leading dot.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pack => "pack",
            Self::Zip => "zip",
            Self::Pdsc => "pdsc",
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully validated pack reference.
///
/// Fields are only reachable through accessors; a value never changes after
/// [`PackageIdentity::parse`] returns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    vendor: String,
    name: String,
    version: String,
    extension: Option<Extension>,
    location: String,
    is_pack_id: bool,
    modifier: VersionModifier,
}

impl PackageIdentity {
    /// Parse a reference, absolutising relative paths against the process
    /// working directory.
    pub fn parse(reference: &str) -> Result<Self, IdentityError> {
        let cwd = std::env::current_dir()
            .map_err(|e| IdentityError::WorkingDirectory(e.to_string()))?;
        Self::parse_in(reference, &cwd)
    }

    /// Parse a reference, absolutising relative paths against `cwd`.
    pub fn parse_in(reference: &str, cwd: &Path) -> Result<Self, IdentityError> {
        let mut path = reference;
        let mut max_version = None;

        if RANGE_PREFIX_REGEX.is_match(path) {
            if let Some((head, max)) = path.split_once(':') {
                if max != version::UNBOUNDED && !version::is_valid(max) {
                    return Err(IdentityError::InvalidVersion(max.to_string()));
                }
                path = head;
                max_version = Some(max);
            }
        }
        if LATEST_SUFFIX_REGEX.is_match(path) {
            path = path.trim_end_matches(".latest");
        }

        let (location, file_name) = split_location(path);

        if let Some(caps) = FILE_NAME_REGEX.captures(file_name) {
            let extension = if caps.name("pdsc").is_some() {
                Extension::Pdsc
            } else if caps.name("ext").is_some_and(|m| m.as_str() == "zip") {
                Extension::Zip
            } else {
                Extension::Pack
            };
            let identity = Self {
                vendor: caps["vendor"].to_string(),
                name: caps["name"].to_string(),
                version: caps
                    .name("version")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                extension: Some(extension),
                location: normalize_location(location, cwd),
                is_pack_id: false,
                modifier: VersionModifier::Exact,
            };
            tracing::debug!(
                reference,
                vendor = %identity.vendor,
                name = %identity.name,
                version = %identity.version,
                location = %identity.location,
                "parsed pack file reference"
            );
            return Ok(identity);
        }

        let identity = if let Some(caps) = DOTTED_ID_REGEX.captures(file_name) {
            let (version, modifier) = match (caps.name("version"), max_version) {
                (None, _) => (String::new(), VersionModifier::Any),
                (Some(v), Some(max)) => (format!("{}:{max}", v.as_str()), VersionModifier::Range),
                (Some(v), None) => (v.as_str().to_string(), VersionModifier::Exact),
            };
            Self::pack_id(&caps["vendor"], &caps["name"], version, modifier)
        } else if let Some(caps) = LEGACY_ID_REGEX.captures(file_name) {
            let (version, modifier) = match (caps.name("modifier"), caps.name("version")) {
                (_, Some(v)) if v.as_str() == "latest" => (String::new(), VersionModifier::Latest),
                (Some(m), Some(v)) => {
                    (v.as_str().to_string(), VersionModifier::from_legacy(m.as_str()))
                }
                _ => (String::new(), VersionModifier::Any),
            };
            Self::pack_id(&caps["vendor"], &caps["name"], version, modifier)
        } else {
            return Err(IdentityError::Malformed(reference.to_string()));
        };

        tracing::debug!(
            reference,
            vendor = %identity.vendor,
            name = %identity.name,
            version = %version::format_range(&identity.version),
            modifier = ?identity.modifier,
            "parsed pack id"
        );
        Ok(identity)
    }

    /// Build an exact pack id from its parts, validating each one.
    pub fn from_parts(vendor: &str, name: &str, version: &str) -> Result<Self, IdentityError> {
        if !is_valid_name(vendor) {
            return Err(IdentityError::InvalidVendor(vendor.to_string()));
        }
        if !is_valid_name(name) {
            return Err(IdentityError::InvalidName(name.to_string()));
        }
        if version.is_empty() {
            return Ok(Self::pack_id(vendor, name, String::new(), VersionModifier::Any));
        }
        if !version::is_valid(version) {
            return Err(IdentityError::InvalidVersion(version.to_string()));
        }
        Ok(Self::pack_id(vendor, name, version.to_string(), VersionModifier::Exact))
    }

    fn pack_id(vendor: &str, name: &str, version: String, modifier: VersionModifier) -> Self {
        Self {
            vendor: vendor.to_string(),
            name: name.to_string(),
            version,
            extension: None,
            location: String::new(),
            is_pack_id: true,
            modifier,
        }
    }

    /// Pack vendor.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Pack name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version, `min:max` range, or empty for [`VersionModifier::Any`] and
    /// [`VersionModifier::Latest`].
    pub fn version(&self) -> &str {
        &self.version
    }

    /// File extension, for file references only.
    pub fn extension(&self) -> Option<Extension> {
        self.extension
    }

    /// `/`-terminated directory or URL holding the file; empty for pack ids.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the reference was a pack id rather than a concrete file.
    pub fn is_pack_id(&self) -> bool {
        self.is_pack_id
    }

    /// How the version selects among available versions.
    pub fn modifier(&self) -> VersionModifier {
        self.modifier
    }

    /// Whether the file lives behind an `http(s)` URL.
    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }

    /// Whether this is a development descriptor (`Vendor.Name.pdsc`).
    pub fn is_descriptor(&self) -> bool {
        self.extension == Some(Extension::Pdsc)
    }

    /// `Vendor.Name`
    pub fn vname(&self) -> String {
        format!("{}.{}", self.vendor, self.name)
    }

    /// `Vendor::Name@version`, or `Vendor::Name` when no version is set.
    pub fn display_id(&self) -> String {
        match self.modifier {
            VersionModifier::Latest => format!("{}::{}@latest", self.vendor, self.name),
            _ if self.version.is_empty() => format!("{}::{}", self.vendor, self.name),
            VersionModifier::GreaterOrEqual => {
                format!("{}::{}@>={}", self.vendor, self.name, self.version)
            }
            VersionModifier::CompatibleMajor => {
                format!("{}::{}@^{}", self.vendor, self.name, self.version)
            }
            VersionModifier::CompatiblePatch => {
                format!("{}::{}@~{}", self.vendor, self.name, self.version)
            }
            _ => format!("{}::{}@{}", self.vendor, self.name, self.version),
        }
    }

    /// File name of the referenced archive or descriptor.
    pub fn file_name(&self) -> String {
        match self.extension {
            Some(Extension::Pdsc) | None => format!("{}.pdsc", self.vname()),
            Some(ext) => format!("{}.{}.{}", self.vname(), self.version, ext),
        }
    }

    /// Full source path or URL of a file reference.
    pub fn source(&self) -> String {
        format!("{}{}", self.location, self.file_name())
    }

    /// Index entry describing this reference.
    ///
    /// Only exact versions produce a version; other modifiers yield a family
    /// query.
    pub fn to_entry(&self) -> IndexEntry {
        let version = match self.modifier {
            VersionModifier::Exact => self.version.clone(),
            _ => String::new(),
        };
        IndexEntry::new(&self.vendor, &self.name, version, &self.location)
    }

    /// Whether `candidate` satisfies this reference's version modifier.
    ///
    /// [`VersionModifier::Latest`] accepts everything here; use
    /// [`PackageIdentity::select`] to narrow a set to its newest member.
    pub fn matches_version(&self, candidate: &str) -> bool {
        let requested = self.version.as_str();
        match self.modifier {
            VersionModifier::Any | VersionModifier::Latest => true,
            VersionModifier::Exact => version::same_version(requested, candidate),
            VersionModifier::GreaterOrEqual => {
                version::compare(candidate, requested) != Ordering::Less
            }
            VersionModifier::CompatibleMajor => {
                version::major(candidate) == version::major(requested)
                    && version::compare(candidate, requested) != Ordering::Less
            }
            VersionModifier::CompatiblePatch => {
                version::major_minor(candidate) == version::major_minor(requested)
                    && version::compare(candidate, requested) != Ordering::Less
            }
            VersionModifier::Range => {
                version::compare_range(candidate, requested) == Ordering::Equal
            }
        }
    }

    /// Whether an index entry belongs to this pack family (case-insensitive)
    /// and satisfies the version modifier.
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        entry.vendor.eq_ignore_ascii_case(&self.vendor)
            && entry.name.eq_ignore_ascii_case(&self.name)
            && self.matches_version(&entry.version)
    }

    /// Filter entries down to the ones this reference selects.
    pub fn select<'a, I>(&self, entries: I) -> Vec<&'a IndexEntry>
    where
        I: IntoIterator<Item = &'a IndexEntry>,
    {
        let matching: Vec<&IndexEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        if self.modifier != VersionModifier::Latest {
            return matching;
        }
        matching
            .iter()
            .copied()
            .max_by(|a, b| version::compare(&a.version, &b.version))
            .map(|newest| {
                matching
                    .iter()
                    .copied()
                    .filter(|e| version::compare(&e.version, &newest.version) == Ordering::Equal)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pack_id {
            f.write_str(&self.display_id())
        } else {
            f.write_str(&self.source())
        }
    }
}

/// Whether a vendor or pack name matches `[A-Za-z0-9_-]+`.
pub fn is_valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// Splits at the last path separator; the directory part keeps it.
fn split_location(path: &str) -> (&str, &str) {
    match path.rfind(['/', '\\']) {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    }
}

fn is_url(location: &str) -> bool {
    ["http://", "https://", "file://"]
        .iter()
        .any(|scheme| location.starts_with(scheme))
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Host-local `file:` URL as an absolute path (`file:///a/` and
/// `file://localhost/a/` both give `/a/`); `None` for anything else.
fn strip_file_scheme(location: &str) -> Option<&str> {
    let rest = location.strip_prefix("file://")?;
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    rest.starts_with('/').then_some(rest)
}

/// Filesystem directory behind a local `file:` location, with the leading
/// slash dropped before a drive letter (`file://localhost/C:/x/` gives
/// `C:/x/`). Remote locations give `None`.
pub fn location_path(location: &str) -> Option<String> {
    let dir = strip_file_scheme(location)?;
    if has_drive_letter(&dir[1..]) {
        return Some(dir[1..].to_string());
    }
    Some(dir.to_string())
}

/// Turns the directory part of a file reference into `/`-terminated URL
/// form: remote URLs pass through, local paths and host-local `file:` URLs
/// become `file://localhost/<abs>/`.
fn normalize_location(location: &str, cwd: &Path) -> String {
    let location = location.replace('\\', "/");
    let location = match strip_file_scheme(&location) {
        Some(path) => path.to_string(),
        None if is_url(&location) => return location,
        None => location,
    };

    let absolute = if location.starts_with('/') || has_drive_letter(&location) {
        location
    } else {
        let base = cwd.to_string_lossy().replace('\\', "/");
        format!("{}/{location}", base.trim_end_matches('/'))
    };

    let (prefix, rest) = match absolute.strip_prefix('/') {
        Some(rest) => ("", rest),
        None => absolute.split_once('/').unwrap_or((absolute.as_str(), "")),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::from("file://localhost/");
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push('/');
    }
    for segment in segments {
        out.push_str(segment);
        out.push('/');
    }
    out
}
