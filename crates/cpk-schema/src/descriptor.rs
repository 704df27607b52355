//! Pack descriptor (`Vendor.Name.pdsc`) document model.
//!
//! Only the parts the pack manager needs are modelled: identity, release
//! history and declared pack requirements. Everything else in the document
//! is ignored during deserialization.

use std::cmp::Ordering;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::version;

/// Errors raised while loading a descriptor.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// The file could not be read.
    #[error("failed to read descriptor {path}: {source}")]
    Io {
        /// Descriptor path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not a well-formed descriptor.
    #[error("malformed descriptor {path}: {message}")]
    Malformed {
        /// Descriptor path, or `<memory>` for in-memory documents.
        path: String,
        /// Parser message.
        message: String,
    },
}

/// One `<release>` of the release history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Released version.
    #[serde(rename = "@version")]
    pub version: String,

    /// Release date, as written in the descriptor.
    #[serde(rename = "@date", default)]
    pub date: Option<String>,

    /// Alternate download URL for this release.
    #[serde(rename = "@url", default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Releases {
    #[serde(rename = "release", default)]
    releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Requirements {
    #[serde(rename = "packages", default)]
    groups: Vec<PackageGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PackageGroup {
    #[serde(rename = "package", default)]
    packages: Vec<RequiredPack>,
}

#[derive(Debug, Clone, Deserialize)]
struct RequiredPack {
    #[serde(rename = "@vendor", default)]
    vendor: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@version", default)]
    version: String,
}

/// A pack requirement declared by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Required pack name.
    pub name: String,
    /// Required pack vendor.
    pub vendor: String,
    /// `latest`, or a `min:max` / `min:_` range.
    pub range: String,
}

impl Dependency {
    /// Whether an installed version satisfies this requirement.
    pub fn is_satisfied_by(&self, installed: &str) -> bool {
        self.range == "latest" || version::compare_range(installed, &self.range) == Ordering::Equal
    }

    /// Project-file notation: `Vendor::Name@latest`, `@>=min`, `@v` or
    /// `@min:max`.
    pub fn pack_id(&self) -> String {
        let prefix = format!("{}::{}", self.vendor, self.name);
        if self.range == "latest" {
            return format!("{prefix}@latest");
        }
        match self.range.split_once(':') {
            Some((min, version::UNBOUNDED)) => format!("{prefix}@>={min}"),
            Some((min, max)) if min == max => format!("{prefix}@{min}"),
            _ => format!("{prefix}@{}", self.range),
        }
    }
}

/// Parsed pack descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename = "package")]
pub struct Descriptor {
    /// Pack vendor.
    #[serde(default)]
    pub vendor: String,

    /// Pack name.
    #[serde(default)]
    pub name: String,

    /// Base URL the vendor publishes packs under.
    #[serde(default)]
    pub url: String,

    /// License file path inside the pack, if declared.
    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    releases: Releases,

    #[serde(default)]
    requirements: Requirements,
}

impl Descriptor {
    /// Parse a descriptor document.
    pub fn from_xml(xml: &str) -> Result<Self, DescriptorError> {
        quick_xml::de::from_str(xml).map_err(|e| DescriptorError::Malformed {
            path: "<memory>".to_string(),
            message: e.to_string(),
        })
    }

    /// Read and parse a descriptor file.
    pub fn from_path(path: &Path) -> Result<Self, DescriptorError> {
        tracing::debug!(path = %path.display(), "reading descriptor");
        let xml = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        quick_xml::de::from_str(&xml).map_err(|e| DescriptorError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Most recent release (the first one listed), or empty.
    pub fn latest_version(&self) -> &str {
        self.releases
            .releases
            .first()
            .map_or("", |r| r.version.as_str())
    }

    /// Release matching `version` (leading zeros and build metadata
    /// ignored); the latest release when `version` is empty.
    pub fn find_release(&self, version: &str) -> Option<&Release> {
        if version.is_empty() {
            return self.releases.releases.first();
        }
        self.releases
            .releases
            .iter()
            .find(|r| version::compare(&r.version, version) == Ordering::Equal)
    }

    /// Declared pack requirements as raw `(name, vendor, range)` tuples.
    ///
    /// A missing version becomes `latest`; a single version `v` becomes the
    /// open range `v:_`.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.requirements
            .groups
            .iter()
            .flat_map(|group| &group.packages)
            .map(|pack| {
                let range = if pack.version.is_empty() {
                    "latest".to_string()
                } else if pack.version.contains(':') {
                    pack.version.clone()
                } else {
                    format!("{}:{}", pack.version, version::UNBOUNDED)
                };
                tracing::debug!(vendor = %pack.vendor, name = %pack.name, %range, "found dependency");
                Dependency {
                    name: pack.name.clone(),
                    vendor: pack.vendor.clone(),
                    range,
                }
            })
            .collect()
    }
}
