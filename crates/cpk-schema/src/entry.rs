use serde::{Deserialize, Serialize};

/// One `<pdsc>` record of a pack index: a (vendor, name, version) triple and
/// the base location its pack is published under.
///
/// Attribute names match the index file format, so the struct serializes
/// directly as `<pdsc url=".." vendor=".." name=".." version=".."/>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename = "pdsc")]
pub struct IndexEntry {
    /// Base location (URL or `file://` directory), always `/`-terminated.
    #[serde(rename = "@url", default)]
    pub url: String,

    /// Pack vendor (e.g. `ARM`).
    #[serde(rename = "@vendor")]
    pub vendor: String,

    /// Pack name (e.g. `CMSIS`).
    #[serde(rename = "@name")]
    pub name: String,

    /// Semantic version; empty in queries that address a whole family.
    #[serde(rename = "@version", default)]
    pub version: String,

    /// Deprecation marker (usually a date), if the pack was retired.
    #[serde(
        rename = "@deprecated",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated: Option<String>,

    /// Successor pack in `Vendor.Name` form, if any.
    #[serde(
        rename = "@replacement",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replacement: Option<String>,
}

impl IndexEntry {
    /// Create an entry with no deprecation metadata.
    pub fn new(
        vendor: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            vendor: vendor.into(),
            name: name.into(),
            version: version.into(),
            deprecated: None,
            replacement: None,
        }
    }

    /// Query addressing every version of `vendor.name`.
    pub fn family(vendor: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(vendor, name, "", "")
    }

    /// `Vendor.Name.Version`, unique within one index.
    pub fn exact_key(&self) -> String {
        format!("{}.{}.{}", self.vendor, self.name, self.version)
    }

    /// Lowercase `vendor.name`, shared by all versions of a pack.
    pub fn family_key(&self) -> String {
        format!("{}.{}", self.vendor, self.name).to_lowercase()
    }

    /// `Vendor.Name` with original casing.
    pub fn vname(&self) -> String {
        format!("{}.{}", self.vendor, self.name)
    }

    /// `Vendor::Name@Version`, the form used by project files.
    pub fn pack_id(&self) -> String {
        format!("{}::{}@{}", self.vendor, self.name, self.version)
    }

    /// Full URL of the pack archive this entry describes.
    pub fn pack_url(&self) -> String {
        format!("{}{}.pack", self.url, self.exact_key())
    }

    /// `Vendor.Name.pdsc`
    pub fn descriptor_file_name(&self) -> String {
        format!("{}.pdsc", self.vname())
    }

    /// Whether the entry carries a deprecation marker.
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.as_deref().is_some_and(|d| !d.is_empty())
    }
}

impl std::fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.url.is_empty() {
            write!(f, "{}", self.exact_key())
        } else {
            write!(f, "{} ({})", self.exact_key(), self.url)
        }
    }
}
