//! Pack-root layout.
//!
//! ```text
//! <root>/.Web/index.pidx                 remote index
//! <root>/.Local/local_repository.pidx    local/dev index
//! <root>/.Download/                      fetched archives, descriptor copies
//! <root>/<Vendor>/<Name>/<Version>/      extracted packs
//! <root>/pack.idx                        touched on every save
//! ```

use std::path::{Path, PathBuf};

/// Environment variable overriding the pack root.
pub const PACK_ROOT_ENV: &str = "CPK_PACK_ROOT";

/// Default pack root: `$CPK_PACK_ROOT`, else `<cache dir>/arm/packs`.
/// `None` when neither is available.
pub fn default_pack_root() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(PACK_ROOT_ENV) {
        if !val.is_empty() {
            return Some(PathBuf::from(val));
        }
    }
    dirs::cache_dir().map(|c| c.join("arm").join("packs"))
}

/// Extract the file name from a URL or `/`-separated path.
pub fn filename_from_url(url: &str) -> &str {
    url.rsplit(['/', '\\']).next().unwrap_or("")
}

/// Directory layout below one pack root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRoot {
    root: PathBuf,
}

impl PackRoot {
    /// Wrap a pack-root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The pack root itself.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `<root>/.Web`
    pub fn web_dir(&self) -> PathBuf {
        self.root.join(".Web")
    }

    /// `<root>/.Local`
    pub fn local_dir(&self) -> PathBuf {
        self.root.join(".Local")
    }

    /// `<root>/.Download`
    pub fn download_dir(&self) -> PathBuf {
        self.root.join(".Download")
    }

    /// `<root>/.Web/index.pidx`
    pub fn web_index(&self) -> PathBuf {
        self.web_dir().join("index.pidx")
    }

    /// `<root>/.Local/local_repository.pidx`
    pub fn local_index(&self) -> PathBuf {
        self.local_dir().join("local_repository.pidx")
    }

    /// `<root>/pack.idx`
    pub fn pack_idx(&self) -> PathBuf {
        self.root.join("pack.idx")
    }

    /// `<root>/<Vendor>/<Name>/<Version>`, build metadata stripped.
    pub fn pack_dir(&self, vendor: &str, name: &str, version: &str) -> PathBuf {
        self.root
            .join(vendor)
            .join(name)
            .join(cpk_schema::version::strip_meta(version))
    }

    /// Bookkeeping directories created when a session opens.
    pub fn bookkeeping_dirs(&self) -> [PathBuf; 3] {
        [self.web_dir(), self.local_dir(), self.download_dir()]
    }
}
