//! Runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::paths;

/// Default cap on bytes copied per archive entry or download (20 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024 * 1024;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding extracted packs and index bookkeeping.
    pub pack_root: PathBuf,
    /// Require a `<stem>.sha256.checksum` file next to every pack archive.
    pub verify_checksum: bool,
    /// Base64 ed25519 public key; when set, every archive needs a `.sig`.
    pub public_key: Option<String>,
    /// Maximum bytes written per archive entry or per download.
    pub max_file_size: u64,
    /// HTTP request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Config {
    /// Defaults for `pack_root`, with every optional check disabled.
    pub fn new(pack_root: impl Into<PathBuf>) -> Self {
        Self {
            pack_root: pack_root.into(),
            verify_checksum: false,
            public_key: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            timeout: None,
        }
    }

    /// Load configuration from `CPK_*` environment variables.
    pub fn from_env() -> Self {
        let pack_root = paths::default_pack_root().unwrap_or_else(|| {
            tracing::warn!("cannot determine a cache directory, using ./packs");
            PathBuf::from("packs")
        });

        let verify_checksum = std::env::var("CPK_VERIFY_CHECKSUM")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let public_key = std::env::var("CPK_PUBLIC_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let max_file_size = std::env::var("CPK_MAX_FILE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &u64| n > 0)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        let timeout = std::env::var("CPK_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        Self {
            pack_root,
            verify_checksum,
            public_key,
            max_file_size,
            timeout,
        }
    }
}
