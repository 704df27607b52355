//! Pack index, install pipeline and session management for `cpk`.

pub mod config;
pub mod error;
pub mod index;
pub mod install;
pub mod io;
pub mod manager;
pub mod paths;
pub mod reporter;

pub use config::Config;
pub use error::{ErrorKind, PackError, Result};
pub use index::PackageIndex;
pub use install::{InstallationCoordinator, Installed};
pub use manager::{BatchOutcome, DependencyStatus, Listed, PackManager, Scope};
pub use paths::PackRoot;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for pack downloads
pub const USER_AGENT: &str = concat!("cpk/", env!("CARGO_PKG_VERSION"));
