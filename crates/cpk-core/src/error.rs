//! Error taxonomy shared by the index, the install pipeline and the session
//! root.

use cpk_schema::{DescriptorError, IdentityError};
use thiserror::Error;

/// Coarse classification of a [`PackError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed pack reference.
    BadIdentifier,
    /// Duplicate install target.
    EntryExists,
    /// Uninstall or version-replace target absent.
    EntryNotFound,
    /// Index timestamp missing or older than the freshness window.
    StaleIndex,
    /// Malformed on-disk index document.
    IndexCorrupt,
    /// Network failure or missing local file.
    FetchFailed,
    /// Checksum or signature mismatch.
    IntegrityFailed,
    /// Structurally invalid archive or path traversal attempt.
    ExtractionFailed,
    /// User-requested abort.
    Cancelled,
    /// Filesystem failure.
    Io,
}

/// Errors raised by pack management operations.
#[derive(Error, Debug)]
pub enum PackError {
    /// The reference could not be parsed or is not usable for the operation.
    #[error("bad pack reference: {0}")]
    BadIdentifier(String),

    /// The exact `vendor.name.version` key is already present.
    #[error("{0} is already installed")]
    EntryExists(String),

    /// Nothing matched the requested entry.
    #[error("{0} is not installed")]
    EntryNotFound(String),

    /// The index has no timestamp or is older than the freshness window.
    #[error("index {0} is stale")]
    StaleIndex(String),

    /// The index file exists but cannot be parsed.
    #[error("index {path} is corrupt: {message}")]
    IndexCorrupt {
        /// Index file path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The pack could not be fetched.
    #[error("failed to fetch {location}: {message}")]
    FetchFailed {
        /// URL or path being fetched.
        location: String,
        /// Failure reason.
        message: String,
    },

    /// Checksum or signature verification failed.
    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    /// The archive is not a valid pack or tried to escape its destination.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The user aborted the operation.
    #[error("terminated by user")]
    Cancelled,

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    /// Attach context to an I/O error.
    pub fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            context: context.to_string(),
            source,
        }
    }

    /// Fetch failure for `location`.
    pub fn fetch(location: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            location: location.into(),
            message: message.to_string(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadIdentifier(_) => ErrorKind::BadIdentifier,
            Self::EntryExists(_) => ErrorKind::EntryExists,
            Self::EntryNotFound(_) => ErrorKind::EntryNotFound,
            Self::StaleIndex(_) => ErrorKind::StaleIndex,
            Self::IndexCorrupt { .. } => ErrorKind::IndexCorrupt,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::IntegrityFailed(_) => ErrorKind::IntegrityFailed,
            Self::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Index corruption and filesystem failures cannot be recovered from
    /// within a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::IndexCorrupt | ErrorKind::Io)
    }

    /// Cancellation stops the remaining batch.
    pub fn aborts_batch(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<IdentityError> for PackError {
    fn from(err: IdentityError) -> Self {
        Self::BadIdentifier(err.to_string())
    }
}

impl From<DescriptorError> for PackError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Io { path, source } => Self::io(format!("reading {path}"), source),
            malformed @ DescriptorError::Malformed { .. } => {
                Self::ExtractionFailed(malformed.to_string())
            }
        }
    }
}

impl From<std::io::Error> for PackError {
    fn from(err: std::io::Error) -> Self {
        Self::io("I/O error", err)
    }
}

/// Result alias for pack operations.
pub type Result<T, E = PackError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagation_policy() {
        assert!(PackError::Cancelled.aborts_batch());
        assert!(!PackError::EntryExists("V.P.1.0.0".into()).aborts_batch());

        let corrupt = PackError::IndexCorrupt {
            path: "index.pidx".into(),
            message: "bad".into(),
        };
        assert!(corrupt.is_fatal());
        assert!(!PackError::fetch("https://x", "404").is_fatal());
    }

    #[test]
    fn test_identity_errors_are_bad_identifiers() {
        let err: PackError = IdentityError::Malformed("x".into()).into();
        assert_eq!(err.kind(), ErrorKind::BadIdentifier);
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(PackError::Cancelled.to_string(), "terminated by user");
    }
}
