//! Reporter trait for dependency injection
//!
//! Core operations report progress and per-pack outcomes through this trait
//! so the engine stays independent of any terminal UI.

/// Sink for user-facing progress and status.
pub trait Reporter: Send + Sync {
    /// Download progress for a pack archive.
    fn fetching(&self, pack: &str, current: u64, total: Option<u64>);

    /// Extraction progress, in archive entries.
    fn extracting(&self, pack: &str, current: u64, total: u64);

    /// A pack was installed into `location`.
    fn installed(&self, pack: &str, location: &str);

    /// A pack was removed from an index.
    fn removed(&self, pack: &str);

    /// Operation on `reference` failed.
    fn failed(&self, reference: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Final tally of a batch.
    fn summary(&self, succeeded: usize, failed: usize, action: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn fetching(&self, pack: &str, current: u64, total: Option<u64>) {
        (**self).fetching(pack, current, total);
    }
    fn extracting(&self, pack: &str, current: u64, total: u64) {
        (**self).extracting(pack, current, total);
    }
    fn installed(&self, pack: &str, location: &str) {
        (**self).installed(pack, location);
    }
    fn removed(&self, pack: &str) {
        (**self).removed(pack);
    }
    fn failed(&self, reference: &str, reason: &str) {
        (**self).failed(reference, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, succeeded: usize, failed: usize, action: &str) {
        (**self).summary(succeeded, failed, action);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn fetching(&self, _: &str, _: u64, _: Option<u64>) {}
    fn extracting(&self, _: &str, _: u64, _: u64) {}
    fn installed(&self, _: &str, _: &str) {}
    fn removed(&self, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: &str) {}
}
