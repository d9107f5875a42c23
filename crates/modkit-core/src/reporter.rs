//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific terminal or host implementation.

use std::path::Path;

/// Sink for user-facing progress from core operations.
pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Installing").
    fn section(&self, title: &str);

    /// A module version is being written into a destination root.
    fn installing(&self, name: &str, version: &str, destination: &Path);

    /// A stale version folder was removed during pruning.
    fn pruned(&self, path: &Path);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn installing(&self, name: &str, version: &str, destination: &Path) {
        (**self).installing(name, version, destination);
    }
    fn pruned(&self, path: &Path) {
        (**self).pruned(path);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn installing(&self, _: &str, _: &str, _: &Path) {}
    fn pruned(&self, _: &Path) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
