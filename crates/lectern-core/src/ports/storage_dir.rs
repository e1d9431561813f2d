use std::io;
use std::path::PathBuf;

/// Locates the directory both stores live in.
///
/// Called by the open task on the worker, once per open, so a volume that was
/// remounted elsewhere is picked up by the next reopen.
pub trait StorageDirResolver: Send + Sync {
    fn resolve(&self) -> io::Result<PathBuf>;
}
