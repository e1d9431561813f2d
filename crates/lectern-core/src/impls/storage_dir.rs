use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::ports::StorageDirResolver;

const PROBE_FILE: &str = ".lectern-probe";

/// Prefers one directory and falls back to an application-private one when the
/// preferred directory cannot be created or written.
#[derive(Debug, Clone)]
pub struct FallbackDirResolver {
    preferred: PathBuf,
    fallback: PathBuf,
}

impl FallbackDirResolver {
    pub fn new(preferred: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            preferred: preferred.into(),
            fallback: fallback.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.preferred_dir, &config.fallback_dir)
    }
}

impl StorageDirResolver for FallbackDirResolver {
    fn resolve(&self) -> io::Result<PathBuf> {
        match ensure_writable(&self.preferred) {
            Ok(()) => {
                debug!(dir = %self.preferred.display(), "using preferred storage dir");
                Ok(self.preferred.clone())
            }
            Err(err) => {
                warn!(
                    preferred = %self.preferred.display(),
                    fallback = %self.fallback.display(),
                    error = %err,
                    "preferred storage dir unusable, falling back"
                );
                ensure_writable(&self.fallback)?;
                Ok(self.fallback.clone())
            }
        }
    }
}

/// Create `dir` if needed and prove it is writable.
fn ensure_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(PROBE_FILE);
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

/// Always the same directory, no checks.
#[derive(Debug, Clone)]
pub struct FixedDir(pub PathBuf);

impl StorageDirResolver for FixedDir {
    fn resolve(&self) -> io::Result<PathBuf> {
        Ok(self.0.clone())
    }
}
