//! The store pair owned by the worker.

use std::path::{Path, PathBuf};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::StoreKind;
use crate::error::{ServiceError, StoreError};
use crate::ports::{CoverStore, MetadataStore, Store};

/// One store plus its open flag and directory.
///
/// Only lifecycle tasks change the open flag; domain access goes through
/// [`get`](Self::get), which refuses while the store is closed.
pub struct StoreHandle<S: ?Sized> {
    kind: StoreKind,
    store: Box<S>,
    open: bool,
    directory: Option<PathBuf>,
}

impl<S: Store + ?Sized> StoreHandle<S> {
    pub fn new(kind: StoreKind, store: Box<S>) -> Self {
        Self {
            kind,
            store,
            open: false,
            directory: None,
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// The store, if open.
    pub fn get(&mut self) -> Result<&mut S, ServiceError> {
        if self.open {
            Ok(&mut *self.store)
        } else {
            Err(ServiceError::StoreClosed(self.kind))
        }
    }

    pub(crate) async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.store.open(dir).await?;
        self.open = true;
        self.directory = Some(dir.to_path_buf());
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        self.store.close().await;
        self.open = false;
        self.directory = None;
    }

    pub(crate) async fn clear_caches(&mut self) {
        self.store.clear_caches().await;
    }

    /// Flush if open. Returns whether a flush happened.
    pub(crate) async fn flush(&mut self) -> Result<bool, StoreError> {
        if !self.open {
            debug!(store = %self.kind, "store closed, flush skipped");
            return Ok(false);
        }
        self.store.flush().await?;
        Ok(true)
    }
}

/// Both stores plus the worker-side flush timestamp.
///
/// Task bodies receive `&mut StoreSet`; since only the worker ever holds it,
/// no locking is needed around the stores.
pub struct StoreSet {
    pub(crate) primary: StoreHandle<dyn MetadataStore>,
    pub(crate) blob: StoreHandle<dyn CoverStore>,

    /// When the last non-forced sync finished.
    pub(crate) last_flush: Option<Instant>,
}

impl StoreSet {
    pub fn new(primary: Box<dyn MetadataStore>, blob: Box<dyn CoverStore>) -> Self {
        Self {
            primary: StoreHandle::new(StoreKind::Primary, primary),
            blob: StoreHandle::new(StoreKind::Blob, blob),
            last_flush: None,
        }
    }

    /// The metadata store, or `StoreClosed` if it is not open.
    pub fn primary(&mut self) -> Result<&mut (dyn MetadataStore + 'static), ServiceError> {
        self.primary.get()
    }

    /// The cover store, or `StoreClosed` if it is not open.
    pub fn blob(&mut self) -> Result<&mut (dyn CoverStore + 'static), ServiceError> {
        self.blob.get()
    }

    pub fn primary_handle(&self) -> &StoreHandle<dyn MetadataStore> {
        &self.primary
    }

    pub fn blob_handle(&self) -> &StoreHandle<dyn CoverStore> {
        &self.blob
    }

    /// Both stores open.
    pub fn is_open(&self) -> bool {
        self.primary.is_open() && self.blob.is_open()
    }

    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    /// Flush every open store, primary first, and return how many flushed.
    ///
    /// Both are attempted even if the first fails; the first error is returned.
    pub(crate) async fn flush_all(&mut self) -> Result<usize, ServiceError> {
        let primary = self.primary.flush().await;
        let blob = self.blob.flush().await;
        let mut flushed = 0;
        for (kind, result) in [(StoreKind::Primary, primary), (StoreKind::Blob, blob)] {
            match result {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(source) => {
                    warn!(store = %kind, error = %source, "flush failed");
                    return Err(ServiceError::store(kind, source));
                }
            }
        }
        Ok(flushed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::StoreSet;
    use crate::impls::{MemoryCoverStore, MemoryMetadataStore, StoreJournal};

    /// A store set backed by journaling in-memory stores.
    pub(crate) fn memory_store_set() -> (StoreSet, StoreJournal) {
        let journal = StoreJournal::new();
        let stores = StoreSet::new(
            Box::new(MemoryMetadataStore::new(journal.clone())),
            Box::new(MemoryCoverStore::new(journal.clone())),
        );
        (stores, journal)
    }
}
