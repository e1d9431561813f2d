//! In-memory stores with a call journal and fault injection.
//!
//! Each store keeps a durable copy and a working copy. `open` starts the
//! working copy from the durable one, `flush` copies it back and `close` drops
//! whatever was not flushed, so tests can observe durability without touching
//! the filesystem.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::library::{CoverIndex, LibraryIndex};
use crate::domain::{BookRecord, CatalogEntry, StoreKind};
use crate::error::StoreError;
use crate::ports::{CoverStore, MetadataStore, Store};

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Open(StoreKind, PathBuf),
    OpenFailed(StoreKind),
    Close(StoreKind),
    Flush(StoreKind),
    ClearCaches(StoreKind),
    Write(StoreKind, &'static str),
    Read(StoreKind, &'static str),
}

impl JournalEntry {
    pub fn kind(&self) -> StoreKind {
        match self {
            JournalEntry::Open(kind, _)
            | JournalEntry::OpenFailed(kind)
            | JournalEntry::Close(kind)
            | JournalEntry::Flush(kind)
            | JournalEntry::ClearCaches(kind)
            | JournalEntry::Write(kind, _)
            | JournalEntry::Read(kind, _) => *kind,
        }
    }
}

/// Ordered log of calls made on one or more memory stores.
#[derive(Debug, Clone, Default)]
pub struct StoreJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl StoreJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: JournalEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    pub fn flushes(&self, kind: StoreKind) -> usize {
        self.lock()
            .iter()
            .filter(|e| **e == JournalEntry::Flush(kind))
            .count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Switches shared with a store after it has been handed to the service.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    fail_open: Arc<AtomicBool>,
    fail_flush: Arc<AtomicBool>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, on: bool) {
        self.fail_open.store(on, Ordering::SeqCst);
    }

    pub fn fail_flush(&self, on: bool) {
        self.fail_flush.store(on, Ordering::SeqCst);
    }

    fn open_fails(&self) -> bool {
        self.fail_open.load(Ordering::SeqCst)
    }

    fn flush_fails(&self) -> bool {
        self.fail_flush.load(Ordering::SeqCst)
    }
}

/// State common to both memory stores.
struct MemoryCore<T> {
    kind: StoreKind,
    journal: StoreJournal,
    faults: FaultPlan,
    durable: T,
    working: Option<T>,
}

impl<T: Clone + Default> MemoryCore<T> {
    fn new(kind: StoreKind, journal: StoreJournal, faults: FaultPlan) -> Self {
        Self {
            kind,
            journal,
            faults,
            durable: T::default(),
            working: None,
        }
    }

    fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        if self.faults.open_fails() {
            self.journal.record(JournalEntry::OpenFailed(self.kind));
            return Err(StoreError::Injected(format!("{} open", self.kind)));
        }
        self.working = Some(self.durable.clone());
        self.journal
            .record(JournalEntry::Open(self.kind, dir.to_path_buf()));
        debug!(store = %self.kind, dir = %dir.display(), "memory store opened");
        Ok(())
    }

    fn close(&mut self) {
        self.working = None;
        self.journal.record(JournalEntry::Close(self.kind));
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.faults.flush_fails() {
            return Err(StoreError::Injected(format!("{} flush", self.kind)));
        }
        if let Some(working) = &self.working {
            self.durable = working.clone();
        }
        self.journal.record(JournalEntry::Flush(self.kind));
        Ok(())
    }

    fn clear_caches(&mut self) {
        self.journal.record(JournalEntry::ClearCaches(self.kind));
    }

    fn read(&mut self, op: &'static str) -> Result<&T, StoreError> {
        self.journal.record(JournalEntry::Read(self.kind, op));
        self.working.as_ref().ok_or(StoreError::Closed)
    }

    fn write(&mut self, op: &'static str) -> Result<&mut T, StoreError> {
        self.journal.record(JournalEntry::Write(self.kind, op));
        self.working.as_mut().ok_or(StoreError::Closed)
    }
}

/// Metadata store kept in memory.
pub struct MemoryMetadataStore {
    core: MemoryCore<LibraryIndex>,
}

impl MemoryMetadataStore {
    pub fn new(journal: StoreJournal) -> Self {
        Self::with_faults(journal, FaultPlan::new())
    }

    pub fn with_faults(journal: StoreJournal, faults: FaultPlan) -> Self {
        Self {
            core: MemoryCore::new(StoreKind::Primary, journal, faults),
        }
    }
}

#[async_trait]
impl Store for MemoryMetadataStore {
    async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.core.open(dir)
    }

    async fn close(&mut self) {
        self.core.close();
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        self.core.flush()
    }

    async fn clear_caches(&mut self) {
        self.core.clear_caches();
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn save_book(&mut self, book: BookRecord) -> Result<(), StoreError> {
        self.core.write("save_book")?.save_book(book);
        Ok(())
    }

    async fn load_book(&mut self, path: &str) -> Result<Option<BookRecord>, StoreError> {
        Ok(self.core.read("load_book")?.load_book(path))
    }

    async fn delete_book(&mut self, path: &str) -> Result<bool, StoreError> {
        Ok(self.core.write("delete_book")?.delete_book(path))
    }

    async fn recent_books(&mut self, max: usize) -> Result<Vec<BookRecord>, StoreError> {
        Ok(self.core.read("recent_books")?.recent_books(max))
    }

    async fn delete_recent_position(&mut self, path: &str) -> Result<bool, StoreError> {
        Ok(self
            .core
            .write("delete_recent_position")?
            .delete_recent_position(path))
    }

    async fn delete_bookmark(
        &mut self,
        book_path: &str,
        position: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .core
            .write("delete_bookmark")?
            .delete_bookmark(book_path, position))
    }

    async fn save_search_history(
        &mut self,
        book_path: &str,
        query: String,
    ) -> Result<(), StoreError> {
        self.core
            .write("save_search_history")?
            .save_search_history(book_path, query);
        Ok(())
    }

    async fn load_search_history(&mut self, book_path: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .core
            .read("load_search_history")?
            .load_search_history(book_path))
    }

    async fn save_catalog(&mut self, entry: CatalogEntry) -> Result<u64, StoreError> {
        Ok(self.core.write("save_catalog")?.save_catalog(entry))
    }

    async fn touch_catalog(&mut self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.core.write("touch_catalog")?.touch_catalog(url, at)
    }

    async fn remove_catalog(&mut self, id: u64) -> Result<bool, StoreError> {
        Ok(self.core.write("remove_catalog")?.remove_catalog(id))
    }

    async fn load_catalogs(&mut self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.core.read("load_catalogs")?.load_catalogs())
    }
}

/// Cover store kept in memory.
pub struct MemoryCoverStore {
    core: MemoryCore<CoverIndex>,
}

impl MemoryCoverStore {
    pub fn new(journal: StoreJournal) -> Self {
        Self::with_faults(journal, FaultPlan::new())
    }

    pub fn with_faults(journal: StoreJournal, faults: FaultPlan) -> Self {
        Self {
            core: MemoryCore::new(StoreKind::Blob, journal, faults),
        }
    }
}

#[async_trait]
impl Store for MemoryCoverStore {
    async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.core.open(dir)
    }

    async fn close(&mut self) {
        self.core.close();
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        self.core.flush()
    }

    async fn clear_caches(&mut self) {
        self.core.clear_caches();
    }
}

#[async_trait]
impl CoverStore for MemoryCoverStore {
    async fn save_cover(&mut self, book_path: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.core.write("save_cover")?.save(book_path, data);
        Ok(())
    }

    async fn load_cover(&mut self, book_path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.core.read("load_cover")?.load(book_path))
    }

    async fn delete_cover(&mut self, book_path: &str) -> Result<bool, StoreError> {
        Ok(self.core.write("delete_cover")?.delete(book_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn domain_calls_fail_while_closed() {
        let mut store = MemoryMetadataStore::new(StoreJournal::new());
        assert!(matches!(
            store.load_book("a.epub").await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn unflushed_writes_are_lost_on_close() {
        let journal = StoreJournal::new();
        let mut store = MemoryMetadataStore::new(journal.clone());
        let dir = Path::new("/library");

        store.open(dir).await.unwrap();
        store.save_book(BookRecord::new("kept.epub")).await.unwrap();
        store.flush().await.unwrap();
        store.save_book(BookRecord::new("lost.epub")).await.unwrap();
        store.close().await;

        store.open(dir).await.unwrap();
        assert!(store.load_book("kept.epub").await.unwrap().is_some());
        assert!(store.load_book("lost.epub").await.unwrap().is_none());
        assert_eq!(journal.flushes(StoreKind::Primary), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_reported_and_journaled() {
        let journal = StoreJournal::new();
        let faults = FaultPlan::new();
        let mut store = MemoryCoverStore::with_faults(journal.clone(), faults.clone());

        faults.fail_open(true);
        assert!(matches!(
            store.open(Path::new("/x")).await,
            Err(StoreError::Injected(_))
        ));
        faults.fail_open(false);
        store.open(Path::new("/x")).await.unwrap();

        faults.fail_flush(true);
        assert!(store.flush().await.is_err());
        assert_eq!(journal.flushes(StoreKind::Blob), 0);

        assert_eq!(
            journal.entries()[..2],
            [
                JournalEntry::OpenFailed(StoreKind::Blob),
                JournalEntry::Open(StoreKind::Blob, PathBuf::from("/x")),
            ]
        );
    }

    #[tokio::test]
    async fn close_and_clear_caches_are_idempotent() {
        let journal = StoreJournal::new();
        let mut store = MemoryCoverStore::new(journal.clone());
        store.clear_caches().await;
        store.close().await;
        store.close().await;
        assert!(journal.entries().iter().all(|e| e.kind() == StoreKind::Blob));
        assert_eq!(journal.entries().len(), 3);
    }
}
