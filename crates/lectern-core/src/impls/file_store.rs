//! JSON snapshot stores.
//!
//! Each store keeps its whole working set in memory. `open` loads
//! `<dir>/library.json` or `<dir>/covers.json`; `flush` rewrites the file
//! through a temporary file and a rename when anything changed; `close` drops
//! what was not flushed.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::library::{CoverIndex, LibraryIndex};
use crate::domain::{BookRecord, CatalogEntry, StoreKind};
use crate::error::StoreError;
use crate::ports::{CoverStore, MetadataStore, Store};

pub const LIBRARY_FILE: &str = "library.json";
pub const COVERS_FILE: &str = "covers.json";

struct SnapshotFile<T> {
    kind: StoreKind,
    file_name: &'static str,
    path: Option<PathBuf>,
    working: Option<T>,
    dirty: bool,
}

impl<T> SnapshotFile<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    fn new(kind: StoreKind, file_name: &'static str) -> Self {
        Self {
            kind,
            file_name,
            path: None,
            working: None,
            dirty: false,
        }
    }

    async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name);
        let working = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => T::default(),
            Err(e) => return Err(e.into()),
        };
        info!(store = %self.kind, path = %path.display(), "store opened");
        self.path = Some(path);
        self.working = Some(working);
        self.dirty = false;
        Ok(())
    }

    fn close(&mut self) {
        if self.dirty {
            warn!(store = %self.kind, "closing with unflushed changes, dropping them");
        }
        self.path = None;
        self.working = None;
        self.dirty = false;
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let (Some(path), Some(working)) = (&self.path, &self.working) else {
            return Err(StoreError::Closed);
        };
        let bytes = serde_json::to_vec_pretty(working)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(store = %self.kind, bytes = bytes.len(), "snapshot written");
        self.dirty = false;
        Ok(())
    }

    fn read(&self) -> Result<&T, StoreError> {
        self.working.as_ref().ok_or(StoreError::Closed)
    }

    fn write(&mut self) -> Result<&mut T, StoreError> {
        let working = self.working.as_mut().ok_or(StoreError::Closed)?;
        self.dirty = true;
        Ok(working)
    }
}

/// Metadata store persisted as `library.json`.
pub struct FileMetadataStore {
    file: SnapshotFile<LibraryIndex>,
}

impl FileMetadataStore {
    pub fn new() -> Self {
        Self {
            file: SnapshotFile::new(StoreKind::Primary, LIBRARY_FILE),
        }
    }
}

impl Default for FileMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for FileMetadataStore {
    async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.file.open(dir).await
    }

    async fn close(&mut self) {
        self.file.close();
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush().await
    }

    async fn clear_caches(&mut self) {
        // The working set is the store; nothing to drop.
        debug!(store = %StoreKind::Primary, "clear caches");
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn save_book(&mut self, book: BookRecord) -> Result<(), StoreError> {
        self.file.write()?.save_book(book);
        Ok(())
    }

    async fn load_book(&mut self, path: &str) -> Result<Option<BookRecord>, StoreError> {
        Ok(self.file.read()?.load_book(path))
    }

    async fn delete_book(&mut self, path: &str) -> Result<bool, StoreError> {
        Ok(self.file.write()?.delete_book(path))
    }

    async fn recent_books(&mut self, max: usize) -> Result<Vec<BookRecord>, StoreError> {
        Ok(self.file.read()?.recent_books(max))
    }

    async fn delete_recent_position(&mut self, path: &str) -> Result<bool, StoreError> {
        Ok(self.file.write()?.delete_recent_position(path))
    }

    async fn delete_bookmark(
        &mut self,
        book_path: &str,
        position: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.file.write()?.delete_bookmark(book_path, position))
    }

    async fn save_search_history(
        &mut self,
        book_path: &str,
        query: String,
    ) -> Result<(), StoreError> {
        self.file.write()?.save_search_history(book_path, query);
        Ok(())
    }

    async fn load_search_history(&mut self, book_path: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.file.read()?.load_search_history(book_path))
    }

    async fn save_catalog(&mut self, entry: CatalogEntry) -> Result<u64, StoreError> {
        Ok(self.file.write()?.save_catalog(entry))
    }

    async fn touch_catalog(&mut self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.file.write()?.touch_catalog(url, at)
    }

    async fn remove_catalog(&mut self, id: u64) -> Result<bool, StoreError> {
        Ok(self.file.write()?.remove_catalog(id))
    }

    async fn load_catalogs(&mut self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.file.read()?.load_catalogs())
    }
}

/// Cover store persisted as `covers.json`.
pub struct FileCoverStore {
    file: SnapshotFile<CoverIndex>,
}

impl FileCoverStore {
    pub fn new() -> Self {
        Self {
            file: SnapshotFile::new(StoreKind::Blob, COVERS_FILE),
        }
    }
}

impl Default for FileCoverStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for FileCoverStore {
    async fn open(&mut self, dir: &Path) -> Result<(), StoreError> {
        self.file.open(dir).await
    }

    async fn close(&mut self) {
        self.file.close();
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush().await
    }

    async fn clear_caches(&mut self) {}
}

#[async_trait]
impl CoverStore for FileCoverStore {
    async fn save_cover(&mut self, book_path: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.file.write()?.save(book_path, data);
        Ok(())
    }

    async fn load_cover(&mut self, book_path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.file.read()?.load(book_path))
    }

    async fn delete_cover(&mut self, book_path: &str) -> Result<bool, StoreError> {
        Ok(self.file.write()?.delete(book_path))
    }
}
