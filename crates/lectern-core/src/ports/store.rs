//! Store ports.
//!
//! The service coordinates two independently openable stores: the primary
//! (metadata) store and the blob (cover image) store. Both are owned by the
//! worker and only ever called from inside a task body.
//!
//! # Contract
//! - `close` and `clear_caches` are idempotent and safe on a closed store.
//! - `open` after `close` fully re-initializes the store.
//! - Domain methods may assume the store is open; the service never calls them
//!   otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::domain::{BookRecord, CatalogEntry};
use crate::error::StoreError;

#[async_trait]
pub trait Store: Send {
    /// Open the store rooted at `dir`.
    async fn open(&mut self, dir: &Path) -> Result<(), StoreError>;

    async fn close(&mut self);

    /// Make every write accepted so far durable.
    async fn flush(&mut self) -> Result<(), StoreError>;

    /// Drop in-memory caches. Never loses accepted writes.
    async fn clear_caches(&mut self);
}

/// Book metadata, search history and catalog subscriptions.
#[async_trait]
pub trait MetadataStore: Store {
    async fn save_book(&mut self, book: BookRecord) -> Result<(), StoreError>;

    async fn load_book(&mut self, path: &str) -> Result<Option<BookRecord>, StoreError>;

    /// Returns whether a record existed.
    async fn delete_book(&mut self, path: &str) -> Result<bool, StoreError>;

    /// Most recently opened books first.
    async fn recent_books(&mut self, max: usize) -> Result<Vec<BookRecord>, StoreError>;

    /// Drop the book from the recent list, keeping its record. Returns whether
    /// it was listed.
    async fn delete_recent_position(&mut self, path: &str) -> Result<bool, StoreError>;

    /// Returns whether the bookmark existed.
    async fn delete_bookmark(&mut self, book_path: &str, position: &str)
    -> Result<bool, StoreError>;

    async fn save_search_history(
        &mut self,
        book_path: &str,
        query: String,
    ) -> Result<(), StoreError>;

    /// Newest query first.
    async fn load_search_history(&mut self, book_path: &str) -> Result<Vec<String>, StoreError>;

    /// Insert or update a catalog; returns its id.
    async fn save_catalog(&mut self, entry: CatalogEntry) -> Result<u64, StoreError>;

    async fn touch_catalog(&mut self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn remove_catalog(&mut self, id: u64) -> Result<bool, StoreError>;

    /// Most recently used catalogs first.
    async fn load_catalogs(&mut self) -> Result<Vec<CatalogEntry>, StoreError>;
}

/// Cover images keyed by book path.
#[async_trait]
pub trait CoverStore: Store {
    async fn save_cover(&mut self, book_path: &str, data: Vec<u8>) -> Result<(), StoreError>;

    async fn load_cover(&mut self, book_path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn delete_cover(&mut self, book_path: &str) -> Result<bool, StoreError>;
}
