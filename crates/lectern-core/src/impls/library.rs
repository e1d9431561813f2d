//! Working sets shared by the memory and file stores.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BookRecord, CatalogEntry};
use crate::error::StoreError;

/// Search queries kept per book.
pub const MAX_SEARCH_HISTORY: usize = 50;

/// Everything the metadata store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryIndex {
    books: BTreeMap<String, BookRecord>,
    /// Newest query first.
    history: BTreeMap<String, Vec<String>>,
    catalogs: BTreeMap<u64, CatalogEntry>,
    next_catalog_id: u64,
}

impl LibraryIndex {
    pub fn save_book(&mut self, book: BookRecord) {
        self.books.insert(book.path.clone(), book);
    }

    pub fn load_book(&self, path: &str) -> Option<BookRecord> {
        self.books.get(path).cloned()
    }

    /// Removes the record and its search history.
    pub fn delete_book(&mut self, path: &str) -> bool {
        self.history.remove(path);
        self.books.remove(path).is_some()
    }

    pub fn recent_books(&self, max: usize) -> Vec<BookRecord> {
        let mut opened: Vec<&BookRecord> = self
            .books
            .values()
            .filter(|book| book.last_opened.is_some())
            .collect();
        opened.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        opened.into_iter().take(max).cloned().collect()
    }

    pub fn delete_recent_position(&mut self, path: &str) -> bool {
        self.books
            .get_mut(path)
            .and_then(|book| book.last_opened.take())
            .is_some()
    }

    pub fn delete_bookmark(&mut self, book_path: &str, position: &str) -> bool {
        let Some(book) = self.books.get_mut(book_path) else {
            return false;
        };
        let before = book.bookmarks.len();
        book.bookmarks.retain(|b| b.position != position);
        book.bookmarks.len() != before
    }

    /// Moves a repeated query to the front instead of storing it twice.
    pub fn save_search_history(&mut self, book_path: &str, query: String) {
        let query = query.trim().to_string();
        if query.is_empty() {
            return;
        }
        let entries = self.history.entry(book_path.to_string()).or_default();
        entries.retain(|q| *q != query);
        entries.insert(0, query);
        entries.truncate(MAX_SEARCH_HISTORY);
    }

    pub fn load_search_history(&self, book_path: &str) -> Vec<String> {
        self.history.get(book_path).cloned().unwrap_or_default()
    }

    /// Catalogs are matched by id, then by url; unknown ones get a fresh id.
    pub fn save_catalog(&mut self, mut entry: CatalogEntry) -> u64 {
        let existing = entry
            .id
            .filter(|id| self.catalogs.contains_key(id))
            .or_else(|| {
                self.catalogs
                    .values()
                    .find(|c| c.url == entry.url)
                    .and_then(|c| c.id)
            });
        let id = match existing {
            Some(id) => id,
            None => {
                self.next_catalog_id += 1;
                self.next_catalog_id
            }
        };
        entry.id = Some(id);
        self.catalogs.insert(id, entry);
        id
    }

    pub fn touch_catalog(&mut self, url: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let catalog = self
            .catalogs
            .values_mut()
            .find(|c| c.url == url)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        catalog.last_used = Some(at);
        Ok(())
    }

    pub fn remove_catalog(&mut self, id: u64) -> bool {
        self.catalogs.remove(&id).is_some()
    }

    /// Most recently used first; never-used catalogs last, by id.
    pub fn load_catalogs(&self) -> Vec<CatalogEntry> {
        let mut all: Vec<CatalogEntry> = self.catalogs.values().cloned().collect();
        all.sort_by(|a, b| b.last_used.cmp(&a.last_used).then(a.id.cmp(&b.id)));
        all
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }
}

/// Cover images keyed by book path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverIndex {
    covers: BTreeMap<String, Vec<u8>>,
}

impl CoverIndex {
    pub fn save(&mut self, book_path: &str, data: Vec<u8>) {
        self.covers.insert(book_path.to_string(), data);
    }

    pub fn load(&self, book_path: &str) -> Option<Vec<u8>> {
        self.covers.get(book_path).cloned()
    }

    pub fn delete(&mut self, book_path: &str) -> bool {
        self.covers.remove(book_path).is_some()
    }

    pub fn len(&self) -> usize {
        self.covers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bookmark;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn recent_books_orders_by_last_opened() {
        let mut index = LibraryIndex::default();
        index.save_book(BookRecord::new("a.epub").opened_at(at(8)));
        index.save_book(BookRecord::new("b.epub").opened_at(at(10)));
        index.save_book(BookRecord::new("never.epub"));
        index.save_book(BookRecord::new("c.epub").opened_at(at(9)));

        let paths: Vec<String> = index.recent_books(2).into_iter().map(|b| b.path).collect();
        assert_eq!(paths, vec!["b.epub", "c.epub"]);
        assert_eq!(index.recent_books(10).len(), 3);
    }

    #[test]
    fn deleting_a_recent_position_keeps_the_record() {
        let mut index = LibraryIndex::default();
        index.save_book(BookRecord::new("a.epub").with_title("A").opened_at(at(8)));
        index.save_book(BookRecord::new("b.epub").opened_at(at(9)));

        assert!(index.delete_recent_position("a.epub"));
        assert!(!index.delete_recent_position("a.epub"));
        assert!(!index.delete_recent_position("missing.epub"));

        let paths: Vec<String> = index.recent_books(10).into_iter().map(|b| b.path).collect();
        assert_eq!(paths, vec!["b.epub"]);
        assert_eq!(index.load_book("a.epub").unwrap().title.as_deref(), Some("A"));
    }

    #[test]
    fn bookmarks_are_deleted_by_position() {
        let mut index = LibraryIndex::default();
        index.save_book(
            BookRecord::new("a.epub")
                .with_bookmark(Bookmark::new("/body/p[3]", at(8)))
                .with_bookmark(Bookmark::new("/body/p[9]", at(9))),
        );

        assert!(index.delete_bookmark("a.epub", "/body/p[3]"));
        assert!(!index.delete_bookmark("a.epub", "/body/p[3]"));
        assert!(!index.delete_bookmark("missing.epub", "/body/p[9]"));

        let positions: Vec<String> = index
            .load_book("a.epub")
            .unwrap()
            .bookmarks
            .into_iter()
            .map(|b| b.position)
            .collect();
        assert_eq!(positions, vec!["/body/p[9]"]);
    }

    #[test]
    fn search_history_is_deduplicated_newest_first() {
        let mut index = LibraryIndex::default();
        index.save_search_history("a.epub", "whale".into());
        index.save_search_history("a.epub", "ahab".into());
        index.save_search_history("a.epub", " whale ".into());
        index.save_search_history("a.epub", "   ".into());

        assert_eq!(index.load_search_history("a.epub"), vec!["whale", "ahab"]);
        assert!(index.load_search_history("b.epub").is_empty());
    }

    #[test]
    fn search_history_is_capped() {
        let mut index = LibraryIndex::default();
        for i in 0..(MAX_SEARCH_HISTORY + 5) {
            index.save_search_history("a.epub", format!("q{i}"));
        }
        let history = index.load_search_history("a.epub");
        assert_eq!(history.len(), MAX_SEARCH_HISTORY);
        assert_eq!(history[0], format!("q{}", MAX_SEARCH_HISTORY + 4));
    }

    #[test]
    fn deleting_a_book_drops_its_history() {
        let mut index = LibraryIndex::default();
        index.save_book(BookRecord::new("a.epub"));
        index.save_search_history("a.epub", "whale".into());
        assert!(index.delete_book("a.epub"));
        assert!(!index.delete_book("a.epub"));
        assert!(index.load_search_history("a.epub").is_empty());
    }

    #[test]
    fn catalogs_are_matched_by_url_and_sorted_by_use() {
        let mut index = LibraryIndex::default();
        let feed = index.save_catalog(CatalogEntry::new("https://feed.example/opds", "Feed"));
        let other = index.save_catalog(CatalogEntry::new("https://other.example/opds", "Other"));
        assert_ne!(feed, other);

        let renamed = index.save_catalog(CatalogEntry::new("https://feed.example/opds", "Renamed"));
        assert_eq!(renamed, feed);

        index.touch_catalog("https://other.example/opds", at(12)).unwrap();
        let names: Vec<String> = index.load_catalogs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Other", "Renamed"]);

        assert!(matches!(
            index.touch_catalog("https://missing.example", at(12)),
            Err(StoreError::NotFound(_))
        ));
        assert!(index.remove_catalog(other));
        assert_eq!(index.load_catalogs().len(), 1);
    }

    #[test]
    fn catalog_ids_are_not_reused() {
        let mut index = LibraryIndex::default();
        let first = index.save_catalog(CatalogEntry::new("a", "A"));
        index.remove_catalog(first);
        let second = index.save_catalog(CatalogEntry::new("b", "B"));
        assert!(second > first);
    }

    #[test]
    fn covers_round_through_the_index() {
        let mut covers = CoverIndex::default();
        assert!(covers.is_empty());
        covers.save("a.epub", vec![1, 2, 3]);
        assert_eq!(covers.load("a.epub"), Some(vec![1, 2, 3]));
        assert!(covers.delete("a.epub"));
        assert!(covers.load("a.epub").is_none());
    }
}
