//! Payloads carried through the queue.
//!
//! These are owned values: a caller hands one to a service method and no longer
//! has access to it, so a task never observes a producer-side mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about a book file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Path of the book file; the record key.
    pub path: String,
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub series: Option<String>,
    pub last_opened: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
}

impl BookRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: None,
            authors: Vec::new(),
            series: None,
            last_opened: None,
            bookmarks: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn opened_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_opened = Some(at);
        self
    }

    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.bookmarks.push(bookmark);
        self
    }
}

/// A saved position inside a book, identified by its position string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub position: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(position: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            position: position.into(),
            note: None,
            created_at,
        }
    }
}

/// A remote catalog (OPDS feed) the user subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Assigned by the store on first save.
    pub id: Option<u64>,
    pub url: String,
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            name: name.into(),
            username: None,
            password: None,
            last_used: None,
        }
    }
}
