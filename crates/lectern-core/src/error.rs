use thiserror::Error;

use crate::domain::StoreKind;

/// Failure reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// Raised by the in-memory stores when a fault is injected.
    #[error("injected fault: {0}")]
    Injected(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} store is not open")]
    StoreClosed(StoreKind),

    #[error("{kind} store failed: {source}")]
    Store {
        kind: StoreKind,
        #[source]
        source: StoreError,
    },

    #[error("open failed (primary: {primary}, blob: {blob})")]
    OpenFailed { primary: String, blob: String },

    #[error("cannot resolve storage directory: {0}")]
    StorageDir(#[source] std::io::Error),

    #[error("task queue is closed")]
    QueueClosed,

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The task finished without producing a result for the caller.
    #[error("task dropped its result")]
    ResultDropped,

    #[error("worker failed: {0}")]
    Worker(String),
}

impl ServiceError {
    pub fn store(kind: StoreKind, source: StoreError) -> Self {
        Self::Store { kind, source }
    }
}

/// Tags a store result with the store it came from.
pub(crate) trait StoreResultExt<T> {
    fn in_store(self, kind: StoreKind) -> Result<T, ServiceError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn in_store(self, kind: StoreKind) -> Result<T, ServiceError> {
        self.map_err(|source| ServiceError::store(kind, source))
    }
}
