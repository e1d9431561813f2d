//! StorageService - the public face of the task queue.
//!
//! Every operation becomes a task on the single worker. Submission never waits
//! for the worker; results travel back through a [`CallbackTarget`] or, for
//! [`call`](StorageService::call), a oneshot channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::flush::FlushCoordinator;
use super::lifecycle::Lifecycle;
use super::stores::StoreSet;
use crate::domain::{
    BookRecord, CatalogEntry, FlushTicket, ServiceState, StoreKind, TaskId, TaskName,
};
use crate::error::{ServiceError, StoreResultExt};
use crate::impls::{CallbackDispatcher, InlineTarget};
use crate::observability::{QueueCounts, ServiceStats, StatsSnapshot};
use crate::ports::{CallbackTarget, Clock};
use crate::queue::TaskQueue;
use crate::worker::{Worker, panic_message};

pub struct StorageService {
    queue: Arc<TaskQueue>,
    flush: Arc<FlushCoordinator>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<ServiceStats>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<ServiceState>>,
    worker: Mutex<Option<Worker>>,
    /// An open was submitted and no close since.
    wants_open: AtomicBool,
}

impl StorageService {
    pub(crate) fn from_parts(
        queue: Arc<TaskQueue>,
        flush: Arc<FlushCoordinator>,
        lifecycle: Arc<Lifecycle>,
        stats: Arc<ServiceStats>,
        clock: Arc<dyn Clock>,
        state: Arc<watch::Sender<ServiceState>>,
        worker: Worker,
    ) -> Self {
        Self {
            queue,
            flush,
            lifecycle,
            stats,
            clock,
            state,
            worker: Mutex::new(Some(worker)),
            wants_open: AtomicBool::new(false),
        }
    }

    // --- lifecycle ---------------------------------------------------------

    /// Enqueue opening both stores.
    pub fn start(&self) -> Result<TaskId, ServiceError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let id = self.queue.submit("OpenStores", move |stores| {
            Box::pin(async move { lifecycle.open(stores).await })
        })?;
        self.wants_open.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Enqueue close-then-open as a single task.
    pub fn reopen(&self) -> Result<TaskId, ServiceError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let id = self.queue.submit("ReopenStores", move |stores| {
            Box::pin(async move { lifecycle.reopen(stores).await })
        })?;
        self.wants_open.store(true, Ordering::SeqCst);
        Ok(id)
    }

    /// Enqueue clearing caches and closing both stores. Does not flush.
    pub fn stop(&self) -> Result<TaskId, ServiceError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let id = self.queue.submit("CloseStores", move |stores| {
            Box::pin(async move {
                lifecycle.close(stores).await;
                Ok(())
            })
        })?;
        self.wants_open.store(false, Ordering::SeqCst);
        Ok(id)
    }

    /// Stop if needed, close the queue and wait for the worker to drain it.
    ///
    /// Released tasks still run; delayed ones (a pending scheduled flush) are
    /// dropped. Returns the stores. Fails with `QueueClosed` if called twice.
    pub async fn shutdown(&self) -> Result<StoreSet, ServiceError> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServiceError::QueueClosed)?;
        if self.wants_open.load(Ordering::SeqCst) {
            self.stop()?;
        }
        self.queue.close();
        info!(pending = ?self.queue.counts(), "shutting down");
        worker.join().await
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    // --- submission --------------------------------------------------------

    pub fn submit<F>(&self, name: impl Into<TaskName>, body: F) -> Result<TaskId, ServiceError>
    where
        F: for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<(), ServiceError>>
            + Send
            + 'static,
    {
        self.queue.submit(name, body)
    }

    pub fn submit_after<F>(
        &self,
        name: impl Into<TaskName>,
        delay: Duration,
        body: F,
    ) -> Result<TaskId, ServiceError>
    where
        F: for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<(), ServiceError>>
            + Send
            + 'static,
    {
        self.queue.submit_after(name, delay, body)
    }

    /// Run `body` and hand its result, success or failure, to `callback` on
    /// `target`.
    ///
    /// A panicking body still answers the caller with `TaskPanicked`; the
    /// panic is then resumed so the worker records it.
    pub fn request<T, F, C>(
        &self,
        name: impl Into<TaskName>,
        target: Arc<dyn CallbackTarget>,
        body: F,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<T, ServiceError>>
            + Send
            + 'static,
        C: FnOnce(Result<T, ServiceError>) + Send + 'static,
    {
        self.queue.submit(name, move |stores| {
            Box::pin(async move {
                let result = match AssertUnwindSafe(async move { body(stores).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        CallbackDispatcher::deliver_result(
                            target.as_ref(),
                            Err::<T, _>(ServiceError::TaskPanicked(message)),
                            callback,
                        );
                        panic::resume_unwind(payload);
                    }
                };
                if let Err(err) = &result {
                    warn!(error = %err, "request failed, delivering error to caller");
                }
                CallbackDispatcher::deliver_result(target.as_ref(), result, callback);
                Ok(())
            })
        })
    }

    /// Like [`request`](Self::request), awaiting the result instead.
    ///
    /// The task is submitted before this returns, not when the future is first
    /// polled, so ordering follows the call.
    pub fn call<T, F>(
        &self,
        name: impl Into<TaskName>,
        body: F,
    ) -> impl Future<Output = Result<T, ServiceError>> + Send
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<T, ServiceError>>
            + Send
            + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.request(name, Arc::new(InlineTarget), body, move |result| {
            // Nobody waiting is fine.
            let _ = tx.send(result);
        });
        async move {
            submitted?;
            rx.await.map_err(|_| ServiceError::ResultDropped)?
        }
    }

    // --- flush and barriers ------------------------------------------------

    /// Enqueue a debounced flush.
    pub fn schedule_flush(&self) -> Result<FlushTicket, ServiceError> {
        self.flush.schedule(&self.queue)
    }

    /// Enqueue a flush that always syncs both stores.
    pub fn force_flush(&self) -> Result<TaskId, ServiceError> {
        self.flush.force(&self.queue)
    }

    /// Post `callback` to `target` once everything submitted before has run.
    pub fn sync<C>(&self, target: Arc<dyn CallbackTarget>, callback: C) -> Result<TaskId, ServiceError>
    where
        C: FnOnce() + Send + 'static,
    {
        self.queue.submit("Sync", move |_stores| {
            Box::pin(async move {
                CallbackDispatcher::deliver(target.as_ref(), Box::new(callback));
                Ok(())
            })
        })
    }

    /// Resolves once everything submitted before has run.
    pub fn sync_now(&self) -> impl Future<Output = Result<(), ServiceError>> + Send {
        self.call("Sync", |_stores| Box::pin(async { Ok::<(), ServiceError>(()) }))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue_counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    pub fn min_flush_interval(&self) -> Duration {
        self.flush.min_interval()
    }

    // --- metadata ----------------------------------------------------------

    pub fn save_book_info(&self, book: BookRecord) -> Result<TaskId, ServiceError> {
        let id = self.submit("saveBookInfo", move |stores| {
            Box::pin(async move {
                stores
                    .primary()?
                    .save_book(book)
                    .await
                    .in_store(StoreKind::Primary)
            })
        })?;
        self.schedule_flush()?;
        Ok(id)
    }

    pub fn load_book_info<C>(
        &self,
        path: impl Into<String>,
        target: Arc<dyn CallbackTarget>,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        C: FnOnce(Result<Option<BookRecord>, ServiceError>) + Send + 'static,
    {
        let path = path.into();
        self.request(
            "loadBookInfo",
            target,
            move |stores| {
                Box::pin(async move {
                    stores
                        .primary()?
                        .load_book(&path)
                        .await
                        .in_store(StoreKind::Primary)
                })
            },
            callback,
        )
    }

    pub fn delete_book(&self, path: impl Into<String>) -> Result<TaskId, ServiceError> {
        let path = path.into();
        let id = self.submit("deleteBook", move |stores| {
            Box::pin(async move {
                let existed = stores
                    .primary()?
                    .delete_book(&path)
                    .await
                    .in_store(StoreKind::Primary)?;
                if !existed {
                    debug!(path = %path, "no such book");
                }
                Ok(())
            })
        })?;
        self.schedule_flush()?;
        Ok(id)
    }

    /// Save many records in one task, followed by a single scheduled flush.
    pub fn save_book_infos(&self, books: Vec<BookRecord>) -> Result<TaskId, ServiceError> {
        let id = self.submit("saveBookInfos", move |stores| {
            Box::pin(async move {
                let primary = stores.primary()?;
                for book in books {
                    primary.save_book(book).await.in_store(StoreKind::Primary)?;
                }
                Ok(())
            })
        })?;
        self.schedule_flush()?;
        Ok(id)
    }

    /// Remove a book from the recent list without forgetting it.
    pub fn delete_recent_position(&self, path: impl Into<String>) -> Result<TaskId, ServiceError> {
        let path = path.into();
        let id = self.submit("deleteRecentPosition", move |stores| {
            Box::pin(async move {
                stores
                    .primary()?
                    .delete_recent_position(&path)
                    .await
                    .in_store(StoreKind::Primary)?;
                Ok(())
            })
        })?;
        self.schedule_flush()?;
        Ok(id)
    }

    pub fn delete_bookmark(
        &self,
        book_path: impl Into<String>,
        position: impl Into<String>,
    ) -> Result<TaskId, ServiceError> {
        let book_path = book_path.into();
        let position = position.into();
        let id = self.submit("deleteBookmark", move |stores| {
            Box::pin(async move {
                let existed = stores
                    .primary()?
                    .delete_bookmark(&book_path, &position)
                    .await
                    .in_store(StoreKind::Primary)?;
                if !existed {
                    debug!(book = %book_path, position = %position, "no such bookmark");
                }
                Ok(())
            })
        })?;
        self.schedule_flush()?;
        Ok(id)
    }

    pub fn load_recent_books<C>(
        &self,
        max: usize,
        target: Arc<dyn CallbackTarget>,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        C: FnOnce(Result<Vec<BookRecord>, ServiceError>) + Send + 'static,
    {
        self.request(
            "loadRecentBooks",
            target,
            move |stores| {
                Box::pin(async move {
                    stores
                        .primary()?
                        .recent_books(max)
                        .await
                        .in_store(StoreKind::Primary)
                })
            },
            callback,
        )
    }

    pub fn save_search_history(
        &self,
        book_path: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<TaskId, ServiceError> {
        let book_path = book_path.into();
        let query = query.into();
        self.submit("saveSearchHistory", move |stores| {
            Box::pin(async move {
                stores
                    .primary()?
                    .save_search_history(&book_path, query)
                    .await
                    .in_store(StoreKind::Primary)
            })
        })
    }

    pub fn load_search_history<C>(
        &self,
        book_path: impl Into<String>,
        target: Arc<dyn CallbackTarget>,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        C: FnOnce(Result<Vec<String>, ServiceError>) + Send + 'static,
    {
        let book_path = book_path.into();
        self.request(
            "loadSearchHistory",
            target,
            move |stores| {
                Box::pin(async move {
                    stores
                        .primary()?
                        .load_search_history(&book_path)
                        .await
                        .in_store(StoreKind::Primary)
                })
            },
            callback,
        )
    }

    pub fn save_catalog(&self, entry: CatalogEntry) -> Result<TaskId, ServiceError> {
        self.submit("saveCatalog", move |stores| {
            Box::pin(async move {
                let id = stores
                    .primary()?
                    .save_catalog(entry)
                    .await
                    .in_store(StoreKind::Primary)?;
                debug!(catalog_id = id, "catalog saved");
                Ok(())
            })
        })
    }

    /// Mark a catalog as used now.
    pub fn touch_catalog(&self, url: impl Into<String>) -> Result<TaskId, ServiceError> {
        let url = url.into();
        let at = self.clock.now();
        self.submit("touchCatalog", move |stores| {
            Box::pin(async move {
                stores
                    .primary()?
                    .touch_catalog(&url, at)
                    .await
                    .in_store(StoreKind::Primary)
            })
        })
    }

    pub fn remove_catalog(&self, id: u64) -> Result<TaskId, ServiceError> {
        self.submit("removeCatalog", move |stores| {
            Box::pin(async move {
                stores
                    .primary()?
                    .remove_catalog(id)
                    .await
                    .in_store(StoreKind::Primary)?;
                Ok(())
            })
        })
    }

    pub fn load_catalogs<C>(
        &self,
        target: Arc<dyn CallbackTarget>,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        C: FnOnce(Result<Vec<CatalogEntry>, ServiceError>) + Send + 'static,
    {
        self.request(
            "loadCatalogs",
            target,
            move |stores| {
                Box::pin(async move {
                    stores
                        .primary()?
                        .load_catalogs()
                        .await
                        .in_store(StoreKind::Primary)
                })
            },
            callback,
        )
    }

    // --- covers ------------------------------------------------------------

    /// Empty `data` is ignored and nothing is submitted.
    pub fn save_cover(
        &self,
        book_path: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Option<TaskId>, ServiceError> {
        let book_path = book_path.into();
        if data.is_empty() {
            debug!(book = %book_path, "empty cover ignored");
            return Ok(None);
        }
        let id = self.submit("saveCover", move |stores| {
            Box::pin(async move {
                stores
                    .blob()?
                    .save_cover(&book_path, data)
                    .await
                    .in_store(StoreKind::Blob)
            })
        })?;
        self.schedule_flush()?;
        Ok(Some(id))
    }

    pub fn load_cover<C>(
        &self,
        book_path: impl Into<String>,
        target: Arc<dyn CallbackTarget>,
        callback: C,
    ) -> Result<TaskId, ServiceError>
    where
        C: FnOnce(Result<Option<Vec<u8>>, ServiceError>) + Send + 'static,
    {
        let book_path = book_path.into();
        self.request(
            "loadCover",
            target,
            move |stores| {
                Box::pin(async move {
                    stores
                        .blob()?
                        .load_cover(&book_path)
                        .await
                        .in_store(StoreKind::Blob)
                })
            },
            callback,
        )
    }

    /// Delete a cover and force a flush behind it.
    pub fn delete_cover(&self, book_path: impl Into<String>) -> Result<TaskId, ServiceError> {
        let book_path = book_path.into();
        let id = self.submit("deleteCover", move |stores| {
            Box::pin(async move {
                stores
                    .blob()?
                    .delete_cover(&book_path)
                    .await
                    .in_store(StoreKind::Blob)?;
                Ok(())
            })
        })?;
        self.force_flush()?;
        Ok(id)
    }
}

impl Drop for StorageService {
    fn drop(&mut self) {
        // Lets a worker that was never shut down drain and exit.
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ServiceBuilder;
    use crate::domain::Bookmark;
    use crate::impls::{
        FaultPlan, JournalEntry, MemoryCoverStore, MemoryMetadataStore, StoreJournal,
        callback_channel,
    };
    use crate::ports::{FixedClock, StorageDirResolver};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    const MIN: Duration = Duration::from_secs(30);

    struct Fixture {
        service: StorageService,
        journal: StoreJournal,
        faults: FaultPlan,
    }

    fn fixture() -> Fixture {
        let journal = StoreJournal::new();
        let faults = FaultPlan::new();
        let service = ServiceBuilder::new(
            MemoryMetadataStore::with_faults(journal.clone(), faults.clone()),
            MemoryCoverStore::new(journal.clone()),
        )
        .min_flush_interval(MIN)
        .storage_dir("/library")
        .build()
        .unwrap();
        Fixture {
            service,
            journal,
            faults,
        }
    }

    /// Runs a callback-style query inline and waits for its result.
    macro_rules! fetch {
        ($service:expr, $method:ident ( $($arg:expr),* )) => {{
            let (tx, rx) = oneshot::channel();
            $service
                .$method($($arg,)* Arc::new(InlineTarget), move |r| {
                    let _ = tx.send(r);
                })
                .unwrap();
            rx.await.unwrap()
        }};
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_writes_syncs_once() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();
        for i in 0..5 {
            service
                .save_book_info(BookRecord::new(format!("{i}.epub")))
                .unwrap();
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        service.sync_now().await.unwrap();
        assert_eq!(journal.flushes(StoreKind::Primary), 0);
        assert_eq!(service.queue_counts().delayed, 5);

        tokio::time::advance(MIN).await;
        service.sync_now().await.unwrap();
        assert_eq!(journal.flushes(StoreKind::Primary), 1);
        assert_eq!(journal.flushes(StoreKind::Blob), 1);

        let stats = service.stats();
        assert_eq!(stats.flushes_performed, 1);
        assert_eq!(stats.flushes_skipped, 4);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_always_lands() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();
        service.save_book_info(BookRecord::new("a.epub")).unwrap();
        service.force_flush().unwrap();
        service.force_flush().unwrap();
        service.sync_now().await.unwrap();

        assert_eq!(journal.flushes(StoreKind::Primary), 2);
        assert_eq!(service.stats().flushes_forced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_drops_the_pending_flush() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();
        service.save_book_info(BookRecord::new("a.epub")).unwrap();

        let stores = service.shutdown().await.unwrap();
        assert!(!stores.is_open());
        assert_eq!(journal.flushes(StoreKind::Primary), 0);
        assert_eq!(service.stats().discarded, 1);
        assert!(matches!(service.start(), Err(ServiceError::QueueClosed)));
        assert!(matches!(
            service.shutdown().await,
            Err(ServiceError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn create_then_destroy_clears_then_closes() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();
        service.shutdown().await.unwrap();

        let dir = PathBuf::from("/library");
        assert_eq!(
            journal.entries(),
            vec![
                JournalEntry::Open(StoreKind::Primary, dir.clone()),
                JournalEntry::Open(StoreKind::Blob, dir),
                JournalEntry::ClearCaches(StoreKind::Primary),
                JournalEntry::ClearCaches(StoreKind::Blob),
                JournalEntry::Close(StoreKind::Primary),
                JournalEntry::Close(StoreKind::Blob),
            ]
        );
        assert_eq!(service.state(), ServiceState::Unopened);
    }

    #[tokio::test]
    async fn open_failure_leaves_both_stores_closed() {
        let Fixture {
            service,
            journal,
            faults,
        } = fixture();
        faults.fail_open(true);
        service.start().unwrap();

        let result = fetch!(service, load_book_info("a.epub"));
        assert!(matches!(
            result,
            Err(ServiceError::StoreClosed(StoreKind::Primary))
        ));
        assert_eq!(service.state(), ServiceState::Unopened);
        let entries = journal.entries();
        assert!(entries.contains(&JournalEntry::Close(StoreKind::Primary)));
        assert!(entries.contains(&JournalEntry::Close(StoreKind::Blob)));
        assert_eq!(service.stats().failed, 1);

        // Retry is up to the caller.
        faults.fail_open(false);
        service.reopen().unwrap();
        service.sync_now().await.unwrap();
        assert_eq!(service.state(), ServiceState::Open);
    }

    struct Volumes(AtomicUsize);

    impl StorageDirResolver for Volumes {
        fn resolve(&self) -> io::Result<PathBuf> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(PathBuf::from(format!("/vol/{n}")))
        }
    }

    #[tokio::test]
    async fn reopen_brackets_surrounding_tasks() {
        let journal = StoreJournal::new();
        let service = ServiceBuilder::new(
            MemoryMetadataStore::new(journal.clone()),
            MemoryCoverStore::new(journal),
        )
        .resolver(Volumes(AtomicUsize::new(0)))
        .build()
        .unwrap();

        let probe = || {
            service.call("probe", |stores| {
                Box::pin(async move {
                    Ok(stores
                        .primary_handle()
                        .directory()
                        .map(Path::to_path_buf))
                })
            })
        };

        service.start().unwrap();
        let before = probe();
        service.reopen().unwrap();
        let after = probe();

        assert_eq!(before.await.unwrap(), Some(PathBuf::from("/vol/1")));
        assert_eq!(after.await.unwrap(), Some(PathBuf::from("/vol/2")));
    }

    #[tokio::test]
    async fn callbacks_arrive_in_submission_order() {
        let Fixture { service, .. } = fixture();
        let (target, mut receiver) = callback_channel();
        let target: Arc<dyn CallbackTarget> = Arc::new(target);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u32 {
            let seen = Arc::clone(&seen);
            service
                .request(
                    "echo",
                    Arc::clone(&target),
                    move |_stores| Box::pin(async move { Ok(i) }),
                    move |r| seen.lock().unwrap().push(r.unwrap()),
                )
                .unwrap();
        }
        service.sync_now().await.unwrap();
        assert!(seen.lock().unwrap().is_empty(), "callbacks run on the target");

        assert_eq!(receiver.run_pending(), 10);
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_producers_keep_their_own_order() {
        let Fixture { service, .. } = fixture();
        let service = Arc::new(service);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let service = Arc::clone(&service);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for n in 0..50u32 {
                        let seen = Arc::clone(&seen);
                        service
                            .submit("produce", move |_stores| {
                                Box::pin(async move {
                                    seen.lock().unwrap().push((p, n));
                                    Ok(())
                                })
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        service.sync_now().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        for p in 0..4 {
            let mine: Vec<u32> = seen.iter().filter(|(q, _)| *q == p).map(|(_, n)| *n).collect();
            assert_eq!(mine, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn metadata_operations_round_trip() {
        let Fixture { service, .. } = fixture();
        service.start().unwrap();

        let opened = chrono::Utc::now();
        service
            .save_book_info(
                BookRecord::new("moby.epub")
                    .with_title("Moby Dick")
                    .with_author("Herman Melville")
                    .opened_at(opened),
            )
            .unwrap();
        service.save_book_info(BookRecord::new("unread.epub")).unwrap();
        service.save_search_history("moby.epub", "whale").unwrap();
        service
            .save_catalog(CatalogEntry::new("https://feed.example/opds", "Feed"))
            .unwrap();
        service.touch_catalog("https://feed.example/opds").unwrap();

        let book = fetch!(service, load_book_info("moby.epub")).unwrap().unwrap();
        assert_eq!(book.authors, vec!["Herman Melville"]);

        let recent = fetch!(service, load_recent_books(10)).unwrap();
        assert_eq!(recent.len(), 1);

        let history = fetch!(service, load_search_history("moby.epub")).unwrap();
        assert_eq!(history, vec!["whale"]);

        let catalogs = fetch!(service, load_catalogs()).unwrap();
        assert_eq!(catalogs.len(), 1);
        assert!(catalogs[0].last_used.is_some());

        service.remove_catalog(catalogs[0].id.unwrap()).unwrap();
        service.delete_book("moby.epub").unwrap();
        assert!(fetch!(service, load_catalogs()).unwrap().is_empty());
        assert!(fetch!(service, load_book_info("moby.epub")).unwrap().is_none());
    }

    #[tokio::test]
    async fn cover_operations() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();

        assert!(service.save_cover("a.epub", Vec::new()).unwrap().is_none());
        assert!(service.save_cover("a.epub", vec![1, 2, 3]).unwrap().is_some());
        let cover = fetch!(service, load_cover("a.epub")).unwrap();
        assert_eq!(cover, Some(vec![1, 2, 3]));

        service.delete_cover("a.epub").unwrap();
        service.sync_now().await.unwrap();
        assert_eq!(journal.flushes(StoreKind::Blob), 1);
        assert!(fetch!(service, load_cover("a.epub")).unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_callback_runs_after_prior_work() {
        let Fixture { service, .. } = fixture();
        let (target, mut receiver) = callback_channel();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        service
            .submit("work", move |_stores| {
                Box::pin(async move {
                    o.lock().unwrap().push("work");
                    Ok(())
                })
            })
            .unwrap();
        let o = Arc::clone(&order);
        service
            .sync(Arc::new(target), move || o.lock().unwrap().push("synced"))
            .unwrap();

        assert!(receiver.run_next().await);
        assert_eq!(*order.lock().unwrap(), vec!["work", "synced"]);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let Fixture { service, .. } = fixture();
        let mut states = service.subscribe_state();
        service.start().unwrap();
        states.wait_for(|s| s.is_open()).await.unwrap();
        service.stop().unwrap();
        states
            .wait_for(|s| *s == ServiceState::Unopened)
            .await
            .unwrap();
    }

    fn boom() -> Result<u32, ServiceError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_call_reports_the_panic() {
        let Fixture { service, .. } = fixture();
        let result = service
            .call("boom", |_stores| Box::pin(async { boom() }))
            .await;
        assert!(matches!(result, Err(ServiceError::TaskPanicked(msg)) if msg == "boom"));
        assert_eq!(service.stats().panicked, 1);
    }

    #[tokio::test]
    async fn panicking_request_still_answers_on_the_target() {
        let Fixture { service, .. } = fixture();
        let (target, mut receiver) = callback_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        service
            .request(
                "boom",
                Arc::new(target),
                |_stores| Box::pin(async { boom() }),
                move |r| s.lock().unwrap().push(r),
            )
            .unwrap();
        service.sync_now().await.unwrap();

        assert_eq!(receiver.run_pending(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Err(ServiceError::TaskPanicked(msg)) if msg == "boom"));
        let stats = service.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.executed, 2);
    }

    #[tokio::test]
    async fn wall_clock_stamps_come_from_the_configured_clock() {
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T09:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let service = ServiceBuilder::new(
            MemoryMetadataStore::new(StoreJournal::new()),
            MemoryCoverStore::new(StoreJournal::new()),
        )
        .storage_dir("/library")
        .clock(FixedClock::new(at))
        .build()
        .unwrap();
        service.start().unwrap();

        service
            .save_catalog(CatalogEntry::new("https://feed.example/opds", "Feed"))
            .unwrap();
        service.touch_catalog("https://feed.example/opds").unwrap();
        service.force_flush().unwrap();

        let catalogs = fetch!(service, load_catalogs()).unwrap();
        assert_eq!(catalogs[0].last_used, Some(at));
        assert_eq!(service.stats().last_flush_at, Some(at));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_save_schedules_one_flush() {
        let Fixture { service, journal, .. } = fixture();
        service.start().unwrap();
        let books = (0..20).map(|i| BookRecord::new(format!("{i}.epub"))).collect();
        service.save_book_infos(books).unwrap();
        service.sync_now().await.unwrap();
        assert_eq!(service.queue_counts().delayed, 1);

        tokio::time::advance(MIN).await;
        service.sync_now().await.unwrap();
        assert_eq!(journal.flushes(StoreKind::Primary), 1);
        assert!(fetch!(service, load_book_info("19.epub")).unwrap().is_some());
    }

    #[tokio::test]
    async fn recent_positions_and_bookmarks_can_be_deleted() {
        let Fixture { service, .. } = fixture();
        service.start().unwrap();
        let opened = chrono::Utc::now();
        service
            .save_book_info(
                BookRecord::new("a.epub")
                    .opened_at(opened)
                    .with_bookmark(Bookmark::new("/body/p[3]", opened)),
            )
            .unwrap();

        service.delete_recent_position("a.epub").unwrap();
        service.delete_bookmark("a.epub", "/body/p[3]").unwrap();

        assert!(fetch!(service, load_recent_books(10)).unwrap().is_empty());
        let book = fetch!(service, load_book_info("a.epub")).unwrap().unwrap();
        assert!(book.bookmarks.is_empty());
        assert_eq!(service.stats().failed, 0);
    }
}
