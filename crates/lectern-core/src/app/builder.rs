//! ServiceBuilder - wiring for [`StorageService`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

use super::flush::FlushCoordinator;
use super::lifecycle::Lifecycle;
use super::service::StorageService;
use super::stores::StoreSet;
use crate::config::{LecternConfig, StorageConfig};
use crate::domain::ServiceState;
use crate::impls::{FallbackDirResolver, FixedDir};
use crate::observability::ServiceStats;
use crate::ports::{Clock, CoverStore, MetadataStore, StorageDirResolver, SystemClock};
use crate::queue::TaskQueue;
use crate::worker::Worker;

/// Builds a [`StorageService`] around two stores.
///
/// ```ignore
/// let service = ServiceBuilder::new(FileMetadataStore::new(), FileCoverStore::new())
///     .config(&config)
///     .build()?;
/// service.start()?;
/// ```
pub struct ServiceBuilder {
    primary: Box<dyn MetadataStore>,
    blob: Box<dyn CoverStore>,
    min_flush_interval: Duration,
    storage: StorageConfig,
    resolver: Option<Arc<dyn StorageDirResolver>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no tokio runtime is running; build the service from inside one")]
    NoRuntime,
}

impl ServiceBuilder {
    pub fn new(primary: impl MetadataStore + 'static, blob: impl CoverStore + 'static) -> Self {
        let defaults = LecternConfig::default();
        Self {
            primary: Box::new(primary),
            blob: Box::new(blob),
            min_flush_interval: defaults.service.min_flush_interval(),
            storage: defaults.storage,
            resolver: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Take the flush interval and storage directories from `config`.
    pub fn config(mut self, config: &LecternConfig) -> Self {
        self.min_flush_interval = config.service.min_flush_interval();
        self.storage = config.storage.clone();
        self
    }

    pub fn min_flush_interval(mut self, interval: Duration) -> Self {
        self.min_flush_interval = interval;
        self
    }

    /// Overrides the directory resolution built from the storage config.
    pub fn resolver(mut self, resolver: impl StorageDirResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Always open the stores in `dir`.
    pub fn storage_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.resolver(FixedDir(dir.into()))
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Wire everything up and spawn the worker on the current runtime.
    ///
    /// The stores stay closed until [`StorageService::start`].
    pub fn build(self) -> Result<StorageService, BuildError> {
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(FallbackDirResolver::from_config(&self.storage)),
        };
        let stats = Arc::new(ServiceStats::new());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&stats)));
        let (state, _) = watch::channel(ServiceState::Unopened);
        let state = Arc::new(state);
        let lifecycle = Arc::new(Lifecycle::new(resolver, Arc::clone(&state)));
        let flush = Arc::new(FlushCoordinator::new(
            self.min_flush_interval,
            Arc::clone(&stats),
            Arc::clone(&self.clock),
        ));

        let stores = StoreSet::new(self.primary, self.blob);
        let worker = Worker::spawn(&runtime, Arc::clone(&queue), stores, Arc::clone(&stats));
        debug!(min_flush_interval_ms = self.min_flush_interval.as_millis() as u64, "service built");

        Ok(StorageService::from_parts(
            queue, flush, lifecycle, stats, self.clock, state, worker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{MemoryCoverStore, MemoryMetadataStore, StoreJournal};

    fn builder() -> ServiceBuilder {
        let journal = StoreJournal::new();
        ServiceBuilder::new(
            MemoryMetadataStore::new(journal.clone()),
            MemoryCoverStore::new(journal),
        )
    }

    #[test]
    fn build_outside_a_runtime_fails() {
        assert!(matches!(builder().build(), Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn config_sets_the_flush_interval() {
        let config = crate::config::load_config_from_str("[service]\nmin_flush_interval_ms = 250\n")
            .unwrap();
        let service = builder().config(&config).storage_dir("/lib").build().unwrap();
        assert_eq!(service.min_flush_interval(), Duration::from_millis(250));
        assert_eq!(service.state(), ServiceState::Unopened);
    }
}
