//! Open, close and reopen bodies.
//!
//! These run as ordinary tasks, so their position in the queue brackets every
//! other task: work submitted after `start` sees open stores, work submitted
//! after `stop` sees closed ones.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::stores::StoreSet;
use crate::domain::ServiceState;
use crate::error::{ServiceError, StoreError};
use crate::ports::StorageDirResolver;

pub struct Lifecycle {
    resolver: Arc<dyn StorageDirResolver>,
    state: Arc<watch::Sender<ServiceState>>,
}

impl Lifecycle {
    pub fn new(resolver: Arc<dyn StorageDirResolver>, state: Arc<watch::Sender<ServiceState>>) -> Self {
        Self { resolver, state }
    }

    fn set_state(&self, next: ServiceState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "service state");
        }
    }

    /// Open both stores in the resolved directory.
    ///
    /// Both stores are opened even if the first fails. Unless both succeed,
    /// both are closed again and the state returns to `Unopened`.
    pub async fn open(&self, stores: &mut StoreSet) -> Result<(), ServiceError> {
        if stores.is_open() {
            debug!("stores already open");
            return Ok(());
        }
        self.set_state(ServiceState::Opening);

        let dir = match self.resolver.resolve() {
            Ok(dir) => dir,
            Err(err) => {
                error!(error = %err, "cannot resolve storage directory");
                self.set_state(ServiceState::Unopened);
                return Err(ServiceError::StorageDir(err));
            }
        };

        let primary = stores.primary.open(&dir).await;
        let blob = stores.blob.open(&dir).await;
        if primary.is_ok() && blob.is_ok() {
            info!(dir = %dir.display(), "stores opened");
            self.set_state(ServiceState::Open);
            return Ok(());
        }

        stores.primary.close().await;
        stores.blob.close().await;
        self.set_state(ServiceState::Unopened);
        let err = ServiceError::OpenFailed {
            primary: describe(&primary),
            blob: describe(&blob),
        };
        error!(dir = %dir.display(), error = %err, "stores left closed");
        Err(err)
    }

    /// Clear caches on both stores, then close both. Never flushes.
    pub async fn close(&self, stores: &mut StoreSet) {
        self.set_state(ServiceState::Closing);
        stores.primary.clear_caches().await;
        stores.blob.clear_caches().await;
        stores.primary.close().await;
        stores.blob.close().await;
        self.set_state(ServiceState::Unopened);
        info!("stores closed");
    }

    /// Close then open, within the caller's task.
    pub async fn reopen(&self, stores: &mut StoreSet) -> Result<(), ServiceError> {
        let before: Option<PathBuf> = stores.primary_handle().directory().map(Into::into);
        self.close(stores).await;
        self.open(stores).await?;
        if let Some(before) = before {
            let after = stores.primary_handle().directory();
            if after != Some(before.as_path()) {
                info!(from = %before.display(), to = ?after, "storage directory moved");
            }
        }
        Ok(())
    }
}

fn describe(result: &Result<(), StoreError>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(err) => err.to_string(),
    }
}
