use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::app::StoreSet;
use crate::domain::Task;
use crate::error::ServiceError;
use crate::observability::ServiceStats;
use crate::queue::TaskQueue;

/// How a single task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    Panicked,
}

/// Handle to the single worker.
///
/// The worker owns the [`StoreSet`]; nothing else can reach the stores while it
/// runs. It exits once the queue is closed and drained, handing the stores back
/// through [`join`](Self::join).
pub struct Worker {
    join: JoinHandle<StoreSet>,
}

impl Worker {
    /// Spawn the worker on `runtime`.
    pub fn spawn(
        runtime: &Handle,
        queue: Arc<TaskQueue>,
        stores: StoreSet,
        stats: Arc<ServiceStats>,
    ) -> Self {
        let join = runtime.spawn(worker_loop(queue, stores, stats));
        Self { join }
    }

    /// Wait for the worker to finish. Close the queue first or this never returns.
    pub async fn join(self) -> Result<StoreSet, ServiceError> {
        self.join
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))
    }
}

async fn worker_loop(
    queue: Arc<TaskQueue>,
    mut stores: StoreSet,
    stats: Arc<ServiceStats>,
) -> StoreSet {
    info!("worker started");
    while let Some(task) = queue.next().await {
        run_task(task, &mut stores, &stats).await;
    }
    info!("worker stopped");
    stores
}

/// Run one task to completion. Never propagates the task's failure.
pub(crate) async fn run_task(task: Task, stores: &mut StoreSet, stats: &ServiceStats) -> TaskOutcome {
    let waited = task.enqueued_at().elapsed();
    let (id, name, body) = task.into_parts();
    let span = info_span!("task", task_id = %id, task = %name);

    let outcome = async move {
        debug!(waited_ms = waited.as_millis() as u64, "running");
        // The body is invoked inside the guarded future so a panic while
        // building the future is caught too.
        let guarded = AssertUnwindSafe(async move { body(stores).await }).catch_unwind();
        match guarded.await {
            Ok(Ok(())) => {
                debug!("done");
                TaskOutcome::Completed
            }
            Ok(Err(err)) => {
                warn!(error = %err, "task failed");
                TaskOutcome::Failed
            }
            Err(payload) => {
                error!(panic = %panic_message(payload.as_ref()), "task panicked");
                TaskOutcome::Panicked
            }
        }
    }
    .instrument(span)
    .await;

    stats.record_executed();
    match outcome {
        TaskOutcome::Completed => {}
        TaskOutcome::Failed => stats.record_failed(),
        TaskOutcome::Panicked => stats.record_panicked(),
    }
    outcome
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
