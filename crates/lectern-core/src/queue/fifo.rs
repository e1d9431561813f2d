//! The task queue.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::entry::PendingTask;
use crate::app::StoreSet;
use crate::domain::{Task, TaskBody, TaskId, TaskName};
use crate::error::ServiceError;
use crate::observability::{QueueCounts, ServiceStats};

struct QueueState {
    pending: BinaryHeap<PendingTask>,

    /// Next task id to assign.
    next_task_id: u64,

    /// No new submissions once set.
    closed: bool,
}

impl QueueState {
    fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }
}

/// FIFO work queue drained by exactly one worker.
///
/// Producers on any thread call [`submit`](Self::submit) or
/// [`submit_after`](Self::submit_after); neither blocks beyond a short
/// uncontended lock. The worker calls [`next`](Self::next), which waits until
/// the earliest entry is released.
///
/// Execution order is effective enqueue time: an immediate submission is
/// enqueued when submitted, a delayed one when its delay elapses. Ties go to
/// the earlier submission.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    stats: Arc<ServiceStats>,
}

impl TaskQueue {
    pub fn new(stats: Arc<ServiceStats>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                next_task_id: 1,
                closed: false,
            }),
            notify: Notify::new(),
            stats,
        }
    }

    // Critical sections never panic, but a poisoned heap is still consistent.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `body` to run after everything submitted before it.
    pub fn submit<F>(&self, name: impl Into<TaskName>, body: F) -> Result<TaskId, ServiceError>
    where
        F: for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<(), ServiceError>>
            + Send
            + 'static,
    {
        self.push(name.into(), Box::new(body), Duration::ZERO)
    }

    /// Enqueue `body` once `delay` has elapsed.
    ///
    /// The task is ordered by its release time, not by when this was called.
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
        self.push(name.into(), Box::new(body), delay)
    }

    fn push(&self, name: TaskName, body: TaskBody, delay: Duration) -> Result<TaskId, ServiceError> {
        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(ServiceError::QueueClosed);
            }
            // Read under the lock so release order agrees with id order.
            let now = Instant::now();
            let release_at = now + delay;
            let id = state.allocate_task_id();
            debug!(task_id = %id, task = %name, delay_ms = delay.as_millis() as u64, "submitted");
            let task = Task::new(id, name, body, now);
            state.pending.push(PendingTask {
                release_at,
                seq: id.get(),
                task,
            });
            id
        };

        // Notify outside the lock
        self.notify.notify_one();
        self.stats.record_submitted();
        Ok(id)
    }

    /// Wait for the next released task.
    ///
    /// Returns `None` once the queue is closed and no released task remains.
    /// Delayed tasks still waiting at that point are discarded.
    pub async fn next(&self) -> Option<Task> {
        loop {
            let wake_at = {
                let mut state = self.lock();
                let now = Instant::now();
                let head_release = state.pending.peek().map(|entry| entry.release_at);
                match head_release {
                    Some(release_at) if release_at <= now => {
                        if let Some(entry) = state.pending.pop() {
                            return Some(entry.task);
                        }
                        None
                    }
                    Some(release_at) if !state.closed => Some(release_at),
                    None if !state.closed => None,
                    _ => {
                        let discarded = state.pending.len();
                        state.pending.clear();
                        if discarded > 0 {
                            info!(discarded, "queue closed, dropping delayed tasks");
                            self.stats.record_discarded(discarded);
                        }
                        return None;
                    }
                }
            };

            // Wait for a submission OR the earliest release time
            if let Some(wake_at) = wake_at {
                tokio::select! {
                    _ = self.notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_at) => {},
                }
            } else {
                self.notify.notified().await;
            }
        }
    }

    /// Stop accepting submissions and let the worker drain what is released.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.lock();
        let now = Instant::now();
        let ready = state
            .pending
            .iter()
            .filter(|entry| entry.release_at <= now)
            .count();
        QueueCounts {
            ready,
            delayed: state.pending.len() - ready,
        }
    }
}
