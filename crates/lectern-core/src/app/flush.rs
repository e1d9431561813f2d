//! Flush coordination.
//!
//! A scheduled flush is a delayed task carrying a [`FlushTicket`]. Scheduling
//! bumps a single "latest ticket" marker; when a flush task finally runs, it
//! syncs only if its ticket is still the latest and enough time has passed
//! since the last non-forced sync. Earlier tickets still run and do nothing.
//!
//! A forced flush carries no ticket and always syncs. It neither moves the
//! marker nor the last-sync time, so the regular schedule is unaffected by it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::stores::StoreSet;
use crate::domain::{FlushTicket, TaskId};
use crate::error::ServiceError;
use crate::observability::ServiceStats;
use crate::ports::Clock;
use crate::queue::TaskQueue;

/// What a flush task does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Sync,
    /// A later flush was scheduled after this one.
    Superseded,
    /// The last sync was too recent.
    Throttled,
}

/// `since_last` is `None` when nothing was ever synced.
pub fn decide(
    force: bool,
    is_latest: bool,
    since_last: Option<Duration>,
    min_interval: Duration,
) -> FlushDecision {
    if force {
        return FlushDecision::Sync;
    }
    if !is_latest {
        return FlushDecision::Superseded;
    }
    match since_last {
        Some(elapsed) if elapsed <= min_interval => FlushDecision::Throttled,
        _ => FlushDecision::Sync,
    }
}

pub struct FlushCoordinator {
    min_interval: Duration,
    /// Most recently issued ticket; 0 before the first.
    latest: AtomicU64,
    stats: Arc<ServiceStats>,
    clock: Arc<dyn Clock>,
}

impl FlushCoordinator {
    pub fn new(min_interval: Duration, stats: Arc<ServiceStats>, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            latest: AtomicU64::new(0),
            stats,
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn is_latest(&self, ticket: FlushTicket) -> bool {
        self.latest.load(Ordering::Acquire) == ticket.get()
    }

    /// Enqueue a flush released after the minimum interval.
    pub fn schedule(self: &Arc<Self>, queue: &TaskQueue) -> Result<FlushTicket, ServiceError> {
        let ticket = FlushTicket::new(self.latest.fetch_add(1, Ordering::AcqRel) + 1);
        let this = Arc::clone(self);
        queue.submit_after("FlushStores", self.min_interval, move |stores| {
            Box::pin(async move { this.run(stores, Some(ticket)).await })
        })?;
        debug!(%ticket, "flush scheduled");
        Ok(ticket)
    }

    /// Enqueue a flush that always syncs, behind everything already queued.
    pub fn force(self: &Arc<Self>, queue: &TaskQueue) -> Result<TaskId, ServiceError> {
        let this = Arc::clone(self);
        queue.submit("ForceFlushStores", move |stores| {
            Box::pin(async move { this.run(stores, None).await })
        })
    }

    /// Body of a flush task. `ticket` is `None` for a forced flush.
    pub(crate) async fn run(
        &self,
        stores: &mut StoreSet,
        ticket: Option<FlushTicket>,
    ) -> Result<(), ServiceError> {
        let force = ticket.is_none();
        let is_latest = ticket.is_none_or(|t| self.is_latest(t));
        let since_last = stores.last_flush.map(|at| at.elapsed());

        match decide(force, is_latest, since_last, self.min_interval) {
            FlushDecision::Sync => {
                let flushed = stores.flush_all().await?;
                if flushed == 0 {
                    debug!("no store open, nothing to flush");
                    self.stats.record_flush_skipped();
                    return Ok(());
                }
                if !force {
                    stores.last_flush = Some(Instant::now());
                }
                self.stats.record_flush(force, self.clock.now());
                info!(forced = force, stores = flushed, "stores flushed");
            }
            FlushDecision::Superseded => {
                debug!(ticket = ?ticket, "flush superseded");
                self.stats.record_flush_skipped();
            }
            FlushDecision::Throttled => {
                debug!(ticket = ?ticket, since_last_ms = ?since_last.map(|d| d.as_millis()), "flush throttled");
                self.stats.record_flush_skipped();
            }
        }
        Ok(())
    }
}
