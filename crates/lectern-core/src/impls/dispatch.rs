//! Callback targets and the dispatcher that posts to them.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::ServiceError;
use crate::ports::{Callback, CallbackTarget, DeliveryError};

/// Hands task results to the caller's target.
///
/// Delivery is the last thing a result-producing task does, so a callback
/// always observes the task's effects. A target that has gone away is logged
/// and otherwise ignored; the task itself still succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackDispatcher;

impl CallbackDispatcher {
    /// Post `callback` to `target`. Returns whether it was accepted.
    pub fn deliver(target: &dyn CallbackTarget, callback: Callback) -> bool {
        match target.post(callback) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "callback dropped");
                false
            }
        }
    }

    /// Post a task result, moving it into the callback.
    pub fn deliver_result<T, F>(
        target: &dyn CallbackTarget,
        result: Result<T, ServiceError>,
        callback: F,
    ) -> bool
    where
        T: Send + 'static,
        F: FnOnce(Result<T, ServiceError>) + Send + 'static,
    {
        Self::deliver(target, Box::new(move || callback(result)))
    }
}

/// Runs callbacks right away on whatever context posts them (the worker).
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineTarget;

impl CallbackTarget for InlineTarget {
    fn post(&self, callback: Callback) -> Result<(), DeliveryError> {
        callback();
        Ok(())
    }
}

/// Sending half of a callback channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
    tx: mpsc::UnboundedSender<Callback>,
}

impl CallbackTarget for ChannelTarget {
    fn post(&self, callback: Callback) -> Result<(), DeliveryError> {
        self.tx
            .send(callback)
            .map_err(|_| DeliveryError::TargetClosed)
    }
}

/// The context that runs callbacks posted to a [`ChannelTarget`], in order.
pub struct CallbackReceiver {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl CallbackReceiver {
    /// Run everything already posted without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Wait for one callback and run it. `false` once every target is gone.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Run callbacks until every target has been dropped.
    pub async fn run(mut self) {
        while self.run_next().await {}
    }

    /// Drive this receiver on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// A callback target plus the receiver that executes its callbacks.
pub fn callback_channel() -> (ChannelTarget, CallbackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTarget { tx }, CallbackReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn channel_runs_callbacks_in_post_order() {
        let (target, mut receiver) = callback_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            assert!(CallbackDispatcher::deliver(
                &target,
                Box::new(move || seen.lock().unwrap().push(i))
            ));
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(receiver.run_pending(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropped_receiver_is_not_an_error_for_the_sender() {
        let (target, receiver) = callback_channel();
        drop(receiver);
        assert!(matches!(
            target.post(Box::new(|| {})),
            Err(DeliveryError::TargetClosed)
        ));
        assert!(!CallbackDispatcher::deliver_result(
            &target,
            Ok::<_, ServiceError>(1),
            |_| {}
        ));
    }

    #[tokio::test]
    async fn spawned_receiver_stops_when_targets_are_gone() {
        let (target, receiver) = callback_channel();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = receiver.spawn();
        for _ in 0..3 {
            let count = Arc::clone(&count);
            target
                .post(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        drop(target);
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn inline_target_runs_immediately() {
        let hit = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hit);
        CallbackDispatcher::deliver_result(&InlineTarget, Ok::<_, ServiceError>(7), move |r| {
            h.store(r.unwrap(), Ordering::SeqCst);
        });
        assert_eq!(hit.load(Ordering::SeqCst), 7);
    }
}
