//! CallbackTarget port - "run this later, on the context that asked".
//!
//! A task that produces a result for its caller wraps the delivery in a
//! [`Callback`] and posts it to the caller's target. The worker never waits for
//! the callback to run.

use thiserror::Error;

/// A result thunk. Owns the value it delivers.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiving context is gone; the callback was dropped.
    #[error("callback target is closed")]
    TargetClosed,
}

/// Execution context that callbacks can be posted to.
///
/// Implementations must run callbacks posted to the same target in the order
/// they were posted.
pub trait CallbackTarget: Send + Sync {
    fn post(&self, callback: Callback) -> Result<(), DeliveryError>;
}
