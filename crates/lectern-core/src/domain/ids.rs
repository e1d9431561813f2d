//! Strongly-typed identifiers.
//!
//! `Id<T>` wraps a `u64` sequence number and carries a zero-sized marker so a
//! `TaskId` can never be passed where a `FlushTicket` is expected. Both are
//! allocated from monotonically increasing counters, so comparing two ids of
//! the same kind compares their submission order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Marker trait for id kinds.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "task-").
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    seq: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(seq: u64) -> Self {
        Self {
            seq,
            _marker: PhantomData,
        }
    }

    pub const fn get(self) -> u64 {
        self.seq
    }
}

// Manual impls: derives would require `T: Clone`, `T: Eq`, ... on the marker.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&other.seq)
    }
}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.seq)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.seq)
    }
}

/// Marker for queued tasks.
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for non-forced flush requests.
pub enum Flush {}

impl IdMarker for Flush {
    fn prefix() -> &'static str {
        "flush-"
    }
}

/// Identifier of a queued task; equals its submission order within a queue.
pub type TaskId = Id<Task>;

/// Identifier of a scheduled (non-forced) flush request.
pub type FlushTicket = Id<Flush>;
