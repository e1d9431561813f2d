//! lectern-core
//!
//! A single-writer access layer in front of two stores: book metadata and
//! cover images. Callers on any thread submit tasks; one worker runs them in
//! order against consistently opened stores and hands results back to the
//! caller's context.
//!
//! # Modules
//! - **domain**: ids, tasks, lifecycle state, payload records
//! - **ports**: store, callback target, storage directory and clock seams
//! - **queue**: the FIFO task queue with delayed release
//! - **worker**: the single worker with per-task fault isolation
//! - **app**: flush coordination, lifecycle, the service facade and builder
//! - **impls**: memory and file stores, callback targets, directory resolver
//! - **config** / **observability** / **error**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod worker;

pub use app::{BuildError, ServiceBuilder, StorageService, StoreSet};
pub use config::LecternConfig;
pub use domain::{BookRecord, Bookmark, CatalogEntry, ServiceState, StoreKind, TaskId};
pub use error::{ServiceError, StoreError};
pub use observability::{StatsSnapshot, init_tracing};
