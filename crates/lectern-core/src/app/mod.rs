//! App - the service assembled from the queue, the worker and the ports.
//!
//! # Components
//! - **ServiceBuilder**: wiring and worker spawn
//! - **StorageService**: submission API, lifecycle and domain operations
//! - **FlushCoordinator**: debounced and forced flushes
//! - **Lifecycle**: open / close / reopen task bodies
//! - **StoreSet**: the two store handles owned by the worker

pub mod builder;
pub mod flush;
pub mod lifecycle;
pub mod service;
pub mod stores;

pub use self::builder::{BuildError, ServiceBuilder};
pub use self::flush::{FlushCoordinator, FlushDecision};
pub use self::lifecycle::Lifecycle;
pub use self::service::StorageService;
pub use self::stores::{StoreHandle, StoreSet};
