//! Ports - the seams between the service core and its collaborators.
//!
//! - **Store / MetadataStore / CoverStore**: the two persistent stores
//! - **CallbackTarget**: where results are delivered
//! - **StorageDirResolver**: where the stores live
//! - **Clock**: wall-clock time

pub mod clock;
pub mod dispatch;
pub mod storage_dir;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::{Callback, CallbackTarget, DeliveryError};
pub use self::storage_dir::StorageDirResolver;
pub use self::store::{CoverStore, MetadataStore, Store};
