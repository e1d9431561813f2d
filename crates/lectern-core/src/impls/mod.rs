//! Implementations of the ports.
//!
//! - **MemoryMetadataStore / MemoryCoverStore**: journaling in-memory stores
//!   with fault injection, for tests and demos
//! - **FileMetadataStore / FileCoverStore**: JSON snapshot stores
//! - **CallbackDispatcher** and the callback targets
//! - **FallbackDirResolver**: storage directory with a private fallback

pub mod dispatch;
pub mod file_store;
pub mod library;
pub mod memory_store;
pub mod storage_dir;

pub use self::dispatch::{
    CallbackDispatcher, CallbackReceiver, ChannelTarget, InlineTarget, callback_channel,
};
pub use self::file_store::{FileCoverStore, FileMetadataStore};
pub use self::library::{CoverIndex, LibraryIndex};
pub use self::memory_store::{
    FaultPlan, JournalEntry, MemoryCoverStore, MemoryMetadataStore, StoreJournal,
};
pub use self::storage_dir::{FallbackDirResolver, FixedDir};
