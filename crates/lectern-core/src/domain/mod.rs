//! Domain model (ids, tasks, lifecycle state, payload records).

pub mod ids;
pub mod records;
pub mod state;
pub mod task;

pub use ids::{FlushTicket, Id, IdMarker, TaskId};
pub use records::{BookRecord, Bookmark, CatalogEntry};
pub use state::{ServiceState, StoreKind};
pub use task::{Task, TaskBody, TaskName};
