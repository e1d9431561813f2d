//! Queue module: pending entries and the FIFO task queue.

mod entry;
mod fifo;

pub use fifo::TaskQueue;
