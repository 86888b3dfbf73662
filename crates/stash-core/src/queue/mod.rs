//! Queue backends: the durable file log and the in-memory store.

mod file;
mod format;
mod log;
mod memory;

pub use file::{FileQueueOptions, FileTaskQueue};
pub use memory::InMemoryTaskQueue;
