//! Opaque record handles.
//!
//! A handle names one record in one queue instance. For the file-backed store
//! the position is a byte offset, which shifts whenever compaction reclaims
//! the head of the log, so every handle also carries the compaction
//! generation it was issued in. Queues compare both the queue id and the
//! generation before touching a record and reject anything that does not
//! match with `QueueError::StaleHandle`.

use std::fmt;

use super::ids::QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    queue: QueueId,
    generation: u64,
    position: u64,
}

impl TaskHandle {
    pub(crate) fn new(queue: QueueId, generation: u64, position: u64) -> Self {
        Self {
            queue,
            generation,
            position,
        }
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Position of the record inside its queue (byte offset or sequence
    /// number, depending on the backend). Only meaningful together with
    /// `generation`.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Does this handle belong to `queue` at `generation`?
    pub(crate) fn is_current(&self, queue: QueueId, generation: u64) -> bool {
        self.queue == queue && self.generation == generation
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.queue, self.generation, self.position)
    }
}
