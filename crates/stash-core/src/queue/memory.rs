//! In-memory task queue.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{QueueError, QueueId, QueuedTask, Task, TaskHandle};
use crate::ports::TaskQueue;

/// In-memory queue state.
#[derive(Default)]
struct InMemoryState {
    /// Live entries keyed by insertion sequence.
    entries: BTreeMap<u64, Entry>,

    /// Next sequence number to assign.
    next_seq: u64,
}

struct Entry {
    retry_count: u32,
    task: Task,
}

/// Non-durable `TaskQueue` for tests and for deployments that accept losing
/// queued tasks on restart.
///
/// `peek` orders by `(retry_count, insertion)`, so tasks that keep failing
/// sink behind fresh ones. Handles are insertion sequence numbers and never
/// go stale; `compact` has nothing to do.
pub struct InMemoryTaskQueue {
    name: String,
    id: QueueId,
    state: Mutex<InMemoryState>,
}

impl InMemoryTaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: QueueId::generate(),
            state: Mutex::new(InMemoryState::default()),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    fn seq_of(&self, handle: &TaskHandle) -> Result<u64, QueueError> {
        if handle.is_current(self.id, 0) {
            Ok(handle.position())
        } else {
            Err(QueueError::StaleHandle(*handle))
        }
    }

    fn seqs_of(&self, handles: &[TaskHandle]) -> Result<Vec<u64>, QueueError> {
        handles.iter().map(|h| self.seq_of(h)).collect()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, task: Task) -> Result<TaskHandle, QueueError> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            seq,
            Entry {
                retry_count: 0,
                task,
            },
        );
        Ok(TaskHandle::new(self.id, 0, seq))
    }

    async fn add_batch(&self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, QueueError> {
        let mut state = self.state.lock().await;
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(
                seq,
                Entry {
                    retry_count: 0,
                    task,
                },
            );
            handles.push(TaskHandle::new(self.id, 0, seq));
        }
        Ok(handles)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueuedTask>, QueueError> {
        let state = self.state.lock().await;
        let mut live: Vec<_> = state.entries.iter().collect();
        // stable sort keeps insertion order within a retry count
        live.sort_by_key(|(_, entry)| entry.retry_count);
        Ok(live
            .into_iter()
            .take(limit)
            .map(|(seq, entry)| {
                QueuedTask::new(
                    TaskHandle::new(self.id, 0, *seq),
                    entry.retry_count,
                    entry.task.clone(),
                )
            })
            .collect())
    }

    async fn remove(&self, handles: &[TaskHandle]) -> Result<u64, QueueError> {
        let seqs = self.seqs_of(handles)?;
        let mut state = self.state.lock().await;
        Ok(seqs
            .iter()
            .filter(|seq| state.entries.remove(*seq).is_some())
            .count() as u64)
    }

    async fn retry(&self, handles: &[TaskHandle]) -> Result<u64, QueueError> {
        let seqs = self.seqs_of(handles)?;
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for seq in seqs {
            if let Some(entry) = state.entries.get_mut(&seq) {
                entry.retry_count = entry.retry_count.saturating_add(1);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn size(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.entries.len() as u64)
    }
}
