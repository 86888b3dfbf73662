//! File-backed task queue.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use super::log::TaskLog;
use crate::domain::{QueueError, QueueId, QueuedTask, Task, TaskHandle};
use crate::ports::{Compaction, TaskQueue};

/// Options for opening a `FileTaskQueue`.
#[derive(Debug, Clone)]
pub struct FileQueueOptions {
    /// Name used in logs; defaults to the file stem.
    pub name: Option<String>,
    /// `fsync` after every mutating operation.
    pub sync_writes: bool,
}

impl Default for FileQueueOptions {
    fn default() -> Self {
        Self {
            name: None,
            sync_writes: true,
        }
    }
}

struct FileState {
    log: TaskLog,
    /// Bumped every time compaction moves records.
    generation: u64,
}

/// Durable task queue stored in a single append-only log file.
///
/// Design:
/// - One owner per file: opening a path that another queue (in this or any
///   other process) holds fails with `QueueError::Unavailable`.
/// - Every operation takes the same lock, so `add` and `compact` can never
///   interleave, and neither can two header rewrites.
/// - File I/O runs on tokio's blocking pool.
/// - Handles are byte offsets tagged with this instance's id and the current
///   compaction generation; anything else is rejected as stale.
/// - `peek` returns strict insertion order; retries do not reorder.
pub struct FileTaskQueue {
    name: String,
    id: QueueId,
    path: PathBuf,
    state: Arc<Mutex<FileState>>,
}

impl FileTaskQueue {
    /// Open (or create) the queue at `path`. This does blocking I/O and scans
    /// the whole log once. The file stays locked until the queue is dropped.
    pub fn open(path: impl AsRef<Path>, options: FileQueueOptions) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let (log, recovery) = TaskLog::open(path, options.sync_writes)?;
        let name = options.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "queue".to_string())
        });

        info!(
            queue = %name,
            path = %path.display(),
            live = log.live_count(),
            bytes = log.len(),
            torn_bytes = recovery.torn_bytes,
            removed_compaction_file = recovery.removed_compaction_file,
            repaired_live_count = recovery.stale_live_count.is_some(),
            "opened file task queue"
        );

        Ok(Self {
            name,
            id: QueueId::generate(),
            path: path.to_path_buf(),
            state: Arc::new(Mutex::new(FileState { log, generation: 0 })),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the log on the blocking pool while holding the lock.
    async fn with_state<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FileState) -> Result<T, QueueError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut guard = state
                .lock()
                .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Unavailable(format!("queue task failed: {e}")))?
    }

    /// Map handles to offsets, rejecting any that are not from this instance
    /// and generation. Must be called with the lock held.
    fn offsets(
        id: QueueId,
        generation: u64,
        handles: &[TaskHandle],
    ) -> Result<Vec<u64>, QueueError> {
        handles
            .iter()
            .map(|h| {
                if h.is_current(id, generation) {
                    Ok(h.position())
                } else {
                    Err(QueueError::StaleHandle(*h))
                }
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueue for FileTaskQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, task: Task) -> Result<TaskHandle, QueueError> {
        let mut handles = self.add_batch(vec![task]).await?;
        handles
            .pop()
            .ok_or_else(|| QueueError::Unavailable("append returned no handle".to_string()))
    }

    async fn add_batch(&self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, QueueError> {
        let id = self.id;
        let count = tasks.len();
        let handles = self
            .with_state(move |state| {
                let offsets = state.log.append(&tasks)?;
                Ok(offsets
                    .into_iter()
                    .map(|offset| TaskHandle::new(id, state.generation, offset))
                    .collect::<Vec<_>>())
            })
            .await?;
        debug!(queue = %self.name, count, "appended tasks");
        Ok(handles)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueuedTask>, QueueError> {
        let id = self.id;
        self.with_state(move |state| {
            let generation = state.generation;
            Ok(state
                .log
                .scan_live(limit)?
                .into_iter()
                .map(|r| QueuedTask::new(TaskHandle::new(id, generation, r.offset), r.retry_count, r.task))
                .collect())
        })
        .await
    }

    async fn remove(&self, handles: &[TaskHandle]) -> Result<u64, QueueError> {
        if handles.is_empty() {
            return Ok(0);
        }
        let id = self.id;
        let handles = handles.to_vec();
        let removed = self
            .with_state(move |state| {
                let offsets = Self::offsets(id, state.generation, &handles)?;
                state.log.tombstone(&offsets)
            })
            .await?;
        debug!(queue = %self.name, removed, "removed tasks");
        Ok(removed)
    }

    async fn retry(&self, handles: &[TaskHandle]) -> Result<u64, QueueError> {
        if handles.is_empty() {
            return Ok(0);
        }
        let id = self.id;
        let handles = handles.to_vec();
        self.with_state(move |state| {
            let offsets = Self::offsets(id, state.generation, &handles)?;
            state.log.bump_retry(&offsets)
        })
        .await
    }

    async fn size(&self) -> Result<u64, QueueError> {
        self.with_state(|state| Ok(state.log.live_count())).await
    }

    async fn compact(&self) -> Result<Compaction, QueueError> {
        let compaction = self
            .with_state(|state| {
                let compaction = state.log.compact()?;
                if compaction.reclaimed_bytes > 0 {
                    state.generation += 1;
                }
                Ok(compaction)
            })
            .await?;
        if compaction.reclaimed_bytes > 0 {
            info!(
                queue = %self.name,
                records = compaction.records_reclaimed,
                reclaimed_bytes = compaction.reclaimed_bytes,
                "compacted queue"
            );
        }
        Ok(compaction)
    }
}
