use serde::{Deserialize, Serialize};
use std::fmt;

use super::handle::TaskHandle;

/// A unit of work a producer wants delivered later.
///
/// The queue never interprets either field: `task_type` is the event name the
/// payload will be republished under, and `payload` is whatever the message
/// codec produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    task_type: String,
    payload: String,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
        }
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.task_type, self.payload.len())
    }
}

/// A task as seen through a queue: the task itself, the handle that
/// identifies its record, and how many times delivery has been pushed back.
///
/// Only queue implementations construct these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    handle: TaskHandle,
    retry_count: u32,
    task: Task,
}

impl QueuedTask {
    pub(crate) fn new(handle: TaskHandle, retry_count: u32, task: Task) -> Self {
        Self {
            handle,
            retry_count,
            task,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_type(&self) -> &str {
        self.task.task_type()
    }

    pub fn payload(&self) -> &str {
        self.task.payload()
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}
