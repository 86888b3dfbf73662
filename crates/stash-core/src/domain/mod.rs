//! Domain model (tasks, handles, identifiers, errors, reports).

pub mod errors;
pub mod handle;
pub mod ids;
pub mod report;
pub mod task;

pub use self::errors::{CodecError, ErrorKind, PublishError, QueueError, StashError};
pub use self::handle::TaskHandle;
pub use self::ids::{CycleId, QueueId};
pub use self::report::{DrainOutcome, DrainReport, DrainSource};
pub use self::task::{QueuedTask, Task};
