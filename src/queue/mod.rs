//! Task queue — priority-ordered, concurrency-bounded scheduling with retry.
//!
//! Components:
//! - `status` — task status state machine (`Queued → Running → terminal`)
//! - `queue` — the [`TaskQueue`] scheduler

pub mod queue;
pub mod status;

pub use queue::{QueueStats, QueuedTask, TaskHandler, TaskQueue, handler};
pub use status::TaskStatus;
