//! Deferred execution of moderation and reaction work.
//!
//! Request handlers only enqueue; workers run the engines off the request
//! path with at-least-once semantics. Redelivery policy lives here, never in
//! the engines.

pub mod task_queue;

pub use task_queue::{spawn_task_workers, RetryPolicy, Task, TaskHandlers, TaskQueue, TaskReceiver};
