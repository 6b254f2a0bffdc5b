//! Common queueing abstractions for the flow-management crates.
//!
//! The agent moves work between cooperative tasks through named FIFO
//! queues: producers post without blocking, and each queue is drained by
//! exactly one consumer task, which serializes all processing bound to
//! that queue.

mod queue;

pub use queue::{work_queue, QueueConsumer, QueueError, WorkQueue};
