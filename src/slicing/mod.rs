//! Slicing: the job record and the priority dispatch queue.

pub mod job;
pub mod queue;

pub use job::{SliceRequest, SlicingJob, SlicingStatus};
pub use queue::{QueueConfig, QueueError, QueueStats, SlicingQueue};
