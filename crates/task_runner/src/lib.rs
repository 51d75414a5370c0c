//! Task queues, message loops and thread plumbing for the frame pipeline.
//!
//! Every execution context (platform, UI, raster, IO) is a task queue serviced
//! by one thread. [`TaskRunner`] handles post work to a queue; [`TaskQueues`]
//! tracks which queues are merged so that one thread can temporarily service
//! two of them, which is what [`RasterThreadMerger`] builds on.

mod message_loop;
mod raster_thread_merger;
mod sync_switch;
mod task_queues;
mod task_runner;
mod thread_host;


pub use message_loop::MessageLoop;
pub use raster_thread_merger::{MergeUnmergeCallback, RasterThreadMerger, RasterThreadStatus};
pub use sync_switch::SyncSwitch;
pub use task_queues::{Task, TaskQueueId, TaskQueues};
pub use task_runner::TaskRunner;
pub use thread_host::{Thread, ThreadHost, ThreadHostType};

#[derive(thiserror::Error, Debug)]
pub enum TaskRunnerError {
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
    #[error("task was dropped before it ran")]
    TaskDropped,
}
