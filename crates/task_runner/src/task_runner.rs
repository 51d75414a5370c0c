use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::TaskRunnerError;
use crate::message_loop::MessageLoop;
use crate::task_queues::{TaskQueueId, TaskQueues};

/// Cheap, cloneable handle that posts work to one task queue.
#[derive(Clone)]
pub struct TaskRunner {
    queue_id: TaskQueueId,
    task_queues: Arc<TaskQueues>,
}

impl TaskRunner {
    pub(crate) fn new(queue_id: TaskQueueId, task_queues: Arc<TaskQueues>) -> Self {
        Self {
            queue_id,
            task_queues,
        }
    }

    pub fn queue_id(&self) -> TaskQueueId {
        self.queue_id
    }

    pub fn task_queues(&self) -> &Arc<TaskQueues> {
        &self.task_queues
    }

    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) {
        self.post_task_for_time(task, Instant::now());
    }

    pub fn post_task_for_time(&self, task: impl FnOnce() + Send + 'static, target_time: Instant) {
        self.task_queues
            .register_task(self.queue_id, Box::new(task), target_time);
    }

    pub fn post_delayed_task(&self, task: impl FnOnce() + Send + 'static, delay: Duration) {
        self.post_task_for_time(task, Instant::now() + delay);
    }

    /// True when the calling thread services this queue, directly or through a merge.
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        match MessageLoop::current_task_queue_id() {
            Some(current) => self.task_queues.runs_on_the_same_thread(current, self.queue_id),
            None => false,
        }
    }

    /// Runs `task` inline when already on this queue's thread, posts it otherwise.
    /// Never blocks the caller.
    pub fn run_now_or_post_task(&self, task: impl FnOnce() + Send + 'static) {
        if self.runs_tasks_on_current_thread() {
            task();
        } else {
            self.post_task(task);
        }
    }

    /// Runs `task` on this queue and blocks until it has produced its result.
    pub fn post_sync<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> Result<R, TaskRunnerError> {
        if self.runs_tasks_on_current_thread() {
            return Ok(task());
        }
        let (result_sender, result_receiver) = bounded(1);
        self.post_task(move || {
            if result_sender.send(task()).is_err() {
                tracing::debug!("post_sync caller stopped waiting");
            }
        });
        result_receiver
            .recv()
            .map_err(|_| TaskRunnerError::TaskDropped)
    }
}

impl PartialEq for TaskRunner {
    fn eq(&self, other: &Self) -> bool {
        self.queue_id == other.queue_id
    }
}

impl Eq for TaskRunner {}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("queue_id", &self.queue_id)
            .finish()
    }
}
