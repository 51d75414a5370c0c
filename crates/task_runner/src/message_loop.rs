use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::task_queues::{TaskQueueId, TaskQueues};
use crate::task_runner::TaskRunner;

struct CurrentLoop {
    queue_id: TaskQueueId,
    task_queues: Arc<TaskQueues>,
    wakeup_receiver: Receiver<()>,
}

impl Drop for CurrentLoop {
    fn drop(&mut self) {
        self.task_queues.dispose(self.queue_id);
    }
}

thread_local! {
    static CURRENT_LOOP: RefCell<Option<CurrentLoop>> = const { RefCell::new(None) };
}

/// Entry points for the loop bound to the calling thread.
///
/// Worker threads spawned by [`crate::Thread`] bind their loop automatically. Any
/// other thread (typically the one acting as the platform context) binds one with
/// [`MessageLoop::ensure_initialized_for_current_thread`] and pumps it manually.
pub struct MessageLoop;

impl MessageLoop {
    /// Binds a fresh queue to the calling thread, or returns the already bound one.
    pub fn ensure_initialized_for_current_thread(task_queues: &Arc<TaskQueues>) -> TaskRunner {
        CURRENT_LOOP.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(bound) = current.as_ref() {
                return TaskRunner::new(bound.queue_id, Arc::clone(&bound.task_queues));
            }
            let queue_id = task_queues.create_queue();
            let (wakeup_sender, wakeup_receiver) = bounded(1);
            task_queues.set_wakeup(queue_id, wakeup_sender);
            *current = Some(CurrentLoop {
                queue_id,
                task_queues: Arc::clone(task_queues),
                wakeup_receiver,
            });
            TaskRunner::new(queue_id, Arc::clone(task_queues))
        })
    }

    pub fn is_initialized_for_current_thread() -> bool {
        CURRENT_LOOP.with(|current| current.borrow().is_some())
    }

    pub fn current_task_queue_id() -> Option<TaskQueueId> {
        CURRENT_LOOP.with(|current| current.borrow().as_ref().map(|bound| bound.queue_id))
    }

    /// Runs every task of the calling thread's loop whose target time has passed.
    pub fn run_expired_tasks_now() {
        let Some((queue_id, task_queues)) = Self::bound_queue() else {
            return;
        };
        run_expired_tasks(queue_id, &task_queues, None);
    }

    /// Pumps the calling thread's loop until `done` holds or `timeout` elapses.
    /// Returns whether `done` was reached.
    pub fn run_until(mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let Some((queue_id, task_queues)) = Self::bound_queue() else {
            return done();
        };
        let Some(wakeup_receiver) = CURRENT_LOOP.with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|bound| bound.wakeup_receiver.clone())
        }) else {
            return done();
        };
        let deadline = Instant::now() + timeout;
        loop {
            run_expired_tasks(queue_id, &task_queues, None);
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait_until = task_queues
                .next_wake_time(queue_id)
                .map_or(deadline, |wake| wake.min(deadline))
                .min(now + Duration::from_millis(5));
            match wakeup_receiver.recv_deadline(wait_until) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    fn bound_queue() -> Option<(TaskQueueId, Arc<TaskQueues>)> {
        CURRENT_LOOP.with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|bound| (bound.queue_id, Arc::clone(&bound.task_queues)))
        })
    }
}

fn run_expired_tasks(queue_id: TaskQueueId, task_queues: &TaskQueues, terminated: Option<&AtomicBool>) {
    while let Some(task) = task_queues.next_task_to_run(queue_id, Instant::now()) {
        task();
        if terminated.is_some_and(|flag| flag.load(Ordering::Acquire)) {
            return;
        }
    }
}

pub(crate) fn run_worker_loop(
    queue_id: TaskQueueId,
    task_queues: Arc<TaskQueues>,
    wakeup_receiver: Receiver<()>,
    terminated: Arc<AtomicBool>,
) {
    CURRENT_LOOP.with(|current| {
        *current.borrow_mut() = Some(CurrentLoop {
            queue_id,
            task_queues: Arc::clone(&task_queues),
            wakeup_receiver: wakeup_receiver.clone(),
        });
    });

    while !terminated.load(Ordering::Acquire) {
        run_expired_tasks(queue_id, &task_queues, Some(&terminated));
        if terminated.load(Ordering::Acquire) {
            break;
        }
        match task_queues.next_wake_time(queue_id) {
            Some(deadline) => match wakeup_receiver.recv_deadline(deadline) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => {
                if wakeup_receiver.recv().is_err() {
                    break;
                }
            }
        }
    }

    let bound = CURRENT_LOOP.with(|current| current.borrow_mut().take());
    drop(bound);
}
