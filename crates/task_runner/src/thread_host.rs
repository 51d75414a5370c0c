use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError, bounded};

use crate::TaskRunnerError;
use crate::message_loop::run_worker_loop;
use crate::task_queues::TaskQueues;
use crate::task_runner::TaskRunner;

bitflags::bitflags! {
    /// Which execution contexts a [`ThreadHost`] spawns dedicated threads for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadHostType: u8 {
        const PLATFORM = 1 << 0;
        const UI = 1 << 1;
        const RASTER = 1 << 2;
        const IO = 1 << 3;
    }
}

/// Named worker thread running a message loop until dropped.
pub struct Thread {
    name: String,
    task_runner: TaskRunner,
    terminated: Arc<AtomicBool>,
    wakeup: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl Thread {
    pub fn spawn(task_queues: &Arc<TaskQueues>, name: impl Into<String>) -> Result<Self, TaskRunnerError> {
        let name = name.into();
        let queue_id = task_queues.create_queue();
        let (wakeup, wakeup_receiver) = bounded(1);
        task_queues.set_wakeup(queue_id, wakeup.clone());
        let terminated = Arc::new(AtomicBool::new(false));

        let worker_queues = Arc::clone(task_queues);
        let worker_terminated = Arc::clone(&terminated);
        let spawn_result = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker_loop(queue_id, worker_queues, wakeup_receiver, worker_terminated));
        let join_handle = match spawn_result {
            Ok(join_handle) => join_handle,
            Err(error) => {
                task_queues.dispose(queue_id);
                return Err(error.into());
            }
        };

        tracing::debug!(thread = %name, %queue_id, "spawned worker thread");
        Ok(Self {
            name,
            task_runner: TaskRunner::new(queue_id, Arc::clone(task_queues)),
            terminated,
            wakeup,
            join_handle: Some(join_handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_runner(&self) -> TaskRunner {
        self.task_runner.clone()
    }

    /// Stops the loop after the task in flight and joins the thread.
    pub fn join(&mut self) {
        self.terminated.store(true, Ordering::Release);
        match self.wakeup.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {}
        }
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };
        if join_handle.thread().id() == std::thread::current().id() {
            tracing::warn!(thread = %self.name, "worker thread cannot join itself");
            return;
        }
        if join_handle.join().is_err() {
            tracing::error!(thread = %self.name, "worker thread panicked");
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.join();
    }
}

/// Owns the dedicated threads of one shell (or of a set of shells sharing them).
pub struct ThreadHost {
    pub platform_thread: Option<Thread>,
    pub ui_thread: Option<Thread>,
    pub raster_thread: Option<Thread>,
    pub io_thread: Option<Thread>,
}

impl ThreadHost {
    pub fn new(
        task_queues: &Arc<TaskQueues>,
        name_prefix: &str,
        thread_types: ThreadHostType,
    ) -> Result<Self, TaskRunnerError> {
        let spawn_if = |thread_type: ThreadHostType, suffix: &str| -> Result<Option<Thread>, TaskRunnerError> {
            if thread_types.contains(thread_type) {
                Thread::spawn(task_queues, format!("{name_prefix}.{suffix}")).map(Some)
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            platform_thread: spawn_if(ThreadHostType::PLATFORM, "platform")?,
            ui_thread: spawn_if(ThreadHostType::UI, "ui")?,
            raster_thread: spawn_if(ThreadHostType::RASTER, "raster")?,
            io_thread: spawn_if(ThreadHostType::IO, "io")?,
        })
    }
}
