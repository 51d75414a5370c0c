use task_runner::TaskRunner;

use crate::error::{ShellError, ShellResult};

/// The four execution contexts a shell runs on. Any of them may alias the
/// same queue, e.g. platform and UI on the main thread.
#[derive(Clone)]
pub struct TaskRunners {
    pub label: String,
    pub platform: TaskRunner,
    pub ui: TaskRunner,
    pub raster: TaskRunner,
    pub io: TaskRunner,
}

impl TaskRunners {
    pub fn try_new(
        label: impl Into<String>,
        platform: Option<TaskRunner>,
        ui: Option<TaskRunner>,
        raster: Option<TaskRunner>,
        io: Option<TaskRunner>,
    ) -> ShellResult<Self> {
        Ok(Self {
            label: label.into(),
            platform: platform.ok_or(ShellError::MissingTaskRunner("platform"))?,
            ui: ui.ok_or(ShellError::MissingTaskRunner("ui"))?,
            raster: raster.ok_or(ShellError::MissingTaskRunner("raster"))?,
            io: io.ok_or(ShellError::MissingTaskRunner("io"))?,
        })
    }
}

impl std::fmt::Debug for TaskRunners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunners")
            .field("label", &self.label)
            .field("platform", &self.platform.queue_id())
            .field("ui", &self.ui.queue_id())
            .field("raster", &self.raster.queue_id())
            .field("io", &self.io.queue_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use task_runner::{MessageLoop, TaskQueues};

    #[test]
    fn every_context_is_required() {
        let task_queues = Arc::new(TaskQueues::new());
        let runner = MessageLoop::ensure_initialized_for_current_thread(&task_queues);

        let missing_raster = TaskRunners::try_new(
            "test",
            Some(runner.clone()),
            Some(runner.clone()),
            None,
            Some(runner.clone()),
        );
        assert!(matches!(missing_raster, Err(ShellError::MissingTaskRunner("raster"))));

        let all_same = TaskRunners::try_new(
            "test",
            Some(runner.clone()),
            Some(runner.clone()),
            Some(runner.clone()),
            Some(runner),
        )
        .expect("all runners present");
        assert!(all_same.platform == all_same.raster);
    }
}
