use task_runner::TaskRunnerError;

#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    #[error("task runner for the {0} context is missing")]
    MissingTaskRunner(&'static str),
    #[error("{0} could not be created")]
    ComponentCreation(&'static str),
    #[error("task was dropped before it ran")]
    TaskDropped,
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(&'static str),
    #[error("failed precondition: {0}")]
    FailedPrecondition(&'static str),
    #[error("unknown service protocol method `{0}`")]
    UnknownServiceProtocolMethod(String),
    #[error("service protocol call failed: {0}")]
    ServiceProtocolFailure(String),
    #[error(transparent)]
    ThreadSpawn(std::io::Error),
}

impl From<TaskRunnerError> for ShellError {
    fn from(error: TaskRunnerError) -> Self {
        match error {
            TaskRunnerError::TaskDropped => ShellError::TaskDropped,
            TaskRunnerError::ThreadSpawn(error) => ShellError::ThreadSpawn(error),
        }
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
