use crate::task::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task {task} ({name}) failed at delegation depth {depth}")]
    TaskFailed {
        task: TaskId,
        name: String,
        depth: usize,
        #[source]
        source: anyhow::Error,
    },
}
