use coroutine::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    #[error("unknown diagram '{0}'")]
    UnknownDiagram(String),
    #[error("invalid texture: {0}")]
    Texture(String),
    #[error("invalid diagram geometry: {0}")]
    Geometry(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("diagram did not {goal} within {frames} frames")]
    Stalled { goal: &'static str, frames: usize },
}
