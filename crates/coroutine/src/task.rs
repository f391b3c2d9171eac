use std::fmt;

use crate::manager::Context;

/// Identity of a top-level task, assigned when it is added to a runner.
///
/// Ids are allocated by the owning [`crate::Manager`], so two managers can hand out the
/// same raw value without interfering with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        TaskId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Outcome of a single resumption.
pub enum Resume {
    /// No further progress this pass; resume from the same point next pass.
    Suspend,
    /// Hand control to a child. The caller resumes after the child finishes.
    Delegate(Box<dyn Task>),
    /// The task has completed.
    Done,
}

impl Resume {
    pub fn delegate<T: Task + 'static>(task: T) -> Self {
        Resume::Delegate(Box::new(task))
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resume::Suspend => f.write_str("Suspend"),
            Resume::Delegate(child) => f.debug_tuple("Delegate").field(&child.name()).finish(),
            Resume::Done => f.write_str("Done"),
        }
    }
}

/// A resumable computation driven by a [`crate::Runner`].
///
/// Each call to `resume` must do a finite amount of work and return. A task that never
/// suspends and never finishes stalls the pass it runs in.
pub trait Task {
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl Task for Box<dyn Task> {
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        self.as_mut().resume(cx)
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}
