use crate::task::{Task, TaskId};

/// One logical coroutine: the main task plus the chain of children it has delegated to.
///
/// The main task is stored apart from the delegates so the stack can never be empty.
pub(crate) struct TaskStack {
    id: TaskId,
    main: Box<dyn Task>,
    delegates: Vec<Box<dyn Task>>,
}

impl TaskStack {
    pub fn new(id: TaskId, main: Box<dyn Task>) -> Self {
        Self {
            id,
            main,
            delegates: Vec::new(),
        }
    }

    pub fn main_id(&self) -> TaskId {
        self.id
    }

    pub fn depth(&self) -> usize {
        1 + self.delegates.len()
    }

    pub fn top_mut(&mut self) -> &mut dyn Task {
        match self.delegates.last_mut() {
            Some(child) => child.as_mut(),
            None => self.main.as_mut(),
        }
    }

    pub fn push(&mut self, child: Box<dyn Task>) {
        self.delegates.push(child);
    }

    /// Pops the current delegate. Returns `false` when only the main task is left.
    pub fn pop(&mut self) -> bool {
        self.delegates.pop().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::frames;

    #[test]
    fn depth_tracks_delegation() {
        let mut stack = TaskStack::new(TaskId::new(7), Box::new(frames(1)));
        assert_eq!(stack.depth(), 1);
        stack.push(Box::new(frames(2)));
        stack.push(Box::new(frames(3)));
        assert_eq!(stack.depth(), 3);
        assert!(stack.pop());
        assert!(stack.pop());
        assert!(!stack.pop(), "main task is never popped");
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.main_id(), TaskId::new(7));
    }
}
