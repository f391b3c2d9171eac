use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::SchedulerError;
use crate::manager::{Clock, Context};
use crate::stack::TaskStack;
use crate::task::{Resume, Task, TaskId};

/// A set of task stacks advanced together, one scheduling pass per [`Runner::advance`].
///
/// `Runner` is a cheap handle; clones refer to the same runner so that task code can add
/// or remove tasks while a pass is in progress. Such changes are queued and only merged
/// into the running set at the start or end of a pass.
#[derive(Clone)]
pub struct Runner {
    inner: Rc<RunnerInner>,
}

struct RunnerInner {
    clock: Rc<Clock>,
    add_queue: RefCell<Vec<TaskStack>>,
    remove_queue: RefCell<HashSet<TaskId>>,
    active: RefCell<Vec<TaskStack>>,
    // Main ids of every stack that is queued, active, or in the pass snapshot.
    registered: RefCell<HashSet<TaskId>>,
    generation: Cell<u64>,
}

impl Runner {
    pub(crate) fn new(clock: Rc<Clock>) -> Self {
        Self {
            inner: Rc::new(RunnerInner {
                clock,
                add_queue: RefCell::new(Vec::new()),
                remove_queue: RefCell::new(HashSet::new()),
                active: RefCell::new(Vec::new()),
                registered: RefCell::new(HashSet::new()),
                generation: Cell::new(0),
            }),
        }
    }

    /// Queues `task` as a new top-level stack. It first runs on the next pass.
    pub fn add<T: Task + 'static>(&self, task: T) -> TaskId {
        self.add_boxed(Box::new(task))
    }

    pub fn add_boxed(&self, task: Box<dyn Task>) -> TaskId {
        let id = self.inner.clock.allocate_id();
        tracing::trace!(task = %id, name = task.name(), "task queued");
        self.inner.add_queue.borrow_mut().push(TaskStack::new(id, task));
        self.inner.registered.borrow_mut().insert(id);
        id
    }

    /// Marks a top-level task for removal at the next removal point.
    ///
    /// Unknown ids, and ids of tasks that already finished, are ignored.
    pub fn remove(&self, task: TaskId) {
        if self.inner.registered.borrow().contains(&task) {
            self.inner.remove_queue.borrow_mut().insert(task);
        } else {
            tracing::trace!(task = %task, "remove ignored for unregistered task");
        }
    }

    pub fn reset(&self) {
        self.inner.add_queue.borrow_mut().clear();
        self.inner.remove_queue.borrow_mut().clear();
        self.inner.active.borrow_mut().clear();
        self.inner.registered.borrow_mut().clear();
        self.inner.generation.set(self.inner.generation.get() + 1);
    }

    /// True while anything is queued or active; `registered` tracks exactly those stacks.
    pub fn is_busy(&self) -> bool {
        !self.inner.registered.borrow().is_empty()
    }

    /// Number of top-level stacks that are queued or running.
    pub fn len(&self) -> usize {
        self.inner.registered.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_busy()
    }

    /// Runs one pass over every active stack.
    ///
    /// Stacks are resumed in the order they were added. Delegation and completion of a
    /// delegate cost nothing; a stack only stops for this pass when its current task
    /// suspends, its main task finishes, or its main task is marked for removal.
    ///
    /// If a task fails, the error is returned at once. Stacks earlier in the pass keep
    /// their progress, later stacks are not resumed, and pending removals wait for the
    /// next pass.
    pub fn advance(&self) -> Result<(), SchedulerError> {
        self.flush_add_queue();
        self.apply_removals(false);

        let generation = self.inner.generation.get();
        let mut snapshot = std::mem::take(&mut *self.inner.active.borrow_mut());
        let result = self.run_pass(&mut snapshot, generation);

        if self.inner.generation.get() == generation {
            let mut active = self.inner.active.borrow_mut();
            // Only a nested advance from task code can have refilled the list.
            snapshot.append(&mut active);
            *active = snapshot;
        } else {
            tracing::debug!("runner reset during pass; discarding in-flight stacks");
        }

        result?;
        self.apply_removals(true);
        Ok(())
    }

    fn run_pass(
        &self,
        snapshot: &mut [TaskStack],
        generation: u64,
    ) -> Result<(), SchedulerError> {
        for stack in snapshot.iter_mut() {
            if self.is_reset_since(generation) {
                break;
            }
            if self.is_marked(stack.main_id()) {
                continue;
            }
            self.drive(stack, generation)?;
        }
        Ok(())
    }

    fn drive(&self, stack: &mut TaskStack, generation: u64) -> Result<(), SchedulerError> {
        let id = stack.main_id();
        loop {
            let depth = stack.depth();
            let mut cx = Context::new(&self.inner.clock, self, id, depth);
            let task = stack.top_mut();
            let outcome = task.resume(&mut cx).map_err(|source| SchedulerError::TaskFailed {
                task: id,
                name: task.name().to_string(),
                depth,
                source,
            })?;

            match outcome {
                Resume::Suspend => return Ok(()),
                Resume::Delegate(child) => stack.push(child),
                Resume::Done => {
                    if !stack.pop() {
                        tracing::trace!(task = %id, "task finished");
                        self.inner.remove_queue.borrow_mut().insert(id);
                        return Ok(());
                    }
                }
            }

            if self.is_marked(id) || self.is_reset_since(generation) {
                return Ok(());
            }
        }
    }

    fn is_reset_since(&self, generation: u64) -> bool {
        self.inner.generation.get() != generation
    }

    fn is_marked(&self, id: TaskId) -> bool {
        self.inner.remove_queue.borrow().contains(&id)
    }

    fn flush_add_queue(&self) {
        let mut queued = std::mem::take(&mut *self.inner.add_queue.borrow_mut());
        if !queued.is_empty() {
            self.inner.active.borrow_mut().append(&mut queued);
        }
    }

    fn apply_removals(&self, clear: bool) {
        let mut remove_queue = self.inner.remove_queue.borrow_mut();
        if remove_queue.is_empty() {
            return;
        }
        self.inner
            .active
            .borrow_mut()
            .retain(|stack| !remove_queue.contains(&stack.main_id()));
        if clear {
            self.inner
                .add_queue
                .borrow_mut()
                .retain(|stack| !remove_queue.contains(&stack.main_id()));
            let mut registered = self.inner.registered.borrow_mut();
            for id in remove_queue.drain() {
                tracing::trace!(task = %id, "task removed");
                registered.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{frames, from_fn, once, Sequence};
    use crate::manager::Manager;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(log: &Log, entry: &str) -> impl Task {
        let log = Rc::clone(log);
        let entry = entry.to_string();
        once(move |_| {
            log.borrow_mut().push(entry);
            Ok(())
        })
    }

    /// Suspends `n` times, recording every resumption.
    fn ticker(log: &Log, label: &'static str, n: usize) -> impl Task {
        let log = Rc::clone(log);
        let mut count = 0;
        from_fn(move |cx| {
            log.borrow_mut().push(format!("{label}{count}"));
            if count == n {
                return Ok(Resume::Done);
            }
            count += 1;
            cx.add_step();
            Ok(Resume::Suspend)
        })
    }

    #[test]
    fn delegate_that_finishes_immediately_costs_nothing() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();

        let child = record(&events, "child");
        let mut stage = 0;
        let parent_log = Rc::clone(&events);
        let mut child = Some(child);
        runner.add(from_fn(move |cx| {
            stage += 1;
            match stage {
                1 => match child.take() {
                    Some(child) => Ok(Resume::delegate(child)),
                    None => Ok(Resume::Done),
                },
                2 => {
                    parent_log.borrow_mut().push("parent suspend".into());
                    cx.add_step();
                    Ok(Resume::Suspend)
                }
                _ => Ok(Resume::Done),
            }
        }));

        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 1);
        assert_eq!(*events.borrow(), vec!["child", "parent suspend"]);
        assert!(runner.is_busy());

        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 1);
        assert!(!runner.is_busy());
    }

    #[test]
    fn nested_suspends_cost_one_pass_each() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(
            Sequence::new()
                .then(record(&events, "start"))
                .then(Sequence::new().then(ticker(&events, "a", 2)))
                .then(Sequence::new().then(Sequence::new().then(ticker(&events, "b", 1))))
                .then(record(&events, "end")),
        );

        manager.advance().unwrap();
        assert_eq!(*events.borrow(), vec!["start", "a0"]);
        manager.advance().unwrap();
        manager.advance().unwrap();
        assert_eq!(*events.borrow(), vec!["start", "a0", "a1", "a2", "b0"]);
        assert_eq!(manager.step_count(), 3, "three suspends, three passes");
        manager.advance().unwrap();
        assert_eq!(events.borrow().last().map(String::as_str), Some("end"));
        assert!(!runner.is_busy());
    }

    #[test]
    fn removed_before_first_pass_never_runs() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let id = runner.add(ticker(&events, "d", 3));
        runner.remove(id);
        manager.advance().unwrap();
        assert!(events.borrow().is_empty());
        assert!(!runner.is_busy());
    }

    #[test]
    fn self_removal_stops_the_stack_in_the_same_pass() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let seen = Rc::clone(&events);
        let mut stage = 0;
        runner.add(from_fn(move |cx| {
            stage += 1;
            seen.borrow_mut().push(format!("e{stage}"));
            if stage == 1 {
                cx.remove_self();
                // Would resume again immediately if removal were not honoured.
                return Ok(Resume::delegate(frames(0)));
            }
            Ok(Resume::Suspend)
        }));

        manager.advance().unwrap();
        assert_eq!(*events.borrow(), vec!["e1"]);
        assert!(!runner.is_busy());
        manager.advance().unwrap();
        assert_eq!(*events.borrow(), vec!["e1"]);
    }

    #[test]
    fn stack_removed_by_an_earlier_stack_is_skipped() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let victim = Rc::new(Cell::new(None));

        let target = Rc::clone(&victim);
        runner.add(once(move |cx| {
            if let Some(id) = target.get() {
                cx.runner().remove(id);
            }
            Ok(())
        }));
        victim.set(Some(runner.add(ticker(&events, "v", 5))));

        manager.advance().unwrap();
        assert!(events.borrow().is_empty());
        assert!(!runner.is_busy());
    }

    #[test]
    fn tasks_added_during_a_pass_start_next_pass() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let spawned = log();
        let child_log = Rc::clone(&spawned);
        runner.add(once(move |cx| {
            let child_log = Rc::clone(&child_log);
            cx.runner().add(once(move |_| {
                child_log.borrow_mut().push("spawned".into());
                Ok(())
            }));
            Ok(())
        }));
        runner.add(ticker(&events, "t", 1));

        manager.advance().unwrap();
        assert!(spawned.borrow().is_empty());
        assert!(runner.is_busy());
        manager.advance().unwrap();
        assert_eq!(*spawned.borrow(), vec!["spawned"]);
    }

    #[test]
    fn add_then_remove_within_a_pass_never_starts() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let spawned_log = Rc::clone(&events);
        runner.add(once(move |cx| {
            let id = cx.runner().add(ticker(&spawned_log, "late", 2));
            cx.runner().remove(id);
            Ok(())
        }));
        manager.advance().unwrap();
        manager.advance().unwrap();
        assert!(events.borrow().is_empty());
        assert!(!runner.is_busy());
    }

    #[test]
    fn remove_of_unknown_task_is_a_no_op() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let id = runner.add(frames(0));
        manager.advance().unwrap();
        assert!(!runner.is_busy());
        runner.remove(id);
        let fresh = runner.add(frames(2));
        assert_eq!(runner.len(), 1);
        manager.advance().unwrap();
        assert!(runner.is_busy());
        assert_ne!(id, fresh);
    }

    #[test]
    fn reset_inside_a_pass_discards_everything() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let mut resets = 0;
        runner.add(from_fn(move |cx| {
            resets += 1;
            cx.runner().reset();
            // Resumed again at once if the reset did not end this stack's turn.
            if resets == 1 {
                return Ok(Resume::delegate(frames(0)));
            }
            Ok(Resume::Suspend)
        }));
        runner.add(ticker(&events, "late", 10));

        manager.advance().unwrap();
        assert!(events.borrow().is_empty(), "stack discarded by reset was resumed");
        assert_eq!(manager.step_count(), 0);
        assert!(!runner.is_busy());

        manager.advance().unwrap();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn error_reports_the_failing_task() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let mut failing = Some(from_fn(|_| anyhow::bail!("bad texel")));
        let id = runner.add(from_fn(move |_| match failing.take() {
            Some(child) => Ok(Resume::delegate(child)),
            None => Ok(Resume::Done),
        }));

        let err = runner.advance().unwrap_err();
        match err {
            SchedulerError::TaskFailed { task, depth, .. } => {
                assert_eq!(task, id);
                assert_eq!(depth, 2);
            }
        }
        assert!(runner.is_busy(), "failed stack stays registered");
    }

    #[test]
    fn standalone_runner_advance_does_not_step() {
        let events = log();
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(ticker(&events, "s", 1));
        runner.advance().unwrap();
        assert_eq!(*events.borrow(), vec!["s0"]);
        assert_eq!(manager.step_count(), 0);
    }
}
