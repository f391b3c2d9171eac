use std::cell::Cell;
use std::rc::Rc;

use crate::error::SchedulerError;
use crate::runner::Runner;
use crate::task::TaskId;

/// Step clock and seek target shared between a manager and its runners.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    step_count: Cell<u64>,
    target_step_count: Cell<Option<u64>>,
    progress: Cell<bool>,
    next_task_id: Cell<u64>,
}

impl Clock {
    pub fn step_count(&self) -> u64 {
        self.step_count.get()
    }

    pub fn target_step_count(&self) -> Option<u64> {
        self.target_step_count.get()
    }

    pub fn is_seeking(&self) -> bool {
        self.target_step_count
            .get()
            .is_some_and(|target| target >= self.step_count.get())
    }

    pub fn add_step(&self) {
        self.progress.set(true);
    }

    pub fn allocate_id(&self) -> TaskId {
        let raw = self.next_task_id.get();
        self.next_task_id.set(raw + 1);
        TaskId::new(raw)
    }

    fn reset(&self) {
        self.step_count.set(0);
        self.target_step_count.set(None);
        self.progress.set(false);
    }
}

/// What a task sees while it is being resumed.
pub struct Context<'a> {
    clock: &'a Clock,
    runner: &'a Runner,
    task: TaskId,
    depth: usize,
}

impl<'a> Context<'a> {
    pub(crate) fn new(clock: &'a Clock, runner: &'a Runner, task: TaskId, depth: usize) -> Self {
        Self {
            clock,
            runner,
            task,
            depth,
        }
    }

    /// Reports that this frame made visible progress.
    pub fn add_step(&self) {
        self.clock.add_step();
    }

    pub fn is_seeking(&self) -> bool {
        self.clock.is_seeking()
    }

    pub fn step_count(&self) -> u64 {
        self.clock.step_count()
    }

    pub fn target_step_count(&self) -> Option<u64> {
        self.clock.target_step_count()
    }

    /// Identity of the main task of the stack being resumed.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Delegation depth of the task being resumed; the main task is depth 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn runner(&self) -> &Runner {
        self.runner
    }

    /// Marks the current stack for removal. The current resumption still runs to its end.
    pub fn remove_self(&self) {
        self.runner.remove(self.task);
    }
}

/// Owns the runners of one diagram and the global step clock.
///
/// `advance` is meant to be called once per animation frame. Every runner is advanced
/// in creation order, then the step counter moves forward by one if any task called
/// `add_step` during that frame.
#[derive(Default)]
pub struct Manager {
    clock: Rc<Clock>,
    runners: Vec<Runner>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_count(&self) -> u64 {
        self.clock.step_count()
    }

    pub fn target_step_count(&self) -> Option<u64> {
        self.clock.target_step_count()
    }

    /// Sets the seek target; negative values are clamped to zero.
    pub fn set_target_step_count(&mut self, target: i64) {
        let clamped = u64::try_from(target).unwrap_or(0);
        self.clock.target_step_count.set(Some(clamped));
    }

    pub fn clear_target_step_count(&mut self) {
        self.clock.target_step_count.set(None);
    }

    pub fn is_seeking(&self) -> bool {
        self.clock.is_seeking()
    }

    pub fn add_step(&self) {
        self.clock.add_step();
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        for runner in &self.runners {
            runner.reset();
        }
        tracing::debug!(runners = self.runners.len(), "coroutine manager reset");
    }

    pub fn create_runner(&mut self) -> Runner {
        let runner = Runner::new(Rc::clone(&self.clock));
        self.runners.push(runner.clone());
        tracing::debug!(index = self.runners.len() - 1, "runner created");
        runner
    }

    pub fn runners(&self) -> &[Runner] {
        &self.runners
    }

    pub fn is_busy(&self) -> bool {
        self.runners.iter().any(Runner::is_busy)
    }

    /// Runs one frame.
    ///
    /// A task error stops the frame immediately: runners before the failing one have
    /// been advanced, later runners are untouched, and the step counter does not move.
    pub fn advance(&mut self) -> Result<(), SchedulerError> {
        self.clock.progress.set(false);
        for runner in &self.runners {
            runner.advance()?;
        }
        if self.clock.progress.replace(false) {
            self.clock.step_count.set(self.clock.step_count() + 1);
            tracing::trace!(step = self.clock.step_count(), "step advanced");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{frames, from_fn, once};
    use crate::task::Resume;

    fn stepping(suspends: usize) -> impl crate::Task {
        let mut left = suspends;
        from_fn(move |cx| {
            if left == 0 {
                return Ok(Resume::Done);
            }
            left -= 1;
            cx.add_step();
            Ok(Resume::Suspend)
        })
    }

    #[test]
    fn three_suspends_take_three_frames() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(stepping(3));
        for _ in 0..3 {
            manager.advance().unwrap();
        }
        assert_eq!(manager.step_count(), 3);
        assert!(!runner.is_busy());
    }

    #[test]
    fn step_counts_once_per_frame() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        for _ in 0..4 {
            runner.add(stepping(2));
        }
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 1);
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 2);
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 2, "no task stepped on the final frame");
    }

    #[test]
    fn frames_without_progress_do_not_step() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(frames(5));
        for _ in 0..6 {
            manager.advance().unwrap();
        }
        assert_eq!(manager.step_count(), 0);
    }

    #[test]
    fn add_step_between_frames_is_not_counted() {
        let mut manager = Manager::new();
        manager.create_runner();
        manager.add_step();
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 0);
    }

    #[test]
    fn seeking_follows_target() {
        let mut manager = Manager::new();
        assert!(!manager.is_seeking());
        assert_eq!(manager.target_step_count(), None);

        manager.set_target_step_count(-5);
        assert_eq!(manager.target_step_count(), Some(0));
        assert!(manager.is_seeking(), "target 0 >= step 0");

        let runner = manager.create_runner();
        runner.add(stepping(10));
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 1);
        assert!(!manager.is_seeking());

        manager.set_target_step_count(3);
        assert!(manager.is_seeking());
        manager.clear_target_step_count();
        assert!(!manager.is_seeking());
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut manager = Manager::new();
        let first = manager.create_runner();
        let second = manager.create_runner();
        first.add(stepping(10));
        second.add(stepping(10));
        manager.advance().unwrap();
        manager.advance().unwrap();
        manager.set_target_step_count(40);
        second.add(frames(1));

        manager.reset();

        assert_eq!(manager.step_count(), 0);
        assert_eq!(manager.target_step_count(), None);
        assert!(!manager.is_seeking());
        assert!(!manager.is_busy());
        assert!(manager.runners().iter().all(|runner| !runner.is_busy()));
        manager.advance().unwrap();
        assert_eq!(manager.step_count(), 0);
    }

    #[test]
    fn runners_advance_in_creation_order() {
        use std::cell::RefCell;

        let order = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::new();
        for label in ["a", "b", "c"] {
            let runner = manager.create_runner();
            let order = Rc::clone(&order);
            runner.add(once(move |_| {
                order.borrow_mut().push(label);
                Ok(())
            }));
        }
        manager.advance().unwrap();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failing_task_stops_the_frame() {
        use std::cell::Cell;

        let ran = Rc::new(Cell::new(false));
        let mut manager = Manager::new();
        let first = manager.create_runner();
        let second = manager.create_runner();
        first.add(from_fn(|cx| {
            cx.add_step();
            anyhow::bail!("broken choreography")
        }));
        let flag = Rc::clone(&ran);
        second.add(once(move |_| {
            flag.set(true);
            Ok(())
        }));

        let err = manager.advance().unwrap_err();
        assert!(matches!(err, SchedulerError::TaskFailed { depth: 1, .. }));
        assert!(!ran.get(), "later runners are untouched");
        assert_eq!(manager.step_count(), 0);
    }

    #[test]
    fn task_ids_are_per_manager() {
        let mut left = Manager::new();
        let mut right = Manager::new();
        let a = left.create_runner().add(frames(1));
        let b = right.create_runner().add(frames(1));
        assert_eq!(a, b);
    }
}
