//! Building blocks for composing choreographies out of smaller tasks.
//!
//! Everything here is plain delegation: a composite hands control to a child with
//! [`Resume::Delegate`] and is resumed again, in the same pass, once the child finishes.
//! Only leaf tasks that return [`Resume::Suspend`] consume passes.

use std::collections::VecDeque;

use crate::manager::Context;
use crate::task::{Resume, Task};

pub struct FromFn<F> {
    f: F,
}

/// Wraps a closure as a task. The closure is called on every resumption.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> anyhow::Result<Resume>,
{
    FromFn { f }
}

impl<F> Task for FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> anyhow::Result<Resume>,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        (self.f)(cx)
    }
}

pub struct Once<F> {
    f: Option<F>,
}

/// Runs a side effect and finishes without suspending.
pub fn once<F>(f: F) -> Once<F>
where
    F: FnOnce(&mut Context<'_>) -> anyhow::Result<()>,
{
    Once { f: Some(f) }
}

impl<F> Task for Once<F>
where
    F: FnOnce(&mut Context<'_>) -> anyhow::Result<()>,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        if let Some(f) = self.f.take() {
            f(cx)?;
        }
        Ok(Resume::Done)
    }
}

pub struct Defer<F> {
    build: Option<F>,
}

/// Builds the child when first resumed, so it can read state as it is at that moment.
pub fn defer<F>(build: F) -> Defer<F>
where
    F: FnOnce(&mut Context<'_>) -> anyhow::Result<Box<dyn Task>>,
{
    Defer { build: Some(build) }
}

impl<F> Task for Defer<F>
where
    F: FnOnce(&mut Context<'_>) -> anyhow::Result<Box<dyn Task>>,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        match self.build.take() {
            Some(build) => Ok(Resume::Delegate(build(cx)?)),
            None => Ok(Resume::Done),
        }
    }
}

pub struct WaitUntil<P> {
    ready: P,
}

/// Suspends until `ready` returns true. Finishes at once if it already does.
pub fn wait_until<P>(ready: P) -> WaitUntil<P>
where
    P: FnMut(&Context<'_>) -> bool,
{
    WaitUntil { ready }
}

impl<P> Task for WaitUntil<P>
where
    P: FnMut(&Context<'_>) -> bool,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        if (self.ready)(cx) {
            Ok(Resume::Done)
        } else {
            Ok(Resume::Suspend)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Frames {
    remaining: usize,
}

/// Suspends exactly `count` times.
pub fn frames(count: usize) -> Frames {
    Frames { remaining: count }
}

impl Task for Frames {
    fn resume(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        if self.remaining == 0 {
            return Ok(Resume::Done);
        }
        self.remaining -= 1;
        Ok(Resume::Suspend)
    }
}

/// Delegates to each child in turn.
#[derive(Default)]
pub struct Sequence {
    steps: VecDeque<Box<dyn Task>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<T: Task + 'static>(mut self, step: T) -> Self {
        self.steps.push_back(Box::new(step));
        self
    }

    pub fn push<T: Task + 'static>(&mut self, step: T) {
        self.steps.push_back(Box::new(step));
    }

    pub fn push_boxed(&mut self, step: Box<dyn Task>) {
        self.steps.push_back(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<Box<dyn Task>> for Sequence {
    fn from_iter<I: IntoIterator<Item = Box<dyn Task>>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl Task for Sequence {
    fn resume(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        match self.steps.pop_front() {
            Some(step) => Ok(Resume::Delegate(step)),
            None => Ok(Resume::Done),
        }
    }
}

pub struct Repeat<F> {
    make: F,
}

/// Delegates to a freshly built child forever. Each child must suspend at least once,
/// or the pass never ends.
pub fn repeat<F>(make: F) -> Repeat<F>
where
    F: FnMut() -> Box<dyn Task>,
{
    Repeat { make }
}

impl<F> Task for Repeat<F>
where
    F: FnMut() -> Box<dyn Task>,
{
    fn resume(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        Ok(Resume::Delegate((self.make)()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn frames_suspends_exactly_n_times() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(frames(3));
        for _ in 0..3 {
            manager.advance().unwrap();
            assert!(runner.is_busy());
        }
        manager.advance().unwrap();
        assert!(!runner.is_busy());
    }

    #[test]
    fn wait_until_does_not_suspend_when_ready() {
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        runner.add(
            Sequence::new()
                .then(wait_until(|_| true))
                .then(once(move |_| {
                    flag.set(true);
                    Ok(())
                })),
        );
        manager.advance().unwrap();
        assert!(done.get());
        assert!(!runner.is_busy());
    }

    #[test]
    fn wait_until_polls_every_pass() {
        let open = Rc::new(Cell::new(false));
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let gate = Rc::clone(&open);
        runner.add(wait_until(move |_| gate.get()));
        manager.advance().unwrap();
        manager.advance().unwrap();
        assert!(runner.is_busy());
        open.set(true);
        manager.advance().unwrap();
        assert!(!runner.is_busy());
    }

    #[test]
    fn defer_reads_state_at_resume_time() {
        let value = Rc::new(Cell::new(1));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::new();
        let runner = manager.create_runner();

        let source = Rc::clone(&value);
        let sink = Rc::clone(&seen);
        runner.add(Sequence::new().then(frames(1)).then(defer(move |_| {
            let observed = source.get();
            Ok(Box::new(once(move |_| {
                sink.borrow_mut().push(observed);
                Ok(())
            })) as Box<dyn Task>)
        })));

        manager.advance().unwrap();
        value.set(9);
        manager.advance().unwrap();
        assert_eq!(*seen.borrow(), vec![9]);
    }

    #[test]
    fn repeat_keeps_the_stack_alive() {
        let count = Rc::new(Cell::new(0));
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let counter = Rc::clone(&count);
        runner.add(repeat(move || {
            counter.set(counter.get() + 1);
            Box::new(frames(1))
        }));
        for _ in 0..5 {
            manager.advance().unwrap();
        }
        assert_eq!(count.get(), 5);
        assert!(runner.is_busy());
    }

    #[test]
    fn sequence_collects_boxed_steps() {
        let steps: Vec<Box<dyn Task>> = vec![Box::new(frames(1)), Box::new(frames(2))];
        let sequence: Sequence = steps.into_iter().collect();
        assert_eq!(sequence.len(), 2);

        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(sequence);
        for _ in 0..3 {
            manager.advance().unwrap();
        }
        assert!(runner.is_busy());
        manager.advance().unwrap();
        assert!(!runner.is_busy());
    }
}
