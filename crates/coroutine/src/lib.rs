//! Cooperative, frame-driven coroutine scheduling for step-by-step animations.
//!
//! - `task` defines the resumption contract: a [`Task`] returns [`Resume::Suspend`],
//!   [`Resume::Delegate`] or [`Resume::Done`] each time it is resumed.
//! - `runner` advances a set of task stacks one pass at a time. Delegating to a child
//!   and returning from it are free; only a suspend ends a stack's turn.
//! - `manager` owns runners plus the global step counter and seek target. The host calls
//!   [`Manager::advance`] once per animation frame.
//! - `flow` and `tween` hold the composite and time-based tasks that choreographies are
//!   built from.
//!
//! Everything is single-threaded: handles are `Rc`-based and mutation during a pass is
//! queued until the pass boundary.

mod error;
pub mod flow;
mod manager;
mod runner;
mod stack;
mod task;
pub mod tween;

pub use error::SchedulerError;
pub use manager::{Context, Manager};
pub use runner::Runner;
pub use task::{Resume, Task, TaskId};
