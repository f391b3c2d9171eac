//! Time-based leaf tasks.
//!
//! A [`Playback`] is the frame clock shared by every tween of one diagram: the host calls
//! [`Playback::tick`] with the wall-clock delta before advancing the manager, and each
//! [`Lerp`] accumulates the scaled delta until its normalized progress reaches 1.
//!
//! While the manager is seeking, tweens jump straight to their end state and suspend
//! exactly once before finishing, so each one still shows up as a single pass.

use std::cell::Cell;
use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;
use std::time::Duration;

use crate::manager::Context;
use crate::task::{Resume, Task};

pub const DEFAULT_MAX_DELTA: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Easing {
    #[default]
    Linear,
    /// `1 - cos(t·π/2)`.
    SineOut,
    Smoothstep,
    EaseInOut,
}

impl Easing {
    pub fn sample(self, t: f32) -> f32 {
        let clamped = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => clamped,
            Easing::SineOut => 1.0 - (clamped * FRAC_PI_2).cos(),
            Easing::Smoothstep => clamped * clamped * (3.0 - 2.0 * clamped),
            Easing::EaseInOut => {
                if clamped < 0.5 {
                    2.0 * clamped * clamped
                } else {
                    -1.0 + (4.0 - 2.0 * clamped) * clamped
                }
            }
        }
    }
}

pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

#[derive(Debug)]
pub struct Playback {
    delta: Cell<f32>,
    elapsed: Cell<f32>,
    speed: Cell<f32>,
    playing: Cell<bool>,
    max_delta: f32,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELTA)
    }
}

impl Playback {
    pub fn new(max_delta: Duration) -> Self {
        Self {
            delta: Cell::new(0.0),
            elapsed: Cell::new(0.0),
            speed: Cell::new(1.0),
            playing: Cell::new(true),
            max_delta: max_delta.as_secs_f32(),
        }
    }

    /// Records the time since the previous frame, clamped so a stalled tab or a debugger
    /// pause does not teleport every tween to its end.
    pub fn tick(&self, dt: Duration) {
        let delta = dt.as_secs_f32().min(self.max_delta);
        self.delta.set(delta);
        self.elapsed.set(self.elapsed.get() + delta);
    }

    pub fn delta(&self) -> f32 {
        self.delta.get()
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed.get()
    }

    pub fn speed(&self) -> f32 {
        self.speed.get()
    }

    pub fn set_speed(&self, speed: f32) {
        self.speed.set(speed.max(0.0));
    }

    pub fn is_playing(&self) -> bool {
        self.playing.get()
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.set(playing);
    }

    pub fn toggle(&self) -> bool {
        let playing = !self.playing.get();
        self.playing.set(playing);
        playing
    }

    /// Time the tweens should advance by this frame.
    pub fn scaled_delta(&self) -> f32 {
        if self.playing.get() {
            self.delta.get() * self.speed.get()
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.delta.set(0.0);
        self.elapsed.set(0.0);
    }
}

/// Interpolates from 0 to 1 over `duration` seconds of playback time, calling
/// `apply(t, finished)` on every resumption.
pub struct Lerp<F> {
    playback: Rc<Playback>,
    duration: f32,
    time: f32,
    settled: bool,
    apply: F,
}

pub fn tween<F>(playback: &Rc<Playback>, duration: Duration, apply: F) -> Lerp<F>
where
    F: FnMut(f32, bool),
{
    Lerp {
        playback: Rc::clone(playback),
        duration: duration.as_secs_f32(),
        time: 0.0,
        settled: false,
        apply,
    }
}

/// A tween with no visible effect.
pub fn wait_seconds(playback: &Rc<Playback>, duration: Duration) -> Lerp<fn(f32, bool)> {
    fn idle(_: f32, _: bool) {}
    tween(playback, duration, idle as fn(f32, bool))
}

impl<F> Task for Lerp<F>
where
    F: FnMut(f32, bool),
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Resume> {
        if self.settled {
            return Ok(Resume::Done);
        }
        if self.duration <= 0.0 {
            (self.apply)(1.0, true);
            return Ok(Resume::Done);
        }
        if cx.is_seeking() {
            (self.apply)(1.0, true);
            self.settled = true;
            return Ok(Resume::Suspend);
        }

        self.time += self.playback.scaled_delta();
        let t = (self.time / self.duration).clamp(0.0, 1.0);
        let finished = t >= 1.0;
        (self.apply)(t, finished);
        if finished {
            Ok(Resume::Done)
        } else {
            Ok(Resume::Suspend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{once, Sequence};
    use crate::manager::Manager;
    use std::cell::RefCell;

    #[test]
    fn linear_curve_increases_monotonically() {
        let mut last = 0.0;
        for step in 0..=10 {
            let sample = Easing::Linear.sample(step as f32 / 10.0);
            assert!(sample >= last - f32::EPSILON);
            last = sample;
        }
    }

    #[test]
    fn curves_hit_both_ends() {
        for easing in [
            Easing::Linear,
            Easing::SineOut,
            Easing::Smoothstep,
            Easing::EaseInOut,
        ] {
            assert!(easing.sample(0.0).abs() < 1e-6, "{easing:?} at 0");
            assert!((easing.sample(1.0) - 1.0).abs() < 1e-6, "{easing:?} at 1");
            assert!((easing.sample(4.0) - 1.0).abs() < 1e-6, "{easing:?} clamps");
        }
        assert!((Easing::Smoothstep.sample(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn tick_clamps_large_deltas() {
        let playback = Playback::default();
        playback.tick(Duration::from_secs(3));
        assert!((playback.delta() - 0.1).abs() < 1e-6);
        playback.set_speed(2.0);
        assert!((playback.scaled_delta() - 0.2).abs() < 1e-6);
        playback.set_playing(false);
        assert_eq!(playback.scaled_delta(), 0.0);
    }

    #[test]
    fn lerp_spans_expected_frames() {
        let playback = Rc::new(Playback::default());
        let samples = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let sink = Rc::clone(&samples);
        runner.add(tween(&playback, Duration::from_millis(350), move |t, _| {
            sink.borrow_mut().push(t)
        }));

        let mut frames = 0;
        while runner.is_busy() {
            playback.tick(Duration::from_millis(100));
            manager.advance().unwrap();
            frames += 1;
            assert!(frames < 10);
        }
        assert_eq!(frames, 4);
        let samples = samples.borrow();
        assert!(samples[1] > 0.5 && samples[1] < 0.6);
        assert_eq!(samples.last().copied(), Some(1.0));
    }

    #[test]
    fn paused_playback_holds_tweens() {
        let playback = Rc::new(Playback::default());
        playback.set_playing(false);
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        runner.add(wait_seconds(&playback, Duration::from_millis(50)));
        for _ in 0..20 {
            playback.tick(Duration::from_millis(16));
            manager.advance().unwrap();
        }
        assert!(runner.is_busy());
        playback.toggle();
        for _ in 0..4 {
            playback.tick(Duration::from_millis(16));
            manager.advance().unwrap();
        }
        assert!(!runner.is_busy());
    }

    #[test]
    fn zero_duration_finishes_without_suspending() {
        let playback = Rc::new(Playback::default());
        let applied = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::new();
        let runner = manager.create_runner();
        let sink = Rc::clone(&applied);
        runner.add(tween(&playback, Duration::ZERO, move |t, done| {
            sink.borrow_mut().push((t, done))
        }));
        manager.advance().unwrap();
        assert_eq!(*applied.borrow(), vec![(1.0, true)]);
        assert!(!runner.is_busy());
    }

    #[test]
    fn seeking_settles_with_a_single_suspend() {
        let playback = Rc::new(Playback::default());
        let applied = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::new();
        manager.set_target_step_count(100);
        let runner = manager.create_runner();

        let sink = Rc::clone(&applied);
        let after = Rc::clone(&applied);
        runner.add(
            Sequence::new()
                .then(tween(&playback, Duration::from_secs(30), move |t, done| {
                    sink.borrow_mut().push((t, done))
                }))
                .then(once(move |_| {
                    after.borrow_mut().push((-1.0, true));
                    Ok(())
                })),
        );

        // No wall-clock time passes at all while seeking.
        manager.advance().unwrap();
        assert_eq!(*applied.borrow(), vec![(1.0, true)]);
        assert!(runner.is_busy());
        manager.advance().unwrap();
        assert_eq!(*applied.borrow(), vec![(1.0, true), (-1.0, true)]);
        assert!(!runner.is_busy());
    }
}
