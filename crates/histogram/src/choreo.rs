//! Animation primitives for a single invocation.
//!
//! Each method builds a task that moves part of the invocation's visual state through
//! the shared [`DiagramState`](crate::DiagramState). Kernel programs are sequences of
//! these.

use std::rc::Rc;

use anyhow::anyhow;
use coroutine::flow::{defer, frames, once, wait_until, Sequence};
use coroutine::tween::{lerp, tween, wait_seconds, Easing, Playback};
use coroutine::{Context, Task};
use diagramconfig::TimingConfig;

use crate::state::{Action, DiagramState, InvocationState, Location, Probe, SharedState, Wait};
use crate::texture::Texel;

#[derive(Clone)]
pub(crate) struct Actor {
    state: SharedState,
    playback: Rc<Playback>,
    timing: Rc<TimingConfig>,
    workgroup: usize,
    invocation: usize,
}

impl Actor {
    pub fn new(
        state: SharedState,
        playback: Rc<Playback>,
        timing: Rc<TimingConfig>,
        workgroup: usize,
        invocation: usize,
    ) -> Self {
        Self {
            state,
            playback,
            timing,
            workgroup,
            invocation,
        }
    }

    pub fn workgroup(&self) -> usize {
        self.workgroup
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut InvocationState) -> R) -> R {
        let mut state = self.state.borrow_mut();
        f(&mut state.workgroups[self.workgroup].invocations[self.invocation])
    }

    pub fn record(&self, cx: &Context<'_>, action: Action) {
        self.state.borrow_mut().record(
            cx.step_count(),
            Some(self.workgroup),
            Some(self.invocation),
            action,
        );
    }

    fn read(&self, bin: Location) -> anyhow::Result<u32> {
        let mut state = self.state.borrow_mut();
        Ok(*bin_mut(&mut state, self.workgroup, bin)?)
    }

    fn write(&self, bin: Location, value: u32) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        *bin_mut(&mut state, self.workgroup, bin)? = value;
        Ok(())
    }

    fn is_locked(&self, bin: Location) -> bool {
        let mut state = self.state.borrow_mut();
        lock_mut(&mut state, self.workgroup, bin)
            .map(|locked| *locked)
            .unwrap_or(false)
    }

    fn set_locked(&self, bin: Location, locked: bool) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        *lock_mut(&mut state, self.workgroup, bin)? = locked;
        Ok(())
    }

    /// Shows `text` as the current instruction. Every instruction change is one step.
    pub fn set_instructions(&self, text: impl Into<String>) -> impl Task {
        let actor = self.clone();
        let text = text.into();
        once(move |cx| {
            cx.add_step();
            actor.with(|inv| inv.instruction = text.clone());
            actor.record(cx, Action::Instruction { text });
            Ok(())
        })
    }

    pub fn go_to_line(&self, line: usize) -> impl Task {
        let actor = self.clone();
        defer(move |_| Ok(Box::new(actor.move_cursor(line as f32)) as Box<dyn Task>))
    }

    pub fn advance_line(&self) -> impl Task {
        let actor = self.clone();
        defer(move |_| {
            let line = actor.with(|inv| inv.cursor.round()) + 1.0;
            Ok(Box::new(actor.move_cursor(line)) as Box<dyn Task>)
        })
    }

    fn move_cursor(&self, line: f32) -> impl Task {
        let start = self.with(|inv| {
            inv.cursor_visible = true;
            inv.cursor
        });
        let actor = self.clone();
        tween(&self.playback, self.timing.line, move |t, _| {
            actor.with(|inv| inv.cursor = lerp(start, line, Easing::SineOut.sample(t)));
        })
    }

    pub fn hide_cursor(&self) -> impl Task {
        let actor = self.clone();
        once(move |_| {
            actor.with(|inv| {
                inv.cursor_visible = false;
                inv.cursor = 0.0;
            });
            Ok(())
        })
    }

    /// Moves the probe from wherever it last stopped to `target`, then settles.
    pub fn goto(&self, target: Location) -> Sequence {
        let start = self.clone();
        let moving = self.clone();
        Sequence::new()
            .then(once(move |_| {
                start.with(|inv| {
                    let probe = &mut inv.probe;
                    probe.visible = true;
                    probe.opacity = 1.0;
                    probe.from = probe.to;
                    probe.to = target;
                    probe.progress = 0.0;
                });
                Ok(())
            }))
            .then(tween(&self.playback, self.timing.move_to, move |t, _| {
                moving.with(|inv| inv.probe.progress = t);
            }))
            .then(wait_seconds(&self.playback, self.timing.settle))
    }

    /// Fades the probe out and parks it back home.
    pub fn fade_line(&self) -> impl Task {
        let actor = self.clone();
        tween(&self.playback, self.timing.fade, move |t, finished| {
            actor.with(|inv| {
                if finished {
                    inv.probe = Probe::default();
                } else {
                    inv.probe.opacity = 1.0 - t;
                }
            });
        })
    }

    pub fn flash(&self) -> impl Task {
        let actor = self.clone();
        tween(&self.playback, self.timing.flash, move |t, finished| {
            actor.with(|inv| inv.flash = (!finished).then_some(t));
        })
    }

    pub fn fade_header(&self) -> impl Task {
        let actor = self.clone();
        tween(&self.playback, self.timing.fade, move |t, _| {
            actor.with(|inv| inv.header_opacity = 1.0 - t);
        })
    }

    pub fn texture_load(&self, x: usize, y: usize, texel: Texel) -> Sequence {
        let pick = self.clone();
        let land = self.clone();
        Sequence::new()
            .then(self.set_instructions("textureLoad(...)"))
            .then(self.goto(Location::Texel { x, y }))
            .then(once(move |cx| {
                pick.with(|inv| inv.probe.texel = Some(texel));
                pick.record(cx, Action::TextureLoad { x, y, texel });
                Ok(())
            }))
            .then(self.goto(Location::Register))
            .then(once(move |_| {
                land.with(|inv| {
                    inv.color = Some(texel);
                    inv.probe.texel = None;
                });
                Ok(())
            }))
    }

    /// Waits for `bin` to be free, then takes its lock.
    pub fn acquire(&self, bin: Location) -> Sequence {
        let stop = self.clone();
        let poll = self.clone();
        let take = self.clone();
        Sequence::new()
            .then(once(move |_| {
                stop.with(|inv| inv.waiting = Some(Wait::Lock { bin }));
                Ok(())
            }))
            .then(wait_until(move |_| !poll.is_locked(bin)))
            .then(once(move |cx| {
                take.set_locked(bin, true)?;
                take.with(|inv| {
                    inv.waiting = None;
                    inv.holding = Some(bin);
                });
                take.record(cx, Action::Lock { bin });
                Ok(())
            }))
    }

    pub fn release(&self, bin: Location) -> impl Task {
        let actor = self.clone();
        once(move |cx| {
            actor.set_locked(bin, false)?;
            actor.with(|inv| inv.holding = None);
            actor.record(cx, Action::Unlock { bin });
            Ok(())
        })
    }

    /// Shows the lock holder without animating the acquisition.
    pub fn hold(&self, bin: Location) -> impl Task {
        let actor = self.clone();
        once(move |cx| {
            actor.set_locked(bin, true)?;
            actor.with(|inv| inv.holding = Some(bin));
            actor.record(cx, Action::Lock { bin });
            Ok(())
        })
    }

    /// Carries the value of `bin` back to the register, replacing the register's value
    /// or adding to it.
    pub fn fetch(&self, bin: Location, accumulate: bool) -> Sequence {
        let pick = self.clone();
        let land = self.clone();
        Sequence::new()
            .then(self.goto(bin))
            .then(once(move |cx| {
                let value = pick.read(bin)?;
                pick.with(|inv| inv.probe.label = Some(value));
                pick.record(cx, Action::Read { bin, value });
                Ok(())
            }))
            .then(self.goto(Location::Register))
            .then(once(move |_| {
                land.with(|inv| {
                    let carried = inv.probe.label.take().unwrap_or(0);
                    inv.value = Some(if accumulate {
                        inv.value.unwrap_or(0) + carried
                    } else {
                        carried
                    });
                });
                Ok(())
            }))
    }

    /// Adds one to the register and plays the flash.
    pub fn increment(&self) -> Sequence {
        let actor = self.clone();
        Sequence::new()
            .then(once(move |_| {
                actor.with(|inv| inv.value = Some(inv.value.unwrap_or(0) + 1));
                Ok(())
            }))
            .then(self.flash())
    }

    /// Carries the register's value to `bin` and writes it there.
    pub fn store(&self, bin: Location) -> Sequence {
        let pick = self.clone();
        let put = self.clone();
        Sequence::new()
            .then(once(move |_| {
                pick.with(|inv| inv.probe.label = inv.value);
                Ok(())
            }))
            .then(self.goto(bin))
            .then(once(move |cx| {
                let value = put
                    .with(|inv| inv.probe.label.take())
                    .ok_or_else(|| anyhow!("nothing to store into {bin}"))?;
                put.write(bin, value)?;
                put.record(cx, Action::Write { bin, value });
                Ok(())
            }))
    }

    /// Waits until every invocation of the workgroup has arrived.
    pub fn barrier(&self) -> Sequence {
        let arrive = self.clone();
        let poll = self.clone();
        let leave = self.clone();
        Sequence::new()
            .then(once(move |cx| {
                arrive.with(|inv| inv.waiting = Some(Wait::Barrier));
                arrive.state.borrow_mut().workgroups[arrive.workgroup].barrier_count += 1;
                arrive.record(cx, Action::Barrier);
                Ok(())
            }))
            .then(wait_until(move |_| {
                let state = poll.state.borrow();
                let group = &state.workgroups[poll.workgroup];
                group.barrier_count == group.invocations.len()
            }))
            // Everyone has to see the full count before anyone leaves.
            .then(frames(1))
            .then(once(move |_| {
                let mut state = leave.state.borrow_mut();
                let group = &mut state.workgroups[leave.workgroup];
                group.barrier_count = group.barrier_count.saturating_sub(1);
                group.invocations[leave.invocation].waiting = None;
                Ok(())
            }))
    }
}

fn bin_mut(state: &mut DiagramState, workgroup: usize, bin: Location) -> anyhow::Result<&mut u32> {
    let slot = match bin {
        Location::StorageBin { chunk, bin: index } => state
            .chunks
            .get_mut(chunk)
            .and_then(|chunk| chunk.get_mut(index)),
        Location::WorkgroupBin { bin: index } => state
            .workgroups
            .get_mut(workgroup)
            .and_then(|group| group.bins.get_mut(index)),
        _ => None,
    };
    slot.ok_or_else(|| anyhow!("{bin} is not a histogram bin"))
}

fn lock_mut(state: &mut DiagramState, workgroup: usize, bin: Location) -> anyhow::Result<&mut bool> {
    let slot = match bin {
        Location::StorageBin { bin: index, .. } => state.storage_locked.get_mut(index),
        Location::WorkgroupBin { bin: index } => state
            .workgroups
            .get_mut(workgroup)
            .and_then(|group| group.locked.get_mut(index)),
        _ => None,
    };
    slot.ok_or_else(|| anyhow!("{bin} cannot be locked"))
}
