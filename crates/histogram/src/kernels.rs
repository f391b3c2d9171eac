//! Invocation programs and the tasks that hand work to them.
//!
//! None of this is how a GPU actually schedules work. Workgroups are pulled off a global
//! queue by per-workgroup launchers, which push one work item per invocation onto the
//! workgroup's local queue and wait for all of them to drain.

use anyhow::{anyhow, Context as _};
use coroutine::flow::{defer, frames, once, repeat, wait_until, Sequence};
use coroutine::{Context, Task};
use diagramconfig::Kernel;

use crate::choreo::Actor;
use crate::state::{Action, InvocationIds, Location, SharedState, Wait};
use crate::texture::{Texel, NUM_BINS};

/// One grid of workgroups, dispatched after the previous one has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub width: usize,
    pub height: usize,
    /// Value of the `stride` uniform while this grid runs.
    pub stride: usize,
}

/// The dispatches `kernel` needs for a texture of `width`×`height` texels.
pub(crate) fn dispatches(
    kernel: Kernel,
    width: usize,
    height: usize,
    wave_size: usize,
    num_chunks: usize,
) -> Vec<Dispatch> {
    let grid = |width, height| Dispatch {
        width,
        height,
        stride: 0,
    };
    match kernel {
        Kernel::Single => vec![grid(1, 1)],
        Kernel::Race | Kernel::NoRace => vec![grid(width, height)],
        Kernel::LockedBin => vec![grid(2, 1)],
        Kernel::Chunks => vec![grid(width / wave_size, height)],
        Kernel::Sum => vec![Dispatch {
            width: 1,
            height: 1,
            stride: 1,
        }],
        Kernel::Reduce => {
            let mut rounds = Vec::new();
            let mut chunks_left = num_chunks;
            let mut stride = 1;
            while chunks_left > 1 {
                let count = chunks_left / 2;
                chunks_left -= count;
                rounds.push(Dispatch {
                    width: count,
                    height: 1,
                    stride,
                });
                stride *= 2;
            }
            rounds
        }
    }
}

fn texel_at(actor: &Actor, x: usize, y: usize) -> anyhow::Result<Texel> {
    actor
        .state()
        .borrow()
        .texture
        .get(x, y)
        .ok_or_else(|| anyhow!("texel ({x},{y}) is outside the texture"))
}

/// Loads one texel and adds it to the global histogram, optionally holding the bin's lock.
fn do_one(actor: &Actor, x: usize, y: usize, locked: bool) -> anyhow::Result<Sequence> {
    let texel = texel_at(actor, x, y)?;
    let bin = Location::StorageBin {
        chunk: 0,
        bin: texel.bin(),
    };

    let mut program = Sequence::new()
        .then(actor.advance_line())
        .then(actor.texture_load(x, y, texel))
        .then(actor.advance_line());
    if locked {
        let hide = actor.clone();
        program.push(once(move |_| {
            hide.with(|inv| inv.probe.visible = false);
            Ok(())
        }));
        program.push(actor.set_instructions("atomicAdd(&bin[color], 1)"));
        program.push(actor.acquire(bin));
    } else {
        program.push(actor.set_instructions("bin[color] += 1"));
    }

    program.push(actor.fetch(bin, false));
    program.push(actor.increment());
    program.push(actor.store(bin));
    if locked {
        program.push(actor.release(bin));
    }

    let clear = actor.clone();
    program.push(actor.fade_line());
    program.push(once(move |_| {
        clear.with(|inv| {
            inv.color = None;
            inv.value = None;
        });
        Ok(())
    }));
    program.push(actor.advance_line());
    program.push(actor.set_instructions("-"));
    Ok(program)
}

fn single(actor: &Actor) -> anyhow::Result<Sequence> {
    let (width, height) = {
        let state = actor.state().borrow();
        (state.texture.width(), state.texture.height())
    };
    let mut program = Sequence::new();
    for y in 0..height {
        program.push(actor.go_to_line(0));
        for x in 0..width {
            program.push(actor.go_to_line(1));
            program.push(do_one(actor, x, y, false)?);
        }
    }
    Ok(program)
}

/// A still: invocation 0 holds the blue bin's lock and invocation 1 waits on it.
fn locked_bin(actor: &Actor, ids: InvocationIds) -> Sequence {
    let texel = Texel::Blue;
    let bin = Location::StorageBin {
        chunk: 0,
        bin: texel.bin(),
    };
    let paint = actor.clone();
    let program = Sequence::new()
        .then(actor.set_instructions("atomicAdd(&histogram[bin], 1)"))
        .then(once(move |_| {
            paint.with(|inv| inv.color = Some(texel));
            Ok(())
        }));
    match ids.global[0] {
        0 => program.then(actor.hold(bin)),
        1 => {
            let wait = actor.clone();
            program.then(once(move |_| {
                wait.with(|inv| inv.waiting = Some(Wait::Lock { bin }));
                Ok(())
            }))
        }
        _ => program,
    }
}

/// Builds a per-workgroup histogram in workgroup memory, then copies bin `local` of it
/// out to the workgroup's chunk.
fn chunks(actor: &Actor, ids: InvocationIds) -> anyhow::Result<Sequence> {
    let (width, wave_size) = {
        let state = actor.state().borrow();
        let wave_size = state
            .workgroups
            .get(actor.workgroup())
            .map(|group| group.invocations.len())
            .unwrap_or(NUM_BINS);
        (state.texture.width(), wave_size)
    };
    let local = ids.local;
    let x = ids.global[0] * wave_size + local;
    let y = ids.global[1];
    let texel = texel_at(actor, x, y)?;
    let bin = Location::WorkgroupBin { bin: texel.bin() };
    let own_bin = Location::WorkgroupBin { bin: local };
    let chunk = ids.global[0] + ids.global[1] * (width / wave_size);

    let zero = actor.clone();
    let clear = actor.clone();
    let finish = actor.clone();
    Ok(Sequence::new()
        .then(once(move |_| {
            let mut state = zero.state().borrow_mut();
            if let Some(slot) = state
                .workgroups
                .get_mut(zero.workgroup())
                .and_then(|group| group.bins.get_mut(local))
            {
                *slot = 0;
            }
            Ok(())
        }))
        .then(actor.texture_load(x, y, texel))
        .then(actor.set_instructions("atomicAdd(bin[color], 1)"))
        .then(actor.acquire(bin))
        .then(actor.fetch(bin, false))
        .then(frames(1))
        .then(actor.increment())
        .then(actor.store(bin))
        .then(actor.fade_line())
        .then(actor.release(bin))
        .then(once(move |_| {
            clear.with(|inv| inv.color = None);
            Ok(())
        }))
        .then(actor.set_instructions("wGroupBarrier"))
        .then(actor.barrier())
        .then(actor.set_instructions("chunks[bin]="))
        .then(actor.fetch(own_bin, false))
        .then(actor.store(Location::StorageBin { chunk, bin: local }))
        .then(actor.fade_line())
        .then(once(move |_| {
            finish.with(|inv| {
                inv.color = None;
                inv.value = None;
            });
            Ok(())
        }))
        .then(actor.set_instructions("-")))
}

/// Sums `count` chunks spaced `stride` apart into the first of them, for bin `local`.
fn reduce(actor: &Actor, ids: InvocationIds, count: usize) -> anyhow::Result<Sequence> {
    let (stride, num_chunks) = {
        let state = actor.state().borrow();
        (state.uniform_stride, state.chunks.len())
    };
    let local = ids.local;
    let base = ids.global[0] * stride * 2;
    let last = base + count.saturating_sub(1) * stride;
    if count == 0 || last >= num_chunks {
        anyhow::bail!(
            "reduction of {count} chunks from chunk {base} with stride {stride} exceeds {num_chunks} chunks"
        );
    }

    let zero = actor.clone();
    let mut program = Sequence::new().then(once(move |_| {
        zero.with(|inv| inv.value = Some(0));
        Ok(())
    }));
    for ndx in 0..count {
        let chunk = base + ndx * stride;
        program.push(actor.set_instructions(format!("sum += chunks[{chunk}][{local}]")));
        program.push(actor.fetch(Location::StorageBin { chunk, bin: local }, true));
        program.push(actor.flash());
    }

    let cover = actor.clone();
    program.push(actor.set_instructions(format!("chunks[{base}][{local}] = sum")));
    program.push(actor.store(Location::StorageBin {
        chunk: base,
        bin: local,
    }));
    program.push(once(move |cx| {
        for ndx in 1..count {
            let chunk = base + ndx * stride;
            if let Some(covered) = cover
                .state()
                .borrow_mut()
                .covered
                .get_mut(chunk)
                .and_then(|bins| bins.get_mut(local))
            {
                *covered = true;
            }
            cover.record(cx, Action::Cover { chunk, bin: local });
        }
        Ok(())
    }));
    program.push(actor.fade_line());
    program.push(actor.set_instructions("-"));
    Ok(program)
}

/// The shader body `kernel` runs for one work item.
fn program(actor: &Actor, kernel: Kernel, ids: InvocationIds) -> anyhow::Result<Box<dyn Task>> {
    let (x, y) = (ids.global[0], ids.global[1]);
    Ok(match kernel {
        Kernel::Single => Box::new(single(actor)?),
        Kernel::Race => Box::new(
            Sequence::new()
                .then(actor.go_to_line(0))
                .then(do_one(actor, x, y, false)?)
                .then(actor.hide_cursor()),
        ),
        Kernel::NoRace => Box::new(do_one(actor, x, y, true)?),
        Kernel::LockedBin => Box::new(locked_bin(actor, ids)),
        Kernel::Chunks => Box::new(chunks(actor, ids)?),
        Kernel::Sum => {
            let num_chunks = actor.state().borrow().chunks.len();
            Box::new(reduce(actor, ids, num_chunks)?)
        }
        Kernel::Reduce => Box::new(reduce(actor, ids, 2)?),
    })
}

/// Runs work items from the workgroup's queue forever.
pub(crate) fn invocation_worker(actor: Actor, kernel: Kernel) -> impl Task {
    repeat(move || {
        let poll = actor.clone();
        let take = actor.clone();
        Box::new(
            Sequence::new()
                .then(wait_until(move |_| {
                    let state = poll.state().borrow();
                    !state.workgroups[poll.workgroup()].queue.is_empty()
                }))
                .then(defer(move |cx| start_work(&take, kernel, cx))),
        )
    })
}

fn start_work(actor: &Actor, kernel: Kernel, cx: &mut Context<'_>) -> anyhow::Result<Box<dyn Task>> {
    let ids = {
        let mut state = actor.state().borrow_mut();
        let group = &mut state.workgroups[actor.workgroup()];
        let ids = group
            .queue
            .pop_front()
            .context("invocation woke up without work")?;
        group.active_invocations += 1;
        ids
    };
    actor.with(|inv| {
        inv.ids = Some(ids);
        inv.cursor = 0.0;
        inv.cursor_visible = true;
        inv.header_opacity = 1.0;
    });
    actor.record(cx, Action::Start { ids });

    let done = actor.clone();
    Ok(Box::new(
        Sequence::new()
            .then(actor.fade_header())
            .then(program(actor, kernel, ids)?)
            .then(once(move |_| {
                let mut state = done.state().borrow_mut();
                let group = &mut state.workgroups[done.workgroup()];
                group.active_invocations = group.active_invocations.saturating_sub(1);
                Ok(())
            })),
    ))
}

/// Pulls workgroups off the global queue and fans them out to the invocations.
pub(crate) fn workgroup_launcher(state: SharedState, workgroup: usize) -> impl Task {
    repeat(move || {
        let poll = state.clone();
        let launch = state.clone();
        let drain = state.clone();
        let retire = state.clone();
        Box::new(
            Sequence::new()
                .then(wait_until(move |_| {
                    !poll.borrow().pending_workgroups.is_empty()
                }))
                .then(once(move |cx| {
                    let mut state = launch.borrow_mut();
                    let workgroup_id = state
                        .pending_workgroups
                        .pop_front()
                        .context("launcher woke up without a workgroup")?;
                    state.active_workgroups += 1;
                    let group = &mut state.workgroups[workgroup];
                    let wave_size = group.invocations.len();
                    group.queue.extend((0..wave_size).map(|local| InvocationIds {
                        global: workgroup_id,
                        local,
                    }));
                    state.record(
                        cx.step_count(),
                        Some(workgroup),
                        None,
                        Action::Launch { workgroup_id },
                    );
                    Ok(())
                }))
                .then(frames(1))
                .then(wait_until(move |_| {
                    let state = drain.borrow();
                    let group = &state.workgroups[workgroup];
                    group.active_invocations == 0 && group.queue.is_empty()
                }))
                .then(once(move |_| {
                    let mut state = retire.borrow_mut();
                    state.active_workgroups = state.active_workgroups.saturating_sub(1);
                    Ok(())
                })),
        )
    })
}

fn wait_for_workgroups(state: &SharedState) -> Sequence {
    let poll = state.clone();
    Sequence::new()
        .then(frames(1))
        .then(wait_until(move |_| poll.borrow().is_idle()))
        .then(frames(1))
}

/// Dispatches every grid in turn and finishes once the last one has drained.
pub(crate) fn dispatcher(state: SharedState, rounds: Vec<Dispatch>) -> Sequence {
    let mut program = Sequence::new();
    for round in rounds {
        let dispatch = state.clone();
        program.push(once(move |cx| {
            let mut state = dispatch.borrow_mut();
            state.uniform_stride = round.stride;
            for y in 0..round.height {
                for x in 0..round.width {
                    state.pending_workgroups.push_back([x, y]);
                }
            }
            state.dispatches += 1;
            tracing::debug!(
                width = round.width,
                height = round.height,
                stride = round.stride,
                "dispatching workgroups"
            );
            state.record(
                cx.step_count(),
                None,
                None,
                Action::Dispatch {
                    width: round.width,
                    height: round.height,
                    stride: round.stride,
                },
            );
            Ok(())
        }));
        program.push(wait_for_workgroups(&state));
    }
    let finish = state.clone();
    program.push(once(move |cx| {
        finish
            .borrow_mut()
            .record(cx.step_count(), None, None, Action::Finish);
        Ok(())
    }));
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_halves_until_one_chunk_is_left() {
        let rounds = dispatches(Kernel::Reduce, 6, 7, 3, 14);
        let shape: Vec<(usize, usize)> = rounds
            .iter()
            .map(|round| (round.width, round.stride))
            .collect();
        assert_eq!(shape, vec![(7, 1), (3, 2), (2, 4), (1, 8)]);
        assert!(dispatches(Kernel::Reduce, 6, 7, 3, 1).is_empty());
    }

    #[test]
    fn grids_follow_the_kernel() {
        let grid = |kernel| {
            dispatches(kernel, 6, 7, 3, 14)
                .into_iter()
                .map(|round| (round.width, round.height))
                .collect::<Vec<_>>()
        };
        assert_eq!(grid(Kernel::Single), vec![(1, 1)]);
        assert_eq!(grid(Kernel::Race), vec![(6, 7)]);
        assert_eq!(grid(Kernel::NoRace), vec![(6, 7)]);
        assert_eq!(grid(Kernel::LockedBin), vec![(2, 1)]);
        assert_eq!(grid(Kernel::Chunks), vec![(2, 7)]);
        assert_eq!(grid(Kernel::Sum), vec![(1, 1)]);
        assert_eq!(dispatches(Kernel::Sum, 6, 7, 3, 14)[0].stride, 1);
    }
}
