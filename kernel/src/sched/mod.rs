//! The single-CPU cooperative scheduler.
//!
//! Grounded on `scheduler.cpp`'s `finish_action`/`schedule`/main loop,
//! reworked around a single ready queue of automaton ids (rather than
//! the original's thread pool) since Lily never runs two automata at
//! once (`SPEC_FULL.md` §5). [`dispatch`] does the actual `iretq`;
//! this module owns the bookkeeping around it: the per-automaton
//! pending-caction sets, the ready queue, and the `finish` fan-out
//! state machine from §4.5.

extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use spin::Mutex;

use crate::automaton::{registry, ActionKind, AutomatonId, Caction, ReadyState, COPY_VALUE_LIMIT};
use crate::error::KernelResult;
use crate::mm::buffer::Buffer;

mod dispatch;

/// State threaded through an in-progress output's fan-out: the bound
/// inputs not yet dispatched, and template buffers duplicated fresh into
/// each one as it is delivered.
struct FanOut {
    remaining: VecDeque<Caction>,
    copy_template: Option<Buffer>,
    buffer_template: Option<Buffer>,
}

struct SchedulerInner {
    contexts: BTreeMap<u32, ReadyState>,
    ready_queue: VecDeque<u32>,
    current: Option<Caction>,
    fan_out: Option<FanOut>,
}

impl SchedulerInner {
    const fn new() -> Self {
        Self {
            contexts: BTreeMap::new(),
            ready_queue: VecDeque::new(),
            current: None,
            fan_out: None,
        }
    }
}

static SCHEDULER: Mutex<SchedulerInner> = Mutex::new(SchedulerInner::new());

/// Queue `caction` for its automaton, deduplicating against whatever is
/// already pending. Idle-to-ready transitions enqueue the automaton at
/// the back of the ready queue.
pub fn schedule(caction: Caction) {
    let aid = caction.automaton.0;
    let mut inner = SCHEDULER.lock();
    let became_ready = inner.contexts.entry(aid).or_insert_with(ReadyState::new).push(caction);
    if became_ready {
        inner.ready_queue.push_back(aid);
    }
}

/// Entry point called from [`crate::trap`]'s `int 0x80` handler. The
/// arguments mirror the finish-trap's register-carried payload in
/// `SPEC_FULL.md` §6: an optional self-scheduled continuation, an
/// optional copy-value span, and an optional buffer id.
pub fn finish(
    continuation: Option<(usize, u32)>,
    copy_span: Option<(usize, usize)>,
    buffer_id: Option<u32>,
) -> ! {
    let current = SCHEDULER
        .lock()
        .current
        .take()
        .expect("finish called without a dispatched action");
    let aid = current.automaton;

    if let Some((entry, param)) = continuation {
        let resolved = registry().with(aid, |au| au.action_by_entry(entry).cloned()).flatten();
        match resolved {
            Some(paction) => {
                let adjusted = paction.parameter_mode.adjust(param, aid);
                schedule(Caction::new(aid, paction, adjusted));
            }
            None => {
                let _ = registry().destroy(aid);
                return continue_after_action();
            }
        }
    }

    match current.paction.kind {
        ActionKind::Output => finish_output(current, copy_span, buffer_id),
        ActionKind::Input | ActionKind::Internal | ActionKind::SystemInput => continue_after_action(),
    }
}

fn finish_output(current: Caction, copy_span: Option<(usize, usize)>, buffer_id: Option<u32>) -> ! {
    let aid = current.automaton;

    let copy_template = match copy_span {
        Some((ptr, len)) => {
            if len > COPY_VALUE_LIMIT {
                let _ = registry().destroy(aid);
                return continue_after_action();
            }
            let span_ok = registry().with(aid, |au| au.verify_span(ptr, len)).unwrap_or(false);
            if !span_ok {
                let _ = registry().destroy(aid);
                return continue_after_action();
            }
            match snapshot_span_as_buffer(ptr, len) {
                Ok(b) => Some(b),
                Err(_) => {
                    let _ = registry().destroy(aid);
                    return continue_after_action();
                }
            }
        }
        None => None,
    };

    let buffer_template = match buffer_id {
        Some(id) => {
            let exists = registry().with(aid, |au| au.buffer_exists(id)).unwrap_or(false);
            if !exists {
                let _ = registry().destroy(aid);
                return continue_after_action();
            }
            let size = registry().with(aid, |au| au.buffer_size(id)).and_then(Result::ok).unwrap_or(0);
            let synced = registry()
                .with_mut(aid, |au| au.buffer_mut(id).and_then(|b| b.sync(0, size)))
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !synced {
                let _ = registry().destroy(aid);
                return continue_after_action();
            }
            let duplicated = registry()
                .with_mut(aid, |au| au.buffer_mut(id).and_then(|b| Buffer::duplicate(b)))
                .and_then(Result::ok);
            match duplicated {
                Some(b) => Some(b),
                None => {
                    let _ = registry().destroy(aid);
                    return continue_after_action();
                }
            }
        }
        None => None,
    };

    let inputs: Vec<Caction> = registry().with(aid, |au| au.bound_outputs_for(&current).to_vec()).unwrap_or_default();

    SCHEDULER.lock().fan_out = Some(FanOut {
        remaining: inputs.into(),
        copy_template,
        buffer_template,
    });

    dispatch_next_fanout()
}

/// Build a transient buffer out of the frames backing `[ptr, ptr+len)`
/// in the calling automaton's own address space, for delivery as the
/// "copy value" half of an output's payload.
fn snapshot_span_as_buffer(ptr: usize, len: usize) -> KernelResult<Buffer> {
    use crate::mm::vm;
    use crate::mm::VirtualAddress;

    let mut buffer = Buffer::new(0)?;
    if len == 0 {
        return Ok(buffer);
    }
    let page = vm::PAGE_SIZE;
    let first = ptr & !(page - 1);
    let last = (ptr + len - 1) & !(page - 1);
    let mut va = first;
    while va <= last {
        let entry = vm::entry(VirtualAddress::new(va as u64))?;
        buffer.append_frame(entry.frame())?;
        va += page;
    }
    Ok(buffer)
}

/// Dispatch the next bound input in an in-progress fan-out, duplicating
/// the template buffers fresh into its automaton. When the fan-out is
/// exhausted, falls through to the ready-queue loop.
fn dispatch_next_fanout() -> ! {
    loop {
        let input = {
            let mut inner = SCHEDULER.lock();
            let Some(fo) = inner.fan_out.as_mut() else {
                drop(inner);
                return continue_after_action();
            };
            match fo.remaining.pop_front() {
                Some(input) => input,
                None => {
                    inner.fan_out = None;
                    drop(inner);
                    return continue_after_action();
                }
            }
        };

        let target = input.automaton;
        if !registry().exists(target) {
            continue;
        }

        let (copy_buf, frame_buf) = {
            let inner = SCHEDULER.lock();
            let fo = inner.fan_out.as_ref().expect("fan-out state must still be present");
            let copy = fo.copy_template.as_ref().and_then(|b| Buffer::duplicate(b).ok());
            let frame = fo.buffer_template.as_ref().and_then(|b| Buffer::duplicate(b).ok());
            (copy, frame)
        };

        let copy_id = copy_buf.and_then(|b| registry().with_mut(target, |au| au.adopt_buffer(b)).and_then(Result::ok));
        let frame_id = frame_buf.and_then(|b| registry().with_mut(target, |au| au.adopt_buffer(b)).and_then(Result::ok));

        let delivered = input.with_buffers(copy_id, frame_id);
        SCHEDULER.lock().current = Some(delivered.clone());
        return dispatch::dispatch(delivered);
    }
}

/// Reached when an action finishes with nothing left to deliver: either
/// continue an enclosing fan-out, or fall back to the ready queue.
fn continue_after_action() -> ! {
    let has_fan_out = SCHEDULER.lock().fan_out.is_some();
    if has_fan_out {
        dispatch_next_fanout()
    } else {
        ready_queue_loop()
    }
}

/// Pop the next automaton with pending work, dispatch its next action,
/// and re-queue it if more remains. Idles the CPU when nothing is ready.
fn ready_queue_loop() -> ! {
    loop {
        let next = {
            let mut inner = SCHEDULER.lock();
            loop {
                let Some(aid) = inner.ready_queue.pop_front() else {
                    break None;
                };
                let Some(ctx) = inner.contexts.get_mut(&aid) else {
                    continue;
                };
                let Some(caction) = ctx.pop() else {
                    continue;
                };
                if ctx.has_pending() {
                    inner.ready_queue.push_back(aid);
                } else {
                    ctx.queued = false;
                }
                break Some(caction);
            }
        };

        match next {
            Some(caction) => {
                SCHEDULER.lock().current = Some(caction.clone());
                return dispatch::dispatch(caction);
            }
            None => idle_until_interrupt(),
        }
    }
}

#[cfg(target_os = "none")]
fn idle_until_interrupt() {
    crate::arch::enable_interrupts();
    crate::arch::idle();
}

#[cfg(not(target_os = "none"))]
fn idle_until_interrupt() {}

/// The automaton currently dispatched, if any — the same id `finish`
/// derives `aid` from, exposed for the page-fault path (§4.6), which has
/// no caction of its own to read it off of.
pub fn current_automaton() -> Option<AutomatonId> {
    SCHEDULER.lock().current.as_ref().map(|c| c.automaton)
}

/// Count of cactions currently queued for `id`. Exposed for tests that
/// check fan-out/fan-in scheduling landed the expected work without
/// running the dispatcher end to end.
pub fn pending_count(id: AutomatonId) -> usize {
    SCHEDULER.lock().contexts.get(&id.0).map(|c| c.pending.len()).unwrap_or(0)
}

/// An automaton contract violation encountered outside `finish` (a bad
/// page-fault, e.g.) terminates the offending automaton the same way
/// `finish`'s own failure paths do, then falls back to the ready queue.
/// Never returns.
pub fn terminate_current_and_continue() -> ! {
    let current = SCHEDULER.lock().current.take();
    if let Some(caction) = current {
        let _ = registry().destroy(caction.automaton);
    }
    continue_after_action()
}

/// Bring up the scheduler's bookkeeping. The ready queue itself is
/// populated by `bootstrap` once the initial automata exist.
pub fn init() {
    crate::println!("[SCHED] scheduler ready");
}

/// Enter the scheduler's main loop. Never returns.
pub fn run() -> ! {
    ready_queue_loop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{ActionKind, ParameterMode, Paction};

    #[test]
    fn ready_state_push_reports_idle_to_ready_transition() {
        let mut ctx = ReadyState::new();
        let paction = Paction::new(ActionKind::Internal, ParameterMode::None, 0x1000, 0, "tick", "");
        let c1 = Caction::new(AutomatonId(9), paction.clone(), 0);
        let c2 = Caction::new(AutomatonId(9), paction, 0);
        assert!(ctx.push(c1));
        assert!(!ctx.push(c2));
    }
}
