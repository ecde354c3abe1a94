//! The event pump: sole consumer of target runtime callbacks.
//!
//! Events arrive serialized on one channel and are handled strictly in
//! delivery order. For callbacks that block on a continue decision the
//! pump computes the decision and answers before moving on; handlers
//! never retain control of the runtime thread beyond their callback.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver};
use tracing::{debug, info, trace};

use netdbg_symbols::SymbolMapper;

use crate::hits::HitQueue;
use crate::inspect::frame_location;
use crate::manager::{BreakpointManager, HitDisposition};
use crate::shared::SessionShared;
use crate::steps::StepTracker;
use crate::target::{ResumeDecision, TargetEvent, TargetEventKind, TargetRuntime};
use crate::types::{PauseReason, SourceLocation};

pub(crate) struct PumpContext {
    pub shared: Arc<SessionShared>,
    pub manager: Arc<BreakpointManager>,
    pub hits: Arc<HitQueue>,
    pub steps: Arc<StepTracker>,
    pub mapper: SymbolMapper,
    pub target: Arc<Mutex<Option<Box<dyn TargetRuntime>>>>,
}

/// Spawn the pump thread for one session. The thread exits when the
/// adapter drops its event sender or the session signals shutdown.
pub(crate) fn spawn_pump(
    ctx: PumpContext,
    events: Receiver<TargetEvent>,
    shutdown: Receiver<()>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("netdbg-event-pump".into())
        .spawn(move || run(&ctx, &events, &shutdown))
        .expect("failed to spawn event pump")
}

fn run(ctx: &PumpContext, events: &Receiver<TargetEvent>, shutdown: &Receiver<()>) {
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else {
                    trace!("event channel closed; pump exiting");
                    return;
                };
                let decision = handle(ctx, event.kind);
                if let Some(reply) = event.decision {
                    let _ = reply.send(decision);
                }
            }
            recv(shutdown) -> _ => {
                trace!("shutdown signal; pump exiting");
                return;
            }
        }
    }
}

fn handle(ctx: &PumpContext, kind: TargetEventKind) -> ResumeDecision {
    match kind {
        TargetEventKind::BreakpointHit {
            thread_id,
            handle,
            method,
            il_offset,
            module_path,
        } => {
            let disposition = ctx.manager.on_breakpoint_hit(
                thread_id,
                handle,
                method,
                il_offset,
                module_path.as_deref(),
            );
            match disposition {
                HitDisposition::Break(hit) => {
                    ctx.shared.set_paused(
                        PauseReason::Breakpoint,
                        thread_id,
                        Some(hit.location.clone()),
                        Some(hit.breakpoint_id.clone()),
                    );
                    ctx.hits.enqueue(hit);
                    ResumeDecision::RemainPaused
                }
                HitDisposition::Continue => ResumeDecision::Resume,
            }
        }
        TargetEventKind::StepComplete { thread_id, frame } => {
            if !ctx.steps.in_flight(thread_id) {
                // Stale completion after a timed-out wait; nobody is
                // listening, so resume.
                debug!(thread_id, "stale step completion; resuming");
                return ResumeDecision::Resume;
            }
            let location = frame_location(&ctx.mapper, &frame);
            ctx.shared
                .set_paused(PauseReason::Step, thread_id, location, None);
            ctx.steps.complete(thread_id, frame);
            ResumeDecision::RemainPaused
        }
        TargetEventKind::ExceptionThrown {
            thread_id,
            type_name,
            message,
            is_first_chance,
            stack_trace,
        } => {
            let location = top_frame_location(ctx, thread_id);
            let hits = ctx.manager.on_exception(
                thread_id,
                &type_name,
                &message,
                is_first_chance,
                stack_trace.as_deref(),
                location.clone(),
            );
            if hits.is_empty() {
                return ResumeDecision::Resume;
            }
            let first_id = hits[0].breakpoint_id.clone();
            ctx.shared
                .set_paused(PauseReason::Exception, thread_id, location, Some(first_id));
            for hit in hits {
                ctx.hits.enqueue(hit);
            }
            ResumeDecision::RemainPaused
        }
        TargetEventKind::ModuleLoaded(module) => {
            debug!(module = %module.name, dynamic = module.is_dynamic, "module loaded");
            let guard = ctx.target.lock().expect("target poisoned");
            if let Some(target) = guard.as_deref() {
                ctx.manager.bind_module_loaded(target, &module);
            }
            ResumeDecision::Resume
        }
        TargetEventKind::ModuleUnloaded { name, path } => {
            debug!(module = %name, "module unloaded");
            let guard = ctx.target.lock().expect("target poisoned");
            ctx.manager
                .unbind_module_unloaded(guard.as_deref(), &name, path.as_deref());
            ResumeDecision::Resume
        }
        TargetEventKind::ProcessCreated { pid } => {
            debug!(pid, "process created");
            ResumeDecision::Resume
        }
        TargetEventKind::AppDomainCreated { name } => {
            trace!(domain = %name, "app domain created");
            ResumeDecision::Resume
        }
        TargetEventKind::EntryPointReached { thread_id } => {
            ctx.shared
                .set_paused(PauseReason::EntryPoint, thread_id, None, None);
            ResumeDecision::RemainPaused
        }
        TargetEventKind::ThreadStarted { thread_id } => {
            trace!(thread_id, "thread started");
            ResumeDecision::Resume
        }
        TargetEventKind::ThreadExited { thread_id } => {
            trace!(thread_id, "thread exited");
            ResumeDecision::Resume
        }
        TargetEventKind::ProcessExited { exit_code } => {
            info!(exit_code, "target process exited");
            ctx.shared.set_exited(exit_code);
            ctx.hits.close();
            ctx.steps.cancel_all();
            // Release the debugging interface; the next attach acquires
            // a fresh one.
            let mut guard = ctx.target.lock().expect("target poisoned");
            guard.take();
            ResumeDecision::Resume
        }
    }
}

/// Best-effort source location of a thread's top managed frame.
fn top_frame_location(ctx: &PumpContext, thread_id: u32) -> Option<SourceLocation> {
    let guard = ctx.target.lock().expect("target poisoned");
    let target = guard.as_deref()?;
    let frames = target.walk_stack(thread_id, 0, 1).ok()?;
    frames
        .first()
        .and_then(|frame| frame_location(&ctx.mapper, frame))
}
