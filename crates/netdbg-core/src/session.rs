//! The session controller: one active debug session and the operations
//! exposed to the tool server.
//!
//! The controller owns the state machine
//! `Disconnected → Attaching → Running ⇄ Paused → Exited` and wires the
//! target connection, event pump, breakpoint manager, hit queue, and
//! inspection engines together. The target connection is acquired fresh
//! per session and dropped on teardown; a stale debugging interface
//! makes subsequent attaches fail, so it never survives a disconnect.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};

use netdbg_symbols::{SymbolCache, SymbolMapper};

use crate::error::DebugError;
use crate::hits::{HitQueue, WaitOutcome};
use crate::inspect::{frame_location, InspectionEngine, ScopeFilter, StackSlice};
use crate::limits::Limits;
use crate::manager::{BreakpointManager, BreakpointRequest, ExceptionBreakpointRequest};
use crate::memory::MemoryEngine;
use crate::modules::{MemberQuery, ModuleInspector, SearchKind, TypeQuery};
use crate::pump::{spawn_pump, PumpContext};
use crate::registry::BreakpointRegistry;
use crate::shared::SessionShared;
use crate::steps::{StepTracker, StepWaitError};
use crate::target::{
    LaunchRequest, StepMode, TargetConnector, TargetRuntime,
};
use crate::types::{
    Breakpoint, BreakpointStateChange, EvaluationResult, ExceptionBreakpoint, LaunchMode,
    MemberList, MemoryRegion, ModuleInfo, ObjectInspection, PauseReason, ReferenceDirection,
    ReferenceList, SearchResults, SessionSnapshot, SessionState, SourceLocation, ThreadInfo,
    TypeLayout, TypeList, Variable,
};

struct PumpHandle {
    join: JoinHandle<()>,
    shutdown: Sender<()>,
}

/// The debugger core. One instance serves the whole process; at most one
/// debug session is active at a time.
pub struct DebugSession {
    connector: Box<dyn TargetConnector>,
    limits: Limits,
    shared: Arc<SessionShared>,
    registry: Arc<BreakpointRegistry>,
    manager: Arc<BreakpointManager>,
    cache: Arc<SymbolCache>,
    mapper: SymbolMapper,
    hits: Arc<HitQueue>,
    steps: Arc<StepTracker>,
    target: Arc<Mutex<Option<Box<dyn TargetRuntime>>>>,
    pump: Mutex<Option<PumpHandle>>,
    last_pid: Mutex<Option<u32>>,
    lifecycle: Mutex<()>,
    inspection: InspectionEngine,
    memory: MemoryEngine,
    modules: ModuleInspector,
}

impl DebugSession {
    /// Create a controller over a connector, with default limits.
    #[must_use]
    pub fn new(connector: Box<dyn TargetConnector>) -> Self {
        Self::with_limits(connector, Limits::default())
    }

    /// Create a controller with explicit limits.
    #[must_use]
    pub fn with_limits(connector: Box<dyn TargetConnector>, limits: Limits) -> Self {
        let cache = Arc::new(SymbolCache::new());
        let mapper = SymbolMapper::new(Arc::clone(&cache));
        let registry = Arc::new(BreakpointRegistry::new());
        let manager = Arc::new(BreakpointManager::new(
            Arc::clone(&registry),
            mapper.clone(),
        ));
        Self {
            connector,
            shared: Arc::new(SessionShared::new()),
            registry,
            manager,
            cache,
            mapper: mapper.clone(),
            hits: Arc::new(HitQueue::new()),
            steps: Arc::new(StepTracker::new()),
            target: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
            last_pid: Mutex::new(None),
            lifecycle: Mutex::new(()),
            inspection: InspectionEngine::new(mapper.clone(), limits.clone()),
            memory: MemoryEngine::new(limits.clone()),
            modules: ModuleInspector::new(mapper, limits.clone()),
            limits,
        }
    }

    /// The current session snapshot (`state` operation).
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// The shared breakpoint registry (diagnostics and tests).
    #[must_use]
    pub fn registry(&self) -> &Arc<BreakpointRegistry> {
        &self.registry
    }

    /// Number of hits queued and not yet consumed.
    #[must_use]
    pub fn pending_hits(&self) -> usize {
        self.hits.pending_len()
    }

    /// Block until the session reaches a state (event-driven transitions
    /// included) or the timeout passes.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.shared.wait_for_state(state, Instant::now() + timeout)
    }

    // ----- lifecycle -------------------------------------------------

    /// Attach to a running managed process.
    pub fn attach(
        &self,
        pid: u32,
        timeout: Option<Duration>,
    ) -> Result<SessionSnapshot, DebugError> {
        let _lifecycle = self.lifecycle.lock().expect("lifecycle poisoned");
        self.require_disconnected(DebugError::AlreadyAttached)?;
        self.shared.begin_attaching(LaunchMode::Attach);

        let timeout = timeout.unwrap_or(self.limits.attach_timeout());
        match self.connect_and(|runtime| runtime.attach(pid, timeout)) {
            Ok(()) => {
                info!(pid, "attached");
                self.bind_loaded_modules();
                Ok(self.shared.snapshot())
            }
            Err(err) => {
                self.shared.reset_disconnected();
                Err(err)
            }
        }
    }

    /// Launch an executable under the debugger.
    pub fn launch(&self, request: &LaunchRequest) -> Result<SessionSnapshot, DebugError> {
        let _lifecycle = self.lifecycle.lock().expect("lifecycle poisoned");
        self.require_disconnected(DebugError::SessionActive)?;
        self.shared.begin_attaching(LaunchMode::Launch);

        match self.connect_and(|runtime| runtime.launch(request)) {
            Ok(()) => {
                info!(path = %request.path, "launched");
                self.bind_loaded_modules();
                Ok(self.shared.snapshot())
            }
            Err(err) => {
                self.shared.reset_disconnected();
                Err(err)
            }
        }
    }

    /// Release the session: detach (leave the target running) or
    /// terminate it. Breakpoints are retained as Pending for the next
    /// attach. Every cleanup step is best-effort.
    pub fn disconnect(&self, terminate: bool) -> Result<(), DebugError> {
        let _lifecycle = self.lifecycle.lock().expect("lifecycle poisoned");
        match self.shared.state() {
            SessionState::Disconnected | SessionState::Attaching => {
                return Err(DebugError::NoSession)
            }
            SessionState::Running | SessionState::Paused | SessionState::Exited => {}
        }

        // 1-3: deactivate native handles, reset breakpoints to Pending,
        // then drain the hit queue and cancel blocked waiters.
        {
            let guard = self.target.lock().expect("target poisoned");
            self.manager.teardown(guard.as_deref());
        }
        self.hits.close();
        let dropped = self.hits.drain();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "discarded queued hits at teardown");
        }
        self.steps.cancel_all();

        // 5: release the underlying debugging interface entirely.
        let runtime = self.target.lock().expect("target poisoned").take();
        if let Some(mut runtime) = runtime {
            let result = if terminate {
                runtime.terminate()
            } else {
                runtime.detach()
            };
            if let Err(err) = result {
                warn!(error = %err, terminate, "target release failed");
            }
        }
        self.stop_pump();
        self.shared.reset_disconnected();
        info!(terminate, "session closed");
        Ok(())
    }

    // ----- execution control -----------------------------------------

    /// Resume a paused target.
    pub fn continue_run(&self) -> Result<SessionSnapshot, DebugError> {
        self.require_paused()?;
        // Publish Running before the target resumes: events arriving
        // mid-resume must not be stomped by a late transition.
        let before = self.shared.snapshot();
        self.shared.set_running();
        if let Err(err) = self.with_target(|target| target.resume().map_err(DebugError::from)) {
            self.restore_pause(&before);
            return Err(err);
        }
        Ok(self.shared.snapshot())
    }

    /// Pause a running target at the next opportunity.
    pub fn pause(&self) -> Result<SessionSnapshot, DebugError> {
        self.require_running()?;
        let (thread_id, location) = self.with_target(|target| {
            let thread_id = target.pause()?;
            let location = target
                .walk_stack(thread_id, 0, 1)
                .ok()
                .and_then(|frames| {
                    frames
                        .first()
                        .and_then(|frame| frame_location(&self.mapper, frame))
                });
            Ok((thread_id, location))
        })?;
        self.shared
            .set_paused(PauseReason::UserPause, thread_id, location, None);
        Ok(self.shared.snapshot())
    }

    /// Step and block until the step completes (or times out). Returns
    /// the new location when symbols resolve it.
    pub fn step(
        &self,
        mode: StepMode,
        thread_id: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Option<SourceLocation>, DebugError> {
        self.require_paused()?;
        let thread_id = thread_id
            .or_else(|| self.shared.active_thread())
            .ok_or(DebugError::InvalidThread(0))?;
        let timeout = timeout.unwrap_or(self.limits.step_timeout());

        // Running must be published before the stepper resumes the
        // target; the completion event may beat this thread otherwise.
        let before = self.shared.snapshot();
        self.steps.begin(thread_id);
        self.shared.set_running();
        let armed = self.with_target(|target| target.step(thread_id, mode).map_err(DebugError::from));
        if let Err(err) = armed {
            self.steps.abort(thread_id);
            self.restore_pause(&before);
            return Err(err);
        }

        match self.steps.wait(thread_id, Instant::now() + timeout) {
            Ok(frame) => Ok(frame_location(&self.mapper, &frame)),
            Err(StepWaitError::Timeout) => Err(DebugError::Timeout),
            Err(StepWaitError::Cancelled) => Err(DebugError::NoSession),
        }
    }

    /// Block until a breakpoint hit is delivered, the timeout passes, or
    /// the session tears down. Each call consumes at most one hit.
    pub fn wait_for_hit(
        &self,
        timeout: Duration,
        breakpoint_id: Option<&str>,
    ) -> Result<WaitOutcome, DebugError> {
        self.require_active()?;
        Ok(self.hits.dequeue(Instant::now() + timeout, breakpoint_id))
    }

    // ----- breakpoints -----------------------------------------------

    /// Set a line breakpoint (any session state; Pending while
    /// disconnected).
    pub fn set_breakpoint(&self, request: &BreakpointRequest) -> Result<Breakpoint, DebugError> {
        validate_breakpoint_request(request)?;
        let guard = self.target.lock().expect("target poisoned");
        let target = guard.as_deref();
        let modules = target
            .map(|target| target.list_modules().unwrap_or_default())
            .unwrap_or_default();
        self.manager.set_breakpoint(target, &modules, request)
    }

    /// Remove a breakpoint (line or exception) by id.
    pub fn remove_breakpoint(&self, id: &str) -> Result<(), DebugError> {
        let guard = self.target.lock().expect("target poisoned");
        self.manager.remove_breakpoint(guard.as_deref(), id)
    }

    /// Enable or disable a line breakpoint.
    pub fn set_breakpoint_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<Breakpoint, DebugError> {
        let guard = self.target.lock().expect("target poisoned");
        self.manager.set_enabled(guard.as_deref(), id, enabled)
    }

    /// All line breakpoints.
    #[must_use]
    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        self.registry.list()
    }

    /// All exception breakpoints.
    #[must_use]
    pub fn list_exception_breakpoints(&self) -> Vec<ExceptionBreakpoint> {
        self.registry.list_exceptions()
    }

    /// Register an exception breakpoint rule.
    pub fn set_exception_breakpoint(
        &self,
        request: &ExceptionBreakpointRequest,
    ) -> Result<ExceptionBreakpoint, DebugError> {
        if request.exception_type.trim().is_empty() {
            return Err(DebugError::InvalidParameter(
                "exception type must not be empty".into(),
            ));
        }
        Ok(self.manager.set_exception_breakpoint(request))
    }

    /// Remove every breakpoint.
    pub fn clear_all_breakpoints(&self) {
        let guard = self.target.lock().expect("target poisoned");
        self.manager.clear_all(guard.as_deref());
    }

    /// Drain buffered breakpoint state-change events.
    #[must_use]
    pub fn drain_breakpoint_events(&self) -> Vec<BreakpointStateChange> {
        self.manager.drain_state_changes()
    }

    // ----- inspection (requires Paused) ------------------------------

    /// List managed threads.
    pub fn threads(&self) -> Result<Vec<ThreadInfo>, DebugError> {
        self.require_active()?;
        let current = self.shared.active_thread();
        self.with_target(|target| self.inspection.threads(target, current))
    }

    /// Walk a thread's stack.
    pub fn stack(
        &self,
        thread_id: Option<u32>,
        start: usize,
        max_frames: Option<usize>,
        include_arguments: bool,
    ) -> Result<StackSlice, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.inspection
                .stack(target, thread_id, start, max_frames, include_arguments)
        })
    }

    /// Read variables of a frame.
    pub fn variables(
        &self,
        thread_id: Option<u32>,
        frame: Option<usize>,
        scope: ScopeFilter,
    ) -> Result<Vec<Variable>, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.inspection
                .variables(target, thread_id, frame.unwrap_or(0), scope)
        })
    }

    /// Evaluate a member-access expression.
    pub fn evaluate(
        &self,
        expression: &str,
        thread_id: Option<u32>,
        frame: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<EvaluationResult, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.inspection
                .evaluate(target, expression, thread_id, frame.unwrap_or(0), timeout)
        })
    }

    /// Expand an object's fields.
    pub fn inspect_object(
        &self,
        object_ref: &str,
        depth: Option<u32>,
        thread_id: Option<u32>,
        frame: Option<usize>,
    ) -> Result<ObjectInspection, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.inspection
                .inspect_object(target, object_ref, depth, thread_id, frame.unwrap_or(0))
        })
    }

    /// Read raw target memory.
    pub fn read_memory(
        &self,
        address: &str,
        size: Option<usize>,
    ) -> Result<MemoryRegion, DebugError> {
        self.require_paused()?;
        self.with_target(|target| self.memory.read(target, address, size))
    }

    /// Compute a type's layout.
    pub fn get_layout(
        &self,
        type_name_or_ref: &str,
        include_inherited: bool,
        include_padding: bool,
        thread_id: Option<u32>,
        frame: Option<usize>,
    ) -> Result<TypeLayout, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.memory.layout(
                target,
                &self.inspection,
                type_name_or_ref,
                include_inherited,
                include_padding,
                thread_id,
                frame.unwrap_or(0),
            )
        })
    }

    /// Enumerate reference edges from an object.
    #[allow(clippy::too_many_arguments)]
    pub fn get_references(
        &self,
        object_ref: &str,
        direction: ReferenceDirection,
        max_results: Option<usize>,
        include_arrays: bool,
        thread_id: Option<u32>,
        frame: Option<usize>,
    ) -> Result<ReferenceList, DebugError> {
        self.require_paused()?;
        let thread_id = self.resolve_thread(thread_id)?;
        self.with_target(|target| {
            self.memory.references(
                target,
                &self.inspection,
                object_ref,
                direction,
                max_results,
                include_arrays,
                thread_id,
                frame.unwrap_or(0),
            )
        })
    }

    // ----- metadata (Running or Paused) ------------------------------

    /// List loaded modules.
    pub fn list_modules(
        &self,
        include_system: bool,
        name_filter: Option<&str>,
    ) -> Result<Vec<ModuleInfo>, DebugError> {
        self.require_active()?;
        self.with_target(|target| self.modules.list_modules(target, include_system, name_filter))
    }

    /// List a module's types with pagination.
    pub fn list_types(&self, module: &str, query: &TypeQuery) -> Result<TypeList, DebugError> {
        self.require_active()?;
        self.with_target(|target| self.modules.list_types(target, module, query))
    }

    /// Enumerate a type's members from metadata.
    pub fn get_members(
        &self,
        type_name: &str,
        query: &MemberQuery,
    ) -> Result<MemberList, DebugError> {
        self.require_active()?;
        self.with_target(|target| self.modules.get_members(target, type_name, query))
    }

    /// Wildcard search across loaded modules.
    pub fn search(
        &self,
        pattern: &str,
        kind: SearchKind,
        module_filter: Option<&str>,
        case_sensitive: bool,
        max_results: Option<usize>,
    ) -> Result<SearchResults, DebugError> {
        self.require_active()?;
        self.with_target(|target| {
            self.modules.search(
                target,
                pattern,
                kind,
                module_filter,
                case_sensitive,
                max_results,
            )
        })
    }

    // ----- internals -------------------------------------------------

    /// Connect a fresh target, run the attach/launch call on it, and on
    /// success install the runtime and start the pump.
    fn connect_and(
        &self,
        establish: impl FnOnce(&mut dyn TargetRuntime) -> Result<crate::target::AttachInfo, crate::error::TargetError>,
    ) -> Result<(), DebugError> {
        let connection = self.connector.connect()?;
        let mut runtime = connection.runtime;
        let info = establish(runtime.as_mut())?;

        // Symbol readers survive reattach to the same process only.
        {
            let mut last_pid = self.last_pid.lock().expect("last pid poisoned");
            if *last_pid != Some(info.pid) {
                self.cache.clear();
            }
            *last_pid = Some(info.pid);
        }

        *self.target.lock().expect("target poisoned") = Some(runtime);
        self.hits.reopen();

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let join = spawn_pump(
            PumpContext {
                shared: Arc::clone(&self.shared),
                manager: Arc::clone(&self.manager),
                hits: Arc::clone(&self.hits),
                steps: Arc::clone(&self.steps),
                mapper: self.mapper.clone(),
                target: Arc::clone(&self.target),
            },
            connection.events,
            shutdown_rx,
        );
        *self.pump.lock().expect("pump poisoned") = Some(PumpHandle {
            join,
            shutdown: shutdown_tx,
        });

        self.shared
            .attach_succeeded(info.pid, info.process_name, info.runtime_version);
        Ok(())
    }

    /// Bind pending breakpoints against every module already loaded.
    fn bind_loaded_modules(&self) {
        let guard = self.target.lock().expect("target poisoned");
        let Some(target) = guard.as_deref() else {
            return;
        };
        match target.list_modules() {
            Ok(modules) => {
                for module in modules {
                    self.manager.bind_module_loaded(target, &module);
                }
            }
            Err(err) => warn!(error = %err, "initial module scan failed"),
        }
    }

    fn stop_pump(&self) {
        let handle = self.pump.lock().expect("pump poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            if handle.join.join().is_err() {
                warn!("event pump panicked during shutdown");
            }
        }
    }

    fn with_target<R>(
        &self,
        operation: impl FnOnce(&dyn TargetRuntime) -> Result<R, DebugError>,
    ) -> Result<R, DebugError> {
        let guard = self.target.lock().expect("target poisoned");
        let target = guard.as_deref().ok_or(DebugError::NoSession)?;
        operation(target)
    }

    /// Re-publish a pause that a failed resume/step rolled over.
    fn restore_pause(&self, before: &SessionSnapshot) {
        if before.state == SessionState::Paused {
            self.shared.set_paused(
                before.pause_reason.unwrap_or(PauseReason::UserPause),
                before.active_thread_id.unwrap_or(0),
                before.current_location.clone(),
                before.breakpoint_id.clone(),
            );
        }
    }

    fn resolve_thread(&self, thread_id: Option<u32>) -> Result<u32, DebugError> {
        thread_id
            .or_else(|| self.shared.active_thread())
            .ok_or(DebugError::InvalidThread(0))
    }

    /// Guard for the two session-opening operations; each reports its
    /// own busy error (`AlreadyAttached` for attach, `SessionActive`
    /// for launch).
    fn require_disconnected(&self, busy: DebugError) -> Result<(), DebugError> {
        match self.shared.state() {
            SessionState::Disconnected => Ok(()),
            _ => Err(busy),
        }
    }

    fn require_paused(&self) -> Result<(), DebugError> {
        match self.shared.state() {
            SessionState::Paused => Ok(()),
            SessionState::Disconnected | SessionState::Attaching | SessionState::Exited => {
                Err(DebugError::NoSession)
            }
            SessionState::Running => Err(DebugError::NotPaused),
        }
    }

    fn require_running(&self) -> Result<(), DebugError> {
        match self.shared.state() {
            SessionState::Running => Ok(()),
            SessionState::Disconnected | SessionState::Attaching | SessionState::Exited => {
                Err(DebugError::NoSession)
            }
            SessionState::Paused => Err(DebugError::NotRunning),
        }
    }

    fn require_active(&self) -> Result<(), DebugError> {
        match self.shared.state() {
            SessionState::Running | SessionState::Paused => Ok(()),
            _ => Err(DebugError::NoSession),
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.hits.close();
        self.steps.cancel_all();
        self.target.lock().expect("target poisoned").take();
        self.stop_pump();
    }
}

fn validate_breakpoint_request(request: &BreakpointRequest) -> Result<(), DebugError> {
    let file = request.file.trim();
    if file.is_empty() {
        return Err(DebugError::InvalidFile(request.file.clone()));
    }
    let forward = file.replace('\\', "/");
    let windows_absolute = forward.len() >= 3
        && forward.as_bytes()[0].is_ascii_alphabetic()
        && &forward[1..3] == ":/";
    if !forward.starts_with('/') && !windows_absolute {
        return Err(DebugError::InvalidFile(request.file.clone()));
    }
    if request.line == 0 {
        return Err(DebugError::InvalidLine(request.line));
    }
    if request.column == Some(0) {
        return Err(DebugError::InvalidColumn(0));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_requests_must_be_absolute() {
        let ok = BreakpointRequest {
            file: "/src/Main.cs".into(),
            line: 3,
            column: None,
            condition: None,
        };
        assert!(validate_breakpoint_request(&ok).is_ok());

        let windows = BreakpointRequest {
            file: r"C:\src\Main.cs".into(),
            line: 3,
            column: None,
            condition: None,
        };
        assert!(validate_breakpoint_request(&windows).is_ok());

        let relative = BreakpointRequest {
            file: "src/Main.cs".into(),
            line: 3,
            column: None,
            condition: None,
        };
        assert!(matches!(
            validate_breakpoint_request(&relative),
            Err(DebugError::InvalidFile(_))
        ));
    }

    #[test]
    fn line_and_column_are_one_based() {
        let zero_line = BreakpointRequest {
            file: "/src/Main.cs".into(),
            line: 0,
            column: None,
            condition: None,
        };
        assert!(matches!(
            validate_breakpoint_request(&zero_line),
            Err(DebugError::InvalidLine(0))
        ));

        let zero_column = BreakpointRequest {
            file: "/src/Main.cs".into(),
            line: 1,
            column: Some(0),
            condition: None,
        };
        assert!(matches!(
            validate_breakpoint_request(&zero_column),
            Err(DebugError::InvalidColumn(0))
        ));
    }
}
