//! Scripted in-memory target runtime for tests.
//!
//! [`ScriptedWorld`] describes a fake target process (modules, threads,
//! frames, objects, types, memory); [`Script`] wraps it with the live
//! event channel and drive helpers (`fire_breakpoint`, `load_module`,
//! `throw_exception`, …) that behave like the real runtime's callback
//! convention: drivers that pause block until the pump answers with a
//! continue decision.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};

use netdbg_symbols::MethodToken;

use crate::error::TargetError;
use crate::target::{
    AttachInfo, FunctionHandle, LaunchRequest, MemoryRead, RawField, RawFrame, RawPrimitive,
    RawThread, RawTypeInfo, RawTypeLayout, RawValue, RawValueKind, ResumeDecision, StepMode,
    TargetConnection, TargetConnector, TargetEvent, TargetEventKind, TargetRuntime,
};
use crate::types::{
    BindHandle, MemberList, ModuleHandle, ModuleInfo, ThreadState, TypeRef, ValueHandle,
};

const DECISION_TIMEOUT: Duration = Duration::from_secs(5);
/// Synthetic module-handle space for getter function handles.
const GETTER_MODULE: u64 = 0xF0F0_0000_0000_0000;

#[derive(Debug, Clone)]
struct ScriptedThread {
    id: u32,
    name: Option<String>,
    frames: Vec<RawFrame>,
}

#[derive(Debug, Clone, Default)]
struct FrameVars {
    locals: Vec<(String, RawValue)>,
    arguments: Vec<(String, RawValue)>,
    this: Option<RawValue>,
}

#[derive(Debug, Clone)]
struct ScriptedField {
    declaring: Option<TypeRef>,
    field: RawField,
}

#[derive(Debug, Clone)]
struct ScriptedObject {
    value: RawValue,
    fields: Vec<ScriptedField>,
    elements: Vec<RawValue>,
}

#[derive(Debug, Clone, Default)]
struct ScriptedType {
    base: Option<TypeRef>,
    getters: HashMap<String, u32>,
    layout: Option<RawTypeLayout>,
    members: MemberList,
}

/// The fake target process description.
#[derive(Debug)]
pub struct ScriptedWorld {
    pub pid: u32,
    pub process_name: String,
    pub runtime_version: String,
    modules: Vec<ModuleInfo>,
    threads: Vec<ScriptedThread>,
    frame_vars: HashMap<(u32, usize), FrameVars>,
    objects: HashMap<u64, ScriptedObject>,
    types: HashMap<TypeRef, ScriptedType>,
    type_names: HashMap<String, TypeRef>,
    module_types: HashMap<u64, Vec<RawTypeInfo>>,
    getter_results: HashMap<u32, Result<RawValue, TargetError>>,
    memory: Vec<(u64, Vec<u8>)>,
    step_frames: HashMap<u32, RawFrame>,
    fail_attach: Option<TargetError>,
    next_handle: u64,
    next_getter: u32,
}

impl ScriptedWorld {
    #[must_use]
    pub fn new(pid: u32, process_name: &str) -> Self {
        Self {
            pid,
            process_name: process_name.into(),
            runtime_version: "9.0.0".into(),
            modules: Vec::new(),
            threads: Vec::new(),
            frame_vars: HashMap::new(),
            objects: HashMap::new(),
            types: HashMap::new(),
            type_names: HashMap::new(),
            module_types: HashMap::new(),
            getter_results: HashMap::new(),
            memory: Vec::new(),
            step_frames: HashMap::new(),
            fail_attach: None,
            next_handle: 1,
            next_getter: 1,
        }
    }

    pub fn add_module(&mut self, name: &str, path: &str, base_address: u64, size: u64) -> ModuleInfo {
        let handle = ModuleHandle(self.modules.len() as u64 + 1);
        let module = ModuleInfo {
            name: name.into(),
            full_name: format!("{name}, Version=1.0.0.0"),
            path: Some(path.into()),
            version: Some("1.0.0.0".into()),
            has_symbols: false,
            is_dynamic: false,
            is_in_memory: false,
            base_address,
            size,
            handle,
        };
        self.modules.push(module.clone());
        module
    }

    pub fn add_dynamic_module(&mut self, name: &str) -> ModuleInfo {
        let handle = ModuleHandle(self.modules.len() as u64 + 1);
        let module = ModuleInfo {
            name: name.into(),
            full_name: name.into(),
            path: None,
            version: None,
            has_symbols: false,
            is_dynamic: true,
            is_in_memory: true,
            base_address: 0,
            size: 0,
            handle,
        };
        self.modules.push(module.clone());
        module
    }

    pub fn add_thread(&mut self, id: u32, name: Option<&str>, frames: Vec<RawFrame>) {
        self.threads.push(ScriptedThread {
            id,
            name: name.map(str::to_string),
            frames,
        });
    }

    pub fn set_step_frame(&mut self, thread_id: u32, frame: RawFrame) {
        self.step_frames.insert(thread_id, frame);
    }

    pub fn set_locals(&mut self, thread_id: u32, frame: usize, locals: Vec<(String, RawValue)>) {
        self.frame_vars.entry((thread_id, frame)).or_default().locals = locals;
    }

    pub fn set_arguments(
        &mut self,
        thread_id: u32,
        frame: usize,
        arguments: Vec<(String, RawValue)>,
    ) {
        self.frame_vars
            .entry((thread_id, frame))
            .or_default()
            .arguments = arguments;
    }

    pub fn set_this(&mut self, thread_id: u32, frame: usize, value: RawValue) {
        self.frame_vars.entry((thread_id, frame)).or_default().this = Some(value);
    }

    /// Register an object; the returned value can be stored in frames
    /// or fields.
    pub fn add_object(
        &mut self,
        type_name: &str,
        address: u64,
        size: u64,
        type_ref: Option<TypeRef>,
    ) -> RawValue {
        let handle = ValueHandle(self.next_handle);
        self.next_handle += 1;
        let value = RawValue {
            type_name: type_name.into(),
            address,
            size,
            kind: RawValueKind::Object {
                type_ref,
                collection_count: None,
            },
            handle: Some(handle),
        };
        self.objects.insert(
            handle.0,
            ScriptedObject {
                value: value.clone(),
                fields: Vec::new(),
                elements: Vec::new(),
            },
        );
        value
    }

    /// Register an array object.
    pub fn add_array(
        &mut self,
        element_type: &str,
        address: u64,
        elements: Vec<RawValue>,
    ) -> RawValue {
        let handle = ValueHandle(self.next_handle);
        self.next_handle += 1;
        let value = RawValue {
            type_name: format!("{element_type}[]"),
            address,
            size: 24 + elements.len() as u64 * 8,
            kind: RawValueKind::Array {
                element_type: element_type.into(),
                length: elements.len(),
            },
            handle: Some(handle),
        };
        self.objects.insert(
            handle.0,
            ScriptedObject {
                value: value.clone(),
                fields: Vec::new(),
                elements,
            },
        );
        value
    }

    pub fn add_field(
        &mut self,
        object: &RawValue,
        declaring: Option<TypeRef>,
        name: &str,
        offset: u32,
        size: u32,
        is_static: bool,
        value: RawValue,
    ) {
        let handle = object.handle.expect("object values carry handles");
        let entry = self
            .objects
            .get_mut(&handle.0)
            .expect("object registered via add_object");
        entry.fields.push(ScriptedField {
            declaring,
            field: RawField {
                name: name.into(),
                offset,
                size,
                is_static,
                value,
            },
        });
    }

    pub fn define_type(&mut self, full_name: &str, type_ref: TypeRef, base: Option<TypeRef>) {
        self.types.entry(type_ref.clone()).or_default().base = base;
        self.type_names.insert(full_name.into(), type_ref);
    }

    /// Register a property getter on a type; calls return `result`.
    pub fn define_getter(
        &mut self,
        type_ref: &TypeRef,
        property: &str,
        result: Result<RawValue, TargetError>,
    ) {
        let id = self.next_getter;
        self.next_getter += 1;
        self.types
            .entry(type_ref.clone())
            .or_default()
            .getters
            .insert(property.into(), id);
        self.getter_results.insert(id, result);
    }

    pub fn set_type_layout(&mut self, type_ref: &TypeRef, layout: RawTypeLayout) {
        self.types.entry(type_ref.clone()).or_default().layout = Some(layout);
    }

    pub fn set_module_types(&mut self, module: &ModuleInfo, types: Vec<RawTypeInfo>) {
        self.module_types.insert(module.handle.0, types);
    }

    pub fn set_type_members(&mut self, type_ref: &TypeRef, members: MemberList) {
        self.types.entry(type_ref.clone()).or_default().members = members;
    }

    pub fn add_memory(&mut self, base: u64, bytes: Vec<u8>) {
        self.memory.push((base, bytes));
    }

    /// The registered module with the given name.
    #[must_use]
    pub fn module_named(&self, name: &str) -> Option<ModuleInfo> {
        self.modules
            .iter()
            .find(|module| module.name == name)
            .cloned()
    }

    pub fn fail_next_attach(&mut self, error: TargetError) {
        self.fail_attach = Some(error);
    }

    // Value constructors for frame/field wiring.

    #[must_use]
    pub fn int_value(value: i64) -> RawValue {
        RawValue {
            type_name: "System.Int32".into(),
            address: 0,
            size: 4,
            kind: RawValueKind::Primitive(RawPrimitive::Int(value)),
            handle: None,
        }
    }

    #[must_use]
    pub fn string_value(text: &str) -> RawValue {
        RawValue {
            type_name: "System.String".into(),
            address: 0,
            size: text.len() as u64,
            kind: RawValueKind::String(text.into()),
            handle: None,
        }
    }

    #[must_use]
    pub fn null_value(type_name: &str) -> RawValue {
        RawValue {
            type_name: type_name.into(),
            address: 0,
            size: 0,
            kind: RawValueKind::Null,
            handle: None,
        }
    }
}

#[derive(Debug)]
struct NativeBreakpoint {
    function: FunctionHandle,
    il_offset: u32,
    active: bool,
}

#[derive(Debug, Default)]
struct ControlState {
    attached: bool,
    paused: bool,
    current_thread: u32,
    native: HashMap<u64, NativeBreakpoint>,
    next_bind: u64,
}

#[derive(Debug, Default)]
pub struct ScriptCounters {
    connects: AtomicUsize,
    runtimes_dropped: AtomicUsize,
    breakpoints_created: AtomicUsize,
    breakpoints_released: AtomicUsize,
    detaches: AtomicUsize,
    terminates: AtomicUsize,
}

impl ScriptCounters {
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn runtimes_dropped(&self) -> usize {
        self.runtimes_dropped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn breakpoints_created(&self) -> usize {
        self.breakpoints_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn breakpoints_released(&self) -> usize {
        self.breakpoints_released.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }
}

/// A scripted target: the world plus live session bookkeeping and the
/// drive helpers tests use to play the runtime's role.
pub struct Script {
    world: Mutex<ScriptedWorld>,
    control: Mutex<ControlState>,
    live: Mutex<Option<Sender<TargetEvent>>>,
    counters: ScriptCounters,
}

impl Script {
    #[must_use]
    pub fn new(world: ScriptedWorld) -> Arc<Self> {
        Arc::new(Self {
            world: Mutex::new(world),
            control: Mutex::new(ControlState {
                current_thread: 1,
                ..ControlState::default()
            }),
            live: Mutex::new(None),
            counters: ScriptCounters::default(),
        })
    }

    /// A connector handing out fresh runtimes over this script.
    #[must_use]
    pub fn connector(self: &Arc<Self>) -> ScriptedConnector {
        ScriptedConnector {
            script: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn counters(&self) -> &ScriptCounters {
        &self.counters
    }

    /// Installed native breakpoints that were never released.
    #[must_use]
    pub fn leaked_native_breakpoints(&self) -> usize {
        self.control.lock().expect("control poisoned").native.len()
    }

    pub fn with_world<R>(&self, mutate: impl FnOnce(&mut ScriptedWorld) -> R) -> R {
        let mut world = self.world.lock().expect("world poisoned");
        mutate(&mut world)
    }

    /// Add a module to the world and deliver the load event; blocks
    /// until the pump finishes bind processing.
    pub fn load_module(&self, module: ModuleInfo) {
        self.with_world(|world| world.modules.push(module.clone()));
        let _ = self.emit_with_decision(TargetEventKind::ModuleLoaded(module));
    }

    /// Deliver a load event for a module already registered in the
    /// world (e.g. via [`ScriptedWorld::add_module`]); blocks until the
    /// pump finishes bind processing.
    pub fn announce_module(&self, module: ModuleInfo) {
        let _ = self.emit_with_decision(TargetEventKind::ModuleLoaded(module));
    }

    /// Remove a module and deliver the unload event; blocks until the
    /// pump finishes unbind processing.
    pub fn unload_module(&self, name: &str) {
        let removed = self.with_world(|world| {
            let index = world.modules.iter().position(|module| module.name == name);
            index.map(|index| world.modules.remove(index))
        });
        if let Some(module) = removed {
            let _ = self.emit_with_decision(TargetEventKind::ModuleUnloaded {
                name: module.name,
                path: module.path,
            });
        }
    }

    /// Fire an installed breakpoint at `(method, il_offset)` on a
    /// thread. Returns `None` when no active native breakpoint covers
    /// that site (the runtime would not call back), otherwise the
    /// pump's decision.
    pub fn fire_breakpoint(
        &self,
        thread_id: u32,
        method: MethodToken,
        il_offset: u32,
    ) -> Option<ResumeDecision> {
        let (handle, module_path) = {
            let control = self.control.lock().expect("control poisoned");
            let entry = control.native.iter().find(|(_, bp)| {
                bp.active && bp.function.token == method && bp.il_offset == il_offset
            })?;
            let module = entry.1.function.module;
            let world = self.world.lock().expect("world poisoned");
            let path = world
                .modules
                .iter()
                .find(|candidate| candidate.handle == module)
                .and_then(|candidate| candidate.path.clone());
            (BindHandle(*entry.0), path)
        };
        {
            let mut control = self.control.lock().expect("control poisoned");
            control.current_thread = thread_id;
        }
        let decision = self.emit_with_decision(TargetEventKind::BreakpointHit {
            thread_id,
            handle,
            method,
            il_offset,
            module_path,
        });
        self.apply_decision(decision);
        Some(decision)
    }

    /// Raise an exception in the target.
    pub fn throw_exception(
        &self,
        thread_id: u32,
        type_name: &str,
        message: &str,
        is_first_chance: bool,
    ) -> ResumeDecision {
        let decision = self.emit_with_decision(TargetEventKind::ExceptionThrown {
            thread_id,
            type_name: type_name.into(),
            message: message.into(),
            is_first_chance,
            stack_trace: None,
        });
        self.apply_decision(decision);
        decision
    }

    /// End the target process.
    pub fn exit_process(&self, exit_code: i32) {
        {
            let mut control = self.control.lock().expect("control poisoned");
            control.attached = false;
        }
        let _ = self.emit_with_decision(TargetEventKind::ProcessExited { exit_code });
    }

    /// Deliver an arbitrary event without waiting on a decision.
    pub fn emit(&self, kind: TargetEventKind) {
        let live = self.live.lock().expect("live poisoned");
        if let Some(tx) = live.as_ref() {
            let _ = tx.send(TargetEvent::fire_and_forget(kind));
        }
    }

    fn emit_with_decision(&self, kind: TargetEventKind) -> ResumeDecision {
        let (decision_tx, decision_rx) = bounded(1);
        {
            let live = self.live.lock().expect("live poisoned");
            let Some(tx) = live.as_ref() else {
                return ResumeDecision::Resume;
            };
            if tx
                .send(TargetEvent {
                    kind,
                    decision: Some(decision_tx),
                })
                .is_err()
            {
                return ResumeDecision::Resume;
            }
        }
        decision_rx
            .recv_timeout(DECISION_TIMEOUT)
            .unwrap_or(ResumeDecision::Resume)
    }

    fn apply_decision(&self, decision: ResumeDecision) {
        let mut control = self.control.lock().expect("control poisoned");
        control.paused = decision == ResumeDecision::RemainPaused;
    }
}

/// Connector over a [`Script`]; each connect yields a fresh runtime and
/// a fresh event channel.
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl TargetConnector for ScriptedConnector {
    fn connect(&self) -> Result<TargetConnection, TargetError> {
        self.script.counters.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        *self.script.live.lock().expect("live poisoned") = Some(tx.clone());
        Ok(TargetConnection {
            runtime: Box::new(ScriptedTarget {
                script: Arc::clone(&self.script),
                events: tx,
            }),
            events: rx,
        })
    }
}

/// One live runtime connection over the script.
pub struct ScriptedTarget {
    script: Arc<Script>,
    events: Sender<TargetEvent>,
}

impl ScriptedTarget {
    fn world(&self) -> MutexGuard<'_, ScriptedWorld> {
        self.script.world.lock().expect("world poisoned")
    }

    fn control(&self) -> MutexGuard<'_, ControlState> {
        self.script.control.lock().expect("control poisoned")
    }

    fn require_attached(&self) -> Result<(), TargetError> {
        if self.control().attached {
            Ok(())
        } else {
            Err(TargetError::NoProcess)
        }
    }

    fn object(&self, handle: &ValueHandle) -> Result<ScriptedObject, TargetError> {
        self.world()
            .objects
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| TargetError::Internal(format!("unknown value handle {}", handle.0)))
    }
}

impl Drop for ScriptedTarget {
    fn drop(&mut self) {
        self.script
            .counters
            .runtimes_dropped
            .fetch_add(1, Ordering::SeqCst);
        // Close the live channel so a dropped interface cannot deliver
        // stale callbacks into the next session.
        let mut live = self.script.live.lock().expect("live poisoned");
        if live
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&self.events))
        {
            *live = None;
        }
    }
}

impl TargetRuntime for ScriptedTarget {
    fn attach(&mut self, pid: u32, _timeout: Duration) -> Result<AttachInfo, TargetError> {
        let mut world = self.world();
        if let Some(err) = world.fail_attach.take() {
            return Err(err);
        }
        if world.pid != pid {
            return Err(TargetError::ProcessNotFound(pid));
        }
        drop(world);
        let mut control = self.control();
        control.attached = true;
        control.paused = false;
        let world = self.world();
        Ok(AttachInfo {
            pid: world.pid,
            process_name: world.process_name.clone(),
            runtime_version: world.runtime_version.clone(),
        })
    }

    fn launch(&mut self, request: &LaunchRequest) -> Result<AttachInfo, TargetError> {
        if request.path.is_empty() {
            return Err(TargetError::InvalidPath(request.path.clone()));
        }
        let mut control = self.control();
        control.attached = true;
        control.paused = request.stop_at_entry;
        drop(control);
        let world = self.world();
        if request.stop_at_entry {
            let thread_id = world.threads.first().map_or(1, |thread| thread.id);
            let _ = self
                .events
                .send(TargetEvent::fire_and_forget(
                    TargetEventKind::EntryPointReached { thread_id },
                ));
        }
        Ok(AttachInfo {
            pid: world.pid,
            process_name: world.process_name.clone(),
            runtime_version: world.runtime_version.clone(),
        })
    }

    fn detach(&mut self) -> Result<(), TargetError> {
        self.script.counters.detaches.fetch_add(1, Ordering::SeqCst);
        self.control().attached = false;
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), TargetError> {
        self.script
            .counters
            .terminates
            .fetch_add(1, Ordering::SeqCst);
        self.control().attached = false;
        Ok(())
    }

    fn list_modules(&self) -> Result<Vec<ModuleInfo>, TargetError> {
        self.require_attached()?;
        Ok(self.world().modules.clone())
    }

    fn function_from_token(
        &self,
        module: &ModuleHandle,
        token: MethodToken,
    ) -> Result<FunctionHandle, TargetError> {
        Ok(FunctionHandle {
            module: *module,
            token,
        })
    }

    fn create_il_breakpoint(
        &self,
        function: &FunctionHandle,
        il_offset: u32,
    ) -> Result<BindHandle, TargetError> {
        let mut control = self.control();
        control.next_bind += 1;
        let id = control.next_bind;
        control.native.insert(
            id,
            NativeBreakpoint {
                function: function.clone(),
                il_offset,
                active: false,
            },
        );
        self.script
            .counters
            .breakpoints_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(BindHandle(id))
    }

    fn activate_breakpoint(&self, handle: BindHandle, enabled: bool) -> Result<(), TargetError> {
        let mut control = self.control();
        let breakpoint = control
            .native
            .get_mut(&handle.0)
            .ok_or_else(|| TargetError::Internal(format!("unknown bind handle {}", handle.0)))?;
        breakpoint.active = enabled;
        Ok(())
    }

    fn release_breakpoint(&self, handle: BindHandle) -> Result<(), TargetError> {
        let mut control = self.control();
        control
            .native
            .remove(&handle.0)
            .ok_or_else(|| TargetError::Internal(format!("unknown bind handle {}", handle.0)))?;
        self.script
            .counters
            .breakpoints_released
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), TargetError> {
        self.require_attached()?;
        self.control().paused = false;
        Ok(())
    }

    fn pause(&self) -> Result<u32, TargetError> {
        self.require_attached()?;
        let mut control = self.control();
        control.paused = true;
        Ok(control.current_thread)
    }

    fn step(&self, thread_id: u32, _mode: StepMode) -> Result<(), TargetError> {
        self.require_attached()?;
        let frame = {
            let mut world = self.world();
            let Some(frame) = world.step_frames.get(&thread_id).cloned() else {
                return Err(TargetError::StepFailed(format!(
                    "no step scripted for thread {thread_id}"
                )));
            };
            if let Some(thread) = world.threads.iter_mut().find(|t| t.id == thread_id) {
                if thread.frames.is_empty() {
                    thread.frames.push(frame.clone());
                } else {
                    thread.frames[0] = frame.clone();
                }
            }
            frame
        };
        self.control().paused = false;
        let (decision_tx, _decision_rx) = bounded(1);
        let _ = self.events.send(TargetEvent {
            kind: TargetEventKind::StepComplete { thread_id, frame },
            decision: Some(decision_tx),
        });
        Ok(())
    }

    fn list_threads(&self) -> Result<Vec<RawThread>, TargetError> {
        self.require_attached()?;
        let control_paused = self.control().paused;
        Ok(self
            .world()
            .threads
            .iter()
            .map(|thread| RawThread {
                id: thread.id,
                name: thread.name.clone(),
                state: if control_paused {
                    ThreadState::Stopped
                } else {
                    ThreadState::Running
                },
                top_frame: thread.frames.first().cloned(),
            })
            .collect())
    }

    fn current_thread(&self) -> Result<u32, TargetError> {
        self.require_attached()?;
        Ok(self.control().current_thread)
    }

    fn stack_depth(&self, thread_id: u32) -> Result<usize, TargetError> {
        let world = self.world();
        world
            .threads
            .iter()
            .find(|thread| thread.id == thread_id)
            .map(|thread| thread.frames.len())
            .ok_or(TargetError::InvalidThread(thread_id))
    }

    fn walk_stack(
        &self,
        thread_id: u32,
        start: usize,
        count: usize,
    ) -> Result<Vec<RawFrame>, TargetError> {
        let world = self.world();
        let thread = world
            .threads
            .iter()
            .find(|thread| thread.id == thread_id)
            .ok_or(TargetError::InvalidThread(thread_id))?;
        Ok(thread
            .frames
            .iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect())
    }

    fn read_locals(
        &self,
        thread_id: u32,
        frame: usize,
    ) -> Result<Vec<(String, RawValue)>, TargetError> {
        self.frame_vars(thread_id, frame)
            .map(|vars| vars.locals)
    }

    fn read_arguments(
        &self,
        thread_id: u32,
        frame: usize,
    ) -> Result<Vec<(String, RawValue)>, TargetError> {
        self.frame_vars(thread_id, frame)
            .map(|vars| vars.arguments)
    }

    fn read_this(&self, thread_id: u32, frame: usize) -> Result<Option<RawValue>, TargetError> {
        self.frame_vars(thread_id, frame).map(|vars| vars.this)
    }

    fn read_fields(&self, value: &ValueHandle) -> Result<Vec<RawField>, TargetError> {
        Ok(self
            .object(value)?
            .fields
            .into_iter()
            .map(|entry| entry.field)
            .collect())
    }

    fn fields_declared(
        &self,
        value: &ValueHandle,
        declaring: &TypeRef,
    ) -> Result<Vec<RawField>, TargetError> {
        let object = self.object(value)?;
        let own_type = object.value.type_ref().cloned();
        Ok(object
            .fields
            .into_iter()
            .filter(|entry| match &entry.declaring {
                Some(type_ref) => type_ref == declaring,
                None => own_type.as_ref() == Some(declaring),
            })
            .map(|entry| entry.field)
            .collect())
    }

    fn base_type(&self, type_ref: &TypeRef) -> Result<Option<TypeRef>, TargetError> {
        Ok(self
            .world()
            .types
            .get(type_ref)
            .and_then(|entry| entry.base.clone()))
    }

    fn find_getter(
        &self,
        type_ref: &TypeRef,
        property: &str,
    ) -> Result<Option<FunctionHandle>, TargetError> {
        Ok(self
            .world()
            .types
            .get(type_ref)
            .and_then(|entry| entry.getters.get(property))
            .map(|id| FunctionHandle {
                module: ModuleHandle(GETTER_MODULE),
                token: MethodToken::from_row(*id),
            }))
    }

    fn call_function(
        &self,
        function: &FunctionHandle,
        _this: Option<&ValueHandle>,
        _thread_id: u32,
        _timeout: Duration,
    ) -> Result<RawValue, TargetError> {
        if function.module != ModuleHandle(GETTER_MODULE) {
            return Err(TargetError::EvalFailed("unknown function".into()));
        }
        let id = function
            .token
            .row()
            .map_err(|_| TargetError::EvalFailed("bad getter token".into()))?;
        self.world()
            .getter_results
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Err(TargetError::EvalFailed("getter not scripted".into())))
    }

    fn array_elements(
        &self,
        value: &ValueHandle,
        max: usize,
    ) -> Result<Vec<RawValue>, TargetError> {
        Ok(self
            .object(value)?
            .elements
            .into_iter()
            .take(max)
            .collect())
    }

    fn read_memory(&self, address: u64, size: usize) -> Result<MemoryRead, TargetError> {
        let world = self.world();
        for (base, bytes) in &world.memory {
            let end = base + bytes.len() as u64;
            if address >= *base && address < end {
                let offset = (address - base) as usize;
                let available = bytes.len() - offset;
                let take = available.min(size);
                let note = (take < size).then(|| {
                    format!("read truncated at region boundary after {take} bytes")
                });
                return Ok(MemoryRead {
                    bytes: bytes[offset..offset + take].to_vec(),
                    note,
                });
            }
        }
        Err(TargetError::InvalidAddress(address))
    }

    fn type_layout(&self, type_ref: &TypeRef) -> Result<RawTypeLayout, TargetError> {
        self.world()
            .types
            .get(type_ref)
            .and_then(|entry| entry.layout.clone())
            .ok_or_else(|| TargetError::TypeNotFound(format!("{type_ref:?}")))
    }

    fn find_type(&self, name: &str) -> Result<Option<TypeRef>, TargetError> {
        Ok(self.world().type_names.get(name).cloned())
    }

    fn module_types(&self, module: &ModuleHandle) -> Result<Vec<RawTypeInfo>, TargetError> {
        Ok(self
            .world()
            .module_types
            .get(&module.0)
            .cloned()
            .unwrap_or_default())
    }

    fn type_members(&self, type_ref: &TypeRef) -> Result<MemberList, TargetError> {
        Ok(self
            .world()
            .types
            .get(type_ref)
            .map(|entry| entry.members.clone())
            .unwrap_or_default())
    }
}

impl ScriptedTarget {
    fn frame_vars(&self, thread_id: u32, frame: usize) -> Result<FrameVars, TargetError> {
        let world = self.world();
        let thread = world
            .threads
            .iter()
            .find(|thread| thread.id == thread_id)
            .ok_or(TargetError::InvalidThread(thread_id))?;
        if frame >= thread.frames.len() {
            return Err(TargetError::InvalidFrame(frame));
        }
        Ok(world
            .frame_vars
            .get(&(thread_id, frame))
            .cloned()
            .unwrap_or_default())
    }
}

/// A raw frame helper for scripted threads.
#[must_use]
pub fn managed_frame(
    function: &str,
    module_name: &str,
    module_path: &str,
    method: MethodToken,
    il_offset: u32,
) -> RawFrame {
    RawFrame {
        method: Some(method),
        module_path: Some(module_path.into()),
        module_name: module_name.into(),
        function: function.into(),
        il_offset: Some(il_offset),
        is_native: false,
    }
}

/// A native frame helper for scripted threads.
#[must_use]
pub fn native_frame(function: &str) -> RawFrame {
    RawFrame {
        method: None,
        module_path: None,
        module_name: "[native]".into(),
        function: function.into(),
        il_offset: None,
        is_native: true,
    }
}
