//! The target runtime façade.
//!
//! Everything the core needs from the external debugging capability is
//! behind [`TargetRuntime`]; the rest of the crate never talks to a
//! vendor API directly. A [`TargetConnector`] hands out a fresh runtime
//! plus its event channel per session. Dropping the boxed runtime is
//! what releases the underlying debugging interface, and the next
//! attach must reacquire a fresh one.

#![allow(missing_docs)]

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use time::OffsetDateTime;

use netdbg_symbols::MethodToken;

use crate::error::TargetError;
use crate::types::{
    BindHandle, MemberList, ModuleHandle, ModuleInfo, ThreadState, TypeKind, TypeRef, ValueHandle,
    Visibility,
};

/// A function resolved inside a module, ready for binding or calling.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    /// The defining module.
    pub module: ModuleHandle,
    /// MethodDef token within that module.
    pub token: MethodToken,
}

/// Primitive payloads the target can hand back directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawPrimitive {
    Bool(bool),
    Char(char),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// The shape of a raw value read from the target.
#[derive(Debug, Clone)]
pub enum RawValueKind {
    /// A null reference.
    Null,
    /// A string, already materialized (display truncation happens
    /// core-side).
    String(String),
    /// A primitive scalar.
    Primitive(RawPrimitive),
    /// An enum value with its symbolic name and ordinal.
    Enum { name: String, ordinal: i64 },
    /// A date-like value.
    DateTime(OffsetDateTime),
    /// An array of `length` elements.
    Array { element_type: String, length: usize },
    /// A reference-type object. `collection_count` is set for well-known
    /// collection shapes.
    Object {
        type_ref: Option<TypeRef>,
        collection_count: Option<usize>,
    },
    /// A non-primitive value type (struct).
    ValueObject { type_ref: Option<TypeRef> },
}

/// A value read from the target, with enough identity to expand it.
#[derive(Debug, Clone)]
pub struct RawValue {
    /// Display type name.
    pub type_name: String,
    /// Object address, 0 for unboxed primitives.
    pub address: u64,
    /// In-memory size when known.
    pub size: u64,
    /// Shape and payload.
    pub kind: RawValueKind,
    /// Handle for field expansion and getter calls; absent for
    /// primitives.
    pub handle: Option<ValueHandle>,
}

impl RawValue {
    /// The type this value is an instance of, when the target knows it.
    #[must_use]
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match &self.kind {
            RawValueKind::Object { type_ref, .. } | RawValueKind::ValueObject { type_ref } => {
                type_ref.as_ref()
            }
            _ => None,
        }
    }

    /// Whether this value is a null reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.kind, RawValueKind::Null)
    }
}

/// One field read from an object.
#[derive(Debug, Clone)]
pub struct RawField {
    /// Field name.
    pub name: String,
    /// Byte offset from the start of object data.
    pub offset: u32,
    /// Field storage size.
    pub size: u32,
    /// Static fields are reported by field enumeration but excluded from
    /// instance layouts.
    pub is_static: bool,
    /// The field's current value.
    pub value: RawValue,
}

/// One stack frame as reported by the target.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// MethodDef token, absent for native frames.
    pub method: Option<MethodToken>,
    /// Defining module path, absent for native/dynamic frames.
    pub module_path: Option<String>,
    /// Short module name for display.
    pub module_name: String,
    /// Rendered function signature.
    pub function: String,
    /// Current IL offset, absent for native frames.
    pub il_offset: Option<u32>,
    /// True for frames outside managed code.
    pub is_native: bool,
}

/// One thread as reported by the target.
#[derive(Debug, Clone)]
pub struct RawThread {
    /// OS thread id.
    pub id: u32,
    /// Thread name, if assigned.
    pub name: Option<String>,
    /// Scheduling state.
    pub state: ThreadState,
    /// Topmost managed frame, absent outside managed code.
    pub top_frame: Option<RawFrame>,
}

/// A field in a type's layout, offsets already computed by the runtime
/// for the type's layout kind (explicit, sequential, auto).
#[derive(Debug, Clone)]
pub struct RawLayoutField {
    pub name: String,
    pub type_name: String,
    pub offset: u32,
    pub size: u32,
    pub is_reference: bool,
    pub is_static: bool,
}

impl RawLayoutField {
    #[must_use]
    pub fn instance(name: &str, type_name: &str, offset: u32, size: u32, is_reference: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            offset,
            size,
            is_reference,
            is_static: false,
        }
    }
}

/// Raw layout facts for one type.
#[derive(Debug, Clone)]
pub struct RawTypeLayout {
    pub type_name: String,
    /// Full instance size; for reference types this includes the object
    /// header.
    pub total_size: u64,
    pub is_value_type: bool,
    pub base: Option<TypeRef>,
    pub base_name: Option<String>,
    pub fields: Vec<RawLayoutField>,
}

/// One type row from module metadata.
#[derive(Debug, Clone)]
pub struct RawTypeInfo {
    pub token: u32,
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub generic_arity: u32,
}

/// Result of a raw memory read. `bytes.len()` is the actual size; a
/// partial read carries a note explaining the boundary.
#[derive(Debug, Clone)]
pub struct MemoryRead {
    pub bytes: Vec<u8>,
    pub note: Option<String>,
}

/// Process identity returned by attach/launch.
#[derive(Debug, Clone)]
pub struct AttachInfo {
    pub pid: u32,
    pub process_name: String,
    pub runtime_version: String,
}

/// Parameters for launching a target under the debugger.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub path: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub stop_at_entry: bool,
}

/// Stepping granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    In,
    Over,
    Out,
}

/// The pump's answer to a pausing callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Resume the target immediately (silent continue).
    Resume,
    /// Leave the target paused for inspection.
    RemainPaused,
}

/// Reply channel for events whose callback blocks on a decision.
pub type DecisionSender = Sender<ResumeDecision>;

/// Normalized runtime callbacks, delivered in runtime order.
#[derive(Debug, Clone)]
pub enum TargetEventKind {
    /// A native code breakpoint fired.
    BreakpointHit {
        thread_id: u32,
        handle: BindHandle,
        method: MethodToken,
        il_offset: u32,
        module_path: Option<String>,
    },
    /// A previously armed step finished on a thread.
    StepComplete { thread_id: u32, frame: RawFrame },
    /// An exception was raised in the target.
    ExceptionThrown {
        thread_id: u32,
        type_name: String,
        message: String,
        is_first_chance: bool,
        stack_trace: Option<String>,
    },
    /// A module appeared in the target.
    ModuleLoaded(ModuleInfo),
    /// A module disappeared from the target.
    ModuleUnloaded { name: String, path: Option<String> },
    /// The target process finished creating.
    ProcessCreated { pid: u32 },
    /// An application domain was created.
    AppDomainCreated { name: String },
    /// The entry point was reached (launch with stop-at-entry).
    EntryPointReached { thread_id: u32 },
    /// A managed thread started.
    ThreadStarted { thread_id: u32 },
    /// A managed thread exited.
    ThreadExited { thread_id: u32 },
    /// The target process exited.
    ProcessExited { exit_code: i32 },
}

/// One event plus, when the runtime's callback convention requires it,
/// the channel the pump must answer before the callback may return.
#[derive(Debug)]
pub struct TargetEvent {
    pub kind: TargetEventKind,
    pub decision: Option<DecisionSender>,
}

impl TargetEvent {
    /// An event whose callback does not wait for a decision.
    #[must_use]
    pub fn fire_and_forget(kind: TargetEventKind) -> Self {
        Self {
            kind,
            decision: None,
        }
    }
}

/// A fresh runtime plus its event funnel.
pub struct TargetConnection {
    /// The control surface; dropping it releases the underlying
    /// debugging interface.
    pub runtime: Box<dyn TargetRuntime>,
    /// Serialized runtime callbacks.
    pub events: Receiver<TargetEvent>,
}

/// Factory for target connections. Each session acquires its own; a
/// residual interface from a prior session makes subsequent attaches
/// fail, so connections are never reused.
pub trait TargetConnector: Send + Sync {
    /// Acquire a fresh debugging interface.
    fn connect(&self) -> Result<TargetConnection, TargetError>;
}

/// The capability set the core consumes from the runtime's debugging
/// API. Implementations wrap a concrete vendor interface; the scripted
/// harness implements it in memory for tests.
pub trait TargetRuntime: Send + Sync {
    // Session lifetime
    /// Bind to a running process.
    fn attach(&mut self, pid: u32, timeout: Duration) -> Result<AttachInfo, TargetError>;
    /// Start a process under the debugger.
    fn launch(&mut self, request: &LaunchRequest) -> Result<AttachInfo, TargetError>;
    /// Release the target and leave it running.
    fn detach(&mut self) -> Result<(), TargetError>;
    /// Release the target and kill it.
    fn terminate(&mut self) -> Result<(), TargetError>;

    // Modules and binding
    /// Snapshot of currently loaded modules.
    fn list_modules(&self) -> Result<Vec<ModuleInfo>, TargetError>;
    /// Resolve a method token for binding.
    fn function_from_token(
        &self,
        module: &ModuleHandle,
        token: MethodToken,
    ) -> Result<FunctionHandle, TargetError>;
    /// Install a code breakpoint at an IL offset.
    fn create_il_breakpoint(
        &self,
        function: &FunctionHandle,
        il_offset: u32,
    ) -> Result<BindHandle, TargetError>;
    /// Toggle an installed breakpoint.
    fn activate_breakpoint(&self, handle: BindHandle, enabled: bool) -> Result<(), TargetError>;
    /// Release an installed breakpoint.
    fn release_breakpoint(&self, handle: BindHandle) -> Result<(), TargetError>;

    // Execution control
    /// Resume the target.
    fn resume(&self) -> Result<(), TargetError>;
    /// Pause the target; returns the thread the pause landed on.
    fn pause(&self) -> Result<u32, TargetError>;
    /// Arm a stepper on a thread and resume; completion arrives as a
    /// [`TargetEventKind::StepComplete`] event.
    fn step(&self, thread_id: u32, mode: StepMode) -> Result<(), TargetError>;

    // Threads and stacks
    /// All managed threads.
    fn list_threads(&self) -> Result<Vec<RawThread>, TargetError>;
    /// The thread the current pause landed on.
    fn current_thread(&self) -> Result<u32, TargetError>;
    /// Full managed stack depth of a thread.
    fn stack_depth(&self, thread_id: u32) -> Result<usize, TargetError>;
    /// Frames `[start, start+count)` of a thread's stack.
    fn walk_stack(
        &self,
        thread_id: u32,
        start: usize,
        count: usize,
    ) -> Result<Vec<RawFrame>, TargetError>;

    // Frame variables
    /// Local slots of a frame, in declaration order.
    fn read_locals(&self, thread_id: u32, frame: usize)
        -> Result<Vec<(String, RawValue)>, TargetError>;
    /// Argument slots of a frame, in declaration order.
    fn read_arguments(
        &self,
        thread_id: u32,
        frame: usize,
    ) -> Result<Vec<(String, RawValue)>, TargetError>;
    /// The `this` reference of an instance frame.
    fn read_this(&self, thread_id: u32, frame: usize) -> Result<Option<RawValue>, TargetError>;

    // Values and types
    /// All instance and static fields of an object, base classes
    /// included, in layout order.
    fn read_fields(&self, value: &ValueHandle) -> Result<Vec<RawField>, TargetError>;
    /// Only the fields declared on one exact type.
    fn fields_declared(
        &self,
        value: &ValueHandle,
        declaring: &TypeRef,
    ) -> Result<Vec<RawField>, TargetError>;
    /// The base type of a type, resolved across module boundaries.
    fn base_type(&self, type_ref: &TypeRef) -> Result<Option<TypeRef>, TargetError>;
    /// A property getter (`get_Name`) declared on one exact type.
    fn find_getter(
        &self,
        type_ref: &TypeRef,
        property: &str,
    ) -> Result<Option<FunctionHandle>, TargetError>;
    /// Invoke a function in the target on a paused thread.
    fn call_function(
        &self,
        function: &FunctionHandle,
        this: Option<&ValueHandle>,
        thread_id: u32,
        timeout: Duration,
    ) -> Result<RawValue, TargetError>;
    /// Elements of an array value, up to `max`.
    fn array_elements(&self, value: &ValueHandle, max: usize)
        -> Result<Vec<RawValue>, TargetError>;

    // Memory and layout
    /// Read raw memory; short reads succeed with a boundary note.
    fn read_memory(&self, address: u64, size: usize) -> Result<MemoryRead, TargetError>;
    /// Layout facts for a type.
    fn type_layout(&self, type_ref: &TypeRef) -> Result<RawTypeLayout, TargetError>;
    /// Find a type by fully qualified name across loaded modules.
    fn find_type(&self, name: &str) -> Result<Option<TypeRef>, TargetError>;

    // Metadata (module inspector)
    /// All types in a module's metadata.
    fn module_types(&self, module: &ModuleHandle) -> Result<Vec<RawTypeInfo>, TargetError>;
    /// Members of one type from metadata.
    fn type_members(&self, type_ref: &TypeRef) -> Result<MemberList, TargetError>;
}
