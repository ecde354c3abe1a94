//! `netdbg-core` - managed-runtime debugger core.
//!
//! A long-lived, concurrent, event-driven debugger engine: it attaches
//! to (or launches) a managed process through a runtime-provided
//! debugging capability, keeps a thread-safe model of breakpoints as
//! modules load and unload, maps source lines to IL offsets through
//! `netdbg-symbols`, pumps asynchronous runtime events, and inspects
//! paused state. Transport, process discovery, and the runtime's own
//! debugging implementation live outside this crate behind the
//! [`target::TargetRuntime`] capability.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Break-condition parsing and evaluation.
pub mod condition;
/// Debugger errors.
pub mod error;
/// Scripted target runtime for tests.
pub mod harness;
/// Pending-hit queue.
pub mod hits;
/// Live-state inspection.
pub mod inspect;
/// Operational caps.
pub mod limits;
/// Breakpoint bind/unbind orchestration.
pub mod manager;
/// Memory reads, layout, references.
pub mod memory;
/// Module metadata inspection.
pub mod modules;
/// Breakpoint storage.
pub mod registry;
/// The session controller.
pub mod session;
/// The target runtime façade.
pub mod target;
/// Core data model.
pub mod types;

mod pump;
mod shared;
mod steps;

#[cfg(test)]
mod tests;

pub use condition::{Condition, ConditionContext, ConditionError};
pub use error::{DebugError, TargetError};
pub use hits::WaitOutcome;
pub use inspect::{InspectionEngine, ScopeFilter, StackSlice};
pub use limits::Limits;
pub use manager::{
    BreakpointManager, BreakpointRequest, ExceptionBreakpointRequest, HitDisposition,
};
pub use memory::MemoryEngine;
pub use modules::{MemberQuery, ModuleInspector, SearchKind, TypeQuery};
pub use registry::BreakpointRegistry;
pub use session::DebugSession;
pub use steps::StepWaitError;
pub use target::{
    AttachInfo, LaunchRequest, ResumeDecision, StepMode, TargetConnection, TargetConnector,
    TargetEvent, TargetEventKind, TargetRuntime,
};
