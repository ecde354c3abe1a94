//! Debugger errors.

#![allow(missing_docs)]

use thiserror::Error;

/// Failures reported by the target runtime capability.
#[derive(Debug, Clone, Error)]
pub enum TargetError {
    /// No process with the given pid exists.
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    /// The process exists but hosts no managed runtime.
    #[error("process {0} is not a managed process")]
    NotManaged(u32),

    /// The debugger may not attach to the process.
    #[error("permission denied attaching to process {0}")]
    PermissionDenied(u32),

    /// Attach failed after the process was validated.
    #[error("attach failed: {0}")]
    AttachFailed(String),

    /// The executable path for a launch does not exist.
    #[error("invalid executable path '{0}'")]
    InvalidPath(String),

    /// The target process could not be started.
    #[error("launch failed: {0}")]
    LaunchFailed(String),

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The operation requires a paused target.
    #[error("target is not paused")]
    NotPaused,

    /// The operation requires a running target.
    #[error("target is not running")]
    NotRunning,

    /// The stepper could not be armed or driven.
    #[error("step failed: {0}")]
    StepFailed(String),

    /// No thread with the given id exists.
    #[error("thread {0} not found")]
    InvalidThread(u32),

    /// The frame index is beyond the thread's stack.
    #[error("frame {0} out of range")]
    InvalidFrame(usize),

    /// The address is not mapped in the target.
    #[error("invalid address {0:#x}")]
    InvalidAddress(u64),

    /// The target could not service a memory read.
    #[error("memory read failed: {0}")]
    MemoryReadFailed(String),

    /// A function evaluation inside the target failed.
    #[error("evaluation failed: {0}")]
    EvalFailed(String),

    /// A function evaluation raised an exception in the target.
    #[error("evaluation raised {0}")]
    EvalException(String),

    /// A function evaluation exceeded its deadline.
    #[error("evaluation timed out")]
    EvalTimeout,

    /// The named type does not exist in any loaded module.
    #[error("type '{0}' not found")]
    TypeNotFound(String),

    /// No debug session is connected.
    #[error("no target process")]
    NoProcess,

    /// Catch-all for adapter-internal failures.
    #[error("target runtime error: {0}")]
    Internal(String),
}

/// Operation-facing errors. Every variant carries a stable machine code
/// (see [`DebugError::code`]) alongside the human-readable message.
#[derive(Debug, Clone, Error)]
pub enum DebugError {
    // Preconditions
    #[error("no active debug session")]
    NoSession,
    #[error("target is not paused")]
    NotPaused,
    #[error("target is not running")]
    NotRunning,
    #[error("a debug session is already active")]
    AlreadyAttached,
    #[error("a debug session is already active")]
    SessionActive,

    // Target
    #[error("process {0} not found")]
    ProcessNotFound(u32),
    #[error("process {0} is not a managed process")]
    NotManaged(u32),
    #[error("permission denied attaching to process {0}")]
    PermissionDenied(u32),
    #[error("attach failed: {0}")]
    AttachFailed(String),
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    #[error("invalid executable path '{0}'")]
    InvalidPath(String),

    // Arguments
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid source file '{0}'")]
    InvalidFile(String),
    #[error("invalid line {0}")]
    InvalidLine(u32),
    #[error("invalid column {0}")]
    InvalidColumn(u32),
    #[error("invalid condition at position {position}: {message}")]
    InvalidCondition { position: usize, message: String },
    #[error("thread {0} not found")]
    InvalidThread(u32),
    #[error("frame {0} out of range")]
    InvalidFrame(u32),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("invalid search pattern '{0}'")]
    InvalidPattern(String),
    #[error("invalid object reference: {0}")]
    InvalidReference(String),
    #[error("null reference at '{0}'")]
    NullReference(String),

    // Not found
    #[error("breakpoint '{0}' not found")]
    BreakpointNotFound(String),
    #[error("module '{0}' not found")]
    ModuleNotFound(String),
    #[error("type '{0}' not found")]
    TypeNotFound(String),

    // Resources
    #[error("requested size {requested} exceeds the maximum of {max}")]
    SizeExceeded { requested: usize, max: usize },
    #[error("requested depth {requested} exceeds the maximum of {max}")]
    DepthExceeded { requested: u32, max: u32 },
    #[error("memory read failed: {0}")]
    MemoryReadFailed(String),
    #[error("operation timed out")]
    Timeout,

    // Evaluation
    #[error("syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },
    #[error("evaluation raised {exception_type}")]
    EvalException { exception_type: String },
    #[error("evaluation timed out")]
    EvalTimeout,
    #[error("variable '{0}' is unavailable in this frame")]
    VariableUnavailable(String),
    #[error("member '{segment}' not found on type '{receiver_type}'")]
    MemberNotFound {
        segment: String,
        receiver_type: String,
    },

    // Diagnostics
    #[error("stack walk failed: {0}")]
    StackTraceFailed(String),
    #[error("variable read failed: {0}")]
    VariablesFailed(String),
    #[error("search failed: {0}")]
    SearchFailed(String),
    #[error("enumeration failed: {0}")]
    EnumerationFailed(String),
    #[error("metadata error: {0}")]
    MetadataError(String),
    #[error("step failed: {0}")]
    StepFailed(String),
}

impl DebugError {
    /// Stable machine-readable code for transport layers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            DebugError::NoSession => "no_session",
            DebugError::NotPaused => "not_paused",
            DebugError::NotRunning => "not_running",
            DebugError::AlreadyAttached => "already_attached",
            DebugError::SessionActive => "session_active",
            DebugError::ProcessNotFound(_) => "process_not_found",
            DebugError::NotManaged(_) => "not_managed",
            DebugError::PermissionDenied(_) => "permission_denied",
            DebugError::AttachFailed(_) => "attach_failed",
            DebugError::LaunchFailed(_) => "launch_failed",
            DebugError::InvalidPath(_) => "invalid_path",
            DebugError::InvalidParameter(_) => "invalid_parameter",
            DebugError::InvalidFile(_) => "invalid_file",
            DebugError::InvalidLine(_) => "invalid_line",
            DebugError::InvalidColumn(_) => "invalid_column",
            DebugError::InvalidCondition { .. } => "invalid_condition",
            DebugError::InvalidThread(_) => "invalid_thread",
            DebugError::InvalidFrame(_) => "invalid_frame",
            DebugError::InvalidAddress(_) => "invalid_address",
            DebugError::InvalidPattern(_) => "invalid_pattern",
            DebugError::InvalidReference(_) => "invalid_reference",
            DebugError::NullReference(_) => "null_reference",
            DebugError::BreakpointNotFound(_) => "breakpoint_not_found",
            DebugError::ModuleNotFound(_) => "module_not_found",
            DebugError::TypeNotFound(_) => "type_not_found",
            DebugError::SizeExceeded { .. } => "size_exceeded",
            DebugError::DepthExceeded { .. } => "depth_exceeded",
            DebugError::MemoryReadFailed(_) => "memory_read_failed",
            DebugError::Timeout => "timeout",
            DebugError::SyntaxError { .. } => "syntax_error",
            DebugError::EvalException { .. } => "eval_exception",
            DebugError::EvalTimeout => "eval_timeout",
            DebugError::VariableUnavailable(_) => "variable_unavailable",
            DebugError::MemberNotFound { .. } => "member_not_found",
            DebugError::StackTraceFailed(_) => "stack_trace_failed",
            DebugError::VariablesFailed(_) => "variables_failed",
            DebugError::SearchFailed(_) => "search_failed",
            DebugError::EnumerationFailed(_) => "enumeration_failed",
            DebugError::MetadataError(_) => "metadata_error",
            DebugError::StepFailed(_) => "step_failed",
        }
    }
}

impl From<TargetError> for DebugError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::ProcessNotFound(pid) => DebugError::ProcessNotFound(pid),
            TargetError::NotManaged(pid) => DebugError::NotManaged(pid),
            TargetError::PermissionDenied(pid) => DebugError::PermissionDenied(pid),
            TargetError::AttachFailed(message) => DebugError::AttachFailed(message),
            TargetError::InvalidPath(path) => DebugError::InvalidPath(path),
            TargetError::LaunchFailed(message) => DebugError::LaunchFailed(message),
            TargetError::Timeout => DebugError::Timeout,
            TargetError::NotPaused => DebugError::NotPaused,
            TargetError::NotRunning => DebugError::NotRunning,
            TargetError::StepFailed(message) => DebugError::StepFailed(message),
            TargetError::InvalidThread(id) => DebugError::InvalidThread(id),
            TargetError::InvalidFrame(index) => DebugError::InvalidFrame(index as u32),
            TargetError::InvalidAddress(address) => {
                DebugError::InvalidAddress(format!("{address:#x}"))
            }
            TargetError::MemoryReadFailed(message) => DebugError::MemoryReadFailed(message),
            TargetError::EvalFailed(message) => DebugError::VariablesFailed(message),
            TargetError::EvalException(exception_type) => {
                DebugError::EvalException { exception_type }
            }
            TargetError::EvalTimeout => DebugError::EvalTimeout,
            TargetError::TypeNotFound(name) => DebugError::TypeNotFound(name),
            TargetError::NoProcess => DebugError::NoSession,
            TargetError::Internal(message) => DebugError::EnumerationFailed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_distinct_for_preconditions() {
        assert_eq!(DebugError::NoSession.code(), "no_session");
        assert_eq!(DebugError::NotPaused.code(), "not_paused");
        assert_ne!(
            DebugError::Timeout.code(),
            DebugError::EvalTimeout.code()
        );
    }

    #[test]
    fn target_errors_map_onto_operation_errors() {
        let err: DebugError = TargetError::ProcessNotFound(42).into();
        assert!(matches!(err, DebugError::ProcessNotFound(42)));
        let err: DebugError = TargetError::Timeout.into();
        assert!(matches!(err, DebugError::Timeout));
    }
}
