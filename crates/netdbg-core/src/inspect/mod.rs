//! Live-state inspection while the target is paused.

#![allow(missing_docs)]

/// Member-access expression resolution.
pub mod expr;
/// Value display formatting.
pub mod format;
/// Object field walks.
pub mod object;

use std::time::Duration;

use netdbg_symbols::SymbolMapper;

use crate::error::DebugError;
use crate::limits::Limits;
use crate::target::{RawFrame, RawValue, TargetRuntime};
use crate::types::{
    EvaluationResult, ObjectInspection, SourceLocation, StackFrame, ThreadInfo, Variable,
    VariableScope,
};

/// Which variable scopes to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Locals,
    Arguments,
    This,
    All,
}

impl ScopeFilter {
    fn wants_arguments(self) -> bool {
        matches!(self, ScopeFilter::Arguments | ScopeFilter::All)
    }

    fn wants_locals(self) -> bool {
        matches!(self, ScopeFilter::Locals | ScopeFilter::All)
    }

    fn wants_this(self) -> bool {
        matches!(self, ScopeFilter::This | ScopeFilter::All)
    }
}

/// A returned stack slice plus the stack's full depth.
#[derive(Debug, Clone)]
pub struct StackSlice {
    /// The thread that was walked.
    pub thread_id: u32,
    /// Full managed stack depth, not the slice length.
    pub total_frames: usize,
    /// The requested frames.
    pub frames: Vec<StackFrame>,
}

/// Resolve a raw frame to a source location through symbols.
pub(crate) fn frame_location(mapper: &SymbolMapper, frame: &RawFrame) -> Option<SourceLocation> {
    let module_path = frame.module_path.as_deref()?;
    let method = frame.method?;
    let il_offset = frame.il_offset?;
    let resolved = mapper.find_source_location(module_path, method, il_offset)?;
    let mut location = SourceLocation::new(resolved.file, resolved.line);
    location.column = Some(resolved.column);
    location.end_line = Some(resolved.end_line);
    location.end_column = Some(resolved.end_column);
    location.function_name = Some(frame.function.clone());
    location.module_name = Some(frame.module_name.clone());
    Some(location)
}

/// Reads threads, stacks, and variables from a paused target.
pub struct InspectionEngine {
    mapper: SymbolMapper,
    limits: Limits,
}

impl InspectionEngine {
    /// Create an engine over the shared mapper.
    #[must_use]
    pub fn new(mapper: SymbolMapper, limits: Limits) -> Self {
        Self { mapper, limits }
    }

    /// All managed threads. `current_thread` marks the thread the pause
    /// landed on; threads outside managed code report no location.
    pub fn threads(
        &self,
        target: &dyn TargetRuntime,
        current_thread: Option<u32>,
    ) -> Result<Vec<ThreadInfo>, DebugError> {
        let raw = target.list_threads()?;
        Ok(raw
            .into_iter()
            .map(|thread| {
                let location = thread
                    .top_frame
                    .as_ref()
                    .and_then(|frame| frame_location(&self.mapper, frame));
                ThreadInfo {
                    id: thread.id,
                    name: thread.name,
                    state: thread.state,
                    is_current: current_thread == Some(thread.id),
                    location,
                }
            })
            .collect())
    }

    /// Walk `[start, start+max)` frames of a thread's stack. Frames
    /// without symbols (native frames included) come back external with
    /// no source location.
    pub fn stack(
        &self,
        target: &dyn TargetRuntime,
        thread_id: u32,
        start: usize,
        max_frames: Option<usize>,
        include_arguments: bool,
    ) -> Result<StackSlice, DebugError> {
        let count = max_frames
            .unwrap_or(self.limits.default_stack_frames)
            .min(self.limits.max_stack_frames);
        let total_frames = target.stack_depth(thread_id)?;
        let raw_frames = target.walk_stack(thread_id, start, count)?;
        let mut frames = Vec::with_capacity(raw_frames.len());
        for (offset, raw) in raw_frames.iter().enumerate() {
            let index = start + offset;
            let location = frame_location(&self.mapper, raw);
            let has_symbols = raw
                .module_path
                .as_deref()
                .is_some_and(|path| self.mapper.has_symbols(path));
            let arguments = if include_arguments && !raw.is_native {
                target
                    .read_arguments(thread_id, index)
                    .ok()
                    .map(|args| self.to_variables(args, VariableScope::Argument))
            } else {
                None
            };
            frames.push(StackFrame {
                index: index as u32,
                function: raw.function.clone(),
                module: raw.module_name.clone(),
                is_external: raw.is_native || !has_symbols,
                il_offset: raw.il_offset,
                location,
                arguments,
            });
        }
        Ok(StackSlice {
            thread_id,
            total_frames,
            frames,
        })
    }

    /// Variables of one frame: arguments, locals, and `this` per the
    /// scope filter, in declaration order.
    pub fn variables(
        &self,
        target: &dyn TargetRuntime,
        thread_id: u32,
        frame: usize,
        scope: ScopeFilter,
    ) -> Result<Vec<Variable>, DebugError> {
        let mut variables = Vec::new();
        if scope.wants_arguments() {
            let arguments = target.read_arguments(thread_id, frame)?;
            variables.extend(self.to_variables(arguments, VariableScope::Argument));
        }
        if scope.wants_locals() {
            let locals = target.read_locals(thread_id, frame)?;
            variables.extend(self.to_variables(locals, VariableScope::Local));
        }
        if scope.wants_this() {
            if let Some(value) = target.read_this(thread_id, frame)? {
                variables.push(self.to_variable("this".to_string(), &value, VariableScope::This));
            }
        }
        Ok(variables)
    }

    /// Evaluate a member-access expression in a frame.
    pub fn evaluate(
        &self,
        target: &dyn TargetRuntime,
        expression: &str,
        thread_id: u32,
        frame: usize,
        timeout: Option<Duration>,
    ) -> Result<EvaluationResult, DebugError> {
        let timeout = timeout.unwrap_or(self.limits.eval_timeout());
        let value = expr::resolve(target, thread_id, frame, expression, timeout)?;
        Ok(EvaluationResult {
            value: format::format_value(&value, &self.limits),
            type_name: value.type_name.clone(),
            has_children: format::has_children(&value),
        })
    }

    /// Resolve an expression to an object and expand its fields.
    pub fn inspect_object(
        &self,
        target: &dyn TargetRuntime,
        expression: &str,
        depth: Option<u32>,
        thread_id: u32,
        frame: usize,
    ) -> Result<ObjectInspection, DebugError> {
        let depth = depth.unwrap_or(self.limits.default_inspect_depth);
        if depth == 0 || depth > self.limits.max_inspect_depth {
            return Err(DebugError::DepthExceeded {
                requested: depth,
                max: self.limits.max_inspect_depth,
            });
        }
        let root = expr::resolve(target, thread_id, frame, expression, self.limits.eval_timeout())?;
        object::inspect(target, &root, depth, &self.limits)
    }

    /// Resolve an expression to its raw value (shared with the memory
    /// and reference engines).
    pub(crate) fn resolve_expression(
        &self,
        target: &dyn TargetRuntime,
        expression: &str,
        thread_id: u32,
        frame: usize,
    ) -> Result<RawValue, DebugError> {
        expr::resolve(target, thread_id, frame, expression, self.limits.eval_timeout())
    }

    fn to_variables(
        &self,
        values: Vec<(String, RawValue)>,
        scope: VariableScope,
    ) -> Vec<Variable> {
        values
            .into_iter()
            .map(|(name, value)| self.to_variable(name, &value, scope))
            .collect()
    }

    fn to_variable(&self, name: String, value: &RawValue, scope: VariableScope) -> Variable {
        Variable {
            path: Some(name.clone()),
            name,
            type_name: value.type_name.clone(),
            value: format::format_value(value, &self.limits),
            scope,
            has_children: format::has_children(value),
            child_count: format::child_count(value),
        }
    }
}
