//! Core data model: sessions, breakpoints, modules, threads, frames,
//! variables, inspections, and layouts.
//!
//! Everything the external tool server receives derives `Serialize` with
//! camelCase names so results marshal without re-mapping. Opaque native
//! handles never serialize.

#![allow(missing_docs)]

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use netdbg_symbols::MethodToken;

/// Opaque handle to a module inside the target runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// Opaque handle to an installed native code breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindHandle(pub u64);

/// Opaque handle to a live value in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle(pub u64);

/// A type identity, resolvable across module boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Normalized path of the defining module.
    pub module_path: String,
    /// TypeDef token within that module.
    pub token: u32,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Attaching,
    Running,
    Paused,
    Exited,
}

/// How the session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchMode {
    Attach,
    Launch,
}

/// Why the target is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    Breakpoint,
    Step,
    UserPause,
    Exception,
    EntryPoint,
}

/// Read-only snapshot of the session for the `state` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_mode: Option<LaunchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_thread_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// A source position, optionally enriched from symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// Absolute file path with forward slashes.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
}

impl SourceLocation {
    /// A bare `(file, line)` location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
            end_line: None,
            end_column: None,
            function_name: None,
            module_name: None,
        }
    }
}

/// Line breakpoint states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointState {
    /// Registered but not installed in any module.
    Pending,
    /// Installed at an IL offset in a loaded module.
    Bound,
    /// Explicitly disabled; the native breakpoint (if any) is inactive.
    Disabled,
}

/// The native installation of a bound breakpoint.
#[derive(Debug, Clone, Copy)]
pub struct BreakpointBinding {
    pub handle: BindHandle,
    pub method: MethodToken,
    pub il_offset: u32,
}

/// A line breakpoint record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub location: SourceLocation,
    pub state: BreakpointState,
    pub enabled: bool,
    pub verified: bool,
    pub hit_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    #[serde(skip)]
    pub binding: Option<BreakpointBinding>,
}

impl Breakpoint {
    /// A fresh pending breakpoint.
    #[must_use]
    pub fn pending(id: String, location: SourceLocation, condition: Option<String>) -> Self {
        Self {
            id,
            location,
            state: BreakpointState::Pending,
            enabled: true,
            verified: false,
            hit_count: 0,
            condition,
            message: None,
            module_path: None,
            binding: None,
        }
    }
}

/// An exception breakpoint rule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionBreakpoint {
    pub id: String,
    /// Fully qualified exception type name.
    pub exception_type: String,
    pub break_on_first_chance: bool,
    pub break_on_second_chance: bool,
    pub include_subtypes: bool,
    pub enabled: bool,
    /// Always true; the type name is only checked at raise time.
    pub verified: bool,
    pub hit_count: u64,
}

/// Exception details attached to a hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub message: String,
    pub is_first_chance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// One delivered breakpoint (or exception) hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointHit {
    pub breakpoint_id: String,
    pub thread_id: u32,
    /// RFC 3339 timestamp taken when the hit was observed.
    pub timestamp: String,
    pub location: SourceLocation,
    pub hit_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

/// Published whenever a breakpoint changes state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointStateChange {
    pub breakpoint_id: String,
    pub from: BreakpointState,
    pub to: BreakpointState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
}

/// A loaded module in the target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub name: String,
    pub full_name: String,
    /// Absent for dynamic or in-memory modules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub has_symbols: bool,
    pub is_dynamic: bool,
    pub is_in_memory: bool,
    pub base_address: u64,
    pub size: u64,
    #[serde(skip)]
    pub handle: ModuleHandle,
}

/// Thread execution states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreadState {
    Running,
    Stopped,
    Waiting,
    NotStarted,
    Terminated,
}

/// A thread in the target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: ThreadState,
    pub is_current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// One stack frame. Index 0 is the innermost frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub index: u32,
    pub function: String,
    pub module: String,
    /// True when no symbols resolve this frame (including native frames).
    pub is_external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub il_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Variable>>,
}

/// Where a variable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableScope {
    Local,
    Argument,
    This,
    Field,
    Property,
    Element,
}

/// A displayable variable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub type_name: String,
    pub value: String,
    pub scope: VariableScope,
    pub has_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    /// Member-access path that re-resolves this variable, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Result of expression evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub value: String,
    pub type_name: String,
    pub has_children: bool,
}

/// One field inside an object inspection, possibly expanded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDetail {
    pub name: String,
    pub type_name: String,
    pub value: String,
    pub offset: u32,
    pub size: u32,
    pub is_static: bool,
    pub has_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldDetail>,
}

/// A depth-limited object field walk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInspection {
    pub address: u64,
    pub type_name: String,
    pub size: u64,
    pub fields: Vec<FieldDetail>,
    pub is_null: bool,
    pub has_circular_ref: bool,
    pub truncated: bool,
}

/// One field in a type layout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLayout {
    pub name: String,
    pub type_name: String,
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
    pub is_reference: bool,
}

/// An alignment gap between fields.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddingRegion {
    pub offset: u32,
    pub size: u32,
}

/// Computed in-memory layout of a type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeLayout {
    pub type_name: String,
    pub total_size: u64,
    pub header_size: u64,
    pub data_size: u64,
    pub fields: Vec<FieldLayout>,
    pub padding_regions: Vec<PaddingRegion>,
    pub is_value_type: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
}

/// A rendered raw-memory region.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRegion {
    pub address: u64,
    pub requested_size: usize,
    pub actual_size: usize,
    /// Space-separated hex pairs, 16 bytes per line.
    pub hex: String,
    /// Printable ASCII with `.` placeholders, 16 bytes per line.
    pub ascii: String,
    /// Set on partial reads; the read still succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a reference edge connects two objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    Field,
    ArrayElement,
    StaticField,
    WeakReference,
}

/// Which direction of the reference graph to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceDirection {
    Outbound,
    Inbound,
    Both,
}

/// One edge in the reference graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub source_address: u64,
    pub source_type: String,
    pub target_address: u64,
    pub target_type: String,
    /// Member path from the source object (`Home.City`, `[3]`).
    pub path: String,
    pub kind: ReferenceKind,
}

/// Reference enumeration results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceList {
    pub references: Vec<ObjectReference>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Categories of metadata types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Enum,
    Delegate,
}

/// Metadata visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Public,
    Internal,
    Protected,
    Private,
}

/// One type from a module's metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeEntry {
    pub token: u32,
    pub namespace: String,
    pub name: String,
    pub full_name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_sealed: bool,
    /// Number of generic parameters, 0 for non-generic types.
    pub generic_arity: u32,
    pub module: String,
}

/// A page of types grouped under their namespaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeList {
    pub types: Vec<TypeEntry>,
    pub namespaces: Vec<String>,
    pub total: usize,
    /// Opaque token for the next page, absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// One parameter of a method signature.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterEntry {
    pub name: String,
    pub type_name: String,
    pub is_optional: bool,
    pub is_out: bool,
    pub is_ref: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// One method from type metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodEntry {
    pub name: String,
    pub signature: String,
    pub return_type: String,
    pub parameters: Vec<ParameterEntry>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_generic: bool,
}

/// One property from type metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyEntry {
    pub name: String,
    pub type_name: String,
    pub has_getter: bool,
    pub has_setter: bool,
    pub visibility: Visibility,
    pub is_static: bool,
}

/// One field from type metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEntry {
    pub name: String,
    pub type_name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_literal: bool,
}

/// One event from type metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    pub name: String,
    pub type_name: String,
    pub visibility: Visibility,
    pub is_static: bool,
}

/// Members of one type.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberList {
    pub methods: Vec<MethodEntry>,
    pub properties: Vec<PropertyEntry>,
    pub fields: Vec<FieldEntry>,
    pub events: Vec<EventEntry>,
}

/// One method match from a wildcard search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMatch {
    pub type_full_name: String,
    pub method: String,
    pub signature: String,
    pub module: String,
}

/// Wildcard search results across loaded modules.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub types: Vec<TypeEntry>,
    pub methods: Vec<MethodMatch>,
    pub truncated: bool,
}

/// RFC 3339 timestamp for hit records.
#[must_use]
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_serialize_without_native_handles() {
        let mut bp = Breakpoint::pending(
            "bp-1".into(),
            SourceLocation::new("/src/main.cs", 10),
            None,
        );
        bp.binding = Some(BreakpointBinding {
            handle: BindHandle(7),
            method: MethodToken::from_row(1),
            il_offset: 4,
        });
        let json = serde_json::to_value(&bp).unwrap();
        assert_eq!(json["id"], "bp-1");
        assert_eq!(json["state"], "pending");
        assert!(json.get("binding").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn locations_omit_unset_fields() {
        let json = serde_json::to_value(SourceLocation::new("/a.cs", 3)).unwrap();
        assert_eq!(json["line"], 3);
        assert!(json.get("column").is_none());
        assert!(json.get("functionName").is_none());
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let stamp = now_timestamp();
        assert!(stamp.contains('T'));
        assert!(stamp.ends_with('Z') || stamp.contains('+'));
    }
}
