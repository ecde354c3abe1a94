//! Breakpoint orchestration: bind/unbind across module load/unload,
//! hit correlation, and condition gating.

use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use netdbg_symbols::SymbolMapper;

use crate::condition::{Condition, ConditionContext};
use crate::error::DebugError;
use crate::registry::BreakpointRegistry;
use crate::target::TargetRuntime;
use crate::types::{
    now_timestamp, Breakpoint, BreakpointBinding, BreakpointHit, BreakpointState,
    BreakpointStateChange, ExceptionBreakpoint, ExceptionInfo, ModuleInfo, SourceLocation,
};

/// Parameters for setting a line breakpoint.
#[derive(Debug, Clone)]
pub struct BreakpointRequest {
    /// Absolute source file path.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// Optional 1-based column.
    pub column: Option<u32>,
    /// Optional break condition.
    pub condition: Option<String>,
}

/// Parameters for setting an exception breakpoint.
#[derive(Debug, Clone)]
pub struct ExceptionBreakpointRequest {
    /// Fully qualified exception type name.
    pub exception_type: String,
    /// Break before any handler runs.
    pub break_on_first_chance: bool,
    /// Break when the exception goes unhandled.
    pub break_on_second_chance: bool,
    /// Also match derived types (by the documented name heuristic).
    pub include_subtypes: bool,
}

/// What the pump should do with a breakpoint-hit callback.
#[derive(Debug)]
pub enum HitDisposition {
    /// Surface the hit and leave the target paused.
    Break(BreakpointHit),
    /// Resume silently (filtered, disabled, or unknown breakpoint).
    Continue,
}

#[derive(Debug, Default)]
struct StateChangeSink {
    tx: Option<Sender<BreakpointStateChange>>,
    buffered: Vec<BreakpointStateChange>,
}

/// Owns the bind choreography and hit-time policy for all breakpoints.
pub struct BreakpointManager {
    registry: Arc<BreakpointRegistry>,
    mapper: SymbolMapper,
    state_changes: Mutex<StateChangeSink>,
}

impl BreakpointManager {
    /// Create a manager over the shared registry and symbol mapper.
    #[must_use]
    pub fn new(registry: Arc<BreakpointRegistry>, mapper: SymbolMapper) -> Self {
        Self {
            registry,
            mapper,
            state_changes: Mutex::new(StateChangeSink::default()),
        }
    }

    /// The registry this manager operates on.
    #[must_use]
    pub fn registry(&self) -> &Arc<BreakpointRegistry> {
        &self.registry
    }

    /// Stream state changes to a sender instead of buffering.
    pub fn set_state_sender(&self, tx: Sender<BreakpointStateChange>) {
        let mut sink = self.state_changes.lock().expect("state sink poisoned");
        sink.tx = Some(tx);
    }

    /// Drain buffered state changes.
    #[must_use]
    pub fn drain_state_changes(&self) -> Vec<BreakpointStateChange> {
        let mut sink = self.state_changes.lock().expect("state sink poisoned");
        std::mem::take(&mut sink.buffered)
    }

    fn emit_state_change(&self, change: BreakpointStateChange) {
        let mut sink = self.state_changes.lock().expect("state sink poisoned");
        if let Some(tx) = &sink.tx {
            if tx.send(change.clone()).is_ok() {
                return;
            }
            sink.tx = None;
        }
        sink.buffered.push(change);
    }

    /// Set (or idempotently re-set) a line breakpoint.
    ///
    /// The condition is validated first. An existing breakpoint at the
    /// normalized `(file, line)` is returned unchanged unless the
    /// condition differs, in which case only the condition updates.
    /// Fresh breakpoints immediately attempt to bind against the loaded
    /// modules when a session is active.
    pub fn set_breakpoint(
        &self,
        target: Option<&dyn TargetRuntime>,
        modules: &[ModuleInfo],
        request: &BreakpointRequest,
    ) -> Result<Breakpoint, DebugError> {
        if let Some(condition) = request.condition.as_deref() {
            Condition::validate(condition)?;
        }

        if let Some(existing) = self.registry.find_by_location(&request.file, request.line) {
            if existing.condition != request.condition {
                return self
                    .registry
                    .update(&existing.id, |entry| {
                        entry.condition = request.condition.clone();
                    });
            }
            return Ok(existing);
        }

        let id = self.registry.mint_id();
        let mut location = SourceLocation::new(request.file.clone(), request.line);
        location.column = request.column;
        let breakpoint = Breakpoint::pending(id.clone(), location, request.condition.clone());
        self.registry.insert(breakpoint);
        debug!(id = %id, file = %request.file, line = request.line, "breakpoint registered");

        if let Some(target) = target {
            for module in modules {
                if self.try_bind(target, module, &id) {
                    break;
                }
            }
        }
        self.registry
            .get(&id)
            .ok_or_else(|| DebugError::BreakpointNotFound(id))
    }

    /// Module-load handler: bind every enabled pending breakpoint whose
    /// source lives in the new module.
    pub fn bind_module_loaded(&self, target: &dyn TargetRuntime, module: &ModuleInfo) {
        if module.is_dynamic || module.is_in_memory {
            return;
        }
        for breakpoint in self.registry.pending() {
            self.try_bind(target, module, &breakpoint.id);
        }
    }

    /// Module-unload handler: deactivate and release every binding in
    /// the departing module, returning the breakpoints to Pending.
    pub fn unbind_module_unloaded(
        &self,
        target: Option<&dyn TargetRuntime>,
        module_name: &str,
        module_path: Option<&str>,
    ) {
        let Some(path) = module_path else {
            return;
        };
        for breakpoint in self.registry.bound_for_module(path) {
            if let (Some(target), Some(binding)) = (target, breakpoint.binding) {
                // The module may already be gone; both calls are
                // best-effort.
                if let Err(err) = target.activate_breakpoint(binding.handle, false) {
                    debug!(id = %breakpoint.id, error = %err, "deactivate on unload failed");
                }
                if let Err(err) = target.release_breakpoint(binding.handle) {
                    debug!(id = %breakpoint.id, error = %err, "release on unload failed");
                }
            }
            let from = breakpoint.state;
            let updated = self.registry.update(&breakpoint.id, |entry| {
                entry.state = BreakpointState::Pending;
                entry.verified = false;
                entry.binding = None;
                entry.module_path = None;
                entry.message = Some(format!(
                    "Module {module_name} unloaded; will rebind on reload"
                ));
            });
            if updated.is_ok() {
                self.emit_state_change(BreakpointStateChange {
                    breakpoint_id: breakpoint.id,
                    from,
                    to: BreakpointState::Pending,
                    module_path: Some(path.to_string()),
                });
            }
        }
    }

    /// Attempt to bind one breakpoint into one module. Returns true when
    /// the breakpoint ends up Bound.
    fn try_bind(&self, target: &dyn TargetRuntime, module: &ModuleInfo, id: &str) -> bool {
        let Some(breakpoint) = self.registry.get(id) else {
            return false;
        };
        if breakpoint.state != BreakpointState::Pending || !breakpoint.enabled {
            return false;
        }
        if module.is_dynamic || module.is_in_memory {
            return false;
        }
        let Some(module_path) = module.path.as_deref() else {
            return false;
        };
        if !self
            .mapper
            .contains_source_file(module_path, &breakpoint.location.file)
        {
            return false;
        }

        let resolved = self.mapper.find_il_offset(
            module_path,
            &breakpoint.location.file,
            breakpoint.location.line,
            breakpoint.location.column,
        );
        let Some(resolved) = resolved else {
            let _ = self.registry.update(id, |entry| {
                entry.message = Some(format!(
                    "no executable code at line {}",
                    breakpoint.location.line
                ));
            });
            return false;
        };

        let bound = target
            .function_from_token(&module.handle, resolved.method)
            .and_then(|function| target.create_il_breakpoint(&function, resolved.il_offset))
            .and_then(|handle| {
                target
                    .activate_breakpoint(handle, true)
                    .map(|()| handle)
            });
        let handle = match bound {
            Ok(handle) => handle,
            Err(err) => {
                warn!(id = %id, module = %module_path, error = %err, "bind failed");
                let _ = self.registry.update(id, |entry| {
                    entry.message = Some(format!("bind failed: {err}"));
                });
                return false;
            }
        };

        let module_path_owned = module_path.to_string();
        let module_name = module.name.clone();
        let updated = self.registry.update(id, |entry| {
            entry.state = BreakpointState::Bound;
            entry.verified = true;
            entry.module_path = Some(module_path_owned.clone());
            entry.binding = Some(BreakpointBinding {
                handle,
                method: resolved.method,
                il_offset: resolved.il_offset,
            });
            entry.message = None;
            entry.location.line = resolved.span.start_line;
            entry.location.column = Some(resolved.span.start_column);
            entry.location.end_line = Some(resolved.span.end_line);
            entry.location.end_column = Some(resolved.span.end_column);
            entry.location.module_name = Some(module_name.clone());
        });
        if updated.is_err() {
            // Removed concurrently; give the handle back.
            let _ = target.release_breakpoint(handle);
            return false;
        }
        debug!(id = %id, module = %module_path, il_offset = resolved.il_offset, "breakpoint bound");
        self.emit_state_change(BreakpointStateChange {
            breakpoint_id: id.to_string(),
            from: BreakpointState::Pending,
            to: BreakpointState::Bound,
            module_path: Some(module_path.to_string()),
        });
        true
    }

    /// Remove a breakpoint (line or exception) by id, releasing any
    /// native handle.
    pub fn remove_breakpoint(
        &self,
        target: Option<&dyn TargetRuntime>,
        id: &str,
    ) -> Result<(), DebugError> {
        if let Some(removed) = self.registry.remove(id) {
            if let (Some(target), Some(binding)) = (target, removed.binding) {
                let _ = target.activate_breakpoint(binding.handle, false);
                let _ = target.release_breakpoint(binding.handle);
            }
            return Ok(());
        }
        if self.registry.remove_exception(id).is_some() {
            return Ok(());
        }
        Err(DebugError::BreakpointNotFound(id.to_string()))
    }

    /// Enable or disable a line breakpoint without removing it. A bound
    /// breakpoint keeps its native handle; only its activation toggles.
    pub fn set_enabled(
        &self,
        target: Option<&dyn TargetRuntime>,
        id: &str,
        enabled: bool,
    ) -> Result<Breakpoint, DebugError> {
        let current = self
            .registry
            .get(id)
            .ok_or_else(|| DebugError::BreakpointNotFound(id.to_string()))?;
        if let (Some(target), Some(binding)) = (target, current.binding) {
            if let Err(err) = target.activate_breakpoint(binding.handle, enabled) {
                warn!(id = %id, error = %err, "activation toggle failed");
            }
        }
        let from = current.state;
        let updated = self.registry.update(id, |entry| {
            entry.enabled = enabled;
            entry.state = match (enabled, entry.binding.is_some()) {
                (false, _) => BreakpointState::Disabled,
                (true, true) => BreakpointState::Bound,
                (true, false) => BreakpointState::Pending,
            };
        })?;
        if updated.state != from {
            self.emit_state_change(BreakpointStateChange {
                breakpoint_id: id.to_string(),
                from,
                to: updated.state,
                module_path: updated.module_path.clone(),
            });
        }
        Ok(updated)
    }

    /// Register an exception breakpoint rule. Rules are never
    /// de-duplicated; overlapping scopes are allowed.
    pub fn set_exception_breakpoint(
        &self,
        request: &ExceptionBreakpointRequest,
    ) -> ExceptionBreakpoint {
        let id = self.registry.mint_exception_id();
        let rule = ExceptionBreakpoint {
            id: id.clone(),
            exception_type: request.exception_type.clone(),
            break_on_first_chance: request.break_on_first_chance,
            break_on_second_chance: request.break_on_second_chance,
            include_subtypes: request.include_subtypes,
            enabled: true,
            verified: true,
            hit_count: 0,
        };
        self.registry.insert_exception(rule.clone());
        debug!(id = %id, exception_type = %request.exception_type, "exception breakpoint registered");
        rule
    }

    /// Remove every breakpoint, releasing held native handles.
    pub fn clear_all(&self, target: Option<&dyn TargetRuntime>) {
        let handles = self.registry.clear_all();
        if let Some(target) = target {
            for handle in handles {
                let _ = target.activate_breakpoint(handle, false);
                let _ = target.release_breakpoint(handle);
            }
        }
    }

    /// Session teardown: release all native handles (best-effort) and
    /// return every breakpoint to Pending so the next attach rebinds.
    pub fn teardown(&self, target: Option<&dyn TargetRuntime>) {
        for breakpoint in self.registry.list() {
            let Some(binding) = breakpoint.binding else {
                continue;
            };
            if let Some(target) = target {
                let _ = target.activate_breakpoint(binding.handle, false);
                let _ = target.release_breakpoint(binding.handle);
            }
            let from = breakpoint.state;
            let updated = self.registry.update(&breakpoint.id, |entry| {
                if entry.state == BreakpointState::Bound {
                    entry.state = BreakpointState::Pending;
                }
                entry.verified = false;
                entry.binding = None;
                entry.module_path = None;
            });
            if let Ok(updated) = updated {
                if updated.state != from {
                    self.emit_state_change(BreakpointStateChange {
                        breakpoint_id: breakpoint.id,
                        from,
                        to: updated.state,
                        module_path: None,
                    });
                }
            }
        }
    }

    /// Breakpoint-hit policy: correlate the native handle back to a
    /// breakpoint, commit the hit count, then apply the condition.
    /// A condition that fails to evaluate breaks (so the user sees the
    /// failure) and records the diagnostic on the breakpoint.
    pub fn on_breakpoint_hit(
        &self,
        thread_id: u32,
        handle: crate::types::BindHandle,
        method: netdbg_symbols::MethodToken,
        il_offset: u32,
        module_path: Option<&str>,
    ) -> HitDisposition {
        let resolved = module_path
            .and_then(|path| self.mapper.find_source_location(path, method, il_offset));

        let breakpoint = self.registry.find_by_binding(handle).or_else(|| {
            resolved
                .as_ref()
                .and_then(|loc| self.registry.find_by_location(&loc.file, loc.line))
        });
        let Some(breakpoint) = breakpoint else {
            debug!(handle = handle.0, "hit for unknown breakpoint; continuing");
            return HitDisposition::Continue;
        };
        if !breakpoint.enabled {
            return HitDisposition::Continue;
        }

        // The increment commits before the condition runs so the
        // condition observes the current count.
        let Ok(updated) = self.registry.update(&breakpoint.id, |entry| {
            entry.hit_count = entry.hit_count.saturating_add(1);
        }) else {
            return HitDisposition::Continue;
        };

        let location = resolved.map_or_else(
            || breakpoint.location.clone(),
            |loc| {
                let mut location = SourceLocation::new(loc.file, loc.line);
                location.column = Some(loc.column);
                location.end_line = Some(loc.end_line);
                location.end_column = Some(loc.end_column);
                location.module_name = breakpoint.location.module_name.clone();
                location
            },
        );

        if let Some(condition) = updated.condition.as_deref() {
            let ctx = ConditionContext {
                hit_count: updated.hit_count,
                thread_id,
            };
            match Condition::parse(condition).and_then(|parsed| parsed.evaluate(&ctx)) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = %updated.id, hit_count = updated.hit_count, "condition false; silent continue");
                    return HitDisposition::Continue;
                }
                Err(err) => {
                    warn!(id = %updated.id, error = %err, "condition evaluation failed; breaking");
                    let _ = self.registry.update(&updated.id, |entry| {
                        entry.message = Some(format!("condition failed: {err}"));
                    });
                }
            }
        }

        HitDisposition::Break(BreakpointHit {
            breakpoint_id: updated.id,
            thread_id,
            timestamp: now_timestamp(),
            location,
            hit_count: updated.hit_count,
            exception: None,
        })
    }

    /// Exception policy: one hit per matching rule, each with its own
    /// committed hit count.
    pub fn on_exception(
        &self,
        thread_id: u32,
        type_name: &str,
        message: &str,
        is_first_chance: bool,
        stack_trace: Option<&str>,
        location: Option<SourceLocation>,
    ) -> Vec<BreakpointHit> {
        let rules = self
            .registry
            .matching_exception_rules(type_name, is_first_chance);
        let mut hits = Vec::with_capacity(rules.len());
        for rule in rules {
            let Ok(updated) = self.registry.update_exception(&rule.id, |entry| {
                entry.hit_count = entry.hit_count.saturating_add(1);
            }) else {
                continue;
            };
            hits.push(BreakpointHit {
                breakpoint_id: updated.id,
                thread_id,
                timestamp: now_timestamp(),
                location: location
                    .clone()
                    .unwrap_or_else(|| SourceLocation::new("<unknown>", 0)),
                hit_count: updated.hit_count,
                exception: Some(ExceptionInfo {
                    exception_type: type_name.to_string(),
                    message: message.to_string(),
                    is_first_chance,
                    stack_trace: stack_trace.map(str::to_string),
                }),
            });
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BindHandle;
    use netdbg_symbols::{MethodToken, SymbolCache};

    fn manager() -> BreakpointManager {
        let registry = Arc::new(BreakpointRegistry::new());
        let mapper = SymbolMapper::new(Arc::new(SymbolCache::new()));
        BreakpointManager::new(registry, mapper)
    }

    fn request(file: &str, line: u32, condition: Option<&str>) -> BreakpointRequest {
        BreakpointRequest {
            file: file.into(),
            line,
            column: None,
            condition: condition.map(str::to_string),
        }
    }

    #[test]
    fn set_is_idempotent_per_location() {
        let manager = manager();
        let first = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, None))
            .unwrap();
        let second = manager
            .set_breakpoint(None, &[], &request("/SRC/MAIN.CS", 10, None))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.registry().len(), 1);
    }

    #[test]
    fn re_set_with_new_condition_updates_in_place() {
        let manager = manager();
        let first = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, None))
            .unwrap();
        let second = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, Some("hitCount > 2")))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.condition.as_deref(), Some("hitCount > 2"));
        assert_eq!(manager.registry().len(), 1);
    }

    #[test]
    fn invalid_condition_rejects_the_set() {
        let manager = manager();
        let err = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, Some("x ==")))
            .unwrap_err();
        assert!(matches!(err, DebugError::InvalidCondition { .. }));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn breakpoints_set_without_session_stay_pending() {
        let manager = manager();
        let bp = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, None))
            .unwrap();
        assert_eq!(bp.state, BreakpointState::Pending);
        assert!(!bp.verified);
    }

    #[test]
    fn unknown_hits_continue_silently() {
        let manager = manager();
        let disposition = manager.on_breakpoint_hit(
            1,
            BindHandle(99),
            MethodToken::from_row(1),
            0,
            None,
        );
        assert!(matches!(disposition, HitDisposition::Continue));
    }

    #[test]
    fn exception_hits_carry_rule_ids_and_counts() {
        let manager = manager();
        let rule = manager.set_exception_breakpoint(&ExceptionBreakpointRequest {
            exception_type: "System.ArgumentException".into(),
            break_on_first_chance: true,
            break_on_second_chance: false,
            include_subtypes: true,
        });

        let hits = manager.on_exception(
            7,
            "System.ArgumentNullException",
            "value was null",
            true,
            None,
            None,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].breakpoint_id, rule.id);
        assert_eq!(hits[0].hit_count, 1);
        let info = hits[0].exception.as_ref().unwrap();
        assert_eq!(info.exception_type, "System.ArgumentNullException");
        assert!(info.is_first_chance);

        // Second-chance events do not match a first-chance-only rule.
        assert!(manager
            .on_exception(7, "System.ArgumentNullException", "", false, None, None)
            .is_empty());
    }

    #[test]
    fn enable_toggle_transitions_states() {
        let manager = manager();
        let bp = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, None))
            .unwrap();
        let disabled = manager.set_enabled(None, &bp.id, false).unwrap();
        assert_eq!(disabled.state, BreakpointState::Disabled);
        let enabled = manager.set_enabled(None, &bp.id, true).unwrap();
        assert_eq!(enabled.state, BreakpointState::Pending);
    }

    #[test]
    fn state_changes_buffer_until_drained() {
        let manager = manager();
        let bp = manager
            .set_breakpoint(None, &[], &request("/src/Main.cs", 10, None))
            .unwrap();
        let _ = manager.set_enabled(None, &bp.id, false);
        let changes = manager.drain_state_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, BreakpointState::Disabled);
        assert!(manager.drain_state_changes().is_empty());
    }
}
