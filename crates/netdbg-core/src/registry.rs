//! Thread-safe store of line and exception breakpoints.

use std::sync::Mutex;

use indexmap::IndexMap;

use netdbg_symbols::normalize_path;

use crate::error::DebugError;
use crate::types::{BindHandle, Breakpoint, BreakpointState, ExceptionBreakpoint};

#[derive(Debug, Default)]
struct RegistryInner {
    line: IndexMap<String, Breakpoint>,
    exception: IndexMap<String, ExceptionBreakpoint>,
    next_line_id: u64,
    next_exception_id: u64,
}

/// Two-map breakpoint store. Every read hands out a snapshot clone of
/// the entry; updates are atomic per entry under the registry lock.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    inner: Mutex<RegistryInner>,
}

impl BreakpointRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next line-breakpoint id.
    pub fn mint_id(&self) -> String {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.next_line_id += 1;
        format!("bp-{}", inner.next_line_id)
    }

    /// Mint the next exception-breakpoint id.
    pub fn mint_exception_id(&self) -> String {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.next_exception_id += 1;
        format!("ebp-{}", inner.next_exception_id)
    }

    /// Insert or replace a line breakpoint, keyed by id.
    pub fn insert(&self, breakpoint: Breakpoint) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.line.insert(breakpoint.id.clone(), breakpoint);
    }

    /// Snapshot of one line breakpoint.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Breakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.line.get(id).cloned()
    }

    /// Apply an in-place update while holding identity; returns the
    /// updated snapshot.
    pub fn update<F>(&self, id: &str, apply: F) -> Result<Breakpoint, DebugError>
    where
        F: FnOnce(&mut Breakpoint),
    {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let entry = inner
            .line
            .get_mut(id)
            .ok_or_else(|| DebugError::BreakpointNotFound(id.to_string()))?;
        apply(entry);
        Ok(entry.clone())
    }

    /// Remove one line breakpoint, returning its final snapshot.
    pub fn remove(&self, id: &str) -> Option<Breakpoint> {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.line.shift_remove(id)
    }

    /// All line breakpoints, ordered by numeric id.
    #[must_use]
    pub fn list(&self) -> Vec<Breakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        let mut entries: Vec<Breakpoint> = inner.line.values().cloned().collect();
        entries.sort_by_key(|bp| id_ordinal(&bp.id));
        entries
    }

    /// Find the breakpoint at a normalized `(file, line)` pair. The scan
    /// is linear; registries hold hundreds of entries at most.
    #[must_use]
    pub fn find_by_location(&self, file: &str, line: u32) -> Option<Breakpoint> {
        let wanted = normalize_path(file);
        let inner = self.inner.lock().expect("registry poisoned");
        inner
            .line
            .values()
            .find(|bp| bp.location.line == line && normalize_path(&bp.location.file) == wanted)
            .cloned()
    }

    /// Find the breakpoint owning a native bind handle.
    #[must_use]
    pub fn find_by_binding(&self, handle: BindHandle) -> Option<Breakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner
            .line
            .values()
            .find(|bp| bp.binding.is_some_and(|binding| binding.handle == handle))
            .cloned()
    }

    /// All enabled breakpoints still waiting to bind.
    #[must_use]
    pub fn pending(&self) -> Vec<Breakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        let mut entries: Vec<Breakpoint> = inner
            .line
            .values()
            .filter(|bp| bp.enabled && bp.state == BreakpointState::Pending)
            .cloned()
            .collect();
        entries.sort_by_key(|bp| id_ordinal(&bp.id));
        entries
    }

    /// All breakpoints bound into a module.
    #[must_use]
    pub fn bound_for_module(&self, module_path: &str) -> Vec<Breakpoint> {
        let wanted = normalize_path(module_path);
        let inner = self.inner.lock().expect("registry poisoned");
        inner
            .line
            .values()
            .filter(|bp| {
                bp.binding.is_some()
                    && bp
                        .module_path
                        .as_deref()
                        .is_some_and(|path| normalize_path(path) == wanted)
            })
            .cloned()
            .collect()
    }

    /// Insert an exception breakpoint.
    pub fn insert_exception(&self, breakpoint: ExceptionBreakpoint) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner
            .exception
            .insert(breakpoint.id.clone(), breakpoint);
    }

    /// Snapshot of one exception breakpoint.
    #[must_use]
    pub fn get_exception(&self, id: &str) -> Option<ExceptionBreakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.exception.get(id).cloned()
    }

    /// Apply an in-place update to an exception breakpoint.
    pub fn update_exception<F>(&self, id: &str, apply: F) -> Result<ExceptionBreakpoint, DebugError>
    where
        F: FnOnce(&mut ExceptionBreakpoint),
    {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let entry = inner
            .exception
            .get_mut(id)
            .ok_or_else(|| DebugError::BreakpointNotFound(id.to_string()))?;
        apply(entry);
        Ok(entry.clone())
    }

    /// Remove one exception breakpoint.
    pub fn remove_exception(&self, id: &str) -> Option<ExceptionBreakpoint> {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.exception.shift_remove(id)
    }

    /// All exception breakpoints, ordered by numeric id.
    #[must_use]
    pub fn list_exceptions(&self) -> Vec<ExceptionBreakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        let mut entries: Vec<ExceptionBreakpoint> = inner.exception.values().cloned().collect();
        entries.sort_by_key(|bp| id_ordinal(&bp.id));
        entries
    }

    /// Every enabled exception rule matching a thrown type.
    ///
    /// Matching is the documented name heuristic, not a runtime subtype
    /// walk: an exact full-name match always counts; `.Rule` suffix
    /// matches count; with `include_subtypes` a bare `Rule` suffix also
    /// counts (covering simple-name matches, false positives included).
    #[must_use]
    pub fn matching_exception_rules(
        &self,
        thrown_type: &str,
        is_first_chance: bool,
    ) -> Vec<ExceptionBreakpoint> {
        let inner = self.inner.lock().expect("registry poisoned");
        let mut matches: Vec<ExceptionBreakpoint> = inner
            .exception
            .values()
            .filter(|rule| {
                rule.enabled
                    && chance_matches(rule, is_first_chance)
                    && type_matches(thrown_type, &rule.exception_type, rule.include_subtypes)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|rule| id_ordinal(&rule.id));
        matches
    }

    /// Remove everything; returns the native handles that were held.
    pub fn clear_all(&self) -> Vec<BindHandle> {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let handles = inner
            .line
            .values()
            .filter_map(|bp| bp.binding.map(|binding| binding.handle))
            .collect();
        inner.line.clear();
        inner.exception.clear();
        handles
    }

    /// Total number of line breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.line.len()
    }

    /// Whether no line breakpoints exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn chance_matches(rule: &ExceptionBreakpoint, is_first_chance: bool) -> bool {
    if is_first_chance {
        rule.break_on_first_chance
    } else {
        rule.break_on_second_chance
    }
}

fn type_matches(thrown: &str, rule_type: &str, include_subtypes: bool) -> bool {
    if thrown == rule_type {
        return true;
    }
    let dotted = format!(".{rule_type}");
    if thrown.ends_with(&dotted) {
        return true;
    }
    include_subtypes && thrown.ends_with(rule_type)
}

/// Numeric suffix of `bp-N`/`ebp-N` ids, for stable listing order.
fn id_ordinal(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceLocation;

    fn bp(id: &str, file: &str, line: u32) -> Breakpoint {
        Breakpoint::pending(id.into(), SourceLocation::new(file, line), None)
    }

    fn rule(id: &str, ty: &str, subtypes: bool) -> ExceptionBreakpoint {
        ExceptionBreakpoint {
            id: id.into(),
            exception_type: ty.into(),
            break_on_first_chance: true,
            break_on_second_chance: false,
            include_subtypes: subtypes,
            enabled: true,
            verified: true,
            hit_count: 0,
        }
    }

    #[test]
    fn location_lookup_normalizes_paths() {
        let registry = BreakpointRegistry::new();
        registry.insert(bp("bp-1", r"C:\src\Main.cs", 10));
        assert!(registry.find_by_location("c:/SRC/main.cs", 10).is_some());
        assert!(registry.find_by_location("c:/src/main.cs", 11).is_none());
    }

    #[test]
    fn listing_orders_by_numeric_id() {
        let registry = BreakpointRegistry::new();
        registry.insert(bp("bp-10", "/a.cs", 1));
        registry.insert(bp("bp-2", "/b.cs", 2));
        let ids: Vec<String> = registry.list().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["bp-2", "bp-10"]);
    }

    #[test]
    fn update_preserves_identity() {
        let registry = BreakpointRegistry::new();
        registry.insert(bp("bp-1", "/a.cs", 1));
        let updated = registry
            .update("bp-1", |entry| entry.hit_count += 1)
            .unwrap();
        assert_eq!(updated.hit_count, 1);
        assert_eq!(registry.get("bp-1").unwrap().hit_count, 1);
        assert!(registry.update("bp-9", |_| ()).is_err());
    }

    #[test]
    fn pending_excludes_disabled_entries() {
        let registry = BreakpointRegistry::new();
        registry.insert(bp("bp-1", "/a.cs", 1));
        let mut disabled = bp("bp-2", "/b.cs", 2);
        disabled.enabled = false;
        registry.insert(disabled);
        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "bp-1");
    }

    #[test]
    fn exception_matching_honors_chance_flags() {
        let registry = BreakpointRegistry::new();
        registry.insert_exception(rule("ebp-1", "System.ArgumentException", false));
        assert_eq!(
            registry
                .matching_exception_rules("System.ArgumentException", true)
                .len(),
            1
        );
        // Rule is first-chance only.
        assert!(registry
            .matching_exception_rules("System.ArgumentException", false)
            .is_empty());
    }

    #[test]
    fn exception_matching_suffix_policy() {
        let registry = BreakpointRegistry::new();
        registry.insert_exception(rule("ebp-1", "ArgumentException", false));
        registry.insert_exception(rule("ebp-2", "ArgumentException", true));

        // Dotted suffix matches both rules.
        let matched = registry.matching_exception_rules("System.ArgumentException", true);
        assert_eq!(matched.len(), 2);

        // Subtype heuristic: bare suffix only matches the subtype rule,
        // documented false positives included.
        let matched = registry.matching_exception_rules("FooArgumentException", true);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "ebp-2");
    }

    #[test]
    fn overlapping_exception_rules_are_not_deduplicated() {
        let registry = BreakpointRegistry::new();
        registry.insert_exception(rule("ebp-1", "System.Exception", true));
        registry.insert_exception(rule("ebp-2", "System.Exception", true));
        assert_eq!(
            registry
                .matching_exception_rules("System.Exception", true)
                .len(),
            2
        );
    }

    #[test]
    fn clear_all_returns_held_handles() {
        let registry = BreakpointRegistry::new();
        let mut bound = bp("bp-1", "/a.cs", 1);
        bound.binding = Some(crate::types::BreakpointBinding {
            handle: BindHandle(11),
            method: netdbg_symbols::MethodToken::from_row(1),
            il_offset: 0,
        });
        registry.insert(bound);
        registry.insert(bp("bp-2", "/b.cs", 2));
        let handles = registry.clear_all();
        assert_eq!(handles, vec![BindHandle(11)]);
        assert!(registry.is_empty());
        assert!(registry.list_exceptions().is_empty());
    }
}
