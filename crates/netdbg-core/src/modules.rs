//! Module and metadata inspection.
//!
//! Unlike live inspection this works while the target is running: it
//! only reads module metadata, never values.

#![allow(missing_docs)]

use std::thread;

use glob::Pattern;
use tracing::{debug, warn};

use netdbg_symbols::SymbolMapper;

use crate::error::DebugError;
use crate::limits::Limits;
use crate::target::{RawTypeInfo, TargetRuntime};
use crate::types::{
    MemberList, MethodMatch, ModuleInfo, SearchResults, TypeEntry, TypeList, TypeRef, TypeKind,
    Visibility,
};

/// What a wildcard search should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Types,
    Methods,
    Both,
}

impl SearchKind {
    fn wants_types(self) -> bool {
        matches!(self, SearchKind::Types | SearchKind::Both)
    }

    fn wants_methods(self) -> bool {
        matches!(self, SearchKind::Methods | SearchKind::Both)
    }
}

/// Filters for `types-get`.
#[derive(Debug, Clone, Default)]
pub struct TypeQuery {
    /// Wildcard namespace filter.
    pub namespace: Option<String>,
    /// Restrict to one kind.
    pub kind: Option<TypeKind>,
    /// Restrict to one visibility.
    pub visibility: Option<Visibility>,
    /// Page size; clamped to the configured cap.
    pub max_results: Option<usize>,
    /// Continuation token from a previous page.
    pub continuation: Option<String>,
}

/// Filters for `members-get`.
#[derive(Debug, Clone)]
pub struct MemberQuery {
    pub include_inherited: bool,
    pub include_methods: bool,
    pub include_properties: bool,
    pub include_fields: bool,
    pub include_events: bool,
    pub visibility: Option<Visibility>,
    pub include_static: bool,
    pub include_instance: bool,
}

impl Default for MemberQuery {
    fn default() -> Self {
        Self {
            include_inherited: false,
            include_methods: true,
            include_properties: true,
            include_fields: true,
            include_events: true,
            visibility: None,
            include_static: true,
            include_instance: true,
        }
    }
}

/// Lists modules and enumerates metadata types/members.
pub struct ModuleInspector {
    mapper: SymbolMapper,
    limits: Limits,
}

impl ModuleInspector {
    /// Create an inspector over the shared mapper.
    #[must_use]
    pub fn new(mapper: SymbolMapper, limits: Limits) -> Self {
        Self { mapper, limits }
    }

    /// Snapshot of loaded modules, with symbol availability checked
    /// against the symbol cache.
    pub fn list_modules(
        &self,
        target: &dyn TargetRuntime,
        include_system: bool,
        name_filter: Option<&str>,
    ) -> Result<Vec<ModuleInfo>, DebugError> {
        let pattern = name_filter
            .map(|filter| compile_pattern(filter, false))
            .transpose()?;
        let mut modules = target.list_modules()?;
        modules.retain(|module| {
            if !include_system && is_system_module(&module.name) {
                return false;
            }
            pattern
                .as_ref()
                .is_none_or(|pattern| pattern.matches(&module.name.to_lowercase()))
        });
        for module in &mut modules {
            if let Some(path) = module.path.as_deref() {
                module.has_symbols = module.has_symbols || self.mapper.has_symbols(path);
            }
        }
        Ok(modules)
    }

    /// One page of a module's types, grouped under namespaces.
    pub fn list_types(
        &self,
        target: &dyn TargetRuntime,
        module_name: &str,
        query: &TypeQuery,
    ) -> Result<TypeList, DebugError> {
        let module = find_module(target, module_name)?;
        let namespace_pattern = query
            .namespace
            .as_deref()
            .map(|filter| compile_pattern(filter, false))
            .transpose()?;

        let mut types: Vec<TypeEntry> = target
            .module_types(&module.handle)?
            .into_iter()
            .filter(|info| {
                namespace_pattern
                    .as_ref()
                    .is_none_or(|pattern| pattern.matches(&info.namespace.to_lowercase()))
                    && query.kind.is_none_or(|kind| info.kind == kind)
                    && query
                        .visibility
                        .is_none_or(|visibility| info.visibility == visibility)
            })
            .map(|info| to_type_entry(info, &module.name))
            .collect();
        types.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        let total = types.len();
        let offset = match query.continuation.as_deref() {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                DebugError::InvalidParameter(format!("bad continuation token '{token}'"))
            })?,
        };
        let page_size = query
            .max_results
            .unwrap_or(self.limits.max_search_results)
            .min(self.limits.max_search_results)
            .max(1);
        let page: Vec<TypeEntry> = types
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect();
        let next_offset = offset + page.len();
        let continuation = (next_offset < total).then(|| next_offset.to_string());

        let mut namespaces: Vec<String> = page
            .iter()
            .map(|entry| entry.namespace.clone())
            .filter(|namespace| !namespace.is_empty())
            .collect();
        namespaces.sort();
        namespaces.dedup();

        debug!(module = %module.name, total, page = page.len(), "types listed");
        Ok(TypeList {
            types: page,
            namespaces,
            total,
            continuation,
        })
    }

    /// Members of a named type, optionally walking the base chain.
    pub fn get_members(
        &self,
        target: &dyn TargetRuntime,
        type_name: &str,
        query: &MemberQuery,
    ) -> Result<MemberList, DebugError> {
        let type_ref = target
            .find_type(type_name)?
            .ok_or_else(|| DebugError::TypeNotFound(type_name.to_string()))?;
        let mut merged = MemberList::default();
        let mut current: Option<TypeRef> = Some(type_ref);
        while let Some(type_ref) = current {
            let members = target.type_members(&type_ref)?;
            merged.methods.extend(members.methods);
            merged.properties.extend(members.properties);
            merged.fields.extend(members.fields);
            merged.events.extend(members.events);
            current = if query.include_inherited {
                target.base_type(&type_ref)?
            } else {
                None
            };
        }

        let visibility = query.visibility;
        let keep_static = |is_static: bool| {
            (is_static && query.include_static) || (!is_static && query.include_instance)
        };
        merged.methods.retain(|member| {
            query.include_methods
                && keep_static(member.is_static)
                && visibility.is_none_or(|v| member.visibility == v)
        });
        merged.properties.retain(|member| {
            query.include_properties
                && keep_static(member.is_static)
                && visibility.is_none_or(|v| member.visibility == v)
        });
        merged.fields.retain(|member| {
            query.include_fields
                && keep_static(member.is_static)
                && visibility.is_none_or(|v| member.visibility == v)
        });
        merged.events.retain(|member| {
            query.include_events
                && keep_static(member.is_static)
                && visibility.is_none_or(|v| member.visibility == v)
        });
        Ok(merged)
    }

    /// Wildcard search for types and methods across loaded modules.
    /// Modules are scanned in parallel, one worker each.
    pub fn search(
        &self,
        target: &dyn TargetRuntime,
        pattern: &str,
        kind: SearchKind,
        module_filter: Option<&str>,
        case_sensitive: bool,
        max_results: Option<usize>,
    ) -> Result<SearchResults, DebugError> {
        if pattern.trim().is_empty() {
            return Err(DebugError::InvalidPattern(pattern.to_string()));
        }
        let matcher = compile_pattern(pattern, case_sensitive)?;
        let module_pattern = module_filter
            .map(|filter| compile_pattern(filter, false))
            .transpose()?;
        let max = max_results
            .unwrap_or(self.limits.max_search_results)
            .min(self.limits.max_search_results);

        let modules: Vec<ModuleInfo> = target
            .list_modules()?
            .into_iter()
            .filter(|module| {
                module_pattern
                    .as_ref()
                    .is_none_or(|pattern| pattern.matches(&module.name.to_lowercase()))
            })
            .collect();

        let per_module: Vec<Result<SearchResults, DebugError>> = thread::scope(|scope| {
            let handles: Vec<_> = modules
                .iter()
                .map(|module| {
                    let matcher = &matcher;
                    scope.spawn(move || {
                        search_module(target, module, matcher, kind, case_sensitive, max)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(DebugError::SearchFailed("worker panicked".into())))
                })
                .collect()
        });

        let mut results = SearchResults::default();
        for outcome in per_module {
            match outcome {
                Ok(mut partial) => {
                    results.truncated |= partial.truncated;
                    results.types.append(&mut partial.types);
                    results.methods.append(&mut partial.methods);
                }
                Err(err) => warn!(error = %err, "module search worker failed"),
            }
        }
        if results.types.len() > max {
            results.types.truncate(max);
            results.truncated = true;
        }
        if results.methods.len() > max {
            results.methods.truncate(max);
            results.truncated = true;
        }
        Ok(results)
    }
}

fn search_module(
    target: &dyn TargetRuntime,
    module: &ModuleInfo,
    matcher: &Pattern,
    kind: SearchKind,
    case_sensitive: bool,
    max: usize,
) -> Result<SearchResults, DebugError> {
    let fold = |text: &str| {
        if case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        }
    };
    let mut results = SearchResults::default();
    let types = target.module_types(&module.handle)?;
    for info in &types {
        let full_name = full_type_name(info);
        if kind.wants_types()
            && (matcher.matches(&fold(&info.name)) || matcher.matches(&fold(&full_name)))
        {
            if results.types.len() >= max {
                results.truncated = true;
            } else {
                results.types.push(to_type_entry(info.clone(), &module.name));
            }
        }
        if kind.wants_methods() {
            let type_ref = TypeRef {
                module_path: module.path.clone().unwrap_or_default(),
                token: info.token,
            };
            let members = match target.type_members(&type_ref) {
                Ok(members) => members,
                Err(_) => continue,
            };
            for method in members.methods {
                if !matcher.matches(&fold(&method.name)) {
                    continue;
                }
                if results.methods.len() >= max {
                    results.truncated = true;
                    break;
                }
                results.methods.push(MethodMatch {
                    type_full_name: full_name.clone(),
                    method: method.name,
                    signature: method.signature,
                    module: module.name.clone(),
                });
            }
        }
    }
    Ok(results)
}

fn find_module(
    target: &dyn TargetRuntime,
    module_name: &str,
) -> Result<ModuleInfo, DebugError> {
    let wanted = module_name.to_lowercase();
    target
        .list_modules()?
        .into_iter()
        .find(|module| {
            module.name.to_lowercase() == wanted
                || module.full_name.to_lowercase() == wanted
                || module
                    .path
                    .as_deref()
                    .is_some_and(|path| path.to_lowercase() == wanted)
        })
        .ok_or_else(|| DebugError::ModuleNotFound(module_name.to_string()))
}

fn to_type_entry(info: RawTypeInfo, module: &str) -> TypeEntry {
    let full_name = full_type_name(&info);
    TypeEntry {
        token: info.token,
        namespace: info.namespace,
        name: info.name,
        full_name,
        kind: info.kind,
        visibility: info.visibility,
        is_abstract: info.is_abstract,
        is_sealed: info.is_sealed,
        generic_arity: info.generic_arity,
        module: module.to_string(),
    }
}

fn full_type_name(info: &RawTypeInfo) -> String {
    if info.namespace.is_empty() {
        info.name.clone()
    } else {
        format!("{}.{}", info.namespace, info.name)
    }
}

/// Wildcard pattern (`*` prefix/suffix/both) compiled for matching.
/// Case-insensitive matching lowercases both sides.
fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Pattern, DebugError> {
    let source = if case_sensitive {
        pattern.to_string()
    } else {
        pattern.to_lowercase()
    };
    Pattern::new(&source).map_err(|_| DebugError::InvalidPattern(pattern.to_string()))
}

fn is_system_module(name: &str) -> bool {
    name.starts_with("System.")
        || name.starts_with("Microsoft.")
        || matches!(
            name,
            "System" | "mscorlib" | "netstandard" | "WindowsBase" | "System.Private.CoreLib"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_module_heuristic() {
        assert!(is_system_module("System.Private.CoreLib"));
        assert!(is_system_module("System.Text.Json"));
        assert!(is_system_module("Microsoft.Extensions.Logging"));
        assert!(!is_system_module("MyApp"));
        assert!(!is_system_module("SystemOfADown"));
    }

    #[test]
    fn patterns_support_star_positions() {
        let pattern = compile_pattern("Order*", false).unwrap();
        assert!(pattern.matches("orderservice"));
        assert!(!pattern.matches("myorder"));

        let pattern = compile_pattern("*Service", false).unwrap();
        assert!(pattern.matches("orderservice"));

        let pattern = compile_pattern("*der*", false).unwrap();
        assert!(pattern.matches("orderservice"));
        assert!(!pattern.matches("invoice"));
    }

    #[test]
    fn bad_patterns_are_rejected() {
        assert!(matches!(
            compile_pattern("[", false),
            Err(DebugError::InvalidPattern(_))
        ));
    }

    #[test]
    fn full_names_skip_empty_namespaces() {
        let info = RawTypeInfo {
            token: 1,
            namespace: String::new(),
            name: "Program".into(),
            kind: TypeKind::Class,
            visibility: Visibility::Public,
            is_abstract: false,
            is_sealed: false,
            generic_arity: 0,
        };
        assert_eq!(full_type_name(&info), "Program");
    }
}
