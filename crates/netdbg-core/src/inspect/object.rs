//! Depth-limited object field walks with cycle control.

use rustc_hash::FxHashSet;

use crate::error::DebugError;
use crate::limits::Limits;
use crate::target::{RawField, RawValue, TargetRuntime};
use crate::types::{FieldDetail, ObjectInspection};

use super::format;

struct WalkState<'a> {
    target: &'a dyn TargetRuntime,
    limits: &'a Limits,
    visited: FxHashSet<u64>,
    cycle_seen: bool,
    truncated: bool,
}

/// Expand an object's fields depth-first up to `depth` levels.
///
/// Visited object addresses are tracked; a revisit marks the inspection
/// circular and stops descending that branch. Fan-out past the
/// per-object cap marks it truncated.
pub fn inspect(
    target: &dyn TargetRuntime,
    root: &RawValue,
    depth: u32,
    limits: &Limits,
) -> Result<ObjectInspection, DebugError> {
    if root.is_null() {
        return Ok(ObjectInspection {
            address: 0,
            type_name: root.type_name.clone(),
            size: 0,
            fields: Vec::new(),
            is_null: true,
            has_circular_ref: false,
            truncated: false,
        });
    }

    let mut state = WalkState {
        target,
        limits,
        visited: FxHashSet::default(),
        cycle_seen: false,
        truncated: false,
    };
    if root.address != 0 {
        state.visited.insert(root.address);
    }
    let fields = expand_value(&mut state, root, depth)?;
    Ok(ObjectInspection {
        address: root.address,
        type_name: root.type_name.clone(),
        size: root.size,
        fields,
        is_null: false,
        has_circular_ref: state.cycle_seen,
        truncated: state.truncated,
    })
}

fn expand_value(
    state: &mut WalkState<'_>,
    value: &RawValue,
    depth: u32,
) -> Result<Vec<FieldDetail>, DebugError> {
    if depth == 0 {
        return Ok(Vec::new());
    }
    let Some(handle) = value.handle else {
        return Ok(Vec::new());
    };
    let mut raw_fields = state.target.read_fields(&handle)?;
    if raw_fields.len() > state.limits.max_object_fields {
        raw_fields.truncate(state.limits.max_object_fields);
        state.truncated = true;
    }
    let mut fields = Vec::with_capacity(raw_fields.len());
    for raw in raw_fields {
        fields.push(expand_field(state, &raw, depth)?);
    }
    Ok(fields)
}

fn expand_field(
    state: &mut WalkState<'_>,
    raw: &RawField,
    depth: u32,
) -> Result<FieldDetail, DebugError> {
    let value = &raw.value;
    let expandable = format::has_children(value) && !value.is_null();
    let mut children = Vec::new();
    if expandable && depth > 1 {
        let address = value.address;
        if address != 0 && !state.visited.insert(address) {
            // Revisit: mark and stop descending this branch.
            state.cycle_seen = true;
        } else {
            children = expand_value(state, value, depth - 1)?;
        }
    }
    Ok(FieldDetail {
        name: raw.name.clone(),
        type_name: value.type_name.clone(),
        value: format::format_value(value, state.limits),
        offset: raw.offset,
        size: raw.size,
        is_static: raw.is_static,
        has_children: expandable,
        child_count: format::child_count(value),
        children,
    })
}
