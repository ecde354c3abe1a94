//! Raw memory reads, type layout, and outbound reference enumeration.

use tracing::debug;

use crate::error::DebugError;
use crate::inspect::InspectionEngine;
use crate::limits::Limits;
use crate::target::{RawValueKind, TargetRuntime};
use crate::types::{
    FieldLayout, MemoryRegion, ObjectReference, PaddingRegion, ReferenceDirection, ReferenceKind,
    ReferenceList, TypeLayout, TypeRef,
};

/// Object header + method-table pointer on 64-bit targets.
const REFERENCE_HEADER_SIZE: u64 = 16;
const BYTES_PER_LINE: usize = 16;

/// Serves `memory-read`, `layout-get`, and `references-get`.
pub struct MemoryEngine {
    limits: Limits,
}

impl MemoryEngine {
    /// Create an engine with the given caps.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Read raw target memory at a hex (`0x…`) or decimal address.
    /// Partial reads succeed with `actual_size < requested_size` and a
    /// boundary note.
    pub fn read(
        &self,
        target: &dyn TargetRuntime,
        address: &str,
        size: Option<usize>,
    ) -> Result<MemoryRegion, DebugError> {
        let address = parse_address(address)?;
        let requested_size = size.unwrap_or(self.limits.default_memory_read);
        if requested_size > self.limits.max_memory_read {
            return Err(DebugError::SizeExceeded {
                requested: requested_size,
                max: self.limits.max_memory_read,
            });
        }
        let read = target.read_memory(address, requested_size)?;
        let actual_size = read.bytes.len();
        debug!(address, requested_size, actual_size, "memory read");
        Ok(MemoryRegion {
            address,
            requested_size,
            actual_size,
            hex: render_hex(&read.bytes),
            ascii: render_ascii(&read.bytes),
            error: read.note,
        })
    }

    /// Layout of a type named directly or taken from an object-ref
    /// expression. Offsets come from the runtime (which knows the
    /// type's layout kind); this engine derives header/data split and
    /// the padding regions between fields.
    pub fn layout(
        &self,
        target: &dyn TargetRuntime,
        inspection: &InspectionEngine,
        type_name_or_ref: &str,
        include_inherited: bool,
        include_padding: bool,
        thread_id: u32,
        frame: usize,
    ) -> Result<TypeLayout, DebugError> {
        let type_ref = self.resolve_type(
            target,
            inspection,
            type_name_or_ref,
            thread_id,
            frame,
        )?;
        let mut chain = Vec::new();
        let mut current = Some(type_ref);
        while let Some(type_ref) = current {
            let layout = target.type_layout(&type_ref)?;
            current = if include_inherited {
                layout.base.clone()
            } else {
                None
            };
            chain.push(layout);
        }
        // Base-most first so fields appear in inheritance order.
        chain.reverse();
        let derived = chain.last().expect("chain has at least one layout");
        let type_name = derived.type_name.clone();
        let is_value_type = derived.is_value_type;
        let base_type = chain.last().and_then(|layout| layout.base_name.clone());
        let total_size = derived.total_size;
        let header_size = if is_value_type {
            0
        } else {
            REFERENCE_HEADER_SIZE
        };

        let mut fields: Vec<FieldLayout> = chain
            .iter()
            .flat_map(|layout| layout.fields.iter())
            .filter(|field| !field.is_static)
            .map(|field| FieldLayout {
                name: field.name.clone(),
                type_name: field.type_name.clone(),
                offset: field.offset,
                size: field.size,
                alignment: natural_alignment(field.size),
                is_reference: field.is_reference,
            })
            .collect();
        fields.sort_by_key(|field| field.offset);

        let padding_regions = if include_padding {
            padding_between(&fields)
        } else {
            Vec::new()
        };

        Ok(TypeLayout {
            type_name,
            total_size,
            header_size,
            data_size: total_size.saturating_sub(header_size),
            fields,
            padding_regions,
            is_value_type,
            base_type,
        })
    }

    /// Enumerate reference edges from an object. Only outbound analysis
    /// is implemented; inbound requests return an explanatory note and
    /// an empty list.
    pub fn references(
        &self,
        target: &dyn TargetRuntime,
        inspection: &InspectionEngine,
        object_ref: &str,
        direction: ReferenceDirection,
        max_results: Option<usize>,
        include_arrays: bool,
        thread_id: u32,
        frame: usize,
    ) -> Result<ReferenceList, DebugError> {
        const INBOUND_NOTE: &str =
            "inbound reference analysis is not implemented; outbound only";
        if direction == ReferenceDirection::Inbound {
            return Ok(ReferenceList {
                references: Vec::new(),
                truncated: false,
                note: Some(INBOUND_NOTE.into()),
            });
        }
        let max = max_results
            .unwrap_or(self.limits.default_references)
            .min(self.limits.max_references);

        let root = inspection.resolve_expression(target, object_ref, thread_id, frame)?;
        if root.is_null() {
            return Err(DebugError::NullReference(object_ref.to_string()));
        }
        let Some(handle) = root.handle else {
            return Err(DebugError::InvalidReference(format!(
                "'{object_ref}' is not an object reference"
            )));
        };

        let mut references = Vec::new();
        let mut truncated = false;

        if include_arrays {
            if matches!(root.kind, RawValueKind::Array { .. }) {
                let elements = target.array_elements(&handle, max + 1)?;
                for (index, element) in elements.iter().enumerate() {
                    if element.is_null() || element.address == 0 {
                        continue;
                    }
                    if references.len() >= max {
                        truncated = true;
                        break;
                    }
                    references.push(ObjectReference {
                        source_address: root.address,
                        source_type: root.type_name.clone(),
                        target_address: element.address,
                        target_type: element.type_name.clone(),
                        path: format!("[{index}]"),
                        kind: ReferenceKind::ArrayElement,
                    });
                }
            }
        }

        for field in target.read_fields(&handle)? {
            if references.len() >= max {
                truncated = true;
                break;
            }
            let value = &field.value;
            if value.is_null() || value.address == 0 {
                continue;
            }
            let is_reference_shape = matches!(
                value.kind,
                RawValueKind::Object { .. }
                    | RawValueKind::String(_)
                    | RawValueKind::Array { .. }
            );
            if !is_reference_shape {
                continue;
            }
            let kind = if field.is_static {
                ReferenceKind::StaticField
            } else if value.type_name.starts_with("System.WeakReference") {
                ReferenceKind::WeakReference
            } else {
                ReferenceKind::Field
            };
            references.push(ObjectReference {
                source_address: root.address,
                source_type: root.type_name.clone(),
                target_address: value.address,
                target_type: value.type_name.clone(),
                path: field.name.clone(),
                kind,
            });
        }

        let note = (direction == ReferenceDirection::Both).then(|| INBOUND_NOTE.to_string());
        Ok(ReferenceList {
            references,
            truncated,
            note,
        })
    }

    fn resolve_type(
        &self,
        target: &dyn TargetRuntime,
        inspection: &InspectionEngine,
        type_name_or_ref: &str,
        thread_id: u32,
        frame: usize,
    ) -> Result<TypeRef, DebugError> {
        if let Some(type_ref) = target.find_type(type_name_or_ref)? {
            return Ok(type_ref);
        }
        // Not a known type name; try it as an object-ref expression.
        if let Ok(value) = inspection.resolve_expression(target, type_name_or_ref, thread_id, frame)
        {
            if let Some(type_ref) = value.type_ref() {
                return Ok(type_ref.clone());
            }
        }
        Err(DebugError::TypeNotFound(type_name_or_ref.to_string()))
    }
}

fn parse_address(text: &str) -> Result<u64, DebugError> {
    let trimmed = text.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else {
        trimmed.parse()
    };
    parsed.map_err(|_| DebugError::InvalidAddress(text.to_string()))
}

fn render_hex(bytes: &[u8]) -> String {
    bytes
        .chunks(BYTES_PER_LINE)
        .map(|line| {
            line.iter()
                .map(|byte| format!("{byte:02X}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_ascii(bytes: &[u8]) -> String {
    bytes
        .chunks(BYTES_PER_LINE)
        .map(|line| {
            line.iter()
                .map(|byte| {
                    if (0x20..=0x7E).contains(byte) {
                        char::from(*byte)
                    } else {
                        '.'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn natural_alignment(size: u32) -> u32 {
    match size {
        0 => 1,
        _ => size.next_power_of_two().min(8),
    }
}

fn padding_between(fields: &[FieldLayout]) -> Vec<PaddingRegion> {
    let mut regions = Vec::new();
    for window in fields.windows(2) {
        let end = window[0].offset + window[0].size;
        if window[1].offset > end {
            regions.push(PaddingRegion {
                offset: end,
                size: window[1].offset - end,
            });
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_hex_and_decimal() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("0XFF").unwrap(), 0xFF);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("own").is_err());
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn hex_rendering_is_sixteen_bytes_per_line() {
        let bytes: Vec<u8> = (0u8..20).collect();
        let hex = render_hex(&bytes);
        let lines: Vec<&str> = hex.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01 02"));
        assert_eq!(lines[1], "10 11 12 13");
    }

    #[test]
    fn ascii_rendering_masks_unprintables() {
        let ascii = render_ascii(&[0x41, 0x42, 0x00, 0x7F, 0x20]);
        assert_eq!(ascii, "AB.. ");
    }

    #[test]
    fn padding_regions_cover_offset_gaps() {
        let fields = vec![
            FieldLayout {
                name: "a".into(),
                type_name: "byte".into(),
                offset: 0,
                size: 1,
                alignment: 1,
                is_reference: false,
            },
            FieldLayout {
                name: "b".into(),
                type_name: "long".into(),
                offset: 8,
                size: 8,
                alignment: 8,
                is_reference: false,
            },
        ];
        let padding = padding_between(&fields);
        assert_eq!(padding.len(), 1);
        assert_eq!(padding[0].offset, 1);
        assert_eq!(padding[0].size, 7);
    }

    #[test]
    fn alignment_is_capped_at_pointer_size() {
        assert_eq!(natural_alignment(1), 1);
        assert_eq!(natural_alignment(3), 4);
        assert_eq!(natural_alignment(8), 8);
        assert_eq!(natural_alignment(16), 8);
        assert_eq!(natural_alignment(0), 1);
    }
}
