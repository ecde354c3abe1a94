//! Value display formatting.

use time::format_description::well_known::Rfc3339;

use crate::limits::Limits;
use crate::target::{RawPrimitive, RawValue, RawValueKind};

/// Render a raw value for display.
///
/// The table: `null`, quoted/escaped strings (truncated with an
/// ellipsis), native literals for scalars, `Name (ordinal)` for enums,
/// ISO 8601 for date-likes, `ElementType[N]` for arrays,
/// `TypeName (Count=N)` for collections, `{TypeName}` otherwise.
#[must_use]
pub fn format_value(value: &RawValue, limits: &Limits) -> String {
    match &value.kind {
        RawValueKind::Null => "null".to_string(),
        RawValueKind::String(text) => format_string(text, limits.string_display_max),
        RawValueKind::Primitive(primitive) => format_primitive(*primitive),
        RawValueKind::Enum { name, ordinal } => format!("{name} ({ordinal})"),
        RawValueKind::DateTime(stamp) => stamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| "<invalid date>".to_string()),
        RawValueKind::Array {
            element_type,
            length,
        } => format!("{element_type}[{length}]"),
        RawValueKind::Object {
            collection_count: Some(count),
            ..
        } => format!("{} (Count={count})", value.type_name),
        RawValueKind::Object { .. } | RawValueKind::ValueObject { .. } => {
            format!("{{{}}}", value.type_name)
        }
    }
}

/// Whether the value can be expanded into children.
#[must_use]
pub fn has_children(value: &RawValue) -> bool {
    match &value.kind {
        RawValueKind::Object { .. } | RawValueKind::ValueObject { .. } => true,
        RawValueKind::Array { length, .. } => *length > 0,
        _ => false,
    }
}

/// Element/entry count for arrays and collections.
#[must_use]
pub fn child_count(value: &RawValue) -> Option<usize> {
    match &value.kind {
        RawValueKind::Array { length, .. } => Some(*length),
        RawValueKind::Object {
            collection_count, ..
        } => *collection_count,
        _ => None,
    }
}

fn format_primitive(primitive: RawPrimitive) -> String {
    match primitive {
        RawPrimitive::Bool(value) => value.to_string(),
        RawPrimitive::Char(value) => format!("'{}'", escape_char(value)),
        RawPrimitive::Int(value) => value.to_string(),
        RawPrimitive::UInt(value) => value.to_string(),
        RawPrimitive::Float(value) => {
            if value.fract() == 0.0 && value.is_finite() {
                format!("{value:.1}")
            } else {
                value.to_string()
            }
        }
    }
}

fn format_string(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars) + 2);
    out.push('"');
    let mut truncated = false;
    for (index, ch) in text.chars().enumerate() {
        if index >= max_chars {
            truncated = true;
            break;
        }
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            _ => out.push(ch),
        }
    }
    if truncated {
        out.push('…');
    }
    out.push('"');
    out
}

fn escape_char(ch: char) -> String {
    match ch {
        '\'' => "\\'".to_string(),
        '\\' => "\\\\".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\t' => "\\t".to_string(),
        '\0' => "\\0".to_string(),
        _ => ch.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRef;

    fn raw(kind: RawValueKind, type_name: &str) -> RawValue {
        RawValue {
            type_name: type_name.into(),
            address: 0,
            size: 0,
            kind,
            handle: None,
        }
    }

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn null_displays_bare() {
        assert_eq!(format_value(&raw(RawValueKind::Null, "object"), &limits()), "null");
    }

    #[test]
    fn strings_are_quoted_and_escaped() {
        let value = raw(RawValueKind::String("a\"b\nc".into()), "string");
        assert_eq!(format_value(&value, &limits()), "\"a\\\"b\\nc\"");
    }

    #[test]
    fn long_strings_truncate_with_ellipsis() {
        let value = raw(RawValueKind::String("x".repeat(2000)), "string");
        let display = format_value(&value, &limits());
        assert!(display.ends_with("…\""));
        // 1000 chars + quotes + ellipsis
        assert_eq!(display.chars().count(), 1003);
    }

    #[test]
    fn scalars_use_native_literals() {
        assert_eq!(
            format_value(&raw(RawValueKind::Primitive(RawPrimitive::Int(-5)), "int"), &limits()),
            "-5"
        );
        assert_eq!(
            format_value(&raw(RawValueKind::Primitive(RawPrimitive::Bool(true)), "bool"), &limits()),
            "true"
        );
        assert_eq!(
            format_value(&raw(RawValueKind::Primitive(RawPrimitive::Char('a')), "char"), &limits()),
            "'a'"
        );
        assert_eq!(
            format_value(&raw(RawValueKind::Primitive(RawPrimitive::Float(2.5)), "double"), &limits()),
            "2.5"
        );
        assert_eq!(
            format_value(&raw(RawValueKind::Primitive(RawPrimitive::Float(3.0)), "double"), &limits()),
            "3.0"
        );
    }

    #[test]
    fn enums_show_name_and_ordinal() {
        let value = raw(
            RawValueKind::Enum {
                name: "Tuesday".into(),
                ordinal: 2,
            },
            "System.DayOfWeek",
        );
        assert_eq!(format_value(&value, &limits()), "Tuesday (2)");
    }

    #[test]
    fn arrays_show_element_type_and_length() {
        let value = raw(
            RawValueKind::Array {
                element_type: "System.Int32".into(),
                length: 8,
            },
            "System.Int32[]",
        );
        assert_eq!(format_value(&value, &limits()), "System.Int32[8]");
        assert!(has_children(&value));
        assert_eq!(child_count(&value), Some(8));
    }

    #[test]
    fn collections_show_count() {
        let value = raw(
            RawValueKind::Object {
                type_ref: Some(TypeRef {
                    module_path: "/m.dll".into(),
                    token: 1,
                }),
                collection_count: Some(3),
            },
            "System.Collections.Generic.List<string>",
        );
        assert_eq!(
            format_value(&value, &limits()),
            "System.Collections.Generic.List<string> (Count=3)"
        );
    }

    #[test]
    fn plain_objects_show_braced_type() {
        let value = raw(
            RawValueKind::Object {
                type_ref: None,
                collection_count: None,
            },
            "App.Person",
        );
        assert_eq!(format_value(&value, &limits()), "{App.Person}");
        assert!(has_children(&value));
        assert_eq!(child_count(&value), None);
    }
}
