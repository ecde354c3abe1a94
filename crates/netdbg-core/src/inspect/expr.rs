//! Member-access expression resolution.
//!
//! The grammar is a dot-separated chain: the head is `this`, a local, or
//! an argument; each later segment is a field or property. Properties
//! resolve through their compiler-generated backing field first and fall
//! back to invoking the getter in the target. Unresolved segments walk
//! the base-type chain, crossing module boundaries.

use std::time::Duration;

use tracing::trace;

use crate::error::{DebugError, TargetError};
use crate::target::{RawValue, TargetRuntime};
use crate::types::TypeRef;

/// A validated member-access chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChain {
    segments: Vec<String>,
}

impl MemberChain {
    /// Parse and validate an expression, reporting character positions
    /// for every rejection.
    pub fn parse(expression: &str) -> Result<Self, DebugError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(DebugError::SyntaxError {
                position: 0,
                message: "empty expression".into(),
            });
        }
        let base_offset = expression.len() - expression.trim_start().len();
        let mut segments = Vec::new();
        let mut offset = base_offset;
        for segment in trimmed.split('.') {
            if segment.is_empty() {
                return Err(DebugError::SyntaxError {
                    position: offset,
                    message: "empty member segment".into(),
                });
            }
            if let Some(bad) = segment
                .char_indices()
                .find(|(index, ch)| !is_identifier_char(*ch, *index == 0))
            {
                return Err(DebugError::SyntaxError {
                    position: offset + bad.0,
                    message: format!("unexpected character '{}'", bad.1),
                });
            }
            segments.push(segment.to_string());
            offset += segment.len() + 1;
        }
        Ok(Self { segments })
    }

    /// The head segment (`this`, a local, or an argument name).
    #[must_use]
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// Segments after the head.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.segments[1..]
    }
}

fn is_identifier_char(ch: char, first: bool) -> bool {
    if first {
        ch.is_ascii_alphabetic() || ch == '_'
    } else {
        ch.is_ascii_alphanumeric() || ch == '_'
    }
}

/// Resolve a chain against a paused frame to a raw value.
pub fn resolve(
    target: &dyn TargetRuntime,
    thread_id: u32,
    frame: usize,
    expression: &str,
    eval_timeout: Duration,
) -> Result<RawValue, DebugError> {
    let chain = MemberChain::parse(expression)?;
    let mut receiver = resolve_head(target, thread_id, frame, chain.head())?;
    let mut path = chain.head().to_string();
    for segment in chain.members() {
        if receiver.is_null() {
            return Err(DebugError::NullReference(path));
        }
        receiver = resolve_member(target, thread_id, &receiver, segment, eval_timeout)?;
        path.push('.');
        path.push_str(segment);
    }
    Ok(receiver)
}

fn resolve_head(
    target: &dyn TargetRuntime,
    thread_id: u32,
    frame: usize,
    head: &str,
) -> Result<RawValue, DebugError> {
    if head == "this" {
        return target
            .read_this(thread_id, frame)?
            .ok_or_else(|| DebugError::VariableUnavailable("this".into()));
    }
    for (name, value) in target.read_locals(thread_id, frame)? {
        if name == head {
            return Ok(value);
        }
    }
    for (name, value) in target.read_arguments(thread_id, frame)? {
        if name == head {
            return Ok(value);
        }
    }
    Err(DebugError::VariableUnavailable(head.to_string()))
}

/// One segment against one receiver: declared fields, then the property
/// backing field, then the getter, then the same at each ancestor type.
fn resolve_member(
    target: &dyn TargetRuntime,
    thread_id: u32,
    receiver: &RawValue,
    segment: &str,
    eval_timeout: Duration,
) -> Result<RawValue, DebugError> {
    let member_not_found = || DebugError::MemberNotFound {
        segment: segment.to_string(),
        receiver_type: receiver.type_name.clone(),
    };
    let Some(handle) = receiver.handle else {
        return Err(member_not_found());
    };
    let Some(start) = receiver.type_ref().cloned() else {
        return Err(member_not_found());
    };

    let backing_field = format!("<{segment}>k__BackingField");
    let mut current: Option<TypeRef> = Some(start);
    while let Some(type_ref) = current {
        let declared = target.fields_declared(&handle, &type_ref)?;
        if let Some(field) = declared.iter().find(|field| field.name == segment) {
            return Ok(field.value.clone());
        }
        if let Some(field) = declared.iter().find(|field| field.name == backing_field) {
            trace!(segment, "resolved through backing field");
            return Ok(field.value.clone());
        }
        if let Some(getter) = target.find_getter(&type_ref, segment)? {
            trace!(segment, "resolved through getter call");
            return call_getter(target, &getter, handle, thread_id, eval_timeout);
        }
        current = target.base_type(&type_ref)?;
    }
    Err(member_not_found())
}

fn call_getter(
    target: &dyn TargetRuntime,
    getter: &crate::target::FunctionHandle,
    receiver: crate::types::ValueHandle,
    thread_id: u32,
    eval_timeout: Duration,
) -> Result<RawValue, DebugError> {
    target
        .call_function(getter, Some(&receiver), thread_id, eval_timeout)
        .map_err(|err| match err {
            TargetError::EvalTimeout => DebugError::EvalTimeout,
            TargetError::EvalException(exception_type) => {
                DebugError::EvalException { exception_type }
            }
            other => other.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_chains() {
        let chain = MemberChain::parse("this.Home.City").unwrap();
        assert_eq!(chain.head(), "this");
        assert_eq!(chain.members(), ["Home".to_string(), "City".to_string()]);

        let chain = MemberChain::parse("order").unwrap();
        assert_eq!(chain.head(), "order");
        assert!(chain.members().is_empty());
    }

    #[test]
    fn rejects_empty_segments_with_position() {
        let err = MemberChain::parse("this..Home").unwrap_err();
        let DebugError::SyntaxError { position, .. } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(position, 5);
    }

    #[test]
    fn rejects_non_identifier_characters() {
        for expr in ["a[0]", "a.b()", "a + b", "1abc"] {
            assert!(
                matches!(
                    MemberChain::parse(expr),
                    Err(DebugError::SyntaxError { .. })
                ),
                "{expr}"
            );
        }
    }

    #[test]
    fn rejects_empty_expression() {
        assert!(matches!(
            MemberChain::parse("   "),
            Err(DebugError::SyntaxError { position: 0, .. })
        ));
    }
}
