//! Break-condition parsing and evaluation.
//!
//! The v1 grammar is deliberately small: hit-count comparisons, a modulo
//! gate, and boolean literals. Everything else fails validation with a
//! character position so the caller can surface it. The evaluator is a
//! single entry point so a richer implementation can drop in later.

#![allow(missing_docs)]

use std::fmt;

use smol_str::SmolStr;

use crate::error::DebugError;

/// Comparison operators accepted on `hitCount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(self, left: u64, right: u64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(text)
    }
}

/// A parsed break condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Empty or whitespace input: always break.
    Always,
    /// A boolean literal.
    Literal(bool),
    /// `hitCount <op> N`.
    Compare { op: CompareOp, value: u64 },
    /// `hitCount % N == M`.
    Modulo { divisor: u64, remainder: u64 },
}

/// Values visible to a condition at hit time. Thread id is carried for
/// future evaluators; the v1 grammar does not reference it.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext {
    pub hit_count: u64,
    pub thread_id: u32,
}

/// A rejected condition, with the offending character position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionError {
    pub position: usize,
    pub message: String,
}

impl ConditionError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at position {})", self.message, self.position)
    }
}

impl From<ConditionError> for DebugError {
    fn from(err: ConditionError) -> Self {
        DebugError::InvalidCondition {
            position: err.position,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(SmolStr),
    Number(u64),
    Compare(CompareOp),
    Percent,
    OpenParen,
    CloseParen,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    position: usize,
}

impl Condition {
    /// Parse a condition, rejecting anything outside the v1 grammar.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        if text.trim().is_empty() {
            return Ok(Condition::Always);
        }
        let tokens = tokenize(text)?;
        check_structure(&tokens, text.len())?;
        parse_tokens(&tokens, text.len())
    }

    /// Validate without keeping the parse.
    pub fn validate(text: &str) -> Result<(), ConditionError> {
        Self::parse(text).map(|_| ())
    }

    /// Evaluate against a hit context.
    pub fn evaluate(&self, ctx: &ConditionContext) -> Result<bool, ConditionError> {
        match self {
            Condition::Always => Ok(true),
            Condition::Literal(value) => Ok(*value),
            Condition::Compare { op, value } => Ok(op.apply(ctx.hit_count, *value)),
            Condition::Modulo { divisor, remainder } => {
                if *divisor == 0 {
                    return Err(ConditionError::new(0, "modulo divisor must be positive"));
                }
                Ok(ctx.hit_count % divisor == *remainder)
            }
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, ConditionError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;
    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => index += 1,
            b'(' => {
                tokens.push(Spanned {
                    token: Token::OpenParen,
                    position: index,
                });
                index += 1;
            }
            b')' => {
                tokens.push(Spanned {
                    token: Token::CloseParen,
                    position: index,
                });
                index += 1;
            }
            b'%' => {
                tokens.push(Spanned {
                    token: Token::Percent,
                    position: index,
                });
                index += 1;
            }
            b'=' | b'!' | b'<' | b'>' => {
                let start = index;
                let double = index + 1 < bytes.len() && bytes[index + 1] == b'=';
                let op = match (byte, double) {
                    (b'=', true) => CompareOp::Eq,
                    (b'!', true) => CompareOp::Ne,
                    (b'<', true) => CompareOp::Le,
                    (b'<', false) => CompareOp::Lt,
                    (b'>', true) => CompareOp::Ge,
                    (b'>', false) => CompareOp::Gt,
                    (b'=', false) => {
                        return Err(ConditionError::new(start, "use '==' for comparison"))
                    }
                    (b'!', false) => {
                        return Err(ConditionError::new(start, "use '!=' for comparison"))
                    }
                    _ => unreachable!(),
                };
                tokens.push(Spanned {
                    token: Token::Compare(op),
                    position: start,
                });
                index += if double { 2 } else { 1 };
            }
            b'0'..=b'9' => {
                let start = index;
                while index < bytes.len() && bytes[index].is_ascii_digit() {
                    index += 1;
                }
                let digits = &text[start..index];
                let value = digits.parse::<u64>().map_err(|_| {
                    ConditionError::new(start, format!("number '{digits}' out of range"))
                })?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    position: start,
                });
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = index;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_')
                {
                    index += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(SmolStr::new(&text[start..index])),
                    position: start,
                });
            }
            _ => {
                return Err(ConditionError::new(
                    index,
                    format!("unexpected character '{}'", char::from(byte)),
                ))
            }
        }
    }
    Ok(tokens)
}

/// Structural rejections with dedicated diagnostics: unbalanced
/// parentheses, adjacent comparison operators, trailing comparison
/// operator.
fn check_structure(tokens: &[Spanned], input_len: usize) -> Result<(), ConditionError> {
    let mut depth = 0i32;
    for spanned in tokens {
        match spanned.token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(ConditionError::new(
                        spanned.position,
                        "unbalanced parentheses",
                    ));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ConditionError::new(input_len, "unbalanced parentheses"));
    }
    for window in tokens.windows(2) {
        if matches!(window[0].token, Token::Compare(_))
            && matches!(window[1].token, Token::Compare(_))
        {
            return Err(ConditionError::new(
                window[1].position,
                "adjacent comparison operators",
            ));
        }
    }
    if let Some(last) = tokens.last() {
        if matches!(last.token, Token::Compare(_)) {
            return Err(ConditionError::new(
                last.position,
                "trailing comparison operator",
            ));
        }
    }
    Ok(())
}

fn parse_tokens(tokens: &[Spanned], input_len: usize) -> Result<Condition, ConditionError> {
    match tokens {
        [single] => match &single.token {
            Token::Ident(name) if name.eq_ignore_ascii_case("true") => {
                Ok(Condition::Literal(true))
            }
            Token::Ident(name) if name.eq_ignore_ascii_case("false") => {
                Ok(Condition::Literal(false))
            }
            _ => Err(unrecognized(single)),
        },
        [head, op, value] => {
            expect_hit_count(head)?;
            let Token::Compare(op) = op.token else {
                return Err(ConditionError::new(op.position, "expected comparison operator"));
            };
            let Token::Number(value) = value.token else {
                return Err(ConditionError::new(
                    value.position,
                    "expected a non-negative integer",
                ));
            };
            Ok(Condition::Compare { op, value })
        }
        [head, percent, divisor, eq, remainder] => {
            expect_hit_count(head)?;
            if percent.token != Token::Percent {
                return Err(unrecognized(percent));
            }
            let Token::Number(divisor_value) = divisor.token else {
                return Err(ConditionError::new(
                    divisor.position,
                    "expected a modulo divisor",
                ));
            };
            if divisor_value == 0 {
                return Err(ConditionError::new(
                    divisor.position,
                    "modulo divisor must be positive",
                ));
            }
            if eq.token != Token::Compare(CompareOp::Eq) {
                return Err(ConditionError::new(
                    eq.position,
                    "modulo conditions only support '=='",
                ));
            }
            let Token::Number(remainder_value) = remainder.token else {
                return Err(ConditionError::new(
                    remainder.position,
                    "expected a remainder value",
                ));
            };
            Ok(Condition::Modulo {
                divisor: divisor_value,
                remainder: remainder_value,
            })
        }
        [] => Ok(Condition::Always),
        _ => Err(ConditionError::new(
            tokens.first().map_or(input_len, |t| t.position),
            "unrecognized condition; expected 'hitCount <op> N', \
             'hitCount % N == M', 'true', or 'false'",
        )),
    }
}

fn expect_hit_count(spanned: &Spanned) -> Result<(), ConditionError> {
    match &spanned.token {
        Token::Ident(name) if name.eq_ignore_ascii_case("hitcount") => Ok(()),
        _ => Err(unrecognized(spanned)),
    }
}

fn unrecognized(spanned: &Spanned) -> ConditionError {
    ConditionError::new(spanned.position, "unrecognized condition term")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(hit_count: u64) -> ConditionContext {
        ConditionContext {
            hit_count,
            thread_id: 1,
        }
    }

    #[test]
    fn empty_condition_always_breaks() {
        assert_eq!(Condition::parse("").unwrap(), Condition::Always);
        assert_eq!(Condition::parse("   ").unwrap(), Condition::Always);
        assert!(Condition::Always.evaluate(&ctx(0)).unwrap());
    }

    #[test]
    fn parses_all_comparison_operators() {
        for (text, op) in [
            ("hitCount == 3", CompareOp::Eq),
            ("hitCount != 3", CompareOp::Ne),
            ("hitCount < 3", CompareOp::Lt),
            ("hitCount <= 3", CompareOp::Le),
            ("hitCount > 3", CompareOp::Gt),
            ("hitCount >= 3", CompareOp::Ge),
        ] {
            assert_eq!(
                Condition::parse(text).unwrap(),
                Condition::Compare { op, value: 3 },
                "{text}"
            );
        }
    }

    #[test]
    fn hit_count_is_case_insensitive() {
        assert!(Condition::parse("HITCOUNT >= 1").is_ok());
        assert!(Condition::parse("hitcount >= 1").is_ok());
    }

    #[test]
    fn modulo_gate_matches_every_nth_hit() {
        let condition = Condition::parse("hitCount % 10 == 0").unwrap();
        assert!(condition.evaluate(&ctx(10)).unwrap());
        assert!(condition.evaluate(&ctx(20)).unwrap());
        assert!(!condition.evaluate(&ctx(7)).unwrap());
    }

    #[test]
    fn modulo_divisor_zero_is_rejected_at_parse() {
        let err = Condition::parse("hitCount % 0 == 1").unwrap_err();
        assert!(err.message.contains("divisor"));
    }

    #[test]
    fn boolean_literals_any_case() {
        assert_eq!(Condition::parse("true").unwrap(), Condition::Literal(true));
        assert_eq!(Condition::parse("FALSE").unwrap(), Condition::Literal(false));
        assert!(!Condition::Literal(false).evaluate(&ctx(5)).unwrap());
    }

    #[test]
    fn rejects_unbalanced_parentheses_with_position() {
        let err = Condition::parse("(hitCount > 1").unwrap_err();
        assert!(err.message.contains("parentheses"));

        let err = Condition::parse("hitCount > 1)").unwrap_err();
        assert_eq!(err.position, 12);
    }

    #[test]
    fn rejects_adjacent_comparison_operators() {
        let err = Condition::parse("hitCount == == 3").unwrap_err();
        assert!(err.message.contains("adjacent"));
        assert_eq!(err.position, 12);
    }

    #[test]
    fn rejects_trailing_comparison_operator() {
        let err = Condition::parse("hitCount >").unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn rejects_arbitrary_expressions() {
        for text in ["x > 1", "hitCount + 1 == 2", "call()", "thread == 3"] {
            assert!(Condition::parse(text).is_err(), "{text}");
        }
    }

    #[test]
    fn positions_point_into_the_input() {
        let err = Condition::parse("hitCount == nope").unwrap_err();
        assert_eq!(err.position, 12);
    }
}
