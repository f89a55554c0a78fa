//! Small helpers for classifying JS expressions written in markup.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::Expression;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;

use crate::error::{CompilerError, Result};

lazy_static! {
    static ref SIMPLE_NAME_RE: Regex = Regex::new(r"^[\w$][\w$.]*$").unwrap();
    static ref WRAPPED_RE: Regex = Regex::new(r"(?s)^\{(.*)\}$").unwrap();
    static ref ROOT_NAME_RE: Regex = Regex::new(r"^[A-Za-z_$][\w$]*").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionType {
    /// A plain or dotted name: `count`, `user.name`.
    Identifier,
    /// An arrow function literal.
    Function,
}

/// `name` or `a.b.c`, never ending with a dot.
pub fn is_simple_name(name: &str) -> bool {
    !name.is_empty() && SIMPLE_NAME_RE.is_match(name) && !name.ends_with('.')
}

/// Strips the braces from `{exp}`.
pub fn unwrap_exp(e: &str) -> Result<String> {
    if e.is_empty() {
        return Err(CompilerError::binding("Empty expression"));
    }
    match WRAPPED_RE.captures(e) {
        Some(c) => Ok(c[1].to_string()),
        None => Err(CompilerError::binding(format!("Wrong expression: {}", e))),
    }
}

/// Leading identifier of a dotted path, `a` for `a.b[0]`.
pub fn root_name(name: &str) -> Option<&str> {
    ROOT_NAME_RE.find(name).map(|m| m.as_str())
}

pub fn detect_expression_type(code: &str) -> Option<ExpressionType> {
    if is_simple_name(code) {
        return Some(ExpressionType::Identifier);
    }

    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let expr = Parser::new(&allocator, code, source_type).parse_expression().ok()?;
    match expr.without_parentheses() {
        Expression::Identifier(_) | Expression::StaticMemberExpression(_) => {
            Some(ExpressionType::Identifier)
        }
        Expression::ArrowFunctionExpression(_) => Some(ExpressionType::Function),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_names() {
        assert!(is_simple_name("count"));
        assert!(is_simple_name("$props.name"));
        assert!(!is_simple_name("a."));
        assert!(!is_simple_name("a + b"));
        assert!(!is_simple_name(""));
    }

    #[test]
    fn test_unwrap() {
        assert_eq!(unwrap_exp("{a + b}").unwrap(), "a + b");
        assert!(unwrap_exp("a").is_err());
    }

    #[test]
    fn test_detect() {
        assert_eq!(detect_expression_type("onClick"), Some(ExpressionType::Identifier));
        assert_eq!(detect_expression_type("user . name"), Some(ExpressionType::Identifier));
        assert_eq!(detect_expression_type("(e) => go(e)"), Some(ExpressionType::Function));
        assert_eq!(detect_expression_type("count += 1"), None);
        assert_eq!(detect_expression_type("a[0]"), None);
    }
}
