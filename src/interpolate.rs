//! Text interpolation: `Hello {name}!` → `` `Hello `+(name)+`!` ``.

use serde::Serialize;

use crate::error::{CompilerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Part {
    Text(String),
    Exp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedText {
    /// JS expression producing the final string.
    pub result: String,
    pub parts: Vec<Part>,
}

/// Escaping applied to text placed inside generated template literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    #[default]
    Template,
    /// Also escapes newlines so the literal stays on one line.
    Inline,
}

impl Escape {
    pub fn apply(self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.push_str("\\\\"),
                '`' => out.push_str("\\`"),
                '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
                '\n' if self == Escape::Inline => out.push_str("\\n"),
                _ => out.push(c),
            }
        }
        out
    }
}

/// Splits `source` into literal and `{expression}` segments.
pub fn parse_text(source: &str, escape: Escape) -> Result<ParsedText> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut exp = String::new();
    let mut in_exp = false;
    let mut quote: Option<char> = None;

    let mut exp_start = 0;
    for (i, a) in source.char_indices() {
        if in_exp {
            if let Some(q) = quote {
                if a == q {
                    quote = None;
                }
                exp.push(a);
                continue;
            }
            match a {
                '"' | '\'' | '`' => {
                    quote = Some(a);
                    exp.push(a);
                }
                '}' => {
                    in_exp = false;
                    let value = exp.trim().to_string();
                    if value.is_empty() {
                        return Err(CompilerError::expression("Wrong expression")
                            .with_details(source.to_string())
                            .locate(source, exp_start));
                    }
                    parts.push(Part::Exp(value));
                    exp.clear();
                }
                _ => exp.push(a),
            }
            continue;
        }
        if a == '{' {
            if !text.is_empty() {
                parts.push(Part::Text(std::mem::take(&mut text)));
            }
            in_exp = true;
            exp_start = i;
            continue;
        }
        text.push(a);
    }
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    if in_exp {
        return Err(CompilerError::expression(format!("Wrong expression: {}", source))
            .with_details(source.to_string())
            .locate(source, exp_start));
    }

    let result = match parts.as_slice() {
        [Part::Exp(v)] if v == "$class" => "''+$class".to_string(),
        _ => parts
            .iter()
            .map(|p| match p {
                Part::Text(t) => format!("`{}`", escape.apply(t)),
                Part::Exp(e) => format!("({})", e),
            })
            .collect::<Vec<_>>()
            .join("+"),
    };
    Ok(ParsedText { result, parts })
}
