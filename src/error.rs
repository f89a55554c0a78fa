//! Compiler diagnostics.
//!
//! Every fatal condition is a [`CompilerError`] carrying a stable code and,
//! when available, an excerpt of the offending source. Soft diagnostics are
//! [`Warning`]s routed through the configured warning sink.

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const E_PARSE: &str = "E-PARSE";
pub const E_BIND: &str = "E-BIND";
pub const E_EXPR: &str = "E-EXPR";
pub const E_SCRIPT: &str = "E-SCRIPT";
pub const E_CSS: &str = "E-CSS";
pub const E_GEN: &str = "E-GEN";
pub const E_PLUGIN: &str = "E-PLUGIN";

fn describe(code: &str) -> &'static str {
    match code {
        E_PARSE => "markup parse error",
        E_BIND => "binding error",
        E_EXPR => "expression error",
        E_SCRIPT => "script error",
        E_CSS => "style error",
        E_GEN => "generation error",
        E_PLUGIN => "plugin error",
        _ => "compiler error",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct CompilerError {
    pub code: String,
    pub message: String,
    /// Excerpt of the source that triggered the error.
    pub details: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl CompilerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            line: 0,
            column: 0,
        }
    }

    pub fn parse(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(E_PARSE, message).with_details(details)
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::new(E_BIND, message)
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(E_EXPR, message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(E_SCRIPT, message)
    }

    pub fn css(message: impl Into<String>) -> Self {
        Self::new(E_CSS, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(E_GEN, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attaches `details` only when the error has none yet.
    pub fn or_details(mut self, details: impl FnOnce() -> String) -> Self {
        if self.details.is_none() {
            self.details = Some(details());
        }
        self
    }

    /// Resolves a byte offset into a 1-based line/column pair.
    pub fn locate(mut self, source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..floor_char_boundary(source, offset)];
        self.line = before.matches('\n').count() as u32 + 1;
        self.column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() as u32 + 1,
            None => before.chars().count() as u32 + 1,
        };
        self
    }

    /// Moves a location taken inside `details` onto the whole component
    /// source. Errors without a location are pointed at the excerpt start.
    pub fn anchor(self, source: &str) -> Self {
        if self.code == E_PARSE && self.line > 0 {
            return self;
        }
        let Some(start) = self.details.as_deref().filter(|d| !d.is_empty()).and_then(|d| source.find(d)) else {
            return self;
        };
        let (line, column) = (self.line, self.column);
        let mut err = self.locate(source, start);
        if line > 0 {
            if line == 1 {
                err.column += column.saturating_sub(1);
            } else {
                err.column = column;
            }
            err.line += line - 1;
        }
        err
    }

    pub fn kind(&self) -> &'static str {
        describe(&self.code)
    }

    /// Message followed by the excerpt, the way the bundler prints it.
    pub fn report(&self) -> String {
        match &self.details {
            Some(d) => format!("{} ({}): {}\n{}", self.kind(), self.code, self.message, d),
            None => format!("{} ({}): {}", self.kind(), self.code, self.message),
        }
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Returns a parse error when `cond` is false.
pub(crate) fn ensure(cond: bool, err: impl FnOnce() -> CompilerError) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(err())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WARNINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Destination for soft diagnostics.
pub type WarningSink = std::sync::Arc<dyn Fn(&Warning) + Send + Sync>;

pub fn default_warning_sink() -> WarningSink {
    std::sync::Arc::new(|w: &Warning| {
        tracing::warn!(target: "malina", "{}", w.message);
    })
}
