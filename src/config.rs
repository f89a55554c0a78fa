//! Compiler configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{default_warning_sink, Result, Warning, WarningSink};
use crate::finalize::CompileContext;

/// Named pipeline phases at which plugins run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hook {
    #[serde(rename = "dom:before")]
    DomBefore,
    #[serde(rename = "dom")]
    Dom,
    #[serde(rename = "dom:check")]
    DomCheck,
    #[serde(rename = "dom:compact")]
    DomCompact,
    #[serde(rename = "dom:after")]
    DomAfter,
    #[serde(rename = "js:before")]
    JsBefore,
    #[serde(rename = "js")]
    Js,
    #[serde(rename = "js:after")]
    JsAfter,
    #[serde(rename = "css:before")]
    CssBefore,
    #[serde(rename = "css")]
    Css,
    #[serde(rename = "runtime:before")]
    RuntimeBefore,
    #[serde(rename = "runtime")]
    Runtime,
    #[serde(rename = "build:before")]
    BuildBefore,
    #[serde(rename = "build:shaking")]
    BuildShaking,
    #[serde(rename = "build:assemble")]
    BuildAssemble,
    #[serde(rename = "build")]
    Build,
}

impl Hook {
    pub fn name(self) -> &'static str {
        match self {
            Hook::DomBefore => "dom:before",
            Hook::Dom => "dom",
            Hook::DomCheck => "dom:check",
            Hook::DomCompact => "dom:compact",
            Hook::DomAfter => "dom:after",
            Hook::JsBefore => "js:before",
            Hook::Js => "js",
            Hook::JsAfter => "js:after",
            Hook::CssBefore => "css:before",
            Hook::Css => "css",
            Hook::RuntimeBefore => "runtime:before",
            Hook::Runtime => "runtime",
            Hook::BuildBefore => "build:before",
            Hook::BuildShaking => "build:shaking",
            Hook::BuildAssemble => "build:assemble",
            Hook::Build => "build",
        }
    }
}

/// Extension point invoked at every [`Hook`] with the in-progress compilation.
pub trait Plugin: Send + Sync {
    fn hook(&self, hook: Hook, ctx: &mut CompileContext) -> Result<()>;
}

/// Generates style ids; replaces the content hash when set.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub name: String,
    pub export_default: bool,
    pub inline_template: bool,
    pub hide_label: bool,
    pub compact: bool,
    pub auto_subscribe: bool,
    pub preserve_comments: bool,
    pub inject_runtime: Option<String>,
    #[serde(skip)]
    pub css_gen_id: Option<IdGenerator>,
    #[serde(skip, default = "default_warning_sink")]
    pub warning: WarningSink,
    #[serde(skip)]
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            name: "widget".to_string(),
            export_default: true,
            inline_template: false,
            hide_label: false,
            compact: true,
            auto_subscribe: true,
            preserve_comments: false,
            inject_runtime: None,
            css_gen_id: None,
            warning: default_warning_sink(),
            plugins: Vec::new(),
        }
    }
}

impl fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileOptions")
            .field("name", &self.name)
            .field("export_default", &self.export_default)
            .field("inline_template", &self.inline_template)
            .field("hide_label", &self.hide_label)
            .field("compact", &self.compact)
            .field("auto_subscribe", &self.auto_subscribe)
            .field("preserve_comments", &self.preserve_comments)
            .field("inject_runtime", &self.inject_runtime)
            .field("css_gen_id", &self.css_gen_id.is_some())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl CompileOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        (self.warning)(&Warning::new(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let opts: CompileOptions =
            serde_json::from_str(r#"{"name": "Counter", "hideLabel": true}"#).unwrap();
        assert_eq!(opts.name, "Counter");
        assert!(opts.hide_label);
        assert!(opts.export_default);
        assert!(opts.compact);
        assert!(opts.plugins.is_empty());
    }

    #[test]
    fn test_hook_names_roundtrip() {
        let hook: Hook = serde_json::from_str("\"build:shaking\"").unwrap();
        assert_eq!(hook, Hook::BuildShaking);
        assert_eq!(hook.name(), "build:shaking");
    }
}
