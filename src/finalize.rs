//! Compile pipeline.
//!
//! Runs the phases in order, calling plugins at each [`Hook`]:
//! parse → split script/style → compact → script transform → style scoping
//! → runtime assembly → shaking → module assembly.

use crate::ast::{Node, RawBlock, Root};
use crate::codegen::{BlockOptions, Generator, Owner};
use crate::compact::compact;
use crate::config::{CompileOptions, Hook};
use crate::error::{ensure, CompilerError, Result, E_PLUGIN};
use crate::parse::parse;
use crate::script::{self, ScriptInfo};
use crate::style::{process_css, ExternalClass, StyleScope};

const RUNTIME_MODULE: &str = "malinajs/runtime.js";

/// Generated pieces spliced into the component function.
#[derive(Debug, Clone, Default)]
pub struct RuntimeParts {
    /// Replaces the `$$runtimeHeader()` marker.
    pub header: String,
    /// Replaces the `$$runtime()` marker.
    pub body: String,
}

/// In-progress compilation, handed to plugins at every hook.
pub struct CompileContext {
    pub source: String,
    pub options: CompileOptions,
    pub dom: Root,
    pub script_nodes: Vec<RawBlock>,
    pub style_nodes: Vec<RawBlock>,
    pub script: Option<ScriptInfo>,
    pub css: Option<StyleScope>,
    pub runtime: RuntimeParts,
    pub result: Option<String>,
}

impl CompileContext {
    pub fn new(source: &str, options: CompileOptions) -> Self {
        Self {
            source: source.to_string(),
            options,
            dom: Root::default(),
            script_nodes: Vec::new(),
            style_nodes: Vec::new(),
            script: None,
            css: None,
            runtime: RuntimeParts::default(),
            result: None,
        }
    }

    fn hook(&mut self, hook: Hook) -> Result<()> {
        tracing::debug!(target: "malina", phase = hook.name(), "compile phase");
        let plugins = self.options.plugins.clone();
        for plugin in plugins {
            plugin.hook(hook, self).map_err(|e| {
                let message = format!("{} ({})", e.message, hook.name());
                let err = CompilerError::new(E_PLUGIN, message);
                match e.details {
                    Some(d) => err.with_details(d),
                    None => err,
                }
            })?;
        }
        Ok(())
    }

    fn script_info(&self) -> Result<&ScriptInfo> {
        self.script
            .as_ref()
            .ok_or_else(|| CompilerError::generation("Script is not transformed"))
    }

    pub fn run(&mut self) -> Result<()> {
        self.hook(Hook::DomBefore)?;
        self.dom = parse(&self.source)?;
        self.hook(Hook::Dom)?;
        self.split_sections();
        self.hook(Hook::DomCheck)?;
        ensure(self.script_nodes.len() <= 1, || {
            CompilerError::script("Only one script section")
        })?;
        self.hook(Hook::DomCompact)?;
        if self.options.compact {
            compact(&mut self.dom);
        }
        self.hook(Hook::DomAfter)?;

        self.hook(Hook::JsBefore)?;
        self.hook(Hook::Js)?;
        let script_node = self.script_nodes.first();
        let property = script_node.map_or(false, |s| s.has_attribute("property"));
        let info = script::transform(
            script_node.map(|s| s.content.as_str()),
            &self.options,
            property,
        )?;
        self.script = Some(info);
        self.hook(Hook::JsAfter)?;

        self.hook(Hook::CssBefore)?;
        self.css = process_css(&self.style_nodes, &self.options)?;
        if let Some(css) = &self.css {
            css.process(&mut self.dom)?;
        }
        self.hook(Hook::Css)?;

        self.hook(Hook::RuntimeBefore)?;
        self.runtime = self.build_runtime()?;
        self.hook(Hook::Runtime)?;

        self.hook(Hook::BuildBefore)?;
        let used = format!(
            "{}{}{}",
            self.runtime.header,
            self.runtime.body,
            self.script_info()?.source
        );
        if let Some(script) = self.script.as_mut() {
            script.shake(&used);
        }
        self.hook(Hook::BuildShaking)?;
        if let Some(script) = self.script.as_mut() {
            script.build(&self.options)?;
        }
        self.hook(Hook::BuildAssemble)?;
        self.result = Some(self.assemble()?);
        self.hook(Hook::Build)?;
        Ok(())
    }

    /// Moves top-level `<script>` and `<style>` sections out of the markup.
    fn split_sections(&mut self) {
        let body = std::mem::take(&mut self.dom.body);
        for node in body {
            match node {
                Node::Script(s) => self.script_nodes.push(s),
                Node::Style(s) => self.style_nodes.push(s),
                other => self.dom.body.push(other),
            }
        }
    }

    pub fn build_runtime(&self) -> Result<RuntimeParts> {
        let script = self.script_info()?;
        let gen = Generator::new(&self.options, script, self.css.as_ref());

        let root = gen.build_block(&self.dom.body, Owner::Other, BlockOptions::default())?;
        let mut body = vec!["return (function() {\nlet $cd = $component.$cd;".to_string()];
        body.push(root.source.clone());
        body.push(format!("const rootTemplate = {};", gen.fragment_of(&root)));
        body.push(format!(
            "{}($cd, rootTemplate);\n$component.$$render(rootTemplate);",
            root.name
        ));
        if script.on_mount {
            body.push(
                "if($option.noMount) $component.onMount = onMount;\nelse $tick(onMount);".to_string(),
            );
        }
        if script.on_destroy {
            body.push("$runtime.cd_onDestroy($cd, onDestroy);".to_string());
        }
        if !script.watchers.is_empty() {
            body.push(script.watchers.join("\n"));
        }
        if let Some(css) = &self.css {
            body.push(format!(
                "$runtime.addStyles('{}', `{}`);",
                css.id,
                gen.q(&css.get_content())
            ));
        }
        body.push("$$apply();\nreturn $component;\n})();".to_string());

        let mut header = Vec::new();
        if gen.resolve_class.get() {
            header.push(match &self.css {
                Some(css) => class_resolver(css),
                None => "const $$resolveClass = $runtime.noop;".to_string(),
            });
        }
        Ok(RuntimeParts {
            header: header.join("\n"),
            body: body.join("\n"),
        })
    }

    fn assemble(&self) -> Result<String> {
        let script = self.script_info()?;
        let mut code = format!(
            "import * as $runtime from '{m}';\nimport {{ $watch, $watchReadOnly, $tick }} from '{m}';\n",
            m = RUNTIME_MODULE
        );
        if self.options.hide_label {
            code.push_str(&format!(
                "import {{ $$htmlToFragmentClean as $$htmlToFragment }} from '{}';\n",
                RUNTIME_MODULE
            ));
        } else {
            code.push_str(&format!("import {{ $$htmlToFragment }} from '{}';\n", RUNTIME_MODULE));
        }
        if let Some(inject) = &self.options.inject_runtime {
            code.push_str(inject);
            code.push('\n');
        }
        let script_code = script
            .code
            .replacen("$$runtimeHeader()", &self.runtime.header, 1)
            .replacen("$$runtime()", &self.runtime.body, 1);
        code.push_str(&script_code);
        Ok(code)
    }
}

/// `$$resolveClass` backed by the scope's class map.
fn class_resolver(css: &StyleScope) -> String {
    let map = css.get_class_map();
    let class_map = map
        .class_map
        .iter()
        .map(|(k, v)| format!("'{}': '{}'", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    let meta_class = map
        .meta_class
        .iter()
        .map(|(k, v)| match v {
            ExternalClass::Passthrough => format!("'{}': true", k),
            ExternalClass::Hash(h) => format!("'{}': '{}'", k, h),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let main = match &map.main {
        Some(m) => format!("'{}'", m),
        None => "null".to_string(),
    };
    format!(
        "const $$resolveClass = $runtime.makeClassResolver(\n$option, {{{}}}, {{{}}}, {}\n);",
        class_map, meta_class, main
    )
}

/// Compiles one component source into an ES module.
pub fn compile(source: &str, options: &CompileOptions) -> Result<String> {
    let mut ctx = CompileContext::new(source, options.clone());
    ctx.run().map_err(|e| e.anchor(source))?;
    ctx.result
        .ok_or_else(|| CompilerError::generation("No output produced"))
}
