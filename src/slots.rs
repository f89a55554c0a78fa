//! Slots (`<slot:name>` inside a component body) and fragments
//! (`{#fragment:name a, b}` definitions, `<fragment:name>` references).

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{Element, FragmentBlock};
use crate::codegen::{BlockOptions, Generator, Owner};
use crate::error::{ensure, CompilerError, Result};
use crate::expression::{detect_expression_type, is_simple_name, unwrap_exp, ExpressionType};

lazy_static! {
    static ref FRAGMENT_RE: Regex = Regex::new(r"#fragment:(\S+)(.*)$").unwrap();
    static ref COMMA_RE: Regex = Regex::new(r"\s*,\s*").unwrap();
}

fn wrong_name(name: &str) -> CompilerError {
    CompilerError::binding(format!("Wrong name '{}'", name))
}

/// `{name}` shorthand → (`name`, `{name}`); otherwise the attribute as is.
fn shorthand(name: &str, value: Option<&str>, content: &str) -> Result<(String, String)> {
    if name.starts_with('{') {
        ensure(value.is_none(), || CompilerError::binding(content.to_string()))?;
        return Ok((unwrap_exp(name)?, name.to_string()));
    }
    let value = value.ok_or_else(|| CompilerError::binding(content.to_string()))?;
    Ok((name.to_string(), value.to_string()))
}

impl<'c> Generator<'c> {
    /// Renders the caller-supplied slot, or the default body when absent.
    pub fn attach_slot(&self, slot_name: &str, label: &str, node: &Element) -> Result<String> {
        let mut bind = Vec::new();
        for prop in &node.attributes {
            let (name, value) = shorthand(&prop.name, prop.value.as_deref(), &prop.content)?;
            ensure(is_simple_name(&name), || wrong_name(&name))?;
            if value.starts_with('{') {
                let exp = unwrap_exp(&value)?;
                bind.push(format!(
                    "if('set_{name}' in s) {{\n$watch($cd, () => ({exp}), s.set_{name}, {{ro: true, cmp: $runtime.$$compareDeep}});\n}}",
                    name = name,
                    exp = exp
                ));
            } else {
                bind.push(format!("if('set_{}' in s) s.set_{}(`{}`);", name, name, self.q(&value)));
            }
        }

        let placeholder = if node.body.is_empty() {
            String::new()
        } else {
            let block = self.build_block(&node.body, Owner::Element, BlockOptions::default())?;
            format!(
                " else {{\n{};\nlet $tpl = {};\n{}($cd, $tpl);\n{}.parentNode.insertBefore($tpl, {}.nextSibling);\n}}",
                block.source,
                self.fragment_of(&block),
                block.name,
                label,
                label
            )
        };

        Ok(format!(
            "{{\nlet $slot = $option.slots && $option.slots.{slot};\nif($slot) {{\nlet s = $slot({label}, $component);\n$runtime.cd_onDestroy($cd, s.destroy);\n{bind}\n}}{placeholder};\n}}",
            slot = slot_name,
            label = label,
            bind = bind.join("\n"),
            placeholder = placeholder
        ))
    }

    /// Standalone `$fragment_<name>` factory for a fragment definition.
    pub fn make_fragment(&self, node: &FragmentBlock) -> Result<String> {
        let caps = FRAGMENT_RE
            .captures(&node.value)
            .ok_or_else(|| CompilerError::binding(format!("Wrong fragment: {}", node.value)))?;
        let name = caps[1].to_string();
        ensure(is_simple_name(&name), || wrong_name(&name))?;

        let mut head = Vec::new();
        let args = caps[2].trim();
        if !args.is_empty() {
            for arg in COMMA_RE.split(args) {
                ensure(is_simple_name(arg), || wrong_name(arg))?;
                head.push(format!(
                    "let {a};\nif($$args.{a} != null) {{\nif(typeof $$args.{a} == 'function') {{\n$cd.prefix.push(() => {{{a} = $$args.{a}()}});\n}} else {a} = $$args.{a};\n}}",
                    a = arg
                ));
            }
        }

        if node.body.is_empty() {
            self.options.warn(format!("Empty fragment: '{}'", node.value));
            return Ok(format!("function $fragment_{}() {{}};", name));
        }
        let block = self.build_block(&node.body, Owner::Other, BlockOptions::default())?;
        Ok(format!(
            "function $fragment_{name}($cd, label, $option) {{\nlet $$args = $option.args;\n{head}\n{source};\nlet $tpl = {fragment};\n{build}($cd, $tpl);\nlabel.parentNode.insertBefore($tpl, label.nextSibling);\n}};",
            name = name,
            head = head.join("\n"),
            source = block.source,
            fragment = self.fragment_of(&block),
            build = block.name
        ))
    }

    /// Calls a fragment factory at `<fragment:name ...>`.
    pub fn attach_fragment(&self, node: &Element, label: &str) -> Result<String> {
        let name = node.el_arg.as_deref().unwrap_or("");
        ensure(is_simple_name(name), || wrong_name(name))?;

        let mut head = Vec::new();
        for prop in &node.attributes {
            let event = prop
                .name
                .strip_prefix('@')
                .or_else(|| prop.name.strip_prefix("on:"));
            let Some(event) = event else {
                let (arg, value) = shorthand(&prop.name, prop.value.as_deref(), &prop.content)?;
                ensure(is_simple_name(&arg), || wrong_name(&arg))?;
                if value.contains('{') {
                    head.push(format!("args.{} = () => ({});", arg, unwrap_exp(&value)?));
                } else {
                    head.push(format!("args.{} = `{}`;", arg, self.q(&value)));
                }
                continue;
            };

            if event == "@" {
                head.push("events = $option.events;".to_string());
                continue;
            }
            let mut parts: Vec<&str> = event.split(':').collect();
            let event = parts.remove(0);
            ensure(is_simple_name(event), || wrong_name(event))?;

            let mut exp = None;
            let mut handler = None;
            match &prop.value {
                Some(v) => exp = Some(unwrap_exp(v)?),
                None => match parts.pop() {
                    Some(h) => handler = Some(h.to_string()),
                    None => {
                        head.push(format!("events.{} = $option.events.{};", event, event));
                        continue;
                    }
                },
            }
            ensure(handler.is_some() != exp.is_some(), || {
                CompilerError::binding(prop.content.clone())
            })?;

            let callback = match exp {
                Some(e) => match detect_expression_type(&e) {
                    Some(ExpressionType::Identifier) => {
                        self.check_root_name(&e);
                        e
                    }
                    Some(ExpressionType::Function) => e,
                    None => format!("($event) => {{{}}}", self.q(&e)),
                },
                None => {
                    let h = handler.unwrap_or_default();
                    self.check_root_name(&h);
                    h
                }
            };
            head.push(format!("events.{} = {};", event, callback));
        }

        Ok(format!(
            "{{\nlet args = {{}};\nlet events = {{}};\n{}\n$fragment_{}($cd, {}, {{args, events}});\n}}",
            head.join("\n"),
            name,
            label
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::error::Warning;
    use crate::parse::parse;
    use crate::script;
    use std::sync::{Arc, Mutex};

    fn generate_with(markup: &str, options: &CompileOptions) -> String {
        let root = parse(markup).unwrap();
        let info = script::transform(None, options, false).unwrap();
        let gen = Generator::new(options, &info, None);
        gen.build_block(&root.body, Owner::Other, BlockOptions::default())
            .unwrap()
            .source
    }

    fn generate(markup: &str) -> String {
        generate_with(markup, &CompileOptions::default())
    }

    #[test]
    fn test_slot_with_default_body_and_props() {
        let source = generate("<div><slot:title item={row} mode=\"short\">none</slot></div>");
        assert!(source.contains("let $slot = $option.slots && $option.slots.title;"));
        assert!(source.contains("$watch($cd, () => (row), s.set_item, {ro: true, cmp: $runtime.$$compareDeep});"));
        assert!(source.contains("if('set_mode' in s) s.set_mode(`short`);"));
        assert!(source.contains("let $tpl = $$htmlToFragment(`none`);"));
    }

    #[test]
    fn test_fragment_definition_and_use() {
        let source = generate(
            "{#fragment:row title, count}<b>{title}</b>{/fragment}<fragment:row title=\"A\" count={n} @click={pick} @@/>",
        );
        assert!(source.contains("function $fragment_row($cd, label, $option) {"));
        assert!(source.contains("$cd.prefix.push(() => {count = $$args.count()});"));
        assert!(source.contains("args.title = `A`;"));
        assert!(source.contains("args.count = () => (n);"));
        assert!(source.contains("events.click = pick;"));
        assert!(source.contains("events = $option.events;"));
        assert!(source.contains("$fragment_row($cd, el"));
    }

    #[test]
    fn test_empty_fragment_warns() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = CompileOptions {
            warning: Arc::new(move |w: &Warning| sink.lock().unwrap().push(w.message.clone())),
            ..CompileOptions::default()
        };
        let source = generate_with("{#fragment:blank}{/fragment}", &options);
        assert!(source.contains("function $fragment_blank() {};"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["Empty fragment: '#fragment:blank'"]);
    }

    #[test]
    fn test_fragment_wrong_name() {
        let root = parse("<fragment:a-b/>").unwrap();
        let options = CompileOptions::default();
        let info = script::transform(None, &options, false).unwrap();
        let gen = Generator::new(&options, &info, None);
        assert!(gen
            .build_block(&root.body, Owner::Other, BlockOptions::default())
            .is_err());
    }
}
