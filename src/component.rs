//! Nested component invocation: `<Child a={x} :b={y} @ev={h}>...</Child>`
//! and dynamic `<component:{Ctor}>`.
//!
//! The invocation collects three kinds of code:
//! - `root_head`: declarations of the option objects (`props`, `events`, ...);
//! - `head`: statements filling them, including reactive prop watchers;
//! - `binds`: statements run against the returned `$child` handle.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::ast::{Element, Node, SlotBlock};
use crate::codegen::{BlockOptions, ElRef, Generator, Owner};
use crate::error::{ensure, CompilerError, Result};
use crate::expression::{detect_expression_type, is_simple_name, unwrap_exp, ExpressionType};

lazy_static! {
    static ref SLOT_NAME_RE: Regex = Regex::new(r"^#slot:(\S+)").unwrap();
    static ref SLOT_ARGS_RE: Regex = Regex::new(r"(?s)^#slot\S*\s+(.*)$").unwrap();
    static ref COMMA_RE: Regex = Regex::new(r"\s*,\s*").unwrap();
    static ref EVENT_SPLIT_RE: Regex = Regex::new(r"[|:]").unwrap();
}

/// Which option objects the invocation passes to the child.
#[derive(Debug, Default)]
struct PassOption {
    push: bool,
    class: bool,
    slots: bool,
    events: bool,
}

/// Kind of the last prop written, used to open a new nesting level when
/// explicit props follow a spread (and the other way around).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropKind {
    Binding,
    Spreading,
    Prop,
    Attr,
}

#[derive(Debug, Default)]
struct Invocation {
    head: Vec<String>,
    binds: Vec<String>,
    pass: PassOption,
    forward_all_events: bool,
    bound_events: HashSet<String>,
    level: usize,
    level_kind: Option<PropKind>,
}

impl Invocation {
    fn prop_object(&self) -> String {
        if self.level > 0 {
            format!("$$lvl[{}]", self.level)
        } else {
            "props".to_string()
        }
    }

    /// Opens a new level when a plain prop follows a spread.
    fn plain_prop(&mut self, kind: PropKind) {
        if self.level_kind == Some(PropKind::Spreading) {
            self.level += 1;
        }
        self.level_kind = Some(kind);
    }

    fn add_event(&mut self, event: &str, callback: &str) {
        self.pass.events = true;
        if self.forward_all_events || self.bound_events.contains(event) {
            self.head.push(format!(
                "$runtime.$$addEventForComponent(events, '{}', {});",
                event, callback
            ));
        } else {
            self.head.push(format!("events.{} = {};", event, callback));
        }
        self.bound_events.insert(event.to_string());
    }
}

fn slot_name(slot: &SlotBlock) -> String {
    SLOT_NAME_RE
        .captures(&slot.value)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "default".to_string())
}

impl<'c> Generator<'c> {
    pub fn make_component(&self, node: &Element, el: &mut ElRef<'_>) -> Result<String> {
        let label = el.name();
        let mut inv = Invocation::default();

        let mut dynamic = None;
        if node.name == "component" {
            let arg = node
                .el_arg
                .as_deref()
                .ok_or_else(|| CompilerError::binding("Wrong dynamic component"))?;
            dynamic = Some(if arg.starts_with('{') {
                unwrap_exp(arg)?
            } else {
                arg.to_string()
            });
        }

        if !node.body.is_empty() {
            self.component_slots(&node.body, &mut inv)?;
        }

        let mut props = Vec::new();
        for prop in &node.attributes {
            let name = prop.name.as_str();
            if name == "@@" {
                inv.forward_all_events = true;
            } else if name.starts_with(':') || name.starts_with("bind:") {
                let inner = name.strip_prefix(':').unwrap_or_else(|| &name[5..]);
                let outer = match &prop.value {
                    Some(v) => unwrap_exp(v)?,
                    None => inner.to_string(),
                };
                ensure(is_simple_name(inner), || {
                    CompilerError::binding(format!("Wrong property: '{}'", inner))
                })?;
                ensure(
                    detect_expression_type(&outer) == Some(ExpressionType::Identifier),
                    || CompilerError::binding(format!("Wrong bind name: {}", outer)),
                )?;

                let watch = self.names.next("$$w");
                inv.level_kind = Some(PropKind::Binding);
                inv.pass.push = true;
                inv.head.push(format!(
                    "const {w} = $watch($cd, () => ({outer}), _{inner} => {{\nprops.{inner} = _{inner};\n{w}.pair && {w}.pair({w}.value);\n$$push();\n}}, {{ro: true, cmp: $runtime.$$compareDeep}});\n$runtime.fire({w});",
                    w = watch,
                    outer = outer,
                    inner = inner
                ));
                let setter = outer.replace('.', "_");
                inv.binds.push(format!(
                    "$runtime.bindPropToComponent($child, '{inner}', {w}, _{s} => {{\n{outer} = _{s};\n$$apply();\n}});",
                    inner = inner,
                    w = watch,
                    s = setter,
                    outer = outer
                ));
            } else if name == "this" {
                dynamic = Some(get_value(prop.value.as_deref(), &prop.content)?);
            } else {
                props.push(prop);
            }
        }

        for prop in props {
            let mut name = prop.name.clone();
            let mut value = prop.value.clone();

            if let Some(target) = name.strip_prefix('#') {
                ensure(value.is_none(), || CompilerError::binding("Wrong ref"))?;
                ensure(is_simple_name(target), || CompilerError::binding(target.to_string()))?;
                self.check_root_name(target);
                inv.binds.push(format!("{} = $child;", target));
                continue;
            }
            if name.starts_with('{') {
                let inner = unwrap_exp(&name)?;
                if let Some(spread) = inner.strip_prefix("...") {
                    if inv.level_kind.is_some() {
                        inv.level += 1;
                    }
                    inv.level_kind = Some(PropKind::Spreading);
                    ensure(
                        detect_expression_type(spread) == Some(ExpressionType::Identifier),
                        || CompilerError::binding("Wrong prop"),
                    )?;
                    inv.pass.push = true;
                    let object = inv.prop_object();
                    inv.head.push(format!(
                        "$runtime.fire($watch($cd, () => ({}), (value) => {{\n$runtime.spreadObject({}, value);\n$$push();\n}}, {{ro: true, cmp: $runtime.$$deepComparator(0)}}));",
                        spread, object
                    ));
                    continue;
                }
                ensure(
                    detect_expression_type(&inner) == Some(ExpressionType::Identifier),
                    || CompilerError::binding("Wrong prop"),
                )?;
                value = Some(name.clone());
                name = inner;
            } else if let Some(arg) = name.strip_prefix('@').or_else(|| name.strip_prefix("on:")) {
                let arg = arg.to_string();
                self.component_event(&arg, value.as_deref(), &prop.content, &mut inv)?;
                continue;
            } else if name == "class" || name.starts_with("class:") {
                let parts: Vec<&str> = name.split(':').collect();
                let meta_class = match parts.as_slice() {
                    [_] => "$$main",
                    [_, meta] if !meta.is_empty() => *meta,
                    _ => return Err(CompilerError::binding(format!("Wrong class: {}", prop.content))),
                };
                let value = value
                    .as_deref()
                    .ok_or_else(|| CompilerError::binding(prop.content.clone()))?;
                let exp = self.parse_text(value)?.result;
                let func = self.names.next("$$pf");
                inv.head.push(format!(
                    "const {f} = () => $$resolveClass({exp});\n$class['{m}'] = {f}();\n$watch($cd, {f}, (result) => {{\n$class['{m}'] = result;\n$$push();\n}}, {{ro: true, value: $class['{m}']}});",
                    f = func,
                    exp = exp,
                    m = meta_class
                ));
                inv.pass.class = true;
                inv.pass.push = true;
                self.resolve_class.set(true);
                continue;
            }

            ensure(is_simple_name(&name), || {
                CompilerError::binding(format!("Wrong property: '{}'", name))
            })?;
            match value.as_deref() {
                Some(v) if v.contains('{') => {
                    let exp = self.parse_text(v)?.result;
                    inv.plain_prop(PropKind::Prop);
                    inv.pass.push = true;
                    let object = inv.prop_object();
                    inv.head.push(format!(
                        "$runtime.fire($watch($cd, () => ({exp}), _{n} => {{\n{o}.{n} = _{n};\n$$push();\n}}, {{ro: true, cmp: $runtime.$$compareDeep}}));",
                        exp = exp,
                        n = name,
                        o = object
                    ));
                }
                v => {
                    let literal = match v {
                        Some(v) => format!("`{}`", self.q(v)),
                        None => "true".to_string(),
                    };
                    inv.plain_prop(PropKind::Attr);
                    let object = inv.prop_object();
                    inv.head.push(format!("{}.{} = {};", object, name, literal));
                }
            }
        }

        let mut options = vec!["$$: $component".to_string()];
        let mut root_head = Vec::new();
        if inv.pass.push {
            root_head.push("let $$push = $runtime.noop;".to_string());
            inv.binds.push("$$push = $child.push;".to_string());
        }
        if inv.pass.class {
            root_head.push("let $class = {};".to_string());
            options.push("$class".to_string());
        }
        if inv.pass.slots {
            root_head.push("let slots = {};".to_string());
            options.push("slots".to_string());
        }
        if inv.level > 0 {
            root_head.push(format!(
                "let $$lvl = [], props = $runtime.makeTree({}, $$lvl);",
                inv.level
            ));
            options.push("props".to_string());
        } else if inv.level_kind.is_some() {
            root_head.push("let props = {};".to_string());
            options.push("props".to_string());
        }
        if inv.forward_all_events {
            root_head.push("let events = Object.assign({}, $option.events);".to_string());
            options.push("events".to_string());
        } else if inv.pass.events {
            root_head.push("let events = {};".to_string());
            options.push("events".to_string());
        }

        let make_src = |constructor: &str, brackets: bool| -> String {
            let mut result = String::new();
            let mut scope = false;
            if !root_head.is_empty() || !inv.head.is_empty() {
                scope = true;
                result.push_str(&root_head.join("\n"));
                result.push('\n');
                result.push_str(&inv.head.join("\n"));
                result.push('\n');
            }
            let call = format!(
                "$runtime.callComponent($cd, {}, {}, {{{}}});",
                constructor,
                label,
                options.join(", ")
            );
            if inv.binds.is_empty() {
                result.push_str(&call);
            } else {
                scope = true;
                result.push_str(&format!(
                    "let $child = {}\nif($child) {{\n{}\n}}",
                    call,
                    inv.binds.join("\n")
                ));
            }
            if brackets && scope {
                format!("{{\n{}\n}}", result)
            } else {
                result
            }
        };

        let Some(dynamic) = dynamic else {
            return Ok(make_src(&node.name, true));
        };
        let factory = self.names.next("$$comp");
        Ok(format!(
            "{{\nconst {f} = ($cd, $ComponentConstructor) => {{\n{src}\n}};\nlet childCD, finalLabel = $runtime.getFinalLabel({label});\n$watch($cd, () => ({exp}), ($ComponentConstructor) => {{\nif(childCD) {{\nchildCD.destroy();\n$runtime.removeElementsBetween({label}, finalLabel);\n}}\nchildCD = null;\nif($ComponentConstructor) {{\nchildCD = $cd.new();\n{f}(childCD, $ComponentConstructor);\n}}\n}});\n}}",
            f = factory,
            src = make_src("$ComponentConstructor", false),
            label = label,
            exp = dynamic
        ))
    }

    /// Compiles `{#slot}` children (and the remaining body as the default
    /// slot) into `slots.<name>` factories.
    fn component_slots(&self, body: &[Node], inv: &mut Invocation) -> Result<()> {
        let mut slots: Vec<(String, Option<&SlotBlock>, Vec<Node>)> = Vec::new();
        let mut rest = Vec::new();
        for n in body {
            match n {
                Node::Slot(slot) => {
                    let name = slot_name(slot);
                    ensure(!slots.iter().any(|(s, _, _)| *s == name), || {
                        CompilerError::binding(format!("double slot: {}", name))
                    })?;
                    slots.push((name, Some(slot), slot.body.clone()));
                }
                other => rest.push(other.clone()),
            }
        }
        if !slots.iter().any(|(s, _, _)| s == "default") && rest.iter().any(|n| !n.is_blank_text()) {
            slots.push(("default".to_string(), None, rest));
        }

        for (name, slot, body) in &slots {
            ensure(is_simple_name(name), || {
                CompilerError::binding(format!("Wrong slot name '{}'", name))
            })?;
            let mut args = String::new();
            let mut setters = String::new();
            if let Some(c) = slot.and_then(|s| SLOT_ARGS_RE.captures(&s.value)) {
                let props: Vec<&str> = COMMA_RE.split(c[1].trim()).collect();
                for p in &props {
                    ensure(is_simple_name(p), || CompilerError::binding("Wrong prop for slot"))?;
                }
                args = format!("let {};", props.join(", "));
                setters = props
                    .iter()
                    .map(|p| format!(",\nset_{p}: (_{p}) => {{{p} = _{p}; $$apply();}}", p = p))
                    .collect();
            }

            inv.pass.slots = true;
            let block = self.build_block(body, Owner::Other, BlockOptions::default())?;
            inv.head.push(format!(
                "slots.{name} = function($label, $component) {{\nlet $childCD = $cd.new();\nlet $tpl = {fragment};\n{args}\n{source};\n{build}($childCD, $tpl);\n$label.parentNode.insertBefore($tpl, $label.nextSibling);\nreturn {{\ndestroy: () => {{\n$childCD.destroy();\n}}{setters}\n}};\n}};",
                name = name,
                fragment = self.fragment_of(&block),
                args = args,
                source = block.source,
                build = block.name,
                setters = setters
            ));
        }
        Ok(())
    }

    fn component_event(
        &self,
        arg: &str,
        value: Option<&str>,
        content: &str,
        inv: &mut Invocation,
    ) -> Result<()> {
        let mut parts: Vec<&str> = EVENT_SPLIT_RE.split(arg).collect();
        let event = parts.remove(0);
        ensure(!event.is_empty(), || CompilerError::binding(content.to_string()))?;

        let mut exp = None;
        let mut handler = None;
        match value {
            Some(v) => exp = Some(unwrap_exp(v)?),
            None => match parts.pop() {
                Some(h) => handler = Some(h.to_string()),
                None => {
                    inv.add_event(event, &format!("$option.events.{}", event));
                    return Ok(());
                }
            },
        }
        ensure(parts.is_empty(), || CompilerError::binding(content.to_string()))?;
        ensure(handler.is_some() != exp.is_some(), || {
            CompilerError::binding(content.to_string())
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
        inv.add_event(event, &callback);
        Ok(())
    }
}

fn get_value(value: Option<&str>, content: &str) -> Result<String> {
    let value = value.ok_or_else(|| CompilerError::binding(content.to_string()))?;
    unwrap_exp(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{BlockOptions, Owner};
    use crate::config::CompileOptions;
    use crate::parse::parse;
    use crate::script;

    fn generate(markup: &str) -> String {
        let root = parse(markup).unwrap();
        let options = CompileOptions::default();
        let info = script::transform(None, &options, false).unwrap();
        let gen = Generator::new(&options, &info, None);
        gen.build_block(&root.body, Owner::Other, BlockOptions::default())
            .unwrap()
            .source
    }

    #[test]
    fn test_plain_component_call() {
        let source = generate("<Child/>");
        assert!(source.contains("$runtime.callComponent($cd, Child, el0, {$$: $component});"));
    }

    #[test]
    fn test_props_static_and_reactive() {
        let source = generate("<Child title=\"Hi\" flag count={n}/>");
        assert!(source.contains("let props = {};"));
        assert!(source.contains("props.title = `Hi`;"));
        assert!(source.contains("props.flag = true;"));
        assert!(source.contains("$runtime.fire($watch($cd, () => ((n)), _count => {\nprops.count = _count;"));
        assert!(source.contains("let $child = $runtime.callComponent($cd, Child, el0, {$$: $component, props});"));
        assert!(source.contains("$$push = $child.push;"));
    }

    #[test]
    fn test_spread_opens_levels() {
        let source = generate("<Child a=\"1\" {...rest} b=\"2\"/>");
        assert!(source.contains("let $$lvl = [], props = $runtime.makeTree(2, $$lvl);"));
        assert!(source.contains("props.a = `1`;"));
        assert!(source.contains("$runtime.spreadObject($$lvl[1], value);"));
        assert!(source.contains("$$lvl[2].b = `2`;"));
    }

    #[test]
    fn test_two_way_binding_and_events() {
        let source = generate("<Child :value={name} @change={save} @close @@/>");
        assert!(source.contains("props.value = _value;"));
        assert!(source.contains("$runtime.bindPropToComponent($child, 'value', $$w"));
        assert!(source.contains("let events = Object.assign({}, $option.events);"));
        assert!(source.contains("$runtime.$$addEventForComponent(events, 'change', save);"));
        assert!(source.contains("$runtime.$$addEventForComponent(events, 'close', $option.events.close);"));
    }

    #[test]
    fn test_named_and_default_slots() {
        let source = generate("<Child>{#slot:head item}<b>{item}</b>{/slot}<i>body</i></Child>");
        assert!(source.contains("slots.head = function($label, $component) {"));
        assert!(source.contains("let item;"));
        assert!(source.contains("set_item: (_item) => {item = _item; $$apply();}"));
        assert!(source.contains("slots.default = function($label, $component) {"));
        assert!(source.contains("let $tpl = $$htmlToFragment(`<i>body</i>`);"));
        assert!(source.contains("{$$: $component, slots}"));
    }

    #[test]
    fn test_dynamic_component() {
        let source = generate("<component:{View} a=\"1\"/>");
        assert!(source.contains("const $$comp"));
        assert!(source.contains("$watch($cd, () => (View), ($ComponentConstructor) => {"));
        assert!(source.contains("$runtime.callComponent($cd, $ComponentConstructor, el0, {$$: $component, props});"));
        assert!(source.contains("$runtime.removeElementsBetween(el0, finalLabel);"));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let root = parse("<Child>{#slot:a}x{/slot}{#slot:a}y{/slot}</Child>").unwrap();
        let options = CompileOptions::default();
        let info = script::transform(None, &options, false).unwrap();
        let gen = Generator::new(&options, &info, None);
        let err = gen
            .build_block(&root.body, Owner::Other, BlockOptions::default())
            .unwrap_err();
        assert_eq!(err.message, "double slot: a");
    }
}
