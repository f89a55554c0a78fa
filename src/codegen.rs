//! Block code generation.
//!
//! `build_block` turns a list of markup nodes into two artifacts:
//! - a static HTML template (`tpl`), cloned at run time;
//! - a bind function `$$buildN($cd, $parentElement, ...)` that locates the
//!   dynamic nodes inside the clone and installs their watchers.
//!
//! Dynamic nodes are addressed by their child-index path from the block
//! root. Paths are collected in a small tree keyed by index so that shared
//! prefixes are looked up once and stored in a local (`let el3 = ...`).
//! Names are only assigned on demand: an element without dynamic
//! attributes never gets a local.

use lazy_static::lazy_static;
use regex::Regex;
use std::cell::Cell;
use std::collections::BTreeMap;

use crate::ast::{Attribute, ClassSet, Element, Node};
use crate::config::CompileOptions;
use crate::error::{ensure, CompilerError, Result};
use crate::expression::{detect_expression_type, is_simple_name, unwrap_exp, ExpressionType};
use crate::interpolate::{parse_text, Escape, ParsedText};
use crate::script::ScriptInfo;
use crate::style::StyleScope;

pub const SVG_ELEMENTS: &[&str] = &[
    "animate", "animateMotion", "animateTransform", "circle", "clipPath", "color-profile", "defs",
    "desc", "discard", "ellipse", "feBlend", "feColorMatrix", "feComponentTransfer", "feComposite",
    "feConvolveMatrix", "feDiffuseLighting", "feDisplacementMap", "feDistantLight", "feDropShadow",
    "feFlood", "feFuncA", "feFuncB", "feFuncG", "feFuncR", "feGaussianBlur", "feImage", "feMerge",
    "feMergeNode", "feMorphology", "feOffset", "fePointLight", "feSpecularLighting", "feSpotLight",
    "feTile", "feTurbulence", "filter", "g", "hatch", "hatchpath", "image", "line",
    "linearGradient", "marker", "mask", "mesh", "meshgradient", "meshpatch", "meshrow", "metadata",
    "mpath", "path", "pattern", "polygon", "polyline", "radialGradient", "rect", "set",
    "solidcolor", "stop", "switch", "symbol", "text", "textPath", "tspan", "unknown", "use", "view",
];

/// Attributes assigned as DOM properties rather than through `setAttribute`.
const DOM_PROPERTIES: &[&str] = &[
    "hidden", "checked", "value", "disabled", "selected", "innerHTML", "innerText", "placeholder",
    "src",
];

const BIND_TARGETS: &[&str] = &["value", "checked", "valueAsNumber", "valueAsDate", "selectedIndex"];

lazy_static! {
    static ref WRAPPED_RE: Regex = Regex::new(r"(?s)^\{(.*)\}$").unwrap();
    static ref ACTION_EXP_RE: Regex = Regex::new(r"(?s)^\*\{.*\}$").unwrap();
    static ref DIRECTIVE_RE: Regex = Regex::new(r"(?s)^(\w+):(.*)$").unwrap();
    static ref SYSTAG_RE: Regex = Regex::new(r"^@(\w+)\s+(.*)$").unwrap();
    static ref OPTION_SPLIT_RE: Regex = Regex::new(r"[|:]").unwrap();
}

/// Attaches the node excerpt to errors that carry no details yet.
pub fn wrap_node_error(err: CompilerError, node: &Node) -> CompilerError {
    err.or_details(|| node.excerpt())
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMING
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique-name source for one compilation.
#[derive(Debug, Default)]
pub struct NameGen(Cell<u32>);

impl NameGen {
    pub fn next(&self, prefix: &str) -> String {
        let index = self.0.get();
        self.0.set(index + 1);
        format!("{}{}", prefix, index)
    }
}

/// Address tree node: child index → subtree, plus the local holding the node.
#[derive(Debug, Default)]
struct DomNode {
    name: Option<String>,
    children: BTreeMap<usize, DomNode>,
}

/// Lazily named reference to the element at `path`.
pub struct ElRef<'b> {
    dn: &'b mut DomNode,
    path: Vec<usize>,
    names: &'b NameGen,
}

impl<'b> ElRef<'b> {
    pub fn name(&mut self) -> String {
        let mut d = &mut *self.dn;
        for &i in &self.path {
            d = d.children.entry(i).or_default();
        }
        let names = self.names;
        d.name.get_or_insert_with(|| names.next("el")).clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GENERATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared state of one compilation, passed to every sub-builder.
pub struct Generator<'c> {
    pub options: &'c CompileOptions,
    pub script: &'c ScriptInfo,
    pub css: Option<&'c StyleScope>,
    pub names: NameGen,
    /// Set when generated code calls `$$resolveClass`.
    pub resolve_class: Cell<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockOptions {
    pub protect_last_tag: bool,
    /// Extra parameters of the bind function.
    pub args: Vec<String>,
}

impl BlockOptions {
    pub fn protected() -> Self {
        Self {
            protect_last_tag: true,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Bind function name, `$runtime.noop` when nothing is bound.
    pub name: String,
    pub tpl: String,
    pub source: String,
    pub svg: bool,
}

/// What owns the body handed to [`Generator::build_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Element,
    Other,
}

/// Per-element state while its attributes are classified.
#[derive(Debug, Default)]
pub struct ElementState {
    pub classes: ClassSet,
    pub spread_object: Option<String>,
    pub skip_class: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PropBind {
    /// Static attribute text folded into the template.
    pub prop: Option<String>,
    pub bind: Option<String>,
}

impl PropBind {
    fn prop(text: impl Into<String>) -> Self {
        Self {
            prop: Some(text.into()),
            bind: None,
        }
    }

    fn bind(code: impl Into<String>) -> Self {
        Self {
            prop: None,
            bind: Some(code.into()),
        }
    }
}

impl<'c> Generator<'c> {
    pub fn new(options: &'c CompileOptions, script: &'c ScriptInfo, css: Option<&'c StyleScope>) -> Self {
        Self {
            options,
            script,
            css,
            names: NameGen::default(),
            resolve_class: Cell::new(false),
        }
    }

    fn escape(&self) -> Escape {
        if self.options.inline_template {
            Escape::Inline
        } else {
            Escape::Template
        }
    }

    /// Escapes text for a template literal.
    pub fn q(&self, s: &str) -> String {
        self.escape().apply(s)
    }

    pub fn parse_text(&self, source: &str) -> Result<ParsedText> {
        parse_text(source, self.escape())
    }

    pub fn check_root_name(&self, name: &str) -> bool {
        self.script.check_root_name(name, self.options)
    }

    /// Placeholder comment anchoring a dynamic block.
    pub fn label(&self, text: &str) -> String {
        if self.options.hide_label {
            "<!---->".to_string()
        } else {
            format!("<!-- {} -->", text)
        }
    }

    /// Expression building the DOM fragment of `block`.
    pub fn fragment_of(&self, block: &Block) -> String {
        let convert = if block.svg {
            "$runtime.svgToFragment"
        } else {
            "$$htmlToFragment"
        };
        format!("{}(`{}`)", convert, self.q(&block.tpl))
    }

    pub fn build_block(&self, body: &[Node], owner: Owner, options: BlockOptions) -> Result<Block> {
        let mut builder = BlockBuilder {
            gen: self,
            tpl: String::new(),
            lvl: Vec::new(),
            binds: Vec::new(),
            dn: DomNode::default(),
            last_tag: false,
            svg: false,
        };
        builder.go(0, body, owner, true)?;
        if builder.last_tag && options.protect_last_tag {
            builder.tpl.push_str("<!---->");
        }

        let BlockBuilder {
            tpl, binds, mut dn, svg, ..
        } = builder;
        if binds.is_empty() {
            return Ok(Block {
                name: "$runtime.noop".to_string(),
                tpl,
                source: String::new(),
                svg,
            });
        }

        let name = self.names.next("$$build");
        let mut args = vec!["$cd".to_string(), "$parentElement".to_string()];
        args.extend(options.args);
        let mut source = format!("function {}({}) {{\n", name, args.join(", "));
        self.build_nodes(&mut dn, vec!["$parentElement".to_string()], &mut source);
        source.push_str(&binds.join("\n"));
        source.push_str("};");
        Ok(Block {
            name,
            tpl,
            source,
            svg,
        })
    }

    /// Emits `let elN = ...` lookups for every named address.
    fn build_nodes(&self, d: &mut DomNode, mut path: Vec<String>, source: &mut String) {
        if d.children.len() > 1 && d.name.is_none() {
            d.name = Some(self.names.next("el"));
        }
        if let Some(name) = &d.name {
            source.push_str(&format!("let {} = {};\n", name, path.join("")));
            path = vec![name.clone()];
        }
        for (&k, child) in d.children.iter_mut() {
            let step = if k == 0 {
                "[$runtime.firstChild]".to_string()
            } else {
                format!("[$runtime.childNodes][{}]", k)
            };
            let mut next = path.clone();
            next.push(step);
            self.build_nodes(child, next, source);
        }
    }
}

/// Items of a body after filtering and text merging.
enum Item<'n> {
    Text(String),
    Node(&'n Node),
}

struct BlockBuilder<'g, 'c> {
    gen: &'g Generator<'c>,
    tpl: String,
    lvl: Vec<usize>,
    binds: Vec<String>,
    dn: DomNode,
    last_tag: bool,
    svg: bool,
}

impl<'g, 'c> BlockBuilder<'g, 'c> {
    fn el_ref(&mut self, shift: usize) -> ElRef<'_> {
        let keep = self.lvl.len().saturating_sub(shift);
        ElRef {
            dn: &mut self.dn,
            path: self.lvl[..keep].to_vec(),
            names: &self.gen.names,
        }
    }

    fn element_name(&mut self) -> String {
        self.el_ref(0).name()
    }

    fn set_lvl(&mut self, level: usize, index: &mut usize) {
        self.lvl.truncate(level);
        self.lvl.push(*index);
        *index += 1;
    }

    fn go(&mut self, level: usize, body: &[Node], owner: Owner, is_root: bool) -> Result<()> {
        let gen = self.gen;
        let mut items: Vec<Item<'_>> = Vec::new();
        for n in body {
            match n {
                Node::Script(_) | Node::Style(_) | Node::Slot(_) => continue,
                Node::Comment(_) if !gen.options.preserve_comments => continue,
                Node::Fragment(f) => {
                    let source = gen.make_fragment(f).map_err(|e| wrap_node_error(e, n))?;
                    self.binds.push(source);
                    continue;
                }
                Node::Text(t) => {
                    if let Some(Item::Text(prev)) = items.last_mut() {
                        prev.push_str(&t.value);
                        continue;
                    }
                    items.push(Item::Text(t.value.clone()));
                }
                _ => items.push(Item::Node(n)),
            }
        }

        if is_root {
            let elements: Vec<&str> = items
                .iter()
                .filter_map(|i| match i {
                    Item::Node(n) => n.element_name(),
                    Item::Text(_) => None,
                })
                .collect();
            self.svg = !elements.is_empty() && elements.iter().all(|n| SVG_ELEMENTS.contains(n));
        }

        let only_child = owner == Owner::Element && body.len() == 1;
        let mut index = 0usize;
        for item in &items {
            let result = match item {
                Item::Text(value) => self.bind_text(level, &mut index, value),
                Item::Node(n) => self
                    .bind_node(level, &mut index, n, only_child)
                    .map_err(|e| wrap_node_error(e, n)),
            };
            if let Err(e) = result {
                return Err(match item {
                    Item::Text(value) => e.or_details(|| value.trim().to_string()),
                    Item::Node(_) => e,
                });
            }
        }
        self.lvl.truncate(level);
        Ok(())
    }

    fn bind_text(&mut self, level: usize, index: &mut usize, value: &str) -> Result<()> {
        self.set_lvl(level, index);
        if value.contains('{') {
            self.tpl.push(' ');
            let exp = self.gen.parse_text(value)?.result;
            let el = self.element_name();
            self.binds
                .push(format!("$runtime.bindText($cd, {}, () => {});", el, exp));
        } else {
            self.tpl.push_str(value);
        }
        self.last_tag = false;
        Ok(())
    }

    fn push_label(&mut self, text: &str) {
        let label = self.gen.label(text);
        self.tpl.push_str(&label);
    }

    fn bind_node(&mut self, level: usize, index: &mut usize, n: &Node, only_child: bool) -> Result<()> {
        let gen = self.gen;
        match n {
            Node::Template(t) => {
                self.set_lvl(level, index);
                self.tpl.push_str(&t.open_tag);
                self.tpl.push_str(&t.content);
                self.tpl.push_str("</template>");
            }
            Node::Comment(c) => {
                self.set_lvl(level, index);
                self.tpl.push_str(&c.content);
            }
            Node::Element(el) => {
                self.set_lvl(level, index);
                if el.is_component() {
                    self.push_label(&el.name);
                    let bind = {
                        let mut el_ref = self.el_ref(0);
                        gen.make_component(el, &mut el_ref)?
                    };
                    self.binds.push(bind);
                    self.last_tag = true;
                    return Ok(());
                }
                if el.name == "slot" {
                    let slot_name = el.el_arg.clone().unwrap_or_else(|| "default".to_string());
                    self.push_label(&format!("Slot {}", slot_name));
                    let label = self.element_name();
                    self.binds.push(gen.attach_slot(&slot_name, &label, el)?);
                    self.last_tag = true;
                    return Ok(());
                }
                if el.name == "fragment" {
                    self.push_label(&format!("Fragment {}", el.name));
                    let label = self.element_name();
                    self.binds.push(gen.attach_fragment(el, &label)?);
                    self.last_tag = true;
                    return Ok(());
                }
                self.bind_element(level, el)?;
                self.last_tag = false;
            }
            Node::Each(each) => {
                self.set_lvl(level, index);
                if only_child {
                    let parent = self.el_ref(1).name();
                    self.binds.push(gen.make_each_block(each, &parent, true)?);
                    return Ok(());
                }
                self.push_label(&each.value);
                let label = self.element_name();
                self.binds.push(gen.make_each_block(each, &label, false)?);
                self.last_tag = true;
            }
            Node::If(block) => {
                self.set_lvl(level, index);
                self.push_label(&block.value);
                let label = self.element_name();
                self.binds.push(gen.make_if_block(block, &label)?);
                self.last_tag = true;
            }
            Node::Await(block) => {
                self.set_lvl(level, index);
                self.push_label(&block.value);
                let label = self.element_name();
                self.binds.push(gen.make_await_block(block, &label)?);
                self.last_tag = true;
            }
            Node::SysTag(tag) => {
                let caps = SYSTAG_RE
                    .captures(&tag.value)
                    .ok_or_else(|| CompilerError::binding("Wrong tag"))?;
                if &caps[1] != "html" {
                    return Err(CompilerError::binding("Wrong tag"));
                }
                self.set_lvl(level, index);
                self.push_label("html");
                let label = self.element_name();
                self.binds.push(gen.make_html_block(&caps[2], &label));
                self.last_tag = true;
            }
            Node::Text(_) | Node::Script(_) | Node::Style(_) | Node::Slot(_) | Node::Fragment(_) => {}
        }
        Ok(())
    }

    fn bind_element(&mut self, level: usize, n: &Element) -> Result<()> {
        let gen = self.gen;
        let mut state = ElementState {
            classes: n.classes.clone(),
            ..ElementState::default()
        };
        let mut parts = vec![format!("<{}", n.name)];

        if n.attributes.iter().any(|a| a.name.starts_with("{...")) {
            let spread = gen.names.next("spread");
            let scope_id = match gen.css {
                Some(css) => {
                    state.classes.add(&css.id);
                    format!("'{}'", css.id)
                }
                None => "null".to_string(),
            };
            let el = self.element_name();
            self.binds.push(format!(
                "let {} = $runtime.$$makeSpreadObject($cd, {}, {});",
                spread, el, scope_id
            ));
            state.spread_object = Some(spread);
        }

        for prop in &n.attributes {
            let result = {
                let mut el_ref = self.el_ref(0);
                gen.bind_prop(prop, &mut el_ref, n, &mut state)?
            };
            if let Some(p) = result.prop {
                parts.push(p);
            }
            if let Some(b) = result.bind {
                self.binds.push(b);
            }
        }
        if !state.classes.is_empty() {
            parts.push(format!("class=\"{}\"", state.classes.join(" ")));
        }

        let mut open = parts.join(" ");
        if n.closed_tag {
            if n.void_tag {
                open.push_str("/>");
            } else {
                open.push_str(&format!("></{}>", n.name));
            }
            self.tpl.push_str(&open);
            return Ok(());
        }
        open.push('>');
        self.tpl.push_str(&open);
        self.go(level + 1, &n.body, Owner::Element, false)?;
        self.tpl.push_str(&format!("</{}>", n.name));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Directive kind of an element attribute.
enum PropKind {
    Event(String),
    Bind(String),
    Action(Option<String>),
    Named(String, Option<String>),
}

/// `{exp}` → `exp`; empty or unwrapped values are errors.
fn get_expression(value: Option<&str>, content: &str) -> Result<String> {
    let exp = value
        .and_then(|v| WRAPPED_RE.captures(v))
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    ensure(!exp.is_empty(), || CompilerError::binding(content.to_string()))?;
    Ok(exp)
}

/// Modifier prefix of an event handler, e.g. `@keyup|enter`.
fn event_modifiers(opts: &[&str]) -> Result<String> {
    let mut m = String::new();
    let mut need_prevent = false;
    let mut prevent_inserted = false;
    for &opt in opts {
        match opt {
            "preventDefault" => {
                if !prevent_inserted {
                    m.push_str("$event.preventDefault();");
                    prevent_inserted = true;
                }
            }
            "stopPropagation" => m.push_str("$event.stopPropagation();"),
            "enter" => {
                m.push_str("if($event.keyCode != 13) return;");
                need_prevent = true;
            }
            "escape" => {
                m.push_str("if($event.keyCode != 27) return;");
                need_prevent = true;
            }
            other => {
                return Err(CompilerError::binding(format!("Wrong modificator: {}", other)))
            }
        }
    }
    if need_prevent && !prevent_inserted {
        m.push_str("$event.preventDefault();");
    }
    Ok(m)
}

impl<'c> Generator<'c> {
    /// Classifies one element attribute into static template text and/or
    /// binding code.
    pub fn bind_prop(
        &self,
        prop: &Attribute,
        el: &mut ElRef<'_>,
        node: &Element,
        state: &mut ElementState,
    ) -> Result<PropBind> {
        let mut value = prop.value.clone();
        let raw = prop.name.as_str();

        let kind = if let Some(arg) = raw.strip_prefix('@') {
            PropKind::Event(arg.to_string())
        } else if let Some(arg) = raw.strip_prefix(':') {
            PropKind::Bind(arg.to_string())
        } else if let Some(arg) = raw.strip_prefix('*') {
            if ACTION_EXP_RE.is_match(raw) {
                ensure(value.is_none(), || {
                    CompilerError::binding(format!("wrong binding: {}", prop.content))
                })?;
                value = Some(arg.to_string());
                PropKind::Action(None)
            } else {
                PropKind::Action(Some(arg.to_string()))
            }
        } else if let (None, Some(c)) = (&value, WRAPPED_RE.captures(raw)) {
            let inner = c[1].to_string();
            if let Some(spread) = inner.strip_prefix("...") {
                ensure(
                    detect_expression_type(spread) == Some(ExpressionType::Identifier),
                    || CompilerError::binding(format!("Wrong spread: {}", prop.content)),
                )?;
                let object = state
                    .spread_object
                    .as_ref()
                    .ok_or_else(|| CompilerError::generation("Spread without spread object"))?;
                return Ok(PropBind::bind(format!("{}.spread(() => {});", object, spread)));
            }
            value = Some(raw.to_string());
            PropKind::Named(inner, None)
        } else if let Some(c) = DIRECTIVE_RE.captures(raw) {
            match &c[1] {
                "on" => PropKind::Event(c[2].to_string()),
                "bind" => PropKind::Bind(c[2].to_string()),
                "use" => PropKind::Action(Some(c[2].to_string())),
                name => PropKind::Named(name.to_string(), Some(c[2].to_string())),
            }
        } else {
            PropKind::Named(raw.to_string(), None)
        };

        match kind {
            PropKind::Named(name, _) if name.starts_with('#') => {
                let target = &name[1..];
                ensure(is_simple_name(target), || CompilerError::binding(target.to_string()))?;
                self.check_root_name(target);
                Ok(PropBind::bind(format!("{}={};", target, el.name())))
            }
            PropKind::Event(arg) => self.bind_event(&arg, value.as_deref(), prop, el),
            PropKind::Bind(arg) => self.bind_input(&arg, value.as_deref(), prop, el, node, state),
            PropKind::Named(name, Some(style)) if name == "style" && !style.is_empty() => {
                let exp = match value.as_deref() {
                    Some(_) => get_expression(value.as_deref(), &prop.content)?,
                    None => style.clone(),
                };
                Ok(PropBind::bind(self.with_element(
                    &exp,
                    el,
                    |target| format!("$runtime.bindStyle($cd, {}, '{}', () => ({}));", target, style, exp),
                )))
            }
            PropKind::Action(Some(arg)) => {
                ensure(is_simple_name(&arg), || {
                    CompilerError::binding(format!("Wrong name: {}", arg))
                })?;
                self.check_root_name(&arg);
                let args = match value.as_deref() {
                    Some(_) => format!(", () => [{}]", get_expression(value.as_deref(), &prop.content)?),
                    None => String::new(),
                };
                Ok(PropBind::bind(format!(
                    "$runtime.bindAction($cd, {}, {}{});",
                    el.name(),
                    arg,
                    args
                )))
            }
            PropKind::Action(None) => {
                let exp = get_expression(value.as_deref(), &prop.content)?;
                Ok(PropBind::bind(format!(
                    "$tick(() => {{ let $element={}; {}; $$apply(); }});",
                    el.name(),
                    exp
                )))
            }
            PropKind::Named(name, arg) if name == "class" => {
                self.bind_class(arg.is_some(), prop, el, node, state)
            }
            PropKind::Named(name, arg) => {
                let full = match &arg {
                    Some(a) => format!("{}:{}", name, a),
                    None => name,
                };
                self.bind_attribute(&full, value.as_deref(), prop, el, state)
            }
        }
    }

    /// Wraps code needing `$element` in a block declaring it.
    fn with_element(&self, exp: &str, el: &mut ElRef<'_>, code: impl FnOnce(&str) -> String) -> String {
        if exp.contains("$element") {
            format!("{{\nlet $element={};\n{}\n}}", el.name(), code("$element"))
        } else {
            code(&el.name())
        }
    }

    fn bind_event(
        &self,
        arg: &str,
        value: Option<&str>,
        prop: &Attribute,
        el: &mut ElRef<'_>,
    ) -> Result<PropBind> {
        if arg == "@" {
            ensure(value.is_none(), || CompilerError::binding(prop.content.clone()))?;
            return Ok(PropBind::bind(format!(
                "{{\nfor(let event in $option.events) {{\n$runtime.addEvent($cd, {}, event, $option.events[event]);\n}}\n}}",
                el.name()
            )));
        }

        let mut opts: Vec<&str> = OPTION_SPLIT_RE.split(arg).collect();
        let event = opts.remove(0).to_string();
        let mut exp: Option<String> = None;
        let mut handler: Option<String> = None;
        match value {
            Some(_) => exp = Some(get_expression(value, &prop.content)?),
            None => {
                if opts.is_empty() {
                    return Ok(PropBind::bind(format!(
                        "$runtime.addEvent($cd, {}, \"{}\", ($event) => {{ const fn = $option.events.{}; if(fn) fn($event); }});",
                        el.name(),
                        event,
                        event
                    )));
                }
                handler = opts.pop().map(str::to_string);
            }
        }
        ensure(!event.is_empty(), || CompilerError::binding(prop.content.clone()))?;
        ensure(handler.is_some() != exp.is_some(), || {
            CompilerError::binding(prop.content.clone())
        })?;
        let modifiers = event_modifiers(&opts)?;

        let mut func_name = None;
        if let Some(e) = &exp {
            match detect_expression_type(e) {
                Some(ExpressionType::Identifier) => {
                    handler = exp.take();
                }
                Some(ExpressionType::Function) => func_name = Some(self.names.next("fn")),
                None => {}
            }
        }

        if let (Some(func), Some(exp)) = (&func_name, &exp) {
            let code = |target: &str| {
                format!(
                    "const {} = {};\n$runtime.addEvent($cd, {}, \"{}\", ($event) => {{ {} {}($event); $$apply();}});",
                    func, exp, target, event, modifiers, func
                )
            };
            return Ok(PropBind::bind(if exp.contains("$element") {
                format!("{{\nlet $element={};\n{}\n}}", el.name(), code("$element"))
            } else {
                code(&el.name())
            }));
        }
        if let Some(handler) = handler {
            self.check_root_name(&handler);
            return Ok(PropBind::bind(format!(
                "$runtime.addEvent($cd, {}, \"{}\", ($event) => {{ {} {}($event); $$apply();}});",
                el.name(),
                event,
                modifiers,
                handler
            )));
        }
        let exp = exp.unwrap_or_default();
        Ok(PropBind::bind(self.with_element(&exp, el, |target| {
            format!(
                "$runtime.addEvent($cd, {}, \"{}\", ($event) => {{ {} {}; $$apply(); }});",
                target, event, modifiers, exp
            )
        })))
    }

    fn bind_input(
        &self,
        arg: &str,
        value: Option<&str>,
        prop: &Attribute,
        el: &mut ElRef<'_>,
        node: &Element,
        state: &ElementState,
    ) -> Result<PropBind> {
        let mut args: Vec<&str> = OPTION_SPLIT_RE.split(arg).collect();
        let mut attr = args.remove(0).to_string();
        ensure(!attr.is_empty(), || CompilerError::binding(prop.content.clone()))?;

        let exp = match value {
            Some(_) => get_expression(value, &prop.content)?,
            None => args.pop().map(str::to_string).unwrap_or_else(|| attr.clone()),
        };
        let input_type = if node.name == "input" {
            node.attribute("type").and_then(|a| a.value.clone())
        } else {
            None
        };

        ensure(BIND_TARGETS.contains(&attr.as_str()), || {
            CompilerError::binding(format!("Not supported: {}", prop.content))
        })?;
        ensure(args.is_empty(), || CompilerError::binding(prop.content.clone()))?;
        ensure(
            detect_expression_type(&exp) == Some(ExpressionType::Identifier),
            || CompilerError::binding(format!("Wrong bind name: {}", prop.content)),
        )?;
        if attr == "value" && matches!(input_type.as_deref(), Some("number") | Some("range")) {
            attr = "valueAsNumber".to_string();
        }

        let spreading = match &state.spread_object {
            Some(spread) => format!("{}.except(['{}']);\n", spread, attr),
            None => String::new(),
        };
        let el_name = el.name();
        let arg_name = self.names.next("a");
        Ok(PropBind::bind(format!(
            "{}$runtime.bindInput($cd, {}, '{}', () => {}, {} => {{{} = {}; $$apply();}});",
            spreading,
            el_name,
            attr,
            exp,
            arg_name,
            exp,
            arg_name
        )))
    }

    fn bind_class(
        &self,
        directive: bool,
        prop: &Attribute,
        el: &mut ElRef<'_>,
        node: &Element,
        state: &mut ElementState,
    ) -> Result<PropBind> {
        let Some(css) = self.css else {
            if directive {
                let class_name = &prop.name["class:".len()..];
                return self.class_toggle(class_name, prop, el).map(PropBind::bind);
            }
            if prop.value.as_deref().map_or(false, |v| v.contains('{')) {
                return self.bind_attribute("class", prop.value.as_deref(), prop, el, state);
            }
            return Ok(PropBind::prop(prop.content.clone()));
        };
        if state.skip_class {
            return Ok(PropBind::default());
        }
        state.skip_class = true;

        let props: Vec<&Attribute> = node
            .attributes
            .iter()
            .filter(|a| a.name == "class" || a.name.starts_with("class:"))
            .collect();

        let compound = props.iter().any(|p| {
            if p.name == "class" {
                let value = p.value.as_deref().unwrap_or("");
                if value.contains('{') {
                    return true;
                }
                value
                    .split_whitespace()
                    .any(|name| css.is_external_class(name).is_some())
            } else {
                css.is_external_class(&p.name[6..]).is_some()
            }
        });

        if compound {
            let default_hash = if state.classes.contains(&css.id) {
                format!(",'{}'", css.id)
            } else {
                String::new()
            };
            state.classes.clear();
            self.resolve_class.set(true);
            let mut parts = Vec::new();
            for p in &props {
                if p.name == "class" {
                    parts.push(self.parse_text(p.value.as_deref().unwrap_or(""))?.result);
                } else {
                    let class_name = &p.name[6..];
                    ensure(!class_name.is_empty(), || CompilerError::binding(p.content.clone()))?;
                    let exp = match &p.value {
                        Some(v) => unwrap_exp(v)?,
                        None => class_name.to_string(),
                    };
                    parts.push(format!("({}) ? `{}` : ''", exp, self.q(class_name)));
                }
            }
            let exp = parts.join(") + ' ' + (");
            return Ok(PropBind::bind(format!(
                "$watchReadOnly($cd, () => $$resolveClass(({}){}), value => $runtime.setClassToElement({}, value));",
                exp,
                default_hash,
                el.name()
            )));
        }

        let mut binds = Vec::new();
        for p in &props {
            if p.name == "class" {
                for name in p.value.as_deref().unwrap_or("").split_whitespace() {
                    state.classes.add(name);
                }
            } else {
                binds.push(self.class_toggle(&p.name[6..], p, el)?);
            }
        }
        Ok(if binds.is_empty() {
            PropBind::default()
        } else {
            PropBind::bind(binds.join("\n"))
        })
    }

    fn class_toggle(&self, class_name: &str, prop: &Attribute, el: &mut ElRef<'_>) -> Result<String> {
        ensure(!class_name.is_empty(), || CompilerError::binding(prop.content.clone()))?;
        let exp = match &prop.value {
            Some(v) => unwrap_exp(v)?,
            None => class_name.to_string(),
        };
        Ok(format!(
            "$runtime.bindClass($cd, {}, () => !!({}), '{}');",
            el.name(),
            exp,
            class_name
        ))
    }

    fn bind_attribute(
        &self,
        name: &str,
        value: Option<&str>,
        prop: &Attribute,
        el: &mut ElRef<'_>,
        state: &ElementState,
    ) -> Result<PropBind> {
        let Some(value) = value else {
            return Ok(match &state.spread_object {
                Some(spread) => PropBind::bind(format!("{}.attr('{}', '');", spread, name)),
                None => PropBind::prop(prop.content.clone()),
            });
        };
        if !value.contains('{') {
            return Ok(match &state.spread_object {
                Some(spread) => PropBind::bind(format!("{}.attr('{}', '{}');", spread, name, value)),
                None => PropBind::prop(prop.content.clone()),
            });
        }

        let exp = self.parse_text(value)?.result;
        if let Some(spread) = &state.spread_object {
            return Ok(PropBind::bind(format!("{}.prop('{}', () => {});", spread, name, exp)));
        }
        let code = if DOM_PROPERTIES.contains(&name) {
            self.with_element(value, el, |target| {
                format!(
                    "$watchReadOnly($cd, () => ({}), (value) => {{{}.{} = value;}});",
                    exp, target, name
                )
            })
        } else {
            self.with_element(value, el, |target| {
                format!("$runtime.bindAttribute($cd, {}, '{}', () => ({}));", target, name, exp)
            })
        };
        Ok(PropBind::bind(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::script;

    fn build(markup: &str, options: &CompileOptions) -> Block {
        let root = parse(markup).unwrap();
        let info = script::transform(None, options, false).unwrap();
        let gen = Generator::new(options, &info, None);
        gen.build_block(&root.body, Owner::Other, BlockOptions::default())
            .unwrap()
    }

    #[test]
    fn test_static_markup_has_no_bind_function() {
        let block = build("<div class=\"a\"><b>hi</b></div>", &CompileOptions::default());
        assert_eq!(block.name, "$runtime.noop");
        assert_eq!(block.tpl, "<div class=\"a\"><b>hi</b></div>");
        assert!(block.source.is_empty());
    }

    #[test]
    fn test_text_binding_addresses_node() {
        let block = build("<div><p>a</p><p>{name}</p></div>", &CompileOptions::default());
        assert_eq!(block.tpl, "<div><p>a</p><p> </p></div>");
        assert_eq!(block.name, "$$build1");
        assert!(block.source.starts_with("function $$build1($cd, $parentElement) {\n"));
        assert!(block
            .source
            .contains("let el0 = $parentElement[$runtime.firstChild][$runtime.childNodes][1][$runtime.firstChild];"));
        assert!(block.source.contains("$runtime.bindText($cd, el0, () => (name));"));
    }

    #[test]
    fn test_shared_prefix_hoisted() {
        let block = build("<div><i>{a}</i><b>{b}</b></div>", &CompileOptions::default());
        assert!(block.source.contains("let el3 = $parentElement[$runtime.firstChild];"));
        assert!(block.source.contains("let el0 = el3[$runtime.firstChild][$runtime.firstChild];"));
        assert!(block.source.contains("let el1 = el3[$runtime.childNodes][1][$runtime.firstChild];"));
    }

    #[test]
    fn test_events_and_modifiers() {
        let block = build(
            "<button @click|preventDefault={save} on:keyup|enter={(e) => go(e)}>x</button>",
            &CompileOptions::default(),
        );
        assert!(block.source.contains(
            "$runtime.addEvent($cd, el0, \"click\", ($event) => { $event.preventDefault(); save($event); $$apply();});"
        ));
        assert!(block.source.contains("const fn1 = (e) => go(e);"));
        assert!(block
            .source
            .contains("if($event.keyCode != 13) return;$event.preventDefault(); fn1($event);"));
    }

    #[test]
    fn test_two_way_binding() {
        let block = build("<input type=\"number\" :value={count} />", &CompileOptions::default());
        assert!(block.tpl.starts_with("<input type=\"number\""));
        assert!(block.source.contains(
            "$runtime.bindInput($cd, el0, 'valueAsNumber', () => count, a1 => {count = a1; $$apply();});"
        ));
    }

    #[test]
    fn test_attribute_kinds() {
        let block = build(
            "<img src={url} title=\"T {name}\" class:active={on} style:color={c} #ref/>",
            &CompileOptions::default(),
        );
        assert_eq!(block.tpl, "<img/>");
        assert!(block.source.contains("$watchReadOnly($cd, () => ((url)), (value) => {el0.src = value;});"));
        assert!(block.source.contains("$runtime.bindAttribute($cd, el0, 'title', () => (`T `+(name)));"));
        assert!(block.source.contains("$runtime.bindClass($cd, el0, () => !!(on), 'active');"));
        assert!(block.source.contains("$runtime.bindStyle($cd, el0, 'color', () => (c));"));
        assert!(block.source.contains("ref=el0;"));
    }

    #[test]
    fn test_labels_and_svg() {
        let opts = CompileOptions {
            hide_label: true,
            ..CompileOptions::default()
        };
        let block = build("{#if a}<b></b>{/if}", &opts);
        assert_eq!(block.tpl, "<!---->");
        let block = build("<circle r=\"1\"></circle><path d=\"M0\"></path>", &CompileOptions::default());
        assert!(block.svg);
    }

    #[test]
    fn test_errors_carry_node_excerpt() {
        let root = parse("<div><input :foo={x}/></div>").unwrap();
        let options = CompileOptions::default();
        let info = script::transform(None, &options, false).unwrap();
        let gen = Generator::new(&options, &info, None);
        let err = gen
            .build_block(&root.body, Owner::Other, BlockOptions::default())
            .unwrap_err();
        assert_eq!(err.message, "Not supported: :foo={x}");
        assert_eq!(err.details.as_deref(), Some("<input :foo={x}/>"));
    }
}
