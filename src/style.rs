//! Style scoping.
//!
//! Every selector of the component's `<style>` blocks is reduced to a
//! "clean" selector (globals and pseudo parts removed). Clean selectors are
//! bucketed by text; each bucket receives a scope token: a private token for
//! a lone class (optionally with attribute tests), the component id
//! otherwise. The token is added to the selector as an extra class and, via
//! static matching, to the class set of every element the selector can hit.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::ast::{Element, NodeId, RawBlock, Root};
use crate::config::{CompileOptions, IdGenerator};
use crate::css::{
    is_keyframes, parse_selector, parse_stylesheet, print_items, CssNode, Declaration, Prelude,
    Selector, SelectorItem, SelectorKind, Stylesheet,
};
use crate::error::{CompilerError, Result};
use crate::selector::StaticDom;
use crate::visitor::{walk_element, MarkupVisitor};

/// Public alias recorded for classes of an `external` style block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalClass {
    /// Declared by an empty rule; the class passes through unhashed.
    Passthrough,
    Hash(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassMap {
    pub class_map: Vec<(String, String)>,
    pub meta_class: Vec<(String, ExternalClass)>,
    pub main: Option<String>,
}

#[derive(Debug, Clone)]
struct Bucket {
    clean: String,
    clean_items: Vec<SelectorItem>,
    is_simple: bool,
    fully_global: bool,
    local: Option<String>,
    external: Option<ExternalClass>,
    /// First selector that produced this bucket, for diagnostics.
    origin: String,
}

impl Bucket {
    fn class_name(&self) -> Option<&str> {
        match self.clean_items.first().map(|i| &i.kind) {
            Some(SelectorKind::Class(name)) => Some(name),
            _ => None,
        }
    }
}

struct IdSource {
    seed: String,
    counter: u32,
    custom: Option<IdGenerator>,
}

impl IdSource {
    fn next(&mut self) -> String {
        if let Some(generate) = &self.custom {
            return generate();
        }
        self.counter += 1;
        hashed_id(&self.seed, self.counter)
    }
}

/// `m` followed by six base36 digits derived from `seed` and `n`.
pub fn hashed_id(seed: &str, n: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(n.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let mut value = u64::from_le_bytes(bytes) % 36u64.pow(6);

    let mut digits = [b'0'; 6];
    for slot in digits.iter_mut().rev() {
        let d = (value % 36) as u8;
        *slot = if d < 10 { b'0' + d } else { b'a' + d - 10 };
        value /= 36;
    }
    format!("m{}", String::from_utf8_lossy(&digits))
}

/// Flags of the `<style>` tag a rule came from.
#[derive(Debug, Clone, Copy, Default)]
struct BlockFlags {
    external: bool,
    global: bool,
}

pub struct StyleScope {
    pub id: String,
    pub external_main_name: Option<String>,
    pub has_external: bool,
    sheets: Vec<Stylesheet>,
    buckets: Vec<Bucket>,
    bucket_index: HashMap<String, usize>,
    ids: IdSource,
}

impl StyleScope {
    fn new(seed: String, custom: Option<IdGenerator>) -> Self {
        let mut ids = IdSource {
            seed,
            counter: 0,
            custom,
        };
        let id = ids.next();
        Self {
            id,
            external_main_name: None,
            has_external: false,
            sheets: Vec::new(),
            buckets: Vec::new(),
            bucket_index: HashMap::new(),
            ids,
        }
    }

    fn add_block(&mut self, block: &RawBlock) -> Result<()> {
        let mut flags = BlockFlags::default();
        for a in &block.attributes {
            match a.name.as_str() {
                "external" => {
                    self.has_external = true;
                    flags.external = true;
                }
                "main" => self.external_main_name = a.value.clone(),
                "global" => flags.global = true,
                _ => {}
            }
        }
        let mut sheet = parse_stylesheet(&block.content)?;
        self.walk(&mut sheet.nodes, flags, false)?;
        self.sheets.push(sheet);
        Ok(())
    }

    fn walk(&mut self, nodes: &mut [CssNode], flags: BlockFlags, in_keyframes: bool) -> Result<()> {
        for node in nodes {
            match node {
                CssNode::Declaration(d) => self.rename_animation(d),
                CssNode::Raw(_) => {}
                CssNode::AtRule(at) => {
                    let keyframes = is_keyframes(&at.name);
                    if keyframes {
                        at.prelude = suffix_first_word(&at.prelude, &self.id);
                    }
                    if let Some(block) = at.block.as_mut() {
                        self.walk(block, flags, keyframes)?;
                    }
                }
                CssNode::Rule(rule) => {
                    if !in_keyframes {
                        let empty_block = rule.block.is_empty();
                        if let Prelude::Selectors(list) = &mut rule.prelude {
                            for selector in list.iter_mut() {
                                self.process_selector(selector, flags, empty_block)?;
                            }
                        }
                    }
                    self.walk(&mut rule.block, flags, false)?;
                }
            }
        }
        Ok(())
    }

    fn rename_animation(&self, d: &mut Declaration) {
        if d.property != "animation" && d.property != "animation-name" {
            return;
        }
        let mut words: Vec<String> = d.value.split_whitespace().map(str::to_string).collect();
        let target = match words.first() {
            None => return,
            Some(first) if is_identifier(first) => 0,
            Some(_) => words.len() - 1,
        };
        if is_identifier(&words[target]) {
            words[target] = format!("{}-{}", words[target], self.id);
            d.value = words.join(" ");
        }
    }

    fn process_selector(&mut self, selector: &mut Selector, flags: BlockFlags, empty_block: bool) -> Result<()> {
        let mut origin: Vec<SelectorItem> = Vec::new();
        for item in std::mem::take(&mut selector.items) {
            let global = match &item.kind {
                SelectorKind::PseudoClass { name, argument } if name == "global" => {
                    Some(argument.clone())
                }
                _ => None,
            };
            match global {
                Some(Some(argument)) => {
                    for mut inner in parse_selector(&argument)?.items {
                        inner.global = true;
                        origin.push(inner);
                    }
                }
                Some(None) => return Err(CompilerError::css("Wrong :global selector")),
                None => origin.push(item),
            }
        }
        if origin.is_empty() {
            return Err(CompilerError::css("Empty selector"));
        }

        let mut clean: Vec<SelectorItem> = Vec::new();
        for (i, s) in origin.iter().enumerate() {
            if s.global {
                continue;
            }
            if s.is_pseudo() {
                let at_start = i == 0 || origin[i - 1].is_boundary();
                if at_start {
                    clean.push(SelectorItem::new(SelectorKind::Type("*".to_string())));
                }
            } else {
                clean.push(s.clone());
            }
        }
        while clean.last().map_or(false, |s| s.kind == SelectorKind::WhiteSpace) {
            clean.pop();
        }
        while clean.first().map_or(false, |s| s.kind == SelectorKind::WhiteSpace) {
            clean.remove(0);
        }
        if clean.is_empty() || flags.global {
            selector.items = origin;
            return Ok(());
        }

        let clean_text = print_items(&clean);
        let index = match self.bucket_index.get(&clean_text) {
            Some(&index) => index,
            None => {
                let is_simple = matches!(clean[0].kind, SelectorKind::Class(_))
                    && clean[1..]
                        .iter()
                        .all(|s| matches!(s.kind, SelectorKind::Attribute(_)));
                self.buckets.push(Bucket {
                    clean: clean_text.clone(),
                    clean_items: clean,
                    is_simple,
                    fully_global: origin.iter().all(|i| i.global),
                    local: None,
                    external: None,
                    origin: print_items(&origin),
                });
                self.bucket_index.insert(clean_text, self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };

        let hash = if flags.external {
            if !self.buckets[index].is_simple {
                return Err(CompilerError::css(format!(
                    "External selector must be a single class: '{}'",
                    self.buckets[index].origin
                )));
            }
            if self.buckets[index].external.is_none() {
                let token = if empty_block {
                    ExternalClass::Passthrough
                } else {
                    ExternalClass::Hash(self.ids.next())
                };
                self.buckets[index].external = Some(token);
            }
            match &self.buckets[index].external {
                Some(ExternalClass::Hash(h)) => Some(h.clone()),
                _ => None,
            }
        } else {
            if self.buckets[index].local.is_none() {
                let token = if self.buckets[index].is_simple {
                    self.ids.next()
                } else {
                    self.id.clone()
                };
                self.buckets[index].local = Some(token);
            }
            self.buckets[index].local.clone()
        };

        let mut hashed = origin;
        if let Some(hash) = hash {
            let token = || SelectorItem::new(SelectorKind::Class(hash.clone()));
            for i in (0..hashed.len()).rev() {
                let sel = &hashed[i];
                if sel.global {
                    continue;
                }
                if sel.is_pseudo() {
                    if i == 0 || hashed[i - 1].is_boundary() {
                        hashed.insert(i, token());
                    }
                    continue;
                }
                if sel.is_boundary() {
                    continue;
                }
                let right = hashed.get(i + 1);
                if right.map_or(true, |r| r.is_pseudo() || r.is_boundary()) {
                    hashed.insert(i + 1, token());
                }
            }
        }
        selector.items = hashed;
        Ok(())
    }

    /// Alias of an `external` class, if `name` was declared in such a block.
    pub fn is_external_class(&self, name: &str) -> Option<&ExternalClass> {
        let key = print_items(&[SelectorItem::new(SelectorKind::Class(name.to_string()))]);
        self.bucket_index
            .get(&key)
            .and_then(|&i| self.buckets[i].external.as_ref())
    }

    pub fn get_class_map(&self) -> ClassMap {
        let mut map = ClassMap {
            main: self.external_main_name.clone(),
            ..ClassMap::default()
        };
        for bucket in self.buckets.iter().filter(|b| b.is_simple) {
            let Some(name) = bucket.class_name() else {
                continue;
            };
            if let Some(external) = &bucket.external {
                map.meta_class.push((name.to_string(), external.clone()));
            }
            if let Some(local) = &bucket.local {
                map.class_map.push((name.to_string(), local.clone()));
            }
        }
        map
    }

    /// Adds scope tokens to every element a local rule can statically match.
    pub fn process(&self, root: &mut Root) -> Result<()> {
        let dom = StaticDom::build(root);
        let mut tokens: HashMap<NodeId, Vec<String>> = HashMap::new();
        for bucket in &self.buckets {
            if bucket.fully_global {
                continue;
            }
            let Some(local) = &bucket.local else {
                continue;
            };
            let matches = dom.select(&bucket.clean_items).map_err(|_| {
                CompilerError::css(format!("CSS error: '{}'", bucket.origin))
                    .with_details(format!("selector: '{}'", bucket.origin))
            })?;
            for m in matches {
                for node in std::iter::once(m.node).chain(m.path) {
                    tokens.entry(node).or_default().push(local.clone());
                }
            }
        }
        tracing::debug!(buckets = self.buckets.len(), elements = tokens.len(), "scoped styles");
        ClassTokens(tokens).visit_root(root);
        Ok(())
    }

    /// Prints all style blocks, dropping rules with empty bodies.
    pub fn get_content(&self) -> String {
        self.sheets
            .iter()
            .map(|sheet| {
                let mut sheet = sheet.clone();
                drop_empty_rules(&mut sheet.nodes, false);
                sheet.print()
            })
            .collect()
    }

    /// Clean selector texts, in declaration order.
    pub fn clean_selectors(&self) -> Vec<&str> {
        self.buckets.iter().map(|b| b.clean.as_str()).collect()
    }
}

struct ClassTokens(HashMap<NodeId, Vec<String>>);

impl MarkupVisitor for ClassTokens {
    fn visit_element(&mut self, element: &mut Element) {
        if let Some(tokens) = self.0.get(&element.id) {
            for token in tokens {
                element.classes.add(token);
            }
        }
        walk_element(self, element);
    }
}

fn drop_empty_rules(nodes: &mut Vec<CssNode>, in_keyframes: bool) {
    nodes.retain(|node| !matches!(node, CssNode::Rule(rule) if !in_keyframes && rule.block.is_empty()));
    for node in nodes.iter_mut() {
        match node {
            CssNode::Rule(rule) => drop_empty_rules(&mut rule.block, false),
            CssNode::AtRule(at) => {
                let keyframes = is_keyframes(&at.name);
                if let Some(block) = at.block.as_mut() {
                    drop_empty_rules(block, keyframes);
                }
            }
            CssNode::Declaration(_) | CssNode::Raw(_) => {}
        }
    }
}

fn is_identifier(word: &str) -> bool {
    let word = word.strip_prefix('-').unwrap_or(word);
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn suffix_first_word(text: &str, id: &str) -> String {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => format!("{}-{} {}", first, id, rest),
        None if text.is_empty() => text.to_string(),
        None => format!("{}-{}", text, id),
    }
}

/// Parses every `<style>` block of the component. `None` when there is none.
pub fn process_css(blocks: &[RawBlock], options: &CompileOptions) -> Result<Option<StyleScope>> {
    if blocks.is_empty() {
        return Ok(None);
    }
    let seed: String = blocks.iter().map(|b| b.content.as_str()).collect();
    let mut scope = StyleScope::new(format!("{}:{}", options.name, seed), options.css_gen_id.clone());
    for block in blocks {
        scope.add_block(block)?;
    }
    Ok(Some(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn options() -> CompileOptions {
        let counter = Arc::new(AtomicU32::new(0));
        CompileOptions {
            css_gen_id: Some(Arc::new(move || {
                format!("h{}", counter.fetch_add(1, Ordering::SeqCst))
            })),
            ..CompileOptions::default()
        }
    }

    fn scope_for(source: &str) -> (StyleScope, Root) {
        let mut root = parse(source).unwrap();
        let styles: Vec<RawBlock> = root
            .body
            .iter()
            .filter_map(|n| match n {
                crate::ast::Node::Style(b) => Some(b.clone()),
                _ => None,
            })
            .collect();
        let scope = process_css(&styles, &options()).unwrap().unwrap();
        scope.process(&mut root).unwrap();
        (scope, root)
    }

    fn classes(root: &Root, index: usize) -> Vec<String> {
        root.body[index]
            .as_element()
            .unwrap()
            .classes
            .iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_hashed_id_shape() {
        let id = hashed_id("seed", 1);
        assert_eq!(id.len(), 7);
        assert!(id.starts_with('m'));
        assert_eq!(id, hashed_id("seed", 1));
        assert_ne!(id, hashed_id("seed", 2));
    }

    #[test]
    fn test_simple_class_gets_private_token() {
        let (scope, root) =
            scope_for("<div class=\"foo\"></div><p></p><style>.foo { color: red }</style>");
        assert_eq!(scope.id, "h0");
        assert_eq!(classes(&root, 0), vec!["h1"]);
        assert!(classes(&root, 1).is_empty());
        assert_eq!(scope.get_content(), ".foo.h1{color:red}");
        assert_eq!(scope.get_class_map().class_map, vec![("foo".to_string(), "h1".to_string())]);
    }

    #[test]
    fn test_compound_selector_uses_component_id() {
        let (scope, root) = scope_for(
            "<div><span></span></div><style>div span:hover { top: 0 }\n:global(body) div { top: 1px }</style>",
        );
        assert_eq!(
            scope.get_content(),
            "div.h0 span.h0:hover{top:0}body div.h0{top:1px}"
        );
        assert_eq!(classes(&root, 0), vec!["h0"]);
        let span = root.body[0].as_element().unwrap().body[0].as_element().unwrap();
        assert!(span.classes.contains("h0"));
        assert_eq!(scope.clean_selectors(), vec!["div span", "div"]);
    }

    #[test]
    fn test_leading_pseudo_gets_star() {
        let (scope, _) = scope_for("<a></a><style>:hover { top: 0 }</style>");
        assert_eq!(scope.clean_selectors(), vec!["*"]);
        assert_eq!(scope.get_content(), ".h0:hover{top:0}");
    }

    #[test]
    fn test_animations_renamed() {
        let (scope, _) = scope_for(
            "<style>@keyframes fade { from { opacity: 0 } }\n.a { animation-name: fade; }</style>",
        );
        assert_eq!(
            scope.get_content(),
            "@keyframes fade-h0{from{opacity:0}}.a.h1{animation-name:fade-h0}"
        );
    }

    #[test]
    fn test_escaped_class_selector_scopes_element() {
        let (scope, root) = scope_for(
            "<div class=\"a:b\">x</div><p class=\"123\"></p><style>.a\\:b{c:d}\n.\\31 23 { top: 0 }</style>",
        );
        assert_eq!(classes(&root, 0), vec!["h1"]);
        assert_eq!(classes(&root, 1), vec!["h2"]);
        assert_eq!(scope.get_content(), ".a\\:b.h1{c:d}.\\31 23.h2{top:0}");
        assert_eq!(scope.get_class_map().class_map[0], ("a:b".to_string(), "h1".to_string()));
    }

    #[test]
    fn test_global_and_external_blocks() {
        let (scope, root) = scope_for(
            "<b class=\"x\"></b><style global>.x { top: 0 }</style><style external main=\"card\">.btn {}\n.title { color: red }</style>",
        );
        assert_eq!(scope.get_content(), ".x{top:0}.title.h1{color:red}");
        assert!(classes(&root, 0).is_empty());
        assert_eq!(scope.is_external_class("btn"), Some(&ExternalClass::Passthrough));
        assert_eq!(
            scope.is_external_class("title"),
            Some(&ExternalClass::Hash("h1".to_string()))
        );
        let map = scope.get_class_map();
        assert_eq!(map.main.as_deref(), Some("card"));
        assert_eq!(map.meta_class.len(), 2);
        assert!(scope.has_external);
    }

    #[test]
    fn test_external_requires_simple_class() {
        let root = parse("<style external>div .a { top: 0 }</style>").unwrap();
        let blocks: Vec<RawBlock> = root
            .body
            .iter()
            .filter_map(|n| match n {
                crate::ast::Node::Style(b) => Some(b.clone()),
                _ => None,
            })
            .collect();
        assert!(process_css(&blocks, &options()).is_err());
    }
}
