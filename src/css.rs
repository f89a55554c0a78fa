//! CSS parsing and printing for component style blocks.
//!
//! Style text is parsed with lightningcss. Its rule tree is lowered into a
//! small owned tree the scoper can rewrite: rules keep tokenized selectors,
//! declarations keep their property name and printed value, everything the
//! scoper never touches is kept as printed text. Selectors are tokenized with
//! cssparser, so escapes (`.a\:b`, `.\31 0`) are decoded before matching and
//! re-escaped when printed. Printing is compact (`.a.m1x2y3{color:red}`).

use cssparser::{ParseError, Parser, ParserInput, Token};
use lightningcss::declaration::DeclarationBlock;
use lightningcss::printer::PrinterOptions;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use lightningcss::traits::ToCss;
use lightningcss::vendor_prefix::VendorPrefix;

use crate::error::{CompilerError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stylesheet {
    pub nodes: Vec<CssNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssNode {
    Rule(Rule),
    AtRule(AtRule),
    Declaration(Declaration),
    /// A rule the scoper leaves alone (`@import`, `@font-face`, ...).
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prelude {
    Selectors(Vec<Selector>),
    /// Keyframe selectors (`from`, `50%`) are kept verbatim.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub prelude: Prelude,
    pub block: Vec<CssNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtRule {
    pub name: String,
    pub prelude: String,
    pub block: Option<Vec<CssNode>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// Decoded `[name op value modifier]` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub name: String,
    pub operator: Option<String>,
    pub value: Option<String>,
    /// `i` or `s`.
    pub modifier: Option<char>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorKind {
    Type(String),
    Id(String),
    Class(String),
    Attribute(AttributeSelector),
    PseudoClass { name: String, argument: Option<String> },
    PseudoElement { name: String, argument: Option<String> },
    Combinator(char),
    WhiteSpace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorItem {
    pub kind: SelectorKind,
    /// Set for parts unwrapped from `:global(...)`.
    pub global: bool,
}

impl SelectorItem {
    pub fn new(kind: SelectorKind) -> Self {
        Self { kind, global: false }
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(
            self.kind,
            SelectorKind::PseudoClass { .. } | SelectorKind::PseudoElement { .. }
        )
    }

    /// Combinators and descendant whitespace.
    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, SelectorKind::Combinator(_) | SelectorKind::WhiteSpace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    pub items: Vec<SelectorItem>,
}

impl Selector {
    pub fn print(&self) -> String {
        print_items(&self.items)
    }
}

fn push_ident(out: &mut String, name: &str) {
    // Writing into a String cannot fail.
    let _ = cssparser::serialize_identifier(name, out);
}

fn push_pseudo(out: &mut String, name: &str, argument: &Option<String>) {
    push_ident(out, name);
    if let Some(arg) = argument {
        out.push('(');
        out.push_str(arg);
        out.push(')');
    }
}

pub fn print_items(items: &[SelectorItem]) -> String {
    let mut out = String::new();
    for item in items {
        match &item.kind {
            SelectorKind::Type(name) if name == "*" || name == "&" => out.push_str(name),
            SelectorKind::Type(name) => push_ident(&mut out, name),
            SelectorKind::Id(name) => {
                out.push('#');
                push_ident(&mut out, name);
            }
            SelectorKind::Class(name) => {
                out.push('.');
                push_ident(&mut out, name);
            }
            SelectorKind::Attribute(attr) => {
                out.push('[');
                push_ident(&mut out, &attr.name);
                if let (Some(op), Some(value)) = (&attr.operator, &attr.value) {
                    out.push_str(op);
                    let _ = cssparser::serialize_string(value, &mut out);
                }
                if let Some(m) = attr.modifier {
                    out.push(' ');
                    out.push(m);
                }
                out.push(']');
            }
            SelectorKind::PseudoClass { name, argument } => {
                out.push(':');
                push_pseudo(&mut out, name, argument);
            }
            SelectorKind::PseudoElement { name, argument } => {
                out.push_str("::");
                push_pseudo(&mut out, name, argument);
            }
            SelectorKind::Combinator(c) => out.push(*c),
            SelectorKind::WhiteSpace => out.push(' '),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// STYLESHEET
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_keyframes(name: &str) -> bool {
    matches!(
        name,
        "keyframes" | "-webkit-keyframes" | "-moz-keyframes" | "-o-keyframes"
    )
}

fn compact() -> PrinterOptions<'static> {
    PrinterOptions {
        minify: true,
        ..PrinterOptions::default()
    }
}

fn printed<T: ToCss>(value: &T, options: PrinterOptions) -> Result<String> {
    value
        .to_css_string(options)
        .map_err(|e| CompilerError::css(format!("CSS print error: {:?}", e)))
}

fn lower_declarations(block: &DeclarationBlock) -> Result<Vec<CssNode>> {
    let normal = block.declarations.iter().map(|p| (p, false));
    let important = block.important_declarations.iter().map(|p| (p, true));
    normal
        .chain(important)
        .map(|(property, important)| {
            let text = property
                .to_css_string(false, compact())
                .map_err(|e| CompilerError::css(format!("CSS print error: {:?}", e)))?;
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| CompilerError::css("Wrong declaration").with_details(text.clone()))?;
            Ok(CssNode::Declaration(Declaration {
                property: name.trim().to_string(),
                value: value.trim().to_string(),
                important,
            }))
        })
        .collect()
}

fn keyframes_at_rule(prefix: VendorPrefix) -> &'static str {
    if prefix.contains(VendorPrefix::WebKit) {
        "-webkit-keyframes"
    } else if prefix.contains(VendorPrefix::Moz) {
        "-moz-keyframes"
    } else if prefix.contains(VendorPrefix::O) {
        "-o-keyframes"
    } else {
        "keyframes"
    }
}

fn lower_rules(rules: &[CssRule<'_>]) -> Result<Vec<CssNode>> {
    let mut nodes = Vec::with_capacity(rules.len());
    for rule in rules {
        let node = match rule {
            CssRule::Style(style) => {
                let selectors = printed(&style.selectors, PrinterOptions::default())?;
                let mut block = lower_declarations(&style.declarations)?;
                block.extend(lower_rules(&style.rules.0)?);
                CssNode::Rule(Rule {
                    prelude: Prelude::Selectors(parse_selector_list(&selectors)?),
                    block,
                })
            }
            CssRule::Media(media) => CssNode::AtRule(AtRule {
                name: "media".to_string(),
                prelude: printed(&media.query, PrinterOptions::default())?,
                block: Some(lower_rules(&media.rules.0)?),
            }),
            CssRule::Supports(supports) => CssNode::AtRule(AtRule {
                name: "supports".to_string(),
                prelude: printed(&supports.condition, PrinterOptions::default())?,
                block: Some(lower_rules(&supports.rules.0)?),
            }),
            CssRule::Keyframes(keyframes) => {
                let mut block = Vec::with_capacity(keyframes.keyframes.len());
                for frame in &keyframes.keyframes {
                    let selectors = frame
                        .selectors
                        .iter()
                        .map(|s| printed(s, PrinterOptions::default()))
                        .collect::<Result<Vec<_>>>()?;
                    block.push(CssNode::Rule(Rule {
                        prelude: Prelude::Raw(selectors.join(",")),
                        block: lower_declarations(&frame.declarations)?,
                    }));
                }
                CssNode::AtRule(AtRule {
                    name: keyframes_at_rule(keyframes.vendor_prefix).to_string(),
                    prelude: printed(&keyframes.name, PrinterOptions::default())?,
                    block: Some(block),
                })
            }
            other => CssNode::Raw(printed(other, compact())?),
        };
        nodes.push(node);
    }
    Ok(nodes)
}

pub fn parse_stylesheet(source: &str) -> Result<Stylesheet> {
    let options = ParserOptions {
        filename: "style.css".to_string(),
        ..ParserOptions::default()
    };
    let sheet = StyleSheet::parse(source, options).map_err(|e| {
        let mut error = CompilerError::css(format!("CSS parse error: {}", e));
        if let Some(loc) = &e.loc {
            if let Some(line) = source.lines().nth(loc.line as usize) {
                error = error.with_details(line.trim().to_string());
            }
        }
        error
    })?;
    let nodes = lower_rules(&sheet.rules.0)?;
    tracing::trace!(rules = nodes.len(), bytes = source.len(), "parsed stylesheet");
    Ok(Stylesheet { nodes })
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTORS
// ═══════════════════════════════════════════════════════════════════════════════

type TokenResult<'i, T> = std::result::Result<T, ParseError<'i, ()>>;

fn invalid<'i>(parser: &Parser<'i, '_>) -> ParseError<'i, ()> {
    parser.new_custom_error::<(), ()>(())
}

/// Source text of the rest of a nested block, escapes preserved.
fn raw_block<'i>(parser: &mut Parser<'i, '_>) -> TokenResult<'i, String> {
    let start = parser.position();
    while parser.next_including_whitespace().is_ok() {}
    Ok(parser.slice_from(start).trim().to_string())
}

fn read_attribute<'i>(parser: &mut Parser<'i, '_>) -> TokenResult<'i, AttributeSelector> {
    let name = match parser.next()?.clone() {
        Token::Ident(name) => name.to_string(),
        _ => return Err(invalid(parser)),
    };
    let mut attr = AttributeSelector {
        name,
        operator: None,
        value: None,
        modifier: None,
    };
    if parser.is_exhausted() {
        return Ok(attr);
    }
    let operator = match parser.next()?.clone() {
        Token::Delim('=') => "=",
        Token::IncludeMatch => "~=",
        Token::DashMatch => "|=",
        Token::PrefixMatch => "^=",
        Token::SuffixMatch => "$=",
        Token::SubstringMatch => "*=",
        _ => return Err(invalid(parser)),
    };
    let value = match parser.next()?.clone() {
        Token::Ident(v) | Token::QuotedString(v) => v.to_string(),
        _ => return Err(invalid(parser)),
    };
    attr.operator = Some(operator.to_string());
    attr.value = Some(value);
    if !parser.is_exhausted() {
        match parser.next()?.clone() {
            Token::Ident(m) if m.eq_ignore_ascii_case("i") || m.eq_ignore_ascii_case("s") => {
                attr.modifier = m.chars().next().map(|c| c.to_ascii_lowercase());
            }
            _ => return Err(invalid(parser)),
        }
    }
    parser.expect_exhausted()?;
    Ok(attr)
}

fn read_pseudo<'i>(parser: &mut Parser<'i, '_>) -> TokenResult<'i, SelectorKind> {
    let mut next = parser.next_including_whitespace()?.clone();
    let element = next == Token::Colon;
    if element {
        next = parser.next_including_whitespace()?.clone();
    }
    let (name, argument) = match next {
        Token::Ident(name) => (name.to_string(), None),
        Token::Function(name) => (name.to_string(), Some(parser.parse_nested_block(|p| raw_block(p))?)),
        _ => return Err(invalid(parser)),
    };
    Ok(if element {
        SelectorKind::PseudoElement { name, argument }
    } else {
        SelectorKind::PseudoClass { name, argument }
    })
}

/// Reads one complex selector up to the end of input (or the next comma
/// when called from a comma-separated list).
fn read_selector<'i>(parser: &mut Parser<'i, '_>) -> TokenResult<'i, Selector> {
    let mut items: Vec<SelectorItem> = Vec::new();
    let mut pending_space = false;
    loop {
        let token = match parser.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::WhiteSpace(_) => {
                pending_space = true;
                continue;
            }
            Token::Delim(c @ ('>' | '+' | '~')) => {
                items.push(SelectorItem::new(SelectorKind::Combinator(c)));
                pending_space = false;
                continue;
            }
            _ => {}
        }
        if pending_space && items.last().map_or(false, |l| !l.is_boundary()) {
            items.push(SelectorItem::new(SelectorKind::WhiteSpace));
        }
        pending_space = false;

        let kind = match token {
            Token::Delim('.') => match parser.next_including_whitespace()?.clone() {
                Token::Ident(name) => SelectorKind::Class(name.to_string()),
                _ => return Err(invalid(parser)),
            },
            Token::IDHash(name) => SelectorKind::Id(name.to_string()),
            Token::SquareBracketBlock => {
                SelectorKind::Attribute(parser.parse_nested_block(|p| read_attribute(p))?)
            }
            Token::Colon => read_pseudo(parser)?,
            Token::Delim(c @ ('*' | '&')) => SelectorKind::Type(c.to_string()),
            Token::Ident(name) => SelectorKind::Type(name.to_string()),
            _ => return Err(invalid(parser)),
        };
        items.push(SelectorItem::new(kind));
    }
    if items.is_empty() || items.last().map_or(false, |l| l.is_boundary()) {
        return Err(invalid(parser));
    }
    Ok(Selector { items })
}

pub fn parse_selector_list(text: &str) -> Result<Vec<Selector>> {
    let mut input = ParserInput::new(text);
    let mut parser = Parser::new(&mut input);
    parser
        .parse_comma_separated(|p| read_selector(p))
        .map_err(|_| CompilerError::css(format!("Wrong selector: '{}'", text.trim())))
}

pub fn parse_selector(text: &str) -> Result<Selector> {
    let mut input = ParserInput::new(text.trim());
    let mut parser = Parser::new(&mut input);
    read_selector(&mut parser)
        .map_err(|_| CompilerError::css(format!("Wrong selector: '{}'", text.trim())))
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRINTER
// ═══════════════════════════════════════════════════════════════════════════════

fn print_block(nodes: &[CssNode], out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 && matches!(nodes[i - 1], CssNode::Declaration(_)) {
            out.push(';');
        }
        print_node(node, out);
    }
}

fn print_node(node: &CssNode, out: &mut String) {
    match node {
        CssNode::Declaration(d) => {
            out.push_str(&d.property);
            out.push(':');
            out.push_str(&d.value);
            if d.important {
                out.push_str("!important");
            }
        }
        CssNode::Raw(text) => out.push_str(text),
        CssNode::Rule(rule) => {
            match &rule.prelude {
                Prelude::Raw(text) => out.push_str(text),
                Prelude::Selectors(list) => {
                    let printed: Vec<String> = list.iter().map(Selector::print).collect();
                    out.push_str(&printed.join(","));
                }
            }
            out.push('{');
            print_block(&rule.block, out);
            out.push('}');
        }
        CssNode::AtRule(at) => {
            out.push('@');
            out.push_str(&at.name);
            if !at.prelude.is_empty() {
                out.push(' ');
                out.push_str(&at.prelude);
            }
            match &at.block {
                Some(block) => {
                    out.push('{');
                    print_block(block, out);
                    out.push('}');
                }
                None => out.push(';'),
            }
        }
    }
}

impl Stylesheet {
    pub fn print(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            print_node(node, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> SelectorKind {
        SelectorKind::Class(name.to_string())
    }

    #[test]
    fn test_parse_and_print_compact() {
        let sheet = parse_stylesheet(".a > b:hover, #x { color: red; margin: 0 !important; }").unwrap();
        assert_eq!(sheet.print(), ".a>b:hover,#x{color:red;margin:0!important}");
    }

    #[test]
    fn test_at_rules() {
        let sheet = parse_stylesheet(
            "@media (max-width: 10px) { .a { top: 0 } }\n@keyframes fade { from { opacity: 0 } 50% { opacity: 1 } }",
        )
        .unwrap();
        let text = sheet.print();
        assert!(text.starts_with("@media "));
        assert!(text.contains("{.a{top:0}}"));
        assert!(text.ends_with("@keyframes fade{from{opacity:0}50%{opacity:1}}"));
        match &sheet.nodes[1] {
            CssNode::AtRule(at) => {
                assert_eq!(at.name, "keyframes");
                assert_eq!(at.prelude, "fade");
                match &at.block.as_ref().unwrap()[0] {
                    CssNode::Rule(r) => assert_eq!(r.prelude, Prelude::Raw("from".to_string())),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_untouched_rules_kept_raw() {
        let sheet = parse_stylesheet("@font-face { font-family: x; src: url(x.woff) }").unwrap();
        assert!(matches!(&sheet.nodes[0], CssNode::Raw(text) if text.starts_with("@font-face")));
    }

    #[test]
    fn test_selector_items() {
        let sel = parse_selector("div  .a[href^='x'] ::before").unwrap();
        let kinds: Vec<_> = sel.items.iter().map(|i| i.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                SelectorKind::Type("div".into()),
                SelectorKind::WhiteSpace,
                class("a"),
                SelectorKind::Attribute(AttributeSelector {
                    name: "href".into(),
                    operator: Some("^=".into()),
                    value: Some("x".into()),
                    modifier: None,
                }),
                SelectorKind::WhiteSpace,
                SelectorKind::PseudoElement { name: "before".into(), argument: None },
            ]
        );
        assert_eq!(sel.print(), "div .a[href^=\"x\"] ::before");
    }

    #[test]
    fn test_escaped_identifiers_decoded() {
        let sel = parse_selector(".a\\:b.\\31 23").unwrap();
        assert_eq!(sel.items[0].kind, class("a:b"));
        assert_eq!(sel.items[1].kind, class("123"));
        assert_eq!(sel.print(), ".a\\:b.\\31 23");

        let sheet = parse_stylesheet(".a\\:b { c: d }").unwrap();
        assert_eq!(sheet.print(), ".a\\:b{c:d}");
    }

    #[test]
    fn test_global_argument_kept_raw() {
        let sel = parse_selector(":global(.x .y) .z").unwrap();
        assert_eq!(
            sel.items[0].kind,
            SelectorKind::PseudoClass { name: "global".into(), argument: Some(".x .y".into()) }
        );
    }

    #[test]
    fn test_comments_and_errors() {
        let sheet = parse_stylesheet("/* c */ .a { /* d */ color: red }").unwrap();
        assert_eq!(sheet.print(), ".a{color:red}");
        assert!(parse_stylesheet(".a, { color: red }").is_err());
        assert!(parse_selector_list(".a, ").is_err());
        assert!(parse_selector(".a >").is_err());
        assert_eq!(parse_selector_list(".a, b > i").unwrap().len(), 2);
    }
}
