//! Markup parser.
//!
//! A single forward-only cursor over the component source. Tags, raw
//! content blocks (`script`, `style`, `template`), comments, text and
//! `{#...}` control blocks are recognized by peeking at the current byte;
//! nested bodies are parsed recursively and report the token that closed
//! them, so each construct validates its own terminator.

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{
    Attribute, AwaitBlock, AwaitPart, ClassSet, Comment, EachBlock, Element, FragmentBlock,
    IfBlock, Node, NodeId, RawBlock, Root, SlotBlock, Span, SysTag, Text,
};
use crate::error::{CompilerError, Result};

pub const VOID_TAGS: &[&str] = &[
    "fragment", "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
];

lazy_static! {
    static ref SYSTAG_RE: Regex = Regex::new(r"^@\w+").unwrap();
    static ref THEN_RE: Regex = Regex::new(r"^:then( |$)").unwrap();
    static ref CATCH_RE: Regex = Regex::new(r"^:catch( |$)").unwrap();
    static ref SLOT_RE: Regex = Regex::new(r"^#slot(:| |$)").unwrap();
    static ref FRAGMENT_RE: Regex = Regex::new(r"^#fragment\W").unwrap();
}

/// What ended a call to [`Parser::parse_body`].
#[derive(Debug)]
enum Terminator {
    Eof,
    CloseTag(String),
    EachEnd,
    Else,
    IfEnd,
    Then(String),
    Catch(String),
    AwaitEnd,
    SlotEnd,
    FragmentEnd,
}

impl Terminator {
    fn describe(&self) -> String {
        match self {
            Terminator::Eof => "end of file".to_string(),
            Terminator::CloseTag(name) => format!("</{}>", name),
            Terminator::EachEnd => "{/each}".to_string(),
            Terminator::Else => "{:else}".to_string(),
            Terminator::IfEnd => "{/if}".to_string(),
            Terminator::Then(v) | Terminator::Catch(v) => format!("{{{}}}", v),
            Terminator::AwaitEnd => "{/await}".to_string(),
            Terminator::SlotEnd => "{/slot}".to_string(),
            Terminator::FragmentEnd => "{/fragment}".to_string(),
        }
    }
}

/// An open tag as read by [`Parser::read_tag`].
struct OpenTag {
    name: String,
    el_arg: Option<String>,
    attributes: Vec<Attribute>,
    open_tag: String,
    start: usize,
    closed_tag: bool,
    void_tag: bool,
}

enum ElArg {
    None,
    Pending,
    Value(String),
}

/// Attribute accumulator used while scanning one tag.
struct TagScanner {
    attributes: Vec<Attribute>,
    attr_start: Option<usize>,
    eq: Option<usize>,
    el_arg: ElArg,
}

impl TagScanner {
    /// Closes the attribute in progress; `end` is exclusive.
    fn flush(&mut self, source: &str, end: usize) {
        let Some(start) = self.attr_start.take() else {
            return;
        };
        let eq = self.eq.take();
        if let ElArg::Pending = self.el_arg {
            self.el_arg = ElArg::Value(source[start..end].to_string());
            return;
        }
        let content = source[start..end].to_string();
        let attr = match eq {
            Some(eq) => {
                let mut value = &source[eq + 1..end];
                if value.starts_with('"') || value.starts_with('\'') {
                    value = &value[1..];
                }
                if value.ends_with('"') || value.ends_with('\'') {
                    value = &value[..value.len() - 1];
                }
                Attribute {
                    name: source[start..eq].to_string(),
                    value: Some(value.to_string()),
                    content,
                }
            }
            None => Attribute {
                name: content.clone(),
                value: None,
                content,
            },
        };
        self.attributes.push(attr);
    }
}

pub struct Parser<'s> {
    source: &'s str,
    bytes: &'s [u8],
    index: usize,
    next_id: u32,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            index: 0,
            next_id: 0,
        }
    }

    pub fn parse(mut self) -> Result<Root> {
        let mut body = Vec::new();
        match self.parse_body(&mut body)? {
            Terminator::Eof => Ok(Root {
                body,
                span: Span::new(0, self.source.len()),
            }),
            Terminator::CloseTag(name) => Err(self.error_here(format!("Wrong close-tag: - {}", name))),
            other => Err(self.error_here(format!("Bind error: {}", other.describe()))),
        }
    }

    fn excerpt(&self, start: usize, end: usize) -> String {
        let end = end.min(self.source.len());
        let mut start = start.min(end);
        while start > 0 && !self.source.is_char_boundary(start) {
            start -= 1;
        }
        self.source[start..end].to_string()
    }

    fn error_here(&self, message: String) -> CompilerError {
        let from = self.index.saturating_sub(20);
        CompilerError::parse(message, self.excerpt(from, self.index)).locate(self.source, self.index)
    }

    /// Next byte; end of input while inside a construct started at `start` is fatal.
    fn read_next(&mut self, start: usize, what: &str) -> Result<u8> {
        match self.bytes.get(self.index) {
            Some(&b) => {
                self.index += 1;
                Ok(b)
            }
            None => Err(CompilerError::parse(
                format!("Unexpected end of file in {}", what),
                self.excerpt(start, self.index),
            )
            .locate(self.source, start)),
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.index + offset).copied()
    }

    fn read_tag(&mut self) -> Result<OpenTag> {
        let start = self.index;
        let a = self.read_next(start, "tag")?;
        if a != b'<' {
            return Err(CompilerError::parse("Tag error", self.excerpt(start, self.index)));
        }

        let mut scan = TagScanner {
            attributes: Vec::new(),
            attr_start: None,
            eq: None,
            el_arg: ElArg::None,
        };
        let mut begin = true;
        let mut name = String::new();
        let mut bind = 0usize;

        loop {
            let mut a = self.read_next(start, "tag")?;
            if !begin
                && scan.attr_start.is_none()
                && !a.is_ascii_whitespace()
                && a != b'/'
                && a != b'>'
            {
                scan.attr_start = Some(self.index - 1);
            }
            if a == b'"' || a == b'\'' || a == b'`' {
                while self.read_next(start, "tag")? != a {}
                continue;
            }
            if a == b'{' {
                bind += 1;
                continue;
            }
            if bind > 0 {
                if a == b'}' {
                    bind -= 1;
                    if bind == 0 {
                        scan.flush(self.source, self.index);
                    }
                }
                continue;
            }
            if a == b'}' {
                return Err(CompilerError::parse("Wrong attr", self.excerpt(start, self.index)));
            }
            if a == b'<' {
                return Err(CompilerError::parse("Wrong tag", self.excerpt(start, self.index)));
            }
            if a == b'/' {
                a = self.read_next(start, "tag")?;
                if a != b'>' {
                    return Err(CompilerError::parse("Tag error", self.excerpt(start, self.index)));
                }
                scan.flush(self.source, self.index - 2);
            }
            if a == b'>' {
                scan.flush(self.source, self.index - 1);
                let void_tag = VOID_TAGS.contains(&name.as_str());
                let closed_tag = void_tag || self.bytes[self.index - 2] == b'/';
                let el_arg = match scan.el_arg {
                    ElArg::Value(v) => Some(v),
                    _ => None,
                };
                return Ok(OpenTag {
                    name,
                    el_arg,
                    attributes: scan.attributes,
                    open_tag: self.source[start..self.index].to_string(),
                    start,
                    closed_tag,
                    void_tag,
                });
            }
            if begin {
                if a.is_ascii_alphanumeric() || (a == b'-' && !name.is_empty()) {
                    name.push(a as char);
                    continue;
                }
                begin = false;
                if a == b':' {
                    scan.el_arg = ElArg::Pending;
                    scan.attr_start = Some(self.index);
                }
            } else if scan.attr_start.is_some() {
                if a == b'=' && scan.eq.is_none() {
                    scan.eq = Some(self.index - 1);
                } else if a.is_ascii_whitespace() {
                    scan.flush(self.source, self.index - 1);
                }
            }
        }
    }

    /// Reads raw content up to `</tag>`; quoted strings may contain the
    /// close tag, and a backslash-escaped quote does not end a string.
    fn read_script(&mut self, tag: &str) -> Result<String> {
        let end_tag = format!("</{}>", tag);
        let start = self.index;
        let mut quote: Option<u8> = None;
        let mut prev = 0u8;
        loop {
            let a = self.read_next(start, tag)?;
            if let Some(q) = quote {
                if a == q && prev != b'\\' {
                    quote = None;
                }
                prev = if prev == b'\\' && a == b'\\' { 0 } else { a };
                continue;
            }
            prev = a;
            if a == b'"' || a == b'\'' || a == b'`' {
                quote = Some(a);
                continue;
            }
            if a == b'<' && self.source[self.index - 1..].starts_with(&end_tag) {
                let end = self.index - 1;
                self.index = end + end_tag.len();
                return Ok(self.source[start..end].to_string());
            }
        }
    }

    fn read_style(&mut self) -> Result<String> {
        let start = self.index;
        match self.source[start..].find("</style>") {
            Some(rel) => {
                let end = start + rel;
                self.index = end + "</style>".len();
                Ok(self.source[start..end].to_string())
            }
            None => Err(CompilerError::parse(
                "<style> is not closed",
                self.excerpt(start, start + 40),
            )
            .locate(self.source, start)),
        }
    }

    /// Reads `{...}` and returns the inner text; nested braces are balanced
    /// and quoted regions are skipped.
    fn read_binding(&mut self) -> Result<String> {
        let start = self.index;
        if self.read_next(start, "binding")? != b'{' {
            return Err(CompilerError::parse("Bind error", self.excerpt(start, self.index)));
        }
        let mut quote: Option<u8> = None;
        let mut depth = 1usize;
        loop {
            let a = self.read_next(start, "binding")?;
            if let Some(q) = quote {
                if a == q {
                    quote = None;
                }
                continue;
            }
            match a {
                b'"' | b'\'' | b'`' => quote = Some(a),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.source[start + 1..self.index - 1].to_string());
                    }
                }
                _ => {}
            }
        }
    }

    fn read_comment(&mut self) -> Result<String> {
        let start = self.index;
        match self.source[start..].find("-->") {
            Some(rel) => {
                self.index = start + rel + 3;
                Ok(self.source[start..self.index].to_string())
            }
            None => Err(CompilerError::parse(
                "Comment is not closed",
                self.excerpt(start, start + 40),
            )
            .locate(self.source, start)),
        }
    }

    fn flush_text(&self, body: &mut Vec<Node>, text_start: &mut Option<usize>) {
        if let Some(start) = text_start.take() {
            body.push(Node::Text(Text {
                value: self.source[start..self.index].to_string(),
                span: Span::new(start, self.index),
            }));
        }
    }

    fn parse_body(&mut self, body: &mut Vec<Node>) -> Result<Terminator> {
        let mut text_start: Option<usize> = None;

        while self.index < self.bytes.len() {
            let a = self.bytes[self.index];
            if a == b'<' {
                self.flush_text(body, &mut text_start);

                if self.source[self.index..].starts_with("<!--") {
                    let start = self.index;
                    let content = self.read_comment()?;
                    body.push(Node::Comment(Comment {
                        content,
                        span: Span::new(start, self.index),
                    }));
                    continue;
                }

                if self.peek(1) == Some(b'/') {
                    let start = self.index;
                    self.index += 2;
                    let mut name = String::new();
                    loop {
                        let a = self.read_next(start, "close tag")?;
                        if a == b'>' {
                            break;
                        }
                        name.push(a as char);
                    }
                    return Ok(Terminator::CloseTag(name.trim().to_string()));
                }

                let tag = self.read_tag()?;
                match tag.name.as_str() {
                    "script" | "template" => {
                        let content = self.read_script(&tag.name)?;
                        let block = self.raw_block(tag, content);
                        body.push(if block.name == "script" {
                            Node::Script(block)
                        } else {
                            Node::Template(block)
                        });
                        continue;
                    }
                    "style" => {
                        let content = self.read_style()?;
                        body.push(Node::Style(self.raw_block(tag, content)));
                        continue;
                    }
                    _ => {}
                }
                let element = self.parse_element(tag)?;
                body.push(Node::Element(element));
                continue;
            }

            if a == b'{' && matches!(self.peek(1), Some(b'#' | b'/' | b':' | b'@')) {
                self.flush_text(body, &mut text_start);
                let start = self.index;
                let value = self.read_binding()?;

                if SYSTAG_RE.is_match(&value) {
                    body.push(Node::SysTag(SysTag {
                        value,
                        span: Span::new(start, self.index),
                    }));
                } else if value.starts_with("#each ") {
                    let node = self.parse_each(value, start)?;
                    body.push(node);
                } else if value == "/each" {
                    return Ok(Terminator::EachEnd);
                } else if value.starts_with("#if ") {
                    let node = self.parse_if(value, start)?;
                    body.push(node);
                } else if value == "/if" {
                    return Ok(Terminator::IfEnd);
                } else if value == ":else" {
                    return Ok(Terminator::Else);
                } else if value.starts_with("#await ") {
                    let node = self.parse_await(value, start)?;
                    body.push(node);
                } else if THEN_RE.is_match(&value) {
                    return Ok(Terminator::Then(value));
                } else if CATCH_RE.is_match(&value) {
                    return Ok(Terminator::Catch(value));
                } else if value == "/await" {
                    return Ok(Terminator::AwaitEnd);
                } else if SLOT_RE.is_match(&value) {
                    let mut inner = Vec::new();
                    self.expect_end(&mut inner, &value, |t| matches!(t, Terminator::SlotEnd))?;
                    body.push(Node::Slot(SlotBlock {
                        value,
                        body: inner,
                        span: Span::new(start, self.index),
                    }));
                } else if value == "/slot" {
                    return Ok(Terminator::SlotEnd);
                } else if FRAGMENT_RE.is_match(&value) {
                    let mut inner = Vec::new();
                    self.expect_end(&mut inner, &value, |t| matches!(t, Terminator::FragmentEnd))?;
                    body.push(Node::Fragment(FragmentBlock {
                        value,
                        body: inner,
                        span: Span::new(start, self.index),
                    }));
                } else if value == "/fragment" {
                    return Ok(Terminator::FragmentEnd);
                } else {
                    return Err(CompilerError::binding(format!("Error binding: {}", value))
                        .with_details(self.excerpt(start, self.index))
                        .locate(self.source, start));
                }
                continue;
            }

            text_start.get_or_insert(self.index);
            self.index += 1;
        }

        self.flush_text(body, &mut text_start);
        Ok(Terminator::Eof)
    }

    fn raw_block(&self, tag: OpenTag, content: String) -> RawBlock {
        RawBlock {
            name: tag.name,
            attributes: tag.attributes,
            open_tag: tag.open_tag,
            content,
            span: Span::new(tag.start, self.index),
        }
    }

    fn parse_element(&mut self, tag: OpenTag) -> Result<Element> {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let mut element = Element {
            id,
            name: tag.name,
            el_arg: tag.el_arg,
            attributes: tag.attributes,
            body: Vec::new(),
            open_tag: tag.open_tag,
            closed_tag: tag.closed_tag,
            void_tag: tag.void_tag,
            classes: ClassSet::default(),
            span: Span::new(tag.start, self.index),
        };
        if element.closed_tag {
            return Ok(element);
        }

        let open_tag = element.open_tag.clone();
        let terminator = self
            .parse_body(&mut element.body)
            .map_err(|e| e.or_details(|| open_tag.clone()))?;
        match terminator {
            Terminator::CloseTag(name) if name == element.name => {}
            Terminator::CloseTag(name) => {
                return Err(CompilerError::parse(
                    format!("Wrong close-tag: {} - {}", element.name, name),
                    open_tag,
                )
                .locate(self.source, tag.start))
            }
            Terminator::Eof => {
                return Err(CompilerError::parse("File ends to early", open_tag)
                    .locate(self.source, tag.start))
            }
            other => {
                return Err(CompilerError::binding(format!("Bind error: {}", other.describe()))
                    .with_details(open_tag)
                    .locate(self.source, tag.start))
            }
        }
        element.span.end = self.index;
        Ok(element)
    }

    /// Parses a block body that must end with the terminator accepted by `is_end`.
    fn expect_end(
        &mut self,
        body: &mut Vec<Node>,
        value: &str,
        is_end: impl Fn(&Terminator) -> bool,
    ) -> Result<()> {
        let terminator = self.parse_body(body)?;
        if is_end(&terminator) {
            return Ok(());
        }
        Err(self.unexpected(terminator, value))
    }

    fn unexpected(&self, terminator: Terminator, value: &str) -> CompilerError {
        let message = match terminator {
            Terminator::Eof => "File ends to early".to_string(),
            other => format!("Bind error: {}", other.describe()),
        };
        CompilerError::binding(message)
            .with_details(format!("{{{}}}", value))
            .locate(self.source, self.index)
    }

    fn parse_each(&mut self, value: String, start: usize) -> Result<Node> {
        let mut body = Vec::new();
        self.expect_end(&mut body, &value, |t| matches!(t, Terminator::EachEnd))?;
        Ok(Node::Each(EachBlock {
            value,
            body,
            span: Span::new(start, self.index),
        }))
    }

    fn parse_if(&mut self, value: String, start: usize) -> Result<Node> {
        let mut body = Vec::new();
        let mut else_body = None;
        match self.parse_body(&mut body)? {
            Terminator::IfEnd => {}
            Terminator::Else => {
                let mut alt = Vec::new();
                self.expect_end(&mut alt, &value, |t| matches!(t, Terminator::IfEnd))?;
                else_body = Some(alt);
            }
            other => return Err(self.unexpected(other, &value)),
        }
        Ok(Node::If(IfBlock {
            value,
            body,
            else_body,
            span: Span::new(start, self.index),
        }))
    }

    fn parse_await(&mut self, value: String, start: usize) -> Result<Node> {
        let mut main = Vec::new();
        let mut then: Option<AwaitPart> = None;
        let mut catch: Option<AwaitPart> = None;
        let mut terminator = self.parse_body(&mut main)?;
        loop {
            match terminator {
                Terminator::AwaitEnd => break,
                Terminator::Then(part) if then.is_none() && catch.is_none() => {
                    let mut body = Vec::new();
                    terminator = self.parse_body(&mut body)?;
                    then = Some(AwaitPart { value: part, body });
                }
                Terminator::Catch(part) if catch.is_none() => {
                    let mut body = Vec::new();
                    terminator = self.parse_body(&mut body)?;
                    catch = Some(AwaitPart { value: part, body });
                }
                other => return Err(self.unexpected(other, &value)),
            }
        }
        Ok(Node::Await(AwaitBlock {
            value,
            main,
            then,
            catch,
            span: Span::new(start, self.index),
        }))
    }
}

/// Parses component markup into a tree.
pub fn parse(source: &str) -> Result<Root> {
    Parser::new(source).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &Node) -> &Element {
        node.as_element().expect("element")
    }

    #[test]
    fn test_attributes_with_quotes_and_braces() {
        let root = parse(r#"<input type="text" value={a + "}"} disabled {...rest} on:click={() => {x = {}}}/>"#)
            .unwrap();
        let el = element(&root.body[0]);
        assert_eq!(el.name, "input");
        assert!(el.closed_tag && el.void_tag);
        let names: Vec<_> = el.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["type", "value", "disabled", "{...rest}", "on:click"]);
        assert_eq!(el.attributes[0].value.as_deref(), Some("text"));
        assert_eq!(el.attributes[1].value.as_deref(), Some(r#"{a + "}"}"#));
        assert_eq!(el.attributes[4].value.as_deref(), Some("{() => {x = {}}}"));
        assert_eq!(el.attributes[1].content, r#"value={a + "}"}"#);
    }

    #[test]
    fn test_el_arg() {
        let root = parse("<slot:title/><component:{Ctor} a=1/>").unwrap();
        assert_eq!(element(&root.body[0]).el_arg.as_deref(), Some("title"));
        let comp = element(&root.body[1]);
        assert_eq!(comp.el_arg.as_deref(), Some("{Ctor}"));
        assert_eq!(comp.attributes[0].name, "a");
    }

    #[test]
    fn test_raw_blocks_keep_content() {
        let src = "<script>let s = '</script>'; let t = \"\\\"\";</script><style>.a{color:red}</style>";
        let root = parse(src).unwrap();
        match &root.body[0] {
            Node::Script(s) => assert_eq!(s.content, "let s = '</script>'; let t = \"\\\"\";"),
            other => panic!("unexpected {:?}", other),
        }
        match &root.body[1] {
            Node::Style(s) => assert_eq!(s.content, ".a{color:red}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_control_blocks() {
        let src = "{#if a}<b>1</b>{:else}<i>2</i>{/if}{#each list as x}{x}{/each}{#await p}w{:then v}{v}{:catch e}!{/await}{@html raw}";
        let root = parse(src).unwrap();
        match &root.body[0] {
            Node::If(b) => {
                assert_eq!(b.value, "#if a");
                assert_eq!(b.body.len(), 1);
                assert_eq!(b.else_body.as_ref().map(|e| e.len()), Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&root.body[1], Node::Each(e) if e.value == "#each list as x"));
        match &root.body[2] {
            Node::Await(b) => {
                assert_eq!(b.then.as_ref().unwrap().value, ":then v");
                assert_eq!(b.catch.as_ref().unwrap().value, ":catch e");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&root.body[3], Node::SysTag(s) if s.value == "@html raw"));
    }

    #[test]
    fn test_spans_reconstruct_source() {
        let src = "<div class=\"a\">hi {name}<br></div>\n<!-- c -->{#if x}<p>y</p>{/if}<script>let a;</script>tail";
        let root = parse(src).unwrap();
        let mut pos = 0;
        let mut rebuilt = String::new();
        for node in &root.body {
            assert_eq!(node.span().start, pos);
            rebuilt.push_str(node.span().source_text(src));
            pos = node.span().end;
        }
        assert_eq!(rebuilt, src);

        let div = element(&root.body[0]);
        let inner: String = div.body.iter().map(|n| n.span().source_text(src)).collect();
        assert_eq!(inner, "hi {name}<br>");
    }

    #[test]
    fn test_wrong_close_tag() {
        let err = parse("<div><span></div>").unwrap_err();
        assert!(err.message.contains("Wrong close-tag: span - div"));
        assert_eq!(err.details.as_deref(), Some("<span>"));
    }

    #[test]
    fn test_unterminated_constructs() {
        assert!(parse("<div>").unwrap_err().message.contains("File ends to early"));
        assert!(parse("<div class=\"a").is_err());
        assert!(parse("<script>let a").is_err());
        assert!(parse("<style>.a{}").is_err());
        assert!(parse("<!-- open").is_err());
        assert!(parse("{#if a}x").is_err());
        assert!(parse("{#each a as b}x{/if}").is_err());
        assert!(parse("{:else}").is_err());
        assert!(parse("{#unknown}").is_err());
    }
}
