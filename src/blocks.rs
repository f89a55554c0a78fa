//! Sub-builders for `{#if}`, `{#each}`, `{#await}` and `{@html}`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{AwaitBlock, AwaitPart, EachBlock, IfBlock, Node};
use crate::codegen::{Block, BlockOptions, Generator, Owner};
use crate::error::{ensure, CompilerError, Result};
use crate::expression::{detect_expression_type, is_simple_name, ExpressionType};

lazy_static! {
    static ref IF_RE: Regex = Regex::new(r"(?s)^#if (.*)$").unwrap();
    static ref EACH_RE: Regex = Regex::new(r"(?s)^#each\s+(\S+)\s+as\s+(.+)$").unwrap();
    static ref EACH_KEY_RE: Regex = Regex::new(r"^(.*)\s*\(\s*([^()]+)\s*\)\s*$").unwrap();
    static ref EACH_DESTRUCT_RE: Regex = Regex::new(r"^\{([^}]+)\}(.*)$").unwrap();
    static ref COMMA_RE: Regex = Regex::new(r"\s*,\s*").unwrap();
    static ref AWAIT_THEN_RE: Regex = Regex::new(r"^#await\s+(\S+)\s+then\s+(\S+)\s*$").unwrap();
    static ref AWAIT_RE: Regex = Regex::new(r"^#await\s+(\S+)\s*$").unwrap();
    static ref PART_ARG_RE: Regex = Regex::new(r"^\S+\s+(.*)$").unwrap();
}

/// Item pattern of an `each` block.
#[derive(Debug, PartialEq, Eq)]
struct EachHeader {
    array: String,
    item: String,
    index: String,
    key: Option<String>,
    /// Fields destructured from the item, `{a, b}`.
    fields: Vec<String>,
}

fn parse_each_header(value: &str) -> Result<EachHeader> {
    let wrong = || CompilerError::binding(format!("Wrong #each expression '{}'", value));
    let caps = EACH_RE.captures(value).ok_or_else(wrong)?;
    let array = caps[1].to_string();
    let mut right = caps[2].to_string();

    let mut key = None;
    if let Some(k) = EACH_KEY_RE.captures(&right) {
        key = Some(k[2].trim().to_string());
        right = k[1].to_string();
    }
    let right = right.trim();

    let (item, index, fields) = if right.starts_with('{') {
        let d = EACH_DESTRUCT_RE.captures(right).ok_or_else(wrong)?;
        let fields: Vec<String> = COMMA_RE.split(d[1].trim()).map(str::to_string).collect();
        let rest = d[2].trim();
        let index = rest.strip_prefix(',').unwrap_or(rest).trim();
        let index = if index.is_empty() { "$index" } else { index };
        ("$$item".to_string(), index.to_string(), fields)
    } else {
        let names: Vec<&str> = COMMA_RE.split(right).collect();
        ensure(names.len() <= 2, wrong)?;
        let index = names.get(1).copied().unwrap_or("$index");
        (names[0].to_string(), index.to_string(), Vec::new())
    };
    ensure(is_simple_name(&item), || CompilerError::binding(format!("Wrong name '{}'", item)))?;
    ensure(is_simple_name(&index), || CompilerError::binding(format!("Wrong name '{}'", index)))?;

    let key = key.filter(|k| *k != item);
    if let Some(k) = &key {
        ensure(
            detect_expression_type(k) == Some(ExpressionType::Identifier),
            || CompilerError::binding(format!("Wrong key '{}'", k)),
        )?;
    }
    Ok(EachHeader {
        array,
        item,
        index,
        key,
        fields,
    })
}

/// Drops blank text at both ends of a loop body.
fn trim_body(body: &[Node]) -> &[Node] {
    let start = body.iter().position(|n| !n.is_blank_text());
    let end = body.iter().rposition(|n| !n.is_blank_text());
    match (start, end) {
        (Some(s), Some(e)) => &body[s..=e],
        _ => &body[..body.len().min(1)],
    }
}

/// Parameter name written after `:then` / `:catch`.
fn part_arg(part: &AwaitPart) -> Result<Vec<String>> {
    match PART_ARG_RE.captures(part.value.trim()) {
        Some(c) => {
            let name = c[1].trim().to_string();
            ensure(is_simple_name(&name), || {
                CompilerError::binding(format!("Wrong name '{}'", name))
            })?;
            Ok(vec![name])
        }
        None => Ok(Vec::new()),
    }
}

impl<'c> Generator<'c> {
    pub fn make_if_block(&self, data: &IfBlock, label: &str) -> Result<String> {
        let exp = IF_RE
            .captures(&data.value)
            .map(|c| c[1].trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| CompilerError::binding(format!("Wrong binding: {}", data.value)))?;

        let name = self.names.next("ifBlock");
        let mut source = vec![format!("function {}($cd, $parentElement) {{", name)];

        let main = self.build_block(&data.body, Owner::Other, BlockOptions::protected())?;
        let alt = match &data.else_body {
            Some(body) => Some(self.build_block(body, Owner::Other, BlockOptions::protected())?),
            None => None,
        };
        if let Some(alt) = &alt {
            source.push(format!("let elsefr = {};\n{}", self.fragment_of(alt), alt.source));
        }
        source.push(format!("let mainfr = {};\n{}", self.fragment_of(&main), main.source));
        source.push(match &alt {
            Some(alt) => format!(
                "$runtime.$$ifBlock($cd, $parentElement, () => !!({}), mainfr, {}, elsefr, {});",
                exp, main.name, alt.name
            ),
            None => format!(
                "$runtime.$$ifBlock($cd, $parentElement, () => !!({}), mainfr, {});",
                exp, main.name
            ),
        });
        source.push(format!("}};\n{}($cd, {});", name, label));
        Ok(source.join("\n"))
    }

    pub fn make_each_block(&self, data: &EachBlock, el_name: &str, only_child: bool) -> Result<String> {
        let item_block: Block =
            self.build_block(trim_body(&data.body), Owner::Other, BlockOptions::protected())?;
        let header = parse_each_header(&data.value)?;
        let EachHeader {
            array,
            item,
            index,
            key,
            fields,
        } = header;

        let bind0 = if fields.is_empty() {
            String::new()
        } else {
            let assign = fields
                .iter()
                .map(|f| format!("{} = $$item.{}", f, f))
                .collect::<Vec<_>>()
                .join(", ");
            format!("var {};\n$ctx.cd.prefix.push(() => {{\n{};\n}});\n", assign, assign)
        };
        let key_function = match &key {
            None => "let getKey = $runtime.noop;".to_string(),
            Some(k) if *k == index => "function getKey(_, i) {return i;}".to_string(),
            Some(k) => format!("function getKey({}) {{return {};}}", item, k),
        };

        Ok(format!(
            "{{\nfunction bind($ctx, $template, {item}, {index}) {{\n{bind0}{source};\n{build}($ctx.cd, $template);\n$ctx.rebind = function(_{index}, _{item}) {{\n{index} = _{index};\n{item} = _{item};\n}};\n}};\n{key_function};\nlet itemTemplate = {fragment};\n$runtime.$$eachBlock($cd, {el}, {only}, () => ({array}), getKey, itemTemplate, bind);\n}}",
            item = item,
            index = index,
            bind0 = bind0,
            source = item_block.source,
            build = item_block.name,
            key_function = key_function,
            fragment = self.fragment_of(&item_block),
            el = el_name,
            only = if only_child { 1 } else { 0 },
            array = array,
        ))
    }

    pub fn make_await_block(&self, node: &AwaitBlock, el_name: &str) -> Result<String> {
        let wrong = || CompilerError::binding(format!("Wrong #await expression '{}'", node.value));
        let (exp, main, then): (String, &[Node], Option<(&[Node], Vec<String>)>) =
            match AWAIT_THEN_RE.captures(node.value.trim()) {
                Some(c) => {
                    ensure(node.then.is_none(), wrong)?;
                    let value = c[2].to_string();
                    ensure(is_simple_name(&value), || {
                        CompilerError::binding(format!("Wrong name '{}'", value))
                    })?;
                    (c[1].to_string(), &node.main[..0], Some((&node.main[..], vec![value])))
                }
                None => {
                    let c = AWAIT_RE.captures(node.value.trim()).ok_or_else(wrong)?;
                    let then = match &node.then {
                        Some(part) => Some((&part.body[..], part_arg(part)?)),
                        None => None,
                    };
                    (c[1].trim().to_string(), &node.main[..], then)
                }
            };

        let mut source = Vec::new();
        let mut part = |body: &[Node], args: Vec<String>, tpl: &str| -> Result<(String, String)> {
            if body.is_empty() {
                return Ok(("null".to_string(), "null".to_string()));
            }
            let block = self.build_block(
                body,
                Owner::Other,
                BlockOptions {
                    protect_last_tag: true,
                    args,
                },
            )?;
            source.push(block.source.clone());
            source.push(format!("const {} = {};", tpl, self.fragment_of(&block)));
            Ok((block.name, tpl.to_string()))
        };

        let (build_main, tpl_main) = part(main, Vec::new(), "tpl_main")?;
        let (build_then, tpl_then) = match then {
            Some((body, args)) => part(body, args, "tpl_then")?,
            None => ("null".to_string(), "null".to_string()),
        };
        let (build_catch, tpl_catch) = match &node.catch {
            Some(c) => part(&c.body, part_arg(c)?, "tpl_catch")?,
            None => ("null".to_string(), "null".to_string()),
        };

        source.push(format!(
            "$runtime.$$awaitBlock($cd, {}, () => {}, $$apply, {}, {}, {}, {}, {}, {});",
            el_name, exp, build_main, build_then, build_catch, tpl_main, tpl_then, tpl_catch
        ));
        Ok(format!("{{\n{}\n}}", source.join("\n")))
    }

    pub fn make_html_block(&self, exp: &str, label: &str) -> String {
        format!("$runtime.$$htmlBlock($cd, {}, () => ({}));\n", label, exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_each_header_forms() {
        let h = parse_each_header("#each items as item, i (item.id)").unwrap();
        assert_eq!(h.array, "items");
        assert_eq!(h.item, "item");
        assert_eq!(h.index, "i");
        assert_eq!(h.key.as_deref(), Some("item.id"));

        let h = parse_each_header("#each rows as {id, name}, n").unwrap();
        assert_eq!(h.item, "$$item");
        assert_eq!(h.index, "n");
        assert_eq!(h.fields, vec!["id", "name"]);

        let h = parse_each_header("#each list as x (x)").unwrap();
        assert_eq!(h.key, None);
        assert_eq!(h.index, "$index");

        assert!(parse_each_header("#each list").is_err());
        assert!(parse_each_header("#each list as a, b, c").is_err());
        assert!(parse_each_header("#each list as x (x + 1)").is_err());
    }

    #[test]
    fn test_each_block_code() {
        let source = generate("<ul>{#each items as item (item.id)}<li>{item.id}</li>{/each}</ul>");
        assert!(source.contains("function bind($ctx, $template, item, $index) {"));
        assert!(source.contains("function getKey(item) {return item.id;}"));
        assert!(source.contains("let itemTemplate = $$htmlToFragment(`<li> </li>`);"));
        assert!(source.contains("$runtime.$$eachBlock($cd, el"));
        assert!(source.contains(", 1, () => (items), getKey, itemTemplate, bind);"));
    }

    #[test]
    fn test_each_index_key_and_destructuring() {
        let source = generate("{#each rows as {id}, i (i)}<p>{id}</p>{/each}");
        assert!(source.contains("function getKey(_, i) {return i;}"));
        assert!(source.contains("var id = $$item.id;"));
        assert!(source.contains(", 0, () => (rows), getKey, itemTemplate, bind);"));
    }

    #[test]
    fn test_if_else_block() {
        let source = generate("{#if show}<b>yes</b>{:else}<i>no</i>{/if}");
        assert!(source.contains("let elsefr = $$htmlToFragment(`<i>no</i>`);"));
        assert!(source.contains("let mainfr = $$htmlToFragment(`<b>yes</b>`);"));
        assert!(source.contains(
            "$runtime.$$ifBlock($cd, $parentElement, () => !!(show), mainfr, $runtime.noop, elsefr, $runtime.noop);"
        ));
    }

    #[test]
    fn test_await_block_parts() {
        let source = generate("{#await load()}wait{:then data}<p>{data}</p>{:catch err}bad{/await}");
        assert!(source.contains("const tpl_main = $$htmlToFragment(`wait`);"));
        assert!(source.contains("($cd, $parentElement, data) {"));
        assert!(source.contains("() => load(), $$apply, $runtime.noop, $$build"));
        assert!(source.contains("tpl_main, tpl_then, tpl_catch);"));

        let source = generate("{#await p then v}{v}{/await}");
        assert!(source.contains("($cd, $parentElement, v) {"));
        assert!(source.contains("$$apply, null, $$build"));
        assert!(source.contains(", null, null, tpl_then, null);"));
    }

    #[test]
    fn test_html_systag() {
        let source = generate("<div>{@html body}</div>");
        assert!(source.contains("$runtime.$$htmlBlock($cd, el0, () => (body));"));
    }
}
