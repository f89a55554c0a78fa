//! Script analysis and rewriting.
//!
//! The component `<script>` is parsed with oxc and rewritten into the body
//! of the generated component function:
//! - top-level declarations are classified into root variables/functions;
//! - `export let` declarations become props destructured from `$props`;
//! - `$:` labeled statements become watch registrations;
//! - every function body gets a leading `$$apply();` (except iteration
//!   callbacks, `$onDestroy` callbacks and `// !no-check` bodies), and every
//!   statement-level `await` is followed by one.
//!
//! Rewrites are collected as span patches against the source, the same way
//! the renamer collects replacements, and applied while slicing statements.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, ArrowFunctionExpression, AssignmentTarget, AwaitExpression, BindingPattern,
    BlockStatement, CallExpression, Declaration, Expression, Function, FunctionBody,
    ImportDeclarationSpecifier, LabeledStatement, Program, Statement, VariableDeclaration,
};
use oxc_ast_visit::Visit;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_syntax::operator::AssignmentOperator;
use oxc_syntax::scope::ScopeFlags;
use regex::Regex;
use std::collections::HashSet;

use crate::config::CompileOptions;
use crate::error::{CompilerError, Result};
use crate::expression::{detect_expression_type, root_name, ExpressionType};

const NO_CHECK_MARKER: &str = "$$_noCheck";
const APPLY: &str = "$$apply();";

lazy_static! {
    static ref LINE_COMMENT_RE: Regex = Regex::new(r"^(\s*)//(.*)$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// A statement of the component function body. Named items may be
/// dropped by [`ScriptInfo::shake`] when the name is never referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootItem {
    pub code: String,
    pub name: Option<&'static str>,
}

impl RootItem {
    fn plain(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: None,
        }
    }

    fn named(code: impl Into<String>, name: &'static str) -> Self {
        Self {
            code: code.into(),
            name: Some(name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptInfo {
    /// Script text after sentinel preprocessing.
    pub source: String,
    pub watchers: Vec<String>,
    /// Default-import names.
    pub imports: Vec<String>,
    pub imported_names: Vec<String>,
    pub props: Vec<String>,
    pub root_variables: HashSet<String>,
    pub root_functions: HashSet<String>,
    pub on_mount: bool,
    pub on_destroy: bool,
    pub import_code: Vec<String>,
    pub root_level: Vec<RootItem>,
    /// Printed component function, set by [`ScriptInfo::build`].
    pub code: String,
}

impl ScriptInfo {
    /// True when `name` (or the root of a dotted path) is declared at the top
    /// level; otherwise reports a warning.
    pub fn check_root_name(&self, name: &str, options: &CompileOptions) -> bool {
        let Some(root) = root_name(name) else {
            options.warn(format!("Error name: {}", name));
            return false;
        };
        if self.root_variables.contains(root)
            || self.root_functions.contains(root)
            || self.imported_names.iter().any(|n| n == root)
        {
            return true;
        }
        options.warn(format!("No name: {}", name));
        false
    }

    /// Removes header items whose names never appear in `used`.
    pub fn shake(&mut self, used: &str) {
        let mut remove: Vec<&'static str> = Vec::new();
        if !used.contains("$attributes") {
            remove.push("$attributes");
            if !used.contains("$props") {
                remove.push("$props");
            }
        }
        if !used.contains("$emit") {
            remove.push("$emit");
        }
        if !used.contains("$context") {
            remove.push("$context");
        }
        self.root_level
            .retain(|item| item.name.map_or(true, |n| !remove.contains(&n)));
    }

    /// Assembles imports and the component function, then reprints the
    /// module through the JS printer.
    pub fn build(&mut self, options: &CompileOptions) -> Result<()> {
        let mut code = String::new();
        for import in &self.import_code {
            code.push_str(import);
            code.push('\n');
        }
        if options.export_default {
            code.push_str("export default ");
        }
        code.push_str(&format!("function {}($element, $option = {{}}) {{\n", options.name));
        for item in &self.root_level {
            code.push_str(&item.code);
            code.push('\n');
        }
        code.push_str("}\n");

        let allocator = Allocator::default();
        let source_type = SourceType::default().with_module(true);
        let ret = Parser::new(&allocator, &code, source_type).parse();
        if let Some(error) = ret.errors.first() {
            return Err(CompilerError::script(format!("Script build error: {}", error))
                .with_details(code.clone()));
        }
        self.code = Codegen::new().build(&ret.program).code;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATCHES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchKind {
    /// Opens a construct; same-position opens keep visit order.
    Open,
    /// Closes a construct; same-position closes apply innermost first.
    Close,
    /// Removes `pos..end`.
    Delete(u32),
}

#[derive(Debug, Clone)]
struct Patch {
    pos: u32,
    seq: u32,
    kind: PatchKind,
    text: String,
}

impl Patch {
    fn sort_key(&self) -> (u32, u8, u32) {
        match self.kind {
            PatchKind::Close => (self.pos, 0, u32::MAX - self.seq),
            PatchKind::Open => (self.pos, 1, self.seq),
            PatchKind::Delete(_) => (self.pos, 2, self.seq),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CurrentStatement {
    span: Span,
    return_arg: Option<Span>,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Statement list of a block or function body.
    Block(Option<CurrentStatement>),
    /// Expression body of an arrow rewritten into `{return ...;}`.
    Return(Span),
}

struct Instrumenter {
    insert_on_destroy: bool,
    loop_callbacks: HashSet<u32>,
    destroy_callbacks: HashSet<u32>,
    frames: Vec<Frame>,
    applied: HashSet<u32>,
    patches: Vec<Patch>,
    seq: u32,
}

fn function_argument_start(arg: &Argument) -> Option<u32> {
    match arg {
        Argument::FunctionExpression(f) => Some(f.span.start),
        Argument::ArrowFunctionExpression(f) => Some(f.span.start),
        _ => None,
    }
}

fn is_no_check(stmt: &Statement) -> bool {
    matches!(stmt, Statement::ExpressionStatement(es)
        if matches!(&es.expression, Expression::Identifier(id) if id.name == NO_CHECK_MARKER))
}

impl Instrumenter {
    fn push(&mut self, pos: u32, kind: PatchKind, text: &str) {
        self.seq += 1;
        self.patches.push(Patch {
            pos,
            seq: self.seq,
            kind,
            text: text.to_string(),
        });
    }

    fn wrap_apply(&mut self, span: Span) {
        self.push(span.start, PatchKind::Open, "$$apply(");
        self.push(span.end, PatchKind::Close, ")");
    }

    /// Handles the statements of a function body; returns false when the
    /// body carries the no-check marker and must not be walked.
    fn instrument_body(&mut self, statements: &[Statement], body_span: Span, in_loop: bool) -> bool {
        if statements.is_empty() {
            return true;
        }
        if let Some(marker) = statements.iter().find(|s| is_no_check(s)) {
            let span = marker.span();
            self.push(span.start, PatchKind::Delete(span.end), "");
            return false;
        }
        if !in_loop {
            self.push(body_span.start + 1, PatchKind::Open, APPLY);
        }
        true
    }

    fn walk_statements(&mut self, statements: &[Statement<'_>]) {
        self.frames.push(Frame::Block(None));
        for stmt in statements {
            let return_arg = match stmt {
                Statement::ReturnStatement(r) => r.argument.as_ref().map(|a| a.span()),
                _ => None,
            };
            if let Some(Frame::Block(current)) = self.frames.last_mut() {
                *current = Some(CurrentStatement {
                    span: stmt.span(),
                    return_arg,
                });
            }
            self.visit_statement(stmt);
        }
        self.frames.pop();
    }

    fn render(&self, source: &str, span: Span) -> String {
        let mut patches: Vec<&Patch> = self
            .patches
            .iter()
            .filter(|p| p.pos >= span.start && p.pos <= span.end)
            .collect();
        patches.sort_by_key(|p| p.sort_key());

        let mut out = String::new();
        let mut cursor = span.start;
        for patch in patches {
            if patch.pos < cursor {
                continue;
            }
            out.push_str(&source[cursor as usize..patch.pos as usize]);
            cursor = patch.pos;
            match patch.kind {
                PatchKind::Delete(end) => cursor = end.min(span.end),
                _ => out.push_str(&patch.text),
            }
        }
        out.push_str(&source[cursor as usize..span.end as usize]);
        out
    }
}

impl<'a> Visit<'a> for Instrumenter {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        match &call.callee {
            Expression::StaticMemberExpression(member)
                if matches!(member.property.name.as_str(), "forEach" | "map" | "filter") =>
            {
                let starts: Vec<u32> = call.arguments.iter().filter_map(function_argument_start).collect();
                self.loop_callbacks.extend(starts);
            }
            Expression::Identifier(id) if id.name == "$onDestroy" => {
                let starts: Vec<u32> = call.arguments.iter().filter_map(function_argument_start).collect();
                self.destroy_callbacks.extend(starts);
            }
            _ => {}
        }
        oxc_ast_visit::walk::walk_call_expression(self, call);
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        if self.insert_on_destroy && self.destroy_callbacks.contains(&func.span.start) {
            return;
        }
        if let Some(body) = &func.body {
            let in_loop = self.loop_callbacks.contains(&func.span.start);
            if !self.instrument_body(&body.statements, body.span, in_loop) {
                return;
            }
        }
        oxc_ast_visit::walk::walk_function(self, func, flags);
    }

    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        if self.insert_on_destroy && self.destroy_callbacks.contains(&arrow.span.start) {
            return;
        }
        let in_loop = self.loop_callbacks.contains(&arrow.span.start);

        if arrow.expression {
            let Some(Statement::ExpressionStatement(stmt)) = arrow.body.statements.first() else {
                return;
            };
            self.visit_formal_parameters(&arrow.params);
            if in_loop {
                self.visit_expression(&stmt.expression);
                return;
            }
            let span = stmt.expression.span();
            self.push(span.start, PatchKind::Open, "{$$apply(); return ");
            self.push(span.end, PatchKind::Close, ";}");
            self.frames.push(Frame::Return(span));
            self.visit_expression(&stmt.expression);
            self.frames.pop();
            return;
        }

        if !self.instrument_body(&arrow.body.statements, arrow.body.span, in_loop) {
            return;
        }
        oxc_ast_visit::walk::walk_arrow_function_expression(self, arrow);
    }

    fn visit_function_body(&mut self, body: &FunctionBody<'a>) {
        self.walk_statements(&body.statements);
    }

    fn visit_block_statement(&mut self, block: &BlockStatement<'a>) {
        self.walk_statements(&block.body);
    }

    fn visit_await_expression(&mut self, expr: &AwaitExpression<'a>) {
        match self.frames.last().copied() {
            Some(Frame::Block(Some(current))) => {
                if self.applied.insert(current.span.start) {
                    match current.return_arg {
                        Some(arg) => self.wrap_apply(arg),
                        None => self.push(current.span.end, PatchKind::Close, " $$apply();"),
                    }
                }
            }
            Some(Frame::Return(span)) => {
                if self.applied.insert(span.start) {
                    self.wrap_apply(span);
                }
            }
            _ => {}
        }
        oxc_ast_visit::walk::walk_await_expression(self, expr);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORM
// ═══════════════════════════════════════════════════════════════════════════════

/// Replaces `// !no-check` comment lines with a marker statement.
fn mark_no_check(source: &str) -> String {
    source
        .split('\n')
        .map(|line| match LINE_COMMENT_RE.captures(line) {
            Some(c) if c[2].trim() == "!no-check" => format!("{}{};", &c[1], NO_CHECK_MARKER),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn slice(source: &str, span: Span) -> &str {
    &source[span.start as usize..span.end as usize]
}

fn is_expression_like(expr: &Expression) -> bool {
    !matches!(
        expr.without_parentheses(),
        Expression::NumericLiteral(_)
            | Expression::StringLiteral(_)
            | Expression::BooleanLiteral(_)
            | Expression::NullLiteral(_)
            | Expression::BigIntLiteral(_)
            | Expression::RegExpLiteral(_)
            | Expression::TemplateLiteral(_)
            | Expression::MetaProperty(_)
            | Expression::Super(_)
    )
}

fn assert_expression(expr: &Expression) -> Result<()> {
    if is_expression_like(expr) {
        Ok(())
    } else {
        Err(CompilerError::script("Wrong expression"))
    }
}

fn add_declarations(decl: &VariableDeclaration, info: &mut ScriptInfo) {
    for d in &decl.declarations {
        if let BindingPattern::BindingIdentifier(id) = &d.id {
            info.root_variables.insert(id.name.to_string());
            if matches!(d.init, Some(Expression::ArrowFunctionExpression(_))) {
                info.root_functions.insert(id.name.to_string());
            }
        }
    }
}

fn collect_root_names(program: &Program, info: &mut ScriptInfo) {
    for stmt in &program.body {
        match stmt {
            Statement::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    info.root_functions.insert(id.name.to_string());
                }
            }
            Statement::VariableDeclaration(decl) => add_declarations(decl, info),
            Statement::ExportNamedDeclaration(export) => {
                if let Some(Declaration::VariableDeclaration(decl)) = &export.declaration {
                    add_declarations(decl, info);
                }
            }
            _ => {}
        }
    }
}

struct Transformer<'s> {
    source: &'s str,
    instrumenter: Instrumenter,
    info: ScriptInfo,
    body: Vec<RootItem>,
    last_prop_index: Option<usize>,
}

impl<'s> Transformer<'s> {
    fn make_watch(&mut self, label: &LabeledStatement) -> Result<()> {
        let Statement::ExpressionStatement(stmt) = &label.body else {
            return Err(CompilerError::script("Error"));
        };
        match stmt.expression.without_parentheses() {
            Expression::AssignmentExpression(ex) => {
                if ex.operator != AssignmentOperator::Assign {
                    return Err(CompilerError::script("Error"));
                }
                let target = match &ex.left {
                    AssignmentTarget::AssignmentTargetIdentifier(id) => {
                        let name = id.name.to_string();
                        if !self.info.root_variables.contains(&name) {
                            self.body.push(RootItem::plain(format!("var {};", name)));
                            self.info.root_variables.insert(name.clone());
                        }
                        name
                    }
                    AssignmentTarget::StaticMemberExpression(_)
                    | AssignmentTarget::ComputedMemberExpression(_) => {
                        slice(self.source, ex.left.span()).to_string()
                    }
                    _ => return Err(CompilerError::script("Error")),
                };
                assert_expression(&ex.right)?;
                let exp = slice(self.source, ex.right.span());
                self.info.watchers.push(format!(
                    "$watch($cd, () => ({}), ($$value) => {{{} = $$value;}});",
                    exp, target
                ));
            }
            Expression::SequenceExpression(seq) => {
                let exprs = &seq.expressions;
                let Some(handler) = exprs.last() else {
                    return Err(CompilerError::script("Error"));
                };
                let raw = slice(self.source, handler.span());
                let callback = match handler.without_parentheses() {
                    Expression::ArrowFunctionExpression(_) | Expression::FunctionExpression(_) => {
                        raw.to_string()
                    }
                    _ if detect_expression_type(raw) == Some(ExpressionType::Identifier) => {
                        format!("(v) => {{ {}(v); }}", raw)
                    }
                    _ => format!("() => {{ {}; }}", raw),
                };
                match exprs.len() {
                    2 => {
                        assert_expression(&exprs[0])?;
                        let exp = slice(self.source, exprs[0].span());
                        self.info
                            .watchers
                            .push(format!("$watch($cd, () => ({}), {});", exp, callback));
                    }
                    n if n > 2 => {
                        for e in exprs.iter().take(n - 1) {
                            assert_expression(e)?;
                        }
                        let deps = Span::new(exprs[0].span().start, exprs[n - 2].span().end);
                        self.info.watchers.push(format!(
                            "$watch($cd, () => [{}], ($args) => {{ ({}).apply(null, $args); }}, {{cmp: $runtime.$$compareArray}});",
                            slice(self.source, deps),
                            callback
                        ));
                    }
                    _ => return Err(CompilerError::script("Error")),
                }
            }
            _ => return Err(CompilerError::script("Error")),
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::ImportDeclaration(import) => {
                if let Some(specifiers) = &import.specifiers {
                    for specifier in specifiers {
                        let (local, is_default) = match specifier {
                            ImportDeclarationSpecifier::ImportSpecifier(s) => (&s.local, false),
                            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => (&s.local, true),
                            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => (&s.local, false),
                        };
                        self.info.imported_names.push(local.name.to_string());
                        if is_default {
                            self.info.imports.push(local.name.to_string());
                        }
                    }
                }
                let code = self.instrumenter.render(self.source, import.span);
                self.info.import_code.push(code);
            }
            Statement::ExportNamedDeclaration(export) => {
                let Some(Declaration::VariableDeclaration(decl)) = &export.declaration else {
                    return Err(CompilerError::script("Wrong export")
                        .with_details(slice(self.source, export.span).to_string()));
                };
                for d in &decl.declarations {
                    let BindingPattern::BindingIdentifier(id) = &d.id else {
                        return Err(CompilerError::script("Wrong export")
                            .with_details(slice(self.source, export.span).to_string()));
                    };
                    let name = id.name.to_string();
                    let code = match &d.init {
                        Some(init) => format!(
                            "let {{{} = {}}} = $props;",
                            name,
                            self.instrumenter.render(self.source, init.span())
                        ),
                        None => format!("let {{{}}} = $props;", name),
                    };
                    self.info.props.push(name);
                    self.body.push(RootItem::plain(code));
                    self.last_prop_index = Some(self.body.len());
                }
            }
            Statement::ExportDefaultDeclaration(_) | Statement::ExportAllDeclaration(_) => {
                return Err(CompilerError::script("Wrong export")
                    .with_details(slice(self.source, stmt.span()).to_string()));
            }
            Statement::LabeledStatement(label) if label.label.name == "$" => {
                self.make_watch(label).map_err(|e| {
                    let stmt = slice(self.source, label.span);
                    CompilerError::script(format!("{}: {}", e.message, stmt))
                        .with_details(stmt.to_string())
                        .locate(stmt, 0)
                })?;
            }
            _ if is_no_check(stmt) => {}
            _ => {
                let code = self.instrumenter.render(self.source, stmt.span());
                self.body.push(RootItem::plain(code));
            }
        }
        Ok(())
    }

    fn header(&mut self, options: &CompileOptions, property: bool) {
        let mut header = vec![
            RootItem::plain("const $component = $runtime.$$makeComponent($element, $option);"),
            RootItem::plain("const $$apply = $component.apply;"),
            RootItem::plain("$$runtimeHeader();"),
        ];

        let props = &self.info.props;
        match self.last_prop_index {
            Some(index) => {
                header.push(RootItem::plain("const $props = $option.props;"));
                let skip = props.iter().map(|n| format!("{}:1", n)).collect::<Vec<_>>().join(",");
                let getters = props
                    .iter()
                    .map(|n| format!("{}: () => {}", n, n))
                    .collect::<Vec<_>>()
                    .join(",");
                let tail = vec![
                    RootItem::named(format!("let $$skipAttrs = {{{}}};", skip), "$attributes"),
                    RootItem::named(
                        "let $attributes = $runtime.recalcAttributes($props, $$skipAttrs);",
                        "$attributes",
                    ),
                    RootItem::plain(format!(
                        "$runtime.completeProps($component, () => {{\n({{{}}} = $props);",
                        props.join(",")
                    )),
                    RootItem::named(
                        "$attributes = $runtime.recalcAttributes($props, $$skipAttrs);",
                        "$attributes",
                    ),
                    RootItem::plain(format!("}}, {{{}}});", getters)),
                ];
                self.body.splice(index..index, tail);
            }
            None => {
                header.push(RootItem::named("const $props = $option.props;", "$props"));
                header.push(RootItem::named("let $attributes = $props;", "$attributes"));
            }
        }
        header.push(RootItem::named("const $context = $component.context;", "$context"));

        if options.auto_subscribe {
            for name in &self.info.imported_names {
                header.push(RootItem::plain(format!(
                    "$runtime.autoSubscribe($component, {});",
                    name
                )));
            }
        }

        let user_defined = |name: &str| {
            self.info.root_functions.contains(name) || self.info.root_variables.contains(name)
        };
        if !user_defined("$emit") {
            header.push(RootItem::named("const $emit = $runtime.$makeEmitter($option);", "$emit"));
        }
        if self.instrumenter.insert_on_destroy {
            header.push(RootItem::plain(
                "function $onDestroy(fn) {$runtime.cd_onDestroy($component.$cd, fn);}",
            ));
        }

        if property {
            for name in &self.info.props {
                self.body.push(RootItem::plain(format!(
                    "$runtime.makeExternalProperty($component, '{0}', () => {0}, _{0} => {0} = _{0});",
                    name
                )));
            }
        }
        self.body.push(RootItem::plain("$$runtime();"));

        header.append(&mut self.body);
        self.info.root_level = header;
    }
}

/// Analyzes and rewrites the component script. `property` is set when the
/// `<script>` tag carries the `property` attribute.
pub fn transform(source: Option<&str>, options: &CompileOptions, property: bool) -> Result<ScriptInfo> {
    let source = mark_no_check(source.unwrap_or(""));
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, &source, source_type).parse();
    if let Some(error) = ret.errors.first() {
        let offset = error
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map_or(0, |label| label.offset());
        return Err(CompilerError::script(format!("{}", error))
            .with_details(source.clone())
            .locate(&source, offset));
    }
    let program = ret.program;

    let mut info = ScriptInfo {
        source: source.clone(),
        ..ScriptInfo::default()
    };
    collect_root_names(&program, &mut info);
    info.on_mount = info.root_functions.contains("onMount");
    info.on_destroy = info.root_functions.contains("onDestroy");
    let insert_on_destroy =
        !(info.root_functions.contains("$onDestroy") || info.root_variables.contains("$onDestroy"));

    let mut instrumenter = Instrumenter {
        insert_on_destroy,
        loop_callbacks: HashSet::new(),
        destroy_callbacks: HashSet::new(),
        frames: Vec::new(),
        applied: HashSet::new(),
        patches: Vec::new(),
        seq: 0,
    };
    instrumenter.visit_program(&program);

    let mut transformer = Transformer {
        source: &source,
        instrumenter,
        info,
        body: Vec::new(),
        last_prop_index: None,
    };
    for stmt in &program.body {
        transformer.statement(stmt)?;
    }
    transformer.header(options, property);
    Ok(transformer.info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(script: &str) -> String {
        let info = transform(Some(script), &CompileOptions::default(), false).unwrap();
        info.root_level
            .iter()
            .map(|i| i.code.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_apply_inserted_into_functions() {
        let body = body_of("function inc() { count++; }\nconst dec = () => { count--; };");
        assert!(body.contains("function inc() {$$apply(); count++; }"));
        assert!(body.contains("const dec = () => {$$apply(); count--; };"));
    }

    #[test]
    fn test_expression_arrow_converted() {
        let body = body_of("const get = (x) => x + 1;");
        assert!(body.contains("const get = (x) => {$$apply(); return x + 1;};"));
    }

    #[test]
    fn test_loop_callbacks_skipped() {
        let body = body_of("function f() { list.forEach(i => { total += i; }); list.map(x => x * 2); }");
        assert!(body.contains("list.forEach(i => { total += i; })"));
        assert!(body.contains("list.map(x => x * 2)"));
        assert!(body.contains("function f() {$$apply();"));
    }

    #[test]
    fn test_on_destroy_callback_skipped() {
        let body = body_of("$onDestroy(() => { stop(); });");
        assert!(body.contains("$onDestroy(() => { stop(); });"));
        assert!(body.contains("function $onDestroy(fn)"));
    }

    #[test]
    fn test_await_gets_apply() {
        let body = body_of("async function load() {\n  data = await fetch(url);\n  return await data.json();\n}");
        assert!(body.contains("data = await fetch(url); $$apply();"));
        assert!(body.contains("return $$apply(await data.json());"));
    }

    #[test]
    fn test_no_check_marker() {
        let body = body_of("function raw() {\n  // !no-check\n  x = 1;\n}");
        assert!(!body.contains("$$apply();\n  x"));
        assert!(!body.contains(NO_CHECK_MARKER));
        assert!(body.contains("x = 1;"));
    }

    #[test]
    fn test_exports_become_props() {
        let info = transform(Some("export let name = 'x', age;"), &CompileOptions::default(), false).unwrap();
        assert_eq!(info.props, vec!["name", "age"]);
        let body: Vec<_> = info.root_level.iter().map(|i| i.code.as_str()).collect();
        assert!(body.contains(&"let {name = 'x'} = $props;"));
        assert!(body.contains(&"let {age} = $props;"));
        assert!(body.iter().any(|l| l.contains("$runtime.completeProps($component, () => {\n({name,age} = $props);")));
        assert!(body.contains(&"}, {name: () => name,age: () => age});"));
        assert_eq!(body.last(), Some(&"$$runtime();"));
    }

    #[test]
    fn test_reactive_statements() {
        let info = transform(
            Some("let a = 1, b = 2;\n$: sum = a + b;\n$: a, (v) => log(v);\n$: a, b, (x, y) => log(x, y);\n$: a, handler;"),
            &CompileOptions::default(),
            false,
        )
        .unwrap();
        assert_eq!(
            info.watchers[0],
            "$watch($cd, () => (a + b), ($$value) => {sum = $$value;});"
        );
        assert_eq!(info.watchers[1], "$watch($cd, () => (a), (v) => log(v));");
        assert!(info.watchers[2].starts_with("$watch($cd, () => [a, b], ($args) => { ((x, y) => log(x, y)).apply(null, $args); }"));
        assert!(info.watchers[2].contains("$runtime.$$compareArray"));
        assert_eq!(info.watchers[3], "$watch($cd, () => (a), (v) => { handler(v); });");
        assert!(info.root_level.iter().any(|i| i.code == "var sum;"));
    }

    #[test]
    fn test_reactive_statement_errors() {
        let opts = CompileOptions::default();
        assert!(transform(Some("$: 42;"), &opts, false).is_err());
        assert!(transform(Some("$: a += 1;"), &opts, false).is_err());
        assert!(transform(Some("$: 1, handler;"), &opts, false).is_err());

        let err = transform(Some("let a;\n$: 5;"), &opts, false).unwrap_err();
        assert_eq!(err.details.as_deref(), Some("$: 5;"));
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_syntax_error_located() {
        let err = transform(Some("let a;\nlet = ;"), &CompileOptions::default(), false).unwrap_err();
        assert_eq!(err.code, crate::error::E_SCRIPT);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_imports_hoisted() {
        let info = transform(
            Some("import Child from './Child.html';\nimport { store } from './store.js';"),
            &CompileOptions::default(),
            false,
        )
        .unwrap();
        assert_eq!(info.imports, vec!["Child"]);
        assert_eq!(info.imported_names, vec!["Child", "store"]);
        assert_eq!(info.import_code.len(), 2);
        assert!(info.root_level.iter().any(|i| i.code == "$runtime.autoSubscribe($component, store);"));
    }

    #[test]
    fn test_shake_and_build() {
        let mut info = transform(Some("let x = 1;"), &CompileOptions::default(), false).unwrap();
        info.shake("let x = 1;");
        assert!(info.root_level.iter().all(|i| i.name.is_none()));
        info.build(&CompileOptions::named("Counter")).unwrap();
        assert!(info.code.contains("export default function Counter($element, $option = {})"));
        assert!(info.code.contains("$$runtimeHeader()"));
        assert!(info.code.contains("$$runtime()"));
    }
}
