//! Whole-pipeline compile checks: error taxonomy, warnings, and the
//! shape of generated code for the less common constructs.

use std::sync::{Arc, Mutex};

use crate::config::CompileOptions;
use crate::error::{Warning, E_BIND, E_EXPR, E_PARSE, E_SCRIPT};
use crate::finalize::compile;

fn compile_ok(source: &str) -> String {
    compile(source, &CompileOptions::default()).unwrap()
}

fn collecting_options() -> (CompileOptions, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = CompileOptions {
        warning: Arc::new(move |w: &Warning| sink.lock().unwrap().push(w.message.clone())),
        ..CompileOptions::default()
    };
    (options, seen)
}

#[test]
fn test_parse_errors_carry_excerpt() {
    let err = compile("<div><span></div>", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_PARSE);
    assert!(err.message.starts_with("Wrong close-tag"));
    assert!(err.details.is_some());

    let err = compile("<section>", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_PARSE);
    assert_eq!(err.message, "File ends to early");
    assert_eq!(err.details.as_deref(), Some("<section>"));
}

#[test]
fn test_binding_errors() {
    let err = compile("<input :foo={x}/><script>let x;</script>", &CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.code, E_BIND);
    assert!(err.report().contains("<input :foo={x}/>"));
}

#[test]
fn test_expression_error_located_in_component() {
    let err = compile("<p>ok</p>\n<b>x {a</b>", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_EXPR);
    assert_eq!(err.details.as_deref(), Some("x {a"));
    assert_eq!((err.line, err.column), (2, 6));
}

#[test]
fn test_reactive_error_located_in_component() {
    let err = compile("<script>\nlet a;\n$: 5;\n</script>", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_SCRIPT);
    assert_eq!(err.details.as_deref(), Some("$: 5;"));
    assert_eq!((err.line, err.column), (3, 1));
}

#[test]
fn test_unknown_handler_warns() {
    let (options, seen) = collecting_options();
    let out = compile("<button @click={missing}>x</button><script>let a;</script>", &options).unwrap();
    assert!(out.contains("missing"));
    assert_eq!(seen.lock().unwrap().as_slice(), ["No name: missing"]);
}

#[test]
fn test_known_handler_is_silent() {
    let (options, seen) = collecting_options();
    compile(
        "<button @click={inc}>+</button><script>let n = 0; function inc() { n++; }</script>",
        &options,
    )
    .unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_reactive_statement_and_assignment_instrumented() {
    let out = compile_ok(
        "<p>{double}</p><script>let n = 1; let double; $: double = n * 2; function inc() { n += 1; }</script>",
    );
    assert!(out.contains("$$apply"));
    assert!(out.contains("$runtime.bindText($cd, el0, () => (double));"));
}

#[test]
fn test_await_block_compiles() {
    let out = compile_ok(
        "{#await load()}<i>wait</i>{:then value}<b>{value}</b>{:catch e}<u>{e}</u>{/await}<script>function load() {}</script>",
    );
    assert!(out.contains("$runtime.$$awaitBlock($cd, "));
    assert!(out.contains("() => load(), $$apply"));
    assert!(out.contains("const tpl_main = $$htmlToFragment(`<i>wait</i>`);"));
    assert!(out.contains("tpl_main, tpl_then, tpl_catch);"));
}

#[test]
fn test_each_inside_parent_uses_parent_directly() {
    let out = compile_ok("<ul>{#each rows as row}<li>{row}</li>{/each}</ul><script>let rows = [];</script>");
    assert!(out.contains("const rootTemplate = $$htmlToFragment(`<ul></ul>`);"));
    assert!(out.contains(", 1, () => (rows), getKey, itemTemplate, bind);"));
    assert!(out.contains("let getKey = $runtime.noop;"));
}

#[test]
fn test_nested_component_and_slot() {
    let out = compile_ok(
        "<Card title=\"Hi\">{#slot:head}Top{/slot}</Card><script>import Card from './Card.html';</script>",
    );
    assert!(out.contains("./Card.html"));
    assert!(out.contains("props.title = `Hi`;"));
    assert!(out.contains("slots.head = function($label, $component) {"));
}

#[test]
fn test_default_export_toggle() {
    let options = CompileOptions {
        export_default: false,
        ..CompileOptions::named("Panel")
    };
    let out = compile("<p>x</p>", &options).unwrap();
    assert!(out.contains("function Panel($element, $option = {})"));
    assert!(!out.contains("export default"));
}

#[test]
fn test_escaped_class_selector_scopes_markup() {
    let out = compile_ok("<div class=\"a:b\">x</div><style>.a\\:b{c:d}</style>");
    let at = out.find(".a\\\\:b.").expect("scoped rule") + ".a\\\\:b.".len();
    let token = &out[at..at + 7];
    assert!(token.starts_with('m'));
    assert!(
        out.contains(&format!("class=\"a:b {}\"", token))
            || out.contains(&format!("class=\"{} a:b\"", token))
    );
}
