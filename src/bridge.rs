//! Node bindings.

use napi_derive::napi;
use std::path::Path;

use crate::config::CompileOptions;
use crate::discovery::compile_dir;
use crate::finalize::compile;

fn options_from_json(options_json: Option<String>) -> napi::Result<CompileOptions> {
    match options_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| napi::Error::from_reason(format!("Invalid options: {}", e))),
        None => Ok(CompileOptions::default()),
    }
}

/// Compiles one component; errors carry the rendered report.
#[napi]
pub fn compile_native(source: String, options_json: Option<String>) -> napi::Result<String> {
    let options = options_from_json(options_json)?;
    compile(&source, &options).map_err(|e| napi::Error::from_reason(e.report()))
}

#[napi]
pub fn compile_dir_native(dir: String, options_json: Option<String>) -> napi::Result<serde_json::Value> {
    let options = options_from_json(options_json)?;
    let results: Vec<serde_json::Value> = compile_dir(Path::new(&dir), &options)
        .into_iter()
        .map(|file| match file.result {
            Ok(code) => serde_json::json!({
                "path": file.path.display().to_string(),
                "name": file.name,
                "code": code,
            }),
            Err(e) => serde_json::json!({
                "path": file.path.display().to_string(),
                "name": file.name,
                "error": e,
            }),
        })
        .collect();
    Ok(serde_json::Value::Array(results))
}
