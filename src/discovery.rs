//! Batch compilation of a component directory.
//!
//! Recursively scans a directory for component files and compiles them in
//! parallel. Each component takes its name from the file stem.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CompileOptions;
use crate::error::{CompilerError, Result};
use crate::finalize::compile;

pub const COMPONENT_EXTENSIONS: &[&str] = &["html", "xht"];

#[derive(Debug)]
pub struct CompiledFile {
    pub path: PathBuf,
    pub name: String,
    pub result: Result<String>,
}

/// Recursively find all component files in a directory
pub fn find_component_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| COMPONENT_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    files
}

/// `my-widget.html` → `my_widget`
pub fn component_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("widget");
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn compile_file(path: &Path, options: &CompileOptions) -> CompiledFile {
    let name = component_name(path);
    let result = fs::read_to_string(path)
        .map_err(|e| CompilerError::generation(format!("Failed to read file: {}", e)))
        .and_then(|source| {
            let options = CompileOptions {
                name: name.clone(),
                ..options.clone()
            };
            compile(&source, &options)
        });
    if let Err(e) = &result {
        tracing::warn!(path = %path.display(), "{}", e.report());
    }
    CompiledFile {
        path: path.to_path_buf(),
        name,
        result,
    }
}

/// Compiles every component under `dir`; one failure does not stop the others.
pub fn compile_dir(dir: &Path, options: &CompileOptions) -> Vec<CompiledFile> {
    let files = find_component_files(dir);
    tracing::debug!(dir = %dir.display(), files = files.len(), "compiling components");
    files
        .par_iter()
        .map(|path| compile_file(path, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("malina-discovery-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("nested")).unwrap();
        dir
    }

    #[test]
    fn test_component_name() {
        assert_eq!(component_name(Path::new("a/my-widget.html")), "my_widget");
        assert_eq!(component_name(Path::new("1st.xht")), "_1st");
        assert_eq!(component_name(Path::new("App.html")), "App");
    }

    #[test]
    fn test_compile_dir() {
        let dir = scratch_dir("batch");
        fs::write(dir.join("App.html"), "<div>{name}</div><script>export let name;</script>").unwrap();
        fs::write(dir.join("nested/Broken.xht"), "<div>").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let results = compile_dir(&dir, &CompileOptions::default());
        assert_eq!(results.len(), 2);

        let app = results.iter().find(|r| r.name == "App").unwrap();
        let code = app.result.as_ref().unwrap();
        assert!(code.contains("export default function App($element, $option = {})"));

        let broken = results.iter().find(|r| r.name == "Broken").unwrap();
        assert!(broken.result.is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
