//! # Malina Compiler
//!
//! Compiles single-file components (markup, one `<script>`, any number of
//! `<style>` blocks) into a JavaScript module, and ships the reactive
//! runtime those modules drive.
//!
//! ## Pipeline
//!
//! 1. **Parse**: markup text → [`ast::Root`] (`parse`), whitespace compaction (`compact`).
//! 2. **Script**: the component script is analysed and instrumented so
//!    assignments to root variables schedule a digest (`script`, `visitor`).
//! 3. **Style**: rules are scoped with generated class tokens and matched
//!    against the static markup (`css`, `selector`, `style`).
//! 4. **Generate**: every node becomes template HTML plus binding code
//!    (`codegen`, `blocks`, `component`, `slots`).
//! 5. **Assemble**: runtime body, imports and exports are stitched into the
//!    final module (`finalize`). Plugins may observe or edit each phase.
//!
//! ## Runtime
//!
//! [`runtime`] is a Rust rendition of the dirty-checking runtime: change
//! detectors, the digest loop, the apply scheduler, an arena DOM and the
//! block drivers the generated code calls.

pub mod ast;
pub mod blocks;
pub mod codegen;
pub mod compact;
pub mod component;
pub mod config;
pub mod css;
pub mod discovery;
pub mod error;
pub mod expression;
pub mod finalize;
pub mod interpolate;
pub mod parse;
pub mod runtime;
pub mod script;
pub mod selector;
pub mod slots;
pub mod style;
pub mod visitor;

#[cfg(feature = "napi")]
mod bridge;

#[cfg(feature = "napi")]
pub use bridge::{compile_dir_native, compile_native};

pub use config::{CompileOptions, Hook, Plugin};
pub use discovery::{compile_dir, CompiledFile};
pub use error::{CompilerError, Result, Warning};
pub use finalize::{compile, CompileContext};


#[cfg(test)]
mod pipeline_tests;
