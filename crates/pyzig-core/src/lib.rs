//! # Pyzig Core - Compilation Engine
//!
//! Core engine for the Pyzig ahead-of-time Python-to-Zig compiler.
//!
//! ## Overview
//!
//! This crate lowers a typed subset of Python into Zig source text that
//! links against a reference-counted runtime, then drives the external `zig`
//! toolchain to produce a native executable.
//!
//! ## Example
//!
//! ```rust
//! use pyzig_core::ZigPipeline;
//!
//! let pipeline = ZigPipeline::new();
//! let python = "x = 2 + 3\nprint(x)\n";
//!
//! match pipeline.transpile(python) {
//!     Ok(zig_code) => println!("Generated:\n{}", zig_code),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```
//!
//! ## Architecture
//!
//! The pipeline consists of several stages:
//!
//! 1. **Parsing** ([`parser`]) - Parse Python source and load imported
//!    modules transitively
//! 2. **Analysis** ([`analysis`]) - Runtime-need detection, declaration
//!    collection, reassignment detection and function signatures
//! 3. **Code Generation** ([`codegen`]) - Lower the AST into Zig text with
//!    reference-count operations and error propagation
//! 4. **Method Dispatch** ([`method_registry`]) - Map Python method names to
//!    runtime call shapes
//! 5. **Runtime Inlining** ([`inliner`]) - Splice the runtime into one
//!    self-contained translation unit
//! 6. **Toolchain** ([`toolchain`]) - Invoke `zig build-exe` and relocate
//!    the artifact
//! 7. **Caching** ([`cache`]) - Reuse binaries while the source and the
//!    compiler are unchanged
//!
//! ## Key Types
//!
//! - [`ZigPipeline`] - Main entry point for compilation
//! - [`ZigCodeGenerator`] - The code generator itself
//! - [`CompileError`] - Typed error surface

pub mod analysis;
pub mod cache;
pub mod codegen;
pub mod error;
pub mod inliner;
pub mod method_registry;
pub mod parser;
pub mod toolchain;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use cache::BuildCache;

pub use codegen::{generate_code, ZigCodeGenerator};
pub use error::{CompileError, CompileResult, ErrorKind};
pub use parser::{load_all_modules, parse_file, parse_source, ParsedModule};

/// The main compilation pipeline.
///
/// Coordinates parsing, analysis, code generation, runtime inlining, the
/// external toolchain and the build cache. Construction reads the
/// environment (`PYZIG_CACHE`, `PYZIG_RELEASE`); both switches can be
/// overridden with the builder methods.
///
/// # Examples
///
/// ```rust
/// use pyzig_core::ZigPipeline;
///
/// let pipeline = ZigPipeline::new().with_cache(false);
/// let zig = pipeline.transpile("x = 1\nprint(x)\n").unwrap();
/// assert!(zig.contains("pub fn main()"));
/// ```
pub struct ZigPipeline {
    cache: BuildCache,
    release: bool,
}

impl Default for ZigPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ZigPipeline {
    pub fn new() -> Self {
        Self {
            cache: BuildCache::from_env(),
            release: toolchain::release_from_env(),
        }
    }

    /// Enable or disable the build cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        if !enabled {
            self.cache = BuildCache::disabled();
        }
        self
    }

    /// Select the release optimization mode.
    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    /// Generate Zig source for a Python snippet without touching the
    /// filesystem. Imports are not resolved.
    pub fn transpile(&self, source: &str) -> Result<String> {
        let parsed = parser::parse_source(source, "<memory>")?;
        let modules = indexmap::IndexMap::new();
        Ok(generate_code(&parsed, &modules)?)
    }

    /// Generate Zig source for a Python file, resolving its imports from the
    /// file's directory.
    pub fn generate_file(&self, source: &Path) -> Result<String> {
        let parsed = parser::parse_file(source)?;
        let modules = parser::load_all_modules(&parsed)?;
        Ok(generate_code(&parsed, &modules)?)
    }

    /// Compile a Python source file to a native binary.
    ///
    /// With no explicit output path the binary lands next to the source,
    /// named after the file's stem. A valid cache entry is copied instead of
    /// re-running the pipeline; a fresh build is stored back into the cache.
    pub fn compile_file(&self, source: &Path, output: Option<&Path>) -> Result<PathBuf> {
        let source = std::path::absolute(source).map_err(CompileError::from)?;
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => default_output_path(&source),
        };

        if let Some(entry) = self.cache.lookup(&source)? {
            self.cache.fetch(&entry, &output)?;
            return Ok(output);
        }

        let zig_code = self.generate_file(&source)?;
        let unit = inliner::inline_runtime(&zig_code)?;
        let binary = toolchain::compile_zig(&unit, &output, self.release)?;
        self.cache.store(&source, &binary)?;
        info!(source = %source.display(), binary = %binary.display(), "compiled");
        Ok(binary)
    }
}

/// Default binary location: alongside the source, without the extension.
pub fn default_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a.out".to_string());
    match source.parent() {
        Some(parent) => parent.join(stem),
        None => PathBuf::from(stem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transpile(source: &str) -> String {
        ZigPipeline::new()
            .with_cache(false)
            .transpile(source)
            .expect("transpilation should succeed")
    }

    #[test]
    fn test_pure_numeric_program_has_no_runtime() {
        let zig = transpile("x = 2 + 3\nprint(x)\n");
        assert!(zig.contains("pub fn main() void {"));
        assert!(!zig.contains("@import(\"runtime\")"));
        assert!(zig.contains("const x = 2 + 3;"));
        assert!(zig.contains("std.debug.print(\"{}\\n\", .{x});"));
    }

    #[test]
    fn test_string_program_links_runtime() {
        let zig = transpile("a = \"hello\"\nprint(a)\n");
        assert!(zig.contains("const runtime = @import(\"runtime\");"));
        assert!(zig.contains("runtime.PyString.create(allocator, \"hello\")"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let source = "a = \"hello\"\nb = \" \"\nc = \"world\"\nprint(a + b + c)\nxs = [1, 2, 3]\nprint(xs[1])\n";
        let first = transpile(source);
        let second = transpile(source);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unsupported_construct_is_rejected_by_name() {
        let err = ZigPipeline::new()
            .with_cache(false)
            .transpile("with open(\"f\") as f:\n    pass\n")
            .unwrap_err();
        assert!(err.to_string().contains("not implemented: with statement"));
    }

    #[test]
    fn test_lambda_is_rejected() {
        let err = ZigPipeline::new()
            .with_cache(false)
            .transpile("f = lambda x: x\n")
            .unwrap_err();
        assert!(err.to_string().contains("not implemented"));
        assert!(err.to_string().contains("lambda"));
    }

    #[test]
    fn test_function_definition_shape() {
        let zig = transpile("def add(a: int, b: int) -> int:\n    return a + b\n");
        assert!(zig.contains("fn add(a: i64, b: i64) i64 {"));
        assert!(zig.contains("return a + b;"));
    }

    #[test]
    fn test_dynamic_function_threads_allocator_and_error() {
        let zig = transpile(
            "def greet(name: str) -> str:\n    return \"Hello, \" + name\nprint(greet(\"Bob\"))\n",
        );
        assert!(zig.contains("fn greet(allocator: std.mem.Allocator, name: *runtime.PyObject) !*runtime.PyObject {"));
    }

    #[test]
    fn test_default_output_path_is_next_to_source() {
        let path = default_output_path(Path::new("/srv/app/fib.py"));
        assert_eq!(path, PathBuf::from("/srv/app/fib"));
    }
}
