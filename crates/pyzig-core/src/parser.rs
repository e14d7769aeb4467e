//! Python source parsing and module loading.
//!
//! Wraps `rustpython-parser` to produce [`ParsedModule`] values and resolves
//! `import m` statements against the main module's directory, transitively.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rustpython_ast::{self as ast};
use rustpython_parser::{parse, Mode};
use tracing::debug;

use crate::error::{CompileError, CompileResult, ErrorKind};

/// A parsed Python module: AST root, original source, absolute filename and
/// the ordered list of imported module names (simple identifiers only).
///
/// Created by [`parse_file`]; immutable thereafter.
#[derive(Debug)]
pub struct ParsedModule {
    pub ast: ast::ModModule,
    pub source: String,
    pub filename: PathBuf,
    pub imports: Vec<String>,
}

/// Parse a Python file into a [`ParsedModule`].
pub fn parse_file(path: impl AsRef<Path>) -> CompileResult<ParsedModule> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)?;
    parse_source(&source, path)
}

/// Parse Python source text, recording `path` as its filename.
pub fn parse_source(source: &str, path: impl AsRef<Path>) -> CompileResult<ParsedModule> {
    let path = path.as_ref();
    let module = match parse(source, Mode::Module, &path.to_string_lossy()) {
        Ok(ast::Mod::Module(m)) => m,
        Ok(_) => {
            return Err(CompileError::new(ErrorKind::Internal(
                "expected a module-level parse".to_string(),
            )))
        }
        Err(e) => {
            return Err(CompileError::new(ErrorKind::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }))
        }
    };

    let mut imports = Vec::new();
    collect_imports(&module.body, &mut imports);
    debug!(file = %path.display(), imports = imports.len(), "parsed module");

    Ok(ParsedModule {
        ast: module,
        source: source.to_string(),
        filename: path.to_path_buf(),
        imports,
    })
}

/// Collect `import m` module names from a statement list, recursing into
/// nested bodies. Duplicates are kept out; order of first appearance wins.
fn collect_imports(body: &[ast::Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match stmt {
            ast::Stmt::Import(import) => {
                for alias in &import.names {
                    let name = alias.name.to_string();
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            ast::Stmt::FunctionDef(f) => collect_imports(&f.body, out),
            ast::Stmt::ClassDef(c) => collect_imports(&c.body, out),
            ast::Stmt::If(i) => {
                collect_imports(&i.body, out);
                collect_imports(&i.orelse, out);
            }
            ast::Stmt::While(w) => collect_imports(&w.body, out),
            ast::Stmt::For(f) => collect_imports(&f.body, out),
            ast::Stmt::Try(t) => {
                collect_imports(&t.body, out);
                for handler in &t.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    collect_imports(&h.body, out);
                }
                collect_imports(&t.orelse, out);
                collect_imports(&t.finalbody, out);
            }
            _ => {}
        }
    }
}

/// Load and parse a module by name from `search_dir`.
///
/// Fails with [`ErrorKind::ModuleNotFound`] naming the searched path when the
/// module file is absent.
pub fn load_module(module_name: &str, search_dir: &Path) -> CompileResult<ParsedModule> {
    let module_file = search_dir.join(format!("{module_name}.py"));
    if !module_file.exists() {
        return Err(CompileError::new(ErrorKind::ModuleNotFound {
            name: module_name.to_string(),
            searched: module_file,
        }));
    }
    parse_file(&module_file)
}

/// Load every module imported by `main_module`, transitively, breadth-first.
///
/// Imports are resolved from the main module's directory and de-duplicated by
/// name. The returned map preserves discovery order so downstream generation
/// is deterministic.
pub fn load_all_modules(main_module: &ParsedModule) -> CompileResult<IndexMap<String, ParsedModule>> {
    let search_dir = main_module
        .filename
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut loaded: IndexMap<String, ParsedModule> = IndexMap::new();
    let mut queue: Vec<String> = main_module.imports.clone();

    while !queue.is_empty() {
        let module_name = queue.remove(0);
        if loaded.contains_key(&module_name) {
            continue;
        }

        let module = load_module(&module_name, &search_dir)?;
        for imported in &module.imports {
            if !loaded.contains_key(imported) && !queue.contains(imported) {
                queue.push(imported.clone());
            }
        }
        loaded.insert(module_name, module);
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_assignment() {
        let parsed = parse_source("x = 1\n", "test.py").unwrap();
        assert_eq!(parsed.ast.body.len(), 1);
        assert!(parsed.imports.is_empty());
    }

    #[test]
    fn test_parse_collects_imports_in_order() {
        let parsed = parse_source("import mymath\nimport strutils\nimport mymath\n", "test.py")
            .unwrap();
        assert_eq!(parsed.imports, vec!["mymath", "strutils"]);
    }

    #[test]
    fn test_parse_collects_nested_imports() {
        let src = "def f():\n    import helpers\n    return 1\n";
        let parsed = parse_source(src, "test.py").unwrap();
        assert_eq!(parsed.imports, vec!["helpers"]);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_source("def broken(:\n", "bad.py").unwrap_err();
        assert!(err.to_string().contains("bad.py"));
    }

    #[test]
    fn test_load_module_missing_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_module("nosuch", dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nosuch"));
        assert!(msg.contains("nosuch.py"));
    }

    #[test]
    fn test_load_all_modules_transitive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "import a\nx = 1\n").unwrap();
        fs::write(dir.path().join("a.py"), "import b\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();

        let main = parse_file(dir.path().join("main.py")).unwrap();
        let modules = load_all_modules(&main).unwrap();
        let names: Vec<_> = modules.keys().cloned().collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
