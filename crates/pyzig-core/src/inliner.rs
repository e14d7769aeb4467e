//! Runtime inlining.
//!
//! The generated module imports the runtime as `@import("runtime")`. Before
//! the toolchain runs, the runtime source and its submodules (boxed integer,
//! list, tuple, string, dict) are spliced into the generated output: cross
//! imports and re-export lines are stripped, `runtime.`-qualified prefixes
//! are removed, and everything is concatenated runtime-first into a single
//! self-contained translation unit.

use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::{CompileError, CompileResult, ErrorKind};

const RUNTIME_ZIG: &str = include_str!("../runtime/runtime.zig");
const PYINT_ZIG: &str = include_str!("../runtime/pyint.zig");
const PYLIST_ZIG: &str = include_str!("../runtime/pylist.zig");
const PYTUPLE_ZIG: &str = include_str!("../runtime/pytuple.zig");
const PYSTRING_ZIG: &str = include_str!("../runtime/pystring.zig");
const PYDICT_ZIG: &str = include_str!("../runtime/pydict.zig");

/// Submodule order matters: later modules may reference declarations from
/// earlier ones once prefixes are stripped.
const SUBMODULES: [&str; 5] = ["pyint", "pylist", "pytuple", "pystring", "pydict"];

/// Environment variable pointing at an on-disk runtime source directory
/// (development layouts); the embedded copies are used otherwise.
pub const RUNTIME_DIR_ENV: &str = "PYZIG_RUNTIME_DIR";

fn runtime_source(name: &str) -> CompileResult<String> {
    if let Ok(dir) = env::var(RUNTIME_DIR_ENV) {
        let path = PathBuf::from(dir).join(format!("{name}.zig"));
        if !path.exists() {
            return Err(CompileError::new(ErrorKind::Internal(format!(
                "runtime library not found at {}",
                path.display()
            ))));
        }
        return Ok(fs::read_to_string(path)?);
    }
    Ok(match name {
        "runtime" => RUNTIME_ZIG,
        "pyint" => PYINT_ZIG,
        "pylist" => PYLIST_ZIG,
        "pytuple" => PYTUPLE_ZIG,
        "pystring" => PYSTRING_ZIG,
        "pydict" => PYDICT_ZIG,
        other => {
            return Err(CompileError::new(ErrorKind::Internal(format!(
                "unknown runtime module '{other}'"
            ))))
        }
    }
    .to_string())
}

/// Remove `runtime.` and submodule qualification from a line; inside the
/// combined translation unit every declaration is top-level.
fn strip_qualifiers(line: &str) -> String {
    let mut out = line.replace("runtime.", "");
    for name in SUBMODULES {
        out = out.replace(&format!("{name}."), "");
    }
    out
}

/// Prepare a runtime submodule for splicing: drop its `std` import, its
/// cross-imports and any aliases that would become self-referential once the
/// qualifiers are gone.
fn strip_submodule(source: &str) -> String {
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.contains("@import(") {
            continue;
        }
        if trimmed.starts_with("const ") && trimmed.contains("= runtime.") {
            continue;
        }
        lines.push(strip_qualifiers(line));
    }
    lines.join("\n")
}

/// Remove one submodule's import and re-export lines from the runtime body.
fn remove_submodule_wiring(runtime_code: &str, name: &str) -> String {
    let import_marker = format!("@import(\"{name}.zig\")");
    let reexport_marker = format!("= {name}.");

    let mut lines: Vec<String> = Vec::new();
    let mut skip_next_blank = false;
    for line in runtime_code.lines() {
        if line.contains(&import_marker) {
            continue;
        }
        if line.contains(&reexport_marker) {
            // Drop the re-export and any doc comment directly above it
            if lines
                .last()
                .is_some_and(|prev| prev.trim_start().starts_with("//"))
            {
                lines.pop();
            }
            skip_next_blank = true;
            continue;
        }
        if skip_next_blank && line.trim().is_empty() {
            skip_next_blank = false;
            continue;
        }
        skip_next_blank = false;
        lines.push(line.to_string());
    }
    lines.join("\n")
}

/// Splice the runtime into generated Zig code, producing one self-contained
/// translation unit. Code that does not import the runtime passes through
/// unchanged.
pub fn inline_runtime(zig_code: &str) -> CompileResult<String> {
    if !zig_code.contains("@import(\"runtime\")") {
        return Ok(zig_code.to_string());
    }

    let mut runtime_code = runtime_source("runtime")?;
    for name in SUBMODULES {
        if !runtime_code.contains(&format!("@import(\"{name}.zig\")")) {
            continue;
        }
        let submodule = strip_submodule(&runtime_source(name)?);
        runtime_code = remove_submodule_wiring(&runtime_code, name);
        runtime_code.push_str("\n\n");
        runtime_code.push_str(&submodule);
    }

    // Strip the generated module's own imports; the runtime already carries
    // them.
    let mut generated: Vec<String> = Vec::new();
    for line in zig_code.lines() {
        if line.contains("@import(\"runtime\")") {
            continue;
        }
        if generated.is_empty() && line.trim().starts_with("const std = @import(\"std\")") {
            continue;
        }
        generated.push(line.replace("runtime.", ""));
    }

    Ok(format!("{}\n\n{}", runtime_code, generated.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_without_runtime_import_passes_through() {
        let code = "const std = @import(\"std\");\npub fn main() void {}\n";
        assert_eq!(inline_runtime(code).unwrap(), code);
    }

    #[test]
    fn test_inlined_unit_has_no_imports_left() {
        let code = "const std = @import(\"std\");\nconst runtime = @import(\"runtime\");\n\npub fn main() !void {\n    _ = try runtime.PyList.create(allocator);\n}";
        let unit = inline_runtime(code).unwrap();
        assert!(!unit.contains("@import(\"runtime\")"));
        for name in SUBMODULES {
            assert!(
                !unit.contains(&format!("@import(\"{name}.zig\")")),
                "submodule import for {name} survived inlining"
            );
        }
        // Exactly one std import from the runtime header remains
        assert_eq!(unit.matches("@import(\"std\")").count(), 1);
    }

    #[test]
    fn test_runtime_prefix_is_stripped_from_generated_code() {
        let code = "const runtime = @import(\"runtime\");\npub fn main() !void {\n    _ = try runtime.PyString.create(allocator, \"x\");\n}";
        let unit = inline_runtime(code).unwrap();
        assert!(unit.contains("_ = try PyString.create(allocator, \"x\");"));
        assert!(!unit.contains("runtime.PyString"));
    }

    #[test]
    fn test_runtime_body_lands_before_generated_code() {
        let code = "const runtime = @import(\"runtime\");\npub fn main() !void {}";
        let unit = inline_runtime(code).unwrap();
        let runtime_pos = unit.find("pub const PyObject").expect("runtime spliced");
        let main_pos = unit.find("pub fn main").expect("generated code kept");
        assert!(runtime_pos < main_pos);
    }

    #[test]
    fn test_submodule_structs_are_spliced_in() {
        let code = "const runtime = @import(\"runtime\");\npub fn main() !void {}";
        let unit = inline_runtime(code).unwrap();
        for marker in [
            "pub const PyInt = struct",
            "pub const PyList = struct",
            "pub const PyTuple = struct",
            "pub const PyString = struct",
            "pub const PyDict = struct",
        ] {
            assert!(unit.contains(marker), "missing {marker}");
        }
    }
}
