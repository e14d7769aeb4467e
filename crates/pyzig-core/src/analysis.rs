//! Pre-generation analysis passes.
//!
//! Three full-tree passes feed the generator: runtime-need detection,
//! declaration collection and reassignment detection. Function signatures are
//! also pre-computed here so call sites can decide whether to thread the
//! allocator and wrap results in error propagation.

use std::collections::HashSet;

use rustpython_ast::{self as ast};
use serde::{Deserialize, Serialize};

/// Pre-computed calling information for a user-defined function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub needs_allocator: bool,
    pub param_count: usize,
    pub returns_pyobject: bool,
    /// The emitted function carries an error-union return, so call sites
    /// must unwrap it.
    pub returns_error: bool,
    /// Full Zig return type, filled in when the definition is emitted.
    pub return_type: String,
}

/// Aggregate result of the analysis passes over one module body.
#[derive(Debug, Default, Clone)]
pub struct ModuleAnalysis {
    /// The program touches dynamic objects and must link the runtime.
    pub needs_runtime: bool,
    /// Transitively implied by `needs_runtime`.
    pub needs_allocator: bool,
    /// Every bound name (assignment targets and loop variables), scope-blind.
    pub declared_vars: HashSet<String>,
    /// Names assigned more than once within some function scope, or targeted
    /// by augmented assignment. Emitted as `var` instead of `const`.
    pub reassigned_vars: HashSet<String>,
}

/// Run all passes over a module body.
pub fn analyze_module(body: &[ast::Stmt], imported_module_names: &[String]) -> ModuleAnalysis {
    let mut analysis = ModuleAnalysis::default();

    for stmt in body {
        detect_runtime_needs(stmt, &mut analysis);
        collect_declarations(stmt, &mut analysis.declared_vars);
    }

    let mut seen = HashSet::new();
    for stmt in body {
        detect_reassignments(stmt, &mut seen, &mut analysis.reassigned_vars);
    }

    // Module function calls never need the runtime by themselves, so the
    // detection above may be refined by the caller; the flag here is the
    // conservative union over the module body.
    let _ = imported_module_names;
    analysis
}

/// Merge reassignment information from an imported module's body.
pub fn detect_module_reassignments(body: &[ast::Stmt], out: &mut HashSet<String>) {
    let mut seen = HashSet::new();
    for stmt in body {
        detect_reassignments(stmt, &mut seen, out);
    }
}

/// Detect whether a node requires the dynamic-object runtime.
///
/// String literals, collection literals, string concatenation and container
/// literals in call arguments all set the flag, which transitively sets the
/// allocator-required flag.
fn detect_runtime_needs(stmt: &ast::Stmt, analysis: &mut ModuleAnalysis) {
    match stmt {
        ast::Stmt::Assign(a) => {
            for target in &a.targets {
                detect_expr_runtime_needs(target, analysis);
            }
            detect_expr_runtime_needs(&a.value, analysis);
        }
        ast::Stmt::AugAssign(a) => detect_expr_runtime_needs(&a.value, analysis),
        ast::Stmt::Expr(e) => detect_expr_runtime_needs(&e.value, analysis),
        ast::Stmt::FunctionDef(f) => {
            for s in &f.body {
                detect_runtime_needs(s, analysis);
            }
        }
        ast::Stmt::ClassDef(c) => {
            for s in &c.body {
                detect_runtime_needs(s, analysis);
            }
        }
        ast::Stmt::Return(r) => {
            if let Some(value) = &r.value {
                detect_expr_runtime_needs(value, analysis);
            }
        }
        ast::Stmt::If(i) => {
            detect_expr_runtime_needs(&i.test, analysis);
            for s in i.body.iter().chain(&i.orelse) {
                detect_runtime_needs(s, analysis);
            }
        }
        ast::Stmt::While(w) => {
            detect_expr_runtime_needs(&w.test, analysis);
            for s in &w.body {
                detect_runtime_needs(s, analysis);
            }
        }
        ast::Stmt::For(f) => {
            detect_expr_runtime_needs(&f.iter, analysis);
            for s in &f.body {
                detect_runtime_needs(s, analysis);
            }
        }
        ast::Stmt::Try(t) => {
            for s in &t.body {
                detect_runtime_needs(s, analysis);
            }
            for handler in &t.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                for s in &h.body {
                    detect_runtime_needs(s, analysis);
                }
            }
        }
        _ => {}
    }
}

fn detect_expr_runtime_needs(expr: &ast::Expr, analysis: &mut ModuleAnalysis) {
    match expr {
        ast::Expr::Constant(c) => {
            if matches!(c.value, ast::Constant::Str(_)) {
                analysis.needs_runtime = true;
                analysis.needs_allocator = true;
            }
        }
        ast::Expr::List(l) => {
            analysis.needs_runtime = true;
            analysis.needs_allocator = true;
            for elem in &l.elts {
                detect_expr_runtime_needs(elem, analysis);
            }
        }
        ast::Expr::Tuple(t) => {
            analysis.needs_runtime = true;
            analysis.needs_allocator = true;
            for elem in &t.elts {
                detect_expr_runtime_needs(elem, analysis);
            }
        }
        ast::Expr::Dict(d) => {
            analysis.needs_runtime = true;
            analysis.needs_allocator = true;
            for key in d.keys.iter().flatten() {
                detect_expr_runtime_needs(key, analysis);
            }
            for value in &d.values {
                detect_expr_runtime_needs(value, analysis);
            }
        }
        ast::Expr::ListComp(c) => {
            analysis.needs_runtime = true;
            analysis.needs_allocator = true;
            detect_expr_runtime_needs(&c.elt, analysis);
        }
        ast::Expr::BinOp(b) => {
            detect_expr_runtime_needs(&b.left, analysis);
            detect_expr_runtime_needs(&b.right, analysis);
        }
        ast::Expr::Call(c) => {
            for arg in &c.args {
                detect_expr_runtime_needs(arg, analysis);
            }
        }
        _ => {}
    }
}

/// Record every bound name: assignment targets and loop variables.
///
/// Deliberately scope-blind; the generator uses this to decide whether an
/// assignment is an initial binding or a re-binding.
fn collect_declarations(stmt: &ast::Stmt, declared: &mut HashSet<String>) {
    match stmt {
        ast::Stmt::Assign(a) => {
            for target in &a.targets {
                if let ast::Expr::Name(name) = target {
                    declared.insert(name.id.to_string());
                }
            }
        }
        ast::Stmt::FunctionDef(f) => {
            for s in &f.body {
                collect_declarations(s, declared);
            }
        }
        ast::Stmt::If(i) => {
            for s in i.body.iter().chain(&i.orelse) {
                collect_declarations(s, declared);
            }
        }
        ast::Stmt::While(w) => {
            for s in &w.body {
                collect_declarations(s, declared);
            }
        }
        ast::Stmt::For(f) => {
            if let ast::Expr::Name(name) = f.target.as_ref() {
                declared.insert(name.id.to_string());
            }
            for s in &f.body {
                collect_declarations(s, declared);
            }
        }
        ast::Stmt::Try(t) => {
            for s in &t.body {
                collect_declarations(s, declared);
            }
            for handler in &t.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                for s in &h.body {
                    collect_declarations(s, declared);
                }
            }
        }
        _ => {}
    }
}

/// Detect names that are re-bound and therefore need a mutable binding.
///
/// Each function body is its own scope; the module body is a scope of its
/// own. An augmented assignment always marks its target mutable.
fn detect_reassignments(
    stmt: &ast::Stmt,
    seen: &mut HashSet<String>,
    reassigned: &mut HashSet<String>,
) {
    match stmt {
        ast::Stmt::Assign(a) => {
            for target in &a.targets {
                if let ast::Expr::Name(name) = target {
                    let id = name.id.to_string();
                    if !seen.insert(id.clone()) {
                        reassigned.insert(id);
                    }
                }
            }
        }
        ast::Stmt::AugAssign(a) => {
            if let ast::Expr::Name(name) = a.target.as_ref() {
                let id = name.id.to_string();
                seen.insert(id.clone());
                reassigned.insert(id);
            }
        }
        ast::Stmt::FunctionDef(f) => {
            // New scope
            let mut func_seen = HashSet::new();
            for s in &f.body {
                detect_reassignments(s, &mut func_seen, reassigned);
            }
        }
        ast::Stmt::If(i) => {
            for s in i.body.iter().chain(&i.orelse) {
                detect_reassignments(s, seen, reassigned);
            }
        }
        ast::Stmt::While(w) => {
            for s in &w.body {
                detect_reassignments(s, seen, reassigned);
            }
        }
        ast::Stmt::For(f) => {
            for s in &f.body {
                detect_reassignments(s, seen, reassigned);
            }
        }
        ast::Stmt::Try(t) => {
            for s in &t.body {
                detect_reassignments(s, seen, reassigned);
            }
            for handler in &t.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                for s in &h.body {
                    detect_reassignments(s, seen, reassigned);
                }
            }
        }
        _ => {}
    }
}

/// Decide whether a function needs the allocator threaded through.
///
/// True when the body creates or modifies dynamic objects, or when the
/// declared return type is a dynamic type. Merely receiving dynamic
/// parameters does not require the allocator.
pub fn function_needs_allocator(func: &ast::StmtFunctionDef, module_names: &[String]) -> bool {
    for stmt in &func.body {
        if stmt_needs_runtime(stmt, module_names) {
            return true;
        }
    }
    if let Some(returns) = &func.returns {
        if let ast::Expr::Name(name) = returns.as_ref() {
            if matches!(name.id.as_str(), "str" | "list" | "dict") {
                return true;
            }
        }
    }
    false
}

/// Compute the pre-generation signature for a function definition.
pub fn function_signature(func: &ast::StmtFunctionDef, module_names: &[String]) -> FunctionSignature {
    let returns_pyobject = func
        .returns
        .as_deref()
        .and_then(|r| match r {
            ast::Expr::Name(name) => Some(matches!(name.id.as_str(), "str" | "list" | "dict")),
            _ => None,
        })
        .unwrap_or(false);

    let needs_allocator = function_needs_allocator(func, module_names);
    FunctionSignature {
        needs_allocator,
        param_count: func.args.args.len(),
        returns_pyobject,
        returns_error: needs_allocator || function_uses_error_operations(func),
        return_type: String::new(),
    }
}

/// Check whether a statement requires the runtime.
pub fn stmt_needs_runtime(stmt: &ast::Stmt, module_names: &[String]) -> bool {
    match stmt {
        ast::Stmt::Expr(e) => expr_needs_runtime(&e.value, module_names),
        ast::Stmt::Assign(a) => expr_needs_runtime(&a.value, module_names),
        ast::Stmt::AugAssign(a) => expr_needs_runtime(&a.value, module_names),
        ast::Stmt::Return(r) => r
            .value
            .as_deref()
            .is_some_and(|v| expr_needs_runtime(v, module_names)),
        ast::Stmt::If(i) => i
            .body
            .iter()
            .chain(&i.orelse)
            .any(|s| stmt_needs_runtime(s, module_names)),
        ast::Stmt::While(w) => w.body.iter().any(|s| stmt_needs_runtime(s, module_names)),
        ast::Stmt::For(f) => f.body.iter().any(|s| stmt_needs_runtime(s, module_names)),
        ast::Stmt::Try(t) => {
            t.body.iter().any(|s| stmt_needs_runtime(s, module_names))
                || t.handlers.iter().any(|handler| {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    h.body.iter().any(|s| stmt_needs_runtime(s, module_names))
                })
        }
        _ => false,
    }
}

/// Check whether an expression requires the runtime.
pub fn expr_needs_runtime(expr: &ast::Expr, module_names: &[String]) -> bool {
    match expr {
        ast::Expr::Constant(c) => matches!(c.value, ast::Constant::Str(_)),
        ast::Expr::List(_) | ast::Expr::Dict(_) | ast::Expr::Tuple(_) | ast::Expr::ListComp(_) => {
            true
        }
        ast::Expr::BinOp(b) => {
            matches!(b.op, ast::Operator::Add)
                && (expr_needs_runtime(&b.left, module_names)
                    || expr_needs_runtime(&b.right, module_names))
        }
        ast::Expr::Call(c) => {
            if let ast::Expr::Attribute(attr) = c.func.as_ref() {
                // Module-qualified calls do not need the runtime by themselves
                if let ast::Expr::Name(name) = attr.value.as_ref() {
                    if module_names.iter().any(|m| m == name.id.as_str()) {
                        return false;
                    }
                }
                // Method calls on runtime types
                return true;
            }
            c.args.iter().any(|a| expr_needs_runtime(a, module_names))
        }
        _ => false,
    }
}

/// Check whether a function body contains error-returning operations
/// (subscripts or method calls), which force an error-union return.
pub fn function_uses_error_operations(func: &ast::StmtFunctionDef) -> bool {
    func.body.iter().any(stmt_uses_error_operations)
}

pub(crate) fn stmt_uses_error_operations(stmt: &ast::Stmt) -> bool {
    match stmt {
        ast::Stmt::Assign(a) => {
            a.targets.iter().any(expr_uses_error_operations)
                || expr_uses_error_operations(&a.value)
        }
        ast::Stmt::AugAssign(a) => expr_uses_error_operations(&a.value),
        ast::Stmt::Expr(e) => expr_uses_error_operations(&e.value),
        ast::Stmt::Return(r) => r.value.as_deref().is_some_and(expr_uses_error_operations),
        ast::Stmt::If(i) => {
            expr_uses_error_operations(&i.test)
                || i.body
                    .iter()
                    .chain(&i.orelse)
                    .any(stmt_uses_error_operations)
        }
        ast::Stmt::While(w) => {
            expr_uses_error_operations(&w.test) || w.body.iter().any(stmt_uses_error_operations)
        }
        ast::Stmt::For(f) => {
            expr_uses_error_operations(&f.iter) || f.body.iter().any(stmt_uses_error_operations)
        }
        ast::Stmt::Try(t) => {
            t.body.iter().any(stmt_uses_error_operations)
                || t.handlers.iter().any(|handler| {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    h.body.iter().any(stmt_uses_error_operations)
                })
        }
        _ => false,
    }
}

fn expr_uses_error_operations(expr: &ast::Expr) -> bool {
    match expr {
        ast::Expr::Subscript(_) => true,
        ast::Expr::Call(c) => {
            matches!(c.func.as_ref(), ast::Expr::Attribute(_))
                || c.args.iter().any(expr_uses_error_operations)
        }
        ast::Expr::BinOp(b) => {
            expr_uses_error_operations(&b.left) || expr_uses_error_operations(&b.right)
        }
        ast::Expr::Compare(c) => {
            expr_uses_error_operations(&c.left)
                || c.comparators.iter().any(expr_uses_error_operations)
        }
        ast::Expr::UnaryOp(u) => expr_uses_error_operations(&u.operand),
        ast::Expr::BoolOp(b) => b.values.iter().any(expr_uses_error_operations),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn body(src: &str) -> Vec<ast::Stmt> {
        parse_source(src, "test.py").unwrap().ast.body
    }

    #[test]
    fn test_pure_numeric_program_skips_runtime() {
        let stmts = body("x = 2 + 3\nprint(x)\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(!analysis.needs_runtime);
        assert!(!analysis.needs_allocator);
    }

    #[test]
    fn test_string_literal_sets_runtime_flag() {
        let stmts = body("a = \"hello\"\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(analysis.needs_runtime);
        assert!(analysis.needs_allocator);
    }

    #[test]
    fn test_list_literal_in_call_argument_sets_runtime_flag() {
        let stmts = body("print([1, 2, 3])\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(analysis.needs_runtime);
    }

    #[test]
    fn test_single_assignment_is_not_reassigned() {
        let stmts = body("x = 1\ny = 2\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(analysis.reassigned_vars.is_empty());
        assert!(analysis.declared_vars.contains("x"));
        assert!(analysis.declared_vars.contains("y"));
    }

    #[test]
    fn test_double_assignment_marks_mutable() {
        let stmts = body("x = 1\nx = 2\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(analysis.reassigned_vars.contains("x"));
    }

    #[test]
    fn test_augmented_assignment_marks_mutable() {
        let stmts = body("x = 1\nx += 2\n");
        let analysis = analyze_module(&stmts, &[]);
        assert!(analysis.reassigned_vars.contains("x"));
    }

    #[test]
    fn test_function_scopes_are_independent() {
        let src = "def f():\n    x = 1\ndef g():\n    x = 2\n";
        let stmts = body(src);
        let analysis = analyze_module(&stmts, &[]);
        assert!(!analysis.reassigned_vars.contains("x"));
    }

    #[test]
    fn test_function_with_string_return_needs_allocator() {
        let src = "def f() -> str:\n    return make()\n";
        let stmts = body(src);
        if let ast::Stmt::FunctionDef(f) = &stmts[0] {
            assert!(function_needs_allocator(f, &[]));
            let sig = function_signature(f, &[]);
            assert!(sig.returns_pyobject);
        } else {
            panic!("expected function def");
        }
    }

    #[test]
    fn test_numeric_function_needs_no_allocator() {
        let src = "def add(a: int, b: int) -> int:\n    return a + b\n";
        let stmts = body(src);
        if let ast::Stmt::FunctionDef(f) = &stmts[0] {
            assert!(!function_needs_allocator(f, &[]));
            assert!(!function_uses_error_operations(f));
            let sig = function_signature(f, &[]);
            assert_eq!(sig.param_count, 2);
            assert!(!sig.returns_pyobject);
        } else {
            panic!("expected function def");
        }
    }

    #[test]
    fn test_subscript_forces_error_operations() {
        let src = "def f(xs: list) -> int:\n    return xs[0]\n";
        let stmts = body(src);
        if let ast::Stmt::FunctionDef(f) = &stmts[0] {
            assert!(function_uses_error_operations(f));
        } else {
            panic!("expected function def");
        }
    }
}
