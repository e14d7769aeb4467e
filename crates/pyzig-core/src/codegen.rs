//! Zig code generation.
//!
//! [`ZigCodeGenerator`] lowers a parsed Python module into Zig source text,
//! inserting the reference-count operations, error-propagation markers and
//! temporary-lifetime scaffolding the runtime requires. Expression lowering
//! lives in [`expr`], class emission in [`classes`].

pub mod classes;
pub mod expr;
pub mod helpers;

use std::collections::HashSet;

use indexmap::IndexMap;
use rustpython_ast::{self as ast};
use tracing::debug;

use crate::analysis::{
    self, analyze_module, function_signature, stmt_uses_error_operations, FunctionSignature,
};
use crate::error::{CompileError, CompileResult};
use crate::method_registry::{MethodRegistry, ReturnKind, RuntimeType};
use crate::parser::ParsedModule;

use classes::ClassDescriptor;
use expr::{ContainsTest, Hoist, Lowered, LoweredExpr, StatementCall};
use helpers::{zig_escape, TypeTag};

/// A pre-analyzed function belonging to an imported module.
pub(crate) struct ModuleFunctionEntry<'a> {
    pub(crate) signature: FunctionSignature,
    pub(crate) node: &'a ast::StmtFunctionDef,
}

#[derive(Clone)]
struct HandlerInfo<'a> {
    exc_type: Option<String>,
    body: &'a [ast::Stmt],
}

#[derive(Clone)]
struct TryContext<'a> {
    label: String,
    handlers: Vec<HandlerInfo<'a>>,
}

/// Generates Zig code from a parsed Python module.
pub struct ZigCodeGenerator<'a> {
    indent_level: usize,
    output: Vec<String>,
    needs_runtime: bool,
    needs_allocator: bool,
    declared_vars: HashSet<String>,
    reassigned_vars: HashSet<String>,
    pub(crate) var_types: IndexMap<String, TypeTag>,
    list_element_types: IndexMap<String, TypeTag>,
    tuple_element_types: IndexMap<String, TypeTag>,
    pub(crate) function_signatures: IndexMap<String, FunctionSignature>,
    pub(crate) class_definitions: IndexMap<String, ClassDescriptor<'a>>,
    imported_modules: &'a IndexMap<String, ParsedModule>,
    pub(crate) module_functions: IndexMap<String, IndexMap<String, ModuleFunctionEntry<'a>>>,
    function_params: HashSet<String>,
    pub(crate) registry: MethodRegistry,
    try_stack: Vec<TryContext<'a>>,
    temp_counter: u64,
    current_fn_returns_dynamic: bool,
}

/// Generate Zig code for a parsed module and its imported modules.
pub fn generate_code(
    parsed: &ParsedModule,
    imported_modules: &IndexMap<String, ParsedModule>,
) -> CompileResult<String> {
    let mut generator = ZigCodeGenerator::new(imported_modules);
    generator.generate(parsed)
}

impl<'a> ZigCodeGenerator<'a> {
    pub fn new(imported_modules: &'a IndexMap<String, ParsedModule>) -> Self {
        Self {
            indent_level: 0,
            output: Vec::new(),
            needs_runtime: false,
            needs_allocator: false,
            declared_vars: HashSet::new(),
            reassigned_vars: HashSet::new(),
            var_types: IndexMap::new(),
            list_element_types: IndexMap::new(),
            tuple_element_types: IndexMap::new(),
            function_signatures: IndexMap::new(),
            class_definitions: IndexMap::new(),
            imported_modules,
            module_functions: IndexMap::new(),
            function_params: HashSet::new(),
            registry: MethodRegistry::new(),
            try_stack: Vec::new(),
            temp_counter: 0,
            current_fn_returns_dynamic: false,
        }
    }

    fn indent(&self) -> String {
        "    ".repeat(self.indent_level)
    }

    pub(crate) fn emit(&mut self, code: impl AsRef<str>) {
        self.output.push(format!("{}{}", self.indent(), code.as_ref()));
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.temp_counter += 1;
        self.temp_counter
    }

    /// Deterministic temporary name: two `generate` calls over the same
    /// inputs produce byte-identical text.
    pub(crate) fn fresh(&mut self, prefix: &str) -> String {
        let id = self.next_id();
        format!("_{prefix}_{id}")
    }

    pub(crate) fn push_indent(&mut self) {
        self.indent_level += 1;
    }

    pub(crate) fn pop_indent(&mut self) {
        self.indent_level -= 1;
    }

    /// Generate the Zig translation of `parsed`.
    pub fn generate(&mut self, parsed: &'a ParsedModule) -> CompileResult<String> {
        let imported = self.imported_modules;
        let module_names: Vec<String> = imported.keys().cloned().collect();

        let analysis = analyze_module(&parsed.ast.body, &module_names);
        self.needs_runtime = analysis.needs_runtime;
        self.needs_allocator = analysis.needs_allocator;
        self.reassigned_vars = analysis.reassigned_vars;

        for module in imported.values() {
            let module_analysis = analyze_module(&module.ast.body, &module_names);
            self.needs_runtime |= module_analysis.needs_runtime;
            self.needs_allocator |= module_analysis.needs_allocator;
            analysis::detect_module_reassignments(&module.ast.body, &mut self.reassigned_vars);
        }

        // Separate classes, functions and top-level code
        let mut class_defs: Vec<&'a ast::StmtClassDef> = Vec::new();
        let mut functions: Vec<&'a ast::StmtFunctionDef> = Vec::new();
        let mut top_level: Vec<&'a ast::Stmt> = Vec::new();
        for stmt in &parsed.ast.body {
            match stmt {
                ast::Stmt::ClassDef(c) => class_defs.push(c),
                ast::Stmt::FunctionDef(f) => functions.push(f),
                other => top_level.push(other),
            }
        }

        // Pre-register class names so instantiation expressions resolve, and
        // pick up dynamic constructor parameters for the runtime flag.
        for cls in &class_defs {
            let base = match cls.bases.first() {
                Some(ast::Expr::Name(name)) => Some(name.id.to_string()),
                _ => None,
            };
            if classes::class_has_dynamic_init_params(cls) {
                self.needs_runtime = true;
                self.needs_allocator = true;
            }
            self.class_definitions
                .insert(cls.name.to_string(), ClassDescriptor::placeholder(cls.name.to_string(), base));
        }

        // Pre-compute function signatures so callers know whether to thread
        // the allocator and unwrap errors.
        for func in &functions {
            self.function_signatures
                .insert(func.name.to_string(), function_signature(func, &module_names));
        }
        for (module_name, module) in imported {
            let mut module_funcs = IndexMap::new();
            for stmt in &module.ast.body {
                if let ast::Stmt::FunctionDef(func) = stmt {
                    module_funcs.insert(
                        func.name.to_string(),
                        ModuleFunctionEntry {
                            signature: function_signature(func, &module_names),
                            node: func,
                        },
                    );
                }
            }
            self.module_functions.insert(module_name.clone(), module_funcs);
        }

        debug!(
            needs_runtime = self.needs_runtime,
            functions = functions.len(),
            classes = class_defs.len(),
            signatures = %serde_json::to_string(&self.function_signatures).unwrap_or_default(),
            "starting generation"
        );

        self.emit("const std = @import(\"std\");");
        if self.needs_runtime {
            self.emit("const runtime = @import(\"runtime\");");
        }
        self.emit("");

        let top_level_needs_allocator = self.top_level_needs_allocator(&top_level, &module_names);

        for &cls in &class_defs {
            self.generate_class(cls)?;
        }
        for &func in &functions {
            self.emit_function_def(func)?;
        }
        self.emit_module_namespaces()?;
        self.emit_main(&top_level, top_level_needs_allocator)?;

        Ok(self.output.join("\n"))
    }

    fn top_level_needs_allocator(&self, top_level: &[&ast::Stmt], module_names: &[String]) -> bool {
        for stmt in top_level {
            if is_docstring(stmt) {
                continue;
            }
            if analysis::stmt_needs_runtime(stmt, module_names) {
                return true;
            }
            match stmt {
                ast::Stmt::Assign(a) => match a.value.as_ref() {
                    ast::Expr::Call(call) => match call.func.as_ref() {
                        ast::Expr::Name(name) => {
                            let func_name = name.id.as_str();
                            if let Some(sig) = self.function_signatures.get(func_name) {
                                if sig.needs_allocator {
                                    return true;
                                }
                            }
                            if self.class_definitions.contains_key(func_name) {
                                return true;
                            }
                        }
                        ast::Expr::Attribute(attr) => {
                            if self.module_call_needs_allocator(attr) {
                                return true;
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                },
                ast::Stmt::Expr(e) => {
                    if let ast::Expr::Call(call) = e.value.as_ref() {
                        if let ast::Expr::Attribute(attr) = call.func.as_ref() {
                            if let ast::Expr::Name(name) = attr.value.as_ref() {
                                if let Some(funcs) = self.module_functions.get(name.id.as_str()) {
                                    if let Some(entry) = funcs.get(attr.attr.as_str()) {
                                        if entry.signature.needs_allocator {
                                            return true;
                                        }
                                        continue;
                                    }
                                }
                            }
                            // Method call on an instance may need the allocator
                            return true;
                        }
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn module_call_needs_allocator(&self, attr: &ast::ExprAttribute) -> bool {
        if let ast::Expr::Name(name) = attr.value.as_ref() {
            if let Some(funcs) = self.module_functions.get(name.id.as_str()) {
                if let Some(entry) = funcs.get(attr.attr.as_str()) {
                    return entry.signature.needs_allocator;
                }
            }
        }
        false
    }

    fn emit_module_namespaces(&mut self) -> CompileResult<()> {
        let module_names: Vec<String> = self.module_functions.keys().cloned().collect();
        for module_name in module_names {
            let entries: Vec<(String, FunctionSignature, &'a ast::StmtFunctionDef)> = self
                .module_functions[&module_name]
                .iter()
                .map(|(name, entry)| (name.clone(), entry.signature.clone(), entry.node))
                .collect();

            self.emit(format!("const {module_name} = struct {{"));
            self.push_indent();

            // Module functions are visible to each other under their bare
            // names while the namespace body is emitted.
            let mut shadowed = Vec::new();
            for (name, sig, _) in &entries {
                shadowed.push((name.clone(), self.function_signatures.insert(name.clone(), sig.clone())));
            }
            for (_, _, node) in &entries {
                self.emit_function_def(*node)?;
            }
            for (name, previous) in shadowed {
                match previous {
                    Some(sig) => {
                        self.function_signatures.insert(name, sig);
                    }
                    None => {
                        self.function_signatures.shift_remove(&name);
                    }
                }
            }

            self.pop_indent();
            self.emit("};");
            self.emit("");
        }
        Ok(())
    }

    fn emit_main(
        &mut self,
        top_level: &[&'a ast::Stmt],
        needs_allocator: bool,
    ) -> CompileResult<()> {
        if top_level.is_empty() {
            return Ok(());
        }

        let needs_error = needs_allocator || top_level.iter().any(|s| stmt_uses_error_operations(s));
        if needs_allocator {
            self.emit("pub fn main() !void {");
            self.push_indent();
            self.emit("var gpa = std.heap.GeneralPurposeAllocator(.{ .verbose_log = false }){};");
            self.emit("defer _ = gpa.deinit();");
            self.emit("const allocator = gpa.allocator();");
            self.emit("");
        } else if needs_error {
            self.emit("pub fn main() !void {");
            self.push_indent();
        } else {
            self.emit("pub fn main() void {");
            self.push_indent();
        }

        self.function_params.clear();
        self.current_fn_returns_dynamic = false;
        for &stmt in top_level {
            self.emit_stmt(stmt)?;
        }

        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    /// Lower one statement.
    pub(crate) fn emit_stmt(&mut self, stmt: &'a ast::Stmt) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Assign(a) => {
                if a.targets.len() != 1 {
                    return Err(CompileError::unsupported("multiple assignment targets"));
                }
                self.emit_assign(&a.targets[0], &a.value)
            }
            ast::Stmt::AnnAssign(a) => match &a.value {
                Some(value) => self.emit_assign(&a.target, value),
                None => Err(CompileError::unsupported("annotation without value")),
            },
            ast::Stmt::AugAssign(a) => self.emit_aug_assign(a),
            ast::Stmt::If(i) => self.emit_if(i),
            ast::Stmt::While(w) => self.emit_while(w),
            ast::Stmt::For(f) => self.emit_for(f),
            ast::Stmt::Return(r) => self.emit_return(r),
            ast::Stmt::Try(t) => self.emit_try(t),
            ast::Stmt::Expr(e) => self.emit_expr_stmt(e),
            ast::Stmt::Import(_) => Ok(()), // modules are pre-analyzed
            ast::Stmt::ImportFrom(_) => Err(CompileError::unsupported("from...import")),
            ast::Stmt::Pass(_) => Ok(()),
            ast::Stmt::Break(_) => {
                self.emit("break;");
                Ok(())
            }
            ast::Stmt::Continue(_) => {
                self.emit("continue;");
                Ok(())
            }
            ast::Stmt::FunctionDef(_) => {
                Err(CompileError::unsupported("nested function definition"))
            }
            ast::Stmt::ClassDef(_) => Err(CompileError::unsupported("nested class definition")),
            ast::Stmt::With(_) | ast::Stmt::AsyncWith(_) => {
                Err(CompileError::unsupported("with statement"))
            }
            ast::Stmt::Raise(_) => Err(CompileError::unsupported("raise")),
            ast::Stmt::Global(_) | ast::Stmt::Nonlocal(_) => {
                Err(CompileError::unsupported("global/nonlocal"))
            }
            ast::Stmt::Delete(_) => Err(CompileError::unsupported("del")),
            ast::Stmt::Assert(_) => Err(CompileError::unsupported("assert")),
            ast::Stmt::AsyncFunctionDef(_) | ast::Stmt::AsyncFor(_) => {
                Err(CompileError::unsupported("async"))
            }
            other => Err(CompileError::unsupported(format!("statement {other:?}"))),
        }
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn emit_assign(&mut self, target: &'a ast::Expr, value: &'a ast::Expr) -> CompileResult<()> {
        // Attribute assignment is a direct field store
        if let ast::Expr::Attribute(attr) = target {
            let obj = self.lower_plain(&attr.value)?;
            let (obj_code, _) = self.realize(obj);
            let lowered = self.lower_plain(value)?;
            let (value_code, value_try) = self.realize(lowered);
            if value_try {
                self.emit(format!("{obj_code}.{} = try {value_code};", attr.attr));
            } else {
                self.emit(format!("{obj_code}.{} = {value_code};", attr.attr));
            }
            return Ok(());
        }

        let ast::Expr::Name(name) = target else {
            return Err(CompileError::unsupported("assignment target"));
        };
        let target_name = name.id.to_string();

        let var_keyword = if self.reassigned_vars.contains(&target_name) {
            "var"
        } else {
            "const"
        };
        let is_first = !self.declared_vars.contains(&target_name);
        if is_first {
            self.declared_vars.insert(target_name.clone());
        }

        // String-concatenation chains get per-piece scoped temporaries
        if let ast::Expr::BinOp(binop) = value {
            if matches!(binop.op, ast::Operator::Add) && self.expr_is_stringish(value) {
                return self.emit_assign_concat(&target_name, var_keyword, is_first, value);
            }
        }

        match value {
            ast::Expr::List(l) => self.emit_assign_list(&target_name, var_keyword, is_first, l),
            ast::Expr::Tuple(t) => self.emit_assign_tuple(&target_name, var_keyword, is_first, t),
            ast::Expr::Dict(d) if !d.keys.is_empty() => {
                self.emit_assign_dict(&target_name, var_keyword, is_first, d)
            }
            ast::Expr::ListComp(c) => {
                self.emit_assign_list_comp(&target_name, var_keyword, is_first, c)
            }
            _ => self.emit_assign_default(&target_name, var_keyword, is_first, value),
        }
    }

    fn emit_assign_default(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        value: &'a ast::Expr,
    ) -> CompileResult<()> {
        let old_tag = self.var_types.get(target).cloned();
        if let Some(tag) = self.infer_assign_tag(target, value) {
            self.var_types.insert(target.to_string(), tag);
        }

        let lowered = match self.lower_expr(value)? {
            LoweredExpr::Sum { list_code } => {
                let result = self.expand_sum(&list_code);
                self.var_types.insert(target.to_string(), TypeTag::Int);
                Lowered::plain(result, false)
            }
            LoweredExpr::Contains(test) => {
                let code = self.realize_contains(*test);
                self.var_types.insert(target.to_string(), TypeTag::Bool);
                Lowered::plain(code, false)
            }
            LoweredExpr::MethodStatement(call) => {
                return Err(CompileError::unsupported(format!(
                    "{} in assignment",
                    call.descriptor.name
                )))
            }
            LoweredExpr::Plain(lowered) => lowered,
        };
        let (code, needs_try) = self.realize(lowered);

        if is_first {
            self.emit_first_binding(target, var_keyword, &code, needs_try, value)
        } else {
            self.emit_rebinding(target, &code, needs_try, old_tag)
        }
    }

    fn emit_first_binding(
        &mut self,
        target: &str,
        var_keyword: &str,
        code: &str,
        needs_try: bool,
        value: &'a ast::Expr,
    ) -> CompileResult<()> {
        let tag = self.var_types.get(target).cloned();

        if needs_try {
            if self.try_stack.is_empty() {
                self.emit(format!("{var_keyword} {target} = try {code};"));
            } else {
                self.emit_guarded(&format!("{var_keyword} {target}"), code)?;
            }
        } else if var_keyword == "var" {
            let annotation = match &tag {
                Some(TypeTag::Str | TypeTag::List | TypeTag::Dict | TypeTag::Tuple)
                | Some(TypeTag::PyInt | TypeTag::PyObject) => "*runtime.PyObject".to_string(),
                Some(TypeTag::Instance(class_name)) => format!("*{class_name}"),
                Some(TypeTag::Float) => "f64".to_string(),
                Some(TypeTag::Bool) => "bool".to_string(),
                _ => "i64".to_string(),
            };
            self.emit(format!("var {target}: {annotation} = {code};"));
        } else {
            self.emit(format!("const {target} = {code};"));
        }

        // A parameter is caller-owned; a new binding must acquire its own
        // ownership.
        if let ast::Expr::Name(source) = value {
            if self.function_params.contains(source.id.as_str())
                && tag.as_ref().is_some_and(TypeTag::is_dynamic)
            {
                self.emit(format!("runtime.incref({target});"));
                self.emit(format!("defer runtime.decref({target}, allocator);"));
                return Ok(());
            }
        }

        // Scope-end cleanup for owned bindings. Borrowed references (index
        // into a list/tuple, dict lookup, field read) and primitives get
        // none.
        match &tag {
            Some(TypeTag::Instance(_)) => {
                self.emit(format!("defer {target}.deinit(allocator);"));
            }
            Some(TypeTag::Int | TypeTag::Float | TypeTag::Bool) => {}
            _ => {
                if needs_try && !self.is_borrowed_source(value) {
                    self.emit(format!("defer runtime.decref({target}, allocator);"));
                } else if !needs_try && self.is_owned_direct_source(value) {
                    // dict.get / dict.pop return owned references without an
                    // error union
                    self.emit(format!("defer runtime.decref({target}, allocator);"));
                }
            }
        }
        Ok(())
    }

    fn emit_rebinding(
        &mut self,
        target: &str,
        code: &str,
        needs_try: bool,
        old_tag: Option<TypeTag>,
    ) -> CompileResult<()> {
        if old_tag.is_some_and(|tag| tag.is_dynamic()) {
            self.emit(format!("runtime.decref({target}, allocator);"));
        }
        if needs_try {
            if self.try_stack.is_empty() {
                self.emit(format!("{target} = try {code};"));
            } else {
                self.emit_guarded(target, code)?;
            }
        } else {
            self.emit(format!("{target} = {code};"));
        }
        Ok(())
    }

    /// Index subscripts (but not on strings), dict lookups and field reads
    /// produce borrowed references that must not be decremented.
    fn is_borrowed_source(&self, value: &ast::Expr) -> bool {
        match value {
            ast::Expr::Subscript(s) => {
                !matches!(s.slice.as_ref(), ast::Expr::Slice(_))
                    && self.name_tag(&s.value) != Some(TypeTag::Str)
            }
            ast::Expr::Attribute(_) => true,
            _ => false,
        }
    }

    /// `dict.get`/`dict.pop` return an owned reference without an error
    /// union.
    fn is_owned_direct_source(&self, value: &ast::Expr) -> bool {
        if let ast::Expr::Call(c) = value {
            if let ast::Expr::Attribute(attr) = c.func.as_ref() {
                let receiver = self.name_tag(&attr.value);
                let key = receiver.as_ref().and_then(TypeTag::registry_key);
                if let Some(descriptor) = self.registry.get(attr.attr.as_str(), key) {
                    return descriptor.returns == ReturnKind::PyObjectDirect;
                }
            }
        }
        false
    }

    /// Infer the target's type tag from the right-hand side.
    fn infer_assign_tag(&mut self, target: &str, value: &ast::Expr) -> Option<TypeTag> {
        match value {
            ast::Expr::Constant(c) => match &c.value {
                ast::Constant::Str(_) => Some(TypeTag::Str),
                ast::Constant::Bool(_) => Some(TypeTag::Bool),
                ast::Constant::Int(_) => Some(TypeTag::Int),
                ast::Constant::Float(_) => Some(TypeTag::Float),
                _ => None,
            },
            ast::Expr::Name(source) => self.var_types.get(source.id.as_str()).cloned(),
            ast::Expr::Compare(_) | ast::Expr::BoolOp(_) => Some(TypeTag::Bool),
            ast::Expr::List(_) | ast::Expr::ListComp(_) => Some(TypeTag::List),
            ast::Expr::Tuple(_) => Some(TypeTag::Tuple),
            ast::Expr::Dict(_) => Some(TypeTag::Dict),
            ast::Expr::UnaryOp(u) => match u.op {
                ast::UnaryOp::Not => Some(TypeTag::Bool),
                _ => self.infer_assign_tag(target, &u.operand),
            },
            ast::Expr::BinOp(_) => {
                if self.expr_is_stringish(value) {
                    Some(TypeTag::Str)
                } else {
                    Some(TypeTag::Int)
                }
            }
            ast::Expr::Subscript(s) => {
                if matches!(s.slice.as_ref(), ast::Expr::Slice(_)) {
                    // Slices keep the source's tag
                    return Some(self.name_tag(&s.value).unwrap_or(TypeTag::List));
                }
                match self.name_tag(&s.value) {
                    Some(TypeTag::Dict) => Some(TypeTag::PyObject),
                    Some(TypeTag::Str) => Some(TypeTag::Str),
                    Some(TypeTag::Tuple) => {
                        let elem = match &s.value.as_ref() {
                            ast::Expr::Name(n) => {
                                self.tuple_element_types.get(n.id.as_str()).cloned()
                            }
                            _ => None,
                        };
                        match elem {
                            Some(TypeTag::Str) => Some(TypeTag::Str),
                            _ => Some(TypeTag::PyInt),
                        }
                    }
                    _ => {
                        let elem = match &s.value.as_ref() {
                            ast::Expr::Name(n) => {
                                self.list_element_types.get(n.id.as_str()).cloned()
                            }
                            _ => None,
                        };
                        match elem {
                            Some(TypeTag::Str) => Some(TypeTag::Str),
                            Some(TypeTag::Tuple) => Some(TypeTag::Tuple),
                            _ => Some(TypeTag::PyInt),
                        }
                    }
                }
            }
            ast::Expr::Call(c) => match c.func.as_ref() {
                ast::Expr::Name(func) => {
                    let func_name = func.id.as_str();
                    if self.class_definitions.contains_key(func_name) {
                        return Some(TypeTag::Instance(func_name.to_string()));
                    }
                    match func_name {
                        "range" => {
                            self.list_element_types
                                .insert(target.to_string(), TypeTag::Int);
                            Some(TypeTag::List)
                        }
                        "enumerate" | "zip" => {
                            self.list_element_types
                                .insert(target.to_string(), TypeTag::Tuple);
                            Some(TypeTag::List)
                        }
                        "sorted" | "reversed" | "filter" => Some(TypeTag::List),
                        "len" | "sum" | "min" | "max" => Some(TypeTag::Int),
                        "str" => Some(TypeTag::Str),
                        _ => self.function_signatures.get(func_name).map(|sig| {
                            if sig.returns_pyobject {
                                TypeTag::Str
                            } else {
                                TypeTag::Int
                            }
                        }),
                    }
                }
                ast::Expr::Attribute(attr) => {
                    self.infer_method_call_tag(target, attr)
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn infer_method_call_tag(
        &mut self,
        target: &str,
        attr: &ast::ExprAttribute,
    ) -> Option<TypeTag> {
        let method_name = attr.attr.as_str();
        let receiver_tag = self.name_tag(&attr.value);

        // Module-qualified function call
        if let ast::Expr::Name(name) = attr.value.as_ref() {
            if let Some(funcs) = self.module_functions.get(name.id.as_str()) {
                return funcs.get(method_name).map(|entry| {
                    if entry.signature.returns_pyobject {
                        TypeTag::Str
                    } else {
                        TypeTag::Int
                    }
                });
            }
        }

        // Direct class method call
        if let Some(TypeTag::Instance(class_name)) = &receiver_tag {
            if let Some(sig) = self.lookup_method(class_name, method_name) {
                return Some(if sig.return_type == "*runtime.PyObject" {
                    TypeTag::Str
                } else {
                    TypeTag::Int
                });
            }
        }

        let key = receiver_tag.as_ref().and_then(TypeTag::registry_key);
        let descriptor = self.registry.get(method_name, key)?;
        match descriptor.returns {
            ReturnKind::Int => Some(TypeTag::Int),
            ReturnKind::Void => None,
            ReturnKind::PyObject => match method_name {
                "split" => {
                    self.list_element_types
                        .insert(target.to_string(), TypeTag::Str);
                    Some(TypeTag::List)
                }
                "keys" | "values" | "items" => Some(TypeTag::List),
                "pop" => Some(TypeTag::PyObject),
                "copy" => receiver_tag,
                // By default a method yields the receiver's own kind; with
                // the receiver tag lost, assume a string
                _ => receiver_tag.or(Some(TypeTag::Str)),
            },
            ReturnKind::PyObjectDirect => match method_name {
                "get" => Some(TypeTag::PyInt),
                "pop" => Some(TypeTag::PyObject),
                "copy" => receiver_tag,
                _ => receiver_tag.or(Some(TypeTag::Str)),
            },
        }
    }

    // ------------------------------------------------------------------
    // Collection literal construction
    // ------------------------------------------------------------------

    fn emit_container_create(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        create: &str,
    ) {
        if is_first {
            self.emit(format!("{var_keyword} {target} = try {create};"));
            self.emit(format!("defer runtime.decref({target}, allocator);"));
        } else {
            self.emit(format!("runtime.decref({target}, allocator);"));
            self.emit(format!("{target} = try {create};"));
        }
    }

    fn emit_assign_list(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        list: &'a ast::ExprList,
    ) -> CompileResult<()> {
        self.var_types.insert(target.to_string(), TypeTag::List);
        if let Some(ast::Expr::Constant(first)) = list.elts.first() {
            match &first.value {
                ast::Constant::Str(_) => {
                    self.list_element_types
                        .insert(target.to_string(), TypeTag::Str);
                }
                ast::Constant::Int(_) => {
                    self.list_element_types
                        .insert(target.to_string(), TypeTag::Int);
                }
                _ => {}
            }
        }

        self.emit_container_create(target, var_keyword, is_first, "runtime.PyList.create(allocator)");

        for elem in &list.elts {
            self.emit_element_store(elem, &|target, temp| {
                format!("try runtime.PyList.append({target}, {temp});")
            }, target)?;
        }
        Ok(())
    }

    fn emit_assign_tuple(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        tuple: &'a ast::ExprTuple,
    ) -> CompileResult<()> {
        self.var_types.insert(target.to_string(), TypeTag::Tuple);

        // Track the element kind only when the literal is homogeneous
        let mut elem_tag: Option<TypeTag> = None;
        let mut homogeneous = true;
        for elem in &tuple.elts {
            let current = match elem {
                ast::Expr::Constant(c) => match &c.value {
                    ast::Constant::Str(_) => Some(TypeTag::Str),
                    ast::Constant::Int(_) => Some(TypeTag::Int),
                    _ => None,
                },
                _ => None,
            };
            match (&elem_tag, current) {
                (None, Some(tag)) => elem_tag = Some(tag),
                (Some(prev), Some(tag)) if *prev != tag => {
                    homogeneous = false;
                    break;
                }
                _ => {}
            }
        }
        if homogeneous {
            if let Some(tag) = elem_tag {
                self.tuple_element_types.insert(target.to_string(), tag);
            }
        }

        let create = format!("runtime.PyTuple.create(allocator, {})", tuple.elts.len());
        self.emit_container_create(target, var_keyword, is_first, &create);

        for (idx, elem) in tuple.elts.iter().enumerate() {
            self.emit_element_store(elem, &|target, temp| {
                format!("runtime.PyTuple.setItem({target}, {idx}, {temp});")
            }, target)?;
        }
        Ok(())
    }

    fn emit_assign_dict(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        dict: &'a ast::ExprDict,
    ) -> CompileResult<()> {
        self.var_types.insert(target.to_string(), TypeTag::Dict);
        self.emit_container_create(target, var_keyword, is_first, "runtime.PyDict.create(allocator)");

        for (key, value) in dict.keys.iter().zip(&dict.values) {
            let Some(key) = key else {
                return Err(CompileError::unsupported("dict unpacking"));
            };
            let key_str = match key {
                ast::Expr::Constant(c) => match &c.value {
                    ast::Constant::Str(s) => zig_escape(s),
                    _ => return Err(CompileError::unsupported("non-string dict key")),
                },
                _ => return Err(CompileError::unsupported("non-string dict key")),
            };
            self.emit_element_store(value, &|target, temp| {
                format!("try runtime.PyDict.set({target}, \"{key_str}\", {temp});")
            }, target)?;
        }
        Ok(())
    }

    /// Store one element into a container under construction: dynamic values
    /// are bound to a scoped temporary and released after the store,
    /// primitives are boxed first.
    fn emit_element_store(
        &mut self,
        elem: &'a ast::Expr,
        store: &dyn Fn(&str, &str) -> String,
        target: &str,
    ) -> CompileResult<()> {
        let lowered = self.lower_plain(elem)?;
        let (code, needs_try) = self.realize(lowered);

        if let ast::Expr::Name(name) = elem {
            if self
                .var_types
                .get(name.id.as_str())
                .is_some_and(TypeTag::is_dynamic)
            {
                let line = store(target, &code);
                self.emit(line);
                return Ok(());
            }
        }

        let temp = self.fresh("temp_elem");
        if needs_try {
            self.emit(format!("const {temp} = try {code};"));
        } else {
            self.emit(format!(
                "const {temp} = try runtime.PyInt.create(allocator, {code});"
            ));
        }
        let line = store(target, &temp);
        self.emit(line);
        self.emit(format!("runtime.decref({temp}, allocator);"));
        Ok(())
    }

    fn emit_assign_list_comp(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        comp: &'a ast::ExprListComp,
    ) -> CompileResult<()> {
        if comp.generators.len() != 1 {
            return Err(CompileError::unsupported("nested comprehension"));
        }
        let generator = &comp.generators[0];
        if generator.is_async {
            return Err(CompileError::unsupported("async comprehension"));
        }
        let ast::Expr::Name(loop_name) = &generator.target else {
            return Err(CompileError::unsupported("comprehension target"));
        };
        let ast::Expr::Name(source) = &generator.iter else {
            return Err(CompileError::unsupported(
                "comprehension over non-list iterable",
            ));
        };
        let loop_var = loop_name.id.to_string();
        let source_var = source.id.to_string();

        self.var_types.insert(target.to_string(), TypeTag::List);
        self.emit_container_create(target, var_keyword, is_first, "runtime.PyList.create(allocator)");

        let elem_tag = self
            .list_element_types
            .get(&source_var)
            .cloned()
            .unwrap_or(TypeTag::Int);
        let loop_tag = if elem_tag == TypeTag::Str {
            TypeTag::Str
        } else {
            TypeTag::PyInt
        };
        self.var_types.insert(loop_var.clone(), loop_tag);

        let idx = self.fresh(&format!("{loop_var}_idx"));
        self.emit(format!("var {idx}: i64 = 0;"));
        self.emit(format!(
            "while ({idx} < runtime.PyList.len({source_var})) : ({idx} += 1) {{"
        ));
        self.push_indent();
        self.emit(format!(
            "const {loop_var} = try runtime.PyList.getItem({source_var}, {idx});"
        ));
        self.declared_vars.insert(loop_var.clone());

        let mut open_filters = 0;
        for filter in &generator.ifs {
            let cond = self.lower_condition(filter)?;
            self.emit(format!("if ({cond}) {{"));
            self.push_indent();
            open_filters += 1;
        }

        let lowered = self.lower_plain(&comp.elt)?;
        let (elem_code, elem_try) = self.realize(lowered);
        if elem_code == loop_var {
            // Already a dynamic object borrowed from the source list
            self.emit(format!("try runtime.PyList.append({target}, {elem_code});"));
        } else {
            let temp = self.fresh("comp_elem");
            if elem_try {
                self.emit(format!("const {temp} = try {elem_code};"));
            } else {
                self.emit(format!(
                    "const {temp} = try runtime.PyInt.create(allocator, {elem_code});"
                ));
            }
            self.emit(format!("try runtime.PyList.append({target}, {temp});"));
            self.emit(format!("runtime.decref({temp}, allocator);"));
        }

        for _ in 0..open_filters {
            self.pop_indent();
            self.emit("}");
        }
        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // String concatenation chains
    // ------------------------------------------------------------------

    fn flatten_add_chain(node: &'a ast::Expr, out: &mut Vec<&'a ast::Expr>) {
        if let ast::Expr::BinOp(b) = node {
            if matches!(b.op, ast::Operator::Add) {
                Self::flatten_add_chain(&b.left, out);
                out.push(&b.right);
                return;
            }
        }
        out.push(node);
    }

    /// Emit a flattened concatenation chain: each allocating piece becomes a
    /// scoped temporary, intermediates are decremented, the final value is
    /// returned to the caller who takes ownership.
    fn emit_concat_chain(
        &mut self,
        value: &'a ast::Expr,
        hint: &str,
    ) -> CompileResult<String> {
        let mut parts = Vec::new();
        Self::flatten_add_chain(value, &mut parts);

        let mut piece_codes = Vec::new();
        for part in &parts {
            let lowered = self.lower_plain(part)?;
            let (code, needs_try) = self.realize(lowered);
            if needs_try {
                let temp = self.fresh(&format!("temp_{hint}"));
                self.emit(format!("const {temp} = try {code};"));
                self.emit(format!("defer runtime.decref({temp}, allocator);"));
                piece_codes.push(temp);
            } else {
                piece_codes.push(code);
            }
        }

        let mut result = piece_codes[0].clone();
        for (i, piece) in piece_codes.iter().enumerate().skip(1) {
            let next = self.fresh(&format!("concat_{hint}"));
            self.emit(format!(
                "const {next} = try runtime.PyString.concat(allocator, {result}, {piece});"
            ));
            if i < piece_codes.len() - 1 {
                self.emit(format!("defer runtime.decref({next}, allocator);"));
            }
            result = next;
        }
        Ok(result)
    }

    fn emit_assign_concat(
        &mut self,
        target: &str,
        var_keyword: &str,
        is_first: bool,
        value: &'a ast::Expr,
    ) -> CompileResult<()> {
        let result = self.emit_concat_chain(value, target)?;
        if is_first {
            self.emit(format!("{var_keyword} {target} = {result};"));
            self.emit(format!("defer runtime.decref({target}, allocator);"));
        } else {
            self.emit(format!("runtime.decref({target}, allocator);"));
            self.emit(format!("{target} = {result};"));
        }
        self.var_types.insert(target.to_string(), TypeTag::Str);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Augmented assignment
    // ------------------------------------------------------------------

    fn emit_aug_assign(&mut self, node: &'a ast::StmtAugAssign) -> CompileResult<()> {
        let ast::Expr::Name(name) = node.target.as_ref() else {
            return Err(CompileError::unsupported("augmented assignment target"));
        };
        let var_name = name.id.to_string();
        let var_type = self.var_types.get(&var_name).cloned();

        let lowered = self.lower_plain(&node.value)?;
        let (value_code, value_try) = self.realize(lowered);

        match (&node.op, &var_type) {
            (ast::Operator::Add, Some(TypeTag::Str)) => {
                let rhs = self.owned_rhs(&value_code, value_try);
                let temp = self.fresh("aug_str");
                self.emit(format!(
                    "const {temp} = try runtime.PyString.concat(allocator, {var_name}, {rhs});"
                ));
                self.emit(format!("runtime.decref({var_name}, allocator);"));
                self.emit(format!("{var_name} = {temp};"));
            }
            (ast::Operator::Add, Some(TypeTag::List)) => {
                let rhs = self.owned_rhs(&value_code, value_try);
                let temp = self.fresh("aug_list");
                self.emit(format!(
                    "const {temp} = try runtime.PyList.concat(allocator, {var_name}, {rhs});"
                ));
                self.emit(format!("runtime.decref({var_name}, allocator);"));
                self.emit(format!("{var_name} = {temp};"));
            }
            (ast::Operator::FloorDiv, _) => {
                self.emit(format!("{var_name} = @divFloor({var_name}, {value_code});"));
            }
            (ast::Operator::Div, _) => {
                self.emit(format!("{var_name} = @divTrunc({var_name}, {value_code});"));
            }
            (ast::Operator::Mod, _) => {
                self.emit(format!("{var_name} = @rem({var_name}, {value_code});"));
            }
            (ast::Operator::Pow, _) => {
                self.emit(format!(
                    "{var_name} = @as(i64, @intFromFloat(@floor(std.math.pow(f64, @floatFromInt({var_name}), @floatFromInt({value_code})))));"
                ));
            }
            (op, _) => {
                let op_str = match op {
                    ast::Operator::Add => "+",
                    ast::Operator::Sub => "-",
                    ast::Operator::Mult => "*",
                    ast::Operator::BitAnd => "&",
                    ast::Operator::BitOr => "|",
                    ast::Operator::BitXor => "^",
                    ast::Operator::LShift => "<<",
                    ast::Operator::RShift => ">>",
                    other => {
                        return Err(CompileError::unsupported(format!(
                            "augmented assignment operator {other:?}"
                        )))
                    }
                };
                let rhs = if value_try {
                    format!("try {value_code}")
                } else {
                    value_code
                };
                self.emit(format!("{var_name} {op_str}= {rhs};"));
            }
        }
        Ok(())
    }

    /// Bind an allocating right-hand side to a scoped temporary so the
    /// borrowing runtime call does not leak it.
    fn owned_rhs(&mut self, code: &str, needs_try: bool) -> String {
        if needs_try {
            let temp = self.fresh("aug_rhs");
            self.emit(format!("const {temp} = try {code};"));
            self.emit(format!("defer runtime.decref({temp}, allocator);"));
            temp
        } else {
            code.to_string()
        }
    }

    // ------------------------------------------------------------------
    // Conditions and control flow
    // ------------------------------------------------------------------

    /// Lower a test expression, realizing deferred `in` dispatch and hoisting
    /// inline string allocations into scoped temporaries.
    fn lower_condition(&mut self, test: &'a ast::Expr) -> CompileResult<String> {
        match self.lower_expr(test)? {
            LoweredExpr::Contains(contains) => Ok(self.realize_contains(*contains)),
            LoweredExpr::Sum { list_code } => Ok(self.expand_sum(&list_code)),
            LoweredExpr::Plain(lowered) => {
                let (code, needs_try) = self.realize(lowered);
                if needs_try {
                    Ok(format!("try {code}"))
                } else {
                    Ok(code)
                }
            }
            LoweredExpr::MethodStatement(call) => Err(CompileError::unsupported(format!(
                "{} in condition",
                call.descriptor.name
            ))),
        }
    }

    /// Expand a deferred `in` test, boxing an unboxed needle when the
    /// container holds dynamic objects.
    fn realize_contains(&mut self, test: ContainsTest) -> String {
        let (needle_code, needle_try) = self.realize(test.needle);
        let code = match &test.haystack_tag {
            Some(TypeTag::Dict) => {
                if let Some(literal) = &test.needle_literal {
                    format!(
                        "runtime.PyDict.contains({}, \"{}\")",
                        test.haystack,
                        zig_escape(literal)
                    )
                } else {
                    format!(
                        "runtime.PyDict.contains({}, runtime.PyString.getValue({needle_code}))",
                        test.haystack
                    )
                }
            }
            Some(TypeTag::Str) => {
                if needle_try {
                    let temp = self.fresh("in_substr");
                    self.emit(format!("const {temp} = try {needle_code};"));
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    format!("runtime.PyString.contains({}, {temp})", test.haystack)
                } else {
                    format!(
                        "runtime.PyString.contains({}, {needle_code})",
                        test.haystack
                    )
                }
            }
            tag => {
                let container = if matches!(tag, Some(TypeTag::Tuple)) {
                    "PyTuple"
                } else {
                    "PyList"
                };
                if test.needle_is_dynamic {
                    if needle_try {
                        let temp = self.fresh("in_check_value");
                        self.emit(format!("const {temp} = try {needle_code};"));
                        self.emit(format!("defer runtime.decref({temp}, allocator);"));
                        format!("runtime.{container}.contains({}, {temp})", test.haystack)
                    } else {
                        format!(
                            "runtime.{container}.contains({}, {needle_code})",
                            test.haystack
                        )
                    }
                } else {
                    // Box the primitive needle into a scoped temporary
                    let temp = self.fresh("in_check_value");
                    self.emit(format!(
                        "const {temp} = try runtime.PyInt.create(allocator, {needle_code});"
                    ));
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    format!("runtime.{container}.contains({}, {temp})", test.haystack)
                }
            }
        };
        if test.negated {
            format!("!({code})")
        } else {
            code
        }
    }

    fn emit_if(&mut self, node: &'a ast::StmtIf) -> CompileResult<()> {
        let cond = self.lower_condition(&node.test)?;
        self.emit(format!("if ({cond}) {{"));
        self.push_indent();
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.pop_indent();
        if !node.orelse.is_empty() {
            self.emit("} else {");
            self.push_indent();
            for stmt in &node.orelse {
                self.emit_stmt(stmt)?;
            }
            self.pop_indent();
        }
        self.emit("}");
        Ok(())
    }

    fn emit_while(&mut self, node: &'a ast::StmtWhile) -> CompileResult<()> {
        if !node.orelse.is_empty() {
            return Err(CompileError::unsupported("while-else"));
        }
        let cond = self.lower_condition(&node.test)?;
        self.emit(format!("while ({cond}) {{"));
        self.push_indent();
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    fn emit_for(&mut self, node: &'a ast::StmtFor) -> CompileResult<()> {
        if !node.orelse.is_empty() {
            return Err(CompileError::unsupported("for-else"));
        }
        let ast::Expr::Call(call) = node.iter.as_ref() else {
            return Err(CompileError::unsupported("for loop over this iterable"));
        };
        let ast::Expr::Name(func) = call.func.as_ref() else {
            return Err(CompileError::unsupported("for loop over this iterable"));
        };

        match func.id.as_str() {
            "range" => self.emit_for_range(node, call),
            "enumerate" => self.emit_for_enumerate(node, call),
            "zip" => self.emit_for_zip(node, call),
            other => Err(CompileError::unsupported(format!(
                "for loop over {other}()"
            ))),
        }
    }

    fn emit_for_range(
        &mut self,
        node: &'a ast::StmtFor,
        call: &'a ast::ExprCall,
    ) -> CompileResult<()> {
        let (start, end, step) = match call.args.len() {
            1 => {
                let end = self.lower_plain(&call.args[0])?;
                let (end, _) = self.realize(end);
                ("0".to_string(), end, "1".to_string())
            }
            2 => {
                let start = self.lower_plain(&call.args[0])?;
                let (start, _) = self.realize(start);
                let end = self.lower_plain(&call.args[1])?;
                let (end, _) = self.realize(end);
                (start, end, "1".to_string())
            }
            3 => {
                let start = self.lower_plain(&call.args[0])?;
                let (start, _) = self.realize(start);
                let end = self.lower_plain(&call.args[1])?;
                let (end, _) = self.realize(end);
                let step = self.lower_plain(&call.args[2])?;
                let (step, _) = self.realize(step);
                (start, end, step)
            }
            _ => return Err(CompileError::unsupported("range() with these arguments")),
        };

        let ast::Expr::Name(target) = node.target.as_ref() else {
            return Err(CompileError::unsupported("complex loop target"));
        };
        let loop_var = target.id.to_string();
        self.var_types.insert(loop_var.clone(), TypeTag::Int);

        if self.declared_vars.contains(&loop_var) {
            self.emit(format!("{loop_var} = {start};"));
        } else {
            self.emit(format!("var {loop_var}: i64 = {start};"));
            self.declared_vars.insert(loop_var.clone());
        }

        // A negative literal step flips the loop comparison
        let cmp = if step.starts_with('-') { ">" } else { "<" };
        self.emit(format!("while ({loop_var} {cmp} {end}) {{"));
        self.push_indent();
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.emit(format!("{loop_var} += {step};"));
        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    fn emit_for_enumerate(
        &mut self,
        node: &'a ast::StmtFor,
        call: &'a ast::ExprCall,
    ) -> CompileResult<()> {
        let ast::Expr::Tuple(targets) = node.target.as_ref() else {
            return Err(CompileError::unsupported(
                "enumerate() without tuple unpacking",
            ));
        };
        if targets.elts.len() != 2 {
            return Err(CompileError::unsupported(
                "enumerate() without a two-name target",
            ));
        }
        let (ast::Expr::Name(index), ast::Expr::Name(value)) =
            (&targets.elts[0], &targets.elts[1])
        else {
            return Err(CompileError::unsupported("enumerate() target names"));
        };
        let index_var = index.id.to_string();
        let value_var = value.id.to_string();

        let iterable = self.lower_plain(
            call.args
                .first()
                .ok_or_else(|| CompileError::unsupported("enumerate() without argument"))?,
        )?;
        let (iterable_code, _) = self.realize(iterable);

        self.var_types.insert(index_var.clone(), TypeTag::Int);
        let elem_tag = match call.args.first() {
            Some(ast::Expr::Name(n)) => self
                .list_element_types
                .get(n.id.as_str())
                .cloned()
                .unwrap_or(TypeTag::Str),
            _ => TypeTag::Str,
        };
        let value_tag = if elem_tag == TypeTag::Int {
            TypeTag::PyInt
        } else {
            TypeTag::Str
        };
        self.var_types.insert(value_var.clone(), value_tag);

        if self.declared_vars.contains(&index_var) {
            self.emit(format!("{index_var} = 0;"));
        } else {
            self.emit(format!("var {index_var}: i64 = 0;"));
            self.declared_vars.insert(index_var.clone());
        }

        self.emit(format!(
            "while ({index_var} < runtime.PyList.len({iterable_code})) {{"
        ));
        self.push_indent();
        // getItem returns a borrowed reference: no decrement in the loop body
        self.emit(format!(
            "const {value_var} = try runtime.PyList.getItem({iterable_code}, {index_var});"
        ));
        self.declared_vars.insert(value_var.clone());
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.emit(format!("{index_var} += 1;"));
        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    fn emit_for_zip(
        &mut self,
        node: &'a ast::StmtFor,
        call: &'a ast::ExprCall,
    ) -> CompileResult<()> {
        let ast::Expr::Tuple(targets) = node.target.as_ref() else {
            return Err(CompileError::unsupported("zip() without tuple unpacking"));
        };
        if call.args.len() < 2 {
            return Err(CompileError::unsupported("zip() with fewer than two iterables"));
        }
        if targets.elts.len() != call.args.len() {
            return Err(CompileError::unsupported(
                "zip() target arity mismatch",
            ));
        }
        let mut target_vars = Vec::new();
        for elt in &targets.elts {
            let ast::Expr::Name(name) = elt else {
                return Err(CompileError::unsupported("zip() target names"));
            };
            target_vars.push(name.id.to_string());
        }

        let mut iterable_codes = Vec::new();
        let mut iterable_names = Vec::new();
        for arg in &call.args {
            let lowered = self.lower_plain(arg)?;
            let (code, _) = self.realize(lowered);
            iterable_codes.push(code);
            iterable_names.push(match arg {
                ast::Expr::Name(n) => Some(n.id.to_string()),
                _ => None,
            });
        }

        let index_var = self.fresh("zip_idx");
        self.emit(format!("var {index_var}: i64 = 0;"));

        // Loop bound is the minimum length across all iterables
        let min_len_var = self.fresh("zip_min_len");
        let len_exprs: Vec<String> = iterable_codes
            .iter()
            .map(|code| format!("runtime.PyList.len({code})"))
            .collect();
        let mut min_expr = format!("@min({}, {})", len_exprs[0], len_exprs[1]);
        for len in &len_exprs[2..] {
            min_expr = format!("@min({min_expr}, {len})");
        }
        self.emit(format!("const {min_len_var} = {min_expr};"));

        self.emit(format!("while ({index_var} < {min_len_var}) {{"));
        self.push_indent();
        for ((target_var, iterable_code), iterable_name) in target_vars
            .iter()
            .zip(&iterable_codes)
            .zip(&iterable_names)
        {
            self.emit(format!(
                "const {target_var} = try runtime.PyList.getItem({iterable_code}, {index_var});"
            ));
            self.declared_vars.insert(target_var.clone());
            if let Some(name) = iterable_name {
                let elem_tag = self
                    .list_element_types
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or(TypeTag::Str);
                let tag = if elem_tag == TypeTag::Int {
                    TypeTag::PyInt
                } else {
                    TypeTag::Str
                };
                self.var_types.insert(target_var.clone(), tag);
            }
        }
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.emit(format!("{index_var} += 1;"));
        self.pop_indent();
        self.emit("}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Return
    // ------------------------------------------------------------------

    fn emit_return(&mut self, node: &'a ast::StmtReturn) -> CompileResult<()> {
        let Some(value) = &node.value else {
            self.emit("return;");
            return Ok(());
        };

        // Concatenation returns bind each allocating piece to a scoped
        // temporary first; the final object is owned by the caller.
        if let ast::Expr::BinOp(b) = value.as_ref() {
            if matches!(b.op, ast::Operator::Add) && self.expr_is_stringish(value) {
                let result = self.emit_concat_chain(value, "ret")?;
                self.emit(format!("return {result};"));
                return Ok(());
            }
        }

        match self.lower_expr(value)? {
            LoweredExpr::Sum { list_code } => {
                let result = self.expand_sum(&list_code);
                self.emit(format!("return {result};"));
            }
            LoweredExpr::Contains(test) => {
                let code = self.realize_contains(*test);
                self.emit(format!("return {code};"));
            }
            LoweredExpr::MethodStatement(call) => {
                return Err(CompileError::unsupported(format!(
                    "return of {}",
                    call.descriptor.name
                )))
            }
            LoweredExpr::Plain(lowered) => {
                let (code, needs_try) = self.realize(lowered);
                if needs_try {
                    self.emit(format!("return try {code};"));
                } else {
                    self.emit(format!("return {code};"));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Try / except
    // ------------------------------------------------------------------

    fn emit_try(&mut self, node: &'a ast::StmtTry) -> CompileResult<()> {
        if !node.finalbody.is_empty() {
            return Err(CompileError::unsupported("finally"));
        }
        if !node.orelse.is_empty() {
            return Err(CompileError::unsupported("try-else"));
        }
        if node.handlers.is_empty() {
            for stmt in &node.body {
                self.emit_stmt(stmt)?;
            }
            return Ok(());
        }

        let mut handlers = Vec::new();
        for handler in &node.handlers {
            let ast::ExceptHandler::ExceptHandler(h) = handler;
            let exc_type = match &h.type_ {
                None => None,
                Some(t) => match t.as_ref() {
                    ast::Expr::Name(name) => Some(name.id.to_string()),
                    _ => {
                        return Err(CompileError::unsupported("complex exception types"));
                    }
                },
            };
            handlers.push(HandlerInfo {
                exc_type,
                body: &h.body,
            });
        }

        let label = self.fresh("try_catch");
        self.try_stack.push(TryContext {
            label: label.clone(),
            handlers,
        });

        self.emit(format!("{label}: {{"));
        self.push_indent();
        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }
        self.pop_indent();
        self.emit("}");

        self.try_stack.pop();
        Ok(())
    }

    /// Emit an error-returning assignment inside a try scope: an inline catch
    /// matches the error tag against the handler kinds and breaks out of the
    /// labeled block; an unmatched error re-propagates.
    fn emit_guarded(&mut self, target: &str, rhs: &str) -> CompileResult<()> {
        let Some(ctx) = self.try_stack.last().cloned() else {
            self.emit(format!("{target} = try {rhs};"));
            return Ok(());
        };

        let has_specific = ctx.handlers.iter().any(|h| h.exc_type.is_some());
        if has_specific {
            self.emit(format!("{target} = {rhs} catch |err| {{"));
        } else {
            self.emit(format!("{target} = {rhs} catch {{"));
        }
        self.push_indent();

        let mut emitted_specific = false;
        let mut bare: Option<&'a [ast::Stmt]> = None;
        for handler in &ctx.handlers {
            match &handler.exc_type {
                Some(exc_type) => {
                    if emitted_specific {
                        self.emit(format!("}} else if (err == error.{exc_type}) {{"));
                    } else {
                        self.emit(format!("if (err == error.{exc_type}) {{"));
                        emitted_specific = true;
                    }
                    self.push_indent();
                    // Handler bodies are expanded inline at every error site
                    for stmt in handler.body {
                        self.emit_stmt(stmt)?;
                    }
                    self.emit(format!("break :{};", ctx.label));
                    self.pop_indent();
                }
                None => bare = Some(handler.body),
            }
        }

        if emitted_specific {
            self.emit("} else {");
            self.push_indent();
            match bare {
                Some(body) => {
                    for stmt in body {
                        self.emit_stmt(stmt)?;
                    }
                    self.emit(format!("break :{};", ctx.label));
                }
                None => {
                    self.emit("return err;");
                }
            }
            self.pop_indent();
            self.emit("}");
        } else if let Some(body) = bare {
            for stmt in body {
                self.emit_stmt(stmt)?;
            }
            self.emit(format!("break :{};", ctx.label));
        }

        self.pop_indent();
        self.emit("};");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred expansions
    // ------------------------------------------------------------------

    /// Realize pending hoists: boxed-integer temporaries and owned string
    /// temporaries, each with a paired scoped decrement.
    pub(crate) fn realize(&mut self, lowered: Lowered) -> (String, bool) {
        let mut code = lowered.code;
        for hoist in lowered.hoists {
            match hoist {
                Hoist::WrapInt { placeholder, value } => {
                    let temp = self.fresh("wrapped");
                    self.emit(format!(
                        "const {temp} = try runtime.PyInt.create(allocator, {value});"
                    ));
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    code = code.replace(&placeholder, &temp);
                }
                Hoist::OwnedTemp {
                    placeholder,
                    create,
                } => {
                    let temp = self.fresh("temp_arg");
                    self.emit(format!("const {temp} = try {create};"));
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    code = code.replace(&placeholder, &temp);
                }
            }
        }
        (code, lowered.needs_try)
    }

    /// Expand `sum(xs)` into an unboxing while-loop; returns the accumulator
    /// variable.
    pub(crate) fn expand_sum(&mut self, list_code: &str) -> String {
        let id = self.next_id();
        let result = format!("_sum_result_{id}");
        let idx = format!("_sum_idx_{id}");
        let item = format!("_sum_item_{id}");
        self.emit(format!("var {result}: i64 = 0;"));
        self.emit(format!("var {idx}: i64 = 0;"));
        self.emit(format!(
            "while ({idx} < runtime.PyList.len({list_code})) : ({idx} += 1) {{"
        ));
        self.push_indent();
        self.emit(format!(
            "const {item} = try runtime.PyList.getItem({list_code}, {idx});"
        ));
        self.emit(format!("{result} += runtime.PyInt.getValue({item});"));
        self.pop_indent();
        self.emit("}");
        result
    }

    /// Expand a void registry method into runtime calls, boxing primitive
    /// arguments into released temporaries.
    fn expand_statement_method(&mut self, call: StatementCall) -> CompileResult<()> {
        let StatementCall {
            descriptor,
            receiver,
            receiver_hoists,
            args,
            arg_dynamics,
        } = call;

        let (receiver, _) = self.realize(Lowered {
            code: receiver,
            needs_try: false,
            hoists: receiver_hoists,
        });

        let mut prepared = Vec::new();
        for (arg, is_dynamic) in args.into_iter().zip(arg_dynamics) {
            let (code, needs_try) = self.realize(arg);
            prepared.push((code, needs_try, is_dynamic));
        }

        // Bind a fresh or primitive argument to a temporary; the container
        // takes its own reference, so the temporary is released right after
        // the call.
        let mut prep_value = |this: &mut Self, code: &str, needs_try: bool, is_dynamic: bool| {
            if needs_try {
                let temp = this.fresh(&format!("{}_arg", descriptor.runtime_fn));
                this.emit(format!("const {temp} = try {code};"));
                (temp, true)
            } else if is_dynamic {
                (code.to_string(), false)
            } else {
                let temp = this.fresh(&format!("{}_arg", descriptor.runtime_fn));
                this.emit(format!(
                    "const {temp} = try runtime.PyInt.create(allocator, {code});"
                ));
                (temp, true)
            }
        };

        match (descriptor.receiver, descriptor.runtime_fn) {
            (RuntimeType::PyList, "append") => {
                let (code, needs_try, is_dynamic) = prepared
                    .first()
                    .cloned()
                    .ok_or_else(|| CompileError::unsupported("append() without argument"))?;
                let (value, cleanup) = prep_value(self, &code, needs_try, is_dynamic);
                self.emit(format!("try runtime.PyList.append({receiver}, {value});"));
                if cleanup {
                    self.emit(format!("runtime.decref({value}, allocator);"));
                }
            }
            (RuntimeType::PyList, "remove") => {
                let (code, needs_try, is_dynamic) = prepared
                    .first()
                    .cloned()
                    .ok_or_else(|| CompileError::unsupported("remove() without argument"))?;
                let (value, cleanup) = prep_value(self, &code, needs_try, is_dynamic);
                self.emit(format!(
                    "try runtime.PyList.remove({receiver}, allocator, {value});"
                ));
                if cleanup {
                    self.emit(format!("runtime.decref({value}, allocator);"));
                }
            }
            (RuntimeType::PyList, "extend") => {
                let (code, needs_try, is_dynamic) = prepared
                    .first()
                    .cloned()
                    .ok_or_else(|| CompileError::unsupported("extend() without argument"))?;
                let (value, cleanup) = prep_value(self, &code, needs_try, is_dynamic);
                self.emit(format!("try runtime.PyList.extend({receiver}, {value});"));
                if cleanup {
                    self.emit(format!("runtime.decref({value}, allocator);"));
                }
            }
            (RuntimeType::PyList, "insert") => {
                if prepared.len() != 2 {
                    return Err(CompileError::unsupported("insert() arguments"));
                }
                let (index_code, _, _) = prepared[0].clone();
                let (code, needs_try, is_dynamic) = prepared[1].clone();
                let (value, cleanup) = prep_value(self, &code, needs_try, is_dynamic);
                self.emit(format!(
                    "try runtime.PyList.insert({receiver}, allocator, {index_code}, {value});"
                ));
                if cleanup {
                    self.emit(format!("runtime.decref({value}, allocator);"));
                }
            }
            (RuntimeType::PyList, "clear") => {
                self.emit(format!("runtime.PyList.clear({receiver}, allocator);"));
            }
            (RuntimeType::PyList, "reverse") => {
                self.emit(format!("runtime.PyList.reverse({receiver});"));
            }
            (RuntimeType::PyList, "sort") => {
                self.emit(format!("runtime.PyList.sort({receiver});"));
            }
            (RuntimeType::PyDict, "update") => {
                let (code, needs_try, is_dynamic) = prepared
                    .first()
                    .cloned()
                    .ok_or_else(|| CompileError::unsupported("update() without argument"))?;
                let (value, cleanup) = prep_value(self, &code, needs_try, is_dynamic);
                self.emit(format!("try runtime.PyDict.update({receiver}, {value});"));
                if cleanup {
                    self.emit(format!("runtime.decref({value}, allocator);"));
                }
            }
            (RuntimeType::PyDict, "clear") => {
                self.emit(format!("runtime.PyDict.clear({receiver}, allocator);"));
            }
            (receiver_type, runtime_fn) => {
                return Err(CompileError::unsupported(format!(
                    "statement method {}.{runtime_fn}",
                    receiver_type.as_str()
                )))
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expression statements and print
    // ------------------------------------------------------------------

    fn emit_expr_stmt(&mut self, node: &'a ast::StmtExpr) -> CompileResult<()> {
        if is_docstring_expr(&node.value) {
            return Ok(());
        }

        if let ast::Expr::Call(call) = node.value.as_ref() {
            if let ast::Expr::Name(func) = call.func.as_ref() {
                if func.id.as_str() == "print" {
                    return self.emit_print(call);
                }
            }
        }

        match self.lower_expr(&node.value)? {
            LoweredExpr::MethodStatement(call) => self.expand_statement_method(*call),
            LoweredExpr::Sum { list_code } => {
                let result = self.expand_sum(&list_code);
                self.emit(format!("_ = {result};"));
                Ok(())
            }
            LoweredExpr::Contains(test) => {
                let code = self.realize_contains(*test);
                self.emit(format!("_ = {code};"));
                Ok(())
            }
            LoweredExpr::Plain(lowered) => {
                let (code, needs_try) = self.realize(lowered);
                if needs_try {
                    if self.try_stack.is_empty() {
                        self.emit(format!("_ = try {code};"));
                    } else {
                        self.emit_guarded("_", &code)?;
                    }
                } else {
                    self.emit(format!("_ = {code};"));
                }
                Ok(())
            }
        }
    }

    fn emit_print(&mut self, call: &'a ast::ExprCall) -> CompileResult<()> {
        let Some(arg) = call.args.first() else {
            self.emit("std.debug.print(\"\\n\", .{});");
            return Ok(());
        };

        // String literal: scoped temporary with paired decrement
        if let ast::Expr::Constant(c) = arg {
            if let ast::Constant::Str(s) = &c.value {
                let temp = self.fresh("temp_print_str");
                self.emit(format!(
                    "const {temp} = try runtime.PyString.create(allocator, \"{}\");",
                    zig_escape(s)
                ));
                self.emit(format!("defer runtime.decref({temp}, allocator);"));
                self.emit(format!(
                    "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                ));
                return Ok(());
            }
        }

        // Concatenation chains print their owned result and release it
        if let ast::Expr::BinOp(b) = arg {
            if matches!(b.op, ast::Operator::Add) && self.expr_is_stringish(arg) {
                let result = self.emit_concat_chain(arg, "print")?;
                self.emit(format!("defer runtime.decref({result}, allocator);"));
                self.emit(format!(
                    "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({result})}});"
                ));
                return Ok(());
            }
        }

        match self.lower_expr(arg)? {
            LoweredExpr::Sum { list_code } => {
                let result = self.expand_sum(&list_code);
                self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{result}}});"));
                Ok(())
            }
            LoweredExpr::Contains(test) => {
                let code = self.realize_contains(*test);
                self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
                Ok(())
            }
            LoweredExpr::MethodStatement(call) => Err(CompileError::unsupported(format!(
                "print of {}",
                call.descriptor.name
            ))),
            LoweredExpr::Plain(lowered) => {
                let (code, needs_try) = self.realize(lowered);
                self.emit_print_value(arg, &code, needs_try)
            }
        }
    }

    /// Select the print rendering by the argument's type tag, binding owned
    /// intermediates to scoped temporaries and emitting the runtime
    /// tag-switch where the concrete kind is only known at runtime.
    fn emit_print_value(
        &mut self,
        arg: &'a ast::Expr,
        code: &str,
        needs_try: bool,
    ) -> CompileResult<()> {
        match arg {
            ast::Expr::Name(name) => {
                let tag = self.var_types.get(name.id.as_str()).cloned();
                match tag {
                    Some(TypeTag::List | TypeTag::Tuple) => {
                        self.emit(format!("runtime.printList({code});"));
                        self.emit("std.debug.print(\"\\n\", .{});");
                    }
                    Some(TypeTag::Dict) => {
                        self.emit(format!("runtime.printDict({code});"));
                        self.emit("std.debug.print(\"\\n\", .{});");
                    }
                    Some(TypeTag::Str) => {
                        self.emit(format!(
                            "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({code})}});"
                        ));
                    }
                    Some(TypeTag::PyInt) => {
                        self.emit(format!(
                            "std.debug.print(\"{{}}\\n\", .{{runtime.PyInt.getValue({code})}});"
                        ));
                    }
                    Some(TypeTag::PyObject) => {
                        let temp = self.fresh("temp_print");
                        self.emit(format!("const {temp} = {code};"));
                        self.emit_tag_switch(&temp);
                    }
                    Some(TypeTag::Float) => {
                        self.emit(format!("std.debug.print(\"{{d}}\\n\", .{{{code}}});"));
                    }
                    _ => {
                        self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
                    }
                }
                Ok(())
            }

            ast::Expr::Subscript(s) => {
                let source_tag = self.name_tag(&s.value);
                let is_slice = matches!(s.slice.as_ref(), ast::Expr::Slice(_));
                let temp = self.fresh("temp_print");
                if needs_try {
                    if self.try_stack.is_empty() {
                        self.emit(format!("const {temp} = try {code};"));
                    } else {
                        self.emit_guarded(&format!("const {temp}"), code)?;
                    }
                } else {
                    self.emit(format!("const {temp} = {code};"));
                }

                if is_slice {
                    // Slices are freshly allocated: the print site owns them
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    match source_tag {
                        Some(TypeTag::List | TypeTag::Tuple) => {
                            self.emit(format!("runtime.printList({temp});"));
                            self.emit("std.debug.print(\"\\n\", .{});");
                        }
                        Some(TypeTag::Str) => {
                            self.emit(format!(
                                "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                            ));
                        }
                        _ => self.emit_tag_switch(&temp),
                    }
                    return Ok(());
                }

                match source_tag {
                    Some(TypeTag::Dict) => self.emit_tag_switch(&temp),
                    Some(TypeTag::Tuple) => {
                        let elem = match s.value.as_ref() {
                            ast::Expr::Name(n) => {
                                self.tuple_element_types.get(n.id.as_str()).cloned()
                            }
                            _ => None,
                        };
                        match elem {
                            Some(TypeTag::Str) => self.emit(format!(
                                "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                            )),
                            Some(TypeTag::Int) => self.emit(format!(
                                "std.debug.print(\"{{}}\\n\", .{{runtime.PyInt.getValue({temp})}});"
                            )),
                            _ => self.emit_tag_switch(&temp),
                        }
                    }
                    Some(TypeTag::Str) => {
                        // A single-character string is a fresh allocation
                        self.emit(format!("defer runtime.decref({temp}, allocator);"));
                        self.emit(format!(
                            "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                        ));
                    }
                    _ => {
                        // List elements are borrowed; format by element kind
                        let elem = match s.value.as_ref() {
                            ast::Expr::Name(n) => {
                                self.list_element_types.get(n.id.as_str()).cloned()
                            }
                            _ => None,
                        };
                        match elem {
                            Some(TypeTag::Str) => self.emit(format!(
                                "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                            )),
                            Some(TypeTag::Tuple) => {
                                self.emit(format!("runtime.printList({temp});"));
                                self.emit("std.debug.print(\"\\n\", .{});");
                            }
                            _ => self.emit(format!(
                                "std.debug.print(\"{{}}\\n\", .{{runtime.PyInt.getValue({temp})}});"
                            )),
                        }
                    }
                }
                Ok(())
            }

            ast::Expr::Attribute(attr) => {
                // Field read: borrowed, printed by the field's declared type
                let field_is_object = match self.name_tag(&attr.value) {
                    Some(TypeTag::Instance(class_name)) => self
                        .class_definitions
                        .get(&class_name)
                        .and_then(|info| info.fields.get(attr.attr.as_str()))
                        .is_some_and(|ty| ty == "*runtime.PyObject"),
                    _ => false,
                };
                if field_is_object {
                    self.emit(format!(
                        "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({code})}});"
                    ));
                } else {
                    self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
                }
                Ok(())
            }

            ast::Expr::Call(c) => self.emit_print_call_result(c, code, needs_try),

            _ => {
                if needs_try {
                    let temp = self.fresh("temp_print");
                    if self.try_stack.is_empty() {
                        self.emit(format!("const {temp} = try {code};"));
                    } else {
                        self.emit_guarded(&format!("const {temp}"), code)?;
                    }
                    self.emit(format!("defer runtime.decref({temp}, allocator);"));
                    self.emit(format!(
                        "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                    ));
                } else {
                    self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
                }
                Ok(())
            }
        }
    }

    fn emit_print_call_result(
        &mut self,
        call: &'a ast::ExprCall,
        code: &str,
        needs_try: bool,
    ) -> CompileResult<()> {
        // Method calls
        if let ast::Expr::Attribute(attr) = call.func.as_ref() {
            let receiver_tag = self.name_tag(&attr.value);
            let key = receiver_tag.as_ref().and_then(TypeTag::registry_key);
            let descriptor = self.registry.get(attr.attr.as_str(), key).cloned();

            if let Some(descriptor) = &descriptor {
                match descriptor.returns {
                    ReturnKind::Int => {
                        if needs_try {
                            let temp = self.fresh("temp_print");
                            self.emit(format!("const {temp} = try {code};"));
                            self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{temp}}});"));
                        } else {
                            self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
                        }
                        return Ok(());
                    }
                    ReturnKind::PyObjectDirect => {
                        let temp = self.fresh("temp_print");
                        self.emit(format!("const {temp} = {code};"));
                        self.emit(format!("defer runtime.decref({temp}, allocator);"));
                        self.emit_tag_switch(&temp);
                        return Ok(());
                    }
                    ReturnKind::PyObject => {
                        let temp = self.fresh("temp_print");
                        if self.try_stack.is_empty() {
                            self.emit(format!("const {temp} = try {code};"));
                        } else {
                            self.emit_guarded(&format!("const {temp}"), code)?;
                        }
                        self.emit(format!("defer runtime.decref({temp}, allocator);"));
                        match (&receiver_tag, descriptor.name) {
                            (_, "split") | (_, "keys") | (_, "values") | (_, "items")
                            | (_, "copy") => {
                                self.emit(format!("runtime.printList({temp});"));
                                self.emit("std.debug.print(\"\\n\", .{});");
                            }
                            (_, "pop") => self.emit_tag_switch(&temp),
                            (Some(TypeTag::Str), _) => self.emit(format!(
                                "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                            )),
                            _ => self.emit(format!(
                                "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                            )),
                        }
                        return Ok(());
                    }
                    ReturnKind::Void => {}
                }
            }
        }

        // User function / constructor / builtin calls
        if needs_try {
            let returns_object = match call.func.as_ref() {
                ast::Expr::Name(name) => match self.function_signatures.get(name.id.as_str()) {
                    Some(sig) => sig.returns_pyobject,
                    // Builtins reaching here (str, range) return objects
                    None => !self.class_definitions.contains_key(name.id.as_str()),
                },
                ast::Expr::Attribute(attr) => {
                    // Module function or instance method
                    match self.name_tag(&attr.value) {
                        Some(TypeTag::Instance(class_name)) => self
                            .lookup_method(&class_name, attr.attr.as_str())
                            .is_some_and(|sig| sig.return_type == "*runtime.PyObject"),
                        _ => {
                            if let ast::Expr::Name(module) = attr.value.as_ref() {
                                self.module_functions
                                    .get(module.id.as_str())
                                    .and_then(|funcs| funcs.get(attr.attr.as_str()))
                                    .is_some_and(|entry| entry.signature.returns_pyobject)
                            } else {
                                true
                            }
                        }
                    }
                }
                _ => true,
            };

            let temp = self.fresh("temp_print");
            if self.try_stack.is_empty() {
                self.emit(format!("const {temp} = try {code};"));
            } else {
                self.emit_guarded(&format!("const {temp}"), code)?;
            }
            if returns_object {
                self.emit(format!("defer runtime.decref({temp}, allocator);"));
                self.emit(format!(
                    "std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
                ));
            } else {
                self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{temp}}});"));
            }
        } else {
            self.emit(format!("std.debug.print(\"{{}}\\n\", .{{{code}}});"));
        }
        Ok(())
    }

    /// Print a value whose concrete kind is only known at runtime.
    fn emit_tag_switch(&mut self, temp: &str) {
        self.emit(format!("if ({temp}.type_id == .string) {{"));
        self.emit(format!(
            "    std.debug.print(\"{{s}}\\n\", .{{runtime.PyString.getValue({temp})}});"
        ));
        self.emit(format!("}} else if ({temp}.type_id == .int) {{"));
        self.emit(format!(
            "    std.debug.print(\"{{}}\\n\", .{{runtime.PyInt.getValue({temp})}});"
        ));
        self.emit(format!(
            "}} else if ({temp}.type_id == .list or {temp}.type_id == .tuple) {{"
        ));
        self.emit(format!("    runtime.printList({temp});"));
        self.emit("    std.debug.print(\"\\n\", .{});");
        self.emit("} else {");
        self.emit(format!("    runtime.printDict({temp});"));
        self.emit("    std.debug.print(\"\\n\", .{});");
        self.emit("}");
    }

    // ------------------------------------------------------------------
    // Function definitions
    // ------------------------------------------------------------------

    pub(crate) fn emit_function_def(&mut self, node: &'a ast::StmtFunctionDef) -> CompileResult<()> {
        if !node.decorator_list.is_empty() {
            return Err(CompileError::unsupported("decorators"));
        }

        let name = node.name.to_string();
        let mut sig = match self.function_signatures.get(&name) {
            Some(sig) => sig.clone(),
            None => function_signature(node, &[]),
        };
        let needs_allocator = sig.needs_allocator;
        let needs_error = sig.returns_error;

        let mut return_type = match &node.returns {
            Some(annotation) => self.zig_type(annotation, needs_allocator),
            None => "void".to_string(),
        };
        if needs_error {
            return_type = format!("!{return_type}");
        }
        sig.return_type = return_type.clone();
        self.function_signatures.insert(name.clone(), sig.clone());

        let mut params = Vec::new();
        if needs_allocator {
            params.push("allocator: std.mem.Allocator".to_string());
        }
        for arg in &node.args.args {
            let arg_type = match &arg.def.annotation {
                Some(annotation) => self.zig_type(annotation, needs_allocator),
                None => "i64".to_string(),
            };
            params.push(format!("{}: {arg_type}", arg.def.arg));
        }

        self.emit(format!("fn {name}({}) {return_type} {{", params.join(", ")));
        self.push_indent();

        let saved_params = std::mem::take(&mut self.function_params);
        let saved_types = self.var_types.clone();
        let saved_declared = self.declared_vars.clone();
        let saved_returns_dynamic = self.current_fn_returns_dynamic;
        self.current_fn_returns_dynamic = sig.returns_pyobject;

        for arg in &node.args.args {
            let arg_name = arg.def.arg.to_string();
            self.function_params.insert(arg_name.clone());
            if let Some(annotation) = &arg.def.annotation {
                if let ast::Expr::Name(type_name) = annotation.as_ref() {
                    let tag = match type_name.id.as_str() {
                        "str" => Some(TypeTag::Str),
                        "list" => Some(TypeTag::List),
                        "dict" => Some(TypeTag::Dict),
                        "int" => Some(TypeTag::Int),
                        "float" => Some(TypeTag::Float),
                        "bool" => Some(TypeTag::Bool),
                        _ => None,
                    };
                    if let Some(tag) = tag {
                        self.var_types.insert(arg_name, tag);
                    }
                }
            }
        }

        for stmt in &node.body {
            self.emit_stmt(stmt)?;
        }

        self.function_params = saved_params;
        self.var_types = saved_types;
        self.declared_vars = saved_declared;
        self.current_fn_returns_dynamic = saved_returns_dynamic;

        self.pop_indent();
        self.emit("}");
        self.emit("");
        Ok(())
    }

    /// Convert a Python type annotation to a Zig type.
    pub(crate) fn zig_type(&self, node: &ast::Expr, for_runtime: bool) -> String {
        match node {
            ast::Expr::Name(name) => {
                helpers::map_annotation(name.id.as_str(), for_runtime || self.needs_runtime)
                    .to_string()
            }
            _ => "anytype".to_string(),
        }
    }
}

fn is_docstring(stmt: &ast::Stmt) -> bool {
    match stmt {
        ast::Stmt::Expr(e) => is_docstring_expr(&e.value),
        _ => false,
    }
}

fn is_docstring_expr(expr: &ast::Expr) -> bool {
    matches!(
        expr,
        ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_))
    )
}
